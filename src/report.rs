use std::fmt::Write;

use chrono::NaiveDate;

use crate::aggregate::{
    absentees_with_leave, compute_absentees_for_day, compute_rate, compute_trend, rates_by_student,
    roster_day_summaries, window_start,
};
use crate::error::Unavailable;
use crate::filter::{apply_filters, AudienceFilter, AudienceScope, DateFilter, QueryFilter};
use crate::identity::NormalizedKey;
use crate::models::{AttendanceEvent, AttendanceRate, LeaveRequest, Notice, Student};
use crate::reconcile::join_warnings;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub today: NaiveDate,
    pub window_days: u32,
    pub viewer: Option<NormalizedKey>,
    pub limit: usize,
}

pub fn format_rate(rate: &AttendanceRate) -> String {
    format!(
        "{}% ({} present, {} absent, {} late, {} half day, {} total)",
        rate.percentage,
        rate.present_count,
        rate.absent_count,
        rate.late_count,
        rate.half_day_count,
        rate.total_count
    )
}

pub fn format_notice(notice: &Notice) -> String {
    let flag = if notice.important { " [important]" } else { "" };
    let posted = notice
        .posted_date
        .map_or_else(|| "undated".to_string(), |d| d.to_string());
    let sender = notice
        .sender
        .as_ref()
        .map_or("unknown sender", NormalizedKey::as_str);
    format!("{}{} ({}, {})", notice.title, flag, sender, posted)
}

/// Absentees among `scope` on `day`, annotated with approved leave. When the leaves collection
/// failed, the list says so instead of implying nobody is on leave.
pub fn absentee_section(
    scope: &[Student],
    events: &[AttendanceEvent],
    leaves: Result<&[LeaveRequest], Unavailable>,
    day: NaiveDate,
    limit: usize,
) -> String {
    let mut output = String::new();

    if !events.iter().any(|event| event.date == Some(day)) {
        let _ = writeln!(
            output,
            "No attendance was taken on {day}; every student counts as absent."
        );
    }
    let leave_records: &[LeaveRequest] = match leaves {
        Ok(leaves) => leaves,
        Err(err) => {
            let _ = writeln!(output, "Leave records unavailable: {err}");
            &[]
        }
    };

    let absentees = compute_absentees_for_day(scope, events, day);
    let annotated = absentees_with_leave(&absentees, leave_records, day);
    let _ = writeln!(output, "{} of {} students absent on {}.", annotated.len(), scope.len(), day);
    for absentee in annotated.iter().take(limit) {
        let roster = absentee
            .student
            .roster()
            .map_or_else(|| "no class".to_string(), |r| r.to_string());
        let leave = match &absentee.approved_leave {
            Some(leave) => format!(" (on leave: {})", leave.reason),
            None => String::new(),
        };
        let _ = writeln!(output, "- {} ({}){}", absentee.student.name, roster, leave);
    }
    if annotated.len() > limit {
        let _ = writeln!(output, "- ...and {} more", annotated.len() - limit);
    }

    output
}

/// Markdown dashboard for one snapshot. Sections whose collections failed say so instead of
/// showing zeros.
pub fn build_report(snapshot: &Snapshot, options: &ReportOptions) -> String {
    let mut output = String::new();
    let today = options.today;

    let _ = writeln!(output, "# School Attendance Dashboard");
    let _ = writeln!(
        output,
        "Generated for {} (snapshot {}, generation {})",
        today, snapshot.id, snapshot.generation
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Today's Attendance");
    match snapshot.enriched_attendance() {
        Ok(enriched) => {
            let todays = apply_filters(
                &enriched,
                &QueryFilter {
                    date: Some(DateFilter::On(today)),
                    ..QueryFilter::default()
                },
            );
            if todays.is_empty() {
                let _ = writeln!(output, "No attendance recorded for {today}.");
            } else {
                let _ = writeln!(output, "- {}", format_rate(&compute_rate(&todays)));
            }
        }
        Err(err) => {
            let _ = writeln!(output, "Section unavailable: {err}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Class Summaries");
    match (snapshot.students(), snapshot.attendance()) {
        (Ok(students), Ok(events)) => {
            let summaries = roster_day_summaries(students, events, today);
            if summaries.is_empty() {
                let _ = writeln!(output, "No students are assigned to a class.");
            }
            for summary in summaries {
                let _ = writeln!(
                    output,
                    "- {}: {}% ({} of {} present)",
                    summary.roster, summary.percentage, summary.present, summary.student_count
                );
            }
        }
        (Err(err), _) | (_, Err(err)) => {
            let _ = writeln!(output, "Section unavailable: {err}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Absentees");
    match (snapshot.students(), snapshot.attendance()) {
        (Ok(students), Ok(events)) => {
            output.push_str(&absentee_section(students, events, snapshot.leaves(), today, options.limit));
        }
        (Err(err), _) | (_, Err(err)) => {
            let _ = writeln!(output, "Section unavailable: {err}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## {}-Day Trend", options.window_days);
    match snapshot.attendance() {
        Ok(events) => {
            let _ = writeln!(output, "| Day | Present | Absent | Total |");
            let _ = writeln!(output, "|---|---|---|---|");
            for point in compute_trend(events, options.window_days, today) {
                let _ = writeln!(
                    output,
                    "| {} | {} | {} | {} |",
                    point.day, point.present_count, point.absent_count, point.total
                );
            }
        }
        Err(err) => {
            let _ = writeln!(output, "Section unavailable: {err}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Attendance");
    match snapshot.enriched_attendance() {
        Ok(enriched) => {
            let window = QueryFilter {
                date: Some(DateFilter::Between(
                    window_start(today, options.window_days).unwrap_or(NaiveDate::MIN),
                    today,
                )),
                ..QueryFilter::default()
            };
            let in_window: Vec<_> = apply_filters(&enriched, &window).into_iter().cloned().collect();
            let rates = rates_by_student(&in_window);
            if rates.is_empty() {
                let _ = writeln!(output, "No attendance in this window.");
            }
            for rate in rates.iter().take(options.limit) {
                let _ = writeln!(output, "- {} ({}) {}", rate.name, rate.identity, format_rate(&rate.rate));
            }
        }
        Err(err) => {
            let _ = writeln!(output, "Section unavailable: {err}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Quality");
    match snapshot.enriched_attendance() {
        Ok(enriched) => {
            let warnings = join_warnings(&enriched);
            if warnings.is_empty() {
                let _ = writeln!(output, "Every attendance record matched a student.");
            }
            for (index, warning) in warnings.iter().take(options.limit) {
                let row = &enriched[*index];
                let day = row.event.date.map_or_else(|| "undated".to_string(), |d| d.to_string());
                let _ = writeln!(output, "- record {} on {}: {}", index, day, warning);
            }
            if warnings.len() > options.limit {
                let _ = writeln!(output, "- ...and {} more", warnings.len() - options.limit);
            }
        }
        Err(err) => {
            let _ = writeln!(output, "Section unavailable: {err}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Notices");
    match snapshot.notices() {
        Ok(notices) => {
            let filter = QueryFilter {
                audience: options.viewer.clone().map(|viewer| AudienceFilter {
                    viewer,
                    scope: AudienceScope::ForMe,
                }),
                ..QueryFilter::default()
            };
            let visible: Vec<&Notice> = apply_filters(notices, &filter)
                .into_iter()
                .filter(|notice| notice.is_active_on(today))
                .collect();
            if visible.is_empty() {
                let _ = writeln!(output, "No active notices.");
            }
            for notice in visible.iter().take(options.limit) {
                let _ = writeln!(output, "- {}", format_notice(notice));
            }
        }
        Err(err) => {
            let _ = writeln!(output, "Section unavailable: {err}");
        }
    }

    let failures = snapshot.failures();
    if !failures.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Unavailable Collections");
        for failure in failures {
            let _ = writeln!(output, "- {failure} (retry the reload to refresh)");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::loader::CollectionName;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn options() -> ReportOptions {
        ReportOptions {
            today: day(15),
            window_days: 3,
            viewer: NormalizedKey::parse("q@x.com"),
            limit: 10,
        }
    }

    #[test]
    fn report_renders_every_section() {
        let mut loaded = BTreeMap::new();
        loaded.insert(
            CollectionName::Students,
            Ok(vec![
                json!({"email": "a@x.com", "name": "Ann", "class_name": "5", "section": "A"}),
                json!({"email": "b@x.com", "name": "Ben", "class_name": "5", "section": "A"}),
            ]),
        );
        loaded.insert(
            CollectionName::Attendance,
            Ok(vec![
                json!({"student_email": "A@x.com", "status": "Present", "date": "2024-01-15"}),
                json!({"student_email": "zed@x.com", "status": "Absent", "date": "2024-01-15"}),
            ]),
        );
        loaded.insert(
            CollectionName::Notices,
            Ok(vec![
                json!({"notice_by": "p@x.com", "notice_to": "", "title": "Sports day", "posted_date": "2024-01-10"}),
                json!({"notice_by": "p@x.com", "notice_to": "r@x.com", "title": "Private"}),
            ]),
        );
        loaded.insert(CollectionName::Leaves, Err(LoadError::Network("timeout".to_string())));
        let snapshot = Snapshot::from_loaded(1, loaded);

        let report = build_report(&snapshot, &options());

        assert!(report.contains("## Today's Attendance"));
        assert!(report.contains("- 50% (1 present, 1 absent"));
        assert!(report.contains("- 5 A: 50% (1 of 2 present)"));
        assert!(report.contains("- Ben (5 A)"));
        assert!(report.contains("| 2024-01-15 | 1 | 1 | 2 |"));
        assert!(report.contains("| 2024-01-13 | 0 | 0 | 0 |"));
        assert!(report.contains("no match for zed@x.com"));
        assert!(report.contains("Sports day"));
        assert!(!report.contains("Private"));
        assert!(report.contains("Leave records unavailable"));
        assert!(report.contains("## Unavailable Collections"));
    }

    #[test]
    fn missing_attendance_is_reported_as_unavailable() {
        let mut loaded = BTreeMap::new();
        loaded.insert(CollectionName::Students, Ok(vec![json!({"email": "a@x.com"})]));
        loaded.insert(
            CollectionName::Attendance,
            Err(LoadError::Status {
                status: 500,
                message: "boom".to_string(),
            }),
        );
        let snapshot = Snapshot::from_loaded(1, loaded);

        let report = build_report(&snapshot, &options());
        assert!(report.contains("Section unavailable: attendance is unavailable: HTTP 500: boom"));
        assert!(!report.contains("0% ("));
    }

    fn absentee_snapshot(leaves: Result<Vec<serde_json::Value>, LoadError>) -> Snapshot {
        let mut loaded = BTreeMap::new();
        loaded.insert(
            CollectionName::Students,
            Ok(vec![
                json!({"email": "a@x.com", "name": "Ann", "class_name": "5"}),
                json!({"email": "b@x.com", "name": "Ben", "class_name": "5"}),
            ]),
        );
        loaded.insert(
            CollectionName::Attendance,
            Ok(vec![json!({"student_email": "a@x.com", "status": "Present", "date": "2024-01-15"})]),
        );
        loaded.insert(CollectionName::Leaves, leaves);
        Snapshot::from_loaded(1, loaded)
    }

    #[test]
    fn absentees_note_approved_leave() {
        let snapshot = absentee_snapshot(Ok(vec![json!({
            "email": "b@x.com", "from_date": "2024-01-14", "to_date": "2024-01-16",
            "reason": "Flu", "status": "Approved"
        })]));

        let section = absentee_section(
            snapshot.students().unwrap(),
            snapshot.attendance().unwrap(),
            snapshot.leaves(),
            day(15),
            usize::MAX,
        );
        assert!(section.contains("1 of 2 students absent on 2024-01-15."));
        assert!(section.contains("- Ben (5) (on leave: Flu)"));
        assert!(!section.contains("unavailable"));
    }

    #[test]
    fn failed_leaves_are_called_out_next_to_absentees() {
        let snapshot = absentee_snapshot(Err(LoadError::Status {
            status: 503,
            message: "down".to_string(),
        }));

        let section = absentee_section(
            snapshot.students().unwrap(),
            snapshot.attendance().unwrap(),
            snapshot.leaves(),
            day(15),
            usize::MAX,
        );
        assert!(section.contains("Leave records unavailable: leaves is unavailable: HTTP 503: down"));
        assert!(section.contains("- Ben (5)\n"));
    }

    #[test]
    fn oversized_window_renders_without_trend_rows() {
        let snapshot = absentee_snapshot(Ok(Vec::new()));
        let report = build_report(
            &snapshot,
            &ReportOptions {
                window_days: u32::MAX,
                ..options()
            },
        );

        assert!(report.contains("|---|---|---|---|\n\n## Lowest Attendance"));
        assert!(report.contains("- Ann (a@x.com) 100%"));
    }
}
