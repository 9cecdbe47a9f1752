use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration, NaiveDate, Utc};

use crate::error::InvariantViolation;
use crate::identity::NormalizedKey;
use crate::models::{
    Absentee, AttendanceEvent, AttendanceRate, AttendanceStatus, ChildRollup, EnrichedAttendance,
    GuardianWithChildren, LeaveRequest, RosterDaySummary, Student, StudentRate, TrendPoint,
};
use crate::reconcile::latest_per_subject_day;

/// Round-half-up integer percentage; zero when `total` is zero.
fn percent(present: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let (present, total) = (present as u128, total as u128);
    ((200 * present + total) / (2 * total)) as u32
}

/// Checked percentage for externally supplied counts, such as totals reported by the API. Counts
/// the engine tallies itself always satisfy `0 <= present <= total` and use the unchecked form.
pub fn percentage_of(present: i64, total: i64) -> Result<u32, InvariantViolation> {
    if present < 0 || total < 0 {
        return Err(InvariantViolation::NegativeCount { present, total });
    }
    if present > total {
        return Err(InvariantViolation::PresentExceedsTotal { present, total });
    }
    Ok(percent(present as usize, total as usize))
}

/// Counts per status after applying the last-event-per-day policy. Only `Present` counts toward
/// the percentage; every status counts toward the total.
pub fn compute_rate<E>(events: &[E]) -> AttendanceRate
where
    E: AsRef<AttendanceEvent>,
{
    let mut rate = AttendanceRate::default();

    for event in latest_per_subject_day(events) {
        match event.as_ref().status {
            AttendanceStatus::Present => rate.present_count += 1,
            AttendanceStatus::Absent => rate.absent_count += 1,
            AttendanceStatus::Late => rate.late_count += 1,
            AttendanceStatus::HalfDay => rate.half_day_count += 1,
            AttendanceStatus::Other(_) => {}
        }
        rate.total_count += 1;
    }

    rate.percentage = percent(rate.present_count, rate.total_count);
    rate
}

fn present_on<'a, E>(events: &'a [E], day: NaiveDate) -> HashSet<&'a NormalizedKey>
where
    E: AsRef<AttendanceEvent>,
{
    latest_per_subject_day(events)
        .into_iter()
        .map(|event| event.as_ref())
        .filter(|event| event.date == Some(day) && event.status == AttendanceStatus::Present)
        .filter_map(|event| event.subject.as_ref())
        .collect()
}

/// Closed-world absentees: every student in scope not marked `Present` on `day`.
///
/// A student with no event at all that day is absent, as is a student without an identity (it
/// can never match an event). Holidays and days nobody recorded therefore report everyone absent;
/// callers that need "unknown" must check whether any event exists for the day first.
pub fn compute_absentees_for_day<'s, E>(students: &'s [Student], events: &[E], day: NaiveDate) -> Vec<&'s Student>
where
    E: AsRef<AttendanceEvent>,
{
    let present = present_on(events, day);
    students
        .iter()
        .filter(|student| !student.identity.as_ref().is_some_and(|id| present.contains(id)))
        .collect()
}

/// Complement of [`compute_absentees_for_day`] over the same scope.
pub fn compute_present_for_day<'s, E>(students: &'s [Student], events: &[E], day: NaiveDate) -> Vec<&'s Student>
where
    E: AsRef<AttendanceEvent>,
{
    let present = present_on(events, day);
    students
        .iter()
        .filter(|student| student.identity.as_ref().is_some_and(|id| present.contains(id)))
        .collect()
}

/// Longest window the CLI accepts, roughly ten years.
pub const MAX_WINDOW_DAYS: u32 = 3660;

/// First day of a `days`-long window ending on `today`, or `None` when the window reaches past the
/// earliest representable date.
pub fn window_start(today: NaiveDate, days: u32) -> Option<NaiveDate> {
    today.checked_sub_signed(Duration::days(i64::from(days.max(1)) - 1))
}

/// One point per calendar day for the `window_days` days ending on `today`, zero-filled. Empty
/// when the window is zero days long or starts before the earliest representable date.
pub fn compute_trend<E>(events: &[E], window_days: u32, today: NaiveDate) -> Vec<TrendPoint>
where
    E: AsRef<AttendanceEvent>,
{
    if window_days == 0 {
        return Vec::new();
    }
    let Some(start) = window_start(today, window_days) else {
        tracing::warn!(window_days, %today, "trend window out of date range");
        return Vec::new();
    };

    let mut points: Vec<TrendPoint> = (0..i64::from(window_days))
        .map(|offset| TrendPoint {
            day: start + Duration::days(offset),
            present_count: 0,
            absent_count: 0,
            total: 0,
        })
        .collect();

    for event in latest_per_subject_day(events) {
        let event = event.as_ref();
        let Some(day) = event.date else {
            continue;
        };
        if day < start || day > today {
            continue;
        }
        let point = &mut points[(day - start).num_days() as usize];
        match event.status {
            AttendanceStatus::Present => point.present_count += 1,
            AttendanceStatus::Absent => point.absent_count += 1,
            _ => {}
        }
        point.total += 1;
    }

    points
}

pub fn trend_ending_today<E>(events: &[E], window_days: u32) -> Vec<TrendPoint>
where
    E: AsRef<AttendanceEvent>,
{
    compute_trend(events, window_days, Utc::now().date_naive())
}

/// Per-student rates over matched rows, lowest percentage first.
pub fn rates_by_student(enriched: &[EnrichedAttendance]) -> Vec<StudentRate> {
    let mut order: Vec<&Student> = Vec::new();
    let mut groups: HashMap<&NormalizedKey, Vec<&EnrichedAttendance>> = HashMap::new();

    for row in enriched {
        let Some(student) = &row.student else {
            continue;
        };
        let Some(identity) = &student.identity else {
            continue;
        };
        let group = groups.entry(identity).or_default();
        if group.is_empty() {
            order.push(student);
        }
        group.push(row);
    }

    let mut rates: Vec<StudentRate> = order
        .into_iter()
        .filter_map(|student| {
            let identity = student.identity.as_ref()?;
            let rows = groups.get(identity)?;
            Some(StudentRate {
                identity: identity.clone(),
                name: student.name.clone(),
                roster: student.roster(),
                rate: compute_rate(rows),
            })
        })
        .collect();

    rates.sort_by(|a, b| {
        a.rate
            .percentage
            .cmp(&b.rate.percentage)
            .then_with(|| a.name.cmp(&b.name))
    });
    rates
}

/// Attendance rate for each of a guardian's children, in child order.
pub fn guardian_rollup(guardian: &GuardianWithChildren, enriched: &[EnrichedAttendance]) -> Vec<ChildRollup> {
    guardian
        .children
        .iter()
        .map(|child| {
            let rows: Vec<&EnrichedAttendance> = match &child.identity {
                Some(identity) => enriched
                    .iter()
                    .filter(|row| row.event.subject.as_ref() == Some(identity))
                    .collect(),
                None => Vec::new(),
            };
            ChildRollup {
                child: child.clone(),
                rate: compute_rate(&rows),
            }
        })
        .collect()
}

/// Per class/section presence on `day`, using the closed-world absentee rule. Students without a
/// class are left out.
pub fn roster_day_summaries<E>(students: &[Student], events: &[E], day: NaiveDate) -> Vec<RosterDaySummary>
where
    E: AsRef<AttendanceEvent>,
{
    let present = present_on(events, day);
    let mut tallies: BTreeMap<_, (usize, usize)> = BTreeMap::new();

    for student in students {
        let Some(roster) = student.roster() else {
            continue;
        };
        let tally = tallies.entry(roster).or_insert((0, 0));
        tally.0 += 1;
        if student.identity.as_ref().is_some_and(|id| present.contains(id)) {
            tally.1 += 1;
        }
    }

    tallies
        .into_iter()
        .map(|(roster, (student_count, present))| RosterDaySummary {
            roster,
            student_count,
            present,
            absent: student_count - present,
            percentage: percent(present, student_count),
        })
        .collect()
}

/// Pairs closed-world absentees with an approved leave covering `day`, when one exists.
pub fn absentees_with_leave(absentees: &[&Student], leaves: &[LeaveRequest], day: NaiveDate) -> Vec<Absentee> {
    absentees
        .iter()
        .map(|student| {
            let approved_leave = student.identity.as_ref().and_then(|identity| {
                leaves
                    .iter()
                    .find(|leave| {
                        leave.applicant.as_ref() == Some(identity) && leave.is_approved() && leave.covers(day)
                    })
                    .cloned()
            });
            Absentee {
                student: (*student).clone(),
                approved_leave,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn student(email: &str) -> Student {
        Student {
            identity: NormalizedKey::parse(email),
            name: email.to_string(),
            class_name: Some("5".to_string()),
            section: Some("A".to_string()),
            guardian: None,
            roll_number: None,
        }
    }

    fn event(subject: &str, status: AttendanceStatus, date: NaiveDate) -> AttendanceEvent {
        AttendanceEvent {
            subject: NormalizedKey::parse(subject),
            date: Some(date),
            status,
            remarks: None,
            recorded_by: None,
        }
    }

    #[test]
    fn empty_rate_is_all_zero() {
        let rate = compute_rate::<AttendanceEvent>(&[]);
        assert_eq!(rate, AttendanceRate::default());
        assert_eq!(rate.percentage, 0);
    }

    #[test]
    fn rate_rounds_half_up() {
        assert_eq!(percent(1, 8), 13); // 12.5
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(5, 5), 100);
    }

    #[test]
    fn rate_counts_each_status_once_per_day() {
        let events = vec![
            event("a@x.com", AttendanceStatus::Absent, day(15)),
            event("a@x.com", AttendanceStatus::Present, day(15)),
            event("b@x.com", AttendanceStatus::Late, day(15)),
            event("c@x.com", AttendanceStatus::HalfDay, day(15)),
            event("d@x.com", AttendanceStatus::Absent, day(15)),
        ];

        let rate = compute_rate(&events);
        assert_eq!(rate.present_count, 1);
        assert_eq!(rate.absent_count, 1);
        assert_eq!(rate.late_count, 1);
        assert_eq!(rate.half_day_count, 1);
        assert_eq!(rate.total_count, 4);
        assert_eq!(rate.percentage, 25);
    }

    #[test]
    fn checked_percentage_rejects_bad_counts() {
        assert_eq!(percentage_of(0, 0), Ok(0));
        assert_eq!(percentage_of(3, 4), Ok(75));
        assert_eq!(
            percentage_of(-1, 4),
            Err(InvariantViolation::NegativeCount { present: -1, total: 4 })
        );
        assert_eq!(
            percentage_of(5, 4),
            Err(InvariantViolation::PresentExceedsTotal { present: 5, total: 4 })
        );
    }

    #[test]
    fn absentees_are_the_complement_of_present() {
        let students = vec![student("s1@x.com"), student("s2@x.com"), student("s3@x.com")];
        let events = vec![
            event("S1@x.com", AttendanceStatus::Present, day(15)),
            event("s2@x.com", AttendanceStatus::Present, day(14)),
            event("s3@x.com", AttendanceStatus::Late, day(15)),
        ];

        let absent = compute_absentees_for_day(&students, &events, day(15));
        let present = compute_present_for_day(&students, &events, day(15));

        let names: Vec<&str> = absent.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["s2@x.com", "s3@x.com"]);
        assert_eq!(present.len(), 1);
        assert_eq!(absent.len() + present.len(), students.len());
    }

    #[test]
    fn trend_is_zero_filled_and_contiguous() {
        let points = compute_trend::<AttendanceEvent>(&[], 7, day(20));
        assert_eq!(points.len(), 7);
        assert_eq!(points[0].day, day(14));
        assert_eq!(points[6].day, day(20));
        assert!(points.iter().all(|p| p.present_count == 0 && p.absent_count == 0 && p.total == 0));
        assert!(points.windows(2).all(|w| w[1].day - w[0].day == Duration::days(1)));
    }

    #[test]
    fn trend_buckets_events_inside_window() {
        let events = vec![
            event("a@x.com", AttendanceStatus::Present, day(20)),
            event("b@x.com", AttendanceStatus::Absent, day(20)),
            event("c@x.com", AttendanceStatus::Late, day(19)),
            event("a@x.com", AttendanceStatus::Present, day(1)),
            event("a@x.com", AttendanceStatus::Present, day(21)),
        ];

        let points = compute_trend(&events, 3, day(20));
        assert_eq!(points.len(), 3);
        assert_eq!((points[2].present_count, points[2].absent_count, points[2].total), (1, 1, 2));
        assert_eq!((points[1].present_count, points[1].total), (0, 1));
        assert_eq!(points[0].total, 0);
        assert!(compute_trend(&events, 0, day(20)).is_empty());
    }

    #[test]
    fn window_past_calendar_start_is_empty_not_a_panic() {
        assert_eq!(window_start(day(20), 3), Some(day(18)));
        assert_eq!(window_start(day(20), 0), Some(day(20)));
        assert_eq!(window_start(day(20), u32::MAX), None);
        assert!(compute_trend::<AttendanceEvent>(&[], 200_000_000, day(20)).is_empty());
        assert_eq!(compute_trend::<AttendanceEvent>(&[], MAX_WINDOW_DAYS, day(20)).len(), 3660);
    }

    #[test]
    fn student_rates_sort_lowest_first() {
        let students = vec![student("a@x.com"), student("b@x.com")];
        let events = vec![
            event("a@x.com", AttendanceStatus::Present, day(14)),
            event("a@x.com", AttendanceStatus::Present, day(15)),
            event("b@x.com", AttendanceStatus::Absent, day(14)),
            event("b@x.com", AttendanceStatus::Present, day(15)),
            event("ghost@x.com", AttendanceStatus::Absent, day(15)),
        ];
        let enriched = crate::reconcile::reconcile_attendance(&students, &events);

        let rates = rates_by_student(&enriched);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].name, "b@x.com");
        assert_eq!(rates[0].rate.percentage, 50);
        assert_eq!(rates[1].rate.percentage, 100);
    }

    #[test]
    fn roster_summaries_group_by_class_and_section() {
        let mut b = student("b@x.com");
        b.section = Some("B".to_string());
        let students = vec![student("a@x.com"), student("c@x.com"), b];
        let events = vec![event("a@x.com", AttendanceStatus::Present, day(15))];

        let summaries = roster_day_summaries(&students, &events, day(15));
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].roster.to_string(), "5 A");
        assert_eq!((summaries[0].present, summaries[0].absent, summaries[0].percentage), (1, 1, 50));
        assert_eq!((summaries[1].present, summaries[1].absent), (0, 1));
    }

    #[test]
    fn absentees_pick_up_approved_leave() {
        let s1 = student("s1@x.com");
        let s2 = student("s2@x.com");
        let leaves = vec![
            LeaveRequest {
                applicant: NormalizedKey::parse("s1@x.com"),
                from_date: Some(day(14)),
                to_date: Some(day(16)),
                reason: "Flu".to_string(),
                status: "Approved".to_string(),
            },
            LeaveRequest {
                applicant: NormalizedKey::parse("s2@x.com"),
                from_date: Some(day(15)),
                to_date: None,
                reason: "Trip".to_string(),
                status: "Pending".to_string(),
            },
        ];

        let annotated = absentees_with_leave(&[&s1, &s2], &leaves, day(15));
        assert_eq!(annotated[0].approved_leave.as_ref().map(|l| l.reason.as_str()), Some("Flu"));
        assert!(annotated[1].approved_leave.is_none());
    }
}
