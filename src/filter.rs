use chrono::NaiveDate;

use crate::identity::NormalizedKey;
use crate::models::{
    Audience, AttendanceStatus, EnrichedAttendance, LeaveRequest, Notice, ProgressReport, Roster,
    Student,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Name,
    Identity,
    Class,
    Section,
    Remarks,
    Title,
    Description,
    Status,
}

/// Case-insensitive substring search over the listed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub needle: String,
    pub fields: Vec<SearchField>,
}

impl Search {
    pub fn new(needle: impl Into<String>, fields: &[SearchField]) -> Self {
        Self {
            needle: needle.into(),
            fields: fields.to_vec(),
        }
    }

    fn matches<T: Queryable + ?Sized>(&self, record: &T) -> bool {
        let needle = self.needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.fields
            .iter()
            .filter_map(|field| record.text(*field))
            .any(|value| value.to_lowercase().contains(&needle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    On(NaiveDate),
    /// Inclusive on both ends.
    Between(NaiveDate, NaiveDate),
}

impl DateFilter {
    pub fn contains(&self, day: NaiveDate) -> bool {
        match *self {
            DateFilter::On(on) => day == on,
            DateFilter::Between(from, to) => from <= day && day <= to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudienceScope {
    ForMe,
    ByMe,
    Either,
}

/// The viewer is always passed in explicitly; nothing here looks up a current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudienceFilter {
    pub viewer: NormalizedKey,
    pub scope: AudienceScope,
}

/// Broadcast notices, and notices addressed to the viewer.
pub fn notice_is_for(notice: &Notice, viewer: &NormalizedKey) -> bool {
    match &notice.audience {
        Audience::Broadcast => true,
        Audience::Person(to) => to == viewer,
    }
}

pub fn notice_is_by(notice: &Notice, viewer: &NormalizedKey) -> bool {
    notice.sender.as_ref() == Some(viewer)
}

/// Predicates are ANDed. A record that has no value for a requested dimension does not match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub search: Option<Search>,
    pub roster: Option<Roster>,
    pub status: Option<AttendanceStatus>,
    pub date: Option<DateFilter>,
    pub audience: Option<AudienceFilter>,
}

impl QueryFilter {
    pub fn matches<T: Queryable + ?Sized>(&self, record: &T) -> bool {
        if let Some(search) = &self.search {
            if !search.matches(record) {
                return false;
            }
        }
        if let Some(roster) = &self.roster {
            let (class_name, section) = record.class_and_section();
            if !roster.contains(class_name, section) {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if record.status() != Some(status) {
                return false;
            }
        }
        if let Some(date) = &self.date {
            if !record.day().is_some_and(|day| date.contains(day)) {
                return false;
            }
        }
        if let Some(audience) = &self.audience {
            if record.audience_matches(audience) != Some(true) {
                return false;
            }
        }
        true
    }
}

/// Returns the matching records in input order. The input is never modified.
pub fn apply_filters<'a, T: Queryable>(records: &'a [T], filter: &QueryFilter) -> Vec<&'a T> {
    records.iter().filter(|record| filter.matches(*record)).collect()
}

/// Something the query layer can filter.
pub trait Queryable {
    fn text(&self, field: SearchField) -> Option<&str>;

    fn class_and_section(&self) -> (Option<&str>, Option<&str>) {
        (None, None)
    }

    fn status(&self) -> Option<&AttendanceStatus> {
        None
    }

    fn day(&self) -> Option<NaiveDate> {
        None
    }

    /// `None` when the record has no notion of audience.
    fn audience_matches(&self, _filter: &AudienceFilter) -> Option<bool> {
        None
    }
}

impl Queryable for EnrichedAttendance {
    fn text(&self, field: SearchField) -> Option<&str> {
        let student = self.student.as_ref();
        match field {
            SearchField::Name => Some(self.display_name()),
            SearchField::Identity => self.event.subject.as_ref().map(NormalizedKey::as_str),
            SearchField::Class => student.and_then(|s| s.class_name.as_deref()),
            SearchField::Section => student.and_then(|s| s.section.as_deref()),
            SearchField::Remarks => self.event.remarks.as_deref(),
            SearchField::Status => Some(self.event.status.label()),
            SearchField::Title | SearchField::Description => None,
        }
    }

    fn class_and_section(&self) -> (Option<&str>, Option<&str>) {
        self.student
            .as_ref()
            .map_or((None, None), |s| (s.class_name.as_deref(), s.section.as_deref()))
    }

    fn status(&self) -> Option<&AttendanceStatus> {
        Some(&self.event.status)
    }

    fn day(&self) -> Option<NaiveDate> {
        self.event.date
    }
}

impl Queryable for Student {
    fn text(&self, field: SearchField) -> Option<&str> {
        match field {
            SearchField::Name => Some(&self.name),
            SearchField::Identity => self.identity.as_ref().map(NormalizedKey::as_str),
            SearchField::Class => self.class_name.as_deref(),
            SearchField::Section => self.section.as_deref(),
            _ => None,
        }
    }

    fn class_and_section(&self) -> (Option<&str>, Option<&str>) {
        (self.class_name.as_deref(), self.section.as_deref())
    }
}

impl Queryable for Notice {
    fn text(&self, field: SearchField) -> Option<&str> {
        match field {
            SearchField::Title => Some(&self.title),
            SearchField::Description => Some(&self.description),
            SearchField::Identity => self.sender.as_ref().map(NormalizedKey::as_str),
            _ => None,
        }
    }

    fn day(&self) -> Option<NaiveDate> {
        self.posted_date
    }

    fn audience_matches(&self, filter: &AudienceFilter) -> Option<bool> {
        let for_me = notice_is_for(self, &filter.viewer);
        let by_me = notice_is_by(self, &filter.viewer);
        Some(match filter.scope {
            AudienceScope::ForMe => for_me,
            AudienceScope::ByMe => by_me,
            AudienceScope::Either => for_me || by_me,
        })
    }
}

impl Queryable for LeaveRequest {
    fn text(&self, field: SearchField) -> Option<&str> {
        match field {
            SearchField::Identity => self.applicant.as_ref().map(NormalizedKey::as_str),
            SearchField::Remarks | SearchField::Description => Some(&self.reason),
            SearchField::Status => Some(&self.status),
            _ => None,
        }
    }

    fn day(&self) -> Option<NaiveDate> {
        self.from_date
    }

    /// Applicants see their own leaves whichever scope is asked for.
    fn audience_matches(&self, filter: &AudienceFilter) -> Option<bool> {
        Some(self.applicant.as_ref() == Some(&filter.viewer))
    }
}

impl Queryable for ProgressReport {
    fn text(&self, field: SearchField) -> Option<&str> {
        match field {
            SearchField::Title => Some(&self.title),
            SearchField::Identity => self.subject.as_ref().map(NormalizedKey::as_str),
            SearchField::Class => self.class_name.as_deref(),
            SearchField::Section => self.section.as_deref(),
            SearchField::Remarks => self.remarks.as_deref(),
            _ => None,
        }
    }

    fn class_and_section(&self) -> (Option<&str>, Option<&str>) {
        (self.class_name.as_deref(), self.section.as_deref())
    }

    fn day(&self) -> Option<NaiveDate> {
        self.date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceEvent;

    fn key(value: &str) -> NormalizedKey {
        NormalizedKey::parse(value).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn notice(by: &str, audience: Audience) -> Notice {
        Notice {
            sender: NormalizedKey::parse(by),
            audience,
            title: "PTA meeting".to_string(),
            description: "Friday at 4pm".to_string(),
            posted_date: Some(day(10)),
            valid_until: None,
            important: false,
        }
    }

    fn row(name: &str, class_name: &str, section: &str, status: AttendanceStatus, d: u32) -> EnrichedAttendance {
        let student = Student {
            identity: NormalizedKey::parse(&format!("{}@x.com", name.to_lowercase())),
            name: name.to_string(),
            class_name: Some(class_name.to_string()),
            section: Some(section.to_string()),
            guardian: None,
            roll_number: None,
        };
        EnrichedAttendance {
            event: AttendanceEvent {
                subject: student.identity.clone(),
                date: Some(day(d)),
                status,
                remarks: Some("bus was late".to_string()),
                recorded_by: None,
            },
            student: Some(student),
            unmatched_subject: false,
            warning: None,
        }
    }

    #[test]
    fn broadcast_notice_is_for_everyone_but_by_its_sender() {
        let n = notice("p@x.com", Audience::Broadcast);
        let viewer = key("q@x.com");

        assert!(notice_is_for(&n, &viewer));
        assert!(!notice_is_by(&n, &viewer));
    }

    #[test]
    fn self_addressed_notice_is_both_for_and_by() {
        let n = notice("P@x.com", Audience::Person(key("p@x.com")));
        let viewer = key("p@x.com");
        assert!(notice_is_for(&n, &viewer));
        assert!(notice_is_by(&n, &viewer));
    }

    #[test]
    fn audience_scope_selects_notices() {
        let notices = vec![
            notice("p@x.com", Audience::Broadcast),
            notice("p@x.com", Audience::Person(key("r@x.com"))),
            notice("q@x.com", Audience::Person(key("r@x.com"))),
        ];
        let filter = |scope| QueryFilter {
            audience: Some(AudienceFilter {
                viewer: key("q@x.com"),
                scope,
            }),
            ..QueryFilter::default()
        };

        assert_eq!(apply_filters(&notices, &filter(AudienceScope::ForMe)).len(), 1);
        assert_eq!(apply_filters(&notices, &filter(AudienceScope::ByMe)).len(), 1);
        assert_eq!(apply_filters(&notices, &filter(AudienceScope::Either)).len(), 2);
    }

    #[test]
    fn search_is_case_insensitive_substring_over_chosen_fields() {
        let rows = vec![
            row("Ann", "5", "A", AttendanceStatus::Present, 15),
            row("Bob", "6", "B", AttendanceStatus::Absent, 15),
        ];

        let by_name = QueryFilter {
            search: Some(Search::new("AN", &[SearchField::Name])),
            ..QueryFilter::default()
        };
        let hits = apply_filters(&rows, &by_name);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_name(), "Ann");

        let remarks_only = QueryFilter {
            search: Some(Search::new("ann", &[SearchField::Remarks])),
            ..QueryFilter::default()
        };
        assert!(apply_filters(&rows, &remarks_only).is_empty());
    }

    #[test]
    fn predicates_combine_without_touching_input() {
        let rows = vec![
            row("Ann", "5", "A", AttendanceStatus::Present, 15),
            row("Amy", "5", "A", AttendanceStatus::Absent, 15),
            row("Ava", "5", "B", AttendanceStatus::Absent, 15),
            row("Abe", "5", "A", AttendanceStatus::Absent, 20),
        ];
        let before = rows.clone();

        let filter = QueryFilter {
            roster: Some(Roster::new("5", Some("A"))),
            status: Some(AttendanceStatus::Absent),
            date: Some(DateFilter::Between(day(14), day(16))),
            ..QueryFilter::default()
        };
        let hits = apply_filters(&rows, &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_name(), "Amy");
        assert_eq!(rows, before);

        let empty = QueryFilter::default();
        assert_eq!(apply_filters(&rows, &empty).len(), rows.len());
    }

    #[test]
    fn missing_dimension_does_not_match() {
        let notices = vec![notice("p@x.com", Audience::Broadcast)];
        let filter = QueryFilter {
            status: Some(AttendanceStatus::Present),
            ..QueryFilter::default()
        };
        assert!(apply_filters(&notices, &filter).is_empty());
    }
}
