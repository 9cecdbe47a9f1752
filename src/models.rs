use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::JoinWarning;
use crate::identity::NormalizedKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    HalfDay,
    Other(String),
}

impl AttendanceStatus {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        let folded: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        match folded.as_str() {
            "present" => AttendanceStatus::Present,
            "absent" => AttendanceStatus::Absent,
            "late" => AttendanceStatus::Late,
            "halfday" => AttendanceStatus::HalfDay,
            _ => AttendanceStatus::Other(trimmed.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Late => "Late",
            AttendanceStatus::HalfDay => "Half Day",
            AttendanceStatus::Other(text) => text,
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub identity: Option<NormalizedKey>,
    pub name: String,
    pub class_name: Option<String>,
    pub section: Option<String>,
    pub guardian: Option<NormalizedKey>,
    pub roll_number: Option<String>,
}

impl Student {
    pub fn roster(&self) -> Option<Roster> {
        self.class_name.as_ref().map(|class_name| Roster {
            class_name: class_name.clone(),
            section: self.section.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub subject: Option<NormalizedKey>,
    pub date: Option<NaiveDate>,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
    pub recorded_by: Option<NormalizedKey>,
}

impl AsRef<AttendanceEvent> for AttendanceEvent {
    fn as_ref(&self) -> &AttendanceEvent {
        self
    }
}

/// Class x section grouping. A roster without a section covers every section of the class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Roster {
    pub class_name: String,
    pub section: Option<String>,
}

impl Roster {
    pub fn new(class_name: impl Into<String>, section: Option<&str>) -> Self {
        Self {
            class_name: class_name.into(),
            section: section.map(str::to_string),
        }
    }

    /// Class and section compare case-insensitively and ignore surrounding whitespace.
    pub fn contains(&self, class_name: Option<&str>, section: Option<&str>) -> bool {
        let Some(class_name) = class_name else {
            return false;
        };
        if !same_label(&self.class_name, class_name) {
            return false;
        }
        match &self.section {
            None => true,
            Some(wanted) => section.is_some_and(|s| same_label(wanted, s)),
        }
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.section {
            Some(section) => write!(f, "{} {}", self.class_name, section),
            None => f.write_str(&self.class_name),
        }
    }
}

pub(crate) fn same_label(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRoster {
    pub roster: Roster,
    pub class_teacher: Option<NormalizedKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guardian {
    pub identity: Option<NormalizedKey>,
    pub name: String,
    pub children: Vec<NormalizedKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Audience {
    Broadcast,
    Person(NormalizedKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub sender: Option<NormalizedKey>,
    pub audience: Audience,
    pub title: String,
    pub description: String,
    pub posted_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub important: bool,
}

impl Notice {
    /// Open-ended on either side when the corresponding date is missing.
    pub fn is_active_on(&self, day: NaiveDate) -> bool {
        self.posted_date.map_or(true, |posted| posted <= day)
            && self.valid_until.map_or(true, |until| day <= until)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaveRequest {
    pub applicant: Option<NormalizedKey>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub reason: String,
    pub status: String,
}

impl LeaveRequest {
    pub fn is_approved(&self) -> bool {
        same_label(&self.status, "approved")
    }

    /// A single-day leave may carry only `from_date`.
    pub fn covers(&self, day: NaiveDate) -> bool {
        match (self.from_date, self.to_date) {
            (Some(from), Some(to)) => from <= day && day <= to,
            (Some(from), None) => from == day,
            (None, Some(to)) => to == day,
            (None, None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub subject: Option<NormalizedKey>,
    pub title: String,
    pub remarks: Option<String>,
    pub class_name: Option<String>,
    pub section: Option<String>,
    pub date: Option<NaiveDate>,
}

/// An attendance event joined with its subject's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedAttendance {
    pub event: AttendanceEvent,
    pub student: Option<Student>,
    pub unmatched_subject: bool,
    pub warning: Option<JoinWarning>,
}

impl EnrichedAttendance {
    /// Falls back to the raw identity so unmatched rows stay recognizable.
    pub fn display_name(&self) -> &str {
        match (&self.student, &self.event.subject) {
            (Some(student), _) => &student.name,
            (None, Some(subject)) => subject.as_str(),
            (None, None) => "(unknown)",
        }
    }
}

impl AsRef<AttendanceEvent> for EnrichedAttendance {
    fn as_ref(&self) -> &AttendanceEvent {
        &self.event
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianWithChildren {
    pub guardian: Guardian,
    pub children: Vec<Student>,
    /// Child identities listed on the guardian record with no student profile.
    pub unresolved_children: Vec<NormalizedKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AttendanceRate {
    pub present_count: usize,
    pub absent_count: usize,
    pub late_count: usize,
    pub half_day_count: usize,
    pub total_count: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub day: NaiveDate,
    pub present_count: usize,
    pub absent_count: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentRate {
    pub identity: NormalizedKey,
    pub name: String,
    pub roster: Option<Roster>,
    pub rate: AttendanceRate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildRollup {
    pub child: Student,
    pub rate: AttendanceRate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterDaySummary {
    pub roster: Roster,
    pub student_count: usize,
    pub present: usize,
    pub absent: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Absentee {
    pub student: Student,
    pub approved_leave: Option<LeaveRequest>,
}
