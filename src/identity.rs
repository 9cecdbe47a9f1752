use std::fmt;

use serde::{Deserialize, Serialize};

/// Comparable person key derived from an email-like field: trimmed and lower-cased.
///
/// Two records refer to the same person iff their keys are equal. A record with no
/// derivable key carries `None` and never joins with anything, including other `None`s.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalizes a single value. Same as `normalize(&[Some(value)])`.
    pub fn parse(value: &str) -> Option<Self> {
        normalize([Some(value)])
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returns the first non-blank candidate, trimmed and lower-cased.
pub fn normalize<'a, I>(candidates: I) -> Option<NormalizedKey>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(|value| NormalizedKey(value.to_lowercase()))
}

/// Field precedence lists, one per collection. Raw records resolve identities through
/// these and nowhere else.
pub mod fields {
    pub const STUDENT: &[&str] = &["email", "student_email", "student"];
    pub const STUDENT_GUARDIAN: &[&str] = &["parent_email", "guardian_email", "parent"];
    pub const ATTENDANCE_SUBJECT: &[&str] = &["student_email", "student", "email", "teacher_email"];
    pub const ATTENDANCE_RECORDER: &[&str] = &["marked_by", "recorded_by", "teacher"];
    pub const GUARDIAN: &[&str] = &["email", "parent_email", "parent"];
    pub const GUARDIAN_CHILD_LISTS: &[&str] = &["children", "students", "child_emails"];
    pub const GUARDIAN_SINGLE_CHILD: &[&str] = &["student_email", "child_email"];
    pub const CLASS_TEACHER: &[&str] = &["teacher_email", "teacher"];
    pub const NOTICE_SENDER: &[&str] = &["notice_by", "sender", "email"];
    pub const NOTICE_AUDIENCE: &[&str] = &["notice_to", "audience", "to"];
    pub const LEAVE_APPLICANT: &[&str] = &["email", "student_email", "teacher_email", "applicant"];
    pub const REPORT_SUBJECT: &[&str] = &["student_email", "student", "email"];
}
