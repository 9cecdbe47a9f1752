//! Boundary between duck-typed JSON records and the typed models.
//!
//! Every collection resolves its fields through an ordered key list. The first key holding a
//! non-blank value wins; numbers and booleans are read as text. Arrays or objects where text is
//! expected, and dates that do not parse, make the record (and so its collection) malformed.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use crate::error::LoadError;
use crate::identity::{fields, normalize, NormalizedKey};
use crate::models::{
    Audience, AttendanceEvent, AttendanceStatus, ClassRoster, Guardian, LeaveRequest, Notice,
    ProgressReport, Roster, Student,
};

const NAME: &[&str] = &["name", "full_name", "student_name"];
const ROLL_NUMBER: &[&str] = &["roll_number", "roll_no", "roll"];
const CLASS: &[&str] = &["class_name", "class", "grade"];
const SECTION: &[&str] = &["section"];
const ATTENDANCE_DATE: &[&str] = &["date", "attendance_date"];
const REMARKS: &[&str] = &["remarks", "remark", "note", "comments"];
const NOTICE_TITLE: &[&str] = &["title", "notice_title", "subject"];
const NOTICE_BODY: &[&str] = &["description", "notice", "message", "body"];
const NOTICE_POSTED: &[&str] = &["posted_date", "date", "created_at"];
const NOTICE_VALID_UNTIL: &[&str] = &["valid_until", "expiry", "expires_on"];
const LEAVE_FROM: &[&str] = &["from_date", "start_date", "from"];
const LEAVE_TO: &[&str] = &["to_date", "end_date", "to"];
const REPORT_TITLE: &[&str] = &["title", "report_title", "name", "report_type"];
const REPORT_DATE: &[&str] = &["date", "report_date", "created_at"];

/// Sentinel audience values meaning "everyone".
const BROADCAST_AUDIENCES: &[&str] = &["all", "everyone"];

/// One JSON object from a collection payload, remembering its position for error messages.
#[derive(Debug, Clone)]
pub struct RawRecord {
    index: usize,
    fields: Map<String, Value>,
}

impl RawRecord {
    pub fn from_value(index: usize, value: Value) -> Result<Self, LoadError> {
        match value {
            Value::Object(fields) => Ok(Self { index, fields }),
            other => Err(LoadError::Malformed(format!(
                "record {index} is not an object (found {})",
                json_kind(&other)
            ))),
        }
    }

    fn malformed(&self, key: &str, what: &str) -> LoadError {
        LoadError::Malformed(format!("record {}: field `{key}` {what}", self.index))
    }

    fn scalar(&self, key: &str) -> Result<Option<String>, LoadError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Err(self.malformed(key, &format!("expected text, found {}", json_kind(other)))),
        }
    }

    /// Raw values of `keys` in precedence order, blanks included.
    fn candidates(&self, keys: &[&str]) -> Result<Vec<Option<String>>, LoadError> {
        keys.iter().map(|key| self.scalar(key)).collect()
    }

    pub fn text(&self, keys: &[&str]) -> Result<Option<String>, LoadError> {
        Ok(self
            .candidates(keys)?
            .into_iter()
            .flatten()
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty()))
    }

    pub fn identity(&self, keys: &[&str]) -> Result<Option<NormalizedKey>, LoadError> {
        let candidates = self.candidates(keys)?;
        Ok(normalize(candidates.iter().map(Option::as_deref)))
    }

    pub fn date(&self, keys: &[&str]) -> Result<Option<NaiveDate>, LoadError> {
        for key in keys {
            let Some(value) = self.scalar(key)? else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            return parse_day(value)
                .map(Some)
                .ok_or_else(|| self.malformed(key, &format!("is not a date: {value:?}")));
        }
        Ok(None)
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
            }
            _ => false,
        }
    }

    /// Identities from array fields. Elements may be strings or objects carrying an email.
    pub fn identity_list(&self, keys: &[&str]) -> Result<Vec<NormalizedKey>, LoadError> {
        let mut out = Vec::new();
        for key in keys {
            match self.fields.get(*key) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for item in items {
                        let key = match item {
                            Value::String(s) => NormalizedKey::parse(s),
                            Value::Object(map) => normalize(
                                fields::STUDENT
                                    .iter()
                                    .map(|field| map.get(*field).and_then(Value::as_str)),
                            ),
                            _ => None,
                        };
                        out.extend(key);
                    }
                }
                Some(Value::String(s)) => out.extend(s.split(',').filter_map(NormalizedKey::parse)),
                Some(other) => {
                    return Err(self.malformed(key, &format!("expected a list, found {}", json_kind(other))))
                }
            }
        }
        Ok(out)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `YYYY-MM-DD`, or the calendar day of an RFC 3339 timestamp.
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
        .or_else(|| value.get(..10).and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()))
}

/// Typed decoding of one raw record.
pub trait FromRaw: Sized {
    fn from_raw(raw: &RawRecord) -> Result<Self, LoadError>;
}

/// Decodes a whole collection. The first bad record fails the collection.
pub fn decode_collection<T: FromRaw>(values: Vec<Value>) -> Result<Vec<T>, LoadError> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| T::from_raw(&RawRecord::from_value(index, value)?))
        .collect()
}

impl FromRaw for Student {
    fn from_raw(raw: &RawRecord) -> Result<Self, LoadError> {
        let identity = raw.identity(fields::STUDENT)?;
        let name = match raw.text(NAME)? {
            Some(name) => name,
            None => {
                let first = raw.text(&["first_name"])?.unwrap_or_default();
                let last = raw.text(&["last_name"])?.unwrap_or_default();
                let joined = format!("{first} {last}").trim().to_string();
                if joined.is_empty() {
                    identity
                        .as_ref()
                        .map_or_else(|| "(unnamed)".to_string(), |key| key.to_string())
                } else {
                    joined
                }
            }
        };

        Ok(Student {
            identity,
            name,
            class_name: raw.text(CLASS)?,
            section: raw.text(SECTION)?,
            guardian: raw.identity(fields::STUDENT_GUARDIAN)?,
            roll_number: raw.text(ROLL_NUMBER)?,
        })
    }
}

impl FromRaw for AttendanceEvent {
    fn from_raw(raw: &RawRecord) -> Result<Self, LoadError> {
        let status = raw
            .text(&["status"])?
            .ok_or_else(|| raw.malformed("status", "is missing"))?;

        Ok(AttendanceEvent {
            subject: raw.identity(fields::ATTENDANCE_SUBJECT)?,
            date: raw.date(ATTENDANCE_DATE)?,
            status: AttendanceStatus::parse(&status),
            remarks: raw.text(REMARKS)?,
            recorded_by: raw.identity(fields::ATTENDANCE_RECORDER)?,
        })
    }
}

impl FromRaw for Guardian {
    fn from_raw(raw: &RawRecord) -> Result<Self, LoadError> {
        let identity = raw.identity(fields::GUARDIAN)?;
        let mut children = raw.identity_list(fields::GUARDIAN_CHILD_LISTS)?;
        for key in fields::GUARDIAN_SINGLE_CHILD {
            children.extend(raw.identity(&[*key])?);
        }
        let mut seen = std::collections::HashSet::new();
        children.retain(|child| seen.insert(child.clone()));

        let name = raw
            .text(NAME)?
            .or_else(|| identity.as_ref().map(|key| key.to_string()))
            .unwrap_or_else(|| "(unnamed)".to_string());

        Ok(Guardian {
            identity,
            name,
            children,
        })
    }
}

impl FromRaw for ClassRoster {
    fn from_raw(raw: &RawRecord) -> Result<Self, LoadError> {
        let class_name = raw
            .text(CLASS)?
            .ok_or_else(|| raw.malformed("class_name", "is missing"))?;
        let section = raw.text(SECTION)?;

        Ok(ClassRoster {
            roster: Roster::new(class_name, section.as_deref()),
            class_teacher: raw.identity(fields::CLASS_TEACHER)?,
        })
    }
}

impl FromRaw for Notice {
    fn from_raw(raw: &RawRecord) -> Result<Self, LoadError> {
        let audience = match raw.text(fields::NOTICE_AUDIENCE)? {
            Some(to) if BROADCAST_AUDIENCES.iter().any(|s| to.eq_ignore_ascii_case(s)) => {
                Audience::Broadcast
            }
            Some(to) => NormalizedKey::parse(&to).map_or(Audience::Broadcast, Audience::Person),
            None => Audience::Broadcast,
        };

        Ok(Notice {
            sender: raw.identity(fields::NOTICE_SENDER)?,
            audience,
            title: raw.text(NOTICE_TITLE)?.unwrap_or_default(),
            description: raw.text(NOTICE_BODY)?.unwrap_or_default(),
            posted_date: raw.date(NOTICE_POSTED)?,
            valid_until: raw.date(NOTICE_VALID_UNTIL)?,
            important: raw.flag("important"),
        })
    }
}

impl FromRaw for LeaveRequest {
    fn from_raw(raw: &RawRecord) -> Result<Self, LoadError> {
        Ok(LeaveRequest {
            applicant: raw.identity(fields::LEAVE_APPLICANT)?,
            from_date: raw.date(LEAVE_FROM)?,
            to_date: raw.date(LEAVE_TO)?,
            reason: raw.text(&["reason"])?.unwrap_or_default(),
            status: raw.text(&["status"])?.unwrap_or_else(|| "Pending".to_string()),
        })
    }
}

impl FromRaw for ProgressReport {
    fn from_raw(raw: &RawRecord) -> Result<Self, LoadError> {
        Ok(ProgressReport {
            subject: raw.identity(fields::REPORT_SUBJECT)?,
            title: raw.text(REPORT_TITLE)?.unwrap_or_default(),
            remarks: raw.text(REMARKS)?,
            class_name: raw.text(CLASS)?,
            section: raw.text(SECTION)?,
            date: raw.date(REPORT_DATE)?,
        })
    }
}
