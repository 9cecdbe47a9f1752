use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::error::JoinWarning;
use crate::identity::NormalizedKey;
use crate::models::{AttendanceEvent, EnrichedAttendance, Guardian, GuardianWithChildren, Roster, Student};

/// Identity -> student. When two profiles share an identity the first one wins.
pub fn student_index(students: &[Student]) -> HashMap<&NormalizedKey, &Student> {
    let mut index = HashMap::with_capacity(students.len());
    for student in students {
        if let Some(identity) = &student.identity {
            index.entry(identity).or_insert(student);
        }
    }
    index
}

/// Joins each event with its subject's profile, in event order.
///
/// Every event yields exactly one output row. Events whose subject has no identity, or matches no
/// student, are kept with `unmatched_subject` set.
pub fn reconcile_attendance(students: &[Student], events: &[AttendanceEvent]) -> Vec<EnrichedAttendance> {
    let index = student_index(students);

    let enriched: Vec<EnrichedAttendance> = events
        .iter()
        .map(|event| {
            let (student, warning) = match &event.subject {
                None => (None, Some(JoinWarning::MissingIdentity)),
                Some(subject) => match index.get(subject) {
                    Some(student) => (Some((*student).clone()), None),
                    None => (None, Some(JoinWarning::NoMatch(subject.clone()))),
                },
            };
            EnrichedAttendance {
                event: event.clone(),
                unmatched_subject: student.is_none(),
                student,
                warning,
            }
        })
        .collect();

    let unmatched = enriched.iter().filter(|row| row.unmatched_subject).count();
    if unmatched > 0 {
        tracing::warn!(unmatched, total = enriched.len(), "attendance events without a matching student");
    }
    tracing::debug!(events = enriched.len(), students = students.len(), "reconciled attendance");

    enriched
}

/// Resolves each guardian's children from both relationship shapes: the guardian's own child list,
/// and students pointing back at the guardian. Children are de-duplicated by identity; explicit
/// list order comes first, then student order.
pub fn reconcile_guardian_children(guardians: &[Guardian], students: &[Student]) -> Vec<GuardianWithChildren> {
    let index = student_index(students);

    let mut by_guardian: HashMap<&NormalizedKey, Vec<&Student>> = HashMap::new();
    for student in students {
        if let Some(guardian) = &student.guardian {
            by_guardian.entry(guardian).or_default().push(student);
        }
    }

    guardians
        .iter()
        .map(|guardian| {
            let mut seen: HashSet<&NormalizedKey> = HashSet::new();
            let mut children = Vec::new();
            let mut unresolved_children = Vec::new();

            for child in &guardian.children {
                if !seen.insert(child) {
                    continue;
                }
                match index.get(child) {
                    Some(student) => children.push((*student).clone()),
                    None => unresolved_children.push(child.clone()),
                }
            }

            let referencing = guardian
                .identity
                .as_ref()
                .and_then(|identity| by_guardian.get(identity));
            for student in referencing.into_iter().flatten() {
                let fresh = match &student.identity {
                    Some(identity) => seen.insert(identity),
                    None => true,
                };
                if fresh {
                    children.push((*student).clone());
                }
            }

            GuardianWithChildren {
                guardian: guardian.clone(),
                children,
                unresolved_children,
            }
        })
        .collect()
}

/// Finds the guardian record for a viewer identity.
pub fn guardian_for<'a>(
    guardians: &'a [GuardianWithChildren],
    viewer: &NormalizedKey,
) -> Option<&'a GuardianWithChildren> {
    guardians
        .iter()
        .find(|entry| entry.guardian.identity.as_ref() == Some(viewer))
}

/// Duplicate policy: for each (identity, day) the last event in input order is authoritative.
///
/// Events missing an identity or a day are never merged with anything. Survivors keep their input
/// order.
pub fn latest_per_subject_day<E>(events: &[E]) -> Vec<&E>
where
    E: AsRef<AttendanceEvent>,
{
    let mut last: HashMap<(&NormalizedKey, NaiveDate), usize> = HashMap::new();
    for (i, event) in events.iter().enumerate() {
        if let Some(key) = dedupe_key(event.as_ref()) {
            last.insert(key, i);
        }
    }

    events
        .iter()
        .enumerate()
        .filter(|(i, event)| match dedupe_key((*event).as_ref()) {
            Some(key) => last.get(&key) == Some(i),
            None => true,
        })
        .map(|(_, event)| event)
        .collect()
}

fn dedupe_key(event: &AttendanceEvent) -> Option<(&NormalizedKey, NaiveDate)> {
    Some((event.subject.as_ref()?, event.date?))
}

pub fn students_in_roster<'a>(students: &'a [Student], roster: &Roster) -> Vec<&'a Student> {
    students
        .iter()
        .filter(|student| roster.contains(student.class_name.as_deref(), student.section.as_deref()))
        .collect()
}

/// Flagged rows with their position, for data-quality displays.
pub fn join_warnings(enriched: &[EnrichedAttendance]) -> Vec<(usize, &JoinWarning)> {
    enriched
        .iter()
        .enumerate()
        .filter_map(|(i, row)| row.warning.as_ref().map(|warning| (i, warning)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceStatus;

    fn key(value: &str) -> Option<NormalizedKey> {
        NormalizedKey::parse(value)
    }

    fn student(email: &str, name: &str, guardian: Option<&str>) -> Student {
        Student {
            identity: key(email),
            name: name.to_string(),
            class_name: Some("5".to_string()),
            section: Some("A".to_string()),
            guardian: guardian.and_then(key),
            roll_number: None,
        }
    }

    fn event(subject: Option<&str>, status: AttendanceStatus, day: u32) -> AttendanceEvent {
        AttendanceEvent {
            subject: subject.and_then(key),
            date: NaiveDate::from_ymd_opt(2024, 1, day),
            status,
            remarks: None,
            recorded_by: None,
        }
    }

    #[test]
    fn mixed_case_identities_join() {
        let students = vec![student("A@School.com", "Ann", None)];
        let events = vec![event(Some("a@school.com"), AttendanceStatus::Present, 15)];

        let enriched = reconcile_attendance(&students, &events);
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].display_name(), "Ann");
        assert!(!enriched[0].unmatched_subject);
        assert_eq!(enriched[0].warning, None);
    }

    #[test]
    fn unmatched_and_anonymous_events_are_kept_and_flagged() {
        let students = vec![
            student("a@x.com", "Ann", None),
            Student {
                identity: None,
                ..student("ignored", "Ghost", None)
            },
        ];
        let events = vec![
            event(None, AttendanceStatus::Present, 15),
            event(Some("z@x.com"), AttendanceStatus::Absent, 15),
            event(Some("a@x.com"), AttendanceStatus::Late, 15),
        ];

        let enriched = reconcile_attendance(&students, &events);
        assert_eq!(enriched.len(), 3);
        assert_eq!(enriched[0].warning, Some(JoinWarning::MissingIdentity));
        assert!(enriched[0].unmatched_subject);
        assert_eq!(enriched[1].warning, Some(JoinWarning::NoMatch(key("z@x.com").unwrap())));
        assert_eq!(enriched[1].display_name(), "z@x.com");
        assert!(!enriched[2].unmatched_subject);

        let warnings = join_warnings(&enriched);
        assert_eq!(warnings.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn guardian_children_found_from_student_back_reference() {
        let guardians = vec![Guardian {
            identity: key("P@x.com"),
            name: "Pat".to_string(),
            children: vec![],
        }];
        let students = vec![
            student("kid@x.com", "Kid", Some("p@x.com")),
            student("other@x.com", "Other", Some("q@x.com")),
        ];

        let resolved = reconcile_guardian_children(&guardians, &students);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].children.len(), 1);
        assert_eq!(resolved[0].children[0].name, "Kid");
    }

    #[test]
    fn guardian_children_union_is_deduplicated() {
        let guardians = vec![Guardian {
            identity: key("p@x.com"),
            name: "Pat".to_string(),
            children: vec![key("b@x.com").unwrap(), key("missing@x.com").unwrap()],
        }];
        let students = vec![
            student("a@x.com", "Ann", Some("p@x.com")),
            student("b@x.com", "Ben", Some("P@X.com")),
        ];

        let resolved = reconcile_guardian_children(&guardians, &students);
        let names: Vec<&str> = resolved[0].children.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Ben", "Ann"]);
        assert_eq!(resolved[0].unresolved_children, vec![key("missing@x.com").unwrap()]);
        assert!(guardian_for(&resolved, &key("p@x.com").unwrap()).is_some());
        assert!(guardian_for(&resolved, &key("q@x.com").unwrap()).is_none());
    }

    #[test]
    fn last_event_per_day_wins() {
        let events = vec![
            event(Some("a@x.com"), AttendanceStatus::Present, 15),
            event(Some("b@x.com"), AttendanceStatus::Present, 15),
            event(Some("A@x.com"), AttendanceStatus::Absent, 15),
            event(Some("a@x.com"), AttendanceStatus::Present, 16),
            event(None, AttendanceStatus::Present, 15),
            event(None, AttendanceStatus::Present, 15),
        ];

        let kept = latest_per_subject_day(&events);
        assert_eq!(kept.len(), 5);
        assert_eq!(kept[0].subject, key("b@x.com"));
        assert_eq!(kept[1].status, AttendanceStatus::Absent);
    }

    #[test]
    fn roster_scope_uses_class_and_section() {
        let mut other = student("c@x.com", "Cal", None);
        other.section = Some("B".to_string());
        let students = vec![student("a@x.com", "Ann", None), other];

        assert_eq!(students_in_roster(&students, &Roster::new("5", Some("a"))).len(), 1);
        assert_eq!(students_in_roster(&students, &Roster::new("5", None)).len(), 2);
    }
}
