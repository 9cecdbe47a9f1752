//! Consistent snapshots of every collection, and the single slot that holds the latest one.
//!
//! Each reload takes a generation number when it is triggered. When its loads settle, the result is
//! committed only if no newer reload has been triggered in the meantime, so a slow response can
//! never replace the snapshot of a later trigger. Derived values carry the id of the snapshot they
//! came from and are recomputed, never patched, when the snapshot changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{LoadError, Unavailable};
use crate::loader::{load_all, CollectionName, Loaded, Sources};
use crate::models::{
    AttendanceEvent, ClassRoster, EnrichedAttendance, Guardian, GuardianWithChildren, LeaveRequest, Notice,
    ProgressReport, Student,
};
use crate::raw::{decode_collection, FromRaw};
use crate::reconcile::{reconcile_attendance, reconcile_guardian_children};

pub type Section<T> = Result<Vec<T>, LoadError>;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: Uuid,
    pub generation: u64,
    pub taken_at: DateTime<Utc>,
    pub students: Section<Student>,
    pub attendance: Section<AttendanceEvent>,
    pub guardians: Section<Guardian>,
    pub classes: Section<ClassRoster>,
    pub notices: Section<Notice>,
    pub leaves: Section<LeaveRequest>,
    pub reports: Section<ProgressReport>,
}

fn take<T: FromRaw>(loaded: &mut Loaded, name: CollectionName) -> Section<T> {
    let values = loaded.remove(&name).unwrap_or(Err(LoadError::NotConfigured))?;
    decode_collection(values).inspect_err(|err| {
        tracing::warn!(collection = %name, error = %err, "collection payload rejected");
    })
}

fn section<T>(section: &Section<T>, collection: CollectionName) -> Result<&[T], Unavailable> {
    section.as_deref().map_err(|cause| Unavailable {
        collection,
        cause: cause.clone(),
    })
}

impl Snapshot {
    /// Decodes loaded payloads. Collections absent from `loaded` are `NotConfigured`.
    pub fn from_loaded(generation: u64, mut loaded: Loaded) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            taken_at: Utc::now(),
            students: take(&mut loaded, CollectionName::Students),
            attendance: take(&mut loaded, CollectionName::Attendance),
            guardians: take(&mut loaded, CollectionName::Parents),
            classes: take(&mut loaded, CollectionName::Classes),
            notices: take(&mut loaded, CollectionName::Notices),
            leaves: take(&mut loaded, CollectionName::Leaves),
            reports: take(&mut loaded, CollectionName::Reports),
        }
    }

    pub fn students(&self) -> Result<&[Student], Unavailable> {
        section(&self.students, CollectionName::Students)
    }

    pub fn attendance(&self) -> Result<&[AttendanceEvent], Unavailable> {
        section(&self.attendance, CollectionName::Attendance)
    }

    pub fn guardians(&self) -> Result<&[Guardian], Unavailable> {
        section(&self.guardians, CollectionName::Parents)
    }

    pub fn classes(&self) -> Result<&[ClassRoster], Unavailable> {
        section(&self.classes, CollectionName::Classes)
    }

    pub fn notices(&self) -> Result<&[Notice], Unavailable> {
        section(&self.notices, CollectionName::Notices)
    }

    pub fn leaves(&self) -> Result<&[LeaveRequest], Unavailable> {
        section(&self.leaves, CollectionName::Leaves)
    }

    pub fn reports(&self) -> Result<&[ProgressReport], Unavailable> {
        section(&self.reports, CollectionName::Reports)
    }

    pub fn enriched_attendance(&self) -> Result<Vec<EnrichedAttendance>, Unavailable> {
        Ok(reconcile_attendance(self.students()?, self.attendance()?))
    }

    pub fn guardians_with_children(&self) -> Result<Vec<GuardianWithChildren>, Unavailable> {
        Ok(reconcile_guardian_children(self.guardians()?, self.students()?))
    }

    /// Every collection that failed, in collection order.
    pub fn failures(&self) -> Vec<Unavailable> {
        let checks = [
            self.students().err(),
            self.attendance().err(),
            self.guardians().err(),
            self.classes().err(),
            self.notices().err(),
            self.leaves().err(),
            self.reports().err(),
        ];
        checks.into_iter().flatten().collect()
    }

    pub fn derive<T>(&self, compute: impl FnOnce(&Snapshot) -> T) -> Derived<T> {
        Derived {
            snapshot_id: self.id,
            generation: self.generation,
            value: compute(self),
        }
    }
}

/// A value computed from one snapshot, tagged with that snapshot's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived<T> {
    pub snapshot_id: Uuid,
    pub generation: u64,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadTicket {
    generation: u64,
}

impl ReloadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone)]
pub enum ReloadOutcome {
    Applied(Arc<Snapshot>),
    /// A newer reload was triggered before this one settled; its result was dropped.
    Stale { generation: u64, latest: u64 },
}

impl ReloadOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReloadOutcome::Applied(_))
    }
}

/// Owner of the current snapshot. Reloads may overlap; only the most recently triggered one can
/// be committed.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    issued: AtomicU64,
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_reload(&self) -> ReloadTicket {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, "reload triggered");
        ReloadTicket { generation }
    }

    pub fn latest_generation(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Decodes `loaded` and installs it, unless a newer reload was triggered since `ticket`.
    pub async fn commit(&self, ticket: ReloadTicket, loaded: Loaded) -> ReloadOutcome {
        let latest = self.latest_generation();
        if ticket.generation != latest {
            tracing::warn!(generation = ticket.generation, latest, "discarding stale reload");
            return ReloadOutcome::Stale {
                generation: ticket.generation,
                latest,
            };
        }

        let snapshot = Arc::new(Snapshot::from_loaded(ticket.generation, loaded));

        let mut current = self.current.write().await;
        let latest = self.latest_generation();
        let superseded = current
            .as_ref()
            .is_some_and(|existing| existing.generation >= ticket.generation);
        if ticket.generation != latest || superseded {
            tracing::warn!(generation = ticket.generation, latest, "discarding stale reload");
            return ReloadOutcome::Stale {
                generation: ticket.generation,
                latest,
            };
        }

        *current = Some(Arc::clone(&snapshot));
        tracing::info!(
            generation = snapshot.generation,
            snapshot = %snapshot.id,
            failed = snapshot.failures().len(),
            "snapshot committed"
        );
        ReloadOutcome::Applied(snapshot)
    }

    /// Triggers a reload, fetches every source concurrently, and commits once all have settled.
    pub async fn reload(&self, sources: &Sources) -> ReloadOutcome {
        let ticket = self.begin_reload();
        let loaded = load_all(sources).await;
        self.commit(ticket, loaded).await
    }

    pub async fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().await.clone()
    }

    /// Whether `derived` was computed from the snapshot currently installed.
    pub async fn is_current<T>(&self, derived: &Derived<T>) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|snapshot| snapshot.id == derived.snapshot_id)
    }
}
