//! Client-side reconciliation of school collections.
//!
//! Independently fetched collections (students, attendance, guardians, classes, notices, leaves,
//! reports) are decoded at the boundary, joined by normalized identity, and turned into derived
//! views: attendance rates, absentee sets, per-child rollups, rolling trends and audience-filtered
//! notice feeds. Every stage after loading is a pure function over an immutable snapshot.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod filter;
pub mod identity;
pub mod loader;
pub mod models;
pub mod raw;
pub mod reconcile;
pub mod report;
pub mod snapshot;

pub use error::{InvariantViolation, JoinWarning, LoadError, Unavailable};
pub use identity::{normalize, NormalizedKey};
pub use loader::{load_all, CollectionName, CollectionSource, Sources};
pub use snapshot::{Derived, ReloadOutcome, Snapshot, SnapshotStore};
