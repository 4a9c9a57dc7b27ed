//! Backup system for dbvault
//!
//! Creates SQL dumps of a live database, keeps a bounded catalog of them on
//! disk, and replays a chosen artifact on explicit request.
//!
//! # Architecture
//!
//! - `ArtifactStore`: naming, listing and path-safe lookup of artifacts
//! - `DumpRunner` / `RestoreRunner`: drive the external dump and restore utilities
//! - `IntegrityVerifier`: heuristic structural check of an artifact
//! - `OperationLock`: at most one create or restore at a time
//! - `BackupManager`: ties the above together and applies retention
//!
//! # Artifact Format
//!
//! Artifacts are plain SQL files named `backup-YYYYMMDD-HHMMSS-mmm.sql`
//! (UTC). A dump in progress writes to a hidden `.partial` file that is only
//! renamed into place once the utility exits cleanly.
//!
//! # Retention Policy
//!
//! After every successful create the newest `max_backups` artifacts are kept
//! and the rest are deleted.

mod lock;
mod manager;
mod retention;
mod runner;
mod store;
mod verify;

pub use lock::{Operation, OperationGuard, OperationLock};
pub use manager::{
    is_explicit_confirmation, ArtifactSummary, BackupManager, BackupStats, CreateOutcome,
    RestoreOutcome,
};
pub use retention::select_for_deletion;
pub use runner::{render_args, CapturedOutput, DumpRunner, RestoreRunner};
pub use store::{
    artifact_name, is_artifact_name, Artifact, Allocation, ArtifactStore,
    ARTIFACT_PREFIX, ARTIFACT_SUFFIX,
};
pub use verify::{IntegrityVerifier, VerificationReport, MISSING_MARKERS};
