//! Artifact store for dbvault
//!
//! A flat directory of dump files named `backup-YYYYMMDD-HHMMSS-mmm.sql`.
//! Catalog operations recompute everything from the filesystem on every call;
//! there are no sidecar metadata files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{VaultError, VaultResult};

/// Filename prefix shared by every artifact
pub const ARTIFACT_PREFIX: &str = "backup-";

/// Filename suffix shared by every artifact
pub const ARTIFACT_SUFFIX: &str = ".sql";

const PARTIAL_SUFFIX: &str = ".partial";

/// A completed backup file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Artifact filename
    pub name: String,
    /// Full path to the artifact
    #[serde(skip)]
    pub path: PathBuf,
    /// Size in bytes
    pub size_bytes: u64,
    /// Creation time from filesystem metadata (modification time where the
    /// platform doesn't report creation)
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
    /// Timestamp encoded in the filename
    pub name_timestamp: Option<DateTime<Utc>>,
}

/// A reserved artifact name whose dump is still being written
///
/// Dropping an allocation that was never committed removes its partial file,
/// whether the dump failed or the future driving it was cancelled.
#[derive(Debug)]
pub struct Allocation {
    /// Final artifact filename
    pub name: String,
    /// Where the finished artifact will live
    pub final_path: PathBuf,
    /// Hidden file the dump utility writes into
    pub partial_path: PathBuf,
    published: bool,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        match fs::remove_file(&self.partial_path) {
            Ok(()) => {
                tracing::debug!(name = %self.name, "removed partial backup file");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.partial_path.display(),
                    error = %e,
                    "failed to remove partial backup file"
                );
            }
        }
    }
}

/// Filesystem-backed catalog of backup artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the store directory (and parents) if absent
    pub fn ensure_directory(&self) -> VaultResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            VaultError::Io(format!(
                "Failed to create backup directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// List all artifacts, newest first
    pub fn list(&self) -> VaultResult<Vec<Artifact>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VaultError::Io(format!(
                    "Failed to read backup directory: {}",
                    e
                )))
            }
        };

        let mut artifacts = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| {
                VaultError::Io(format!("Failed to read directory entry: {}", e))
            })?;

            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_artifact_name(&name) {
                continue;
            }

            // Files may vanish between read_dir and stat (retention, manual delete)
            match fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_file() => {
                    artifacts.push(artifact_from_metadata(name, entry.path(), &metadata));
                }
                _ => continue,
            }
        }

        // Names are time-ordered, so descending name is newest first
        artifacts.sort_by(|a, b| b.name.cmp(&a.name));

        Ok(artifacts)
    }

    /// Get the most recent artifact
    pub fn latest(&self) -> VaultResult<Option<Artifact>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Resolve a caller-supplied name to an absolute path inside the store
    pub fn resolve_path(&self, name: &str) -> VaultResult<PathBuf> {
        validate_name(name)?;

        let candidate = self.root.join(name);
        if !candidate.exists() {
            return Err(VaultError::not_found(name));
        }

        let root = fs::canonicalize(&self.root)?;
        let resolved = fs::canonicalize(&candidate)?;

        // Symlinks pointing outside the store are treated as traversal
        if resolved.parent() != Some(root.as_path()) {
            return Err(VaultError::invalid_name(name));
        }
        if !resolved.is_file() {
            return Err(VaultError::not_found(name));
        }

        Ok(resolved)
    }

    /// Size and timestamps of one artifact
    pub fn stat(&self, name: &str) -> VaultResult<Artifact> {
        let path = self.resolve_path(name)?;
        let metadata = fs::metadata(&path)?;
        Ok(artifact_from_metadata(name.to_string(), path, &metadata))
    }

    /// Remove one artifact
    pub fn delete(&self, name: &str) -> VaultResult<()> {
        let path = self.resolve_path(name)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => VaultError::not_found(name),
            _ => VaultError::Io(format!("Failed to delete backup {}: {}", name, e)),
        })
    }

    /// Reserve a new artifact name for a dump starting at `now`
    ///
    /// A name already taken moves forward a millisecond at a time, so a
    /// commit never replaces an existing artifact.
    pub fn allocate(&self, now: DateTime<Utc>) -> Allocation {
        let mut stamp = now;
        while self.root.join(artifact_name(stamp)).exists() {
            stamp += chrono::Duration::milliseconds(1);
        }
        let name = artifact_name(stamp);
        Allocation {
            final_path: self.root.join(&name),
            partial_path: self.root.join(format!(".{}{}", name, PARTIAL_SUFFIX)),
            name,
            published: false,
        }
    }

    /// Publish a finished dump under its final name
    ///
    /// On failure the allocation is dropped and its partial file removed.
    pub fn commit(&self, mut allocation: Allocation) -> VaultResult<Artifact> {
        fs::rename(&allocation.partial_path, &allocation.final_path).map_err(|e| {
            VaultError::Io(format!("Failed to publish backup {}: {}", allocation.name, e))
        })?;
        allocation.published = true;
        self.stat(&allocation.name)
    }
}

/// Build the artifact filename for a dump starting at `now`
pub fn artifact_name(now: DateTime<Utc>) -> String {
    format!(
        "{}{}-{:03}{}",
        ARTIFACT_PREFIX,
        now.format("%Y%m%d-%H%M%S"),
        now.timestamp_subsec_millis().min(999),
        ARTIFACT_SUFFIX
    )
}

/// Whether `name` follows the artifact naming scheme
pub fn is_artifact_name(name: &str) -> bool {
    name.strip_prefix(ARTIFACT_PREFIX)
        .and_then(|rest| rest.strip_suffix(ARTIFACT_SUFFIX))
        .and_then(parse_artifact_timestamp)
        .is_some()
}

fn validate_name(name: &str) -> VaultResult<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || Path::new(name).is_absolute()
    {
        return Err(VaultError::invalid_name(name));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(VaultError::invalid_name(name)),
    }

    if !is_artifact_name(name) {
        return Err(VaultError::invalid_name(name));
    }

    Ok(())
}

fn artifact_from_metadata(name: String, path: PathBuf, metadata: &fs::Metadata) -> Artifact {
    let name_timestamp = name
        .strip_prefix(ARTIFACT_PREFIX)
        .and_then(|rest| rest.strip_suffix(ARTIFACT_SUFFIX))
        .and_then(parse_artifact_timestamp);

    let fallback = name_timestamp.unwrap_or_else(|| to_utc(SystemTime::UNIX_EPOCH));
    let modified_at = metadata.modified().map(to_utc).unwrap_or(fallback);
    let created_at = metadata.created().map(to_utc).unwrap_or(modified_at);

    Artifact {
        name,
        path,
        size_bytes: metadata.len(),
        created_at,
        modified_at,
        name_timestamp,
    }
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Parse the timestamp part of an artifact filename
fn parse_artifact_timestamp(date_str: &str) -> Option<DateTime<Utc>> {
    // Expected format: YYYYMMDD-HHMMSS or YYYYMMDD-HHMMSS-mmm (with milliseconds)
    let parts: Vec<&str> = date_str.split('-').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let date_part = parts[0];
    let time_part = parts[1];
    let millis: u32 = match parts.get(2) {
        Some(ms) if ms.len() == 3 => ms.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };

    if date_part.len() != 8 || time_part.len() != 6 {
        return None;
    }
    if !date_part.bytes().chain(time_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = date_part[0..4].parse().ok()?;
    let month: u32 = date_part[4..6].parse().ok()?;
    let day: u32 = date_part[6..8].parse().ok()?;
    let hour: u32 = time_part[0..2].parse().ok()?;
    let minute: u32 = time_part[2..4].parse().ok()?;
    let second: u32 = time_part[4..6].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = chrono::NaiveTime::from_hms_milli_opt(hour, minute, second, millis)?;
    let datetime = chrono::NaiveDateTime::new(date, time);

    Some(DateTime::from_naive_utc_and_offset(datetime, Utc))
}
