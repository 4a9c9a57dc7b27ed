//! Integrity verification for dbvault
//!
//! A cheap, heuristic check that an artifact looks like a complete
//! schema-bearing SQL dump. It never touches a database, so a passing report
//! means "structurally plausible", not "guaranteed to restore".

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::error::{VaultError, VaultResult};

/// Reason reported when no table definitions were found
pub const MISSING_MARKERS: &str = "missing structural markers";

/// Result of verifying one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Artifact filename
    pub name: String,
    /// Whether the artifact is structurally plausible
    pub valid: bool,
    /// Why the artifact was classified invalid
    pub reasons: Vec<String>,
    /// Size in bytes
    pub size_bytes: u64,
    /// Contains at least one table definition
    pub has_schema: bool,
    /// Contains both a transaction start and a commit
    pub has_transaction_markers: bool,
    /// Ends with the dump utility's completion comment
    pub has_completion_marker: bool,
}

impl VerificationReport {
    /// Get a one-line summary of the report
    pub fn summary(&self) -> String {
        if !self.valid {
            return format!("Invalid backup: {}", self.reasons.join(", "));
        }

        let mut notes = Vec::new();
        if !self.has_transaction_markers {
            notes.push("no transaction markers");
        }
        if !self.has_completion_marker {
            notes.push("no completion marker");
        }

        if notes.is_empty() {
            "Valid backup".to_string()
        } else {
            format!("Valid backup ({})", notes.join(", "))
        }
    }
}

/// Inspects artifacts for the markers of a complete dump
#[derive(Debug, Clone, Default)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Verify the artifact at `path`
    pub fn verify(&self, path: &Path) -> VaultResult<VerificationReport> {
        let file = File::open(path)
            .map_err(|e| VaultError::Io(format!("Failed to open backup file: {}", e)))?;
        let size_bytes = file
            .metadata()
            .map_err(|e| VaultError::Io(format!("Failed to stat backup file: {}", e)))?
            .len();

        let mut reader = BufReader::new(file);
        let mut markers = Markers::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| VaultError::Io(format!("Failed to read backup file: {}", e)))?;
            if read == 0 {
                break;
            }
            markers.observe(&String::from_utf8_lossy(&buf));
        }

        let mut reasons = Vec::new();
        if !markers.schema {
            reasons.push(MISSING_MARKERS.to_string());
        }

        Ok(VerificationReport {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            valid: reasons.is_empty(),
            reasons,
            size_bytes,
            has_schema: markers.schema,
            has_transaction_markers: markers.begin && markers.commit,
            has_completion_marker: markers.complete,
        })
    }
}

#[derive(Debug, Default)]
struct Markers {
    schema: bool,
    begin: bool,
    commit: bool,
    complete: bool,
}

impl Markers {
    fn observe(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if line.starts_with("--") {
            let lower = line.to_ascii_lowercase();
            if lower.contains("dump complete") {
                self.complete = true;
            }
            return;
        }

        let upper = line.to_ascii_uppercase();
        if upper.contains("CREATE TABLE") {
            self.schema = true;
        }
        if upper == "BEGIN;"
            || upper.starts_with("BEGIN TRANSACTION")
            || upper.starts_with("START TRANSACTION")
        {
            self.begin = true;
        }
        if upper.starts_with("COMMIT") {
            self.commit = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    const COMPLETE_DUMP: &str = "\
--
-- PostgreSQL database dump
--
BEGIN;
CREATE TABLE public.users (
    id integer NOT NULL,
    email text
);
COPY public.users (id, email) FROM stdin;
1\tadmin@example.com
\\.
COMMIT;
--
-- PostgreSQL database dump complete
--
";

    #[test]
    fn test_complete_dump_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "backup-20250101-020000-000.sql", COMPLETE_DUMP.as_bytes());

        let report = IntegrityVerifier::new().verify(&path).unwrap();

        assert!(report.valid);
        assert!(report.reasons.is_empty());
        assert!(report.has_schema);
        assert!(report.has_transaction_markers);
        assert!(report.has_completion_marker);
        assert_eq!(report.name, "backup-20250101-020000-000.sql");
        assert_eq!(report.size_bytes, COMPLETE_DUMP.len() as u64);
        assert_eq!(report.summary(), "Valid backup");
    }

    #[test]
    fn test_zero_byte_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "backup-20250101-020000-000.sql", b"");

        let report = IntegrityVerifier::new().verify(&path).unwrap();

        assert!(!report.valid);
        assert_eq!(report.reasons, vec!["missing structural markers".to_string()]);
        assert_eq!(report.size_bytes, 0);
    }

    #[test]
    fn test_lowercase_schema_without_brackets_is_valid_with_notes() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "backup-20250101-020000-000.sql",
            b"create table items (id int);\ninsert into items values (1);\n",
        );

        let report = IntegrityVerifier::new().verify(&path).unwrap();

        assert!(report.valid);
        assert!(!report.has_transaction_markers);
        assert!(!report.has_completion_marker);
        assert!(report.summary().contains("no transaction markers"));
    }

    #[test]
    fn test_commented_out_schema_does_not_count() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "backup-20250101-020000-000.sql",
            b"-- CREATE TABLE ghosts (id int);\nSELECT 1;\n",
        );

        let report = IntegrityVerifier::new().verify(&path).unwrap();
        assert!(!report.valid);
    }

    #[test]
    fn test_binary_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "backup-20250101-020000-000.sql", &[0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe]);

        let report = IntegrityVerifier::new().verify(&path).unwrap();
        assert!(!report.valid);
        assert!(report.summary().starts_with("Invalid backup"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = IntegrityVerifier::new()
            .verify(&dir.path().join("missing.sql"))
            .unwrap_err();
        assert!(matches!(err, VaultError::Io(_)));
    }
}
