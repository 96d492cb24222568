// crates/muninn-server/src/db/migration_log.rs
// Append-only JSON-lines log of applied schema migrations

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// One applied migration, as serialized into migrations.log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationLogEntry {
    /// ISO-8601 UTC timestamp of when the migration ran.
    pub at: String,
    /// Schema version after the migration.
    pub version: i64,
    /// Database the migration ran against.
    pub db: String,
    /// Migration name, e.g. "learning_tables".
    pub detail: String,
}

impl MigrationLogEntry {
    pub fn new(version: i64, db: &str, detail: &str) -> Self {
        Self {
            at: chrono::Utc::now().to_rfc3339(),
            version,
            db: db.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Append one entry to the migration log. Creates parent directories as
/// needed. Failures are returned so the caller can warn-and-continue; a
/// missing log never blocks a migration.
pub fn append_entry(log_path: &Path, entry: &MigrationLogEntry) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Read all entries from the migration log, skipping unparseable lines.
pub fn read_entries(log_path: &Path) -> Vec<MigrationLogEntry> {
    let Ok(content) = std::fs::read_to_string(log_path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("migrations.log");

        append_entry(&log, &MigrationLogEntry::new(1, "memory.db", "base_schema")).unwrap();
        append_entry(&log, &MigrationLogEntry::new(2, "memory.db", "learning_tables")).unwrap();

        let entries = read_entries(&log);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version, 1);
        assert_eq!(entries[1].detail, "learning_tables");
    }

    #[test]
    fn test_read_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("migrations.log");
        std::fs::write(&log, "not json\n{\"at\":\"t\",\"version\":3,\"db\":\"x\",\"detail\":\"d\"}\n").unwrap();

        let entries = read_entries(&log);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, 3);
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        assert!(read_entries(Path::new("/nonexistent/migrations.log")).is_empty());
    }

    #[test]
    fn test_append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("nested/deeper/migrations.log");
        append_entry(&log, &MigrationLogEntry::new(1, "global.db", "base_schema")).unwrap();
        assert_eq!(read_entries(&log).len(), 1);
    }
}
