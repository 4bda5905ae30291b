//! Limit writers
//!
//! A [`LimitWriter`] commits one value to one control file. The atomic writer
//! stages the value in a sibling temp file and renames it into place, so a
//! concurrent reader sees either the old or the new value. The dry-run writer
//! performs no I/O and keeps a journal of what would have been written.

use crate::error::{AgentError, Result};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Default number of journal entries kept by the dry-run writer
const DEFAULT_JOURNAL_SIZE: usize = 1024;

/// Commits a value to a control file
pub trait LimitWriter: Send + Sync {
    fn write(&self, target: &Path, value: &str) -> Result<()>;

    /// True when writes are only recorded, never performed
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Writes through a temp file and rename
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicFileWriter;

impl AtomicFileWriter {
    /// Temp file path used while staging a write to `target`
    pub fn temp_path(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".tmp-{}", std::process::id()));
        target.with_file_name(name)
    }

    fn stage_and_commit(temp: &Path, target: &Path, value: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(temp, target)
    }
}

impl LimitWriter for AtomicFileWriter {
    fn write(&self, target: &Path, value: &str) -> Result<()> {
        let temp = Self::temp_path(target);

        if let Err(source) = Self::stage_and_commit(&temp, target, value) {
            if temp.exists() {
                if let Err(e) = fs::remove_file(&temp) {
                    warn!(path = %temp.display(), error = %e, "Failed to remove staged limit file");
                }
            }
            return Err(AgentError::WriteFailure {
                path: target.to_path_buf(),
                value: value.to_string(),
                source,
            });
        }

        Ok(())
    }
}

/// One write the dry-run writer intercepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub target: PathBuf,
    pub value: String,
}

/// Records intended writes without touching the filesystem
#[derive(Debug)]
pub struct DryRunWriter {
    journal: Mutex<VecDeque<JournalEntry>>,
    capacity: usize,
}

impl DryRunWriter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            journal: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Intercepted writes, oldest first
    pub fn journal(&self) -> Vec<JournalEntry> {
        match self.journal.lock() {
            Ok(journal) => journal.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Most recent value intercepted for `target`
    pub fn last_value(&self, target: &Path) -> Option<String> {
        self.journal()
            .into_iter()
            .rev()
            .find(|entry| entry.target == target)
            .map(|entry| entry.value)
    }
}

impl Default for DryRunWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl LimitWriter for DryRunWriter {
    fn write(&self, target: &Path, value: &str) -> Result<()> {
        info!(path = %target.display(), value = %value, "[dry-run] would write limit");

        let mut journal = match self.journal.lock() {
            Ok(journal) => journal,
            Err(poisoned) => poisoned.into_inner(),
        };
        if journal.len() == self.capacity {
            journal.pop_front();
        }
        journal.push_back(JournalEntry {
            target: target.to_path_buf(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_value() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("cpu.max");
        fs::write(&target, "max").unwrap();

        AtomicFileWriter.write(&target, "50000 100000").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "50000 100000");
        assert!(!AtomicFileWriter::temp_path(&target).exists());
    }

    #[test]
    fn test_atomic_write_failure_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        // Renaming a file over a non-empty directory fails
        let target = temp_dir.path().join("cpu.max");
        fs::create_dir_all(target.join("occupied")).unwrap();

        let err = AtomicFileWriter.write(&target, "max").unwrap_err();

        assert!(matches!(err, AgentError::WriteFailure { .. }));
        assert!(!AtomicFileWriter::temp_path(&target).exists());
        assert!(target.join("occupied").is_dir());
    }

    #[test]
    fn test_atomic_write_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("gone").join("memory.max");

        assert!(AtomicFileWriter.write(&target, "max").is_err());
        assert!(!target.exists());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let temp = AtomicFileWriter::temp_path(Path::new("/sys/fs/cgroup/a/cpu.max"));
        assert_eq!(temp.parent(), Some(Path::new("/sys/fs/cgroup/a")));
        assert!(temp.to_string_lossy().contains("cpu.max.tmp-"));
    }

    #[test]
    fn test_dry_run_records_without_io() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("cpu.max");
        let writer = DryRunWriter::new();

        writer.write(&target, "1000 100000").unwrap();
        writer.write(&target, "max").unwrap();

        assert!(!target.exists());
        assert!(writer.is_dry_run());
        assert_eq!(writer.journal().len(), 2);
        assert_eq!(writer.last_value(&target), Some("max".to_string()));
    }

    #[test]
    fn test_dry_run_journal_is_bounded() {
        let writer = DryRunWriter::with_capacity(2);
        for i in 0..3 {
            writer.write(Path::new("/x/cpu.max"), &i.to_string()).unwrap();
        }
        let values: Vec<String> = writer.journal().into_iter().map(|e| e.value).collect();
        assert_eq!(values, vec!["1".to_string(), "2".to_string()]);
    }
}
