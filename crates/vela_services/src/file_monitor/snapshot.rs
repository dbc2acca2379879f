//! Directory snapshots and their differences.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{FileChange, FileChangeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
    is_dir: bool,
}

impl Stamp {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
            is_dir: metadata.is_dir(),
        }
    }
}

/// State of a watched path at one instant.
///
/// A watched file snapshots itself; a watched directory snapshots its direct
/// entries. A missing root is an empty snapshot, so its disappearance shows
/// up as deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<PathBuf, Stamp>,
}

impl Snapshot {
    /// Scans `root`.
    ///
    /// # Errors
    ///
    /// I/O errors other than "not found" while reading the root.
    pub fn scan(root: &Path) -> io::Result<Self> {
        let mut entries = BTreeMap::new();
        let metadata = match std::fs::metadata(root) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self { entries }),
            Err(err) => return Err(err),
        };

        if !metadata.is_dir() {
            entries.insert(root.to_path_buf(), Stamp::of(&metadata));
            return Ok(Self { entries });
        }

        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            // Entries removed between listing and stat are skipped; the next
            // scan reports them.
            if let Ok(metadata) = entry.metadata() {
                entries.insert(entry.path(), Stamp::of(&metadata));
            }
        }
        Ok(Self { entries })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes from `self` to `next`, one per affected path, sorted by path.
    #[must_use]
    pub fn diff(&self, next: &Self) -> Vec<FileChange> {
        let mut changes = Vec::new();
        for (path, stamp) in &next.entries {
            match self.entries.get(path) {
                None => changes.push(FileChange::new(FileChangeKind::Created, path.clone())),
                Some(previous) if previous != stamp => {
                    changes.push(FileChange::new(FileChangeKind::Modified, path.clone()));
                }
                Some(_) => {}
            }
        }
        for path in self.entries.keys() {
            if !next.entries.contains_key(path) {
                changes.push(FileChange::new(FileChangeKind::Deleted, path.clone()));
            }
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_directory_has_no_diff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let first = Snapshot::scan(dir.path()).unwrap();
        let second = Snapshot::scan(dir.path()).unwrap();
        assert_eq!(first.len(), 1);
        assert!(first.diff(&second).is_empty());
    }

    #[test]
    fn reports_each_kind_once() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.txt");
        let gone = dir.path().join("gone.txt");
        std::fs::write(&kept, "1").unwrap();
        std::fs::write(&gone, "1").unwrap();
        let before = Snapshot::scan(dir.path()).unwrap();

        std::fs::write(&kept, "grown").unwrap();
        std::fs::remove_file(&gone).unwrap();
        let fresh = dir.path().join("fresh.txt");
        std::fs::write(&fresh, "").unwrap();
        let after = Snapshot::scan(dir.path()).unwrap();

        let changes = before.diff(&after);
        assert_eq!(
            changes,
            vec![
                FileChange::new(FileChangeKind::Created, fresh),
                FileChange::new(FileChangeKind::Deleted, gone),
                FileChange::new(FileChangeKind::Modified, kept),
            ]
        );
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::scan(&dir.path().join("nope")).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn watched_file_snapshots_itself() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "x = 1").unwrap();
        let before = Snapshot::scan(&file).unwrap();
        std::fs::remove_file(&file).unwrap();
        let after = Snapshot::scan(&file).unwrap();
        assert_eq!(
            before.diff(&after),
            vec![FileChange::new(FileChangeKind::Deleted, file)]
        );
    }
}
