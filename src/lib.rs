pub mod actions;
pub mod dedup;
pub mod error;
pub mod hasher;
pub mod safety;
pub mod scanner;
pub mod session;
pub mod sorter;
pub mod utils;

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use actions::{
    checked_delete, count_descendants, delete_directory, delete_file, delete_redundant_copies, ActionResult,
    FileOperation,
};
pub use dedup::{
    analyze_duplicates, confirm_duplicates, find_duplicates, find_zero_byte_files, reset_flags,
    total_wasted_space, DedupAnalysis,
};
pub use error::{InspectError, Result};
pub use hasher::{ContentHasher, Fnv1a};
pub use safety::{describe_verdict, DeletionStatus, DeletionVerdict, LiveSystem, MountRecord, SafetyGuard, SystemProbe};
pub use scanner::{CancelToken, ScanConfig, Scanner};
pub use session::{FilterSummary, ScanEvent, ScanSession, ScanStatus};
pub use sorter::sort_entries;

/// One filesystem object found during a scan.
///
/// A parent marker is always a directory of size 0 without a fingerprint, and
/// only non-empty regular files ever carry one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
    pub is_parent: bool,
    pub fingerprint: Option<String>,
    pub is_duplicate: bool,
    pub is_broken: bool,
}

/// Display classification, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    ZeroByte,
    Duplicate,
    Directory,
    Executable,
    Normal,
}

impl Entry {
    pub fn file(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            is_dir: false,
            is_parent: false,
            fingerprint: None,
            is_duplicate: false,
            is_broken: false,
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            is_dir: true,
            ..Self::file(path, 0)
        }
    }

    /// Builds an entry for an arbitrary path. Symlinks are described, not
    /// followed, so deleting the entry removes the link itself.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(InspectError::NotFound(path)),
            Err(source) => return Err(InspectError::Io { path, source }),
        };

        if metadata.is_dir() {
            Ok(Self::directory(path))
        } else {
            Ok(Self::file(path, metadata.len()))
        }
    }

    /// The synthetic ".." entry pointing at `parent`.
    pub fn parent_marker(parent: impl Into<PathBuf>) -> Self {
        Self {
            is_parent: true,
            ..Self::directory(parent)
        }
    }

    /// Stores a fingerprint if this entry is eligible for one. An empty hash
    /// means "unavailable" and clears it.
    pub fn set_fingerprint(&mut self, hash: String) {
        self.fingerprint = if self.is_dir || self.size == 0 || hash.is_empty() {
            None
        } else {
            Some(hash)
        };
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_zero_byte(&self) -> bool {
        self.size == 0 && !self.is_dir
    }

    /// ".." for the parent marker, the basename with a trailing separator for
    /// directories, the plain basename for files. A directory without a
    /// basename (the filesystem root) shows its whole path.
    pub fn display_name(&self) -> String {
        self.name_os().to_string_lossy().into_owned()
    }

    /// [`display_name`](Self::display_name) without lossy conversion; entries
    /// sort on these bytes.
    pub fn name_os(&self) -> OsString {
        if self.is_parent {
            return OsString::from("..");
        }

        match self.path.file_name() {
            Some(name) => {
                let mut name = name.to_os_string();
                if self.is_dir {
                    name.push(std::path::MAIN_SEPARATOR.to_string());
                }
                name
            }
            None => self.path.as_os_str().to_os_string(),
        }
    }

    pub fn is_executable(&self) -> bool {
        !self.is_dir && utils::is_executable(&self.path)
    }

    pub fn kind(&self) -> EntryKind {
        if self.is_zero_byte() {
            EntryKind::ZeroByte
        } else if self.is_duplicate {
            EntryKind::Duplicate
        } else if self.is_dir {
            EntryKind::Directory
        } else if self.is_executable() {
            EntryKind::Executable
        } else {
            EntryKind::Normal
        }
    }
}

/// Entries sharing one fingerprint. `members` index into the scanned slice the
/// group was computed from and always holds at least two entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub fingerprint: String,
    pub members: Vec<usize>,
    pub size: u64,
    pub wasted_bytes: u64,
}

impl DuplicateGroup {
    pub(crate) fn new(fingerprint: String, members: Vec<usize>, size: u64) -> Self {
        let wasted_bytes = size * (members.len() as u64).saturating_sub(1);
        Self {
            fingerprint,
            members,
            size,
            wasted_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Resolves member indices against the slice the group was built from.
    pub fn entries<'a>(&'a self, all: &'a [Entry]) -> impl Iterator<Item = &'a Entry> + 'a {
        self.members.iter().filter_map(move |&i| all.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(Entry::parent_marker("/home").display_name(), "..");
        assert_eq!(Entry::directory("/home/docs").display_name(), "docs/");
        assert_eq!(Entry::file("/home/a.txt", 3).display_name(), "a.txt");
        assert_eq!(Entry::directory("/").display_name(), "/");
    }

    #[test]
    fn test_fingerprint_invariant() {
        let mut dir = Entry::directory("/tmp/x");
        dir.set_fingerprint("ABCD".into());
        assert_eq!(dir.fingerprint(), None);

        let mut empty = Entry::file("/tmp/e", 0);
        empty.set_fingerprint("ABCD".into());
        assert_eq!(empty.fingerprint(), None);

        let mut file = Entry::file("/tmp/f", 4);
        file.set_fingerprint(String::new());
        assert_eq!(file.fingerprint(), None);
        file.set_fingerprint("ABCD".into());
        assert_eq!(file.fingerprint(), Some("ABCD"));
    }

    #[test]
    fn test_parent_marker_shape() {
        let marker = Entry::parent_marker("/home");
        assert!(marker.is_parent && marker.is_dir);
        assert_eq!(marker.size, 0);
        assert!(marker.fingerprint.is_none());
    }

    #[test]
    fn test_kind_precedence() {
        let mut zero = Entry::file("/nonexistent/zero", 0);
        zero.is_duplicate = true;
        assert_eq!(zero.kind(), EntryKind::ZeroByte);

        let mut dup = Entry::file("/nonexistent/dup", 10);
        dup.is_duplicate = true;
        assert_eq!(dup.kind(), EntryKind::Duplicate);

        assert_eq!(Entry::directory("/nonexistent/d").kind(), EntryKind::Directory);
        assert_eq!(Entry::file("/nonexistent/plain", 10).kind(), EntryKind::Normal);
    }

    #[test]
    fn test_group_wasted_bytes() {
        let group = DuplicateGroup::new("AA".into(), vec![0, 1, 2], 100);
        assert_eq!(group.wasted_bytes, 200);
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.bin");
        fs::write(&file, [1u8, 2, 3]).unwrap();

        let entry = Entry::from_path(&file).unwrap();
        assert!(!entry.is_dir);
        assert_eq!(entry.size, 3);
        assert!(Entry::from_path(dir.path()).unwrap().is_dir);
        assert!(matches!(
            Entry::from_path(dir.path().join("missing")),
            Err(InspectError::NotFound(_))
        ));
    }
}
