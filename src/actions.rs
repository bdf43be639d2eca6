use std::fs;
use std::path::{Path, PathBuf};

use console::style;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{InspectError, Result};
use crate::safety::{SafetyGuard, SystemProbe};
use crate::utils::format_bytes;
use crate::{DuplicateGroup, Entry};

/// Result of a single removal. Failures carry the underlying error text.
#[derive(Debug, Clone)]
pub struct FileOperation {
    pub path: PathBuf,
    pub action: String,
    pub success: bool,
    pub error: Option<String>,
    pub items_deleted: usize,
    pub space_freed: u64,
}

impl FileOperation {
    fn succeeded(path: &Path, action: &str, items_deleted: usize, space_freed: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            action: action.to_string(),
            success: true,
            error: None,
            items_deleted,
            space_freed,
        }
    }

    fn failed(path: &Path, action: &str, error: String) -> Self {
        Self {
            path: path.to_path_buf(),
            action: action.to_string(),
            success: false,
            error: Some(error),
            items_deleted: 0,
            space_freed: 0,
        }
    }

    pub fn message(&self) -> String {
        match (&self.error, self.items_deleted) {
            (Some(error), _) => format!("{} {} failed: {}", self.action, self.path.display(), error),
            (None, n) if n > 0 => format!("Deleted {} ({} items)", self.path.display(), n),
            (None, _) => format!("Deleted {}", self.path.display()),
        }
    }
}

/// Aggregate of a batch of removals
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub operations: Vec<FileOperation>,
    pub total_space_saved: u64,
    pub total_files_processed: usize,
}

impl ActionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_operation(&mut self, operation: FileOperation) {
        self.total_space_saved += operation.space_freed;
        self.total_files_processed += 1;
        self.operations.push(operation);
    }

    pub fn success_count(&self) -> usize {
        self.operations.iter().filter(|op| op.success).count()
    }

    pub fn error_count(&self) -> usize {
        self.operations.iter().filter(|op| !op.success).count()
    }

    pub fn print_summary(&self) {
        println!();
        println!("{}", style("Action Summary").green().bold());
        println!("{}", style("-".repeat(20)).green());
        println!("Files processed: {}", self.total_files_processed);
        println!("Successful operations: {}", self.success_count());
        println!("Failed operations: {}", self.error_count());
        println!("Total space saved: {}", format_bytes(self.total_space_saved));

        if self.error_count() > 0 {
            println!();
            println!("{}", style("Errors:").red().bold());
            for op in self.operations.iter().filter(|op| !op.success) {
                if let Some(error) = &op.error {
                    println!("  {} {}: {}", op.action, op.path.display(), error);
                }
            }
        }
    }
}

/// Removes one non-directory entry.
///
/// Performs no safety checks: callers must hold a permitting verdict and the
/// user's confirmation. See [`checked_delete`].
pub fn delete_file(entry: &Entry) -> FileOperation {
    let path = &entry.path;
    if entry.is_parent || entry.is_dir {
        return FileOperation::failed(path, "delete", "is a directory".to_string());
    }

    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "deleted file");
            FileOperation::succeeded(path, "delete", 1, entry.size)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "delete failed");
            FileOperation::failed(path, "delete", e.to_string())
        }
    }
}

/// Removes a directory. Non-recursive mode only removes an empty directory;
/// recursive mode counts the descendants first, then removes the subtree.
///
/// Like [`delete_file`], this is mechanism only.
pub fn delete_directory(entry: &Entry, recursive: bool) -> FileOperation {
    let path = &entry.path;
    if entry.is_parent {
        return FileOperation::failed(path, "rmdir", "refusing to delete the parent marker".to_string());
    }
    if !entry.is_dir {
        return FileOperation::failed(path, "rmdir", "not a directory".to_string());
    }

    if !recursive {
        return match fs::remove_dir(path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted empty directory");
                FileOperation::succeeded(path, "rmdir", 0, 0)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "rmdir failed");
                FileOperation::failed(path, "rmdir", e.to_string())
            }
        };
    }

    let (items, bytes) = count_descendants(path);
    match fs::remove_dir_all(path) {
        Ok(()) => {
            info!(path = %path.display(), items, "deleted directory tree");
            FileOperation::succeeded(path, "rmdir -r", items, bytes)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "recursive delete failed");
            FileOperation::failed(path, "rmdir -r", e.to_string())
        }
    }
}

/// Number of entries below `path` and the bytes held by its files.
pub fn count_descendants(path: &Path) -> (usize, u64) {
    WalkDir::new(path)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .fold((0, 0), |(items, bytes), e| {
            let size = if e.file_type().is_file() {
                e.metadata().map(|m| m.len()).unwrap_or(0)
            } else {
                0
            };
            (items + 1, bytes + size)
        })
}

/// Evaluates `entry` with `guard` and deletes it only if the verdict permits.
///
/// User confirmation is still the caller's responsibility; this only removes
/// the possibility of skipping the policy check.
pub fn checked_delete<P: SystemProbe>(
    guard: &SafetyGuard<P>,
    entry: &Entry,
    recursive: bool,
) -> Result<FileOperation> {
    let verdict = guard.evaluate(&entry.path);
    if !verdict.permits_deletion() {
        return Err(InspectError::Blocked {
            status: verdict.status,
            message: verdict.message(),
        });
    }

    if entry.is_dir {
        Ok(delete_directory(entry, recursive))
    } else {
        Ok(delete_file(entry))
    }
}

/// Deletes every member of each group except the first, through the guard.
/// Blocked members are recorded as failed operations.
pub fn delete_redundant_copies<P: SystemProbe>(
    guard: &SafetyGuard<P>,
    entries: &[Entry],
    groups: &[DuplicateGroup],
) -> ActionResult {
    let mut result = ActionResult::new();

    for group in groups {
        for duplicate in group.entries(entries).skip(1) {
            let operation = match checked_delete(guard, duplicate, false) {
                Ok(op) => op,
                Err(e) => FileOperation::failed(&duplicate.path, "delete", e.to_string()),
            };
            result.add_operation(operation);
        }
    }

    result
}
