use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::hasher::{ContentHasher, Fnv1a};
use crate::sorter::sort_entries;
use crate::Entry;

/// Configuration for directory scanning
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub recursive: bool,
    pub include_parent: bool,
    pub follow_links: bool,
    /// Entries between progress callbacks in a flat scan.
    pub progress_interval_flat: usize,
    /// Entries between progress callbacks in a recursive scan.
    pub progress_interval_recursive: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            include_parent: true,
            follow_links: false,
            progress_interval_flat: 10,
            progress_interval_recursive: 100,
        }
    }
}

impl ScanConfig {
    fn progress_interval(&self) -> usize {
        let interval = if self.recursive {
            self.progress_interval_recursive
        } else {
            self.progress_interval_flat
        };
        interval.max(1)
    }
}

/// Cooperative stop flag checked before every enumeration step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Walks a directory and builds sorted [`Entry`] listings.
pub struct Scanner<H = Fnv1a> {
    config: ScanConfig,
    hasher: H,
    cancel: CancelToken,
}

impl Scanner<Fnv1a> {
    pub fn new() -> Self {
        Self::with_hasher(Fnv1a)
    }
}

impl Default for Scanner<Fnv1a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ContentHasher> Scanner<H> {
    pub fn with_hasher(hasher: H) -> Self {
        Self {
            config: ScanConfig::default(),
            hasher,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn set_recursive(&mut self, recursive: bool) {
        self.config.recursive = recursive;
    }

    pub fn set_include_parent(&mut self, include_parent: bool) {
        self.config.include_parent = include_parent;
    }

    pub fn set_follow_links(&mut self, follow_links: bool) {
        self.config.follow_links = follow_links;
    }

    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    pub fn scan(&self, path: &Path) -> Vec<Entry> {
        self.scan_with_progress(path, |_| {})
    }

    /// Scans `path` and returns its sorted entries.
    ///
    /// Never fails: the first enumeration error (or a cancellation) ends the
    /// walk and whatever was collected so far is returned. `on_progress`
    /// receives the running entry count periodically and always once more with
    /// the final count.
    pub fn scan_with_progress<F>(&self, path: &Path, mut on_progress: F) -> Vec<Entry>
    where
        F: FnMut(usize),
    {
        let mut entries = Vec::new();
        let include_parent = self.config.include_parent && !self.config.recursive;

        if include_parent {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                entries.push(Entry::parent_marker(parent));
            }
        }

        let mut walker = WalkDir::new(path)
            .min_depth(1)
            .follow_links(self.config.follow_links);
        if !self.config.recursive {
            walker = walker.max_depth(1);
        }

        let interval = self.config.progress_interval();
        let mut count = 0usize;

        for item in walker {
            if self.cancel.is_cancelled() {
                info!(path = %path.display(), collected = count, "scan cancelled");
                break;
            }

            let dir_entry = match item {
                Ok(e) => e,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, collected = count, "scan ended early");
                    break;
                }
            };

            entries.push(self.process_entry(&dir_entry));
            count += 1;

            if count % interval == 0 {
                on_progress(count);
            }
        }

        on_progress(count);
        sort_entries(&mut entries, include_parent);

        debug!(path = %path.display(), entries = entries.len(), recursive = self.config.recursive, "scan complete");
        entries
    }

    fn process_entry(&self, dir_entry: &DirEntry) -> Entry {
        let path: PathBuf = dir_entry.path().to_path_buf();

        // Follow symlinks for classification; a dangling link counts as a file.
        let metadata = fs::metadata(&path).ok();
        let is_dir = match &metadata {
            Some(m) => m.is_dir(),
            None => dir_entry.file_type().is_dir(),
        };

        if is_dir {
            return Entry::directory(path);
        }

        let size = match metadata {
            Some(m) => m.len(),
            None => {
                debug!(path = %path.display(), "size unavailable, defaulting to 0");
                0
            }
        };

        let mut entry = Entry::file(path, size);
        if size > 0 {
            let hash = self.hasher.fingerprint(&entry.path);
            entry.set_fingerprint(hash);
        }
        entry
    }
}
