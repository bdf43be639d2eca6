//! A browsing session: one current directory, one displayed entry set.
//!
//! Scans run on a worker thread and report back over a channel so the caller
//! stays responsive. At most one scan is in flight; starting another first
//! waits for the previous worker to finish.

use std::mem;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use tracing::{debug, warn};

use crate::actions::{checked_delete, FileOperation};
use crate::dedup::{find_duplicates, find_zero_byte_files, reset_flags, total_wasted_space};
use crate::error::{InspectError, Result};
use crate::safety::{SafetyGuard, SystemProbe};
use crate::scanner::{CancelToken, ScanConfig, Scanner};
use crate::Entry;

/// Messages from the scan worker.
#[derive(Debug)]
pub enum ScanEvent {
    Progress(usize),
    Finished(Vec<Entry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Idle,
    Running { scanned: usize },
    Finished { entries: usize },
}

/// What a filter swapped into view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSummary {
    pub groups: usize,
    pub matched: usize,
    pub wasted_bytes: u64,
}

struct ScanWorker {
    events: Receiver<ScanEvent>,
    handle: JoinHandle<()>,
    cancel: CancelToken,
}

pub struct ScanSession {
    current_dir: PathBuf,
    config: ScanConfig,
    entries: Vec<Entry>,
    backup: Option<Vec<Entry>>,
    worker: Option<ScanWorker>,
    /// Workers whose result was discarded; joined before the next scan.
    abandoned: Vec<JoinHandle<()>>,
    scanned: usize,
}

impl ScanSession {
    pub fn new(dir: impl Into<PathBuf>, config: ScanConfig) -> Self {
        Self {
            current_dir: dir.into(),
            config,
            entries: Vec::new(),
            backup: None,
            worker: None,
            abandoned: Vec::new(),
            scanned: 0,
        }
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn set_recursive(&mut self, recursive: bool) {
        self.config.recursive = recursive;
    }

    /// The displayed entries (filtered when a filter is active).
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn is_scanning(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_filtered(&self) -> bool {
        self.backup.is_some()
    }

    /// Starts scanning `dir` in the background, after any scan still in flight
    /// has finished.
    pub fn start_scan(&mut self, dir: impl Into<PathBuf>) {
        self.join_previous();

        self.current_dir = dir.into();
        self.backup = None;
        self.scanned = 0;

        let (tx, rx) = unbounded();
        let cancel = CancelToken::new();
        let mut scanner = Scanner::new().with_config(self.config.clone());
        scanner.set_cancel_token(cancel.clone());
        let path = self.current_dir.clone();

        let handle = thread::spawn(move || {
            let progress_tx = tx.clone();
            let entries = scanner.scan_with_progress(&path, |n| {
                // Receiver gone means the result was discarded.
                let _ = progress_tx.send(ScanEvent::Progress(n));
            });
            let _ = tx.send(ScanEvent::Finished(entries));
        });

        debug!(dir = %self.current_dir.display(), "scan started");
        self.worker = Some(ScanWorker {
            events: rx,
            handle,
            cancel,
        });
    }

    pub fn rescan(&mut self) {
        let dir = self.current_dir.clone();
        self.start_scan(dir);
    }

    fn join_previous(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.wait() {
                warn!(error = %e, "previous scan did not complete");
            }
        }
        for handle in self.abandoned.drain(..) {
            if handle.join().is_err() {
                warn!("abandoned scan worker panicked");
            }
        }
    }

    /// Drains pending events without blocking.
    pub fn poll(&mut self) -> Result<ScanStatus> {
        let Some(worker) = &self.worker else {
            return Ok(ScanStatus::Idle);
        };

        loop {
            match worker.events.try_recv() {
                Ok(ScanEvent::Progress(n)) => self.scanned = n,
                Ok(ScanEvent::Finished(entries)) => return Ok(self.finish(entries)),
                Err(TryRecvError::Empty) => return Ok(ScanStatus::Running { scanned: self.scanned }),
                Err(TryRecvError::Disconnected) => {
                    self.finish_worker();
                    return Err(InspectError::WorkerDisconnected);
                }
            }
        }
    }

    /// Blocks until the in-flight scan finishes, calling `on_progress` for each
    /// progress report on the way. Returns immediately when idle.
    pub fn wait_with_progress<F>(&mut self, mut on_progress: F) -> Result<&[Entry]>
    where
        F: FnMut(usize),
    {
        while let Some(worker) = &self.worker {
            match worker.events.recv() {
                Ok(ScanEvent::Progress(n)) => {
                    self.scanned = n;
                    on_progress(n);
                }
                Ok(ScanEvent::Finished(entries)) => {
                    self.finish(entries);
                }
                Err(_) => {
                    self.finish_worker();
                    return Err(InspectError::WorkerDisconnected);
                }
            }
        }
        Ok(self.entries.as_slice())
    }

    pub fn wait(&mut self) -> Result<&[Entry]> {
        self.wait_with_progress(|_| {})
    }

    /// Stops listening for the in-flight scan. The worker runs to completion
    /// in the background and its result is dropped.
    pub fn discard(&mut self) {
        if let Some(worker) = self.worker.take() {
            debug!("scan result discarded");
            self.abandoned.push(worker.handle);
        }
    }

    /// Asks the in-flight scan to stop early and discards its result.
    pub fn cancel(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
        self.discard();
    }

    fn finish(&mut self, entries: Vec<Entry>) -> ScanStatus {
        self.finish_worker();
        self.entries = entries;
        self.backup = None;
        ScanStatus::Finished {
            entries: self.entries.len(),
        }
    }

    fn finish_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.handle.join().is_err() {
                warn!("scan worker panicked");
            }
        }
    }

    /// Swaps the displayed set to duplicate group members, keeping the full
    /// listing for [`restore`](Self::restore).
    pub fn apply_duplicate_filter(&mut self) -> FilterSummary {
        let mut all = self.take_unfiltered();
        reset_flags(&mut all);
        let groups = find_duplicates(&mut all);

        let shown: Vec<Entry> = groups
            .iter()
            .flat_map(|g| g.entries(&all).cloned())
            .collect();
        let summary = FilterSummary {
            groups: groups.len(),
            matched: shown.len(),
            wasted_bytes: total_wasted_space(&groups),
        };

        self.entries = shown;
        self.backup = Some(all);
        summary
    }

    /// Swaps the displayed set to zero-byte files.
    pub fn apply_zero_byte_filter(&mut self) -> FilterSummary {
        let mut all = self.take_unfiltered();
        reset_flags(&mut all);
        let found = find_zero_byte_files(&mut all);

        let shown: Vec<Entry> = found.iter().map(|&i| all[i].clone()).collect();
        let summary = FilterSummary {
            groups: usize::from(!shown.is_empty()),
            matched: shown.len(),
            wasted_bytes: 0,
        };

        self.entries = shown;
        self.backup = Some(all);
        summary
    }

    /// Brings back the unfiltered listing. Returns false if none was active.
    pub fn restore(&mut self) -> bool {
        match self.backup.take() {
            Some(all) => {
                self.entries = all;
                true
            }
            None => false,
        }
    }

    fn take_unfiltered(&mut self) -> Vec<Entry> {
        match self.backup.take() {
            Some(all) => all,
            None => mem::take(&mut self.entries),
        }
    }

    /// Scans into the directory at `index` (the parent marker included).
    pub fn open(&mut self, index: usize) -> Result<()> {
        let entry = self.entries.get(index).ok_or(InspectError::NoSuchEntry(index))?;
        if !entry.is_dir {
            return Err(InspectError::NotADirectory(entry.path.clone()));
        }
        let dir = entry.path.clone();
        self.start_scan(dir);
        Ok(())
    }

    /// Deletes the entry at `index` through the guard, then rescans.
    ///
    /// The caller must already have shown the verdict and obtained the user's
    /// confirmation.
    pub fn delete<P: SystemProbe>(
        &mut self,
        guard: &SafetyGuard<P>,
        index: usize,
        recursive: bool,
    ) -> Result<FileOperation> {
        let entry = self.entries.get(index).ok_or(InspectError::NoSuchEntry(index))?;
        let operation = checked_delete(guard, entry, recursive)?;
        if operation.success {
            self.rescan();
        }
        Ok(operation)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
    }
}
