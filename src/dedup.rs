use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use console::style;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::utils::{calculate_percentage, format_bytes};
use crate::{DuplicateGroup, Entry};

fn is_duplicate_candidate(entry: &Entry) -> bool {
    !entry.is_dir && !entry.is_parent && entry.size > 0 && entry.fingerprint().is_some()
}

/// Groups entries by fingerprint and marks every member of a group of two or
/// more with `is_duplicate`.
///
/// Directories, zero-byte files and unhashed files are never considered.
/// Flags of entries outside any group are left untouched; use [`reset_flags`]
/// first for a clean slate. Groups come out in order of their first member.
pub fn find_duplicates(entries: &mut [Entry]) -> Vec<DuplicateGroup> {
    let groups = group_by_fingerprint(entries);

    for group in &groups {
        for &index in &group.members {
            entries[index].is_duplicate = true;
        }
    }

    debug!(groups = groups.len(), "duplicate grouping complete");
    groups
}

fn group_by_fingerprint(entries: &[Entry]) -> Vec<DuplicateGroup> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();

    for (index, entry) in entries.iter().enumerate() {
        if !is_duplicate_candidate(entry) {
            continue;
        }
        if let Some(hash) = entry.fingerprint() {
            by_hash
                .entry(hash)
                .or_insert_with(|| {
                    order.push(hash);
                    Vec::new()
                })
                .push(index);
        }
    }

    let mut groups = Vec::new();
    for hash in order {
        let members = match by_hash.remove(hash) {
            Some(members) if members.len() > 1 => members,
            _ => continue,
        };
        let size = entries[members[0]].size;
        groups.push(DuplicateGroup::new(hash.to_string(), members, size));
    }
    groups
}

/// Sum of reclaimable bytes over all groups.
pub fn total_wasted_space(groups: &[DuplicateGroup]) -> u64 {
    groups.iter().map(|g| g.wasted_bytes).sum()
}

/// Returns indices of zero-byte regular files and marks them `is_broken`.
pub fn find_zero_byte_files(entries: &mut [Entry]) -> Vec<usize> {
    let mut found = Vec::new();
    for (index, entry) in entries.iter_mut().enumerate() {
        if entry.size == 0 && !entry.is_dir && !entry.is_parent {
            entry.is_broken = true;
            found.push(index);
        }
    }
    found
}

/// Clears duplicate and broken flags.
pub fn reset_flags(entries: &mut [Entry]) {
    for entry in entries {
        entry.is_duplicate = false;
        entry.is_broken = false;
    }
}

/// Re-checks fingerprint groups byte for byte.
///
/// Members whose content differs from the rest are split into their own
/// classes; classes smaller than two are dropped and their entries lose the
/// duplicate flag. Unreadable members are dropped as well.
pub fn confirm_duplicates(entries: &mut [Entry], groups: Vec<DuplicateGroup>) -> Vec<DuplicateGroup> {
    let snapshot: &[Entry] = entries;
    let confirmed: Vec<DuplicateGroup> = groups
        .into_par_iter()
        .flat_map_iter(|group| split_by_content(snapshot, group))
        .collect();

    let mut keep = vec![false; entries.len()];
    for group in &confirmed {
        for &index in &group.members {
            keep[index] = true;
        }
    }
    for (index, entry) in entries.iter_mut().enumerate() {
        if entry.is_duplicate && !keep[index] {
            debug!(path = %entry.path.display(), "fingerprint match not confirmed by content");
            entry.is_duplicate = false;
        }
    }

    info!(groups = confirmed.len(), "content confirmation complete");
    confirmed
}

fn split_by_content(entries: &[Entry], group: DuplicateGroup) -> Vec<DuplicateGroup> {
    let mut classes: Vec<Vec<usize>> = Vec::new();

    'members: for &index in &group.members {
        let path = &entries[index].path;
        for class in classes.iter_mut() {
            match files_identical(&entries[class[0]].path, path) {
                Ok(true) => {
                    class.push(index);
                    continue 'members;
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "comparison failed, dropping member");
                    continue 'members;
                }
            }
        }
        if fs::File::open(path).is_ok() {
            classes.push(vec![index]);
        }
    }

    classes
        .into_iter()
        .filter(|class| class.len() > 1)
        .map(|members| DuplicateGroup::new(group.fingerprint.clone(), members, group.size))
        .collect()
}

/// Streams both files and compares them chunk by chunk.
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    let (meta_a, meta_b) = (fs::metadata(a)?, fs::metadata(b)?);
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut file_a = fs::File::open(a)?;
    let mut file_b = fs::File::open(b)?;
    let mut buf_a = vec![0; 8192];
    let mut buf_b = vec![0; 8192];

    loop {
        let n = read_full(&mut file_a, &mut buf_a)?;
        let m = read_full(&mut file_b, &mut buf_b)?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

fn read_full(file: &mut fs::File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Summary of a duplicate scan
#[derive(Debug, Serialize)]
pub struct DedupAnalysis {
    pub total_entries: usize,
    pub total_size: u64,
    pub total_groups: usize,
    pub total_duplicates: usize,
    pub total_wasted_space: u64,
    pub zero_byte_files: usize,
    pub small_files: usize,  // <= 1KB
    pub medium_files: usize, // 1KB - 1MB
    pub large_files: usize,  // > 1MB
    pub largest_waste: Option<(PathBuf, u64)>,
}

pub fn analyze_duplicates(entries: &[Entry], groups: &[DuplicateGroup]) -> DedupAnalysis {
    let mut analysis = DedupAnalysis {
        total_entries: entries.iter().filter(|e| !e.is_parent).count(),
        total_size: entries.iter().filter(|e| !e.is_dir).map(|e| e.size).sum(),
        total_groups: groups.len(),
        total_duplicates: 0,
        total_wasted_space: total_wasted_space(groups),
        zero_byte_files: entries.iter().filter(|e| e.is_zero_byte()).count(),
        small_files: 0,
        medium_files: 0,
        large_files: 0,
        largest_waste: None,
    };

    for group in groups {
        let duplicate_count = group.len().saturating_sub(1);
        analysis.total_duplicates += duplicate_count;

        match group.size {
            0..=1024 => analysis.small_files += duplicate_count,
            1025..=1048576 => analysis.medium_files += duplicate_count,
            _ => analysis.large_files += duplicate_count,
        }

        let current = analysis.largest_waste.as_ref().map_or(0, |(_, w)| *w);
        if group.wasted_bytes > current {
            if let Some(first) = group.entries(entries).next() {
                analysis.largest_waste = Some((first.path.clone(), group.wasted_bytes));
            }
        }
    }

    analysis
}

impl DedupAnalysis {
    pub fn print_analysis(&self) {
        println!();
        println!("{}", style("Duplicate Analysis").cyan().bold());
        println!("{}", style("=".repeat(30)).cyan());

        println!("Entries scanned: {}", self.total_entries);
        println!("Zero-byte files: {}", self.zero_byte_files);
        println!("Duplicate groups found: {}", self.total_groups);
        println!("Total duplicate files: {}", self.total_duplicates);
        println!(
            "Total wasted space: {} ({:.1}% of scanned bytes)",
            format_bytes(self.total_wasted_space),
            calculate_percentage(self.total_wasted_space, self.total_size)
        );

        if self.total_duplicates > 0 {
            println!();
            println!("{}", style("File Size Distribution:").bold());
            println!("  Small files (<=1KB): {}", self.small_files);
            println!("  Medium files (1KB-1MB): {}", self.medium_files);
            println!("  Large files (>1MB): {}", self.large_files);
        }

        if let Some((path, waste)) = &self.largest_waste {
            println!();
            println!("{}", style("Largest opportunity:").bold());
            println!("  File: {}", path.display());
            println!("  Potential savings: {}", format_bytes(*waste));
        }
    }
}
