use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use file_inspector::utils::{format_bytes, get_relative_path};
use file_inspector::{
    analyze_duplicates, checked_delete, confirm_duplicates, count_descendants,
    delete_redundant_copies, find_duplicates, find_zero_byte_files, DedupAnalysis,
    DeletionVerdict, DuplicateGroup, Entry, EntryKind, SafetyGuard, ScanConfig, ScanSession,
};

#[derive(Parser)]
#[command(
    name = "finspect",
    version,
    about = "Scan a directory, classify its entries and delete safely",
    long_about = "Scan a directory (optionally recursively), fingerprint its files with FNV-1a, report zero-byte files and duplicate groups, and delete paths only after a layered safety check."
)]
struct Cli {
    /// Directory to scan (defaults to the current directory)
    #[arg(short, long, value_name = "PATH")]
    path: Option<PathBuf>,

    /// Scan the whole subtree
    #[arg(short, long)]
    recursive: bool,

    /// Do not list the ".." entry
    #[arg(long)]
    no_parent: bool,

    /// List duplicate groups
    #[arg(short, long)]
    duplicates: bool,

    /// List zero-byte files
    #[arg(short, long)]
    zero: bool,

    /// Confirm fingerprint matches byte for byte before reporting duplicates
    #[arg(long)]
    verify: bool,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,

    /// Only report the deletion verdict for PATH
    #[arg(long, value_name = "PATH", conflicts_with = "delete")]
    check: Option<PathBuf>,

    /// Delete PATH after the safety check and confirmation
    #[arg(long, value_name = "PATH")]
    delete: Option<PathBuf>,

    /// Allow --delete to remove non-empty directories
    #[arg(long, requires = "delete")]
    recursive_delete: bool,

    /// Delete every duplicate except the first of each group
    #[arg(long, conflicts_with = "delete")]
    delete_duplicates: bool,

    /// Skip confirmation prompts
    #[arg(short, long, help = "Skip confirmation prompts (use with caution)")]
    yes: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    root: &'a Path,
    entries: &'a [Entry],
    duplicates: &'a [DuplicateGroup],
    zero_byte: &'a [usize],
    analysis: &'a DedupAnalysis,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose)?;

    let guard = SafetyGuard::new();

    if let Some(target) = &args.check {
        let verdict = guard.evaluate(target);
        print_verdict(&verdict);
        if !verdict.permits_deletion() {
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(target) = &args.delete {
        return delete_path(&guard, target, args.recursive_delete, args.yes);
    }

    let root = match &args.path {
        Some(p) => p.clone(),
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let config = ScanConfig {
        recursive: args.recursive,
        include_parent: !args.no_parent,
        ..ScanConfig::default()
    };
    let mut session = ScanSession::new(&root, config);
    let mut entries = scan(&mut session, &root, args.json)?;

    let mut groups = find_duplicates(&mut entries);
    if args.verify {
        groups = confirm_duplicates(&mut entries, groups);
    }
    let zero = find_zero_byte_files(&mut entries);
    let analysis = analyze_duplicates(&entries, &groups);

    if args.json {
        let report = Report {
            root: &root,
            entries: &entries,
            duplicates: &groups,
            zero_byte: &zero,
            analysis: &analysis,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    display_listing(&root, &entries);
    if args.zero {
        display_zero_byte(&root, &entries, &zero);
    }
    if args.duplicates || args.delete_duplicates {
        display_duplicates(&root, &entries, &groups);
    }
    analysis.print_analysis();

    if args.delete_duplicates && !groups.is_empty() {
        if !args.yes && !confirm("Delete every duplicate except the first of each group?")? {
            println!("{}", style("Operation cancelled").yellow());
            return Ok(());
        }
        let result = delete_redundant_copies(&guard, &entries, &groups);
        result.print_summary();
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_directive = if verbose {
        "file_inspector=debug"
    } else {
        "file_inspector=warn"
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))?)
        .init();

    Ok(())
}

fn scan(session: &mut ScanSession, root: &Path, quiet: bool) -> Result<Vec<Entry>> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    };

    spinner.set_message(format!("Scanning {}", root.display()));
    session.start_scan(root);
    let entries = session
        .wait_with_progress(|n| spinner.set_message(format!("Scanning {} ({} entries)", root.display(), n)))?
        .to_vec();
    spinner.finish_and_clear();

    Ok(entries)
}

fn styled_name(entry: &Entry) -> String {
    let name = entry.display_name();
    match entry.kind() {
        EntryKind::ZeroByte => style(name).red().to_string(),
        EntryKind::Duplicate => style(name).yellow().to_string(),
        EntryKind::Directory => style(name).blue().bold().to_string(),
        EntryKind::Executable => style(name).green().to_string(),
        EntryKind::Normal => name,
    }
}

fn display_listing(root: &Path, entries: &[Entry]) {
    println!("{}", style(format!("Contents of {}", root.display())).cyan().bold());
    println!("{}", style("=".repeat(40)).cyan());

    for entry in entries {
        let label = if entry.is_parent || entry.path.parent() == Some(root) {
            styled_name(entry)
        } else {
            // Recursive listings show where the entry lives.
            let rel = get_relative_path(root, &entry.path);
            let name = styled_name(entry);
            match rel.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(dir) => format!("{}/{}", dir.display(), name),
                None => name,
            }
        };

        if entry.is_dir {
            println!("  {:>10}  {}", "", label);
        } else {
            println!("  {:>10}  {}", format_bytes(entry.size), label);
        }
    }
}

fn display_zero_byte(root: &Path, entries: &[Entry], zero: &[usize]) {
    println!();
    println!("{}", style("Zero-byte files").red().bold());
    println!("{}", style("-".repeat(20)).red());
    for &index in zero {
        println!("  {}", get_relative_path(root, &entries[index].path).display());
    }
    println!("Possibly defective files: {}", zero.len());
}

fn display_duplicates(root: &Path, entries: &[Entry], groups: &[DuplicateGroup]) {
    println!();
    println!("{}", style("Duplicate groups").yellow().bold());
    println!("{}", style("-".repeat(20)).yellow());

    if groups.is_empty() {
        println!("No duplicate groups found.");
        return;
    }

    for (i, group) in groups.iter().enumerate() {
        println!(
            "{} {} ({} files, {} each, {} reclaimable)",
            style(format!("Group {}:", i + 1)).bold(),
            group.fingerprint,
            group.len(),
            format_bytes(group.size),
            format_bytes(group.wasted_bytes)
        );
        for (n, entry) in group.entries(entries).enumerate() {
            let marker = if n == 0 { "keep" } else { "dup " };
            println!("  {} {}", marker, get_relative_path(root, &entry.path).display());
        }
    }
}

fn print_verdict(verdict: &DeletionVerdict) {
    let message = verdict.message();
    if verdict.status.is_blocked() {
        eprintln!("{} {}", style("BLOCKED:").red().bold(), style(message).red());
    } else if verdict.status.is_warning() {
        println!("{} {}", style("WARNING:").yellow().bold(), style(message).yellow());
    } else {
        println!("{} {}", style("OK:").green().bold(), message);
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    Ok(dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

fn delete_path(guard: &SafetyGuard, target: &Path, recursive: bool, yes: bool) -> Result<()> {
    let entry = Entry::from_path(target)?;

    let verdict = guard.evaluate(target);
    print_verdict(&verdict);
    if !verdict.permits_deletion() {
        std::process::exit(1);
    }

    let prompt = if entry.is_dir && recursive {
        let (items, bytes) = count_descendants(target);
        format!(
            "Permanently delete {} and {} items ({}) below it?",
            target.display(),
            items,
            format_bytes(bytes)
        )
    } else {
        format!("Permanently delete {}?", target.display())
    };
    if !yes && !confirm(&prompt)? {
        println!("{}", style("Operation cancelled").yellow());
        return Ok(());
    }

    let operation = checked_delete(guard, &entry, recursive)?;
    if !operation.success {
        eprintln!("{}", style(operation.message()).red());
        std::process::exit(1);
    }
    println!("{}", style(operation.message()).green());

    if let Some(parent) = target.parent().filter(|p| p.is_dir()) {
        let mut session = ScanSession::new(parent, ScanConfig::default());
        let remaining = scan(&mut session, parent, false)?;
        display_listing(parent, &remaining);
    }

    Ok(())
}
