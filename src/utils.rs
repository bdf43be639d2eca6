use std::path::{Path, PathBuf};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count with 1024-based units and one decimal:
/// `0 -> "0 B"`, `1536 -> "1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{:.1} {}", size, UNITS[unit])
}

/// Whether the owner may execute `path`. False if it cannot be stat'ed.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => !meta.is_dir() && meta.permissions().mode() & 0o100 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_executable(_path: &Path) -> bool {
    false
}

/// `to` relative to `from` for display, or `to` unchanged when no relative
/// form exists.
pub fn get_relative_path(from: &Path, to: &Path) -> PathBuf {
    match pathdiff::diff_paths(to, from) {
        Some(rel) if !rel.as_os_str().is_empty() => rel,
        _ => to.to_path_buf(),
    }
}

/// Calculate the percentage of one number relative to another
pub fn calculate_percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}
