use std::ffi::OsString;

use crate::Entry;

/// Sorts entries in place: parent marker first (when `include_parent`),
/// then directories before files, then by display name (case-sensitive,
/// compared on the raw name rather than a lossy rendering).
pub fn sort_entries(entries: &mut [Entry], include_parent: bool) {
    entries.sort_by_cached_key(|e| SortKey {
        parent_rank: if include_parent && e.is_parent { 0 } else { 1 },
        dir_rank: if e.is_dir { 0 } else { 1 },
        name: e.name_os(),
    });
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    parent_rank: u8,
    dir_rank: u8,
    name: OsString,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[Entry]) -> Vec<String> {
        entries.iter().map(Entry::display_name).collect()
    }

    #[test]
    fn test_parent_then_dirs_then_files() {
        let mut entries = vec![
            Entry::file("/d/b.txt", 1),
            Entry::directory("/d/zeta"),
            Entry::file("/d/a.txt", 1),
            Entry::parent_marker("/"),
            Entry::directory("/d/alpha"),
        ];

        sort_entries(&mut entries, true);
        assert_eq!(names(&entries), ["..", "alpha/", "zeta/", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_case_sensitive_order() {
        let mut entries = vec![
            Entry::file("/d/apple", 1),
            Entry::file("/d/Zebra", 1),
            Entry::file("/d/Banana", 1),
        ];

        sort_entries(&mut entries, false);
        assert_eq!(names(&entries), ["Banana", "Zebra", "apple"]);
    }

    #[test]
    fn test_parent_marker_not_pinned_when_excluded() {
        let mut entries = vec![
            Entry::directory("/d/aaa"),
            Entry::file("/d/file", 1),
            Entry::parent_marker("/"),
        ];

        sort_entries(&mut entries, false);
        // Sorted as a plain directory whose display name is ".."
        assert_eq!(names(&entries), ["..", "aaa/", "file"]);
    }

    #[test]
    fn test_directory_separator_takes_part_in_order() {
        let mut entries = vec![Entry::directory("/d/a-b"), Entry::directory("/d/a")];

        sort_entries(&mut entries, false);
        // "a/" vs "a-b/": '-' (0x2D) sorts before '/' (0x2F)
        assert_eq!(names(&entries), ["a-b/", "a/"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_sort_by_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let high = Entry::file(OsStr::from_bytes(b"/d/a\xff"), 1);
        let low = Entry::file(OsStr::from_bytes(b"/d/a\xfe"), 1);
        // Both render as "a\u{FFFD}"; only the raw bytes tell them apart.
        assert_eq!(high.display_name(), low.display_name());

        let mut entries = vec![high.clone(), low.clone()];
        sort_entries(&mut entries, false);
        assert_eq!(entries, [low, high]);
    }
}
