//! Deletion safety policy.
//!
//! [`SafetyGuard::evaluate`] runs a fixed sequence of checks against a path and
//! the live system state. Nothing is cached: mounts come and go, so every call
//! re-reads the mount table.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

/// Paths that are never deletable, compared exactly.
pub const CRITICAL_PATHS: &[&str] = &[
    "/", "/boot", "/dev", "/etc", "/lib", "/lib64", "/proc", "/root", "/run", "/sys", "/usr",
    "/var", "/bin", "/sbin", "/opt", "/srv", "/tmp",
];

/// statfs magic numbers of pseudo filesystems (see linux/magic.h).
pub const PROC_SUPER_MAGIC: i64 = 0x9fa0;
pub const SYSFS_MAGIC: i64 = 0x6265_6572;
pub const TMPFS_MAGIC: i64 = 0x0102_1994;
pub const RAMFS_MAGIC: i64 = 0x8584_58f6;
pub const DEVPTS_SUPER_MAGIC: i64 = 0x1cd1;
pub const SECURITYFS_MAGIC: i64 = 0x7363_6673;
pub const CGROUP_SUPER_MAGIC: i64 = 0x0027_e0eb;
pub const CGROUP2_SUPER_MAGIC: i64 = 0x6367_7270;

const PROTECTED_FS: &[i64] = &[
    PROC_SUPER_MAGIC,
    SYSFS_MAGIC,
    TMPFS_MAGIC,
    RAMFS_MAGIC,
    DEVPTS_SUPER_MAGIC,
    SECURITYFS_MAGIC,
    CGROUP_SUPER_MAGIC,
    CGROUP2_SUPER_MAGIC,
];

/// Mount points under these roots are treated as removable media.
const REMOVABLE_ROOTS: &[&str] = &["/media", "/mnt", "/run/media"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeletionStatus {
    Allowed,
    BlockedSystemPath,
    BlockedHome,
    BlockedVirtualFilesystem,
    BlockedMountPoint,
    WarningRemovableMedia,
}

impl DeletionStatus {
    /// Only `Allowed` and `WarningRemovableMedia` may proceed, and both still
    /// need explicit confirmation.
    pub fn permits_deletion(self) -> bool {
        matches!(self, Self::Allowed | Self::WarningRemovableMedia)
    }

    pub fn is_blocked(self) -> bool {
        !self.permits_deletion()
    }

    pub fn is_warning(self) -> bool {
        self == Self::WarningRemovableMedia
    }
}

/// Outcome of one evaluation, carrying the evaluated path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionVerdict {
    pub status: DeletionStatus,
    pub path: PathBuf,
}

impl DeletionVerdict {
    pub fn permits_deletion(&self) -> bool {
        self.status.permits_deletion()
    }

    pub fn message(&self) -> String {
        describe_verdict(self.status, &self.path)
    }
}

impl fmt::Display for DeletionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Human-readable text for a verdict; always names the path.
pub fn describe_verdict(status: DeletionStatus, path: &Path) -> String {
    let path = path.display();
    match status {
        DeletionStatus::Allowed => format!("Deletion allowed: {}", path),
        DeletionStatus::BlockedSystemPath => format!("Cannot delete system directory: {}", path),
        DeletionStatus::BlockedHome => format!("Cannot delete your home directory: {}", path),
        DeletionStatus::BlockedVirtualFilesystem => {
            format!("Cannot delete virtual/system filesystem: {}", path)
        }
        DeletionStatus::BlockedMountPoint => format!("Cannot delete mount point: {}", path),
        DeletionStatus::WarningRemovableMedia => format!("This is on removable media: {}", path),
    }
}

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountRecord {
    pub device: String,
    pub mount_point: PathBuf,
    pub filesystem_type: String,
    pub is_root: bool,
    pub is_removable_heuristic: bool,
}

impl MountRecord {
    pub fn new(device: &str, mount_point: &str, filesystem_type: &str) -> Self {
        let mount_point = PathBuf::from(mount_point);
        let is_root = mount_point == Path::new("/");
        let is_removable_heuristic = REMOVABLE_ROOTS
            .iter()
            .any(|root| mount_point.starts_with(root));

        Self {
            device: device.to_string(),
            mount_point,
            filesystem_type: filesystem_type.to_string(),
            is_root,
            is_removable_heuristic,
        }
    }
}

/// Parses `/proc/mounts` style text: `device mountpoint fstype options dump pass`.
/// Short or empty lines are skipped.
pub fn parse_mount_table(text: &str) -> Vec<MountRecord> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fstype = fields.next()?;
            Some(MountRecord::new(
                &unescape_mount_field(device),
                &unescape_mount_field(mount_point),
                fstype,
            ))
        })
        .collect()
}

/// Decodes the kernel's octal escapes (`\040` for space and friends).
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Access to the system state the guard depends on.
pub trait SystemProbe {
    fn home_dir(&self) -> Option<PathBuf>;

    /// Filesystem type identifier (statfs `f_type`) backing `path`.
    fn filesystem_type(&self, path: &Path) -> io::Result<i64>;

    fn mounts(&self) -> Vec<MountRecord>;

    /// Whether the kernel flags the block device behind `device` as removable.
    fn is_device_removable(&self, device: &str) -> bool;

    /// Where `path` physically points, following symlinks in its directory
    /// part but not a final symlink. `None` if it cannot be resolved.
    fn physical_path(&self, path: &Path) -> Option<PathBuf> {
        match path.file_name() {
            Some(name) => {
                let parent = path.parent().filter(|p| !p.as_os_str().is_empty())?;
                Some(fs::canonicalize(parent).ok()?.join(name))
            }
            None => fs::canonicalize(path).ok(),
        }
    }
}

/// Reads the running system: `$HOME`, statfs, `/proc/mounts`, `/sys/class/block`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveSystem;

impl SystemProbe for LiveSystem {
    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }

    #[cfg(target_os = "linux")]
    fn filesystem_type(&self, path: &Path) -> io::Result<i64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut info: libc::statfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut info) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // Magic numbers are 32-bit; f_type width and signedness vary by target.
        Ok((info.f_type as i64) & 0xffff_ffff)
    }

    #[cfg(not(target_os = "linux"))]
    fn filesystem_type(&self, _path: &Path) -> io::Result<i64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "filesystem type probe is only available on Linux",
        ))
    }

    fn mounts(&self) -> Vec<MountRecord> {
        match fs::read_to_string("/proc/mounts") {
            Ok(text) => parse_mount_table(&text),
            Err(e) => {
                warn!(error = %e, "cannot read mount table");
                Vec::new()
            }
        }
    }

    fn is_device_removable(&self, device: &str) -> bool {
        let Some(name) = block_device_name(device) else {
            return false;
        };
        let flag = Path::new("/sys/class/block").join(&name).join("removable");
        match fs::read_to_string(&flag) {
            Ok(value) => value.trim() == "1",
            Err(e) => {
                debug!(device, error = %e, "no removable flag");
                false
            }
        }
    }
}

/// Maps a partition device node to its whole-disk block device name:
/// `/dev/sdb1` -> `sdb`, `/dev/nvme0n1p2` -> `nvme0n1`, `/dev/mmcblk0p1` -> `mmcblk0`.
pub fn block_device_name(device: &str) -> Option<String> {
    let name = device.strip_prefix("/dev/")?;
    if name.is_empty() || name.contains('/') {
        return None;
    }

    let partitioned_with_p = name.starts_with("nvme") || name.starts_with("mmcblk") || name.starts_with("loop");
    let base = if partitioned_with_p {
        match name.rfind('p') {
            Some(pos)
                if pos > 0
                    && pos + 1 < name.len()
                    && name[pos + 1..].bytes().all(|b| b.is_ascii_digit())
                    && name.as_bytes()[pos - 1].is_ascii_digit() =>
            {
                &name[..pos]
            }
            _ => name,
        }
    } else {
        name.trim_end_matches(|c: char| c.is_ascii_digit())
    };

    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

/// Layered deletion policy over a [`SystemProbe`].
#[derive(Debug, Clone, Default)]
pub struct SafetyGuard<P = LiveSystem> {
    probe: P,
}

impl SafetyGuard<LiveSystem> {
    pub fn new() -> Self {
        Self { probe: LiveSystem }
    }
}

impl<P: SystemProbe> SafetyGuard<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    /// Checks run in order and the first match wins: system path, home
    /// directory, pseudo filesystem (a failed probe counts as one), mount
    /// point, removable media.
    pub fn evaluate(&self, path: &Path) -> DeletionVerdict {
        let status = self.status_for(path);
        debug!(path = %path.display(), ?status, "deletion evaluated");
        DeletionVerdict {
            status,
            path: path.to_path_buf(),
        }
    }

    fn status_for(&self, path: &Path) -> DeletionStatus {
        let lexical = self.status_for_normalized(&normalize(path));
        if !has_parent_dir(path) {
            return lexical;
        }

        // `..` after a symlink climbs out of the link target, not the
        // spelled-out directory; judge both readings.
        match self.probe.physical_path(path) {
            Some(physical) => stricter(lexical, self.status_for_normalized(&normalize(&physical))),
            None => lexical,
        }
    }

    fn status_for_normalized(&self, normalized: &Path) -> DeletionStatus {
        if is_system_path(normalized) {
            return DeletionStatus::BlockedSystemPath;
        }
        if self.is_user_home(normalized) {
            return DeletionStatus::BlockedHome;
        }
        if self.is_protected_filesystem(normalized) {
            return DeletionStatus::BlockedVirtualFilesystem;
        }

        let mounts = self.probe.mounts();
        if mounts.iter().any(|m| m.mount_point.as_path() == normalized) {
            return DeletionStatus::BlockedMountPoint;
        }
        if self.is_removable_media(normalized, &mounts) {
            return DeletionStatus::WarningRemovableMedia;
        }

        DeletionStatus::Allowed
    }

    fn is_user_home(&self, path: &Path) -> bool {
        self.probe
            .home_dir()
            .map_or(false, |home| normalize(&home) == path)
    }

    fn is_protected_filesystem(&self, path: &Path) -> bool {
        match self.probe.filesystem_type(path) {
            Ok(fs_type) => PROTECTED_FS.contains(&fs_type),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "filesystem probe failed, treating as protected");
                true
            }
        }
    }

    /// Judged by the deepest mount containing `path`, the one backing it.
    fn is_removable_media(&self, path: &Path, mounts: &[MountRecord]) -> bool {
        let backing = mounts
            .iter()
            .filter(|m| path.starts_with(&m.mount_point))
            .max_by_key(|m| m.mount_point.components().count());

        match backing {
            Some(m) if !m.is_root => {
                m.is_removable_heuristic || self.probe.is_device_removable(&m.device)
            }
            _ => false,
        }
    }
}

/// Whether `path` is one of [`CRITICAL_PATHS`].
pub fn is_system_path(path: &Path) -> bool {
    let normalized = normalize(path);
    CRITICAL_PATHS.iter().any(|p| normalized == Path::new(p))
}

/// Lexical normalization: drops trailing separators and `.`, and lets `..`
/// remove the preceding component (never climbing above the root). No
/// symlink resolution.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let climbs = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if climbs {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn has_parent_dir(path: &Path) -> bool {
    path.components().any(|c| c == Component::ParentDir)
}

/// Blocked beats warning beats allowed; the first argument wins ties.
fn stricter(a: DeletionStatus, b: DeletionStatus) -> DeletionStatus {
    fn rank(status: DeletionStatus) -> u8 {
        if status.is_blocked() {
            2
        } else if status.is_warning() {
            1
        } else {
            0
        }
    }

    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeSystem {
        home: PathBuf,
        mounts: Vec<MountRecord>,
        pseudo: Vec<PathBuf>,
        broken: Vec<PathBuf>,
        removable_devices: HashSet<String>,
    }

    impl FakeSystem {
        fn new() -> Self {
            Self {
                home: PathBuf::from("/home/alice"),
                mounts: parse_mount_table(
                    "/dev/nvme0n1p2 / ext4 rw,relatime 0 0\n\
                     proc /proc proc rw 0 0\n\
                     /dev/nvme0n1p3 /data ext4 rw 0 0\n\
                     /dev/sdb1 /media/usb vfat rw 0 0\n\
                     /dev/sdc1 /backup ext4 rw 0 0\n\
                     /dev/nvme0n1p4 /backup/fixed ext4 rw 0 0\n",
                ),
                pseudo: vec![PathBuf::from("/proc")],
                broken: vec![PathBuf::from("/data/locked")],
                removable_devices: ["/dev/sdc1".to_string()].into_iter().collect(),
            }
        }
    }

    impl SystemProbe for FakeSystem {
        fn home_dir(&self) -> Option<PathBuf> {
            Some(self.home.clone())
        }

        fn filesystem_type(&self, path: &Path) -> io::Result<i64> {
            if self.broken.iter().any(|b| path.starts_with(b)) {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            if self.pseudo.iter().any(|p| path.starts_with(p)) {
                return Ok(PROC_SUPER_MAGIC);
            }
            Ok(0xEF53) // ext4
        }

        fn mounts(&self) -> Vec<MountRecord> {
            self.mounts.clone()
        }

        fn is_device_removable(&self, device: &str) -> bool {
            self.removable_devices.contains(device)
        }
    }

    fn status(path: &str) -> DeletionStatus {
        SafetyGuard::with_probe(FakeSystem::new())
            .evaluate(Path::new(path))
            .status
    }

    #[test]
    fn test_check_order() {
        assert_eq!(status("/"), DeletionStatus::BlockedSystemPath);
        assert_eq!(status("/etc"), DeletionStatus::BlockedSystemPath);
        assert_eq!(status("/etc/"), DeletionStatus::BlockedSystemPath);
        // /proc is a system path before it is a pseudo filesystem
        assert_eq!(status("/proc"), DeletionStatus::BlockedSystemPath);
        assert_eq!(status("/home/alice"), DeletionStatus::BlockedHome);
        assert_eq!(status("/proc/self"), DeletionStatus::BlockedVirtualFilesystem);
        assert_eq!(status("/data/locked/file"), DeletionStatus::BlockedVirtualFilesystem);
        assert_eq!(status("/data"), DeletionStatus::BlockedMountPoint);
        assert_eq!(status("/media/usb"), DeletionStatus::BlockedMountPoint);
        assert_eq!(status("/media/usb/photo.jpg"), DeletionStatus::WarningRemovableMedia);
        assert_eq!(status("/backup/old.tar"), DeletionStatus::WarningRemovableMedia);
        assert_eq!(status("/data/report.txt"), DeletionStatus::Allowed);
        assert_eq!(status("/home/alice/notes.txt"), DeletionStatus::Allowed);
    }

    #[test]
    fn test_parent_components_resolved_before_checks() {
        assert_eq!(status("/usr/../etc"), DeletionStatus::BlockedSystemPath);
        assert_eq!(status("/etc/.."), DeletionStatus::BlockedSystemPath);
        assert_eq!(status("/tmp/../usr"), DeletionStatus::BlockedSystemPath);
        assert_eq!(status("/../../etc"), DeletionStatus::BlockedSystemPath);
        assert_eq!(status("/home/alice/x/.."), DeletionStatus::BlockedHome);
        assert_eq!(status("/data/sub/.."), DeletionStatus::BlockedMountPoint);
        assert_eq!(status("/data/sub/../report.txt"), DeletionStatus::Allowed);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/usr/./lib/../bin/")), PathBuf::from("/usr/bin"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_stricter_prefers_blocking() {
        use DeletionStatus::*;
        assert_eq!(stricter(Allowed, BlockedHome), BlockedHome);
        assert_eq!(stricter(BlockedSystemPath, BlockedHome), BlockedSystemPath);
        assert_eq!(stricter(WarningRemovableMedia, Allowed), WarningRemovableMedia);
        assert_eq!(stricter(Allowed, WarningRemovableMedia), WarningRemovableMedia);
        assert_eq!(stricter(Allowed, Allowed), Allowed);
    }

    #[test]
    fn test_removable_judged_by_backing_mount() {
        // Fixed disk mounted inside a removable one.
        assert_eq!(status("/backup/fixed"), DeletionStatus::BlockedMountPoint);
        assert_eq!(status("/backup/fixed/a.txt"), DeletionStatus::Allowed);
        assert_eq!(status("/backup/fixedx/a.txt"), DeletionStatus::WarningRemovableMedia);
    }

    #[test]
    fn test_subpaths_of_system_dirs_not_blocked_by_list() {
        assert!(!is_system_path(Path::new("/etc/hosts")));
        assert!(!is_system_path(Path::new("/usrlocal")));
        assert!(is_system_path(Path::new("/usr/")));
    }

    #[test]
    fn test_permits_deletion() {
        assert!(DeletionStatus::Allowed.permits_deletion());
        assert!(DeletionStatus::WarningRemovableMedia.permits_deletion());
        assert!(DeletionStatus::WarningRemovableMedia.is_warning());
        for blocked in [
            DeletionStatus::BlockedSystemPath,
            DeletionStatus::BlockedHome,
            DeletionStatus::BlockedVirtualFilesystem,
            DeletionStatus::BlockedMountPoint,
        ] {
            assert!(blocked.is_blocked());
            assert!(!blocked.is_warning());
        }
    }

    #[test]
    fn test_messages_name_the_path() {
        let path = Path::new("/media/usb/x");
        for status in [
            DeletionStatus::Allowed,
            DeletionStatus::BlockedSystemPath,
            DeletionStatus::BlockedHome,
            DeletionStatus::BlockedVirtualFilesystem,
            DeletionStatus::BlockedMountPoint,
            DeletionStatus::WarningRemovableMedia,
        ] {
            assert!(describe_verdict(status, path).contains("/media/usb/x"));
        }
        assert_eq!(
            describe_verdict(DeletionStatus::BlockedMountPoint, Path::new("/data")),
            "Cannot delete mount point: /data"
        );
    }

    #[test]
    fn test_parse_mount_table() {
        let mounts = parse_mount_table(
            "/dev/sda2 / ext4 rw 0 0\n\
             \n\
             /dev/sdb1 /run/media/bob/My\\040Stick vfat rw 0 0\n\
             tmpfs /mntx tmpfs rw 0 0\n\
             broken-line\n",
        );

        assert_eq!(mounts.len(), 3);
        assert!(mounts[0].is_root);
        assert!(!mounts[0].is_removable_heuristic);
        assert_eq!(mounts[1].mount_point, PathBuf::from("/run/media/bob/My Stick"));
        assert!(mounts[1].is_removable_heuristic);
        assert_eq!(mounts[2].filesystem_type, "tmpfs");
        assert!(!mounts[2].is_removable_heuristic);
    }

    #[test]
    fn test_block_device_name() {
        assert_eq!(block_device_name("/dev/sda1").as_deref(), Some("sda"));
        assert_eq!(block_device_name("/dev/sdb").as_deref(), Some("sdb"));
        assert_eq!(block_device_name("/dev/nvme0n1p2").as_deref(), Some("nvme0n1"));
        assert_eq!(block_device_name("/dev/nvme0n1").as_deref(), Some("nvme0n1"));
        assert_eq!(block_device_name("/dev/mmcblk0p1").as_deref(), Some("mmcblk0"));
        assert_eq!(block_device_name("tmpfs"), None);
        assert_eq!(block_device_name("/dev/mapper/root"), None);
    }

    #[test]
    fn test_live_system_paths() {
        let guard = SafetyGuard::new();
        assert_eq!(guard.evaluate(Path::new("/")).status, DeletionStatus::BlockedSystemPath);
        assert_eq!(guard.evaluate(Path::new("/etc")).status, DeletionStatus::BlockedSystemPath);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_proc_is_virtual() {
        let guard = SafetyGuard::new();
        assert_eq!(
            guard.evaluate(Path::new("/proc/self")).status,
            DeletionStatus::BlockedVirtualFilesystem
        );
    }
}
