use std::fs;
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;

/// 64-bit FNV-1a offset basis.
pub const FNV_OFFSET_BASIS: u64 = 14_695_981_039_346_656_037;
/// 64-bit FNV prime (2^40 + 2^8 + 0xb3).
pub const FNV_PRIME: u64 = 1_099_511_628_211;

/// Produces a content fingerprint for a file.
///
/// Implementations fail closed: an empty string means "hash unavailable" and
/// the entry is left out of duplicate grouping.
pub trait ContentHasher: Send + Sync {
    fn fingerprint(&self, path: &Path) -> String;
}

/// Streaming 64-bit FNV-1a state.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1aState {
    acc: u64,
}

impl Fnv1aState {
    pub fn new() -> Self {
        Self {
            acc: FNV_OFFSET_BASIS,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.acc ^= u64::from(b);
            self.acc = self.acc.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn finish(&self) -> u64 {
        self.acc
    }

    /// Renders the accumulator as 16 uppercase, zero-padded hex digits.
    pub fn to_hex(&self) -> String {
        format!("{:016X}", self.acc)
    }
}

impl Default for Fnv1aState {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a fingerprinting over a file's raw bytes.
///
/// Non-cryptographic: fine for equality filtering, not for integrity against
/// an adversary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fnv1a;

impl Fnv1a {
    pub fn hash_bytes(bytes: &[u8]) -> String {
        let mut state = Fnv1aState::new();
        state.update(bytes);
        state.to_hex()
    }

    fn hash_file(path: &Path) -> io::Result<String> {
        let mut file = fs::File::open(path)?;
        let mut state = Fnv1aState::new();
        let mut buffer = vec![0; 8192]; // 8KB buffer

        loop {
            let bytes_read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            state.update(&buffer[..bytes_read]);
        }

        Ok(state.to_hex())
    }
}

impl ContentHasher for Fnv1a {
    fn fingerprint(&self, path: &Path) -> String {
        match Self::hash_file(path) {
            Ok(hash) => hash,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "fingerprint unavailable");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_known_vectors() {
        assert_eq!(Fnv1a::hash_bytes(b""), "CBF29CE484222325");
        assert_eq!(Fnv1a::hash_bytes(b"a"), "AF63DC4C8601EC8C");
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut state = Fnv1aState::new();
        state.update(b"hello ");
        state.update(b"world");
        assert_eq!(state.to_hex(), Fnv1a::hash_bytes(b"hello world"));
    }

    #[test]
    fn test_same_content_same_fingerprint() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "hello world").unwrap();
        fs::write(&b, "hello world").unwrap();

        let fa = Fnv1a.fingerprint(&a);
        let fb = Fnv1a.fingerprint(&b);
        assert_eq!(fa, fb);
        assert_eq!(fa.len(), 16);
        assert!(fa.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_different_content_different_fingerprint() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "content A").unwrap();
        fs::write(&b, "content B").unwrap();

        assert_ne!(Fnv1a.fingerprint(&a), Fnv1a.fingerprint(&b));
    }

    #[test]
    fn test_large_file_spans_buffers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        assert_eq!(Fnv1a.fingerprint(&path), Fnv1a::hash_bytes(&data));
    }

    #[test]
    fn test_missing_file_yields_empty() {
        let dir = tempdir().unwrap();
        assert_eq!(Fnv1a.fingerprint(&dir.path().join("nope")), "");
    }
}
