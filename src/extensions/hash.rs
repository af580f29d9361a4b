//! Bundle content hashing
//!
//! The hash is a change/identity oracle for the hot-reload watcher, not an
//! integrity check. SHA-256 over the raw file bytes keeps collisions out of
//! the picture for free.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Content digest of a bundle file.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleHash([u8; 32]);

impl BundleHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix, used to suffix staged filenames.
    pub fn short(&self) -> String {
        let mut s = String::with_capacity(8);
        for b in &self.0[..4] {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for BundleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BundleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleHash({})", self.short())
    }
}

/// Compute the content digest of a bundle file.
///
/// An I/O error propagates; the calling sweep step treats the bundle as
/// unreadable and skips it until the next sweep.
pub fn digest_file(path: &Path) -> io::Result<BundleHash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(BundleHash(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn digest_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.so");
        std::fs::write(&path, b"extension bytes").unwrap();

        let a = digest_file(&path).unwrap();
        let b = digest_file(&path).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn digest_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.so");

        std::fs::write(&path, b"v1").unwrap();
        let h1 = digest_file(&path).unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"v2").unwrap();
        drop(f);

        let h2 = digest_file(&path).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn missing_file_propagates_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(digest_file(&dir.path().join("nope.so")).is_err());
    }

    #[test]
    fn short_is_hex_prefix() {
        let h = BundleHash::from_bytes([0xab; 32]);
        assert_eq!(h.short(), "abababab");
        assert!(h.to_string().starts_with("abababab"));
        assert_eq!(h.to_string().len(), 64);
    }
}
