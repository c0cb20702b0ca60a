//! File attribute records.

use serde::{Deserialize, Serialize};

// File-type bits of `mode`, mirroring POSIX. Kept here so the leaf crate
// doesn't need libc.
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// Attributes for one path, as reported by the peer.
///
/// Times are Unix seconds as f64 — the natural shape for a JavaScript peer.
/// Absent fields default to zero (`nlink` to 1), but an absent *record*
/// (`data: null`) is "does not exist" and never decodes into this struct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileAttrs {
    #[serde(default)]
    pub size: u64,
    pub mode: u32,
    #[serde(default = "default_nlink")]
    pub nlink: u32,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(default)]
    pub atime: f64,
    #[serde(default)]
    pub mtime: f64,
    #[serde(default)]
    pub ctime: f64,
}

fn default_nlink() -> u32 {
    1
}

impl FileAttrs {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits only, without the file-type part.
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_record_fills_defaults() {
        let attrs: FileAttrs =
            serde_json::from_str(r#"{"mode":33188,"size":12}"#).unwrap();
        assert_eq!(attrs.size, 12);
        assert_eq!(attrs.nlink, 1);
        assert_eq!(attrs.uid, 0);
        assert!(!attrs.is_dir());
        assert_eq!(attrs.perm(), 0o644);
    }

    #[test]
    fn directory_mode_is_detected() {
        let attrs: FileAttrs = serde_json::from_str(r#"{"mode":16877}"#).unwrap();
        assert!(attrs.is_dir());
        assert!(!attrs.is_symlink());
        assert_eq!(attrs.perm(), 0o755);
    }

    #[test]
    fn missing_mode_is_rejected() {
        // A record without `mode` is malformed, not a default file.
        assert!(serde_json::from_str::<FileAttrs>(r#"{"size":1}"#).is_err());
    }
}
