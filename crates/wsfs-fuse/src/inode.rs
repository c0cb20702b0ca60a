//! Inode bookkeeping for the path-addressed wire.
//!
//! The kernel speaks inodes; the wire speaks absolute paths. This table is
//! the translation layer: inos are handed out lazily as the kernel looks
//! paths up, remapped on rename, and dropped on unlink/rmdir. It holds no
//! attributes — those are the backend's, fetched fresh every time.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Root inode number, per FUSE convention.
pub const ROOT_INO: u64 = 1;

struct Tables {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next: u64,
}

/// Bidirectional ino ↔ absolute-path map.
pub struct InodeTable {
    inner: RwLock<Tables>,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(ROOT_INO, "/".to_string());
        by_path.insert("/".to_string(), ROOT_INO);
        Self {
            inner: RwLock::new(Tables { by_ino, by_path, next: ROOT_INO + 1 }),
        }
    }

    /// The path an ino refers to, if the kernel has looked it up.
    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.inner.read().by_ino.get(&ino).cloned()
    }

    /// The ino for a path, allocating one on first sight.
    pub fn assign(&self, path: &str) -> u64 {
        let mut tables = self.inner.write();
        if let Some(&ino) = tables.by_path.get(path) {
            return ino;
        }
        let ino = tables.next;
        tables.next += 1;
        tables.by_ino.insert(ino, path.to_string());
        tables.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Join a child name onto the path behind `parent_ino`.
    pub fn child_path(&self, parent_ino: u64, name: &str) -> Option<String> {
        let parent = self.path_of(parent_ino)?;
        Some(join(&parent, name))
    }

    /// Retarget a path (and everything under it) after a rename.
    pub fn rename(&self, old: &str, new: &str) {
        let mut tables = self.inner.write();
        let prefix = format!("{}/", old.trim_end_matches('/'));
        let moved: Vec<(String, u64)> = tables
            .by_path
            .iter()
            .filter(|(path, _)| path.as_str() == old || path.starts_with(&prefix))
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();
        for (path, ino) in moved {
            tables.by_path.remove(&path);
            let renamed = if path == old {
                new.to_string()
            } else {
                format!("{new}{}", &path[old.len()..])
            };
            tables.by_ino.insert(ino, renamed.clone());
            tables.by_path.insert(renamed, ino);
        }
    }

    /// Forget a path (and everything under it) after unlink/rmdir.
    pub fn remove(&self, path: &str) {
        let mut tables = self.inner.write();
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let gone: Vec<(String, u64)> = tables
            .by_path
            .iter()
            .filter(|(p, _)| p.as_str() == path || p.starts_with(&prefix))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();
        for (p, ino) in gone {
            tables.by_path.remove(&p);
            tables.by_ino.remove(&ino);
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
