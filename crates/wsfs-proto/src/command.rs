//! Outbound command messages.
//!
//! A [`Command`] is one filesystem operation serialized for the peer:
//! the correlation id plus an internally-tagged [`Operation`] whose tag is
//! the `command` field. On the wire:
//!
//! ```json
//! {"id":7,"command":"getattr","path":"/a.txt"}
//! {"id":9,"command":"read","path":"/a.txt","length":4,"offset":0}
//! {"id":12,"command":"rename","old":"/a.txt","new":"/b.txt"}
//! ```

use serde::{Deserialize, Serialize};

use crate::{RequestId, WireBytes};

/// One command message, immutable after send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: RequestId,
    #[serde(flatten)]
    pub op: Operation,
}

impl Command {
    pub fn new(id: RequestId, op: Operation) -> Self {
        Self { id, op }
    }
}

/// The operation payload of a [`Command`].
///
/// `rename` carries `old`/`new` instead of `path`; everything else is
/// path-addressed. File handles never cross the wire: the peer keys open
/// files by path, and `release` tells it to drop whatever it holds for one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Operation {
    Getattr { path: String },
    Readdir { path: String },
    Readlink { path: String },
    Mkdir { path: String, mode: u32 },
    Rmdir { path: String },
    Unlink { path: String },
    Rename { old: String, new: String },
    Chmod { path: String, mode: u32 },
    Chown { path: String, uid: u32, gid: u32 },
    Utimens { path: String, times: Option<(f64, f64)> },
    Truncate { path: String, length: u64 },
    Open { path: String, flags: i32 },
    Create { path: String, mode: u32 },
    Read { path: String, length: u32, offset: u64 },
    Write { path: String, buffer: WireBytes, offset: u64 },
    Release { path: String },
}

impl Operation {
    /// The fieldless kind of this operation, for logging and response checks.
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Getattr { .. } => OpKind::Getattr,
            Operation::Readdir { .. } => OpKind::Readdir,
            Operation::Readlink { .. } => OpKind::Readlink,
            Operation::Mkdir { .. } => OpKind::Mkdir,
            Operation::Rmdir { .. } => OpKind::Rmdir,
            Operation::Unlink { .. } => OpKind::Unlink,
            Operation::Rename { .. } => OpKind::Rename,
            Operation::Chmod { .. } => OpKind::Chmod,
            Operation::Chown { .. } => OpKind::Chown,
            Operation::Utimens { .. } => OpKind::Utimens,
            Operation::Truncate { .. } => OpKind::Truncate,
            Operation::Open { .. } => OpKind::Open,
            Operation::Create { .. } => OpKind::Create,
            Operation::Read { .. } => OpKind::Read,
            Operation::Write { .. } => OpKind::Write,
            Operation::Release { .. } => OpKind::Release,
        }
    }

    /// The primary path this operation addresses (`old` for rename).
    pub fn path(&self) -> &str {
        match self {
            Operation::Getattr { path }
            | Operation::Readdir { path }
            | Operation::Readlink { path }
            | Operation::Mkdir { path, .. }
            | Operation::Rmdir { path }
            | Operation::Unlink { path }
            | Operation::Chmod { path, .. }
            | Operation::Chown { path, .. }
            | Operation::Utimens { path, .. }
            | Operation::Truncate { path, .. }
            | Operation::Open { path, .. }
            | Operation::Create { path, .. }
            | Operation::Read { path, .. }
            | Operation::Write { path, .. }
            | Operation::Release { path } => path,
            Operation::Rename { old, .. } => old,
        }
    }
}

/// Fieldless mirror of [`Operation`], used as the `command` echo in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Getattr,
    Readdir,
    Readlink,
    Mkdir,
    Rmdir,
    Unlink,
    Rename,
    Chmod,
    Chown,
    Utimens,
    Truncate,
    Open,
    Create,
    Read,
    Write,
    Release,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Getattr => "getattr",
            OpKind::Readdir => "readdir",
            OpKind::Readlink => "readlink",
            OpKind::Mkdir => "mkdir",
            OpKind::Rmdir => "rmdir",
            OpKind::Unlink => "unlink",
            OpKind::Rename => "rename",
            OpKind::Chmod => "chmod",
            OpKind::Chown => "chown",
            OpKind::Utimens => "utimens",
            OpKind::Truncate => "truncate",
            OpKind::Open => "open",
            OpKind::Create => "create",
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Release => "release",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
