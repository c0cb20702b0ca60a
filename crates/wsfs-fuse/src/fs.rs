//! The FUSE-facing operation dispatcher.
//!
//! Each callback resolves the kernel's ino to a wire path, builds the
//! matching [`Operation`], runs it through the correlator, decodes the
//! reply into the callback's return shape, and maps any failure to an
//! errno. `flush`, `fsync`, and `statfs` are answered locally and never
//! cross the channel.
//!
//! fuser invokes callbacks on its own threads; each one blocks on the
//! tokio runtime via the stored [`Handle`] until its reply resolves or
//! times out. Attribute and entry TTLs are zero — nothing is cached,
//! every operation is a round trip.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tracing::debug;

use wsfs_bridge::{BridgeError, Correlator};
use wsfs_proto::{FileAttrs, HandleReply, Operation, ReadReply, WireBytes, WriteReply};

use crate::errmap::errno;
use crate::inode::{InodeTable, ROOT_INO};

/// Zero TTL: the kernel revalidates on every access.
const TTL: Duration = Duration::ZERO;

// Fixed statfs numbers; this filesystem has no meaningful local capacity.
const STATFS_BSIZE: u32 = 512;
const STATFS_BLOCKS: u64 = 4096;
const STATFS_BAVAIL: u64 = 2048;

// chown value for "leave unchanged", mirroring the -1 the syscall uses.
const NO_CHANGE: u32 = u32::MAX;

/// The mounted filesystem: every operation proxied to the remote peer.
pub struct WsFilesystem {
    correlator: Arc<Correlator>,
    runtime: Handle,
    inodes: InodeTable,
}

impl WsFilesystem {
    pub fn new(correlator: Arc<Correlator>, runtime: Handle) -> Self {
        Self {
            correlator,
            runtime,
            inodes: InodeTable::new(),
        }
    }

    // ── Wire helpers ─────────────────────────────────────────────────────

    async fn fetch_attrs(&self, path: &str) -> Result<FileAttrs, BridgeError> {
        let data = self
            .correlator
            .call(Operation::Getattr { path: path.to_string() })
            .await?;
        // The empty result is the "does not exist" sentinel, never a
        // zeroed attribute record.
        decode(data)
    }

    async fn fetch_dir(&self, path: &str) -> Result<Vec<String>, BridgeError> {
        let data = self
            .correlator
            .call(Operation::Readdir { path: path.to_string() })
            .await?;
        let mut names: Vec<String> = decode(data)?;
        for dot in ["..", "."] {
            if !names.iter().any(|n| n == dot) {
                names.insert(0, dot.to_string());
            }
        }
        Ok(names)
    }

    async fn fetch_link(&self, path: &str) -> Result<String, BridgeError> {
        let data = self
            .correlator
            .call(Operation::Readlink { path: path.to_string() })
            .await?;
        decode(data)
    }

    /// Fire a mutation and wait for the acknowledgement; any payload is
    /// ignored, a remote failure surfaces as the mapped error.
    async fn mutate(&self, op: Operation) -> Result<(), BridgeError> {
        self.correlator.call(op).await.map(|_| ())
    }

    async fn open_handle(&self, op: Operation) -> Result<u64, BridgeError> {
        let data = self.correlator.call(op).await?;
        let handle: HandleReply = decode(data)?;
        Ok(handle.fd)
    }

    async fn read_range(&self, path: &str, length: u32, offset: u64) -> Result<Vec<u8>, BridgeError> {
        let data = self
            .correlator
            .call(Operation::Read { path: path.to_string(), length, offset })
            .await?;
        let reply: ReadReply = decode(data)?;
        Ok(reply.data.into_inner())
    }

    async fn write_range(&self, path: &str, buffer: &[u8], offset: u64) -> Result<u64, BridgeError> {
        let data = self
            .correlator
            .call(Operation::Write {
                path: path.to_string(),
                buffer: WireBytes::from(buffer),
                offset,
            })
            .await?;
        let reply: WriteReply = decode(data)?;
        Ok(reply.length)
    }

    // ── Callback plumbing ────────────────────────────────────────────────

    fn block_on<T>(&self, fut: impl std::future::Future<Output = T>) -> T {
        self.runtime.block_on(fut)
    }

    fn resolve(&self, ino: u64) -> Result<String, libc::c_int> {
        self.inodes.path_of(ino).ok_or(libc::ENOENT)
    }

    fn resolve_child(&self, parent: u64, name: &OsStr) -> Result<String, libc::c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        self.inodes.child_path(parent, name).ok_or(libc::ENOENT)
    }
}

/// Decode a reply payload into its typed shape. An empty payload where a
/// record is required is `NotFound`.
fn decode<T: DeserializeOwned>(data: Option<serde_json::Value>) -> Result<T, BridgeError> {
    let value = data.ok_or(BridgeError::NotFound)?;
    serde_json::from_value(value).map_err(|e| BridgeError::MalformedResponse(e.to_string()))
}

fn to_system_time(unix_seconds: f64) -> SystemTime {
    if unix_seconds <= 0.0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_secs_f64(unix_seconds)
    }
}

fn unix_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

fn time_or_now(t: TimeOrNow) -> f64 {
    match t {
        TimeOrNow::SpecificTime(t) => unix_seconds(t),
        TimeOrNow::Now => unix_seconds(SystemTime::now()),
    }
}

fn to_file_attr(ino: u64, attrs: &FileAttrs) -> FileAttr {
    let kind = if attrs.is_dir() {
        FileType::Directory
    } else if attrs.is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    };
    let mtime = to_system_time(attrs.mtime);
    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(u64::from(STATFS_BSIZE)),
        atime: to_system_time(attrs.atime),
        mtime,
        ctime: to_system_time(attrs.ctime),
        crtime: mtime,
        kind,
        perm: attrs.perm(),
        nlink: attrs.nlink,
        uid: attrs.uid,
        gid: attrs.gid,
        rdev: 0,
        blksize: STATFS_BSIZE,
        flags: 0,
    }
}

impl Filesystem for WsFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.resolve_child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(parent, path = %path, "lookup");
        match self.block_on(self.fetch_attrs(&path)) {
            Ok(attrs) => {
                let ino = self.inodes.assign(&path);
                reply.entry(&TTL, &to_file_attr(ino, &attrs), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(ino, path = %path, "getattr");
        match self.block_on(self.fetch_attrs(&path)) {
            Ok(attrs) => reply.attr(&TTL, &to_file_attr(ino, &attrs)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(ino, path = %path, "setattr");

        // One kernel setattr fans out into the wire's separate mutations.
        let result = self.block_on(async {
            if let Some(mode) = mode {
                self.mutate(Operation::Chmod { path: path.clone(), mode }).await?;
            }
            if uid.is_some() || gid.is_some() {
                self.mutate(Operation::Chown {
                    path: path.clone(),
                    uid: uid.unwrap_or(NO_CHANGE),
                    gid: gid.unwrap_or(NO_CHANGE),
                })
                .await?;
            }
            if let Some(length) = size {
                self.mutate(Operation::Truncate { path: path.clone(), length }).await?;
            }
            if atime.is_some() || mtime.is_some() {
                let now = unix_seconds(SystemTime::now());
                let times = (
                    atime.map(time_or_now).unwrap_or(now),
                    mtime.map(time_or_now).unwrap_or(now),
                );
                self.mutate(Operation::Utimens { path: path.clone(), times: Some(times) })
                    .await?;
            }
            self.fetch_attrs(&path).await
        });

        match result {
            Ok(attrs) => reply.attr(&TTL, &to_file_attr(ino, &attrs)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(ino, path = %path, "readlink");
        match self.block_on(self.fetch_link(&path)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.resolve_child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(parent, path = %path, mode, "mkdir");
        let result = self.block_on(async {
            self.mutate(Operation::Mkdir { path: path.clone(), mode }).await?;
            self.fetch_attrs(&path).await
        });
        match result {
            Ok(attrs) => {
                let ino = self.inodes.assign(&path);
                reply.entry(&TTL, &to_file_attr(ino, &attrs), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.resolve_child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(parent, path = %path, "unlink");
        match self.block_on(self.mutate(Operation::Unlink { path: path.clone() })) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.resolve_child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(parent, path = %path, "rmdir");
        match self.block_on(self.mutate(Operation::Rmdir { path: path.clone() })) {
            Ok(()) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let old = match self.resolve_child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        let new = match self.resolve_child(newparent, newname) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(old = %old, new = %new, "rename");
        match self.block_on(self.mutate(Operation::Rename { old: old.clone(), new: new.clone() })) {
            Ok(()) => {
                self.inodes.remove(&new);
                self.inodes.rename(&old, &new);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(ino, path = %path, flags, "open");
        match self.block_on(self.open_handle(Operation::Open { path, flags })) {
            Ok(fd) => reply.opened(fd, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.resolve_child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(parent, path = %path, mode, "create");
        let result = self.block_on(async {
            let fd = self
                .open_handle(Operation::Create { path: path.clone(), mode })
                .await?;
            let attrs = self.fetch_attrs(&path).await?;
            Ok::<_, BridgeError>((fd, attrs))
        });
        match result {
            Ok((fd, attrs)) => {
                let ino = self.inodes.assign(&path);
                reply.created(&TTL, &to_file_attr(ino, &attrs), 0, fd, 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(ino, path = %path, offset, size, "read");
        let offset = offset.max(0) as u64;
        match self.block_on(self.read_range(&path, size, offset)) {
            // Short reads are fine; they signal end-of-data.
            Ok(bytes) => reply.data(&bytes),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(ino, path = %path, offset, len = data.len(), "write");
        let offset = offset.max(0) as u64;
        match self.block_on(self.write_range(&path, data, offset)) {
            // The accepted count is reported verbatim, short or not.
            Ok(accepted) => reply.written(accepted as u32),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Local no-op; there is nothing buffered on this side.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(ino, path = %path, "release");
        match self.block_on(self.mutate(Operation::Release { path })) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // Local no-op; persistence is entirely the peer's concern.
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.resolve(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        debug!(ino, path = %path, offset, "readdir");
        let names = match self.block_on(self.fetch_dir(&path)) {
            Ok(names) => names,
            Err(e) => return reply.error(errno(&e)),
        };

        for (i, name) in names.iter().enumerate().skip(offset.max(0) as usize) {
            let (entry_ino, kind) = match name.as_str() {
                "." => (ino, FileType::Directory),
                ".." => (ROOT_INO, FileType::Directory),
                other => {
                    let child = self
                        .inodes
                        .child_path(ino, other)
                        .unwrap_or_else(|| format!("/{other}"));
                    // Type is unknown without another round trip; the
                    // kernel corrects it on lookup.
                    (self.inodes.assign(&child), FileType::RegularFile)
                }
            };
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        // Fixed numbers, answered locally.
        reply.statfs(
            STATFS_BLOCKS,
            STATFS_BAVAIL,
            STATFS_BAVAIL,
            0,
            0,
            STATFS_BSIZE,
            255,
            STATFS_BSIZE,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wsfs_channel::ChannelEndpoint;
    use wsfs_proto::{Command, OpKind, Response};

    fn filesystem() -> (WsFilesystem, ChannelEndpoint) {
        let (channel, endpoint) = wsfs_channel::channel();
        endpoint.attach();
        let correlator = Arc::new(Correlator::new(
            Arc::new(channel),
            Duration::from_millis(200),
        ));
        let fs = WsFilesystem::new(correlator, Handle::current());
        (fs, endpoint)
    }

    async fn answer(endpoint: &mut ChannelEndpoint, fs: &WsFilesystem, data: serde_json::Value) {
        let frame = endpoint.next_outbound().await.unwrap();
        let cmd: Command = serde_json::from_str(&frame).unwrap();
        fs.correlator
            .dispatch_incoming(Response::ok(cmd.id, cmd.op.kind(), data));
    }

    async fn acknowledge(endpoint: &mut ChannelEndpoint, fs: &WsFilesystem) -> Command {
        let frame = endpoint.next_outbound().await.unwrap();
        let cmd: Command = serde_json::from_str(&frame).unwrap();
        fs.correlator
            .dispatch_incoming(Response::ack(cmd.id, cmd.op.kind()));
        cmd
    }

    #[tokio::test]
    async fn getattr_empty_result_is_not_found() {
        let (fs, mut endpoint) = filesystem();
        let fetch = fs.fetch_attrs("/missing");
        let answered = async {
            let frame = endpoint.next_outbound().await.unwrap();
            let cmd: Command = serde_json::from_str(&frame).unwrap();
            assert_eq!(cmd.op.kind(), OpKind::Getattr);
            fs.correlator.dispatch_incoming(Response::ack(cmd.id, OpKind::Getattr));
        };
        let (result, ()) = tokio::join!(fetch, answered);
        let err = result.unwrap_err();
        assert!(matches!(err, BridgeError::NotFound));
        assert_eq!(errno(&err), libc::ENOENT);
    }

    #[tokio::test]
    async fn getattr_payload_decodes_into_attrs() {
        let (fs, mut endpoint) = filesystem();
        let fetch = fs.fetch_attrs("/a.txt");
        let answered = answer(
            &mut endpoint,
            &fs,
            json!({"size": 12, "mode": 33188, "mtime": 1710000000.0}),
        );
        let (result, ()) = tokio::join!(fetch, answered);
        let attrs = result.unwrap();
        assert_eq!(attrs.size, 12);
        assert!(!attrs.is_dir());

        let attr = to_file_attr(5, &attrs);
        assert_eq!(attr.ino, 5);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(1710000000));
    }

    #[tokio::test]
    async fn readdir_always_contains_dot_entries() {
        let (fs, mut endpoint) = filesystem();
        let fetch = fs.fetch_dir("/");
        let answered = answer(&mut endpoint, &fs, json!(["a.txt", "sub"]));
        let (result, ()) = tokio::join!(fetch, answered);
        let names = result.unwrap();
        assert_eq!(names, vec![".", "..", "a.txt", "sub"]);
    }

    #[tokio::test]
    async fn malformed_payload_is_not_silently_zeroed() {
        let (fs, mut endpoint) = filesystem();
        let fetch = fs.fetch_attrs("/weird");
        let answered = answer(&mut endpoint, &fs, json!({"size": "not a number"}));
        let (result, ()) = tokio::join!(fetch, answered);
        let err = result.unwrap_err();
        assert!(matches!(err, BridgeError::MalformedResponse(_)));
        assert_eq!(errno(&err), libc::EIO);
    }

    #[tokio::test]
    async fn short_write_count_comes_back_verbatim() {
        let (fs, mut endpoint) = filesystem();
        let write = fs.write_range("/a.txt", &[0u8; 16], 0);
        let answered = answer(&mut endpoint, &fs, json!({"length": 9}));
        let (result, ()) = tokio::join!(write, answered);
        assert_eq!(result.unwrap(), 9);
    }

    #[tokio::test]
    async fn open_returns_backend_handle() {
        let (fs, mut endpoint) = filesystem();
        let open = fs.open_handle(Operation::Open { path: "/a.txt".into(), flags: 0 });
        let answered = answer(&mut endpoint, &fs, json!({"fd": 7}));
        let (result, ()) = tokio::join!(open, answered);
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn mutations_are_plain_acknowledgements() {
        let (fs, mut endpoint) = filesystem();
        let mutate = fs.mutate(Operation::Mkdir { path: "/d".into(), mode: 0o755 });
        let acked = acknowledge(&mut endpoint, &fs);
        let (result, cmd) = tokio::join!(mutate, acked);
        result.unwrap();
        assert_eq!(cmd.op.kind(), OpKind::Mkdir);
    }

    #[test]
    fn time_conversion_clamps_negatives() {
        assert_eq!(to_system_time(-5.0), UNIX_EPOCH);
        assert_eq!(to_system_time(0.0), UNIX_EPOCH);
    }
}
