//! Bridge-error to errno translation.
//!
//! The kernel understands a small set of POSIX codes. Nothing from the
//! bridge may escape a FUSE callback as a panic; everything funnels
//! through here.

use libc::c_int;

use wsfs_bridge::BridgeError;

/// Map a call failure onto the errno the kernel sees.
///
/// Protocol-level failures (timeout, channel loss, bad shapes) all become
/// `EIO` — the mount stays up, the operation fails. A remote-reported code
/// is trusted verbatim when it looks like an errno.
pub fn errno(err: &BridgeError) -> c_int {
    match err {
        BridgeError::NotFound => libc::ENOENT,
        BridgeError::Timeout => libc::EIO,
        BridgeError::ChannelClosed => libc::EIO,
        BridgeError::MalformedResponse(_) => libc::EIO,
        BridgeError::Remote(remote) if remote.code > 0 => remote.code,
        BridgeError::Remote(_) => libc::EIO,
    }
}
