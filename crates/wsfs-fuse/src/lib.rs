//! FUSE surface for wsfs.
//!
//! [`WsFilesystem`] implements `fuser::Filesystem` by proxying every
//! operation through the bridge to the remote peer; [`mount`] wires it to
//! the kernel and blocks until the mount is torn down.

mod errmap;
mod fs;
mod inode;

pub use errmap::errno;
pub use fs::WsFilesystem;
pub use inode::{InodeTable, ROOT_INO};

use std::path::Path;

use fuser::MountOption;

/// Mount-time options.
#[derive(Debug, Clone, Default)]
pub struct MountConfig {
    /// Let users other than the mounting one access the filesystem.
    pub allow_other: bool,
}

/// Mount errors.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("mount point {0}: {1}")]
    MountPoint(String, std::io::Error),
    #[error("FUSE session failed: {0}")]
    Session(#[from] std::io::Error),
}

/// Mount the filesystem in the foreground; returns when it is unmounted.
pub fn mount(
    filesystem: WsFilesystem,
    mount_point: &Path,
    config: &MountConfig,
) -> Result<(), MountError> {
    if !mount_point.is_dir() {
        return Err(MountError::MountPoint(
            mount_point.display().to_string(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let mut options = vec![
        MountOption::FSName("wsfs".to_string()),
        MountOption::AutoUnmount,
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }

    fuser::mount2(filesystem, mount_point, &options)?;
    Ok(())
}
