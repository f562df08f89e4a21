use thiserror::Error;

use crate::block::DeviceError;
use crate::boot::BootSectorError;

/// Everything that can go wrong inside the engine. The sentinel-returning
/// VFS adapter in [`crate::FileSystemOps`] flattens these back to `None`
/// and zero counts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("block device error: {0}")]
    Device(#[from] DeviceError),
    #[error("invalid boot sector: {0}")]
    BootSector(#[from] BootSectorError),
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("not a regular file")]
    NotAFile,
    #[error("no free clusters left on the volume")]
    NoFreeSpace,
    #[error("name does not fit in 8.3 format")]
    NameTooLong,
    #[error("name is not a valid 8.3 name")]
    InvalidName,
    #[error("files cannot be truncated to zero bytes")]
    EmptyFileRejected,
    #[error("cluster chain is corrupt at cluster {cluster:#06x}")]
    CorruptChain { cluster: u16 },
    #[error("cluster {0:#06x} is outside the data region")]
    InvalidCluster(u16),
    #[error("file size would exceed 4 GiB")]
    FileTooLarge,
    #[error("volume is mounted read-only")]
    ReadOnly,
}
