use thiserror::Error;

pub type Result<T, E = Ext2Error> = core::result::Result<T, E>;

/// Everything that can go wrong while analyzing an image.
///
/// Initialization failures (superblock, geometry, descriptor table) leave
/// nothing to traverse and are always fatal. The structural variants raised
/// while enumerating inodes or directory entries only concern one entity; see
/// [`Ext2Error::is_per_entity`].
#[derive(Debug, Error)]
pub enum Ext2Error {
    #[error("I/O error on image: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed superblock: {0}")]
    MalformedSuperblock(String),

    #[error("malformed block group descriptor table: {0}")]
    MalformedDescriptorTable(String),

    #[error("directory inode {inode} truncated: size is {declared} bytes but only {available} bytes are readable")]
    TruncatedDirectory {
        inode: u32,
        declared: u64,
        available: u64,
    },

    #[error("malformed inode {inode}: {reason}")]
    MalformedInode { inode: u32, reason: &'static str },

    #[error("block pointer {block} is outside the filesystem ({blocks_count} blocks)")]
    BlockOutOfRange { block: u32, blocks_count: u32 },

    #[error("unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    #[error("{0} used before the filesystem geometry was resolved")]
    Uninitialized(&'static str),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Seek or read failure on the backing image.
    Io,
    /// The bytes contradict the ext2 on-disk schema.
    Structural,
    /// A valid layout this crate does not handle.
    Unsupported,
    /// A component was used out of order. Always a bug.
    Uninitialized,
}

impl Ext2Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::MalformedSuperblock(_)
            | Self::MalformedDescriptorTable(_)
            | Self::TruncatedDirectory { .. }
            | Self::MalformedInode { .. }
            | Self::BlockOutOfRange { .. } => ErrorKind::Structural,
            Self::UnsupportedGeometry(_) => ErrorKind::Unsupported,
            Self::Uninitialized(_) => ErrorKind::Uninitialized,
        }
    }

    /// Whether the error only invalidates the entity being enumerated, so the
    /// caller can skip it and move on to its siblings.
    pub fn is_per_entity(&self) -> bool {
        matches!(
            self,
            Self::TruncatedDirectory { .. } | Self::MalformedInode { .. } | Self::BlockOutOfRange { .. }
        )
    }
}
