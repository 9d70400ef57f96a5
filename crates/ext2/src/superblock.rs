use core::fmt;

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::block::OffsetBytes;
use crate::strings::CStringBytes;

/// See <https://www.nongnu.org/ext2-doc/ext2.html#superblock>
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: BlockAddress,
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    pub mount_time: u32,
    pub write_time: u32,
    pub mount_count: u16,
    pub max_mount_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub lastcheck: u32,
    pub checkinterval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,

    // EXT2_DYNAMIC_REV Specific
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: FeatureCompatFlags,
    pub feature_incompat: FeatureIncompatFlags,
    pub feature_ro_compat: FeatureReadOnlyCompatFlags,
    pub uuid: UUID,
    pub volume_name: CStringBytes<[u8; 16]>,
    pub last_mounted: CStringBytes<[u8; 64]>,
    pub algo_bitmap: u32,

    // Performance Hints
    pub prealloc_blocks: u8,
    pub prealloc_dir_blocks: u8,
    pub padding1: u16,

    // Journaling Support
    pub journal_uuid: UUID,
    pub journal_inum: u32,
    pub journal_dev: u32,
    pub last_orphan: u32,

    // Directory Indexing Support
    pub hash_seed: [u32; 4],
    pub def_hash_version: u8,
    pub padding2: [u8; 3],

    // Other options
    pub default_mount_options: u32,
    pub first_meta_bg: u32,
}

impl Superblock {
    /// The superblock is always located at byte offset 1024 from the beginning of
    /// the file, block device or partition formatted with Ext2 and later variants
    /// (Ext3, Ext4).
    pub const OFFSET_BYTES: OffsetBytes = OffsetBytes(1024);

    /// Bytes reserved for the superblock on disk. The fields we decode only
    /// cover the front of it.
    pub const SIZE_BYTES: usize = 1024;

    /// 16bit value identifying the file system as Ext2. The value is currently
    /// fixed to EXT2_SUPER_MAGIC of value 0xEF53.
    /// <https://www.nongnu.org/ext2-doc/ext2.html#s-magic>
    pub const MAGIC: u16 = 0xEF53;

    /// First inode usable for standard files in revision 0 filesystems.
    /// <https://www.nongnu.org/ext2-doc/ext2.html#s-first-ino>
    pub const GOOD_OLD_FIRST_INODE: u32 = 11;

    /// Inode record size in revision 0 filesystems.
    pub const GOOD_OLD_INODE_SIZE: u16 = 128;

    /// Decodes the superblock from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::read_from_prefix(bytes)
    }

    pub fn magic_valid(&self) -> bool {
        self.magic == Self::MAGIC
    }

    /// The block size is computed using this 32bit value as the number of bits
    /// to shift left the value 1024. This value may only be non-negative.
    ///
    /// ```text
    /// block size = 1024 << s_log_block_size;
    /// ```
    ///
    /// Common block sizes include 1KiB, 2KiB, 4KiB and 8Kib. Returns `None`
    /// when the shift overflows.
    pub fn block_size_bytes(&self) -> Option<u32> {
        let log_block_size = self.log_block_size;
        (log_block_size <= 21).then(|| 1024 << log_block_size)
    }

    pub fn revision(&self) -> Option<Revision> {
        match self.rev_level {
            0 => Some(Revision::GoodOld),
            1 => Some(Revision::Dynamic),
            _ => None,
        }
    }
}

/// <https://www.nongnu.org/ext2-doc/ext2.html#s-rev-level>
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Revision {
    /// Revision 0: fixed 128 byte inodes, first usable inode is 11.
    GoodOld,
    /// Revision 1: variable inode sizes, extended attributes, feature flags.
    Dynamic,
}

impl From<Revision> for u32 {
    fn from(revision: Revision) -> Self {
        match revision {
            Revision::GoodOld => 0,
            Revision::Dynamic => 1,
        }
    }
}

/// Address of a block in the filesystem.
#[repr(transparent)]
#[derive(
    Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct BlockAddress(pub u32);

impl BlockAddress {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// "Global" inode number within the filesystem. Numbering starts at 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
pub struct InodeNumber(pub u32);

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The root directory of the filesystem is always inode 2.
pub const ROOT_DIRECTORY: InodeNumber = InodeNumber(2);

/// A `LocalInodeIndex` is an inode's 0-based index within a block group.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalInodeIndex(pub u32);

/// Index for a given block group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockGroupIndex(pub u32);

/// <https://www.nongnu.org/ext2-doc/ext2.html#s-feature-compat>
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
pub struct FeatureCompatFlags(u32);

bitflags! {
    impl FeatureCompatFlags: u32 {
        /// Block pre-allocation for new directories
        const DIR_PREALLOC = 0x0001;

        const IMAGIC_INODES = 0x0002;

        /// An Ext3 journal exists
        const HAS_JOURNAL = 0x0004;

        /// Extended inode attributes are present
        const EXT_ATTR = 0x0008;

        /// Non-standard inode size used
        const RESIZE_INODE = 0x0010;

        /// Directory indexing (HTree)
        const DIR_INDEX = 0x0020;
    }
}

#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
/// <https://www.nongnu.org/ext2-doc/ext2.html#s-feature-incompat>
pub struct FeatureIncompatFlags(u32);

bitflags! {
    impl FeatureIncompatFlags: u32 {
        /// Disk/File compression is used
        const COMPRESSION = 0x0001;
        const FILETYPE = 0x0002;
        const RECOVER = 0x0004;
        const JOURNAL_DEV = 0x0008;
        const META_BG = 0x0010;
    }
}

impl FeatureIncompatFlags {
    /// Features that move or reinterpret the structures we decode.
    pub const LAYOUT_CHANGING: Self = Self::COMPRESSION
        .union(Self::JOURNAL_DEV)
        .union(Self::META_BG);
}

#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
/// <https://www.nongnu.org/ext2-doc/ext2.html#s-feature-ro-compat>
pub struct FeatureReadOnlyCompatFlags(u32);

bitflags! {
    impl FeatureReadOnlyCompatFlags: u32 {
        /// Sparse Superblock
        const SPARSE_SUPER = 0x0001;

        /// Filesystem uses a 64bit file size
        const LARGE_FILE = 0x0002;

        /// Binary tree sorted directory files
        const BTREE_DIR = 0x0004;
    }
}

#[derive(Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
pub struct UUID(pub [u8; 16]);

impl fmt::Debug for UUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_bytes = |f: &mut fmt::Formatter<'_>, start: usize, end: usize| -> fmt::Result {
            for i in start..=end {
                write!(f, "{:02x}", self.0[i])?;
            }
            Ok(())
        };

        write!(f, "UUID(")?;
        write_bytes(f, 0, 3)?;
        write!(f, "-")?;
        write_bytes(f, 4, 5)?;
        write!(f, "-")?;
        write_bytes(f, 6, 7)?;
        write!(f, "-")?;
        write_bytes(f, 8, 9)?;
        write!(f, "-")?;
        write_bytes(f, 10, 15)?;
        write!(f, ")")
    }
}
