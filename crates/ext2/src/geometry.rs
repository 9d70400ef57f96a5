//! Filesystem-wide parameters derived from, and checked against, the
//! superblock.

use crate::block::{BlockSize, OffsetBytes};
use crate::superblock::{
    BlockAddress, BlockGroupIndex, FeatureIncompatFlags, InodeNumber, LocalInodeIndex, Revision,
    Superblock,
};
use crate::{Ext2Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: BlockSize,
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    /// Size of one block group in bytes (blocks per group × block size).
    pub group_byte_size: u64,
    pub group_count: u32,
    /// On-disk size of one inode record.
    pub inode_size: u16,
    pub revision: Revision,
    pub first_data_block: BlockAddress,
    pub first_inode: InodeNumber,
    pub image_len: u64,
}

impl Geometry {
    /// Only single-group images are handled for now. Everything downstream
    /// indexes groups by number, so lifting this is the whole change.
    pub const MAX_SUPPORTED_GROUPS: u32 = 1;

    /// The descriptor table follows the boot block (bytes 0..1024) and the
    /// superblock (bytes 1024..2048), starting at the first block boundary at
    /// or after this offset.
    const DESCRIPTOR_TABLE_OFFSET: OffsetBytes = OffsetBytes(2048);

    /// Checks the superblock fields that don't depend on the image itself.
    pub fn validate(superblock: &Superblock) -> Result<Revision> {
        if !superblock.magic_valid() {
            let magic = superblock.magic;
            return Err(malformed(format!(
                "bad magic {magic:#06x}, expected {:#06x}",
                Superblock::MAGIC
            )));
        }

        let Some(revision) = superblock.revision() else {
            let rev_level = superblock.rev_level;
            return Err(malformed(format!("unknown revision level {rev_level}")));
        };

        if revision == Revision::GoodOld {
            let first_ino = superblock.first_ino;
            if first_ino != Superblock::GOOD_OLD_FIRST_INODE {
                return Err(malformed(format!(
                    "revision 0 filesystem has first inode {first_ino}, expected {}",
                    Superblock::GOOD_OLD_FIRST_INODE
                )));
            }
        }

        if superblock.block_size_bytes().is_none() {
            let log_block_size = superblock.log_block_size;
            return Err(malformed(format!("block size exponent {log_block_size} is too large")));
        }

        let incompat = superblock.feature_incompat;
        if revision == Revision::Dynamic
            && incompat.intersects(FeatureIncompatFlags::LAYOUT_CHANGING)
        {
            return Err(Ext2Error::UnsupportedGeometry(format!(
                "incompatible features {:?}",
                incompat.intersection(FeatureIncompatFlags::LAYOUT_CHANGING)
            )));
        }

        Ok(revision)
    }

    /// Derives the geometry of an image of `image_len` bytes.
    pub fn resolve(superblock: &Superblock, image_len: u64) -> Result<Self> {
        let revision = Self::validate(superblock)?;
        let sb = *superblock;

        let block_size_bytes = sb.block_size_bytes().unwrap_or_default();
        if sb.blocks_count == 0 || sb.blocks_per_group == 0 || sb.inodes_per_group == 0 {
            return Err(malformed(format!(
                "zero sized geometry: {} blocks, {} blocks per group, {} inodes per group",
                { sb.blocks_count },
                { sb.blocks_per_group },
                { sb.inodes_per_group }
            )));
        }

        // Two independent ways of computing the block size must agree.
        let blocks_count = u64::from(sb.blocks_count);
        let image_block_size = image_len / blocks_count;
        if image_len % blocks_count != 0 || image_block_size != u64::from(block_size_bytes) {
            return Err(malformed(format!(
                "image of {image_len} bytes holds {} blocks of {image_block_size} bytes, but the superblock says {block_size_bytes}",
                { sb.blocks_count }
            )));
        }
        let block_size = BlockSize::new(block_size_bytes);

        let group_count = (sb.blocks_count / sb.blocks_per_group).max(1);
        if group_count > Self::MAX_SUPPORTED_GROUPS {
            return Err(Ext2Error::UnsupportedGeometry(format!(
                "{group_count} block groups, at most {} supported",
                Self::MAX_SUPPORTED_GROUPS
            )));
        }

        let bits_per_bitmap = block_size_bytes * 8;
        if sb.blocks_per_group > bits_per_bitmap {
            return Err(malformed(format!(
                "{} blocks per group don't fit in a {bits_per_bitmap} bit bitmap",
                { sb.blocks_per_group }
            )));
        }
        if sb.inodes_per_group > bits_per_bitmap {
            return Err(malformed(format!(
                "{} inodes per group don't fit in a {bits_per_bitmap} bit bitmap",
                { sb.inodes_per_group }
            )));
        }
        if u64::from(sb.inodes_count) != u64::from(sb.inodes_per_group) * u64::from(group_count) {
            return Err(malformed(format!(
                "{} inodes don't match {} groups of {} inodes",
                { sb.inodes_count },
                group_count,
                { sb.inodes_per_group }
            )));
        }

        // Block 0 holds the boot record and, with 1 KiB blocks, block 1 the
        // superblock. The first data block follows them.
        let expected_first_data_block = u32::from(block_size_bytes == 1024);
        let first_data_block = sb.first_data_block;
        if first_data_block.0 != expected_first_data_block {
            return Err(malformed(format!(
                "first data block {first_data_block} with {block_size_bytes} byte blocks, expected {expected_first_data_block}"
            )));
        }

        let inode_size = match revision {
            Revision::GoodOld => Superblock::GOOD_OLD_INODE_SIZE,
            Revision::Dynamic => {
                let inode_size = sb.inode_size;
                if !inode_size.is_power_of_two()
                    || inode_size < Superblock::GOOD_OLD_INODE_SIZE
                    || u32::from(inode_size) > block_size_bytes
                {
                    return Err(malformed(format!("invalid inode size {inode_size}")));
                }
                inode_size
            }
        };

        let first_inode = match revision {
            Revision::GoodOld => Superblock::GOOD_OLD_FIRST_INODE,
            Revision::Dynamic => sb.first_ino,
        };

        let geometry = Self {
            block_size,
            blocks_count: sb.blocks_count,
            inodes_count: sb.inodes_count,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            group_byte_size: u64::from(sb.blocks_per_group) * u64::from(block_size_bytes),
            group_count,
            inode_size,
            revision,
            first_data_block: sb.first_data_block,
            first_inode: InodeNumber(first_inode),
            image_len,
        };
        log::debug!("resolved geometry: {geometry:?}");
        Ok(geometry)
    }

    pub fn pointers_per_block(&self) -> u64 {
        self.block_size.pointers_per_block()
    }

    /// First block of the group descriptor table.
    pub fn descriptor_table_block(&self) -> BlockAddress {
        let offset = Self::DESCRIPTOR_TABLE_OFFSET.0;
        BlockAddress(offset.div_ceil(u64::from(self.block_size)) as u32)
    }

    /// Number of blocks the inode table of one group spans.
    pub fn inode_table_blocks(&self) -> usize {
        let table_bytes = u64::from(self.inodes_per_group) * u64::from(self.inode_size);
        table_bytes.div_ceil(u64::from(self.block_size)) as usize
    }

    /// Block group and local index of an inode. `None` for inode 0 or numbers
    /// past the end of the filesystem.
    pub fn inode_location(&self, inode_number: InodeNumber) -> Option<(BlockGroupIndex, LocalInodeIndex)> {
        if inode_number.0 == 0 || inode_number.0 > self.inodes_count {
            return None;
        }
        let inode_index = inode_number.0 - 1;
        let block_group_index = BlockGroupIndex(inode_index / self.inodes_per_group);
        let local_inode_index = LocalInodeIndex(inode_index % self.inodes_per_group);
        Some((block_group_index, local_inode_index))
    }

    /// Convert from local inode index to global inode number.
    pub fn inode_number(&self, group: BlockGroupIndex, local: LocalInodeIndex) -> InodeNumber {
        InodeNumber(group.0 * self.inodes_per_group + local.0 + 1)
    }

    /// Block number of the 1-based bitmap entry `entry` in `group`. Bit 0 of
    /// a group's block bitmap describes the group's first block, which is
    /// `first_data_block` for group 0.
    pub fn block_number(&self, group: BlockGroupIndex, entry: u32) -> BlockAddress {
        let group_start = group.0.saturating_mul(self.blocks_per_group);
        BlockAddress(
            self.first_data_block
                .0
                .saturating_add(group_start)
                .saturating_add(entry.saturating_sub(1)),
        )
    }

    pub fn contains_block(&self, address: BlockAddress) -> bool {
        address.0 < self.blocks_count
    }
}

fn malformed(reason: String) -> Ext2Error {
    Ext2Error::MalformedSuperblock(reason)
}
