use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::block::{BlockDeviceDriver, BlockStore};
use crate::geometry::Geometry;
use crate::superblock::{BlockAddress, BlockGroupIndex};
use crate::{Ext2Error, Result};

/// See <https://www.nongnu.org/ext2-doc/ext2.html#block-group-descriptor-structure>
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct BlockGroupDescriptor {
    pub block_bitmap: BlockAddress,
    pub inode_bitmap: BlockAddress,
    pub inode_table: BlockAddress,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    pub pad: u16,
    pub reserved: [u8; 12],
}

impl BlockGroupDescriptor {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();
}

/// The block group descriptors, in group order.
#[derive(Debug, Clone)]
pub struct GroupDescriptorTable {
    descriptors: Vec<BlockGroupDescriptor>,
    blocks_in_last_group: u32,
    inodes_in_last_group: u32,
}

impl GroupDescriptorTable {
    pub fn load<D: BlockDeviceDriver>(store: &mut BlockStore<D>, geometry: &Geometry) -> Result<Self> {
        let group_count = geometry.group_count as usize;
        let len_bytes = group_count * BlockGroupDescriptor::SIZE_BYTES;
        if group_count == 0 || len_bytes == 0 {
            return Err(Ext2Error::MalformedDescriptorTable(format!(
                "{group_count} block groups"
            )));
        }

        let start = geometry.descriptor_table_block();
        let bytes = store.read_group_descriptors(start, len_bytes)?;
        let descriptors = bytes
            .chunks_exact(BlockGroupDescriptor::SIZE_BYTES)
            .take(group_count)
            .filter_map(BlockGroupDescriptor::read_from)
            .collect::<Vec<_>>();
        if descriptors.len() != group_count {
            return Err(Ext2Error::MalformedDescriptorTable(format!(
                "expected {group_count} descriptors at block {start}, found {}",
                descriptors.len()
            )));
        }

        // The last group may be cut short by the end of the image.
        let leading_groups_bytes = u64::from(geometry.group_count - 1) * geometry.group_byte_size;
        let blocks_in_last_group = (geometry.image_len.saturating_sub(leading_groups_bytes)
            / u64::from(geometry.block_size)) as u32;
        let inodes_in_last_group =
            geometry.inodes_count - (geometry.group_count - 1) * geometry.inodes_per_group;

        for (i, descriptor) in descriptors.iter().enumerate() {
            for address in [descriptor.block_bitmap, descriptor.inode_bitmap, descriptor.inode_table] {
                if address.is_null() || !geometry.contains_block(address) {
                    return Err(Ext2Error::MalformedDescriptorTable(format!(
                        "group {i} points at block {address} outside the filesystem"
                    )));
                }
            }
        }

        log::debug!(
            "loaded {group_count} group descriptors from block {start}, last group has {blocks_in_last_group} blocks"
        );
        Ok(Self {
            descriptors,
            blocks_in_last_group,
            inodes_in_last_group,
        })
    }

    pub fn get(&self, index: BlockGroupIndex) -> Option<&BlockGroupDescriptor> {
        self.descriptors.get(index.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockGroupIndex, &BlockGroupDescriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, descriptor)| (BlockGroupIndex(i as u32), descriptor))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    fn is_last(&self, index: BlockGroupIndex) -> bool {
        index.0 as usize + 1 == self.descriptors.len()
    }

    /// Blocks covered by a group's bitmap. Every group holds the nominal
    /// blocks per group except the last one.
    pub fn blocks_in_group(&self, index: BlockGroupIndex, geometry: &Geometry) -> u32 {
        if self.is_last(index) {
            self.blocks_in_last_group
        } else {
            geometry.blocks_per_group
        }
    }

    pub fn inodes_in_group(&self, index: BlockGroupIndex, geometry: &Geometry) -> u32 {
        if self.is_last(index) {
            self.inodes_in_last_group
        } else {
            geometry.inodes_per_group
        }
    }
}
