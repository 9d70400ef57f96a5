//! In-memory ext2 images for tests.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::block_group::BlockGroupDescriptor;
use crate::geometry::Geometry;
use crate::inode::{Inode, InodeDirectBlocks, InodeMode};
use crate::superblock::{BlockAddress, InodeNumber, Superblock, ROOT_DIRECTORY};

/// A 1 MiB image with 1 KiB blocks, one block group and 128 inodes holding a
/// root directory with `.`, `..` and `file.txt`.
///
/// Layout: boot block 0, superblock 1, descriptors 2, block bitmap 3, inode
/// bitmap 4, inode table 5..=20, data from 21 on.
pub(crate) struct TestImage {
    bytes: Vec<u8>,
}

impl TestImage {
    pub const BLOCK_SIZE: usize = 1024;
    pub const BLOCKS: u32 = 1024;
    pub const INODES: u32 = 128;

    pub const BLOCK_BITMAP: BlockAddress = BlockAddress(3);
    pub const INODE_BITMAP: BlockAddress = BlockAddress(4);
    pub const INODE_TABLE: BlockAddress = BlockAddress(5);

    pub const ROOT: InodeNumber = ROOT_DIRECTORY;
    pub const FILE: InodeNumber = InodeNumber(12);
    pub const INDIRECT_FILE: InodeNumber = InodeNumber(13);

    /// Tue Nov 14 22:13:20 GMT 2023
    pub const TIME: u32 = 1_700_000_000;

    const DESCRIPTORS: BlockAddress = BlockAddress(2);
    const LAST_METADATA_BLOCK: u32 = 20;
    const FILE_CONTENTS: &'static [u8] = b"hello, world\n";

    pub fn new() -> Self {
        let mut image = Self {
            bytes: vec![0; Self::BLOCKS as usize * Self::BLOCK_SIZE],
        };

        let mut sb = Superblock::new_zeroed();
        sb.inodes_count = Self::INODES;
        sb.blocks_count = Self::BLOCKS;
        sb.first_data_block = BlockAddress(1);
        sb.log_block_size = 0;
        sb.blocks_per_group = 8192;
        sb.frags_per_group = 8192;
        sb.inodes_per_group = Self::INODES;
        sb.magic = Superblock::MAGIC;
        sb.state = 1;
        sb.rev_level = 1;
        sb.first_ino = 11;
        sb.inode_size = 128;
        sb.write_time = Self::TIME;
        image.write_at(Superblock::OFFSET_BYTES.0 as usize, sb.as_bytes());

        let mut descriptor = BlockGroupDescriptor::new_zeroed();
        descriptor.block_bitmap = Self::BLOCK_BITMAP;
        descriptor.inode_bitmap = Self::INODE_BITMAP;
        descriptor.inode_table = Self::INODE_TABLE;
        descriptor.used_dirs_count = 1;
        image.write_block(Self::DESCRIPTORS, 0, descriptor.as_bytes());

        for block in 1..=Self::LAST_METADATA_BLOCK {
            image.mark_block_used(BlockAddress(block));
        }
        // Padding bit past the last real block.
        image.mark_block_used(BlockAddress(Self::BLOCKS));
        for number in 1..=11 {
            image.mark_inode_used(InodeNumber(number));
        }

        image.add_directory(
            Self::ROOT,
            &[BlockAddress(21), BlockAddress(22)],
            &[
                (Self::ROOT.0, 12, b".".as_slice(), 2),
                (Self::ROOT.0, 12, b"..".as_slice(), 2),
                (Self::FILE.0, 1000, b"file.txt".as_slice(), 1),
            ],
        );
        // Second block only holds a deleted entry.
        image.write_dir_block(BlockAddress(22), &[(0, 1024, b"".as_slice(), 0)]);

        image.write_block(BlockAddress(23), 0, Self::FILE_CONTENTS);
        image.mark_block_used(BlockAddress(23));
        image.add_inode(Self::FILE, 0o100_644, |inode| {
            inode.size_low = Self::FILE_CONTENTS.len() as u32;
            inode.blocks = 2;
            let mut direct = [BlockAddress(0); 12];
            direct[0] = BlockAddress(23);
            inode.direct_blocks = InodeDirectBlocks(direct);
        });

        image.write_descriptor(|descriptor| {
            descriptor.free_blocks_count = 1000;
            descriptor.free_inodes_count = 116;
        });
        image
    }

    /// Adds regular file 13 whose data lives behind indirect blocks:
    ///
    /// - singly indirect block 30 -> `[31, 0, 32]`
    /// - doubly indirect block 33 -> `[0, 34]`, 34 -> `[35]`
    pub fn add_indirect_file(&mut self) {
        self.write_pointers(BlockAddress(30), &[31, 0, 32]);
        self.write_pointers(BlockAddress(33), &[0, 34]);
        self.write_pointers(BlockAddress(34), &[35]);
        for block in 30..=35 {
            self.mark_block_used(BlockAddress(block));
        }
        self.add_inode(Self::INDIRECT_FILE, 0o100_600, |inode| {
            inode.size_low = 525 * 1024;
            inode.blocks = 12;
            inode.singly_indirect_block = BlockAddress(30);
            inode.doubly_indirect_block = BlockAddress(33);
        });
        self.write_descriptor(|descriptor| {
            descriptor.free_blocks_count = { descriptor.free_blocks_count } - 6;
            descriptor.free_inodes_count = { descriptor.free_inodes_count } - 1;
        });
    }

    /// Writes a directory inode whose records all go in `blocks[0]`.
    pub fn add_directory(
        &mut self,
        number: InodeNumber,
        blocks: &[BlockAddress],
        records: &[(u32, u16, &[u8], u8)],
    ) {
        self.write_dir_block(blocks[0], records);
        for &block in blocks {
            self.mark_block_used(block);
        }
        self.add_inode(number, 0o040_755, |inode| {
            inode.size_low = (blocks.len() * Self::BLOCK_SIZE) as u32;
            inode.blocks = (blocks.len() * 2) as u32;
            inode.links_count = 3;
            let mut direct = [BlockAddress(0); 12];
            direct[..blocks.len()].copy_from_slice(blocks);
            inode.direct_blocks = InodeDirectBlocks(direct);
        });
    }

    /// Writes and marks used an inode with `mode`, one link and fixed
    /// timestamps, then lets `f` fill in the rest.
    pub fn add_inode(&mut self, number: InodeNumber, mode: u16, f: impl FnOnce(&mut Inode)) {
        let mut inode = Inode::new_zeroed();
        inode.mode = InodeMode::from_bits_retain(mode);
        inode.links_count = 1;
        inode.atime = Self::TIME;
        inode.ctime = Self::TIME;
        inode.mtime = Self::TIME;
        f(&mut inode);
        self.write_inode(number, &inode);
        self.mark_inode_used(number);
    }

    pub fn inode(&self, number: InodeNumber) -> Inode {
        let offset = Self::inode_offset(number);
        Inode::read_from_prefix(&self.bytes[offset..]).unwrap()
    }

    pub fn write_inode(&mut self, number: InodeNumber, inode: &Inode) {
        self.write_at(Self::inode_offset(number), inode.as_bytes());
    }

    pub fn update_inode(&mut self, number: InodeNumber, f: impl FnOnce(&mut Inode)) {
        let mut inode = self.inode(number);
        f(&mut inode);
        self.write_inode(number, &inode);
    }

    pub fn write_descriptor(&mut self, f: impl FnOnce(&mut BlockGroupDescriptor)) {
        let offset = Self::DESCRIPTORS.0 as usize * Self::BLOCK_SIZE;
        let mut descriptor = BlockGroupDescriptor::read_from_prefix(&self.bytes[offset..]).unwrap();
        f(&mut descriptor);
        self.write_at(offset, descriptor.as_bytes());
    }

    pub fn update_superblock(&mut self, f: impl FnOnce(&mut Superblock)) {
        let mut sb = self.superblock();
        f(&mut sb);
        self.write_at(Superblock::OFFSET_BYTES.0 as usize, sb.as_bytes());
    }

    pub fn superblock(&self) -> Superblock {
        Superblock::parse(&self.bytes[Superblock::OFFSET_BYTES.0 as usize..]).unwrap()
    }

    /// Fills `block` with sequential directory records of
    /// `(inode, rec_len, name, file_type)`.
    pub fn write_dir_block(&mut self, block: BlockAddress, records: &[(u32, u16, &[u8], u8)]) {
        let mut offset = 0;
        for &(inode, rec_len, name, file_type) in records {
            let mut record = Vec::with_capacity(8 + name.len());
            record.extend_from_slice(&inode.to_le_bytes());
            record.extend_from_slice(&rec_len.to_le_bytes());
            record.push(name.len() as u8);
            record.push(file_type);
            record.extend_from_slice(name);
            self.write_block(block, offset, &record);
            offset += usize::from(rec_len);
        }
    }

    pub fn write_pointers(&mut self, block: BlockAddress, pointers: &[u32]) {
        let bytes: Vec<u8> = pointers.iter().flat_map(|p| p.to_le_bytes()).collect();
        self.write_block(block, 0, &bytes);
    }

    pub fn write_block(&mut self, block: BlockAddress, offset: usize, data: &[u8]) {
        self.write_at(block.0 as usize * Self::BLOCK_SIZE + offset, data);
    }

    pub fn mark_block_used(&mut self, block: BlockAddress) {
        // Entry 1 is block 1, the first data block.
        self.set_bit(Self::BLOCK_BITMAP, block.0 - 1);
    }

    pub fn mark_inode_used(&mut self, number: InodeNumber) {
        self.set_bit(Self::INODE_BITMAP, number.0 - 1);
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::resolve(&self.superblock(), self.bytes.len() as u64).unwrap()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn set_bit(&mut self, bitmap: BlockAddress, bit: u32) {
        let byte = bitmap.0 as usize * Self::BLOCK_SIZE + (bit / 8) as usize;
        self.bytes[byte] |= 1 << (bit % 8);
    }

    fn inode_offset(number: InodeNumber) -> usize {
        Self::INODE_TABLE.0 as usize * Self::BLOCK_SIZE + (number.0 as usize - 1) * Inode::SIZE_BYTES
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}
