use zerocopy::FromBytes;

use crate::bitmap::{scan_free, Bitmap};
use crate::block::{BlockDeviceDriver, BlockStore, RawBlock, Retention, SharedBlock};
use crate::block_group::{BlockGroupDescriptor, GroupDescriptorTable};
use crate::directory::DirectoryDecoder;
use crate::geometry::Geometry;
use crate::indirect::{IndirectCursor, IndirectWalker};
use crate::inode::{Inode, InodeWalker};
use crate::superblock::{
    BlockAddress, BlockGroupIndex, InodeNumber, LocalInodeIndex, Superblock, ROOT_DIRECTORY,
};
use crate::{Ext2Error, Result};

/// An opened ext2 image: the validated superblock and geometry, the group
/// descriptors, and the block store everything else is read through.
#[derive(Debug)]
pub struct FileSystem<D> {
    store: BlockStore<D>,
    superblock: Superblock,
    geometry: Geometry,
    groups: GroupDescriptorTable,
}

impl<D: BlockDeviceDriver> FileSystem<D> {
    pub fn open(device: D) -> Result<Self> {
        let mut store = BlockStore::new(device);

        let bytes = store.read_superblock()?;
        let superblock = Superblock::parse(&bytes)
            .ok_or_else(|| Ext2Error::MalformedSuperblock("short superblock".into()))?;
        let geometry = Geometry::resolve(&superblock, store.image_len())?;

        store.initialize(geometry.block_size);
        let groups = GroupDescriptorTable::load(&mut store, &geometry)?;

        let volume_name = superblock.volume_name;
        let uuid = superblock.uuid;
        log::debug!(
            "opened volume {:?} {uuid:?}: {} blocks of {} bytes, {} inodes",
            volume_name.as_str(),
            geometry.blocks_count,
            geometry.block_size.bytes(),
            geometry.inodes_count
        );

        Ok(Self {
            store,
            superblock,
            geometry,
            groups,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn groups(&self) -> &GroupDescriptorTable {
        &self.groups
    }

    pub fn store(&self) -> &BlockStore<D> {
        &self.store
    }

    fn descriptor(&self, group: BlockGroupIndex) -> Result<BlockGroupDescriptor> {
        self.groups.get(group).copied().ok_or_else(|| {
            Ext2Error::MalformedDescriptorTable(format!("no descriptor for group {}", group.0))
        })
    }

    /// Free blocks of `group`, in ascending order.
    pub fn free_blocks(&mut self, group: BlockGroupIndex) -> Result<impl Iterator<Item = BlockAddress>> {
        let descriptor = self.descriptor(group)?;
        let bitmap = self.store.read_shared(descriptor.block_bitmap)?;
        let bit_count = self.groups.blocks_in_group(group, &self.geometry);
        let geometry = self.geometry.clone();
        Ok(scan_free(bitmap, bit_count).map(move |entry| geometry.block_number(group, entry)))
    }

    /// Free inodes of `group`, in ascending order.
    pub fn free_inodes(&mut self, group: BlockGroupIndex) -> Result<impl Iterator<Item = InodeNumber>> {
        let descriptor = self.descriptor(group)?;
        let bitmap = self.store.read_shared(descriptor.inode_bitmap)?;
        let bit_count = self.groups.inodes_in_group(group, &self.geometry);
        let geometry = self.geometry.clone();
        Ok(scan_free(bitmap, bit_count)
            .map(move |entry| geometry.inode_number(group, LocalInodeIndex(entry - 1))))
    }

    /// Allocated inodes of `group`. The group's whole inode table is read up
    /// front.
    pub fn inodes(&mut self, group: BlockGroupIndex) -> Result<InodeWalker<SharedBlock, RawBlock>> {
        let descriptor = self.descriptor(group)?;
        let bitmap = self.store.read_shared(descriptor.inode_bitmap)?;
        let table = self
            .store
            .read_blocks(descriptor.inode_table, self.geometry.inode_table_blocks())?;
        let inode_count = self.groups.inodes_in_group(group, &self.geometry);
        let first_number = self.geometry.inode_number(group, LocalInodeIndex(0));
        Ok(InodeWalker::new(
            bitmap,
            table,
            inode_count,
            self.geometry.inode_size,
            first_number,
        ))
    }

    /// Looks up a single inode. Returns `None` if the number is out of range
    /// or the inode isn't marked used in its bitmap.
    pub fn read_inode(&mut self, number: InodeNumber) -> Result<Option<Inode>> {
        let Some((group, local)) = self.geometry.inode_location(number) else {
            return Ok(None);
        };
        let descriptor = self.descriptor(group)?;

        let bit_count = self.groups.inodes_in_group(group, &self.geometry);
        let bitmap = self.store.read_transient(descriptor.inode_bitmap)?;
        if Bitmap::new(bitmap, bit_count).is_used(local.0 + 1) != Some(true) {
            return Ok(None);
        }

        let block_size = self.geometry.block_size.bytes() as u64;
        let offset = u64::from(local.0) * u64::from(self.geometry.inode_size);
        let block = BlockAddress(descriptor.inode_table.0 + (offset / block_size) as u32);
        let within = (offset % block_size) as usize;

        let bytes = self.store.read_block(block, Retention::Transient)?;
        let inode = Inode::read_from_prefix(&bytes[within..]).ok_or(Ext2Error::MalformedInode {
            inode: number.0,
            reason: "record crosses the end of its inode table block",
        })?;
        Ok(Some(inode))
    }

    pub fn root(&mut self) -> Result<Inode> {
        self.read_inode(ROOT_DIRECTORY)?
            .ok_or(Ext2Error::MalformedInode {
                inode: ROOT_DIRECTORY.0,
                reason: "root directory is not allocated",
            })
    }

    /// Every pointer in `inode`'s indirect block trees.
    pub fn indirect_references(&mut self, inode: &Inode) -> IndirectWalker<'_, D> {
        let cursor = IndirectCursor::for_inode(inode, &self.geometry);
        IndirectWalker::new(&mut self.store, cursor)
    }

    pub fn directory_entries(
        &mut self,
        number: InodeNumber,
        inode: &Inode,
    ) -> Result<DirectoryDecoder<'_, D>> {
        DirectoryDecoder::new(&mut self.store, number, inode, &self.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryDevice;
    use crate::inode::FileType;
    use crate::test_image::TestImage;
    use crate::ErrorKind;

    fn open(image: TestImage) -> FileSystem<MemoryDevice> {
        FileSystem::open(MemoryDevice::new(image.into_bytes())).unwrap()
    }

    #[test]
    fn opens_test_image() {
        let fs = open(TestImage::new());
        assert_eq!(fs.geometry().group_count, 1);
        assert_eq!(fs.groups().len(), 1);
        assert_eq!({ fs.superblock().inodes_count }, 128);
    }

    #[test]
    fn free_entries() {
        let mut fs = open(TestImage::new());
        let group = BlockGroupIndex(0);

        let free_blocks: Vec<_> = fs.free_blocks(group).unwrap().collect();
        assert_eq!(free_blocks.len(), 1000);
        assert_eq!(free_blocks.first(), Some(&BlockAddress(24)));
        assert_eq!(free_blocks.last(), Some(&BlockAddress(1023)));

        let free_inodes: Vec<_> = fs.free_inodes(group).unwrap().collect();
        assert_eq!(free_inodes.len(), 116);
        assert_eq!(free_inodes.first(), Some(&InodeNumber(13)));
        assert_eq!(free_inodes.last(), Some(&InodeNumber(128)));
    }

    #[test]
    fn walks_allocated_inodes() {
        let mut fs = open(TestImage::new());
        let inodes = fs
            .inodes(BlockGroupIndex(0))
            .unwrap()
            .map(|result| result.map(|(number, inode)| (number.0, inode.file_type())))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        // Reserved inodes are marked used but zeroed.
        assert_eq!(inodes, [(2, FileType::Directory), (12, FileType::RegularFile)]);
    }

    #[test]
    fn point_lookups() {
        let mut fs = open(TestImage::new());
        assert!(fs.root().unwrap().is_dir());

        let file = fs.read_inode(TestImage::FILE).unwrap().unwrap();
        assert_eq!({ file.size_low }, 13);
        assert!(fs.read_inode(InodeNumber(50)).unwrap().is_none());
        assert!(fs.read_inode(InodeNumber(0)).unwrap().is_none());
        assert!(fs.read_inode(InodeNumber(500)).unwrap().is_none());
    }

    #[test]
    fn directory_and_indirect_walks() {
        let mut image = TestImage::new();
        image.add_indirect_file();
        let mut fs = open(image);

        let root = fs.root().unwrap();
        let names: Vec<_> = fs
            .directory_entries(ROOT_DIRECTORY, &root)
            .unwrap()
            .map(|entry| entry.unwrap().name)
            .collect();
        assert_eq!(names, [b".".to_vec(), b"..".to_vec(), b"file.txt".to_vec()]);
        assert_eq!(fs.indirect_references(&root).count(), 0);

        let file = fs.read_inode(TestImage::INDIRECT_FILE).unwrap().unwrap();
        assert_eq!(fs.indirect_references(&file).count(), 4);
        assert_eq!(fs.store().cached_blocks(), 0);
    }

    #[test]
    fn rejects_bad_images() {
        let mut image = TestImage::new();
        image.update_superblock(|sb| sb.magic = 0);
        let err = FileSystem::open(MemoryDevice::new(image.into_bytes())).unwrap_err();
        assert!(matches!(err, Ext2Error::MalformedSuperblock(_)));

        let err = FileSystem::open(MemoryDevice::new(vec![0; 512])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        let mut image = TestImage::new();
        image.update_superblock(|sb| sb.first_data_block = BlockAddress(u32::MAX));
        let err = FileSystem::open(MemoryDevice::new(image.into_bytes())).unwrap_err();
        assert!(matches!(err, Ext2Error::MalformedSuperblock(_)));

        let mut bytes = TestImage::new().into_bytes();
        bytes.truncate(512 * 1024);
        let err = FileSystem::open(MemoryDevice::new(bytes)).unwrap_err();
        assert!(matches!(err, Ext2Error::MalformedSuperblock(_)));
    }
}
