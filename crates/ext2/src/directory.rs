use std::borrow::Cow;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::block::{BlockDeviceDriver, BlockStore, SharedBlock};
use crate::geometry::Geometry;
use crate::indirect::IndirectCursor;
use crate::inode::Inode;
use crate::superblock::{BlockAddress, InodeNumber};
use crate::{Ext2Error, Result};

/// See <https://www.nongnu.org/ext2-doc/ext2.html#linked-directory-entry-structure>
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct DirectoryEntryHeader {
    pub inode: InodeNumber,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

impl DirectoryEntryHeader {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();
}

/// Value of the header's `file_type` byte, when the filesystem records it.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DirectoryEntryFileType {
    Unknown = 0,
    RegularFile = 1,
    Directory = 2,
    CharacterDevice = 3,
    BlockDevice = 4,
    Fifo = 5,
    Socket = 6,
    SymbolicLink = 7,
}

impl From<u8> for DirectoryEntryFileType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::RegularFile,
            2 => Self::Directory,
            3 => Self::CharacterDevice,
            4 => Self::BlockDevice,
            5 => Self::Fifo,
            6 => Self::Socket,
            7 => Self::SymbolicLink,
            _ => Self::Unknown,
        }
    }
}

/// A live directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Byte offset of the record within the directory's data.
    pub logical_offset: u64,
    pub inode: InodeNumber,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: DirectoryEntryFileType,
    pub name: Vec<u8>,
}

impl DirectoryEntry {
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

#[derive(Debug)]
struct CurrentBlock {
    block: SharedBlock,
    logical_block: u64,
    offset: usize,
}

/// Pulls the linked-list directory records out of a directory's data blocks:
/// the 12 direct blocks in order, then the indirect trees.
///
/// Decoding stops once the records seen add up to the directory's size. A
/// record with a zero `rec_len` pads out the rest of its block. Deleted
/// records (inode 0) count towards the size but aren't yielded.
///
/// Corrupt records end their block with a [`Ext2Error::TruncatedDirectory`]
/// and decoding goes on with the next block. Running out of blocks before
/// the size is reached yields one final `TruncatedDirectory`.
#[derive(Debug)]
pub struct DirectoryDecoder<'s, D> {
    store: &'s mut BlockStore<D>,
    number: InodeNumber,
    declared: u64,
    consumed: u64,
    block_size: usize,
    blocks_count: u32,
    direct: [BlockAddress; Inode::DIRECT_BLOCKS],
    next_direct: usize,
    indirect: IndirectCursor,
    current: Option<CurrentBlock>,
    finished: bool,
}

impl<'s, D: BlockDeviceDriver> DirectoryDecoder<'s, D> {
    pub fn new(
        store: &'s mut BlockStore<D>,
        number: InodeNumber,
        inode: &Inode,
        geometry: &Geometry,
    ) -> Result<Self> {
        if !inode.is_dir() {
            return Err(Ext2Error::MalformedInode {
                inode: number.0,
                reason: "not a directory",
            });
        }

        Ok(Self {
            store,
            number,
            declared: inode.size(geometry.revision),
            consumed: 0,
            block_size: geometry.block_size.bytes(),
            blocks_count: geometry.blocks_count,
            direct: inode.direct_blocks.0,
            next_direct: 0,
            indirect: IndirectCursor::for_inode(inode, geometry),
            current: None,
            finished: false,
        })
    }

    /// Bytes of directory data accounted for so far, live or not.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn truncated(&self) -> Ext2Error {
        Ext2Error::TruncatedDirectory {
            inode: self.number.0,
            declared: self.declared,
            available: self.consumed,
        }
    }

    /// Next data block along with its logical block number. Holes are
    /// skipped.
    fn next_block(&mut self) -> Option<Result<(u64, SharedBlock)>> {
        while let Some(&address) = self.direct.get(self.next_direct) {
            let logical_block = self.next_direct as u64;
            self.next_direct += 1;
            if address.is_null() {
                continue;
            }
            if address.0 >= self.blocks_count {
                return Some(Err(Ext2Error::BlockOutOfRange {
                    block: address.0,
                    blocks_count: self.blocks_count,
                }));
            }
            return Some(
                self.store
                    .read_shared(address)
                    .map(|block| (logical_block, block)),
            );
        }

        loop {
            match self.indirect.advance(self.store)? {
                Ok(reference) if reference.is_leaf() => {
                    return Some(
                        self.store
                            .read_shared(reference.referenced_block)
                            .map(|block| (reference.logical_offset, block)),
                    );
                }
                Ok(_) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl<D: BlockDeviceDriver> Iterator for DirectoryDecoder<'_, D> {
    type Item = Result<DirectoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if self.consumed >= self.declared {
                self.finished = true;
                return None;
            }

            let Some(current) = self.current.as_mut() else {
                match self.next_block() {
                    Some(Ok((logical_block, block))) => {
                        self.current = Some(CurrentBlock {
                            block,
                            logical_block,
                            offset: 0,
                        });
                    }
                    Some(Err(err)) => return Some(Err(err)),
                    None => {
                        self.finished = true;
                        return Some(Err(self.truncated()));
                    }
                }
                continue;
            };

            let offset = current.offset;
            let remaining = self.block_size - offset;
            if remaining == 0 {
                self.current = None;
                continue;
            }

            let header = current.block[offset..]
                .get(..DirectoryEntryHeader::SIZE_BYTES)
                .and_then(DirectoryEntryHeader::read_from);
            let Some(header) = header else {
                self.consumed += remaining as u64;
                self.current = None;
                return Some(Err(self.truncated()));
            };

            let rec_len = usize::from(header.rec_len);
            let name_len = usize::from(header.name_len);
            if rec_len == 0 {
                // Padding to the end of the block.
                self.consumed += remaining as u64;
                self.current = None;
                continue;
            }
            if rec_len < DirectoryEntryHeader::SIZE_BYTES + name_len || rec_len > remaining {
                log::debug!(
                    "directory {} has a {rec_len} byte record with a {name_len} byte name at offset {offset}",
                    self.number
                );
                self.consumed += remaining as u64;
                self.current = None;
                return Some(Err(self.truncated()));
            }

            let logical_offset = current.logical_block * self.block_size as u64 + offset as u64;
            current.offset += rec_len;
            self.consumed += rec_len as u64;

            let inode = header.inode;
            if inode.0 == 0 {
                continue;
            }

            let name_start = offset + DirectoryEntryHeader::SIZE_BYTES;
            let name = current.block[name_start..name_start + name_len].to_vec();
            return Some(Ok(DirectoryEntry {
                logical_offset,
                inode,
                rec_len: header.rec_len,
                name_len: header.name_len,
                file_type: DirectoryEntryFileType::from(header.file_type),
                name,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryDevice;
    use crate::test_image::TestImage;

    fn decode(image: TestImage, number: InodeNumber) -> (Vec<Result<DirectoryEntry>>, u64) {
        let geometry = image.geometry();
        let inode = image.inode(number);
        let mut store = BlockStore::new(MemoryDevice::new(image.into_bytes()));
        store.initialize(geometry.block_size);

        let mut decoder = DirectoryDecoder::new(&mut store, number, &inode, &geometry).unwrap();
        let entries = decoder.by_ref().collect();
        (entries, decoder.consumed())
    }

    #[test]
    fn header_is_8_bytes() {
        assert_eq!(DirectoryEntryHeader::SIZE_BYTES, 8);
    }

    #[test]
    fn root_directory_entries() {
        let (entries, consumed) = decode(TestImage::new(), TestImage::ROOT);
        let entries = entries.into_iter().collect::<Result<Vec<_>>>().unwrap();

        let summary: Vec<_> = entries
            .iter()
            .map(|entry| (entry.logical_offset, entry.inode.0, entry.name_lossy().into_owned()))
            .collect();
        assert_eq!(
            summary,
            [
                (0, 2, ".".to_owned()),
                (12, 2, "..".to_owned()),
                (24, 12, "file.txt".to_owned()),
            ]
        );
        assert_eq!(entries[2].rec_len, 1000);
        assert_eq!(entries[2].name_len, 8);
        assert_eq!(entries[2].file_type, DirectoryEntryFileType::RegularFile);
        // The deleted record in the second block still counts.
        assert_eq!(consumed, 2048);
    }

    #[test]
    fn single_record_spans_block() {
        let mut image = TestImage::new();
        let number = InodeNumber(14);
        image.add_directory(number, &[BlockAddress(40)], &[(14, 1024, b"only".as_slice(), 2)]);

        let (entries, consumed) = decode(image, number);
        assert_eq!(entries.len(), 1);
        let entry = entries.into_iter().next().unwrap().unwrap();
        assert_eq!(entry.logical_offset, 0);
        assert_eq!(entry.name, b"only");
        assert_eq!(consumed, 1024);
    }

    #[test]
    fn zero_rec_len_pads_block() {
        let mut image = TestImage::new();
        let number = InodeNumber(14);
        image.add_directory(
            number,
            &[BlockAddress(40), BlockAddress(41)],
            &[(14, 12, b".".as_slice(), 2), (0, 0, b"".as_slice(), 0)],
        );
        image.write_dir_block(BlockAddress(41), &[(12, 1024, b"second".as_slice(), 1)]);

        let (entries, consumed) = decode(image, number);
        let offsets: Vec<u64> = entries
            .into_iter()
            .map(|entry| entry.unwrap().logical_offset)
            .collect();
        assert_eq!(offsets, [0, 1024]);
        assert_eq!(consumed, 2048);
    }

    #[test]
    fn size_beyond_blocks_is_truncated() {
        let mut image = TestImage::new();
        image.update_inode(TestImage::ROOT, |inode| inode.size_low = 4096);

        let (entries, _) = decode(image, TestImage::ROOT);
        assert_eq!(entries.len(), 4);
        assert!(matches!(
            entries.last(),
            Some(Err(Ext2Error::TruncatedDirectory {
                inode: 2,
                declared: 4096,
                available: 2048
            }))
        ));
    }

    #[test]
    fn overlong_record_skips_rest_of_block() {
        let mut image = TestImage::new();
        let number = InodeNumber(14);
        image.add_directory(
            number,
            &[BlockAddress(40), BlockAddress(41)],
            &[(14, 12, b".".as_slice(), 2), (2, 2000, b"..".as_slice(), 2)],
        );
        image.write_dir_block(BlockAddress(41), &[(12, 1024, b"after".as_slice(), 1)]);

        let (entries, consumed) = decode(image, number);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].as_ref().unwrap().name, b".");
        assert!(matches!(entries[1], Err(Ext2Error::TruncatedDirectory { .. })));
        assert_eq!(entries[2].as_ref().unwrap().logical_offset, 1024);
        assert_eq!(consumed, 2048);
    }

    #[test]
    fn follows_indirect_blocks() {
        let mut image = TestImage::new();
        let number = InodeNumber(14);
        image.add_directory(number, &[BlockAddress(40)], &[(14, 1024, b".".as_slice(), 2)]);
        image.write_pointers(BlockAddress(41), &[42]);
        image.write_dir_block(BlockAddress(42), &[(12, 1024, b"deep".as_slice(), 1)]);
        image.update_inode(number, |inode| {
            inode.size_low = 2048;
            inode.singly_indirect_block = BlockAddress(41);
        });

        let (entries, _) = decode(image, number);
        let entries = entries.into_iter().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(entries.len(), 2);
        // Logical block 12 is the first one behind the singly indirect block.
        assert_eq!(entries[1].logical_offset, 12 * 1024);
        assert_eq!(entries[1].name_lossy(), "deep");
    }

    #[test]
    fn rejects_non_directories() {
        let image = TestImage::new();
        let geometry = image.geometry();
        let inode = image.inode(TestImage::FILE);
        let mut store = BlockStore::new(MemoryDevice::new(image.into_bytes()));
        store.initialize(geometry.block_size);
        assert!(DirectoryDecoder::new(&mut store, TestImage::FILE, &inode, &geometry).is_err());
    }
}
