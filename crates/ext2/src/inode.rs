use core::fmt;

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::bitmap::{scan_used, BitmapEntries};
use crate::superblock::{BlockAddress, InodeNumber, Revision};
use crate::{Ext2Error, Result};

/// See <https://www.nongnu.org/ext2-doc/ext2.html#inode-table>
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
pub struct Inode {
    pub mode: InodeMode,
    pub uid: u16,
    pub size_low: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    /// Number of 512 byte sectors reserved for the inode, not filesystem
    /// blocks.
    pub blocks: u32,
    pub flags: u32,
    pub osd1: u32,
    pub direct_blocks: InodeDirectBlocks,
    pub singly_indirect_block: BlockAddress,
    pub doubly_indirect_block: BlockAddress,
    pub triply_indirect_block: BlockAddress,
    pub generation: u32,
    pub file_acl: u32,
    /// High 32 bits of file size. This is dir_acl in revision 0.
    pub size_high: u32,
    pub faddr: u32,
    pub osd2: [u8; 12],
}

impl Inode {
    /// Symlink targets up to this many bytes are stored inline in the block
    /// pointer fields instead of in a data block.
    pub const INLINE_DATA_MAX: u64 = 60;

    pub const DIRECT_BLOCKS: usize = 12;

    /// Bytes of the record we decode. Dynamic revision inodes may be larger.
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();

    pub fn file_type(&self) -> FileType {
        let mode = self.mode;
        FileType::from(mode)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::RegularFile
    }

    /// Access rights and set-id/sticky bits, without the file format.
    pub fn permissions(&self) -> u16 {
        let mode = self.mode;
        mode.bits() & !InodeMode::FORMAT_MASK
    }

    pub fn size(&self, revision: Revision) -> u64 {
        // In revision 0, and for anything but regular files, we only have
        // 32-bit sizes.
        if revision == Revision::GoodOld || !self.is_file() {
            return u64::from(self.size_low);
        }

        (u64::from(self.size_high) << 32) | u64::from(self.size_low)
    }

    /// Whether the block pointers address data blocks. Short symlinks keep
    /// their target in the pointer fields, and device nodes, FIFOs and sockets
    /// don't have data at all.
    pub fn has_data_blocks(&self, revision: Revision) -> bool {
        match self.file_type() {
            FileType::RegularFile | FileType::Directory => true,
            FileType::SymbolicLink => self.size(revision) > Self::INLINE_DATA_MAX,
            FileType::Other => false,
        }
    }

    /// All 15 block pointers: 12 direct, then singly, doubly and triply
    /// indirect.
    pub fn block_pointers(&self) -> [BlockAddress; 15] {
        let direct = self.direct_blocks.0;
        let mut pointers = [BlockAddress(0); 15];
        pointers[..Self::DIRECT_BLOCKS].copy_from_slice(&direct);
        pointers[12] = self.singly_indirect_block;
        pointers[13] = self.doubly_indirect_block;
        pointers[14] = self.triply_indirect_block;
        pointers
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileType {
    RegularFile,
    Directory,
    SymbolicLink,
    Other,
}

impl From<InodeMode> for FileType {
    fn from(mode: InodeMode) -> Self {
        match mode.bits() & InodeMode::FORMAT_MASK {
            format if format == InodeMode::IFREG.bits() => Self::RegularFile,
            format if format == InodeMode::IFDIR.bits() => Self::Directory,
            format if format == InodeMode::IFLNK.bits() => Self::SymbolicLink,
            _ => Self::Other,
        }
    }
}

/// <https://www.nongnu.org/ext2-doc/ext2.html#i-mode>
#[derive(Debug, Copy, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
pub struct InodeMode(u16);

bitflags! {
    impl InodeMode: u16 {
        // Access rights

        /// Others execute
        const IXOTH = 0x001;

        /// Others write
        const IWOTH = 0x002;

        /// Others read
        const IROTH = 0x004;

        /// Group execute
        const IXGRP = 0x008;

        /// Group write
        const IWGRP = 0x010;

        /// Group read
        const IRGRP = 0x020;

        /// User execute
        const IXUSR = 0x040;

        /// User write
        const IWUSR = 0x080;

        /// User read
        const IRUSR = 0x100;

        // Process execution user/group override

        /// Sticky bit
        const ISVTX = 0x200;

        /// Set process group id
        const ISGID = 0x400;

        /// Set process user id
        const ISUID = 0x800;

        // File format. These are values of the top four bits, not independent
        // flags.

        /// FIFO
        const IFIFO = 0x1000;

        /// Character device
        const IFCHR = 0x2000;

        /// Directory
        const IFDIR = 0x4000;

        /// Block device
        const IFBLK = 0x6000;

        /// Regular file
        const IFREG = 0x8000;

        /// Symbolic link
        const IFLNK = 0xA000;

        /// Socket
        const IFSOCK = 0xC000;
    }
}

impl InodeMode {
    pub const FORMAT_MASK: u16 = 0xF000;
}

#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(transparent)]
pub struct InodeDirectBlocks(pub [BlockAddress; 12]);

impl InodeDirectBlocks {
    /// Non-null direct blocks along with their logical block index. Null
    /// entries are holes and are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (u64, BlockAddress)> {
        let blocks = self.0;
        blocks
            .into_iter()
            .enumerate()
            .filter(|(_, block)| !block.is_null())
            .map(|(i, block)| (i as u64, block))
    }
}

impl fmt::Debug for InodeDirectBlocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter().map(|block| block.0)).finish()
    }
}

/// Walks a group's inode bitmap and inode table together, yielding each
/// allocated inode.
///
/// Records whose bitmap bit is set but whose mode or link count is zero are
/// leftovers of an inconsistent bitmap and are skipped.
#[derive(Debug)]
pub struct InodeWalker<B, T> {
    used: BitmapEntries<B>,
    table: T,
    inode_size: usize,
    first_number: InodeNumber,
}

impl<B: AsRef<[u8]>, T: AsRef<[u8]>> InodeWalker<B, T> {
    /// `first_number` is the inode number of the group's first bitmap entry.
    pub fn new(bitmap: B, table: T, inode_count: u32, inode_size: u16, first_number: InodeNumber) -> Self {
        Self {
            used: scan_used(bitmap, inode_count),
            table,
            inode_size: usize::from(inode_size),
            first_number,
        }
    }
}

impl<B: AsRef<[u8]>, T: AsRef<[u8]>> Iterator for InodeWalker<B, T> {
    type Item = Result<(InodeNumber, Inode)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.used.next()?;
            let number = InodeNumber(self.first_number.0 + entry - 1);

            let offset = self.inode_size * (entry as usize - 1);
            let record = self
                .table
                .as_ref()
                .get(offset..offset + self.inode_size)
                .and_then(Inode::read_from_prefix);
            let Some(inode) = record else {
                return Some(Err(Ext2Error::MalformedInode {
                    inode: number.0,
                    reason: "record lies past the end of the inode table",
                }));
            };

            let mode = { inode.mode }.bits();
            let links_count = inode.links_count;
            if mode == 0 || links_count == 0 {
                log::debug!(
                    "skipping inode {number}: marked used but has mode {mode:#o} and {links_count} links"
                );
                continue;
            }

            return Some(Ok((number, inode)));
        }
    }
}
