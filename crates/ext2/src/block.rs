//! Block access layer: turns the flat image into addressable, cached blocks.

use core::cell::RefCell;
use core::fmt;
use core::fmt::Debug;
use core::ops::Deref;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::{Rc, Weak};

use crate::superblock::{BlockAddress, Superblock};
use crate::{Ext2Error, Result};

/// Something that knows how to read bytes from the image backing the
/// filesystem. Only a buffered file reader exists today, but a memory-mapped
/// image would slot in here as well.
pub trait BlockDeviceDriver: Debug {
    /// Total size of the image in bytes.
    fn len_bytes(&self) -> u64;

    /// Fills `buf` with the bytes starting at `offset`. Running into the end
    /// of the image before `buf` is full is an error.
    fn read_exact_at(&mut self, offset: OffsetBytes, buf: &mut [u8]) -> io::Result<()>;
}

/// Image read through `Seek` + `Read`, typically a buffered file.
#[derive(Debug)]
pub struct FileDevice<R> {
    reader: R,
    len_bytes: u64,
}

impl FileDevice<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len_bytes = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            len_bytes,
        })
    }
}

impl<R: Read + Seek> FileDevice<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let len_bytes = reader.seek(SeekFrom::End(0))?;
        Ok(Self { reader, len_bytes })
    }
}

impl<R: Read + Seek + Debug> BlockDeviceDriver for FileDevice<R> {
    fn len_bytes(&self) -> u64 {
        self.len_bytes
    }

    fn read_exact_at(&mut self, offset: OffsetBytes, buf: &mut [u8]) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset.0))?;
        self.reader.read_exact(buf)
    }
}

/// Image held entirely in memory.
#[derive(Clone)]
pub struct MemoryDevice {
    bytes: Vec<u8>,
}

impl MemoryDevice {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl Debug for MemoryDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("len_bytes", &self.bytes.len())
            .finish()
    }
}

impl BlockDeviceDriver for MemoryDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&mut self, offset: OffsetBytes, buf: &mut [u8]) -> io::Result<()> {
        let src = usize::try_from(offset.0)
            .ok()
            .and_then(|start| self.bytes.get(start..start.checked_add(buf.len())?))
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockSize(u32);

impl BlockSize {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn bytes(self) -> usize {
        self.0 as usize
    }

    /// Number of 32-bit block pointers that fit in one block.
    pub fn pointers_per_block(self) -> u64 {
        u64::from(self.0 / 4)
    }
}

impl From<BlockSize> for u64 {
    fn from(value: BlockSize) -> Self {
        u64::from(value.0)
    }
}

/// Address in bytes from the start of the image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OffsetBytes(pub u64);

impl BlockAddress {
    pub fn offset(self, block_size: BlockSize) -> OffsetBytes {
        OffsetBytes(u64::from(self.0) * u64::from(block_size))
    }
}

/// How long a block returned by [`BlockStore::read_block`] stays valid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Retention {
    /// Lands in the store's single scratch buffer, which the next transient
    /// read overwrites. The borrow checker keeps the old contents from being
    /// observed after that.
    Transient,
    /// Shared, reference-counted buffer keyed by block address. Stays cached
    /// for as long as any handle to it is alive.
    Shared,
}

/// A block fetched under some [`Retention`].
#[derive(Debug)]
pub enum Block<'a> {
    Transient(&'a [u8]),
    Shared(SharedBlock),
}

impl Deref for Block<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Transient(bytes) => bytes,
            Self::Shared(block) => block,
        }
    }
}

type CacheMap = HashMap<BlockAddress, Weak<[u8]>>;

/// Handle to a cached block. Clones share the buffer; dropping the last
/// handle evicts the block from the cache.
pub struct SharedBlock {
    address: BlockAddress,
    data: Rc<[u8]>,
    cache: Weak<RefCell<CacheMap>>,
}

impl SharedBlock {
    pub fn address(&self) -> BlockAddress {
        self.address
    }

    /// True if both handles point at the same cached buffer.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.data, &b.data)
    }
}

impl Clone for SharedBlock {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            data: Rc::clone(&self.data),
            cache: Weak::clone(&self.cache),
        }
    }
}

impl Drop for SharedBlock {
    fn drop(&mut self) {
        if Rc::strong_count(&self.data) != 1 {
            return;
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.borrow_mut().remove(&self.address);
            log::trace!("evicted block {}", self.address.0);
        }
    }
}

impl Deref for SharedBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for SharedBlock {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Debug for SharedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBlock")
            .field("address", &self.address)
            .field("len", &self.data.len())
            .field("handles", &Rc::strong_count(&self.data))
            .finish()
    }
}

/// Owned buffer holding a contiguous run of blocks.
pub struct RawBlock {
    start: BlockAddress,
    data: Box<[u8]>,
}

impl RawBlock {
    pub fn start(&self) -> BlockAddress {
        self.start
    }
}

impl Deref for RawBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for RawBlock {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Debug for RawBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBlock")
            .field("start", &self.start)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Reads blocks from a [`BlockDeviceDriver`] and owns every buffer handed
/// out, either as the transient scratch buffer or through the shared cache.
///
/// Block addressed reads need the block size, so they fail with
/// [`Ext2Error::Uninitialized`] until [`BlockStore::initialize`] ran. The
/// superblock lives at a fixed byte offset and can always be read.
pub struct BlockStore<D> {
    device: D,
    block_size: Option<BlockSize>,
    transient: Vec<u8>,
    cache: Rc<RefCell<CacheMap>>,
    descriptor_table: Option<(BlockAddress, Box<[u8]>)>,
    device_reads: u64,
}

impl<D: BlockDeviceDriver> BlockStore<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            block_size: None,
            transient: Vec::new(),
            cache: Rc::new(RefCell::new(HashMap::new())),
            descriptor_table: None,
            device_reads: 0,
        }
    }

    pub fn image_len(&self) -> u64 {
        self.device.len_bytes()
    }

    /// Enables block addressed reads once the geometry is known.
    pub fn initialize(&mut self, block_size: BlockSize) {
        log::debug!("block store initialized with {} byte blocks", block_size.0);
        self.block_size = Some(block_size);
        self.transient = vec![0; block_size.bytes()];
    }

    pub fn block_size(&self) -> Result<BlockSize> {
        self.block_size
            .ok_or(Ext2Error::Uninitialized("BlockStore"))
    }

    /// Raw superblock bytes, read from their fixed offset regardless of the
    /// block size.
    pub fn read_superblock(&mut self) -> Result<[u8; Superblock::SIZE_BYTES]> {
        let mut buf = [0; Superblock::SIZE_BYTES];
        self.read_at(Superblock::OFFSET_BYTES, &mut buf)?;
        Ok(buf)
    }

    pub fn read_block(&mut self, address: BlockAddress, retention: Retention) -> Result<Block<'_>> {
        match retention {
            Retention::Transient => self.read_transient(address).map(Block::Transient),
            Retention::Shared => self.read_shared(address).map(Block::Shared),
        }
    }

    pub fn read_transient(&mut self, address: BlockAddress) -> Result<&[u8]> {
        let block_size = self.block_size()?;
        let mut buf = core::mem::take(&mut self.transient);
        let result = self.read_at(address.offset(block_size), &mut buf);
        self.transient = buf;
        result?;
        Ok(&self.transient)
    }

    pub fn read_shared(&mut self, address: BlockAddress) -> Result<SharedBlock> {
        let block_size = self.block_size()?;

        let cached = self.cache.borrow().get(&address).and_then(Weak::upgrade);
        if let Some(data) = cached {
            log::trace!("cache hit for block {}", address.0);
            return Ok(SharedBlock {
                address,
                data,
                cache: Rc::downgrade(&self.cache),
            });
        }

        let mut buf = vec![0; block_size.bytes()];
        self.read_at(address.offset(block_size), &mut buf)?;
        let data: Rc<[u8]> = Rc::from(buf);
        self.cache
            .borrow_mut()
            .insert(address, Rc::downgrade(&data));

        Ok(SharedBlock {
            address,
            data,
            cache: Rc::downgrade(&self.cache),
        })
    }

    /// Reads `count` contiguous blocks into a fresh buffer.
    pub fn read_blocks(&mut self, start: BlockAddress, count: usize) -> Result<RawBlock> {
        let block_size = self.block_size()?;
        let mut buf = vec![0; block_size.bytes() * count];
        self.read_at(start.offset(block_size), &mut buf)?;
        Ok(RawBlock {
            start,
            data: buf.into_boxed_slice(),
        })
    }

    /// Bytes of the group descriptor table: `len_bytes` bytes starting at
    /// block `start`. Repeating the last request returns the cached copy.
    pub fn read_group_descriptors(&mut self, start: BlockAddress, len_bytes: usize) -> Result<&[u8]> {
        let block_size = self.block_size()?;
        let cached = matches!(
            &self.descriptor_table,
            Some((cached_start, bytes)) if *cached_start == start && bytes.len() == len_bytes
        );
        if !cached {
            let mut buf = vec![0; len_bytes];
            self.read_at(start.offset(block_size), &mut buf)?;
            self.descriptor_table = Some((start, buf.into_boxed_slice()));
        }
        Ok(self
            .descriptor_table
            .as_ref()
            .map(|(_, bytes)| &**bytes)
            .unwrap_or_default())
    }

    /// Number of blocks currently held in the shared cache.
    pub fn cached_blocks(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Number of reads issued to the device so far.
    pub fn device_reads(&self) -> u64 {
        self.device_reads
    }

    fn read_at(&mut self, offset: OffsetBytes, buf: &mut [u8]) -> Result<()> {
        self.device_reads += 1;
        self.device.read_exact_at(offset, buf)?;
        Ok(())
    }
}

impl<D: Debug> Debug for BlockStore<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStore")
            .field("device", &self.device)
            .field("block_size", &self.block_size)
            .field("cached_blocks", &self.cache.borrow().len())
            .field("device_reads", &self.device_reads)
            .finish_non_exhaustive()
    }
}
