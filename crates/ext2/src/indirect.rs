//! Indirect block trees.
//!
//! An inode addresses its first 12 data blocks directly. The next
//! `P = block_size / 4` logical blocks go through the singly indirect block,
//! the next `P²` through the doubly indirect block and the next `P³` through
//! the triply indirect block. Each indirect block is an array of `P` little
//! endian block pointers, where 0 is a hole.
//!
//! See <https://www.nongnu.org/ext2-doc/ext2.html#i-block>

use core::fmt;

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::FromBytes;

use crate::block::{BlockDeviceDriver, BlockStore, SharedBlock};
use crate::geometry::Geometry;
use crate::inode::Inode;
use crate::superblock::BlockAddress;
use crate::{Ext2Error, Result};

/// Depth of an indirect block. A level 1 block points at data blocks, a
/// level 2 block at level 1 blocks and so on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndirectLevel(u8);

impl IndirectLevel {
    pub const SINGLY: Self = Self(1);
    pub const DOUBLY: Self = Self(2);
    pub const TRIPLY: Self = Self(3);

    /// Deepest tree the format can express. Chains are never followed past
    /// it, even if the pointers would loop.
    pub const MAX: u8 = 3;

    pub fn new(level: u8) -> Option<Self> {
        (1..=Self::MAX).contains(&level).then_some(Self(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Level of the blocks this level's pointers refer to, or `None` if they
    /// refer to data blocks.
    fn child(self) -> Option<Self> {
        Self::new(self.0 - 1)
    }

    /// Logical blocks covered by one pointer at this level.
    fn stride(self, pointers_per_block: u64) -> u64 {
        pointers_per_block.pow(u32::from(self.0) - 1)
    }
}

impl fmt::Display for IndirectLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One non-zero pointer found inside an indirect block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IndirectReference {
    /// Level of `indirect_block`.
    pub level: IndirectLevel,
    /// Logical block offset within the file of the first data block reached
    /// through `referenced_block`.
    pub logical_offset: u64,
    pub indirect_block: BlockAddress,
    pub referenced_block: BlockAddress,
}

impl IndirectReference {
    /// Whether `referenced_block` is a data block.
    pub fn is_leaf(&self) -> bool {
        self.level == IndirectLevel::SINGLY
    }
}

#[derive(Debug)]
struct Frame {
    block: SharedBlock,
    level: IndirectLevel,
    base: u64,
    next: usize,
}

#[derive(Debug, Copy, Clone)]
struct Root {
    block: BlockAddress,
    level: IndirectLevel,
    base: u64,
}

/// Resumable depth-first walk over one or more indirect block trees.
///
/// The cursor doesn't hold on to the [`BlockStore`], so a caller that also
/// needs the store between steps (like the directory decoder) can lend it for
/// each [`IndirectCursor::advance`]. [`IndirectWalker`] wraps the two into an
/// iterator.
///
/// Every pointer is yielded before the cursor descends into the block it
/// refers to. Blocks on the current path are held with shared retention, so
/// a block that shows up twice on one path is only read once.
#[derive(Debug)]
pub struct IndirectCursor {
    // Reversed, so the next root is at the end.
    roots: Vec<Root>,
    stack: Vec<Frame>,
    blocks_count: u32,
    pointers_per_block: u64,
}

impl IndirectCursor {
    /// Walks the tree rooted at the level `level` block `root`. Logical
    /// offsets start at `Inode::DIRECT_BLOCKS + base_logical_offset`.
    pub fn new(
        root: BlockAddress,
        level: IndirectLevel,
        base_logical_offset: u64,
        geometry: &Geometry,
    ) -> Self {
        Self::with_roots(
            vec![Root {
                block: root,
                level,
                base: base_logical_offset,
            }],
            geometry,
        )
    }

    /// Walks an inode's singly, doubly and triply indirect trees in that
    /// order.
    pub fn for_inode(inode: &Inode, geometry: &Geometry) -> Self {
        let p = geometry.pointers_per_block();
        let mut roots = vec![
            Root {
                block: inode.singly_indirect_block,
                level: IndirectLevel::SINGLY,
                base: 0,
            },
            Root {
                block: inode.doubly_indirect_block,
                level: IndirectLevel::DOUBLY,
                base: p,
            },
            Root {
                block: inode.triply_indirect_block,
                level: IndirectLevel::TRIPLY,
                base: p + p * p,
            },
        ];
        roots.reverse();
        Self::with_roots(roots, geometry)
    }

    fn with_roots(roots: Vec<Root>, geometry: &Geometry) -> Self {
        Self {
            roots,
            stack: Vec::with_capacity(usize::from(IndirectLevel::MAX)),
            blocks_count: geometry.blocks_count,
            pointers_per_block: geometry.pointers_per_block(),
        }
    }

    /// Produces the next reference. Out of range pointers and failed reads
    /// are reported as errors and their subtree is skipped; the walk goes on
    /// with the following pointer.
    pub fn advance<D: BlockDeviceDriver>(
        &mut self,
        store: &mut BlockStore<D>,
    ) -> Option<Result<IndirectReference>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                let root = self.roots.pop()?;
                if root.block.is_null() {
                    continue;
                }
                if let Err(err) = self.check_range(root.block) {
                    return Some(Err(err));
                }
                match store.read_shared(root.block) {
                    Ok(block) => self.stack.push(Frame {
                        block,
                        level: root.level,
                        base: root.base,
                        next: 0,
                    }),
                    Err(err) => return Some(Err(err)),
                }
                continue;
            };

            let Some((index, pointer)) = next_pointer(frame) else {
                self.stack.pop();
                continue;
            };

            let level = frame.level;
            let child_base = frame.base + index as u64 * level.stride(self.pointers_per_block);
            let reference = IndirectReference {
                level,
                logical_offset: Inode::DIRECT_BLOCKS as u64 + child_base,
                indirect_block: frame.block.address(),
                referenced_block: pointer,
            };

            if let Err(err) = self.check_range(pointer) {
                return Some(Err(err));
            }
            if let Some(child_level) = level.child() {
                match store.read_shared(pointer) {
                    Ok(block) => self.stack.push(Frame {
                        block,
                        level: child_level,
                        base: child_base,
                        next: 0,
                    }),
                    Err(err) => return Some(Err(err)),
                }
            }
            return Some(Ok(reference));
        }
    }

    fn check_range(&self, block: BlockAddress) -> Result<()> {
        if block.0 < self.blocks_count {
            Ok(())
        } else {
            Err(Ext2Error::BlockOutOfRange {
                block: block.0,
                blocks_count: self.blocks_count,
            })
        }
    }
}

/// Index and value of the next non-zero pointer in `frame`, advancing past
/// it.
fn next_pointer(frame: &mut Frame) -> Option<(usize, BlockAddress)> {
    let pointers = U32::<LittleEndian>::slice_from(&frame.block)?;
    while let Some(pointer) = pointers.get(frame.next) {
        let index = frame.next;
        frame.next += 1;
        if pointer.get() != 0 {
            return Some((index, BlockAddress(pointer.get())));
        }
    }
    None
}

/// Iterator over an [`IndirectCursor`] that borrows the store for its whole
/// lifetime.
#[derive(Debug)]
pub struct IndirectWalker<'s, D> {
    store: &'s mut BlockStore<D>,
    cursor: IndirectCursor,
}

impl<'s, D: BlockDeviceDriver + 's> IndirectWalker<'s, D> {
    pub fn new(store: &'s mut BlockStore<D>, cursor: IndirectCursor) -> Self {
        Self { store, cursor }
    }

    /// Only the data blocks, as `(logical block offset, physical block)`.
    pub fn data_blocks(self) -> impl Iterator<Item = Result<(u64, BlockAddress)>> + 's {
        self.filter_map(|reference| match reference {
            Ok(reference) if reference.is_leaf() => {
                Some(Ok((reference.logical_offset, reference.referenced_block)))
            }
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
    }
}

impl<D: BlockDeviceDriver> Iterator for IndirectWalker<'_, D> {
    type Item = Result<IndirectReference>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(self.store)
    }
}
