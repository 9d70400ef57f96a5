//! Read-only analysis of raw ext2 filesystem images.
//!
//! The crate decodes the on-disk structures of an unmounted image and walks
//! them the way a filesystem debugger would: superblock, block group
//! descriptors, allocation bitmaps, inodes, directories and the indirect block
//! trees that locate file data. Opening an image reads only the superblock and
//! descriptor table; the rest is pulled in by the iterators as they advance.
//!
//! # Resources
//!
//! - <https://wiki.osdev.org/Ext2>
//! - <https://www.nongnu.org/ext2-doc/ext2.html>
//! - <https://en.wikipedia.org/wiki/Ext2>
//! - <https://git.kernel.org/pub/scm/utils/util-linux/util-linux.git/tree/libblkid/src/superblocks/ext.c>

#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cargo_common_metadata,
    clippy::doc_markdown,
    clippy::implicit_hasher,
    clippy::implicit_return,
    clippy::len_without_is_empty,
    clippy::missing_const_for_fn,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::redundant_pub_crate,
    clippy::suboptimal_flops,
    clippy::wildcard_imports
)]

pub mod bitmap;
pub mod block;
pub mod block_group;
pub mod directory;
mod error;
pub mod file_system;
pub mod geometry;
pub mod indirect;
pub mod inode;
pub mod report;
mod strings;
pub mod superblock;

#[cfg(test)]
mod test_image;

pub use bitmap::*;
pub use block::*;
pub use block_group::*;
pub use directory::*;
pub use error::*;
pub use file_system::*;
pub use geometry::*;
pub use indirect::*;
pub use inode::*;
pub use superblock::*;
