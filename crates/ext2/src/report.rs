//! Report records describing an image, one per line.
//!
//! ```text
//! SUPERBLOCK,<blocks>,<inodes>,<block size>,<inode size>,<blocks/group>,<inodes/group>,<first inode>
//! GROUP,<group>,<blocks>,<inodes>,<free blocks>,<free inodes>,<block bitmap>,<inode bitmap>,<inode table>
//! BFREE,<block>
//! IFREE,<inode>
//! INODE,<inode>,<f|d|s|?>,<mode>,<uid>,<gid>,<links>,<ctime>,<mtime>,<atime>,<size>,<sectors>[,<block>...]
//! DIRENT,<parent>,<offset>,<inode>,<rec_len>,<name_len>,'<name>'
//! INDIRECT,<inode>,<level>,<logical block>,<indirect block>,<referenced block>
//! ```

use core::fmt;

use chrono::{DateTime, Utc};

use crate::block::BlockDeviceDriver;
use crate::directory::DirectoryEntry;
use crate::file_system::FileSystem;
use crate::indirect::IndirectReference;
use crate::inode::{FileType, Inode};
use crate::superblock::{BlockAddress, BlockGroupIndex, InodeNumber, Revision};
use crate::{Ext2Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Superblock {
        blocks_count: u32,
        inodes_count: u32,
        block_size: usize,
        inode_size: u16,
        blocks_per_group: u32,
        inodes_per_group: u32,
        first_inode: InodeNumber,
    },
    Group {
        group: BlockGroupIndex,
        blocks: u32,
        inodes: u32,
        free_blocks: u16,
        free_inodes: u16,
        block_bitmap: BlockAddress,
        inode_bitmap: BlockAddress,
        inode_table: BlockAddress,
    },
    FreeBlock(BlockAddress),
    FreeInode(InodeNumber),
    Inode {
        number: InodeNumber,
        file_type: FileType,
        permissions: u16,
        uid: u16,
        gid: u16,
        links_count: u16,
        ctime: Timestamp,
        mtime: Timestamp,
        atime: Timestamp,
        size: u64,
        sectors: u32,
        /// Only present when the pointers address data blocks.
        block_pointers: Option<[BlockAddress; 15]>,
    },
    DirectoryEntry {
        parent: InodeNumber,
        entry: DirectoryEntry,
    },
    Indirect {
        inode: InodeNumber,
        reference: IndirectReference,
    },
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Superblock {
                blocks_count,
                inodes_count,
                block_size,
                inode_size,
                blocks_per_group,
                inodes_per_group,
                first_inode,
            } => write!(
                f,
                "SUPERBLOCK,{blocks_count},{inodes_count},{block_size},{inode_size},{blocks_per_group},{inodes_per_group},{first_inode}"
            ),
            Self::Group {
                group,
                blocks,
                inodes,
                free_blocks,
                free_inodes,
                block_bitmap,
                inode_bitmap,
                inode_table,
            } => write!(
                f,
                "GROUP,{},{blocks},{inodes},{free_blocks},{free_inodes},{block_bitmap},{inode_bitmap},{inode_table}",
                group.0
            ),
            Self::FreeBlock(block) => write!(f, "BFREE,{block}"),
            Self::FreeInode(inode) => write!(f, "IFREE,{inode}"),
            Self::Inode {
                number,
                file_type,
                permissions,
                uid,
                gid,
                links_count,
                ctime,
                mtime,
                atime,
                size,
                sectors,
                block_pointers,
            } => {
                write!(
                    f,
                    "INODE,{number},{},{permissions:o},{uid},{gid},{links_count},{ctime},{mtime},{atime},{size},{sectors}",
                    type_char(*file_type)
                )?;
                for block in block_pointers.iter().flatten() {
                    write!(f, ",{block}")?;
                }
                Ok(())
            }
            Self::DirectoryEntry { parent, entry } => write!(
                f,
                "DIRENT,{parent},{},{},{},{},'{}'",
                entry.logical_offset,
                entry.inode,
                entry.rec_len,
                entry.name_len,
                entry.name_lossy()
            ),
            Self::Indirect { inode, reference } => write!(
                f,
                "INDIRECT,{inode},{},{},{},{}",
                reference.level,
                reference.logical_offset,
                reference.indirect_block,
                reference.referenced_block
            ),
        }
    }
}

fn type_char(file_type: FileType) -> char {
    match file_type {
        FileType::RegularFile => 'f',
        FileType::Directory => 'd',
        FileType::SymbolicLink => 's',
        FileType::Other => '?',
    }
}

/// Seconds since the epoch, printed as `mm/dd/yy HH:MM:SS` GMT.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timestamp(pub u32);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp(i64::from(self.0), 0) {
            Some(time) => write!(f, "{}", time.format("%m/%d/%y %H:%M:%S")),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Record {
    fn inode(number: InodeNumber, inode: &Inode, revision: Revision) -> Self {
        let has_blocks = inode.has_data_blocks(revision);
        Self::Inode {
            number,
            file_type: inode.file_type(),
            permissions: inode.permissions(),
            uid: inode.uid,
            gid: inode.gid,
            links_count: inode.links_count,
            ctime: Timestamp(inode.ctime),
            mtime: Timestamp(inode.mtime),
            atime: Timestamp(inode.atime),
            size: inode.size(revision),
            sectors: inode.blocks,
            block_pointers: has_blocks.then(|| inode.block_pointers()),
        }
    }
}

/// Outcome of a report that ran to completion.
#[derive(Debug, Default)]
pub struct ReportSummary {
    pub records: usize,
    /// Inodes, directories or pointers that were left out because they're
    /// corrupt.
    pub skipped: Vec<Ext2Error>,
}

impl ReportSummary {
    /// Swallows per-entity errors, remembering them. Anything else ends the
    /// report.
    fn skip_or_fail(&mut self, err: Ext2Error) -> Result<()> {
        if !err.is_per_entity() {
            return Err(err);
        }
        log::warn!("skipping: {err}");
        self.skipped.push(err);
        Ok(())
    }
}

/// Feeds every record describing `fs` to `sink`, in report order.
///
/// Each record is complete when it reaches the sink. If this returns an
/// error, the records already emitted are a prefix of the full report.
pub fn generate<D: BlockDeviceDriver>(
    fs: &mut FileSystem<D>,
    mut sink: impl FnMut(Record),
) -> Result<ReportSummary> {
    let mut summary = ReportSummary::default();
    let mut emit = |record: Record, summary: &mut ReportSummary| {
        summary.records += 1;
        sink(record);
    };

    let geometry = fs.geometry().clone();
    emit(
        Record::Superblock {
            blocks_count: geometry.blocks_count,
            inodes_count: geometry.inodes_count,
            block_size: geometry.block_size.bytes(),
            inode_size: geometry.inode_size,
            blocks_per_group: geometry.blocks_per_group,
            inodes_per_group: geometry.inodes_per_group,
            first_inode: geometry.first_inode,
        },
        &mut summary,
    );

    let groups = fs.groups().clone();
    for (group, descriptor) in groups.iter() {
        emit(
            Record::Group {
                group,
                blocks: groups.blocks_in_group(group, &geometry),
                inodes: groups.inodes_in_group(group, &geometry),
                free_blocks: descriptor.free_blocks_count,
                free_inodes: descriptor.free_inodes_count,
                block_bitmap: descriptor.block_bitmap,
                inode_bitmap: descriptor.inode_bitmap,
                inode_table: descriptor.inode_table,
            },
            &mut summary,
        );
    }

    for (group, _) in groups.iter() {
        for block in fs.free_blocks(group)? {
            emit(Record::FreeBlock(block), &mut summary);
        }
    }
    for (group, _) in groups.iter() {
        for inode in fs.free_inodes(group)? {
            emit(Record::FreeInode(inode), &mut summary);
        }
    }

    // Directory and indirect records follow all inode records, so the
    // inodes they need are kept from the first pass.
    let mut allocated = Vec::new();
    for (group, _) in groups.iter() {
        for item in fs.inodes(group)? {
            let (number, inode) = match item {
                Ok(item) => item,
                Err(err) => {
                    summary.skip_or_fail(err)?;
                    continue;
                }
            };
            log::trace!("reporting inode {number}");
            emit(Record::inode(number, &inode, geometry.revision), &mut summary);
            allocated.push((number, inode));
        }
    }

    for (number, inode) in allocated.iter().filter(|(_, inode)| inode.is_dir()) {
        for entry in fs.directory_entries(*number, inode)? {
            match entry {
                Ok(entry) => emit(
                    Record::DirectoryEntry {
                        parent: *number,
                        entry,
                    },
                    &mut summary,
                ),
                Err(err) => summary.skip_or_fail(err)?,
            }
        }
    }

    let with_blocks = allocated
        .iter()
        .filter(|(_, inode)| inode.has_data_blocks(geometry.revision));
    for (number, inode) in with_blocks {
        for reference in fs.indirect_references(inode) {
            match reference {
                Ok(reference) => emit(
                    Record::Indirect {
                        inode: *number,
                        reference,
                    },
                    &mut summary,
                ),
                Err(err) => summary.skip_or_fail(err)?,
            }
        }
    }

    log::debug!(
        "report done: {} records, {} skipped",
        summary.records,
        summary.skipped.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryDevice;
    use crate::test_image::TestImage;

    fn report(image: TestImage) -> (Vec<String>, ReportSummary) {
        let mut fs = FileSystem::open(MemoryDevice::new(image.into_bytes())).unwrap();
        let mut lines = Vec::new();
        let summary = generate(&mut fs, |record| lines.push(record.to_string())).unwrap();
        (lines, summary)
    }

    fn lines_starting_with<'a>(lines: &'a [String], prefix: &str) -> Vec<&'a str> {
        lines
            .iter()
            .filter(|line| line.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn timestamps_are_gmt() {
        assert_eq!(Timestamp(0).to_string(), "01/01/70 00:00:00");
        assert_eq!(Timestamp(TestImage::TIME).to_string(), "11/14/23 22:13:20");
        assert_eq!(Timestamp(951_782_400).to_string(), "02/29/00 00:00:00");
    }

    #[test]
    fn end_to_end_single_group() {
        let (lines, summary) = report(TestImage::new());
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.records, lines.len());

        assert_eq!(lines[0], "SUPERBLOCK,1024,128,1024,128,8192,128,11");
        assert_eq!(lines[1], "GROUP,0,1024,128,1000,116,3,4,5");
        assert_eq!(lines[2], "BFREE,24");
        assert_eq!(lines_starting_with(&lines, "BFREE,").len(), 1000);
        assert_eq!(lines_starting_with(&lines, "IFREE,").len(), 116);

        assert_eq!(
            lines_starting_with(&lines, "INODE,"),
            [
                "INODE,2,d,755,0,0,3,11/14/23 22:13:20,11/14/23 22:13:20,11/14/23 22:13:20,2048,4,21,22,0,0,0,0,0,0,0,0,0,0,0,0,0",
                "INODE,12,f,644,0,0,1,11/14/23 22:13:20,11/14/23 22:13:20,11/14/23 22:13:20,13,2,23,0,0,0,0,0,0,0,0,0,0,0,0,0,0",
            ]
        );
        assert_eq!(
            lines_starting_with(&lines, "DIRENT,"),
            [
                "DIRENT,2,0,2,12,1,'.'",
                "DIRENT,2,12,2,12,2,'..'",
                "DIRENT,2,24,12,1000,8,'file.txt'",
            ]
        );
        assert!(lines_starting_with(&lines, "INDIRECT,").is_empty());

        // Records come in report order.
        let first_inode = lines.iter().position(|l| l.starts_with("INODE,")).unwrap();
        let last_ifree = lines.iter().rposition(|l| l.starts_with("IFREE,")).unwrap();
        assert!(last_ifree < first_inode);
    }

    #[test]
    fn records_are_grouped_by_kind() {
        let mut image = TestImage::new();
        image.add_indirect_file();
        let (lines, _) = report(image);

        let mut sections: Vec<&str> = lines
            .iter()
            .map(|line| line.split(',').next().unwrap_or_default())
            .collect();
        sections.dedup();
        assert_eq!(
            sections,
            ["SUPERBLOCK", "GROUP", "BFREE", "IFREE", "INODE", "DIRENT", "INDIRECT"]
        );

        let tail: Vec<&str> = lines
            .iter()
            .skip_while(|line| !line.starts_with("INDIRECT,"))
            .map(String::as_str)
            .collect();
        assert_eq!(
            tail,
            [
                "INDIRECT,13,1,12,30,31",
                "INDIRECT,13,1,14,30,32",
                "INDIRECT,13,2,524,33,34",
                "INDIRECT,13,1,524,34,35",
            ]
        );
    }

    #[test]
    fn short_symlinks_have_no_block_list() {
        let mut image = TestImage::new();
        image.add_inode(InodeNumber(14), 0o120_777, |inode| inode.size_low = 4);
        let (lines, _) = report(image);
        assert_eq!(
            lines_starting_with(&lines, "INODE,14,"),
            ["INODE,14,s,777,0,0,1,11/14/23 22:13:20,11/14/23 22:13:20,11/14/23 22:13:20,4,0"]
        );
    }

    #[test]
    fn corrupt_directory_is_skipped() {
        let mut image = TestImage::new();
        image.update_inode(TestImage::ROOT, |inode| inode.size_low = 8192);
        let (lines, summary) = report(image);

        assert_eq!(summary.skipped.len(), 1);
        assert!(matches!(
            summary.skipped[0],
            Ext2Error::TruncatedDirectory { inode: 2, .. }
        ));
        // The rest of the report is still there.
        assert_eq!(lines_starting_with(&lines, "DIRENT,").len(), 3);
        assert_eq!(lines_starting_with(&lines, "INODE,12,").len(), 1);
    }

    #[test]
    fn out_of_range_pointer_is_skipped() {
        let mut image = TestImage::new();
        image.add_indirect_file();
        image.write_pointers(BlockAddress(30), &[31, 9999, 32]);
        let (lines, summary) = report(image);

        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(lines_starting_with(&lines, "INDIRECT,13,").len(), 4);
    }
}
