//! Block and inode allocation bitmaps.
//!
//! See <https://www.nongnu.org/ext2-doc/ext2.html#block-bitmap> and
//! <https://www.nongnu.org/ext2-doc/ext2.html#inode-bitmap>.
//!
//! Each bit represent the current state of an entry within a block group,
//! where 1 means "used" and 0 "free/available". The first entry is represented
//! by bit 0 of byte 0, the second by bit 1 of byte 0. The 8th entry is
//! represented by bit 7 (most significant bit) of byte 0 while the 9th entry is
//! represented by bit 0 (least significant bit) of byte 1.
//!
//! Entries are numbered from 1 here, the same way inode numbers are.

/// A bitmap block, or the part of it that is meaningful.
#[derive(Debug, Clone, Copy)]
pub struct Bitmap<'a> {
    bytes: &'a [u8],
    bit_count: u32,
}

impl<'a> Bitmap<'a> {
    pub fn new(bytes: &'a [u8], bit_count: u32) -> Self {
        Self { bytes, bit_count }
    }

    /// Whether the 1-based `entry` is marked used. `None` outside the bitmap.
    pub fn is_used(&self, entry: u32) -> Option<bool> {
        if entry == 0 || entry > self.bit_count {
            return None;
        }
        bit_at(self.bytes, entry - 1)
    }
}

fn bit_at(bytes: &[u8], bit_index: u32) -> Option<bool> {
    let byte = bytes.get((bit_index / 8) as usize)?;
    let mask = 1 << (bit_index % 8);
    Some(byte & mask != 0)
}

/// Lazily enumerates the 1-based free entries of `bitmap`, in ascending order.
/// Bits at or past `bit_count` are never reported, even when the final byte
/// carries them.
pub fn scan_free<B: AsRef<[u8]>>(bitmap: B, bit_count: u32) -> BitmapEntries<B> {
    BitmapEntries::new(bitmap, bit_count, false)
}

/// Like [`scan_free`], but enumerates entries whose bit is set.
pub fn scan_used<B: AsRef<[u8]>>(bitmap: B, bit_count: u32) -> BitmapEntries<B> {
    BitmapEntries::new(bitmap, bit_count, true)
}

#[derive(Debug, Clone)]
pub struct BitmapEntries<B> {
    bitmap: B,
    limit: u32,
    next_bit: u32,
    want_set: bool,
}

impl<B: AsRef<[u8]>> BitmapEntries<B> {
    fn new(bitmap: B, bit_count: u32, want_set: bool) -> Self {
        let available = u32::try_from(bitmap.as_ref().len())
            .unwrap_or(u32::MAX)
            .saturating_mul(8);
        Self {
            bitmap,
            limit: bit_count.min(available),
            next_bit: 0,
            want_set,
        }
    }
}

impl<B: AsRef<[u8]>> Iterator for BitmapEntries<B> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let bytes = self.bitmap.as_ref();
        let skip_byte = if self.want_set { 0x00 } else { 0xFF };

        while self.next_bit < self.limit {
            let bit_index = self.next_bit;

            // Shortcut: a whole byte with nothing we're looking for.
            if bit_index % 8 == 0 && bytes[(bit_index / 8) as usize] == skip_byte {
                self.next_bit += 8;
                continue;
            }

            self.next_bit += 1;
            if bit_at(bytes, bit_index) == Some(self.want_set) {
                return Some(bit_index + 1);
            }
        }
        None
    }
}
