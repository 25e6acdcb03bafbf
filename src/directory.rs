//! The frame directory: a linked chain of 512-byte blocks which map each
//! frame (matrix) to the range of blocks holding its subheader and pixel
//! data.
//!
//! A directory block holds 32 columns of four big endian 32-bit
//! integers. Column 0 is the block's control column:
//!
//! | row | meaning |
//! |-----|---------|
//! | 0   | number of free entries in the block |
//! | 1   | 1-based number of the next directory block; 2 marks the last block |
//! | 2   | 1-based number of the previous directory block |
//! | 3   | number of entries used in the block |
//!
//! Columns 1 to 31 are entries: matrix id, first block (the subheader),
//! last block of the pixel data, and a status flag. The chain is not
//! stored in frame order, so entries are sorted by matrix id once the
//! whole chain has been read.

use crate::error::{EcatError, Result};
use crate::util::{block_offset, blocks_for, BlockCursor, BLOCK_SIZE};
use byteordered::ByteOrdered;
use std::collections::HashSet;
use std::convert::TryFrom;
use std::io::{Read, Seek, Write};
use std::ops::Range;
use tracing::debug;

/// Number of entries which fit in one directory block.
pub const ENTRIES_PER_BLOCK: usize = 31;

/// Block number of the first directory block, right after the main
/// header.
pub const FIRST_DIRECTORY_BLOCK: i32 = 2;

/// Next-block pointer which marks the last block of the chain. The chain
/// is circular: the last block points back to the first.
pub const TERMINAL_POINTER: i32 = FIRST_DIRECTORY_BLOCK;

/// Status flag of an entry whose matrix is present and readable.
pub const STATUS_READ_WRITE: i32 = 1;

/// The identifier of a matrix: its frame, plane, gate, data and bed
/// numbers packed into 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixId {
    /// Frame number, 1-based
    pub frame: u16,
    /// Plane number
    pub plane: u16,
    /// Gate number
    pub gate: u8,
    /// Data number
    pub data: u8,
    /// Bed position number
    pub bed: u8,
}

impl MatrixId {
    /// The identifier of a whole-volume frame, as written for 3D image
    /// files: plane 1, gate 1, data 0, bed 0.
    pub fn volume(frame: u16) -> Self {
        MatrixId {
            frame,
            plane: 1,
            gate: 1,
            data: 0,
            bed: 0,
        }
    }

    /// Pack the identifier into its stored form.
    pub fn encode(&self) -> i32 {
        let frame = u32::from(self.frame);
        let plane = u32::from(self.plane);
        let gate = u32::from(self.gate);
        let data = u32::from(self.data);
        let bed = u32::from(self.bed);
        let id = (frame & 0x1FF)
            | ((bed & 0xF) << 12)
            | ((plane & 0xFF) << 16)
            | ((plane & 0x300) << 1)
            | ((data & 0x3) << 30)
            | ((data & 0x4) << 9)
            | ((gate & 0x3F) << 24);
        id as i32
    }

    /// Unpack a stored identifier.
    pub fn decode(id: i32) -> Self {
        let id = id as u32;
        MatrixId {
            frame: (id & 0x1FF) as u16,
            plane: (((id >> 16) & 0xFF) | ((id >> 1) & 0x300)) as u16,
            gate: ((id >> 24) & 0x3F) as u8,
            data: (((id >> 30) & 0x3) | ((id >> 9) & 0x4)) as u8,
            bed: ((id >> 12) & 0xF) as u8,
        }
    }
}

/// One directory entry, locating the blocks of one matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectoryEntry {
    /// Packed matrix identifier, also the frame ordering key
    pub matrix_id: i32,
    /// 1-based number of the block holding the subheader
    pub start_block: i32,
    /// 1-based number of the last block of the pixel data
    pub end_block: i32,
    /// Status flag
    pub status: i32,
}

impl DirectoryEntry {
    fn from_column(column: [i32; 4]) -> Self {
        DirectoryEntry {
            matrix_id: column[0],
            start_block: column[1],
            end_block: column[2],
            status: column[3],
        }
    }

    fn to_column(&self) -> [i32; 4] {
        [self.matrix_id, self.start_block, self.end_block, self.status]
    }

    /// The unpacked matrix identifier.
    pub fn matrix(&self) -> MatrixId {
        MatrixId::decode(self.matrix_id)
    }

    /// Byte offset of the matrix's subheader.
    pub fn subheader_offset(&self) -> Result<u64> {
        block_offset(self.start_block)
    }

    /// Byte range of the matrix's pixel data, from the block after the
    /// subheader to the end of `end_block`.
    pub fn pixel_range(&self) -> Result<Range<u64>> {
        if self.end_block < self.start_block {
            return Err(EcatError::InvalidDirectory(format!(
                "matrix {:#x} ends at block {} before it starts at block {}",
                self.matrix_id, self.end_block, self.start_block
            )));
        }
        let start = block_offset(self.start_block)? + BLOCK_SIZE as u64;
        let end = block_offset(self.end_block)? + BLOCK_SIZE as u64;
        Ok(start..end)
    }
}

/// One 512-byte directory block, as 32 columns of 4 integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryBlock {
    columns: [[i32; 4]; 32],
}

impl Default for DirectoryBlock {
    fn default() -> Self {
        DirectoryBlock {
            columns: [[0; 4]; 32],
        }
    }
}

impl DirectoryBlock {
    /// Create a block holding the given entries, with its control column
    /// pointing to `next` and `previous`.
    ///
    /// # Errors
    ///
    /// - `EcatError::InvalidDirectory` if more than 31 entries are given.
    pub fn new(entries: &[DirectoryEntry], next: i32, previous: i32) -> Result<Self> {
        if entries.len() > ENTRIES_PER_BLOCK {
            return Err(EcatError::InvalidDirectory(format!(
                "{} entries do not fit in one block",
                entries.len()
            )));
        }
        let mut block = DirectoryBlock::default();
        let used = entries.len() as i32;
        block.columns[0] = [ENTRIES_PER_BLOCK as i32 - used, next, previous, used];
        for (column, entry) in block.columns[1..].iter_mut().zip(entries) {
            *column = entry.to_column();
        }
        Ok(block)
    }

    /// Decode a block from its stored bytes.
    pub fn from_bytes(bytes: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let mut src = ByteOrdered::be(&bytes[..]);
        let mut block = DirectoryBlock::default();
        for column in block.columns.iter_mut() {
            for v in column.iter_mut() {
                *v = src.read_i32()?;
            }
        }
        Ok(block)
    }

    /// Encode the block into its stored bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = ByteOrdered::be(Vec::with_capacity(BLOCK_SIZE));
        for v in self.columns.iter().flat_map(|c| c.iter()) {
            out.write_i32(*v)?;
        }
        Ok(out.into_inner())
    }

    /// Number of entries in use, from the control column.
    pub fn used(&self) -> i32 {
        self.columns[0][3]
    }

    /// Pointer to the next block, from the control column.
    pub fn next(&self) -> i32 {
        self.columns[0][1]
    }

    /// Pointer to the previous block, from the control column.
    pub fn previous(&self) -> i32 {
        self.columns[0][2]
    }

    /// The entries in use, in stored order. The used count is clamped to
    /// the block's capacity.
    pub fn entries(&self) -> impl Iterator<Item = DirectoryEntry> + '_ {
        let used = (self.used().max(0) as usize).min(ENTRIES_PER_BLOCK);
        self.columns[1..=used]
            .iter()
            .map(|c| DirectoryEntry::from_column(*c))
    }

    /// Write the block at the given 1-based block number.
    pub fn write_at<W>(&self, dest: &mut W, block: i32) -> Result<()>
    where
        W: Write + Seek,
    {
        let mut cursor = BlockCursor::new(dest);
        cursor.seek_block(block)?;
        cursor.write_bytes(&self.to_bytes()?)?;
        Ok(())
    }
}

/// The entries of a directory chain, sorted by matrix id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryTable {
    entries: Vec<DirectoryEntry>,
}

impl DirectoryTable {
    /// Create a table from entries in any order.
    pub fn from_entries(mut entries: Vec<DirectoryEntry>) -> Self {
        entries.sort_by_key(|e| e.matrix_id);
        DirectoryTable { entries }
    }

    /// Collect the entries of the given blocks.
    pub fn from_blocks(blocks: &[DirectoryBlock]) -> Self {
        Self::from_entries(blocks.iter().flat_map(DirectoryBlock::entries).collect())
    }

    /// The sorted entries.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Iterate over the sorted entries.
    pub fn iter(&self) -> ::std::slice::Iter<DirectoryEntry> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a DirectoryTable {
    type Item = &'a DirectoryEntry;
    type IntoIter = ::std::slice::Iter<'a, DirectoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Read the directory chain whose first block starts at `offset`.
///
/// Blocks are followed until a block with no used entries, or a block
/// whose next pointer is the terminal marker. The collected entries are
/// sorted by matrix id.
///
/// # Errors
///
/// - `EcatError::DirectoryCycle` if a block is visited twice.
/// - `EcatError::InvalidDirectory` if a block pointer is not positive or
/// a block claims more entries than it can hold.
/// - `EcatError::Io` if the chain leads past the end of the source.
pub fn read_directory<S>(source: &mut S, offset: u64) -> Result<DirectoryTable>
where
    S: Read + Seek,
{
    let mut cursor = BlockCursor::new(source);
    let mut entries = Vec::new();
    let mut visited = HashSet::new();
    let _ = visited.insert(offset);
    let mut offset = offset;

    loop {
        cursor.seek_to(offset)?;
        let block = DirectoryBlock::from_bytes(&cursor.read_block()?)?;
        let used = block.used();
        debug!(offset, used, next = block.next(), "directory block");
        if used <= 0 {
            break;
        }
        if used as usize > ENTRIES_PER_BLOCK {
            return Err(EcatError::InvalidDirectory(format!(
                "block at byte {} claims {} entries",
                offset, used
            )));
        }
        entries.extend(block.entries());

        let next = block.next();
        if next == TERMINAL_POINTER {
            break;
        }
        offset = block_offset(next)?;
        if !visited.insert(offset) {
            return Err(EcatError::DirectoryCycle(next));
        }
    }

    Ok(DirectoryTable::from_entries(entries))
}

/// Lay out the directory of a file with `frame_count` frames of
/// `pixel_dims` pixels, each `pixel_byte_width` bytes wide.
///
/// Directory blocks are placed back to back from block 2. Frames follow,
/// each taking one subheader block and as many blocks as its pixel data
/// needs, with no gaps. Frame `n` (1-based) gets the matrix id of
/// `MatrixId::volume(n)`.
///
/// # Errors
///
/// - `EcatError::InvalidDirectory` if the layout does not fit in the
/// format's 32-bit block numbers or 9-bit frame numbers.
pub fn build_directory(
    frame_count: usize,
    pixel_dims: [usize; 3],
    pixel_byte_width: usize,
) -> Result<Vec<DirectoryBlock>> {
    if frame_count > 0x1FF {
        return Err(EcatError::InvalidDirectory(format!(
            "{} frames exceed the matrix id frame limit",
            frame_count
        )));
    }
    let nbytes = pixel_dims.iter().product::<usize>() * pixel_byte_width;
    let pixel_blocks = blocks_for(nbytes);
    let block_count = ((frame_count + ENTRIES_PER_BLOCK - 1) / ENTRIES_PER_BLOCK).max(1);

    let too_large =
        || EcatError::InvalidDirectory("file layout exceeds 32-bit block numbers".to_string());
    let pixel_blocks = i32::try_from(pixel_blocks).map_err(|_| too_large())?;
    let mut next_start = FIRST_DIRECTORY_BLOCK + block_count as i32;

    let mut blocks = Vec::with_capacity(block_count);
    for b in 0..block_count {
        let first_frame = b * ENTRIES_PER_BLOCK;
        let last_frame = (first_frame + ENTRIES_PER_BLOCK).min(frame_count);
        let mut entries = Vec::with_capacity(last_frame - first_frame);
        for frame in first_frame..last_frame {
            let start_block = next_start;
            let end_block = start_block.checked_add(pixel_blocks).ok_or_else(too_large)?;
            entries.push(DirectoryEntry {
                matrix_id: MatrixId::volume(frame as u16 + 1).encode(),
                start_block,
                end_block,
                status: STATUS_READ_WRITE,
            });
            next_start = end_block.checked_add(1).ok_or_else(too_large)?;
        }

        let this_block = FIRST_DIRECTORY_BLOCK + b as i32;
        let next = if b + 1 == block_count {
            TERMINAL_POINTER
        } else {
            this_block + 1
        };
        let previous = if b == 0 { 0 } else { this_block - 1 };
        blocks.push(DirectoryBlock::new(&entries, next, previous)?);
    }
    Ok(blocks)
}

/// Write directory blocks back to back, starting at block 2, as laid out
/// by `build_directory`.
pub fn write_directory<W>(dest: &mut W, blocks: &[DirectoryBlock]) -> Result<()>
where
    W: Write + Seek,
{
    for (i, block) in blocks.iter().enumerate() {
        block.write_at(dest, FIRST_DIRECTORY_BLOCK + i as i32)?;
    }
    Ok(())
}
