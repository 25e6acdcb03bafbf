//! Private utility module
use crate::error::{EcatError, Result};
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::path::Path;

/// Size of a record block. Every structure in the file is aligned to it.
pub const BLOCK_SIZE: usize = 512;

/// Byte offset at which the given 1-based block number starts.
pub fn block_offset(block: i32) -> Result<u64> {
    if block < 1 {
        return Err(EcatError::InvalidDirectory(format!(
            "block number {} is not positive",
            block
        )));
    }
    Ok(BLOCK_SIZE as u64 * (block as u64 - 1))
}

/// Number of whole blocks needed to hold the given number of bytes.
pub fn blocks_for(nbytes: usize) -> usize {
    (nbytes + BLOCK_SIZE - 1) / BLOCK_SIZE
}

/// Round a byte offset up to the start of the next block.
pub fn align_to_block(offset: u64) -> u64 {
    let block = BLOCK_SIZE as u64;
    (offset + block - 1) / block * block
}

/// A cursor over a seekable byte stream, addressed by absolute byte
/// offsets. Reads and writes advance the tracked position.
#[derive(Debug)]
pub struct BlockCursor<S> {
    inner: S,
    pos: u64,
}

impl<S: Seek> BlockCursor<S> {
    /// Wrap the given stream. The position is assumed to be unknown until
    /// the first `seek_to`.
    pub fn new(inner: S) -> Self {
        BlockCursor { inner, pos: 0 }
    }

    /// Move to the given absolute byte offset.
    pub fn seek_to(&mut self, offset: u64) -> IoResult<()> {
        self.pos = self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Move to the start of the given 1-based block.
    pub fn seek_block(&mut self, block: i32) -> Result<()> {
        self.seek_to(block_offset(block)?)?;
        Ok(())
    }

    /// The current absolute byte offset.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Recover the wrapped stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read + Seek> BlockCursor<S> {
    /// Read exactly `n` bytes and advance. A short read is an error.
    ///
    /// The buffer grows as data arrives, so a length taken from a corrupt
    /// header cannot allocate more than the source holds.
    pub fn read_bytes(&mut self, n: usize) -> IoResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(n.min(1 << 20));
        let read = (&mut self.inner).take(n as u64).read_to_end(&mut buf)?;
        self.pos += read as u64;
        if read < n {
            return Err(IoError::new(
                ErrorKind::UnexpectedEof,
                format!("expected {} bytes, found {}", n, read),
            ));
        }
        Ok(buf)
    }

    /// Read one whole block and advance.
    pub fn read_block(&mut self) -> IoResult<[u8; BLOCK_SIZE]> {
        let mut buf = [0u8; BLOCK_SIZE];
        self.inner.read_exact(&mut buf)?;
        self.pos += BLOCK_SIZE as u64;
        Ok(buf)
    }
}

impl<S: Write + Seek> BlockCursor<S> {
    /// Write all of the given bytes and advance.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> IoResult<()> {
        self.inner.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    /// Write zeros up to the start of the next block, if not already there.
    pub fn pad_to_block(&mut self) -> IoResult<()> {
        let end = align_to_block(self.pos);
        let padding = vec![0u8; (end - self.pos) as usize];
        self.write_bytes(&padding)
    }
}

pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::{align_to_block, block_offset, blocks_for, is_gz_file, BlockCursor};
    use std::io::Cursor;

    #[test]
    fn block_arithmetic() {
        assert_eq!(block_offset(1).unwrap(), 0);
        assert_eq!(block_offset(2).unwrap(), 512);
        assert_eq!(block_offset(10).unwrap(), 4608);
        assert!(block_offset(0).is_err());
        assert!(block_offset(-3).is_err());

        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(512), 1);
        assert_eq!(blocks_for(513), 2);
        assert_eq!(blocks_for(4 * 4 * 4 * 2), 1);

        assert_eq!(align_to_block(0), 0);
        assert_eq!(align_to_block(1), 512);
        assert_eq!(align_to_block(512), 512);
        assert_eq!(align_to_block(1000), 1024);
    }

    #[test]
    fn cursor_tracks_position() {
        let data: Vec<u8> = (0..=255u8).cycle().take(2048).collect();
        let mut cursor = BlockCursor::new(Cursor::new(data));
        cursor.seek_block(2).unwrap();
        assert_eq!(cursor.position(), 512);
        let bytes = cursor.read_bytes(4).unwrap();
        assert_eq!(bytes, vec![0, 1, 2, 3]);
        assert_eq!(cursor.position(), 516);
        let block = cursor.read_block().unwrap();
        assert_eq!(block[0], 4);
        assert_eq!(cursor.position(), 1028);

        cursor.seek_to(2040).unwrap();
        assert!(cursor.read_bytes(16).is_err());
    }

    #[test]
    fn cursor_pads_writes() {
        let mut cursor = BlockCursor::new(Cursor::new(Vec::new()));
        cursor.write_bytes(&[1, 2, 3]).unwrap();
        cursor.pad_to_block().unwrap();
        assert_eq!(cursor.position(), 512);
        cursor.pad_to_block().unwrap();
        assert_eq!(cursor.position(), 512);
        let data = cursor.into_inner().into_inner();
        assert_eq!(data.len(), 512);
        assert_eq!(&data[..4], &[1, 2, 3, 0]);
    }

    #[test]
    fn gz_paths() {
        assert!(is_gz_file("/path/to/something.v.gz"));
        assert!(is_gz_file("/path/to/something.gz"));
        assert!(!is_gz_file("/path/to/something.v"));
        assert!(!is_gz_file("/path/to/gz.v"));
    }
}
