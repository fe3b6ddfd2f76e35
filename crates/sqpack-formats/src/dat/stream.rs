//! Seekable reader over one packed file
//!
//! Reads decompress only the blocks that overlap the requested range. The
//! most recently decoded block is kept so sequential small reads do not
//! inflate the same block twice. The block map is resolved on first use and
//! shared between clones; position and the decoded block are per stream.

use super::block::decode_block;
use super::layout::BlockLayout;
use super::source::ReadAt;
use crate::error::{Result, SqPackError};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// Largest buffer `read_all` reserves before any block is decoded
const READ_ALL_RESERVE: u64 = 16 * 1024 * 1024;

/// Bytes copied per step of `read_all`
const READ_ALL_CHUNK: usize = 64 * 1024;

/// Block-compressed file stream
pub struct PackedFileStream<S> {
    source: S,
    entry_offset: u64,
    layout: Arc<OnceLock<Arc<BlockLayout>>>,
    position: u64,
    current_block: Option<usize>,
    block_data: Vec<u8>,
    raw: Vec<u8>,
}

impl<S: ReadAt> PackedFileStream<S> {
    /// Stream over the packed file at `entry_offset`; the layout is read lazily
    pub fn new(source: S, entry_offset: u64) -> Self {
        Self::from_cell(source, entry_offset, Arc::new(OnceLock::new()))
    }

    /// Stream with an already resolved layout
    pub fn with_layout(source: S, entry_offset: u64, layout: Arc<BlockLayout>) -> Self {
        Self::from_cell(source, entry_offset, Arc::new(OnceLock::from(layout)))
    }

    fn from_cell(source: S, entry_offset: u64, layout: Arc<OnceLock<Arc<BlockLayout>>>) -> Self {
        Self {
            source,
            entry_offset,
            layout,
            position: 0,
            current_block: None,
            block_data: Vec::new(),
            raw: Vec::new(),
        }
    }

    /// Block map, resolving it on first call.
    ///
    /// Two clones racing here may both resolve; one result is kept and the
    /// two are identical.
    pub fn layout(&self) -> Result<Arc<BlockLayout>> {
        if let Some(layout) = self.layout.get() {
            return Ok(Arc::clone(layout));
        }
        let resolved = Arc::new(BlockLayout::resolve(&self.source, self.entry_offset)?);
        Ok(Arc::clone(self.layout.get_or_init(|| resolved)))
    }

    /// Whether this stream or a clone sharing its layout has resolved it
    pub fn layout_resolved(&self) -> bool {
        self.layout.get().is_some()
    }

    /// Declared logical size
    pub fn len(&self) -> Result<u64> {
        Ok(self.layout()?.len())
    }

    /// Declared logical size is zero
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Current logical position
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Offset of the packed file in its dat
    pub const fn entry_offset(&self) -> u64 {
        self.entry_offset
    }

    /// Read up to `buf.len()` bytes from `offset`.
    ///
    /// Returns the number of bytes copied, which is short only at the end of
    /// the file. The stream position ends up after the copied bytes.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.position = offset;
        self.fill(buf)
    }

    /// Read the whole file from the start.
    ///
    /// The buffer grows as blocks decode, so a corrupt declared size fails on
    /// the first bad block instead of allocating up front.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let len = self.len()?;
        let mut data = Vec::with_capacity(len.min(READ_ALL_RESERVE) as usize);
        let mut chunk = vec![0u8; READ_ALL_CHUNK];
        self.position = 0;
        loop {
            let read = self.fill(&mut chunk)?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..read]);
        }
        Ok(data)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let layout = self.layout()?;
        let len = layout.len();
        if buf.is_empty() || self.position >= len {
            return Ok(0);
        }

        let want = (len - self.position).min(buf.len() as u64) as usize;
        let mut done = 0;

        while done < want {
            let pos = self.position;
            let out = &mut buf[done..want];
            let prefix = layout.prefix();

            let copied = if pos < prefix.len() as u64 {
                let start = pos as usize;
                let n = out.len().min(prefix.len() - start);
                out[..n].copy_from_slice(&prefix[start..start + n]);
                n
            } else if let Some(index) = layout.block_containing(pos) {
                self.load_block(&layout, index)?;

                let offsets = layout.request_offsets();
                let within = (pos - offsets[index]) as usize;
                let span = out.len().min((offsets[index + 1] - pos) as usize);
                let available = self.block_data.len().saturating_sub(within).min(span);
                if available > 0 {
                    out[..available].copy_from_slice(&self.block_data[within..within + available]);
                }
                // Declared range longer than the decoded block
                out[available..span].fill(0);
                span
            } else {
                // No block covers this position: either the file has none, or
                // the position sits between the prefix and the first block.
                let next = layout
                    .request_offsets()
                    .first()
                    .copied()
                    .filter(|&start| start > pos)
                    .unwrap_or(len);
                let n = out.len().min((next - pos) as usize);
                out[..n].fill(0);
                n
            };

            self.position += copied as u64;
            done += copied;
        }

        Ok(done)
    }

    fn load_block(&mut self, layout: &BlockLayout, index: usize) -> Result<()> {
        if self.current_block == Some(index) {
            return Ok(());
        }
        self.current_block = None;

        let offset = layout.block_offsets()[index];
        let size = layout.block_sizes()[index] as usize;
        self.raw.resize(size, 0);
        self.source.read_exact_at(offset, &mut self.raw)?;
        decode_block(&self.raw, offset, &mut self.block_data)?;

        trace!(
            "Decoded block {} at 0x{:X} ({} bytes)",
            index,
            offset,
            self.block_data.len()
        );
        self.current_block = Some(index);
        Ok(())
    }
}

impl<S: Clone> Clone for PackedFileStream<S> {
    /// Shares the source and the resolved layout; the decoded block is not copied.
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            entry_offset: self.entry_offset,
            layout: Arc::clone(&self.layout),
            position: self.position,
            current_block: None,
            block_data: Vec::new(),
            raw: Vec::new(),
        }
    }
}

impl<S: ReadAt> Read for PackedFileStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill(buf).map_err(SqPackError::into_io)
    }
}

impl<S: ReadAt> Seek for PackedFileStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self
                .len()
                .map_err(SqPackError::into_io)?
                .checked_add_signed(delta),
        };

        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn raw_block(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [16u32, 0, 32000, payload.len() as u32] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(payload);
        out.resize(out.len().next_multiple_of(128), 0);
        out
    }

    fn single_block_file(payload: &[u8], declared: u32) -> Vec<u8> {
        let block = raw_block(payload);
        let mut out = Vec::new();
        for v in [128u32, 2, declared, 0, 0, 1] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(block.len() as u16).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.resize(128, 0);
        out.extend_from_slice(&block);
        out
    }

    #[test]
    fn test_seek_and_read() {
        let payload: Vec<u8> = (0..100u8).collect();
        let data = single_block_file(&payload, 100);
        let mut stream = PackedFileStream::new(data.as_slice(), 0);

        assert_eq!(stream.seek(SeekFrom::End(-10)).unwrap(), 90);
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, &payload[90..]);

        assert!(stream.seek(SeekFrom::Current(-200)).is_err());
    }

    #[test]
    fn test_zero_fill_past_decoded_block() {
        let payload = [7u8; 40];
        let data = single_block_file(&payload, 64);
        let mut stream = PackedFileStream::new(data.as_slice(), 0);

        let all = stream.read_all().unwrap();
        assert_eq!(all.len(), 64);
        assert_eq!(&all[..40], &payload);
        assert!(all[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clone_shares_layout() {
        let payload = [1u8; 32];
        let data = single_block_file(&payload, 32);
        let stream = PackedFileStream::new(data.as_slice(), 0);
        let first = stream.layout().unwrap();

        let mut clone = stream.clone();
        assert!(Arc::ptr_eq(&first, &clone.layout().unwrap()));
        assert_eq!(clone.read_all().unwrap(), payload);
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let data = single_block_file(&[3u8; 16], 16);
        let mut stream = PackedFileStream::new(data.as_slice(), 0);
        let mut buf = [0u8; 8];
        assert_eq!(stream.read_at(16, &mut buf).unwrap(), 0);
        assert_eq!(stream.read_at(1000, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_all_with_corrupt_size_fails_on_block() {
        let mut data = single_block_file(&[5u8; 64], u32::MAX);
        data.truncate(140);
        let mut stream = PackedFileStream::new(data.as_slice(), 0);
        assert!(stream.read_all().is_err());
        assert_eq!(stream.position(), 0);
    }
}
