//! The chunk offset cache and chunk decompression.

use crate::{DataStream, Error, SystemCompressedFile, INVALID_CHUNK_INDEX, NUM_CHUNK_OFFSETS};
use std::mem;
use sync_file::ReadAt;
use tracing::trace;

/// A bounded cache over the chunk offset table.
///
/// If `base_chunk_idx` is [`INVALID_CHUNK_INDEX`] the cache is empty.
/// Otherwise `entries[k]` holds the offset of chunk `base_chunk_idx + k`,
/// relative to `base_chunk_offset`, for a run of consecutive chunks; one
/// extra entry past the last cached chunk bounds it, so a chunk's stored
/// size is always `entries[k + 1] - entries[k]`.
///
/// Offsets in the file can exceed 32 bits, but the spread within one window
/// is at most `NUM_CHUNK_OFFSETS` chunks worth of data, so the relative
/// entries always fit in a `u32` regardless of the on-disk entry width.
pub(crate) struct OffsetWindow {
    pub(crate) base_chunk_idx: u64,
    pub(crate) base_chunk_offset: u64,
    pub(crate) entries: [u32; NUM_CHUNK_OFFSETS],
}

impl OffsetWindow {
    pub(crate) fn empty() -> Self {
        Self {
            base_chunk_idx: INVALID_CHUNK_INDEX,
            base_chunk_offset: 0,
            entries: [0; NUM_CHUNK_OFFSETS],
        }
    }
}

impl<S: DataStream> SystemCompressedFile<S> {
    /// The chunk table entry width: 4-byte entries unless the uncompressed
    /// size needs 8-byte ones.
    pub(crate) fn entry_shift(&self) -> u32 {
        if self.uncompressed_size <= u32::MAX as u64 {
            2
        } else {
            3
        }
    }

    /// Returns the physical offset and stored size of a chunk within the
    /// compressed stream.
    ///
    /// Getting the stored size of a chunk needs its offset and the next
    /// chunk's offset. Cached values are used when possible; otherwise a
    /// window of the chunk table is loaded, with some extra entries to keep
    /// the number of chunk table reads down.
    pub(crate) fn chunk_location(&mut self, chunk_idx: u64) -> Result<(u64, u32), Error> {
        debug_assert!(chunk_idx < self.num_chunks);

        if self.offsets.base_chunk_idx == INVALID_CHUNK_INDEX
            || chunk_idx < self.offsets.base_chunk_idx
            || chunk_idx + 1 >= self.offsets.base_chunk_idx + NUM_CHUNK_OFFSETS as u64
        {
            self.refill_offsets(chunk_idx)?;
        }

        let k = (chunk_idx - self.offsets.base_chunk_idx) as usize;
        let stored_size = self.offsets.entries[k + 1]
            .checked_sub(self.offsets.entries[k])
            .ok_or(Error::Corrupt("chunk offsets are not increasing"))?;
        let offset = self.offsets.base_chunk_offset + self.offsets.entries[k] as u64;
        Ok((offset, stored_size))
    }

    /// Reloads the offset window so that it starts at `start_chunk`.
    fn refill_offsets(&mut self, start_chunk: u64) -> Result<(), Error> {
        let entry_shift = self.entry_shift();
        let end_chunk =
            start_chunk + (NUM_CHUNK_OFFSETS as u64 - 1).min(self.num_chunks - start_chunk);

        // Entries exist in the file for chunks 1..num_chunks only; chunk 0
        // starts right behind the table. One extra entry is read to bound the
        // last cached chunk, unless end-of-stream bounds it.
        let mut num_entries = (end_chunk - start_chunk) as usize;
        let first_entry;
        if start_chunk == 0 {
            num_entries -= 1;
            first_entry = 0;
        } else {
            first_entry = start_chunk - 1;
        }
        if end_chunk != self.num_chunks {
            num_entries += 1;
        }

        trace!(
            start_chunk,
            end_chunk,
            num_entries,
            "refilling chunk offset window"
        );

        // The window stays invalid until it has been fully rebuilt.
        self.offsets.base_chunk_idx = INVALID_CHUNK_INDEX;

        let byte_len = num_entries << entry_shift;
        self.stream
            .read_exact_at(&mut self.temp[..byte_len], first_entry << entry_shift)?;
        let table = &self.temp[..byte_len];

        let entry_at = |index: usize| -> u64 {
            let width = 1usize << entry_shift;
            let raw = &table[index * width..(index + 1) * width];
            if entry_shift == 3 {
                // This unwrap() cannot fail; the slice width is fixed above.
                u64::from_le_bytes(raw.try_into().unwrap())
            } else {
                u32::from_le_bytes(raw.try_into().unwrap()) as u64
            }
        };

        let mut i = 0usize;
        let base_entry;
        if start_chunk == 0 {
            // Implicit first entry.
            self.offsets.entries[0] = 0;
            i = 1;
            base_entry = 0;
        } else {
            base_entry = entry_at(0);
        }

        for j in 0..num_entries {
            let rel = entry_at(j)
                .checked_sub(base_entry)
                .ok_or(Error::Corrupt("chunk offsets are not increasing"))?;
            self.offsets.entries[i] = u32::try_from(rel)
                .map_err(|_| Error::Corrupt("chunk offsets spread too far apart"))?;
            i += 1;
        }

        // Make the offsets physical: entries in the file are relative to the
        // end of the chunk table, behind which the payloads start.
        let base_chunk_offset = base_entry + ((self.num_chunks - 1) << entry_shift);

        if end_chunk == self.num_chunks {
            // Implicit last entry: the end of the stream bounds the last
            // chunk.
            let rel = self
                .compressed_size
                .checked_sub(base_chunk_offset)
                .and_then(|rel| u32::try_from(rel).ok())
                .ok_or(Error::Corrupt("chunk table is larger than the stream"))?;
            self.offsets.entries[i] = rel;
        }

        self.offsets.base_chunk_offset = base_chunk_offset;
        self.offsets.base_chunk_idx = start_chunk;
        Ok(())
    }

    /// Reads and, if stored compressed, decompresses chunk `chunk_idx` into
    /// `dst`, which must hold at least the chunk's uncompressed size.
    fn read_chunk(&mut self, chunk_idx: u64, dst: &mut [u8]) -> Result<(), Error> {
        let (offset, stored_size) = self.chunk_location(chunk_idx)?;
        let uncompressed_size = self.chunk_uncompressed_size(chunk_idx);

        // Forbid strange stored sizes. A zero stored size in a real volume is
        // worth reporting upstream rather than silently normalizing.
        if stored_size == 0 || stored_size > uncompressed_size {
            return Err(Error::Corrupt("chunk stored size is out of range"));
        }

        trace!(
            chunk_idx,
            offset,
            stored_size,
            uncompressed_size,
            "reading chunk"
        );

        if stored_size == uncompressed_size {
            // Chunks that did not compress below their original size are
            // stored verbatim.
            self.stream
                .read_exact_at(&mut dst[..stored_size as usize], offset)?;
            return Ok(());
        }

        self.stream
            .read_exact_at(&mut self.temp[..stored_size as usize], offset)?;
        self.decompressor.decompress(
            &self.temp[..stored_size as usize],
            &mut dst[..uncompressed_size as usize],
        )
    }

    /// Returns the uncompressed bytes of chunk `chunk_idx`, filling the
    /// one-chunk cache on a miss.
    pub(crate) fn chunk_bytes(&mut self, chunk_idx: u64) -> Result<&[u8], Error> {
        if self.cached_chunk_idx != chunk_idx {
            // The cache stays marked empty until the chunk decodes fully.
            self.cached_chunk_idx = INVALID_CHUNK_INDEX;
            let mut buf = mem::take(&mut self.cached_chunk);
            let res = self.read_chunk(chunk_idx, &mut buf);
            self.cached_chunk = buf;
            res?;
            self.cached_chunk_idx = chunk_idx;
        }
        Ok(&self.cached_chunk)
    }
}
