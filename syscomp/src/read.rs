//! The read engine: splitting a positional read into per-chunk copies.

use crate::{DataStream, Error, SystemCompressedFile};
use tracing::debug;

impl<S: DataStream> SystemCompressedFile<S> {
    /// Reads uncompressed data from the file.
    ///
    /// Reads up to `buf.len()` bytes of uncompressed data starting at byte
    /// offset `pos`, and returns the number of bytes read; zero indicates
    /// end-of-file. Reads past the end are clamped.
    ///
    /// If at least one byte has been delivered when a chunk fails to load,
    /// the short count is returned instead of the failure; an error is
    /// reported only when the first chunk touched fails.
    pub fn read(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize, Error> {
        if pos >= self.uncompressed_size {
            return Ok(0);
        }

        let count = (buf.len() as u64).min(self.uncompressed_size - pos) as usize;
        if count == 0 {
            return Ok(0);
        }

        let mut chunk_idx = pos >> self.chunk_size.exponent();
        let mut offset_in_chunk = (pos & (u64::from(u32::from(self.chunk_size)) - 1)) as u32;
        let mut copied = 0usize;

        while copied < count {
            let chunk_len = self.chunk_uncompressed_size(chunk_idx);
            let to_copy = (count - copied).min((chunk_len - offset_in_chunk) as usize);

            let chunk = match self.chunk_bytes(chunk_idx) {
                Ok(chunk) => chunk,
                Err(e) if copied == 0 => return Err(e),
                Err(e) => {
                    // Partial success: hand back what was delivered.
                    debug!(chunk_idx, copied, error = %e, "read truncated by chunk failure");
                    break;
                }
            };

            let start = offset_in_chunk as usize;
            buf[copied..copied + to_copy].copy_from_slice(&chunk[start..start + to_copy]);

            copied += to_copy;
            chunk_idx += 1;
            offset_in_chunk = 0;
        }

        Ok(copied)
    }

    /// Reads the file's entire uncompressed contents into a vector.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>, Error> {
        let len = usize::try_from(self.uncompressed_size).map_err(|_| Error::OutOfMemory)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        data.resize(len, 0);

        let mut total = 0usize;
        while total < len {
            let n = self.read(total as u64, &mut data[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }

        data.truncate(total);
        Ok(data)
    }
}
