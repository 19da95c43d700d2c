//! Dispatch over the two chunk codecs.

use crate::{CompressionFormat, Error};
use lzxd::{Lzxd, WindowSize};

/// The decompressor owned by one decompression context, keyed by the file's
/// compression format.
///
/// The three XPRESS formats share one algorithm and differ only in chunk
/// size, so a single XPRESS decompressor serves all of them. The codec is
/// fetched once per chunk, outside the copy loop.
pub(crate) enum ChunkDecompressor {
    Xpress(xpress_huffman::Decompressor),
    Lzx,
}

impl ChunkDecompressor {
    pub(crate) fn new(format: CompressionFormat) -> Self {
        match format {
            CompressionFormat::Lzx => Self::Lzx,
            _ => Self::Xpress(xpress_huffman::Decompressor::new()),
        }
    }

    /// Decompresses one stored chunk into `output`, whose length must be the
    /// chunk's expected uncompressed size.
    pub(crate) fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), Error> {
        match self {
            Self::Xpress(dec) => dec
                .decompress(input, output)
                .map_err(|e| Error::Decode(Box::new(e))),

            Self::Lzx => {
                // Every chunk of a system-compressed file is a self-contained
                // LZX stream, so the decoder state cannot be carried from one
                // chunk to the next.
                let mut lzxd = Lzxd::new(WindowSize::KB32);
                let decoded = lzxd
                    .decompress_next(input, output.len())
                    .map_err(|e| Error::Decode(Box::new(e)))?;
                if decoded.len() != output.len() {
                    return Err(Error::Corrupt("chunk decompressed to the wrong size"));
                }
                output.copy_from_slice(decoded);
                Ok(())
            }
        }
    }
}
