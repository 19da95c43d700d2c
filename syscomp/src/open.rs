//! Probing for the WOF file-provider signature and opening files.

use crate::{
    alloc_buffer, ChunkDecompressor, CompressionFormat, DataStream, Error, NtfsFile,
    OffsetWindow, SystemCompressedFile, WofFileProviderReparsePoint, INVALID_CHUNK_INDEX,
    IO_REPARSE_TAG_WOF, NUM_CHUNK_OFFSETS, WOF_COMPRESSED_DATA_NAME,
    WOF_CURRENT_VERSION, WOF_FILE_PROVIDER_CURRENT_VERSION, WOF_PROVIDER_FILE,
};
use core::mem::size_of;
use tracing::{debug, trace_span};
use zerocopy::FromBytes;

/// Returns the compression format of a system-compressed file.
///
/// The file's reparse point is taken from `reparse` if the caller has already
/// read it, and read from the file otherwise. Returns
/// [`Error::NotSystemCompressed`] if the file does not carry a WOF
/// file-provider reparse point, and [`Error::Io`] if reading the reparse
/// point fails.
pub fn compression_format<V: NtfsFile>(
    file: &V,
    reparse: Option<&[u8]>,
) -> Result<CompressionFormat, Error> {
    if !file.has_reparse_point() {
        return Err(Error::NotSystemCompressed);
    }

    let owned;
    let blob = match reparse {
        Some(blob) => blob,
        None => {
            owned = file.read_reparse_point()?;
            owned.as_slice()
        }
    };

    parse_reparse_point(blob)
}

// Does the reparse point indicate a system-compressed file?
fn parse_reparse_point(blob: &[u8]) -> Result<CompressionFormat, Error> {
    let Ok((rp, _)) = WofFileProviderReparsePoint::read_from_prefix(blob) else {
        // Too short to be a WOF file-provider reparse point.
        return Err(Error::NotSystemCompressed);
    };

    if rp.reparse.reparse_tag.get() != IO_REPARSE_TAG_WOF
        || rp.wof.version.get() != WOF_CURRENT_VERSION
        || rp.wof.provider.get() != WOF_PROVIDER_FILE
        || rp.file.version.get() != WOF_FILE_PROVIDER_CURRENT_VERSION
    {
        return Err(Error::NotSystemCompressed);
    }

    CompressionFormat::try_from_code(rp.file.compression_format.get())
        .ok_or(Error::NotSystemCompressed)
}

/// Returns the compressed size of a system-compressed file: the data size of
/// its `WofCompressedData` stream.
///
/// This probes the reparse point but does not open a decompression context,
/// so it stays cheap for stat-only callers.
pub fn compressed_file_size<V: NtfsFile>(file: &V, reparse: Option<&[u8]>) -> Result<u64, Error> {
    compression_format(file, reparse)?;
    Ok(file.named_data_size(&WOF_COMPRESSED_DATA_NAME)?)
}

impl<S: DataStream> SystemCompressedFile<S> {
    /// Opens a system-compressed file for reading.
    ///
    /// The file's reparse point is taken from `reparse` if the caller has
    /// already read it. Verifies the WOF file-provider signature, opens the
    /// `WofCompressedData` stream, and snapshots the file's sizes into the
    /// returned context.
    pub fn open<V: NtfsFile<Stream = S>>(file: &V, reparse: Option<&[u8]>) -> Result<Self, Error> {
        let _span = trace_span!("SystemCompressedFile::open").entered();

        // This also validates that the file really is system-compressed.
        let format = compression_format(file, reparse)?;

        let stream = file.open_named_data(&WOF_COMPRESSED_DATA_NAME)?;

        // The uncompressed size is the size of the unnamed data attribute,
        // which should be sparse, though nothing here relies on that.
        let uncompressed_size = file.unnamed_data_size();
        let compressed_size = stream.data_size();

        let chunk_size = format.chunk_size();
        let num_chunks =
            (uncompressed_size + (u64::from(u32::from(chunk_size)) - 1)) >> chunk_size.exponent();

        // One scratch buffer serves both chunk table parsing and compressed
        // chunk reads.
        let temp = alloc_buffer(usize::from(chunk_size).max(NUM_CHUNK_OFFSETS * size_of::<u64>()))?;
        let cached_chunk = alloc_buffer(usize::from(chunk_size))?;

        debug!(
            ?format,
            uncompressed_size, compressed_size, num_chunks, "opened system-compressed file"
        );

        Ok(Self {
            stream,
            format,
            decompressor: ChunkDecompressor::new(format),
            uncompressed_size,
            compressed_size,
            num_chunks,
            chunk_size,
            offsets: OffsetWindow::empty(),
            temp,
            cached_chunk,
            cached_chunk_idx: INVALID_CHUNK_INDEX,
        })
    }
}
