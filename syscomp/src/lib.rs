//! Read support for NTFS System Compressed files.
//!
//! Windows 10 introduced System Compression, also called "Compact OS": a
//! filesystem compression mode for rarely-modified files that compresses more
//! heavily than regular NTFS compression. System-compressed files can only be
//! read; on Windows, writing to one decompresses it back into an ordinary
//! file. The feature is built on the Windows Overlay Filesystem (WOF) filter
//! driver rather than on NTFS itself, so a system-compressed file is an
//! ordinary-looking file composed of three NTFS attributes:
//!
//! - a reparse point in the [`WofFileProviderReparsePoint`] format, naming the
//!   WOF "file provider" and the compression format;
//! - a sparse unnamed data attribute whose data size is the uncompressed file
//!   size;
//! - a data attribute named `WofCompressedData` holding the compressed data.
//!
//! The compressed data is a series of chunks, each of which decompresses to a
//! fixed size determined by the compression format (the last chunk
//! decompresses to whatever remains). Chunks that did not compress below
//! their original size are stored verbatim. The chunk payloads are
//! concatenated behind a table of 4-byte (files under 4 GiB uncompressed) or
//! 8-byte little-endian offsets giving each chunk's position relative to the
//! end of the table. Every chunk is independently decompressible, so reads at
//! arbitrary offsets are possible with chunk granularity; writes are not.
//!
//! The volume layer is abstracted by the [`NtfsFile`] and [`DataStream`]
//! traits, so the engine can sit behind any NTFS implementation that exposes
//! attribute reads. [`SystemCompressedFile`] is the decompression context for
//! one open file; the [`plugin`] module packages the engine as the callback
//! surface a userspace NTFS driver dispatches to for files carrying the WOF
//! reparse tag.

#![forbid(unsafe_code)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]

mod chunks;
mod codec;
mod ntfs;
mod open;
pub mod plugin;
mod read;

pub use ntfs::{DataStream, NtfsFile};
pub use open::{compressed_file_size, compression_format};

use chunks::OffsetWindow;
use codec::ChunkDecompressor;
use pow2::Pow2;
use std::fmt;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, LE, U16, U32};

/// The reparse tag dispatched to the Windows Overlay Filesystem filter driver.
pub const IO_REPARSE_TAG_WOF: u32 = 0xc000_0017;

/// The only defined version of the WOF protocol.
pub const WOF_CURRENT_VERSION: u32 = 1;

/// The WOF provider implementing system-compressed files. (Provider 1 is WIM
/// backing, which this crate does not handle.)
pub const WOF_PROVIDER_FILE: u32 = 2;

/// The only defined version of the file-provider metadata.
pub const WOF_FILE_PROVIDER_CURRENT_VERSION: u32 = 1;

/// `WofCompressedData`: the name of the data attribute that holds the
/// compressed data of a system-compressed file. NTFS attribute names are
/// UTF-16LE and compare case-sensitively here.
pub const WOF_COMPRESSED_DATA_NAME: [u16; 17] = [
    b'W' as u16,
    b'o' as u16,
    b'f' as u16,
    b'C' as u16,
    b'o' as u16,
    b'm' as u16,
    b'p' as u16,
    b'r' as u16,
    b'e' as u16,
    b's' as u16,
    b's' as u16,
    b'e' as u16,
    b'd' as u16,
    b'D' as u16,
    b'a' as u16,
    b't' as u16,
    b'a' as u16,
];

/// The fixed prefix of every NTFS reparse point attribute.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone)]
#[repr(C)]
pub struct ReparsePointHeader {
    /// Identifies the filter driver that interprets the reparse data. Must be
    /// [`IO_REPARSE_TAG_WOF`] for system-compressed files.
    pub reparse_tag: U32<LE>,

    /// Size in bytes of the reparse data that follows this header.
    pub reparse_data_length: U16<LE>,

    /// Reserved, zero.
    pub reserved: U16<LE>,
}

/// The WOF provider specification: which provider the WOF filter driver hands
/// control to.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone)]
#[repr(C)]
pub struct WofExternalInfo {
    /// WOF protocol version; must be [`WOF_CURRENT_VERSION`].
    pub version: U32<LE>,

    /// The provider number; must be [`WOF_PROVIDER_FILE`].
    pub provider: U32<LE>,
}

/// The metadata of the file provider: how the file is compressed.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone)]
#[repr(C)]
pub struct WofFileProviderInfo {
    /// File-provider metadata version; must be
    /// [`WOF_FILE_PROVIDER_CURRENT_VERSION`].
    pub version: U32<LE>,

    /// The compression format code; see [`CompressionFormat`].
    pub compression_format: U32<LE>,
}

/// The on-disk layout of the reparse point attribute of a system-compressed
/// file.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Clone)]
#[repr(C)]
pub struct WofFileProviderReparsePoint {
    /// The standard reparse point header.
    pub reparse: ReparsePointHeader,

    /// The WOF provider specification.
    pub wof: WofExternalInfo,

    /// The file-provider metadata.
    pub file: WofFileProviderInfo,
}

static_assertions::const_assert_eq!(core::mem::size_of::<WofFileProviderReparsePoint>(), 24);

/// Compression format code for XPRESS with 4 KiB chunks.
pub const FORMAT_XPRESS4K: u32 = 0;
/// Compression format code for LZX with 32 KiB chunks.
pub const FORMAT_LZX: u32 = 1;
/// Compression format code for XPRESS with 8 KiB chunks.
pub const FORMAT_XPRESS8K: u32 = 2;
/// Compression format code for XPRESS with 16 KiB chunks.
pub const FORMAT_XPRESS16K: u32 = 3;

/// The compression formats available for system-compressed files.
///
/// The format fixes both the algorithm and the uncompressed chunk size.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CompressionFormat {
    /// XPRESS (Huffman variant), 4 KiB chunks.
    Xpress4K,
    /// LZX, 32 KiB chunks.
    Lzx,
    /// XPRESS (Huffman variant), 8 KiB chunks.
    Xpress8K,
    /// XPRESS (Huffman variant), 16 KiB chunks.
    Xpress16K,
}

impl CompressionFormat {
    /// Decodes the on-disk format code, if it is one of the defined formats.
    pub fn try_from_code(code: u32) -> Option<Self> {
        match code {
            FORMAT_XPRESS4K => Some(Self::Xpress4K),
            FORMAT_LZX => Some(Self::Lzx),
            FORMAT_XPRESS8K => Some(Self::Xpress8K),
            FORMAT_XPRESS16K => Some(Self::Xpress16K),
            _ => None,
        }
    }

    /// The uncompressed chunk size used by this format. All chunks of a file
    /// have this uncompressed size except possibly the last.
    pub fn chunk_size(self) -> Pow2 {
        match self {
            Self::Xpress4K => Pow2::from_exponent(12),
            Self::Xpress8K => Pow2::from_exponent(13),
            Self::Xpress16K => Pow2::from_exponent(14),
            Self::Lzx => Pow2::from_exponent(15),
        }
    }
}

/// Errors reported while probing or reading a system-compressed file.
#[derive(Debug)]
pub enum Error {
    /// The file is not a system-compressed file: its reparse point (or lack of
    /// one) does not carry the WOF file-provider signature. Callers that
    /// dispatch on the reparse tag should fall back to their default handling
    /// of the file.
    NotSystemCompressed,

    /// The operation is not supported; system-compressed files can only be
    /// opened for reading.
    Unsupported,

    /// An underlying attribute read failed, returned short, or an attribute
    /// lookup failed.
    Io(std::io::Error),

    /// The chunk offset table or a chunk's stored size is inconsistent with
    /// the stream sizes.
    Corrupt(&'static str),

    /// The codec rejected a compressed chunk.
    Decode(Box<dyn std::error::Error + Send + Sync>),

    /// A buffer allocation failed while opening the file.
    OutOfMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSystemCompressed => write!(f, "not a system-compressed file"),
            Self::Unsupported => write!(f, "system-compressed files are read-only"),
            Self::Io(e) => write!(f, "attribute read failed: {e}"),
            Self::Corrupt(what) => write!(f, "compressed stream is invalid: {what}"),
            Self::Decode(e) => write!(f, "chunk decompression failed: {e}"),
            Self::OutOfMemory => write!(f, "buffer allocation failed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// The number of chunk offsets that may be cached at any one time. This is an
/// implementation detail; the minimum possible value is 2 and the maximum is
/// bounded by `u32::MAX` divided by the largest chunk size, so that offsets
/// within one window always fit in 32 bits.
pub(crate) const NUM_CHUNK_OFFSETS: usize = 128;

/// A marker value not used by any chunk index.
pub(crate) const INVALID_CHUNK_INDEX: u64 = u64::MAX;

/// The decompression context for one open system-compressed file.
///
/// A context is created with [`SystemCompressedFile::open`] and owns the open
/// `WofCompressedData` stream, the decompressor, and its buffers; dropping it
/// releases all of them. The file's sizes and format are snapshotted at open
/// time and never re-queried, which is safe because this layer does not allow
/// system-compressed files to be written.
///
/// All operations take `&mut self`: a context serves a single reader and
/// performs no locking. Distinct contexts are fully independent.
pub struct SystemCompressedFile<S> {
    /// The open compressed stream (`WofCompressedData`).
    stream: S,

    /// The compression format of the file.
    format: CompressionFormat,

    /// The decompressor for the file's format.
    decompressor: ChunkDecompressor,

    /// The uncompressed size of the file in bytes, from the unnamed data
    /// attribute.
    uncompressed_size: u64,

    /// The size of the compressed stream in bytes.
    compressed_size: u64,

    /// The number of chunks into which the file is divided.
    num_chunks: u64,

    /// The uncompressed chunk size. All chunks decompress to this size except
    /// possibly the last.
    chunk_size: Pow2,

    /// The bounded cache of chunk offsets parsed from the chunk table.
    offsets: OffsetWindow,

    /// Scratch buffer holding either the compressed chunk currently being
    /// decompressed or the chunk table entries currently being parsed. Sized
    /// to the larger of the two uses.
    temp: Box<[u8]>,

    /// The most recently decompressed chunk. Prevents adjacent reads shorter
    /// than the chunk size from decompressing the same chunk repeatedly; this
    /// is not a general-purpose data cache.
    cached_chunk: Box<[u8]>,

    /// The index of the chunk held by `cached_chunk`, or
    /// [`INVALID_CHUNK_INDEX`] if the buffer holds nothing valid.
    cached_chunk_idx: u64,
}

impl<S> SystemCompressedFile<S> {
    /// The compression format of the file.
    pub fn format(&self) -> CompressionFormat {
        self.format
    }

    /// The uncompressed size of the file in bytes.
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// The size of the `WofCompressedData` stream in bytes.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// The uncompressed chunk size for the file's format.
    pub fn chunk_size(&self) -> Pow2 {
        self.chunk_size
    }

    /// The number of chunks into which the file is divided. Zero for an empty
    /// file.
    pub fn num_chunks(&self) -> u64 {
        self.num_chunks
    }

    /// The uncompressed size of one chunk: the chunk size for every chunk but
    /// the last, which holds whatever remains.
    pub(crate) fn chunk_uncompressed_size(&self, chunk_idx: u64) -> u32 {
        debug_assert!(chunk_idx < self.num_chunks);
        if chunk_idx == self.num_chunks - 1 {
            (((self.uncompressed_size - 1) & (u64::from(u32::from(self.chunk_size)) - 1)) + 1)
                as u32
        } else {
            u32::from(self.chunk_size)
        }
    }
}

/// Allocates a zeroed buffer, reporting failure instead of aborting.
pub(crate) fn alloc_buffer(len: usize) -> Result<Box<[u8]>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf.into_boxed_slice())
}
