//! The filesystem plugin surface.
//!
//! A userspace NTFS driver that encounters a file whose reparse tag is
//! [`IO_REPARSE_TAG_WOF`] dispatches these callbacks in place of its regular
//! file operations. The surface is the four operations such drivers expect
//! from a reparse plugin: `getattr`, `open`, `release`, and `read`. The host
//! keeps one handle slot per open file; `open` fills it with a decompression
//! context and `release` clears it.

use crate::{
    compressed_file_size, DataStream, Error, NtfsFile, SystemCompressedFile, IO_REPARSE_TAG_WOF,
};

/// How a file is being opened.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AccessMode {
    /// Read-only access.
    Read,
    /// Access that allows writing. Never supported for system-compressed
    /// files.
    ReadWrite,
}

/// The `stat` fields this plugin fills in.
#[derive(Copy, Clone, Debug)]
pub struct FileAttr {
    /// File size in bytes: the uncompressed size.
    pub size: u64,
    /// Number of 512-byte blocks allocated, derived from the compressed size.
    pub blocks: u64,
    /// File type and permission bits.
    pub mode: u32,
}

/// The callback set for files carrying the WOF reparse tag.
pub struct SystemCompressionOps;

/// Returns the callback set handling `reparse_tag`, or `None` when the tag is
/// not [`IO_REPARSE_TAG_WOF`] (the host reports that as an invalid argument).
pub fn init(reparse_tag: u32) -> Option<SystemCompressionOps> {
    if reparse_tag == IO_REPARSE_TAG_WOF {
        Some(SystemCompressionOps)
    } else {
        None
    }
}

impl SystemCompressionOps {
    /// Fills file attributes for a system-compressed file.
    ///
    /// This reads the reparse point and the compressed stream size but does
    /// not open a decompression context, so stat-only traffic stays cheap.
    /// [`Error::NotSystemCompressed`] tells the host to fall back to its
    /// default attribute handling.
    pub fn getattr<V: NtfsFile>(
        &self,
        file: &V,
        reparse: Option<&[u8]>,
    ) -> Result<FileAttr, Error> {
        let compressed_size = compressed_file_size(file, reparse)?;
        Ok(FileAttr {
            size: file.unnamed_data_size(),
            blocks: (compressed_size + 511) >> 9,
            // Regular file, read-only for everyone.
            mode: 0o100_555,
        })
    }

    /// Opens a file for reading and places the decompression context in the
    /// host's handle slot. Any access mode other than read-only is refused
    /// with [`Error::Unsupported`].
    pub fn open<V: NtfsFile>(
        &self,
        file: &V,
        reparse: Option<&[u8]>,
        mode: AccessMode,
        handle: &mut Option<SystemCompressedFile<V::Stream>>,
    ) -> Result<(), Error> {
        if mode != AccessMode::Read {
            return Err(Error::Unsupported);
        }
        *handle = Some(SystemCompressedFile::open(file, reparse)?);
        Ok(())
    }

    /// Closes the context in the handle slot. Never fails; an already-empty
    /// slot is left alone.
    pub fn release<S>(&self, handle: &mut Option<SystemCompressedFile<S>>) {
        *handle = None;
    }

    /// Reads uncompressed file data through the context in the handle slot.
    pub fn read<S: DataStream>(
        &self,
        handle: &mut Option<SystemCompressedFile<S>>,
        buf: &mut [u8],
        offset: i64,
    ) -> Result<usize, Error> {
        let Some(ctx) = handle.as_mut() else {
            return Err(Error::Io(std::io::ErrorKind::InvalidInput.into()));
        };
        let pos = u64::try_from(offset)
            .map_err(|_| Error::Io(std::io::ErrorKind::InvalidInput.into()))?;
        ctx.read(pos, buf)
    }
}
