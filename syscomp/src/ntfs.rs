//! The seam between the engine and the NTFS volume layer.
//!
//! The engine never touches a volume directly; it consumes these two traits,
//! which an NTFS implementation provides for each file handed to the plugin.

use sync_file::ReadAt;

/// Positional access to one open NTFS data attribute.
///
/// [`ReadAt`] supplies the pread-style reads; the engine treats a short read
/// as a failure, so it always reads through `read_exact_at`.
pub trait DataStream: ReadAt {
    /// The size in bytes of the attribute's data.
    fn data_size(&self) -> u64;
}

/// The attributes of one NTFS file, as the engine consumes them.
pub trait NtfsFile {
    /// The handle type for an open data attribute.
    type Stream: DataStream;

    /// Whether the file carries the reparse-point attribute flag.
    fn has_reparse_point(&self) -> bool;

    /// Reads the contents of the file's reparse point attribute in full.
    fn read_reparse_point(&self) -> std::io::Result<Vec<u8>>;

    /// The data size of the unnamed data attribute.
    fn unnamed_data_size(&self) -> u64;

    /// Looks up the data size of the named data attribute `name`. Attribute
    /// names are UTF-16 and compare case-sensitively.
    fn named_data_size(&self, name: &[u16]) -> std::io::Result<u64>;

    /// Opens the named data attribute `name` for positional reads.
    fn open_named_data(&self, name: &[u16]) -> std::io::Result<Self::Stream>;
}
