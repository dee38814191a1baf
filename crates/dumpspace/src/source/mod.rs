//! Byte sources: the physical I/O underneath an address space.
//!
//! A [`ByteSource`] is anything that can hand back `N` bytes at a byte offset
//! of one backing file: the primary snapshot, or an auxiliary file such as a
//! shared library image that holds pages the snapshot left out.

pub mod file;
pub mod memory;
pub mod mmap;

pub use file::FileSource;
pub use memory::BytesSource;
pub use mmap::MmapSource;

use crate::error::SpaceResult;
use std::sync::Arc;

/// Shared handle to a byte source, as held by Regions and address spaces.
pub type SourceHandle = Arc<dyn ByteSource>;

/// Trait for reading from one backing file.
///
/// Implementations perform blocking I/O and never return a partially filled
/// buffer as success.
pub trait ByteSource: Send + Sync {
    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Fails with [`SpaceError::ShortRead`](crate::SpaceError::ShortRead) when
    /// the source ends before `buf` is full.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> SpaceResult<()>;

    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// True if the source holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The name of this source (usually the file path).
    fn name(&self) -> &str;

    /// Whether the source can still serve reads.
    fn is_available(&self) -> bool {
        true
    }
}

/// Copy `buf.len()` bytes at `offset` out of an in-memory slice, the common
/// tail of the slice-backed sources.
pub(crate) fn copy_from_slice(
    name: &str,
    data: &[u8],
    offset: u64,
    buf: &mut [u8],
) -> SpaceResult<()> {
    let size = data.len() as u64;
    if offset > size {
        return Err(crate::SpaceError::short_read(name, offset, buf.len(), 0));
    }

    let start = offset as usize;
    let available = data.len() - start;
    if buf.len() > available {
        return Err(crate::SpaceError::short_read(name, offset, buf.len(), available));
    }

    buf.copy_from_slice(&data[start..start + buf.len()]);
    Ok(())
}
