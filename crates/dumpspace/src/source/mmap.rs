//! Memory-mapped file source.
//!
//! Maps the whole backing file read-only, which makes repeated random reads
//! into large snapshots cheap.

use crate::error::{SpaceError, SpaceResult};
use crate::source::{copy_from_slice, ByteSource};
use memmap2::{Mmap, MmapOptions};
use parking_lot::RwLock;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Internal state for the mapped source.
struct MmapState {
    /// None for an empty file, which cannot be mapped.
    mmap: Option<Mmap>,
}

impl MmapState {
    fn as_slice(&self) -> &[u8] {
        match self.mmap {
            Some(ref mmap) => mmap.as_ref(),
            None => &[],
        }
    }
}

/// A read-only memory-mapped byte source.
///
/// # Thread Safety
///
/// The mapping sits behind a `parking_lot::RwLock`: reads share it, and
/// [`MmapSource::destroy`] takes it exclusively to release the mapping.
///
/// # Example
///
/// ```rust,ignore
/// use dumpspace::source::{ByteSource, MmapSource};
///
/// let source = MmapSource::open("/path/to/core.1234")?;
/// let mut header = [0u8; 64];
/// source.read_at(0, &mut header)?;
/// ```
pub struct MmapSource {
    name: String,
    path: PathBuf,
    size: u64,
    /// Cleared by `destroy`.
    state: RwLock<Option<MmapState>>,
}

impl MmapSource {
    /// Map a file read-only.
    pub fn open(path: impl AsRef<Path>) -> SpaceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();

        let mmap = if size == 0 {
            None
        } else {
            // The snapshot is treated as immutable for the session.
            Some(unsafe { MmapOptions::new().map(&file)? })
        };

        Ok(MmapSource {
            name: path.display().to_string(),
            path,
            size,
            state: RwLock::new(Some(MmapState { mmap })),
        })
    }

    /// The path this source was mapped from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the mapping. Later reads fail with `SourceDestroyed` and the
    /// source reports itself unavailable.
    pub fn destroy(&self) {
        *self.state.write() = None;
    }
}

impl ByteSource for MmapSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> SpaceResult<()> {
        let guard = self.state.read();
        let state = guard
            .as_ref()
            .ok_or_else(|| SpaceError::source_destroyed(&self.name))?;
        copy_from_slice(&self.name, state.as_slice(), offset, buf)
    }

    fn len(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.state.read().is_some()
    }
}
