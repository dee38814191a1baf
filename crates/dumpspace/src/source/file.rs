//! Seek-and-read file source.

use crate::error::{SpaceError, SpaceResult};
use crate::source::ByteSource;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A byte source backed by an open file handle.
///
/// Each read seeks the shared handle and reads synchronously; the handle is
/// guarded by a `parking_lot::Mutex` so the source can be shared between
/// address spaces.
pub struct FileSource {
    name: String,
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    /// Open a file for reading.
    pub fn open(path: impl AsRef<Path>) -> SpaceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();

        Ok(FileSource {
            name: path.display().to_string(),
            path,
            file: Mutex::new(file),
            size,
        })
    }

    /// The path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> SpaceResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if offset >= self.size {
            return Err(SpaceError::short_read(&self.name, offset, buf.len(), 0));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled < buf.len() {
            return Err(SpaceError::short_read(&self.name, offset, buf.len(), filled));
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }
}
