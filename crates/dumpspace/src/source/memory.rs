//! In-memory byte source.

use crate::error::SpaceResult;
use crate::source::{copy_from_slice, ByteSource};

/// A byte source over an owned buffer.
///
/// Useful for synthetic snapshots and for pages reconstructed outside the
/// snapshot file (e.g. decompressed sections).
pub struct BytesSource {
    name: String,
    data: Vec<u8>,
}

impl BytesSource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        BytesSource {
            name: name.into(),
            data: data.into(),
        }
    }

    /// The underlying bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for BytesSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> SpaceResult<()> {
        copy_from_slice(&self.name, &self.data, offset, buf)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }
}
