//! Region descriptors: one contiguous mapped interval of a snapshot.

use crate::source::SourceHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Addresses at or above this bound need 8-byte pointers.
pub const WIDE_POINTER_BOUNDARY: u64 = 0x1_0000_0000;

/// Access flags of a mapped Region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionFlags {
    pub executable: bool,
    pub read_only: bool,
    pub shared: bool,
}

impl Default for RegionFlags {
    fn default() -> Self {
        RegionFlags {
            executable: false,
            read_only: true,
            shared: false,
        }
    }
}

/// The collaborator-facing description of a Region, as produced by a
/// snapshot format decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub asid: u32,
    pub start: u64,
    pub size: u64,
    pub file_offset: u64,
    #[serde(default = "default_resident")]
    pub resident_in_primary: bool,
    #[serde(default)]
    pub flags: RegionFlags,
}

fn default_resident() -> bool {
    true
}

/// An immutable descriptor of one contiguous mapped interval and of where
/// its bytes physically live.
///
/// `end()` is exclusive and scoped to `asid`. Regions may overlap; lookups
/// break ties by `(asid, start)` order.
#[derive(Clone)]
pub struct Region {
    asid: u32,
    start: u64,
    size: u64,
    file_offset: u64,
    resident_in_primary: bool,
    auxiliary_source: Option<SourceHandle>,
    flags: RegionFlags,
}

impl Region {
    /// A Region whose bytes live in the primary snapshot file.
    pub fn resident(asid: u32, start: u64, size: u64, file_offset: u64) -> Self {
        Region {
            asid,
            start,
            size,
            file_offset,
            resident_in_primary: true,
            auxiliary_source: None,
            flags: RegionFlags::default(),
        }
    }

    /// A Region whose bytes are absent from the primary file. It only becomes
    /// readable once bound to an auxiliary source.
    pub fn non_resident(asid: u32, start: u64, size: u64, file_offset: u64) -> Self {
        Region {
            resident_in_primary: false,
            ..Region::resident(asid, start, size, file_offset)
        }
    }

    pub fn from_descriptor(descriptor: &RegionDescriptor) -> Self {
        Region {
            asid: descriptor.asid,
            start: descriptor.start,
            size: descriptor.size,
            file_offset: descriptor.file_offset,
            resident_in_primary: descriptor.resident_in_primary,
            auxiliary_source: None,
            flags: descriptor.flags,
        }
    }

    /// Return a copy of this Region with the given access flags.
    pub fn with_flags(self, flags: RegionFlags) -> Self {
        Region { flags, ..self }
    }

    /// Return a non-resident copy of this Region whose bytes are read from
    /// `source` at `file_offset`.
    pub fn with_auxiliary_source(self, source: SourceHandle) -> Self {
        Region {
            resident_in_primary: false,
            auxiliary_source: Some(source),
            ..self
        }
    }

    pub fn asid(&self) -> u32 {
        self.asid
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Exclusive end address, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn is_resident(&self) -> bool {
        self.resident_in_primary
    }

    pub fn auxiliary_source(&self) -> Option<&SourceHandle> {
        self.auxiliary_source.as_ref()
    }

    pub fn flags(&self) -> RegionFlags {
        self.flags
    }

    /// Whether `address` falls in `[start, end)`.
    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end()
    }

    /// Whether this Region's bytes can actually be served: either it is
    /// resident in the primary file, or its auxiliary source is attached and
    /// still available.
    pub fn is_eligible(&self) -> bool {
        self.resident_in_primary
            || self
                .auxiliary_source
                .as_ref()
                .is_some_and(|source| source.is_available())
    }

    /// Whether the Region reaches the 4 GiB boundary.
    pub fn is_wide(&self) -> bool {
        (self.start as u128) + (self.size as u128) >= WIDE_POINTER_BOUNDARY as u128
    }

    /// Backing-file offset of `address`. `None` if the Region does not
    /// contain it or the offset does not fit in 64 bits.
    pub fn file_offset_for(&self, address: u64) -> Option<u64> {
        if !self.contains(address) {
            return None;
        }
        self.file_offset.checked_add(address - self.start)
    }

    /// Whether a backing file of `source_len` bytes holds this Region's
    /// bytes for `[from, to)`.
    pub fn is_backed(&self, source_len: u64, from: u64, to: u64) -> bool {
        self.file_offset_for(from)
            .and_then(|offset| offset.checked_add(to.saturating_sub(from)))
            .is_some_and(|file_end| file_end <= source_len)
    }

    pub fn descriptor(&self) -> RegionDescriptor {
        RegionDescriptor {
            asid: self.asid,
            start: self.start,
            size: self.size,
            file_offset: self.file_offset,
            resident_in_primary: self.resident_in_primary,
            flags: self.flags,
        }
    }

    /// Composite sort key; addresses compare unsigned.
    pub(crate) fn key(&self) -> (u32, u64) {
        (self.asid, self.start)
    }
}

impl From<RegionDescriptor> for Region {
    fn from(descriptor: RegionDescriptor) -> Self {
        Region::from_descriptor(&descriptor)
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        let same_source = match (&self.auxiliary_source, &other.auxiliary_source) {
            (None, None) => true,
            (Some(a), Some(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        };
        self.descriptor() == other.descriptor() && same_source
    }
}

impl Eq for Region {}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("asid", &self.asid)
            .field("start", &format_args!("{:#x}", self.start))
            .field("size", &format_args!("{:#x}", self.size))
            .field("file_offset", &format_args!("{:#x}", self.file_offset))
            .field("resident_in_primary", &self.resident_in_primary)
            .field(
                "auxiliary_source",
                &self.auxiliary_source.as_ref().map(|s| s.name().to_owned()),
            )
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ByteSource, MmapSource};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_contains_is_half_open() {
        let region = Region::resident(0, 0x1000, 0x100, 0);
        assert!(region.contains(0x1000));
        assert!(region.contains(0x10ff));
        assert!(!region.contains(0x1100));
        assert!(!region.contains(0xfff));
    }

    #[test]
    fn test_end_saturates() {
        let region = Region::resident(0, u64::MAX - 0x10, 0x100, 0);
        assert_eq!(region.end(), u64::MAX);
        assert!(region.contains(u64::MAX - 1));
    }

    #[test]
    fn test_is_wide() {
        assert!(!Region::resident(0, 0xffff_f000, 0xfff, 0).is_wide());
        assert!(Region::resident(0, 0xffff_f000, 0x1000, 0).is_wide());
        assert!(Region::resident(0, 0xffff_8000_0000_0000, 0x1000, 0).is_wide());
    }

    #[test]
    fn test_eligibility_follows_auxiliary_source() {
        let mut tmpfile = NamedTempFile::new().unwrap();
        tmpfile.write_all(&[0u8; 0x100]).unwrap();
        tmpfile.flush().unwrap();
        let library = Arc::new(MmapSource::open(tmpfile.path()).unwrap());

        let bare = Region::non_resident(0, 0x4000, 0x100, 0);
        assert!(!bare.is_eligible());

        let bound = bare.with_auxiliary_source(library.clone());
        assert!(bound.is_eligible());
        assert!(!bound.is_resident());

        library.destroy();
        assert!(!library.is_available());
        assert!(!bound.is_eligible());
    }

    #[test]
    fn test_descriptor_from_json() {
        let json = r#"{"asid": 1, "start": 4096, "size": 256, "file_offset": 512,
                       "flags": {"executable": true}}"#;
        let descriptor: RegionDescriptor = serde_json::from_str(json).unwrap();
        let region = Region::from(descriptor);
        assert_eq!(region.asid(), 1);
        assert!(region.is_resident());
        assert!(region.flags().executable);
        assert!(region.flags().read_only);
        assert_eq!(region.file_offset_for(0x1010), Some(0x210));
        assert_eq!(region.file_offset_for(0x1100), None);
        assert_eq!(region.descriptor(), descriptor);
    }

    #[test]
    fn test_file_offset_overflow() {
        let region = Region::resident(0, 0x1000, 0x100, u64::MAX - 0xf);
        assert_eq!(region.file_offset_for(0x100f), Some(u64::MAX));
        assert_eq!(region.file_offset_for(0x1020), None);
        assert!(!region.is_backed(u64::MAX, 0x1000, 0x1020));
    }

    #[test]
    fn test_is_backed() {
        let region = Region::resident(0, 0x1000, 0x100, 0x80);
        assert!(region.is_backed(0x180, 0x1000, 0x1100));
        assert!(!region.is_backed(0x17f, 0x1000, 0x1100));
        assert!(region.is_backed(0x100, 0x1000, 0x1080));
        assert!(!region.is_backed(0x100, 0x1100, 0x1100));
    }
}
