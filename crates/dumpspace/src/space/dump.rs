//! Dump-plus-auxiliary address space.
//!
//! Core files routinely omit pages that can be recovered from disk, most
//! often the read-only text of shared libraries. Regions for those pages are
//! non-resident and carry an auxiliary source (the library file) instead.

use crate::config::SpaceConfig;
use crate::error::SpaceResult;
use crate::region::Region;
use crate::scan::ScanCursor;
use crate::source::SourceHandle;
use crate::space::mapped::MappedSpace;
use crate::space::AddressSpace;
use std::cell::Cell;
use tracing::debug;

/// An address space over a primary snapshot plus per-Region auxiliary files.
pub struct DumpSpace {
    inner: MappedSpace,
}

impl DumpSpace {
    /// Build the space from an unordered Region list. Resident Regions read
    /// from `primary`; the others read from their own auxiliary source.
    pub fn new(primary: SourceHandle, regions: Vec<Region>, config: SpaceConfig) -> SpaceResult<Self> {
        let auxiliary = regions
            .iter()
            .filter(|r| !r.is_resident() && r.auxiliary_source().is_some())
            .count();
        let missing = regions
            .iter()
            .filter(|r| !r.is_resident() && r.auxiliary_source().is_none())
            .count();
        debug!(
            primary = primary.name(),
            regions = regions.len(),
            auxiliary,
            missing,
            "opening dump space"
        );

        Ok(DumpSpace {
            inner: MappedSpace::new(primary, regions, config)?,
        })
    }

    /// The primary snapshot file.
    pub fn primary(&self) -> &SourceHandle {
        self.inner.primary()
    }

    /// Distinct auxiliary sources referenced by Regions, in Region order.
    pub fn auxiliary_sources(&self) -> Vec<&SourceHandle> {
        let mut sources: Vec<&SourceHandle> = Vec::new();
        for source in self.inner.index().iter().filter_map(Region::auxiliary_source) {
            if !sources.iter().any(|known| std::sync::Arc::ptr_eq(known, source)) {
                sources.push(source);
            }
        }
        sources
    }

    /// Regions whose bytes cannot currently be served: non-resident with no
    /// auxiliary source, or with one that is no longer available.
    pub fn unavailable_regions(&self) -> Vec<&Region> {
        self.inner.index().iter().filter(|r| !r.is_eligible()).collect()
    }
}

impl AddressSpace for DumpSpace {
    fn config(&self) -> &SpaceConfig {
        self.inner.config()
    }

    fn resolve(&self, asid: u32, address: u64) -> Option<&Region> {
        self.inner.resolve(asid, address)
    }

    fn copy_out(&self, asid: u32, address: u64, buf: &mut [u8]) -> SpaceResult<()> {
        self.inner.copy_out(asid, address, buf)
    }

    fn is_accessible(&self, asid: u32, address: u64, length: u64) -> bool {
        self.inner.is_accessible(asid, address, length)
    }

    fn pointer_size(&self, asid: u32) -> usize {
        self.inner.pointer_size(asid)
    }

    fn regions(&self) -> Vec<&Region> {
        self.inner.regions()
    }

    fn scan_cursor(&self) -> &Cell<ScanCursor> {
        self.inner.cursor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpaceError;
    use crate::source::{ByteSource, BytesSource, MmapSource};
    use crate::space::test_support::{counting_source, init_tracing};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[test]
    fn test_reads_from_primary_and_library() {
        let core = counting_source("core", 0x100);
        let library = Arc::new(BytesSource::new("libjvm.so", vec![0x5a; 0x200]));
        let regions = vec![
            Region::resident(0, 0x1000, 0x100, 0),
            Region::non_resident(0, 0x1100, 0x100, 0x80).with_auxiliary_source(library),
        ];
        let space = DumpSpace::new(core, regions, SpaceConfig::default()).unwrap();

        assert_eq!(space.read_u8(0, 0x1010).unwrap(), 0x10);
        assert_eq!(space.read_u8(0, 0x1110).unwrap(), 0x5a);

        let spanning = space.read_bytes(0, 0x10fe, 4).unwrap();
        assert_eq!(spanning, vec![0xfe, 0xff, 0x5a, 0x5a]);
        assert_eq!(space.auxiliary_sources().len(), 1);
        assert!(space.unavailable_regions().is_empty());
    }

    #[test]
    fn test_missing_library_reports_residency() {
        let core = counting_source("core", 0x100);
        let regions = vec![
            Region::resident(0, 0x1000, 0x100, 0),
            Region::non_resident(0, 0x1100, 0x100, 0),
        ];
        let space = DumpSpace::new(core, regions, SpaceConfig::default()).unwrap();

        assert!(space.resolve(0, 0x1100).is_none());
        assert!(!space.is_accessible(0, 0x10f0, 0x20));
        assert!(matches!(
            space.read_bytes(0, 0x10f0, 0x20),
            Err(SpaceError::ResidencyUnavailable { address: 0x1100, .. })
        ));
        assert_eq!(space.unavailable_regions().len(), 1);
    }

    #[test]
    fn test_destroyed_library_stops_resolving() {
        let mut tmpfile = NamedTempFile::new().unwrap();
        tmpfile.write_all(&[0x77; 0x100]).unwrap();
        tmpfile.flush().unwrap();
        let library = Arc::new(MmapSource::open(tmpfile.path()).unwrap());

        let core = counting_source("core", 0x100);
        let regions = vec![
            Region::non_resident(1, 0x7f00_0000_0000, 0x100, 0).with_auxiliary_source(library.clone()),
        ];
        let space = DumpSpace::new(core, regions, SpaceConfig::default()).unwrap();

        assert_eq!(space.read_u8(1, 0x7f00_0000_0010).unwrap(), 0x77);
        library.destroy();

        // The cached position must not outlive the source.
        assert!(space.resolve(1, 0x7f00_0000_0010).is_none());
        match space.read_u8(1, 0x7f00_0000_0010) {
            Err(SpaceError::ResidencyUnavailable { source_name, .. }) => {
                assert_eq!(source_name, library.name());
            }
            other => panic!("expected residency error, got {:?}", other),
        }
    }

    #[test]
    fn test_resident_overlap_wins_over_library() {
        let core = counting_source("core", 0x100);
        let library = Arc::new(BytesSource::new("lib.so", vec![0xee; 0x100]));
        let regions = vec![
            Region::non_resident(0, 0x1000, 0x100, 0).with_auxiliary_source(library),
            Region::resident(0, 0x1000, 0x100, 0),
        ];
        let space = DumpSpace::new(core, regions, SpaceConfig::default()).unwrap();

        // First listed wins: the library Region was listed first.
        assert_eq!(space.read_u8(0, 0x1001).unwrap(), 0xee);
    }

    #[test]
    fn test_accessibility_matches_reads() {
        init_tracing();
        let core = counting_source("core", 0x400);
        let library = Arc::new(BytesSource::new("lib.so", vec![0x11; 0x400]));
        let regions = vec![
            Region::resident(0, 0x1000, 0x100, 0),
            Region::resident(0, 0x1080, 0x100, 0x100),
            Region::non_resident(0, 0x1180, 0x80, 0).with_auxiliary_source(library.clone()),
            Region::non_resident(0, 0x1200, 0x80, 0),
            Region::resident(0, 0x1300, 0x100, 0x200),
            Region::resident(1, 0x1000, 0x100, 0x300),
            // Both run 0x80 bytes past the end of their file.
            Region::resident(2, 0x1000, 0x100, 0x380),
            Region::non_resident(3, 0x1000, 0x100, 0x380).with_auxiliary_source(library),
        ];
        let space = DumpSpace::new(core, regions, SpaceConfig::default()).unwrap();

        let cases: &[(u32, u64, u64)] = &[
            (0, 0x1000, 0x200),
            (0, 0x1000, 0x201),
            (0, 0x10f0, 0x100),
            (0, 0x11ff, 0x1),
            (0, 0x1200, 0x10),
            (0, 0x12f0, 0x20),
            (0, 0x1300, 0x100),
            (0, 0x1300, 0x101),
            (0, 0x0fff, 0x2),
            (1, 0x1000, 0x100),
            (1, 0x1000, 0x101),
            (0, 0x1050, 0),
            (2, 0x1000, 0x80),
            (2, 0x1000, 0x81),
            (2, 0x1070, 0x20),
            (3, 0x1000, 0x80),
            (3, 0x10f0, 0x10),
        ];
        for &(asid, address, length) in cases {
            let accessible = space.is_accessible(asid, address, length);
            let readable = space.read_bytes(asid, address, length as usize).is_ok();
            assert_eq!(
                accessible, readable,
                "asid {} address {:#x} length {:#x}",
                asid, address, length
            );
        }
        assert!(space.is_accessible(2, 0x1000, 0x80));
        assert!(!space.is_accessible(3, 0x1000, 0x81));
    }
}
