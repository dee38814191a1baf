//! Layered address space: an append-only overlay over another space.
//!
//! Used to patch in memory the snapshot is missing, for instance library
//! sections located on a search path after the snapshot was opened.
//! Overlay Regions are checked first; everything else falls through to the
//! wrapped space, which is never modified.

use crate::config::SpaceConfig;
use crate::error::{SpaceError, SpaceResult};
use crate::index::RegionIndex;
use crate::region::Region;
use crate::resolver::Resolver;
use crate::scan::ScanCursor;
use crate::source::SourceHandle;
use crate::space::AddressSpace;
use std::cell::Cell;
use tracing::debug;

/// An address space that adds overlay Regions on top of `S`.
pub struct LayeredSpace<S> {
    inner: S,
    asid: u32,
    overlay: RegionIndex,
    resolver: Resolver,
    cursor: Cell<ScanCursor>,
}

impl<S: AddressSpace> LayeredSpace<S> {
    /// Wrap `inner`. Overlay Regions added with [`LayeredSpace::map_region`]
    /// belong to `asid`.
    pub fn new(inner: S, asid: u32) -> Self {
        LayeredSpace {
            inner,
            asid,
            overlay: RegionIndex::default(),
            resolver: Resolver::new(),
            cursor: Cell::new(ScanCursor::default()),
        }
    }

    /// Map `size` bytes of `source`, starting at `source_offset`, at
    /// `virtual_address`. The new Region takes precedence over the wrapped
    /// space; among overlay Regions the earlier mapping wins.
    pub fn map_region(
        &mut self,
        virtual_address: u64,
        source: SourceHandle,
        source_offset: u64,
        size: u64,
    ) -> SpaceResult<()> {
        if size == 0 {
            return Err(SpaceError::invalid_length(
                virtual_address,
                size,
                "overlay region must not be empty",
            ));
        }
        if virtual_address.checked_add(size).is_none() {
            return Err(SpaceError::invalid_length(
                virtual_address,
                size,
                "overlay region wraps past the end of the address space",
            ));
        }
        if source_offset.checked_add(size).is_none() {
            return Err(SpaceError::invalid_length(
                virtual_address,
                size,
                "overlay source range overflows 64 bits",
            ));
        }

        debug!(
            asid = self.asid,
            address = %format_args!("{:#x}", virtual_address),
            size = %format_args!("{:#x}", size),
            source = source.name(),
            "mapping overlay region"
        );
        let region = Region::non_resident(self.asid, virtual_address, size, source_offset)
            .with_auxiliary_source(source);
        self.overlay.insert(region);
        self.resolver.invalidate();
        Ok(())
    }

    /// The wrapped space.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// The overlay Regions only, in `(asid, start)` order.
    pub fn overlay_regions(&self) -> &[Region] {
        self.overlay.regions()
    }

    /// End of the stretch starting at `address` that no overlay Region
    /// starts inside, capped at `limit`.
    fn fall_through_end(&self, asid: u32, address: u64, limit: u64) -> u64 {
        let next = self.overlay.upper_bound(asid, address);
        match self.overlay.get(next) {
            Some(region) if region.asid() == asid => region.start().min(limit),
            _ => limit,
        }
    }
}

impl<S: AddressSpace> AddressSpace for LayeredSpace<S> {
    fn config(&self) -> &SpaceConfig {
        self.inner.config()
    }

    fn resolve(&self, asid: u32, address: u64) -> Option<&Region> {
        match self.resolver.resolve(&self.overlay, asid, address) {
            Some(resolved) => Some(resolved.region),
            None => self.inner.resolve(asid, address),
        }
    }

    fn copy_out(&self, asid: u32, address: u64, buf: &mut [u8]) -> SpaceResult<()> {
        let mut address = address;
        let mut filled = 0;

        while filled < buf.len() {
            let remaining = (buf.len() - filled) as u64;

            if let Some(resolved) = self.resolver.resolve(&self.overlay, asid, address) {
                let region = resolved.region;
                let available = remaining.min(region.end() - address) as usize;
                let source = region
                    .auxiliary_source()
                    .ok_or_else(|| SpaceError::residency_unavailable(asid, address, "<overlay>"))?;
                let offset = region.file_offset_for(address).ok_or_else(|| {
                    SpaceError::invalid_length(address, available as u64, "file offset overflows 64 bits")
                })?;
                source.read_at(offset, &mut buf[filled..filled + available])?;
                filled += available;
                address += available as u64;
                continue;
            }

            let limit = address.saturating_add(remaining);
            let span = (self.fall_through_end(asid, address, limit) - address) as usize;
            self.inner
                .copy_out(asid, address, &mut buf[filled..filled + span])?;
            filled += span;
            address += span as u64;
        }

        Ok(())
    }

    fn is_accessible(&self, asid: u32, address: u64, length: u64) -> bool {
        if length == 0 {
            return true;
        }
        let Some(target_end) = address.checked_add(length) else {
            return false;
        };

        let mut address = address;
        while address < target_end {
            if let Some(resolved) = self.resolver.resolve(&self.overlay, asid, address) {
                let region = resolved.region;
                let step_end = region.end().min(target_end);
                let backed = region
                    .auxiliary_source()
                    .is_some_and(|source| region.is_backed(source.len(), address, step_end));
                if !backed {
                    return false;
                }
                address = step_end;
                continue;
            }

            let span_end = self.fall_through_end(asid, address, target_end);
            if !self.inner.is_accessible(asid, address, span_end - address) {
                return false;
            }
            address = span_end;
        }
        true
    }

    fn pointer_size(&self, asid: u32) -> usize {
        if self.overlay.is_wide(asid) {
            8
        } else {
            self.inner.pointer_size(asid)
        }
    }

    fn regions(&self) -> Vec<&Region> {
        let mut regions: Vec<&Region> = self.overlay.iter().collect();
        regions.extend(self.inner.regions());
        // Stable: overlay Regions stay ahead of wrapped ones with equal keys.
        regions.sort_by_key(|r| (r.asid(), r.start()));
        regions
    }

    fn scan_cursor(&self) -> &Cell<ScanCursor> {
        &self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BytesSource;
    use crate::space::test_support::{counting_source, two_region_snapshot};
    use crate::space::SingleFileSpace;
    use std::sync::Arc;

    fn layered() -> LayeredSpace<SingleFileSpace> {
        let (core, regions) = two_region_snapshot();
        let base = SingleFileSpace::new(core, regions, SpaceConfig::default()).unwrap();
        LayeredSpace::new(base, 0)
    }

    #[test]
    fn test_falls_through_without_overlay() {
        let space = layered();
        assert_eq!(space.read_u8(0, 0x1050).unwrap(), 0xff);
        assert!(space.resolve(0, 0x2000).is_none());
        assert!(space.read_u8(0, 0x2000).is_err());
    }

    #[test]
    fn test_overlay_fills_gap() {
        let mut space = layered();
        space
            .map_region(0x2000, counting_source("libnative.so", 0x1000), 0x800, 0x100)
            .unwrap();

        assert_eq!(space.read_u8(0, 0x2010).unwrap(), 0x10);
        assert!(space.resolve(0, 0x2000).is_some());
        assert!(space.inner().resolve(0, 0x2000).is_none());
        assert_eq!(space.overlay_regions().len(), 1);
        assert_eq!(space.regions().len(), 3);
    }

    #[test]
    fn test_overlay_shadows_inner_and_spans() {
        let mut space = layered();
        let patch = Arc::new(BytesSource::new("patch", vec![0xab; 0x10]));
        space.map_region(0x1048, patch, 0, 0x10).unwrap();

        // The overlay hides the 0xff at 0x1050.
        assert_eq!(space.read_u8(0, 0x1050).unwrap(), 0xab);

        let bytes = space.read_bytes(0, 0x1040, 0x20).unwrap();
        assert_eq!(&bytes[..8], &[0u8; 8]);
        assert_eq!(&bytes[8..0x18], &[0xab; 0x10]);
        assert_eq!(&bytes[0x18..], &[0u8; 8]);
    }

    #[test]
    fn test_earlier_overlay_wins() {
        let mut space = layered();
        space
            .map_region(0x3000, Arc::new(BytesSource::new("a", vec![0xaa; 0x100])), 0, 0x100)
            .unwrap();
        space
            .map_region(0x3000, Arc::new(BytesSource::new("b", vec![0xbb; 0x100])), 0, 0x100)
            .unwrap();
        assert_eq!(space.read_u8(0, 0x3080).unwrap(), 0xaa);
    }

    #[test]
    fn test_map_region_rejects_bad_sizes() {
        let mut space = layered();
        let source = counting_source("lib", 0x10);
        assert!(space.map_region(0x4000, source.clone(), 0, 0).is_err());
        assert!(space.map_region(u64::MAX - 4, source.clone(), 0, 0x10).is_err());
        assert!(matches!(
            space.map_region(0x4000, source, u64::MAX - 4, 0x10),
            Err(SpaceError::InvalidLength { .. })
        ));
        assert!(space.overlay_regions().is_empty());
    }

    #[test]
    fn test_overlay_only_covers_its_asid() {
        let mut space = layered();
        space
            .map_region(0x2000, counting_source("lib", 0x100), 0, 0x100)
            .unwrap();
        assert!(space.read_u8(1, 0x2000).is_err());
    }

    #[test]
    fn test_accessibility_across_layers() {
        let mut space = layered();
        space
            .map_region(0x1200, counting_source("lib", 0x100), 0, 0x100)
            .unwrap();

        let cases: &[(u64, u64)] = &[
            (0x1000, 0x300),
            (0x1000, 0x301),
            (0x11f0, 0x20),
            (0x1250, 0x10),
            (0x2000, 0x1),
        ];
        for &(address, length) in cases {
            assert_eq!(
                space.is_accessible(0, address, length),
                space.read_bytes(0, address, length as usize).is_ok(),
                "address {:#x} length {:#x}",
                address,
                length
            );
        }
        assert!(space.is_accessible(0, 0x1000, 0x300));
    }

    #[test]
    fn test_overlay_past_end_of_library() {
        let mut space = layered();
        // Only 0x40 of the 0x100 mapped bytes exist in the library file.
        space
            .map_region(0x3000, counting_source("libshort.so", 0x80), 0x40, 0x100)
            .unwrap();

        assert_eq!(space.read_u8(0, 0x3000).unwrap(), 0x40);
        assert!(space.is_accessible(0, 0x3000, 0x40));
        assert!(space.read_bytes(0, 0x3000, 0x40).is_ok());
        assert!(!space.is_accessible(0, 0x3000, 0x41));
        assert!(matches!(
            space.read_bytes(0, 0x3000, 0x41),
            Err(SpaceError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_wide_overlay_widens_pointers() {
        let mut space = layered();
        assert_eq!(space.pointer_size(0), 4);
        space
            .map_region(0x7fff_0000_0000, counting_source("lib", 0x10), 0, 0x10)
            .unwrap();
        assert_eq!(space.pointer_size(0), 8);
    }
}
