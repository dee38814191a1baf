//! Resolver: address-to-Region lookup with a two-slot direct-hit cache.

use crate::index::RegionIndex;
use crate::region::Region;
use std::cell::Cell;
use tracing::trace;

/// A successful lookup: the Region and its position in the index.
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    pub position: usize,
    pub region: &'a Region,
}

/// Stateful lookup engine over a [`RegionIndex`].
///
/// The cache remembers the position of the last hit and probes it and the
/// next position first, which serves sequential reads without a search. It
/// holds plain positions, never references, and lives in a `Cell`: a
/// `Resolver` is `!Sync`, so one instance must not be shared between threads
/// without external locking.
///
/// Lookups are deterministic under overlap: the first eligible Region in
/// `(asid, start)` order that contains the address wins.
#[derive(Debug, Default)]
pub struct Resolver {
    last: Cell<Option<usize>>,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver::default()
    }

    /// Forget the cached position. Required whenever the index it was used
    /// with changes shape.
    pub fn invalidate(&self) {
        self.last.set(None);
    }

    /// The cached position, if any.
    pub fn cached_position(&self) -> Option<usize> {
        self.last.get()
    }

    /// Find the Region that serves `address` in `asid`.
    pub fn resolve<'a>(&self, index: &'a RegionIndex, asid: u32, address: u64) -> Option<Resolved<'a>> {
        if let Some(last) = self.last.get() {
            for position in [last, last.wrapping_add(1)] {
                if let Some(region) = Self::direct_hit(index, position, asid, address) {
                    self.last.set(Some(position));
                    return Some(Resolved { position, region });
                }
            }
        }

        let insertion = index.upper_bound(asid, address);
        if insertion > 0 {
            let position = insertion - 1;
            if let Some(region) = Self::direct_hit(index, position, asid, address) {
                self.last.set(Some(position));
                return Some(Resolved { position, region });
            }
        }

        // Only reached under overlap, or when the candidate is not eligible.
        let begin = index.first_position_of_asid(asid);
        if begin < insertion {
            trace!(asid, address = %format_args!("{:#x}", address), "resolver linear fallback");
        }
        let found = (begin..insertion).find_map(|position| {
            let region = index.get(position)?;
            (region.contains(address) && region.is_eligible()).then_some(Resolved { position, region })
        });
        if let Some(resolved) = found {
            self.last.set(Some(resolved.position));
        }
        found
    }

    /// The Region at `position` if it contains the address, is eligible, and
    /// no earlier Region of the asid could also contain the address.
    fn direct_hit(index: &RegionIndex, position: usize, asid: u32, address: u64) -> Option<&Region> {
        let region = index.get(position)?;
        let hit = region.asid() == asid
            && region.contains(address)
            && region.is_eligible()
            && !index.shadowed_before(position, address);
        hit.then_some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BytesSource;
    use std::sync::Arc;

    fn sample_index() -> RegionIndex {
        RegionIndex::new(vec![
            Region::resident(0, 0x3000, 0x1000, 0x2000),
            Region::resident(0, 0x1000, 0x1000, 0x0),
            Region::resident(1, 0x1000, 0x800, 0x3000),
            Region::resident(0, 0xffff_8000_0000_0000, 0x1000, 0x1000),
        ])
    }

    #[test]
    fn test_containment() {
        let index = sample_index();
        let resolver = Resolver::new();
        for region in &index {
            for address in [region.start(), region.start() + 1, region.end() - 1] {
                let resolved = resolver.resolve(&index, region.asid(), address).unwrap();
                assert_eq!(resolved.region, region);
            }
        }
    }

    #[test]
    fn test_unmapped_addresses() {
        let index = sample_index();
        let resolver = Resolver::new();
        assert!(resolver.resolve(&index, 0, 0x0).is_none());
        assert!(resolver.resolve(&index, 0, 0x2000).is_none());
        assert!(resolver.resolve(&index, 0, 0x4000).is_none());
        assert!(resolver.resolve(&index, 1, 0x1800).is_none());
        assert!(resolver.resolve(&index, 2, 0x1000).is_none());
        assert!(resolver.resolve(&index, 0, u64::MAX).is_none());
    }

    #[test]
    fn test_high_addresses_compare_unsigned() {
        let index = sample_index();
        let resolver = Resolver::new();
        let resolved = resolver.resolve(&index, 0, 0xffff_8000_0000_0010).unwrap();
        assert_eq!(resolved.region.file_offset(), 0x1000);
    }

    #[test]
    fn test_cache_transparency() {
        let index = sample_index();
        let resolver = Resolver::new();

        let first = resolver.resolve(&index, 0, 0x1010).unwrap();
        assert_eq!(resolver.cached_position(), Some(first.position));
        let second = resolver.resolve(&index, 0, 0x1010).unwrap();
        assert_eq!(first.region, second.region);
        assert_eq!(first.position, second.position);

        // The cached slot must not answer for another asid.
        assert!(resolver.resolve(&index, 1, 0x1900).is_none());
        let other = resolver.resolve(&index, 1, 0x1010).unwrap();
        assert_eq!(other.region.asid(), 1);

        resolver.invalidate();
        let third = resolver.resolve(&index, 0, 0x1010).unwrap();
        assert_eq!(first.region, third.region);
    }

    #[test]
    fn test_sequential_hits_next_slot() {
        let index = sample_index();
        let resolver = Resolver::new();
        resolver.resolve(&index, 0, 0x1fff).unwrap();
        let next = resolver.resolve(&index, 0, 0x3000).unwrap();
        assert_eq!(next.region.start(), 0x3000);
    }

    #[test]
    fn test_overlap_first_listed_wins() {
        let index = RegionIndex::new(vec![
            Region::resident(0, 0x1800, 0x100, 0xbbb),
            Region::resident(0, 0x1000, 0x1000, 0xaaa),
            Region::resident(0, 0x2800, 0x100, 0xccc),
        ]);
        let resolver = Resolver::new();

        for _ in 0..3 {
            let resolved = resolver.resolve(&index, 0, 0x1850).unwrap();
            assert_eq!(resolved.region.file_offset(), 0xaaa);
        }

        // Past the contained Region the outer one still answers.
        let resolved = resolver.resolve(&index, 0, 0x1950).unwrap();
        assert_eq!(resolved.region.file_offset(), 0xaaa);

        // Warm the cache on the inner Region's neighbour and ask again.
        resolver.resolve(&index, 0, 0x2810).unwrap();
        let resolved = resolver.resolve(&index, 0, 0x1850).unwrap();
        assert_eq!(resolved.region.file_offset(), 0xaaa);
    }

    #[test]
    fn test_ineligible_region_does_not_match() {
        let library = Arc::new(BytesSource::new("libfoo.so", vec![0u8; 0x100]));
        let index = RegionIndex::new(vec![
            Region::non_resident(0, 0x1000, 0x100, 0),
            Region::non_resident(0, 0x2000, 0x100, 0).with_auxiliary_source(library),
            Region::resident(0, 0x1000, 0x80, 0x40),
        ]);
        let resolver = Resolver::new();

        assert!(resolver.resolve(&index, 0, 0x1090).is_none());
        let resolved = resolver.resolve(&index, 0, 0x1010).unwrap();
        assert!(resolved.region.is_resident());
        assert!(resolver.resolve(&index, 0, 0x2010).is_some());
    }
}
