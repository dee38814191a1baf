//! Region Index: the sorted Region sequence plus per-asid derived metadata.

use crate::region::Region;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Regions sorted by `(asid, start)` with unsigned address comparison.
///
/// Built once from an unordered list. Equal keys keep their input order, so
/// "first listed" is well defined under overlap. The index only grows:
/// [`RegionIndex::insert`] adds a Region without reordering existing ones
/// relative to each other.
#[derive(Debug, Clone, Default)]
pub struct RegionIndex {
    regions: Vec<Region>,
    /// `reach[i]` is the largest `end()` among Regions of the same asid at
    /// positions `..=i`. Lets the resolver tell in O(1) whether an earlier
    /// Region could also contain an address.
    reach: Vec<u64>,
    wide_pointer_asids: BTreeSet<u32>,
    overlaps: usize,
}

impl RegionIndex {
    /// Build an index from an unordered list of Regions (possibly empty).
    pub fn new(mut regions: Vec<Region>) -> Self {
        // Stable sort: ties keep input order.
        regions.sort_by_key(Region::key);

        let mut index = RegionIndex {
            regions,
            ..RegionIndex::default()
        };
        index.rebuild_derived();

        debug!(
            regions = index.regions.len(),
            wide_asids = ?index.wide_pointer_asids,
            "built region index"
        );
        if index.overlaps > 0 {
            warn!(
                overlaps = index.overlaps,
                "region index contains overlapping regions; first listed wins"
            );
        }
        index
    }

    /// Append one Region at its sorted position, after any Region with an
    /// equal key.
    pub fn insert(&mut self, region: Region) -> usize {
        let key = region.key();
        let position = self.regions.partition_point(|r| r.key() <= key);
        self.regions.insert(position, region);
        self.rebuild_derived();
        position
    }

    fn rebuild_derived(&mut self) {
        self.reach.clear();
        self.reach.reserve(self.regions.len());
        self.overlaps = 0;

        let mut previous: Option<(u32, u64)> = None;
        for region in &self.regions {
            let reach = match previous {
                Some((asid, reach)) if asid == region.asid() => {
                    if region.start() < reach {
                        self.overlaps += 1;
                    }
                    reach.max(region.end())
                }
                _ => region.end(),
            };
            self.reach.push(reach);
            previous = Some((region.asid(), reach));
        }

        self.wide_pointer_asids.clear();
        let mut i = 0;
        while i < self.regions.len() {
            let asid = self.regions[i].asid();
            if self.regions[i].is_wide() {
                self.wide_pointer_asids.insert(asid);
                // Nothing more to learn about this asid.
                i = self.first_position_after_asid(asid);
            } else {
                i += 1;
            }
        }
    }

    fn first_position_after_asid(&self, asid: u32) -> usize {
        self.regions.partition_point(|r| r.asid() <= asid)
    }

    /// Position of the first Region of `asid` (or where it would be).
    pub fn first_position_of_asid(&self, asid: u32) -> usize {
        self.regions.partition_point(|r| r.asid() < asid)
    }

    /// Number of Regions whose key is `<= (asid, address)`; the Region just
    /// before this position is the binary-search candidate for `address`.
    pub fn upper_bound(&self, asid: u32, address: u64) -> usize {
        self.regions.partition_point(|r| r.key() <= (asid, address))
    }

    /// Whether some Region before `position` in the same asid extends past
    /// `address`, i.e. may also contain it.
    pub fn shadowed_before(&self, position: usize, address: u64) -> bool {
        if position == 0 || position > self.regions.len() {
            return false;
        }
        let previous = position - 1;
        match self.regions.get(position) {
            Some(region) if self.regions[previous].asid() == region.asid() => {
                self.reach[previous] > address
            }
            _ => false,
        }
    }

    /// First Region (eligible or not) containing the address, in index order.
    pub fn first_covering(&self, asid: u32, address: u64) -> Option<&Region> {
        let end = self.upper_bound(asid, address);
        let begin = self.first_position_of_asid(asid);
        self.regions[begin..end].iter().find(|r| r.contains(address))
    }

    pub fn get(&self, position: usize) -> Option<&Region> {
        self.regions.get(position)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Asids with at least one Region reaching the 4 GiB boundary.
    pub fn wide_pointer_asids(&self) -> &BTreeSet<u32> {
        &self.wide_pointer_asids
    }

    pub fn is_wide(&self, asid: u32) -> bool {
        self.wide_pointer_asids.contains(&asid)
    }

    /// Distinct asids in ascending order.
    pub fn asids(&self) -> Vec<u32> {
        let mut asids: Vec<u32> = self.regions.iter().map(Region::asid).collect();
        asids.dedup();
        asids
    }

    /// Number of Regions that start inside an earlier Region of their asid.
    pub fn overlap_count(&self) -> usize {
        self.overlaps
    }
}

impl<'a> IntoIterator for &'a RegionIndex {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}
