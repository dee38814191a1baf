//! Shared engine for the file-backed spaces: a Region Index, its Resolver
//! and the primary snapshot source.

use crate::config::SpaceConfig;
use crate::error::{SpaceError, SpaceResult};
use crate::index::RegionIndex;
use crate::region::Region;
use crate::resolver::Resolver;
use crate::scan::ScanCursor;
use crate::source::SourceHandle;
use std::cell::Cell;
use tracing::trace;

pub(crate) struct MappedSpace {
    primary: SourceHandle,
    index: RegionIndex,
    resolver: Resolver,
    config: SpaceConfig,
    cursor: Cell<ScanCursor>,
}

impl MappedSpace {
    pub(crate) fn new(primary: SourceHandle, regions: Vec<Region>, config: SpaceConfig) -> SpaceResult<Self> {
        config.validate()?;
        Ok(MappedSpace {
            primary,
            index: RegionIndex::new(regions),
            resolver: Resolver::new(),
            config,
            cursor: Cell::new(ScanCursor::default()),
        })
    }

    pub(crate) fn primary(&self) -> &SourceHandle {
        &self.primary
    }

    pub(crate) fn index(&self) -> &RegionIndex {
        &self.index
    }

    pub(crate) fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub(crate) fn cursor(&self) -> &Cell<ScanCursor> {
        &self.cursor
    }

    pub(crate) fn resolve(&self, asid: u32, address: u64) -> Option<&Region> {
        self.resolver
            .resolve(&self.index, asid, address)
            .map(|resolved| resolved.region)
    }

    /// The source a Region's bytes are read from.
    fn source_for<'a>(&'a self, region: &'a Region) -> &'a SourceHandle {
        match region.auxiliary_source() {
            Some(source) if !region.is_resident() => source,
            _ => &self.primary,
        }
    }

    /// Error for an address that did not resolve: residency trouble if a
    /// Region covers it, otherwise plain unmapped.
    fn unresolved(&self, asid: u32, address: u64) -> SpaceError {
        match self.index.first_covering(asid, address) {
            Some(region) => {
                let name = region
                    .auxiliary_source()
                    .map(|source| source.name().to_owned())
                    .unwrap_or_else(|| "<no auxiliary source>".to_owned());
                SpaceError::residency_unavailable(asid, address, name)
            }
            None => SpaceError::unmapped(asid, address),
        }
    }

    pub(crate) fn copy_out(&self, asid: u32, address: u64, buf: &mut [u8]) -> SpaceResult<()> {
        let mut address = address;
        let mut filled = 0;

        while filled < buf.len() {
            let region = self
                .resolver
                .resolve(&self.index, asid, address)
                .ok_or_else(|| self.unresolved(asid, address))?
                .region;

            let remaining = (buf.len() - filled) as u64;
            let available = remaining.min(region.end() - address) as usize;
            let offset = region.file_offset_for(address).ok_or_else(|| {
                SpaceError::invalid_length(address, available as u64, "file offset overflows 64 bits")
            })?;
            self.source_for(region)
                .read_at(offset, &mut buf[filled..filled + available])?;

            filled += available;
            address += available as u64;
        }

        Ok(())
    }

    /// Walks the same Regions `copy_out` would read, checking each one's
    /// backing file is long enough, without doing any I/O.
    pub(crate) fn is_accessible(&self, asid: u32, address: u64, length: u64) -> bool {
        if length == 0 {
            return true;
        }
        let Some(target_end) = address.checked_add(length) else {
            return false;
        };

        let mut address = address;
        while address < target_end {
            let Some(resolved) = self.resolver.resolve(&self.index, asid, address) else {
                return false;
            };
            let region = resolved.region;
            let step_end = region.end().min(target_end);
            if !region.is_backed(self.source_for(region).len(), address, step_end) {
                trace!(
                    asid,
                    address = %format_args!("{:#x}", address),
                    source = self.source_for(region).name(),
                    "region extends past its backing file"
                );
                return false;
            }
            address = step_end;
        }
        true
    }

    pub(crate) fn pointer_size(&self, asid: u32) -> usize {
        if self.index.is_wide(asid) {
            8
        } else {
            4
        }
    }

    pub(crate) fn regions(&self) -> Vec<&Region> {
        self.index.iter().collect()
    }
}
