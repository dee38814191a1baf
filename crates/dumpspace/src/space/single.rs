//! Single-file address space: every Region lives in one snapshot file.

use crate::config::SpaceConfig;
use crate::error::{SpaceError, SpaceResult};
use crate::region::Region;
use crate::scan::ScanCursor;
use crate::source::SourceHandle;
use crate::space::mapped::MappedSpace;
use crate::space::AddressSpace;
use std::cell::Cell;

/// An address space whose Regions are all resident in one byte source.
///
/// # Example
///
/// ```rust,ignore
/// use dumpspace::{AddressSpace, Region, SingleFileSpace, SpaceConfig};
/// use dumpspace::source::MmapSource;
///
/// let core = Arc::new(MmapSource::open("/cores/core.4242")?);
/// let regions = vec![Region::resident(0, 0x400000, 0x1000, 0x2000)];
/// let space = SingleFileSpace::new(core, regions, SpaceConfig::default())?;
/// let magic = space.read_u32(0, 0x400000)?;
/// ```
pub struct SingleFileSpace {
    inner: MappedSpace,
}

impl SingleFileSpace {
    /// Build the space from an unordered Region list.
    ///
    /// Regions bound to an auxiliary source are rejected; use
    /// [`DumpSpace`](crate::DumpSpace) for those. Non-resident Regions
    /// without a source are kept as placeholders that never resolve.
    pub fn new(source: SourceHandle, regions: Vec<Region>, config: SpaceConfig) -> SpaceResult<Self> {
        if let Some(region) = regions.iter().find(|r| r.auxiliary_source().is_some()) {
            return Err(SpaceError::InvalidParameter(format!(
                "single-file space cannot hold auxiliary region at {:#x} (asid {})",
                region.start(),
                region.asid()
            )));
        }

        Ok(SingleFileSpace {
            inner: MappedSpace::new(source, regions, config)?,
        })
    }

    /// The snapshot file every Region reads from.
    pub fn source(&self) -> &SourceHandle {
        self.inner.primary()
    }

    /// Asids whose pointers are 8 bytes wide.
    pub fn wide_pointer_asids(&self) -> Vec<u32> {
        self.inner.index().wide_pointer_asids().iter().copied().collect()
    }
}

impl AddressSpace for SingleFileSpace {
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
