//! Virtual-address resolution and memory access for captured process
//! snapshots (core dumps and similar process-memory images).
//!
//! A snapshot decoder hands this crate an unordered list of [`Region`]s,
//! each describing one mapped interval of one address space and where its
//! bytes live. This crate provides:
//!
//! - [`RegionIndex`] - Regions sorted by `(asid, start)` plus per-asid
//!   pointer width
//! - [`Resolver`] - address lookup with a two-slot cache and a deterministic
//!   "first listed wins" rule for overlapping Regions
//! - [`AddressSpace`] - byte, scalar and pointer reads, accessibility probes
//!   and resumable pattern search, in three variants:
//!   [`SingleFileSpace`], [`DumpSpace`] and [`LayeredSpace`]
//! - [`source`] - the byte sources underneath (seek-and-read files, memory
//!   maps, in-memory buffers)
//!
//! # Example
//!
//! ```rust,ignore
//! use dumpspace::{AddressSpace, Region, SingleFileSpace, SpaceConfig};
//! use dumpspace::source::MmapSource;
//! use std::sync::Arc;
//!
//! let core = Arc::new(MmapSource::open("core.31337")?);
//! let regions = vec![
//!     Region::resident(0, 0x1000, 0x100, 0x0),
//!     Region::resident(0, 0x1100, 0x100, 0x100),
//! ];
//! let space = SingleFileSpace::new(core, regions, SpaceConfig::default())?;
//! let flag = space.read_u8(0, 0x1050)?;
//! ```
//!
//! Spaces are single-threaded (`!Sync`); wrap one in a `Mutex` to share it.

pub mod config;
pub mod error;
pub mod index;
pub mod region;
pub mod resolver;
pub mod scan;
pub mod source;
pub mod space;

// Re-export key types at crate root.
pub use config::{ByteOrder, SpaceConfig};
pub use error::{SpaceError, SpaceResult};
pub use index::RegionIndex;
pub use region::{Region, RegionDescriptor, RegionFlags};
pub use resolver::{Resolved, Resolver};
pub use scan::{find_pattern_with, PatternMatch, ScanCursor};
pub use source::{ByteSource, SourceHandle};
pub use space::{AddressSpace, DumpSpace, LayeredSpace, SingleFileSpace};
