//! Address spaces: the public read facade over a snapshot.
//!
//! Three variants differ only in how Regions map to byte sources:
//!
//! - [`SingleFileSpace`] - every Region lives in one snapshot file
//! - [`DumpSpace`] - Regions live in the snapshot or in per-Region auxiliary
//!   files (pages a core file left out but a library file on disk holds)
//! - [`LayeredSpace`] - an append-only overlay of extra Regions checked
//!   before a wrapped space
//!
//! # Thread Safety
//!
//! Spaces keep their resolver cache and scan cursor in `Cell`s and are
//! therefore `!Sync`. Share one between threads only behind a `Mutex`.

mod dump;
mod layered;
mod mapped;
mod single;

pub use dump::DumpSpace;
pub use layered::LayeredSpace;
pub use single::SingleFileSpace;

use crate::config::{ByteOrder, SpaceConfig};
use crate::error::{SpaceError, SpaceResult};
use crate::region::{Region, RegionFlags};
use crate::scan::{self, PatternMatch, ScanCursor};
use std::cell::Cell;
use tracing::debug;

/// Upper bound on a single `read_c_string` step.
const STRING_READ_STEP: usize = 256;

/// Read access to the virtual memory of a captured process snapshot.
pub trait AddressSpace {
    /// Construction-time settings (byte order, probe threshold, scan chunk).
    fn config(&self) -> &SpaceConfig;

    /// The Region serving `address` in `asid`, if any.
    fn resolve(&self, asid: u32, address: u64) -> Option<&Region>;

    /// Fill `buf` from `address`, crossing Region boundaries as needed.
    ///
    /// Fails as a whole if any byte is unmapped; callers never see partial
    /// progress. Prefer [`AddressSpace::read_into`], which validates the
    /// request first.
    fn copy_out(&self, asid: u32, address: u64, buf: &mut [u8]) -> SpaceResult<()>;

    /// Whether `[address, address + length)` is fully readable, without
    /// touching any backing file.
    fn is_accessible(&self, asid: u32, address: u64, length: u64) -> bool;

    /// Pointer width in bytes for `asid`: 8 if any of its Regions reaches
    /// the 4 GiB boundary, else 4.
    fn pointer_size(&self, asid: u32) -> usize;

    /// All Regions in `(asid, start)` order.
    fn regions(&self) -> Vec<&Region>;

    /// Resumable pattern-scan state owned by this space.
    fn scan_cursor(&self) -> &Cell<ScanCursor>;

    fn byte_order(&self) -> ByteOrder {
        self.config().byte_order
    }

    /// Distinct asids in ascending order.
    fn asids(&self) -> Vec<u32> {
        let mut asids: Vec<u32> = self.regions().iter().map(|r| r.asid()).collect();
        asids.sort_unstable();
        asids.dedup();
        asids
    }

    /// Fill `buf` from `address` after checking the request is well formed.
    fn read_into(&self, asid: u32, address: u64, buf: &mut [u8]) -> SpaceResult<()> {
        check_span(address, buf.len())?;
        self.copy_out(asid, address, buf)
    }

    /// Read `length` bytes starting at `address`.
    ///
    /// Requests above the configured probe threshold are checked with
    /// [`AddressSpace::is_accessible`] before any buffer is allocated, so a
    /// corrupt length fails cleanly instead of exhausting memory.
    fn read_bytes(&self, asid: u32, address: u64, length: usize) -> SpaceResult<Vec<u8>> {
        check_span(address, length)?;
        if length > self.config().probe_threshold
            && !self.is_accessible(asid, address, length as u64)
        {
            debug!(
                asid,
                address = %format_args!("{:#x}", address),
                length,
                "rejected oversized read over unmapped memory"
            );
            return Err(SpaceError::unmapped(asid, address));
        }

        let mut buf = vec![0u8; length];
        self.copy_out(asid, address, &mut buf)?;
        Ok(buf)
    }

    fn read_u8(&self, asid: u32, address: u64) -> SpaceResult<u8> {
        let mut bytes = [0u8; 1];
        self.read_into(asid, address, &mut bytes)?;
        Ok(bytes[0])
    }

    fn read_u16(&self, asid: u32, address: u64) -> SpaceResult<u16> {
        let mut bytes = [0u8; 2];
        self.read_into(asid, address, &mut bytes)?;
        Ok(self.byte_order().u16(bytes))
    }

    fn read_u32(&self, asid: u32, address: u64) -> SpaceResult<u32> {
        let mut bytes = [0u8; 4];
        self.read_into(asid, address, &mut bytes)?;
        Ok(self.byte_order().u32(bytes))
    }

    fn read_u64(&self, asid: u32, address: u64) -> SpaceResult<u64> {
        let mut bytes = [0u8; 8];
        self.read_into(asid, address, &mut bytes)?;
        Ok(self.byte_order().u64(bytes))
    }

    fn read_i32(&self, asid: u32, address: u64) -> SpaceResult<i32> {
        self.read_u32(asid, address).map(|v| v as i32)
    }

    fn read_i64(&self, asid: u32, address: u64) -> SpaceResult<i64> {
        self.read_u64(asid, address).map(|v| v as i64)
    }

    /// Read a pointer-sized value: 8 bytes for wide asids, otherwise 4
    /// bytes zero-extended.
    fn read_pointer(&self, asid: u32, address: u64) -> SpaceResult<u64> {
        match self.pointer_size(asid) {
            8 => self.read_u64(asid, address),
            _ => self.read_u32(asid, address).map(u64::from),
        }
    }

    /// Read a NUL-terminated string of at most `max_length` bytes.
    ///
    /// Reading stops at the terminator, so a string ending just before an
    /// unmapped page is still returned. Hitting `max_length` without a
    /// terminator returns what was read.
    fn read_c_string(&self, asid: u32, address: u64, max_length: usize) -> SpaceResult<String> {
        let mut bytes = Vec::new();
        let mut cursor = address;

        while bytes.len() < max_length {
            let step = (max_length - bytes.len()).min(STRING_READ_STEP);
            let mut chunk = vec![0u8; step];
            if let Err(err) = self.read_into(asid, cursor, &mut chunk) {
                // The terminator may sit before the gap that failed the step.
                let in_region = match self.resolve(asid, cursor) {
                    Some(region) if err.is_unmapped() => (region.end() - cursor).min(step as u64) as usize,
                    _ => return Err(err),
                };
                if in_region == step {
                    return Err(err);
                }
                chunk.truncate(in_region);
                self.read_into(asid, cursor, &mut chunk)?;
            }

            if let Some(nul) = memchr::memchr(0, &chunk) {
                bytes.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(&chunk);
            cursor += chunk.len() as u64;
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Access flags of the Region covering `address`.
    fn flags_at(&self, asid: u32, address: u64) -> SpaceResult<RegionFlags> {
        self.resolve(asid, address)
            .map(Region::flags)
            .ok_or_else(|| SpaceError::unmapped(asid, address))
    }

    fn is_executable(&self, asid: u32, address: u64) -> SpaceResult<bool> {
        self.flags_at(asid, address).map(|f| f.executable)
    }

    fn is_read_only(&self, asid: u32, address: u64) -> SpaceResult<bool> {
        self.flags_at(asid, address).map(|f| f.read_only)
    }

    fn is_shared(&self, asid: u32, address: u64) -> SpaceResult<bool> {
        self.flags_at(asid, address).map(|f| f.shared)
    }

    /// Find the next occurrence of `needle` at an address aligned to
    /// `alignment`.
    ///
    /// This is a continuation, not a pure lookup: the space remembers the
    /// asid of the last hit and the next call resumes in that asid at
    /// `start_from`. A scan that finds nothing clears the remembered asid.
    /// See [`scan::find_pattern_with`] for the explicit-cursor form.
    fn find_pattern(
        &self,
        needle: &[u8],
        alignment: u64,
        start_from: u64,
    ) -> SpaceResult<Option<PatternMatch>> {
        let mut cursor = self.scan_cursor().get();
        let found = scan::find_pattern_with(self, &mut cursor, needle, alignment, start_from)?;
        self.scan_cursor().set(cursor);
        Ok(found)
    }

    /// Forget the remembered scan position.
    fn reset_scan(&self) {
        self.scan_cursor().set(ScanCursor::default());
    }
}

/// Reject requests whose end does not fit in 64 bits.
fn check_span(address: u64, length: usize) -> SpaceResult<()> {
    let length = u64::try_from(length)
        .map_err(|_| SpaceError::invalid_length(address, u64::MAX, "length exceeds 64 bits"))?;
    if address.checked_add(length).is_none() {
        return Err(SpaceError::invalid_length(
            address,
            length,
            "range wraps past the end of the address space",
        ));
    }
    Ok(())
}
