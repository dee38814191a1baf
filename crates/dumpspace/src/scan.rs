//! Resumable, aligned pattern search across every mapped Region.
//!
//! The scan walks Regions in `(asid, start)` order, reads fixed-size chunks
//! through the address space and tests only candidate addresses aligned to
//! the requested alignment. The matcher is deliberately naive: `memchr`
//! finds the first byte, then the candidate is compared in full. A match may
//! straddle chunk and Region boundaries as long as the bytes are contiguous.

use crate::error::{SpaceError, SpaceResult};
use crate::space::AddressSpace;
use tracing::trace;

/// Where a pattern was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternMatch {
    pub asid: u32,
    pub address: u64,
}

/// Resumable scan state.
///
/// Remembers the asid of the last successful match, so the next scan starts
/// in that asid (at the caller's `start_from`) instead of at the lowest asid.
/// A scan that finds nothing clears it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    last_asid: Option<u32>,
}

impl ScanCursor {
    pub fn new() -> Self {
        ScanCursor::default()
    }

    /// Asid of the last match, if the previous scan succeeded.
    pub fn last_asid(&self) -> Option<u32> {
        self.last_asid
    }
}

/// Bytes carried from the end of the previous chunk, so that a match
/// spanning two reads is still seen.
struct Carry {
    asid: u32,
    /// Address one past the carried bytes.
    end: u64,
    bytes: Vec<u8>,
}

/// Search for `needle` at addresses aligned to `alignment`, resuming from
/// `cursor` and starting at `start_from`.
///
/// Regions of asids below the cursor's asid are skipped; in the cursor's asid
/// (or the lowest asid, if the cursor is empty) only addresses at or above
/// `start_from` are scanned; later asids are scanned in full.
pub fn find_pattern_with<S: AddressSpace + ?Sized>(
    space: &S,
    cursor: &mut ScanCursor,
    needle: &[u8],
    alignment: u64,
    start_from: u64,
) -> SpaceResult<Option<PatternMatch>> {
    if needle.is_empty() {
        return Err(SpaceError::invalid_length(start_from, 0, "empty search pattern"));
    }
    if alignment == 0 {
        return Err(SpaceError::invalid_length(start_from, 0, "alignment must be non-zero"));
    }

    let chunk_size = (space.config().scan_chunk_size as u64).max(1);
    let regions = space.regions();
    let first_asid = match cursor.last_asid {
        Some(asid) => asid,
        None => match regions.first() {
            Some(region) => region.asid(),
            None => return Ok(None),
        },
    };
    trace!(
        first_asid,
        start_from = %format_args!("{:#x}", start_from),
        resumed = cursor.last_asid.is_some(),
        "pattern scan"
    );

    let mut carry: Option<Carry> = None;
    // Highest address already scanned in the current asid.
    let mut scanned: Option<(u32, u64)> = None;

    for region in regions {
        let asid = region.asid();
        if asid < first_asid {
            continue;
        }

        let mut from = region.start();
        if asid == first_asid {
            from = from.max(start_from);
        }
        if let Some((scanned_asid, scanned_to)) = scanned {
            if scanned_asid == asid {
                from = from.max(scanned_to);
            }
        }
        let end = region.end();
        if from >= end {
            continue;
        }
        scanned = Some((asid, end));

        let Some(mut position) = align_up(from, alignment) else {
            continue;
        };
        // Tail bytes before the first aligned candidate still matter when a
        // carried prefix continues into them.
        if carry.as_ref().is_some_and(|c| c.asid == asid && c.end == from) {
            position = from;
        }

        while position < end {
            let chunk_end = position.saturating_add(chunk_size).min(end);
            let mut chunk = vec![0u8; (chunk_end - position) as usize];
            if let Err(e) = space.read_into(asid, position, &mut chunk) {
                trace!(
                    asid,
                    address = %format_args!("{:#x}", position),
                    error = %e,
                    "skipping unreadable chunk"
                );
                carry = None;
                match align_up(chunk_end, alignment) {
                    Some(next) => position = next,
                    None => break,
                }
                continue;
            }

            // Prepend what the previous chunk left over if it is contiguous.
            let (window_start, window) = match carry.take() {
                Some(c) if c.asid == asid && c.end == position => {
                    let window_start = c.end - c.bytes.len() as u64;
                    let mut window = c.bytes;
                    window.extend_from_slice(&chunk);
                    (window_start, window)
                }
                _ => (position, chunk),
            };

            if let Some(address) = match_in_window(&window, window_start, needle, alignment) {
                cursor.last_asid = Some(asid);
                return Ok(Some(PatternMatch { asid, address }));
            }

            // Candidates in the last `keep` bytes have not been tested yet.
            let keep = (needle.len() - 1).min(window.len());
            let Some(next) = align_up(chunk_end - keep as u64, alignment) else {
                break;
            };
            if next > chunk_end {
                // Skip the bytes before the next candidate without reading them.
                carry = None;
                position = next;
            } else {
                carry = Some(Carry {
                    asid,
                    end: chunk_end,
                    bytes: window[window.len() - keep..].to_vec(),
                });
                position = chunk_end;
            }
        }
    }

    trace!("pattern scan found nothing; resetting cursor");
    cursor.last_asid = None;
    Ok(None)
}

/// First aligned address in `window` (which starts at `window_start`) where
/// `needle` matches.
fn match_in_window(window: &[u8], window_start: u64, needle: &[u8], alignment: u64) -> Option<u64> {
    let first = needle[0];
    let mut pos = 0;

    while pos + needle.len() <= window.len() {
        let rel = memchr::memchr(first, &window[pos..])?;
        let abs = pos + rel;
        if abs + needle.len() > window.len() {
            return None;
        }

        let address = window_start + abs as u64;
        if address % alignment == 0 && window[abs..abs + needle.len()] == *needle {
            return Some(address);
        }
        pos = abs + 1;
    }
    None
}

fn align_up(address: u64, alignment: u64) -> Option<u64> {
    address.checked_next_multiple_of(alignment)
}
