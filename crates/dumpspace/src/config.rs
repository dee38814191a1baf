//! Address space configuration.

use crate::error::{SpaceError, SpaceResult};
use serde::{Deserialize, Serialize};

/// Default size above which reads are pre-checked with `is_accessible`.
pub const DEFAULT_PROBE_THRESHOLD: usize = 256 * 1024;

/// Default pattern-scan chunk size.
pub const DEFAULT_SCAN_CHUNK_SIZE: usize = 4096;

/// Byte order used to decode scalars. Fixed when a space is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    pub fn u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        }
    }

    pub fn u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn u64(self, bytes: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        }
    }
}

/// Construction-time settings shared by every address space variant.
///
/// # Example
///
/// ```rust,ignore
/// let config = SpaceConfig::from_json_str(r#"{"byte_order": "big"}"#)?;
/// let space = SingleFileSpace::new(core, regions, config)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    pub byte_order: ByteOrder,
    /// Reads strictly larger than this are checked with `is_accessible`
    /// before a buffer is allocated.
    pub probe_threshold: usize,
    /// Bytes read per step of a pattern scan.
    pub scan_chunk_size: usize,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        SpaceConfig {
            byte_order: ByteOrder::Little,
            probe_threshold: DEFAULT_PROBE_THRESHOLD,
            scan_chunk_size: DEFAULT_SCAN_CHUNK_SIZE,
        }
    }
}

impl SpaceConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> SpaceResult<Self> {
        let config: SpaceConfig = serde_json::from_str(json)
            .map_err(|e| SpaceError::InvalidParameter(format!("bad space config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_probe_threshold(mut self, probe_threshold: usize) -> Self {
        self.probe_threshold = probe_threshold;
        self
    }

    pub fn with_scan_chunk_size(mut self, scan_chunk_size: usize) -> Self {
        self.scan_chunk_size = scan_chunk_size;
        self
    }

    pub fn validate(&self) -> SpaceResult<()> {
        if self.scan_chunk_size == 0 {
            return Err(SpaceError::InvalidParameter(
                "scan_chunk_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
