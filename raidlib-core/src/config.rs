// vim: tw=80
//! Library-wide tunables
//!
//! A `LibraryOptions` is built once by whatever constructs the library and is
//! shared by every raid group and raw mirror through an `Arc`.

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::{
    geometry::RotationScheme,
    types::*,
};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryOptions {
    /// Parity rotation used by every parity layout
    pub rotation: RotationScheme,

    /// Requests older than this are reported as stuck
    pub stuck_io_threshold_ms: u64,

    /// How many times to poll for a drive edge that doesn't exist yet
    pub edge_retry_count: u32,

    /// Delay between drive edge polls
    pub edge_retry_interval_ms: u64,

    /// Largest request the backend will accept for one drive
    pub max_backend_io_blocks: BlockCountT,

    /// Run the small-geometry and duplicate-position cross checks even in
    /// release builds
    pub debug_cross_checks: bool,

    /// Extra credits charged per drive I/O while zeroing
    pub zeroing_multiplier: u32,
    /// Extra credits charged per drive I/O for degraded write-logged writes
    pub degraded_multiplier: u32,
    pub parity_degraded_read_multiplier: u32,
    pub parity_degraded_write_multiplier: u32,
    pub mirror_degraded_read_multiplier: u32,
    pub mirror_degraded_write_multiplier: u32,
    /// Degraded requests never cost more than `max_credits` divided by this
    pub credits_ceiling_divisor: u32,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        LibraryOptions {
            rotation: RotationScheme::RightSymmetric,
            stuck_io_threshold_ms: 25_000,
            edge_retry_count: 600,
            edge_retry_interval_ms: 100,
            max_backend_io_blocks: 2048,
            debug_cross_checks: false,
            zeroing_multiplier: 0,
            degraded_multiplier: 0,
            parity_degraded_read_multiplier: 2,
            parity_degraded_write_multiplier: 2,
            mirror_degraded_read_multiplier: 2,
            mirror_degraded_write_multiplier: 2,
            credits_ceiling_divisor: 2,
        }
    }
}

impl LibraryOptions {
    /// Parse options from YAML.  Missing fields take their default values.
    pub fn from_yaml(s: &str) -> Result<Self> {
        let options: LibraryOptions = serde_yaml_ng::from_str(s)
            .map_err(|e| {
                tracing::warn!("rejecting library options: {}", e);
                Error::InvalidParams
            })?;
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<()> {
        if self.credits_ceiling_divisor == 0 || self.max_backend_io_blocks == 0
        {
            return Err(Error::InvalidParams);
        }
        Ok(())
    }

    pub fn stuck_io_threshold(&self) -> Duration {
        Duration::from_millis(self.stuck_io_threshold_ms)
    }

    pub fn edge_retry_interval(&self) -> Duration {
        Duration::from_millis(self.edge_retry_interval_ms)
    }

    /// Should the expensive geometry self checks run?
    pub fn cross_checks_enabled(&self) -> bool {
        cfg!(debug_assertions) || self.debug_cross_checks
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use pretty_assertions::assert_eq;
use super::*;

#[test]
fn defaults() {
    let options = LibraryOptions::from_yaml("{}").unwrap();
    assert_eq!(options, LibraryOptions::default());
    assert_eq!(options.stuck_io_threshold(), Duration::from_secs(25));
}

#[test]
fn partial() {
    let yaml = "rotation: LeftAsymmetric\nedge_retry_count: 3\n";
    let options = LibraryOptions::from_yaml(yaml).unwrap();
    assert_eq!(options.rotation, RotationScheme::LeftAsymmetric);
    assert_eq!(options.edge_retry_count, 3);
    assert_eq!(options.edge_retry_interval_ms, 100);
}

#[test]
fn unknown_field() {
    assert_eq!(LibraryOptions::from_yaml("bogus: 1\n"),
               Err(Error::InvalidParams));
}

#[test]
fn zero_divisor() {
    assert_eq!(LibraryOptions::from_yaml("credits_ceiling_divisor: 0\n"),
               Err(Error::InvalidParams));
}
}
// LCOV_EXCL_STOP
