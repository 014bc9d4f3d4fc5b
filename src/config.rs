// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use serde::Deserialize;

use crate::clock::POOL_DEPTH;
use crate::error::{AlignError, Result};

/// Top-level configuration for the alignment engine.
///
/// Recognized options per the external interface: `pool_depth`,
/// `keep_my_packets`, `verbosity`. `keep_my_packets` is opaque to the engine
/// itself — it only decides which output node name a sink wires up to
/// (`"Packets"` vs `"PacketsKeep"`), so it is carried through but never
/// branched on here.
#[derive(Debug, Deserialize, Clone)]
pub struct AlignConfig {
    /// Sliding-window size used by every `ClockPool`.
    #[serde(default = "default_pool_depth")]
    pub pool_depth: usize,
    /// Sink-wiring hint; not consulted by the engine.
    #[serde(default)]
    pub keep_my_packets: bool,
    /// Diagnostic verbosity. Higher values emit more `tracing` detail.
    #[serde(default)]
    pub verbosity: u32,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            pool_depth: default_pool_depth(),
            keep_my_packets: false,
            verbosity: 0,
        }
    }
}

fn default_pool_depth() -> usize {
    10
}

impl AlignConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AlignError::Config(format!("cannot read config file: {e}")))?;
        let config: AlignConfig = toml::from_str(&content)
            .map_err(|e| AlignError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        // AlignmentChecker's run-length thresholds (the escape to the shift
        // test at 5 bad diffs, the reject-if->=4 bad_indices check, the
        // last-slot special case at index 9) are derived for pool_depth=10
        // specifically, not a formula over an arbitrary depth. A config
        // asking for a different depth can't be honored by this build.
        if self.pool_depth != POOL_DEPTH {
            return Err(AlignError::Config(format!(
                "pool_depth must be {POOL_DEPTH} (got {})",
                self.pool_depth
            )));
        }
        Ok(())
    }
}
