//! Analysis configuration.
//!
//! Every field has a default, so a YAML file only needs to name what it
//! overrides:
//!
//! ```yaml
//! points_to_max_iterations: 2000
//! code_segment:
//!   start: 2049
//!   end: 40959
//! ```

use crate::memory::{AddressRange, MemoryMap};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid address range for {name}: {range}")]
    InvalidRange { name: &'static str, range: AddressRange },
    #[error("{0} must be at least 1")]
    ZeroIterationCap(&'static str),
}

/// Weights of the zero-page priority sub-scores. Each sub-score is still
/// capped (access 40, loop depth 30, hot path 20, type size 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HintWeights {
    /// Points per read or write.
    pub access: u32,
    /// Points per level of loop nesting.
    pub loop_depth: u32,
    /// Points per hot-path access.
    pub hot_path: u32,
}

impl Default for HintWeights {
    fn default() -> Self {
        HintWeights {
            access: 2,
            loop_depth: 10,
            hot_path: 2,
        }
    }
}

/// Configuration shared by every analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sweep cap for constant propagation.
    pub constant_propagation_max_iterations: usize,
    /// Sweep cap for liveness and reaching definitions.
    pub dataflow_max_iterations: usize,
    /// Sweep cap for the points-to constraint solver.
    pub points_to_max_iterations: usize,
    /// Address range holding the program's own code.
    pub code_segment: AddressRange,
    pub memory_map: MemoryMap,
    pub hint_weights: HintWeights,
    /// Emit a warning for each unreachable statement run.
    pub report_unreachable_code: bool,
    /// Emit a warning for each unused function.
    pub report_unused_functions: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            constant_propagation_max_iterations: 10,
            dataflow_max_iterations: 100,
            points_to_max_iterations: 1000,
            code_segment: AddressRange::new(0x0801, 0xCFFF),
            memory_map: MemoryMap::default(),
            hint_weights: HintWeights::default(),
            report_unreachable_code: true,
            report_unused_functions: true,
        }
    }
}

impl AnalysisConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.constant_propagation_max_iterations == 0 {
            return Err(ConfigError::ZeroIterationCap(
                "constant_propagation_max_iterations",
            ));
        }
        if self.dataflow_max_iterations == 0 {
            return Err(ConfigError::ZeroIterationCap("dataflow_max_iterations"));
        }
        if self.points_to_max_iterations == 0 {
            return Err(ConfigError::ZeroIterationCap("points_to_max_iterations"));
        }
        if !self.code_segment.is_valid() {
            return Err(ConfigError::InvalidRange {
                name: "code_segment",
                range: self.code_segment,
            });
        }
        if let Some(range) = self.memory_map.ranges().find(|r| !r.is_valid()) {
            return Err(ConfigError::InvalidRange {
                name: "memory_map",
                range: *range,
            });
        }
        Ok(())
    }
}
