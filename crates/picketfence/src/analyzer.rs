//! High-level analysis API.
//!
//! [`PicketFence`] is the primary entry point. It wraps an
//! [`AnalysisConfig`] and runs the pipeline on one acquisition at a time.

use std::path::Path;

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::image::EpidImage;
use crate::mlc::MlcArrangement;
use crate::pipeline::{self, PfResult};

/// Primary analysis interface.
///
/// Create once, analyze many acquisitions.
///
/// # Examples
///
/// ```
/// use picketfence::{PicketFence, synthetic::SyntheticFence};
///
/// let image = SyntheticFence::evenly_spaced(5, 30.0).to_epid().unwrap();
/// let result = PicketFence::default().analyze(&[image]).unwrap();
/// assert!(result.passed());
/// println!("{}", result.text_summary());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PicketFence {
    config: AnalysisConfig,
}

impl PicketFence {
    /// Analyzer with default settings for a leaf bank.
    pub fn new(mlc: MlcArrangement) -> Self {
        Self {
            config: AnalysisConfig::for_mlc(mlc),
        }
    }

    /// Create with full config control.
    pub fn with_config(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Load a JSON config and create an analyzer in one step.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::with_config(AnalysisConfig::from_json_file(path)?))
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Mutable access for post-construction tuning.
    pub fn config_mut(&mut self) -> &mut AnalysisConfig {
        &mut self.config
    }

    /// Analyze one acquisition, given as one or more superimposed frames.
    ///
    /// Errors are measured against a line fitted through each picket.
    pub fn analyze(&self, images: &[EpidImage]) -> Result<PfResult> {
        pipeline::run(images, &self.config, None)
    }

    /// Analyze against known delivered picket positions (mm from the image
    /// center along leaf travel), e.g. derived from machine logs.
    ///
    /// Errors are absolute: `measured - expected`.
    pub fn analyze_with_expected(
        &self,
        images: &[EpidImage],
        expected_positions_mm: &[f64],
    ) -> Result<PfResult> {
        pipeline::run(images, &self.config, Some(expected_positions_mm))
    }
}
