//! Top-level analysis configuration.

use std::path::Path;

use crate::condition::ConditionConfig;
use crate::error::{PicketFenceError, Result};
use crate::mlc::MlcArrangement;
use crate::picket::{FitConfig, LocatorConfig, SamplerConfig};
use crate::tolerance::Tolerance;

const MAX_FIT_DEGREE: usize = 4;

/// Everything a picket-fence run needs besides the images.
///
/// Serialized with defaults for every missing field, so a config file only
/// has to name what it changes:
///
/// ```json
/// { "mlc": "hd_millennium", "tolerance_mm": 0.3, "sampler": { "edge_threshold": 2.0 } }
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Leaf bank geometry (preset name or explicit groups).
    pub mlc: MlcArrangement,
    /// Maximum allowed |error| (mm).
    pub tolerance_mm: f64,
    /// Stricter attention threshold (mm), at most `tolerance_mm`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_tolerance_mm: Option<f64>,
    /// Expected number of pickets. Detected when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_pickets: Option<usize>,
    /// Known panel droop along leaf travel (mm).
    pub sag_adjustment_mm: f64,
    pub condition: ConditionConfig,
    pub locator: LocatorConfig,
    pub sampler: SamplerConfig,
    pub fit: FitConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mlc: MlcArrangement::default(),
            tolerance_mm: 0.5,
            action_tolerance_mm: None,
            num_pickets: None,
            sag_adjustment_mm: 0.0,
            condition: ConditionConfig::default(),
            locator: LocatorConfig::default(),
            sampler: SamplerConfig::default(),
            fit: FitConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Default configuration for a given leaf bank.
    pub fn for_mlc(mlc: MlcArrangement) -> Self {
        Self {
            mlc,
            ..Self::default()
        }
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validated tolerance pair.
    pub fn tolerance(&self) -> Result<Tolerance> {
        Tolerance::new(self.tolerance_mm, self.action_tolerance_mm)
    }

    /// Check every parameter; runs before any image is touched.
    pub fn validate(&self) -> Result<()> {
        self.tolerance()?;

        if self.num_pickets == Some(0) {
            return Err(PicketFenceError::configuration("num_pickets must be >= 1"));
        }
        if !self.sag_adjustment_mm.is_finite() {
            return Err(PicketFenceError::configuration(
                "sag_adjustment_mm must be finite",
            ));
        }

        let c = &self.condition;
        if !c.crop_mm.is_finite() || c.crop_mm < 0.0 {
            return Err(PicketFenceError::configuration(format!(
                "condition.crop_mm must be finite and >= 0 (got {})",
                c.crop_mm
            )));
        }
        if !(c.corner_fraction > 0.0 && c.corner_fraction <= 0.5) {
            return Err(PicketFenceError::configuration(
                "condition.corner_fraction must be in (0, 0.5]",
            ));
        }
        if !(c.noise_tail_percentile > 0.0 && c.noise_tail_percentile < 50.0) {
            return Err(PicketFenceError::configuration(
                "condition.noise_tail_percentile must be in (0, 50)",
            ));
        }
        if !(c.noise_outlier_ratio > 0.0) {
            return Err(PicketFenceError::configuration(
                "condition.noise_outlier_ratio must be > 0",
            ));
        }

        let l = &self.locator;
        if !(l.min_relative_prominence > 0.0 && l.min_relative_prominence < 1.0) {
            return Err(PicketFenceError::configuration(
                "locator.min_relative_prominence must be in (0, 1)",
            ));
        }
        if let Some(sep) = l.min_separation_mm {
            if !sep.is_finite() || sep <= 0.0 {
                return Err(PicketFenceError::configuration(
                    "locator.min_separation_mm must be finite and > 0",
                ));
            }
        }
        if !(l.separation_fraction > 0.0 && l.separation_fraction <= 1.0) {
            return Err(PicketFenceError::configuration(
                "locator.separation_fraction must be in (0, 1]",
            ));
        }

        let s = &self.sampler;
        if !s.edge_threshold.is_finite() || s.edge_threshold <= 0.0 {
            return Err(PicketFenceError::configuration(
                "sampler.edge_threshold must be finite and > 0",
            ));
        }
        if !(s.leaf_analysis_width_ratio > 0.0 && s.leaf_analysis_width_ratio <= 1.0) {
            return Err(PicketFenceError::configuration(
                "sampler.leaf_analysis_width_ratio must be in (0, 1]",
            ));
        }
        if !(s.search_window_factor > 0.0 && s.search_window_factor < 1.0) {
            return Err(PicketFenceError::configuration(
                "sampler.search_window_factor must be in (0, 1)",
            ));
        }
        if !(s.single_picket_window_mm > 0.0) {
            return Err(PicketFenceError::configuration(
                "sampler.single_picket_window_mm must be > 0",
            ));
        }
        if !(s.min_leaf_prominence >= 0.0 && s.min_leaf_prominence < 1.0) {
            return Err(PicketFenceError::configuration(
                "sampler.min_leaf_prominence must be in [0, 1)",
            ));
        }

        if !(1..=MAX_FIT_DEGREE).contains(&self.fit.degree) {
            return Err(PicketFenceError::configuration(format!(
                "fit.degree must be in 1..={MAX_FIT_DEGREE} (got {})",
                self.fit.degree
            )));
        }
        Ok(())
    }
}
