//! Picket location, per-leaf sampling and line fitting.
//!
//! Data flows `locate` → `sample` → `fit`:
//! - [`PicketSeed`]s carry the approximate travel position of each stripe,
//!   either found in the image or supplied externally.
//! - [`SampledPicket`]s add one [`LeafSample`] per measured leaf pair.
//! - [`Picket`]s carry the reference line and classified [`MlcValue`]s.

pub(crate) mod fit;
pub(crate) mod locate;
pub(crate) mod sample;

pub use fit::{fit_picket, FitConfig, PicketFit};
pub use locate::LocatorConfig;
pub use sample::SamplerConfig;

use crate::profile::median_f64;
use crate::tolerance::Classification;

/// Where a picket's approximate position came from.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeedSource {
    /// Peak of the image travel profile.
    Profile { prominence: f32 },
    /// Externally supplied absolute position (e.g. derived from machine logs).
    External,
}

/// Approximate travel position of one picket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PicketSeed {
    /// Travel position relative to the image center (mm).
    pub center_mm: f64,
    pub source: SeedSource,
}

/// One leaf pair's measured peak inside one picket.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LeafSample {
    /// 0-based leaf-pair index in the MLC arrangement.
    pub leaf_index: usize,
    /// Leaf-pair center along the stacking axis (mm).
    pub lateral_mm: f64,
    /// Sub-pixel FWHM center along the travel axis (mm from image center).
    pub measured_mm: f64,
    /// Full width at half maximum of the leaf profile (mm).
    pub fwhm_mm: f64,
}

/// Picket seed plus the leaf samples collected for it, ordered by leaf index.
#[derive(Debug, Clone)]
pub struct SampledPicket {
    pub seed: PicketSeed,
    pub samples: Vec<LeafSample>,
}

/// Line a picket's measurements are compared against.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PicketReference {
    /// Polynomial fitted through the picket's own measurements.
    Fitted(PicketFit),
    /// Known delivered position; errors are absolute.
    Absolute { expected_mm: f64 },
}

impl PicketReference {
    /// Ideal travel position at a lateral position (mm).
    pub fn ideal_at(&self, lateral_mm: f64) -> f64 {
        match self {
            Self::Fitted(fit) => fit.eval(lateral_mm),
            Self::Absolute { expected_mm } => *expected_mm,
        }
    }

    /// Slope of the reference line along the stacking axis (mm/mm).
    pub fn slope(&self) -> f64 {
        match self {
            Self::Fitted(fit) => fit.slope(),
            Self::Absolute { .. } => 0.0,
        }
    }
}

/// Per leaf-pair measurement record.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MlcValue {
    pub leaf_index: usize,
    /// Leaf-pair center along the stacking axis (mm).
    pub lateral_position_mm: f64,
    /// Measured peak center along the travel axis (mm).
    pub measured_position_mm: f64,
    /// Reference line value at this leaf (mm).
    pub ideal_position_mm: f64,
    /// `measured - ideal` (mm).
    pub error_mm: f64,
    pub fwhm_mm: f64,
    pub classification: Classification,
}

impl MlcValue {
    pub fn abs_error_mm(&self) -> f64 {
        self.error_mm.abs()
    }

    pub fn passed(&self) -> bool {
        self.classification != Classification::Fail
    }
}

/// A finalized picket.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Picket {
    /// 0-based position in travel order among kept pickets.
    pub index: usize,
    pub reference: PicketReference,
    /// Leaf measurements ordered by leaf index; indices are unique.
    pub values: Vec<MlcValue>,
}

impl Picket {
    /// Reference position on the central axis (lateral 0 mm).
    pub fn offset_from_cax_mm(&self) -> f64 {
        self.reference.ideal_at(0.0)
    }

    pub fn n_leaves(&self) -> usize {
        self.values.len()
    }

    /// Worst leaf of this picket by absolute error.
    pub fn max_error(&self) -> Option<&MlcValue> {
        self.values
            .iter()
            .max_by(|a, b| a.abs_error_mm().total_cmp(&b.abs_error_mm()))
    }

    pub fn max_error_mm(&self) -> f64 {
        self.max_error().map_or(0.0, MlcValue::abs_error_mm)
    }

    pub fn median_error_mm(&self) -> f64 {
        let abs: Vec<f64> = self.values.iter().map(MlcValue::abs_error_mm).collect();
        median_f64(&abs).unwrap_or(0.0)
    }

    pub fn passed(&self) -> bool {
        self.values.iter().all(MlcValue::passed)
    }
}

/// Picket discarded before fitting for lack of samples.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DroppedPicket {
    /// Seed position (mm from image center).
    pub center_mm: f64,
    pub n_samples: usize,
    pub reason: String,
}
