//! picketfence: MLC picket-fence quality assurance for EPID images.
//!
//! A picket fence drives every leaf pair of a multi-leaf collimator to the
//! same positions in turn, leaving narrow bright stripes ("pickets") on the
//! portal imager. This crate measures, per leaf pair and per picket, how far
//! the delivered position deviates from the picket line.
//!
//! Pipeline stages:
//!
//! 1. **Condition** – superimpose frames, median-filter noisy input, undo
//!    inversion, crop edges.
//! 2. **Orientation** – decide whether pickets run vertically or horizontally.
//! 3. **Locate** – find picket peaks on the travel-axis profile, or seed them
//!    from known delivered positions.
//! 4. **Sample** – FWHM sub-pixel peak center for every (picket, leaf pair).
//! 5. **Fit** – least-squares picket line; errors are `measured - fit`.
//! 6. **Classify** – pass / action / fail per leaf, aggregated into
//!    [`PfResult`].
//!
//! # Public API
//! - [`PicketFence`] and [`AnalysisConfig`] as entry points
//! - [`MlcArrangement`] presets and custom banks
//! - [`EpidImage`] input and [`PfResult`] output
//! - [`synthetic`] for rendering test acquisitions

mod analyzer;
mod condition;
mod config;
mod error;
mod filter;
mod image;
mod mlc;
mod orientation;
mod picket;
mod pipeline;
mod profile;
pub mod synthetic;
mod tolerance;

pub use analyzer::PicketFence;
pub use condition::{condition_images, CombineMode, ConditionConfig, ConditionedImage};
pub use config::AnalysisConfig;
pub use error::{PicketFenceError, Result};
pub use crate::image::{AcquisitionMetadata, EpidImage, GrayF32, PixelSpacing};
pub use mlc::{LeafGroup, MlcArrangement, MlcPreset};
pub use orientation::{detect_orientation, Orientation};
pub use picket::{
    fit_picket, DroppedPicket, FitConfig, LeafSample, LocatorConfig, MlcValue, Picket, PicketFit,
    PicketReference, SamplerConfig,
};
pub use pipeline::{ConditioningSummary, LeafSummary, MaxError, PfResult, PicketSummary};
pub use profile::{fwhm_center, FwhmPeak};
pub use tolerance::{Classification, Tolerance};
