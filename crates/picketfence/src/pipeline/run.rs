//! Top-level orchestrator.

use crate::condition::condition_images;
use crate::config::AnalysisConfig;
use crate::error::{PicketFenceError, Result};
use crate::image::EpidImage;
use crate::picket::fit::finalize_pickets;
use crate::picket::locate::{locate_pickets, seeds_from_expected};
use crate::picket::sample::sample_pickets;

use super::PfResult;

/// Run the full analysis on one acquisition.
///
/// `expected_mm` switches to absolute mode: pickets are seeded from those
/// positions and errors are measured against them instead of a fitted line.
pub(crate) fn run(
    images: &[EpidImage],
    config: &AnalysisConfig,
    expected_mm: Option<&[f64]>,
) -> Result<PfResult> {
    config.validate()?;
    let tolerance = config.tolerance()?;

    let img = condition_images(images, &config.condition)?;

    let seeds = match expected_mm {
        Some(expected) => {
            if let Some(n) = config.num_pickets {
                if n != expected.len() {
                    return Err(PicketFenceError::picket_detection(format!(
                        "expected {n} pickets but {} expected positions were supplied",
                        expected.len()
                    )));
                }
            }
            seeds_from_expected(&img, expected, config.sag_adjustment_mm)?
        }
        None => locate_pickets(&img, config.num_pickets, &config.locator)?,
    };

    let sampled = sample_pickets(
        &img,
        &config.mlc,
        &seeds,
        config.sag_adjustment_mm,
        &config.sampler,
    );
    let (pickets, dropped) = finalize_pickets(sampled, &config.fit, &tolerance);

    PfResult::from_pickets(pickets, dropped, &img, &tolerance, config.mlc.name())
}
