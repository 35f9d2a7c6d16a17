//! Per-leaf FWHM sampling inside each picket's travel window.

use rayon::prelude::*;

use crate::condition::ConditionedImage;
use crate::mlc::MlcArrangement;
use crate::profile::{fwhm_center, median_f64};

use super::{LeafSample, PicketSeed, SampledPicket, SeedSource};

/// Per-leaf FWHM sampling controls.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// A leaf is analyzed when its mean signal times this factor reaches the
    /// median leaf signal. Larger values include dimmer edge leaves.
    pub edge_threshold: f64,
    /// Width of the averaged lateral band as a fraction of the leaf width.
    pub leaf_analysis_width_ratio: f64,
    /// Search half-width as a fraction of the smallest picket gap.
    pub search_window_factor: f64,
    /// Search half-width when only one picket exists (mm).
    pub single_picket_window_mm: f64,
    /// Minimum peak height above window background, as a fraction of the
    /// image dynamic range.
    pub min_leaf_prominence: f32,
    /// Sample pickets on the rayon thread pool.
    pub parallel: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 1.5,
            leaf_analysis_width_ratio: 0.4,
            search_window_factor: 0.45,
            single_picket_window_mm: 10.0,
            min_leaf_prominence: 0.15,
            parallel: true,
        }
    }
}

/// Lateral pixel band averaged for one leaf pair.
#[derive(Debug, Clone, Copy)]
struct LeafBand {
    leaf_index: usize,
    lateral_mm: f64,
    lat_lo: usize,
    lat_hi: usize,
}

/// Measure every analyzable leaf pair in every picket.
///
/// Output keeps seed order and leaf order regardless of `config.parallel`.
/// Leaves without a qualifying peak are omitted, never zero-filled.
pub(crate) fn sample_pickets(
    img: &ConditionedImage,
    mlc: &MlcArrangement,
    seeds: &[PicketSeed],
    sag_mm: f64,
    config: &SamplerConfig,
) -> Vec<SampledPicket> {
    let bands = leaf_bands(img, mlc, config);
    let half_window_px = search_half_window_px(img, seeds, sag_mm, config);
    let min_amplitude = config.min_leaf_prominence * img.dynamic_range();
    tracing::debug!(
        n_leaves = bands.len(),
        half_window_px,
        min_amplitude,
        "sampling leaf profiles"
    );

    let sample_one = |seed: &PicketSeed| SampledPicket {
        seed: *seed,
        samples: bands
            .iter()
            .filter_map(|band| sample_leaf(img, band, seed, half_window_px, min_amplitude))
            .collect(),
    };

    if config.parallel {
        seeds.par_iter().map(sample_one).collect()
    } else {
        seeds.iter().map(sample_one).collect()
    }
}

/// Leaves imaged on the panel that carry enough signal to analyze.
fn leaf_bands(img: &ConditionedImage, mlc: &MlcArrangement, config: &SamplerConfig) -> Vec<LeafBand> {
    let (lo_mm, hi_mm) = img.lateral_extent_mm();
    let last = img.lateral_len() - 1;
    let spacing = img.lateral_spacing_mm();

    let candidates: Vec<LeafBand> = mlc
        .leaf_indices_within(lo_mm, hi_mm)
        .into_iter()
        .filter_map(|leaf_index| {
            let lateral_mm = mlc.center_of(leaf_index)?;
            let width = mlc.leaf_width(leaf_index)?;
            let center_px = img.lateral_mm_to_px(lateral_mm);
            let half_px = (0.5 * width * config.leaf_analysis_width_ratio / spacing).max(0.5);
            let lat_lo = (center_px - half_px).round().max(0.0) as usize;
            let lat_hi = ((center_px + half_px).round() as usize).min(last);
            (lat_lo <= lat_hi).then_some(LeafBand {
                leaf_index,
                lateral_mm,
                lat_lo,
                lat_hi,
            })
        })
        .collect();

    let lateral = img.lateral_profile();
    let signal = |b: &LeafBand| {
        lateral[b.lat_lo..=b.lat_hi].iter().map(|&v| v as f64).sum::<f64>()
            / (b.lat_hi - b.lat_lo + 1) as f64
    };
    let signals: Vec<f64> = candidates.iter().map(signal).collect();
    let Some(median) = median_f64(&signals) else {
        return candidates;
    };

    let kept: Vec<LeafBand> = candidates
        .into_iter()
        .zip(&signals)
        .filter(|(_, s)| **s * config.edge_threshold >= median)
        .map(|(b, _)| b)
        .collect();
    tracing::debug!(
        n_candidates = signals.len(),
        n_kept = kept.len(),
        "edge leaf selection"
    );
    kept
}

/// Half-width of the travel search window in pixels.
///
/// Self-located pickets widen the window by the sag; externally seeded
/// pickets already carry the sag in their center.
fn search_half_window_px(
    img: &ConditionedImage,
    seeds: &[PicketSeed],
    sag_mm: f64,
    config: &SamplerConfig,
) -> f64 {
    let mut centers: Vec<f64> = seeds.iter().map(|s| s.center_mm).collect();
    centers.sort_by(|a, b| a.total_cmp(b));
    let min_gap = centers
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    let mut half_mm = if min_gap.is_finite() {
        config.search_window_factor * min_gap
    } else {
        config.single_picket_window_mm
    };
    if seeds
        .iter()
        .any(|s| matches!(s.source, SeedSource::Profile { .. }))
    {
        half_mm += sag_mm.abs();
    }
    half_mm / img.travel_spacing_mm()
}

fn sample_leaf(
    img: &ConditionedImage,
    band: &LeafBand,
    seed: &PicketSeed,
    half_window_px: f64,
    min_amplitude: f32,
) -> Option<LeafSample> {
    let center_px = img.travel_mm_to_px(seed.center_mm);
    let start = (center_px - half_window_px).round().max(0.0) as usize;
    let end = ((center_px + half_window_px).round().max(0.0) as usize)
        .saturating_add(1)
        .min(img.travel_len());
    if end <= start + 2 {
        return None;
    }
    let profile = img.band_profile(band.lat_lo, band.lat_hi, start, end);
    let Some(peak) = fwhm_center(&profile, min_amplitude) else {
        tracing::trace!(
            leaf = band.leaf_index,
            picket_mm = seed.center_mm,
            "no qualifying peak; leaf omitted"
        );
        return None;
    };
    let spacing = img.travel_spacing_mm();
    Some(LeafSample {
        leaf_index: band.leaf_index,
        lateral_mm: band.lateral_mm,
        measured_mm: img.travel_px_to_mm(start as f64 + peak.center),
        fwhm_mm: peak.width * spacing,
    })
}
