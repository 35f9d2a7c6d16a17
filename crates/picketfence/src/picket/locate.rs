//! Picket seeds: travel-profile peak detection or supplied positions.

use crate::condition::ConditionedImage;
use crate::error::{PicketFenceError, Result};
use crate::profile::{find_peaks, fwhm_center};

use super::{PicketSeed, SeedSource};

/// Picket peak detection on the travel profile.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Minimum peak prominence as a fraction of the profile's max − min.
    pub min_relative_prominence: f32,
    /// Minimum distance between neighbouring pickets (mm). Derived when unset.
    pub min_separation_mm: Option<f64>,
    /// With a known picket count, the derived minimum separation is this
    /// fraction of the irradiated extent divided by the count.
    pub separation_fraction: f64,
    /// Minimum separation used when neither an explicit value nor a picket
    /// count is available (mm).
    pub fallback_separation_mm: f64,
    /// Profile level, as a fraction of max − min, that bounds the irradiated
    /// extent.
    pub extent_level: f32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_relative_prominence: 0.2,
            min_separation_mm: None,
            separation_fraction: 0.5,
            fallback_separation_mm: 5.0,
            extent_level: 0.1,
        }
    }
}

/// Find picket stripes along the travel axis.
///
/// With `num_pickets`, fewer peaks than requested is an error and surplus
/// peaks are trimmed to the most prominent ones.
pub(crate) fn locate_pickets(
    img: &ConditionedImage,
    num_pickets: Option<usize>,
    config: &LocatorConfig,
) -> Result<Vec<PicketSeed>> {
    let profile = img.travel_profile();
    let lo = profile.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = profile.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = hi - lo;
    if !(range > 0.0) {
        return Err(PicketFenceError::picket_detection(
            "travel profile is flat; no pickets visible",
        ));
    }

    let separation_mm = min_separation_mm(&profile, lo, range, img, num_pickets, config);
    let min_distance = (separation_mm / img.travel_spacing_mm()).round().max(1.0) as usize;
    let mut peaks = find_peaks(&profile, config.min_relative_prominence * range, min_distance);
    tracing::debug!(
        n_peaks = peaks.len(),
        separation_mm,
        min_distance,
        "travel profile peaks"
    );

    if peaks.is_empty() {
        return Err(PicketFenceError::picket_detection(
            "no peak in the travel profile clears the prominence threshold",
        ));
    }
    if let Some(n) = num_pickets {
        if peaks.len() < n {
            return Err(PicketFenceError::picket_detection(format!(
                "expected {n} pickets but found {}",
                peaks.len()
            )));
        }
        if peaks.len() > n {
            tracing::debug!(found = peaks.len(), kept = n, "trimming weakest peaks");
            peaks.sort_by(|a, b| b.prominence.total_cmp(&a.prominence));
            peaks.truncate(n);
            peaks.sort_by_key(|p| p.index);
        }
    }

    // Sub-pixel refinement on the profile inside half the separation.
    let half = (min_distance / 2).max(2);
    let seeds: Vec<PicketSeed> = peaks
        .iter()
        .map(|p| {
            let start = p.index.saturating_sub(half);
            let end = (p.index + half + 1).min(profile.len());
            let px = fwhm_center(&profile[start..end], 0.0)
                .map_or(p.index as f64, |f| start as f64 + f.center);
            PicketSeed {
                center_mm: img.travel_px_to_mm(px),
                source: SeedSource::Profile {
                    prominence: p.prominence,
                },
            }
        })
        .collect();

    tracing::info!(n_pickets = seeds.len(), "pickets located");
    Ok(seeds)
}

fn min_separation_mm(
    profile: &[f32],
    lo: f32,
    range: f32,
    img: &ConditionedImage,
    num_pickets: Option<usize>,
    config: &LocatorConfig,
) -> f64 {
    if let Some(mm) = config.min_separation_mm {
        return mm;
    }
    match num_pickets {
        Some(n) if n > 0 => {
            let level = lo + config.extent_level * range;
            let first = profile.iter().position(|&v| v > level);
            let last = profile.iter().rposition(|&v| v > level);
            match (first, last) {
                (Some(a), Some(b)) => {
                    let extent_mm = (b - a + 1) as f64 * img.travel_spacing_mm();
                    config.separation_fraction * extent_mm / n as f64
                }
                _ => config.fallback_separation_mm,
            }
        }
        _ => config.fallback_separation_mm,
    }
}

/// Seed pickets from externally supplied absolute positions (mm from the
/// image center), shifted by `sag_mm`.
pub(crate) fn seeds_from_expected(
    img: &ConditionedImage,
    expected_mm: &[f64],
    sag_mm: f64,
) -> Result<Vec<PicketSeed>> {
    if expected_mm.is_empty() {
        return Err(PicketFenceError::picket_detection(
            "no expected picket positions supplied",
        ));
    }
    if let Some(bad) = expected_mm.iter().find(|v| !v.is_finite()) {
        return Err(PicketFenceError::configuration(format!(
            "expected picket position must be finite (got {bad})"
        )));
    }
    let mut sorted = expected_mm.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(PicketFenceError::configuration(
            "expected picket positions must be distinct",
        ));
    }

    let last_px = img.travel_len() as f64 - 1.0;
    let seeds = sorted
        .into_iter()
        .map(|mm| {
            let center_mm = mm + sag_mm;
            let px = img.travel_mm_to_px(center_mm);
            if !(0.0..=last_px).contains(&px) {
                return Err(PicketFenceError::picket_detection(format!(
                    "expected picket at {mm} mm lies outside the image"
                )));
            }
            Ok(PicketSeed {
                center_mm,
                source: SeedSource::External,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(n_pickets = seeds.len(), sag_mm, "pickets seeded from expected positions");
    Ok(seeds)
}
