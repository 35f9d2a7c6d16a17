//! Shared 1D profile statistics, peak finding and FWHM localization.

/// Value at quantile `q` (0–100) using nearest-rank selection.
///
/// Reorders `values`. Returns `None` for an empty slice.
pub fn percentile(values: &mut [f32], q: f64) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 100.0);
    let rank = ((q / 100.0) * (values.len() - 1) as f64).round() as usize;
    let (_, v, _) = values.select_nth_unstable_by(rank, |a, b| a.total_cmp(b));
    Some(*v)
}

/// Spread between the `hi` and `lo` percentiles of a profile.
pub fn percentile_spread(values: &[f32], lo: f64, hi: f64) -> f32 {
    let mut scratch = values.to_vec();
    match (percentile(&mut scratch, hi), percentile(&mut scratch, lo)) {
        (Some(h), Some(l)) => h - l,
        _ => 0.0,
    }
}

/// Median of `f64` values (mean of the two middle values for even lengths).
pub fn median_f64(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        Some(0.5 * (v[mid - 1] + v[mid]))
    } else {
        Some(v[mid])
    }
}

/// A local maximum of a 1D profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePeak {
    /// Sample index of the maximum (middle of a flat top).
    pub index: usize,
    /// Profile value at the maximum.
    pub height: f32,
    /// Height above the higher of the two surrounding minima.
    pub prominence: f32,
}

/// Find local maxima with at least `min_prominence` and mutually separated by
/// at least `min_distance` samples.
///
/// When two maxima are closer than `min_distance`, the more prominent one is
/// kept. Results are sorted by index.
pub fn find_peaks(values: &[f32], min_prominence: f32, min_distance: usize) -> Vec<ProfilePeak> {
    let n = values.len();
    if n < 3 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    let mut i = 1;
    while i < n - 1 {
        if values[i] > values[i - 1] {
            // Walk across a flat top.
            let mut j = i;
            while j + 1 < n && values[j + 1] == values[i] {
                j += 1;
            }
            if j + 1 < n && values[j + 1] < values[i] {
                let index = (i + j) / 2;
                let prominence = prominence_at(values, i, j);
                if prominence >= min_prominence {
                    candidates.push(ProfilePeak {
                        index,
                        height: values[i],
                        prominence,
                    });
                }
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }

    if min_distance <= 1 {
        return candidates;
    }

    // Keep the most prominent peaks first, suppress close neighbours.
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .prominence
            .total_cmp(&candidates[a].prominence)
            .then(candidates[a].index.cmp(&candidates[b].index))
    });
    let mut keep = vec![false; candidates.len()];
    let mut kept: Vec<usize> = Vec::new();
    for ci in order {
        let idx = candidates[ci].index;
        if kept.iter().all(|&k| idx.abs_diff(k) >= min_distance) {
            keep[ci] = true;
            kept.push(idx);
        }
    }
    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect()
}

/// Prominence of a maximum whose flat top spans `[top_lo, top_hi]`.
fn prominence_at(values: &[f32], top_lo: usize, top_hi: usize) -> f32 {
    let h = values[top_lo];

    let mut left_min = h;
    for &v in values[..top_lo].iter().rev() {
        if v > h {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = h;
    for &v in &values[top_hi + 1..] {
        if v > h {
            break;
        }
        right_min = right_min.min(v);
    }

    h - left_min.max(right_min)
}

/// Result of a full-width-half-maximum measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FwhmPeak {
    /// Midpoint of the two half-maximum crossings (sample units).
    pub center: f64,
    /// Distance between the crossings (sample units).
    pub width: f64,
    /// Peak height above the background.
    pub amplitude: f32,
}

/// Sub-sample center of the main peak in `values` via FWHM.
///
/// The background is the window minimum. Half-maximum crossings on both sides
/// of the maximum are located by linear interpolation between adjacent
/// samples. Returns `None` if the peak rises less than `min_amplitude` above
/// the background or a crossing falls outside the window.
pub fn fwhm_center(values: &[f32], min_amplitude: f32) -> Option<FwhmPeak> {
    if values.len() < 3 {
        return None;
    }
    let (peak_idx, &peak) = values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))?;
    let background = values.iter().copied().fold(f32::INFINITY, f32::min);
    let amplitude = peak - background;
    if !(amplitude > 0.0) || amplitude < min_amplitude {
        return None;
    }
    let half = background + 0.5 * amplitude;

    let left = (0..peak_idx).rev().find(|&i| values[i] < half)?;
    let right = (peak_idx + 1..values.len()).find(|&i| values[i] < half)?;

    let left_x = interpolate_crossing(left, values[left], values[left + 1], half);
    let right_x = interpolate_crossing(right - 1, values[right - 1], values[right], half);

    Some(FwhmPeak {
        center: 0.5 * (left_x + right_x),
        width: right_x - left_x,
        amplitude,
    })
}

/// Position between samples `i` and `i + 1` where the linear segment hits `level`.
fn interpolate_crossing(i: usize, v0: f32, v1: f32, level: f32) -> f64 {
    let dv = (v1 - v0) as f64;
    if dv.abs() < f64::EPSILON {
        return i as f64 + 0.5;
    }
    i as f64 + (level - v0) as f64 / dv
}
