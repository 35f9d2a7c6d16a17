//! Picket orientation detection from axis projections.

use crate::image::GrayF32;
use crate::profile::percentile_spread;

/// Half-width of the detrending window as a fraction of the profile length.
const DETREND_HALF_WINDOW_FRACTION: f64 = 0.05;
const MIN_DETREND_HALF_WINDOW: usize = 3;

/// Direction the picket stripes run in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Stripes run top to bottom; leaves travel along image `x` and are
    /// stacked along image `y`.
    #[default]
    Vertical,
    /// Stripes run left to right; leaves travel along image `y` and are
    /// stacked along image `x`.
    Horizontal,
}

impl Orientation {
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertical => "vertical",
            Self::Horizontal => "horizontal",
        }
    }
}

/// Mean of each column (profile along `x`).
pub(crate) fn column_means(img: &GrayF32) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    let mut sums = vec![0.0f64; w];
    for row in img.as_raw().chunks_exact(w) {
        for (s, &v) in sums.iter_mut().zip(row) {
            *s += v as f64;
        }
    }
    sums.into_iter().map(|s| (s / h as f64) as f32).collect()
}

/// Mean of each row (profile along `y`).
pub(crate) fn row_means(img: &GrayF32) -> Vec<f32> {
    let w = img.width() as usize;
    img.as_raw()
        .chunks_exact(w)
        .map(|row| (row.iter().map(|&v| v as f64).sum::<f64>() / w as f64) as f32)
        .collect()
}

/// Decide which axis carries the pickets.
///
/// Pickets make the projection across them strongly modulated while the
/// projection along leaf travel stays comparatively flat. Each mean profile
/// is detrended against a moving average a tenth of its length wide, so jaw
/// edges and flood-field gradients drop out and only narrow structure is
/// compared. The axis with the larger spread of the detrended profile is the
/// picket axis. Ties resolve to [`Orientation::Vertical`].
pub fn detect_orientation(img: &GrayF32) -> Orientation {
    let col_spread = modulation(&column_means(img));
    let row_spread = modulation(&row_means(img));

    let orientation = if col_spread >= row_spread {
        Orientation::Vertical
    } else {
        Orientation::Horizontal
    };
    tracing::debug!(
        col_spread,
        row_spread,
        orientation = orientation.name(),
        "orientation detected"
    );
    orientation
}

/// Full spread of `profile` minus its centered moving average.
fn modulation(profile: &[f32]) -> f32 {
    let n = profile.len();
    if n == 0 {
        return 0.0;
    }
    let half = ((n as f64 * DETREND_HALF_WINDOW_FRACTION).round() as usize)
        .max(MIN_DETREND_HALF_WINDOW);
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    for &v in profile {
        prefix.push(prefix[prefix.len() - 1] + v as f64);
    }
    let detrended: Vec<f32> = (0..n)
        .map(|i| {
            // Shrink symmetrically at the ends so linear trends cancel.
            let h = half.min(i).min(n - 1 - i);
            let (lo, hi) = (i - h, i + h);
            let mean = (prefix[hi + 1] - prefix[lo]) / (hi - lo + 1) as f64;
            (profile[i] as f64 - mean) as f32
        })
        .collect();
    percentile_spread(&detrended, 0.0, 100.0)
}
