//! Image conditioning: superposition, noise filtering, inversion, cropping.
//!
//! Stage order: combine frames → median filter (explicit or auto) → inversion
//! (explicit or auto, on the uncropped frame) → crop → shift to a zero floor →
//! orientation. The result is immutable and shared read-only by every later
//! stage.

use image::imageops;

use crate::error::{PicketFenceError, Result};
use crate::filter::median_filter;
use crate::image::{EpidImage, GrayF32, PixelSpacing};
use crate::orientation::{column_means, detect_orientation, row_means, Orientation};
use crate::profile::percentile;

/// Tail percentile bounding the intensity range for the inversion check.
const INVERSION_RANGE_PERCENTILE: f64 = 0.5;

/// How several frames of one acquisition are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// Element-wise maximum.
    #[default]
    Max,
    /// Element-wise sum.
    Sum,
}

/// Conditioning controls.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    /// Median kernel size applied unconditionally. Disables the noise check.
    pub filter_size: Option<usize>,
    /// Margin stripped from every edge after inversion detection (mm).
    pub crop_mm: f64,
    /// Force (`true`) or forbid (`false`) inversion. `None` auto-detects.
    pub invert: Option<bool>,
    /// Superposition rule for multi-frame input.
    pub combine: CombineMode,
    /// Skip detection and use this orientation.
    pub orientation: Option<Orientation>,
    /// Tail percentile for the noise check; the body spans
    /// `[tail, 100 - tail]`.
    pub noise_tail_percentile: f64,
    /// Auto-filter when the out-of-body tails exceed this fraction of the body.
    pub noise_outlier_ratio: f32,
    /// Kernel size used when the noise check fires.
    pub auto_filter_size: usize,
    /// Corner patch size for inversion detection, as a fraction of each side.
    pub corner_fraction: f64,
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            filter_size: None,
            crop_mm: 0.0,
            invert: None,
            combine: CombineMode::Max,
            orientation: None,
            noise_tail_percentile: 0.5,
            noise_outlier_ratio: 0.5,
            auto_filter_size: 3,
            corner_fraction: 0.05,
        }
    }
}

/// Conditioned intensity frame with orientation-aware accessors.
///
/// "Travel" is the leaf-travel axis (pickets are separated along it);
/// "lateral" is the leaf-stacking axis. Millimetre coordinates are relative
/// to the frame center, which stays on the beam axis because cropping is
/// symmetric.
#[derive(Debug, Clone)]
pub struct ConditionedImage {
    pixels: GrayF32,
    spacing: PixelSpacing,
    inverted: bool,
    filter_size: Option<usize>,
    crop_px: [u32; 2],
    orientation: Orientation,
    dynamic_range: f32,
}

impl ConditionedImage {
    pub fn pixels(&self) -> &GrayF32 {
        &self.pixels
    }

    pub fn spacing(&self) -> PixelSpacing {
        self.spacing
    }

    /// Whether the frame was inverted during conditioning.
    pub fn inverted(&self) -> bool {
        self.inverted
    }

    /// Median kernel size applied, if any.
    pub fn filter_size(&self) -> Option<usize> {
        self.filter_size
    }

    /// Pixels removed from each side as `[x, y]`.
    pub fn crop_px(&self) -> [u32; 2] {
        self.crop_px
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Robust intensity span (0.5–99.5 percentile) used to scale thresholds.
    pub fn dynamic_range(&self) -> f32 {
        self.dynamic_range
    }

    pub fn travel_len(&self) -> usize {
        match self.orientation {
            Orientation::Vertical => self.pixels.width() as usize,
            Orientation::Horizontal => self.pixels.height() as usize,
        }
    }

    pub fn lateral_len(&self) -> usize {
        match self.orientation {
            Orientation::Vertical => self.pixels.height() as usize,
            Orientation::Horizontal => self.pixels.width() as usize,
        }
    }

    pub fn travel_spacing_mm(&self) -> f64 {
        match self.orientation {
            Orientation::Vertical => self.spacing.col_mm,
            Orientation::Horizontal => self.spacing.row_mm,
        }
    }

    pub fn lateral_spacing_mm(&self) -> f64 {
        match self.orientation {
            Orientation::Vertical => self.spacing.row_mm,
            Orientation::Horizontal => self.spacing.col_mm,
        }
    }

    /// Intensity at a (travel, lateral) pixel.
    #[inline]
    pub fn at(&self, travel: usize, lateral: usize) -> f32 {
        let (x, y) = match self.orientation {
            Orientation::Vertical => (travel, lateral),
            Orientation::Horizontal => (lateral, travel),
        };
        self.pixels.as_raw()[y * self.pixels.width() as usize + x]
    }

    /// Travel-axis pixel coordinate → mm from the frame center.
    pub fn travel_px_to_mm(&self, px: f64) -> f64 {
        (px - center_px(self.travel_len())) * self.travel_spacing_mm()
    }

    /// Travel-axis mm from the frame center → pixel coordinate.
    pub fn travel_mm_to_px(&self, mm: f64) -> f64 {
        center_px(self.travel_len()) + mm / self.travel_spacing_mm()
    }

    /// Lateral mm from the frame center → pixel coordinate.
    pub fn lateral_mm_to_px(&self, mm: f64) -> f64 {
        center_px(self.lateral_len()) + mm / self.lateral_spacing_mm()
    }

    /// Lateral span `(low, high)` covered by the frame, in mm.
    pub fn lateral_extent_mm(&self) -> (f64, f64) {
        let c = center_px(self.lateral_len());
        let s = self.lateral_spacing_mm();
        (-c * s, (self.lateral_len() as f64 - 1.0 - c) * s)
    }

    /// Mean over the lateral axis for every travel position.
    pub fn travel_profile(&self) -> Vec<f32> {
        match self.orientation {
            Orientation::Vertical => column_means(&self.pixels),
            Orientation::Horizontal => row_means(&self.pixels),
        }
    }

    /// Mean over the travel axis for every lateral position.
    pub fn lateral_profile(&self) -> Vec<f32> {
        match self.orientation {
            Orientation::Vertical => row_means(&self.pixels),
            Orientation::Horizontal => column_means(&self.pixels),
        }
    }

    /// Mean over lateral pixels `[lat_lo, lat_hi]` for travel pixels
    /// `[travel_lo, travel_hi)`.
    pub fn band_profile(
        &self,
        lat_lo: usize,
        lat_hi: usize,
        travel_lo: usize,
        travel_hi: usize,
    ) -> Vec<f32> {
        let n_lat = (lat_hi - lat_lo + 1) as f32;
        (travel_lo..travel_hi)
            .map(|t| (lat_lo..=lat_hi).map(|l| self.at(t, l)).sum::<f32>() / n_lat)
            .collect()
    }
}

fn center_px(len: usize) -> f64 {
    0.5 * (len as f64 - 1.0)
}

/// Condition one or more frames of a single acquisition.
///
/// A single image is a one-element slice. Fails with
/// [`PicketFenceError::ImageLoad`] when no frames are given, frames disagree
/// in size or spacing, or the crop consumes the whole frame.
pub fn condition_images(images: &[EpidImage], config: &ConditionConfig) -> Result<ConditionedImage> {
    let mut pixels = combine(images, config.combine)?;
    let spacing = images[0].spacing();

    let filter_size = match config.filter_size {
        Some(size) => Some(size),
        None if is_noisy(&pixels, config) => Some(config.auto_filter_size),
        None => None,
    };
    if let Some(size) = filter_size {
        tracing::debug!(size, "applying median filter");
        pixels = median_filter(&pixels, size);
    }

    let inverted = config
        .invert
        .unwrap_or_else(|| corners_brighter_than_body(&pixels, config.corner_fraction));
    if inverted {
        tracing::debug!("inverting image");
        for v in pixels.iter_mut() {
            *v = -*v;
        }
    }

    let crop_px = crop_pixels(&pixels, spacing, config.crop_mm)?;
    if crop_px != [0, 0] {
        let (w, h) = pixels.dimensions();
        pixels = imageops::crop_imm(
            &pixels,
            crop_px[0],
            crop_px[1],
            w - 2 * crop_px[0],
            h - 2 * crop_px[1],
        )
        .to_image();
    }

    let floor = pixels.iter().copied().fold(f32::INFINITY, f32::min);
    for v in pixels.iter_mut() {
        *v -= floor;
    }

    let dynamic_range = {
        let mut scratch = pixels.as_raw().clone();
        let hi = percentile(&mut scratch, 99.5).unwrap_or(0.0);
        let lo = percentile(&mut scratch, 0.5).unwrap_or(0.0);
        hi - lo
    };

    let orientation = config
        .orientation
        .unwrap_or_else(|| detect_orientation(&pixels));

    tracing::info!(
        width = pixels.width(),
        height = pixels.height(),
        inverted,
        filtered = filter_size.is_some(),
        orientation = orientation.name(),
        "image conditioned"
    );

    Ok(ConditionedImage {
        pixels,
        spacing,
        inverted,
        filter_size,
        crop_px,
        orientation,
        dynamic_range,
    })
}

fn combine(images: &[EpidImage], mode: CombineMode) -> Result<GrayF32> {
    let (first, rest) = images
        .split_first()
        .ok_or_else(|| PicketFenceError::image_load("no images supplied"))?;
    let dims = first.pixels().dimensions();
    let spacing = first.spacing();
    spacing.validate()?;

    let mut out = first.pixels().clone();
    for (i, img) in rest.iter().enumerate() {
        if img.pixels().dimensions() != dims {
            return Err(PicketFenceError::image_load(format!(
                "image {} is {:?}, expected {:?}",
                i + 1,
                img.pixels().dimensions(),
                dims
            )));
        }
        if img.spacing() != spacing {
            return Err(PicketFenceError::image_load(format!(
                "image {} pixel spacing differs from the first image",
                i + 1
            )));
        }
        for (dst, &src) in out.iter_mut().zip(img.pixels().iter()) {
            *dst = match mode {
                CombineMode::Max => dst.max(src),
                CombineMode::Sum => *dst + src,
            };
        }
    }
    if !rest.is_empty() {
        tracing::debug!(n_images = images.len(), ?mode, "superimposed images");
    }
    Ok(out)
}

/// True when isolated pixels reach far outside the body of the distribution.
///
/// Smooth picket patterns put their extremes inside a few percent of the
/// pixels, so the tails beyond `[p, 100 - p]` stay short. Hot or dead pixels
/// stretch them well past the body span.
fn is_noisy(pixels: &GrayF32, config: &ConditionConfig) -> bool {
    let mut scratch = pixels.as_raw().clone();
    let tail = config.noise_tail_percentile;
    let (Some(lo), Some(hi)) = (
        percentile(&mut scratch, tail),
        percentile(&mut scratch, 100.0 - tail),
    ) else {
        return false;
    };
    let body = hi - lo;
    if !(body > 0.0) {
        return false;
    }
    let min = scratch.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scratch.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let tails = (max - hi) + (lo - min);
    let noisy = tails > config.noise_outlier_ratio * body;
    tracing::debug!(body, tails, noisy, "noise check");
    noisy
}

/// True when the four corner patches sit on the bright side of the frame.
///
/// The pooled median of the corner pixels is compared with the midpoint of
/// the frame's robust intensity range. A picket crossing a corner patch
/// covers a minority of its pixels and leaves the median on background.
fn corners_brighter_than_body(pixels: &GrayF32, corner_fraction: f64) -> bool {
    let (w, h) = pixels.dimensions();
    let cw = ((w as f64 * corner_fraction).round() as u32).clamp(1, w);
    let ch = ((h as f64 * corner_fraction).round() as u32).clamp(1, h);

    let mut corners = Vec::with_capacity(4 * (cw * ch) as usize);
    for (x0, y0) in [(0, 0), (w - cw, 0), (0, h - ch), (w - cw, h - ch)] {
        for y in y0..y0 + ch {
            for x in x0..x0 + cw {
                corners.push(pixels.get_pixel(x, y)[0]);
            }
        }
    }
    let mut body = pixels.as_raw().clone();
    let (Some(corner_median), Some(lo), Some(hi)) = (
        percentile(&mut corners, 50.0),
        percentile(&mut body, INVERSION_RANGE_PERCENTILE),
        percentile(&mut body, 100.0 - INVERSION_RANGE_PERCENTILE),
    ) else {
        return false;
    };
    let mid_level = 0.5 * (lo + hi);
    tracing::debug!(corner_median, mid_level, "inversion check");
    corner_median > mid_level
}

fn crop_pixels(pixels: &GrayF32, spacing: PixelSpacing, crop_mm: f64) -> Result<[u32; 2]> {
    if !crop_mm.is_finite() || crop_mm < 0.0 {
        return Err(PicketFenceError::configuration(format!(
            "crop_mm must be finite and >= 0 (got {crop_mm})"
        )));
    }
    let (w, h) = pixels.dimensions();
    let cx = (crop_mm / spacing.col_mm).round();
    let cy = (crop_mm / spacing.row_mm).round();
    if 2.0 * cx >= w as f64 || 2.0 * cy >= h as f64 {
        return Err(PicketFenceError::image_load(format!(
            "crop of {crop_mm} mm removes the whole {w}x{h} image"
        )));
    }
    Ok([cx as u32, cy as u32])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32, f: impl Fn(u32, u32) -> f32) -> EpidImage {
        let px = GrayF32::from_fn(w, h, |x, y| image::Luma([f(x, y)]));
        EpidImage::new(px, PixelSpacing::isotropic(0.5)).unwrap()
    }

    fn stripes(x: u32, _y: u32) -> f32 {
        if (8..12).contains(&(x % 20)) {
            900.0
        } else {
            100.0
        }
    }

    #[test]
    fn empty_input_is_an_image_load_error() {
        let err = condition_images(&[], &ConditionConfig::default()).unwrap_err();
        assert!(matches!(err, PicketFenceError::ImageLoad(_)));
    }

    #[test]
    fn mismatched_frames_are_rejected() {
        let a = frame(40, 30, stripes);
        let b = frame(41, 30, stripes);
        let err = condition_images(&[a.clone(), b], &ConditionConfig::default()).unwrap_err();
        assert!(format!("{err}").contains("image 1"));

        let c = EpidImage::new(a.pixels().clone(), PixelSpacing::isotropic(0.4)).unwrap();
        let err = condition_images(&[a, c], &ConditionConfig::default()).unwrap_err();
        assert!(format!("{err}").contains("spacing"));
    }

    #[test]
    fn dark_field_image_is_not_inverted_and_floor_is_zero() {
        let img = condition_images(&[frame(60, 40, stripes)], &ConditionConfig::default()).unwrap();
        assert!(!img.inverted());
        assert_eq!(img.filter_size(), None);
        assert_eq!(img.pixels().get_pixel(0, 0)[0], 0.0);
        assert_eq!(img.pixels().get_pixel(9, 0)[0], 800.0);
        assert_eq!(img.orientation(), Orientation::Vertical);
    }

    #[test]
    fn bright_field_image_is_auto_inverted() {
        let img = condition_images(
            &[frame(60, 40, |x, y| 1000.0 - stripes(x, y))],
            &ConditionConfig::default(),
        )
        .unwrap();
        assert!(img.inverted());
        // Stripes are bright again after inversion.
        assert!(img.pixels().get_pixel(9, 5)[0] > img.pixels().get_pixel(1, 5)[0]);
    }

    #[test]
    fn conditioning_is_idempotent_without_forced_inversion() {
        let cfg = ConditionConfig {
            invert: Some(false),
            ..ConditionConfig::default()
        };
        let once = condition_images(&[frame(60, 40, stripes)], &cfg).unwrap();
        let again_input = EpidImage::new(once.pixels().clone(), once.spacing()).unwrap();
        let twice = condition_images(&[again_input], &cfg).unwrap();
        assert_eq!(once.pixels(), twice.pixels());

        let auto = ConditionConfig::default();
        let a = condition_images(&[frame(60, 40, stripes)], &auto).unwrap();
        let b = condition_images(
            &[EpidImage::new(a.pixels().clone(), a.spacing()).unwrap()],
            &auto,
        )
        .unwrap();
        assert_eq!(a.pixels(), b.pixels());
        assert!(!b.inverted());
    }

    #[test]
    fn pickets_inside_corner_patches_do_not_trigger_inversion() {
        // Edge stripes cover a third of every 6 px wide corner patch.
        let img = frame(60, 40, |x, _| {
            if x < 2 || x >= 58 || (28..31).contains(&x) {
                900.0
            } else {
                100.0
            }
        });
        let cfg = ConditionConfig {
            corner_fraction: 0.1,
            ..ConditionConfig::default()
        };
        let out = condition_images(&[img.clone()], &cfg).unwrap();
        assert!(!out.inverted());

        let bright = frame(60, 40, |x, y| {
            1000.0 - img.pixels().get_pixel(x, y)[0]
        });
        let out = condition_images(&[bright], &cfg).unwrap();
        assert!(out.inverted());
    }

    #[test]
    fn hot_pixels_trigger_the_median_filter() {
        let img = frame(60, 40, |x, y| {
            if (x, y) == (30, 20) || (x, y) == (7, 33) {
                60000.0
            } else {
                stripes(x, y)
            }
        });
        let out = condition_images(&[img], &ConditionConfig::default()).unwrap();
        assert_eq!(out.filter_size(), Some(3));
        assert!(out.pixels().iter().all(|&v| v <= 800.0));
    }

    #[test]
    fn explicit_filter_size_is_applied() {
        let cfg = ConditionConfig {
            filter_size: Some(5),
            ..ConditionConfig::default()
        };
        let out = condition_images(&[frame(60, 40, stripes)], &cfg).unwrap();
        assert_eq!(out.filter_size(), Some(5));
    }

    #[test]
    fn crop_is_symmetric_and_bounded() {
        let cfg = ConditionConfig {
            crop_mm: 2.0,
            ..ConditionConfig::default()
        };
        let out = condition_images(&[frame(60, 40, stripes)], &cfg).unwrap();
        assert_eq!(out.crop_px(), [4, 4]);
        assert_eq!(out.pixels().dimensions(), (52, 32));

        for crop_mm in [10.0, 1e10, f64::MAX] {
            let cfg = ConditionConfig {
                crop_mm,
                ..ConditionConfig::default()
            };
            let err = condition_images(&[frame(60, 40, stripes)], &cfg).unwrap_err();
            assert!(matches!(err, PicketFenceError::ImageLoad(_)));
            assert!(format!("{err}").contains("removes the whole"));
        }
    }

    #[test]
    fn superposition_uses_max_or_sum() {
        let a = frame(40, 20, |x, _| if x < 20 { 10.0 } else { 0.0 });
        let b = frame(40, 20, |x, _| if x >= 10 { 4.0 } else { 0.0 });
        let cfg = ConditionConfig {
            invert: Some(false),
            ..ConditionConfig::default()
        };
        // Both results are shifted so that their minimum (4.0) becomes zero.
        let max = condition_images(&[a.clone(), b.clone()], &cfg).unwrap();
        assert_eq!(max.pixels().get_pixel(15, 3)[0], 6.0);
        assert_eq!(max.pixels().get_pixel(30, 3)[0], 0.0);

        let cfg = ConditionConfig {
            combine: CombineMode::Sum,
            ..cfg
        };
        let sum = condition_images(&[a, b], &cfg).unwrap();
        assert_eq!(sum.pixels().get_pixel(15, 3)[0], 10.0);
        assert_eq!(sum.pixels().get_pixel(5, 3)[0], 6.0);
    }

    #[test]
    fn axis_helpers_follow_orientation() {
        let cfg = ConditionConfig {
            orientation: Some(Orientation::Horizontal),
            invert: Some(false),
            ..ConditionConfig::default()
        };
        let img = condition_images(&[frame(30, 11, |x, y| (x + 100 * y) as f32)], &cfg).unwrap();
        assert_eq!(img.travel_len(), 11);
        assert_eq!(img.lateral_len(), 30);
        assert_eq!(img.at(2, 5), 205.0);
        assert_eq!(img.travel_px_to_mm(5.0), 0.0);
        assert_eq!(img.travel_mm_to_px(1.0), 7.0);
        assert_eq!(img.lateral_extent_mm(), (-7.25, 7.25));
    }
}
