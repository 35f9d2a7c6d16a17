//! Synthetic picket-fence rendering for tests, benchmarks and demos.
//!
//! Every leaf pair is drawn as a Gaussian stripe per picket at
//! `position + tilt * leaf_center + leaf_error`, constant across the leaf
//! width, on a flat background.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::image::{EpidImage, GrayF32, PixelSpacing};
use crate::mlc::MlcArrangement;
use crate::orientation::Orientation;

/// FWHM to Gaussian sigma.
const FWHM_TO_SIGMA: f64 = 1.0 / 2.354_820_045;

/// Deliberate position error of one leaf in one picket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafError {
    pub picket: usize,
    pub leaf: usize,
    pub error_mm: f64,
}

/// Parameters of a rendered acquisition.
#[derive(Debug, Clone)]
pub struct SyntheticFence {
    pub width: u32,
    pub height: u32,
    pub spacing: PixelSpacing,
    pub orientation: Orientation,
    pub mlc: MlcArrangement,
    /// Picket positions along travel, relative to the image center (mm).
    pub picket_positions_mm: Vec<f64>,
    pub picket_fwhm_mm: f64,
    /// Travel shift per mm of lateral leaf position (`tan` of the MLC skew).
    pub tilt: f64,
    pub leaf_errors: Vec<LeafError>,
    /// Irradiated leaf pairs; `None` irradiates every leaf.
    pub leaves: Option<Vec<usize>>,
    /// Per picket leaf pairs left closed.
    pub closed: Vec<(usize, usize)>,
    pub background: f32,
    pub peak: f32,
    /// Half-range of uniform additive noise.
    pub noise: f32,
    /// Isolated saturated pixels.
    pub hot_pixels: usize,
    pub seed: u64,
    /// Render bright background with dark pickets.
    pub bright_field: bool,
}

impl SyntheticFence {
    /// 600×500 px at 0.4 mm, Millennium MLC, vertical pickets.
    pub fn new(picket_positions_mm: Vec<f64>) -> Self {
        Self {
            width: 600,
            height: 500,
            spacing: PixelSpacing::isotropic(0.4),
            orientation: Orientation::Vertical,
            mlc: MlcArrangement::default(),
            picket_positions_mm,
            picket_fwhm_mm: 3.0,
            tilt: 0.0,
            leaf_errors: Vec::new(),
            leaves: None,
            closed: Vec::new(),
            background: 100.0,
            peak: 1000.0,
            noise: 0.0,
            hot_pixels: 0,
            seed: 0,
            bright_field: false,
        }
    }

    /// `n` pickets `gap_mm` apart, centered on the image.
    pub fn evenly_spaced(n: usize, gap_mm: f64) -> Self {
        let first = -0.5 * gap_mm * (n.saturating_sub(1)) as f64;
        Self::new((0..n).map(|i| first + gap_mm * i as f64).collect())
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_spacing(mut self, spacing: PixelSpacing) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_mlc(mut self, mlc: MlcArrangement) -> Self {
        self.mlc = mlc;
        self
    }

    pub fn with_tilt(mut self, tilt: f64) -> Self {
        self.tilt = tilt;
        self
    }

    pub fn with_leaf_error(mut self, picket: usize, leaf: usize, error_mm: f64) -> Self {
        self.leaf_errors.push(LeafError {
            picket,
            leaf,
            error_mm,
        });
        self
    }

    pub fn with_leaves(mut self, leaves: Vec<usize>) -> Self {
        self.leaves = Some(leaves);
        self
    }

    /// Leave `leaf` closed for `picket` only.
    pub fn with_closed_leaf(mut self, picket: usize, leaf: usize) -> Self {
        self.closed.push((picket, leaf));
        self
    }

    pub fn with_noise(mut self, noise: f32, seed: u64) -> Self {
        self.noise = noise;
        self.seed = seed;
        self
    }

    pub fn with_hot_pixels(mut self, count: usize, seed: u64) -> Self {
        self.hot_pixels = count;
        self.seed = seed;
        self
    }

    pub fn bright_field(mut self) -> Self {
        self.bright_field = true;
        self
    }

    /// Nominal measured position of `leaf` in `picket` (mm).
    pub fn true_position_mm(&self, picket: usize, leaf: usize) -> Option<f64> {
        let base = *self.picket_positions_mm.get(picket)?;
        let center = self.mlc.center_of(leaf)?;
        Some(base + self.tilt * center + self.leaf_error(picket, leaf))
    }

    fn leaf_error(&self, picket: usize, leaf: usize) -> f64 {
        self.leaf_errors
            .iter()
            .filter(|e| e.picket == picket && e.leaf == leaf)
            .map(|e| e.error_mm)
            .sum()
    }

    fn irradiated(&self, leaf: usize) -> bool {
        self.leaves.as_ref().map_or(true, |l| l.contains(&leaf))
    }

    /// Render the intensity frame.
    pub fn render(&self) -> GrayF32 {
        let (travel_len, lateral_len, travel_spacing, lateral_spacing) = match self.orientation {
            Orientation::Vertical => (self.width, self.height, self.spacing.col_mm, self.spacing.row_mm),
            Orientation::Horizontal => (self.height, self.width, self.spacing.row_mm, self.spacing.col_mm),
        };
        let travel_c = 0.5 * (travel_len as f64 - 1.0);
        let lateral_c = 0.5 * (lateral_len as f64 - 1.0);
        let sigma = self.picket_fwhm_mm * FWHM_TO_SIGMA;

        // Per lateral line: the picket centers of the leaf it belongs to.
        let line_centers: Vec<Option<Vec<f64>>> = (0..lateral_len)
            .map(|l| {
                let mm = (l as f64 - lateral_c) * lateral_spacing;
                let leaf = self.mlc.leaf_at(mm)?;
                if !self.irradiated(leaf) {
                    return None;
                }
                Some(
                    (0..self.picket_positions_mm.len())
                        .filter(|&p| !self.closed.contains(&(p, leaf)))
                        .filter_map(|p| self.true_position_mm(p, leaf))
                        .collect(),
                )
            })
            .collect();

        let mut img = GrayF32::new(self.width, self.height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let (t, l) = match self.orientation {
                Orientation::Vertical => (x, y),
                Orientation::Horizontal => (y, x),
            };
            let t_mm = (t as f64 - travel_c) * travel_spacing;
            let signal = line_centers[l as usize].as_ref().map_or(0.0, |centers| {
                centers
                    .iter()
                    .map(|c| {
                        let d = (t_mm - c) / sigma;
                        (-0.5 * d * d).exp()
                    })
                    .sum::<f64>()
            });
            px[0] = self.background + self.peak * signal as f32;
        }

        if self.noise > 0.0 || self.hot_pixels > 0 {
            let mut rng = StdRng::seed_from_u64(self.seed);
            if self.noise > 0.0 {
                for v in img.iter_mut() {
                    *v += (rng.gen::<f32>() - 0.5) * 2.0 * self.noise;
                }
            }
            for _ in 0..self.hot_pixels {
                let x = rng.gen_range(0..self.width);
                let y = rng.gen_range(0..self.height);
                img.put_pixel(x, y, image::Luma([20.0 * self.peak]));
            }
        }

        if self.bright_field {
            let top = self.background + self.peak * 2.0;
            for v in img.iter_mut() {
                *v = top - *v;
            }
        }
        img
    }

    pub fn to_epid(&self) -> Result<EpidImage> {
        EpidImage::new(self.render(), self.spacing)
    }
}
