//! Input image types handed over by the image-loading collaborator.

use image::{DynamicImage, ImageBuffer, Luma};

use crate::error::{PicketFenceError, Result};

/// Single-channel `f32` image buffer used throughout the pipeline.
pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Physical pixel size at the analysis plane.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PixelSpacing {
    /// Distance between adjacent rows (mm), i.e. along image `y`.
    pub row_mm: f64,
    /// Distance between adjacent columns (mm), i.e. along image `x`.
    pub col_mm: f64,
}

impl PixelSpacing {
    pub fn new(row_mm: f64, col_mm: f64) -> Self {
        Self { row_mm, col_mm }
    }

    /// Square pixels of the given size.
    pub fn isotropic(mm: f64) -> Self {
        Self::new(mm, mm)
    }

    /// Square pixels from a dots-per-mm resolution.
    pub fn from_dpmm(dpmm: f64) -> Self {
        Self::isotropic(1.0 / dpmm)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (label, v) in [("row", self.row_mm), ("column", self.col_mm)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(PicketFenceError::image_load(format!(
                    "{label} pixel spacing must be finite and > 0 (got {v})"
                )));
            }
        }
        Ok(())
    }
}

/// Acquisition context carried alongside the pixels.
///
/// None of these values influence the measurement; they are kept so that
/// reporting collaborators can echo them.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AcquisitionMetadata {
    /// Source-to-imager distance (mm).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid_mm: Option<f64>,
    /// Panel lateral/longitudinal translation (mm).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel_translation_mm: Option<[f64; 2]>,
}

/// One decoded EPID frame.
#[derive(Debug, Clone)]
pub struct EpidImage {
    pixels: GrayF32,
    spacing: PixelSpacing,
    metadata: AcquisitionMetadata,
}

impl EpidImage {
    /// Wrap a decoded intensity buffer.
    ///
    /// Fails with [`PicketFenceError::ImageLoad`] on empty buffers, non-finite
    /// intensities or non-positive spacing.
    pub fn new(pixels: GrayF32, spacing: PixelSpacing) -> Result<Self> {
        spacing.validate()?;
        let (w, h) = pixels.dimensions();
        if w == 0 || h == 0 {
            return Err(PicketFenceError::image_load(format!(
                "image is empty ({w}x{h})"
            )));
        }
        if pixels.as_raw().iter().any(|v| !v.is_finite()) {
            return Err(PicketFenceError::image_load(
                "image contains non-finite intensities",
            ));
        }
        Ok(Self {
            pixels,
            spacing,
            metadata: AcquisitionMetadata::default(),
        })
    }

    /// Build from a row-major intensity vector.
    pub fn from_vec(width: u32, height: u32, data: Vec<f32>, spacing: PixelSpacing) -> Result<Self> {
        let expected = width as usize * height as usize;
        let got = data.len();
        let pixels = GrayF32::from_raw(width, height, data).ok_or_else(|| {
            PicketFenceError::image_load(format!(
                "pixel buffer size mismatch: expected {expected}, got {got}"
            ))
        })?;
        Self::new(pixels, spacing)
    }

    /// Build from a 16-bit detector frame, keeping raw counts.
    pub fn from_luma16(img: &ImageBuffer<Luma<u16>, Vec<u16>>, spacing: PixelSpacing) -> Result<Self> {
        let (w, h) = img.dimensions();
        let data = img.as_raw().iter().map(|&v| v as f32).collect();
        Self::from_vec(w, h, data, spacing)
    }

    /// Build from any decoded image, converting to 16-bit grayscale counts.
    pub fn from_dynamic(img: &DynamicImage, spacing: PixelSpacing) -> Result<Self> {
        Self::from_luma16(&img.to_luma16(), spacing)
    }

    /// Attach acquisition metadata.
    pub fn with_metadata(mut self, metadata: AcquisitionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn pixels(&self) -> &GrayF32 {
        &self.pixels
    }

    pub fn spacing(&self) -> PixelSpacing {
        self.spacing
    }

    pub fn metadata(&self) -> &AcquisitionMetadata {
        &self.metadata
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}
