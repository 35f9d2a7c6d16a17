//! Picket reference lines and per-leaf error classification.

use nalgebra::{DMatrix, DVector};

use crate::tolerance::Tolerance;

use super::{DroppedPicket, LeafSample, MlcValue, Picket, PicketReference, SampledPicket, SeedSource};

/// Picket line model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Polynomial degree of travel position versus lateral position.
    pub degree: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self { degree: 1 }
    }
}

/// Least-squares polynomial through one picket's leaf positions.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PicketFit {
    /// Ascending-power coefficients in mm: `c0 + c1·x + c2·x² …` with `x`
    /// the lateral position.
    pub coefficients: Vec<f64>,
    /// RMS of the fit residuals (mm).
    pub residual_rms_mm: f64,
}

impl PicketFit {
    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// Derivative at the central axis.
    pub fn slope(&self) -> f64 {
        self.coefficients.get(1).copied().unwrap_or(0.0)
    }
}

/// Fit `measured_mm` against `lateral_mm`.
///
/// The degree is capped at `samples - 1`. Returns `None` for fewer than two
/// samples or a rank-deficient system.
pub fn fit_picket(samples: &[LeafSample], degree: usize) -> Option<PicketFit> {
    let n = samples.len();
    if n < 2 {
        return None;
    }
    let degree = degree.min(n - 1);

    // Normalize lateral positions for conditioning.
    let mean = samples.iter().map(|s| s.lateral_mm).sum::<f64>() / n as f64;
    let scale = samples
        .iter()
        .map(|s| (s.lateral_mm - mean).abs())
        .fold(0.0, f64::max);
    if !(scale > 0.0) {
        return None;
    }

    let a = DMatrix::<f64>::from_fn(n, degree + 1, |i, k| {
        ((samples[i].lateral_mm - mean) / scale).powi(k as i32)
    });
    let b = DVector::<f64>::from_iterator(n, samples.iter().map(|s| s.measured_mm));
    let normalized = a.svd(true, true).solve(&b, 1e-12).ok()?;
    let coefficients = denormalize(normalized.as_slice(), mean, scale);
    if coefficients.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let mut fit = PicketFit {
        coefficients,
        residual_rms_mm: 0.0,
    };
    let ss: f64 = samples
        .iter()
        .map(|s| (s.measured_mm - fit.eval(s.lateral_mm)).powi(2))
        .sum();
    fit.residual_rms_mm = (ss / n as f64).sqrt();
    Some(fit)
}

/// Expand `Σ aₖ ((x − m)/s)ᵏ` into raw ascending powers of `x`.
fn denormalize(a: &[f64], m: f64, s: f64) -> Vec<f64> {
    let mut out = vec![0.0; a.len()];
    for (k, &ak) in a.iter().enumerate() {
        let scale = ak / s.powi(k as i32);
        let mut binom = 1.0;
        for j in 0..=k {
            // C(k, j) · xʲ · (−m)^(k−j)
            out[j] += scale * binom * (-m).powi((k - j) as i32);
            binom = binom * (k - j) as f64 / (j + 1) as f64;
        }
    }
    out
}

/// Attach reference lines and classified errors to sampled pickets.
///
/// Pickets with fewer than two samples, or whose fit fails, are returned as
/// [`DroppedPicket`]s. Kept pickets are re-indexed in travel order.
pub(crate) fn finalize_pickets(
    sampled: Vec<SampledPicket>,
    config: &FitConfig,
    tolerance: &Tolerance,
) -> (Vec<Picket>, Vec<DroppedPicket>) {
    let mut pickets = Vec::with_capacity(sampled.len());
    let mut dropped = Vec::new();

    for sp in sampled {
        let n_samples = sp.samples.len();
        if n_samples < 2 {
            tracing::warn!(
                center_mm = sp.seed.center_mm,
                n_samples,
                "dropping low-confidence picket"
            );
            dropped.push(DroppedPicket {
                center_mm: sp.seed.center_mm,
                n_samples,
                reason: format!("only {n_samples} leaf sample(s); at least 2 required"),
            });
            continue;
        }

        let reference = match sp.seed.source {
            SeedSource::External => PicketReference::Absolute {
                expected_mm: sp.seed.center_mm,
            },
            SeedSource::Profile { .. } => match fit_picket(&sp.samples, config.degree) {
                Some(fit) => PicketReference::Fitted(fit),
                None => {
                    tracing::warn!(center_mm = sp.seed.center_mm, "picket fit failed");
                    dropped.push(DroppedPicket {
                        center_mm: sp.seed.center_mm,
                        n_samples,
                        reason: "degenerate leaf layout for line fit".to_string(),
                    });
                    continue;
                }
            },
        };

        let values = sp
            .samples
            .iter()
            .map(|s| {
                let ideal = reference.ideal_at(s.lateral_mm);
                let error_mm = s.measured_mm - ideal;
                MlcValue {
                    leaf_index: s.leaf_index,
                    lateral_position_mm: s.lateral_mm,
                    measured_position_mm: s.measured_mm,
                    ideal_position_mm: ideal,
                    error_mm,
                    fwhm_mm: s.fwhm_mm,
                    classification: tolerance.classify(error_mm),
                }
            })
            .collect();

        pickets.push(Picket {
            index: pickets.len(),
            reference,
            values,
        });
    }
    (pickets, dropped)
}
