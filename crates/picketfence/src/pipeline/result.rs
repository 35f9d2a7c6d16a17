use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::{json, Value};

use crate::condition::ConditionedImage;
use crate::error::{PicketFenceError, Result};
use crate::image::PixelSpacing;
use crate::orientation::Orientation;
use crate::picket::{DroppedPicket, MlcValue, Picket, PicketReference};
use crate::profile::median_f64;
use crate::tolerance::{Classification, Tolerance};

/// Location of the largest absolute error.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MaxError {
    /// Absolute error (mm).
    pub error_mm: f64,
    pub picket_index: usize,
    pub leaf_index: usize,
}

/// How the input frames were conditioned.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConditioningSummary {
    /// Conditioned frame size `[width, height]` after cropping.
    pub image_size: [u32; 2],
    pub spacing: PixelSpacing,
    pub inverted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_size: Option<usize>,
    /// Pixels cropped from each side `[x, y]`.
    pub crop_px: [u32; 2],
    pub dynamic_range: f32,
}

impl ConditioningSummary {
    fn from_image(img: &ConditionedImage) -> Self {
        let (w, h) = img.pixels().dimensions();
        Self {
            image_size: [w, h],
            spacing: img.spacing(),
            inverted: img.inverted(),
            filter_size: img.filter_size(),
            crop_px: img.crop_px(),
            dynamic_range: img.dynamic_range(),
        }
    }
}

/// Worst outcome of one leaf pair across all pickets.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LeafSummary {
    pub leaf_index: usize,
    pub lateral_position_mm: f64,
    /// Pickets in which this leaf was measured.
    pub n_pickets: usize,
    pub max_error_mm: f64,
    pub classification: Classification,
}

/// Per-picket digest for reports.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PicketSummary {
    pub index: usize,
    pub offset_from_cax_mm: f64,
    pub n_leaves: usize,
    pub max_error_mm: f64,
    pub median_error_mm: f64,
    /// Fit coefficients; `None` for absolutely referenced pickets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit_coefficients: Option<Vec<f64>>,
    pub passed: bool,
}

/// Terminal result of one picket-fence analysis.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PfResult {
    /// Kept pickets in travel order.
    pub pickets: Vec<Picket>,
    /// Pickets discarded for too few leaf samples.
    pub dropped_pickets: Vec<DroppedPicket>,
    pub orientation: Orientation,
    pub tolerance_mm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_tolerance_mm: Option<f64>,
    pub mlc_name: String,
    /// Distinct leaf pairs measured in at least one picket.
    pub n_measured_leaf_pairs: usize,
    /// Non-failing measurements over all measurements.
    pub pass_fraction: f64,
    pub max_error: MaxError,
    /// Median absolute error (mm).
    pub median_error_mm: f64,
    pub conditioning: ConditioningSummary,
}

impl PfResult {
    /// Aggregate finalized pickets.
    ///
    /// Fails with [`PicketFenceError::PicketDetection`] when no picket
    /// survived sampling.
    pub(crate) fn from_pickets(
        pickets: Vec<Picket>,
        dropped_pickets: Vec<DroppedPicket>,
        img: &ConditionedImage,
        tolerance: &Tolerance,
        mlc_name: &str,
    ) -> Result<Self> {
        let values: Vec<(usize, &MlcValue)> = pickets
            .iter()
            .flat_map(|p| p.values.iter().map(move |v| (p.index, v)))
            .collect();
        let Some(&(picket_index, worst)) = values
            .iter()
            .max_by(|a, b| a.1.abs_error_mm().total_cmp(&b.1.abs_error_mm()))
        else {
            return Err(PicketFenceError::picket_detection(format!(
                "no picket has enough leaf samples ({} dropped)",
                dropped_pickets.len()
            )));
        };
        let max_error = MaxError {
            error_mm: worst.abs_error_mm(),
            picket_index,
            leaf_index: worst.leaf_index,
        };

        let abs: Vec<f64> = values.iter().map(|(_, v)| v.abs_error_mm()).collect();
        let median_error_mm = median_f64(&abs).unwrap_or(0.0);
        let n_pass = values.iter().filter(|(_, v)| v.passed()).count();
        let pass_fraction = n_pass as f64 / values.len() as f64;

        let mut leaves: Vec<usize> = values.iter().map(|(_, v)| v.leaf_index).collect();
        leaves.sort_unstable();
        leaves.dedup();

        let result = Self {
            pickets,
            dropped_pickets,
            orientation: img.orientation(),
            tolerance_mm: tolerance.tolerance_mm(),
            action_tolerance_mm: tolerance.action_tolerance_mm(),
            mlc_name: mlc_name.to_string(),
            n_measured_leaf_pairs: leaves.len(),
            pass_fraction,
            max_error,
            median_error_mm,
            conditioning: ConditioningSummary::from_image(img),
        };
        tracing::info!(
            n_pickets = result.pickets.len(),
            n_leaf_pairs = result.n_measured_leaf_pairs,
            percent_passing = result.percent_passing(),
            max_error_mm = result.max_error.error_mm,
            median_error_mm = result.median_error_mm,
            "picket fence analyzed"
        );
        Ok(result)
    }

    pub fn percent_passing(&self) -> f64 {
        100.0 * self.pass_fraction
    }

    /// True when no measurement exceeds the tolerance.
    pub fn passed(&self) -> bool {
        self.pass_fraction >= 1.0
    }

    /// True when pickets were measured against supplied absolute positions.
    pub fn is_absolute(&self) -> bool {
        self.pickets
            .iter()
            .any(|p| matches!(p.reference, PicketReference::Absolute { .. }))
    }

    /// Every measurement in (picket, leaf) order.
    pub fn values(&self) -> impl Iterator<Item = (usize, &MlcValue)> + '_ {
        self.pickets
            .iter()
            .flat_map(|p| p.values.iter().map(move |v| (p.index, v)))
    }

    pub fn picket_offsets_from_cax_mm(&self) -> Vec<f64> {
        self.pickets.iter().map(Picket::offset_from_cax_mm).collect()
    }

    /// Mean distance between neighbouring pickets; `None` with one picket.
    pub fn mean_picket_spacing_mm(&self) -> Option<f64> {
        let offsets = self.picket_offsets_from_cax_mm();
        if offsets.len() < 2 {
            return None;
        }
        let total: f64 = offsets.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        Some(total / (offsets.len() - 1) as f64)
    }

    /// Mean fitted picket slope as an angle (degrees). Zero without fits.
    pub fn mlc_skew_deg(&self) -> f64 {
        let slopes: Vec<f64> = self
            .pickets
            .iter()
            .filter(|p| matches!(p.reference, PicketReference::Fitted(_)))
            .map(|p| p.reference.slope().atan().to_degrees())
            .collect();
        if slopes.is_empty() {
            0.0
        } else {
            slopes.iter().sum::<f64>() / slopes.len() as f64
        }
    }

    /// Leaf pairs that failed in at least one picket, ascending.
    pub fn failed_leaves(&self) -> Vec<usize> {
        let mut failed: Vec<usize> = self
            .values()
            .filter(|(_, v)| v.classification == Classification::Fail)
            .map(|(_, v)| v.leaf_index)
            .collect();
        failed.sort_unstable();
        failed.dedup();
        failed
    }

    /// One row per measured leaf pair, ascending by leaf index.
    pub fn leaf_summaries(&self) -> Vec<LeafSummary> {
        let mut by_leaf: BTreeMap<usize, LeafSummary> = BTreeMap::new();
        for (_, v) in self.values() {
            let entry = by_leaf.entry(v.leaf_index).or_insert(LeafSummary {
                leaf_index: v.leaf_index,
                lateral_position_mm: v.lateral_position_mm,
                n_pickets: 0,
                max_error_mm: 0.0,
                classification: Classification::Pass,
            });
            entry.n_pickets += 1;
            entry.max_error_mm = entry.max_error_mm.max(v.abs_error_mm());
            entry.classification = entry.classification.max(v.classification);
        }
        by_leaf.into_values().collect()
    }

    pub fn picket_summaries(&self) -> Vec<PicketSummary> {
        self.pickets
            .iter()
            .map(|p| PicketSummary {
                index: p.index,
                offset_from_cax_mm: p.offset_from_cax_mm(),
                n_leaves: p.n_leaves(),
                max_error_mm: p.max_error_mm(),
                median_error_mm: p.median_error_mm(),
                fit_coefficients: match &p.reference {
                    PicketReference::Fitted(fit) => Some(fit.coefficients.clone()),
                    PicketReference::Absolute { .. } => None,
                },
                passed: p.passed(),
            })
            .collect()
    }

    /// Human-readable report.
    pub fn text_summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "Picket Fence Results:");
        let _ = writeln!(s, "{:.1}% Passed", self.percent_passing());
        let _ = writeln!(s, "Median Error: {:.3}mm", self.median_error_mm);
        match self.mean_picket_spacing_mm() {
            Some(spacing) => {
                let _ = writeln!(s, "Mean picket spacing: {spacing:.1}mm");
            }
            None => {
                let _ = writeln!(s, "Mean picket spacing: n/a");
            }
        }
        let offsets: Vec<String> = self
            .picket_offsets_from_cax_mm()
            .iter()
            .map(|o| format!("{o:.1}"))
            .collect();
        let _ = writeln!(s, "Picket offsets from CAX (mm): {}", offsets.join(" "));
        let _ = write!(
            s,
            "Max Error: {:.3}mm on Picket: {}, Leaf: {}",
            self.max_error.error_mm, self.max_error.picket_index, self.max_error.leaf_index
        );
        s
    }

    /// Flat key/value view for report and table writers.
    pub fn to_key_values(&self) -> BTreeMap<String, Value> {
        let mut kv = BTreeMap::new();
        let mut put = |k: &str, v: Value| {
            kv.insert(k.to_string(), v);
        };
        put("tolerance_mm", json!(self.tolerance_mm));
        put("action_tolerance_mm", json!(self.action_tolerance_mm));
        put("percent_passing", json!(self.percent_passing()));
        put("passed", json!(self.passed()));
        put("max_error_mm", json!(self.max_error.error_mm));
        put("max_error_picket", json!(self.max_error.picket_index));
        put("max_error_leaf", json!(self.max_error.leaf_index));
        put("median_error_mm", json!(self.median_error_mm));
        put("orientation", json!(self.orientation.name()));
        put("mlc", json!(self.mlc_name));
        put("absolute", json!(self.is_absolute()));
        put("n_pickets", json!(self.pickets.len()));
        put("n_dropped_pickets", json!(self.dropped_pickets.len()));
        put("n_measured_leaf_pairs", json!(self.n_measured_leaf_pairs));
        put("mean_picket_spacing_mm", json!(self.mean_picket_spacing_mm()));
        put("mlc_skew_deg", json!(self.mlc_skew_deg()));
        put("picket_offsets_from_cax_mm", json!(self.picket_offsets_from_cax_mm()));
        put("failed_leaves", json!(self.failed_leaves()));
        put(
            "leaves",
            serde_json::to_value(self.leaf_summaries()).unwrap_or(Value::Null),
        );
        kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{condition_images, ConditionConfig};
    use crate::picket::PicketFit;
    use crate::synthetic::SyntheticFence;

    fn value(leaf: usize, error_mm: f64, tol: &Tolerance) -> MlcValue {
        MlcValue {
            leaf_index: leaf,
            lateral_position_mm: -100.0 + 5.0 * leaf as f64,
            measured_position_mm: error_mm,
            ideal_position_mm: 0.0,
            error_mm,
            fwhm_mm: 3.0,
            classification: tol.classify(error_mm),
        }
    }

    fn picket(index: usize, offset: f64, errors: &[(usize, f64)], tol: &Tolerance) -> Picket {
        Picket {
            index,
            reference: PicketReference::Fitted(PicketFit {
                coefficients: vec![offset, 0.01],
                residual_rms_mm: 0.0,
            }),
            values: errors.iter().map(|&(l, e)| value(l, e, tol)).collect(),
        }
    }

    fn image() -> ConditionedImage {
        let fence = SyntheticFence::evenly_spaced(2, 30.0).with_size(120, 80);
        condition_images(&[fence.to_epid().unwrap()], &ConditionConfig::default()).unwrap()
    }

    fn sample_result() -> PfResult {
        let tol = Tolerance::new(0.5, Some(0.3)).unwrap();
        let pickets = vec![
            picket(0, -15.0, &[(20, 0.1), (21, -0.4), (22, 0.05)], &tol),
            picket(1, 15.0, &[(20, 0.2), (21, 0.6), (23, -0.1)], &tol),
        ];
        PfResult::from_pickets(pickets, Vec::new(), &image(), &tol, "millennium").unwrap()
    }

    #[test]
    fn aggregates_pass_fraction_max_and_median() {
        let r = sample_result();
        assert!((r.pass_fraction - 5.0 / 6.0).abs() < 1e-12);
        assert!(!r.passed());
        assert_eq!(
            r.max_error,
            MaxError {
                error_mm: 0.6,
                picket_index: 1,
                leaf_index: 21
            }
        );
        // |errors| sorted: 0.05 0.1 0.1 0.2 0.4 0.6
        assert!((r.median_error_mm - 0.15).abs() < 1e-12);
        assert_eq!(r.n_measured_leaf_pairs, 4);
        assert_eq!(r.failed_leaves(), vec![21]);
    }

    #[test]
    fn leaf_summaries_take_the_worst_picket() {
        let r = sample_result();
        let leaves = r.leaf_summaries();
        assert_eq!(
            leaves.iter().map(|l| l.leaf_index).collect::<Vec<_>>(),
            vec![20, 21, 22, 23]
        );
        assert_eq!(leaves[1].n_pickets, 2);
        assert_eq!(leaves[1].classification, Classification::Fail);
        assert!((leaves[1].max_error_mm - 0.6).abs() < 1e-12);
        assert_eq!(leaves[2].n_pickets, 1);
    }

    #[test]
    fn picket_geometry_extras() {
        let r = sample_result();
        assert_eq!(r.picket_offsets_from_cax_mm(), vec![-15.0, 15.0]);
        assert_eq!(r.mean_picket_spacing_mm(), Some(30.0));
        assert!((r.mlc_skew_deg() - 0.01f64.atan().to_degrees()).abs() < 1e-12);
        let summaries = r.picket_summaries();
        assert!(summaries[0].passed);
        assert!(!summaries[1].passed);
        assert_eq!(summaries[1].fit_coefficients, Some(vec![15.0, 0.01]));
    }

    #[test]
    fn text_summary_and_key_values() {
        let r = sample_result();
        let text = r.text_summary();
        assert!(text.contains("83.3% Passed"), "{text}");
        assert!(text.contains("Median Error: 0.150mm"));
        assert!(text.contains("Max Error: 0.600mm on Picket: 1, Leaf: 21"));

        let kv = r.to_key_values();
        assert_eq!(kv["max_error_leaf"], json!(21));
        assert_eq!(kv["action_tolerance_mm"], json!(0.3));
        assert_eq!(kv["failed_leaves"], json!([21]));
        assert_eq!(kv["leaves"].as_array().map(Vec::len), Some(4));
        assert_eq!(kv["absolute"], json!(false));
    }

    #[test]
    fn no_surviving_picket_is_a_detection_error() {
        let tol = Tolerance::new(0.5, None).unwrap();
        let dropped = vec![DroppedPicket {
            center_mm: 0.0,
            n_samples: 1,
            reason: "sparse".into(),
        }];
        let err = PfResult::from_pickets(Vec::new(), dropped, &image(), &tol, "x").unwrap_err();
        assert!(matches!(err, PicketFenceError::PicketDetection(_)));
        assert!(format!("{err}").contains("1 dropped"));
    }
}
