//! Multi-leaf collimator geometry.
//!
//! A bank is an ordered list of leaf groups `(count, width_mm)` that tile the
//! lateral axis without gaps, centered on the beam axis and optionally shifted
//! by `offset_mm`. Leaf indices are zero-based and increase with the lateral
//! coordinate.
//!
//! Presets and custom banks are the same [`MlcArrangement`] value; presets are
//! just pre-validated group lists. Custom banks can be loaded from JSON using
//! the `picketfence.mlc.v1` schema.

use std::path::Path;

use crate::error::{PicketFenceError, Result};

const MLC_SCHEMA_V1: &str = "picketfence.mlc.v1";

/// Named standard leaf banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MlcPreset {
    /// Varian Millennium 120: 10×10 mm, 40×5 mm, 10×10 mm.
    Millennium,
    /// Varian HD Millennium: 14×5 mm, 32×2.5 mm, 14×5 mm.
    HdMillennium,
    /// Elekta Agility: 80×5 mm.
    Agility,
    /// Elekta MLCi: 40×10 mm.
    Mlci,
    /// Varian Halcyon distal bank: 28×10 mm shifted by half a leaf.
    HalcyonDistal,
    /// Varian Halcyon proximal bank: 29×10 mm.
    HalcyonProximal,
}

impl MlcPreset {
    /// Every built-in preset, in catalog order.
    pub const ALL: [MlcPreset; 6] = [
        Self::Millennium,
        Self::HdMillennium,
        Self::Agility,
        Self::Mlci,
        Self::HalcyonDistal,
        Self::HalcyonProximal,
    ];

    /// Stable snake_case name used in configs and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Millennium => "millennium",
            Self::HdMillennium => "hd_millennium",
            Self::Agility => "agility",
            Self::Mlci => "mlci",
            Self::HalcyonDistal => "halcyon_distal",
            Self::HalcyonProximal => "halcyon_proximal",
        }
    }

    fn groups(self) -> &'static [(usize, f64)] {
        match self {
            Self::Millennium => &[(10, 10.0), (40, 5.0), (10, 10.0)],
            Self::HdMillennium => &[(14, 5.0), (32, 2.5), (14, 5.0)],
            Self::Agility => &[(80, 5.0)],
            Self::Mlci => &[(40, 10.0)],
            Self::HalcyonDistal => &[(28, 10.0)],
            Self::HalcyonProximal => &[(29, 10.0)],
        }
    }

    fn offset_mm(self) -> f64 {
        match self {
            Self::HalcyonDistal => 5.0,
            _ => 0.0,
        }
    }
}

impl std::str::FromStr for MlcPreset {
    type Err = PicketFenceError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.name() == key)
            .ok_or_else(|| PicketFenceError::configuration(format!("unknown MLC preset '{s}'")))
    }
}

/// A run of identical leaves.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LeafGroup {
    /// Number of leaf-pairs in the group.
    pub count: usize,
    /// Leaf width projected to the isocenter plane (mm).
    pub width_mm: f64,
}

impl LeafGroup {
    pub fn new(count: usize, width_mm: f64) -> Self {
        Self { count, width_mm }
    }
}

/// Immutable leaf-bank geometry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "MlcArrangementRepr", into = "MlcArrangementRepr")]
pub struct MlcArrangement {
    name: String,
    preset: Option<MlcPreset>,
    groups: Vec<LeafGroup>,
    offset_mm: f64,
    /// Leaf boundaries, `n_leaves + 1` strictly increasing values.
    bounds_mm: Vec<f64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct CustomArrangementSpec {
    name: String,
    groups: Vec<LeafGroup>,
    #[serde(default)]
    offset_mm: f64,
}

/// Config representation: either a preset name or an explicit group list.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
enum MlcArrangementRepr {
    Preset(MlcPreset),
    Custom(CustomArrangementSpec),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct MlcFileV1 {
    schema: String,
    name: String,
    groups: Vec<LeafGroup>,
    #[serde(default)]
    offset_mm: f64,
}

impl TryFrom<MlcArrangementRepr> for MlcArrangement {
    type Error = PicketFenceError;

    fn try_from(repr: MlcArrangementRepr) -> Result<Self> {
        match repr {
            MlcArrangementRepr::Preset(p) => Ok(Self::preset(p)),
            MlcArrangementRepr::Custom(spec) => Self::new(spec.name, spec.groups, spec.offset_mm),
        }
    }
}

impl From<MlcArrangement> for MlcArrangementRepr {
    fn from(mlc: MlcArrangement) -> Self {
        match mlc.preset {
            Some(p) => Self::Preset(p),
            None => Self::Custom(CustomArrangementSpec {
                name: mlc.name,
                groups: mlc.groups,
                offset_mm: mlc.offset_mm,
            }),
        }
    }
}

impl MlcArrangement {
    /// Build and validate a custom bank.
    pub fn new(name: impl Into<String>, groups: Vec<LeafGroup>, offset_mm: f64) -> Result<Self> {
        let name = name.into();
        let bounds_mm = validate_and_tile(&groups, offset_mm)?;
        Ok(Self {
            name,
            preset: None,
            groups,
            offset_mm,
            bounds_mm,
        })
    }

    /// Build one of the named standard banks.
    pub fn preset(preset: MlcPreset) -> Self {
        let groups: Vec<LeafGroup> = preset
            .groups()
            .iter()
            .map(|&(count, width_mm)| LeafGroup { count, width_mm })
            .collect();
        let mut mlc = Self::new(preset.name(), groups, preset.offset_mm())
            .expect("built-in MLC presets must be valid");
        mlc.preset = Some(preset);
        mlc
    }

    /// Load a custom bank from a `picketfence.mlc.v1` JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Parse a custom bank from `picketfence.mlc.v1` JSON text.
    pub fn from_json_str(data: &str) -> Result<Self> {
        let file: MlcFileV1 = serde_json::from_str(data)?;
        if file.schema != MLC_SCHEMA_V1 {
            return Err(PicketFenceError::configuration(format!(
                "unsupported MLC schema '{}' (expected '{}')",
                file.schema, MLC_SCHEMA_V1
            )));
        }
        Self::new(file.name, file.groups, file.offset_mm)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The preset this bank was built from, if any.
    pub fn preset_kind(&self) -> Option<MlcPreset> {
        self.preset
    }

    pub fn groups(&self) -> &[LeafGroup] {
        &self.groups
    }

    pub fn offset_mm(&self) -> f64 {
        self.offset_mm
    }

    /// Total number of leaf-pairs.
    pub fn n_leaves(&self) -> usize {
        self.bounds_mm.len() - 1
    }

    /// Sum of `count × width` over all groups (mm).
    pub fn total_width_mm(&self) -> f64 {
        self.groups
            .iter()
            .map(|g| g.count as f64 * g.width_mm)
            .sum()
    }

    /// Lateral edges `(low, high)` of one leaf in mm.
    pub fn leaf_bounds(&self, leaf_index: usize) -> Option<(f64, f64)> {
        let lo = *self.bounds_mm.get(leaf_index)?;
        let hi = *self.bounds_mm.get(leaf_index + 1)?;
        Some((lo, hi))
    }

    pub fn leaf_width(&self, leaf_index: usize) -> Option<f64> {
        self.leaf_bounds(leaf_index).map(|(lo, hi)| hi - lo)
    }

    /// Signed lateral center of a leaf in mm.
    pub fn center_of(&self, leaf_index: usize) -> Option<f64> {
        self.leaf_bounds(leaf_index).map(|(lo, hi)| 0.5 * (lo + hi))
    }

    /// Leaf covering a lateral position; a shared edge belongs to the upper leaf.
    pub fn leaf_at(&self, lateral_mm: f64) -> Option<usize> {
        let (lo, hi) = self.travel_axis_extent();
        if !(lateral_mm >= lo && lateral_mm < hi) {
            return None;
        }
        Some(self.bounds_mm.partition_point(|&b| b <= lateral_mm) - 1)
    }

    /// Outer edges of the whole bank along the leaf-stacking axis (mm).
    pub fn travel_axis_extent(&self) -> (f64, f64) {
        (self.bounds_mm[0], self.bounds_mm[self.bounds_mm.len() - 1])
    }

    /// Leaves whose centers fall in `[lo_mm, hi_mm]`, in index order.
    pub fn leaf_indices_within(&self, lo_mm: f64, hi_mm: f64) -> Vec<usize> {
        (0..self.n_leaves())
            .filter(|&i| {
                let c = 0.5 * (self.bounds_mm[i] + self.bounds_mm[i + 1]);
                c >= lo_mm && c <= hi_mm
            })
            .collect()
    }
}

impl Default for MlcArrangement {
    fn default() -> Self {
        Self::preset(MlcPreset::Millennium)
    }
}

fn validate_and_tile(groups: &[LeafGroup], offset_mm: f64) -> Result<Vec<f64>> {
    if groups.is_empty() {
        return Err(PicketFenceError::configuration(
            "MLC arrangement must contain at least one leaf group",
        ));
    }
    if !offset_mm.is_finite() {
        return Err(PicketFenceError::configuration("MLC offset_mm must be finite"));
    }
    for (gi, g) in groups.iter().enumerate() {
        if g.count == 0 {
            return Err(PicketFenceError::configuration(format!(
                "leaf group {gi} has zero leaves"
            )));
        }
        if !g.width_mm.is_finite() || g.width_mm <= 0.0 {
            return Err(PicketFenceError::configuration(format!(
                "leaf group {gi} width must be finite and > 0 (got {})",
                g.width_mm
            )));
        }
    }

    let total: f64 = groups.iter().map(|g| g.count as f64 * g.width_mm).sum();
    let n_leaves: usize = groups.iter().map(|g| g.count).sum();
    let mut bounds = Vec::with_capacity(n_leaves + 1);
    let mut edge = -0.5 * total + offset_mm;
    bounds.push(edge);
    for g in groups {
        for _ in 0..g.count {
            edge += g.width_mm;
            bounds.push(edge);
        }
    }

    if bounds.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(PicketFenceError::configuration(
            "MLC leaf boundaries are not strictly increasing",
        ));
    }
    Ok(bounds)
}
