//! Pass / action / fail classification of leaf errors.
//!
//! Thresholds are inclusive on the lenient side: `|e| == action` passes and
//! `|e| == tolerance` is still within tolerance.

use crate::error::{PicketFenceError, Result};

/// Outcome for one leaf error, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Pass,
    Action,
    Fail,
}

impl Classification {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Action => "action",
            Self::Fail => "fail",
        }
    }
}

/// Validated tolerance pair.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tolerance {
    tolerance_mm: f64,
    action_tolerance_mm: Option<f64>,
}

impl Tolerance {
    /// Fails with [`PicketFenceError::Configuration`] unless
    /// `0 <= action <= tolerance` and `tolerance > 0`.
    pub fn new(tolerance_mm: f64, action_tolerance_mm: Option<f64>) -> Result<Self> {
        if !tolerance_mm.is_finite() || tolerance_mm <= 0.0 {
            return Err(PicketFenceError::configuration(format!(
                "tolerance_mm must be finite and > 0 (got {tolerance_mm})"
            )));
        }
        if let Some(action) = action_tolerance_mm {
            if !action.is_finite() || action < 0.0 {
                return Err(PicketFenceError::configuration(format!(
                    "action_tolerance_mm must be finite and >= 0 (got {action})"
                )));
            }
            if action > tolerance_mm {
                return Err(PicketFenceError::configuration(format!(
                    "action_tolerance_mm ({action}) exceeds tolerance_mm ({tolerance_mm})"
                )));
            }
        }
        Ok(Self {
            tolerance_mm,
            action_tolerance_mm,
        })
    }

    pub fn tolerance_mm(&self) -> f64 {
        self.tolerance_mm
    }

    pub fn action_tolerance_mm(&self) -> Option<f64> {
        self.action_tolerance_mm
    }

    /// Classify a signed error. Non-finite errors fail.
    pub fn classify(&self, error_mm: f64) -> Classification {
        let e = error_mm.abs();
        if !(e <= self.tolerance_mm) {
            return Classification::Fail;
        }
        match self.action_tolerance_mm {
            Some(action) if e > action => Classification::Action,
            _ => Classification::Pass,
        }
    }
}
