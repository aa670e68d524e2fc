//! Per-step diagnostics: field extrema, energy, divergence detection.

use crate::error::{Result, SimError};

/// Norm above which the run is declared unstable and halted.
pub const STABILITY_THRESHOLD: f32 = 1.0e25;

/// Min/max of one field component over the whole grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldExtrema {
    pub min: f32,
    pub max: f32,
}

impl FieldExtrema {
    pub fn of(values: &[f32]) -> Self {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
        }
        Self { min, max }
    }
}

/// Informational scalars reported after each completed step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepReport {
    /// Completed step count (1-based after the first step).
    pub it: usize,
    pub vx: FieldExtrema,
    pub vy: FieldExtrema,
    /// Present only for 3D runs.
    pub vz: Option<FieldExtrema>,
    /// Maximum velocity-vector (or pressure) norm over the grid.
    pub norm_max: f32,
    /// Kinetic energy over the non-PML interior.
    pub kinetic: f32,
    /// Potential (strain) energy over the non-PML interior.
    pub potential: f32,
}

impl StepReport {
    pub fn total_energy(&self) -> f32 {
        self.kinetic + self.potential
    }
}

/// Fail the run if the norm crossed the stability threshold.
pub fn check_stability(it: usize, norm: f32) -> Result<()> {
    if !norm.is_finite() || norm > STABILITY_THRESHOLD {
        return Err(SimError::Divergence { step: it, norm });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extrema() {
        let e = FieldExtrema::of(&[-2.0, 0.5, 3.0, -0.1]);
        assert_eq!(e.min, -2.0);
        assert_eq!(e.max, 3.0);
    }

    #[test]
    fn test_stability_threshold() {
        assert!(check_stability(10, 1.0e20).is_ok());
        let err = check_stability(10, 2.0e25).unwrap_err();
        match err {
            SimError::Divergence { step, .. } => assert_eq!(step, 10),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_nan_norm_is_divergence() {
        assert!(check_stability(3, f32::NAN).is_err());
    }
}
