//! C-PML damping profile builder.
//!
//! Computes, once at setup, the per-axis absorption coefficient arrays used
//! by the recursive-convolution memory update
//! `memory = b * memory + a * derivative`. Profiles exist for both the full
//! grid and the staggered half grid, materialized over the padded axis
//! length so that a field index maps straight to its coefficient.
//!
//! The damping amplitude follows the INRIA report (section 6.1) profile
//! `d0 = -(N + 1) cp ln(Rc) / (2 L)` with a power-law ramp of exponent `N`,
//! and alpha linearly decays from `alpha_max` at the inner PML boundary to
//! zero at the outer edge (Festa and Vilotte).

use crate::error::{Result, SimError};

/// Coefficient arrays for one axis at one grid parity.
///
/// All arrays have the padded axis length. Outside the PML (and in the two
/// trailing padding cells) the recursion is the exact identity:
/// `d = 0`, `a = 0`, `b = 1`, `k = 1`.
#[derive(Debug, Clone)]
pub struct CpmlProfile {
    pub d: Vec<f32>,
    pub k: Vec<f32>,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

/// Full-grid and half-grid profiles for one axis.
#[derive(Debug, Clone)]
pub struct CpmlAxis {
    pub full: CpmlProfile,
    pub half: CpmlProfile,
}

/// Inputs for building one axis of C-PML profiles.
#[derive(Debug, Clone, Copy)]
pub struct CpmlAxisSpec {
    /// Number of physical grid nodes along the axis.
    pub n: usize,
    /// Grid spacing in meters.
    pub spacing: f32,
    /// PML layer thickness in cells.
    pub pml_cells: usize,
    /// Background P-wave speed used to size the damping.
    pub wave_speed: f32,
    /// Target theoretical reflection coefficient (e.g. 0.001).
    pub reflection_coeff: f32,
    /// Power-law profile exponent N (must be >= 1).
    pub power: f32,
    /// Maximum coordinate-stretching factor (>= 1).
    pub k_max: f32,
    /// Maximum relaxation angular frequency, typically `2 pi f0 / 2`.
    pub alpha_max: f32,
    /// Time step in seconds.
    pub dt: f32,
    /// PML enabled at the low-index end of the axis.
    pub at_min: bool,
    /// PML enabled at the high-index end of the axis.
    pub at_max: bool,
}

impl CpmlAxis {
    /// Build both parities of the profile for one axis.
    pub fn build(spec: &CpmlAxisSpec) -> Result<Self> {
        if spec.power < 1.0 {
            return Err(SimError::Configuration(format!(
                "C-PML power-law exponent must be >= 1, got {}",
                spec.power
            )));
        }
        if spec.k_max < 1.0 {
            return Err(SimError::Configuration(format!(
                "C-PML k_max must be >= 1, got {}",
                spec.k_max
            )));
        }
        if spec.reflection_coeff <= 0.0 || spec.reflection_coeff >= 1.0 {
            return Err(SimError::Configuration(format!(
                "C-PML reflection coefficient must lie in (0, 1), got {}",
                spec.reflection_coeff
            )));
        }
        if 2 * spec.pml_cells >= spec.n {
            return Err(SimError::Configuration(format!(
                "PML layers ({} cells each side) do not fit in {} grid nodes",
                spec.pml_cells, spec.n
            )));
        }

        let thickness = spec.pml_cells as f64 * spec.spacing as f64;
        let d0 = -(spec.power as f64 + 1.0) * spec.wave_speed as f64
            * (spec.reflection_coeff as f64).ln()
            / (2.0 * thickness);
        tracing::debug!(d0, thickness, "C-PML damping profile");

        let full = build_profile(spec, d0, 0.0);
        let half = build_profile(spec, d0, spec.spacing as f64 / 2.0);
        Ok(Self { full, half })
    }
}

fn build_profile(spec: &CpmlAxisSpec, d0: f64, offset: f64) -> CpmlProfile {
    let n_tot = spec.n + 2;
    let spacing = spec.spacing as f64;
    let thickness = spec.pml_cells as f64 * spacing;
    let orig_min = thickness;
    let orig_max = (spec.n as f64 - 1.0) * spacing - thickness;

    let mut prof = CpmlProfile {
        d: vec![0.0; n_tot],
        k: vec![1.0; n_tot],
        a: vec![0.0; n_tot],
        b: vec![1.0; n_tot],
    };

    // The two trailing cells per axis are stencil padding, not physical
    // nodes; they keep the identity recursion.
    for i in 0..spec.n {
        let x = i as f64 * spacing + offset;
        let mut dist = 0.0f64;
        if spec.at_min && orig_min - x > 0.0 {
            dist = orig_min - x;
        }
        if spec.at_max && x - orig_max > 0.0 {
            dist = x - orig_max;
        }
        if dist <= 0.0 {
            continue;
        }

        let norm = dist / thickness;
        let ramp = norm.powf(spec.power as f64);
        let d = d0 * ramp;
        let k = 1.0 + (spec.k_max as f64 - 1.0) * ramp;
        let alpha = spec.alpha_max as f64 * (1.0 - norm);
        let b = (-(d / k + alpha) * spec.dt as f64).exp();
        let a = if d > 1e-6 {
            d * (b - 1.0) / (k * (d + k * alpha))
        } else {
            0.0
        };

        prof.d[i] = d as f32;
        prof.k[i] = k as f32;
        prof.a[i] = a as f32;
        prof.b[i] = b as f32;
    }

    prof
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(n: usize, pml_cells: usize) -> CpmlAxisSpec {
        CpmlAxisSpec {
            n,
            spacing: 10.0,
            pml_cells,
            wave_speed: 3300.0,
            reflection_coeff: 0.001,
            power: 2.0,
            k_max: 1.0,
            alpha_max: 2.0 * std::f32::consts::PI * 3.5,
            dt: 1.0e-3,
            at_min: true,
            at_max: true,
        }
    }

    #[test]
    fn test_identity_outside_pml() {
        let axis = CpmlAxis::build(&spec(100, 10)).unwrap();
        for prof in [&axis.full, &axis.half] {
            for i in 11..89 {
                assert_eq!(prof.a[i], 0.0, "a not identity at {}", i);
                assert_eq!(prof.b[i], 1.0, "b not identity at {}", i);
                assert_eq!(prof.k[i], 1.0, "k not identity at {}", i);
            }
            // Padding cells are inert too.
            assert_eq!(prof.b[100], 1.0);
            assert_eq!(prof.b[101], 1.0);
        }
    }

    #[test]
    fn test_damping_monotone_into_layer() {
        let axis = CpmlAxis::build(&spec(100, 10)).unwrap();
        // Left layer: distance into the PML decreases with i.
        for i in 0..10 {
            assert!(
                axis.full.d[i] >= axis.full.d[i + 1],
                "d not monotone at left layer index {}",
                i
            );
        }
        // Right layer: distance into the PML increases with i.
        for i in 90..99 {
            assert!(
                axis.full.d[i + 1] >= axis.full.d[i],
                "d not monotone at right layer index {}",
                i
            );
        }
        assert!(axis.full.d[0] > 0.0);
        assert!(axis.full.d[99] > 0.0);
    }

    #[test]
    fn test_k_at_least_one_and_d_nonnegative() {
        let mut s = spec(64, 8);
        s.k_max = 7.0;
        let axis = CpmlAxis::build(&s).unwrap();
        for prof in [&axis.full, &axis.half] {
            for i in 0..66 {
                assert!(prof.k[i] >= 1.0);
                assert!(prof.d[i] >= 0.0);
                assert!(prof.b[i] <= 1.0 + 1e-6);
            }
        }
    }

    #[test]
    fn test_disabled_face_is_identity() {
        let mut s = spec(100, 10);
        s.at_min = false;
        let axis = CpmlAxis::build(&s).unwrap();
        for i in 0..11 {
            assert_eq!(axis.full.a[i], 0.0);
            assert_eq!(axis.full.b[i], 1.0);
        }
        assert!(axis.full.d[95] > 0.0, "max face still absorbs");
    }

    #[test]
    fn test_invalid_power_rejected() {
        let mut s = spec(100, 10);
        s.power = 0.5;
        assert!(CpmlAxis::build(&s).is_err());
    }

    #[test]
    fn test_oversized_layer_rejected() {
        assert!(CpmlAxis::build(&spec(16, 8)).is_err());
    }
}
