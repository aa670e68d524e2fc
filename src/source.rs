//! Source wavelets and source/receiver grid mapping.
//!
//! Wavelets are synthesized once into per-step time series before the run
//! starts. Continuous source/receiver coordinates snap to the nearest grid
//! node by exhaustive search, which runs once at setup.

use std::f32::consts::PI;

const DEGREES_TO_RADIANS: f32 = PI / 180.0;

/// Time-domain excitation shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wavelet {
    /// First derivative of a Gaussian, `-2 a (t - t0) exp(-a (t - t0)^2)`
    /// with `a = pi^2 f0^2`.
    GaussianDerivative { f0: f32, t0: f32, gain: f32 },
    /// Ricker wavelet (second derivative of a Gaussian),
    /// `(1 - 2 a (t - t0)^2) exp(-a (t - t0)^2)`.
    Ricker { f0: f32, t0: f32, gain: f32 },
    /// Gaussian-windowed cosine burst with half-power fractional bandwidth.
    GaussPulse {
        fc: f32,
        bandwidth: f32,
        t0: f32,
        gain: f32,
    },
}

impl Wavelet {
    /// Gaussian-derivative wavelet with the conventional `t0 = 1.2 / f0`
    /// onset delay and unit gain.
    pub fn gaussian_derivative(f0: f32) -> Self {
        Self::GaussianDerivative {
            f0,
            t0: 1.2 / f0,
            gain: 1.0,
        }
    }

    /// Ricker wavelet with the conventional `t0 = 1.2 / f0` delay.
    pub fn ricker(f0: f32) -> Self {
        Self::Ricker {
            f0,
            t0: 1.2 / f0,
            gain: 1.0,
        }
    }

    /// Gaussian pulse at center frequency `fc` with fractional bandwidth.
    pub fn gauss_pulse(fc: f32, bandwidth: f32) -> Self {
        Self::GaussPulse {
            fc,
            bandwidth,
            t0: 1.2 / fc,
            gain: 1.0,
        }
    }

    /// Scale the excitation amplitude.
    pub fn with_gain(self, gain: f32) -> Self {
        match self {
            Self::GaussianDerivative { f0, t0, .. } => Self::GaussianDerivative { f0, t0, gain },
            Self::Ricker { f0, t0, .. } => Self::Ricker { f0, t0, gain },
            Self::GaussPulse {
                fc, bandwidth, t0, ..
            } => Self::GaussPulse {
                fc,
                bandwidth,
                t0,
                gain,
            },
        }
    }

    /// Override the arrival-time offset.
    pub fn with_delay(self, delay: f32) -> Self {
        match self {
            Self::GaussianDerivative { f0, gain, .. } => Self::GaussianDerivative {
                f0,
                t0: delay,
                gain,
            },
            Self::Ricker { f0, gain, .. } => Self::Ricker {
                f0,
                t0: delay,
                gain,
            },
            Self::GaussPulse {
                fc,
                bandwidth,
                gain,
                ..
            } => Self::GaussPulse {
                fc,
                bandwidth,
                t0: delay,
                gain,
            },
        }
    }

    /// Amplitude at time `t`.
    pub fn sample(&self, t: f32) -> f32 {
        match *self {
            Self::GaussianDerivative { f0, t0, gain } => {
                let a = PI * PI * f0 * f0;
                let ts = t - t0;
                -(gain * 2.0 * a * ts * (-a * ts * ts).exp())
            }
            Self::Ricker { f0, t0, gain } => {
                let a = PI * PI * f0 * f0;
                let ts = t - t0;
                gain * (1.0 - 2.0 * a * ts * ts) * (-a * ts * ts).exp()
            }
            Self::GaussPulse {
                fc,
                bandwidth,
                t0,
                gain,
            } => {
                let a = (PI * fc * bandwidth).powi(2) / (4.0 * std::f32::consts::LN_2);
                let ts = t - t0;
                gain * (-a * ts * ts).exp() * (2.0 * PI * fc * ts).cos()
            }
        }
    }

    /// Materialize the excitation for every time step of a run.
    pub fn time_series(&self, nstep: usize, dt: f32) -> Vec<f32> {
        (0..nstep).map(|it| self.sample(it as f32 * dt)).collect()
    }
}

/// Decompose a force of the given angle (degrees from the y axis) into
/// x/y direction cosines.
pub fn force_components(angle_deg: f32) -> (f32, f32) {
    let a = angle_deg * DEGREES_TO_RADIANS;
    (a.sin(), a.cos())
}

/// Snap a continuous 2D position to the nearest grid node.
///
/// Exhaustive scan over all nodes; ties keep the first minimum in scan
/// order (j inner). Runs once at setup.
pub fn nearest_node_2d(x: f32, y: f32, nx: usize, ny: usize, dx: f32, dy: f32) -> (usize, usize) {
    let mut best = f32::MAX;
    let mut found = (0usize, 0usize);
    for i in 0..nx {
        for j in 0..ny {
            let ddx = i as f32 * dx - x;
            let ddy = j as f32 * dy - y;
            let dist = (ddx * ddx + ddy * ddy).sqrt();
            if dist < best {
                best = dist;
                found = (i, j);
            }
        }
    }
    found
}

/// Snap a continuous 3D position to the nearest grid node.
#[allow(clippy::too_many_arguments)]
pub fn nearest_node_3d(
    x: f32,
    y: f32,
    z: f32,
    nx: usize,
    ny: usize,
    nz: usize,
    dx: f32,
    dy: f32,
    dz: f32,
) -> (usize, usize, usize) {
    let mut best = f32::MAX;
    let mut found = (0usize, 0usize, 0usize);
    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                let ddx = i as f32 * dx - x;
                let ddy = j as f32 * dy - y;
                let ddz = k as f32 * dz - z;
                let dist = (ddx * ddx + ddy * ddy + ddz * ddz).sqrt();
                if dist < best {
                    best = dist;
                    found = (i, j, k);
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_node_exact_hit() {
        let (i, j) = nearest_node_2d(50.0, 80.0, 20, 20, 10.0, 10.0);
        assert_eq!((i, j), (5, 8));
    }

    #[test]
    fn test_nearest_node_rounds_to_closest() {
        let (i, j) = nearest_node_2d(54.0, 86.0, 20, 20, 10.0, 10.0);
        assert_eq!((i, j), (5, 9));
    }

    #[test]
    fn test_nearest_node_3d() {
        let (i, j, k) = nearest_node_3d(12.0, 39.0, 0.0, 16, 16, 16, 4.0, 4.0, 4.0);
        assert_eq!((i, j, k), (3, 10, 0));
    }

    #[test]
    fn test_gaussian_derivative_antisymmetric_about_delay() {
        let w = Wavelet::gaussian_derivative(7.0);
        let t0 = 1.2 / 7.0;
        let s = w.sample(t0 + 0.01);
        let s_mirror = w.sample(t0 - 0.01);
        assert!((s + s_mirror).abs() < 1e-5 * s.abs().max(1.0));
        assert_eq!(w.sample(t0), 0.0);
    }

    #[test]
    fn test_ricker_peaks_at_delay() {
        let w = Wavelet::ricker(7.0).with_gain(2.0);
        let t0 = 1.2 / 7.0;
        let peak = w.sample(t0);
        assert!((peak - 2.0).abs() < 1e-6);
        assert!(w.sample(t0 + 0.02).abs() < peak);
    }

    #[test]
    fn test_gauss_pulse_envelope_decays() {
        let w = Wavelet::gauss_pulse(35.0, 0.6);
        let t0 = 1.2 / 35.0;
        assert!(w.sample(t0).abs() > w.sample(t0 + 0.2).abs());
        assert!(w.sample(t0 + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_time_series_length_and_values() {
        let w = Wavelet::ricker(7.0);
        let series = w.time_series(100, 1.0e-3);
        assert_eq!(series.len(), 100);
        assert_eq!(series[40], w.sample(0.040));
    }

    #[test]
    fn test_force_components_vertical_by_default() {
        let (fx, fy) = force_components(0.0);
        assert_eq!(fx, 0.0);
        assert_eq!(fy, 1.0);
        let (fx, fy) = force_components(90.0);
        assert!((fx - 1.0).abs() < 1e-6);
        assert!(fy.abs() < 1e-6);
    }
}
