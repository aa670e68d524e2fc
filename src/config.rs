//! Simulation configuration: medium, PML layout, sources and receivers.
//!
//! Configurations are plain data loaded by the caller (file parsing is out
//! of scope); `validate()` performs every precondition check before a
//! single field array is touched.

use std::f32::consts::PI;

use crate::cpml::CpmlAxisSpec;
use crate::error::{Result, SimError};
use crate::fd::FdCoefficients;
use crate::source::Wavelet;

/// Isotropic medium described by wave speeds and density.
#[derive(Debug, Clone, Copy)]
pub struct Medium {
    /// P-wave speed in m/s.
    pub cp: f32,
    /// S-wave speed in m/s (zero for a fluid).
    pub cs: f32,
    /// Density in kg/m^3.
    pub rho: f32,
}

impl Medium {
    pub fn new(cp: f32, cs: f32, rho: f32) -> Self {
        Self { cp, cs, rho }
    }

    /// Second Lame parameter (shear modulus), `rho cs^2`.
    pub fn mu(&self) -> f32 {
        self.rho * self.cs * self.cs
    }

    /// First Lame parameter, `rho (cp^2 - 2 cs^2)`.
    pub fn lambda(&self) -> f32 {
        self.rho * (self.cp * self.cp - 2.0 * self.cs * self.cs)
    }

    /// `lambda + 2 mu = rho cp^2`.
    pub fn lambda_plus_2mu(&self) -> f32 {
        self.rho * self.cp * self.cp
    }

    /// Acoustic bulk modulus, `rho cp^2`.
    pub fn kappa(&self) -> f32 {
        self.rho * self.cp * self.cp
    }

    pub fn validate(&self) -> Result<()> {
        if self.cp <= 0.0 || self.rho <= 0.0 || self.cs < 0.0 {
            return Err(SimError::Configuration(format!(
                "medium parameters must be positive (cp = {}, cs = {}, rho = {})",
                self.cp, self.cs, self.rho
            )));
        }
        if self.lambda() < 0.0 {
            return Err(SimError::Configuration(format!(
                "cs = {} too large for cp = {} (negative lambda)",
                self.cs, self.cp
            )));
        }
        Ok(())
    }
}

/// Absorbing layer parameters shared by every axis.
#[derive(Debug, Clone, Copy)]
pub struct PmlConfig {
    /// Layer thickness in cells.
    pub thickness: usize,
    /// Target theoretical reflection coefficient.
    pub reflection_coeff: f32,
    /// Power-law profile exponent N.
    pub power: f32,
    /// Maximum coordinate-stretching factor.
    pub k_max: f32,
    /// Maximum relaxation angular frequency.
    pub alpha_max: f32,
    /// Per-face enables (x min/max, y min/max, z min/max).
    pub x_min: bool,
    pub x_max: bool,
    pub y_min: bool,
    pub y_max: bool,
    pub z_min: bool,
    pub z_max: bool,
}

impl PmlConfig {
    /// Standard profile for a dominant source frequency: N = 2,
    /// Rc = 0.001, `alpha_max = 2 pi (f0 / 2)`, all faces absorbing.
    pub fn for_frequency(thickness: usize, f0: f32) -> Self {
        Self {
            thickness,
            reflection_coeff: 0.001,
            power: 2.0,
            k_max: 1.0,
            alpha_max: 2.0 * PI * (f0 / 2.0),
            x_min: true,
            x_max: true,
            y_min: true,
            y_max: true,
            z_min: true,
            z_max: true,
        }
    }

    pub fn with_k_max(mut self, k_max: f32) -> Self {
        self.k_max = k_max;
        self
    }

    pub(crate) fn axis_spec(
        &self,
        n: usize,
        spacing: f32,
        wave_speed: f32,
        dt: f32,
        at_min: bool,
        at_max: bool,
    ) -> CpmlAxisSpec {
        CpmlAxisSpec {
            n,
            spacing,
            pml_cells: self.thickness,
            wave_speed,
            reflection_coeff: self.reflection_coeff,
            power: self.power,
            k_max: self.k_max,
            alpha_max: self.alpha_max,
            dt,
            at_min,
            at_max,
        }
    }
}

/// A point force source in the x-y plane.
#[derive(Debug, Clone, Copy)]
pub struct Source2D {
    /// Position in meters.
    pub x: f32,
    pub y: f32,
    pub wavelet: Wavelet,
    /// Force direction in degrees from the y axis.
    pub angle_deg: f32,
}

/// A velocity receiver in the x-y plane.
#[derive(Debug, Clone, Copy)]
pub struct Receiver2D {
    pub x: f32,
    pub y: f32,
}

/// A point force source in 3D (force applied along z).
#[derive(Debug, Clone, Copy)]
pub struct Source3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub wavelet: Wavelet,
}

/// A velocity receiver in 3D.
#[derive(Debug, Clone, Copy)]
pub struct Receiver3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Configuration of a 2D elastic velocity-stress run.
#[derive(Debug, Clone)]
pub struct ElasticConfig2D {
    pub nx: usize,
    pub ny: usize,
    pub dx: f32,
    pub dy: f32,
    pub dt: f32,
    pub nstep: usize,
    pub medium: Medium,
    pub pml: PmlConfig,
    /// Spatial accuracy order (2, 4, 6, 8 or 10).
    pub order: usize,
    pub sources: Vec<Source2D>,
    pub receivers: Vec<Receiver2D>,
    /// Log a step report every this many steps.
    pub report_interval: usize,
}

impl Default for ElasticConfig2D {
    fn default() -> Self {
        let f0 = 7.0;
        let nx = 300;
        let ny = 300;
        let dx = 10.0;
        let dy = 10.0;
        let xsource = (nx / 2) as f32 * dx;
        let ysource = (ny / 2) as f32 * dy;
        Self {
            nx,
            ny,
            dx,
            dy,
            dt: 1.0e-3,
            nstep: 2000,
            medium: Medium::new(3300.0, 2000.0e-5, 2800.0),
            pml: PmlConfig::for_frequency(10, f0),
            order: 4,
            sources: vec![Source2D {
                x: xsource,
                y: ysource,
                wavelet: Wavelet::gaussian_derivative(f0).with_gain(1.0e7),
                angle_deg: 0.0,
            }],
            receivers: vec![
                Receiver2D {
                    x: xsource - 10.0 * dx,
                    y: ysource + 10.0 * dy,
                },
                Receiver2D {
                    x: xsource,
                    y: ysource + 30.0 * dy,
                },
            ],
            report_interval: 100,
        }
    }
}

impl ElasticConfig2D {
    /// CFL stability number, `cp dt sqrt(1/dx^2 + 1/dy^2)`.
    pub fn courant_number(&self) -> f32 {
        self.medium.cp * self.dt * (1.0 / (self.dx * self.dx) + 1.0 / (self.dy * self.dy)).sqrt()
    }

    pub fn validate(&self) -> Result<()> {
        if self.nx < 4 || self.ny < 4 {
            return Err(SimError::Configuration(format!(
                "grid {}x{} too small",
                self.nx, self.ny
            )));
        }
        if self.dx <= 0.0 || self.dy <= 0.0 || self.dt <= 0.0 || self.nstep == 0 {
            return Err(SimError::Configuration(
                "grid spacing, time step and step count must be positive".into(),
            ));
        }
        self.medium.validate()?;
        FdCoefficients::for_order(self.order)?;
        if self.pml.power < 1.0 {
            return Err(SimError::Configuration(format!(
                "C-PML power-law exponent must be >= 1, got {}",
                self.pml.power
            )));
        }
        let courant = self.courant_number();
        if courant > 1.0 {
            return Err(SimError::Configuration(format!(
                "Courant number {:.4} > 1: the time step is too long",
                courant
            )));
        }
        Ok(())
    }
}

/// Configuration of a 3D elastic velocity-stress run.
#[derive(Debug, Clone)]
pub struct ElasticConfig3D {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dx: f32,
    pub dy: f32,
    pub dz: f32,
    pub dt: f32,
    pub nstep: usize,
    pub medium: Medium,
    pub pml: PmlConfig,
    pub order: usize,
    pub sources: Vec<Source3D>,
    pub receivers: Vec<Receiver3D>,
    pub report_interval: usize,
}

impl Default for ElasticConfig3D {
    fn default() -> Self {
        let f0 = 18.0;
        let n = 100;
        let d = 4.0;
        let src = (n / 2) as f32 * d;
        Self {
            nx: n,
            ny: n,
            nz: n,
            dx: d,
            dy: d,
            dz: d,
            dt: 4.0e-4,
            nstep: 1000,
            medium: Medium::new(3000.0, 2000.0, 2000.0),
            pml: PmlConfig::for_frequency(10, f0).with_k_max(7.0),
            order: 4,
            sources: vec![Source3D {
                x: src,
                y: src,
                z: src,
                wavelet: Wavelet::gaussian_derivative(f0).with_gain(1.0e7),
            }],
            receivers: vec![
                Receiver3D {
                    x: src - 10.0 * d,
                    y: src + 10.0 * d,
                    z: src,
                },
                Receiver3D {
                    x: src,
                    y: src + 25.0 * d,
                    z: src,
                },
                Receiver3D {
                    x: src + 10.0 * d,
                    y: src + 25.0 * d,
                    z: src,
                },
            ],
            report_interval: 50,
        }
    }
}

impl ElasticConfig3D {
    pub fn courant_number(&self) -> f32 {
        self.medium.cp
            * self.dt
            * (1.0 / (self.dx * self.dx) + 1.0 / (self.dy * self.dy) + 1.0 / (self.dz * self.dz))
                .sqrt()
    }

    pub fn validate(&self) -> Result<()> {
        if self.nx < 4 || self.ny < 4 || self.nz < 4 {
            return Err(SimError::Configuration(format!(
                "grid {}x{}x{} too small",
                self.nx, self.ny, self.nz
            )));
        }
        if self.dx <= 0.0 || self.dy <= 0.0 || self.dz <= 0.0 || self.dt <= 0.0 || self.nstep == 0 {
            return Err(SimError::Configuration(
                "grid spacing, time step and step count must be positive".into(),
            ));
        }
        self.medium.validate()?;
        FdCoefficients::for_order(self.order)?;
        let courant = self.courant_number();
        if courant > 1.0 {
            return Err(SimError::Configuration(format!(
                "Courant number {:.4} > 1: the time step is too long",
                courant
            )));
        }
        Ok(())
    }
}

/// Configuration of a 2D acoustic (pressure) run.
#[derive(Debug, Clone)]
pub struct AcousticConfig2D {
    pub nx: usize,
    pub ny: usize,
    pub dx: f32,
    pub dy: f32,
    pub dt: f32,
    pub nstep: usize,
    /// Unrelaxed sound speed in m/s.
    pub cp: f32,
    /// Density in kg/m^3.
    pub rho: f32,
    pub pml: PmlConfig,
    pub sources: Vec<Source2D>,
    pub receivers: Vec<Receiver2D>,
    pub report_interval: usize,
}

impl Default for AcousticConfig2D {
    fn default() -> Self {
        let f0 = 35.0;
        let nx = 300;
        let ny = 300;
        let dx = 1.0;
        let dy = 1.0;
        let xsource = (nx / 2) as f32 * dx;
        let ysource = (ny / 2) as f32 * dy;
        Self {
            nx,
            ny,
            dx,
            dy,
            dt: 1.0e-4,
            nstep: 1500,
            cp: 2500.0,
            rho: 2200.0,
            pml: PmlConfig::for_frequency(10, f0),
            sources: vec![Source2D {
                x: xsource,
                y: ysource,
                wavelet: Wavelet::ricker(f0),
                angle_deg: 0.0,
            }],
            receivers: vec![Receiver2D {
                x: xsource - 20.0 * dx,
                y: ysource + 20.0 * dy,
            }],
            report_interval: 100,
        }
    }
}

impl AcousticConfig2D {
    pub fn courant_number(&self) -> f32 {
        self.cp * self.dt * (1.0 / (self.dx * self.dx) + 1.0 / (self.dy * self.dy)).sqrt()
    }

    /// Acoustic bulk modulus, `rho cp^2`.
    pub fn kappa(&self) -> f32 {
        self.rho * self.cp * self.cp
    }

    pub fn validate(&self) -> Result<()> {
        if self.nx < 4 || self.ny < 4 {
            return Err(SimError::Configuration(format!(
                "grid {}x{} too small",
                self.nx, self.ny
            )));
        }
        if self.dx <= 0.0 || self.dy <= 0.0 || self.dt <= 0.0 || self.nstep == 0 {
            return Err(SimError::Configuration(
                "grid spacing, time step and step count must be positive".into(),
            ));
        }
        if self.cp <= 0.0 || self.rho <= 0.0 {
            return Err(SimError::Configuration(
                "sound speed and density must be positive".into(),
            ));
        }
        if self.pml.power < 1.0 {
            return Err(SimError::Configuration(format!(
                "C-PML power-law exponent must be >= 1, got {}",
                self.pml.power
            )));
        }
        let courant = self.courant_number();
        if courant > 1.0 {
            return Err(SimError::Configuration(format!(
                "Courant number {:.4} > 1: the time step is too long",
                courant
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_are_valid() {
        ElasticConfig2D::default().validate().unwrap();
        ElasticConfig3D::default().validate().unwrap();
        AcousticConfig2D::default().validate().unwrap();
    }

    #[test]
    fn test_lame_parameters() {
        let m = Medium::new(3300.0, 2000.0e-5, 2800.0);
        assert!((m.lambda_plus_2mu() - 2800.0 * 3300.0 * 3300.0).abs() < 1.0);
        assert!(m.mu() >= 0.0);
        assert!((m.lambda() + 2.0 * m.mu() - m.lambda_plus_2mu()).abs() < 1.0);
    }

    #[test]
    fn test_courant_rejection() {
        let cfg = ElasticConfig2D {
            dt: 1.0,
            ..Default::default()
        };
        assert!(cfg.courant_number() > 1.0);
        match cfg.validate() {
            Err(SimError::Configuration(msg)) => assert!(msg.contains("Courant")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_order_rejected_in_validate() {
        let cfg = ElasticConfig2D {
            order: 5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_default_courant_stable() {
        let cfg = ElasticConfig2D::default();
        assert!(cfg.courant_number() <= 1.0);
        let cfg = ElasticConfig3D::default();
        assert!(cfg.courant_number() <= 1.0);
    }
}
