//! 2D acoustic (pressure) engine.
//!
//! Second-order pressure formulation: a C-PML-corrected first derivative
//! divided by the face-averaged density, a corrected second derivative,
//! then the explicit time update
//! `p_new = 2 p_now - p_old + dt^2 (lap * kappa + 4 pi cp^2 s(t) at the
//! source node)`, followed by Dirichlet edges and the circular rotation of
//! the three pressure slots. Rotation happens after the Dirichlet pass.
//!
//! Arrays are unpadded `nx * ny`; edge cells the stencils skip stay zero,
//! which is the sentinel-read convention of the kernel formulation.

use crate::config::AcousticConfig2D;
use crate::cpml::CpmlAxis;
use crate::error::{Result, SimError};
use crate::simulation::diagnostics::{check_stability, FieldExtrema};
use crate::simulation::RunState;
use crate::source::nearest_node_2d;

const FOUR_PI: f32 = 4.0 * std::f32::consts::PI;

struct MappedAcousticSource {
    i: usize,
    j: usize,
    series: Vec<f32>,
}

/// Per-step scalars for the pressure variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct PressureReport {
    pub it: usize,
    pub p: FieldExtrema,
    /// Maximum absolute pressure over the grid.
    pub norm_max: f32,
}

/// Sequential 2D acoustic run.
pub struct AcousticSim2D {
    cfg: AcousticConfig2D,
    cpml_x: CpmlAxis,
    cpml_y: CpmlAxis,

    p_new: Vec<f32>,
    p_now: Vec<f32>,
    p_old: Vec<f32>,

    vdp_x: Vec<f32>,
    vdp_y: Vec<f32>,
    mdp_x: Vec<f32>,
    mdp_y: Vec<f32>,
    dp_x: Vec<f32>,
    dp_y: Vec<f32>,
    vdp_xx: Vec<f32>,
    vdp_yy: Vec<f32>,
    dmdp_x: Vec<f32>,
    dmdp_y: Vec<f32>,
    lap_x: Vec<f32>,
    lap_y: Vec<f32>,

    kappa: Vec<f32>,
    rho_half_x: Vec<f32>,
    rho_half_y: Vec<f32>,

    sources: Vec<MappedAcousticSource>,
    receivers: Vec<(usize, usize)>,
    traces_p: Vec<f32>,
    it: usize,
    state: RunState,
}

impl AcousticSim2D {
    pub fn new(cfg: AcousticConfig2D) -> Result<Self> {
        cfg.validate()?;
        let cpml_x = CpmlAxis::build(&cfg.pml.axis_spec(
            cfg.nx,
            cfg.dx,
            cfg.cp,
            cfg.dt,
            cfg.pml.x_min,
            cfg.pml.x_max,
        ))?;
        let cpml_y = CpmlAxis::build(&cfg.pml.axis_spec(
            cfg.ny,
            cfg.dy,
            cfg.cp,
            cfg.dt,
            cfg.pml.y_min,
            cfg.pml.y_max,
        ))?;

        let size = cfg.nx * cfg.ny;
        let rho = vec![cfg.rho; size];
        let kappa = vec![cfg.kappa(); size];

        // Face-averaged densities; the last face copies its neighbor.
        let ny = cfg.ny;
        let mut rho_half_x = rho.clone();
        let mut rho_half_y = rho.clone();
        for i in 0..cfg.nx {
            for j in 0..ny {
                let idx = i * ny + j;
                if i + 1 < cfg.nx {
                    rho_half_x[idx] = 0.5 * (rho[idx + ny] + rho[idx]);
                } else {
                    rho_half_x[idx] = rho_half_x[idx - ny];
                }
                if j + 1 < ny {
                    rho_half_y[idx] = 0.5 * (rho[idx + 1] + rho[idx]);
                } else {
                    rho_half_y[idx] = rho_half_y[idx - 1];
                }
            }
        }

        let sources = cfg
            .sources
            .iter()
            .map(|s| {
                let (i, j) = nearest_node_2d(s.x, s.y, cfg.nx, cfg.ny, cfg.dx, cfg.dy);
                tracing::debug!(i, j, "mapped acoustic source");
                MappedAcousticSource {
                    i,
                    j,
                    series: s.wavelet.time_series(cfg.nstep, cfg.dt),
                }
            })
            .collect();
        let receivers: Vec<_> = cfg
            .receivers
            .iter()
            .map(|r| nearest_node_2d(r.x, r.y, cfg.nx, cfg.ny, cfg.dx, cfg.dy))
            .collect();

        tracing::info!(
            nx = cfg.nx,
            ny = cfg.ny,
            nstep = cfg.nstep,
            courant = cfg.courant_number(),
            "2D acoustic run ready"
        );

        let nrec = receivers.len();
        Ok(Self {
            cpml_x,
            cpml_y,
            p_new: vec![0.0; size],
            p_now: vec![0.0; size],
            p_old: vec![0.0; size],
            vdp_x: vec![0.0; size],
            vdp_y: vec![0.0; size],
            mdp_x: vec![0.0; size],
            mdp_y: vec![0.0; size],
            dp_x: vec![0.0; size],
            dp_y: vec![0.0; size],
            vdp_xx: vec![0.0; size],
            vdp_yy: vec![0.0; size],
            dmdp_x: vec![0.0; size],
            dmdp_y: vec![0.0; size],
            lap_x: vec![0.0; size],
            lap_y: vec![0.0; size],
            kappa,
            rho_half_x,
            rho_half_y,
            sources,
            receivers,
            traces_p: vec![0.0; cfg.nstep * nrec],
            it: 0,
            state: RunState::Ready,
            cfg,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn it(&self) -> usize {
        self.it
    }

    /// Current pressure field (`nx * ny`, x slowest).
    pub fn pressure(&self) -> &[f32] {
        &self.p_now
    }

    pub fn trace_p(&self, irec: usize) -> Vec<f32> {
        let nrec = self.receivers.len();
        (0..self.cfg.nstep)
            .map(|t| self.traces_p[t * nrec + irec])
            .collect()
    }

    pub fn step(&mut self) -> Result<PressureReport> {
        match self.state {
            RunState::Ready => self.state = RunState::Stepping,
            RunState::Stepping => {}
            _ => {
                return Err(SimError::Configuration(
                    "cannot step a finished simulation".into(),
                ))
            }
        }

        self.first_derivative();
        self.second_derivative();
        self.time_update();
        self.record_and_rotate();
        self.it += 1;

        let report = PressureReport {
            it: self.it,
            p: FieldExtrema::of(&self.p_now),
            norm_max: self.p_now.iter().map(|p| p.abs()).fold(0.0, f32::max),
        };
        if let Err(e) = check_stability(self.it, report.norm_max) {
            self.state = RunState::Halted;
            tracing::warn!(it = self.it, "simulation halted: instability detected");
            return Err(e);
        }
        if self.it >= self.cfg.nstep {
            self.state = RunState::Completed;
        }
        Ok(report)
    }

    pub fn run(&mut self) -> Result<PressureReport> {
        let mut last = PressureReport::default();
        while self.state == RunState::Ready || self.state == RunState::Stepping {
            last = self.step()?;
            if last.it % self.cfg.report_interval == 0 {
                tracing::info!(it = last.it, norm = last.norm_max, "step report");
            }
        }
        Ok(last)
    }

    /// First spatial derivative of pressure on the half grid, memory
    /// recursion, then division by the face-averaged density.
    fn first_derivative(&mut self) {
        let (nx, ny) = (self.cfg.nx, self.cfg.ny);
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let half_x = &self.cpml_x.half;
        let half_y = &self.cpml_y.half;

        for i in 0..nx {
            for j in 0..ny {
                let idx = i * ny + j;
                if i + 1 < nx {
                    self.vdp_x[idx] = (self.p_now[idx + ny] - self.p_now[idx]) * one_dx;
                }
                if j + 1 < ny {
                    self.vdp_y[idx] = (self.p_now[idx + 1] - self.p_now[idx]) * one_dy;
                }
                self.mdp_x[idx] = half_x.b[i] * self.mdp_x[idx] + half_x.a[i] * self.vdp_x[idx];
                self.mdp_y[idx] = half_y.b[j] * self.mdp_y[idx] + half_y.a[j] * self.vdp_y[idx];
                self.dp_x[idx] =
                    (self.vdp_x[idx] / half_x.k[i] + self.mdp_x[idx]) / self.rho_half_x[idx];
                self.dp_y[idx] =
                    (self.vdp_y[idx] / half_y.k[j] + self.mdp_y[idx]) / self.rho_half_y[idx];
            }
        }
    }

    /// Second spatial derivative back on the full grid, with its own
    /// memory recursion.
    fn second_derivative(&mut self) {
        let (nx, ny) = (self.cfg.nx, self.cfg.ny);
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let full_x = &self.cpml_x.full;
        let full_y = &self.cpml_y.full;

        for i in 0..nx {
            for j in 0..ny {
                let idx = i * ny + j;
                if i >= 1 {
                    self.vdp_xx[idx] = (self.dp_x[idx] - self.dp_x[idx - ny]) * one_dx;
                }
                if j >= 1 {
                    self.vdp_yy[idx] = (self.dp_y[idx] - self.dp_y[idx - 1]) * one_dy;
                }
                self.dmdp_x[idx] = full_x.b[i] * self.dmdp_x[idx] + full_x.a[i] * self.vdp_xx[idx];
                self.dmdp_y[idx] = full_y.b[j] * self.dmdp_y[idx] + full_y.a[j] * self.vdp_yy[idx];
                self.lap_x[idx] = self.vdp_xx[idx] / full_x.k[i] + self.dmdp_x[idx];
                self.lap_y[idx] = self.vdp_yy[idx] / full_y.k[j] + self.dmdp_y[idx];
            }
        }
    }

    /// Explicit time update, source injection and Dirichlet edges.
    fn time_update(&mut self) {
        let (nx, ny) = (self.cfg.nx, self.cfg.ny);
        let dt2 = self.cfg.dt * self.cfg.dt;

        for idx in 0..nx * ny {
            self.p_new[idx] = 2.0 * self.p_now[idx] - self.p_old[idx]
                + dt2 * (self.lap_x[idx] + self.lap_y[idx]) * self.kappa[idx];
        }

        let src_scale = dt2 * FOUR_PI * self.cfg.cp * self.cfg.cp;
        for src in &self.sources {
            let idx = src.i * ny + src.j;
            self.p_new[idx] += src_scale * src.series[self.it];
        }

        for j in 0..ny {
            self.p_new[j] = 0.0;
            self.p_new[(nx - 1) * ny + j] = 0.0;
        }
        for i in 0..nx {
            self.p_new[i * ny] = 0.0;
            self.p_new[i * ny + ny - 1] = 0.0;
        }
    }

    /// Receiver sampling from the freshly computed slot, then rotation:
    /// the present becomes the past, the future becomes the present.
    fn record_and_rotate(&mut self) {
        let ny = self.cfg.ny;
        let nrec = self.receivers.len();
        let row = self.it * nrec;
        for (r, &(i, j)) in self.receivers.iter().enumerate() {
            self.traces_p[row + r] = self.p_new[i * ny + j];
        }
        std::mem::swap(&mut self.p_old, &mut self.p_now);
        std::mem::swap(&mut self.p_now, &mut self.p_new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PmlConfig, Receiver2D, Source2D};
    use crate::source::Wavelet;

    fn small_config() -> AcousticConfig2D {
        AcousticConfig2D {
            nx: 48,
            ny: 48,
            dx: 1.0,
            dy: 1.0,
            dt: 1.0e-4,
            nstep: 450,
            cp: 2500.0,
            rho: 2200.0,
            pml: PmlConfig::for_frequency(8, 35.0),
            sources: vec![Source2D {
                x: 24.0,
                y: 24.0,
                wavelet: Wavelet::ricker(35.0),
                angle_deg: 0.0,
            }],
            receivers: vec![Receiver2D { x: 14.0, y: 34.0 }],
            report_interval: 100,
        }
    }

    #[test]
    fn test_zero_source_stays_zero() {
        let cfg = AcousticConfig2D {
            sources: vec![],
            ..small_config()
        };
        let mut sim = AcousticSim2D::new(cfg).unwrap();
        for _ in 0..50 {
            sim.step().unwrap();
        }
        assert!(sim.p_now.iter().all(|&p| p == 0.0));
        assert!(sim.mdp_x.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_pressure_edges_zero() {
        let mut sim = AcousticSim2D::new(small_config()).unwrap();
        for _ in 0..100 {
            sim.step().unwrap();
        }
        let (nx, ny) = (sim.cfg.nx, sim.cfg.ny);
        for j in 0..ny {
            assert_eq!(sim.p_now[j], 0.0);
            assert_eq!(sim.p_now[(nx - 1) * ny + j], 0.0);
        }
        for i in 0..nx {
            assert_eq!(sim.p_now[i * ny], 0.0);
            assert_eq!(sim.p_now[i * ny + ny - 1], 0.0);
        }
    }

    #[test]
    fn test_receiver_sees_arrival_after_travel_time() {
        let mut sim = AcousticSim2D::new(small_config()).unwrap();
        sim.run().unwrap();
        let trace = sim.trace_p(0);
        let peak = trace.iter().map(|p| p.abs()).fold(0.0f32, f32::max);
        assert!(peak > 0.0, "no signal reached the receiver");

        // Source-receiver distance is sqrt(200) m; with cp = 2500 m/s and
        // dt = 1e-4 s the physical travel time is ~57 steps, and the
        // wavelet onset delay adds 1.2/f0 ~ 343 steps of quiet on top.
        let early = trace[..50].iter().map(|p| p.abs()).fold(0.0f32, f32::max);
        assert!(
            early <= 1.0e-3 * peak,
            "signal before travel time: early = {}, peak = {}",
            early,
            peak
        );
    }

    #[test]
    fn test_rotation_keeps_three_slots_consistent() {
        let mut sim = AcousticSim2D::new(small_config()).unwrap();
        let r1 = sim.step().unwrap();
        // After one step the injected pulse lives in p_now, not p_new.
        assert_eq!(r1.it, 1);
        let center = sim.cfg.nx / 2 * sim.cfg.ny + sim.cfg.ny / 2;
        let now = sim.p_now[center];
        sim.step().unwrap();
        assert_eq!(sim.p_old[center], now);
    }
}
