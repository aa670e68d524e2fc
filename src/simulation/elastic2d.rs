//! 2D elastic velocity-stress engine.
//!
//! One step advances the leapfrog pair in four passes: normal stresses,
//! shear stress, vx, vy. Every derivative goes through the C-PML memory
//! recursion before it feeds the constitutive update; the memory variable
//! is always written before it is consumed.

use crate::config::ElasticConfig2D;
use crate::cpml::CpmlAxis;
use crate::error::{Result, SimError};
use crate::fd::FdCoefficients;
use crate::simulation::diagnostics::{check_stability, FieldExtrema, StepReport};
use crate::simulation::fields2d::ElasticFields2D;
use crate::simulation::{corrected_derivative, RunState};
use crate::source::{force_components, nearest_node_2d};

/// A source snapped to its grid node, with the excitation pre-sampled for
/// every time step.
pub(crate) struct MappedSource2D {
    pub i: usize,
    pub j: usize,
    pub force_x: Vec<f32>,
    pub force_y: Vec<f32>,
}

/// Sequential whole-array formulation of the 2D elastic step.
pub struct ElasticSim2D {
    pub(crate) cfg: ElasticConfig2D,
    pub(crate) fd: FdCoefficients,
    pub(crate) cpml_x: CpmlAxis,
    pub(crate) cpml_y: CpmlAxis,
    pub(crate) fields: ElasticFields2D,
    pub(crate) sources: Vec<MappedSource2D>,
    pub(crate) receivers: Vec<(usize, usize)>,
    /// Receiver traces, `[it * nrec + irec]`.
    pub(crate) traces_vx: Vec<f32>,
    pub(crate) traces_vy: Vec<f32>,
    pub(crate) energy_kinetic: Vec<f32>,
    pub(crate) energy_potential: Vec<f32>,
    pub(crate) energy_total: Vec<f32>,
    pub(crate) it: usize,
    pub(crate) state: RunState,
}

impl ElasticSim2D {
    /// Validate the configuration and allocate the run. Fails before any
    /// field array exists, so a bad Courant number mutates nothing.
    pub fn new(cfg: ElasticConfig2D) -> Result<Self> {
        cfg.validate()?;
        let fd = FdCoefficients::for_order(cfg.order)?;

        let cpml_x = CpmlAxis::build(&cfg.pml.axis_spec(
            cfg.nx,
            cfg.dx,
            cfg.medium.cp,
            cfg.dt,
            cfg.pml.x_min,
            cfg.pml.x_max,
        ))?;
        let cpml_y = CpmlAxis::build(&cfg.pml.axis_spec(
            cfg.ny,
            cfg.dy,
            cfg.medium.cp,
            cfg.dt,
            cfg.pml.y_min,
            cfg.pml.y_max,
        ))?;

        let sources = cfg
            .sources
            .iter()
            .map(|s| {
                let (i, j) = nearest_node_2d(s.x, s.y, cfg.nx, cfg.ny, cfg.dx, cfg.dy);
                let (cx, cy) = force_components(s.angle_deg);
                let series = s.wavelet.time_series(cfg.nstep, cfg.dt);
                tracing::debug!(x = s.x, y = s.y, i, j, "mapped source");
                MappedSource2D {
                    i,
                    j,
                    force_x: series.iter().map(|&v| cx * v).collect(),
                    force_y: series.iter().map(|&v| cy * v).collect(),
                }
            })
            .collect();

        let receivers: Vec<(usize, usize)> = cfg
            .receivers
            .iter()
            .map(|r| {
                let (i, j) = nearest_node_2d(r.x, r.y, cfg.nx, cfg.ny, cfg.dx, cfg.dy);
                tracing::debug!(x = r.x, y = r.y, i, j, "mapped receiver");
                (i, j)
            })
            .collect();

        tracing::info!(
            nx = cfg.nx,
            ny = cfg.ny,
            nstep = cfg.nstep,
            courant = cfg.courant_number(),
            "2D elastic run ready"
        );

        let nrec = receivers.len();
        Ok(Self {
            fields: ElasticFields2D::new(cfg.nx, cfg.ny),
            fd,
            cpml_x,
            cpml_y,
            sources,
            receivers,
            traces_vx: vec![0.0; cfg.nstep * nrec],
            traces_vy: vec![0.0; cfg.nstep * nrec],
            energy_kinetic: Vec::with_capacity(cfg.nstep),
            energy_potential: Vec::with_capacity(cfg.nstep),
            energy_total: Vec::with_capacity(cfg.nstep),
            it: 0,
            state: RunState::Ready,
            cfg,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Completed step count.
    pub fn it(&self) -> usize {
        self.it
    }

    pub fn config(&self) -> &ElasticConfig2D {
        &self.cfg
    }

    pub fn fields(&self) -> &ElasticFields2D {
        &self.fields
    }

    /// vx trace of one receiver over all recorded steps.
    pub fn trace_vx(&self, irec: usize) -> Vec<f32> {
        let nrec = self.receivers.len();
        (0..self.cfg.nstep)
            .map(|t| self.traces_vx[t * nrec + irec])
            .collect()
    }

    /// vy trace of one receiver over all recorded steps.
    pub fn trace_vy(&self, irec: usize) -> Vec<f32> {
        let nrec = self.receivers.len();
        (0..self.cfg.nstep)
            .map(|t| self.traces_vy[t * nrec + irec])
            .collect()
    }

    pub fn energy_total(&self) -> &[f32] {
        &self.energy_total
    }

    pub fn energy_kinetic(&self) -> &[f32] {
        &self.energy_kinetic
    }

    pub fn energy_potential(&self) -> &[f32] {
        &self.energy_potential
    }

    /// Advance one time step.
    pub fn step(&mut self) -> Result<StepReport> {
        self.begin_step()?;
        self.update_stress();
        self.update_velocity();
        self.inject_sources();
        self.apply_dirichlet();
        self.record_receivers();
        self.it += 1;
        self.finish_step_diagnostics()
    }

    /// Run to completion, logging a report every `report_interval` steps.
    pub fn run(&mut self) -> Result<StepReport> {
        let mut last = StepReport::default();
        while self.state == RunState::Ready || self.state == RunState::Stepping {
            last = self.step()?;
            if last.it % self.cfg.report_interval == 0 || last.it == 5 {
                tracing::info!(
                    it = last.it,
                    nstep = self.cfg.nstep,
                    norm = last.norm_max,
                    energy = last.total_energy(),
                    "step report"
                );
            }
        }
        Ok(last)
    }

    pub(crate) fn begin_step(&mut self) -> Result<()> {
        match self.state {
            RunState::Ready => {
                self.state = RunState::Stepping;
                Ok(())
            }
            RunState::Stepping => Ok(()),
            RunState::Completed | RunState::Halted => Err(SimError::Configuration(
                "cannot step a finished simulation".into(),
            )),
        }
    }

    /// Diagnostics sampled between steps: extrema, interior energy and the
    /// divergence check. Shared by the sequential and kernel formulations.
    pub(crate) fn finish_step_diagnostics(&mut self) -> Result<StepReport> {
        let (kinetic, potential) = self.interior_energy();
        self.energy_kinetic.push(kinetic);
        self.energy_potential.push(potential);
        self.energy_total.push(kinetic + potential);

        let report = StepReport {
            it: self.it,
            vx: FieldExtrema::of(&self.fields.vx),
            vy: FieldExtrema::of(&self.fields.vy),
            vz: None,
            norm_max: self.fields.max_velocity_norm(),
            kinetic,
            potential,
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

    fn update_stress(&mut self) {
        let nyt = self.fields.nyt;
        let nxt = self.fields.nxt;
        let fd = self.fd;
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let dt = self.cfg.dt;
        let lam = self.cfg.medium.lambda();
        let mu = self.cfg.medium.mu();
        let lp2m = self.cfg.medium.lambda_plus_2mu();

        // Normal stresses: d(vx)/dx sits on the half grid, d(vy)/dy on the
        // full grid.
        for i in fd.forward_range(nxt) {
            for j in fd.backward_range(nyt) {
                let idx = i * nyt + j;
                let cxx = corrected_derivative(
                    &fd,
                    &self.fields.vx,
                    idx,
                    nyt,
                    one_dx,
                    &mut self.fields.mem_dvx_dx,
                    &self.cpml_x.half,
                    i,
                    true,
                );
                let cyy = corrected_derivative(
                    &fd,
                    &self.fields.vy,
                    idx,
                    1,
                    one_dy,
                    &mut self.fields.mem_dvy_dy,
                    &self.cpml_y.full,
                    j,
                    false,
                );
                self.fields.sigmaxx[idx] += (lp2m * cxx + lam * cyy) * dt;
                self.fields.sigmayy[idx] += (lam * cxx + lp2m * cyy) * dt;
            }
        }

        // Shear stress: d(vy)/dx on the full grid, d(vx)/dy on the half grid.
        for i in fd.backward_range(nxt) {
            for j in fd.forward_range(nyt) {
                let idx = i * nyt + j;
                let cyx = corrected_derivative(
                    &fd,
                    &self.fields.vy,
                    idx,
                    nyt,
                    one_dx,
                    &mut self.fields.mem_dvy_dx,
                    &self.cpml_x.full,
                    i,
                    false,
                );
                let cxy = corrected_derivative(
                    &fd,
                    &self.fields.vx,
                    idx,
                    1,
                    one_dy,
                    &mut self.fields.mem_dvx_dy,
                    &self.cpml_y.half,
                    j,
                    true,
                );
                self.fields.sigmaxy[idx] += dt * mu * (cxy + cyx);
            }
        }
    }

    fn update_velocity(&mut self) {
        let nyt = self.fields.nyt;
        let nxt = self.fields.nxt;
        let fd = self.fd;
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let dt_over_rho = self.cfg.dt / self.cfg.medium.rho;

        // vx: both stress derivatives on the full grid.
        for i in fd.backward_range(nxt) {
            for j in fd.backward_range(nyt) {
                let idx = i * nyt + j;
                let cxx = corrected_derivative(
                    &fd,
                    &self.fields.sigmaxx,
                    idx,
                    nyt,
                    one_dx,
                    &mut self.fields.mem_dsigmaxx_dx,
                    &self.cpml_x.full,
                    i,
                    false,
                );
                let cxy = corrected_derivative(
                    &fd,
                    &self.fields.sigmaxy,
                    idx,
                    1,
                    one_dy,
                    &mut self.fields.mem_dsigmaxy_dy,
                    &self.cpml_y.full,
                    j,
                    false,
                );
                self.fields.vx[idx] += dt_over_rho * (cxx + cxy);
            }
        }

        // vy: both stress derivatives on the half grid.
        for i in fd.forward_range(nxt) {
            for j in fd.forward_range(nyt) {
                let idx = i * nyt + j;
                let cyx = corrected_derivative(
                    &fd,
                    &self.fields.sigmaxy,
                    idx,
                    nyt,
                    one_dx,
                    &mut self.fields.mem_dsigmaxy_dx,
                    &self.cpml_x.half,
                    i,
                    true,
                );
                let cyy = corrected_derivative(
                    &fd,
                    &self.fields.sigmayy,
                    idx,
                    1,
                    one_dy,
                    &mut self.fields.mem_dsigmayy_dy,
                    &self.cpml_y.half,
                    j,
                    true,
                );
                self.fields.vy[idx] += dt_over_rho * (cyx + cyy);
            }
        }
    }

    fn inject_sources(&mut self) {
        let dt_over_rho = self.cfg.dt / self.cfg.medium.rho;
        let nyt = self.fields.nyt;
        for src in &self.sources {
            let idx = src.i * nyt + src.j;
            self.fields.vx[idx] += src.force_x[self.it] * dt_over_rho;
            self.fields.vy[idx] += src.force_y[self.it] * dt_over_rho;
        }
    }

    /// Dirichlet condition on the outermost grid layers of every face;
    /// required for C-PML stability at long run times.
    fn apply_dirichlet(&mut self) {
        let nyt = self.fields.nyt;
        let nx = self.fields.nxt - 2;
        let ny = nyt - 2;
        for j in 0..nyt {
            self.fields.vx[j] = 0.0;
            self.fields.vy[j] = 0.0;
            self.fields.vx[nx * nyt + j] = 0.0;
            self.fields.vy[nx * nyt + j] = 0.0;
        }
        for i in 0..self.fields.nxt {
            self.fields.vx[i * nyt] = 0.0;
            self.fields.vy[i * nyt] = 0.0;
            self.fields.vx[i * nyt + ny] = 0.0;
            self.fields.vy[i * nyt + ny] = 0.0;
        }
    }

    fn record_receivers(&mut self) {
        let nyt = self.fields.nyt;
        let nrec = self.receivers.len();
        let row = self.it * nrec;
        for (r, &(i, j)) in self.receivers.iter().enumerate() {
            let idx = i * nyt + j;
            self.traces_vx[row + r] = self.fields.vx[idx];
            self.traces_vy[row + r] = self.fields.vy[idx];
        }
    }

    /// Kinetic and potential energy over the non-PML interior. Strains are
    /// recovered from stresses through the inverted isotropic relation.
    fn interior_energy(&self) -> (f32, f32) {
        let npml = self.cfg.pml.thickness;
        let nyt = self.fields.nyt;
        let imin = npml;
        let imax = self.cfg.nx - npml + 1;
        let jmin = npml;
        let jmax = self.cfg.ny - npml + 1;

        let rho = self.cfg.medium.rho;
        let lam = self.cfg.medium.lambda();
        let mu = self.cfg.medium.mu();
        let lp2m = self.cfg.medium.lambda_plus_2mu();
        let denom = 4.0 * mu * (lam + mu);

        let mut kinetic = 0.0f64;
        let mut potential = 0.0f64;
        for i in imin..imax {
            for j in jmin..jmax {
                let idx = i * nyt + j;
                let vx = self.fields.vx[idx] as f64;
                let vy = self.fields.vy[idx] as f64;
                kinetic += vx * vx + vy * vy;

                if denom > 0.0 {
                    let sxx = self.fields.sigmaxx[idx];
                    let syy = self.fields.sigmayy[idx];
                    let sxy = self.fields.sigmaxy[idx];
                    let exx = (lp2m * sxx - lam * syy) / denom;
                    let eyy = (lp2m * syy - lam * sxx) / denom;
                    let exy = sxy / (2.0 * mu);
                    potential += (exx * sxx + eyy * syy + 2.0 * exy * sxy) as f64;
                }
            }
        }
        (
            (0.5 * rho as f64 * kinetic) as f32,
            (0.5 * potential) as f32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Receiver2D, Source2D};
    use crate::source::Wavelet;

    fn small_config() -> ElasticConfig2D {
        ElasticConfig2D {
            nx: 32,
            ny: 32,
            dx: 10.0,
            dy: 10.0,
            dt: 1.0e-3,
            nstep: 40,
            pml: crate::config::PmlConfig::for_frequency(6, 7.0),
            sources: vec![Source2D {
                x: 160.0,
                y: 160.0,
                wavelet: Wavelet::gaussian_derivative(7.0).with_gain(1.0e7),
                angle_deg: 0.0,
            }],
            receivers: vec![Receiver2D { x: 120.0, y: 200.0 }],
            ..Default::default()
        }
    }

    #[test]
    fn test_courant_violation_rejected_before_allocation() {
        let cfg = ElasticConfig2D {
            dt: 10.0,
            ..small_config()
        };
        match ElasticSim2D::new(cfg) {
            Err(SimError::Configuration(msg)) => assert!(msg.contains("Courant")),
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_zero_source_stays_exactly_zero() {
        let cfg = ElasticConfig2D {
            sources: vec![],
            ..small_config()
        };
        let mut sim = ElasticSim2D::new(cfg).unwrap();
        for _ in 0..20 {
            sim.step().unwrap();
        }
        assert!(sim.fields.vx.iter().all(|&v| v == 0.0));
        assert!(sim.fields.vy.iter().all(|&v| v == 0.0));
        assert!(sim.fields.sigmaxx.iter().all(|&v| v == 0.0));
        assert!(sim.fields.mem_dvx_dx.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_wave_reaches_receiver() {
        let mut sim = ElasticSim2D::new(small_config()).unwrap();
        let report = sim.run().unwrap();
        assert_eq!(sim.state(), RunState::Completed);
        assert_eq!(report.it, 40);
        assert!(report.norm_max > 0.0, "source produced no motion");
    }

    #[test]
    fn test_dirichlet_edges_zero_after_steps() {
        let mut sim = ElasticSim2D::new(small_config()).unwrap();
        for _ in 0..25 {
            sim.step().unwrap();
        }
        let nyt = sim.fields.nyt;
        let nx = sim.fields.nxt - 2;
        let ny = nyt - 2;
        for j in 0..nyt {
            assert_eq!(sim.fields.vx[j], 0.0);
            assert_eq!(sim.fields.vy[nx * nyt + j], 0.0);
        }
        for i in 0..sim.fields.nxt {
            assert_eq!(sim.fields.vy[i * nyt], 0.0);
            assert_eq!(sim.fields.vx[i * nyt + ny], 0.0);
        }
    }

    #[test]
    fn test_step_after_completion_fails() {
        let cfg = ElasticConfig2D {
            nstep: 3,
            ..small_config()
        };
        let mut sim = ElasticSim2D::new(cfg).unwrap();
        sim.run().unwrap();
        assert!(sim.step().is_err());
    }

    #[test]
    fn test_trace_rows_match_step_count() {
        let mut sim = ElasticSim2D::new(small_config()).unwrap();
        sim.run().unwrap();
        assert_eq!(sim.trace_vx(0).len(), 40);
        assert_eq!(sim.trace_vy(0).len(), 40);
        assert_eq!(sim.energy_total().len(), 40);
    }
}
