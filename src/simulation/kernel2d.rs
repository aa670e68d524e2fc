//! Per-cell kernel formulation of the 2D elastic step.
//!
//! The step is partitioned into the phases of [`StepPhase`], separated by
//! full barriers: a phase only reads values that earlier phases finished
//! writing. Each array is written by exactly one phase, and within a phase
//! every cell writes only its own entry, so rows can run concurrently
//! without locks. The shared step counter is advanced by the dedicated
//! `AdvanceClock` phase, the single writer of that cell.
//!
//! Cell kernels guard their update ranges explicitly, so this model and
//! the sequential formulation perform identical arithmetic per cell and
//! agree exactly.

use rayon::prelude::*;

use crate::config::ElasticConfig2D;
use crate::error::Result;
use crate::simulation::diagnostics::StepReport;
use crate::simulation::elastic2d::ElasticSim2D;
use crate::simulation::{RunState, StepPhase};

/// Barrier-phased per-cell execution of the 2D elastic step.
pub struct KernelSim2D {
    inner: ElasticSim2D,
}

impl KernelSim2D {
    pub fn new(cfg: ElasticConfig2D) -> Result<Self> {
        Ok(Self {
            inner: ElasticSim2D::new(cfg)?,
        })
    }

    pub fn state(&self) -> RunState {
        self.inner.state()
    }

    pub fn it(&self) -> usize {
        self.inner.it()
    }

    pub fn trace_vx(&self, irec: usize) -> Vec<f32> {
        self.inner.trace_vx(irec)
    }

    pub fn trace_vy(&self, irec: usize) -> Vec<f32> {
        self.inner.trace_vy(irec)
    }

    pub fn energy_total(&self) -> &[f32] {
        self.inner.energy_total()
    }

    pub fn fields(&self) -> &crate::simulation::fields2d::ElasticFields2D {
        self.inner.fields()
    }

    /// Execute one named phase over the whole grid. Returning from this
    /// call is the synchronization barrier between phases.
    pub fn dispatch(&mut self, phase: StepPhase) {
        match phase {
            StepPhase::ComputeStress => self.compute_stress(),
            StepPhase::ComputeVelocity => self.compute_velocity(),
            StepPhase::FinishStep => self.finish_step(),
            StepPhase::AdvanceClock => self.inner.it += 1,
        }
    }

    /// Advance one time step as four barrier-separated phase dispatches.
    pub fn step(&mut self) -> Result<StepReport> {
        self.inner.begin_step()?;
        for phase in StepPhase::ALL {
            self.dispatch(phase);
        }
        // Diagnostics are only sampled between steps.
        self.inner.finish_step_diagnostics()
    }

    pub fn run(&mut self) -> Result<StepReport> {
        let mut last = StepReport::default();
        while self.state() == RunState::Ready || self.state() == RunState::Stepping {
            last = self.step()?;
            if last.it % self.inner.cfg.report_interval == 0 {
                tracing::info!(it = last.it, norm = last.norm_max, "kernel step report");
            }
        }
        Ok(last)
    }

    fn compute_stress(&mut self) {
        let sim = &mut self.inner;
        let nyt = sim.fields.nyt;
        let nxt = sim.fields.nxt;
        let fd = sim.fd;
        let one_dx = 1.0 / sim.cfg.dx;
        let one_dy = 1.0 / sim.cfg.dy;
        let dt = sim.cfg.dt;
        let lam = sim.cfg.medium.lambda();
        let mu = sim.cfg.medium.mu();
        let lp2m = sim.cfg.medium.lambda_plus_2mu();

        let fwd_x = fd.forward_range(nxt);
        let bwd_x = fd.backward_range(nxt);
        let fwd_y = fd.forward_range(nyt);
        let bwd_y = fd.backward_range(nyt);

        let vx = &sim.fields.vx;
        let vy = &sim.fields.vy;
        let half_x = &sim.cpml_x.half;
        let full_x = &sim.cpml_x.full;
        let half_y = &sim.cpml_y.half;
        let full_y = &sim.cpml_y.full;

        (
            sim.fields.sigmaxx.par_chunks_mut(nyt),
            sim.fields.sigmayy.par_chunks_mut(nyt),
            sim.fields.sigmaxy.par_chunks_mut(nyt),
            sim.fields.mem_dvx_dx.par_chunks_mut(nyt),
            sim.fields.mem_dvy_dy.par_chunks_mut(nyt),
            sim.fields.mem_dvy_dx.par_chunks_mut(nyt),
            sim.fields.mem_dvx_dy.par_chunks_mut(nyt),
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(i, (sxx, syy, sxy, mxx, myy, myx, mxy))| {
                for j in 0..nyt {
                    let idx = i * nyt + j;

                    // Normal stresses.
                    if fwd_x.contains(&i) && bwd_y.contains(&j) {
                        let raw_xx = fd.forward(vx, idx, nyt, one_dx);
                        let m = half_x.b[i] * mxx[j] + half_x.a[i] * raw_xx;
                        mxx[j] = m;
                        let cxx = raw_xx / half_x.k[i] + m;

                        let raw_yy = fd.backward(vy, idx, 1, one_dy);
                        let m = full_y.b[j] * myy[j] + full_y.a[j] * raw_yy;
                        myy[j] = m;
                        let cyy = raw_yy / full_y.k[j] + m;

                        sxx[j] += (lp2m * cxx + lam * cyy) * dt;
                        syy[j] += (lam * cxx + lp2m * cyy) * dt;
                    }

                    // Shear stress.
                    if bwd_x.contains(&i) && fwd_y.contains(&j) {
                        let raw_yx = fd.backward(vy, idx, nyt, one_dx);
                        let m = full_x.b[i] * myx[j] + full_x.a[i] * raw_yx;
                        myx[j] = m;
                        let cyx = raw_yx / full_x.k[i] + m;

                        let raw_xy = fd.forward(vx, idx, 1, one_dy);
                        let m = half_y.b[j] * mxy[j] + half_y.a[j] * raw_xy;
                        mxy[j] = m;
                        let cxy = raw_xy / half_y.k[j] + m;

                        sxy[j] += dt * mu * (cxy + cyx);
                    }
                }
            });
    }

    fn compute_velocity(&mut self) {
        let sim = &mut self.inner;
        let nyt = sim.fields.nyt;
        let nxt = sim.fields.nxt;
        let fd = sim.fd;
        let one_dx = 1.0 / sim.cfg.dx;
        let one_dy = 1.0 / sim.cfg.dy;
        let dt_over_rho = sim.cfg.dt / sim.cfg.medium.rho;

        let fwd_x = fd.forward_range(nxt);
        let bwd_x = fd.backward_range(nxt);
        let fwd_y = fd.forward_range(nyt);
        let bwd_y = fd.backward_range(nyt);

        let sigmaxx = &sim.fields.sigmaxx;
        let sigmayy = &sim.fields.sigmayy;
        let sigmaxy = &sim.fields.sigmaxy;
        let half_x = &sim.cpml_x.half;
        let full_x = &sim.cpml_x.full;
        let half_y = &sim.cpml_y.half;
        let full_y = &sim.cpml_y.full;

        (
            sim.fields.vx.par_chunks_mut(nyt),
            sim.fields.vy.par_chunks_mut(nyt),
            sim.fields.mem_dsigmaxx_dx.par_chunks_mut(nyt),
            sim.fields.mem_dsigmaxy_dy.par_chunks_mut(nyt),
            sim.fields.mem_dsigmaxy_dx.par_chunks_mut(nyt),
            sim.fields.mem_dsigmayy_dy.par_chunks_mut(nyt),
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(i, (vx, vy, mxx, mxy, myx, myy))| {
                for j in 0..nyt {
                    let idx = i * nyt + j;

                    if bwd_x.contains(&i) && bwd_y.contains(&j) {
                        let raw_xx = fd.backward(sigmaxx, idx, nyt, one_dx);
                        let m = full_x.b[i] * mxx[j] + full_x.a[i] * raw_xx;
                        mxx[j] = m;
                        let cxx = raw_xx / full_x.k[i] + m;

                        let raw_xy = fd.backward(sigmaxy, idx, 1, one_dy);
                        let m = full_y.b[j] * mxy[j] + full_y.a[j] * raw_xy;
                        mxy[j] = m;
                        let cxy = raw_xy / full_y.k[j] + m;

                        vx[j] += dt_over_rho * (cxx + cxy);
                    }

                    if fwd_x.contains(&i) && fwd_y.contains(&j) {
                        let raw_yx = fd.forward(sigmaxy, idx, nyt, one_dx);
                        let m = half_x.b[i] * myx[j] + half_x.a[i] * raw_yx;
                        myx[j] = m;
                        let cyx = raw_yx / half_x.k[i] + m;

                        let raw_yy = fd.forward(sigmayy, idx, 1, one_dy);
                        let m = half_y.b[j] * myy[j] + half_y.a[j] * raw_yy;
                        myy[j] = m;
                        let cyy = raw_yy / half_y.k[j] + m;

                        vy[j] += dt_over_rho * (cyx + cyy);
                    }
                }
            });
    }

    fn finish_step(&mut self) {
        let sim = &mut self.inner;
        let nyt = sim.fields.nyt;
        let nx = sim.fields.nxt - 2;
        let ny = nyt - 2;
        let dt_over_rho = sim.cfg.dt / sim.cfg.medium.rho;
        let it = sim.it;
        let sources = &sim.sources;

        (
            sim.fields.vx.par_chunks_mut(nyt),
            sim.fields.vy.par_chunks_mut(nyt),
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(i, (vx, vy))| {
                for j in 0..nyt {
                    for src in sources {
                        if src.i == i && src.j == j {
                            vx[j] += src.force_x[it] * dt_over_rho;
                            vy[j] += src.force_y[it] * dt_over_rho;
                        }
                    }
                    if i == 0 || i == nx || j == 0 || j == ny {
                        vx[j] = 0.0;
                        vy[j] = 0.0;
                    }
                }
            });

        // Receiver sampling: one writer per trace slot.
        let nrec = sim.receivers.len();
        let row = it * nrec;
        for (r, &(i, j)) in sim.receivers.iter().enumerate() {
            let idx = i * nyt + j;
            sim.traces_vx[row + r] = sim.fields.vx[idx];
            sim.traces_vy[row + r] = sim.fields.vy[idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PmlConfig, Receiver2D, Source2D};
    use crate::source::Wavelet;

    fn small_config() -> ElasticConfig2D {
        ElasticConfig2D {
            nx: 24,
            ny: 24,
            dx: 10.0,
            dy: 10.0,
            dt: 1.0e-3,
            nstep: 30,
            pml: PmlConfig::for_frequency(5, 7.0),
            sources: vec![Source2D {
                x: 120.0,
                y: 120.0,
                wavelet: Wavelet::gaussian_derivative(7.0).with_gain(1.0e7),
                angle_deg: 30.0,
            }],
            receivers: vec![Receiver2D { x: 80.0, y: 160.0 }],
            ..Default::default()
        }
    }

    #[test]
    fn test_matches_sequential_exactly() {
        let mut seq = ElasticSim2D::new(small_config()).unwrap();
        let mut ker = KernelSim2D::new(small_config()).unwrap();
        for _ in 0..30 {
            seq.step().unwrap();
            ker.step().unwrap();
        }
        for (a, b) in seq.fields().vx.iter().zip(ker.fields().vx.iter()) {
            assert_eq!(a, b, "vx mismatch between formulations");
        }
        for (a, b) in seq.fields().sigmaxy.iter().zip(ker.fields().sigmaxy.iter()) {
            assert_eq!(a, b, "sigmaxy mismatch between formulations");
        }
        assert_eq!(seq.trace_vx(0), ker.trace_vx(0));
    }

    #[test]
    fn test_clock_advanced_only_by_dedicated_phase() {
        let mut ker = KernelSim2D::new(small_config()).unwrap();
        ker.inner.begin_step().unwrap();
        ker.dispatch(StepPhase::ComputeStress);
        ker.dispatch(StepPhase::ComputeVelocity);
        ker.dispatch(StepPhase::FinishStep);
        assert_eq!(ker.it(), 0);
        ker.dispatch(StepPhase::AdvanceClock);
        assert_eq!(ker.it(), 1);
    }

    #[test]
    fn test_zero_source_stays_zero() {
        let cfg = ElasticConfig2D {
            sources: vec![],
            ..small_config()
        };
        let mut ker = KernelSim2D::new(cfg).unwrap();
        for _ in 0..10 {
            ker.step().unwrap();
        }
        assert!(ker.fields().vx.iter().all(|&v| v == 0.0));
        assert!(ker.fields().vy.iter().all(|&v| v == 0.0));
    }
}
