//! 3D elastic velocity-stress engine.
//!
//! Same scheme as the 2D engine extended to the full stress tensor: one
//! pass for the three normal stresses, one per shear component, then one
//! per velocity component. The force source is applied along z.

use rayon::prelude::*;

use crate::config::ElasticConfig3D;
use crate::cpml::CpmlAxis;
use crate::error::{Result, SimError};
use crate::fd::FdCoefficients;
use crate::simulation::diagnostics::{check_stability, FieldExtrema, StepReport};
use crate::simulation::fields3d::ElasticFields3D;
use crate::simulation::{corrected_derivative, RunState};
use crate::source::nearest_node_3d;

pub(crate) struct MappedSource3D {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    pub force: Vec<f32>,
}

/// 3D elastic run with sequential and row-parallel step paths.
pub struct ElasticSim3D {
    cfg: ElasticConfig3D,
    fd: FdCoefficients,
    cpml_x: CpmlAxis,
    cpml_y: CpmlAxis,
    cpml_z: CpmlAxis,
    fields: ElasticFields3D,
    sources: Vec<MappedSource3D>,
    receivers: Vec<(usize, usize, usize)>,
    traces_vx: Vec<f32>,
    traces_vy: Vec<f32>,
    traces_vz: Vec<f32>,
    energy_total: Vec<f32>,
    it: usize,
    state: RunState,
    /// Execute steps with the row-parallel kernel path.
    pub parallel: bool,
}

impl ElasticSim3D {
    pub fn new(cfg: ElasticConfig3D) -> Result<Self> {
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
        let cpml_z = CpmlAxis::build(&cfg.pml.axis_spec(
            cfg.nz,
            cfg.dz,
            cfg.medium.cp,
            cfg.dt,
            cfg.pml.z_min,
            cfg.pml.z_max,
        ))?;

        let sources = cfg
            .sources
            .iter()
            .map(|s| {
                let (i, j, k) = nearest_node_3d(
                    s.x, s.y, s.z, cfg.nx, cfg.ny, cfg.nz, cfg.dx, cfg.dy, cfg.dz,
                );
                tracing::debug!(i, j, k, "mapped source");
                MappedSource3D {
                    i,
                    j,
                    k,
                    force: s.wavelet.time_series(cfg.nstep, cfg.dt),
                }
            })
            .collect();

        let receivers: Vec<_> = cfg
            .receivers
            .iter()
            .map(|r| {
                let (i, j, k) = nearest_node_3d(
                    r.x, r.y, r.z, cfg.nx, cfg.ny, cfg.nz, cfg.dx, cfg.dy, cfg.dz,
                );
                tracing::debug!(i, j, k, "mapped receiver");
                (i, j, k)
            })
            .collect();

        tracing::info!(
            nx = cfg.nx,
            ny = cfg.ny,
            nz = cfg.nz,
            nstep = cfg.nstep,
            courant = cfg.courant_number(),
            "3D elastic run ready"
        );

        let nrec = receivers.len();
        Ok(Self {
            fields: ElasticFields3D::new(cfg.nx, cfg.ny, cfg.nz),
            fd,
            cpml_x,
            cpml_y,
            cpml_z,
            sources,
            receivers,
            traces_vx: vec![0.0; cfg.nstep * nrec],
            traces_vy: vec![0.0; cfg.nstep * nrec],
            traces_vz: vec![0.0; cfg.nstep * nrec],
            energy_total: Vec::with_capacity(cfg.nstep),
            it: 0,
            state: RunState::Ready,
            parallel: false,
            cfg,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn it(&self) -> usize {
        self.it
    }

    pub fn fields(&self) -> &ElasticFields3D {
        &self.fields
    }

    pub fn energy_total(&self) -> &[f32] {
        &self.energy_total
    }

    pub fn trace_vz(&self, irec: usize) -> Vec<f32> {
        let nrec = self.receivers.len();
        (0..self.cfg.nstep)
            .map(|t| self.traces_vz[t * nrec + irec])
            .collect()
    }

    pub fn trace_vx(&self, irec: usize) -> Vec<f32> {
        let nrec = self.receivers.len();
        (0..self.cfg.nstep)
            .map(|t| self.traces_vx[t * nrec + irec])
            .collect()
    }

    pub fn trace_vy(&self, irec: usize) -> Vec<f32> {
        let nrec = self.receivers.len();
        (0..self.cfg.nstep)
            .map(|t| self.traces_vy[t * nrec + irec])
            .collect()
    }

    pub fn step(&mut self) -> Result<StepReport> {
        match self.state {
            RunState::Ready => self.state = RunState::Stepping,
            RunState::Stepping => {}
            _ => {
                return Err(SimError::Configuration(
                    "cannot step a finished simulation".into(),
                ))
            }
        }

        if self.parallel {
            self.update_normal_stress_parallel();
            self.update_shear_stress_parallel();
            self.update_velocity_parallel();
        } else {
            self.update_stress();
            self.update_velocity();
        }
        self.inject_sources();
        self.apply_dirichlet();
        self.record_receivers();
        self.it += 1;

        let (kinetic, potential) = self.interior_energy();
        self.energy_total.push(kinetic + potential);
        let report = StepReport {
            it: self.it,
            vx: FieldExtrema::of(&self.fields.vx),
            vy: FieldExtrema::of(&self.fields.vy),
            vz: Some(FieldExtrema::of(&self.fields.vz)),
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

    fn strides(&self) -> (usize, usize) {
        (self.fields.nyt * self.fields.nzt, self.fields.nzt)
    }

    fn update_stress(&mut self) {
        let (sx, sy) = self.strides();
        let (nxt, nyt, nzt) = (self.fields.nxt, self.fields.nyt, self.fields.nzt);
        let fd = self.fd;
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let one_dz = 1.0 / self.cfg.dz;
        let dt = self.cfg.dt;
        let lam = self.cfg.medium.lambda();
        let mu = self.cfg.medium.mu();
        let lp2m = self.cfg.medium.lambda_plus_2mu();

        // Normal stresses.
        for i in fd.forward_range(nxt) {
            for j in fd.backward_range(nyt) {
                for k in fd.backward_range(nzt) {
                    let idx = (i * nyt + j) * nzt + k;
                    let cxx = corrected_derivative(
                        &fd,
                        &self.fields.vx,
                        idx,
                        sx,
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
                        sy,
                        one_dy,
                        &mut self.fields.mem_dvy_dy,
                        &self.cpml_y.full,
                        j,
                        false,
                    );
                    let czz = corrected_derivative(
                        &fd,
                        &self.fields.vz,
                        idx,
                        1,
                        one_dz,
                        &mut self.fields.mem_dvz_dz,
                        &self.cpml_z.full,
                        k,
                        false,
                    );
                    self.fields.sigmaxx[idx] += (lp2m * cxx + lam * (cyy + czz)) * dt;
                    self.fields.sigmayy[idx] += (lam * (cxx + czz) + lp2m * cyy) * dt;
                    self.fields.sigmazz[idx] += (lam * (cxx + cyy) + lp2m * czz) * dt;
                }
            }
        }

        // sigma_xy.
        for i in fd.backward_range(nxt) {
            for j in fd.forward_range(nyt) {
                for k in 1..nzt - 1 {
                    let idx = (i * nyt + j) * nzt + k;
                    let cyx = corrected_derivative(
                        &fd,
                        &self.fields.vy,
                        idx,
                        sx,
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
                        sy,
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

        // sigma_xz.
        for i in fd.backward_range(nxt) {
            for j in 1..nyt - 1 {
                for k in fd.forward_range(nzt) {
                    let idx = (i * nyt + j) * nzt + k;
                    let czx = corrected_derivative(
                        &fd,
                        &self.fields.vz,
                        idx,
                        sx,
                        one_dx,
                        &mut self.fields.mem_dvz_dx,
                        &self.cpml_x.full,
                        i,
                        false,
                    );
                    let cxz = corrected_derivative(
                        &fd,
                        &self.fields.vx,
                        idx,
                        1,
                        one_dz,
                        &mut self.fields.mem_dvx_dz,
                        &self.cpml_z.half,
                        k,
                        true,
                    );
                    self.fields.sigmaxz[idx] += dt * mu * (cxz + czx);
                }
            }
        }

        // sigma_yz.
        for i in 1..nxt - 1 {
            for j in fd.forward_range(nyt) {
                for k in fd.forward_range(nzt) {
                    let idx = (i * nyt + j) * nzt + k;
                    let czy = corrected_derivative(
                        &fd,
                        &self.fields.vz,
                        idx,
                        sy,
                        one_dy,
                        &mut self.fields.mem_dvz_dy,
                        &self.cpml_y.half,
                        j,
                        true,
                    );
                    let cyz = corrected_derivative(
                        &fd,
                        &self.fields.vy,
                        idx,
                        1,
                        one_dz,
                        &mut self.fields.mem_dvy_dz,
                        &self.cpml_z.half,
                        k,
                        true,
                    );
                    self.fields.sigmayz[idx] += dt * mu * (cyz + czy);
                }
            }
        }
    }

    fn update_velocity(&mut self) {
        let (sx, sy) = self.strides();
        let (nxt, nyt, nzt) = (self.fields.nxt, self.fields.nyt, self.fields.nzt);
        let fd = self.fd;
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let one_dz = 1.0 / self.cfg.dz;
        let dt_over_rho = self.cfg.dt / self.cfg.medium.rho;

        // vx.
        for i in fd.backward_range(nxt) {
            for j in fd.backward_range(nyt) {
                for k in fd.backward_range(nzt) {
                    let idx = (i * nyt + j) * nzt + k;
                    let cxx = corrected_derivative(
                        &fd,
                        &self.fields.sigmaxx,
                        idx,
                        sx,
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
                        sy,
                        one_dy,
                        &mut self.fields.mem_dsigmaxy_dy,
                        &self.cpml_y.full,
                        j,
                        false,
                    );
                    let cxz = corrected_derivative(
                        &fd,
                        &self.fields.sigmaxz,
                        idx,
                        1,
                        one_dz,
                        &mut self.fields.mem_dsigmaxz_dz,
                        &self.cpml_z.full,
                        k,
                        false,
                    );
                    self.fields.vx[idx] += dt_over_rho * (cxx + cxy + cxz);
                }
            }
        }

        // vy.
        for i in fd.forward_range(nxt) {
            for j in fd.forward_range(nyt) {
                for k in fd.backward_range(nzt) {
                    let idx = (i * nyt + j) * nzt + k;
                    let cyx = corrected_derivative(
                        &fd,
                        &self.fields.sigmaxy,
                        idx,
                        sx,
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
                        sy,
                        one_dy,
                        &mut self.fields.mem_dsigmayy_dy,
                        &self.cpml_y.half,
                        j,
                        true,
                    );
                    let cyz = corrected_derivative(
                        &fd,
                        &self.fields.sigmayz,
                        idx,
                        1,
                        one_dz,
                        &mut self.fields.mem_dsigmayz_dz,
                        &self.cpml_z.full,
                        k,
                        false,
                    );
                    self.fields.vy[idx] += dt_over_rho * (cyx + cyy + cyz);
                }
            }
        }

        // vz.
        for i in fd.forward_range(nxt) {
            for j in fd.backward_range(nyt) {
                for k in fd.forward_range(nzt) {
                    let idx = (i * nyt + j) * nzt + k;
                    let czx = corrected_derivative(
                        &fd,
                        &self.fields.sigmaxz,
                        idx,
                        sx,
                        one_dx,
                        &mut self.fields.mem_dsigmaxz_dx,
                        &self.cpml_x.half,
                        i,
                        true,
                    );
                    let czy = corrected_derivative(
                        &fd,
                        &self.fields.sigmayz,
                        idx,
                        sy,
                        one_dy,
                        &mut self.fields.mem_dsigmayz_dy,
                        &self.cpml_y.full,
                        j,
                        false,
                    );
                    let czz = corrected_derivative(
                        &fd,
                        &self.fields.sigmazz,
                        idx,
                        1,
                        one_dz,
                        &mut self.fields.mem_dsigmazz_dz,
                        &self.cpml_z.half,
                        k,
                        true,
                    );
                    self.fields.vz[idx] += dt_over_rho * (czx + czy + czz);
                }
            }
        }
    }

    /// Row-parallel variant of the normal-stress pass. Same guarded
    /// per-cell arithmetic as the sequential path.
    fn update_normal_stress_parallel(&mut self) {
        let (sx, sy) = self.strides();
        let (nxt, nyt, nzt) = (self.fields.nxt, self.fields.nyt, self.fields.nzt);
        let slab = nyt * nzt;
        let fd = self.fd;
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let one_dz = 1.0 / self.cfg.dz;
        let dt = self.cfg.dt;
        let lam = self.cfg.medium.lambda();
        let lp2m = self.cfg.medium.lambda_plus_2mu();

        let fwd_x = fd.forward_range(nxt);
        let bwd_y = fd.backward_range(nyt);
        let bwd_z = fd.backward_range(nzt);

        let vx = &self.fields.vx;
        let vy = &self.fields.vy;
        let vz = &self.fields.vz;
        let half_x = &self.cpml_x.half;
        let full_y = &self.cpml_y.full;
        let full_z = &self.cpml_z.full;

        (
            self.fields.sigmaxx.par_chunks_mut(slab),
            self.fields.sigmayy.par_chunks_mut(slab),
            self.fields.sigmazz.par_chunks_mut(slab),
            self.fields.mem_dvx_dx.par_chunks_mut(slab),
            self.fields.mem_dvy_dy.par_chunks_mut(slab),
            self.fields.mem_dvz_dz.par_chunks_mut(slab),
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(i, (sxx, syy, szz, mxx, myy, mzz))| {
                if !fwd_x.contains(&i) {
                    return;
                }
                for j in bwd_y.clone() {
                    for k in bwd_z.clone() {
                        let local = j * nzt + k;
                        let idx = i * slab + local;

                        let raw = fd.forward(vx, idx, sx, one_dx);
                        let m = half_x.b[i] * mxx[local] + half_x.a[i] * raw;
                        mxx[local] = m;
                        let cxx = raw / half_x.k[i] + m;

                        let raw = fd.backward(vy, idx, sy, one_dy);
                        let m = full_y.b[j] * myy[local] + full_y.a[j] * raw;
                        myy[local] = m;
                        let cyy = raw / full_y.k[j] + m;

                        let raw = fd.backward(vz, idx, 1, one_dz);
                        let m = full_z.b[k] * mzz[local] + full_z.a[k] * raw;
                        mzz[local] = m;
                        let czz = raw / full_z.k[k] + m;

                        sxx[local] += (lp2m * cxx + lam * (cyy + czz)) * dt;
                        syy[local] += (lam * (cxx + czz) + lp2m * cyy) * dt;
                        szz[local] += (lam * (cxx + cyy) + lp2m * czz) * dt;
                    }
                }
            });
    }

    /// Row-parallel variant of the three shear-stress passes.
    fn update_shear_stress_parallel(&mut self) {
        let (sx, sy) = self.strides();
        let (nxt, nyt, nzt) = (self.fields.nxt, self.fields.nyt, self.fields.nzt);
        let slab = nyt * nzt;
        let fd = self.fd;
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let one_dz = 1.0 / self.cfg.dz;
        let dt = self.cfg.dt;
        let mu = self.cfg.medium.mu();

        let bwd_x = fd.backward_range(nxt);
        let fwd_y = fd.forward_range(nyt);
        let fwd_z = fd.forward_range(nzt);

        let vx = &self.fields.vx;
        let vy = &self.fields.vy;
        let vz = &self.fields.vz;
        let full_x = &self.cpml_x.full;
        let half_y = &self.cpml_y.half;
        let half_z = &self.cpml_z.half;

        (
            self.fields.sigmaxy.par_chunks_mut(slab),
            self.fields.sigmaxz.par_chunks_mut(slab),
            self.fields.sigmayz.par_chunks_mut(slab),
            self.fields.mem_dvy_dx.par_chunks_mut(slab),
            self.fields.mem_dvx_dy.par_chunks_mut(slab),
            self.fields.mem_dvz_dx.par_chunks_mut(slab),
            self.fields.mem_dvx_dz.par_chunks_mut(slab),
            self.fields.mem_dvz_dy.par_chunks_mut(slab),
            self.fields.mem_dvy_dz.par_chunks_mut(slab),
        )
            .into_par_iter()
            .enumerate()
            .for_each(|(i, (sxy, sxz, syz, myx, mxy, mzx, mxz, mzy, myz))| {
                // sigma_xy.
                if bwd_x.contains(&i) {
                    for j in fwd_y.clone() {
                        for k in 1..nzt - 1 {
                            let local = j * nzt + k;
                            let idx = i * slab + local;

                            let raw = fd.backward(vy, idx, sx, one_dx);
                            let m = full_x.b[i] * myx[local] + full_x.a[i] * raw;
                            myx[local] = m;
                            let cyx = raw / full_x.k[i] + m;

                            let raw = fd.forward(vx, idx, sy, one_dy);
                            let m = half_y.b[j] * mxy[local] + half_y.a[j] * raw;
                            mxy[local] = m;
                            let cxy = raw / half_y.k[j] + m;

                            sxy[local] += dt * mu * (cxy + cyx);
                        }
                    }
                }

                // sigma_xz.
                if bwd_x.contains(&i) {
                    for j in 1..nyt - 1 {
                        for k in fwd_z.clone() {
                            let local = j * nzt + k;
                            let idx = i * slab + local;

                            let raw = fd.backward(vz, idx, sx, one_dx);
                            let m = full_x.b[i] * mzx[local] + full_x.a[i] * raw;
                            mzx[local] = m;
                            let czx = raw / full_x.k[i] + m;

                            let raw = fd.forward(vx, idx, 1, one_dz);
                            let m = half_z.b[k] * mxz[local] + half_z.a[k] * raw;
                            mxz[local] = m;
                            let cxz = raw / half_z.k[k] + m;

                            sxz[local] += dt * mu * (cxz + czx);
                        }
                    }
                }

                // sigma_yz.
                if i >= 1 && i < nxt - 1 {
                    for j in fwd_y.clone() {
                        for k in fwd_z.clone() {
                            let local = j * nzt + k;
                            let idx = i * slab + local;

                            let raw = fd.forward(vz, idx, sy, one_dy);
                            let m = half_y.b[j] * mzy[local] + half_y.a[j] * raw;
                            mzy[local] = m;
                            let czy = raw / half_y.k[j] + m;

                            let raw = fd.forward(vy, idx, 1, one_dz);
                            let m = half_z.b[k] * myz[local] + half_z.a[k] * raw;
                            myz[local] = m;
                            let cyz = raw / half_z.k[k] + m;

                            syz[local] += dt * mu * (cyz + czy);
                        }
                    }
                }
            });
    }

    /// Row-parallel variant of the three velocity passes.
    fn update_velocity_parallel(&mut self) {
        let (sx, sy) = self.strides();
        let (nxt, nyt, nzt) = (self.fields.nxt, self.fields.nyt, self.fields.nzt);
        let slab = nyt * nzt;
        let fd = self.fd;
        let one_dx = 1.0 / self.cfg.dx;
        let one_dy = 1.0 / self.cfg.dy;
        let one_dz = 1.0 / self.cfg.dz;
        let dt_over_rho = self.cfg.dt / self.cfg.medium.rho;

        let fwd_x = fd.forward_range(nxt);
        let bwd_x = fd.backward_range(nxt);
        let fwd_y = fd.forward_range(nyt);
        let bwd_y = fd.backward_range(nyt);
        let fwd_z = fd.forward_range(nzt);
        let bwd_z = fd.backward_range(nzt);

        let sigmaxx = &self.fields.sigmaxx;
        let sigmayy = &self.fields.sigmayy;
        let sigmazz = &self.fields.sigmazz;
        let sigmaxy = &self.fields.sigmaxy;
        let sigmaxz = &self.fields.sigmaxz;
        let sigmayz = &self.fields.sigmayz;
        let full_x = &self.cpml_x.full;
        let half_x = &self.cpml_x.half;
        let full_y = &self.cpml_y.full;
        let half_y = &self.cpml_y.half;
        let full_z = &self.cpml_z.full;
        let half_z = &self.cpml_z.half;

        (
            self.fields.vx.par_chunks_mut(slab),
            self.fields.vy.par_chunks_mut(slab),
            self.fields.vz.par_chunks_mut(slab),
            self.fields.mem_dsigmaxx_dx.par_chunks_mut(slab),
            self.fields.mem_dsigmaxy_dy.par_chunks_mut(slab),
            self.fields.mem_dsigmaxz_dz.par_chunks_mut(slab),
            self.fields.mem_dsigmaxy_dx.par_chunks_mut(slab),
            self.fields.mem_dsigmayy_dy.par_chunks_mut(slab),
            self.fields.mem_dsigmayz_dz.par_chunks_mut(slab),
            self.fields.mem_dsigmaxz_dx.par_chunks_mut(slab),
            self.fields.mem_dsigmayz_dy.par_chunks_mut(slab),
            self.fields.mem_dsigmazz_dz.par_chunks_mut(slab),
        )
            .into_par_iter()
            .enumerate()
            .for_each(
                |(i, (vx, vy, vz, mxxx, mxyy, mxzz, myxx, myyy, myzz, mzxx, mzyy, mzzz))| {
                    // vx.
                    if bwd_x.contains(&i) {
                        for j in bwd_y.clone() {
                            for k in bwd_z.clone() {
                                let local = j * nzt + k;
                                let idx = i * slab + local;

                                let raw = fd.backward(sigmaxx, idx, sx, one_dx);
                                let m = full_x.b[i] * mxxx[local] + full_x.a[i] * raw;
                                mxxx[local] = m;
                                let cxx = raw / full_x.k[i] + m;

                                let raw = fd.backward(sigmaxy, idx, sy, one_dy);
                                let m = full_y.b[j] * mxyy[local] + full_y.a[j] * raw;
                                mxyy[local] = m;
                                let cxy = raw / full_y.k[j] + m;

                                let raw = fd.backward(sigmaxz, idx, 1, one_dz);
                                let m = full_z.b[k] * mxzz[local] + full_z.a[k] * raw;
                                mxzz[local] = m;
                                let cxz = raw / full_z.k[k] + m;

                                vx[local] += dt_over_rho * (cxx + cxy + cxz);
                            }
                        }
                    }

                    // vy.
                    if fwd_x.contains(&i) {
                        for j in fwd_y.clone() {
                            for k in bwd_z.clone() {
                                let local = j * nzt + k;
                                let idx = i * slab + local;

                                let raw = fd.forward(sigmaxy, idx, sx, one_dx);
                                let m = half_x.b[i] * myxx[local] + half_x.a[i] * raw;
                                myxx[local] = m;
                                let cyx = raw / half_x.k[i] + m;

                                let raw = fd.forward(sigmayy, idx, sy, one_dy);
                                let m = half_y.b[j] * myyy[local] + half_y.a[j] * raw;
                                myyy[local] = m;
                                let cyy = raw / half_y.k[j] + m;

                                let raw = fd.backward(sigmayz, idx, 1, one_dz);
                                let m = full_z.b[k] * myzz[local] + full_z.a[k] * raw;
                                myzz[local] = m;
                                let cyz = raw / full_z.k[k] + m;

                                vy[local] += dt_over_rho * (cyx + cyy + cyz);
                            }
                        }
                    }

                    // vz.
                    if fwd_x.contains(&i) {
                        for j in bwd_y.clone() {
                            for k in fwd_z.clone() {
                                let local = j * nzt + k;
                                let idx = i * slab + local;

                                let raw = fd.forward(sigmaxz, idx, sx, one_dx);
                                let m = half_x.b[i] * mzxx[local] + half_x.a[i] * raw;
                                mzxx[local] = m;
                                let czx = raw / half_x.k[i] + m;

                                let raw = fd.backward(sigmayz, idx, sy, one_dy);
                                let m = full_y.b[j] * mzyy[local] + full_y.a[j] * raw;
                                mzyy[local] = m;
                                let czy = raw / full_y.k[j] + m;

                                let raw = fd.forward(sigmazz, idx, 1, one_dz);
                                let m = half_z.b[k] * mzzz[local] + half_z.a[k] * raw;
                                mzzz[local] = m;
                                let czz = raw / half_z.k[k] + m;

                                vz[local] += dt_over_rho * (czx + czy + czz);
                            }
                        }
                    }
                },
            );
    }

    fn inject_sources(&mut self) {
        let dt_over_rho = self.cfg.dt / self.cfg.medium.rho;
        let (nyt, nzt) = (self.fields.nyt, self.fields.nzt);
        for src in &self.sources {
            let idx = (src.i * nyt + src.j) * nzt + src.k;
            self.fields.vz[idx] += src.force[self.it] * dt_over_rho;
        }
    }

    /// Zero the two outermost layers of every face.
    fn apply_dirichlet(&mut self) {
        let (nxt, nyt, nzt) = (self.fields.nxt, self.fields.nyt, self.fields.nzt);
        let mut zero_at = |i: usize, j: usize, k: usize, f: &mut ElasticFields3D| {
            let idx = (i * nyt + j) * nzt + k;
            f.vx[idx] = 0.0;
            f.vy[idx] = 0.0;
            f.vz[idx] = 0.0;
        };
        for j in 0..nyt {
            for k in 0..nzt {
                for i in [0, 1, nxt - 2, nxt - 1] {
                    zero_at(i, j, k, &mut self.fields);
                }
            }
        }
        for i in 0..nxt {
            for k in 0..nzt {
                for j in [0, 1, nyt - 2, nyt - 1] {
                    zero_at(i, j, k, &mut self.fields);
                }
            }
        }
        for i in 0..nxt {
            for j in 0..nyt {
                for k in [0, 1, nzt - 2, nzt - 1] {
                    zero_at(i, j, k, &mut self.fields);
                }
            }
        }
    }

    fn record_receivers(&mut self) {
        let (nyt, nzt) = (self.fields.nyt, self.fields.nzt);
        let nrec = self.receivers.len();
        let row = self.it * nrec;
        for (r, &(i, j, k)) in self.receivers.iter().enumerate() {
            let idx = (i * nyt + j) * nzt + k;
            self.traces_vx[row + r] = self.fields.vx[idx];
            self.traces_vy[row + r] = self.fields.vy[idx];
            self.traces_vz[row + r] = self.fields.vz[idx];
        }
    }

    /// Interior energy with strains recovered from the stress tensor
    /// (`eps_xx = (2 (lam + mu) s_xx - lam (s_yy + s_zz)) / (2 mu (3 lam + 2 mu))`).
    fn interior_energy(&self) -> (f32, f32) {
        let npml = self.cfg.pml.thickness;
        let (nyt, nzt) = (self.fields.nyt, self.fields.nzt);
        let imin = npml;
        let imax = self.cfg.nx - npml + 1;
        let jmin = npml;
        let jmax = self.cfg.ny - npml + 1;
        let kmin = npml;
        let kmax = self.cfg.nz - npml + 1;

        let rho = self.cfg.medium.rho;
        let lam = self.cfg.medium.lambda();
        let mu = self.cfg.medium.mu();
        let two_lam_mu = 2.0 * (lam + mu);
        let denom = 2.0 * mu * (3.0 * lam + 2.0 * mu);

        let mut kinetic = 0.0f64;
        let mut potential = 0.0f64;
        for i in imin..imax {
            for j in jmin..jmax {
                for k in kmin..kmax {
                    let idx = (i * nyt + j) * nzt + k;
                    let vx = self.fields.vx[idx] as f64;
                    let vy = self.fields.vy[idx] as f64;
                    let vz = self.fields.vz[idx] as f64;
                    kinetic += vx * vx + vy * vy + vz * vz;

                    if denom > 0.0 {
                        let sxx = self.fields.sigmaxx[idx];
                        let syy = self.fields.sigmayy[idx];
                        let szz = self.fields.sigmazz[idx];
                        let sxy = self.fields.sigmaxy[idx];
                        let sxz = self.fields.sigmaxz[idx];
                        let syz = self.fields.sigmayz[idx];
                        let exx = (two_lam_mu * sxx - lam * (syy + szz)) / denom;
                        let eyy = (two_lam_mu * syy - lam * (sxx + szz)) / denom;
                        let ezz = (two_lam_mu * szz - lam * (sxx + syy)) / denom;
                        let exy = sxy / (2.0 * mu);
                        let exz = sxz / (2.0 * mu);
                        let eyz = syz / (2.0 * mu);
                        potential += (exx * sxx
                            + eyy * syy
                            + ezz * szz
                            + 2.0 * (exy * sxy + exz * sxz + eyz * syz))
                            as f64;
                    }
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
    use crate::config::{PmlConfig, Receiver3D, Source3D};
    use crate::source::Wavelet;

    fn small_config() -> ElasticConfig3D {
        ElasticConfig3D {
            nx: 20,
            ny: 20,
            nz: 20,
            dx: 4.0,
            dy: 4.0,
            dz: 4.0,
            dt: 4.0e-4,
            nstep: 20,
            pml: PmlConfig::for_frequency(4, 18.0).with_k_max(7.0),
            sources: vec![Source3D {
                x: 40.0,
                y: 40.0,
                z: 40.0,
                wavelet: Wavelet::gaussian_derivative(18.0).with_gain(1.0e7),
            }],
            receivers: vec![Receiver3D {
                x: 24.0,
                y: 56.0,
                z: 40.0,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_source_stays_zero() {
        let cfg = ElasticConfig3D {
            sources: vec![],
            ..small_config()
        };
        let mut sim = ElasticSim3D::new(cfg).unwrap();
        for _ in 0..10 {
            sim.step().unwrap();
        }
        assert!(sim.fields.vx.iter().all(|&v| v == 0.0));
        assert!(sim.fields.vy.iter().all(|&v| v == 0.0));
        assert!(sim.fields.vz.iter().all(|&v| v == 0.0));
        assert!(sim.fields.sigmazz.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_wave_propagates_from_source() {
        let mut sim = ElasticSim3D::new(small_config()).unwrap();
        let report = sim.run().unwrap();
        assert_eq!(sim.state(), RunState::Completed);
        assert!(report.norm_max > 0.0);
        assert!(report.vz.is_some());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut seq = ElasticSim3D::new(small_config()).unwrap();
        let mut par = ElasticSim3D::new(small_config()).unwrap();
        par.parallel = true;
        for _ in 0..20 {
            seq.step().unwrap();
            par.step().unwrap();
        }
        let max_diff = seq
            .fields
            .vz
            .iter()
            .zip(par.fields.vz.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff == 0.0, "formulations diverged by {}", max_diff);
        assert_eq!(seq.trace_vz(0), par.trace_vz(0));
    }

    #[test]
    fn test_dirichlet_layers_zero() {
        let mut sim = ElasticSim3D::new(small_config()).unwrap();
        for _ in 0..10 {
            sim.step().unwrap();
        }
        let (nyt, nzt) = (sim.fields.nyt, sim.fields.nzt);
        for j in 0..nyt {
            for k in 0..nzt {
                for i in [0usize, 1, sim.fields.nxt - 2, sim.fields.nxt - 1] {
                    let idx = (i * nyt + j) * nzt + k;
                    assert_eq!(sim.fields.vz[idx], 0.0);
                }
            }
        }
    }
}
