//! Compute-shader execution of the 2D elastic step.
//!
//! The four phases of a step run as four dispatches inside one compute
//! pass; the pass provides the barrier between them, so each dispatch
//! sees every write of the previous one. The iteration counter lives in a
//! one-cell storage buffer advanced by the single-workgroup
//! `advance_clock` entry point.
//!
//! Buffer packing keeps the shader within the default storage-buffer
//! limit: the five field arrays share one buffer (slab per array), the
//! eight memory arrays another, and the twelve C-PML coefficient rows a
//! third.

use std::borrow::Cow;
use std::sync::Arc;

use crate::config::ElasticConfig2D;
use crate::cpml::CpmlAxis;
use crate::error::{Result, SimError};
use crate::gpu::context::GpuContext;
use crate::simulation::diagnostics::check_stability;
use crate::simulation::{RunState, StepPhase};
use crate::source::{force_components, nearest_node_2d};

const WORKGROUP: u32 = 8;

const SHADER: &str = r#"
struct SimParams {
    nx: u32,            // padded x size
    ny: u32,            // padded y size
    nsrc: u32,
    nrec: u32,
    nstep: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
    inv_dx: f32,
    inv_dy: f32,
    dt: f32,
    dt_over_rho: f32,
    lambda_: f32,
    mu: f32,
    lp2m: f32,
    _pad3: f32,
}

struct Clock {
    k: i32,
}

@group(0) @binding(0) var<uniform> params: SimParams;
// C-PML coefficients: rows a, b, k, a_half, b_half, k_half for the x axis
// followed by the same six rows for the y axis.
@group(0) @binding(1) var<storage, read> coef: array<f32>;
// Source (i, j) pairs followed by receiver (i, j) pairs.
@group(0) @binding(2) var<storage, read> positions: array<i32>;
// Per source: force_x[nstep] then force_y[nstep].
@group(0) @binding(3) var<storage, read> src_force: array<f32>;
@group(0) @binding(4) var<storage, read_write> clock: Clock;

// Field slabs: vx, vy, sigmaxx, sigmayy, sigmaxy.
@group(1) @binding(0) var<storage, read_write> fields: array<f32>;
// Memory slabs: dvx_dx, dvy_dy, dvy_dx, dvx_dy,
//               dsigmaxx_dx, dsigmaxy_dy, dsigmaxy_dx, dsigmayy_dy.
@group(1) @binding(1) var<storage, read_write> mem: array<f32>;

// vx traces (nstep x nrec) followed by vy traces.
@group(2) @binding(0) var<storage, read_write> traces: array<f32>;

const W0: f32 = 1.125;
const W1: f32 = -0.041666667;

fn cells() -> u32 {
    return params.nx * params.ny;
}

fn coef_x(row: u32, i: u32) -> f32 {
    return coef[row * params.nx + i];
}

fn coef_y(row: u32, j: u32) -> f32 {
    return coef[6u * params.nx + row * params.ny + j];
}

// Forward staggered difference of field slab `slot` (derivative at +1/2).
fn fwd(slot: u32, idx: u32, stride: u32, inv_d: f32) -> f32 {
    let base = slot * cells() + idx;
    return (W0 * (fields[base + stride] - fields[base])
        + W1 * (fields[base + 2u * stride] - fields[base - stride])) * inv_d;
}

// Backward staggered difference (derivative at -1/2).
fn bwd(slot: u32, idx: u32, stride: u32, inv_d: f32) -> f32 {
    let base = slot * cells() + idx;
    return (W0 * (fields[base] - fields[base - stride])
        + W1 * (fields[base + stride] - fields[base - 2u * stride])) * inv_d;
}

// Update a memory slab and return the corrected derivative.
fn correct(slot: u32, idx: u32, raw: f32, a: f32, b: f32, kk: f32) -> f32 {
    let p = slot * cells() + idx;
    let m = b * mem[p] + a * raw;
    mem[p] = m;
    return raw / kk + m;
}

// Stencil half-width is 2: forward updates run on [1, n-2), backward on
// [2, n-1).
fn fwd_ok(i: u32, n: u32) -> bool {
    return i >= 1u && i < n - 2u;
}

fn bwd_ok(i: u32, n: u32) -> bool {
    return i >= 2u && i < n - 1u;
}

@compute @workgroup_size(8, 8)
fn compute_stress(@builtin(global_invocation_id) gid: vec3u) {
    let i = gid.x;
    let j = gid.y;
    if (i >= params.nx || j >= params.ny) {
        return;
    }
    let idx = i * params.ny + j;
    let n = cells();

    // Normal stresses: d(vx)/dx on the half grid, d(vy)/dy on the full grid.
    if (fwd_ok(i, params.nx) && bwd_ok(j, params.ny)) {
        let raw_xx = fwd(0u, idx, params.ny, params.inv_dx);
        let cxx = correct(0u, idx, raw_xx, coef_x(3u, i), coef_x(4u, i), coef_x(5u, i));
        let raw_yy = bwd(1u, idx, 1u, params.inv_dy);
        let cyy = correct(1u, idx, raw_yy, coef_y(0u, j), coef_y(1u, j), coef_y(2u, j));
        fields[2u * n + idx] += (params.lp2m * cxx + params.lambda_ * cyy) * params.dt;
        fields[3u * n + idx] += (params.lambda_ * cxx + params.lp2m * cyy) * params.dt;
    }

    // Shear stress: d(vy)/dx on the full grid, d(vx)/dy on the half grid.
    if (bwd_ok(i, params.nx) && fwd_ok(j, params.ny)) {
        let raw_yx = bwd(1u, idx, params.ny, params.inv_dx);
        let cyx = correct(2u, idx, raw_yx, coef_x(0u, i), coef_x(1u, i), coef_x(2u, i));
        let raw_xy = fwd(0u, idx, 1u, params.inv_dy);
        let cxy = correct(3u, idx, raw_xy, coef_y(3u, j), coef_y(4u, j), coef_y(5u, j));
        fields[4u * n + idx] += params.dt * params.mu * (cxy + cyx);
    }
}

@compute @workgroup_size(8, 8)
fn compute_velocity(@builtin(global_invocation_id) gid: vec3u) {
    let i = gid.x;
    let j = gid.y;
    if (i >= params.nx || j >= params.ny) {
        return;
    }
    let idx = i * params.ny + j;
    let n = cells();

    // vx: both stress derivatives on the full grid.
    if (bwd_ok(i, params.nx) && bwd_ok(j, params.ny)) {
        let raw_xx = bwd(2u, idx, params.ny, params.inv_dx);
        let cxx = correct(4u, idx, raw_xx, coef_x(0u, i), coef_x(1u, i), coef_x(2u, i));
        let raw_xy = bwd(4u, idx, 1u, params.inv_dy);
        let cxy = correct(5u, idx, raw_xy, coef_y(0u, j), coef_y(1u, j), coef_y(2u, j));
        fields[idx] += params.dt_over_rho * (cxx + cxy);
    }

    // vy: both stress derivatives on the half grid.
    if (fwd_ok(i, params.nx) && fwd_ok(j, params.ny)) {
        let raw_yx = fwd(4u, idx, params.ny, params.inv_dx);
        let cyx = correct(6u, idx, raw_yx, coef_x(3u, i), coef_x(4u, i), coef_x(5u, i));
        let raw_yy = fwd(3u, idx, 1u, params.inv_dy);
        let cyy = correct(7u, idx, raw_yy, coef_y(3u, j), coef_y(4u, j), coef_y(5u, j));
        fields[n + idx] += params.dt_over_rho * (cyx + cyy);
    }
}

@compute @workgroup_size(8, 8)
fn finish_step(@builtin(global_invocation_id) gid: vec3u) {
    let i = gid.x;
    let j = gid.y;
    if (i >= params.nx || j >= params.ny) {
        return;
    }
    let idx = i * params.ny + j;
    let n = cells();
    let k = u32(clock.k);

    for (var s = 0u; s < params.nsrc; s = s + 1u) {
        if (i32(i) == positions[2u * s] && i32(j) == positions[2u * s + 1u]) {
            fields[idx] += src_force[2u * s * params.nstep + k] * params.dt_over_rho;
            fields[n + idx] += src_force[(2u * s + 1u) * params.nstep + k] * params.dt_over_rho;
        }
    }

    if (i == 0u || i == params.nx - 2u || j == 0u || j == params.ny - 2u) {
        fields[idx] = 0.0;
        fields[n + idx] = 0.0;
    }

    for (var r = 0u; r < params.nrec; r = r + 1u) {
        let off = 2u * params.nsrc;
        if (i32(i) == positions[off + 2u * r] && i32(j) == positions[off + 2u * r + 1u]) {
            traces[k * params.nrec + r] = fields[idx];
            traces[params.nstep * params.nrec + k * params.nrec + r] = fields[n + idx];
        }
    }
}

@compute @workgroup_size(1)
fn advance_clock() {
    clock.k = clock.k + 1;
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SimParams {
    nx: u32,
    ny: u32,
    nsrc: u32,
    nrec: u32,
    nstep: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
    inv_dx: f32,
    inv_dy: f32,
    dt: f32,
    dt_over_rho: f32,
    lambda: f32,
    mu: f32,
    lp2m: f32,
    _pad3: f32,
}

/// 2D elastic run executed on a wgpu device.
pub struct GpuElasticSim2D {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipelines: [wgpu::ComputePipeline; 4],
    bind_groups: [wgpu::BindGroup; 3],
    buf_fields: wgpu::Buffer,
    buf_traces: wgpu::Buffer,
    staging: wgpu::Buffer,

    nxt: u32,
    nyt: u32,
    nstep: usize,
    nrec: usize,
    report_interval: usize,
    it: usize,
    state: RunState,
}

impl GpuElasticSim2D {
    /// Upload a validated configuration to the device and build the
    /// pipelines. The GPU path runs the fixed 4th-order stencil.
    pub fn new(ctx: &GpuContext, cfg: &ElasticConfig2D) -> Result<Self> {
        cfg.validate()?;
        if cfg.order != 4 {
            return Err(SimError::Configuration(format!(
                "the compute-shader backend runs the 4th-order stencil, got order {}",
                cfg.order
            )));
        }

        let device = ctx.device().clone();
        let queue = ctx.queue().clone();

        let nxt = cfg.nx + 2;
        let nyt = cfg.ny + 2;
        let cells = nxt * nyt;

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

        // Row-stacked coefficient block: a, b, k, a_half, b_half, k_half
        // per axis.
        let mut coef = Vec::with_capacity(6 * (nxt + nyt));
        for axis in [&cpml_x, &cpml_y] {
            coef.extend_from_slice(&axis.full.a);
            coef.extend_from_slice(&axis.full.b);
            coef.extend_from_slice(&axis.full.k);
            coef.extend_from_slice(&axis.half.a);
            coef.extend_from_slice(&axis.half.b);
            coef.extend_from_slice(&axis.half.k);
        }

        let mut positions: Vec<i32> = Vec::new();
        let mut forces: Vec<f32> = Vec::new();
        for s in &cfg.sources {
            let (i, j) = nearest_node_2d(s.x, s.y, cfg.nx, cfg.ny, cfg.dx, cfg.dy);
            positions.push(i as i32);
            positions.push(j as i32);
            let (cx, cy) = force_components(s.angle_deg);
            let series = s.wavelet.time_series(cfg.nstep, cfg.dt);
            forces.extend(series.iter().map(|&v| cx * v));
            forces.extend(series.iter().map(|&v| cy * v));
        }
        for r in &cfg.receivers {
            let (i, j) = nearest_node_2d(r.x, r.y, cfg.nx, cfg.ny, cfg.dx, cfg.dy);
            positions.push(i as i32);
            positions.push(j as i32);
        }
        if positions.is_empty() {
            positions.push(-1);
        }
        if forces.is_empty() {
            forces.push(0.0);
        }

        let params = SimParams {
            nx: nxt as u32,
            ny: nyt as u32,
            nsrc: cfg.sources.len() as u32,
            nrec: cfg.receivers.len() as u32,
            nstep: cfg.nstep as u32,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
            inv_dx: 1.0 / cfg.dx,
            inv_dy: 1.0 / cfg.dy,
            dt: cfg.dt,
            dt_over_rho: cfg.dt / cfg.medium.rho,
            lambda: cfg.medium.lambda(),
            mu: cfg.medium.mu(),
            lp2m: cfg.medium.lambda_plus_2mu(),
            _pad3: 0.0,
        };

        use wgpu::util::DeviceExt;
        let storage_rw = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let storage_ro = wgpu::BufferUsages::STORAGE;

        let buf_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sim params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let buf_coef = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("cpml coef"),
            contents: bytemuck::cast_slice(&coef),
            usage: storage_ro,
        });
        let buf_positions = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("positions"),
            contents: bytemuck::cast_slice(&positions),
            usage: storage_ro,
        });
        let buf_force = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("source force"),
            contents: bytemuck::cast_slice(&forces),
            usage: storage_ro,
        });
        let buf_clock = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("clock"),
            contents: bytemuck::bytes_of(&0i32),
            usage: storage_rw,
        });
        let buf_fields = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fields"),
            contents: bytemuck::cast_slice(&vec![0.0f32; 5 * cells]),
            usage: storage_rw,
        });
        let buf_mem = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("cpml memory"),
            contents: bytemuck::cast_slice(&vec![0.0f32; 8 * cells]),
            usage: storage_rw,
        });
        let trace_len = (2 * cfg.nstep * cfg.receivers.len()).max(1);
        let buf_traces = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("traces"),
            contents: bytemuck::cast_slice(&vec![0.0f32; trace_len]),
            usage: storage_rw,
        });
        let staging_len = (trace_len.max(2 * cells) * 4) as u64;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: staging_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("elastic2d"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SHADER)),
        });

        let bgl_params = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("params bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                bgl_storage_entry(1, true),
                bgl_storage_entry(2, true),
                bgl_storage_entry(3, true),
                bgl_storage_entry(4, false),
            ],
        });
        let bgl_fields = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fields bgl"),
            entries: &[bgl_storage_entry(0, false), bgl_storage_entry(1, false)],
        });
        let bgl_traces = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("traces bgl"),
            entries: &[bgl_storage_entry(0, false)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("elastic2d layout"),
            bind_group_layouts: &[&bgl_params, &bgl_fields, &bgl_traces],
            push_constant_ranges: &[],
        });

        let pipelines = StepPhase::ALL.map(|phase| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(phase.entry_point()),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(phase.entry_point()),
                compilation_options: Default::default(),
                cache: None,
            })
        });

        let bind_groups = [
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("params bg"),
                layout: &bgl_params,
                entries: &[
                    bg_entry(0, buf_params.as_entire_binding()),
                    bg_entry(1, buf_coef.as_entire_binding()),
                    bg_entry(2, buf_positions.as_entire_binding()),
                    bg_entry(3, buf_force.as_entire_binding()),
                    bg_entry(4, buf_clock.as_entire_binding()),
                ],
            }),
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("fields bg"),
                layout: &bgl_fields,
                entries: &[
                    bg_entry(0, buf_fields.as_entire_binding()),
                    bg_entry(1, buf_mem.as_entire_binding()),
                ],
            }),
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("traces bg"),
                layout: &bgl_traces,
                entries: &[bg_entry(0, buf_traces.as_entire_binding())],
            }),
        ];

        tracing::info!(
            nx = cfg.nx,
            ny = cfg.ny,
            nstep = cfg.nstep,
            "2D elastic run ready on device"
        );

        Ok(Self {
            device,
            queue,
            pipelines,
            bind_groups,
            buf_fields,
            buf_traces,
            staging,
            nxt: nxt as u32,
            nyt: nyt as u32,
            nstep: cfg.nstep,
            nrec: cfg.receivers.len(),
            report_interval: cfg.report_interval,
            it: 0,
            state: RunState::Ready,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn it(&self) -> usize {
        self.it
    }

    /// Encode and submit one time step: four phase dispatches in a single
    /// compute pass.
    pub fn step(&mut self) -> Result<()> {
        match self.state {
            RunState::Ready => self.state = RunState::Stepping,
            RunState::Stepping => {}
            _ => {
                return Err(SimError::Configuration(
                    "cannot step a finished simulation".into(),
                ))
            }
        }

        let wg_x = self.nxt.div_ceil(WORKGROUP);
        let wg_y = self.nyt.div_ceil(WORKGROUP);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fdtd step"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("fdtd phases"),
                timestamp_writes: None,
            });
            for (g, bg) in self.bind_groups.iter().enumerate() {
                pass.set_bind_group(g as u32, bg, &[]);
            }
            for (phase, pipeline) in StepPhase::ALL.iter().zip(self.pipelines.iter()) {
                pass.set_pipeline(pipeline);
                match phase {
                    StepPhase::AdvanceClock => pass.dispatch_workgroups(1, 1, 1),
                    _ => pass.dispatch_workgroups(wg_x, wg_y, 1),
                }
            }
        }
        self.queue.submit(Some(encoder.finish()));

        self.it += 1;
        if self.it >= self.nstep {
            self.state = RunState::Completed;
        }
        Ok(())
    }

    /// Run all steps, checking stability at every report interval.
    pub fn run(&mut self) -> Result<()> {
        while self.state == RunState::Ready || self.state == RunState::Stepping {
            self.step()?;
            if self.it % self.report_interval == 0 {
                let norm = self.max_velocity_norm()?;
                tracing::info!(it = self.it, norm, "device step report");
                if let Err(e) = check_stability(self.it, norm) {
                    self.state = RunState::Halted;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Read back the velocity slabs and reduce to the maximum norm.
    pub fn max_velocity_norm(&self) -> Result<f32> {
        let cells = (self.nxt * self.nyt) as usize;
        let data = self.read_buffer(&self.buf_fields, 2 * cells)?;
        let (vx, vy) = data.split_at(cells);
        Ok(vx
            .iter()
            .zip(vy.iter())
            .map(|(&x, &y)| (x * x + y * y).sqrt())
            .fold(0.0f32, f32::max))
    }

    /// Read back both trace blocks: `(vx, vy)`, each `nstep * nrec`.
    pub fn read_traces(&self) -> Result<(Vec<f32>, Vec<f32>)> {
        let len = self.nstep * self.nrec;
        let data = self.read_buffer(&self.buf_traces, 2 * len)?;
        Ok((data[..len].to_vec(), data[len..].to_vec()))
    }

    /// vx trace of one receiver.
    pub fn trace_vx(&self, irec: usize) -> Result<Vec<f32>> {
        let (vx, _) = self.read_traces()?;
        Ok((0..self.nstep).map(|t| vx[t * self.nrec + irec]).collect())
    }

    fn read_buffer(&self, buffer: &wgpu::Buffer, count: usize) -> Result<Vec<f32>> {
        let bytes = (count * 4) as u64;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &self.staging, 0, bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = self.staging.slice(..bytes);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| SimError::Backend("readback channel closed".into()))?
            .map_err(|e| SimError::Backend(format!("buffer map failed: {:?}", e)))?;

        let data = slice.get_mapped_range();
        let out: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        self.staging.unmap();
        Ok(out)
    }
}

fn bgl_storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bg_entry(binding: u32, resource: wgpu::BindingResource<'_>) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry { binding, resource }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PmlConfig, Receiver2D, Source2D};
    use crate::simulation::ElasticSim2D;
    use crate::source::Wavelet;

    fn small_config() -> ElasticConfig2D {
        ElasticConfig2D {
            nx: 16,
            ny: 16,
            dx: 10.0,
            dy: 10.0,
            dt: 1.0e-3,
            nstep: 50,
            pml: PmlConfig::for_frequency(4, 7.0),
            sources: vec![Source2D {
                x: 80.0,
                y: 80.0,
                wavelet: Wavelet::gaussian_derivative(7.0).with_gain(1.0e7),
                angle_deg: 0.0,
            }],
            receivers: vec![Receiver2D { x: 50.0, y: 110.0 }],
            ..Default::default()
        }
    }

    #[test]
    #[ignore] // May not have a GPU in CI
    fn test_matches_cpu_sequential() {
        let ctx = GpuContext::new_blocking().unwrap();
        let mut gpu = GpuElasticSim2D::new(&ctx, &small_config()).unwrap();
        gpu.run().unwrap();
        let gpu_trace = gpu.trace_vx(0).unwrap();

        let mut cpu = ElasticSim2D::new(small_config()).unwrap();
        cpu.run().unwrap();
        let cpu_trace = cpu.trace_vx(0);

        let peak = cpu_trace.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
        assert!(peak > 0.0);
        for (a, b) in cpu_trace.iter().zip(gpu_trace.iter()) {
            assert!(
                (a - b).abs() <= 1.0e-4 * peak,
                "trace mismatch: cpu = {}, gpu = {}",
                a,
                b
            );
        }
    }

    #[test]
    #[ignore] // May not have a GPU in CI
    fn test_unsupported_order_rejected() {
        let ctx = GpuContext::new_blocking().unwrap();
        let cfg = ElasticConfig2D {
            order: 8,
            ..small_config()
        };
        assert!(GpuElasticSim2D::new(&ctx, &cfg).is_err());
    }
}
