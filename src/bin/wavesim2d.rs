//! Demo driver for the 2D elastic simulation.
//!
//! Runs the default configuration on the sequential CPU engine and, when
//! the `wgpu` feature is enabled and a compute adapter exists, repeats the
//! run on the device and compares the receiver traces.
//!
//! Run with: cargo run --bin wavesim2d --release

use std::time::Instant;

use seismic_cpml::{ElasticConfig2D, ElasticSim2D, Result};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = ElasticConfig2D::default();
    println!(
        "2D elastic FDTD: {}x{} grid, {} steps, Courant number {:.4}",
        cfg.nx,
        cfg.ny,
        cfg.nstep,
        cfg.courant_number()
    );

    let mut sim = ElasticSim2D::new(cfg.clone())?;
    let start = Instant::now();
    let report = sim.run()?;
    let elapsed = start.elapsed();

    let cells = cfg.nx * cfg.ny;
    println!(
        "CPU: {} steps in {:.2} s ({:.1} Mcells/s)",
        report.it,
        elapsed.as_secs_f64(),
        (cells * report.it) as f64 / elapsed.as_secs_f64() / 1.0e6
    );
    println!(
        "final max |v| = {:.3e}, interior energy = {:.3e}",
        report.norm_max,
        report.total_energy()
    );

    for irec in 0..cfg.receivers.len() {
        let vy = sim.trace_vy(irec);
        let peak = vy.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
        let peak_step = vy
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
            .map(|(i, _)| i)
            .unwrap_or(0);
        println!(
            "receiver {}: peak |vy| = {:.3e} at step {} (t = {:.3} s)",
            irec,
            peak,
            peak_step,
            peak_step as f32 * cfg.dt
        );
    }

    #[cfg(feature = "wgpu")]
    compare_on_device(&cfg, &sim);

    Ok(())
}

/// Repeat the run on a wgpu device and report the worst trace deviation.
#[cfg(feature = "wgpu")]
fn compare_on_device(cfg: &ElasticConfig2D, cpu: &ElasticSim2D) {
    use seismic_cpml::{GpuContext, GpuElasticSim2D};

    let ctx = match GpuContext::new_blocking() {
        Ok(ctx) => ctx,
        Err(e) => {
            println!("GPU comparison skipped: {}", e);
            return;
        }
    };
    println!("GPU: {} ({:?})", ctx.name(), ctx.backend());

    let run = || -> seismic_cpml::Result<(usize, Vec<f32>, f64)> {
        let mut gpu = GpuElasticSim2D::new(&ctx, cfg)?;
        let start = Instant::now();
        gpu.run()?;
        let elapsed = start.elapsed().as_secs_f64();
        let trace = gpu.trace_vx(0)?;
        Ok((gpu.it(), trace, elapsed))
    };

    match run() {
        Ok((steps, gpu_trace, secs)) => {
            let cells = cfg.nx * cfg.ny;
            println!(
                "GPU: {} steps in {:.2} s ({:.1} Mcells/s)",
                steps,
                secs,
                (cells * steps) as f64 / secs / 1.0e6
            );
            let cpu_trace = cpu.trace_vx(0);
            let peak = cpu_trace.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
            let worst = cpu_trace
                .iter()
                .zip(gpu_trace.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max);
            println!(
                "trace deviation CPU vs GPU: {:.3e} absolute ({:.3e} of peak)",
                worst,
                if peak > 0.0 { worst / peak } else { 0.0 }
            );
        }
        Err(e) => println!("GPU run failed: {}", e),
    }
}
