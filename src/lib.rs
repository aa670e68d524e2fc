//! # seismic-cpml
//!
//! Velocity-stress FDTD simulation of elastic and acoustic wave
//! propagation on a staggered grid, with Convolutional Perfectly Matched
//! Layer (C-PML) absorbing boundaries.
//!
//! Three variants are provided: 2D elastic ([`ElasticSim2D`]), 3D elastic
//! ([`ElasticSim3D`]) and 2D acoustic pressure ([`AcousticSim2D`]). The 2D
//! elastic step additionally exists as a barrier-phased per-cell kernel
//! model ([`KernelSim2D`]) and, behind the `wgpu` feature, as compute
//! shaders dispatched on a GPU device — all formulations share one
//! canonical stencil and agree numerically.
//!
//! ## Example
//!
//! ```no_run
//! use seismic_cpml::{ElasticConfig2D, ElasticSim2D};
//!
//! let mut sim = ElasticSim2D::new(ElasticConfig2D::default())?;
//! let report = sim.run()?;
//! println!("finished after {} steps, max |v| = {}", report.it, report.norm_max);
//! let trace = sim.trace_vy(0);
//! # Ok::<(), seismic_cpml::SimError>(())
//! ```

pub mod config;
pub mod cpml;
pub mod error;
pub mod fd;
pub mod simulation;
pub mod source;

#[cfg(feature = "wgpu")]
pub mod gpu;

pub use config::{
    AcousticConfig2D, ElasticConfig2D, ElasticConfig3D, Medium, PmlConfig, Receiver2D, Receiver3D,
    Source2D, Source3D,
};
pub use cpml::{CpmlAxis, CpmlAxisSpec, CpmlProfile};
pub use error::{Result, SimError};
pub use fd::FdCoefficients;
pub use simulation::{
    AcousticSim2D, ElasticSim2D, ElasticSim3D, KernelSim2D, RunState, StepPhase, StepReport,
    STABILITY_THRESHOLD,
};
pub use source::Wavelet;

#[cfg(feature = "wgpu")]
pub use gpu::{GpuContext, GpuElasticSim2D};
