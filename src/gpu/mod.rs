//! wgpu compute backend.
//!
//! Executes the 2D elastic step as barrier-separated compute-shader
//! phases; one dispatch per [`crate::simulation::StepPhase`] inside a
//! single compute pass per time step. Receiver traces accumulate on the
//! device and are read back once after the run.

pub mod context;
pub mod elastic2d;

pub use context::GpuContext;
pub use elastic2d::GpuElasticSim2D;
