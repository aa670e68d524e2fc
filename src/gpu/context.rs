//! wgpu adapter and device management.

use std::sync::Arc;

use crate::error::{Result, SimError};

/// Wrapper around the wgpu instance, adapter, device and queue.
pub struct GpuContext {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Request a high-performance adapter and a default device.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| SimError::BackendUnavailable("no compute adapter found".to_string()))?;

        let info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("wavesim device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| SimError::Backend(format!("failed to create device: {}", e)))?;

        tracing::info!("created wgpu adapter: {} ({:?})", info.name, info.backend);

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            info,
        })
    }

    /// Blocking constructor for synchronous callers.
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn backend(&self) -> wgpu::Backend {
        self.info.backend
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn poll_wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // May not have a GPU in CI
    fn test_context_creation() {
        let ctx = GpuContext::new_blocking().unwrap();
        println!("adapter: {} ({:?})", ctx.name(), ctx.backend());
    }
}
