//! Error types shared across the crate.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SimError>;

/// Errors surfaced by configuration, time stepping, and the compute backend.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid setup parameters. Detected before any field array is mutated.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The velocity (or pressure) norm exceeded the stability threshold
    /// while stepping. Receiver traces collected so far remain readable.
    #[error("simulation diverged at step {step}: field norm {norm:.3e} exceeds stability threshold")]
    Divergence { step: usize, norm: f32 },

    /// No usable compute adapter or device was found.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The compute backend failed after successful setup.
    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_message_carries_step() {
        let err = SimError::Divergence {
            step: 42,
            norm: 1.5e26,
        };
        let msg = err.to_string();
        assert!(msg.contains("step 42"), "message was: {}", msg);
    }

    #[test]
    fn test_configuration_display() {
        let err = SimError::Configuration("power-law exponent must be >= 1".into());
        assert!(err.to_string().starts_with("invalid configuration"));
    }
}
