//! Capability probe for attention backends
//!
//! Strategy availability is decided once, from build features, and surfaced
//! as a plain capability table. Construction consults the table and fails
//! fast on strategies this build cannot execute.

use crate::config::{AttentionStrategy, ConfigError};

/// Attention backends this build can execute
#[derive(Debug, Clone, Copy)]
pub struct BackendCapabilities {
    /// Explicit softmax attention, available on every device
    pub dense: bool,
    /// Fused strategy: kernel dispatch plus its dense-equivalent fallback
    pub fused: bool,
    /// Whether the fused strategy dispatches a real flash attention kernel on CUDA
    pub flash_kernel: bool,
    /// Rebased-style linear-complexity kernel
    pub linear_approx: bool,
    /// Sequence-parallel ring attention
    pub ring: bool,
}

impl BackendCapabilities {
    /// Probe the current build
    pub const fn detect() -> Self {
        Self {
            dense: true,
            fused: true,
            flash_kernel: cfg!(feature = "flash-attn"),
            linear_approx: false,
            ring: false,
        }
    }

    /// Whether `strategy` can run in this build
    pub fn supports(&self, strategy: &AttentionStrategy) -> bool {
        match strategy {
            AttentionStrategy::Dense => self.dense,
            AttentionStrategy::Fused => self.fused,
            AttentionStrategy::LinearApprox { .. } => self.linear_approx,
            AttentionStrategy::Ring { .. } => self.ring,
        }
    }
}

/// Fail-fast availability check used at construction
pub fn require(strategy: &AttentionStrategy) -> Result<(), ConfigError> {
    if BackendCapabilities::detect().supports(strategy) {
        return Ok(());
    }
    let (name, reason) = match strategy {
        AttentionStrategy::LinearApprox { .. } => (
            "linear_approx",
            "the rebased linear-attention kernel comes from an external provider with no counterpart in this build",
        ),
        AttentionStrategy::Ring { .. } => (
            "ring",
            "ring attention needs a multi-worker sequence-parallel executor, which this build does not ship",
        ),
        AttentionStrategy::Dense | AttentionStrategy::Fused => {
            ("dense", "backend probe rejected an always-available strategy")
        }
    };
    Err(ConfigError::UnavailableBackend { name, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_strategies_available() {
        let caps = BackendCapabilities::detect();
        assert!(caps.dense);
        assert!(caps.fused);
        assert!(require(&AttentionStrategy::Dense).is_ok());
        assert!(require(&AttentionStrategy::Fused).is_ok());
    }

    #[test]
    fn test_external_strategies_fail_fast() {
        assert!(require(&AttentionStrategy::LinearApprox { eps: 1e-12 }).is_err());
        assert!(
            require(&AttentionStrategy::Ring {
                causal: false,
                bucket_size: 512,
            })
            .is_err()
        );
    }
}
