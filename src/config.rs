//! Model configuration, validation and size presets

use serde::{Deserialize, Serialize};

use crate::backends;

/// Attention computation strategy, fixed at construction.
///
/// Unavailable strategies are rejected by [`LatteConfig::validate`] with a
/// [`ConfigError::UnavailableBackend`] instead of degrading at forward time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionStrategy {
    /// Scaled dot-product scores with an explicit softmax
    Dense,
    /// Fused kernel when one is compiled in; restrictive masks take the dense path
    Fused,
    /// Rebased-style linear-complexity kernel
    LinearApprox {
        /// Denominator stabilizer of the kernel approximation
        eps: f64,
    },
    /// Sequence-parallel ring attention exchanging key/value buckets between workers
    Ring {
        /// Restrict attention to earlier positions
        causal: bool,
        /// Chunk size for key/value exchange
        bucket_size: usize,
    },
}

impl Default for AttentionStrategy {
    fn default() -> Self {
        Self::Dense
    }
}

/// Conditioning signal supplied alongside the diffusion timestep.
///
/// Modes are mutually exclusive and resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conditioning {
    /// Timestep conditioning only
    Unconditional,
    /// Integer class labels with classifier-free-guidance dropout
    Class {
        /// Number of classes; one extra embedding row holds the unconditional class
        num_classes: usize,
        /// Probability of replacing a label by the unconditional class during training
        dropout_prob: f64,
    },
    /// Pre-computed text embedding of fixed shape (tokens, token_dim)
    Text { tokens: usize, token_dim: usize },
}

impl Default for Conditioning {
    fn default() -> Self {
        Self::Unconditional
    }
}

/// Configuration of the spatiotemporal transformer backbone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatteConfig {
    /// Spatial size (height, width) of the latent input
    pub input_size: (usize, usize),
    /// Spatial patch size, applied to both height and width
    pub patch_size: usize,
    /// Temporal patch size. Widens the output projection; values other than 1
    /// are reserved and rejected when folding the prediction back to frames.
    #[serde(default = "default_patch_size_t")]
    pub patch_size_t: usize,
    /// Input channels of the latent
    pub in_channels: usize,
    /// Hidden dimension size
    pub hidden_size: usize,
    /// Number of transformer blocks; consumed as spatial/temporal pairs, so must be even
    pub depth: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Feed-forward expansion ratio
    pub mlp_ratio: f64,
    /// Number of video frames
    pub num_frames: usize,
    /// Conditioning mode
    #[serde(default)]
    pub conditioning: Conditioning,
    /// Predict a variance term alongside the noise estimate, doubling output channels
    #[serde(default)]
    pub predict_variance: bool,
    /// Attention strategy used by every block
    #[serde(default)]
    pub attention: AttentionStrategy,
    /// Attention weight dropout probability
    #[serde(default)]
    pub attn_drop: f64,
    /// Attention output projection dropout probability
    #[serde(default)]
    pub proj_drop: f64,
    /// Rotate query/key by their grid position before computing attention scores
    #[serde(default)]
    pub use_rotary: bool,
    /// Spatial size the rotary frequencies were pretrained on (defaults to `input_size`)
    #[serde(default)]
    pub pt_input_size: Option<(usize, usize)>,
    /// Frame count the rotary frequencies were pretrained on (defaults to `num_frames`)
    #[serde(default)]
    pub pt_num_frames: Option<usize>,
    /// Interpolate rotary frequencies from the pretrained grid onto the runtime grid
    #[serde(default = "default_true")]
    pub interpolate_rotary_freq: bool,
    /// Reserved key/value compression switch; accepted but not exercised
    #[serde(default)]
    pub compress_kv: bool,
}

fn default_patch_size_t() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for LatteConfig {
    fn default() -> Self {
        Self::xl_122()
    }
}

impl LatteConfig {
    fn preset(depth: usize, hidden_size: usize, num_heads: usize, patch_size: usize) -> Self {
        Self {
            input_size: (32, 32),
            patch_size,
            patch_size_t: 1,
            in_channels: 4,
            hidden_size,
            depth,
            num_heads,
            mlp_ratio: 4.0,
            num_frames: 16,
            conditioning: Conditioning::Unconditional,
            predict_variance: true,
            attention: AttentionStrategy::Dense,
            attn_drop: 0.0,
            proj_drop: 0.0,
            use_rotary: false,
            pt_input_size: None,
            pt_num_frames: None,
            interpolate_rotary_freq: true,
            compress_kv: false,
        }
    }

    // Size presets: XL/L/B/S crossed with 1-2-2 / 1-4-4 / 1-8-8 patch layouts
    // (temporal patch, spatial patch, spatial patch).

    pub fn xl_122() -> Self {
        Self::preset(28, 1152, 16, 2)
    }

    pub fn xl_144() -> Self {
        Self::preset(28, 1152, 16, 4)
    }

    pub fn xl_188() -> Self {
        Self::preset(28, 1152, 16, 8)
    }

    pub fn l_122() -> Self {
        Self::preset(24, 1024, 16, 2)
    }

    pub fn l_144() -> Self {
        Self::preset(24, 1024, 16, 4)
    }

    pub fn l_188() -> Self {
        Self::preset(24, 1024, 16, 8)
    }

    pub fn b_122() -> Self {
        Self::preset(12, 768, 12, 2)
    }

    pub fn b_144() -> Self {
        Self::preset(12, 768, 12, 4)
    }

    pub fn b_188() -> Self {
        Self::preset(12, 768, 12, 8)
    }

    pub fn s_122() -> Self {
        Self::preset(12, 384, 6, 2)
    }

    pub fn s_144() -> Self {
        Self::preset(12, 384, 6, 4)
    }

    pub fn s_188() -> Self {
        Self::preset(12, 384, 6, 8)
    }

    /// Output channels of the prediction
    pub fn out_channels(&self) -> usize {
        if self.predict_variance {
            self.in_channels * 2
        } else {
            self.in_channels
        }
    }

    /// Per-head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    /// Token grid (height, width) after spatial patching
    pub fn token_grid(&self) -> (usize, usize) {
        (
            self.input_size.0 / self.patch_size,
            self.input_size.1 / self.patch_size,
        )
    }

    /// Check every construction-time invariant
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_heads == 0 || self.hidden_size % self.num_heads != 0 {
            return Err(ConfigError::HiddenSize {
                hidden_size: self.hidden_size,
                num_heads: self.num_heads,
            });
        }
        if self.depth == 0 || self.depth % 2 != 0 {
            return Err(ConfigError::OddDepth(self.depth));
        }
        let (height, width) = self.input_size;
        if self.patch_size == 0 || height % self.patch_size != 0 || width % self.patch_size != 0 {
            return Err(ConfigError::InvalidInputSize {
                height,
                width,
                patch_size: self.patch_size,
            });
        }
        if self.patch_size_t == 0 || self.num_frames % self.patch_size_t != 0 {
            return Err(ConfigError::InvalidFrameCount {
                num_frames: self.num_frames,
                patch_size_t: self.patch_size_t,
            });
        }
        match self.conditioning {
            Conditioning::Unconditional => {}
            Conditioning::Class {
                num_classes,
                dropout_prob,
            } => {
                if num_classes == 0 {
                    return Err(ConfigError::InvalidConditioning(
                        "class conditioning needs at least one class".to_string(),
                    ));
                }
                if !(0.0..=1.0).contains(&dropout_prob) {
                    return Err(ConfigError::InvalidConditioning(format!(
                        "class dropout probability {dropout_prob} is outside [0, 1]"
                    )));
                }
            }
            Conditioning::Text { tokens, token_dim } => {
                if tokens == 0 || token_dim == 0 {
                    return Err(ConfigError::InvalidConditioning(format!(
                        "text conditioning needs a non-empty embedding, got ({tokens}, {token_dim})"
                    )));
                }
            }
        }
        if self.use_rotary && self.head_dim() % 4 != 0 {
            return Err(ConfigError::RotaryHeadDim(self.head_dim()));
        }
        if let Some((pt_h, pt_w)) = self.pt_input_size {
            if pt_h % self.patch_size != 0 || pt_w % self.patch_size != 0 {
                return Err(ConfigError::InvalidInputSize {
                    height: pt_h,
                    width: pt_w,
                    patch_size: self.patch_size,
                });
            }
        }
        backends::require(&self.attention)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("hidden size {hidden_size} is not divisible by {num_heads} attention heads")]
    HiddenSize {
        hidden_size: usize,
        num_heads: usize,
    },
    #[error("depth {0} must be even and non-zero: blocks run as spatial/temporal pairs")]
    OddDepth(usize),
    #[error("input size {height}x{width} is not divisible by patch size {patch_size}")]
    InvalidInputSize {
        height: usize,
        width: usize,
        patch_size: usize,
    },
    #[error("frame count {num_frames} is not divisible by temporal patch size {patch_size_t}")]
    InvalidFrameCount {
        num_frames: usize,
        patch_size_t: usize,
    },
    #[error("invalid conditioning: {0}")]
    InvalidConditioning(String),
    #[error("attention backend '{name}' is unavailable in this build: {reason}")]
    UnavailableBackend {
        name: &'static str,
        reason: &'static str,
    },
    #[error("rotary position encoding requires a head dim divisible by 4, got {0}")]
    RotaryHeadDim(usize),
}
