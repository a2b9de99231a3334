//! Multi-head self-attention with strategy dispatch
//!
//! One module serves both token axes of the transformer; the caller decides
//! what a sequence means by how it folds the batch. Strategies without an
//! available backend are rejected when the module is built, never silently
//! swapped at forward time.

use candle_core::{D, DType, Device, IndexOp, Result, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder};

use crate::backends;
use crate::config::{AttentionStrategy, LatteConfig};
use crate::embed::{linear_init, xavier_uniform};
use crate::rope::VisionRotaryEmbedding;

// Flash Attention wrapper for CUDA
#[cfg(feature = "flash-attn")]
fn flash_attn(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    softmax_scale: f32,
    causal: bool,
) -> Result<Tensor> {
    candle_flash_attn::flash_attn(q, k, v, softmax_scale, causal)
}

#[cfg(not(feature = "flash-attn"))]
fn flash_attn(_: &Tensor, _: &Tensor, _: &Tensor, _: f32, _: bool) -> Result<Tensor> {
    candle_core::bail!("flash-attn feature not enabled, compile with '--features flash-attn'")
}

/// Multi-head self-attention over one token axis
pub struct MultiHeadAttention {
    qkv: Linear,
    proj: Linear,
    attn_drop: Dropout,
    proj_drop: Dropout,
    rope: Option<VisionRotaryEmbedding>,
    strategy: AttentionStrategy,
    num_heads: usize,
    scale: f64,
}

impl MultiHeadAttention {
    pub fn new(
        config: &LatteConfig,
        rope: Option<VisionRotaryEmbedding>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let dim = config.hidden_size;
        if config.num_heads == 0 || dim % config.num_heads != 0 {
            candle_core::bail!(
                "hidden size {dim} is not divisible by {} attention heads",
                config.num_heads
            );
        }
        backends::require(&config.attention).map_err(candle_core::Error::wrap)?;

        let head_dim = dim / config.num_heads;
        let qkv = linear_init(dim, 3 * dim, xavier_uniform(dim, 3 * dim), vb.pp("qkv"))?;
        let proj = linear_init(dim, dim, xavier_uniform(dim, dim), vb.pp("proj"))?;
        Ok(Self {
            qkv,
            proj,
            attn_drop: Dropout::new(config.attn_drop as f32),
            proj_drop: Dropout::new(config.proj_drop as f32),
            rope,
            strategy: config.attention,
            num_heads: config.num_heads,
            scale: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    /// `x`: (B, N, C). `mask`: optional binary keep mask broadcastable to
    /// (B, heads, N, N), 1 = attend, 0 = drop.
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let (b, n, c) = x.dims3()?;
        let head_dim = c / self.num_heads;

        let qkv = self
            .qkv
            .forward(x)?
            .reshape((b, n, 3, self.num_heads, head_dim))?
            .permute((2, 0, 3, 1, 4))?
            .contiguous()?;
        let (q, k, v) = (qkv.i(0)?, qkv.i(1)?, qkv.i(2)?);

        let (q, k) = match &self.rope {
            Some(rope) => (rope.forward(&q)?, rope.forward(&k)?),
            None => (q, k),
        };

        let out = match self.strategy {
            AttentionStrategy::Dense => self.attention_dense(&q, &k, &v, mask, train)?,
            AttentionStrategy::Fused => self.attention_fused(&q, &k, &v, mask, train)?,
            AttentionStrategy::LinearApprox { .. } | AttentionStrategy::Ring { .. } => {
                candle_core::bail!("the configured attention strategy has no available backend")
            }
        };

        let out = out.transpose(1, 2)?.contiguous()?.reshape((b, n, c))?;
        self.proj_drop.forward(&self.proj.forward(&out)?, train)
    }

    /// Scaled dot-product attention with an explicit softmax
    fn attention_dense(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let mut attn = (q.matmul(&k.transpose(2, 3)?)? * self.scale)?;

        if let Some(m) = mask {
            attn = attn.broadcast_add(&mask_to_bias(m, attn.dtype())?)?;
        }
        let mut attn = candle_nn::ops::softmax_last_dim(&attn)?;

        if let Some(m) = mask {
            // A row with every key disallowed softmaxes to a uniform
            // distribution; zero it so such queries contribute nothing
            let row_valid = m.to_dtype(attn.dtype())?.max_keepdim(D::Minus1)?;
            attn = attn.broadcast_mul(&row_valid)?;
        }

        let nan = attn.ne(&attn)?;
        if nan.to_dtype(DType::F32)?.sum_all()?.to_scalar::<f32>()? > 0.0 {
            tracing::warn!("attention weights contained nan, zeroing them");
            attn = nan.where_cond(&attn.zeros_like()?, &attn)?;
        }

        let attn = self.attn_drop.forward(&attn, train)?;
        attn.matmul(v)
    }

    /// Fused kernel when one is compiled in and the mask admits every pair;
    /// anything else goes through the dense path
    fn attention_fused(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        if let Some(m) = mask {
            if !mask_all_valid(m)? {
                return self.attention_dense(q, k, v, mask, train);
            }
        }

        let use_kernel = cfg!(feature = "flash-attn") && matches!(q.device(), Device::Cuda(_));
        if use_kernel {
            // Kernel layout is (B, N, heads, head_dim)
            let q = q.transpose(1, 2)?;
            let k = k.transpose(1, 2)?;
            let v = v.transpose(1, 2)?;
            let out = flash_attn(&q, &k, &v, self.scale as f32, false)?;
            out.transpose(1, 2)
        } else {
            self.attention_dense(q, k, v, None, train)
        }
    }
}

/// Convert a binary keep mask into an additive score bias: 1 -> 0, 0 -> a
/// large negative value that stays finite in the working dtype
fn mask_to_bias(mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let neg = match dtype {
        DType::F16 | DType::BF16 => 1e4,
        _ => 1e8,
    };
    mask.to_dtype(dtype)?.affine(neg, -neg)
}

/// A mask of all ones admits every pair, letting fused kernels skip it
fn mask_all_valid(mask: &Tensor) -> Result<bool> {
    let min = mask.to_dtype(DType::F32)?.min_all()?.to_scalar::<f32>()?;
    Ok(min >= 1.0)
}
