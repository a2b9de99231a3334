//! Transformer blocks conditioned through adaptive layer norm
//!
//! Blocks keep no learnable norm parameters; a conditioning vector supplies
//! shift, scale and residual gates per batch row. All of them start at zero,
//! so an untrained block passes its input through unchanged and an untrained
//! output head predicts zeros.

use candle_core::{D, DType, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder, init::Init};

use crate::attention::MultiHeadAttention;
use crate::config::LatteConfig;
use crate::embed::{linear_init, xavier_uniform};
use crate::rope::VisionRotaryEmbedding;

/// LayerNorm without learnable parameters (elementwise_affine=False)
#[derive(Debug, Clone)]
pub struct LayerNormNoParams {
    eps: f64,
}

impl LayerNormNoParams {
    pub fn new(eps: f64) -> Self {
        Self { eps }
    }
}

impl Module for LayerNormNoParams {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x_dtype = x.dtype();
        let internal_dtype = match x_dtype {
            DType::F16 | DType::BF16 => DType::F32,
            d => d,
        };

        let hidden_size = x.dim(D::Minus1)?;
        let x = x.to_dtype(internal_dtype)?;

        let mean = (x.sum_keepdim(D::Minus1)? / hidden_size as f64)?;
        let x = x.broadcast_sub(&mean)?;
        let variance = (x.sqr()?.sum_keepdim(D::Minus1)? / hidden_size as f64)?;
        let x = x.broadcast_div(&(variance + self.eps)?.sqrt()?)?;

        x.to_dtype(x_dtype)
    }
}

/// Shift and scale tokens per batch row: x * (1 + scale) + shift
pub fn modulate(x: &Tensor, shift: &Tensor, scale: &Tensor) -> Result<Tensor> {
    let scale = scale.unsqueeze(1)?;
    let shift = shift.unsqueeze(1)?;
    x.broadcast_mul(&scale.affine(1.0, 1.0)?)?
        .broadcast_add(&shift)
}

/// Two-layer feed-forward with a tanh-approximated GELU
pub struct FeedForward {
    fc1: Linear,
    fc2: Linear,
}

impl FeedForward {
    pub fn new(dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let fc1 = linear_init(dim, hidden_dim, xavier_uniform(dim, hidden_dim), vb.pp("fc1"))?;
        let fc2 = linear_init(hidden_dim, dim, xavier_uniform(hidden_dim, dim), vb.pp("fc2"))?;
        Ok(Self { fc1, fc2 })
    }
}

impl Module for FeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.fc2.forward(&self.fc1.forward(x)?.gelu()?)
    }
}

/// Pre-norm transformer block whose residual branches are modulated and
/// gated by the conditioning vector
pub struct TransformerBlock {
    norm1: LayerNormNoParams,
    attn: MultiHeadAttention,
    norm2: LayerNormNoParams,
    mlp: FeedForward,
    modulation: Linear,
}

impl TransformerBlock {
    pub fn new(
        config: &LatteConfig,
        rope: Option<VisionRotaryEmbedding>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let attn = MultiHeadAttention::new(config, rope, vb.pp("attn"))?;
        let mlp_hidden = (hidden_size as f64 * config.mlp_ratio) as usize;
        let mlp = FeedForward::new(hidden_size, mlp_hidden, vb.pp("mlp"))?;
        let modulation = linear_init(
            hidden_size,
            6 * hidden_size,
            Init::Const(0.0),
            vb.pp("adaLN_modulation.1"),
        )?;
        Ok(Self {
            norm1: LayerNormNoParams::new(1e-6),
            attn,
            norm2: LayerNormNoParams::new(1e-6),
            mlp,
            modulation,
        })
    }

    /// `x`: (B, N, D) tokens, `c`: (B, D) conditioning
    pub fn forward(
        &self,
        x: &Tensor,
        c: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let params = self.modulation.forward(&c.silu()?)?.chunk(6, D::Minus1)?;
        let (shift_msa, scale_msa, gate_msa) = (&params[0], &params[1], &params[2]);
        let (shift_mlp, scale_mlp, gate_mlp) = (&params[3], &params[4], &params[5]);

        let attn_in = modulate(&self.norm1.forward(x)?, shift_msa, scale_msa)?;
        let attn_out = self.attn.forward(&attn_in, mask, train)?;
        let x = (x + gate_msa.unsqueeze(1)?.broadcast_mul(&attn_out)?)?;

        let mlp_in = modulate(&self.norm2.forward(&x)?, shift_mlp, scale_mlp)?;
        let mlp_out = self.mlp.forward(&mlp_in)?;
        &x + gate_mlp.unsqueeze(1)?.broadcast_mul(&mlp_out)?
    }
}

/// Modulated projection from hidden tokens back to patch pixels
pub struct FinalLayer {
    norm: LayerNormNoParams,
    linear: Linear,
    modulation: Linear,
}

impl FinalLayer {
    pub fn new(hidden_size: usize, out_width: usize, vb: VarBuilder) -> Result<Self> {
        let linear = linear_init(hidden_size, out_width, Init::Const(0.0), vb.pp("linear"))?;
        let modulation = linear_init(
            hidden_size,
            2 * hidden_size,
            Init::Const(0.0),
            vb.pp("adaLN_modulation.1"),
        )?;
        Ok(Self {
            norm: LayerNormNoParams::new(1e-6),
            linear,
            modulation,
        })
    }

    pub fn forward(&self, x: &Tensor, c: &Tensor) -> Result<Tensor> {
        let params = self.modulation.forward(&c.silu()?)?.chunk(2, D::Minus1)?;
        let x = modulate(&self.norm.forward(x)?, &params[0], &params[1])?;
        self.linear.forward(&x)
    }
}
