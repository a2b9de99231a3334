//! Patch embedding, fixed positional tables and conditioning embedders

use candle_core::{D, DType, Device, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Embedding, Linear, Module, VarBuilder, init::Init};

/// Xavier-uniform initializer for a linear map
pub(crate) fn xavier_uniform(fan_in: usize, fan_out: usize) -> Init {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Linear layer with an explicit weight initializer and a zero bias
pub(crate) fn linear_init(
    in_dim: usize,
    out_dim: usize,
    init: Init,
    vb: VarBuilder,
) -> Result<Linear> {
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

// ===========================================================================
// Fixed sine/cosine positional tables
// ===========================================================================

/// 1-D sinusoidal table of shape (length, embed_dim).
///
/// Each row holds `sin(pos * omega)` over the first half of the width and
/// `cos(pos * omega)` over the second, with geometrically spaced frequencies.
/// Pure function of its arguments; repeated calls are bit-identical.
pub fn sincos_pos_embed_1d(embed_dim: usize, length: usize, device: &Device) -> Result<Tensor> {
    if embed_dim % 2 != 0 {
        candle_core::bail!("1d sincos table needs an even width, got {embed_dim}");
    }
    let half = embed_dim / 2;
    let omega: Vec<f64> = (0..half)
        .map(|i| 1.0 / 10000f64.powf(i as f64 / half as f64))
        .collect();

    let mut data = Vec::with_capacity(length * embed_dim);
    for pos in 0..length {
        let pos = pos as f64;
        for &w in &omega {
            data.push((pos * w).sin() as f32);
        }
        for &w in &omega {
            data.push((pos * w).cos() as f32);
        }
    }
    Tensor::from_vec(data, (length, embed_dim), device)
}

/// 2-D sinusoidal table of shape (grid_h * grid_w, embed_dim), row-major.
///
/// The first half of the width encodes the column index, the second half the
/// row index, each as an independent 1-D sin/cos table.
pub fn sincos_pos_embed_2d(
    embed_dim: usize,
    grid_h: usize,
    grid_w: usize,
    device: &Device,
) -> Result<Tensor> {
    if embed_dim % 4 != 0 {
        candle_core::bail!("2d sincos table needs a width divisible by 4, got {embed_dim}");
    }
    let quarter = embed_dim / 4;
    let omega: Vec<f64> = (0..quarter)
        .map(|i| 1.0 / 10000f64.powf(i as f64 / quarter as f64))
        .collect();

    let mut data = Vec::with_capacity(grid_h * grid_w * embed_dim);
    for row in 0..grid_h {
        for col in 0..grid_w {
            for pos in [col as f64, row as f64] {
                for &w in &omega {
                    data.push((pos * w).sin() as f32);
                }
                for &w in &omega {
                    data.push((pos * w).cos() as f32);
                }
            }
        }
    }
    Tensor::from_vec(data, (grid_h * grid_w, embed_dim), device)
}

// ===========================================================================
// Patch embedding
// ===========================================================================

/// Spatial patch embedding for per-frame latents.
///
/// A strided convolution folds each non-overlapping `patch_size` square into
/// one token: (B, C, H, W) -> (B, N, D) with N enumerating patches row-major.
pub struct PatchEmbed {
    proj: Conv2d,
    patch_size: usize,
    num_patches: usize,
}

impl PatchEmbed {
    pub fn new(
        input_size: (usize, usize),
        patch_size: usize,
        in_channels: usize,
        hidden_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let grid = (input_size.0 / patch_size, input_size.1 / patch_size);
        // Initialized like a linear layer over the flattened patch
        let fan_in = in_channels * patch_size * patch_size;
        let weight = vb.get_with_hints(
            (hidden_size, in_channels, patch_size, patch_size),
            "proj.weight",
            xavier_uniform(fan_in, hidden_size),
        )?;
        let bias = vb.get_with_hints(hidden_size, "proj.bias", Init::Const(0.0))?;
        let cfg = Conv2dConfig {
            stride: patch_size,
            ..Default::default()
        };
        Ok(Self {
            proj: Conv2d::new(weight, Some(bias), cfg),
            patch_size,
            num_patches: grid.0 * grid.1,
        })
    }

    pub fn num_patches(&self) -> usize {
        self.num_patches
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (_b, _c, h, w) = x.dims4()?;
        if h % self.patch_size != 0 || w % self.patch_size != 0 {
            candle_core::bail!(
                "spatial size ({h}, {w}) is not divisible by patch size {}",
                self.patch_size
            );
        }
        let x = self.proj.forward(x)?;
        let (b, d, gh, gw) = x.dims4()?;
        // (B, D, H/p, W/p) -> (B, N, D)
        x.reshape((b, d, gh * gw))?.transpose(1, 2)?.contiguous()
    }
}

// ===========================================================================
// Timestep / label / text embedders
// ===========================================================================

/// Embeds scalar diffusion timesteps into hidden-width vectors
pub struct TimestepEmbedder {
    linear_1: Linear,
    linear_2: Linear,
    freq_dim: usize,
}

impl TimestepEmbedder {
    pub fn new(hidden_size: usize, freq_dim: usize, vb: VarBuilder) -> Result<Self> {
        let normal = Init::Randn {
            mean: 0.0,
            stdev: 0.02,
        };
        let linear_1 = linear_init(freq_dim, hidden_size, normal, vb.pp("mlp.0"))?;
        let linear_2 = linear_init(hidden_size, hidden_size, normal, vb.pp("mlp.2"))?;
        Ok(Self {
            linear_1,
            linear_2,
            freq_dim,
        })
    }

    /// Sinusoidal features of a (possibly fractional) timestep batch.
    ///
    /// Geometric frequencies `exp(-ln(10000) * i / half)`, cosine half first,
    /// zero-padded when the width is odd.
    fn timestep_embedding(&self, t: &Tensor) -> Result<Tensor> {
        let device = t.device();
        let half = self.freq_dim / 2;
        let freqs: Vec<f32> = (0..half)
            .map(|i| (-(10000f64.ln()) * i as f64 / half as f64).exp() as f32)
            .collect();
        let freqs = Tensor::from_vec(freqs, half, device)?;

        let args = t
            .to_dtype(DType::F32)?
            .unsqueeze(1)?
            .broadcast_mul(&freqs.unsqueeze(0)?)?;
        let embedding = Tensor::cat(&[args.cos()?, args.sin()?], D::Minus1)?;
        if self.freq_dim % 2 == 1 {
            let b = embedding.dim(0)?;
            let pad = Tensor::zeros((b, 1), embedding.dtype(), device)?;
            return Tensor::cat(&[embedding, pad], D::Minus1);
        }
        Ok(embedding)
    }

    pub fn forward(&self, t: &Tensor) -> Result<Tensor> {
        let t_freq = self.timestep_embedding(t)?;
        let t_freq = t_freq.to_dtype(self.linear_1.weight().dtype())?;
        let t_emb = self.linear_1.forward(&t_freq)?.silu()?;
        self.linear_2.forward(&t_emb)
    }
}

/// Embeds class labels, replacing them by an unconditional row for
/// classifier-free guidance training
pub struct LabelEmbedder {
    embedding_table: Embedding,
    num_classes: usize,
    dropout_prob: f64,
}

impl LabelEmbedder {
    pub fn new(
        num_classes: usize,
        hidden_size: usize,
        dropout_prob: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        // One extra row for the unconditional class when dropout can occur
        let rows = num_classes + usize::from(dropout_prob > 0.0);
        let weight = vb.get_with_hints(
            (rows, hidden_size),
            "embedding_table.weight",
            Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;
        Ok(Self {
            embedding_table: Embedding::new(weight, hidden_size),
            num_classes,
            dropout_prob,
        })
    }

    /// Replace labels by the unconditional index, either where `force_drop_ids`
    /// is 1 or independently with probability `dropout_prob`
    fn token_drop(&self, labels: &Tensor, force_drop_ids: Option<&Tensor>) -> Result<Tensor> {
        let drop = match force_drop_ids {
            Some(ids) => ids.to_dtype(DType::U32)?.eq(1u32)?,
            None => {
                let uniform = Tensor::rand(0f32, 1f32, labels.dims(), labels.device())?;
                uniform.lt(self.dropout_prob as f32)?
            }
        };
        let unconditional = Tensor::full(self.num_classes as u32, labels.dims(), labels.device())?;
        drop.where_cond(&unconditional, labels)
    }

    /// `labels`: (B,) class indices
    pub fn forward(
        &self,
        labels: &Tensor,
        train: bool,
        force_drop_ids: Option<&Tensor>,
    ) -> Result<Tensor> {
        let labels = labels.to_dtype(DType::U32)?;
        let use_dropout = self.dropout_prob > 0.0;
        let labels = if (train && use_dropout) || force_drop_ids.is_some() {
            self.token_drop(&labels, force_drop_ids)?
        } else {
            labels
        };
        self.embedding_table.forward(&labels)
    }
}

/// Projects a fixed-shape text embedding to the hidden width
pub struct TextProjection {
    proj: Linear,
    tokens: usize,
    token_dim: usize,
}

impl TextProjection {
    pub fn new(
        tokens: usize,
        token_dim: usize,
        hidden_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let in_dim = tokens * token_dim;
        let proj = linear_init(
            in_dim,
            hidden_size,
            xavier_uniform(in_dim, hidden_size),
            vb.pp("1"),
        )?;
        Ok(Self {
            proj,
            tokens,
            token_dim,
        })
    }

    /// `text_embedding`: (B, tokens, token_dim) -> (B, D)
    pub fn forward(&self, text_embedding: &Tensor) -> Result<Tensor> {
        let (b, tokens, token_dim) = text_embedding.dims3()?;
        if tokens != self.tokens || token_dim != self.token_dim {
            candle_core::bail!(
                "text embedding shape ({tokens}, {token_dim}) does not match the configured ({}, {})",
                self.tokens,
                self.token_dim
            );
        }
        let x = text_embedding.reshape((b, tokens * token_dim))?;
        self.proj.forward(&x.silu()?)
    }
}
