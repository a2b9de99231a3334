//! Spatiotemporal transformer backbone
//!
//! Frames are patchified independently and attention alternates between two
//! axis-restricted views of the same token buffer: tokens within a frame
//! (spatial) and frames at a fixed token position (temporal). Joint
//! space-time attention is quadratic in both axes at once; the factorized
//! loop bounds cost to the sum of per-axis terms.

use candle_core::{DType, Result, Tensor};
use candle_nn::VarBuilder;

use crate::blocks::{FinalLayer, TransformerBlock};
use crate::config::{Conditioning, LatteConfig};
use crate::embed::{
    LabelEmbedder, PatchEmbed, TextProjection, TimestepEmbedder, sincos_pos_embed_1d,
    sincos_pos_embed_2d,
};
use crate::rope::VisionRotaryEmbedding;

/// One spatial/temporal block pair; the backbone consumes depth/2 of these
struct BlockPair {
    spatial: TransformerBlock,
    temporal: TransformerBlock,
}

/// Conditioning embedder resolved once at construction
enum CondEmbedder {
    Unconditional,
    Class(LabelEmbedder),
    Text(TextProjection),
}

/// Latte video diffusion backbone
pub struct Latte {
    config: LatteConfig,
    x_embedder: PatchEmbed,
    t_embedder: TimestepEmbedder,
    cond_embedder: CondEmbedder,
    /// (1, n, d) fixed spatial table
    pos_embed: Tensor,
    /// (1, f, d) fixed temporal table
    temp_embed: Tensor,
    blocks: Vec<BlockPair>,
    final_layer: FinalLayer,
}

impl Latte {
    pub fn new(config: &LatteConfig, vb: VarBuilder) -> Result<Self> {
        config.validate().map_err(candle_core::Error::wrap)?;
        let device = vb.device().clone();
        let hidden_size = config.hidden_size;
        let (grid_h, grid_w) = config.token_grid();

        let x_embedder = PatchEmbed::new(
            config.input_size,
            config.patch_size,
            config.in_channels,
            hidden_size,
            vb.pp("x_embedder"),
        )?;
        let t_embedder = TimestepEmbedder::new(hidden_size, 256, vb.pp("t_embedder"))?;
        let cond_embedder = match config.conditioning {
            Conditioning::Unconditional => CondEmbedder::Unconditional,
            Conditioning::Class {
                num_classes,
                dropout_prob,
            } => CondEmbedder::Class(LabelEmbedder::new(
                num_classes,
                hidden_size,
                dropout_prob,
                vb.pp("y_embedder"),
            )?),
            Conditioning::Text { tokens, token_dim } => CondEmbedder::Text(TextProjection::new(
                tokens,
                token_dim,
                hidden_size,
                vb.pp("text_embedding_projection"),
            )?),
        };

        let pos_embed = sincos_pos_embed_2d(hidden_size, grid_h, grid_w, &device)?
            .to_dtype(vb.dtype())?
            .unsqueeze(0)?;
        let temp_embed = sincos_pos_embed_1d(hidden_size, config.num_frames, &device)?
            .to_dtype(vb.dtype())?
            .unsqueeze(0)?;

        let (spatial_rope, temporal_rope) = if config.use_rotary {
            let rot_dim = config.head_dim() / 2;
            let pt_grid = match config.pt_input_size {
                Some((pt_h, pt_w)) => (pt_h / config.patch_size, pt_w / config.patch_size),
                None => (grid_h, grid_w),
            };
            let ft_grid = config
                .interpolate_rotary_freq
                .then_some((grid_h, grid_w));
            let spatial = VisionRotaryEmbedding::new(rot_dim, pt_grid, ft_grid, 10000.0, &device)?;

            let pt_frames = config.pt_num_frames.unwrap_or(config.num_frames);
            let ft_frames = config
                .interpolate_rotary_freq
                .then_some((config.num_frames, 1));
            let temporal =
                VisionRotaryEmbedding::new(rot_dim, (pt_frames, 1), ft_frames, 10000.0, &device)?;
            (Some(spatial), Some(temporal))
        } else {
            (None, None)
        };

        // Spatial blocks sit at even indices, temporal blocks at odd ones
        let vb_blocks = vb.pp("blocks");
        let mut blocks = Vec::with_capacity(config.depth / 2);
        for pair in 0..config.depth / 2 {
            let spatial =
                TransformerBlock::new(config, spatial_rope.clone(), vb_blocks.pp(2 * pair))?;
            let temporal =
                TransformerBlock::new(config, temporal_rope.clone(), vb_blocks.pp(2 * pair + 1))?;
            blocks.push(BlockPair { spatial, temporal });
        }

        let patch_volume = config.patch_size_t * config.patch_size * config.patch_size;
        let final_layer = FinalLayer::new(
            hidden_size,
            patch_volume * config.out_channels(),
            vb.pp("final_layer"),
        )?;

        Ok(Self {
            config: config.clone(),
            x_embedder,
            t_embedder,
            cond_embedder,
            pos_embed,
            temp_embed,
            blocks,
            final_layer,
        })
    }

    pub fn config(&self) -> &LatteConfig {
        &self.config
    }

    /// Denoise a video latent.
    ///
    /// `x`: (B, F, C, H, W) latent, `t`: (B,) timesteps. `label` must be set
    /// exactly when the model is class-conditioned, `text_embedding` exactly
    /// when it is text-conditioned. `attention_mask`: optional
    /// (B, F, H/p, W/p) binary token validity.
    pub fn forward(
        &self,
        x: &Tensor,
        t: &Tensor,
        label: Option<&Tensor>,
        text_embedding: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        self.forward_t(x, t, label, text_embedding, attention_mask, false)
    }

    /// `forward` with an explicit train flag controlling label/attention dropout
    pub fn forward_t(
        &self,
        x: &Tensor,
        t: &Tensor,
        label: Option<&Tensor>,
        text_embedding: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (b, f, c, h, w) = x.dims5()?;
        if f != self.config.num_frames {
            candle_core::bail!(
                "latent has {f} frames, the model was built for {}",
                self.config.num_frames
            );
        }
        if c != self.config.in_channels {
            candle_core::bail!(
                "latent has {c} channels, the model was built for {}",
                self.config.in_channels
            );
        }
        if (h, w) != self.config.input_size {
            candle_core::bail!(
                "latent is {h}x{w}, the model was built for {}x{}",
                self.config.input_size.0,
                self.config.input_size.1
            );
        }
        if t.dims1()? != b {
            candle_core::bail!("got {} timesteps for a batch of {b}", t.dims1()?);
        }

        let (grid_h, grid_w) = self.config.token_grid();
        let n = grid_h * grid_w;
        let d = self.config.hidden_size;

        let (spatial_mask, temporal_mask) = match attention_mask {
            Some(mask) => {
                let (spatial, temporal) = self.pairwise_masks(mask, b, f)?;
                (Some(spatial), Some(temporal))
            }
            None => (None, None),
        };

        // (B, F, C, H, W) -> (B*F, C, H, W) -> (B*F, N, D), plus spatial table
        let x = x.reshape((b * f, c, h, w))?;
        let mut x = self
            .x_embedder
            .forward(&x)?
            .broadcast_add(&self.pos_embed)?;

        // One conditioning vector per batch row, shared by every pass
        let t_emb = self.t_embedder.forward(t)?;
        let cond = match (&self.cond_embedder, label, text_embedding) {
            (CondEmbedder::Unconditional, None, None) => t_emb,
            (CondEmbedder::Class(embedder), Some(labels), None) => {
                (&t_emb + embedder.forward(labels, train, None)?)?
            }
            (CondEmbedder::Text(projection), None, Some(text)) => {
                (&t_emb + projection.forward(text)?)?
            }
            _ => candle_core::bail!("conditioning inputs do not match the configured mode"),
        };
        let c_spatial = repeat_rows(&cond, f)?;
        let c_temporal = repeat_rows(&cond, n)?;

        for (index, pair) in self.blocks.iter().enumerate() {
            x = pair
                .spatial
                .forward(&x, &c_spatial, spatial_mask.as_ref(), train)?;

            // (B*F, N, D) -> (B*N, F, D): frames become the sequence axis
            x = x
                .reshape((b, f, n, d))?
                .transpose(1, 2)?
                .contiguous()?
                .reshape((b * n, f, d))?;
            if index == 0 {
                x = x.broadcast_add(&self.temp_embed)?;
            }

            x = pair
                .temporal
                .forward(&x, &c_temporal, temporal_mask.as_ref(), train)?;

            // (B*N, F, D) -> (B*F, N, D)
            x = x
                .reshape((b, n, f, d))?
                .transpose(1, 2)?
                .contiguous()?
                .reshape((b * f, n, d))?;
        }

        let x = self.final_layer.forward(&x, &c_spatial)?;
        let x = self.unpatchify(&x)?;
        x.reshape((b, f, self.config.out_channels(), h, w))
    }

    /// Classifier-free guided forward pass.
    ///
    /// The batch halves stand for the conditional and unconditional runs;
    /// the caller-provided second half of `x` is discarded and replaced by a
    /// copy of the first so both predictions see the same latent. Guidance
    /// mixes only the first `in_channels` output channels; a variance slice
    /// passes through untouched.
    pub fn forward_with_cfg(
        &self,
        x: &Tensor,
        t: &Tensor,
        label: Option<&Tensor>,
        cfg_scale: f64,
        text_embedding: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let b = x.dim(0)?;
        if b == 0 || b % 2 != 0 {
            candle_core::bail!("guided forward needs an even batch, got {b}");
        }
        let half = x.narrow(0, 0, b / 2)?;
        let combined = Tensor::cat(&[&half, &half], 0)?;
        let out = self.forward(&combined, t, label, text_embedding, attention_mask)?;

        let in_channels = self.config.in_channels;
        let out_channels = self.config.out_channels();
        let guided = out.narrow(2, 0, in_channels)?;
        let cond = guided.narrow(0, 0, b / 2)?;
        let uncond = guided.narrow(0, b / 2, b / 2)?;
        let mixed = classifier_free_mix(&cond, &uncond, cfg_scale)?;
        let guided = Tensor::cat(&[&mixed, &mixed], 0)?;

        if out_channels > in_channels {
            let rest = out.narrow(2, in_channels, out_channels - in_channels)?;
            Tensor::cat(&[&guided, &rest], 2)
        } else {
            Ok(guided)
        }
    }

    /// Derive the per-pass pairwise masks from a (B, F, H/p, W/p) token mask
    fn pairwise_masks(&self, mask: &Tensor, b: usize, f: usize) -> Result<(Tensor, Tensor)> {
        let (grid_h, grid_w) = self.config.token_grid();
        let n = grid_h * grid_w;
        let dims = mask.dims4()?;
        if dims != (b, f, grid_h, grid_w) {
            candle_core::bail!(
                "attention mask shape {dims:?} does not match (batch, frames, token grid) = ({b}, {f}, {grid_h}, {grid_w})"
            );
        }
        let valid = mask.to_dtype(DType::F32)?.reshape((b, f, n))?;

        // Tokens within a frame attend iff both are valid
        let rows = valid.reshape((b * f, n, 1))?;
        let spatial = rows.matmul(&rows.transpose(1, 2)?)?.unsqueeze(1)?;

        // Frames at a fixed token position
        let cols = valid
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b * n, f, 1))?;
        let temporal = cols.matmul(&cols.transpose(1, 2)?)?.unsqueeze(1)?;
        Ok((spatial, temporal))
    }

    /// (B*F, N, patch_volume * out_channels) -> (B*F, out_channels, H, W)
    fn unpatchify(&self, x: &Tensor) -> Result<Tensor> {
        if self.config.patch_size_t != 1 {
            candle_core::bail!(
                "temporal patch size {} has no inverse under the frame-merged layout",
                self.config.patch_size_t
            );
        }
        let p = self.config.patch_size;
        let out_channels = self.config.out_channels();
        let (grid_h, grid_w) = self.config.token_grid();
        let (bf, n, _) = x.dims3()?;
        if n != grid_h * grid_w {
            candle_core::bail!(
                "cannot unpatchify {n} tokens into a {grid_h}x{grid_w} grid"
            );
        }

        let x = x.reshape((bf, grid_h, grid_w, p, p, out_channels))?;
        let x = x.permute((0, 5, 1, 3, 2, 4))?;
        x.contiguous()?
            .reshape((bf, out_channels, grid_h * p, grid_w * p))
    }
}

/// Mix conditional and unconditional predictions:
/// `uncond + cfg_scale * (cond - uncond)`
pub fn classifier_free_mix(cond: &Tensor, uncond: &Tensor, cfg_scale: f64) -> Result<Tensor> {
    uncond + ((cond - uncond)? * cfg_scale)?
}

/// Repeat each row `count` times consecutively: (B, D) -> (B * count, D)
fn repeat_rows(x: &Tensor, count: usize) -> Result<Tensor> {
    let (b, d) = x.dims2()?;
    x.unsqueeze(1)?
        .broadcast_as((b, count, d))?
        .contiguous()?
        .reshape((b * count, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, IndexOp};
    use candle_nn::{VarBuilder, VarMap};

    fn small_config() -> LatteConfig {
        LatteConfig {
            input_size: (32, 32),
            patch_size: 2,
            in_channels: 4,
            hidden_size: 64,
            depth: 2,
            num_heads: 4,
            mlp_ratio: 4.0,
            num_frames: 4,
            predict_variance: false,
            ..LatteConfig::default()
        }
    }

    fn randomize(varmap: &VarMap, device: &Device) -> Result<()> {
        for var in varmap.all_vars() {
            let noise = Tensor::rand(-0.05f32, 0.05, var.dims(), device)?;
            var.set(&noise)?;
        }
        Ok(())
    }

    fn assert_close(a: &Tensor, b: &Tensor, tolerance: f32) -> Result<()> {
        let gap = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(gap < tolerance, "tensors differ by {gap}");
        Ok(())
    }

    #[test]
    fn test_fresh_backbone_outputs_zero() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = Latte::new(&small_config(), vb)?;
        let x = Tensor::zeros((2, 4, 4, 32, 32), DType::F32, &device)?;
        let t = Tensor::zeros(2, DType::F32, &device)?;

        let out = model.forward(&x, &t, None, None, None)?;
        assert_eq!(out.dims(), &[2, 4, 4, 32, 32]);
        // Zero gates and a zero final projection silence a fresh network
        assert_eq!(out.abs()?.max_all()?.to_scalar::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn test_variance_prediction_doubles_channels() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = LatteConfig {
            predict_variance: true,
            ..small_config()
        };
        let model = Latte::new(&config, vb)?;
        let x = Tensor::randn(0f32, 1.0, (2, 4, 4, 32, 32), &device)?;
        let t = Tensor::from_vec(vec![10f32, 500.0], 2, &device)?;

        let out = model.forward(&x, &t, None, None, None)?;
        assert_eq!(out.dims(), &[2, 4, 8, 32, 32]);
        Ok(())
    }

    #[test]
    fn test_all_ones_mask_is_a_no_op() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = Latte::new(&small_config(), vb)?;
        randomize(&varmap, &device)?;

        let x = Tensor::randn(0f32, 1.0, (2, 4, 4, 32, 32), &device)?;
        let t = Tensor::from_vec(vec![3f32, 7.0], 2, &device)?;
        let mask = Tensor::ones((2, 4, 16, 16), DType::F32, &device)?;

        let masked = model.forward(&x, &t, None, None, Some(&mask))?;
        let unmasked = model.forward(&x, &t, None, None, None)?;
        assert_eq!(
            masked.flatten_all()?.to_vec1::<f32>()?,
            unmasked.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn test_rotary_backbone() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        // Pretrained on a larger grid than the runtime one
        let config = LatteConfig {
            use_rotary: true,
            pt_input_size: Some((64, 64)),
            ..small_config()
        };
        let model = Latte::new(&config, vb)?;
        randomize(&varmap, &device)?;

        let x = Tensor::randn(0f32, 1.0, (2, 4, 4, 32, 32), &device)?;
        let t = Tensor::from_vec(vec![1f32, 2.0], 2, &device)?;
        let out = model.forward(&x, &t, None, None, None)?;
        assert_eq!(out.dims(), &[2, 4, 4, 32, 32]);
        Ok(())
    }

    #[test]
    fn test_cfg_scale_one_is_the_conditional_prediction() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = LatteConfig {
            input_size: (16, 16),
            num_frames: 2,
            hidden_size: 32,
            predict_variance: true,
            conditioning: Conditioning::Class {
                num_classes: 10,
                dropout_prob: 0.1,
            },
            ..small_config()
        };
        let model = Latte::new(&config, vb)?;
        randomize(&varmap, &device)?;

        let x = Tensor::randn(0f32, 1.0, (2, 2, 4, 16, 16), &device)?;
        let t = Tensor::from_vec(vec![0.5f32, 0.5], 2, &device)?;
        // Conditional class in the first half, the unconditional row in the second
        let labels = Tensor::from_vec(vec![3u32, 10], 2, &device)?;

        let guided = model.forward_with_cfg(&x, &t, Some(&labels), 1.0, None, None)?;
        assert_eq!(guided.dims(), &[2, 2, 8, 16, 16]);

        let half = x.narrow(0, 0, 1)?;
        let combined = Tensor::cat(&[&half, &half], 0)?;
        let plain = model.forward(&combined, &t, Some(&labels), None, None)?;
        let cond = plain.narrow(2, 0, 4)?.narrow(0, 0, 1)?;
        let expected_guided = Tensor::cat(&[&cond, &cond], 0)?;
        let expected = Tensor::cat(&[&expected_guided, &plain.narrow(2, 4, 4)?], 2)?;

        assert_close(&guided, &expected, 1e-5)?;
        Ok(())
    }

    #[test]
    fn test_classifier_free_mix_endpoints() -> Result<()> {
        let device = Device::Cpu;
        let cond = Tensor::randn(0f32, 1.0, (2, 4), &device)?;
        let uncond = Tensor::randn(0f32, 1.0, (2, 4), &device)?;

        let at_zero = classifier_free_mix(&cond, &uncond, 0.0)?;
        assert_eq!(
            at_zero.flatten_all()?.to_vec1::<f32>()?,
            uncond.flatten_all()?.to_vec1::<f32>()?
        );

        let at_one = classifier_free_mix(&cond, &uncond, 1.0)?;
        assert_close(&at_one, &cond, 1e-6)?;
        Ok(())
    }

    #[test]
    fn test_conditioning_inputs_must_match_the_mode() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let unconditional = Latte::new(&small_config(), vb.pp("unconditional"))?;
        let class_config = LatteConfig {
            conditioning: Conditioning::Class {
                num_classes: 10,
                dropout_prob: 0.1,
            },
            ..small_config()
        };
        let class_conditioned = Latte::new(&class_config, vb.pp("class"))?;

        let x = Tensor::zeros((2, 4, 4, 32, 32), DType::F32, &device)?;
        let t = Tensor::zeros(2, DType::F32, &device)?;
        let labels = Tensor::from_vec(vec![1u32, 2], 2, &device)?;

        assert!(unconditional.forward(&x, &t, Some(&labels), None, None).is_err());
        assert!(class_conditioned.forward(&x, &t, None, None, None).is_err());
        assert!(
            class_conditioned
                .forward(&x, &t, Some(&labels), None, None)
                .is_ok()
        );
        Ok(())
    }

    #[test]
    fn test_shape_violations_fail() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = Latte::new(&small_config(), vb)?;
        let t = Tensor::zeros(2, DType::F32, &device)?;

        // Wrong frame count
        let x = Tensor::zeros((2, 3, 4, 32, 32), DType::F32, &device)?;
        assert!(model.forward(&x, &t, None, None, None).is_err());

        // Wrong channel count
        let x = Tensor::zeros((2, 4, 3, 32, 32), DType::F32, &device)?;
        assert!(model.forward(&x, &t, None, None, None).is_err());

        // Wrong spatial size
        let x = Tensor::zeros((2, 4, 4, 16, 32), DType::F32, &device)?;
        assert!(model.forward(&x, &t, None, None, None).is_err());

        // Wrong mask grid
        let x = Tensor::zeros((2, 4, 4, 32, 32), DType::F32, &device)?;
        let mask = Tensor::ones((2, 4, 32, 32), DType::F32, &device)?;
        assert!(model.forward(&x, &t, None, None, Some(&mask)).is_err());

        // Odd batch for guidance
        let x = Tensor::zeros((3, 4, 4, 32, 32), DType::F32, &device)?;
        let t3 = Tensor::zeros(3, DType::F32, &device)?;
        assert!(model.forward_with_cfg(&x, &t3, None, 4.0, None, None).is_err());
        Ok(())
    }

    #[test]
    fn test_pairwise_masks() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = LatteConfig {
            input_size: (4, 4),
            num_frames: 2,
            hidden_size: 32,
            ..small_config()
        };
        let model = Latte::new(&config, vb)?;

        // Token (1, 1) of frame 1 is padding
        let mut keep = vec![1f32; 2 * 2 * 2];
        keep[7] = 0.0;
        let mask = Tensor::from_vec(keep, (1, 2, 2, 2), &device)?;

        let (spatial, temporal) = model.pairwise_masks(&mask, 1, 2)?;
        assert_eq!(spatial.dims(), &[2, 1, 4, 4]);
        assert_eq!(temporal.dims(), &[4, 1, 2, 2]);

        // Frame 0 admits every pair; frame 1 blocks row and column 3
        assert_eq!(spatial.i(0)?.min_all()?.to_scalar::<f32>()?, 1.0);
        let frame1 = spatial.i((1, 0))?.to_vec2::<f32>()?;
        for token in 0..4 {
            assert_eq!(frame1[3][token], 0.0);
            assert_eq!(frame1[token][3], 0.0);
            if token < 3 {
                assert_eq!(frame1[token][token], 1.0);
            }
        }

        // Token 3 sees frame 0 only
        let token3 = temporal.i((3, 0))?.to_vec2::<f32>()?;
        assert_eq!(token3, vec![vec![1.0, 0.0], vec![0.0, 0.0]]);
        let token0 = temporal.i((0, 0))?.to_vec2::<f32>()?;
        assert_eq!(token0, vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        Ok(())
    }

    #[test]
    fn test_unpatchify_round_trip_layout() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = LatteConfig {
            input_size: (4, 6),
            num_frames: 2,
            hidden_size: 32,
            ..small_config()
        };
        let model = Latte::new(&config, vb)?;

        // Tokens enumerate the grid row-major; each carries its own patch
        let tokens = Tensor::randn(0f32, 1.0, (2, 6, 2 * 2 * 4), &device)?;
        let frames = model.unpatchify(&tokens)?;
        assert_eq!(frames.dims(), &[2, 4, 4, 6]);

        // Pixel (0, 0) of channel 0 comes from token 0, entry 0
        let first_pixel = frames.i((0, 0, 0, 0))?.to_scalar::<f32>()?;
        let first_entry = tokens.i((0, 0, 0))?.to_scalar::<f32>()?;
        assert_eq!(first_pixel, first_entry);
        Ok(())
    }
}
