//! Rotary position embedding over a fixed 2D token grid
//!
//! Tables are precomputed per axis at construction: row positions fill the
//! first half of the rotated width, column positions the second half. A
//! fine-tune grid larger than the pretrain grid rescales positions so the
//! angle range stays that of the pretrain grid.

use candle_core::{D, Device, Result, Tensor};

/// Precomputed cos/sin tables for one token grid
#[derive(Clone)]
pub struct VisionRotaryEmbedding {
    /// (grid_h * grid_w, 2 * dim)
    cos: Tensor,
    /// (grid_h * grid_w, 2 * dim)
    sin: Tensor,
}

impl VisionRotaryEmbedding {
    /// `dim` is the width rotated per axis, so heads of width `2 * dim` are
    /// rotated in full. `ft_grid` is the grid actually attended over; when
    /// `None` it coincides with `pt_grid` and positions are plain indices.
    pub fn new(
        dim: usize,
        pt_grid: (usize, usize),
        ft_grid: Option<(usize, usize)>,
        theta: f64,
        device: &Device,
    ) -> Result<Self> {
        if dim % 2 != 0 {
            candle_core::bail!("rotary width must be even, got {dim}");
        }
        let (ft_h, ft_w) = ft_grid.unwrap_or(pt_grid);
        if ft_h == 0 || ft_w == 0 {
            candle_core::bail!("rotary grid ({ft_h}, {ft_w}) must be non-empty");
        }

        let n_freq = dim / 2;
        let freqs: Vec<f64> = (0..n_freq)
            .map(|i| 1.0 / theta.powf(2.0 * i as f64 / dim as f64))
            .collect();
        let pos_h: Vec<f64> = (0..ft_h)
            .map(|i| i as f64 * pt_grid.0 as f64 / ft_h as f64)
            .collect();
        let pos_w: Vec<f64> = (0..ft_w)
            .map(|j| j as f64 * pt_grid.1 as f64 / ft_w as f64)
            .collect();

        // Each frequency covers one adjacent pair, hence the doubled pushes
        let width = 2 * dim;
        let mut cos_data = Vec::with_capacity(ft_h * ft_w * width);
        let mut sin_data = Vec::with_capacity(ft_h * ft_w * width);
        for &h_pos in &pos_h {
            for &w_pos in &pos_w {
                for pos in [h_pos, w_pos] {
                    for &freq in &freqs {
                        let angle = pos * freq;
                        let (sin, cos) = (angle.sin() as f32, angle.cos() as f32);
                        cos_data.push(cos);
                        cos_data.push(cos);
                        sin_data.push(sin);
                        sin_data.push(sin);
                    }
                }
            }
        }

        let grid_len = ft_h * ft_w;
        Ok(Self {
            cos: Tensor::from_vec(cos_data, (grid_len, width), device)?,
            sin: Tensor::from_vec(sin_data, (grid_len, width), device)?,
        })
    }

    /// Number of tokens the tables cover
    pub fn grid_len(&self) -> Result<usize> {
        self.cos.dim(0)
    }

    /// Rotate `x` of shape (B, heads, N, 2 * dim) according to its positions.
    ///
    /// N must be a multiple of the grid length; longer sequences are viewed
    /// as groups of grid-sized segments that share the tables.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, heads, n, d) = x.dims4()?;
        let (grid_len, width) = self.cos.dims2()?;
        if d != width {
            candle_core::bail!("rotary width mismatch: tokens have {d}, tables have {width}");
        }
        if n % grid_len != 0 {
            candle_core::bail!(
                "sequence length {n} is not a multiple of the grid length {grid_len}"
            );
        }

        let cos = self.cos.to_dtype(x.dtype())?;
        let sin = self.sin.to_dtype(x.dtype())?;

        let groups = n / grid_len;
        let x = x.reshape((b, heads, groups, grid_len, d))?;
        let rotated = x
            .broadcast_mul(&cos)?
            .add(&rotate_pairs(&x)?.broadcast_mul(&sin)?)?;
        rotated.reshape((b, heads, n, d))
    }
}

/// Rotate adjacent pairs on the last axis: (x1, x2) -> (-x2, x1)
fn rotate_pairs(x: &Tensor) -> Result<Tensor> {
    let dims = x.dims();
    let d = dims[dims.len() - 1];
    let mut paired = dims.to_vec();
    paired.pop();
    paired.push(d / 2);
    paired.push(2);

    let x = x.reshape(paired)?;
    let x1 = x.narrow(D::Minus1, 0, 1)?.squeeze(D::Minus1)?;
    let x2 = x.narrow(D::Minus1, 1, 1)?.squeeze(D::Minus1)?;
    Tensor::stack(&[x2.neg()?, x1], D::Minus1)?.reshape(dims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;

    #[test]
    fn test_rotate_pairs() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (1, 1, 1, 4), &device)?;
        let rotated = rotate_pairs(&x)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(rotated, vec![-2.0, 1.0, -4.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_first_token_is_unrotated() -> Result<()> {
        let device = Device::Cpu;
        // Interpolated grid: positions are rescaled but (0, 0) stays at angle 0
        let rope = VisionRotaryEmbedding::new(8, (4, 6), Some((2, 3)), 10000.0, &device)?;
        assert_eq!(rope.grid_len()?, 6);

        let x = Tensor::randn(0f32, 1.0, (1, 2, 6, 16), &device)?;
        let rotated = rope.forward(&x)?;
        assert_eq!(rotated.dims(), x.dims());

        let first = x.i((.., .., 0, ..))?.flatten_all()?.to_vec1::<f32>()?;
        let rotated_first = rotated.i((.., .., 0, ..))?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(first, rotated_first);
        Ok(())
    }

    #[test]
    fn test_known_angle() -> Result<()> {
        let device = Device::Cpu;
        // dim = 2 gives a single unit frequency; token (0, 1) rotates its
        // column half by exactly one radian
        let rope = VisionRotaryEmbedding::new(2, (1, 2), None, 10000.0, &device)?;
        let x = Tensor::from_vec(
            vec![1.0f32, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0],
            (1, 1, 2, 4),
            &device,
        )?;
        let rotated = rope.forward(&x)?.i((0, 0))?.to_vec2::<f32>()?;

        assert_eq!(rotated[0], vec![1.0, 2.0, 3.0, 4.0]);
        let (sin, cos) = (1f32.sin(), 1f32.cos());
        let expected = [1.0, 2.0, 3.0 * cos - 4.0 * sin, 4.0 * cos + 3.0 * sin];
        for (got, want) in rotated[1].iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_grouped_sequences() -> Result<()> {
        let device = Device::Cpu;
        let rope = VisionRotaryEmbedding::new(4, (2, 2), None, 10000.0, &device)?;

        let group = Tensor::randn(0f32, 1.0, (1, 1, 4, 8), &device)?;
        let x = Tensor::cat(&[&group, &group], 2)?;
        let rotated = rope.forward(&x)?;
        assert_eq!(rotated.dims(), &[1, 1, 8, 8]);

        // Both grid-sized groups share the tables
        let first = rotated.i((.., .., 0..4, ..))?.flatten_all()?.to_vec1::<f32>()?;
        let second = rotated.i((.., .., 4..8, ..))?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(first, second);

        // A partial grid is rejected
        let bad = Tensor::randn(0f32, 1.0, (1, 1, 6, 8), &device)?;
        assert!(rope.forward(&bad).is_err());
        Ok(())
    }
}
