//! Built-in seeded convolutional feature bank.
//!
//! A deterministic stack of 3x3 conv + ReLU blocks with 2x2 average pooling
//! between blocks. Weights are drawn once from a seeded RNG at construction,
//! so the same seed always yields the same model. This is not a pretrained
//! network; it exists so the engine can be exercised end to end (real
//! activations, real gradients) without shipping weights.

use crate::error::{RenderError, Result};
use crate::model::Model;
use ndarray::{Array1, Array3, Array4};
use rand::{Rng, SeedableRng};

const KERNEL: usize = 3;

/// One named conv + ReLU stage.
pub(crate) struct ConvBlock {
    pub(crate) name: String,
    /// `(kh, kw, c_in, c_out)` kernel, stride 1, zero-padded "same".
    pub(crate) weights: Array4<f32>,
    pub(crate) bias: Array1<f32>,
}

/// A stack of named conv blocks implementing [`Model`].
///
/// Forward evaluation runs blocks in order, average-pooling 2x2 between
/// them, and stops at the requested layer. The named activation is the
/// post-ReLU map of that block.
pub struct ConvStack {
    blocks: Vec<ConvBlock>,
}

impl ConvStack {
    /// Build a stack from `(layer_name, channel_count)` pairs. The first
    /// block reads 3 input channels (RGB).
    pub fn new(layers: &[(&str, usize)], seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut c_in = 3;
        let mut blocks = Vec::with_capacity(layers.len());

        for (name, c_out) in layers {
            let scale = (2.0 / (KERNEL * KERNEL * c_in) as f32).sqrt();
            let weights = Array4::from_shape_fn((KERNEL, KERNEL, c_in, *c_out), |_| {
                rng.gen_range(-scale..scale)
            });
            // Small positive bias keeps early activations alive.
            let bias = Array1::from_shape_fn(*c_out, |_| rng.gen_range(0.0..0.1));
            blocks.push(ConvBlock {
                name: (*name).to_string(),
                weights,
                bias,
            });
            c_in = *c_out;
        }

        Self { blocks }
    }

    /// The demo stack wired by the CLI: a scaled-down set of the advertised
    /// layer names.
    pub fn demo(seed: u64) -> Self {
        Self::new(
            &[
                ("conv2d0", 16),
                ("mixed3a", 32),
                ("mixed4a", 64),
                ("mixed5b", 64),
            ],
            seed,
        )
    }

    #[cfg(test)]
    pub(crate) fn from_blocks(blocks: Vec<ConvBlock>) -> Self {
        Self { blocks }
    }

    fn block_index(&self, layer_id: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.name == layer_id)
    }

    /// Run forward up to and including `target`, returning the post-ReLU
    /// activation of every block on the path (last entry is the target's).
    fn forward_path(&self, input: &Array3<f32>, target: usize) -> Vec<Array3<f32>> {
        let mut acts = Vec::with_capacity(target + 1);
        let mut x = input.clone();
        for (i, block) in self.blocks[..=target].iter().enumerate() {
            if i > 0 {
                x = avg_pool(&x);
            }
            let mut out = conv_same(&x, &block.weights, &block.bias);
            out.mapv_inplace(|v| v.max(0.0));
            acts.push(out.clone());
            x = out;
        }
        acts
    }
}

impl Model for ConvStack {
    fn layer_channels(&self, layer_id: &str) -> Option<usize> {
        self.block_index(layer_id)
            .map(|i| self.blocks[i].bias.len())
    }

    fn activations(&self, input: &Array3<f32>, layer_id: &str) -> Result<Array3<f32>> {
        let target = self
            .block_index(layer_id)
            .ok_or_else(|| RenderError::unknown_layer(layer_id))?;
        let mut acts = self.forward_path(input, target);
        Ok(acts.pop().expect("path includes the target block"))
    }

    fn activation_grad(
        &self,
        input: &Array3<f32>,
        layer_id: &str,
        cotangent: &Array3<f32>,
    ) -> Result<Array3<f32>> {
        let target = self
            .block_index(layer_id)
            .ok_or_else(|| RenderError::unknown_layer(layer_id))?;
        let acts = self.forward_path(input, target);

        if cotangent.dim() != acts[target].dim() {
            return Err(RenderError::ShapeMismatch {
                expected: format!("{:?}", acts[target].dim()),
                actual: format!("{:?}", cotangent.dim()),
            });
        }

        // Walk the chain backwards: ReLU mask, conv transpose, pool adjoint.
        let mut grad = cotangent.clone();
        for i in (0..=target).rev() {
            ndarray::Zip::from(&mut grad)
                .and(&acts[i])
                .for_each(|g, &a| {
                    if a <= 0.0 {
                        *g = 0.0;
                    }
                });
            let in_shape = if i == 0 {
                input.dim()
            } else {
                pooled_shape(acts[i - 1].dim())
            };
            grad = conv_grad_input(&grad, &self.blocks[i].weights, in_shape);
            if i > 0 {
                grad = avg_pool_adjoint(&grad, acts[i - 1].dim());
            }
        }
        Ok(grad)
    }
}

/// 3x3 same-padding convolution, stride 1.
fn conv_same(input: &Array3<f32>, weights: &Array4<f32>, bias: &Array1<f32>) -> Array3<f32> {
    let (h, w, c_in) = input.dim();
    let (_, _, _, c_out) = weights.dim();
    let pad = KERNEL / 2;
    let mut out = Array3::zeros((h, w, c_out));

    for y in 0..h {
        for x in 0..w {
            for co in 0..c_out {
                let mut acc = bias[co];
                for dy in 0..KERNEL {
                    let iy = y + dy;
                    if iy < pad || iy - pad >= h {
                        continue;
                    }
                    for dx in 0..KERNEL {
                        let ix = x + dx;
                        if ix < pad || ix - pad >= w {
                            continue;
                        }
                        for ci in 0..c_in {
                            acc += input[[iy - pad, ix - pad, ci]] * weights[[dy, dx, ci, co]];
                        }
                    }
                }
                out[[y, x, co]] = acc;
            }
        }
    }
    out
}

/// Transpose of [`conv_same`] with respect to its input: scatter each output
/// gradient back through the taps that produced it.
fn conv_grad_input(
    grad_out: &Array3<f32>,
    weights: &Array4<f32>,
    in_shape: (usize, usize, usize),
) -> Array3<f32> {
    let (h, w, c_out) = grad_out.dim();
    let (_, _, c_in, _) = weights.dim();
    let pad = KERNEL / 2;
    let mut grad_in = Array3::zeros(in_shape);

    for y in 0..h {
        for x in 0..w {
            for co in 0..c_out {
                let g = grad_out[[y, x, co]];
                if g == 0.0 {
                    continue;
                }
                for dy in 0..KERNEL {
                    let iy = y + dy;
                    if iy < pad || iy - pad >= in_shape.0 {
                        continue;
                    }
                    for dx in 0..KERNEL {
                        let ix = x + dx;
                        if ix < pad || ix - pad >= in_shape.1 {
                            continue;
                        }
                        for ci in 0..c_in {
                            grad_in[[iy - pad, ix - pad, ci]] += g * weights[[dy, dx, ci, co]];
                        }
                    }
                }
            }
        }
    }
    grad_in
}

fn pooled_shape((h, w, c): (usize, usize, usize)) -> (usize, usize, usize) {
    if h < 2 || w < 2 {
        (h, w, c)
    } else {
        (h / 2, w / 2, c)
    }
}

/// 2x2 average pool, stride 2. Identity when either spatial dim is below 2;
/// a trailing odd row/column is dropped.
fn avg_pool(input: &Array3<f32>) -> Array3<f32> {
    let (h, w, c) = input.dim();
    if h < 2 || w < 2 {
        return input.clone();
    }
    let (ph, pw) = (h / 2, w / 2);
    let mut out = Array3::zeros((ph, pw, c));
    for y in 0..ph {
        for x in 0..pw {
            for ch in 0..c {
                let sum = input[[2 * y, 2 * x, ch]]
                    + input[[2 * y, 2 * x + 1, ch]]
                    + input[[2 * y + 1, 2 * x, ch]]
                    + input[[2 * y + 1, 2 * x + 1, ch]];
                out[[y, x, ch]] = sum * 0.25;
            }
        }
    }
    out
}

fn avg_pool_adjoint(grad_out: &Array3<f32>, in_shape: (usize, usize, usize)) -> Array3<f32> {
    let (h, w, _) = in_shape;
    if h < 2 || w < 2 {
        return grad_out.clone();
    }
    let (ph, pw, c) = grad_out.dim();
    let mut grad_in = Array3::zeros(in_shape);
    for y in 0..ph {
        for x in 0..pw {
            for ch in 0..c {
                let g = grad_out[[y, x, ch]] * 0.25;
                grad_in[[2 * y, 2 * x, ch]] = g;
                grad_in[[2 * y, 2 * x + 1, ch]] = g;
                grad_in[[2 * y + 1, 2 * x, ch]] = g;
                grad_in[[2 * y + 1, 2 * x + 1, ch]] = g;
            }
        }
    }
    grad_in
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// A single block whose kernel is an identity tap summing input channels:
    /// out[y, x] = r + g + b, strictly positive for positive input.
    fn identity_sum_block() -> ConvBlock {
        let mut weights = Array4::zeros((KERNEL, KERNEL, 3, 1));
        for ci in 0..3 {
            weights[[1, 1, ci, 0]] = 1.0;
        }
        ConvBlock {
            name: "sum".to_string(),
            weights,
            bias: Array1::zeros(1),
        }
    }

    fn positive_input(h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((h, w, 3), |(y, x, c)| {
            0.2 + 0.1 * ((y * 31 + x * 7 + c * 3) % 5) as f32
        })
    }

    #[test]
    fn test_identity_sum_forward() {
        let stack = ConvStack::from_blocks(vec![identity_sum_block()]);
        let input = positive_input(4, 4);
        let acts = stack.activations(&input, "sum").unwrap();
        assert_eq!(acts.dim(), (4, 4, 1));
        for y in 0..4 {
            for x in 0..4 {
                let expected = input[[y, x, 0]] + input[[y, x, 1]] + input[[y, x, 2]];
                assert!((acts[[y, x, 0]] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_identity_sum_vjp_is_transpose() {
        let stack = ConvStack::from_blocks(vec![identity_sum_block()]);
        let input = positive_input(4, 4);
        let cot = Array3::from_elem((4, 4, 1), 1.0);
        let grad = stack.activation_grad(&input, "sum", &cot).unwrap();
        // The forward map is linear and positive, so the pullback of an
        // all-ones cotangent is exactly one per input coordinate.
        for v in grad.iter() {
            assert!((v - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_vjp_matches_finite_difference() {
        // Strictly positive pre-activations keep the stack in its linear
        // region, so a central difference is exact up to float noise.
        let mut weights = Array4::from_elem((KERNEL, KERNEL, 3, 2), 0.05);
        for ci in 0..3 {
            weights[[1, 1, ci, 0]] = 0.5;
            weights[[1, 1, ci, 1]] = 0.3;
        }
        let block = ConvBlock {
            name: "probe".to_string(),
            weights,
            bias: Array1::from_elem(2, 0.3),
        };
        let stack = ConvStack::from_blocks(vec![block]);
        let input = positive_input(6, 6);
        let cot = Array3::from_shape_fn((6, 6, 2), |(y, x, c)| {
            0.1 + ((y + 2 * x + c) % 3) as f32 * 0.2
        });

        let grad = stack.activation_grad(&input, "probe", &cot).unwrap();

        let objective = |inp: &Array3<f32>| -> f32 {
            let acts = stack.activations(inp, "probe").unwrap();
            (&acts * &cot).sum()
        };

        let eps = 1e-3;
        for &(y, x, c) in &[(0usize, 0usize, 0usize), (3, 2, 1), (5, 5, 2)] {
            let mut plus = input.clone();
            plus[[y, x, c]] += eps;
            let mut minus = input.clone();
            minus[[y, x, c]] -= eps;
            let fd = (objective(&plus) - objective(&minus)) / (2.0 * eps);
            assert!(
                (fd - grad[[y, x, c]]).abs() < 1e-2,
                "fd {} vs vjp {} at ({}, {}, {})",
                fd,
                grad[[y, x, c]],
                y,
                x,
                c
            );
        }
    }

    #[test]
    fn test_avg_pool_round_trip_shapes() {
        let input = positive_input(5, 5);
        let pooled = avg_pool(&input);
        assert_eq!(pooled.dim(), (2, 2, 3));
        let back = avg_pool_adjoint(&pooled, input.dim());
        assert_eq!(back.dim(), input.dim());
        // The dropped odd row/column receives no gradient.
        for c in 0..3 {
            assert_eq!(back[[4, 0, c]], 0.0);
            assert_eq!(back[[0, 4, c]], 0.0);
        }
    }

    #[test]
    fn test_demo_stack_layers() {
        let stack = ConvStack::demo(7);
        assert_eq!(stack.layer_channels("conv2d0"), Some(16));
        assert_eq!(stack.layer_channels("mixed4a"), Some(64));
        assert_eq!(stack.layer_channels("nope"), None);
    }

    #[test]
    fn test_demo_stack_is_deterministic() {
        let a = ConvStack::demo(11);
        let b = ConvStack::demo(11);
        let input = positive_input(8, 8);
        let acts_a = a.activations(&input, "conv2d0").unwrap();
        let acts_b = b.activations(&input, "conv2d0").unwrap();
        assert_eq!(acts_a, acts_b);
    }
}
