//! Image parameterization.
//!
//! The optimizable state lives in an unconstrained logit space; rendering
//! squashes it through a sigmoid so gradient ascent can push hard without
//! ever leaving valid color range. Each request gets its own fresh state.

use crate::error::{RenderError, Result};
use ndarray::Array3;
use rand::Rng;

/// Initial logit noise amplitude. Sigmoid of this range is a near-uniform
/// gray with faint texture for the gradient to latch onto.
const INIT_AMPLITUDE: f32 = 0.1;

/// The optimizable image state: `(size, size, 3)` logits.
pub struct ImageParam {
    logits: Array3<f32>,
}

impl ImageParam {
    /// Allocate a fresh parameterization of the given side length.
    pub fn create(size: usize, rng: &mut impl Rng) -> Result<Self> {
        if size == 0 {
            return Err(RenderError::invalid_size(size, "must be positive"));
        }
        let logits = Array3::from_shape_fn((size, size, 3), |_| {
            rng.gen_range(-INIT_AMPLITUDE..INIT_AMPLITUDE)
        });
        Ok(Self { logits })
    }

    /// Render the current state to RGB in `(0, 1)`.
    pub fn render(&self) -> Array3<f32> {
        self.logits.mapv(sigmoid)
    }

    /// Pull an RGB-space gradient back to logit space.
    pub fn pullback(&self, grad_rgb: &Array3<f32>) -> Array3<f32> {
        let mut grad = grad_rgb.clone();
        ndarray::Zip::from(&mut grad)
            .and(&self.logits)
            .for_each(|g, &l| {
                let s = sigmoid(l);
                *g *= s * (1.0 - s);
            });
        grad
    }

    pub(crate) fn logits_mut(&mut self) -> &mut Array3<f32> {
        &mut self.logits
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_create_rejects_zero_size() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        assert!(ImageParam::create(0, &mut rng).is_err());
    }

    #[test]
    fn test_render_stays_inside_unit_interval() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let param = ImageParam::create(16, &mut rng).unwrap();
        let rgb = param.render();
        assert_eq!(rgb.dim(), (16, 16, 3));
        for &v in rgb.iter() {
            assert!(v > 0.0 && v < 1.0);
        }
    }

    #[test]
    fn test_pullback_scales_by_sigmoid_slope() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let param = ImageParam::create(4, &mut rng).unwrap();
        let ones = Array3::from_elem((4, 4, 3), 1.0);
        let grad = param.pullback(&ones);
        let rgb = param.render();
        for (g, &s) in grad.iter().zip(rgb.iter()) {
            assert!((g - s * (1.0 - s)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_independent_states_per_call() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let a = ImageParam::create(8, &mut rng).unwrap();
        let b = ImageParam::create(8, &mut rng).unwrap();
        // Same RNG stream, different draws: states must differ.
        assert_ne!(a.render(), b.render());
    }
}
