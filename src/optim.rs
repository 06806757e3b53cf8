//! Adam ascent steps over the logit state.

use ndarray::Array3;

/// Adam with bias-corrected moments, stepping in the direction of the
/// gradient (ascent) rather than against it.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Array3<f32>,
    v: Array3<f32>,
    t: u32,
}

impl Adam {
    /// Default learning rate for visualization renders.
    pub const DEFAULT_LR: f32 = 0.05;

    pub fn new(shape: (usize, usize, usize), lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: Array3::zeros(shape),
            v: Array3::zeros(shape),
            t: 0,
        }
    }

    /// Apply one ascent step, mutating `params` in place.
    pub fn ascend(&mut self, params: &mut Array3<f32>, grad: &Array3<f32>) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        ndarray::Zip::from(params)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                let m_hat = *m / bc1;
                let v_hat = *v / bc2;
                *p += self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_moves_by_lr() {
        let mut adam = Adam::new((2, 2, 3), 0.05);
        let mut params = Array3::zeros((2, 2, 3));
        let grad = Array3::from_elem((2, 2, 3), 0.7);
        adam.ascend(&mut params, &grad);
        // With bias correction, the first step is lr * g / (|g| + eps).
        for &p in params.iter() {
            assert!((p - 0.05).abs() < 1e-4);
        }
    }

    #[test]
    fn test_ascends_toward_larger_objective() {
        // Maximize -(x - 3)^2: gradient is -2(x - 3).
        let mut adam = Adam::new((1, 1, 1), 0.1);
        let mut params = Array3::zeros((1, 1, 1));
        for _ in 0..500 {
            let x = params[[0, 0, 0]];
            let grad = Array3::from_elem((1, 1, 1), -2.0 * (x - 3.0));
            adam.ascend(&mut params, &grad);
        }
        assert!((params[[0, 0, 0]] - 3.0).abs() < 0.1);
    }

    #[test]
    fn test_zero_gradient_holds_still() {
        let mut adam = Adam::new((2, 2, 3), 0.05);
        let mut params = Array3::from_elem((2, 2, 3), 0.4);
        let grad = Array3::zeros((2, 2, 3));
        adam.ascend(&mut params, &grad);
        for &p in params.iter() {
            assert!((p - 0.4).abs() < 1e-6);
        }
    }
}
