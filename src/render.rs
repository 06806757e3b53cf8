//! The optimization loop: 1024 gradient-ascent steps from noise to image.
//!
//! One render is a single synchronous computation. All per-request state
//! (logits, optimizer moments, RNG) is owned here and dropped on every exit
//! path; the model is only ever read.

use crate::error::{RenderError, Result};
use crate::model::{LayerNeuronTarget, Model};
use crate::objective::ChannelObjective;
use crate::optim::Adam;
use crate::output;
use crate::param::ImageParam;
use crate::transforms::{crop, crop_adjoint, crop_offsets, TransformStack};
use image::RgbImage;
use ndarray::Array3;
use rand::SeedableRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Fixed iteration budget. Every render performs exactly this many updates;
/// there is no convergence check and no early exit.
pub const STEPS: usize = 1024;

/// Everything one visualization request needs, minus the model.
#[derive(Debug, Clone, Serialize)]
pub struct RenderRequest {
    pub layer_id: String,
    pub neuron_index: usize,
    /// Output side length in pixels.
    pub size: usize,
    pub use_transforms: bool,
    pub transform_min: f32,
    pub transform_max: f32,
    /// Explicit seed; `None` derives one from the other fields so identical
    /// requests render identical images.
    pub seed: Option<u64>,
}

impl RenderRequest {
    pub fn target(&self) -> LayerNeuronTarget {
        LayerNeuronTarget::new(self.layer_id.clone(), self.neuron_index)
    }

    /// The seed actually used: the explicit one, or a digest of the request.
    /// Same request, same seed, same image.
    pub fn derived_seed(&self) -> u64 {
        if let Some(seed) = self.seed {
            return seed;
        }
        let mut hasher = Sha256::new();
        hasher.update(self.layer_id.as_bytes());
        hasher.update((self.neuron_index as u64).to_le_bytes());
        hasher.update((self.size as u64).to_le_bytes());
        hasher.update([self.use_transforms as u8]);
        hasher.update(self.transform_min.to_le_bytes());
        hasher.update(self.transform_max.to_le_bytes());
        let digest = hasher.finalize();
        u64::from_le_bytes(digest[0..8].try_into().expect("digest is 32 bytes"))
    }
}

/// Run the full optimization and return the final float image in `[0, 1]`.
pub fn render_tensor(model: &dyn Model, request: &RenderRequest) -> Result<Array3<f32>> {
    let size = request.size;
    let crop_size = size / 2;
    if crop_size == 0 {
        return Err(RenderError::invalid_size(size, "too small to crop"));
    }

    let objective = ChannelObjective::build(model, request.target())?;

    let seed = request.derived_seed();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut param = ImageParam::create(size, &mut rng)?;
    let mut adam = Adam::new((size, size, 3), Adam::DEFAULT_LR);

    debug!(
        layer = %request.layer_id,
        neuron = request.neuron_index,
        size,
        seed,
        "starting ascent"
    );

    for step in 0..STEPS {
        let rgb = param.render();
        let (oy, ox) = crop_offsets(size, crop_size, &mut rng);
        let window = crop(&rgb, oy, ox, crop_size);

        let (view, stack) = if request.use_transforms {
            TransformStack::apply(
                &window,
                request.transform_min,
                request.transform_max,
                &mut rng,
            )
        } else {
            (window, TransformStack::identity())
        };

        let (scalar, grad_view) = objective.evaluate(&view)?;
        if !scalar.is_finite() {
            return Err(RenderError::non_finite("objective", step));
        }

        let grad_window = stack.backward(&grad_view);
        let grad_rgb = crop_adjoint(&grad_window, size, oy, ox);
        let grad_logits = param.pullback(&grad_rgb);
        if grad_logits.iter().any(|g| !g.is_finite()) {
            return Err(RenderError::non_finite("gradient", step));
        }

        adam.ascend(param.logits_mut(), &grad_logits);

        if (step + 1) % 128 == 0 {
            debug!(step = step + 1, objective = scalar, "ascent progress");
        }
    }

    Ok(param.render())
}

/// Run the full optimization and convert to an 8-bit image.
pub fn render(model: &dyn Model, request: &RenderRequest) -> Result<RgbImage> {
    Ok(output::to_image(&render_tensor(model, request)?))
}
