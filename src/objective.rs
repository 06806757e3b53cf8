//! Objective construction: one layer, one channel, one scalar.

use crate::error::Result;
use crate::model::{LayerNeuronTarget, Model};
use ndarray::{s, Array3};

/// The spatial mean of one activation channel, bound to a model and target.
///
/// Evaluation returns both the scalar and its gradient with respect to the
/// input image, obtained by seeding the channel-mean cotangent into the
/// model's vector-Jacobian product.
pub struct ChannelObjective<'a> {
    model: &'a dyn Model,
    target: LayerNeuronTarget,
}

impl std::fmt::Debug for ChannelObjective<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelObjective")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl<'a> ChannelObjective<'a> {
    /// Bind a model and target. The target is validated up front so an
    /// out-of-range neuron surfaces as a descriptive error, not a panic a
    /// thousand steps into the loop.
    pub fn build(model: &'a dyn Model, target: LayerNeuronTarget) -> Result<Self> {
        model.check_target(&target)?;
        Ok(Self { model, target })
    }

    /// Evaluate on an image, returning `(scalar, d scalar / d input)`.
    pub fn evaluate(&self, input: &Array3<f32>) -> Result<(f32, Array3<f32>)> {
        let acts = self.model.activations(input, &self.target.layer_id)?;
        let (ah, aw, channels) = acts.dim();
        let c = self.target.neuron_index;

        let channel = acts.slice(s![.., .., c]);
        let scalar = channel.sum() / (ah * aw) as f32;

        let mut cotangent = Array3::zeros((ah, aw, channels));
        cotangent
            .slice_mut(s![.., .., c])
            .fill(1.0 / (ah * aw) as f32);
        let grad = self
            .model
            .activation_grad(input, &self.target.layer_id, &cotangent)?;
        Ok((scalar, grad))
    }
}
