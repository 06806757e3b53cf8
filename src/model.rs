//! The model seam: anything that can compute named layer activations and
//! pull gradients back to its input can be visualized.
//!
//! The engine never looks inside the model. It asks for an activation map,
//! seeds a cotangent on it, and asks for the vector-Jacobian product. A
//! pretrained network port plugs in here; so does the built-in seeded
//! feature bank in [`conv`].

pub mod conv;

use crate::error::{RenderError, Result};
use ndarray::Array3;

/// One scalar unit inside a model's activation graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerNeuronTarget {
    /// Name of the layer whose activation map is targeted.
    pub layer_id: String,
    /// Output channel within that layer.
    pub neuron_index: usize,
}

impl LayerNeuronTarget {
    pub fn new(layer_id: impl Into<String>, neuron_index: usize) -> Self {
        Self {
            layer_id: layer_id.into(),
            neuron_index,
        }
    }
}

/// A differentiable image-to-activations computation.
///
/// Images and activation maps are `(height, width, channel)` `f32` tensors.
/// Implementations must be read-only during inference so one model instance
/// can serve concurrent requests; all mutable per-request state lives in the
/// engine.
pub trait Model: Send + Sync {
    /// Channel count of the named layer, or `None` if the layer is unknown.
    fn layer_channels(&self, layer_id: &str) -> Option<usize>;

    /// Activation map of the named layer for the given input image.
    fn activations(&self, input: &Array3<f32>, layer_id: &str) -> Result<Array3<f32>>;

    /// Vector-Jacobian product: gradient of `sum(activations * cotangent)`
    /// with respect to `input`. `cotangent` has the activation map's shape.
    fn activation_grad(
        &self,
        input: &Array3<f32>,
        layer_id: &str,
        cotangent: &Array3<f32>,
    ) -> Result<Array3<f32>>;

    /// Validate a target against this model, yielding a descriptive error
    /// instead of a downstream indexing failure.
    fn check_target(&self, target: &LayerNeuronTarget) -> Result<()> {
        let channels = self
            .layer_channels(&target.layer_id)
            .ok_or_else(|| RenderError::unknown_layer(&target.layer_id))?;
        if target.neuron_index >= channels {
            return Err(RenderError::NeuronOutOfRange {
                layer_id: target.layer_id.clone(),
                neuron_index: target.neuron_index,
                channels,
            });
        }
        Ok(())
    }
}

/// A layer advertised to clients, with its channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerInfo {
    pub id: &'static str,
    pub channels: usize,
}

/// The InceptionV1 layer table advertised by the request glue.
///
/// This is the documented choice list with per-layer channel maxima; a
/// `neuron` input is valid when it is below the layer's channel count.
pub const INCEPTION_V1_LAYERS: [LayerInfo; 16] = [
    LayerInfo { id: "conv2d0", channels: 64 },
    LayerInfo { id: "maxpool0", channels: 64 },
    LayerInfo { id: "conv2d1", channels: 64 },
    LayerInfo { id: "conv2d2", channels: 192 },
    LayerInfo { id: "maxpool1", channels: 192 },
    LayerInfo { id: "mixed3a", channels: 256 },
    LayerInfo { id: "mixed3b", channels: 480 },
    LayerInfo { id: "maxpool4", channels: 480 },
    LayerInfo { id: "mixed4a", channels: 508 },
    LayerInfo { id: "mixed4b", channels: 512 },
    LayerInfo { id: "mixed4c", channels: 512 },
    LayerInfo { id: "mixed4d", channels: 528 },
    LayerInfo { id: "mixed4e", channels: 832 },
    LayerInfo { id: "maxpool10", channels: 832 },
    LayerInfo { id: "mixed5a", channels: 832 },
    LayerInfo { id: "mixed5b", channels: 1024 },
];

/// Look up an advertised layer by id.
pub fn layer_info(layer_id: &str) -> Option<&'static LayerInfo> {
    INCEPTION_V1_LAYERS.iter().find(|l| l.id == layer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_advertised_layer_resolves() {
        for layer in &INCEPTION_V1_LAYERS {
            let found = layer_info(layer.id).expect("advertised layer must resolve");
            assert_eq!(found.channels, layer.channels);
        }
    }

    #[test]
    fn test_mixed4a_channel_count() {
        assert_eq!(layer_info("mixed4a").unwrap().channels, 508);
    }

    #[test]
    fn test_unknown_layer_lookup() {
        assert!(layer_info("mixed9z").is_none());
    }
}
