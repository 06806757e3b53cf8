//! Error types for the rendering engine.
//!
//! All failures are local to one request: nothing here can poison the
//! shared model or any other concurrent render.

use thiserror::Error;

/// Result type alias for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Errors that can occur while rendering a visualization.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The requested layer does not exist in the model's graph.
    #[error("unknown layer: {layer_id}")]
    UnknownLayer { layer_id: String },

    /// The requested neuron index exceeds the layer's channel count.
    #[error("neuron {neuron_index} out of range for layer {layer_id} ({channels} channels)")]
    NeuronOutOfRange {
        layer_id: String,
        neuron_index: usize,
        channels: usize,
    },

    /// The requested image size cannot be rendered.
    #[error("invalid size: {size} ({reason})")]
    InvalidSize { size: usize, reason: String },

    /// A tensor had an unexpected shape.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// The objective or its gradient went non-finite mid-optimization.
    #[error("non-finite {what} at step {step}")]
    NonFinite { what: String, step: usize },

    /// I/O error while writing output.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Create an unknown-layer error.
    #[must_use]
    pub fn unknown_layer(layer_id: impl Into<String>) -> Self {
        Self::UnknownLayer {
            layer_id: layer_id.into(),
        }
    }

    /// Create an invalid-size error.
    #[must_use]
    pub fn invalid_size(size: usize, reason: impl Into<String>) -> Self {
        Self::InvalidSize {
            size,
            reason: reason.into(),
        }
    }

    /// Create a non-finite error for the given step.
    #[must_use]
    pub fn non_finite(what: impl Into<String>, step: usize) -> Self {
        Self::NonFinite {
            what: what.into(),
            step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_layer_display() {
        let err = RenderError::unknown_layer("mixed9z");
        assert_eq!(err.to_string(), "unknown layer: mixed9z");
    }

    #[test]
    fn test_neuron_out_of_range_display() {
        let err = RenderError::NeuronOutOfRange {
            layer_id: "mixed4a".to_string(),
            neuron_index: 600,
            channels: 508,
        };
        assert_eq!(
            err.to_string(),
            "neuron 600 out of range for layer mixed4a (508 channels)"
        );
    }

    #[test]
    fn test_non_finite_display() {
        let err = RenderError::non_finite("gradient", 17);
        assert_eq!(err.to_string(), "non-finite gradient at step 17");
    }
}
