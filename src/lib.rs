//! Reverie - render the image a neuron wants to see.
//!
//! Given a model exposing named layer activations, Reverie synthesizes an
//! input image that maximizes one channel's mean activation: 1024 steps of
//! gradient ascent through a randomly cropped, jittered, scaled and rotated
//! view of a sigmoid-parameterized image.

pub mod config;
pub mod error;
pub mod model;
pub mod objective;
pub mod optim;
pub mod output;
pub mod param;
pub mod render;
pub mod transforms;

pub use config::ReverieConfig;
pub use error::{RenderError, Result};
pub use model::{layer_info, LayerInfo, LayerNeuronTarget, Model, INCEPTION_V1_LAYERS};
pub use render::{render, render_tensor, RenderRequest, STEPS};
