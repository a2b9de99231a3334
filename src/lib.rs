//! Latte: a latent diffusion transformer for video generation.
//!
//! The backbone patchifies video frames and alternates spatial and temporal
//! self-attention blocks, conditioned on the diffusion timestep and an
//! optional class label or text embedding through adaptive layer norm.

pub mod attention;
pub mod backends;
pub mod blocks;
pub mod config;
pub mod embed;
pub mod model;
pub mod rope;

pub use config::{AttentionStrategy, Conditioning, ConfigError, LatteConfig};
pub use model::{Latte, classifier_free_mix};
