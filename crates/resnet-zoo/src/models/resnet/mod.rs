//! # `ResNet`
//!
//! Architecture assembly runs in two phases:
//!
//! 1. [`resnet_model::ResNetConfig::to_structure`] validates the configuration
//!    and plans every layer against an explicit [`shape::FeatureShape`] cursor,
//!    producing a [`resnet_model::ResNetStructureConfig`].
//! 2. [`resnet_model::ResNetStructureConfig::init`] allocates the burn modules.

pub mod basic_block;
pub mod bottleneck;
pub mod conv_norm;
pub mod downsample;
pub mod layer_block;
pub mod persistence;
pub mod pretrained;
pub mod residual_block;
pub mod resnet_model;
pub mod shape;
pub mod stem;
pub mod version;
