#![warn(missing_docs)]
//!# resnet-zoo - `ResNet` Models for Burn
//!
//! ## Notable Components
//!
//! * [`cache`] - local weight cache layout.
//! * [`errors`] - configuration errors.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - `ResNet` 18/34/50/101/152.
//!     * [`models::resnet::resnet_model::ResNetConfig`] - high-level construction config.
//!     * [`models::resnet::resnet_model::ResNetStructureConfig`] - the planned layer structure.
//!     * [`models::resnet::resnet_model::ResNet`] - the assembled network.
//!     * [`models::resnet::persistence`] - `"ResNet"` archives.
//!     * [`models::resnet::pretrained`] - pretrained weight lookup.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod cache;
pub mod errors;
pub mod models;
