//! # The `ResNet` Downsample Implementation.
//!
//! The projection shortcut of a residual block: a strided 1x1 [`ConvNorm`]
//! mapping the block input to the block output's channels and resolution.
//!
//! The projection is always planned from the block's *input* shape,
//! before the residual path advances the shape cursor.

use crate::errors::ResNetConfigError;
use crate::models::resnet::conv_norm::{ConvNorm, ConvNormConfig, ConvNormMeta};
use crate::models::resnet::shape::FeatureShape;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use tracing::debug;

/// [`Downsample`] Meta trait.
pub trait DownsampleMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The ``[height, width]`` stride of the projection.
    fn stride(&self) -> [usize; 2];
}

/// [`Downsample`] configuration.
#[derive(Config, Debug)]
pub struct DownsampleConfig {
    /// The 1x1 projection.
    pub conv_norm: ConvNormConfig,
}

impl From<ConvNormConfig> for DownsampleConfig {
    fn from(conv_norm: ConvNormConfig) -> Self {
        Self { conv_norm }
    }
}

impl DownsampleMeta for DownsampleConfig {
    fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv_norm.stride()
    }
}

impl DownsampleConfig {
    /// Plan a projection from the block input shape.
    ///
    /// # Arguments
    ///
    /// - `layer`: the owning block path.
    /// - `block_input`: the shape entering the residual block.
    /// - `out_channels`: the residual block's output channels.
    /// - `stride`: the residual block's ``[height, width]`` stride.
    pub fn plan(
        layer: &str,
        block_input: FeatureShape,
        out_channels: usize,
        stride: [usize; 2],
    ) -> Result<Self, ResNetConfigError> {
        ConvNormConfig::plan(
            &format!("{layer}.downsample"),
            block_input,
            out_channels,
            [1, 1],
            stride,
            [0, 0],
        )
        .map(Self::from)
    }

    /// The shape leaving the projection.
    pub fn output(&self) -> FeatureShape {
        self.conv_norm.output
    }

    /// Initialize a [`Downsample`] `Module`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Downsample<B> {
        Downsample {
            conv_norm: self.conv_norm.init(device),
        }
    }
}

/// Plan the shortcut path of a residual block.
///
/// # Returns
///
/// `Some` projection when `downsample` is set, `None` for an identity shortcut.
pub fn plan_shortcut(
    layer: &str,
    block_input: FeatureShape,
    out_channels: usize,
    stride: [usize; 2],
    downsample: bool,
) -> Result<Option<DownsampleConfig>, ResNetConfigError> {
    if downsample {
        DownsampleConfig::plan(layer, block_input, out_channels, stride).map(Some)
    } else {
        debug!(%layer, shape = %block_input, "IdentityLayer");
        Ok(None)
    }
}

/// Check that the shortcut and residual paths of a block produce the same shape.
///
/// # Returns
///
/// The merged block output shape.
pub fn check_residual_merge(
    layer: &str,
    block_input: FeatureShape,
    shortcut: Option<&DownsampleConfig>,
    residual: FeatureShape,
) -> Result<FeatureShape, ResNetConfigError> {
    let shortcut = shortcut.map_or(block_input, DownsampleConfig::output);
    if shortcut != residual {
        return Err(ResNetConfigError::ShortcutMismatch {
            layer: layer.to_string(),
            shortcut,
            residual,
        });
    }
    Ok(residual)
}

/// Downsample layer applies a 1x1 conv to reduce the resolution (H, W) and adjust the number of channels.
///
/// Maps ``[batch_size, in_channels, in_height, in_width]`` to
/// ``[batch_size, out_channels, out_height, out_width]`` tensors.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    /// Embedded conv/norm.
    pub conv_norm: ConvNorm<B>,
}

impl<B: Backend> DownsampleMeta for Downsample<B> {
    fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv_norm.stride()
    }
}

impl<B: Backend> Downsample<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: a ``[batch, in_channels, in_height, in_width]`` tensor.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );

        let out = self.conv_norm.forward(input);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &out,
            &[("batch", batch), ("out_channels", self.out_channels())]
        );

        out
    }
}
