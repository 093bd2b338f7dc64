//! # Input Stem
//!
//! The `ResNet` stem:
//!
//! ```text
//! x -> conv7x7(stride=2, pad=3)+bn -> relu -> maxpool3x3(stride=2, pad=1)
//! ```
//!
//! At ``224x224`` the stem produces a ``64x56x56`` feature map.

use crate::errors::ResNetConfigError;
use crate::models::resnet::conv_norm::{ConvNorm, ConvNormConfig, ConvNormMeta};
use crate::models::resnet::shape::FeatureShape;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::relu;
use tracing::debug;

/// Channels leaving the stem.
pub const STEM_PLANES: usize = 64;

/// [`Stem`] Config.
#[derive(Config, Debug)]
pub struct StemConfig {
    /// The 7x7 conv/norm.
    pub conv: ConvNormConfig,

    /// Max pool kernel.
    #[config(default = "[3, 3]")]
    pub pool_kernel: [usize; 2],

    /// Max pool stride.
    #[config(default = "[2, 2]")]
    pub pool_stride: [usize; 2],

    /// Max pool padding.
    #[config(default = "[1, 1]")]
    pub pool_padding: [usize; 2],

    /// The shape leaving the pool.
    pub output: FeatureShape,
}

impl StemConfig {
    /// Plan the stem for an input shape.
    pub fn plan(input: FeatureShape) -> Result<Self, ResNetConfigError> {
        let conv = ConvNormConfig::plan("stem.conv", input, STEM_PLANES, [7, 7], [2, 2], [3, 3])?;
        debug!(layer = "stem.relu", shape = %conv.output, "Relu");

        let (kernel, stride, padding) = ([3, 3], [2, 2], [1, 1]);
        let output = conv
            .output
            .conv2d(conv.output.channels, kernel, stride, padding)
            .ok_or_else(|| ResNetConfigError::DegenerateShape {
                layer: "stem.pool".to_string(),
                input: conv.output,
                kernel,
                stride,
                padding,
            })?;
        debug!(layer = "stem.pool", input = %conv.output, %output, "MaxPool");

        Ok(Self {
            conv,
            pool_kernel: kernel,
            pool_stride: stride,
            pool_padding: padding,
            output,
        })
    }

    /// The shape entering the stem.
    pub fn input(&self) -> FeatureShape {
        self.conv.input
    }

    /// Initialize a [`Stem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Stem<B> {
        Stem {
            conv: self.conv.init(device),
            pool: MaxPool2dConfig::new(self.pool_kernel)
                .with_strides(self.pool_stride)
                .with_padding(PaddingConfig2d::Explicit(
                    self.pool_padding[0],
                    self.pool_padding[1],
                ))
                .init(),
        }
    }
}

/// `ResNet` input stem.
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    /// 7x7 conv/norm.
    pub conv: ConvNorm<B>,

    /// 3x3 max pool.
    pub pool: MaxPool2d,
}

impl<B: Backend> Stem<B> {
    /// The number of input channels.
    pub fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    /// The number of output channels.
    pub fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, 64, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())],
        );

        let x = self.conv.forward(input);
        let x = relu(x);
        let x = self.pool.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("out_channels", self.out_channels())],
        );

        x
    }
}
