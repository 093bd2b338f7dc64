//! # `ConvNorm` Module
//!
//! A [`ConvNorm`] module is a bias-free [`Conv2d`] layer followed by a [`BatchNorm`] layer;
//! the unit every `ResNet` block is assembled from.
//!
//! [`ConvNormConfig::plan`] resolves the layer geometry against a [`FeatureShape`],
//! recording both the input and output shapes.

use crate::errors::ResNetConfigError;
use crate::models::resnet::shape::FeatureShape;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use tracing::debug;

/// Default [`BatchNorm`] epsilon.
pub const BATCH_NORM_EPSILON: f64 = 1e-5;

/// [`ConvNorm`] Meta.
pub trait ConvNormMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Number of groups.
    fn groups(&self) -> usize;

    /// Get the ``[height, width]`` stride.
    fn stride(&self) -> [usize; 2];

    /// Get the ``[height, width]`` kernel size.
    fn kernel_size(&self) -> [usize; 2];
}

/// [`ConvNorm`] Config.
///
/// Geometry arrays are ``[height, width]``.
#[derive(Config, Debug)]
pub struct ConvNormConfig {
    /// The shape entering the convolution.
    pub input: FeatureShape,

    /// The shape leaving the norm layer.
    pub output: FeatureShape,

    /// The kernel size.
    pub kernel_size: [usize; 2],

    /// The stride.
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],

    /// The padding, added evenly to both sides.
    #[config(default = "[0, 0]")]
    pub padding: [usize; 2],

    /// Convolution groups.
    #[config(default = 1)]
    pub groups: usize,

    /// [`BatchNorm`] epsilon.
    #[config(default = "BATCH_NORM_EPSILON")]
    pub epsilon: f64,
}

impl ConvNormMeta for ConvNormConfig {
    fn in_channels(&self) -> usize {
        self.input.channels
    }

    fn out_channels(&self) -> usize {
        self.output.channels
    }

    fn groups(&self) -> usize {
        self.groups
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.kernel_size
    }
}

impl ConvNormConfig {
    /// Plan a conv/norm layer.
    ///
    /// # Arguments
    ///
    /// - `layer`: the layer path, used in errors and logs.
    /// - `input`: the shape entering the layer.
    /// - `out_channels`: output channels.
    /// - `kernel_size`, `stride`, `padding`: ``[height, width]`` geometry.
    ///
    /// # Returns
    ///
    /// The planned config; `output` holds the advanced shape.
    pub fn plan(
        layer: &str,
        input: FeatureShape,
        out_channels: usize,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
    ) -> Result<Self, ResNetConfigError> {
        let degenerate = || ResNetConfigError::DegenerateShape {
            layer: layer.to_string(),
            input,
            kernel: kernel_size,
            stride,
            padding,
        };

        if input.is_empty() || out_channels == 0 {
            return Err(degenerate());
        }
        let output = input
            .conv2d(out_channels, kernel_size, stride, padding)
            .ok_or_else(degenerate)?;

        debug!(%layer, %input, %output, ?kernel_size, ?stride, ?padding, "Convolution + BatchNorm");

        Ok(Self {
            input,
            output,
            kernel_size,
            stride,
            padding,
            groups: 1,
            epsilon: BATCH_NORM_EPSILON,
        })
    }

    /// Plan a grouped conv/norm layer.
    ///
    /// Both channel counts must be divisible by `groups`.
    pub fn plan_grouped(
        layer: &str,
        input: FeatureShape,
        out_channels: usize,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
        groups: usize,
    ) -> Result<Self, ResNetConfigError> {
        if groups == 0 || input.channels % groups != 0 || out_channels % groups != 0 {
            return Err(ResNetConfigError::UngroupedChannels {
                layer: layer.to_string(),
                in_channels: input.channels,
                out_channels,
                groups,
            });
        }
        let config = Self::plan(layer, input, out_channels, kernel_size, stride, padding)?;
        Ok(config.with_groups(groups))
    }

    /// Initialize a [`ConvNorm`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNorm<B> {
        ConvNorm {
            conv: Conv2dConfig::new([self.input.channels, self.output.channels], self.kernel_size)
                .with_stride(self.stride)
                .with_padding(PaddingConfig2d::Explicit(self.padding[0], self.padding[1]))
                .with_groups(self.groups)
                .with_bias(false)
                .init(device),

            norm: BatchNormConfig::new(self.output.channels)
                .with_epsilon(self.epsilon)
                .init(device),
        }
    }
}

/// Grouped [`Conv2d`] and [`BatchNorm`] layer.
///
/// Implements [`ConvNormMeta`].
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm Layer.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNormMeta for ConvNorm<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.groups()
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }
}

impl<B: Backend> ConvNorm<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
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

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("out_channels", self.out_channels())]
        );

        x
    }
}
