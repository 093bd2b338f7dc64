//! # [`BottleneckBlock`] Block for `ResNet`
//!
//! [`BottleneckBlock`] is the residual unit of `ResNet-50`, `ResNet-101`, and `ResNet-152`:
//!
//! ```text
//! x -> conv1x1+bn -> relu -> conv3x3(stride)+bn -> relu -> conv1x1(x4)+bn --+--> relu
//! x -> identity | conv1x1(stride)+bn ----------------------------------------'
//! ```
//!
//! [`BottleneckBlockMeta`] defines a common meta-API for [`BottleneckBlock`]
//! and [`BottleneckBlockConfig`].
//!
//! [`BottleneckBlockConfig`] implements [`Config`] and provides
//! [`BottleneckBlockConfig::init`] to initialize a [`BottleneckBlock`].
//!
//! [`BottleneckBlock`] implements [`Module`] and provides
//! [`BottleneckBlock::forward`].

use crate::errors::ResNetConfigError;
use crate::models::resnet::conv_norm::{ConvNorm, ConvNormConfig, ConvNormMeta};
use crate::models::resnet::downsample::{
    Downsample, DownsampleConfig, check_residual_merge, plan_shortcut,
};
use crate::models::resnet::shape::FeatureShape;
use crate::models::resnet::version::BlockKind;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;

/// Default bottleneck base width.
pub const BOTTLENECK_DEFAULT_BASE_WIDTH: usize = 64;

/// Default bottleneck convolution groups.
pub const BOTTLENECK_DEFAULT_GROUPS: usize = 1;

/// The internal width of a bottleneck block.
///
/// ``width = trunc(base_width / 64 * planes) * groups``
///
/// The product is truncated toward zero, never rounded; the resulting
/// channel counts must agree with published weights.
pub fn bottleneck_width(
    planes: usize,
    base_width: usize,
    groups: usize,
) -> usize {
    ((base_width as f64 / 64.0) * planes as f64) as usize * groups
}

/// Bottleneck width policy.
#[derive(Config, Debug)]
pub struct BottleneckPolicyConfig {
    /// Base width; ``64`` keeps ``width == planes``.
    #[config(default = "BOTTLENECK_DEFAULT_BASE_WIDTH")]
    pub base_width: usize,

    /// Groups of the 3x3 convolution.
    #[config(default = "BOTTLENECK_DEFAULT_GROUPS")]
    pub groups: usize,
}

impl Default for BottleneckPolicyConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BottleneckPolicyConfig {
    /// The internal width for `planes`.
    pub fn width(
        &self,
        planes: usize,
    ) -> usize {
        bottleneck_width(planes, self.base_width, self.groups)
    }
}

/// [`BottleneckBlock`] Meta trait.
pub trait BottleneckBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The internal width of the 3x3 convolution.
    fn width(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The ``[height, width]`` stride of the 3x3 convolution.
    fn stride(&self) -> [usize; 2];

    /// Does the block project its shortcut?
    fn has_downsample(&self) -> bool;
}

/// [`BottleneckBlock`] Config.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// 1x1 reduce conv/norm.
    pub conv1: ConvNormConfig,

    /// 3x3 conv/norm; carries the block stride and groups.
    pub conv2: ConvNormConfig,

    /// 1x1 expand conv/norm.
    pub conv3: ConvNormConfig,

    /// Optional projection shortcut.
    #[config(default = "None")]
    pub downsample: Option<DownsampleConfig>,
}

impl BottleneckBlockMeta for BottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn width(&self) -> usize {
        self.conv2.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv3.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv2.stride()
    }

    fn has_downsample(&self) -> bool {
        self.downsample.is_some()
    }
}

impl BottleneckBlockConfig {
    /// Channel expansion of a bottleneck block.
    pub const EXPANSION: usize = BlockKind::Bottleneck.expansion();

    /// Plan a bottleneck block.
    ///
    /// # Arguments
    ///
    /// - `layer`: the block path, used in errors and logs.
    /// - `input`: the shape entering the block.
    /// - `planes`: nominal planes; the block outputs ``planes * 4`` channels.
    /// - `stride`: the ``[height, width]`` stride of the 3x3 conv.
    /// - `downsample`: project the shortcut with a strided 1x1 conv.
    /// - `policy`: base width and groups of the internal convolution.
    pub fn plan(
        layer: &str,
        input: FeatureShape,
        planes: usize,
        stride: [usize; 2],
        downsample: bool,
        policy: &BottleneckPolicyConfig,
    ) -> Result<Self, ResNetConfigError> {
        let width = policy.width(planes);
        if width == 0 || policy.groups == 0 {
            return Err(ResNetConfigError::InvalidWidth {
                layer: layer.to_string(),
                base_width: policy.base_width,
                planes,
                groups: policy.groups,
            });
        }
        let out_planes = planes * Self::EXPANSION;

        let downsample = plan_shortcut(layer, input, out_planes, stride, downsample)?;

        let conv1 = ConvNormConfig::plan(
            &format!("{layer}.conv1"),
            input,
            width,
            [1, 1],
            [1, 1],
            [0, 0],
        )?;
        let conv2 = ConvNormConfig::plan_grouped(
            &format!("{layer}.conv2"),
            conv1.output,
            width,
            [3, 3],
            stride,
            [1, 1],
            policy.groups,
        )?;
        let conv3 = ConvNormConfig::plan(
            &format!("{layer}.conv3"),
            conv2.output,
            out_planes,
            [1, 1],
            [1, 1],
            [0, 0],
        )?;

        check_residual_merge(layer, input, downsample.as_ref(), conv3.output)?;

        Ok(Self {
            conv1,
            conv2,
            conv3,
            downsample,
        })
    }

    /// The shape entering the block.
    pub fn input(&self) -> FeatureShape {
        self.conv1.input
    }

    /// The shape leaving the block.
    pub fn output(&self) -> FeatureShape {
        self.conv3.output
    }

    /// Initialize a [`BottleneckBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        BottleneckBlock {
            conv1: self.conv1.init(device),
            conv2: self.conv2.init(device),
            conv3: self.conv3.init(device),
            downsample: self.downsample.as_ref().map(|cfg| cfg.init(device)),
        }
    }
}

/// Bottleneck Block for `ResNet`.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// 1x1 reduce.
    pub conv1: ConvNorm<B>,

    /// 3x3, strided.
    pub conv2: ConvNorm<B>,

    /// 1x1 expand.
    pub conv3: ConvNorm<B>,

    /// Optional `Downsample` layer; for the residual connection.
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> BottleneckBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn width(&self) -> usize {
        self.conv2.out_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv3.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv2.stride()
    }

    fn has_downsample(&self) -> bool {
        self.downsample.is_some()
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch"],
            &[("in_planes", self.in_planes())],
        );

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = relu(self.conv1.forward(input));

        assert_shape_contract_periodically!(
            ["batch", "width", "in_height", "in_width"],
            &x,
            &[("batch", batch), ("width", self.width())]
        );

        let x = relu(self.conv2.forward(x));
        let x = self.conv3.forward(x);
        let x = relu(x + identity);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("out_planes", self.out_planes())]
        );

        x
    }
}
