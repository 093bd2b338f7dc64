//! # Basic Block for `ResNet`
//!
//! [`BasicBlock`] is the residual unit of `ResNet-18` and `ResNet-34`:
//!
//! ```text
//! x -> conv3x3(stride)+bn -> relu -> conv3x3+bn --+--> relu
//! x -> identity | conv1x1(stride)+bn -------------'
//! ```
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].
//!
//! [`BasicBlockConfig`] implements [`Config`], and provides
//! [`BasicBlockConfig::init`] to initialize a [`BasicBlock`].
//!
//! [`BasicBlock`] implements [`Module`], and provides
//! [`BasicBlock::forward`].

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

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_planes(&self) -> usize;

    /// The ``[height, width]`` stride of the first convolution.
    fn stride(&self) -> [usize; 2];

    /// Does the block project its shortcut?
    fn has_downsample(&self) -> bool;
}

/// [`BasicBlock`] Config.
///
/// Implements [`BasicBlockMeta`].
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// First 3x3 conv/norm; carries the block stride.
    pub conv1: ConvNormConfig,

    /// Second 3x3 conv/norm.
    pub conv2: ConvNormConfig,

    /// Optional projection shortcut.
    #[config(default = "None")]
    pub downsample: Option<DownsampleConfig>,
}

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv2.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv1.stride()
    }

    fn has_downsample(&self) -> bool {
        self.downsample.is_some()
    }
}

impl BasicBlockConfig {
    /// Channel expansion of a basic block.
    pub const EXPANSION: usize = BlockKind::Basic.expansion();

    /// Plan a basic block.
    ///
    /// # Arguments
    ///
    /// - `layer`: the block path, used in errors and logs.
    /// - `input`: the shape entering the block.
    /// - `planes`: the block output channels.
    /// - `stride`: the ``[height, width]`` stride of the first conv.
    /// - `downsample`: project the shortcut with a strided 1x1 conv.
    ///
    /// # Errors
    ///
    /// [`ResNetConfigError::ShortcutMismatch`] when an identity shortcut
    /// would not match the residual output shape.
    pub fn plan(
        layer: &str,
        input: FeatureShape,
        planes: usize,
        stride: [usize; 2],
        downsample: bool,
    ) -> Result<Self, ResNetConfigError> {
        let out_planes = planes * Self::EXPANSION;

        let downsample = plan_shortcut(layer, input, out_planes, stride, downsample)?;

        let conv1 = ConvNormConfig::plan(
            &format!("{layer}.conv1"),
            input,
            out_planes,
            [3, 3],
            stride,
            [1, 1],
        )?;
        let conv2 = ConvNormConfig::plan(
            &format!("{layer}.conv2"),
            conv1.output,
            out_planes,
            [3, 3],
            [1, 1],
            [1, 1],
        )?;

        check_residual_merge(layer, input, downsample.as_ref(), conv2.output)?;

        Ok(Self {
            conv1,
            conv2,
            downsample,
        })
    }

    /// The shape entering the block.
    pub fn input(&self) -> FeatureShape {
        self.conv1.input
    }

    /// The shape leaving the block.
    pub fn output(&self) -> FeatureShape {
        self.conv2.output
    }

    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        BasicBlock {
            conv1: self.conv1.init(device),
            conv2: self.conv2.init(device),
            downsample: self.downsample.as_ref().map(|cfg| cfg.init(device)),
        }
    }
}

/// Basic Block for `ResNet`.
///
/// Implements [`BasicBlockMeta`].
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// First Conv/Norm Block.
    pub conv1: ConvNorm<B>,

    /// Second Conv/Norm Block.
    pub conv2: ConvNorm<B>,

    /// Optional `Downsample` layer; for the residual connection.
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.conv2.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv1.stride()
    }

    fn has_downsample(&self) -> bool {
        self.downsample.is_some()
    }
}

impl<B: Backend> BasicBlock<B> {
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

        let x = self.conv1.forward(input);
        let x = relu(x);
        let x = self.conv2.forward(x);
        let x = relu(x + identity);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("out_planes", self.out_planes())]
        );

        x
    }
}
