//! # Residual Block Wrapper

use crate::errors::ResNetConfigError;
use crate::models::resnet::basic_block::{BasicBlock, BasicBlockConfig, BasicBlockMeta};
use crate::models::resnet::bottleneck::{
    BottleneckBlock, BottleneckBlockConfig, BottleneckBlockMeta, BottleneckPolicyConfig,
};
use crate::models::resnet::shape::FeatureShape;
use crate::models::resnet::version::BlockKind;
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The block family.
    fn kind(&self) -> BlockKind;

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The ``[height, width]`` stride of the block.
    fn stride(&self) -> [usize; 2];

    /// Does the block project its shortcut?
    fn has_downsample(&self) -> bool;
}

/// [`ResidualBlock`] Config.
#[derive(Config, Debug)]
pub enum ResidualBlockConfig {
    /// A `ResNet` [`BasicBlock`].
    Basic(BasicBlockConfig),

    /// A `ResNet` [`BottleneckBlock`].
    Bottleneck(BottleneckBlockConfig),
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn kind(&self) -> BlockKind {
        match self {
            Self::Basic(_) => BlockKind::Basic,
            Self::Bottleneck(_) => BlockKind::Bottleneck,
        }
    }

    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.in_planes(),
            Self::Bottleneck(config) => config.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.out_planes(),
            Self::Bottleneck(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> [usize; 2] {
        match self {
            Self::Basic(config) => config.stride(),
            Self::Bottleneck(config) => config.stride(),
        }
    }

    fn has_downsample(&self) -> bool {
        match self {
            Self::Basic(config) => config.has_downsample(),
            Self::Bottleneck(config) => config.has_downsample(),
        }
    }
}

impl From<BasicBlockConfig> for ResidualBlockConfig {
    fn from(config: BasicBlockConfig) -> Self {
        Self::Basic(config)
    }
}

impl From<BottleneckBlockConfig> for ResidualBlockConfig {
    fn from(config: BottleneckBlockConfig) -> Self {
        Self::Bottleneck(config)
    }
}

impl ResidualBlockConfig {
    /// Plan a block of the given family.
    ///
    /// `policy` only affects [`BlockKind::Bottleneck`] blocks.
    pub fn plan(
        kind: BlockKind,
        layer: &str,
        input: FeatureShape,
        planes: usize,
        stride: [usize; 2],
        downsample: bool,
        policy: &BottleneckPolicyConfig,
    ) -> Result<Self, ResNetConfigError> {
        Ok(match kind {
            BlockKind::Basic => {
                BasicBlockConfig::plan(layer, input, planes, stride, downsample)?.into()
            }
            BlockKind::Bottleneck => {
                BottleneckBlockConfig::plan(layer, input, planes, stride, downsample, policy)?
                    .into()
            }
        })
    }

    /// The shape entering the block.
    pub fn input(&self) -> FeatureShape {
        match self {
            Self::Basic(config) => config.input(),
            Self::Bottleneck(config) => config.input(),
        }
    }

    /// The shape leaving the block.
    pub fn output(&self) -> FeatureShape {
        match self {
            Self::Basic(config) => config.output(),
            Self::Bottleneck(config) => config.output(),
        }
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        match self {
            Self::Basic(config) => ResidualBlock::Basic(config.init(device)),
            Self::Bottleneck(config) => ResidualBlock::Bottleneck(config.init(device)),
        }
    }
}

/// A `ResNet` [`BasicBlock`] or [`BottleneckBlock`] wrapper.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ResidualBlock<B: Backend> {
    /// A `ResNet` [`BasicBlock`].
    Basic(BasicBlock<B>),

    /// A `ResNet` [`BottleneckBlock`].
    Bottleneck(BottleneckBlock<B>),
}

impl<B: Backend> From<BasicBlock<B>> for ResidualBlock<B> {
    fn from(block: BasicBlock<B>) -> Self {
        Self::Basic(block)
    }
}

impl<B: Backend> From<BottleneckBlock<B>> for ResidualBlock<B> {
    fn from(block: BottleneckBlock<B>) -> Self {
        Self::Bottleneck(block)
    }
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn kind(&self) -> BlockKind {
        match self {
            Self::Basic(_) => BlockKind::Basic,
            Self::Bottleneck(_) => BlockKind::Bottleneck,
        }
    }

    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.in_planes(),
            Self::Bottleneck(block) => block.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.out_planes(),
            Self::Bottleneck(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> [usize; 2] {
        match self {
            Self::Basic(block) => block.stride(),
            Self::Bottleneck(block) => block.stride(),
        }
    }

    fn has_downsample(&self) -> bool {
        match self {
            Self::Basic(block) => block.has_downsample(),
            Self::Bottleneck(block) => block.has_downsample(),
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Apply the wrapped block to the input.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes=planes*expansion, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Basic(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    #[test]
    fn test_plan_dispatch() {
        let policy = BottleneckPolicyConfig::default();
        let input = FeatureShape::new(64, 56, 56);

        let basic = ResidualBlockConfig::plan(
            BlockKind::Basic,
            "layer1.0",
            input,
            64,
            [1, 1],
            false,
            &policy,
        )
        .unwrap();
        assert_eq!(basic.kind(), BlockKind::Basic);
        assert_eq!(basic.out_planes(), 64);
        assert!(!basic.has_downsample());
        assert_eq!(basic.input(), input);
        assert_eq!(basic.output(), input);

        let bottleneck = ResidualBlockConfig::plan(
            BlockKind::Bottleneck,
            "layer1.0",
            input,
            64,
            [1, 1],
            true,
            &policy,
        )
        .unwrap();
        assert_eq!(bottleneck.kind(), BlockKind::Bottleneck);
        assert_eq!(bottleneck.in_planes(), 64);
        assert_eq!(bottleneck.out_planes(), 256);
        assert_eq!(bottleneck.stride(), [1, 1]);
        assert!(bottleneck.has_downsample());
        assert_eq!(bottleneck.output(), FeatureShape::new(256, 56, 56));
    }

    #[test]
    fn test_residual_block_forward() {
        type B = NdArray<f32>;
        let device = Default::default();
        let policy = BottleneckPolicyConfig::default();

        for kind in [BlockKind::Basic, BlockKind::Bottleneck] {
            let config = ResidualBlockConfig::plan(
                kind,
                "block",
                FeatureShape::new(4, 6, 6),
                2,
                [2, 2],
                true,
                &policy,
            )
            .unwrap();
            let block: ResidualBlock<B> = config.init(&device);
            assert_eq!(block.kind(), kind);
            assert_eq!(block.out_planes(), 2 * kind.expansion());
            assert_eq!(block.stride(), [2, 2]);
            assert!(block.has_downsample());

            let output = block.forward(Tensor::ones([3, 4, 6, 6], &device));
            assert_shape_contract!(
                ["batch", "out_planes", "out_height", "out_width"],
                &output,
                &[
                    ("batch", 3),
                    ("out_planes", 2 * kind.expansion()),
                    ("out_height", 3),
                    ("out_width", 3)
                ],
            );
        }
    }
}
