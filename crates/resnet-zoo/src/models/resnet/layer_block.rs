//! # `ResNet` Layer Block
//!
//! A [`LayerBlock`] is one stage of a `ResNet`: a sequence of [`ResidualBlock`]s
//! sharing a block family and nominal planes.
//!
//! [`LayerBlockMeta`] defines a common meta API for [`LayerBlock`]
//! and [`LayerBlockConfig`].
//!
//! [`LayerBlockConfig`] implements [`Config`], and provides
//! [`LayerBlockConfig::init`] to initialize a [`LayerBlock`].
//!
//! [`LayerBlock`] implements [`Module`], and provides
//! [`LayerBlock::forward`].

use crate::errors::ResNetConfigError;
use crate::models::resnet::bottleneck::BottleneckPolicyConfig;
use crate::models::resnet::residual_block::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use crate::models::resnet::shape::FeatureShape;
use crate::models::resnet::version::BlockKind;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};
use tracing::debug;

/// [`LayerBlock`] Meta API.
pub trait LayerBlockMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the layer block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The effective ``[height, width]`` stride of the blocks.
    fn stride(&self) -> [usize; 2];
}

/// [`LayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for LayerBlockConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

fn fold_stride<I>(strides: I) -> [usize; 2]
where
    I: Iterator<Item = [usize; 2]>,
{
    strides.fold([1, 1], |[h, w], [sh, sw]| [h * sh, w * sw])
}

impl LayerBlockMeta for LayerBlockConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.in_planes())
    }

    fn out_planes(&self) -> usize {
        self.blocks.last().map_or(0, |b| b.out_planes())
    }

    fn stride(&self) -> [usize; 2] {
        fold_stride(self.blocks.iter().map(|b| b.stride()))
    }
}

impl LayerBlockConfig {
    /// Plan one stage.
    ///
    /// The first block takes `stride` and projects its shortcut when
    /// ``stride != 1`` or the incoming channels differ from
    /// ``planes * expansion``; every later block is stride 1 with an
    /// identity shortcut.
    ///
    /// # Arguments
    ///
    /// - `layer`: the stage name, e.g. ``"layer2"``.
    /// - `input`: the shape entering the stage.
    /// - `kind`: the residual block family.
    /// - `planes`: nominal planes of every block.
    /// - `num_blocks`: block count; must be non-zero.
    /// - `stride`: stride of the first block.
    /// - `policy`: bottleneck width policy.
    pub fn plan(
        layer: &str,
        input: FeatureShape,
        kind: BlockKind,
        planes: usize,
        num_blocks: usize,
        stride: usize,
        policy: &BottleneckPolicyConfig,
    ) -> Result<Self, ResNetConfigError> {
        if num_blocks == 0 {
            return Err(ResNetConfigError::EmptyStage {
                layer: layer.to_string(),
            });
        }

        let out_planes = planes * kind.expansion();
        let downsample = stride != 1 || input.channels != out_planes;
        debug!(%layer, ?kind, planes, num_blocks, stride, downsample, "MakeLayer");

        let mut blocks = Vec::with_capacity(num_blocks);
        let mut shape = input;
        for idx in 0..num_blocks {
            let (block_stride, block_downsample) = if idx == 0 {
                (stride, downsample)
            } else {
                (1, false)
            };
            let block = ResidualBlockConfig::plan(
                kind,
                &format!("{layer}.{idx}"),
                shape,
                planes,
                [block_stride, block_stride],
                block_downsample,
                policy,
            )?;
            shape = block.output();
            blocks.push(block);
        }

        Ok(Self { blocks })
    }

    /// The shape entering the stage.
    pub fn input(&self) -> Option<FeatureShape> {
        self.blocks.first().map(ResidualBlockConfig::input)
    }

    /// The shape leaving the stage.
    pub fn output(&self) -> Option<FeatureShape> {
        self.blocks.last().map(ResidualBlockConfig::output)
    }

    /// Check that each block consumes the shape its predecessor produces.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for (idx, pair) in self.blocks.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            if prev.output() != curr.input() {
                return Err(format!(
                    "block[{}].output {} != block[{}].input {}",
                    idx,
                    prev.output(),
                    idx + 1,
                    curr.input(),
                ));
            }
        }
        Ok(())
    }

    /// Initialize a new [`LayerBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        LayerBlock {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }
}

/// Layer block.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlockMeta for LayerBlock<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.in_planes())
    }

    fn out_planes(&self) -> usize {
        self.blocks.last().map_or(0, |b| b.out_planes())
    }

    fn stride(&self) -> [usize; 2] {
        fold_stride(self.blocks.iter().map(|b| b.stride()))
    }
}

impl<B: Backend> LayerBlock<B> {
    /// Apply the layer block.
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("out_planes", self.out_planes())],
        );

        x
    }
}
