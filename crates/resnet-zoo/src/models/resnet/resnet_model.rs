//! # `ResNet` Core Model
//!
//! [`ResNet`] is the core `ResNet` module.
//!
//! [`ResNetConfig`] implements [`Config`], and provides
//! a high-level configuration interface.
//! It provides [`ResNetConfig::to_structure`] to validate and plan
//! a [`ResNetStructureConfig`], and [`ResNetConfig::try_init`] to
//! plan, initialize, and optionally load pretrained weights.
//!
//! [`ResNetStructureConfig`] implements [`Config`], and provides
//! [`ResNetStructureConfig::init`] to initialize a [`ResNet`].
//!
//! [`ResNet`] implements [`Module`], and provides
//! [`ResNet::forward`] and [`ResNet::forward_features`].

use crate::errors::ResNetConfigError;
use crate::models::resnet::bottleneck::{
    BOTTLENECK_DEFAULT_BASE_WIDTH, BOTTLENECK_DEFAULT_GROUPS, BottleneckPolicyConfig,
};
use crate::models::resnet::conv_norm::ConvNormConfig;
use crate::models::resnet::layer_block::{LayerBlock, LayerBlockConfig, LayerBlockMeta};
use crate::models::resnet::pretrained::{PRETRAINED_NUM_CLASSES, PretrainedWeightsConfig};
use crate::models::resnet::residual_block::ResidualBlockConfig;
use crate::models::resnet::shape::FeatureShape;
use crate::models::resnet::stem::{Stem, StemConfig};
use crate::models::resnet::version::ResNetVersion;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::{Ignored, Module};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Config, Tensor};
use tracing::info;

/// High-level `ResNet` model configuration.
///
/// Mirrors the construction arguments of a classic `ResNet`:
/// a depth, a channels-first input shape, and the classifier options.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// The depth; one of ``18, 34, 50, 101, 152``.
    pub version: usize,

    /// Input channels.
    pub input_channels: usize,

    /// Input width.
    pub input_width: usize,

    /// Input height.
    pub input_height: usize,

    /// Attach the pooled linear classifier.
    #[config(default = true)]
    pub include_top: bool,

    /// Load ImageNet weights after construction.
    #[config(default = false)]
    pub pretrained: bool,

    /// Classifier width.
    #[config(default = 1000)]
    pub num_classes: usize,

    /// Bottleneck base width.
    #[config(default = "BOTTLENECK_DEFAULT_BASE_WIDTH")]
    pub base_width: usize,

    /// Bottleneck 3x3 convolution groups.
    #[config(default = "BOTTLENECK_DEFAULT_GROUPS")]
    pub groups: usize,

    /// Pretrained weights directory; defaults to the local weight cache.
    #[config(default = "None")]
    pub weights_dir: Option<String>,
}

impl ResNetConfig {
    /// Create a config from a channels-first ``(channels, height, width)`` shape.
    pub fn from_shape(
        version: usize,
        input_shape: (usize, usize, usize),
    ) -> Self {
        let (channels, height, width) = input_shape;
        Self::new(version, channels, width, height)
    }

    /// The channels-first input shape.
    pub fn input_shape(&self) -> FeatureShape {
        FeatureShape::new(self.input_channels, self.input_height, self.input_width)
    }

    /// The bottleneck width policy.
    pub fn bottleneck_policy(&self) -> BottleneckPolicyConfig {
        BottleneckPolicyConfig::new()
            .with_base_width(self.base_width)
            .with_groups(self.groups)
    }

    /// Check the configuration flags.
    ///
    /// # Returns
    ///
    /// The resolved [`ResNetVersion`].
    pub fn validate(&self) -> Result<ResNetVersion, ResNetConfigError> {
        let version = ResNetVersion::try_from(self.version)?;

        if self.pretrained && !self.include_top {
            return Err(ResNetConfigError::PretrainedWithoutTop);
        }
        if self.include_top && self.num_classes == 0 {
            return Err(ResNetConfigError::ZeroClasses);
        }
        if self.pretrained && self.num_classes != PRETRAINED_NUM_CLASSES {
            return Err(ResNetConfigError::PretrainedClassCount {
                expected: PRETRAINED_NUM_CLASSES,
                actual: self.num_classes,
            });
        }

        let input = self.input_shape();
        if input.is_empty() {
            return Err(ResNetConfigError::EmptyInput(input));
        }

        Ok(version)
    }

    /// Validate and plan the full network.
    ///
    /// No modules are allocated; every configuration error surfaces here.
    #[tracing::instrument(skip(self), fields(version = self.version))]
    pub fn to_structure(&self) -> Result<ResNetStructureConfig, ResNetConfigError> {
        let version = self.validate()?;
        let policy = self.bottleneck_policy();
        let input = self.input_shape();

        let stem = StemConfig::plan(input)?;

        let mut shape = stem.output;
        let mut layers = Vec::with_capacity(4);
        for (idx, stage) in version.stages().into_iter().enumerate() {
            let layer = LayerBlockConfig::plan(
                &format!("layer{}", idx + 1),
                shape,
                stage.kind,
                stage.planes,
                stage.blocks,
                stage.stride,
                &policy,
            )?;
            shape = layer.output().unwrap_or(shape);
            layers.push(layer);
        }

        let head = self
            .include_top
            .then(|| HeadConfig::new(shape.channels, self.num_classes));

        Ok(ResNetStructureConfig {
            version,
            input,
            stem,
            layers,
            head,
        })
    }

    /// Plan, initialize, and (when `pretrained`) load weights.
    #[tracing::instrument(skip(self, device), fields(version = self.version))]
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<ResNet<B>> {
        let structure = self.to_structure()?;
        let model = structure.init(device);

        if self.pretrained {
            return PretrainedWeightsConfig::new()
                .with_weights_dir(self.weights_dir.clone())
                .load(model, device);
        }
        Ok(model)
    }
}

/// Classification head config.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct HeadConfig {
    /// Pooled feature width.
    pub in_features: usize,

    /// Classifier width.
    pub num_classes: usize,
}

impl HeadConfig {
    /// Initialize the head [`Linear`] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Linear<B> {
        LinearConfig::new(self.in_features, self.num_classes).init(device)
    }
}

/// [`ResNet`] Structure Config.
///
/// The fully resolved plan of a network; every convolution records its
/// input and output [`FeatureShape`].
#[derive(Config, Debug)]
pub struct ResNetStructureConfig {
    /// The resolved version.
    pub version: ResNetVersion,

    /// The planned input shape.
    pub input: FeatureShape,

    /// The input stem.
    pub stem: StemConfig,

    /// The four stages.
    pub layers: Vec<LayerBlockConfig>,

    /// The optional classifier.
    #[config(default = "None")]
    pub head: Option<HeadConfig>,
}

/// ``[in_channels, out_channels, kernel_height, kernel_width, groups]``.
pub type ConvLayout = [usize; 5];

fn conv_layout(config: &ConvNormConfig) -> ConvLayout {
    [
        config.input.channels,
        config.output.channels,
        config.kernel_size[0],
        config.kernel_size[1],
        config.groups,
    ]
}

impl ResNetStructureConfig {
    /// The shape leaving the last stage.
    pub fn feature_shape(&self) -> FeatureShape {
        self.layers
            .last()
            .and_then(LayerBlockConfig::output)
            .unwrap_or(self.stem.output)
    }

    /// Total number of residual blocks.
    pub fn num_blocks(&self) -> usize {
        self.layers.iter().map(|layer| layer.len()).sum()
    }

    /// The parameter layout of every convolution, in module order.
    ///
    /// Two structures with equal layouts and heads accept each other's weights,
    /// regardless of input resolution.
    pub fn conv_layouts(&self) -> Vec<ConvLayout> {
        let mut layouts = vec![conv_layout(&self.stem.conv)];
        for block in self.layers.iter().flat_map(|layer| layer.blocks.iter()) {
            let (convs, downsample) = match block {
                ResidualBlockConfig::Basic(cfg) => {
                    (vec![&cfg.conv1, &cfg.conv2], cfg.downsample.as_ref())
                }
                ResidualBlockConfig::Bottleneck(cfg) => (
                    vec![&cfg.conv1, &cfg.conv2, &cfg.conv3],
                    cfg.downsample.as_ref(),
                ),
            };
            layouts.extend(convs.into_iter().map(conv_layout));
            layouts.extend(downsample.map(|d| conv_layout(&d.conv_norm)));
        }
        layouts
    }

    /// Can a network of this structure load weights from `other`?
    pub fn is_weight_compatible(
        &self,
        other: &Self,
    ) -> bool {
        self.version == other.version
            && self.head == other.head
            && self.conv_layouts() == other.conv_layouts()
    }

    /// Check that the stem, stages, and head form one shape chain.
    ///
    /// Planned structures always pass; this guards structures decoded
    /// from elsewhere.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.stem.input() != self.input {
            return Err(format!(
                "stem.input {} != input {}",
                self.stem.input(),
                self.input
            ));
        }

        let mut shape = self.stem.output;
        for (idx, layer) in self.layers.iter().enumerate() {
            layer
                .try_validate()
                .map_err(|e| format!("layer{}: {e}", idx + 1))?;
            if layer.input() != Some(shape) {
                return Err(format!(
                    "layer{}.input {:?} != {}",
                    idx + 1,
                    layer.input(),
                    shape
                ));
            }
            shape = layer.output().unwrap_or(shape);
        }

        if let Some(head) = self.head.as_ref().filter(|h| h.in_features != shape.channels) {
            return Err(format!(
                "head.in_features {} != feature planes {}",
                head.in_features, shape.channels
            ));
        }
        Ok(())
    }

    /// Initialize a [`ResNet`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        let model = ResNet {
            stem: self.stem.init(device),
            layers: self.layers.iter().map(|c| c.init(device)).collect(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: self.head.as_ref().map(|h| h.init(device)),
            structure: Ignored(self.clone()),
        };

        info!(
            version = %self.version,
            input = %self.input,
            features = %self.feature_shape(),
            blocks = self.num_blocks(),
            head = ?self.head.as_ref().map(|h| h.num_classes),
            "ResNet initialized"
        );

        model
    }
}

/// `ResNet` model.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Input stem.
    pub stem: Stem<B>,

    /// Residual stages.
    pub layers: Vec<LayerBlock<B>>,

    /// Global average pool.
    pub pool: AdaptiveAvgPool2d,

    /// Optional classifier.
    pub head: Option<Linear<B>>,

    /// The structure this model was initialized from.
    pub structure: Ignored<ResNetStructureConfig>,
}

impl<B: Backend> ResNet<B> {
    /// The structure this model was initialized from.
    pub fn structure(&self) -> &ResNetStructureConfig {
        &self.structure.0
    }

    /// The version.
    pub fn version(&self) -> ResNetVersion {
        self.structure().version
    }

    /// The number of input channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// The planned shape leaving [`ResNet::forward_features`].
    ///
    /// Describes the planned input, ``structure().input``, only;
    /// `forward` accepts other resolutions and does not re-plan.
    pub fn feature_shape(&self) -> FeatureShape {
        self.structure().feature_shape()
    }

    /// The number of channels leaving the last stage.
    pub fn feature_planes(&self) -> usize {
        self.layers
            .last()
            .map_or(self.stem.out_channels(), |layer| layer.out_planes())
    }

    /// The width of [`ResNet::forward`] output.
    ///
    /// `num_classes` with a head, else the feature planes.
    pub fn output_features(&self) -> usize {
        self.num_classes().unwrap_or_else(|| self.feature_planes())
    }

    /// The classifier width, if a head is attached.
    pub fn num_classes(&self) -> Option<usize> {
        self.head.as_ref().map(|fc| fc.weight.shape().dims[1])
    }

    /// Stem and stages.
    ///
    /// Planning accepts any input that keeps every layer at least 1x1;
    /// the `NdArray` conv kernels need at least 5x5 to run.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, feature_planes, out_height, out_width]`` tensor.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())],
        );

        let x = self.stem.forward(input);
        let x = self.layers.iter().fold(x, |x, layer| layer.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "planes", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("planes", self.feature_planes())],
        );

        x
    }

    /// `ResNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits with a head;
    /// ``[batch, feature_planes]`` pooled features without.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.forward_features(input);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.pool.forward(x);
        let x = x.flatten(1, 3);

        match &self.head {
            Some(fc) => fc.forward(x),
            None => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::residual_block::ResidualBlockMeta;
    use crate::models::resnet::version::BlockKind;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use hamcrest::prelude::*;

    #[test]
    fn test_from_shape() {
        let config = ResNetConfig::from_shape(50, (3, 224, 200));
        assert_eq!(config.version, 50);
        assert_eq!(config.input_channels, 3);
        assert_eq!(config.input_height, 224);
        assert_eq!(config.input_width, 200);
        assert!(config.include_top);
        assert!(!config.pretrained);
        assert_eq!(config.num_classes, 1000);
        assert_eq!(config.input_shape(), FeatureShape::new(3, 224, 200));
    }

    #[test]
    fn test_block_counts_for_all_versions() {
        for version in ResNetVersion::ALL {
            let structure = ResNetConfig::new(version.depth(), 3, 224, 224)
                .to_structure()
                .unwrap();

            assert_eq!(structure.version, version);
            assert_that!(
                structure.layers.iter().map(|l| l.len()).collect::<Vec<_>>(),
                is(equal_to(version.stage_blocks().to_vec()))
            );
            assert_eq!(
                structure.num_blocks(),
                version.stage_blocks().iter().sum::<usize>()
            );
            for layer in &structure.layers {
                assert!(
                    layer
                        .blocks
                        .iter()
                        .all(|b| b.kind() == version.block_kind())
                );
                layer.try_validate().unwrap();
            }
            structure.try_validate().unwrap();
        }
    }

    #[test]
    fn test_imagenet_geometry() {
        for version in ResNetVersion::ALL {
            let structure = ResNetConfig::new(version.depth(), 3, 224, 224)
                .to_structure()
                .unwrap();

            assert_eq!(structure.stem.conv.output, FeatureShape::new(64, 112, 112));
            assert_eq!(structure.stem.output, FeatureShape::new(64, 56, 56));

            let expansion = version.block_kind().expansion();
            let expected = [
                FeatureShape::new(64 * expansion, 56, 56),
                FeatureShape::new(128 * expansion, 28, 28),
                FeatureShape::new(256 * expansion, 14, 14),
                FeatureShape::new(512 * expansion, 7, 7),
            ];
            for (layer, shape) in structure.layers.iter().zip(expected) {
                assert_eq!(layer.output(), Some(shape));
            }
            assert_eq!(
                structure.feature_shape(),
                FeatureShape::new(version.feature_planes(), 7, 7)
            );
            assert_eq!(
                structure.head,
                Some(HeadConfig::new(version.feature_planes(), 1000))
            );
        }
    }

    #[test]
    fn test_first_stage_projection() {
        let basic = ResNetConfig::new(18, 3, 64, 64).to_structure().unwrap();
        assert!(!basic.layers[0].blocks[0].has_downsample());
        for layer in &basic.layers[1..] {
            assert!(layer.blocks[0].has_downsample());
        }

        let bottleneck = ResNetConfig::new(50, 3, 64, 64).to_structure().unwrap();
        for layer in &bottleneck.layers {
            assert!(layer.blocks[0].has_downsample());
            assert!(layer.blocks[1..].iter().all(|b| !b.has_downsample()));
        }
    }

    #[test]
    fn test_grouped_bottleneck_structure() {
        let structure = ResNetConfig::new(50, 3, 64, 64)
            .with_base_width(4)
            .with_groups(32)
            .to_structure()
            .unwrap();

        let ResidualBlockConfig::Bottleneck(block) = &structure.layers[0].blocks[0] else {
            panic!("expected bottleneck");
        };
        // trunc(4 / 64 * 64) * 32
        assert_eq!(block.conv2.output.channels, 128);
        assert_eq!(block.conv2.groups, 32);
        assert_eq!(block.conv3.output.channels, 256);
        assert_eq!(structure.feature_shape().channels, 2048);
        assert_eq!(structure.layers[0].blocks[0].kind(), BlockKind::Bottleneck);
    }

    #[test]
    fn test_config_errors() {
        assert_eq!(
            ResNetConfig::new(26, 3, 224, 224).to_structure().unwrap_err(),
            ResNetConfigError::UnsupportedVersion(26)
        );
        assert_eq!(
            ResNetConfig::new(18, 3, 224, 224)
                .with_include_top(false)
                .with_pretrained(true)
                .to_structure()
                .unwrap_err(),
            ResNetConfigError::PretrainedWithoutTop
        );
        assert_eq!(
            ResNetConfig::new(18, 3, 224, 224)
                .with_pretrained(true)
                .with_num_classes(10)
                .to_structure()
                .unwrap_err(),
            ResNetConfigError::PretrainedClassCount {
                expected: 1000,
                actual: 10
            }
        );
        assert_eq!(
            ResNetConfig::new(18, 3, 224, 224)
                .with_num_classes(0)
                .to_structure()
                .unwrap_err(),
            ResNetConfigError::ZeroClasses
        );
        assert_eq!(
            ResNetConfig::new(18, 0, 224, 224)
                .to_structure()
                .unwrap_err(),
            ResNetConfigError::EmptyInput(FeatureShape::new(0, 224, 224))
        );
        assert!(matches!(
            ResNetConfig::new(50, 3, 64, 64)
                .with_base_width(0)
                .to_structure(),
            Err(ResNetConfigError::InvalidWidth { .. })
        ));

        // No head, no class count needed.
        assert!(
            ResNetConfig::new(18, 3, 32, 32)
                .with_include_top(false)
                .with_num_classes(0)
                .to_structure()
                .is_ok()
        );
    }

    #[test]
    fn test_structure_try_validate() {
        let structure = ResNetConfig::new(34, 3, 64, 48)
            .with_num_classes(10)
            .to_structure()
            .unwrap();
        structure.try_validate().unwrap();

        let mut swapped = structure.clone();
        swapped.layers.swap(1, 2);
        assert!(swapped.try_validate().unwrap_err().starts_with("layer2.input"));

        let mut resized = structure.clone();
        resized.input = FeatureShape::new(3, 32, 32);
        assert!(resized.try_validate().is_err());

        let mut narrow_head = structure.clone();
        narrow_head.head = Some(HeadConfig::new(256, 10));
        assert_eq!(
            narrow_head.try_validate().unwrap_err(),
            "head.in_features 256 != feature planes 512"
        );
    }

    #[test]
    fn test_unsupported_version_builds_nothing() {
        type B = NdArray<f32>;
        let device = Default::default();
        let result = ResNetConfig::new(26, 3, 224, 224).try_init::<B>(&device);
        let err = result.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ResNetConfigError>(),
            Some(&ResNetConfigError::UnsupportedVersion(26))
        );
    }

    #[test]
    fn test_conv_layouts_ignore_resolution() {
        let a = ResNetConfig::new(18, 3, 224, 224).to_structure().unwrap();
        let b = ResNetConfig::new(18, 3, 32, 48).to_structure().unwrap();
        assert!(a.is_weight_compatible(&b));
        // stem + 8 blocks * 2 convs + 3 projections
        assert_eq!(a.conv_layouts().len(), 1 + 16 + 3);
        assert_eq!(a.conv_layouts()[0], [3, 64, 7, 7, 1]);

        let c = ResNetConfig::new(34, 3, 224, 224).to_structure().unwrap();
        assert!(!a.is_weight_compatible(&c));

        let d = ResNetConfig::new(18, 3, 224, 224)
            .with_num_classes(10)
            .to_structure()
            .unwrap();
        assert!(!a.is_weight_compatible(&d));
    }

    #[test]
    fn test_resnet18_forward_with_top() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = ResNetConfig::new(18, 3, 32, 32)
            .with_num_classes(10)
            .try_init(&device)
            .unwrap();

        assert_eq!(model.version(), ResNetVersion::ResNet18);
        assert_eq!(model.in_channels(), 3);
        assert_eq!(model.feature_planes(), 512);
        assert_eq!(model.num_classes(), Some(10));
        assert_eq!(model.output_features(), 10);
        assert_eq!(model.feature_shape(), FeatureShape::new(512, 1, 1));

        let input = Tensor::ones([2, 3, 32, 32], &device);
        let features = model.forward_features(input.clone());
        assert_shape_contract!(
            ["batch", "planes", "height", "width"],
            &features,
            &[("batch", 2), ("planes", 512), ("height", 1), ("width", 1)],
        );

        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 10]);
    }

    #[test]
    fn test_resnet18_forward_smallest_input() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = ResNetConfig::new(18, 3, 5, 5)
            .with_num_classes(4)
            .try_init(&device)
            .unwrap();

        // 5 -> 3 (stem conv) -> 2 (pool) -> 2 -> 1 -> 1 -> 1
        let planned = model.feature_shape();
        assert_eq!(planned, FeatureShape::new(512, 1, 1));
        assert_eq!(
            model.structure().layers[0].output(),
            Some(FeatureShape::new(64, 2, 2))
        );

        let input = Tensor::ones([2, 3, 5, 5], &device);
        let features = model.forward_features(input.clone());
        assert_eq!(
            features.dims(),
            [2, planned.channels, planned.height, planned.width]
        );
        assert_eq!(model.forward(input).dims(), [2, 4]);
    }

    #[test]
    fn test_resnet50_forward_without_top() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = ResNetConfig::new(50, 1, 40, 24)
            .with_include_top(false)
            .try_init(&device)
            .unwrap();

        assert!(model.head.is_none());
        assert_eq!(model.num_classes(), None);
        assert_eq!(model.output_features(), 2048);

        // width=40, height=24 plans a (1, 24, 40) input.
        let planned = model.feature_shape();
        assert_eq!(model.structure().input, FeatureShape::new(1, 24, 40));
        assert_eq!(planned, FeatureShape::new(2048, 1, 2));

        let input = Tensor::ones([1, 1, 24, 40], &device);
        let features = model.forward_features(input.clone());
        assert_eq!(
            features.dims(),
            [1, planned.channels, planned.height, planned.width]
        );

        let output = model.forward(input);
        assert_eq!(output.dims(), [1, 2048]);
    }
}
