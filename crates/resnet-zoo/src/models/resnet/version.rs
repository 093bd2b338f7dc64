//! # `ResNet` Version Table
//!
//! Each [`ResNetVersion`] selects a [`BlockKind`] and a fixed
//! ``[usize; 4]`` of per-stage block counts.

use crate::errors::ResNetConfigError;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// `ResNet-18` block depths.
pub const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
/// `ResNet-34` block depths.
pub const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// `ResNet-50` block depths.
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// `ResNet-101` block depths.
pub const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];
/// `ResNet-152` block depths.
pub const RESNET152_BLOCKS: [usize; 4] = [3, 8, 36, 3];

/// Nominal output planes of each stage, before expansion.
pub const STAGE_PLANES: [usize; 4] = [64, 128, 256, 512];

/// Stride of the first block of each stage.
pub const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// The residual block family used by a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    /// Two 3x3 convolutions; expansion 1.
    Basic,

    /// 1x1 reduce, 3x3, 1x1 expand; expansion 4.
    Bottleneck,
}

impl BlockKind {
    /// Channel expansion of the block output over its nominal planes.
    pub const fn expansion(self) -> usize {
        match self {
            BlockKind::Basic => 1,
            BlockKind::Bottleneck => 4,
        }
    }
}

/// A stage descriptor: one row of the version table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    /// The block family.
    pub kind: BlockKind,

    /// Nominal output planes; the real output is ``planes * kind.expansion()``.
    pub planes: usize,

    /// Number of residual blocks.
    pub blocks: usize,

    /// Stride of the first block.
    pub stride: usize,
}

impl StageSpec {
    /// Channels leaving the stage.
    pub fn out_planes(&self) -> usize {
        self.planes * self.kind.expansion()
    }
}

/// The supported `ResNet` depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResNetVersion {
    /// `ResNet-18`.
    ResNet18,
    /// `ResNet-34`.
    ResNet34,
    /// `ResNet-50`.
    ResNet50,
    /// `ResNet-101`.
    ResNet101,
    /// `ResNet-152`.
    ResNet152,
}

impl ResNetVersion {
    /// All supported versions, shallowest first.
    pub const ALL: [ResNetVersion; 5] = [
        ResNetVersion::ResNet18,
        ResNetVersion::ResNet34,
        ResNetVersion::ResNet50,
        ResNetVersion::ResNet101,
        ResNetVersion::ResNet152,
    ];

    /// The version number, e.g. ``50``.
    pub const fn depth(self) -> usize {
        match self {
            ResNetVersion::ResNet18 => 18,
            ResNetVersion::ResNet34 => 34,
            ResNetVersion::ResNet50 => 50,
            ResNetVersion::ResNet101 => 101,
            ResNetVersion::ResNet152 => 152,
        }
    }

    /// The residual block family.
    pub const fn block_kind(self) -> BlockKind {
        match self {
            ResNetVersion::ResNet18 | ResNetVersion::ResNet34 => BlockKind::Basic,
            _ => BlockKind::Bottleneck,
        }
    }

    /// Blocks per stage.
    pub const fn stage_blocks(self) -> [usize; 4] {
        match self {
            ResNetVersion::ResNet18 => RESNET18_BLOCKS,
            ResNetVersion::ResNet34 => RESNET34_BLOCKS,
            ResNetVersion::ResNet50 => RESNET50_BLOCKS,
            ResNetVersion::ResNet101 => RESNET101_BLOCKS,
            ResNetVersion::ResNet152 => RESNET152_BLOCKS,
        }
    }

    /// The four stage descriptors.
    pub fn stages(self) -> [StageSpec; 4] {
        let kind = self.block_kind();
        let blocks = self.stage_blocks();
        core::array::from_fn(|idx| StageSpec {
            kind,
            planes: STAGE_PLANES[idx],
            blocks: blocks[idx],
            stride: STAGE_STRIDES[idx],
        })
    }

    /// Canonical model name, e.g. ``"resnet50"``.
    pub fn model_name(self) -> String {
        format!("resnet{}", self.depth())
    }

    /// Channels leaving the last stage.
    pub const fn feature_planes(self) -> usize {
        STAGE_PLANES[3] * self.block_kind().expansion()
    }
}

impl fmt::Display for ResNetVersion {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "ResNet-{}", self.depth())
    }
}

impl TryFrom<usize> for ResNetVersion {
    type Error = ResNetConfigError;

    fn try_from(depth: usize) -> Result<Self, Self::Error> {
        ResNetVersion::ALL
            .into_iter()
            .find(|v| v.depth() == depth)
            .ok_or(ResNetConfigError::UnsupportedVersion(depth))
    }
}

impl From<ResNetVersion> for usize {
    fn from(version: ResNetVersion) -> Self {
        version.depth()
    }
}

/// Parses ``"50"``, ``"resnet50"``, or ``"ResNet-50"``.
impl FromStr for ResNetVersion {
    type Err = ResNetConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let digits = lower
            .strip_prefix("resnet")
            .map(|rest| rest.trim_start_matches('-'))
            .unwrap_or(&lower);

        match digits.parse::<usize>() {
            Ok(depth) => ResNetVersion::try_from(depth),
            Err(_) => Err(ResNetConfigError::UnknownModelName(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    #[test]
    fn test_version_table() {
        let expected = [
            (18, BlockKind::Basic, [2, 2, 2, 2]),
            (34, BlockKind::Basic, [3, 4, 6, 3]),
            (50, BlockKind::Bottleneck, [3, 4, 6, 3]),
            (101, BlockKind::Bottleneck, [3, 4, 23, 3]),
            (152, BlockKind::Bottleneck, [3, 8, 36, 3]),
        ];

        for (depth, kind, blocks) in expected {
            let version = ResNetVersion::try_from(depth).unwrap();
            assert_eq!(version.depth(), depth);
            assert_eq!(version.block_kind(), kind);
            assert_eq!(version.stage_blocks(), blocks);

            let stages = version.stages();
            assert_that!(
                stages.iter().map(|s| s.blocks).collect::<Vec<_>>(),
                is(equal_to(blocks.to_vec()))
            );
            assert_that!(
                stages.iter().map(|s| s.stride).collect::<Vec<_>>(),
                is(equal_to(vec![1, 2, 2, 2]))
            );
            assert!(stages.iter().all(|s| s.kind == kind));
        }
    }

    #[test]
    fn test_expansion() {
        assert_eq!(BlockKind::Basic.expansion(), 1);
        assert_eq!(BlockKind::Bottleneck.expansion(), 4);

        assert_eq!(ResNetVersion::ResNet18.feature_planes(), 512);
        assert_eq!(ResNetVersion::ResNet152.feature_planes(), 2048);

        let stage = ResNetVersion::ResNet50.stages()[2];
        assert_eq!(stage.planes, 256);
        assert_eq!(stage.out_planes(), 1024);
    }

    #[test]
    fn test_unsupported_version() {
        assert_eq!(
            ResNetVersion::try_from(26),
            Err(ResNetConfigError::UnsupportedVersion(26))
        );
        assert_eq!(
            ResNetVersion::try_from(0),
            Err(ResNetConfigError::UnsupportedVersion(0))
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("50".parse::<ResNetVersion>(), Ok(ResNetVersion::ResNet50));
        assert_eq!("resnet101".parse::<ResNetVersion>(), Ok(ResNetVersion::ResNet101));
        assert_eq!("ResNet-18".parse::<ResNetVersion>(), Ok(ResNetVersion::ResNet18));
        assert_eq!(
            "resnet26".parse::<ResNetVersion>(),
            Err(ResNetConfigError::UnsupportedVersion(26))
        );
        assert_eq!(
            "vgg16".parse::<ResNetVersion>(),
            Err(ResNetConfigError::UnknownModelName("vgg16".to_string()))
        );

        for version in ResNetVersion::ALL {
            assert_eq!(version.model_name().parse::<ResNetVersion>(), Ok(version));
        }
    }
}
