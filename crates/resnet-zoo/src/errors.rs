//! # Configuration Errors
//!
//! Every error here is raised while planning a network,
//! before any module is allocated.

use crate::models::resnet::shape::FeatureShape;
use thiserror::Error;

/// A `ResNet` configuration or geometry error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResNetConfigError {
    /// The version number has no entry in the version table.
    #[error("unsupported ResNet version {0}; expected one of 18, 34, 50, 101, 152")]
    UnsupportedVersion(usize),

    /// The model name has no entry in the version table.
    #[error("unknown ResNet model name {0:?}")]
    UnknownModelName(String),

    /// Pretrained weights include the classifier, so the head is required.
    #[error("pretrained weights require include_top = true")]
    PretrainedWithoutTop,

    /// Pretrained weights carry a fixed classifier width.
    #[error("pretrained weights provide {expected} classes, but num_classes = {actual}")]
    PretrainedClassCount {
        /// The classifier width of the pretrained weights.
        expected: usize,
        /// The requested classifier width.
        actual: usize,
    },

    /// A classification head with no classes.
    #[error("include_top requires num_classes > 0")]
    ZeroClasses,

    /// The input has an empty dimension.
    #[error("input shape {0} has an empty dimension")]
    EmptyInput(FeatureShape),

    /// A convolution or pooling window has no legal output size.
    #[error(
        "{layer}: no legal output size for input {input} with kernel {kernel:?}, stride {stride:?}, padding {padding:?}"
    )]
    DegenerateShape {
        /// The planned layer path.
        layer: String,
        /// The shape entering the layer.
        input: FeatureShape,
        /// ``[height, width]`` kernel.
        kernel: [usize; 2],
        /// ``[height, width]`` stride.
        stride: [usize; 2],
        /// ``[height, width]`` padding.
        padding: [usize; 2],
    },

    /// A bottleneck width resolved to zero.
    #[error(
        "{layer}: invalid bottleneck width (base_width={base_width}, planes={planes}, groups={groups})"
    )]
    InvalidWidth {
        /// The planned layer path.
        layer: String,
        /// Base width.
        base_width: usize,
        /// Nominal output planes.
        planes: usize,
        /// Convolution groups.
        groups: usize,
    },

    /// A grouped convolution whose channel counts do not split into `groups`.
    #[error("{layer}: channels {in_channels} -> {out_channels} do not split into {groups} groups")]
    UngroupedChannels {
        /// The planned layer path.
        layer: String,
        /// Input channels.
        in_channels: usize,
        /// Output channels.
        out_channels: usize,
        /// Convolution groups.
        groups: usize,
    },

    /// The residual merge would add tensors of different shapes.
    #[error("{layer}: shortcut output {shortcut} does not match residual output {residual}")]
    ShortcutMismatch {
        /// The planned layer path.
        layer: String,
        /// The shape leaving the shortcut path.
        shortcut: FeatureShape,
        /// The shape leaving the residual path.
        residual: FeatureShape,
    },

    /// A stage with no blocks.
    #[error("{layer}: stage has no blocks")]
    EmptyStage {
        /// The planned layer path.
        layer: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ResNetConfigError::UnsupportedVersion(26).to_string(),
            "unsupported ResNet version 26; expected one of 18, 34, 50, 101, 152"
        );

        let err = ResNetConfigError::DegenerateShape {
            layer: "stem.conv".to_string(),
            input: FeatureShape::new(3, 2, 2),
            kernel: [7, 7],
            stride: [2, 2],
            padding: [0, 0],
        };
        assert_eq!(
            err.to_string(),
            "stem.conv: no legal output size for input (3, 2, 2) with kernel [7, 7], stride [2, 2], padding [0, 0]"
        );

        let err = ResNetConfigError::UngroupedChannels {
            layer: "layer1.0.conv2".to_string(),
            in_channels: 8,
            out_channels: 6,
            groups: 4,
        };
        assert_eq!(
            err.to_string(),
            "layer1.0.conv2: channels 8 -> 6 do not split into 4 groups"
        );
    }
}
