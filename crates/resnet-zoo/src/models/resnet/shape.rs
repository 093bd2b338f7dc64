//! # Feature Shape Bookkeeping
//!
//! [`FeatureShape`] is the immutable cursor threaded through layer planning;
//! each planning call takes the shape entering a layer and returns the shape
//! leaving it.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Predict the output size of a 1D convolution (or pooling) operation.
///
/// ```text
/// out_size = floor((in_size - kernel_size + 2*padding) / stride) + 1
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
///   visual explanations of these convolution parameters.
///
/// # Arguments
///
/// - `input_size`: The input dimension size.
/// - `kernel_size`: The kernel size.
/// - `stride`: The stride of the convolution.
/// - `padding`: The padding of the convolution, added evenly to both sides of the input.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0,
/// or for a zero input, kernel, or stride.
pub fn maybe_conv_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
) -> Option<usize> {
    if input_size == 0 || kernel_size == 0 || stride == 0 {
        return None;
    }

    let effective_size = input_size + 2 * padding;
    if effective_size < kernel_size {
        return None;
    }
    Some((effective_size - kernel_size) / stride + 1)
}

/// A channels-first feature map shape, without the batch dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureShape {
    /// Number of channels.
    pub channels: usize,

    /// Spatial height.
    pub height: usize,

    /// Spatial width.
    pub width: usize,
}

impl fmt::Display for FeatureShape {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "({}, {}, {})", self.channels, self.height, self.width)
    }
}

impl FeatureShape {
    /// Create a new shape.
    pub const fn new(
        channels: usize,
        height: usize,
        width: usize,
    ) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Is any dimension zero?
    pub fn is_empty(&self) -> bool {
        self.channels == 0 || self.height == 0 || self.width == 0
    }

    /// The spatial ``[height, width]`` resolution.
    pub fn resolution(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    /// The same spatial resolution with a new channel count.
    pub fn with_channels(
        self,
        channels: usize,
    ) -> Self {
        Self { channels, ..self }
    }

    /// Predict the shape after a 2d convolution or pooling window.
    ///
    /// All geometry arrays are ``[height, width]``.
    ///
    /// # Returns
    ///
    /// `None` if either spatial output dimension would be <= 0.
    pub fn conv2d(
        &self,
        out_channels: usize,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
    ) -> Option<Self> {
        Some(Self {
            channels: out_channels,
            height: maybe_conv_output_size(self.height, kernel_size[0], stride[0], padding[0])?,
            width: maybe_conv_output_size(self.width, kernel_size[1], stride[1], padding[1])?,
        })
    }
}
