//! # Pretrained `ResNet` Weights
//!
//! Pretrained weights are `ResNet` archives (see [`super::persistence`])
//! named ``resnet{depth}.mpk`` inside a weights directory.
//! The directory defaults to ``~/.cache/resnet-zoo/weights``.

use crate::cache::DiskCacheConfig;
use crate::models::resnet::resnet_model::ResNet;
use crate::models::resnet::version::ResNetVersion;
use anyhow::bail;
use burn::config::Config;
use burn::prelude::Backend;
use std::path::PathBuf;
use tracing::info;

/// Classifier width of the ImageNet weights.
pub const PRETRAINED_NUM_CLASSES: usize = 1000;

/// Cache resource key of the weights directory.
pub const WEIGHTS_RESOURCE_KEY: &str = "weights";

/// Archive file extension.
pub const WEIGHTS_EXTENSION: &str = "mpk";

/// Pretrained weights location.
#[derive(Config, Debug)]
pub struct PretrainedWeightsConfig {
    /// Explicit weights directory; overrides the cache.
    #[config(default = "None")]
    pub weights_dir: Option<String>,

    /// Cache layout used when `weights_dir` is unset.
    #[config(default = "DiskCacheConfig::new()")]
    pub cache: DiskCacheConfig,
}

impl Default for PretrainedWeightsConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PretrainedWeightsConfig {
    /// The directory holding the weight archives.
    pub fn weights_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.weights_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => self.cache.resource_to_path(&[WEIGHTS_RESOURCE_KEY]),
        }
    }

    /// The archive path for a version, e.g. ``.../resnet50.mpk``.
    pub fn weights_path(
        &self,
        version: ResNetVersion,
    ) -> anyhow::Result<PathBuf> {
        Ok(self
            .weights_dir()?
            .join(format!("{}.{}", version.model_name(), WEIGHTS_EXTENSION)))
    }

    /// Load the pretrained archive for `model`'s version onto `model`.
    ///
    /// # Errors
    ///
    /// When the archive is missing or does not fit the model structure.
    pub fn load<B: Backend>(
        &self,
        model: ResNet<B>,
        device: &B::Device,
    ) -> anyhow::Result<ResNet<B>> {
        let version = model.version();
        let path = self.weights_path(version)?;
        if !path.is_file() {
            bail!(
                "pretrained weights for {} not found at {}",
                version,
                path.display()
            );
        }

        info!(%version, path = %path.display(), "Loading pretrained weights");
        model.load_model(path, device)
    }
}
