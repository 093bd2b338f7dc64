//! # `ResNet` Archives
//!
//! A [`ResNetArchive`] bundles a [`ResNet`] record with the JSON of the
//! [`ResNetStructureConfig`] it was initialized from, under the fixed
//! archive name [`RESNET_ARCHIVE_NAME`].
//!
//! Archives are written with [`NamedMpkFileRecorder`] at full precision;
//! the recorder forces the ``.mpk`` extension.

use crate::models::resnet::resnet_model::{ResNet, ResNetRecord, ResNetStructureConfig};
use anyhow::{Context, anyhow, bail};
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder};
use std::path::PathBuf;
use tracing::info;

/// The archive name every `ResNet` is registered under.
pub const RESNET_ARCHIVE_NAME: &str = "ResNet";

/// The recorder used for all archives.
pub type ArchiveRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// A saved `ResNet`.
#[derive(Record)]
pub struct ResNetArchive<B: Backend> {
    /// Archive name; always [`RESNET_ARCHIVE_NAME`] for archives written here.
    pub name: String,

    /// JSON of the [`ResNetStructureConfig`].
    pub structure: String,

    /// The module record.
    pub model: ResNetRecord<B>,
}

impl<B: Backend> ResNetArchive<B> {
    /// Decode the stored structure.
    ///
    /// # Errors
    ///
    /// When the archive name is not [`RESNET_ARCHIVE_NAME`],
    /// the structure JSON does not parse,
    /// or the decoded layers do not chain.
    pub fn checked_structure(&self) -> anyhow::Result<ResNetStructureConfig> {
        if self.name != RESNET_ARCHIVE_NAME {
            bail!(
                "archive name {:?} is not {:?}",
                self.name,
                RESNET_ARCHIVE_NAME
            );
        }
        let structure: ResNetStructureConfig = serde_json::from_str(&self.structure)
            .context("decoding archived ResNet structure")?;
        structure
            .try_validate()
            .map_err(|e| anyhow!("archived ResNet structure is inconsistent: {e}"))?;
        Ok(structure)
    }
}

/// Read a raw archive.
pub fn read_archive<B: Backend>(
    path: impl Into<PathBuf>,
    device: &B::Device,
) -> anyhow::Result<ResNetArchive<B>> {
    let path = path.into();
    <ArchiveRecorder as Recorder<B>>::load(&ArchiveRecorder::new(), path.clone(), device)
        .with_context(|| format!("reading ResNet archive {}", path.display()))
}

/// Write a raw archive.
pub fn write_archive<B: Backend>(
    archive: ResNetArchive<B>,
    path: impl Into<PathBuf>,
) -> anyhow::Result<()> {
    let path = path.into();
    <ArchiveRecorder as Recorder<B>>::record(&ArchiveRecorder::new(), archive, path.clone())
        .with_context(|| format!("writing ResNet archive {}", path.display()))?;
    Ok(())
}

/// Reconstruct a [`ResNet`] from an archive alone.
pub fn load_resnet<B: Backend>(
    path: impl Into<PathBuf>,
    device: &B::Device,
) -> anyhow::Result<ResNet<B>> {
    let archive = read_archive::<B>(path, device)?;
    let structure = archive.checked_structure()?;
    Ok(structure.init(device).load_record(archive.model))
}

impl<B: Backend> ResNet<B> {
    /// Save the model as a `ResNet` archive.
    pub fn save_model(
        &self,
        path: impl Into<PathBuf>,
    ) -> anyhow::Result<()> {
        let path = path.into();
        let structure =
            serde_json::to_string(self.structure()).context("encoding ResNet structure")?;

        write_archive(
            ResNetArchive {
                name: RESNET_ARCHIVE_NAME.to_string(),
                structure,
                model: self.clone().into_record(),
            },
            path.clone(),
        )?;

        info!(version = %self.version(), path = %path.display(), "Saved ResNet archive");
        Ok(())
    }

    /// Load the weights of a `ResNet` archive into this model.
    ///
    /// The archived structure must be weight compatible with this model;
    /// see [`ResNetStructureConfig::is_weight_compatible`].
    pub fn load_model(
        self,
        path: impl Into<PathBuf>,
        device: &B::Device,
    ) -> anyhow::Result<Self> {
        let archive = read_archive::<B>(path, device)?;
        let stored = archive.checked_structure()?;

        if !self.structure().is_weight_compatible(&stored) {
            bail!(
                "archived {} structure does not fit this {} model",
                stored.version,
                self.version()
            );
        }

        Ok(self.load_record(archive.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::resnet_model::ResNetConfig;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_save_load_round_trip() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("model");

        let model: ResNet<B> = ResNetConfig::new(18, 3, 32, 32)
            .with_num_classes(7)
            .try_init(&device)
            .unwrap();
        model.save_model(path.clone()).unwrap();
        assert!(tmp.path().join("model.mpk").is_file());

        let input = Tensor::<B, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let expected = model.forward(input.clone()).to_data();

        // Into a freshly initialized twin.
        let twin: ResNet<B> = ResNetConfig::new(18, 3, 32, 32)
            .with_num_classes(7)
            .try_init(&device)
            .unwrap();
        let twin = twin.load_model(path.clone(), &device).unwrap();
        twin.forward(input.clone()).to_data().assert_eq(&expected, true);

        // From the archive alone.
        let restored = load_resnet::<B>(path, &device).unwrap();
        assert_eq!(restored.version(), model.version());
        assert_eq!(restored.num_classes(), Some(7));
        restored.forward(input).to_data().assert_eq(&expected, true);
    }

    #[test]
    fn test_wrong_archive_name() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("darknet");

        let model: ResNet<B> = ResNetConfig::new(18, 3, 32, 32)
            .with_include_top(false)
            .try_init(&device)
            .unwrap();
        write_archive(
            ResNetArchive {
                name: "DarkNet".to_string(),
                structure: serde_json::to_string(model.structure()).unwrap(),
                model: model.clone().into_record(),
            },
            path.clone(),
        )
        .unwrap();

        let err = model.load_model(path.clone(), &device).unwrap_err();
        assert!(err.to_string().contains("DarkNet"));
        assert!(load_resnet::<B>(path, &device).is_err());
    }

    #[test]
    fn test_incompatible_structure() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resnet18");

        let resnet18: ResNet<B> = ResNetConfig::new(18, 3, 32, 32)
            .with_num_classes(5)
            .try_init(&device)
            .unwrap();
        resnet18.save_model(path.clone()).unwrap();

        let resnet34: ResNet<B> = ResNetConfig::new(34, 3, 32, 32)
            .with_num_classes(5)
            .try_init(&device)
            .unwrap();
        assert!(resnet34.load_model(path.clone(), &device).is_err());

        let wider: ResNet<B> = ResNetConfig::new(18, 3, 32, 32)
            .with_num_classes(6)
            .try_init(&device)
            .unwrap();
        assert!(wider.load_model(path, &device).is_err());
    }

    #[test]
    fn test_inconsistent_structure() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("spliced");

        let model: ResNet<B> = ResNetConfig::new(18, 3, 32, 32)
            .with_num_classes(3)
            .try_init(&device)
            .unwrap();

        // A 64-plane block spliced into the 128-plane stage.
        let mut structure = model.structure().clone();
        let stray = structure.layers[0].blocks[0].clone();
        structure.layers[1].blocks.insert(1, stray);
        assert!(structure.try_validate().is_err());

        write_archive(
            ResNetArchive {
                name: RESNET_ARCHIVE_NAME.to_string(),
                structure: serde_json::to_string(&structure).unwrap(),
                model: model.clone().into_record(),
            },
            path.clone(),
        )
        .unwrap();

        let err = load_resnet::<B>(path.clone(), &device).unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
        assert!(err.to_string().contains("layer2"));
        assert!(model.load_model(path, &device).is_err());
    }

    #[test]
    fn test_missing_archive() {
        let device = Default::default();
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_resnet::<B>(tmp.path().join("absent"), &device).is_err());
    }
}
