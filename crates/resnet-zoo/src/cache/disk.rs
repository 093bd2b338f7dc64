//! # Cache Policy

use anyhow::Context;
use burn::config::Config;
use std::path::PathBuf;

/// Default root cache key.
pub const DEFAULT_ROOT_CACHE_KEY: &str = "resnet-zoo";

/// Cache Policy
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Key for the root cache directory.
    #[config(default = "DEFAULT_ROOT_CACHE_KEY.to_string()")]
    pub root_cache_key: String,

    /// Override for the directory holding the root cache directory.
    ///
    /// Defaults to ``~/.cache``.
    #[config(default = "None")]
    pub cache_home: Option<String>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// Fetch the base cache directory.
    ///
    /// If the cache directory does not exist, does not create it.
    pub fn base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        let home = match &self.cache_home {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("unable to locate the home directory")?
                .join(".cache"),
        };
        Ok(home.join(&self.root_cache_key))
    }

    /// Fetch the base cache directory.
    ///
    /// If the cache directory does not exist, creates it.
    pub fn ensure_base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        let dir = self.base_cache_dir()?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating cache dir {}", dir.display()))?;
        }
        Ok(dir)
    }

    /// Map a resource key to a cache path.
    ///
    /// Does not ensure that the path (or any of the parents) exist.
    pub fn resource_to_path<S: AsRef<str>>(
        &self,
        resource_key: &[S],
    ) -> anyhow::Result<PathBuf> {
        let path = self.base_cache_dir()?;
        Ok(resource_key
            .iter()
            .fold(path, |acc, s| acc.join(s.as_ref())))
    }

    /// Map a resource key to a cache path and ensure the parent directory exists.
    pub fn ensure_resource_parent_dir<S: AsRef<str>>(
        &self,
        resource_key: &[S],
    ) -> anyhow::Result<PathBuf> {
        let path = self.resource_to_path(resource_key)?;
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cache dir {}", parent.display()))?;
        }
        Ok(path)
    }
}
