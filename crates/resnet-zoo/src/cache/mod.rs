//! # Local Weight Cache
//!
//! Resource keys map to paths under ``~/.cache/<root_cache_key>``.
//! Nothing here downloads; files are placed by the user or by
//! [`crate::models::resnet::persistence`].

pub mod disk;

pub use disk::DiskCacheConfig;
