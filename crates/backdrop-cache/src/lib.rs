//! Caching of remote movie backdrop images.
//!
//! The [`AssetProvider`](provider::AssetProvider) answers lookups synchronously from an in-memory
//! cache or the on-disk cache and falls back to a placeholder. Missing assets are prepared by a
//! single shared computation per asset id, which downloads the source image, downsamples it and
//! persists the result before it becomes visible.

#[macro_use]
pub mod metrics;

pub mod asset;
pub mod caching;
pub mod config;
pub mod downsample;
pub mod fetch;
pub mod logging;
pub mod provider;
pub mod utils;

pub use asset::{Asset, AssetId};
pub use caching::{AssetEntry, AssetError};
pub use provider::{AssetObserver, AssetProvider, InFlightHandle};
