//! Asset sources.
//!
//! A source is the backend behind an asset module. FleetWire ships a
//! fixed in-memory source and a JSON file source; directory services plug
//! in by implementing [`AssetSource`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::asset::{Asset, AssetMatcher};
use crate::error::{AssetError, AssetResult};

#[async_trait]
pub trait AssetSource: Send + Sync {
    /// (Re)load the backing data. Returns the number of assets available.
    async fn reload(&self) -> AssetResult<usize>;

    async fn get(&self, id: &str) -> AssetResult<Option<Asset>>;

    async fn search(&self, matcher: &AssetMatcher) -> AssetResult<Vec<Asset>>;
}

pub type DynAssetSource = Arc<dyn AssetSource>;

/// A fixed list of assets.
#[derive(Debug, Clone, Default)]
pub struct StaticAssetSource {
    assets: Vec<Asset>,
}

impl StaticAssetSource {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl AssetSource for StaticAssetSource {
    async fn reload(&self) -> AssetResult<usize> {
        Ok(self.assets.len())
    }

    async fn get(&self, id: &str) -> AssetResult<Option<Asset>> {
        Ok(self.assets.iter().find(|a| a.id == id).cloned())
    }

    async fn search(&self, matcher: &AssetMatcher) -> AssetResult<Vec<Asset>> {
        Ok(self
            .assets
            .iter()
            .filter(|a| matcher.matches(a))
            .cloned()
            .collect())
    }
}

/// Assets loaded from a JSON array file, re-read on every reload.
#[derive(Debug)]
pub struct JsonFileAssetSource {
    path: PathBuf,
    assets: RwLock<Vec<Asset>>,
}

impl JsonFileAssetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            assets: RwLock::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AssetSource for JsonFileAssetSource {
    async fn reload(&self) -> AssetResult<usize> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            AssetError::Source(format!("Unable to read {}: {}", self.path.display(), e))
        })?;
        let assets: Vec<Asset> = serde_json::from_slice(&bytes)?;

        let mut ids = std::collections::HashSet::new();
        if let Some(dup) = assets.iter().find(|a| !ids.insert(a.id.as_str())) {
            return Err(AssetError::Source(format!(
                "Duplicate asset id '{}' in {}",
                dup.id,
                self.path.display()
            )));
        }

        let count = assets.len();
        *self.assets.write() = assets;
        tracing::debug!(path = %self.path.display(), count, "Asset file loaded");
        Ok(count)
    }

    async fn get(&self, id: &str) -> AssetResult<Option<Asset>> {
        Ok(self.assets.read().iter().find(|a| a.id == id).cloned())
    }

    async fn search(&self, matcher: &AssetMatcher) -> AssetResult<Vec<Asset>> {
        Ok(self
            .assets
            .read()
            .iter()
            .filter(|a| matcher.matches(a))
            .cloned()
            .collect())
    }
}
