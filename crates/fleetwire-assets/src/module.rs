//! Asset modules.
//!
//! A module fronts one [`AssetSource`] with a capability type and an
//! optional metered cache for id lookups.

use async_trait::async_trait;
use fleetwire_core::lifecycle::{self, Lifecycle, LifecycleComponent, LifecycleError};
use fleetwire_core::ComponentType;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::asset::{Asset, AssetMatcher, AssetType};
use crate::cache::{Cache, CacheStats};
use crate::error::AssetResult;
use crate::source::DynAssetSource;

/// Outcome of a module refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshResult {
    Successful,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub module_id: String,
    pub result: RefreshResult,
    pub message: String,
}

impl RefreshResponse {
    pub fn is_successful(&self) -> bool {
        self.result == RefreshResult::Successful
    }
}

pub struct AssetModule {
    component: LifecycleComponent,
    id: String,
    name: String,
    asset_type: AssetType,
    source: DynAssetSource,
    cache_enabled: bool,
    cache: RwLock<Option<Arc<Cache<String, Asset>>>>,
}

impl AssetModule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        asset_type: AssetType,
        source: DynAssetSource,
    ) -> Self {
        let id = id.into();
        Self {
            component: LifecycleComponent::new(
                format!("asset-module:{}", id),
                ComponentType::AssetModule,
            ),
            id,
            name: name.into(),
            asset_type,
            source,
            cache_enabled: false,
            cache: RwLock::new(None),
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    fn current_cache(&self) -> Option<Arc<Cache<String, Asset>>> {
        self.cache.read().clone()
    }

    fn replace_cache(&self) {
        if self.cache_enabled {
            let cache = Cache::new(format!("{} ({})", self.name, self.asset_type));
            *self.cache.write() = Some(Arc::new(cache));
        }
    }

    /// Look up one asset, consulting the cache first when enabled.
    pub async fn get_asset(&self, id: &str) -> AssetResult<Option<Asset>> {
        let cache = self.current_cache();
        if let Some(cache) = &cache {
            if let Some(asset) = cache.get(id) {
                return Ok(Some(asset));
            }
        }

        let asset = self.source.get(id).await?;
        if let (Some(cache), Some(asset)) = (&cache, &asset) {
            cache.put(asset.id.clone(), asset.clone());
        }
        Ok(asset)
    }

    /// Unsorted search; the federation orders results.
    pub async fn search(&self, criteria: &str) -> AssetResult<Vec<Asset>> {
        let matcher = AssetMatcher::parse(criteria);
        self.source.search(&matcher).await
    }

    /// Reload the source. On success the cache is replaced, which resets its
    /// counters; on failure the previous cache is kept.
    pub async fn refresh(&self) -> RefreshResponse {
        match self.source.reload().await {
            Ok(count) => {
                self.replace_cache();
                tracing::info!(module = %self.id, count, "Asset module refreshed");
                RefreshResponse {
                    module_id: self.id.clone(),
                    result: RefreshResult::Successful,
                    message: "Refresh successful.".to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(module = %self.id, error = %e, "Asset module refresh failed");
                RefreshResponse {
                    module_id: self.id.clone(),
                    result: RefreshResult::Failed,
                    message: e.to_string(),
                }
            }
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.current_cache().map(|cache| cache.stats())
    }
}

impl std::fmt::Debug for AssetModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetModule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("asset_type", &self.asset_type)
            .field("cache_enabled", &self.cache_enabled)
            .field("status", &self.component.status())
            .finish()
    }
}

#[async_trait]
impl Lifecycle for AssetModule {
    fn component(&self) -> &LifecycleComponent {
        &self.component
    }

    async fn on_start(&self) -> lifecycle::Result<()> {
        let count = self.source.reload().await.map_err(|e| LifecycleError::Failed {
            component: self.component.name().to_string(),
            reason: e.to_string(),
        })?;
        self.replace_cache();
        tracing::info!(
            module = %self.id,
            asset_type = %self.asset_type,
            count,
            cached = self.cache_enabled,
            "Asset module loaded"
        );
        Ok(())
    }

    async fn on_stop(&self) -> lifecycle::Result<()> {
        *self.cache.write() = None;
        Ok(())
    }
}
