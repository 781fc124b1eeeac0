//! Asset module federation.
//!
//! The manager routes lookups to named modules and owns them as lifecycle
//! children, so starting the manager loads every module.

use fleetwire_core::lifecycle::{Lifecycle, LifecycleComponent};
use fleetwire_core::{ComponentType, DynLifecycle};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

use crate::asset::Asset;
use crate::cache::CacheStats;
use crate::error::{AssetError, AssetResult};
use crate::module::{AssetModule, RefreshResponse};

pub struct AssetModuleManager {
    component: LifecycleComponent,
    modules: Vec<Arc<AssetModule>>,
    index: HashMap<String, usize>,
}

impl AssetModuleManager {
    pub fn new() -> Self {
        Self {
            component: LifecycleComponent::new("asset-modules", ComponentType::AssetModuleManager),
            modules: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a module. Ids are unique within the federation.
    pub fn register(&mut self, module: Arc<AssetModule>) -> AssetResult<()> {
        let id = module.id().to_string();
        if self.index.contains_key(&id) {
            return Err(AssetError::DuplicateModule(id));
        }
        tracing::debug!(module = %id, asset_type = %module.asset_type(), "Asset module registered");
        self.index.insert(id, self.modules.len());
        self.component.add_child(module.clone() as DynLifecycle);
        self.modules.push(module);
        Ok(())
    }

    pub fn module(&self, module_id: &str) -> AssetResult<&Arc<AssetModule>> {
        self.index
            .get(module_id)
            .map(|&i| &self.modules[i])
            .ok_or_else(|| AssetError::UnknownModule(module_id.to_string()))
    }

    /// Module ids in registration order.
    pub fn module_ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.id().to_string()).collect()
    }

    pub async fn get_asset_by_id(&self, module_id: &str, id: &str) -> AssetResult<Option<Asset>> {
        self.module(module_id)?.get_asset(id).await
    }

    /// Search one module. Results are in natural asset order.
    pub async fn search(&self, module_id: &str, criteria: &str) -> AssetResult<Vec<Asset>> {
        let mut assets = self.module(module_id)?.search(criteria).await?;
        assets.sort_by(Asset::natural_order);
        Ok(assets)
    }

    /// Refresh every module concurrently. One response per module, in
    /// registration order; a failing module does not affect the others.
    pub async fn refresh_modules(&self) -> Vec<RefreshResponse> {
        let responses = join_all(self.modules.iter().map(|m| m.refresh())).await;
        let failed = responses.iter().filter(|r| !r.is_successful()).count();
        tracing::info!(modules = responses.len(), failed, "Asset modules refreshed");
        responses
    }

    /// Cache statistics of every module with a cache, by module id.
    pub fn cache_stats(&self) -> Vec<(String, CacheStats)> {
        self.modules
            .iter()
            .filter_map(|m| m.cache_stats().map(|stats| (m.id().to_string(), stats)))
            .collect()
    }
}

impl Default for AssetModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AssetModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetModuleManager")
            .field("modules", &self.module_ids())
            .field("status", &self.component.status())
            .finish()
    }
}

impl Lifecycle for AssetModuleManager {
    fn component(&self) -> &LifecycleComponent {
        &self.component
    }
}
