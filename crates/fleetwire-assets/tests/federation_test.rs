//! Asset federation integration tests.
//!
//! Two modules backed by JSON files ("scim" people, "wso2" people) are
//! registered with one manager and driven through its lifecycle.

use fleetwire_assets::{
    Asset, AssetError, AssetModule, AssetModuleManager, AssetType, JsonFileAssetSource,
    RefreshResult, StaticAssetSource,
};
use fleetwire_core::{Coded, ErrorCode, Lifecycle, LifecycleExt, LifecycleStatus};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_assets(path: &Path, assets: serde_json::Value) {
    std::fs::write(path, serde_json::to_vec(&assets).unwrap()).unwrap();
}

fn scim_people() -> serde_json::Value {
    json!([
        {"id": "u-3", "name": "Zoe", "type": "person", "userName": "zoe", "roles": ["driver"]},
        {"id": "u-1", "name": "Ada", "type": "person", "userName": "ada", "roles": ["Driver", "admin"]},
        {"id": "u-2", "name": "Max", "type": "person", "userName": "max", "roles": ["mechanic"]},
        {"id": "u-4", "name": "Ada", "type": "person", "userName": "ada2", "roles": ["driver"]}
    ])
}

fn wso2_people() -> serde_json::Value {
    json!([
        {"id": "w-1", "name": "Kim", "type": "person", "userName": "kim",
         "emailAddress": "kim@example.com", "roles": ["dispatcher"]}
    ])
}

struct Fixture {
    _dir: TempDir,
    scim_path: std::path::PathBuf,
    manager: Arc<AssetModuleManager>,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let scim_path = dir.path().join("scim.json");
    let wso2_path = dir.path().join("wso2.json");
    write_assets(&scim_path, scim_people());
    write_assets(&wso2_path, wso2_people());

    let mut manager = AssetModuleManager::new();
    manager
        .register(Arc::new(
            AssetModule::new(
                "scim",
                "SCIM users",
                AssetType::Person,
                Arc::new(JsonFileAssetSource::new(&scim_path)),
            )
            .with_cache(true),
        ))
        .unwrap();
    manager
        .register(Arc::new(AssetModule::new(
            "wso2",
            "WSO2 users",
            AssetType::Person,
            Arc::new(JsonFileAssetSource::new(&wso2_path)),
        )))
        .unwrap();

    let manager = Arc::new(manager);
    assert_eq!(manager.lifecycle_start().await.unwrap(), LifecycleStatus::Started);

    Fixture {
        _dir: dir,
        scim_path,
        manager,
    }
}

#[tokio::test]
async fn test_search_sorted_by_natural_order() {
    let fx = fixture().await;

    let drivers = fx.manager.search("scim", "role=driver").await.unwrap();
    let ids: Vec<_> = drivers.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["u-1", "u-4", "u-3"]);

    let again = fx.manager.search("scim", "role=driver").await.unwrap();
    assert_eq!(drivers, again);

    let all = fx.manager.search("scim", "").await.unwrap();
    assert_eq!(all.len(), 4);

    let by_email = fx.manager.search("wso2", "example.com").await.unwrap();
    assert_eq!(by_email.len(), 1);
    assert_eq!(by_email[0].id, "w-1");
}

#[tokio::test]
async fn test_unknown_module() {
    let fx = fixture().await;

    let err = fx.manager.search("missing", "x").await.unwrap_err();
    assert!(matches!(err, AssetError::UnknownModule(ref id) if id == "missing"));
    assert_eq!(err.code(), ErrorCode::UnknownAssetModule);

    let err = fx.manager.get_asset_by_id("missing", "u-1").await.unwrap_err();
    assert!(matches!(err, AssetError::UnknownModule(_)));
}

#[tokio::test]
async fn test_duplicate_module_rejected() {
    let mut manager = AssetModuleManager::new();
    let module = || {
        Arc::new(AssetModule::new(
            "hw",
            "Hardware",
            AssetType::Hardware,
            Arc::new(StaticAssetSource::new(vec![Asset::hardware("h", "H", "S")])),
        ))
    };
    manager.register(module()).unwrap();
    let err = manager.register(module()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateAssetModule);
    assert_eq!(manager.module_ids(), vec!["hw".to_string()]);
}

#[tokio::test]
async fn test_refresh_failure_is_isolated() {
    let fx = fixture().await;
    std::fs::write(&fx.scim_path, b"{ not json").unwrap();

    let responses = fx.manager.refresh_modules().await;
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].module_id, "scim");
    assert_eq!(responses[0].result, RefreshResult::Failed);
    assert!(!responses[0].message.is_empty());
    assert_eq!(responses[1].module_id, "wso2");
    assert_eq!(responses[1].result, RefreshResult::Successful);

    // the failed module keeps serving its last good data
    assert!(fx
        .manager
        .get_asset_by_id("scim", "u-2")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_cache_counters_reset_on_refresh() {
    let fx = fixture().await;

    fx.manager.get_asset_by_id("scim", "u-1").await.unwrap();
    fx.manager.get_asset_by_id("scim", "u-1").await.unwrap();
    fx.manager.get_asset_by_id("scim", "ghost").await.unwrap();

    let stats = fx.manager.cache_stats();
    assert_eq!(stats.len(), 1);
    let (module_id, scim) = &stats[0];
    assert_eq!(module_id, "scim");
    assert_eq!(scim.request_count, 3);
    assert_eq!(scim.hit_count, 1);
    assert_eq!(scim.element_count, 1);

    let responses = fx.manager.refresh_modules().await;
    assert!(responses.iter().all(|r| r.is_successful()));

    let (_, scim) = &fx.manager.cache_stats()[0];
    assert_eq!(scim.request_count, 0);
    assert_eq!(scim.hit_count, 0);
}

#[tokio::test]
async fn test_module_load_failure_puts_manager_in_error() {
    let dir = TempDir::new().unwrap();
    let mut manager = AssetModuleManager::new();
    manager
        .register(Arc::new(AssetModule::new(
            "scim",
            "SCIM users",
            AssetType::Person,
            Arc::new(JsonFileAssetSource::new(dir.path().join("absent.json"))),
        )))
        .unwrap();

    assert!(manager.lifecycle_start().await.is_err());
    assert_eq!(manager.component().status(), LifecycleStatus::Error);
    let module = manager.module("scim").unwrap();
    assert_eq!(module.component().status(), LifecycleStatus::Error);
}
