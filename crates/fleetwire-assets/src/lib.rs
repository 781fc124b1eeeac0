//! FleetWire asset federation.
//!
//! Assets are the people, hardware and places devices get assigned to.
//! Each [`AssetModule`] wraps one [`AssetSource`] and an optional metered
//! [`Cache`]; the [`AssetModuleManager`] routes lookups by module id.

pub mod asset;
pub mod cache;
pub mod error;
pub mod federation;
pub mod module;
pub mod source;

pub use asset::{Asset, AssetDetails, AssetMatcher, AssetType};
pub use cache::{Cache, CacheStats};
pub use error::{AssetError, AssetResult};
pub use federation::AssetModuleManager;
pub use module::{AssetModule, RefreshResponse, RefreshResult};
pub use source::{AssetSource, DynAssetSource, JsonFileAssetSource, StaticAssetSource};
