//! FleetWire configuration file.
//!
//! ```toml
//! [[pipelines]]
//! source_id = "mqtt-json"
//! payload_kind = "json-batch"
//! update_assignment_state = true
//!
//! [destination]
//! command_topic = "fleet/{hardware_id}/command"
//!
//! [router]
//! default_destination = "default"
//!
//! [router.mappings]
//! tracker = "default"
//!
//! [batch]
//! throttle_ms = 50
//!
//! [[assets]]
//! id = "scim"
//! name = "SCIM users"
//! asset_type = "person"
//! path = "assets/scim.json"
//! cache = true
//! ```

use anyhow::{Context, Result};
use fleetwire_assets::AssetType;
use fleetwire_core::config::{defaults, env_vars, resolve_relative};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub pipelines: Vec<PipelineSection>,
    pub destination: DestinationSection,
    pub router: RouterSection,
    pub batch: BatchSection,
    pub assets: Vec<AssetModuleSection>,
    pub devices: Vec<DeviceSection>,
    pub commands: Vec<CommandSection>,

    /// Directory of the loaded file; relative asset paths resolve against it.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    pub source_id: String,
    pub payload_kind: String,
    #[serde(default)]
    pub update_assignment_state: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationSection {
    pub id: String,
    pub command_topic: String,
    pub system_topic: String,
    pub channel_capacity: usize,
}

impl Default for DestinationSection {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            command_topic: defaults::COMMAND_TOPIC.to_string(),
            system_topic: defaults::SYSTEM_TOPIC.to_string(),
            channel_capacity: defaults::DELIVERY_CHANNEL_CAPACITY,
        }
    }
}

/// Specification token to destination id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub mappings: BTreeMap<String, String>,
    pub default_destination: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub throttle_ms: u64,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            throttle_ms: defaults::BATCH_THROTTLE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetModuleSection {
    pub id: String,
    pub name: String,
    pub asset_type: AssetType,
    pub path: String,
    #[serde(default)]
    pub cache: bool,
}

/// Seed device, optionally with an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    pub hardware_id: String,
    pub specification_token: String,
    #[serde(default)]
    pub assignment_token: Option<String>,
}

/// Seed command definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSection {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl FleetConfig {
    /// Load from `path`. A missing file yields the defaults; environment
    /// overrides apply either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mut config: FleetConfig = toml::from_str(&raw)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?;
            config.base_dir = path.parent().map(Path::to_path_buf);
            config
        } else {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            FleetConfig::default()
        };

        if let Some(throttle_ms) = env_vars::batch_throttle_ms() {
            config.batch.throttle_ms = throttle_ms;
        }
        Ok(config)
    }

    pub fn asset_path(&self, section: &AssetModuleSection) -> PathBuf {
        resolve_relative(self.base_dir.as_deref(), &section.path)
    }
}
