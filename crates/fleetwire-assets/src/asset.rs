//! Asset model and search matching.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Capability type of an asset module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Person,
    Hardware,
    Device,
    Location,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Person => "person",
            AssetType::Hardware => "hardware",
            AssetType::Device => "device",
            AssetType::Location => "location",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "person" => Ok(AssetType::Person),
            "hardware" => Ok(AssetType::Hardware),
            "device" => Ok(AssetType::Device),
            "location" => Ok(AssetType::Location),
            other => Err(format!("Unknown asset type: {}", other)),
        }
    }
}

/// Type-specific asset fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum AssetDetails {
    Person {
        user_name: String,
        #[serde(default)]
        email_address: Option<String>,
        #[serde(default)]
        roles: Vec<String>,
    },
    Hardware {
        sku: String,
        #[serde(default)]
        description: Option<String>,
    },
    Device {
        sku: String,
        #[serde(default)]
        description: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        elevation: Option<f64>,
    },
}

/// An entity a device can be assigned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(flatten)]
    pub details: AssetDetails,
}

impl Asset {
    pub fn person(id: &str, name: &str, user_name: &str, roles: &[&str]) -> Self {
        Self::new(
            id,
            name,
            AssetDetails::Person {
                user_name: user_name.to_string(),
                email_address: None,
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        )
    }

    pub fn hardware(id: &str, name: &str, sku: &str) -> Self {
        Self::new(
            id,
            name,
            AssetDetails::Hardware {
                sku: sku.to_string(),
                description: None,
            },
        )
    }

    pub fn new(id: &str, name: &str, details: AssetDetails) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            image_url: None,
            properties: BTreeMap::new(),
            details,
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn asset_type(&self) -> AssetType {
        match self.details {
            AssetDetails::Person { .. } => AssetType::Person,
            AssetDetails::Hardware { .. } => AssetType::Hardware,
            AssetDetails::Device { .. } => AssetType::Device,
            AssetDetails::Location { .. } => AssetType::Location,
        }
    }

    /// Natural order: name, then id.
    pub fn natural_order(a: &Asset, b: &Asset) -> Ordering {
        a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
    }

    /// Lower-cased free-text fields searched by plain criteria.
    fn text_fields(&self) -> Vec<String> {
        let mut fields = vec![self.id.to_lowercase(), self.name.to_lowercase()];
        match &self.details {
            AssetDetails::Person {
                user_name,
                email_address,
                ..
            } => {
                fields.push(user_name.to_lowercase());
                if let Some(email) = email_address {
                    fields.push(email.to_lowercase());
                }
            }
            AssetDetails::Hardware { sku, description }
            | AssetDetails::Device { sku, description } => {
                fields.push(sku.to_lowercase());
                if let Some(description) = description {
                    fields.push(description.to_lowercase());
                }
            }
            AssetDetails::Location { .. } => {}
        }
        fields
    }

    fn field_equals(&self, key: &str, value: &str) -> bool {
        let eq = |candidate: &str| candidate.to_lowercase() == value;
        match (key, &self.details) {
            ("role" | "roles", AssetDetails::Person { roles, .. }) => roles.iter().any(|r| eq(r)),
            ("id", _) => eq(&self.id),
            ("name", _) => eq(&self.name),
            ("type", _) => self.asset_type().as_str() == value,
            ("username", AssetDetails::Person { user_name, .. }) => eq(user_name),
            ("email", AssetDetails::Person { email_address, .. }) => {
                email_address.as_deref().map(eq).unwrap_or(false)
            }
            ("sku", AssetDetails::Hardware { sku, .. } | AssetDetails::Device { sku, .. }) => {
                eq(sku)
            }
            _ => self
                .properties
                .iter()
                .any(|(k, v)| k.to_lowercase() == key && eq(v)),
        }
    }
}

/// Parsed search criteria.
///
/// Criteria are lower-cased. Empty criteria match everything, `key=value`
/// matches a named field or property, anything else is a substring search
/// over the text fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetMatcher {
    All,
    Field { key: String, value: String },
    Text(String),
}

impl AssetMatcher {
    pub fn parse(criteria: &str) -> Self {
        let criteria = criteria.trim().to_lowercase();
        if criteria.is_empty() {
            return AssetMatcher::All;
        }
        match criteria.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => AssetMatcher::Field {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            },
            _ => AssetMatcher::Text(criteria),
        }
    }

    pub fn matches(&self, asset: &Asset) -> bool {
        match self {
            AssetMatcher::All => true,
            AssetMatcher::Field { key, value } => asset.field_equals(key, value),
            AssetMatcher::Text(text) => asset.text_fields().iter().any(|f| f.contains(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn driver() -> Asset {
        Asset::person("p-1", "Dana Driver", "dana", &["Driver", "ops"])
            .with_property("Region", "North")
    }

    #[test]
    fn test_matcher_forms() {
        let asset = driver();
        assert!(AssetMatcher::parse("").matches(&asset));
        assert!(AssetMatcher::parse("  ").matches(&asset));
        assert!(AssetMatcher::parse("role=driver").matches(&asset));
        assert!(!AssetMatcher::parse("role=mechanic").matches(&asset));
        assert!(AssetMatcher::parse("region=north").matches(&asset));
        assert!(AssetMatcher::parse("DANA").matches(&asset));
        assert!(AssetMatcher::parse("type=person").matches(&asset));
        assert!(!AssetMatcher::parse("sku=x").matches(&asset));
    }

    #[test]
    fn test_serde_flattened_details() {
        let asset: Asset = serde_json::from_value(json!({
            "id": "hw-1",
            "name": "Gateway",
            "type": "hardware",
            "sku": "GW-100",
            "description": "Edge gateway"
        }))
        .unwrap();
        assert_eq!(asset.asset_type(), AssetType::Hardware);
        assert!(AssetMatcher::parse("edge").matches(&asset));
        assert!(AssetMatcher::parse("sku=gw-100").matches(&asset));
    }

    #[test]
    fn test_natural_order() {
        let mut assets = vec![
            Asset::hardware("b", "Zeta", "z"),
            Asset::hardware("c", "Alpha", "a"),
            Asset::hardware("a", "Alpha", "a"),
        ];
        assets.sort_by(Asset::natural_order);
        let ids: Vec<_> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }
}
