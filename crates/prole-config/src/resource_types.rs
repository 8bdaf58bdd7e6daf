//! Resource-type name to image mapping.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource types available when no configuration says otherwise.
pub const DEFAULT_RESOURCE_TYPES: &str =
    r#"{"git":"concourse/git-resource","raw":"concourse/raw-resource"}"#;

/// A resource type and the image implementing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    pub image: String,
}

/// The set of resource types this worker can run, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypes(Vec<ResourceType>);

impl ResourceTypes {
    pub fn new(types: impl IntoIterator<Item = ResourceType>) -> Self {
        let by_name: BTreeMap<String, String> = types
            .into_iter()
            .map(|rt| (rt.name, rt.image))
            .collect();
        Self::from_map(by_name)
    }

    fn from_map(by_name: BTreeMap<String, String>) -> Self {
        Self(
            by_name
                .into_iter()
                .map(|(name, image)| ResourceType { name, image })
                .collect(),
        )
    }

    /// Image implementing the named resource type.
    pub fn image_for(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|rt| rt.name == name)
            .map(|rt| rt.image.as_str())
    }

    /// Layer `other` on top of these types; `other` wins on name clashes.
    pub fn merge(&self, other: &ResourceTypes) -> ResourceTypes {
        let mut by_name: BTreeMap<String, String> = self
            .0
            .iter()
            .map(|rt| (rt.name.clone(), rt.image.clone()))
            .collect();
        for rt in &other.0 {
            by_name.insert(rt.name.clone(), rt.image.clone());
        }
        Self::from_map(by_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceType> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse a JSON object mapping resource type names to images, e.g.
/// `{"git":"concourse/git-resource"}`.
pub fn parse_resource_types(json: &str) -> ConfigResult<ResourceTypes> {
    let by_name: BTreeMap<String, String> = serde_json::from_str(json)?;

    for (name, image) in &by_name {
        if image.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("resource type {}", name),
                message: "image must not be empty".to_string(),
            });
        }
    }

    Ok(ResourceTypes::from_map(by_name))
}
