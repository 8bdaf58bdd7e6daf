//! Worker configuration parsing.

use crate::resource_types::{DEFAULT_RESOURCE_TYPES, ResourceType, ResourceTypes};
use crate::{ConfigError, ConfigResult, parse_resource_types};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Finished builds kept for status and replay unless configured otherwise.
pub const DEFAULT_RETAINED_BUILDS: usize = 100;

/// Worker-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Address the API listens on.
    pub listen_addr: String,
    /// Host directory fetched inputs are written to.
    pub work_dir: PathBuf,
    /// Directory inside containers that relative paths resolve against.
    pub build_root: String,
    /// Leave build containers in place after the build finishes.
    pub keep_containers: bool,
    /// Finished builds kept for status and replay.
    pub retained_builds: usize,
    pub resource_types: ResourceTypes,
}

impl WorkerConfig {
    /// Host directory resource outputs are staged in.
    pub fn scratch_dir(&self) -> PathBuf {
        self.work_dir.join("scratch")
    }

    /// Host directory per-build inputs are fetched into.
    pub fn builds_dir(&self) -> PathBuf {
        self.work_dir.join("builds")
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4637".to_string(),
            work_dir: std::env::temp_dir().join("prole"),
            build_root: "/tmp/build".to_string(),
            keep_containers: false,
            retained_builds: DEFAULT_RETAINED_BUILDS,
            resource_types: parse_resource_types(DEFAULT_RESOURCE_TYPES).unwrap_or_default(),
        }
    }
}

/// Read and parse a worker configuration file.
pub fn load_worker_config(path: impl AsRef<Path>) -> ConfigResult<WorkerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_worker_config(&content)
}

/// Parse a worker configuration from KDL text. Unset fields keep their defaults.
///
/// ```kdl
/// listen "0.0.0.0:4637"
/// work-dir "/var/lib/prole"
/// keep-containers #true
/// retain-builds 50
/// resource-type "git" image="concourse/git-resource"
/// ```
pub fn parse_worker_config(kdl: &str) -> ConfigResult<WorkerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = WorkerConfig::default();
    let mut resource_types = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "listen" => {
                config.listen_addr = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("listen address".to_string()))?;
            }
            "work-dir" => {
                config.work_dir = get_first_string_arg(node)
                    .map(PathBuf::from)
                    .ok_or_else(|| ConfigError::MissingField("work-dir path".to_string()))?;
            }
            "build-root" => {
                let root = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("build-root path".to_string()))?;
                if !root.starts_with('/') {
                    return Err(ConfigError::InvalidValue {
                        field: "build-root".to_string(),
                        message: format!("must be absolute: {}", root),
                    });
                }
                config.build_root = root;
            }
            "keep-containers" => {
                config.keep_containers = get_first_bool_arg(node).unwrap_or(true);
            }
            "retain-builds" => {
                let count = get_first_int_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("retain-builds count".to_string()))?;
                config.retained_builds =
                    usize::try_from(count).map_err(|_| ConfigError::InvalidValue {
                        field: "retain-builds".to_string(),
                        message: format!("must not be negative: {}", count),
                    })?;
            }
            "resource-type" => {
                let rt = parse_resource_type(node)?;
                if resource_types
                    .iter()
                    .any(|existing: &ResourceType| existing.name == rt.name)
                {
                    return Err(ConfigError::Duplicate(format!("resource type {}", rt.name)));
                }
                resource_types.push(rt);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if !resource_types.is_empty() {
        config.resource_types = config
            .resource_types
            .merge(&ResourceTypes::new(resource_types));
    }

    Ok(config)
}

fn parse_resource_type(node: &KdlNode) -> ConfigResult<ResourceType> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("resource-type name".to_string()))?;
    let image = get_string_prop(node, "image")
        .ok_or_else(|| ConfigError::MissingField(format!("image for resource type {}", name)))?;
    Ok(ResourceType { name, image })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_worker_config() {
        let kdl = r#"
            listen "127.0.0.1:9000"
            work-dir "/var/lib/prole"
            build-root "/workspace"
            keep-containers #true
            retain-builds 5

            resource-type "git" image="my/git-resource"
            resource-type "s3" image="my/s3-resource"
        "#;

        let config = parse_worker_config(kdl).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/prole"));
        assert_eq!(config.build_root, "/workspace");
        assert!(config.keep_containers);
        assert_eq!(config.retained_builds, 5);
        assert_eq!(config.scratch_dir(), PathBuf::from("/var/lib/prole/scratch"));
        assert_eq!(config.builds_dir(), PathBuf::from("/var/lib/prole/builds"));
        assert_eq!(config.resource_types.image_for("git"), Some("my/git-resource"));
        assert_eq!(config.resource_types.image_for("s3"), Some("my/s3-resource"));
        // defaults survive unless overridden
        assert_eq!(
            config.resource_types.image_for("raw"),
            Some("concourse/raw-resource")
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_worker_config("").unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.listen_addr, "0.0.0.0:4637");
        assert!(!config.keep_containers);
        assert_eq!(config.retained_builds, DEFAULT_RETAINED_BUILDS);
    }

    #[test]
    fn test_resource_type_requires_image() {
        let result = parse_worker_config(r#"resource-type "git""#);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::MissingField(_)
        ));
    }

    #[test]
    fn test_duplicate_resource_type() {
        let kdl = r#"
            resource-type "git" image="a"
            resource-type "git" image="b"
        "#;
        assert!(matches!(
            parse_worker_config(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    #[test]
    fn test_relative_build_root_is_rejected() {
        let result = parse_worker_config(r#"build-root "tmp/build""#);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_negative_retention_is_rejected() {
        let result = parse_worker_config("retain-builds -1");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_invalid_kdl() {
        let result = parse_worker_config("listen {");
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }
}
