use crate::cache::CacheConfig;
use crate::compression::CompressionConfig;
use crate::core::errors::{ModlinkError, Result};
use crate::core::limits::LoaderLimits;
use crate::monitor::MonitorConfig;
use crate::registry::{Category, Module};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Named set of modules declared together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleGroup {
    pub name: String,
    #[serde(default)]
    pub modules: Vec<Module>,
}

/// Override for a single category pair of the compatibility matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityRule {
    pub a: Category,
    pub b: Category,
    pub score: f64,
}

/// Declarative engine configuration. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub groups: Vec<ModuleGroup>,
    pub compatibility: Vec<CompatibilityRule>,
    pub cache: CacheConfig,
    pub loader: LoaderLimits,
    pub compression: CompressionConfig,
    pub monitor: MonitorConfig,
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ModlinkError::io(format!("read config {}", path.display()), e))?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.loader.validate()?;
        self.compression.validate()?;
        self.monitor.validate()?;

        let mut group_names = HashSet::new();
        let mut ids = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(ModlinkError::configuration_field(
                    "group name cannot be empty",
                    "groups.name",
                ));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(ModlinkError::configuration_field(
                    format!("group '{}' is declared twice", group.name),
                    "groups.name",
                ));
            }
            for module in &group.modules {
                if !ids.insert(module.id.as_str()) {
                    return Err(ModlinkError::configuration_field(
                        format!("module '{}' is declared twice", module.id),
                        "groups.modules.id",
                    ));
                }
            }
        }

        for module in self.modules() {
            for dep in &module.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(ModlinkError::configuration_field(
                        format!("dependency '{}' of module '{}' not found", dep, module.id),
                        "groups.modules.dependencies",
                    ));
                }
            }
        }

        for rule in &self.compatibility {
            if !(0.0..=1.0).contains(&rule.score) {
                return Err(ModlinkError::configuration_field(
                    format!(
                        "compatibility score for ({}, {}) must be within [0, 1], got {}",
                        rule.a, rule.b, rule.score
                    ),
                    "compatibility.score",
                ));
            }
        }

        Ok(())
    }

    /// All declared modules in declaration order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.groups.iter().flat_map(|group| group.modules.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SizeClass;
    use pretty_assertions::assert_eq;

    const YAML: &str = r#"
groups:
  - name: foundation
    modules:
      - { id: base, category: core, size_class: small, format_version: "1.0" }
      - id: auth
        category: security
        size_class: medium
        dependencies: [base]
compatibility:
  - { a: security, b: experimental, score: 0.4 }
loader: { max_parallel: 2 }
"#;

    #[test]
    fn test_yaml_with_defaults() {
        let config = EngineConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.groups.len(), 1);
        let ids: Vec<&str> = config.modules().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["base", "auth"]);
        assert_eq!(config.groups[0].modules[1].size_class, SizeClass::Medium);
        assert_eq!(config.groups[0].modules[1].format_version, "1.0");
        assert_eq!(config.loader.max_parallel, 2);
        assert_eq!(config.loader.per_module_timeout_ms, 30_000);
        assert_eq!(config.cache.byte_budget, 64 * 1024 * 1024);
        assert_eq!(config.compatibility[0].a, Category::Security);
    }

    #[test]
    fn test_json_config() {
        let json = r#"{"groups":[{"name":"g","modules":[{"id":"x","category":"language"}]}]}"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.modules().count(), 1);
        assert_eq!(config.monitor.window_size, 100);
    }

    #[test]
    fn test_validation_failures() {
        let unknown_dep = r#"
groups:
  - name: g
    modules:
      - { id: a, category: core, dependencies: [ghost] }
"#;
        assert!(matches!(
            EngineConfig::from_yaml_str(unknown_dep),
            Err(ModlinkError::Configuration { .. })
        ));

        let duplicate = r#"
groups:
  - name: g
    modules: [{ id: a, category: core }]
  - name: h
    modules: [{ id: a, category: core }]
"#;
        assert!(EngineConfig::from_yaml_str(duplicate).is_err());

        let bad_score = "compatibility: [{ a: core, b: core, score: 1.5 }]";
        assert!(EngineConfig::from_yaml_str(bad_score).is_err());

        let bad_category = "groups: [{ name: g, modules: [{ id: a, category: plugin }] }]";
        assert!(matches!(
            EngineConfig::from_yaml_str(bad_category),
            Err(ModlinkError::Serialization { .. })
        ));
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, YAML).unwrap();
        let config = EngineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.modules().count(), 2);

        assert!(matches!(
            EngineConfig::from_yaml_file(dir.path().join("missing.yaml")),
            Err(ModlinkError::Io { .. })
        ));
    }
}
