//! Configuration schema for the hoist fabfile.
//!
//! Defines the host configuration consumed by the dispatch engine and the
//! global settings tree. Loading and validation live in the frontend; the
//! engine only reads these structures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Deep-merge `overlay` into `base`: objects merge recursively, everything
/// else is replaced by the overlay value.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Declarative configuration for one deployment target.
///
/// `needs` is ordered: it is both the dispatch order and the
/// override-priority order for capability resolution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    /// Name of this configuration, used for logging and backup basenames.
    #[serde(default)]
    pub config_name: String,

    /// Ordered capability names this host requires.
    #[serde(default)]
    pub needs: Vec<String>,

    /// Host type (e.g. `dev`, `stage`, `prod`); keys common-script lookup.
    #[serde(default, rename = "type")]
    pub host_type: String,

    /// Arbitrary keyed configuration values consumed by capability handlers.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl HostConfig {
    pub fn new(config_name: impl Into<String>, needs: Vec<String>) -> Self {
        Self {
            config_name: config_name.into(),
            needs,
            host_type: String::new(),
            data: Map::new(),
        }
    }

    /// Look up an arbitrary configuration value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Look up a string-valued configuration entry.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Look up a boolean configuration entry, defaulting to `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.data
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Follow a dotted path (`gitOptions.pull`) through the config tree.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.data.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Insert or replace a configuration value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// The executable alias table (`git` -> `/usr/bin/git`), if configured.
    pub fn executables(&self) -> std::collections::HashMap<String, String> {
        let mut table = std::collections::HashMap::new();
        if let Some(Value::Object(map)) = self.data.get("executables") {
            for (name, value) in map {
                if let Some(path) = value.as_str() {
                    table.insert(name.clone(), path.to_string());
                }
            }
        }
        table
    }

    /// The full host configuration as one value tree, including the
    /// structured fields. Scripts see this as the `host` variable.
    pub fn raw(&self) -> Value {
        let mut map = self.data.clone();
        map.insert("configName".into(), Value::String(self.config_name.clone()));
        map.insert(
            "needs".into(),
            Value::Array(self.needs.iter().cloned().map(Value::String).collect()),
        );
        map.insert("type".into(), Value::String(self.host_type.clone()));
        Value::Object(map)
    }
}

/// Global settings shared by all hosts in a fabfile.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(flatten)]
    values: Map<String, Value>,
}

impl Settings {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Follow a dotted path (`gitOptions.pull`) through the settings tree.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// All settings except the named keys. Scripts see
    /// `all_except(&["hosts", "dockerHosts"])` as the `settings` variable, so
    /// the whole configuration tree is not re-embedded into every script.
    pub fn all_except(&self, excluded: &[&str]) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .filter(|(key, _)| !excluded.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Value::Object(map)
    }

    /// Look up a common script sequence keyed by `[task][host_type]`.
    pub fn common_script(&self, task: &str, host_type: &str) -> Option<Vec<String>> {
        let lines = self.get_path("common")?.get(task)?.get(host_type)?;
        as_string_lines(lines)
    }

    /// True if the deprecated flat `common[host_type]` layout is present.
    pub fn has_flat_common_script(&self, host_type: &str) -> bool {
        matches!(
            self.get_path("common").and_then(|c| c.get(host_type)),
            Some(Value::Array(_))
        )
    }

    /// Docker host configuration by name.
    pub fn docker_host(&self, name: &str) -> Option<&Value> {
        self.get_path("dockerHosts").and_then(|hosts| hosts.get(name))
    }
}

/// Interpret a value as an ordered list of command lines.
pub fn as_string_lines(value: &Value) -> Option<Vec<String>> {
    let array = value.as_array()?;
    Some(
        array
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}
