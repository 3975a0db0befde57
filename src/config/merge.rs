//! Cloud-config merging
//!
//! Two kinds of merge happen before anything is applied:
//! 1. Cloud-configs from several user-data parts fold into one, later parts
//!    winning for scalars and appending to lists.
//! 2. Metadata fills the gaps user-data left open ([`merge`]).

use super::CloudConfig;
use crate::CloudInitError;
use crate::metadata::Metadata;
use serde_yaml::Value;
use tracing::debug;

/// Fold metadata into a cloud-config; user-data always wins
///
/// Keys are `cloud` keys followed by metadata keys not already present.
/// Hostname and network configuration come from metadata only when
/// user-data left them empty.
pub fn merge(meta: &Metadata, mut cloud: CloudConfig) -> CloudConfig {
    let mut keys: Vec<String> = Vec::with_capacity(cloud.ssh_authorized_keys.len());
    for key in cloud
        .ssh_authorized_keys
        .drain(..)
        .chain(meta.ssh_public_keys.values().cloned())
    {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    cloud.ssh_authorized_keys = keys;

    if cloud.hostname.is_empty() {
        cloud.hostname = meta.hostname.clone();
    }
    if cloud.network_config.is_none() {
        cloud.network_config = meta.network_config.clone();
    }
    cloud
}

/// Merge two cloud-configs; `overlay` wins for scalars, lists are appended
///
/// List entries carrying a `name` are merged field-wise with the entry of
/// the same name instead of being appended.
pub fn merge_configs(base: &CloudConfig, overlay: &CloudConfig) -> Result<CloudConfig, CloudInitError> {
    let base_yaml = serde_yaml::to_value(base)?;
    let overlay_yaml = serde_yaml::to_value(overlay)?;

    let merged = merge_yaml_values(&base_yaml, &overlay_yaml);
    let mut config: CloudConfig = serde_yaml::from_value(merged)?;

    config.network_config = if overlay.network_config.is_none() {
        base.network_config.clone()
    } else {
        overlay.network_config.clone()
    };
    Ok(config)
}

/// Merge two YAML values recursively
fn merge_yaml_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut result = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let merged = match result.get(key) {
                    Some(base_value) => merge_yaml_values(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                result.insert(key.clone(), merged);
            }
            Value::Mapping(result)
        }

        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            let mut result = base_seq.clone();
            for item in overlay_seq {
                // Users, units and drop-ins stay unique by name
                let same_name = item_name(item)
                    .and_then(|name| result.iter().position(|seen| item_name(seen) == Some(name)));
                match same_name {
                    Some(index) => result[index] = merge_yaml_values(&result[index], item),
                    None if !result.contains(item) => result.push(item.clone()),
                    None => {}
                }
            }
            Value::Sequence(result)
        }

        // Empty overlay scalars do not erase what the base set
        (base_value, Value::Null) => base_value.clone(),
        (base_value, Value::String(s)) if s.is_empty() => base_value.clone(),
        (Value::Bool(true), Value::Bool(false)) => Value::Bool(true),

        (_, overlay_value) => overlay_value.clone(),
    }
}

fn item_name(item: &Value) -> Option<&str> {
    item.as_mapping()?.get("name")?.as_str().filter(|name| !name.is_empty())
}

/// Merge cloud-configs in order (later configs have higher priority)
pub fn merge_all_configs(configs: &[CloudConfig]) -> Result<CloudConfig, CloudInitError> {
    let Some((first, rest)) = configs.split_first() else {
        return Ok(CloudConfig::default());
    };

    let mut result = first.clone();
    for config in rest {
        debug!("Merging cloud-config part");
        result = merge_configs(&result, config)?;
    }
    Ok(result)
}
