// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Schema for the declarative partition spec, as written by hand.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::partition::{model::PartType, unit::SizeLiteral};

/// A partition declaration. Keys that are not known fields and that have an
/// object value are sub-components. Other unknown keys are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PartitionSpec {
    pub size: Option<SizeLiteral>,
    pub medium: Option<String>,
    pub fs_type: Option<String>,
    pub part_type: Option<PartType>,
    pub part_type_guid: Option<String>,
    #[serde(default)]
    pub is_rootfs: bool,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    /// Always replaced by the declaring key during resolution.
    pub base_name: Option<String>,
    #[serde(default)]
    pub pre_cmd: Value,
    #[serde(default)]
    pub post_cmd: Value,
    #[serde(default)]
    pub ota_update_mode: Value,
    #[serde(default)]
    pub ota_is_update: Value,
    #[serde(default)]
    pub magic: Value,
    #[serde(default)]
    pub have_anti_ver: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PartitionSpec {
    /// Object-valued unknown keys, in declaration order.
    pub fn sub_component_values(&self) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
        self.extra
            .iter()
            .filter_map(|(k, v)| v.as_object().map(|o| (k.as_str(), o)))
    }

    /// Unknown keys that are not sub-components.
    pub fn ignored_keys(&self) -> impl Iterator<Item = &str> {
        self.extra
            .iter()
            .filter(|(_, v)| !v.is_object())
            .map(|(k, _)| k.as_str())
    }
}

/// A sub-component declaration. The size must be present. All other fields
/// are passed through verbatim.
#[derive(Clone, Debug, Deserialize)]
pub struct SubComponentSpec {
    pub size: SizeLiteral,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// The optional `global` block.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GlobalSpec {
    pub backup_slot_count: Option<u32>,
    pub backup_dir: Option<String>,
    #[serde(rename = "AB_part_a")]
    pub ab_part_a: Option<String>,
    #[serde(rename = "AB_part_b")]
    pub ab_part_b: Option<String>,
    #[serde(rename = "BAK_part_bak")]
    pub bak_part_bak: Option<String>,
}

/// Where the declaration for a top-level key comes from.
#[derive(Clone, Debug)]
pub enum SpecSource {
    /// The declaration is the top-level value.
    Inline(Box<PartitionSpec>),
    /// The declaration is stored under `key` in a separate JSON file,
    /// relative to the directory containing the top-level spec.
    File { file: String, key: String },
}

/// Strip the `PA_`/`PB_` marker that distinguishes multiple top-level
/// declarations sharing one entry in a referenced file.
pub fn lookup_key(name: &str) -> &str {
    name.strip_prefix("PA_")
        .or_else(|| name.strip_prefix("PB_"))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sub_components_are_object_values() {
        let spec: PartitionSpec = serde_json::from_value(json!({
            "size": "1M",
            "medium": "nor",
            "bl2": {"size": "128k", "image": "bl2.bin"},
            "note": "ignored",
            "fip": {"size": "256k"},
        }))
        .unwrap();

        let names = spec
            .sub_component_values()
            .map(|(k, _)| k)
            .collect::<Vec<_>>();
        assert_eq!(names, ["bl2", "fip"]);
        assert_eq!(spec.ignored_keys().collect::<Vec<_>>(), ["note"]);
        assert_eq!(spec.part_type, None);
        assert!(spec.pre_cmd.is_null());
    }

    #[test]
    fn strip_lookup_prefix() {
        assert_eq!(lookup_key("PA_boot"), "boot");
        assert_eq!(lookup_key("PB_boot"), "boot");
        assert_eq!(lookup_key("boot"), "boot");
        assert_eq!(lookup_key("SPA_boot"), "SPA_boot");
    }
}
