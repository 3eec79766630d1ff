// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::{Uuid, uuid};

use crate::util::NumBytes;

/// "Linux filesystem data".
pub const LINUX_FS_GUID: Uuid = uuid!("0FC63DAF-8483-4772-8E79-3D69D8477DE4");
/// "Microsoft basic data".
pub const MS_BASIC_DATA_GUID: Uuid = uuid!("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7");

/// Default partition type GUIDs for known filesystem types.
static FS_TYPE_GUIDS: phf::Map<&'static str, Uuid> = phf::phf_map! {
    "ext4" => LINUX_FS_GUID,
    "ext3" => LINUX_FS_GUID,
    "ext2" => LINUX_FS_GUID,
    "yaffs2" => LINUX_FS_GUID,
    "ubifs" => LINUX_FS_GUID,
    "jffs2" => LINUX_FS_GUID,
    "vfat" => MS_BASIC_DATA_GUID,
    "ntfs" => MS_BASIC_DATA_GUID,
    "fat32" => MS_BASIC_DATA_GUID,
    "exfat" => MS_BASIC_DATA_GUID,
};

/// Look up the default partition type GUID for a filesystem type.
pub fn fs_type_guid(fs_type: &str) -> Option<Uuid> {
    FS_TYPE_GUIDS.get(fs_type).copied()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Unsupported medium: {0:?}")]
    UnsupportedMedium(String),
    #[error("Invalid component (expected <name>:<size>): {0:?}")]
    InvalidComponent(String),
}

/// Storage medium that a partition lives on. Each medium has an independent
/// layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Nor,
    Nand,
    #[default]
    Emmc,
}

impl Medium {
    /// All media, in the order that consumers prefer them when only one
    /// medium's layout is used.
    pub const ALL: [Self; 3] = [Self::Nor, Self::Nand, Self::Emmc];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nor => "nor",
            Self::Nand => "nand",
            Self::Emmc => "emmc",
        }
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Medium {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nor" => Ok(Self::Nor),
            "nand" => Ok(Self::Nand),
            "emmc" => Ok(Self::Emmc),
            _ => Err(Error::UnsupportedMedium(s.to_owned())),
        }
    }
}

/// How a partition declaration is expanded into concrete partitions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum PartType {
    /// A single ordinary partition.
    #[default]
    Perm,
    /// Two slots, for A/B updates.
    Ab,
    /// A primary copy plus backup copies.
    Bak,
    /// Any other type. These are laid out like [`Self::Perm`] and the value is
    /// passed through verbatim.
    Other(String),
}

impl From<String> for PartType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PERM" => Self::Perm,
            "AB" => Self::Ab,
            "BAK" => Self::Bak,
            _ => Self::Other(value),
        }
    }
}

impl From<PartType> for String {
    fn from(value: PartType) -> Self {
        match value {
            PartType::Perm => "PERM".to_owned(),
            PartType::Ab => "AB".to_owned(),
            PartType::Bak => "BAK".to_owned(),
            PartType::Other(s) => s,
        }
    }
}

/// An image stored inside a partition, declared as `<name>:<size>`.
#[derive(Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("size", &NumBytes(self.size))
            .finish()
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.size)
    }
}

impl FromStr for Component {
    type Err = Error;

    /// Parse a resolved component. The size must already be in bytes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, size) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidComponent(s.to_owned()))?;
        let size = size
            .parse()
            .map_err(|_| Error::InvalidComponent(s.to_owned()))?;

        Ok(Self {
            name: name.to_owned(),
            size,
        })
    }
}

impl Serialize for Component {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Component {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A named object nested inside a partition declaration (eg. the `bl2` image
/// inside `miniboot`). Only the size is interpreted. Everything else is
/// passed through verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubComponent {
    /// Size in bytes.
    pub size: u64,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

mod guid_string {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(
        guid: &Option<Uuid>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match guid {
            Some(g) => {
                let mut buf = Uuid::encode_buffer();
                serializer.serialize_str(g.hyphenated().encode_upper(&mut buf))
            }
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Uuid>, D::Error> {
        match Option::<String>::deserialize(deserializer)?.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => Uuid::parse_str(s).map(Some).map_err(de::Error::custom),
        }
    }
}

/// A fully resolved partition.
///
/// The serialized form is the per-partition object of the resolved table
/// JSON. The name is the key of that object, so it is not serialized here.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Partition {
    #[serde(skip)]
    pub name: String,
    #[serde(flatten)]
    pub sub_components: IndexMap<String, SubComponent>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub components: Vec<Component>,
    /// Name of the declaration that this partition was expanded from.
    pub base_name: String,
    /// 1-based index within the medium.
    pub part_num: u32,
    /// Byte offset within the medium.
    pub start: u64,
    /// Inclusive byte offset of the last byte.
    pub end: u64,
    /// Size in bytes.
    pub size: u64,
    pub medium: Medium,
    pub fs_type: Option<String>,
    pub part_type: PartType,
    #[serde(default)]
    pub is_rootfs: bool,
    /// Serialized as an uppercase hyphenated string, or `""` when a random
    /// type GUID is assigned at GPT generation time.
    #[serde(default, with = "guid_string")]
    pub part_type_guid: Option<Uuid>,
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
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("name", &self.name)
            .field("sub_components", &self.sub_components)
            .field("depends", &self.depends)
            .field("components", &self.components)
            .field("base_name", &self.base_name)
            .field("part_num", &self.part_num)
            .field("start", &format_args!("{:#x}", self.start))
            .field("end", &format_args!("{:#x}", self.end))
            .field("size", &NumBytes(self.size))
            .field("medium", &self.medium)
            .field("fs_type", &self.fs_type)
            .field("part_type", &self.part_type)
            .field("is_rootfs", &self.is_rootfs)
            .field("part_type_guid", &self.part_type_guid)
            .field("pre_cmd", &self.pre_cmd)
            .field("post_cmd", &self.post_cmd)
            .field("ota_update_mode", &self.ota_update_mode)
            .field("ota_is_update", &self.ota_is_update)
            .field("magic", &self.magic)
            .field("have_anti_ver", &self.have_anti_ver)
            .finish()
    }
}

impl Partition {
    /// First sector of the partition.
    pub fn start_lba(&self, block_size: u64) -> u64 {
        self.start / block_size
    }

    /// Last sector of the partition (inclusive).
    pub fn end_lba(&self, block_size: u64) -> u64 {
        self.end / block_size
    }

    /// Get a nested sub-component by name.
    pub fn sub_component(&self, name: &str) -> Option<&SubComponent> {
        self.sub_components.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_type_strings() {
        for (s, t) in [
            ("PERM", PartType::Perm),
            ("AB", PartType::Ab),
            ("BAK", PartType::Bak),
            ("PERMANENT", PartType::Other("PERMANENT".to_owned())),
        ] {
            assert_eq!(PartType::from(s.to_owned()), t);
            assert_eq!(String::from(t), s);
        }
    }

    #[test]
    fn fs_type_lookup() {
        assert_eq!(fs_type_guid("ext4"), Some(LINUX_FS_GUID));
        assert_eq!(fs_type_guid("vfat"), Some(MS_BASIC_DATA_GUID));
        assert_eq!(fs_type_guid("squashfs"), None);
    }

    #[test]
    fn component_strings() {
        let c = "bl31:65536".parse::<Component>().unwrap();
        assert_eq!(c.name, "bl31");
        assert_eq!(c.size, 65536);
        assert_eq!(c.to_string(), "bl31:65536");

        assert_eq!(
            "bl31".parse::<Component>(),
            Err(Error::InvalidComponent("bl31".to_owned())),
        );
        assert_eq!(
            "bl31:64k".parse::<Component>(),
            Err(Error::InvalidComponent("bl31:64k".to_owned())),
        );
    }

    #[test]
    fn medium_strings() {
        for medium in Medium::ALL {
            assert_eq!(medium.as_str().parse::<Medium>(), Ok(medium));
        }

        assert_eq!(
            "ufs".parse::<Medium>(),
            Err(Error::UnsupportedMedium("ufs".to_owned())),
        );
    }
}
