// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt, fs, io,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};
use serde_json::{Map, Value, ser::PrettyFormatter};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    partition::{
        model::{self, Component, Medium, PartType, Partition, SubComponent},
        spec::{self, GlobalSpec, PartitionSpec, SpecSource, SubComponentSpec},
        unit,
    },
    util::NumBytes,
};

pub const DEFAULT_BLOCK_SIZE: u64 = 512;
pub const DEFAULT_NOR_ERASE_SIZE: u64 = 32 * 1024;
pub const DEFAULT_NAND_ERASE_SIZE: u64 = 128 * 1024;

pub const DEFAULT_BACKUP_SLOT_COUNT: u32 = 2;
pub const DEFAULT_BACKUP_DIR: &str = "/userdata/ota/backup_dir";
pub const DEFAULT_AB_PART_A: &str = "_a";
pub const DEFAULT_AB_PART_B: &str = "_b";
pub const DEFAULT_BAK_PART_BAK: &str = "_bak";

/// Top-level key holding the [`GlobalSpec`].
const GLOBAL_KEY: &str = "global";

#[derive(Debug, Error)]
pub enum Error {
    // Layout errors.
    #[error("{0} cannot be zero")]
    LayoutZero(&'static str),
    // Spec document errors.
    #[error("Partition spec must be a JSON object")]
    SpecNotAnObject,
    #[error("Invalid global config")]
    InvalidGlobal(#[source] serde_json::Error),
    #[error("Partition {name:?}: Expected an object or a file name, but have {kind}")]
    InvalidDeclaration { name: String, kind: &'static str },
    #[error("Partition {name:?}: Invalid declaration")]
    InvalidSpec {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to parse referenced partition config: {0:?}")]
    ReferenceParse(PathBuf, #[source] serde_json::Error),
    #[error("Referenced partition config is not a JSON object: {0:?}")]
    ReferenceNotAnObject(PathBuf),
    // Partition errors.
    #[error("Partition {name:?}: Invalid medium")]
    Medium {
        name: String,
        #[source]
        source: model::Error,
    },
    #[error("Partition {name:?}: No size specified")]
    MissingSize { name: String },
    #[error("Partition {name:?}: Size cannot be zero")]
    ZeroSize { name: String },
    #[error("Partition {name:?}: Invalid size")]
    InvalidSize {
        name: String,
        #[source]
        source: unit::Error,
    },
    #[error("Partition {name:?}: Invalid component (expected <name>:<size>): {component:?}")]
    InvalidComponent { name: String, component: String },
    #[error("Partition {name:?}: Invalid sub-component {sub_component:?}")]
    InvalidSubComponent {
        name: String,
        sub_component: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Partition {name:?}: Invalid partition type GUID: {guid:?}")]
    InvalidGuid {
        name: String,
        guid: String,
        #[source]
        source: uuid::Error,
    },
    #[error("Partition {name:?}: Image size {total} exceeds partition limit {size}")]
    ComponentsTooLarge {
        name: String,
        total: NumBytes<u64>,
        size: NumBytes<u64>,
    },
    #[error("Partition {name:?}: {medium} partitions must be {alignment} aligned, but size is {size}")]
    Misaligned {
        name: String,
        medium: Medium,
        size: NumBytes<u64>,
        alignment: NumBytes<u64>,
    },
    #[error("Partition {name:?}: Offset overflows")]
    OffsetOverflow { name: String },
    // Resolved table errors.
    #[error("Invalid resolved partition table")]
    InvalidResolved(#[source] serde_json::Error),
    #[error("Partition {name:?}: Listed under {expected}, but has medium {actual}")]
    ResolvedMediumMismatch {
        name: String,
        expected: Medium,
        actual: Medium,
    },
    // Wrapped errors.
    #[error("Failed to read version file: {0:?}")]
    VersionRead(PathBuf, #[source] io::Error),
    #[error("Failed to serialize partition table")]
    Serialize(#[source] serde_json::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Medium geometry used when laying out partitions. This is constructed once
/// and passed explicitly to everything that needs it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutConfig {
    /// Size of one eMMC sector (LBA).
    pub block_size: u64,
    /// Erase block size of NOR flash.
    pub nor_erase_size: u64,
    /// Erase block size of NAND flash.
    pub nand_erase_size: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            nor_erase_size: DEFAULT_NOR_ERASE_SIZE,
            nand_erase_size: DEFAULT_NAND_ERASE_SIZE,
        }
    }
}

impl LayoutConfig {
    pub fn new(block_size: u64, nor_erase_size: u64, nand_erase_size: u64) -> Result<Self> {
        for (value, name) in [
            (block_size, "Block size"),
            (nor_erase_size, "NOR erase size"),
            (nand_erase_size, "NAND erase size"),
        ] {
            if value == 0 {
                return Err(Error::LayoutZero(name));
            }
        }

        Ok(Self {
            block_size,
            nor_erase_size,
            nand_erase_size,
        })
    }

    /// Every partition size on `medium` must be a multiple of this value.
    pub fn alignment(&self, medium: Medium) -> u64 {
        match medium {
            Medium::Nor => self.nor_erase_size,
            Medium::Nand => self.nand_erase_size,
            Medium::Emmc => self.block_size,
        }
    }
}

/// Settings shared by the whole table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GlobalConfig {
    pub backup_slot_count: u32,
    pub backup_dir: String,
    #[serde(rename = "AB_part_a")]
    pub ab_part_a: String,
    #[serde(rename = "AB_part_b")]
    pub ab_part_b: String,
    #[serde(rename = "BAK_part_bak")]
    pub bak_part_bak: String,
    pub sys_version: String,
}

impl GlobalConfig {
    pub fn new(sys_version: impl Into<String>) -> Self {
        Self {
            backup_slot_count: DEFAULT_BACKUP_SLOT_COUNT,
            backup_dir: DEFAULT_BACKUP_DIR.to_owned(),
            ab_part_a: DEFAULT_AB_PART_A.to_owned(),
            ab_part_b: DEFAULT_AB_PART_B.to_owned(),
            bak_part_bak: DEFAULT_BAK_PART_BAK.to_owned(),
            sys_version: sys_version.into(),
        }
    }

    fn with_overrides(mut self, spec: GlobalSpec) -> Self {
        if let Some(n) = spec.backup_slot_count {
            self.backup_slot_count = n;
        }
        if let Some(s) = spec.backup_dir {
            self.backup_dir = s;
        }
        if let Some(s) = spec.ab_part_a {
            self.ab_part_a = s;
        }
        if let Some(s) = spec.ab_part_b {
            self.ab_part_b = s;
        }
        if let Some(s) = spec.bak_part_bak {
            self.bak_part_bak = s;
        }

        self
    }

    /// Read the system version from the first line of `path`. A missing file
    /// is not an error and results in an empty version.
    pub fn read_sys_version(path: &Path) -> Result<String> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(data.lines().next().unwrap_or_default().trim().to_owned()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Version file does not exist: {path:?}");
                Ok(String::new())
            }
            Err(e) => Err(Error::VersionRead(path.to_owned(), e)),
        }
    }
}

/// Why a declaration did not produce any partitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The referenced file could not be read.
    Unreadable { path: PathBuf, message: String },
    /// The referenced file has no entry for the partition.
    MissingKey { path: PathBuf, key: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable { path, message } => write!(f, "Failed to read {path:?}: {message}"),
            Self::MissingKey { path, key } => write!(f, "Config {key:?} not in {path:?}"),
        }
    }
}

/// A declaration that was skipped without failing the build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Skipped {
    pub name: String,
    pub reason: SkipReason,
}

/// Result of looking up a declaration in a referenced file.
enum Lookup {
    Found(PartitionSpec),
    Skipped(SkipReason),
}

/// Referenced partition config files. Each file is parsed at most once, but
/// every lookup deserializes a fresh [`PartitionSpec`], so declarations that
/// share an entry never share state.
struct SpecFiles<'a> {
    base_dir: &'a Path,
    cache: HashMap<PathBuf, Map<String, Value>>,
}

impl<'a> SpecFiles<'a> {
    fn new(base_dir: &'a Path) -> Self {
        Self {
            base_dir,
            cache: HashMap::new(),
        }
    }

    fn lookup(&mut self, name: &str, file: &str, key: &str) -> Result<Lookup> {
        let path = self.base_dir.join(file);

        let configs = match self.cache.entry(path.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(entry) => {
                let data = match fs::read_to_string(&path) {
                    Ok(d) => d,
                    Err(err) => {
                        return Ok(Lookup::Skipped(SkipReason::Unreadable {
                            path,
                            message: err.to_string(),
                        }));
                    }
                };

                let value = serde_json::from_str::<Value>(&data)
                    .map_err(|e| Error::ReferenceParse(path.clone(), e))?;
                let Value::Object(configs) = value else {
                    return Err(Error::ReferenceNotAnObject(path));
                };

                entry.insert(configs)
            }
        };

        let value = match configs.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Object(o)) if o.is_empty() => None,
            Some(v) => Some(v),
        };
        let Some(value) = value else {
            return Ok(Lookup::Skipped(SkipReason::MissingKey {
                path,
                key: key.to_owned(),
            }));
        };

        if !value.is_object() {
            return Err(Error::InvalidDeclaration {
                name: name.to_owned(),
                kind: json_type(value),
            });
        }

        let spec = PartitionSpec::deserialize(value).map_err(|e| Error::InvalidSpec {
            name: name.to_owned(),
            source: e,
        })?;

        Ok(Lookup::Found(spec))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Resolve a single concrete partition from its declaration. `slot_suffix` is
/// set for A/B slots and is appended to every dependency.
#[allow(clippy::too_many_arguments)]
fn resolve_partition(
    name: &str,
    base_name: &str,
    spec: &PartitionSpec,
    medium: Medium,
    slot_suffix: Option<&str>,
    part_num: u32,
    start: u64,
    block_size: u64,
) -> Result<Partition> {
    let invalid_size = |e| Error::InvalidSize {
        name: name.to_owned(),
        source: e,
    };
    let too_large = || Error::OffsetOverflow {
        name: name.to_owned(),
    };

    let mut image_sum = 0u64;

    let mut components = vec![];
    for component in &spec.components {
        let Some((image, size)) = component.split_once(':') else {
            return Err(Error::InvalidComponent {
                name: name.to_owned(),
                component: component.clone(),
            });
        };
        let size = unit::to_bytes(size, block_size).map_err(invalid_size)?;

        image_sum = image_sum.checked_add(size).ok_or_else(too_large)?;
        components.push(Component {
            name: image.to_owned(),
            size,
        });
    }

    let mut sub_components = IndexMap::new();
    for (key, value) in spec.sub_component_values() {
        let sub_spec = SubComponentSpec::deserialize(value).map_err(|e| {
            Error::InvalidSubComponent {
                name: name.to_owned(),
                sub_component: key.to_owned(),
                source: e,
            }
        })?;
        let size = sub_spec.size.to_bytes(block_size).map_err(invalid_size)?;

        image_sum = image_sum.checked_add(size).ok_or_else(too_large)?;
        sub_components.insert(
            key.to_owned(),
            SubComponent {
                size,
                attributes: sub_spec.attributes,
            },
        );
    }

    for key in spec.ignored_keys() {
        debug!("Partition {name:?}: Ignoring unknown field: {key:?}");
    }

    let size = spec
        .size
        .as_ref()
        .ok_or_else(|| Error::MissingSize {
            name: name.to_owned(),
        })?
        .to_bytes(block_size)
        .map_err(invalid_size)?;
    if size == 0 {
        return Err(Error::ZeroSize {
            name: name.to_owned(),
        });
    }

    let end = start.checked_add(size - 1).ok_or_else(too_large)?;

    if image_sum > size {
        return Err(Error::ComponentsTooLarge {
            name: name.to_owned(),
            total: NumBytes(image_sum),
            size: NumBytes(size),
        });
    }

    let part_type_guid = match spec.part_type_guid.as_deref() {
        // An explicitly empty GUID means that a random one is assigned when
        // the GPT is generated.
        Some("") => None,
        Some(guid) => Some(Uuid::parse_str(guid).map_err(|e| Error::InvalidGuid {
            name: name.to_owned(),
            guid: guid.to_owned(),
            source: e,
        })?),
        None => spec.fs_type.as_deref().and_then(model::fs_type_guid),
    };

    let depends = spec
        .depends
        .iter()
        .map(|d| match slot_suffix {
            Some(suffix) => format!("{d}{suffix}"),
            None => d.clone(),
        })
        .collect();

    Ok(Partition {
        name: name.to_owned(),
        sub_components,
        depends,
        components,
        base_name: base_name.to_owned(),
        part_num,
        start,
        end,
        size,
        medium,
        fs_type: spec.fs_type.clone(),
        part_type: spec.part_type.clone().unwrap_or_default(),
        is_rootfs: spec.is_rootfs,
        part_type_guid,
        pre_cmd: spec.pre_cmd.clone(),
        post_cmd: spec.post_cmd.clone(),
        ota_update_mode: spec.ota_update_mode.clone(),
        ota_is_update: spec.ota_is_update.clone(),
        magic: spec.magic.clone(),
        have_anti_ver: spec.have_anti_ver.clone(),
    })
}

/// Running layout state for one medium.
#[derive(Default)]
struct Accumulator {
    partitions: Vec<Partition>,
    cursor: u64,
}

struct Builder<'a> {
    layout: &'a LayoutConfig,
    global: GlobalConfig,
    nor: Accumulator,
    nand: Accumulator,
    emmc: Accumulator,
}

impl<'a> Builder<'a> {
    fn new(layout: &'a LayoutConfig, global: GlobalConfig) -> Self {
        Self {
            layout,
            global,
            nor: Accumulator::default(),
            nand: Accumulator::default(),
            emmc: Accumulator::default(),
        }
    }

    /// Expand a declaration into its concrete partitions and lay them out.
    fn declare(&mut self, name: &str, spec: &PartitionSpec) -> Result<()> {
        let medium = match &spec.medium {
            Some(m) => m.parse::<Medium>().map_err(|e| Error::Medium {
                name: name.to_owned(),
                source: e,
            })?,
            None => Medium::default(),
        };

        match spec.part_type {
            Some(PartType::Ab) => {
                let suffixes = [self.global.ab_part_a.clone(), self.global.ab_part_b.clone()];

                for suffix in suffixes {
                    let slot_name = format!("{name}{suffix}");
                    self.append(&slot_name, name, spec, medium, Some(&suffix))?;
                }
            }
            Some(PartType::Bak) => {
                self.append(name, name, spec, medium, None)?;

                for i in 1..self.global.backup_slot_count {
                    let bak_name = format!("{name}{}{i}", self.global.bak_part_bak);
                    self.append(&bak_name, name, spec, medium, None)?;
                }
            }
            _ => self.append(name, name, spec, medium, None)?,
        }

        Ok(())
    }

    fn append(
        &mut self,
        name: &str,
        base_name: &str,
        spec: &PartitionSpec,
        medium: Medium,
        slot_suffix: Option<&str>,
    ) -> Result<()> {
        let block_size = self.layout.block_size;
        let alignment = self.layout.alignment(medium);
        let acc = match medium {
            Medium::Nor => &mut self.nor,
            Medium::Nand => &mut self.nand,
            Medium::Emmc => &mut self.emmc,
        };

        let part_num = acc.partitions.len() as u32 + 1;
        let partition = resolve_partition(
            name,
            base_name,
            spec,
            medium,
            slot_suffix,
            part_num,
            acc.cursor,
            block_size,
        )?;

        if partition.size % alignment != 0 {
            return Err(Error::Misaligned {
                name: name.to_owned(),
                medium,
                size: NumBytes(partition.size),
                alignment: NumBytes(alignment),
            });
        }

        debug!(
            "{medium} #{part_num} {name:?}: {:#x}..={:#x}",
            partition.start, partition.end,
        );

        acc.cursor = partition
            .end
            .checked_add(1)
            .ok_or_else(|| Error::OffsetOverflow {
                name: name.to_owned(),
            })?;
        acc.partitions.push(partition);

        Ok(())
    }
}

/// The resolved partition layout of every medium.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionTable {
    pub global: GlobalConfig,
    pub nor: Vec<Partition>,
    pub nand: Vec<Partition>,
    pub emmc: Vec<Partition>,
    /// Declarations that were skipped because their referenced config was
    /// unavailable. These are informational and are not serialized.
    pub skipped: Vec<Skipped>,
}

impl PartitionTable {
    /// Resolve a partition spec document. String-valued declarations are file
    /// names relative to `base_dir`.
    pub fn resolve(
        spec: &Value,
        base_dir: &Path,
        layout: &LayoutConfig,
        sys_version: &str,
    ) -> Result<Self> {
        let top = spec.as_object().ok_or(Error::SpecNotAnObject)?;

        let global_spec = match top.get(GLOBAL_KEY) {
            Some(v) => GlobalSpec::deserialize(v).map_err(Error::InvalidGlobal)?,
            None => GlobalSpec::default(),
        };
        let global = GlobalConfig::new(sys_version).with_overrides(global_spec);

        let mut builder = Builder::new(layout, global);
        let mut files = SpecFiles::new(base_dir);
        let mut skipped = vec![];

        for (name, value) in top {
            if name == GLOBAL_KEY {
                continue;
            }

            let source = match value {
                Value::Object(_) => {
                    let spec =
                        PartitionSpec::deserialize(value).map_err(|e| Error::InvalidSpec {
                            name: name.clone(),
                            source: e,
                        })?;
                    SpecSource::Inline(Box::new(spec))
                }
                Value::String(file) => SpecSource::File {
                    file: file.clone(),
                    key: spec::lookup_key(name).to_owned(),
                },
                v => {
                    return Err(Error::InvalidDeclaration {
                        name: name.clone(),
                        kind: json_type(v),
                    });
                }
            };

            let spec = match source {
                SpecSource::Inline(spec) => *spec,
                SpecSource::File { file, key } => match files.lookup(name, &file, &key)? {
                    Lookup::Found(spec) => spec,
                    Lookup::Skipped(reason) => {
                        warn!("Skipping partition {name:?}: {reason}");
                        skipped.push(Skipped {
                            name: name.clone(),
                            reason,
                        });
                        continue;
                    }
                },
            };

            builder.declare(name, &spec)?;
        }

        Ok(Self {
            global: builder.global,
            nor: builder.nor.partitions,
            nand: builder.nand.partitions,
            emmc: builder.emmc.partitions,
            skipped,
        })
    }

    /// Load a previously resolved table, as written by [`Self::to_json`].
    pub fn from_resolved(value: &Value) -> Result<Self> {
        let repr = ResolvedRepr::deserialize(value).map_err(Error::InvalidResolved)?;

        let convert = |expected: Medium, map: IndexMap<String, Partition>| {
            map.into_iter()
                .map(|(name, mut partition)| {
                    if partition.medium != expected {
                        return Err(Error::ResolvedMediumMismatch {
                            name,
                            expected,
                            actual: partition.medium,
                        });
                    }

                    partition.name = name;
                    Ok(partition)
                })
                .collect::<Result<Vec<_>>>()
        };

        Ok(Self {
            global: repr.global,
            nor: convert(Medium::Nor, repr.nor)?,
            nand: convert(Medium::Nand, repr.nand)?,
            emmc: convert(Medium::Emmc, repr.emmc)?,
            skipped: vec![],
        })
    }

    /// Check whether a document looks like a resolved table instead of a
    /// hand-written spec. Resolved tables only have the global and medium
    /// keys and the global block always records the system version.
    pub fn is_resolved(value: &Value) -> bool {
        let Some(top) = value.as_object() else {
            return false;
        };

        let known_keys = top
            .keys()
            .all(|k| k == GLOBAL_KEY || Medium::ALL.iter().any(|m| m.as_str() == k.as_str()));

        known_keys
            && top
                .get(GLOBAL_KEY)
                .and_then(|g| g.as_object())
                .is_some_and(|g| g.contains_key("sys_version"))
    }

    /// Serialize to the resolved table JSON consumed by other build tools.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);

        self.serialize(&mut serializer).map_err(Error::Serialize)?;

        Ok(buf)
    }

    /// The partitions of one medium, in layout order.
    pub fn partitions(&self, medium: Medium) -> &[Partition] {
        match medium {
            Medium::Nor => &self.nor,
            Medium::Nand => &self.nand,
            Medium::Emmc => &self.emmc,
        }
    }

    /// The first medium, in [`Medium::ALL`] order, that has any partitions.
    pub fn first_populated(&self) -> Option<(Medium, &[Partition])> {
        Medium::ALL
            .into_iter()
            .map(|m| (m, self.partitions(m)))
            .find(|(_, p)| !p.is_empty())
    }

    pub fn get(&self, medium: Medium, name: &str) -> Option<&Partition> {
        self.partitions(medium).iter().find(|p| p.name == name)
    }

    /// All partitions of all media.
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        Medium::ALL.into_iter().flat_map(|m| self.partitions(m))
    }
}

/// Serialized form of one medium: an object keyed by partition name.
struct MediumMap<'a>(&'a [Partition]);

impl Serialize for MediumMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|p| (&p.name, p)))
    }
}

impl Serialize for PartitionTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(GLOBAL_KEY, &self.global)?;

        for medium in Medium::ALL {
            let partitions = self.partitions(medium);
            if !partitions.is_empty() {
                map.serialize_entry(medium.as_str(), &MediumMap(partitions))?;
            }
        }

        map.end()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ResolvedRepr {
    global: GlobalConfig,
    #[serde(default)]
    nor: IndexMap<String, Partition>,
    #[serde(default)]
    nand: IndexMap<String, Partition>,
    #[serde(default)]
    emmc: IndexMap<String, Partition>,
}
