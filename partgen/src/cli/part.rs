// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt::Write, str::FromStr};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::warn;

use crate::{
    cli::{
        args::{LayoutGroup, SpecGroup},
        status,
    },
    partition::{
        model::{Medium, Partition},
        table::PartitionTable,
        unit::{self, Unit},
    },
};

/// MTD device that NOR and NAND partitions are exposed on.
const MTD_ID: &str = "spi7.0";

/// Partition that takes up the remainder of the flash in the MTD layout.
const MTD_FILL_PARTITION: &str = "userdata";

/// Attribute whose array elements are printed without their sizes.
const COMPONENTS_ATTR: &str = "components";

/// A `<partition>:<attribute>` query.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Query {
    name: String,
    attribute: String,
}

impl FromStr for Query {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, attribute) = s
            .split_once(':')
            .filter(|(n, a)| !n.is_empty() && !a.is_empty() && !a.contains(':'))
            .ok_or_else(|| format!("Expected <partition>:<attribute>, but have {s:?}"))?;

        Ok(Self {
            name: name.to_owned(),
            attribute: attribute.to_owned(),
        })
    }
}

/// Find the object backing a query name. A partition matches by its name or
/// by its first A/B slot name. Otherwise, a sub-component with that name
/// matches. Media are searched in nor, nand, emmc order.
fn find_object(table: &PartitionTable, name: &str) -> Result<Option<Value>> {
    let slot_a = format!("{name}{}", table.global.ab_part_a);

    for medium in Medium::ALL {
        let partition = table
            .get(medium, name)
            .or_else(|| table.get(medium, &slot_a));
        if let Some(p) = partition {
            return serde_json::to_value(p)
                .map(Some)
                .with_context(|| format!("Failed to serialize partition: {:?}", p.name));
        }

        let sub_component = table
            .partitions(medium)
            .iter()
            .find_map(|p| p.sub_component(name));
        if let Some(c) = sub_component {
            return serde_json::to_value(c)
                .map(Some)
                .with_context(|| format!("Failed to serialize sub-component: {name:?}"));
        }
    }

    Ok(None)
}

/// Format an attribute value for shell consumption.
fn format_value(attribute: &str, value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) if attribute == COMPONENTS_ATTR => {
                    s.split_once(':').map_or(s.as_str(), |(n, _)| n).to_owned()
                }
                item => format_value(attribute, item),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        v => v.to_string(),
    }
}

fn show(table: &PartitionTable, query: &Query) -> Result<String> {
    let object = find_object(table, &query.name)?
        .ok_or_else(|| anyhow!("Partition not found: {:?}", query.name))?;
    let value = object.get(&query.attribute).ok_or_else(|| {
        anyhow!(
            "Partition {:?} has no attribute {:?}",
            query.name,
            query.attribute,
        )
    })?;

    Ok(format_value(&query.attribute, value))
}

/// Build the `mtdparts` layout string for the partitions of a flash medium.
pub fn mtd_parts(partitions: &[Partition]) -> String {
    let mut result = format!("{MTD_ID}:");

    for (i, p) in partitions.iter().enumerate() {
        if i > 0 {
            result.push(',');
        }

        if p.name == MTD_FILL_PARTITION {
            let _ = write!(result, "-@{:#x}({})", p.start, p.name);
        } else {
            let _ = write!(result, "{}@{:#x}({})", p.size, p.start, p.name);
        }
    }

    result
}

/// Names of the sub-components inside the first `miniboot` partition.
fn miniboot_components(table: &PartitionTable) -> Option<Vec<&str>> {
    Medium::ALL
        .into_iter()
        .find_map(|m| table.get(m, "miniboot"))
        .map(|p| p.sub_components.keys().map(|k| k.as_str()).collect())
}

fn resolve_subcommand(cli: &ResolveCli) -> Result<()> {
    let table = cli.spec.load_table()?;

    for medium in Medium::ALL {
        let partitions = table.partitions(medium);
        if !partitions.is_empty() {
            status!("{medium}: {} partitions", partitions.len());
        }
    }
    for skipped in &table.skipped {
        status!("Skipped {:?}: {}", skipped.name, skipped.reason);
    }

    Ok(())
}

fn list_subcommand(cli: &ListCli) -> Result<()> {
    let table = cli.spec.load_table()?;
    let (_, partitions) = table
        .first_populated()
        .ok_or_else(|| anyhow!("No partitions in {:?}", cli.spec.input))?;

    let names = partitions
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>();
    println!("{}", names.join(" "));

    Ok(())
}

fn show_subcommand(cli: &ShowCli) -> Result<()> {
    let table = cli.spec.load_table()?;
    println!("{}", show(&table, &cli.query)?);

    Ok(())
}

fn mtd_subcommand(cli: &MtdCli) -> Result<()> {
    let table = cli.spec.load_table()?;

    let partitions = [Medium::Nor, Medium::Nand]
        .into_iter()
        .map(|m| table.partitions(m))
        .find(|p| !p.is_empty());

    match partitions {
        Some(p) => println!("{}", mtd_parts(p)),
        None => warn!("No NOR or NAND partitions in {:?}", cli.spec.input),
    }

    Ok(())
}

fn miniboot_subcommand(cli: &MinibootCli) -> Result<()> {
    let table = cli.spec.load_table()?;
    let Some(names) = miniboot_components(&table) else {
        bail!("No miniboot partition in {:?}", cli.spec.input);
    };

    println!("{}", names.join(" "));

    Ok(())
}

fn convert_subcommand(cli: &ConvertCli) -> Result<()> {
    let value = unit::convert(&cli.size, cli.unit, cli.layout.block_size)
        .with_context(|| format!("Failed to convert size: {:?}", cli.size))?;
    println!("{value}");

    Ok(())
}

pub fn part_main(cli: &PartCli) -> Result<()> {
    match &cli.command {
        PartCommand::Resolve(c) => resolve_subcommand(c),
        PartCommand::List(c) => list_subcommand(c),
        PartCommand::Show(c) => show_subcommand(c),
        PartCommand::Mtd(c) => mtd_subcommand(c),
        PartCommand::Miniboot(c) => miniboot_subcommand(c),
        PartCommand::Convert(c) => convert_subcommand(c),
    }
}

/// Resolve the partition spec and write the resolved table.
#[derive(Debug, Parser)]
struct ResolveCli {
    #[command(flatten)]
    spec: SpecGroup,
}

/// List partition names of the first medium that has partitions.
///
/// Names are printed on one line, separated by spaces.
#[derive(Debug, Parser)]
struct ListCli {
    #[command(flatten)]
    spec: SpecGroup,
}

/// Print a partition attribute.
///
/// The partition is looked up by name, then by the name of its first A/B slot,
/// then as a sub-component of any partition. Strings are printed as-is, arrays
/// are printed one element per line, and unset values print an empty line. For
/// the `components` attribute, only the component names are printed.
///
/// Booleans are printed as `true` or `false` and null as an empty line, not as
/// `True` or `None`.
#[derive(Debug, Parser)]
struct ShowCli {
    /// Query in the form <partition>:<attribute>.
    #[arg(value_name = "QUERY", value_parser = Query::from_str)]
    query: Query,

    #[command(flatten)]
    spec: SpecGroup,
}

/// Print the mtdparts layout for the NOR or NAND medium.
#[derive(Debug, Parser)]
struct MtdCli {
    #[command(flatten)]
    spec: SpecGroup,
}

/// List the images inside the miniboot partition.
#[derive(Debug, Parser)]
struct MinibootCli {
    #[command(flatten)]
    spec: SpecGroup,
}

/// Convert a size literal to another unit.
///
/// The literal is a decimal number with an optional k, m, g, or s (sectors)
/// suffix. The result is truncated.
#[derive(Debug, Parser)]
struct ConvertCli {
    /// Size literal.
    #[arg(value_name = "SIZE")]
    size: String,

    /// Unit to convert to (b, s, k, or m).
    #[arg(short, long, value_name = "UNIT", value_parser = Unit::from_str, default_value = "b")]
    unit: Unit,

    #[command(flatten)]
    layout: LayoutGroup,
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
enum PartCommand {
    Resolve(ResolveCli),
    List(ListCli),
    Show(ShowCli),
    Mtd(MtdCli),
    Miniboot(MinibootCli),
    Convert(ConvertCli),
}

/// Query and resolve partition specs.
#[derive(Debug, Parser)]
pub struct PartCli {
    #[command(subcommand)]
    command: PartCommand,
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use crate::partition::table::LayoutConfig;

    use super::*;

    fn table() -> PartitionTable {
        let spec = json!({
            "miniboot": {
                "size": "512k",
                "medium": "nor",
                "spl": {"size": "64k", "image": "spl.bin"},
                "ddr": {"size": "128k"},
                "bl2": {"size": "32k"},
            },
            "bl2": {"size": "4M"},
            "sys": {"size": "8M", "part_type": "AB", "fs_type": "ext4"},
        });

        PartitionTable::resolve(&spec, Path::new("."), &LayoutConfig::default(), "").unwrap()
    }

    fn query(s: &str) -> Query {
        s.parse().unwrap()
    }

    #[test]
    fn parse_query() {
        assert_eq!(
            "uboot:size".parse::<Query>(),
            Ok(Query {
                name: "uboot".to_owned(),
                attribute: "size".to_owned(),
            }),
        );
        assert!("uboot".parse::<Query>().is_err());
        assert!("uboot:".parse::<Query>().is_err());
        assert!("a:b:c".parse::<Query>().is_err());
    }

    #[test]
    fn value_formatting() {
        assert_eq!(format_value("start", &Value::from(4096)), "4096");
        assert_eq!(format_value("fs_type", &Value::from("ext4")), "ext4");
        assert_eq!(format_value("pre_cmd", &Value::Null), "");
        assert_eq!(format_value("is_rootfs", &Value::from(true)), "true");
        assert_eq!(
            format_value(
                "components",
                &serde_json::json!(["bl31:65536", "optee:131072"]),
            ),
            "bl31\noptee",
        );
        assert_eq!(
            format_value("depends", &serde_json::json!(["boot_a", "system_a"])),
            "boot_a\nsystem_a",
        );
    }

    #[test]
    fn show_lookup_order() {
        let table = table();

        // A/B base names resolve to the first slot.
        assert_eq!(show(&table, &query("sys:start")).unwrap(), "4194304");
        assert_eq!(show(&table, &query("sys_b:start")).unwrap(), "12582912");
        assert_eq!(
            show(&table, &query("sys:part_type_guid")).unwrap(),
            "0FC63DAF-8483-4772-8E79-3D69D8477DE4",
        );

        // NOR sub-components are found before eMMC partitions.
        assert_eq!(show(&table, &query("bl2:size")).unwrap(), "32768");
        assert_eq!(show(&table, &query("spl:image")).unwrap(), "spl.bin");

        assert_eq!(show(&table, &query("miniboot:pre_cmd")).unwrap(), "");
        assert_eq!(show(&table, &query("miniboot:is_rootfs")).unwrap(), "false");

        assert!(show(&table, &query("missing:size")).is_err());
        assert!(show(&table, &query("sys:missing")).is_err());
    }

    #[test]
    fn miniboot_component_order() {
        assert_eq!(
            miniboot_components(&table()),
            Some(vec!["spl", "ddr", "bl2"]),
        );

        let spec = json!({"boot": {"size": "4M"}});
        let table =
            PartitionTable::resolve(&spec, Path::new("."), &LayoutConfig::default(), "").unwrap();
        assert_eq!(miniboot_components(&table), None);
    }
}
