// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

use crate::{
    format::mbr::{Chip, VendorMbr},
    partition::{
        model::{Medium, Partition},
        table::PartitionTable,
    },
};

/// Output file name of the vendor MBR.
pub const MBR_IMAGE_NAME: &str = "mbr.img";

/// The boot ROM addresses eMMC without the boot area in front of the user
/// data area.
const EMMC_BOOT_AREA_SIZE: u64 = 20 * 1024;

/// The environment copy used as the VEEPROM lives this far into `ubootenv`.
const VEEPROM_OFFSET: u64 = 192 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No partitions on any medium")]
    NoPartitions,
    #[error("Partition {name:?}: Offset {offset:#x} is inside the eMMC boot area")]
    OffsetUnderflow { name: String, offset: u64 },
    #[error("{field}: Offset {offset:#x} does not fit in 32 bits")]
    OffsetOverflow { field: &'static str, offset: u64 },
}

type Result<T> = std::result::Result<T, Error>;

/// Partition lookups against the medium that the boot ROM reads from.
struct BootMedium<'a> {
    partitions: &'a [Partition],
    correction: u64,
}

impl<'a> BootMedium<'a> {
    fn get(&self, name: &str) -> Option<&'a Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Boot ROM view of the start of partition `name`, or 0 if it doesn't
    /// exist.
    fn start(&self, name: &str) -> Result<u64> {
        let Some(partition) = self.get(name) else {
            return Ok(0);
        };

        partition
            .start
            .checked_sub(self.correction)
            .ok_or_else(|| Error::OffsetUnderflow {
                name: name.to_owned(),
                offset: partition.start,
            })
    }

    /// Size of the `bl2` image inside partition `name`, if both exist.
    fn bl2_size(&self, name: &str) -> Option<u64> {
        self.get(name)
            .and_then(|p| p.sub_component("bl2"))
            .map(|c| c.size)
    }
}

fn to_u32(field: &'static str, offset: u64) -> Result<u32> {
    offset
        .try_into()
        .map_err(|_| Error::OffsetOverflow { field, offset })
}

fn x5_mbr(medium: &BootMedium) -> Result<VendorMbr> {
    let bl2_main = medium.start("miniboot")?;
    let bl2_bak1 = medium.start("miniboot_bak1")?;

    let bl3x_a = match medium.bl2_size("miniboot") {
        Some(size) => bl2_main.saturating_add(size),
        None => 0,
    };
    let bl3x_b = match medium.bl2_size("miniboot_bak1") {
        Some(size) => bl2_bak1.saturating_add(size),
        None => 0,
    };

    let (uboot_a, uboot_b) = if medium.get("uboot").is_some() {
        (medium.start("uboot")?, medium.start("uboot_bak1")?)
    } else {
        (medium.start("uboot_a")?, medium.start("uboot_b")?)
    };

    let veeprom = match medium.get("ubootenv") {
        Some(_) => medium.start("ubootenv")?.saturating_add(VEEPROM_OFFSET),
        None => 0,
    };

    Ok(VendorMbr {
        nor_cfg: to_u32("nor_cfg", medium.start("norcfg")?)?,
        bl2_main: to_u32("bl2_main", bl2_main)?,
        bl2_bak1: to_u32("bl2_bak1", bl2_bak1)?,
        bl2_bak2: to_u32("bl2_bak2", medium.start("bl2_bak2")?)?,
        bl2_bak3: to_u32("bl2_bak3", medium.start("bl2_bak3")?)?,
        bl3x_a: to_u32("bl3x_a", bl3x_a)?,
        bl3x_b: to_u32("bl3x_b", bl3x_b)?,
        misc: to_u32("misc", medium.start("misc")?)?,
        uboot_a: to_u32("uboot_a", uboot_a)?,
        uboot_b: to_u32("uboot_b", uboot_b)?,
        veeprom: to_u32("veeprom", veeprom)?,
    })
}

/// Build the vendor MBR for `chip`. The boot medium is the first medium in
/// nor, nand, emmc order that has any partitions.
pub fn from_table(chip: Chip, table: &PartitionTable) -> Result<VendorMbr> {
    let (medium, partitions) = table.first_populated().ok_or(Error::NoPartitions)?;

    let boot_medium = BootMedium {
        partitions,
        correction: match medium {
            Medium::Emmc => EMMC_BOOT_AREA_SIZE,
            Medium::Nor | Medium::Nand => 0,
        },
    };

    match chip {
        Chip::X5 => x5_mbr(&boot_medium),
    }
}
