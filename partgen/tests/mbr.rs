// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{io::Cursor, path::Path};

use assert_matches::assert_matches;
use partgen::{
    format::mbr::{Chip, MAGIC, MBR_SIZE, VendorMbr},
    generate::mbr::{self, Error},
    partition::table::{LayoutConfig, PartitionTable},
    stream::{FromReader, ToWriter},
};
use serde_json::{Value, json};

const KIB: u32 = 1024;

fn resolve(spec: Value) -> PartitionTable {
    PartitionTable::resolve(&spec, Path::new("."), &LayoutConfig::default(), "").unwrap()
}

#[test]
fn nor_offsets() {
    let table = resolve(json!({
        "norcfg": {"size": "64k", "medium": "nor"},
        "miniboot": {
            "size": "512k",
            "medium": "nor",
            "part_type": "BAK",
            "bl2": {"size": "128k"},
        },
        "uboot": {"size": "1M", "medium": "nor", "part_type": "BAK"},
        "ubootenv": {"size": "256k", "medium": "nor"},
        "misc": {"size": "64k", "medium": "nor"},
        // Only the first populated medium is used.
        "boot": {"size": "4M", "medium": "emmc"},
    }));

    let record = mbr::from_table(Chip::X5, &table).unwrap();

    assert_eq!(
        record,
        VendorMbr {
            nor_cfg: 0,
            bl2_main: 64 * KIB,
            bl2_bak1: 576 * KIB,
            bl2_bak2: 0,
            bl2_bak3: 0,
            bl3x_a: 192 * KIB,
            bl3x_b: 704 * KIB,
            misc: 3392 * KIB,
            uboot_a: 1088 * KIB,
            uboot_b: 2112 * KIB,
            veeprom: 3328 * KIB,
        },
    );
}

#[test]
fn emmc_offsets_skip_boot_area() {
    let table = resolve(json!({
        "gpt": {"size": "20k"},
        "miniboot": {"size": "1M", "bl2": {"size": "64k"}},
        "uboot": {"size": "1M", "part_type": "AB"},
    }));

    let record = mbr::from_table(Chip::X5, &table).unwrap();

    assert_eq!(record.bl2_main, 0);
    assert_eq!(record.bl3x_a, 64 * KIB);
    // No `uboot` partition, so the A/B slots are used.
    assert_eq!(record.uboot_a, 1024 * KIB);
    assert_eq!(record.uboot_b, 2048 * KIB);
    assert_eq!(record.bl2_bak1, 0);
    assert_eq!(record.bl3x_b, 0);
    assert_eq!(record.veeprom, 0);
}

#[test]
fn invalid_offsets() {
    let table = resolve(json!({"miniboot": {"size": "1M"}}));
    assert_matches!(
        mbr::from_table(Chip::X5, &table),
        Err(Error::OffsetUnderflow { name, .. }) if name == "miniboot"
    );

    let table = resolve(json!({
        "filler": {"size": "4g", "medium": "nor"},
        "misc": {"size": "64k", "medium": "nor"},
    }));
    assert_matches!(
        mbr::from_table(Chip::X5, &table),
        Err(Error::OffsetOverflow { field: "misc", .. })
    );

    let table = resolve(json!({}));
    assert_matches!(mbr::from_table(Chip::X5, &table), Err(Error::NoPartitions));
}

#[test]
fn serialized_record() {
    let record = VendorMbr {
        nor_cfg: 0x0102_0304,
        veeprom: 0xffff_ffff,
        ..Default::default()
    };

    let mut writer = Cursor::new(Vec::new());
    record.to_writer(&mut writer).unwrap();
    let data = writer.into_inner();

    assert_eq!(data.len(), MBR_SIZE);
    assert_eq!(&data[..4], &MAGIC.to_le_bytes());
    assert_eq!(&data[4..8], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&data[44..48], &[0xff; 4]);
    assert!(data[48..508].iter().all(|b| *b == 0));

    let sum = data[..508]
        .iter()
        .fold(0u32, |sum, b| sum.wrapping_add(u32::from(*b)));
    assert_eq!(&data[508..], &sum.to_le_bytes());

    let decoded = VendorMbr::from_reader(Cursor::new(&data)).unwrap();
    assert_eq!(decoded, record);
}
