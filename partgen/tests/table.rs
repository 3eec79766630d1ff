// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs, path::Path};

use assert_matches::assert_matches;
use partgen::partition::{
    model::{LINUX_FS_GUID, Medium, PartType},
    table::{Error, GlobalConfig, LayoutConfig, PartitionTable, SkipReason},
};
use serde_json::{Value, json};
use uuid::uuid;

const MIB: u64 = 1024 * 1024;

fn resolve(spec: Value) -> Result<PartitionTable, Error> {
    PartitionTable::resolve(&spec, Path::new("."), &LayoutConfig::default(), "1.2.3")
}

fn names(table: &PartitionTable, medium: Medium) -> Vec<&str> {
    table
        .partitions(medium)
        .iter()
        .map(|p| p.name.as_str())
        .collect()
}

#[test]
fn emmc_layout_is_contiguous() {
    let table = resolve(json!({
        "boot": {"size": "4M", "medium": "emmc", "fs_type": "ext4"},
        "system": {"size": "100M", "medium": "emmc"},
        "misc": {"size": "8s"},
    }))
    .unwrap();

    let boot = table.get(Medium::Emmc, "boot").unwrap();
    assert_eq!((boot.start, boot.end, boot.size), (0, 4 * MIB - 1, 4 * MIB));
    assert_eq!((boot.start_lba(512), boot.end_lba(512)), (0, 8191));
    assert_eq!(boot.part_num, 1);
    assert_eq!(boot.part_type, PartType::Perm);
    assert_eq!(boot.part_type_guid, Some(LINUX_FS_GUID));

    let system = table.get(Medium::Emmc, "system").unwrap();
    assert_eq!(system.start, 4 * MIB);
    assert_eq!(system.start_lba(512), 8192);
    assert_eq!(system.part_num, 2);
    assert_eq!(system.part_type_guid, None);

    // The medium defaults to eMMC.
    let misc = table.get(Medium::Emmc, "misc").unwrap();
    assert_eq!(misc.start, system.end + 1);
    assert_eq!(misc.size, 4096);

    assert!(table.nor.is_empty());
    assert!(table.nand.is_empty());
    assert_eq!(table.global.sys_version, "1.2.3");
}

#[test]
fn media_are_laid_out_independently() {
    let table = resolve(json!({
        "norcfg": {"size": "64k", "medium": "nor"},
        "boot": {"size": "1M", "medium": "emmc"},
        "uboot": {"size": "256k", "medium": "nor"},
        "rootfs": {"size": "1M", "medium": "nand"},
    }))
    .unwrap();

    assert_eq!(names(&table, Medium::Nor), ["norcfg", "uboot"]);
    assert_eq!(table.get(Medium::Nor, "uboot").unwrap().start, 64 * 1024);
    assert_eq!(table.get(Medium::Nor, "uboot").unwrap().part_num, 2);
    assert_eq!(table.get(Medium::Emmc, "boot").unwrap().start, 0);
    assert_eq!(table.get(Medium::Nand, "rootfs").unwrap().start, 0);

    assert_eq!(table.first_populated().map(|(m, _)| m), Some(Medium::Nor));
}

#[test]
fn misaligned_sizes_are_fatal() {
    assert_matches!(
        resolve(json!({"cfg": {"size": "16k", "medium": "nor"}})),
        Err(Error::Misaligned { medium: Medium::Nor, .. })
    );
    assert_matches!(
        resolve(json!({"cfg": {"size": "64k", "medium": "nand"}})),
        Err(Error::Misaligned { medium: Medium::Nand, .. })
    );
    assert_matches!(
        resolve(json!({"cfg": {"size": "1000", "medium": "emmc"}})),
        Err(Error::Misaligned { medium: Medium::Emmc, .. })
    );

    let layout = LayoutConfig::new(4096, 32 * 1024, 128 * 1024).unwrap();
    let spec = json!({"cfg": {"size": "2048"}});
    assert_matches!(
        PartitionTable::resolve(&spec, Path::new("."), &layout, ""),
        Err(Error::Misaligned { .. })
    );

    assert_matches!(LayoutConfig::new(0, 1, 1), Err(Error::LayoutZero(_)));
}

#[test]
fn ab_expansion() {
    let table = resolve(json!({
        "sys": {
            "size": "4M",
            "medium": "emmc",
            "part_type": "AB",
            "depends": ["boot"],
        },
    }))
    .unwrap();

    assert_eq!(names(&table, Medium::Emmc), ["sys_a", "sys_b"]);

    let sys_a = table.get(Medium::Emmc, "sys_a").unwrap();
    let sys_b = table.get(Medium::Emmc, "sys_b").unwrap();
    assert_eq!(sys_a.start, 0);
    assert_eq!(sys_b.start, sys_a.end + 1);
    assert_eq!(sys_b.start % 512, 0);
    assert_eq!(sys_a.base_name, "sys");
    assert_eq!(sys_b.base_name, "sys");
    assert_eq!(sys_a.depends, ["boot_a"]);
    assert_eq!(sys_b.depends, ["boot_b"]);
    assert_eq!(sys_b.part_type, PartType::Ab);
}

#[test]
fn custom_slot_suffixes() {
    let table = resolve(json!({
        "global": {"AB_part_a": "-x", "AB_part_b": "-y", "backup_dir": "/data/bak"},
        "sys": {"size": "1M", "part_type": "AB"},
    }))
    .unwrap();

    assert_eq!(names(&table, Medium::Emmc), ["sys-x", "sys-y"]);
    assert_eq!(table.global.ab_part_a, "-x");
    assert_eq!(table.global.backup_dir, "/data/bak");
    assert_eq!(table.global.bak_part_bak, "_bak");
}

#[test]
fn bak_expansion() {
    let table = resolve(json!({
        "global": {"backup_slot_count": 3},
        "miniboot": {"size": "512k", "medium": "nor", "part_type": "BAK"},
        "uboot": {"size": "1M", "medium": "nor"},
    }))
    .unwrap();

    assert_eq!(
        names(&table, Medium::Nor),
        ["miniboot", "miniboot_bak1", "miniboot_bak2", "uboot"],
    );

    let partitions = table.partitions(Medium::Nor);
    for (i, p) in partitions[..3].iter().enumerate() {
        assert_eq!(p.start, i as u64 * 512 * 1024);
        assert_eq!(p.base_name, "miniboot");
        assert_eq!(p.part_num, i as u32 + 1);
    }
    assert_eq!(partitions[3].start, 3 * 512 * 1024);
}

#[test]
fn bak_expansion_default_count() {
    let table = resolve(json!({
        "uboot": {"size": "1M", "part_type": "BAK"},
    }))
    .unwrap();

    assert_eq!(names(&table, Medium::Emmc), ["uboot", "uboot_bak1"]);
}

#[test]
fn components_and_sub_components() {
    let table = resolve(json!({
        "miniboot": {
            "size": "1M",
            "medium": "nor",
            "components": ["bl31:64k", "optee:128k"],
            "bl2": {"size": "128k", "image": "bl2.bin"},
            "ddr": {"size": "64k"},
            "comment": "not a sub-component",
        },
    }))
    .unwrap();

    let miniboot = table.get(Medium::Nor, "miniboot").unwrap();
    let components = miniboot
        .components
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    assert_eq!(components, ["bl31:65536", "optee:131072"]);

    let keys = miniboot.sub_components.keys().collect::<Vec<_>>();
    assert_eq!(keys, ["bl2", "ddr"]);

    let bl2 = miniboot.sub_component("bl2").unwrap();
    assert_eq!(bl2.size, 128 * 1024);
    assert_eq!(bl2.attributes.get("image"), Some(&json!("bl2.bin")));
}

#[test]
fn component_overflow_is_fatal() {
    assert_matches!(
        resolve(json!({
            "boot": {"size": "1M", "components": ["kernel:768k", "dtb:512k"]},
        })),
        Err(Error::ComponentsTooLarge { name, .. }) if name == "boot"
    );
    assert_matches!(
        resolve(json!({
            "miniboot": {"size": "64k", "medium": "nor", "bl2": {"size": "64k"}, "ddr": {"size": "1"}},
        })),
        Err(Error::ComponentsTooLarge { .. })
    );

    // Exactly full is fine.
    resolve(json!({
        "boot": {"size": "1M", "components": ["kernel:512k", "dtb:512k"]},
    }))
    .unwrap();
}

#[test]
fn invalid_declarations() {
    assert_matches!(
        resolve(json!({"boot": {"medium": "emmc"}})),
        Err(Error::MissingSize { .. })
    );
    assert_matches!(
        resolve(json!({"boot": {"size": "0"}})),
        Err(Error::ZeroSize { .. })
    );
    assert_matches!(
        resolve(json!({"boot": {"size": "4x"}})),
        Err(Error::InvalidSize { .. })
    );
    assert_matches!(
        resolve(json!({"boot": {"size": "4M", "medium": "ufs"}})),
        Err(Error::Medium { .. })
    );
    assert_matches!(
        resolve(json!({"boot": {"size": "4M", "components": ["kernel"]}})),
        Err(Error::InvalidComponent { .. })
    );
    assert_matches!(
        resolve(json!({"boot": {"size": "4M", "bl2": {"image": "bl2.bin"}}})),
        Err(Error::InvalidSubComponent { .. })
    );
    assert_matches!(
        resolve(json!({"boot": {"size": "4M", "part_type_guid": "not-a-guid"}})),
        Err(Error::InvalidGuid { .. })
    );
    assert_matches!(
        resolve(json!({"boot": 4})),
        Err(Error::InvalidDeclaration { kind: "a number", .. })
    );
    assert_matches!(resolve(json!([])), Err(Error::SpecNotAnObject));
}

#[test]
fn type_guid_selection() {
    let table = resolve(json!({
        "explicit": {
            "size": "1M",
            "fs_type": "ext4",
            "part_type_guid": "C12A7328-F81F-11D2-BA4B-00A0C93EC93B",
        },
        "empty": {"size": "1M", "fs_type": "ext4", "part_type_guid": ""},
        "unknown_fs": {"size": "1M", "fs_type": "squashfs"},
    }))
    .unwrap();

    assert_eq!(
        table.get(Medium::Emmc, "explicit").unwrap().part_type_guid,
        Some(uuid!("C12A7328-F81F-11D2-BA4B-00A0C93EC93B")),
    );
    assert_eq!(table.get(Medium::Emmc, "empty").unwrap().part_type_guid, None);
    assert_eq!(
        table.get(Medium::Emmc, "unknown_fs").unwrap().part_type_guid,
        None,
    );
}

#[test]
fn referenced_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("boot.json"),
        r#"{
            "uboot": {"size": "1M", "medium": "emmc"},
            "empty": {}
        }"#,
    )
    .unwrap();

    let spec = json!({
        "PA_uboot": "boot.json",
        "PB_uboot": "boot.json",
        "absent": "missing.json",
        "nokey": "boot.json",
        "empty": "boot.json",
        "system": {"size": "2M"},
    });

    let table =
        PartitionTable::resolve(&spec, dir.path(), &LayoutConfig::default(), "").unwrap();

    assert_eq!(names(&table, Medium::Emmc), ["PA_uboot", "PB_uboot", "system"]);
    assert_eq!(table.get(Medium::Emmc, "PB_uboot").unwrap().start, MIB);
    assert_eq!(table.get(Medium::Emmc, "PB_uboot").unwrap().base_name, "PB_uboot");
    assert_eq!(table.get(Medium::Emmc, "system").unwrap().start, 2 * MIB);

    let skipped = table
        .skipped
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(skipped, ["absent", "nokey", "empty"]);
    assert_matches!(table.skipped[0].reason, SkipReason::Unreadable { .. });
    assert_matches!(
        &table.skipped[1].reason,
        SkipReason::MissingKey { key, .. } if key == "nokey"
    );
}

#[test]
fn malformed_referenced_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bad.json"), "{").unwrap();
    fs::write(dir.path().join("list.json"), "[]").unwrap();

    let layout = LayoutConfig::default();

    assert_matches!(
        PartitionTable::resolve(&json!({"a": "bad.json"}), dir.path(), &layout, ""),
        Err(Error::ReferenceParse(..))
    );
    assert_matches!(
        PartitionTable::resolve(&json!({"a": "list.json"}), dir.path(), &layout, ""),
        Err(Error::ReferenceNotAnObject(_))
    );
}

#[test]
fn resolved_json_layout() {
    let table = resolve(json!({
        "miniboot": {
            "size": "1M",
            "medium": "nor",
            "bl2": {"size": "128k"},
            "components": ["bl31:64k"],
        },
        "boot": {"size": "4M", "fs_type": "ext4"},
    }))
    .unwrap();

    let data = table.to_json().unwrap();
    let text = std::str::from_utf8(&data).unwrap();
    assert!(text.starts_with("{\n    \"global\": {\n        \""));

    let value: Value = serde_json::from_slice(&data).unwrap();
    let top = value.as_object().unwrap().keys().collect::<Vec<_>>();
    assert_eq!(top, ["global", "nor", "emmc"]);

    let miniboot = value["nor"]["miniboot"].as_object().unwrap();
    let keys = miniboot.keys().collect::<Vec<_>>();
    assert_eq!(
        keys,
        [
            "bl2",
            "depends",
            "components",
            "base_name",
            "part_num",
            "start",
            "end",
            "size",
            "medium",
            "fs_type",
            "part_type",
            "is_rootfs",
            "part_type_guid",
            "pre_cmd",
            "post_cmd",
            "ota_update_mode",
            "ota_is_update",
            "magic",
            "have_anti_ver",
        ],
    );
    assert_eq!(miniboot["bl2"], json!({"size": 131072}));
    assert_eq!(miniboot["components"], json!(["bl31:65536"]));
    assert_eq!(miniboot["medium"], json!("nor"));
    assert_eq!(miniboot["part_type"], json!("PERM"));
    assert_eq!(miniboot["part_type_guid"], json!(""));

    assert_eq!(
        value["global"],
        json!({
            "backup_slot_count": 2,
            "backup_dir": "/userdata/ota/backup_dir",
            "AB_part_a": "_a",
            "AB_part_b": "_b",
            "BAK_part_bak": "_bak",
            "sys_version": "1.2.3",
        }),
    );
}

#[test]
fn resolved_round_trip() {
    let table = resolve(json!({
        "miniboot": {
            "size": "1M",
            "medium": "nor",
            "part_type": "BAK",
            "bl2": {"size": "128k", "image": "bl2.bin"},
        },
        "sys": {
            "size": "4M",
            "part_type": "AB",
            "fs_type": "ext4",
            "depends": ["boot"],
            "pre_cmd": ["mount", "-o", "ro"],
            "magic": 1234,
        },
    }))
    .unwrap();

    let value: Value = serde_json::from_slice(&table.to_json().unwrap()).unwrap();
    assert!(PartitionTable::is_resolved(&value));

    let loaded = PartitionTable::from_resolved(&value).unwrap();
    assert_eq!(loaded, table);
}

#[test]
fn resolved_legacy_table() {
    let value = json!({
        "global": {
            "backup_slot_count": 2,
            "backup_dir": "/userdata/ota/backup_dir",
            "AB_part_a": "_a",
            "AB_part_b": "_b",
            "BAK_part_bak": "_bak",
            "sys_version": "",
        },
        "emmc": {
            "boot": {
                "depends": [],
                "components": [],
                "base_name": "boot",
                "part_num": 1,
                "start": 0,
                "end": 4194303,
                "size": 4194304,
                "medium": "emmc",
                "fs_type": null,
                "part_type": "PERM",
                "is_rootfs": false,
                "part_type_guid": "",
                "pre_cmd": null,
                "post_cmd": null,
                "ota_update_mode": null,
                "ota_is_update": null,
                "magic": null,
                "have_anti_ver": null,
            },
            "system": {
                "depends": [],
                "components": [],
                "base_name": "system",
                "part_num": 2,
                "start": 4194304,
                "end": 109051903,
                "size": 104857600,
                "medium": "emmc",
                "fs_type": "ext4",
                "part_type": "PERM",
                "is_rootfs": true,
                "part_type_guid": "0FC63DAF-8483-4772-8E79-3D69D8477DE4",
                "pre_cmd": null,
                "post_cmd": null,
                "ota_update_mode": null,
                "ota_is_update": null,
                "magic": null,
                "have_anti_ver": null,
            },
        },
    });
    assert!(PartitionTable::is_resolved(&value));

    let table = PartitionTable::from_resolved(&value).unwrap();
    assert_eq!(table.get(Medium::Emmc, "boot").unwrap().part_type_guid, None);
    assert_eq!(
        table.get(Medium::Emmc, "system").unwrap().part_type_guid,
        Some(LINUX_FS_GUID),
    );

    // Written back in the same format.
    let written: Value = serde_json::from_slice(&table.to_json().unwrap()).unwrap();
    assert_eq!(written["emmc"], value["emmc"]);
}

#[test]
fn resolved_detection() {
    assert!(!PartitionTable::is_resolved(&json!({
        "boot": {"size": "4M"},
    })));
    assert!(!PartitionTable::is_resolved(&json!({
        "global": {"backup_slot_count": 3},
        "emmc": {"size": "4M"},
    })));
    assert!(PartitionTable::is_resolved(&json!({
        "global": {"sys_version": ""},
    })));
}

#[test]
fn resolved_medium_must_match() {
    let table = resolve(json!({"boot": {"size": "4M"}})).unwrap();
    let mut value: Value = serde_json::from_slice(&table.to_json().unwrap()).unwrap();
    value["emmc"]["boot"]["medium"] = json!("nor");

    assert_matches!(
        PartitionTable::from_resolved(&value),
        Err(Error::ResolvedMediumMismatch { .. })
    );
}

#[test]
fn system_version_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("version");

    assert_eq!(GlobalConfig::read_sys_version(&path).unwrap(), "");

    fs::write(&path, "  x5-1.0.0 \nignored\n").unwrap();
    assert_eq!(GlobalConfig::read_sys_version(&path).unwrap(), "x5-1.0.0");

    assert_matches!(
        GlobalConfig::read_sys_version(dir.path()),
        Err(Error::VersionRead(..))
    );
}
