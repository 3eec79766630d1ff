// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::{
    cli::{args::SpecGroup, status},
    format::gpt::{self, GptImage},
    generate::gpt::{BACKUP_IMAGE_NAME, MAIN_IMAGE_NAME},
    partition::model::Medium,
    stream::FromReader,
    util,
};

fn write_image(path: &Path, data: &[u8]) -> Result<()> {
    util::write_atomic(path, data).with_context(|| format!("Failed to write GPT image: {path:?}"))
}

fn display_image(image: &GptImage) {
    let header = &image.header;

    println!("Disk GUID: {}", header.disk_guid);
    println!(
        "Usable LBAs: {}..={}",
        header.first_usable_lba, header.last_usable_lba,
    );
    println!("Backup header LBA: {}", header.alternate_lba);
    println!("Header CRC32: {:#010x}", header.header_crc32);
    println!("Entry array CRC32: {:#010x}", header.partition_entry_array_crc32);
    println!();

    for (i, entry) in image.entries.iter().enumerate() {
        let type_name = gpt::type_name(&entry.partition_type_guid).unwrap_or("Unknown");

        println!("Partition #{}: {}", i + 1, entry.partition_name);
        println!("- LBAs:        {}..={}", entry.starting_lba, entry.ending_lba);
        println!("- Type:        {} ({type_name})", entry.partition_type_guid);
        println!("- Unique GUID: {}", entry.unique_partition_guid);
        if !entry.attributes.is_empty() {
            println!("- Attributes:  {:?}", entry.attributes);
        }
    }
}

fn generate_subcommand(cli: &GenerateCli) -> Result<()> {
    let table = cli.spec.load_table()?;

    if table.partitions(Medium::Emmc).is_empty() {
        warn!("No eMMC partitions; not generating GPT");
        return Ok(());
    }

    let image = crate::generate::gpt::from_table(
        &table,
        cli.spec.layout.block_size,
        &mut rand::thread_rng(),
    )
    .context("Failed to generate GPT")?;

    let main = image.main_image().context("Failed to serialize main GPT")?;
    let backup = image
        .backup_image()
        .context("Failed to serialize backup GPT")?;

    let main_path = cli.output.join(MAIN_IMAGE_NAME);
    let backup_path = cli.output.join(BACKUP_IMAGE_NAME);

    write_image(&main_path, &main)?;
    write_image(&backup_path, &backup)?;

    status!(
        "Wrote GPT with {} partitions: {main_path:?}, {backup_path:?}",
        image.entries.len(),
    );

    Ok(())
}

fn info_subcommand(cli: &InfoCli) -> Result<()> {
    let file = File::open(&cli.input)
        .with_context(|| format!("Failed to open for reading: {:?}", cli.input))?;
    let image = GptImage::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to read GPT image: {:?}", cli.input))?;

    display_image(&image);

    Ok(())
}

pub fn gpt_main(cli: &GptCli) -> Result<()> {
    match &cli.command {
        GptCommand::Generate(c) => generate_subcommand(c),
        GptCommand::Info(c) => info_subcommand(c),
    }
}

/// Generate the main and backup GPT images for the eMMC layout.
///
/// The main image (gpt.img) contains the protective MBR, the primary header,
/// and the partition entry array. The backup image (gpt_back.img) contains
/// the entry array followed by the backup header. Nothing is written if the
/// spec has no eMMC partitions.
#[derive(Debug, Parser)]
struct GenerateCli {
    /// Directory to write the GPT images to.
    #[arg(short, long, value_name = "DIR", value_parser)]
    output: PathBuf,

    #[command(flatten)]
    spec: SpecGroup,
}

/// Display and verify a main GPT image.
#[derive(Debug, Parser)]
struct InfoCli {
    /// Path to input GPT image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum GptCommand {
    Generate(GenerateCli),
    Info(InfoCli),
}

/// Generate or inspect GPT images.
#[derive(Debug, Parser)]
pub struct GptCli {
    #[command(subcommand)]
    command: GptCommand,
}
