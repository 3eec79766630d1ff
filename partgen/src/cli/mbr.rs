// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    cli::{args::SpecGroup, status},
    format::mbr::Chip,
    generate::mbr::MBR_IMAGE_NAME,
    util,
};

fn generate_subcommand(cli: &GenerateCli) -> Result<()> {
    let table = cli.spec.load_table()?;

    let mbr = crate::generate::mbr::from_table(cli.chip, &table)
        .with_context(|| format!("Failed to generate {} vendor MBR", cli.chip))?;

    let path = cli.output.join(MBR_IMAGE_NAME);
    util::write_atomic(&path, &mbr.to_bytes())
        .with_context(|| format!("Failed to write vendor MBR: {path:?}"))?;

    status!("Wrote {} vendor MBR: {path:?}", cli.chip);

    Ok(())
}

pub fn mbr_main(cli: &MbrCli) -> Result<()> {
    match &cli.command {
        MbrCommand::Generate(c) => generate_subcommand(c),
    }
}

/// Generate the vendor MBR read by the boot ROM.
///
/// The boot medium is the first of NOR, NAND, and eMMC that has partitions.
#[derive(Debug, Parser)]
struct GenerateCli {
    /// SoC to generate the MBR for.
    #[arg(short, long, value_name = "CHIP", value_parser)]
    chip: Chip,

    /// Directory to write mbr.img to.
    #[arg(short, long, value_name = "DIR", value_parser)]
    output: PathBuf,

    #[command(flatten)]
    spec: SpecGroup,
}

#[derive(Debug, Subcommand)]
enum MbrCommand {
    Generate(GenerateCli),
}

/// Generate vendor boot records.
#[derive(Debug, Parser)]
pub struct MbrCli {
    #[command(subcommand)]
    command: MbrCommand,
}
