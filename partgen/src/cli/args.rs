// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::{Level, debug, info};

use crate::{
    cli::{completion, gpt, mbr, part},
    partition::table::{
        DEFAULT_BLOCK_SIZE, DEFAULT_NAND_ERASE_SIZE, DEFAULT_NOR_ERASE_SIZE, GlobalConfig,
        LayoutConfig, PartitionTable,
    },
    util,
};

/// Location of the version file inside the deploy directory.
const VERSION_FILE: &str = "system/etc/version";

#[derive(Debug, Subcommand)]
pub enum Command {
    Part(part::PartCli),
    Gpt(gpt::GptCli),
    Mbr(mbr::MbrCli),
    Completion(completion::CompletionCli),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Lowest severity of log messages to show.
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    pub log_level: LogLevel,
}

/// Options for locating and resolving the partition spec. Every option can
/// also be set through the build environment.
#[derive(Debug, Args)]
pub struct SpecGroup {
    /// Path to the partition spec.
    ///
    /// This can either be a hand-written spec or a previously resolved table.
    /// String-valued declarations in a spec refer to files relative to the
    /// spec's directory.
    #[arg(
        short,
        long,
        value_name = "FILE",
        value_parser,
        env = "HR_PART_CONF_FILENAME",
        default_value = "./x5-soc-debug-gpt.json"
    )]
    pub input: PathBuf,

    /// Directory to write the resolved table to.
    ///
    /// The resolved table has the same file name as the input spec. It is only
    /// written when the input is a hand-written spec.
    #[arg(
        long,
        value_name = "DIR",
        value_parser,
        env = "HR_TARGET_PRODUCT_DIR",
        default_value = "./out"
    )]
    pub product_dir: PathBuf,

    /// Deploy directory containing the system version file.
    #[arg(long, value_name = "DIR", value_parser, env = "HR_TARGET_DEPLOY_DIR")]
    pub deploy_dir: Option<PathBuf>,

    /// Path to the system version file.
    ///
    /// This takes precedence over the version file in --deploy-dir.
    #[arg(long, value_name = "FILE", value_parser)]
    pub version_file: Option<PathBuf>,

    #[command(flatten)]
    pub layout: LayoutGroup,
}

#[derive(Debug, Args)]
pub struct LayoutGroup {
    /// eMMC sector size in bytes.
    #[arg(long, value_name = "BYTES", env = "BLK_SZ", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u64,

    /// NOR flash erase block size in bytes.
    #[arg(
        long,
        value_name = "BYTES",
        env = "NOR_ERASE_SIZE",
        default_value_t = DEFAULT_NOR_ERASE_SIZE
    )]
    pub nor_erase_size: u64,

    /// NAND flash erase block size in bytes.
    #[arg(
        long,
        value_name = "BYTES",
        env = "NAND_ERASE_SIZE",
        default_value_t = DEFAULT_NAND_ERASE_SIZE
    )]
    pub nand_erase_size: u64,
}

impl LayoutGroup {
    pub fn config(&self) -> Result<LayoutConfig> {
        LayoutConfig::new(self.block_size, self.nor_erase_size, self.nand_erase_size)
            .context("Invalid layout configuration")
    }
}

impl SpecGroup {
    fn version_file(&self) -> Option<PathBuf> {
        self.version_file
            .clone()
            .or_else(|| self.deploy_dir.as_ref().map(|d| d.join(VERSION_FILE)))
    }

    /// Path that the resolved table is written to.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        let name = self
            .input
            .file_name()
            .ok_or_else(|| anyhow!("Spec path has no file name: {:?}", self.input))?;

        Ok(self.product_dir.join(name))
    }

    /// Load the partition table. A hand-written spec is resolved and the
    /// result is written to [`Self::resolved_path`]. A resolved table is
    /// loaded as-is.
    pub fn load_table(&self) -> Result<PartitionTable> {
        let value = read_json(&self.input)?;

        if PartitionTable::is_resolved(&value) {
            debug!("Loading resolved table: {:?}", self.input);

            return PartitionTable::from_resolved(&value)
                .with_context(|| format!("Failed to load resolved table: {:?}", self.input));
        }

        let layout = self.layout.config()?;
        let sys_version = match self.version_file() {
            Some(path) => GlobalConfig::read_sys_version(&path)
                .with_context(|| format!("Failed to read system version: {path:?}"))?,
            None => String::new(),
        };

        let table = PartitionTable::resolve(
            &value,
            util::parent_path(&self.input),
            &layout,
            &sys_version,
        )
        .with_context(|| format!("Failed to resolve partition spec: {:?}", self.input))?;

        let output = self.resolved_path()?;
        write_table(&output, &table)?;
        info!("Wrote resolved table: {output:?}");

        Ok(table)
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let data =
        fs::read(path).with_context(|| format!("Failed to read partition spec: {path:?}"))?;
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse partition spec JSON: {path:?}"))?;

    Ok(value)
}

fn write_table(path: &Path, table: &PartitionTable) -> Result<()> {
    let data = table
        .to_json()
        .with_context(|| format!("Failed to serialize resolved table: {path:?}"))?;
    util::write_atomic(path, &data)
        .with_context(|| format!("Failed to write resolved table: {path:?}"))?;

    Ok(())
}

fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::from(level))
        .with_target(false)
        .without_time()
        .init();
}

pub fn main(logging_initialized: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level);
    logging_initialized.store(true, Ordering::SeqCst);

    match cli.command {
        Command::Part(c) => part::part_main(&c),
        Command::Gpt(c) => gpt::gpt_main(&c),
        Command::Mbr(c) => mbr::mbr_main(&c),
        Command::Completion(c) => completion::completion_main(&c),
    }
}
