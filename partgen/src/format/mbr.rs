// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Vendor boot record read by the SoC boot ROM to locate the early boot
//! stages. This is unrelated to the legacy PC MBR.

use std::{
    fmt,
    io::{self, Read, Write},
    mem,
};

use clap::ValueEnum;
use thiserror::Error;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::stream::{FromReader, ReadFixedSizeExt, ToWriter};

/// Magic value for [`VendorMbr`] (`APIF` when read as little-endian bytes).
pub const MAGIC: u32 = 0x4649_5041;

/// Size of the serialized record, including the trailing checksum.
pub const MBR_SIZE: usize = mem::size_of::<RawVendorMbr>();

const RESERVED_SIZE: usize = 115 * 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid vendor MBR magic: {0:#010x}")]
    InvalidMagic(u32),
    #[error("Expected vendor MBR checksum {expected:#010x}, but have {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("Failed to read vendor MBR data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write vendor MBR data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// SoC family that the record is generated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Chip {
    X5,
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_possible_value().ok_or(fmt::Error)?.get_name())
    }
}

/// Raw on-disk layout for the X5 vendor MBR.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawVendorMbr {
    /// Magic value. This should be equal to [`MAGIC`].
    magic: little_endian::U32,
    nor_cfg: little_endian::U32,
    bl2_main: little_endian::U32,
    bl2_bak1: little_endian::U32,
    bl2_bak2: little_endian::U32,
    bl2_bak3: little_endian::U32,
    bl3x_a: little_endian::U32,
    bl3x_b: little_endian::U32,
    misc: little_endian::U32,
    uboot_a: little_endian::U32,
    uboot_b: little_endian::U32,
    veeprom: little_endian::U32,
    reserved: [u8; RESERVED_SIZE],
    /// Wrapping sum of all preceding bytes.
    checksum: little_endian::U32,
}

const _: () = assert!(mem::size_of::<RawVendorMbr>() == 512);

impl RawVendorMbr {
    fn calc_checksum(&self) -> u32 {
        let body = &self.as_bytes()[..MBR_SIZE - mem::size_of::<u32>()];

        body.iter()
            .fold(0u32, |sum, b| sum.wrapping_add(u32::from(*b)))
    }
}

/// Byte offsets of the boot stages, relative to the start of the boot medium
/// as seen by the boot ROM. Unset stages are 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VendorMbr {
    pub nor_cfg: u32,
    pub bl2_main: u32,
    pub bl2_bak1: u32,
    pub bl2_bak2: u32,
    pub bl2_bak3: u32,
    pub bl3x_a: u32,
    pub bl3x_b: u32,
    pub misc: u32,
    pub uboot_a: u32,
    pub uboot_b: u32,
    pub veeprom: u32,
}

impl VendorMbr {
    fn to_raw(self) -> RawVendorMbr {
        let mut raw = RawVendorMbr {
            magic: MAGIC.into(),
            nor_cfg: self.nor_cfg.into(),
            bl2_main: self.bl2_main.into(),
            bl2_bak1: self.bl2_bak1.into(),
            bl2_bak2: self.bl2_bak2.into(),
            bl2_bak3: self.bl2_bak3.into(),
            bl3x_a: self.bl3x_a.into(),
            bl3x_b: self.bl3x_b.into(),
            misc: self.misc.into(),
            uboot_a: self.uboot_a.into(),
            uboot_b: self.uboot_b.into(),
            veeprom: self.veeprom.into(),
            reserved: [0u8; RESERVED_SIZE],
            checksum: 0.into(),
        };
        raw.checksum = raw.calc_checksum().into();
        raw
    }

    /// Serialize to the 512-byte on-disk form, with the checksum filled in.
    pub fn to_bytes(&self) -> [u8; MBR_SIZE] {
        let mut buf = [0u8; MBR_SIZE];
        buf.copy_from_slice(self.to_raw().as_bytes());
        buf
    }

    /// Parse the 512-byte on-disk form. The magic and checksum are verified.
    /// The reserved area is not checked.
    pub fn from_bytes(data: &[u8; MBR_SIZE]) -> Result<Self> {
        let raw = RawVendorMbr::read_from_bytes(data)
            .map_err(|_| Error::DataRead("mbr", io::ErrorKind::UnexpectedEof.into()))?;

        if raw.magic.get() != MAGIC {
            return Err(Error::InvalidMagic(raw.magic.get()));
        }

        let actual = raw.calc_checksum();
        if actual != raw.checksum.get() {
            return Err(Error::ChecksumMismatch {
                expected: raw.checksum.get(),
                actual,
            });
        }

        Ok(Self {
            nor_cfg: raw.nor_cfg.get(),
            bl2_main: raw.bl2_main.get(),
            bl2_bak1: raw.bl2_bak1.get(),
            bl2_bak2: raw.bl2_bak2.get(),
            bl2_bak3: raw.bl2_bak3.get(),
            bl3x_a: raw.bl3x_a.get(),
            bl3x_b: raw.bl3x_b.get(),
            misc: raw.misc.get(),
            uboot_a: raw.uboot_a.get(),
            uboot_b: raw.uboot_b.get(),
            veeprom: raw.veeprom.get(),
        })
    }
}

impl<R: Read> FromReader<R> for VendorMbr {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let data = reader
            .read_array_exact::<MBR_SIZE>()
            .map_err(|e| Error::DataRead("mbr", e))?;

        Self::from_bytes(&data)
    }
}

impl<W: Write> ToWriter<W> for VendorMbr {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer
            .write_all(&self.to_bytes())
            .map_err(|e| Error::DataWrite("mbr", e))
    }
}
