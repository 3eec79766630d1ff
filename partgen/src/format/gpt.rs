// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! On-disk GUID partition table structures.
//!
//! All multi-byte integers are little-endian. GUIDs are stored in the mixed
//! endian form used by UEFI, where the first three fields are little-endian
//! and the last two are stored as-is.

use std::{
    fmt,
    io::{self, Read, Write},
    mem,
};

use bitflags::bitflags;
use bstr::ByteSlice;
use thiserror::Error;
use uuid::Uuid;
use zerocopy::{FromBytes, FromZeros, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::padding,
    stream::{CountingWriter, FromReader, ReadFixedSizeExt, ToWriter},
    util::NumBytes,
};

/// Magic value for [`GptHeader::signature`].
pub const SIGNATURE: [u8; 8] = *b"EFI PART";

/// UEFI 2.x header revision (stored as `00 00 01 00`).
pub const REVISION: u32 = 0x0001_0000;

/// Size of a logical sector. GPT images are always produced for 512-byte
/// sectors.
pub const SECTOR_SIZE: u64 = 512;

/// Size of the serialized header.
pub const HEADER_SIZE: usize = mem::size_of::<RawHeader>();

/// Size of a serialized partition entry.
pub const ENTRY_SIZE: usize = mem::size_of::<RawEntry>();

/// Number of slots in the partition entry array.
pub const NUM_ENTRIES: usize = 128;

/// Size of the full partition entry array.
pub const ENTRY_ARRAY_SIZE: usize = ENTRY_SIZE * NUM_ENTRIES;

/// Location of the primary header.
pub const PRIMARY_HEADER_LBA: u64 = 1;

/// Location of the primary partition entry array.
pub const PARTITION_ENTRY_LBA: u64 = 2;

/// First sector after the protective MBR, primary header, and entry array.
pub const FIRST_USABLE_LBA: u64 = 34;

/// Number of sectors taken up by the backup header and entry array.
pub const BACKUP_SECTORS: u64 = 33;

/// Size of the main image: protective MBR + header block + entry array.
pub const MAIN_IMAGE_SIZE: usize = 2 * SECTOR_SIZE as usize + ENTRY_ARRAY_SIZE;

/// Size of the backup image: entry array + header block.
pub const BACKUP_IMAGE_SIZE: usize = ENTRY_ARRAY_SIZE + SECTOR_SIZE as usize;

/// Maximum length of a partition name in UTF-16 code units.
pub const NAME_MAX_UNITS: usize = 36;

/// Partition type of the protective MBR entry.
const PROTECTIVE_OS_TYPE: u8 = 0xee;

/// Number of sectors covered by the protective MBR entry.
const PROTECTIVE_NUM_SECTORS: u32 = 0x007f_ffff;

const MBR_SIGNATURE: [u8; 2] = [0x55, 0xaa];

/// Well-known partition type GUIDs, keyed by their uppercase string form.
static TYPE_NAMES: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "00000000-0000-0000-0000-000000000000" => "Unused entry",
    "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" => "EFI system partition",
    "21686148-6449-6E6F-744E-656564454649" => "BIOS boot partition",
    "0FC63DAF-8483-4772-8E79-3D69D8477DE4" => "Linux filesystem data",
    "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => "Linux swap",
    "E6D6D379-F507-44C2-A23C-238F2A3DF928" => "Linux LVM",
    "A19D880F-05FC-4D3B-A006-743F0F84911E" => "Linux RAID",
    "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Microsoft basic data",
    "E3C9E316-0B5C-4DB8-817D-F92DF00215AE" => "Microsoft reserved",
};

/// Get the human-readable name of a well-known partition type GUID.
pub fn type_name(guid: &Uuid) -> Option<&'static str> {
    let mut buf = Uuid::encode_buffer();
    let s = guid.hyphenated().encode_upper(&mut buf);

    TYPE_NAMES.get(&*s).copied()
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid header signature: {:?}", .0.as_bstr())]
    InvalidSignature([u8; 8]),
    #[error("Invalid header size: {0} != {HEADER_SIZE}")]
    InvalidHeaderSize(u32),
    #[error("Unsupported entry array: {count} entries of {entry_size} bytes")]
    UnsupportedEntryArray { count: u32, entry_size: u32 },
    #[error("Unexpected entry array location: LBA {0}")]
    UnexpectedEntryLba(u64),
    #[error("Expected header CRC32 {expected:#010x}, but have {actual:#010x}")]
    HeaderCrcMismatch { expected: u32, actual: u32 },
    #[error("Expected entry array CRC32 {expected:#010x}, but have {actual:#010x}")]
    EntryArrayCrcMismatch { expected: u32, actual: u32 },
    #[error("Entry array must be {ENTRY_ARRAY_SIZE} bytes, but have {0}")]
    InvalidEntryArraySize(NumBytes<usize>),
    #[error("Too many partition entries: {0} > {NUM_ENTRIES}")]
    TooManyEntries(usize),
    #[error("Partition name exceeds {NAME_MAX_UNITS} UTF-16 code units: {0:?}")]
    NameTooLong(String),
    #[error("Partition name contains NUL: {0:?}")]
    NameContainsNul(String),
    #[error("Partition name is not valid UTF-16")]
    NameInvalid,
    #[error("Missing protective MBR")]
    MissingProtectiveMbr,
    #[error("Failed to read GPT data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write GPT data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the GPT header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawHeader {
    /// Magic value. This should be equal to [`SIGNATURE`].
    signature: [u8; 8],
    revision: little_endian::U32,
    header_size: little_endian::U32,
    /// CRC32 of this [`RawHeader`] with this field set to zero.
    header_crc32: little_endian::U32,
    reserved: little_endian::U32,
    my_lba: little_endian::U64,
    alternate_lba: little_endian::U64,
    first_usable_lba: little_endian::U64,
    last_usable_lba: little_endian::U64,
    disk_guid: [u8; 16],
    partition_entry_lba: little_endian::U64,
    number_of_partition_entries: little_endian::U32,
    size_of_partition_entry: little_endian::U32,
    partition_entry_array_crc32: little_endian::U32,
}

const _: () = assert!(mem::size_of::<RawHeader>() == 92);

impl fmt::Debug for RawHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawHeader")
            .field("signature", &self.signature.as_bstr())
            .field("revision", &format_args!("{:#010x}", self.revision.get()))
            .field("header_size", &self.header_size.get())
            .field("header_crc32", &format_args!("{:#010x}", self.header_crc32.get()))
            .field("reserved", &self.reserved.get())
            .field("my_lba", &self.my_lba.get())
            .field("alternate_lba", &self.alternate_lba.get())
            .field("first_usable_lba", &self.first_usable_lba.get())
            .field("last_usable_lba", &self.last_usable_lba.get())
            .field("disk_guid", &Uuid::from_bytes_le(self.disk_guid))
            .field("partition_entry_lba", &self.partition_entry_lba.get())
            .field(
                "number_of_partition_entries",
                &self.number_of_partition_entries.get(),
            )
            .field("size_of_partition_entry", &self.size_of_partition_entry.get())
            .field(
                "partition_entry_array_crc32",
                &format_args!("{:#010x}", self.partition_entry_array_crc32.get()),
            )
            .finish()
    }
}

/// Raw on-disk layout for a partition entry.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawEntry {
    partition_type_guid: [u8; 16],
    unique_partition_guid: [u8; 16],
    starting_lba: little_endian::U64,
    /// Inclusive.
    ending_lba: little_endian::U64,
    attributes: little_endian::U64,
    /// UTF-16LE, NUL-padded. Not NUL-terminated if all 36 code units are used.
    partition_name: [little_endian::U16; NAME_MAX_UNITS],
}

const _: () = assert!(mem::size_of::<RawEntry>() == 128);

impl fmt::Debug for RawEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.partition_name.map(|c| c.get());

        f.debug_struct("RawEntry")
            .field(
                "partition_type_guid",
                &Uuid::from_bytes_le(self.partition_type_guid),
            )
            .field(
                "unique_partition_guid",
                &Uuid::from_bytes_le(self.unique_partition_guid),
            )
            .field("starting_lba", &self.starting_lba.get())
            .field("ending_lba", &self.ending_lba.get())
            .field("attributes", &format_args!("{:#018x}", self.attributes.get()))
            .field("partition_name", &String::from_utf16_lossy(&name))
            .finish()
    }
}

/// Raw on-disk layout for a legacy MBR partition record.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawMbrPartition {
    status: u8,
    first_chs: [u8; 3],
    os_type: u8,
    last_chs: [u8; 3],
    first_lba: little_endian::U32,
    num_sectors: little_endian::U32,
}

/// Raw on-disk layout for the protective MBR in LBA 0.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawProtectiveMbr {
    boot_code: [u8; 446],
    partitions: [RawMbrPartition; 4],
    signature: [u8; 2],
}

const _: () = assert!(mem::size_of::<RawProtectiveMbr>() == SECTOR_SIZE as usize);

impl RawProtectiveMbr {
    /// A protective MBR with a single 0xEE record covering the disk, starting
    /// at LBA 1.
    fn new() -> Self {
        let mut mbr = Self::new_zeroed();
        mbr.partitions[0] = RawMbrPartition {
            status: 0,
            first_chs: [0x00, 0x02, 0x00],
            os_type: PROTECTIVE_OS_TYPE,
            last_chs: [0xff; 3],
            first_lba: (PRIMARY_HEADER_LBA as u32).into(),
            num_sectors: PROTECTIVE_NUM_SECTORS.into(),
        };
        mbr.signature = MBR_SIGNATURE;
        mbr
    }

    fn validate(&self) -> Result<()> {
        if self.signature != MBR_SIGNATURE || self.partitions[0].os_type != PROTECTIVE_OS_TYPE {
            return Err(Error::MissingProtectiveMbr);
        }

        Ok(())
    }
}

/// The 512-byte protective MBR that precedes the primary GPT header.
pub fn protective_mbr() -> [u8; SECTOR_SIZE as usize] {
    let mut buf = [0u8; SECTOR_SIZE as usize];
    buf.copy_from_slice(RawProtectiveMbr::new().as_bytes());
    buf
}

/// The GPT header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GptHeader {
    pub signature: [u8; 8],
    pub revision: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub reserved: u32,
    pub my_lba: u64,
    pub alternate_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Uuid,
    pub partition_entry_lba: u64,
    pub number_of_partition_entries: u32,
    pub size_of_partition_entry: u32,
    pub partition_entry_array_crc32: u32,
}

impl fmt::Debug for GptHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_raw(), f)
    }
}

impl GptHeader {
    /// A primary header with the standard layout and zeroed CRCs. The caller
    /// is responsible for filling in the usable range.
    pub fn new(disk_guid: Uuid) -> Self {
        Self {
            signature: SIGNATURE,
            revision: REVISION,
            header_size: HEADER_SIZE as u32,
            header_crc32: 0,
            reserved: 0,
            my_lba: PRIMARY_HEADER_LBA,
            alternate_lba: 0,
            first_usable_lba: FIRST_USABLE_LBA,
            last_usable_lba: 0,
            disk_guid,
            partition_entry_lba: PARTITION_ENTRY_LBA,
            number_of_partition_entries: NUM_ENTRIES as u32,
            size_of_partition_entry: ENTRY_SIZE as u32,
            partition_entry_array_crc32: 0,
        }
    }

    fn to_raw(self) -> RawHeader {
        RawHeader {
            signature: self.signature,
            revision: self.revision.into(),
            header_size: self.header_size.into(),
            header_crc32: self.header_crc32.into(),
            reserved: self.reserved.into(),
            my_lba: self.my_lba.into(),
            alternate_lba: self.alternate_lba.into(),
            first_usable_lba: self.first_usable_lba.into(),
            last_usable_lba: self.last_usable_lba.into(),
            disk_guid: self.disk_guid.to_bytes_le(),
            partition_entry_lba: self.partition_entry_lba.into(),
            number_of_partition_entries: self.number_of_partition_entries.into(),
            size_of_partition_entry: self.size_of_partition_entry.into(),
            partition_entry_array_crc32: self.partition_entry_array_crc32.into(),
        }
    }

    fn from_raw(raw: &RawHeader) -> Result<Self> {
        if raw.signature != SIGNATURE {
            return Err(Error::InvalidSignature(raw.signature));
        }

        Ok(Self {
            signature: raw.signature,
            revision: raw.revision.get(),
            header_size: raw.header_size.get(),
            header_crc32: raw.header_crc32.get(),
            reserved: raw.reserved.get(),
            my_lba: raw.my_lba.get(),
            alternate_lba: raw.alternate_lba.get(),
            first_usable_lba: raw.first_usable_lba.get(),
            last_usable_lba: raw.last_usable_lba.get(),
            disk_guid: Uuid::from_bytes_le(raw.disk_guid),
            partition_entry_lba: raw.partition_entry_lba.get(),
            number_of_partition_entries: raw.number_of_partition_entries.get(),
            size_of_partition_entry: raw.size_of_partition_entry.get(),
            partition_entry_array_crc32: raw.partition_entry_array_crc32.get(),
        })
    }

    /// Serialize to the 92-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf.copy_from_slice(self.to_raw().as_bytes());
        buf
    }

    /// Parse the 92-byte on-disk form. Only the signature is checked.
    pub fn from_bytes(data: &[u8; HEADER_SIZE]) -> Result<Self> {
        let raw = RawHeader::read_from_bytes(data)
            .map_err(|_| Error::DataRead("header", io::ErrorKind::UnexpectedEof.into()))?;

        Self::from_raw(&raw)
    }

    /// CRC32 of the serialized header with [`Self::header_crc32`] set to 0.
    pub fn calc_header_crc32(&self) -> u32 {
        let mut copy = *self;
        copy.header_crc32 = 0;

        crc32fast::hash(&copy.to_bytes())
    }

    /// Fill in both CRC fields for the given serialized entry array.
    pub fn update_checksums(&mut self, entry_array: &[u8]) {
        self.partition_entry_array_crc32 = crc32fast::hash(entry_array);
        self.header_crc32 = self.calc_header_crc32();
    }

    /// Check both CRC fields against the header and the given serialized
    /// entry array.
    pub fn verify(&self, entry_array: &[u8]) -> Result<()> {
        let actual = self.calc_header_crc32();
        if actual != self.header_crc32 {
            return Err(Error::HeaderCrcMismatch {
                expected: self.header_crc32,
                actual,
            });
        }

        let actual = crc32fast::hash(entry_array);
        if actual != self.partition_entry_array_crc32 {
            return Err(Error::EntryArrayCrcMismatch {
                expected: self.partition_entry_array_crc32,
                actual,
            });
        }

        Ok(())
    }
}

impl<R: Read> FromReader<R> for GptHeader {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let data = reader
            .read_array_exact::<HEADER_SIZE>()
            .map_err(|e| Error::DataRead("header", e))?;

        Self::from_bytes(&data)
    }
}

impl<W: Write> ToWriter<W> for GptHeader {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer
            .write_all(&self.to_bytes())
            .map_err(|e| Error::DataWrite("header", e))
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EntryAttributes: u64 {
        const REQUIRED = 1 << 0;
        const NO_BLOCK_IO_PROTOCOL = 1 << 1;
        const LEGACY_BIOS_BOOTABLE = 1 << 2;

        const _ = !0;
    }
}

/// A partition entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GptPartitionEntry {
    pub partition_type_guid: Uuid,
    pub unique_partition_guid: Uuid,
    pub starting_lba: u64,
    /// Inclusive.
    pub ending_lba: u64,
    pub attributes: EntryAttributes,
    pub partition_name: String,
}

impl GptPartitionEntry {
    /// Whether this entry is an unused slot.
    pub fn is_empty(&self) -> bool {
        self.partition_type_guid.is_nil()
    }

    fn to_raw(&self) -> Result<RawEntry> {
        if self.partition_name.contains('\0') {
            return Err(Error::NameContainsNul(self.partition_name.clone()));
        }

        let mut name = [little_endian::U16::new(0); NAME_MAX_UNITS];
        let mut units = self.partition_name.encode_utf16();

        for (slot, unit) in name.iter_mut().zip(&mut units) {
            *slot = unit.into();
        }
        if units.next().is_some() {
            return Err(Error::NameTooLong(self.partition_name.clone()));
        }

        Ok(RawEntry {
            partition_type_guid: self.partition_type_guid.to_bytes_le(),
            unique_partition_guid: self.unique_partition_guid.to_bytes_le(),
            starting_lba: self.starting_lba.into(),
            ending_lba: self.ending_lba.into(),
            attributes: self.attributes.bits().into(),
            partition_name: name,
        })
    }

    fn from_raw(raw: &RawEntry) -> Result<Self> {
        let units = raw
            .partition_name
            .iter()
            .map(|c| c.get())
            .take_while(|c| *c != 0)
            .collect::<Vec<_>>();
        let partition_name = String::from_utf16(&units).map_err(|_| Error::NameInvalid)?;

        Ok(Self {
            partition_type_guid: Uuid::from_bytes_le(raw.partition_type_guid),
            unique_partition_guid: Uuid::from_bytes_le(raw.unique_partition_guid),
            starting_lba: raw.starting_lba.get(),
            ending_lba: raw.ending_lba.get(),
            attributes: EntryAttributes::from_bits_retain(raw.attributes.get()),
            partition_name,
        })
    }

    /// Serialize to the 128-byte on-disk form.
    pub fn to_bytes(&self) -> Result<[u8; ENTRY_SIZE]> {
        let mut buf = [0u8; ENTRY_SIZE];
        buf.copy_from_slice(self.to_raw()?.as_bytes());
        Ok(buf)
    }

    /// Parse the 128-byte on-disk form.
    pub fn from_bytes(data: &[u8; ENTRY_SIZE]) -> Result<Self> {
        let raw = RawEntry::read_from_bytes(data)
            .map_err(|_| Error::DataRead("entry", io::ErrorKind::UnexpectedEof.into()))?;

        Self::from_raw(&raw)
    }
}

impl<R: Read> FromReader<R> for GptPartitionEntry {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let data = reader
            .read_array_exact::<ENTRY_SIZE>()
            .map_err(|e| Error::DataRead("entry", e))?;

        Self::from_bytes(&data)
    }
}

impl<W: Write> ToWriter<W> for GptPartitionEntry {
    type Error = Error;

    fn to_writer(&self, mut writer: W) -> Result<()> {
        writer
            .write_all(&self.to_bytes()?)
            .map_err(|e| Error::DataWrite("entry", e))
    }
}

/// Serialize entries into a full 128-slot array. Unused slots are zero.
pub fn encode_entry_array(entries: &[GptPartitionEntry]) -> Result<Vec<u8>> {
    if entries.len() > NUM_ENTRIES {
        return Err(Error::TooManyEntries(entries.len()));
    }

    let mut buf = Vec::with_capacity(ENTRY_ARRAY_SIZE);

    for entry in entries {
        entry.to_writer(&mut buf)?;
    }

    buf.resize(ENTRY_ARRAY_SIZE, 0);

    Ok(buf)
}

/// Parse a full 128-slot array, including unused slots.
pub fn decode_entry_array(data: &[u8]) -> Result<Vec<GptPartitionEntry>> {
    if data.len() != ENTRY_ARRAY_SIZE {
        return Err(Error::InvalidEntryArraySize(NumBytes(data.len())));
    }

    data.chunks_exact(ENTRY_SIZE)
        .map(GptPartitionEntry::from_reader)
        .collect()
}

/// CRC32 of a serialized entry array.
pub fn entry_array_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A complete GPT: the header plus the used partition entries, in slot order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GptImage {
    pub header: GptHeader,
    pub entries: Vec<GptPartitionEntry>,
}

impl GptImage {
    /// Recompute the header's CRC fields from the current entries.
    pub fn update_checksums(&mut self) -> Result<()> {
        let array = encode_entry_array(&self.entries)?;
        self.header.update_checksums(&array);

        Ok(())
    }

    /// Serialize the image placed at the start of the disk: protective MBR,
    /// header padded to a sector, and the entry array.
    pub fn main_image(&self) -> Result<Vec<u8>> {
        let array = encode_entry_array(&self.entries)?;
        let mut writer = CountingWriter::new(Vec::with_capacity(MAIN_IMAGE_SIZE));

        writer
            .write_all(&protective_mbr())
            .map_err(|e| Error::DataWrite("protective_mbr", e))?;
        self.header.to_writer(&mut writer)?;
        padding::write_zeros(&mut writer, SECTOR_SIZE)
            .map_err(|e| Error::DataWrite("header_padding", e))?;
        writer
            .write_all(&array)
            .map_err(|e| Error::DataWrite("entry_array", e))?;

        let (buf, _) = writer.finish();
        debug_assert_eq!(buf.len(), MAIN_IMAGE_SIZE);

        Ok(buf)
    }

    /// Serialize the image placed at the end of the disk: the entry array
    /// followed by the header padded to a sector.
    pub fn backup_image(&self) -> Result<Vec<u8>> {
        let array = encode_entry_array(&self.entries)?;
        let mut writer = CountingWriter::new(Vec::with_capacity(BACKUP_IMAGE_SIZE));

        writer
            .write_all(&array)
            .map_err(|e| Error::DataWrite("entry_array", e))?;
        self.header.to_writer(&mut writer)?;
        padding::write_zeros(&mut writer, SECTOR_SIZE)
            .map_err(|e| Error::DataWrite("header_padding", e))?;

        let (buf, _) = writer.finish();
        debug_assert_eq!(buf.len(), BACKUP_IMAGE_SIZE);

        Ok(buf)
    }
}

impl<R: Read> FromReader<R> for GptImage {
    type Error = Error;

    /// Parse and verify a main image. Unused entry slots are dropped.
    fn from_reader(mut reader: R) -> Result<Self> {
        let mbr = reader
            .read_array_exact::<{ SECTOR_SIZE as usize }>()
            .map_err(|e| Error::DataRead("protective_mbr", e))?;
        let mbr = RawProtectiveMbr::read_from_bytes(&mbr)
            .map_err(|_| Error::DataRead("protective_mbr", io::ErrorKind::UnexpectedEof.into()))?;
        mbr.validate()?;

        let block = reader
            .read_array_exact::<{ SECTOR_SIZE as usize }>()
            .map_err(|e| Error::DataRead("header", e))?;
        let header = GptHeader::from_reader(block.as_slice())?;

        if header.header_size != HEADER_SIZE as u32 {
            return Err(Error::InvalidHeaderSize(header.header_size));
        }
        if header.number_of_partition_entries != NUM_ENTRIES as u32
            || header.size_of_partition_entry != ENTRY_SIZE as u32
        {
            return Err(Error::UnsupportedEntryArray {
                count: header.number_of_partition_entries,
                entry_size: header.size_of_partition_entry,
            });
        }
        if header.partition_entry_lba != PARTITION_ENTRY_LBA {
            return Err(Error::UnexpectedEntryLba(header.partition_entry_lba));
        }

        let mut array = vec![0u8; ENTRY_ARRAY_SIZE];
        reader
            .read_exact(&mut array)
            .map_err(|e| Error::DataRead("entry_array", e))?;

        header.verify(&array)?;

        let entries = decode_entry_array(&array)?
            .into_iter()
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self { header, entries })
    }
}
