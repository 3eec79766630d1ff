// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use rand::Rng;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    format::gpt::{self, EntryAttributes, GptHeader, GptImage, GptPartitionEntry, NUM_ENTRIES},
    partition::{
        model::{Medium, Partition},
        table::PartitionTable,
    },
};

/// Name of the eMMC partition that reserves space for the primary GPT. It
/// does not get an entry of its own.
pub const GPT_PARTITION_NAME: &str = "gpt";

/// Output file name of the main image.
pub const MAIN_IMAGE_NAME: &str = "gpt.img";

/// Output file name of the backup image.
pub const BACKUP_IMAGE_NAME: &str = "gpt_back.img";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Too many eMMC partitions for the GPT: {0} > {NUM_ENTRIES}")]
    TooManyPartitions(usize),
    #[error("Partition {name:?}: Invalid GPT entry")]
    InvalidEntry {
        name: String,
        #[source]
        source: gpt::Error,
    },
    #[error("Backup GPT after LBA {0} is out of range")]
    LbaOverflow(u64),
    #[error("Failed to assemble GPT")]
    Gpt(#[from] gpt::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Generate a version 4 GUID from `rng`.
pub fn random_guid(rng: &mut impl Rng) -> Uuid {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);

    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

fn entry_for(partition: &Partition, block_size: u64, rng: &mut impl Rng) -> GptPartitionEntry {
    let partition_type_guid = partition
        .part_type_guid
        .unwrap_or_else(|| random_guid(rng));

    GptPartitionEntry {
        partition_type_guid,
        unique_partition_guid: random_guid(rng),
        starting_lba: partition.start_lba(block_size),
        ending_lba: partition.end_lba(block_size),
        attributes: EntryAttributes::empty(),
        partition_name: partition.name.clone(),
    }
}

/// Build the GPT for the eMMC layout of `table`. Partitions without a type
/// GUID get a random one. All other GUIDs are always random.
///
/// The usable range ends at the last sector of the highest partition, with
/// the backup structures placed directly after it.
pub fn from_table(
    table: &PartitionTable,
    block_size: u64,
    rng: &mut impl Rng,
) -> Result<GptImage> {
    let partitions = table
        .partitions(Medium::Emmc)
        .iter()
        .filter(|p| p.name != GPT_PARTITION_NAME)
        .collect::<Vec<_>>();

    if partitions.len() > NUM_ENTRIES {
        return Err(Error::TooManyPartitions(partitions.len()));
    }

    let mut entries = Vec::with_capacity(partitions.len());
    let mut max_ending_lba = 0;

    for partition in partitions {
        let entry = entry_for(partition, block_size, rng);

        // Catch bad names here so the error can point at the partition.
        entry.to_bytes().map_err(|e| Error::InvalidEntry {
            name: partition.name.clone(),
            source: e,
        })?;

        debug!(
            "GPT entry {:?}: LBA {}..={}",
            entry.partition_name, entry.starting_lba, entry.ending_lba,
        );

        max_ending_lba = max_ending_lba.max(entry.ending_lba);
        entries.push(entry);
    }

    let mut header = GptHeader::new(random_guid(rng));
    header.alternate_lba = max_ending_lba
        .checked_add(gpt::BACKUP_SECTORS)
        .ok_or(Error::LbaOverflow(max_ending_lba))?;
    header.last_usable_lba = header.alternate_lba - gpt::BACKUP_SECTORS;

    let mut image = GptImage { header, entries };
    image.update_checksums()?;

    Ok(image)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn random_guids_are_v4() {
        let mut rng = StdRng::seed_from_u64(0);
        let a = random_guid(&mut rng);
        let b = random_guid(&mut rng);

        assert_eq!(a.get_version_num(), 4);
        assert_ne!(a, b);

        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(random_guid(&mut rng), a);
    }
}
