// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Conversion of a resolved [`crate::partition::table::PartitionTable`] into
//! binary boot artifacts.

pub mod gpt;
pub mod mbr;
