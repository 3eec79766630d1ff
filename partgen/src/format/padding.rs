// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Seek, Write};

use num_traits::PrimInt;

use crate::stream::WriteZerosExt;

/// Calculate the amount of padding that needs to be added to align the
/// specified offset to a block boundary.
pub fn calc<N: PrimInt>(offset: N, block_size: N) -> N {
    let r = offset % block_size;
    if r == N::zero() {
        N::zero()
    } else {
        block_size - r
    }
}

/// Write zeros until the next multiple of the block size. [`Seek`] is only
/// used for querying the file position.
pub fn write_zeros(mut writer: impl Write + Seek, block_size: u64) -> io::Result<u64> {
    let pos = writer.stream_position()?;
    let padding = calc(pos, block_size);

    writer.write_zeros_exact(padding)?;

    Ok(padding)
}
