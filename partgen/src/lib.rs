// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! partgen is primarily a build tool and not a library. The semver versioning
//! covers the CLI and the resolved table JSON only. All Rust APIs can change
//! at any time, even in patch releases.
//!
//! Algorithmic code never reads process state. The environment is read once
//! by the CLI and passed down explicitly.

pub mod cli;
pub mod format;
pub mod generate;
pub mod partition;
pub mod stream;
pub mod util;
