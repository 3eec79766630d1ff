// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Resolution of declarative partition specs into concrete per-medium
//! layouts.

pub mod model;
pub mod spec;
pub mod table;
pub mod unit;
