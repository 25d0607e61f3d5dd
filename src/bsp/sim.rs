// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! Board support for the hosted simulation target.
//!
//! There is no device hardware behind this board. It pins down the memory map the trap-entry
//! layer needs: one kernel stack region and one user stack region, both backed by plain arrays
//! inside the respective stack types.

pub mod memory;

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Board identification.
pub fn board_name() -> &'static str {
    "WINDLASS-SIM"
}
