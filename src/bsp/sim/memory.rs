// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! The simulation board's memory map.

use crate::memory::{Address, KernelSpace, StackRegion, UserSpace};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// The board's memory map.
#[rustfmt::skip]
pub mod map {
    /// Base address of the kernel stack region.
    pub const KERNEL_STACK_START: usize = 0x4000_0000;

    /// Size of the kernel stack region in bytes.
    pub const KERNEL_STACK_SIZE:  usize = 16 * 1024;

    /// Base address of the (single, modeled) user task's stack region.
    pub const USER_STACK_START:   usize = 0x2000_0000;

    /// Size of the user stack region in bytes.
    pub const USER_STACK_SIZE:    usize = 16 * 1024;
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Return the kernel stack region.
pub fn kernel_stack_region() -> StackRegion<KernelSpace> {
    StackRegion::new(
        Address::new(map::KERNEL_STACK_START),
        map::KERNEL_STACK_SIZE,
    )
}

/// Return the user stack region.
pub fn user_stack_region() -> StackRegion<UserSpace> {
    StackRegion::new(Address::new(map::USER_STACK_START), map::USER_STACK_SIZE)
}
