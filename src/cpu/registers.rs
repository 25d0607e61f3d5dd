// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! Processor register definitions of the modeled windowed-register CPU.

use core::fmt;
use tock_registers::{
    interfaces::{ReadWriteable, Readable, Writeable},
    register_bitfields,
    registers::InMemoryRegister,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

register_bitfields! {u32,
    /// Processor status register.
    pub PSR [
        /// Index of the current register window.
        CWP OFFSET(0) NUMBITS(3) [],

        /// Trap enable. Cleared by hardware while a trap is being taken, so that a nested trap of
        /// the same class cannot observe a half-mutated window state.
        ET OFFSET(5) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        /// Privilege state at the time of the most recent trap.
        PS OFFSET(6) NUMBITS(1) [
            User = 0,
            Kernel = 1
        ],

        /// Current privilege state.
        S OFFSET(7) NUMBITS(1) [
            User = 0,
            Kernel = 1
        ],

        /// Processor interrupt level. Interrupt requests at this level or below stay pending.
        PIL OFFSET(8) NUMBITS(4) []
    ]
}

/// Wrapper struct for a memory copy of the PSR.
#[repr(transparent)]
pub struct Psr(InMemoryRegister<u32, PSR::Register>);

/// The PIL value that masks every maskable interrupt.
pub const PIL_MASK_ALL: u32 = 0b1111;

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl Psr {
    /// The register value at reset: kernel mode, traps enabled, window 0, nothing masked.
    pub fn new_boot() -> Self {
        let reg = InMemoryRegister::new(0);
        reg.write(PSR::S::Kernel + PSR::PS::Kernel + PSR::ET::Enabled + PSR::CWP.val(0));

        Self(reg)
    }

    /// Raw register value.
    pub fn raw(&self) -> u32 {
        self.0.get()
    }

    /// Overwrite the raw register value.
    pub fn set_raw(&mut self, value: u32) {
        self.0.set(value);
    }

    /// The current window index field.
    pub fn cwp(&self) -> usize {
        self.0.read(PSR::CWP) as usize
    }

    /// Set the current window index field.
    pub fn set_cwp(&mut self, cwp: usize) {
        self.0.modify(PSR::CWP.val(cwp as u32));
    }

    /// Is the CPU currently executing in kernel mode?
    pub fn is_kernel_mode(&self) -> bool {
        self.0.matches_all(PSR::S::Kernel)
    }

    /// Was the CPU in kernel mode when the most recent trap was taken?
    pub fn trap_origin_is_kernel(&self) -> bool {
        self.0.matches_all(PSR::PS::Kernel)
    }

    /// Are traps enabled?
    pub fn traps_enabled(&self) -> bool {
        self.0.matches_all(PSR::ET::Enabled)
    }

    /// The hardware part of taking a trap: remember the privilege, enter kernel mode, keep
    /// same-class traps out.
    pub fn enter_trap(&mut self) {
        let origin = self.0.read(PSR::S);

        self.0.modify(PSR::PS.val(origin) + PSR::S::Kernel + PSR::ET::Disabled);
    }

    /// The hardware part of returning from a trap: privilege falls back to the saved state and
    /// traps come back on.
    pub fn return_from_trap(&mut self) {
        let origin = self.0.read(PSR::PS);

        self.0.modify(PSR::S.val(origin) + PSR::ET::Enabled);
    }

    /// Drop to user mode. The final step of handing the CPU to a user context.
    pub fn drop_to_user(&mut self) {
        self.0.modify(PSR::S::User);
    }

    /// The processor interrupt level field.
    pub fn pil(&self) -> u32 {
        self.0.read(PSR::PIL)
    }

    /// Set the processor interrupt level field.
    pub fn set_pil(&mut self, level: u32) {
        self.0.modify(PSR::PIL.val(level & PIL_MASK_ALL));
    }
}

/// Human readable PSR.
#[rustfmt::skip]
impl fmt::Display for Psr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "PSR: {:#010x}", self.0.get())?;

        let to_mode_str = |x| -> _ {
            if x { "Kernel" } else { "User" }
        };

        writeln!(f, "      Current privilege (S) : {}", to_mode_str(self.is_kernel_mode()))?;
        writeln!(f, "      Trap-time privilege (PS): {}", to_mode_str(self.trap_origin_is_kernel()))?;
        writeln!(f, "      Traps enabled (ET): {}", self.traps_enabled())?;
        writeln!(f, "      Interrupt level (PIL): {}", self.pil())?;
        write!(f, "      Current window (CWP): {}", self.cwp())
    }
}
