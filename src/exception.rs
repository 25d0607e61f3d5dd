// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! Synchronous and asynchronous exception handling.
//!
//! The two hard subsystems of the trap-entry layer live below this module: the window spill/fill
//! manager in [`window`] and the interrupt trampoline in [`trampoline`]. Both capture minimal CPU
//! state, call out to the registered generic dispatcher, and resume safely.

pub mod asynchronous;
pub mod trampoline;
pub mod window;

use crate::{
    cpu::{Cpu, NUM_GLOBAL_REGS, WindowIndex},
    memory::{Address, Fault, KernelSpace, KernelStack},
};
use core::fmt;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Kernel privilege levels.
#[allow(missing_docs)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PrivilegeLevel {
    User,
    Kernel,
}

/// What caused a trap. Handed through to the dispatcher untouched.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TrapCause {
    /// An external interrupt request at the given level.
    Interrupt(u8),

    /// An explicit software trap.
    Software(u8),

    /// A memory access fault.
    MemoryFault,
}

/// The resume target selected by the dispatcher.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Resume {
    /// Return to the interrupted instruction stream.
    Interrupted,

    /// Redirect execution to a different target.
    Redirect { pc: u32 },
}

/// The trap frame as it is stored on the kernel stack for the duration of one trap.
///
/// Owned exclusively by the trap handling sequence; released when the trap returns.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TrapFrame {
    /// Saved processor status.
    pub psr: u32,

    /// Program counter at the time the trap was taken.
    pub pc: u32,

    /// Next program counter.
    pub npc: u32,

    /// Snapshot of the global registers.
    pub globals: [u32; NUM_GLOBAL_REGS],
}

/// Notification that a task must be terminated abnormally.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TerminationNotice {
    /// The fault that triggered the termination.
    pub fault: Fault,

    /// The window whose spill was lost.
    pub window: WindowIndex,
}

/// Exception handling interfaces.
pub mod interface {
    use super::{Resume, TrapCause};
    use crate::{
        cpu::Cpu,
        memory::{Address, KernelSpace, KernelStack},
    };

    /// The generic trap dispatcher (external collaborator).
    ///
    /// Receives the address of the captured frame on the kernel stack and the trap cause, and
    /// selects the resume target. It may mutate the frame through the stack; the entry code
    /// restores from whatever the frame holds when the dispatcher returns.
    pub trait TrapDispatcher {
        /// Called with the trap frame built by the synchronous trap-entry path.
        fn dispatch_trap(
            &mut self,
            cpu: &mut Cpu,
            stack: &mut KernelStack,
            frame: Address<KernelSpace>,
            cause: TrapCause,
        ) -> Resume;

        /// Called with the context captured at interrupt entry.
        fn dispatch_interrupt(
            &mut self,
            cpu: &mut Cpu,
            stack: &mut KernelStack,
            frame: Address<KernelSpace>,
            cause: TrapCause,
        ) -> Resume;
    }

    /// Process-management hook (external collaborator).
    ///
    /// Consumes the one-shot termination notification raised by the corruption path. Delivery
    /// semantics are the collaborator's concern.
    pub trait ProcessControl {
        /// Flag the interrupted task for abnormal termination.
        fn terminate(&mut self, notice: super::TerminationNotice);
    }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrivilegeLevel::User => write!(f, "User"),
            PrivilegeLevel::Kernel => write!(f, "Kernel"),
        }
    }
}

impl fmt::Display for TrapCause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrapCause::Interrupt(level) => write!(f, "interrupt level {}", level),
            TrapCause::Software(number) => write!(f, "software trap {}", number),
            TrapCause::MemoryFault => write!(f, "memory fault"),
        }
    }
}

/// The processing element's current privilege level.
pub fn current_privilege_level(cpu: &Cpu) -> (PrivilegeLevel, &'static str) {
    if cpu.psr().is_kernel_mode() {
        (PrivilegeLevel::Kernel, "Kernel")
    } else {
        (PrivilegeLevel::User, "User")
    }
}

impl TrapFrame {
    /// Number of words a trap frame occupies on the kernel stack. Includes padding up to the
    /// stack alignment the architecture mandates for frames.
    pub const WORDS: usize = 16;

    /// Byte size of a trap frame.
    pub const BYTES: usize = Self::WORDS * crate::memory::WORD_SIZE;

    /// Capture the frame contents from the CPU.
    pub fn capture(cpu: &Cpu) -> Self {
        Self {
            psr: cpu.psr().raw(),
            pc: cpu.pc(),
            npc: cpu.npc(),
            globals: *cpu.globals(),
        }
    }

    /// Write the frame to the kernel stack at `addr`.
    pub fn store(&self, stack: &mut KernelStack, addr: Address<KernelSpace>) {
        let mut words = [0; Self::WORDS];

        words[0] = self.psr;
        words[1] = self.pc;
        words[2] = self.npc;
        words[3..3 + NUM_GLOBAL_REGS].copy_from_slice(&self.globals);

        stack.write_words(addr, &words);
    }

    /// Read a frame back from the kernel stack at `addr`.
    pub fn load(stack: &KernelStack, addr: Address<KernelSpace>) -> Self {
        let mut words = [0; Self::WORDS];
        stack.read_words(addr, &mut words);

        let mut globals = [0; NUM_GLOBAL_REGS];
        globals.copy_from_slice(&words[3..3 + NUM_GLOBAL_REGS]);

        Self {
            psr: words[0],
            pc: words[1],
            npc: words[2],
            globals,
        }
    }
}

/// Human readable print of the trap frame.
impl fmt::Display for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Saved PSR: {:#010x}", self.psr)?;
        writeln!(f, "PC : {:#010x}", self.pc)?;
        writeln!(f, "NPC: {:#010x}", self.npc)?;
        writeln!(f, "Global registers:")?;

        #[rustfmt::skip]
        let alternating = |x| -> _ {
            if x % 2 == 0 { "   " } else { "\n" }
        };

        // Print two registers per line.
        for (i, reg) in self.globals.iter().enumerate() {
            write!(f, "      g{}: {: >#010x}{}", i, reg, alternating(i))?;
        }

        Ok(())
    }
}

impl fmt::Display for TerminationNotice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "terminate task: spill of {} failed: {}",
            self.window, self.fault
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
