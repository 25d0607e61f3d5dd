// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! The interrupt entry/exit trampoline and the deferred context-switch hand-off.
//!
//! On interrupt entry the trampoline captures a minimal register context on the active stack and
//! hands control to the generic dispatcher. Entry may be re-entered by a higher-priority
//! interrupt at any time; every nesting level gets its own frame at its own stack location, so no
//! level can disturb another.
//!
//! The actual context switch never happens inside an interrupt handler. It is pushed out to the
//! lowest-priority exception: the trampoline latches a switch request, briefly opens interrupts
//! to run work that was deferred while a critical section was held, and then lets the
//! lowest-priority exception perform the switch once nothing more urgent is pending. If that
//! exception fails to fire, the machine must halt; continuing would run with inconsistent CPU
//! state.

use super::{interface::TrapDispatcher, Resume, TrapCause};
use crate::{
    cpu::Cpu,
    exception::asynchronous::{self, PendingQueue},
    memory::{Address, KernelSpace, KernelStack},
    synchronization::{interface::Mutex, NullLock},
};
use core::fmt;

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

/// Stack alignment mandated for interrupt frames.
const STACK_ALIGN: usize = 8;

struct TrampolineInner {
    depth: usize,
    max_depth: usize,
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Trampoline interfaces.
pub mod interface {
    use crate::{cpu::Cpu, memory::KernelStack};

    /// The lowest-priority context-switch exception (external collaborator).
    pub trait ContextSwitch {
        /// Called at the point where the modeled hardware takes pending exceptions.
        ///
        /// A correct implementation consumes the latched switch request on `cpu` and performs
        /// the switch (or returns through [`super::Trampoline::switch_return`] when no switch
        /// turns out to be needed). Leaving the request latched is an unrecoverable invariant
        /// violation.
        fn on_switch_request(&mut self, cpu: &mut Cpu, stack: &mut KernelStack);
    }
}

/// The interrupt context record built on the active stack at interrupt entry.
///
/// Exclusively owned by the entry/exit sequence of one nesting level; destroyed when control
/// returns past the exit path.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct InterruptFrame {
    /// Caller-saved scratch registers.
    pub scratch: [u32; 4],

    /// Intra-procedure scratch register.
    pub ip: u32,

    /// Link register of the interrupted frame.
    pub lr: u32,

    /// Program counter of the interrupted instruction stream.
    pub pc: u32,

    /// Saved processor status.
    pub status: u32,
}

/// A freshly constructed initial context for a new execution context, supplied by the external
/// scheduler.
#[derive(Copy, Clone, Debug)]
pub struct InitialContext {
    /// Entry point of the new context.
    pub entry: u32,

    /// Argument handed to the entry point.
    pub arg: u32,

    /// Initial stack pointer.
    pub sp: Address<KernelSpace>,

    /// Initial processor status.
    pub status: u32,
}

/// The unrecoverable failure of the deferred-dispatch path.
///
/// There is deliberately no way to continue from this; the only consumer is [`halt`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Unrecoverable {
    /// The latched low-priority context-switch exception was not taken.
    SwitchRequestIgnored,
}

/// The interrupt trampoline.
///
/// Takes `&self` throughout: entry is architecturally re-entrant, and a nested level runs while
/// the outer level's call is still on the (host) stack.
pub struct Trampoline {
    inner: NullLock<TrampolineInner>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl InterruptFrame {
    /// Number of words an interrupt frame occupies on the active stack.
    pub const WORDS: usize = 8;

    /// Byte size of an interrupt frame.
    pub const BYTES: usize = Self::WORDS * crate::memory::WORD_SIZE;

    /// Capture the minimal context from the CPU.
    pub fn capture(cpu: &Cpu) -> Self {
        let globals = cpu.globals();

        Self {
            scratch: [globals[0], globals[1], globals[2], globals[3]],
            ip: globals[4],
            lr: cpu.current_window().arg[7],
            pc: cpu.pc(),
            status: cpu.psr().raw(),
        }
    }

    /// Write the frame back into the CPU registers. The pc is not restored here; the resume
    /// target decides where execution continues.
    pub fn restore(&self, cpu: &mut Cpu) {
        let globals = cpu.globals_mut();
        globals[0] = self.scratch[0];
        globals[1] = self.scratch[1];
        globals[2] = self.scratch[2];
        globals[3] = self.scratch[3];
        globals[4] = self.ip;

        cpu.current_window_mut().arg[7] = self.lr;
        cpu.psr_mut().set_raw(self.status);
    }

    /// Write the frame to the active stack at `addr`.
    pub fn store(&self, stack: &mut KernelStack, addr: Address<KernelSpace>) {
        let mut words = [0; Self::WORDS];

        words[..4].copy_from_slice(&self.scratch);
        words[4] = self.ip;
        words[5] = self.lr;
        words[6] = self.pc;
        words[7] = self.status;

        stack.write_words(addr, &words);
    }

    /// Read a frame back from the active stack at `addr`.
    pub fn load(stack: &KernelStack, addr: Address<KernelSpace>) -> Self {
        let mut words = [0; Self::WORDS];
        stack.read_words(addr, &mut words);

        Self {
            scratch: [words[0], words[1], words[2], words[3]],
            ip: words[4],
            lr: words[5],
            pc: words[6],
            status: words[7],
        }
    }
}

/// Human readable print of the interrupt frame.
impl fmt::Display for InterruptFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Saved status: {:#010x}", self.status)?;
        writeln!(
            f,
            "PC: {:#010x}   LR: {:#010x}   IP: {:#010x}",
            self.pc, self.lr, self.ip
        )?;
        write!(
            f,
            "Scratch: {:#010x} {:#010x} {:#010x} {:#010x}",
            self.scratch[0], self.scratch[1], self.scratch[2], self.scratch[3]
        )
    }
}

impl fmt::Display for Unrecoverable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unrecoverable::SwitchRequestIgnored => {
                write!(f, "low-priority context-switch exception failed to fire")
            }
        }
    }
}

impl Trampoline {
    /// Create an instance.
    pub const fn new() -> Self {
        Self {
            inner: NullLock::new(TrampolineInner {
                depth: 0,
                max_depth: 0,
            }),
        }
    }

    /// Current interrupt nesting depth.
    pub fn depth(&self) -> usize {
        self.inner.lock(|inner| inner.depth)
    }

    /// High-water mark of the nesting depth.
    pub fn max_depth(&self) -> usize {
        self.inner.lock(|inner| inner.max_depth)
    }

    /// Interrupt entry.
    ///
    /// Captures the minimal context on the active stack and hands the frame to the generic
    /// dispatcher. Re-entry by a higher-priority interrupt is permitted at any point of the
    /// dispatch; the nested level pushes its own frame below this one and leaves this one
    /// untouched.
    ///
    /// After the dispatcher returns: interrupts are disabled, the stack pointer saved at entry is
    /// restored, and execution branches to the target the dispatcher selected. The final status
    /// restore re-establishes the interrupted mask state.
    pub fn enter(
        &self,
        cpu: &mut Cpu,
        stack: &mut KernelStack,
        dispatcher: &mut dyn TrapDispatcher,
        cause: TrapCause,
    ) -> Resume {
        let saved_sp = cpu.sp();
        let frame_addr = (saved_sp - InterruptFrame::BYTES).align_down(STACK_ALIGN);

        InterruptFrame::capture(cpu).store(stack, frame_addr);
        cpu.set_sp(frame_addr);

        self.inner.lock(|inner| {
            inner.depth += 1;
            if inner.depth > inner.max_depth {
                inner.max_depth = inner.depth;
            }
        });

        let resume = dispatcher.dispatch_interrupt(cpu, stack, frame_addr, cause);

        asynchronous::local_irq_mask(cpu);

        let frame = InterruptFrame::load(stack, frame_addr);
        frame.restore(cpu);
        cpu.set_sp(saved_sp);
        self.inner.lock(|inner| inner.depth -= 1);

        match resume {
            Resume::Interrupted => cpu.set_pc(frame.pc),
            Resume::Redirect { pc } => cpu.set_pc(pc),
        }

        resume
    }

    /// Return through the lowest-priority exception when no context switch is needed.
    ///
    /// The exception does not own the scratch part of the frame on its stack; it skips past it
    /// and returns directly to the instruction preceding entry.
    pub fn switch_return(&self, cpu: &mut Cpu, stack: &KernelStack) {
        let frame_addr = cpu.sp();
        let frame = InterruptFrame::load(stack, frame_addr);

        cpu.set_sp(frame_addr + InterruptFrame::BYTES);
        cpu.psr_mut().set_raw(frame.status);
        cpu.set_pc(frame.pc);
    }

    /// Deferred dispatch on entry of a freshly constructed context.
    ///
    /// Reloads part of the initial context's registers, pushes them onto the active stack,
    /// re-enables interrupts just long enough to drain the pending-work queue, latches the
    /// lowest-priority exception that performs the actual switch, and opens interrupts for it to
    /// fire.
    ///
    /// On real hardware this sequence does not return: either the switch exception preempts, or
    /// the core spins forever in a state that is deliberately fatal. The model surfaces the two
    /// outcomes as `Ok` (the hand-off happened) and [`Unrecoverable`] (the caller must [`halt`]).
    pub fn launch(
        &self,
        cpu: &mut Cpu,
        stack: &mut KernelStack,
        ctx: &InitialContext,
        pending: &NullLock<PendingQueue>,
        switcher: &mut dyn interface::ContextSwitch,
    ) -> Result<(), Unrecoverable> {
        cpu.set_sp(ctx.sp);
        cpu.globals_mut()[0] = ctx.arg;
        cpu.psr_mut().set_raw(ctx.status);

        let frame = InterruptFrame {
            scratch: [ctx.arg, 0, 0, 0],
            ip: 0,
            lr: 0,
            pc: ctx.entry,
            status: ctx.status,
        };
        let frame_addr = (ctx.sp - InterruptFrame::BYTES).align_down(STACK_ALIGN);
        frame.store(stack, frame_addr);
        cpu.set_sp(frame_addr);

        // The one bounded window in which the pending-work queue may be touched.
        asynchronous::local_irq_unmask(cpu);
        pending.lock(|queue| queue.drain(&*cpu));
        asynchronous::local_irq_mask(cpu);

        cpu.raise_switch_request();
        asynchronous::local_irq_unmask(cpu);
        switcher.on_switch_request(cpu, stack);

        if cpu.switch_request_pending() {
            return Err(Unrecoverable::SwitchRequestIgnored);
        }

        Ok(())
    }
}

impl Default for Trampoline {
    fn default() -> Self {
        Self::new()
    }
}

/// Park the machine after an unrecoverable invariant violation.
///
/// On hardware this spins with interrupts masked. The model makes the violation loud instead of
/// silently continuing with inconsistent CPU state.
pub fn halt(error: Unrecoverable) -> ! {
    panic!("unrecoverable: {}", error);
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
