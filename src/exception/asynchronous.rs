// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! Asynchronous exception handling: the interrupt mask and the pending-work queue.

use crate::{
    cpu::{registers::PIL_MASK_ALL, Cpu},
    info,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Capacity of the pending-work queue.
pub const PENDING_QUEUE_DEPTH: usize = 16;

/// One deferred critical-section-exit action.
///
/// Which items exist, and what they mean, is the external scheduler's business; this layer only
/// stores and replays them in order.
#[derive(Copy, Clone)]
pub struct WorkItem {
    /// The action.
    pub run: fn(u32),

    /// Opaque argument handed back to the action.
    pub token: u32,
}

/// The pending-work queue.
///
/// Process-wide state shared across trap levels. Populated while interrupts are masked inside
/// critical sections; drained exclusively at the trampoline's designated drain point, with
/// interrupts deliberately re-enabled. FIFO order is preserved, never reordered by this layer.
pub struct PendingQueue {
    items: [Option<WorkItem>; PENDING_QUEUE_DEPTH],
    head: usize,
    len: usize,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Returns whether IRQs are masked on the modeled core.
pub fn is_local_irq_masked(cpu: &Cpu) -> bool {
    cpu.psr().pil() == PIL_MASK_ALL
}

/// Mask IRQs on the modeled core.
#[inline(always)]
pub fn local_irq_mask(cpu: &mut Cpu) {
    cpu.psr_mut().set_pil(PIL_MASK_ALL);
}

/// Unmask IRQs on the modeled core.
#[inline(always)]
pub fn local_irq_unmask(cpu: &mut Cpu) {
    cpu.psr_mut().set_pil(0);
}

/// Mask IRQs and return the previously set interrupt level.
#[inline(always)]
pub fn local_irq_mask_save(cpu: &mut Cpu) -> u32 {
    let saved = cpu.psr().pil();
    local_irq_mask(cpu);

    saved
}

/// Restore the interrupt level using the callee's argument.
///
/// # Invariant
///
/// - No sanity checks on the input.
#[inline(always)]
pub fn local_irq_restore(cpu: &mut Cpu, saved: u32) {
    cpu.psr_mut().set_pil(saved);
}

/// Executes the provided closure while IRQs are masked on the modeled core.
///
/// The mask state is restored to its previous value before returning.
#[inline(always)]
pub fn exec_with_irq_masked<T>(cpu: &mut Cpu, f: impl FnOnce(&mut Cpu) -> T) -> T {
    let saved = local_irq_mask_save(cpu);
    let ret = f(cpu);
    local_irq_restore(cpu, saved);

    ret
}

/// Print the exception handling status.
#[rustfmt::skip]
pub fn print_state(cpu: &Cpu) {
    let to_mask_str = |x| -> _ {
        if x { "Masked" } else { "Unmasked" }
    };

    info!("      IRQ:   {}", to_mask_str(is_local_irq_masked(cpu)));
    info!("      Traps: {}", if cpu.psr().traps_enabled() { "Enabled" } else { "Disabled" });
}

impl PendingQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            items: [None; PENDING_QUEUE_DEPTH],
            head: 0,
            len: 0,
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append an item.
    ///
    /// Called from inside critical sections. Running out of slots means deferred work is being
    /// produced faster than any drain point can ever run, which is unrecoverable.
    pub fn defer(&mut self, item: WorkItem) {
        assert!(self.len < PENDING_QUEUE_DEPTH, "pending-work queue overflow");

        let tail = (self.head + self.len) % PENDING_QUEUE_DEPTH;
        self.items[tail] = Some(item);
        self.len += 1;
    }

    /// Replay and remove all queued items, oldest first.
    ///
    /// This is the single designated drain point. Interrupts must have been deliberately
    /// re-enabled for the (bounded) duration of the drain.
    pub fn drain(&mut self, cpu: &Cpu) {
        assert!(
            !is_local_irq_masked(cpu),
            "pending-work drain with IRQs masked"
        );

        while let Some(item) = self.pop() {
            (item.run)(item.token);
        }
    }

    fn pop(&mut self) -> Option<WorkItem> {
        if self.len == 0 {
            return None;
        }

        let item = self.items[self.head].take();
        self.head = (self.head + 1) % PENDING_QUEUE_DEPTH;
        self.len -= 1;

        item
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
