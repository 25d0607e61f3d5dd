// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! The register-window spill/fill manager.
//!
//! The hardware exposes a ring of [`crate::cpu::NUM_REG_WINDOWS`] register windows instead of a
//! flat register file. Allocation rotates the current-window pointer forward, release rotates it
//! back, and one ring slot is always marked invalid: its contents are dead, and an operation that
//! targets it traps into this module. The manager's whole purpose is to make window allocation
//! unconditionally succeed from the caller's perspective, by transparently vacating the oldest
//! live window into its backing store.
//!
//! Ownership of the slot to vacate decides where its contents go. Kernel windows spill to the
//! kernel stack, which is always mapped and trusted. Windows belonging to an interrupted user
//! task spill to that task's own stack, which is never trusted; a faulting user spill aborts
//! locally, costs the task its life, and leaves the CPU state consistent.

use super::{
    interface::{ProcessControl, TrapDispatcher},
    Resume, TerminationNotice, TrapCause, TrapFrame,
};
use crate::{
    cpu::{Cpu, WindowIndex},
    exception::asynchronous,
    memory::{Address, KernelSpace, KernelStack, UserSpace, UserStack},
    synchronization::{interface::Mutex, NullLock},
    warn,
};
use core::fmt;

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

/// Stack alignment mandated for trap frames.
const STACK_ALIGN: usize = 8;

/// Where a vacated window record must be written.
///
/// Resolved once at trap-classification time; carrying the backing-store borrow in the variant
/// makes spilling a kernel window to user memory (or vice versa) unrepresentable.
enum SpillTarget<'a> {
    /// The slot to vacate belongs to the kernel call chain.
    Kernel(&'a mut KernelStack),

    /// The slot to vacate belongs to the interrupted task's chain. `anchor` is the last resident
    /// user window, i.e. the slot that the secondary mask bit marks while the vacate is in
    /// flight.
    User {
        stack: &'a mut UserStack,
        anchor: WindowIndex,
    },
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Window manager interfaces.
pub mod interface {
    use crate::cpu::{WindowIndex, WindowRecord};

    /// The underflow fill path (external collaborator).
    ///
    /// Reloads the record that was spilled for `slot` when release rotates back into an invalid
    /// window.
    pub trait WindowFill {
        /// Produce the record to reinstall into `slot`.
        fn fill(&mut self, slot: WindowIndex) -> WindowRecord;
    }
}

/// The invalid-slot mask.
///
/// One bit per ring slot. Steady state: exactly one bit set. While a vacate is in flight: at most
/// two, the primary mark (slot being vacated) and the secondary mark (last resident user window).
/// The popcount never leaves 1..=2; every mutation is funneled through the three operations below
/// and checked.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct WindowMask {
    bits: u8,
}

/// Spill/fill bookkeeping, reported by [`WindowManager::stats`].
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct WindowStats {
    /// Records vacated into the kernel backing store.
    pub kernel_spills: usize,

    /// Records vacated into a user backing store.
    pub user_spills: usize,

    /// Records reloaded on underflow.
    pub fills: usize,

    /// Aborted user spills.
    pub corruptions: usize,
}

/// The window spill/fill manager.
///
/// Takes `&self` throughout: a dispatcher running under a trap may take further traps, so the
/// manager must be callable while an outer entry is still in flight.
pub struct WindowManager {
    stats: NullLock<WindowStats>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl WindowMask {
    /// Single-bit form with the invalid mark on `slot`.
    pub const fn single(slot: WindowIndex) -> Self {
        Self {
            bits: 1 << slot.as_usize(),
        }
    }

    /// Is `slot` marked invalid?
    pub fn contains(&self, slot: WindowIndex) -> bool {
        self.bits & (1 << slot.as_usize()) != 0
    }

    /// Number of marked slots.
    pub fn popcount(&self) -> u32 {
        self.bits.count_ones()
    }

    /// Is the mask in single-bit form?
    pub fn is_single(&self) -> bool {
        self.popcount() == 1
    }

    /// The invalid slot. Steady-state query; must not be asked mid-vacate.
    pub fn slot(&self) -> WindowIndex {
        assert!(self.is_single(), "invalid mask queried in double-bit form");

        WindowIndex::new(self.bits.trailing_zeros() as usize)
    }

    /// Enter the vacate-in-flight form: primary mark on the slot being vacated, secondary mark on
    /// the last resident user window.
    ///
    /// The caller runs with same-class traps masked, so no other trap can observe this
    /// intermediate state.
    pub fn begin_vacate(&mut self, primary: WindowIndex, secondary: WindowIndex) {
        self.bits = (1 << primary.as_usize()) | (1 << secondary.as_usize());

        self.check();
    }

    /// Settle back to single-bit form with the invalid mark on `slot`.
    pub fn settle(&mut self, slot: WindowIndex) {
        self.bits = 1 << slot.as_usize();

        self.check();
    }

    fn check(&self) {
        let popcount = self.popcount();
        assert!(
            popcount >= 1 && popcount <= 2,
            "window mask popcount invariant violated: {}",
            self
        );
    }
}

impl fmt::Display for WindowMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010b}", self.bits)
    }
}

impl WindowManager {
    /// Create an instance.
    pub const fn new() -> Self {
        Self {
            stats: NullLock::new(WindowStats {
                kernel_spills: 0,
                user_spills: 0,
                fills: 0,
                corruptions: 0,
            }),
        }
    }

    /// Return a copy of the spill/fill bookkeeping.
    pub fn stats(&self) -> WindowStats {
        self.stats.lock(|stats| *stats)
    }

    /// Generic trap entry (trigger 1).
    ///
    /// Models hardware trap delivery plus the installed software entry: classify the origin from
    /// the saved privilege bit, make the trap window usable (vacating one slot if it is marked
    /// invalid), build the trap frame, hand control to the generic dispatcher with a valid stack
    /// pointer, and resume along the target the dispatcher selects.
    pub fn trap_entry(
        &self,
        cpu: &mut Cpu,
        kstack: &mut KernelStack,
        ustack: &mut UserStack,
        process: &mut dyn ProcessControl,
        dispatcher: &mut dyn TrapDispatcher,
        cause: TrapCause,
    ) -> Resume {
        let trap_window = cpu.take_trap();
        let saved_sp = cpu.sp();

        let frame_addr = if cpu.psr().trap_origin_is_kernel() {
            if cpu.invalid_mask().contains(trap_window) {
                self.resolve_overflow(cpu, kstack, ustack, process);
            }

            // The interrupted frame's pointer is trusted kernel state.
            let caller_fp = cpu.window(trap_window.prev()).frame_pointer();
            Address::<KernelSpace>::new(caller_fp as usize) - TrapFrame::BYTES
        } else {
            // First entry from user mode. The kernel stack pointer cannot be trusted yet, so the
            // frame goes to the fixed top of the kernel stack. The outgoing window becomes the
            // new user boundary *before* the overflow test, so that later overflows can tell
            // from kernel mode whether user windows remain resident.
            cpu.set_user_boundary(trap_window.prev());

            if cpu.invalid_mask().contains(trap_window) {
                self.resolve_overflow(cpu, kstack, ustack, process);
            }

            kstack.top() - TrapFrame::BYTES
        };
        let frame_addr = frame_addr.align_down(STACK_ALIGN);

        TrapFrame::capture(cpu).store(kstack, frame_addr);
        cpu.set_sp(frame_addr);

        let resume = dispatcher.dispatch_trap(cpu, kstack, frame_addr, cause);

        Self::trap_return(cpu, kstack, frame_addr, resume);
        cpu.set_sp(saved_sp);

        resume
    }

    /// Explicit window allocation (trigger 2).
    ///
    /// No trap frame exists here; ownership of the slot to vacate is derived from the current
    /// privilege state. The faulting allocation is re-executed transparently once the ring has a
    /// valid slot, so from the caller's perspective this always succeeds. The corruption path
    /// surfaces only through the process-management collaborator.
    pub fn allocate(
        &self,
        cpu: &mut Cpu,
        kstack: &mut KernelStack,
        ustack: &mut UserStack,
        process: &mut dyn ProcessControl,
    ) {
        let target = cpu.cwp().next();

        if cpu.invalid_mask().contains(target) {
            asynchronous::exec_with_irq_masked(cpu, |cpu| {
                self.resolve_overflow(cpu, kstack, ustack, process)
            });
        }

        cpu.advance_window();
    }

    /// Window release.
    ///
    /// Rotating back into an invalid slot is the underflow case; the fill collaborator reloads
    /// the spilled record and the invalid mark retreats one slot.
    pub fn release(&self, cpu: &mut Cpu, fill: &mut dyn interface::WindowFill) {
        let target = cpu.cwp().prev();

        if cpu.invalid_mask().contains(target) {
            *cpu.window_mut(target) = fill.fill(target);
            cpu.invalid_mask_mut().settle(target.prev());
            self.stats.lock(|stats| stats.fills += 1);
        }

        cpu.retreat_window();
    }

    /// Vacate one ring slot so that the slot currently marked invalid becomes usable.
    ///
    /// The slot to vacate is always the one after the invalid mark: the oldest live window in the
    /// ring. Its record is written to the backing store addressed by its own frame pointer.
    fn resolve_overflow(
        &self,
        cpu: &mut Cpu,
        kstack: &mut KernelStack,
        ustack: &mut UserStack,
        process: &mut dyn ProcessControl,
    ) {
        // Same-class traps are masked for the whole sequence; the intermediate mask forms below
        // are invisible to any other trap.
        assert!(
            !cpu.psr().traps_enabled() || asynchronous::is_local_irq_masked(cpu),
            "overflow resolution entered with same-class traps open"
        );

        let vacate = cpu.invalid_mask().slot().next();
        let record = *cpu.window(vacate);

        match Self::classify_spill(cpu, kstack, ustack) {
            SpillTarget::Kernel(stack) => {
                let addr = Address::<KernelSpace>::new(record.frame_pointer() as usize);
                stack.write_words(addr, &record.to_spill_words());

                cpu.invalid_mask_mut().settle(vacate);
                self.stats.lock(|stats| stats.kernel_spills += 1);
            }

            SpillTarget::User { stack, anchor } => {
                cpu.invalid_mask_mut().begin_vacate(vacate, anchor);

                let addr = Address::<UserSpace>::new(record.frame_pointer() as usize);
                match stack.write_words(addr, &record.to_spill_words()) {
                    Ok(()) => {
                        if vacate == anchor {
                            // That was the last resident user window.
                            cpu.clear_user_boundary();
                        }

                        cpu.invalid_mask_mut().settle(vacate);
                        self.stats.lock(|stats| stats.user_spills += 1);
                    }

                    Err(fault) => {
                        // The spill is aborted, not retried. Discarding the primary mark
                        // collapses the mask and declares the ring free of resident user
                        // windows; only the would-be-spilled record is lost. The task pays
                        // with its life, delivery is the process layer's concern.
                        cpu.clear_user_boundary();
                        cpu.invalid_mask_mut().settle(anchor);
                        self.stats.lock(|stats| stats.corruptions += 1);

                        let notice = TerminationNotice {
                            fault,
                            window: vacate,
                        };
                        warn!("window spill aborted: {}", notice);
                        process.terminate(notice);
                    }
                }
            }
        }
    }

    /// Resolve which backing store owns the slot to vacate.
    ///
    /// The slot to vacate is the oldest live window. User frames, when resident, are always older
    /// than any kernel frame stacked on top of them, so residency alone decides ownership. In
    /// kernel mode residency is the recorded boundary; in user mode every live window is the
    /// running task's and the current window anchors the chain.
    fn classify_spill<'a>(
        cpu: &Cpu,
        kstack: &'a mut KernelStack,
        ustack: &'a mut UserStack,
    ) -> SpillTarget<'a> {
        let anchor = if cpu.psr().is_kernel_mode() {
            cpu.user_boundary()
        } else {
            Some(cpu.cwp())
        };

        match anchor {
            Some(anchor) => SpillTarget::User {
                stack: ustack,
                anchor,
            },
            None => SpillTarget::Kernel(kstack),
        }
    }

    /// Tear the trap frame back down and return along the selected target.
    fn trap_return(
        cpu: &mut Cpu,
        kstack: &KernelStack,
        frame_addr: Address<KernelSpace>,
        resume: Resume,
    ) {
        let frame = TrapFrame::load(kstack, frame_addr);

        *cpu.globals_mut() = frame.globals;
        cpu.psr_mut().set_raw(frame.psr);

        match resume {
            Resume::Interrupted => cpu.set_pc_npc(frame.pc, frame.npc),
            Resume::Redirect { pc } => cpu.set_pc(pc),
        }

        cpu.return_from_trap();
    }
}

impl Default for WindowManager {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{WindowRecord, NUM_REG_WINDOWS};

    /// Mask transitions stay within the popcount invariant.
    #[test]
    fn mask_transition_sanity() {
        let mut mask = WindowMask::single(WindowIndex::new(3));

        assert!(mask.is_single());
        assert!(mask.contains(WindowIndex::new(3)));
        assert_eq!(mask.slot(), WindowIndex::new(3));

        mask.begin_vacate(WindowIndex::new(4), WindowIndex::new(1));
        assert_eq!(mask.popcount(), 2);
        assert!(mask.contains(WindowIndex::new(4)));
        assert!(mask.contains(WindowIndex::new(1)));
        assert!(!mask.contains(WindowIndex::new(3)));

        mask.settle(WindowIndex::new(4));
        assert_eq!(mask.slot(), WindowIndex::new(4));
    }

    /// Primary and secondary mark may coincide (exactly one resident user window).
    #[test]
    fn mask_single_resident_window() {
        let mut mask = WindowMask::single(WindowIndex::new(0));

        mask.begin_vacate(WindowIndex::new(1), WindowIndex::new(1));
        assert_eq!(mask.popcount(), 1);
    }

    /// Steady-state queries refuse the double-bit form.
    #[test]
    #[should_panic(expected = "double-bit form")]
    fn mask_slot_query_rejects_double_bit() {
        let mut mask = WindowMask::single(WindowIndex::new(0));
        mask.begin_vacate(WindowIndex::new(1), WindowIndex::new(5));

        let _ = mask.slot();
    }

    /// The ring starts with `NUM_REG_WINDOWS - 1` allocations of headroom.
    #[test]
    fn boot_mask_position() {
        let cpu = Cpu::new();

        assert_eq!(
            cpu.invalid_mask().slot(),
            WindowIndex::new(NUM_REG_WINDOWS - 1)
        );
    }

    /// A user task's own allocations overflow into its own stack, no boundary involved.
    #[test]
    fn user_mode_allocation_spills_to_user_store() {
        struct CountingProcess {
            notices: usize,
        }

        impl ProcessControl for CountingProcess {
            fn terminate(&mut self, _notice: TerminationNotice) {
                self.notices += 1;
            }
        }

        let mut cpu = Cpu::new();
        let mut kstack = KernelStack::new();
        let mut ustack = UserStack::new();
        let manager = WindowManager::new();
        let mut process = CountingProcess { notices: 0 };

        cpu.psr_mut().drop_to_user();
        cpu.psr_mut().set_cwp(2);
        cpu.invalid_mask_mut().settle(WindowIndex::new(3));

        let fp = ustack.top() - WindowRecord::SPILL_BYTES;
        cpu.window_mut(WindowIndex::new(4))
            .set_frame_pointer(fp.as_usize() as u32);

        manager.allocate(&mut cpu, &mut kstack, &mut ustack, &mut process);

        assert_eq!(cpu.cwp(), WindowIndex::new(3));
        assert_eq!(manager.stats().user_spills, 1);
        assert_eq!(cpu.invalid_mask().slot(), WindowIndex::new(4));
        assert!(cpu.user_boundary().is_none());
        assert_eq!(process.notices, 0);
    }

    /// Release into an invalid slot reloads the record through the fill collaborator.
    #[test]
    fn release_underflow_reloads_through_fill() {
        struct StaticFill {
            record: WindowRecord,
        }

        impl interface::WindowFill for StaticFill {
            fn fill(&mut self, _slot: WindowIndex) -> WindowRecord {
                self.record
            }
        }

        let mut cpu = Cpu::new();
        let manager = WindowManager::new();

        let mut record = WindowRecord::zeroed();
        record.local[0] = 0x5111;
        let mut fill = StaticFill { record };

        manager.release(&mut cpu, &mut fill);

        assert_eq!(cpu.cwp(), WindowIndex::new(NUM_REG_WINDOWS - 1));
        assert_eq!(cpu.current_window().local[0], 0x5111);
        assert_eq!(
            cpu.invalid_mask().slot(),
            WindowIndex::new(NUM_REG_WINDOWS - 2)
        );
        assert_eq!(manager.stats().fills, 1);
    }
}
