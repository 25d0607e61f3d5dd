// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! The modeled CPU.
//!
//! All processor-global state (status register, window ring, invalid mask, globals) lives in one
//! owned [`Cpu`] handle that is passed by reference into the trap-entry code. There is exactly one
//! instance per modeled core and it is never duplicated.

pub mod registers;

use crate::{
    exception::window::WindowMask,
    memory::{Address, KernelSpace},
};
use core::fmt;
use self::registers::Psr;

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Number of register windows in the hardware ring.
pub const NUM_REG_WINDOWS: usize = 8;

/// Number of global registers.
pub const NUM_GLOBAL_REGS: usize = 8;

/// Index of a slot in the window ring. Arithmetic is modulo [`NUM_REG_WINDOWS`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WindowIndex(usize);

/// One hardware register window: locals plus incoming arguments.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WindowRecord {
    /// Local registers.
    pub local: [u32; 8],

    /// Incoming argument registers. Slot 6 holds the owning frame's stack pointer, slot 7 the
    /// return address, per the windowed calling convention.
    pub arg: [u32; 8],
}

/// The modeled CPU core.
pub struct Cpu {
    psr: Psr,
    pc: u32,
    npc: u32,
    globals: [u32; NUM_GLOBAL_REGS],
    sp: Address<KernelSpace>,
    windows: [WindowRecord; NUM_REG_WINDOWS],
    invalid_mask: WindowMask,
    user_boundary: Option<WindowIndex>,
    switch_request: bool,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl WindowIndex {
    /// Create an instance.
    pub const fn new(index: usize) -> Self {
        assert!(index < NUM_REG_WINDOWS);

        Self(index)
    }

    /// Convert to usize.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// The next slot in allocation direction.
    #[must_use]
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % NUM_REG_WINDOWS)
    }

    /// The previous slot, i.e. the next in release direction.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self((self.0 + NUM_REG_WINDOWS - 1) % NUM_REG_WINDOWS)
    }
}

impl fmt::Display for WindowIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

impl WindowRecord {
    /// Number of words a spilled record occupies in the backing store.
    pub const SPILL_WORDS: usize = 16;

    /// Byte size of a spilled record.
    pub const SPILL_BYTES: usize = Self::SPILL_WORDS * crate::memory::WORD_SIZE;

    /// An all-zeroes record.
    pub const fn zeroed() -> Self {
        Self {
            local: [0; 8],
            arg: [0; 8],
        }
    }

    /// The stack pointer of the frame owning this window.
    pub fn frame_pointer(&self) -> u32 {
        self.arg[6]
    }

    /// Install the owning frame's stack pointer.
    pub fn set_frame_pointer(&mut self, fp: u32) {
        self.arg[6] = fp;
    }

    /// Serialize into backing-store layout: locals first, then the incoming arguments.
    pub fn to_spill_words(&self) -> [u32; Self::SPILL_WORDS] {
        let mut words = [0; Self::SPILL_WORDS];

        words[..8].copy_from_slice(&self.local);
        words[8..].copy_from_slice(&self.arg);

        words
    }

    /// Deserialize from backing-store layout.
    pub fn from_spill_words(words: &[u32; Self::SPILL_WORDS]) -> Self {
        let mut record = Self::zeroed();

        record.local.copy_from_slice(&words[..8]);
        record.arg.copy_from_slice(&words[8..]);

        record
    }
}

impl Cpu {
    /// Create an instance in the reset state.
    ///
    /// Window 0 is the current (boot) window. The invalid mark sits one slot behind it, giving the
    /// boot chain `NUM_REG_WINDOWS - 1` allocations before the first overflow. Every window's
    /// frame pointer is seeded with a distinct slot inside the kernel stack region, below the area
    /// reserved for trap frames, so that spills of the boot chain land in mapped kernel memory.
    pub fn new() -> Self {
        let kernel_top = crate::bsp::memory::kernel_stack_region().top();

        let mut windows = [WindowRecord::zeroed(); NUM_REG_WINDOWS];
        for (i, window) in windows.iter_mut().enumerate() {
            let fp = kernel_top - 1024 - i * 2 * WindowRecord::SPILL_BYTES;
            window.set_frame_pointer(fp.as_usize() as u32);
        }

        Self {
            psr: Psr::new_boot(),
            pc: 0,
            npc: 0,
            globals: [0; NUM_GLOBAL_REGS],
            sp: kernel_top,
            windows,
            invalid_mask: WindowMask::single(WindowIndex::new(NUM_REG_WINDOWS - 1)),
            user_boundary: None,
            switch_request: false,
        }
    }

    /// The status register.
    pub fn psr(&self) -> &Psr {
        &self.psr
    }

    /// Mutable access to the status register.
    pub fn psr_mut(&mut self) -> &mut Psr {
        &mut self.psr
    }

    /// The current window index.
    pub fn cwp(&self) -> WindowIndex {
        WindowIndex::new(self.psr.cwp())
    }

    /// Move the current window pointer one slot in allocation direction.
    pub fn advance_window(&mut self) {
        let next = self.cwp().next();
        self.psr.set_cwp(next.as_usize());
    }

    /// Move the current window pointer one slot in release direction.
    pub fn retreat_window(&mut self) {
        let prev = self.cwp().prev();
        self.psr.set_cwp(prev.as_usize());
    }

    /// Access a window slot.
    pub fn window(&self, index: WindowIndex) -> &WindowRecord {
        &self.windows[index.as_usize()]
    }

    /// Mutable access to a window slot.
    pub fn window_mut(&mut self, index: WindowIndex) -> &mut WindowRecord {
        &mut self.windows[index.as_usize()]
    }

    /// The current window.
    pub fn current_window(&self) -> &WindowRecord {
        self.window(self.cwp())
    }

    /// Mutable access to the current window.
    pub fn current_window_mut(&mut self) -> &mut WindowRecord {
        let cwp = self.cwp();
        self.window_mut(cwp)
    }

    /// The invalid-slot mask.
    pub fn invalid_mask(&self) -> &WindowMask {
        &self.invalid_mask
    }

    /// Mutable access to the invalid-slot mask. Only the window manager mutates this.
    pub fn invalid_mask_mut(&mut self) -> &mut WindowMask {
        &mut self.invalid_mask
    }

    /// The boundary slot of the last resident user window, if any user windows are resident.
    pub fn user_boundary(&self) -> Option<WindowIndex> {
        self.user_boundary
    }

    /// Record the boundary slot of the last resident user window.
    pub fn set_user_boundary(&mut self, boundary: WindowIndex) {
        self.user_boundary = Some(boundary);
    }

    /// Declare that no user windows are resident.
    pub fn clear_user_boundary(&mut self) {
        self.user_boundary = None;
    }

    /// The program counter.
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// The next program counter.
    pub fn npc(&self) -> u32 {
        self.npc
    }

    /// Redirect execution.
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
        self.npc = pc.wrapping_add(4);
    }

    /// Restore an exact pc/npc pair, e.g. from a trap frame.
    pub fn set_pc_npc(&mut self, pc: u32, npc: u32) {
        self.pc = pc;
        self.npc = npc;
    }

    /// The global register file.
    pub fn globals(&self) -> &[u32; NUM_GLOBAL_REGS] {
        &self.globals
    }

    /// Mutable access to the global register file.
    pub fn globals_mut(&mut self) -> &mut [u32; NUM_GLOBAL_REGS] {
        &mut self.globals
    }

    /// The active (kernel) stack pointer.
    pub fn sp(&self) -> Address<KernelSpace> {
        self.sp
    }

    /// Set the active stack pointer.
    pub fn set_sp(&mut self, sp: Address<KernelSpace>) {
        self.sp = sp;
    }

    /// The hardware part of trap delivery: privilege bookkeeping, same-class traps off, and the
    /// window pointer advances into the trap window. The interrupted pc/npc pair is parked in the
    /// trap window's first locals, where the software entry expects it.
    ///
    /// Returns the trap window's index. Note that the trap window may be marked invalid at this
    /// point; resolving that is the window manager's job.
    pub fn take_trap(&mut self) -> WindowIndex {
        self.psr.enter_trap();
        self.advance_window();

        let (pc, npc) = (self.pc, self.npc);
        let trap_window = self.current_window_mut();
        trap_window.local[1] = pc;
        trap_window.local[2] = npc;

        self.cwp()
    }

    /// The hardware part of trap return: back out of the trap window, restore privilege, traps on.
    pub fn return_from_trap(&mut self) {
        self.retreat_window();
        self.psr.return_from_trap();
    }

    /// Latch the low-priority context-switch exception request.
    pub fn raise_switch_request(&mut self) {
        self.switch_request = true;
    }

    /// Is the context-switch exception request still latched?
    pub fn switch_request_pending(&self) -> bool {
        self.switch_request
    }

    /// Consume the context-switch exception request. Models the hardware taking the exception.
    pub fn clear_switch_request(&mut self) {
        self.switch_request = false;
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
