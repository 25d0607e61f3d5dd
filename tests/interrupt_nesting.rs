// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! Interrupt nesting: a higher-priority entry must leave the outer frame untouched, bit for bit.

use windlass::{
    cpu::Cpu,
    exception::{
        interface::TrapDispatcher,
        trampoline::{InterruptFrame, Trampoline},
        Resume, TrapCause,
    },
    memory::{Address, KernelSpace, KernelStack},
};

/// Innermost level: scribbles over its own frame and returns.
struct Leaf;

impl TrapDispatcher for Leaf {
    fn dispatch_trap(
        &mut self,
        _cpu: &mut Cpu,
        _stack: &mut KernelStack,
        _frame_addr: Address<KernelSpace>,
        _cause: TrapCause,
    ) -> Resume {
        unreachable!("not a trap test")
    }

    fn dispatch_interrupt(
        &mut self,
        _cpu: &mut Cpu,
        stack: &mut KernelStack,
        frame_addr: Address<KernelSpace>,
        _cause: TrapCause,
    ) -> Resume {
        // Mutating the nested frame must not leak into the outer one.
        let mut frame = InterruptFrame::load(stack, frame_addr);
        frame.scratch = [0xffff_ffff; 4];
        frame.store(stack, frame_addr);

        Resume::Interrupted
    }
}

/// Outer level: snapshots its frame, takes a nested interrupt, verifies the snapshot.
struct Nester<'t> {
    trampoline: &'t Trampoline,
    nested_high_water: usize,
}

impl TrapDispatcher for Nester<'_> {
    fn dispatch_trap(
        &mut self,
        _cpu: &mut Cpu,
        _stack: &mut KernelStack,
        _frame_addr: Address<KernelSpace>,
        _cause: TrapCause,
    ) -> Resume {
        unreachable!("not a trap test")
    }

    fn dispatch_interrupt(
        &mut self,
        cpu: &mut Cpu,
        stack: &mut KernelStack,
        frame_addr: Address<KernelSpace>,
        cause: TrapCause,
    ) -> Resume {
        assert_eq!(cause, TrapCause::Interrupt(1));
        assert_eq!(self.trampoline.depth(), 1);

        let before = InterruptFrame::load(stack, frame_addr);

        // A higher-priority interrupt preempts the dispatch.
        let resume = self
            .trampoline
            .enter(cpu, stack, &mut Leaf, TrapCause::Interrupt(7));
        assert_eq!(resume, Resume::Interrupted);

        self.nested_high_water = self.trampoline.max_depth();

        let after = InterruptFrame::load(stack, frame_addr);
        assert_eq!(before, after);

        Resume::Interrupted
    }
}

#[test]
fn nested_entry_preserves_the_outer_frame() {
    let mut cpu = Cpu::new();
    let mut stack = KernelStack::new();
    let trampoline = Trampoline::new();

    cpu.set_pc(0x6000);
    cpu.globals_mut()[1] = 0x1111;
    let sp_before = cpu.sp();

    let mut outer = Nester {
        trampoline: &trampoline,
        nested_high_water: 0,
    };

    let resume = trampoline.enter(&mut cpu, &mut stack, &mut outer, TrapCause::Interrupt(1));

    assert_eq!(resume, Resume::Interrupted);
    assert_eq!(outer.nested_high_water, 2);
    assert_eq!(trampoline.depth(), 0);

    // The interrupted state is back, including the stack pointer saved at entry.
    assert_eq!(cpu.pc(), 0x6000);
    assert_eq!(cpu.globals()[1], 0x1111);
    assert_eq!(cpu.sp(), sp_before);
}

#[test]
fn redirecting_dispatch_changes_the_resume_target() {
    struct Redirecting;

    impl TrapDispatcher for Redirecting {
        fn dispatch_trap(
            &mut self,
            _cpu: &mut Cpu,
            _stack: &mut KernelStack,
            _frame_addr: Address<KernelSpace>,
            _cause: TrapCause,
        ) -> Resume {
            unreachable!("not a trap test")
        }

        fn dispatch_interrupt(
            &mut self,
            _cpu: &mut Cpu,
            _stack: &mut KernelStack,
            _frame_addr: Address<KernelSpace>,
            _cause: TrapCause,
        ) -> Resume {
            Resume::Redirect { pc: 0x7777_0000 }
        }
    }

    let mut cpu = Cpu::new();
    let mut stack = KernelStack::new();
    let trampoline = Trampoline::new();

    cpu.set_pc(0x6000);
    let sp_before = cpu.sp();

    trampoline.enter(&mut cpu, &mut stack, &mut Redirecting, TrapCause::Interrupt(2));

    assert_eq!(cpu.pc(), 0x7777_0000);
    assert_eq!(cpu.sp(), sp_before);
}
