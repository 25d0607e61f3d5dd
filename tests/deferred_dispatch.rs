// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! Deferred dispatch: pending-work replay and the low-priority switch hand-off.

use std::sync::Mutex;
use windlass::{
    cpu::Cpu,
    exception::{
        asynchronous::{self, PendingQueue, WorkItem},
        trampoline::{self, InitialContext, InterruptFrame, Trampoline, Unrecoverable},
    },
    memory::KernelStack,
    synchronization::{interface::Mutex as _, NullLock},
};

static DRAINED: Mutex<Vec<u32>> = Mutex::new(Vec::new());

fn record(token: u32) {
    DRAINED.lock().unwrap().push(token);
}

/// Takes the latched exception and performs the switch.
struct Switcher {
    switched: bool,
}

impl trampoline::interface::ContextSwitch for Switcher {
    fn on_switch_request(&mut self, cpu: &mut Cpu, _stack: &mut KernelStack) {
        assert!(cpu.switch_request_pending());
        assert!(!asynchronous::is_local_irq_masked(cpu));

        cpu.clear_switch_request();
        self.switched = true;
    }
}

/// Models the invariant violation: the exception never fires.
struct Ignorer;

impl trampoline::interface::ContextSwitch for Ignorer {
    fn on_switch_request(&mut self, _cpu: &mut Cpu, _stack: &mut KernelStack) {}
}

fn context_for(stack: &KernelStack, cpu: &Cpu) -> InitialContext {
    InitialContext {
        entry: 0x5000,
        arg: 0xab,
        sp: stack.top(),
        status: cpu.psr().raw(),
    }
}

#[test]
fn launch_drains_fifo_then_hands_off() {
    let mut cpu = Cpu::new();
    let mut stack = KernelStack::new();
    let trampoline = Trampoline::new();
    let pending = NullLock::new(PendingQueue::new());

    // Critical sections defer their exit work with interrupts masked.
    asynchronous::exec_with_irq_masked(&mut cpu, |_| {
        pending.lock(|queue| {
            for token in [1, 2, 3] {
                queue.defer(WorkItem { run: record, token });
            }
        });
    });

    let ctx = context_for(&stack, &cpu);
    let mut switcher = Switcher { switched: false };

    let result = trampoline.launch(&mut cpu, &mut stack, &ctx, &pending, &mut switcher);

    assert_eq!(result, Ok(()));
    assert!(switcher.switched);
    assert_eq!(*DRAINED.lock().unwrap(), vec![1, 2, 3]);
    assert!(pending.lock(|queue| queue.is_empty()));

    // The pushed initial frame carries the new context.
    let frame = InterruptFrame::load(&stack, cpu.sp());
    assert_eq!(frame.pc, 0x5000);
    assert_eq!(frame.scratch[0], 0xab);
    assert_eq!(cpu.globals()[0], 0xab);
}

#[test]
fn a_no_op_switch_returns_through_the_exception_path() {
    /// Consumes the request but decides no switch is needed.
    struct NoSwitchNeeded<'t> {
        trampoline: &'t Trampoline,
    }

    impl trampoline::interface::ContextSwitch for NoSwitchNeeded<'_> {
        fn on_switch_request(&mut self, cpu: &mut Cpu, stack: &mut KernelStack) {
            cpu.clear_switch_request();
            self.trampoline.switch_return(cpu, stack);
        }
    }

    let mut cpu = Cpu::new();
    let mut stack = KernelStack::new();
    let trampoline = Trampoline::new();
    let pending = NullLock::new(PendingQueue::new());

    let ctx = context_for(&stack, &cpu);
    let mut switcher = NoSwitchNeeded {
        trampoline: &trampoline,
    };

    let result = trampoline.launch(&mut cpu, &mut stack, &ctx, &pending, &mut switcher);

    assert_eq!(result, Ok(()));
    assert_eq!(cpu.sp(), ctx.sp);
    assert_eq!(cpu.pc(), ctx.entry);
}

#[test]
fn an_ignored_switch_request_is_unrecoverable() {
    let mut cpu = Cpu::new();
    let mut stack = KernelStack::new();
    let trampoline = Trampoline::new();
    let pending = NullLock::new(PendingQueue::new());

    let ctx = context_for(&stack, &cpu);

    let result = trampoline.launch(&mut cpu, &mut stack, &ctx, &pending, &mut Ignorer);

    assert_eq!(result, Err(Unrecoverable::SwitchRequestIgnored));
}

#[test]
#[should_panic(expected = "unrecoverable")]
fn halt_is_deliberately_fatal() {
    trampoline::halt(Unrecoverable::SwitchRequestIgnored);
}
