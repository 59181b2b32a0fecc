// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the trap vector, context switcher,
//! syscall trampoline and boot sequencer, executed on the software hart
//! OWNERS: @kernel-arch-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Save then restore with an identity handler leaves the hart unchanged
//!   - FP registers are saved only when mstatus.FS is Dirty
//!   - Trampoline arguments reach the handler in order and a0 comes back
//!   - Switching into a frame lands at the frame's privilege
//!   - Hart 0 zeroes the whole .bss image, empty included
//!
//! TEST_SCENARIOS:
//!   - trap_roundtrip_restores_everything()
//!   - clean_fp_state_is_not_saved()
//!   - syscall_roundtrip(): number 5 with (10,20,30,0,0,0)
//!   - syscall_args_arrive_in_order()
//!   - switch_encodes_privilege()
//!   - boot_clears_whole_region()

use super::{BootOutcome, SoftHart, TRAP_VECTOR};
use crate::boot::BootSymbols;
use crate::frame::{reg, TrapFrame, REG_COUNT};
use crate::status::{FloatState, Mstatus, PrivilegeMode};
use crate::trap::{ecall_cause_for, TrapArgs};
use proptest::prelude::*;

fn arb_mode() -> impl Strategy<Value = PrivilegeMode> {
    prop_oneof![
        Just(PrivilegeMode::User),
        Just(PrivilegeMode::Supervisor),
        Just(PrivilegeMode::Machine),
    ]
}

fn arb_clean_fs() -> impl Strategy<Value = FloatState> {
    prop_oneof![Just(FloatState::Off), Just(FloatState::Initial), Just(FloatState::Clean)]
}

fn hart_with(x: [usize; REG_COUNT], f: [u64; REG_COUNT], fs: FloatState, mode: PrivilegeMode, pc: usize) -> SoftHart {
    let mut hart = SoftHart::new(0);
    hart.x = x;
    hart.f = f;
    hart.csr.mstatus = Mstatus::empty().with_fs(fs).bits();
    hart.mode = mode;
    hart.pc = pc;
    hart
}

fn identity(args: &TrapArgs, _frame: &mut TrapFrame) -> usize {
    args.epc
}

proptest! {
    #[test]
    fn trap_roundtrip_restores_everything(
        x in prop::array::uniform32(any::<usize>()),
        f in prop::array::uniform32(any::<u64>()),
        mode in arb_mode(),
        pc in (0usize..1 << 40).prop_map(|pc| pc & !3),
        cause in 0usize..16,
    ) {
        let mut hart = hart_with(x, f, FloatState::Dirty, mode, pc);
        let before: Vec<usize> = (0..REG_COUNT).map(|i| hart.read_x(i)).collect();
        let mut frame = TrapFrame::zeroed();
        hart.install_frame(&frame);

        let args = hart.trap(cause, 0, &mut frame, &mut identity).expect("trap");

        prop_assert_eq!(args.epc, pc);
        prop_assert_eq!(frame.regs[reg::ZERO], 0);
        prop_assert_eq!(&frame.regs[1..], &x[1..]);
        prop_assert_eq!(frame.fregs, f);
        prop_assert_eq!(frame.pc, pc);
        let after: Vec<usize> = (0..REG_COUNT).map(|i| hart.read_x(i)).collect();
        prop_assert_eq!(after, before);
        prop_assert_eq!(hart.f, f);
        prop_assert_eq!(hart.pc, pc);
        prop_assert_eq!(hart.mode, mode);
        prop_assert_eq!(hart.csr.mscratch, &frame as *const TrapFrame as usize);
    }

    #[test]
    fn clean_fp_state_is_not_saved(
        stale in prop::array::uniform32(any::<u64>()),
        live in prop::array::uniform32(any::<u64>()),
        fs in arb_clean_fs(),
    ) {
        let mut hart = hart_with([0; REG_COUNT], live, fs, PrivilegeMode::User, 0x1000);
        let mut frame = TrapFrame::zeroed();
        frame.fregs = stale;
        hart.install_frame(&frame);

        hart.trap(8, 0, &mut frame, &mut |a: &TrapArgs, _: &mut TrapFrame| a.epc + 4).expect("trap");

        prop_assert_eq!(frame.fregs, stale);
        prop_assert_eq!(hart.f, live);
        prop_assert_eq!(hart.status().fs(), fs);
    }

    #[test]
    fn syscall_args_arrive_in_order(
        number in any::<usize>(),
        args in prop::array::uniform6(any::<usize>()),
        ret in any::<usize>(),
        mode in arb_mode(),
    ) {
        let mut hart = hart_with([0; REG_COUNT], [0; REG_COUNT], FloatState::Initial, mode, 0x2000);
        let mut frame = TrapFrame::zeroed();
        hart.install_frame(&frame);
        let mut seen = None;
        let mut handler = |a: &TrapArgs, fr: &mut TrapFrame| {
            seen = Some((a.cause, fr.syscall_number(), fr.syscall_args()));
            fr.set_return_value(ret);
            a.epc + 4
        };

        let got = hart.call_trampoline(number, args, &mut frame, &mut handler).expect("syscall");

        prop_assert_eq!(seen, Some((ecall_cause_for(mode), number, args)));
        prop_assert_eq!(got, ret);
        prop_assert_eq!(hart.mode, mode);
    }

    #[test]
    fn switch_encodes_privilege(mode in arb_mode(), pc in any::<usize>(), sp in any::<usize>()) {
        let frame = TrapFrame::new(pc, sp, 0, mode);
        let mut hart = SoftHart::new(0);

        hart.switch_to(&frame);

        let written = Mstatus::from_bits_retain(hart.last_mstatus_write().expect("mstatus written"));
        prop_assert_eq!(written.mpp(), Some(mode));
        prop_assert_eq!(written.fs(), FloatState::Dirty);
        prop_assert_eq!(hart.mode, mode);
        prop_assert_eq!(hart.pc, pc);
        prop_assert_eq!(hart.x[reg::SP], sp);
        prop_assert_eq!(hart.csr.mscratch, &frame as *const TrapFrame as usize);
    }

    #[test]
    fn boot_clears_whole_region(mut bss in prop::collection::vec(any::<u64>(), 0..64)) {
        let symbols = BootSymbols {
            global_pointer: 0x8000_0800,
            bss: 0x8001_0000..0x8001_0000 + bss.len() * 8,
            stack_top: 0x8010_0000,
            frames: 0x8002_0000,
            kinit: 0x8000_1000,
            kinit_hart: 0x8000_2000,
            trap_vector: TRAP_VECTOR,
            park: 0x8000_0040,
        };
        let len = bss.len();
        let mut hart = SoftHart::new(0);

        let outcome = hart.boot(&symbols, &mut bss);

        prop_assert_eq!(outcome, BootOutcome::Dropped { mode: PrivilegeMode::Supervisor, pc: 0x8000_1000, cleared: len });
        prop_assert!(bss.iter().all(|w| *w == 0));
    }
}

#[test]
fn syscall_roundtrip() {
    let mut hart = SoftHart::new(0);
    hart.mode = PrivilegeMode::Supervisor;
    hart.pc = 0x8000_3000;
    let mut frame = TrapFrame::zeroed();
    hart.install_frame(&frame);
    let mut observed = None;
    let mut handler = |a: &TrapArgs, fr: &mut TrapFrame| {
        observed = Some((fr.syscall_number(), fr.syscall_args(), a.epc));
        fr.set_return_value(0x55);
        a.epc + 4
    };

    let ret = hart.call_trampoline(5, [10, 20, 30, 0, 0, 0], &mut frame, &mut handler).expect("syscall");

    assert_eq!(observed, Some((5, [10, 20, 30, 0, 0, 0], 0x8000_3000)));
    assert_eq!(ret, 0x55);
    assert_eq!(hart.mode, PrivilegeMode::Supervisor);
}
