// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Context switcher: install a frame as the hart's active frame and `mret` into it.
//!
//! `__switch_to_context` is assembled from `arch/riscv/trap.S`. It writes
//! `mscratch`, builds `mstatus` from `CONTEXT_MSTATUS` and the frame's mode
//! field, installs `satp`, `mie` and `mtvec`, then restores the whole FP file
//! and x1..x31 from the frame.

use core::ptr::NonNull;

use crate::frame::TrapFrame;
use crate::hart::{self, HartId};
use crate::status::{context_mstatus_word, Mstatus};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    fn __switch_to_context(frame: *mut TrapFrame) -> !;
}

/// The `mstatus` value the switcher writes for `frame`.
///
/// Only the low two bits of the mode field reach MPP.
#[inline]
pub const fn switch_mstatus(frame: &TrapFrame) -> Mstatus {
    Mstatus::from_bits_retain(context_mstatus_word(frame.mode))
}

/// Records `frame` in the per-hart table. The switcher then makes it the hardware-active one.
pub fn adopt(hart: HartId, frame: NonNull<TrapFrame>) {
    hart::set_current_frame(hart, frame);
    log_trace!(target: "switch", "{} -> frame {:p}", hart, frame.as_ptr());
}

/// [`adopt`] for a raw `mhartid`. Harts past the ceiling have no slot and
/// leave the table untouched.
pub fn adopt_raw(raw: usize, frame: NonNull<TrapFrame>) -> Option<HartId> {
    let hart = HartId::new(raw)?;
    adopt(hart, frame);
    Some(hart)
}

/// Starts or resumes the context in `frame` on the calling hart. Never returns.
/// A hart past [`crate::hart::MAX_HARTS`] parks instead.
///
/// # Safety
/// Machine mode only. `frame` must stay valid and exclusively owned by this
/// hart until another frame replaces it; its pc, satp and mode must describe a
/// runnable context.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub unsafe fn switch_to(frame: NonNull<TrapFrame>) -> ! {
    if adopt_raw(hart::current_raw(), frame).is_none() {
        crate::arch::riscv::park();
    }
    // SAFETY: forwarded from the caller's contract.
    unsafe { __switch_to_context(frame.as_ptr()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{FloatState, PrivilegeMode, CONTEXT_MSTATUS};

    #[test]
    fn supervisor_frame_encodes_mpp_one() {
        let frame = TrapFrame::new(0x8020_0000, 0x8030_0000, 0, PrivilegeMode::Supervisor);
        let status = switch_mstatus(&frame);
        assert_eq!(status.mpp(), Some(PrivilegeMode::Supervisor));
        assert_eq!(status.fs(), FloatState::Dirty);
        assert!(status.contains(Mstatus::MPIE | Mstatus::SPIE));
        assert!(!status.contains(Mstatus::MIE));
    }

    #[test]
    fn user_frame_clears_mpp() {
        let frame = TrapFrame::new(0x1000, 0x2000, 0, PrivilegeMode::User);
        assert_eq!(switch_mstatus(&frame).mpp(), Some(PrivilegeMode::User));
    }

    #[test]
    fn oversized_mode_field_is_masked() {
        let mut frame = TrapFrame::zeroed();
        frame.mode = 0b111;
        assert_eq!(switch_mstatus(&frame).mpp(), Some(PrivilegeMode::Machine));
        assert_eq!(switch_mstatus(&frame).bits() & !(0b11 << 11), CONTEXT_MSTATUS.bits());
    }

    #[test]
    fn adopt_updates_per_hart_table() {
        let mut frame = TrapFrame::zeroed();
        let ptr = NonNull::from(&mut frame);
        let _guard = hart::TEST_LOCK.lock();
        let hart = HartId::new(MAX_TEST_HART).expect("hart");
        adopt(hart, ptr);
        assert_eq!(hart::current_frame(hart), Some(ptr));
        hart::set_current_frame(hart, hart::kernel_frame(hart));
    }

    #[test]
    fn out_of_range_hart_keeps_other_slots() {
        let _guard = hart::TEST_LOCK.lock();
        hart::reset_current_frames();
        let mut frame = TrapFrame::zeroed();
        assert_eq!(adopt_raw(crate::hart::MAX_HARTS, NonNull::from(&mut frame)), None);
        for raw in 0..crate::hart::MAX_HARTS {
            assert_eq!(hart::current_frame(HartId::new(raw).expect("hart")), None);
        }
        assert_eq!(adopt_raw(1, NonNull::from(&mut frame)), HartId::new(1));
        assert_eq!(hart::current_frame(HartId::new(1).expect("hart")), Some(NonNull::from(&mut frame)));
        hart::reset_current_frames();
    }

    const MAX_TEST_HART: usize = crate::hart::MAX_HARTS - 1;
}
