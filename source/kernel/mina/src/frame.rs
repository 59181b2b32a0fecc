// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed-layout saved execution context shared by the trap vector,
//! the context switcher and the trap handler
//! OWNERS: @kernel-arch-team
//! STATUS: Functional
//! API_STABILITY: Stable (byte layout is an assembly ABI)
//! TEST_COVERAGE: Compile-time layout assertions + unit tests
//! PUBLIC API: TrapFrame, reg::*, FRAME_SIZE, OFF_*
//! INVARIANTS: regs @0, fregs @256, satp @512, pc @520, scratch @528..552,
//! mode @552, total 560 bytes; slot 0 never restored
//!
//! The frame is the only medium of exchange between hardware trap entry and
//! the rest of the system. It is never freed here: whoever allocated it owns
//! it.

use core::fmt;
use core::mem::{offset_of, size_of};

use static_assertions::{assert_eq_size, const_assert_eq};

use crate::status::PrivilegeMode;

/// ABI register indices into [`TrapFrame::regs`].
pub mod reg {
    pub const ZERO: usize = 0;
    pub const RA: usize = 1;
    pub const SP: usize = 2;
    pub const GP: usize = 3;
    pub const TP: usize = 4;
    pub const T0: usize = 5;
    pub const T1: usize = 6;
    pub const T2: usize = 7;
    pub const S0: usize = 8;
    pub const S1: usize = 9;
    pub const A0: usize = 10;
    pub const A1: usize = 11;
    pub const A2: usize = 12;
    pub const A3: usize = 13;
    pub const A4: usize = 14;
    pub const A5: usize = 15;
    pub const A6: usize = 16;
    pub const A7: usize = 17;
    pub const T3: usize = 28;
    pub const T4: usize = 29;
    pub const T5: usize = 30;
    pub const T6: usize = 31;
}

/// Number of integer (and floating-point) registers held in a frame.
pub const REG_COUNT: usize = 32;

/// Saved register state for one schedulable context.
///
/// Must match the save/restore sequences in `arch/riscv/trap.S`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    /// x0..x31 (x0 is saved for layout uniformity and never restored).
    pub regs: [usize; REG_COUNT],
    /// f0..f31 as raw bit patterns. Only valid if `mstatus.FS` was Dirty when
    /// the vector saved them.
    pub fregs: [u64; REG_COUNT],
    /// Address-space selector written to `satp` by the context switcher.
    pub satp: usize,
    /// Resume address.
    pub pc: usize,
    /// Owned by the collaborator (hart identity, scheduling data); never read here.
    pub scratch: [usize; 3],
    /// Target privilege: 0 = user, 1 = supervisor, 3 = machine.
    pub mode: usize,
}

pub const FRAME_SIZE: usize = size_of::<TrapFrame>();
pub const OFF_REGS: usize = offset_of!(TrapFrame, regs);
pub const OFF_FREGS: usize = offset_of!(TrapFrame, fregs);
pub const OFF_SATP: usize = offset_of!(TrapFrame, satp);
pub const OFF_PC: usize = offset_of!(TrapFrame, pc);
pub const OFF_SCRATCH: usize = offset_of!(TrapFrame, scratch);
pub const OFF_MODE: usize = offset_of!(TrapFrame, mode);

assert_eq_size!(usize, u64);
const_assert_eq!(OFF_REGS, 0);
const_assert_eq!(OFF_FREGS, 256);
const_assert_eq!(OFF_SATP, 512);
const_assert_eq!(OFF_PC, 520);
const_assert_eq!(OFF_SCRATCH, 528);
const_assert_eq!(OFF_MODE, 552);
const_assert_eq!(FRAME_SIZE, 560);

impl TrapFrame {
    /// All-zero frame, usable in `static` initialisers.
    pub const fn zeroed() -> Self {
        Self {
            regs: [0; REG_COUNT],
            fregs: [0; REG_COUNT],
            satp: 0,
            pc: 0,
            scratch: [0; 3],
            mode: 0,
        }
    }

    /// Fresh context that starts at `pc` with stack pointer `sp`.
    pub const fn new(pc: usize, sp: usize, satp: usize, mode: PrivilegeMode) -> Self {
        let mut frame = Self::zeroed();
        frame.regs[reg::SP] = sp;
        frame.pc = pc;
        frame.satp = satp;
        frame.mode = mode.bits();
        frame
    }

    #[inline]
    pub fn reg(&self, index: usize) -> usize {
        match index {
            reg::ZERO => 0,
            i => self.regs[i],
        }
    }

    /// Writes a general register slot; writes to x0 are dropped.
    #[inline]
    pub fn set_reg(&mut self, index: usize, value: usize) {
        if index != reg::ZERO && index < REG_COUNT {
            self.regs[index] = value;
        }
    }

    /// Decoded target privilege, `None` for the reserved encoding 2 or junk.
    #[inline]
    pub fn privilege(&self) -> Option<PrivilegeMode> {
        PrivilegeMode::from_bits(self.mode)
    }

    #[inline]
    pub fn set_privilege(&mut self, mode: PrivilegeMode) {
        self.mode = mode.bits();
    }

    /// System call number as placed by the trampoline.
    #[inline]
    pub fn syscall_number(&self) -> usize {
        self.regs[reg::A7]
    }

    /// The six system call arguments, `a0..a5`.
    #[inline]
    pub fn syscall_args(&self) -> [usize; 6] {
        let mut args = [0; 6];
        args.copy_from_slice(&self.regs[reg::A0..=reg::A5]);
        args
    }

    /// Stores the value the trampoline hands back to its caller.
    #[inline]
    pub fn set_return_value(&mut self, value: usize) {
        self.regs[reg::A0] = value;
    }
}

impl Default for TrapFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapFrame")
            .field("pc", &format_args!("{:#x}", self.pc))
            .field("satp", &format_args!("{:#x}", self.satp))
            .field("mode", &self.mode)
            .field("ra", &format_args!("{:#x}", self.regs[reg::RA]))
            .field("sp", &format_args!("{:#x}", self.regs[reg::SP]))
            .field("gp", &format_args!("{:#x}", self.regs[reg::GP]))
            .field("tp", &format_args!("{:#x}", self.regs[reg::TP]))
            .field("a0..a7", &format_args!("{:x?}", &self.regs[reg::A0..=reg::A7]))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_assembly_offsets() {
        assert_eq!(OFF_FREGS, 32 * 8);
        assert_eq!(OFF_SATP, 64 * 8);
        assert_eq!(OFF_PC, OFF_SATP + 8);
        assert_eq!(OFF_MODE - OFF_SCRATCH, 24);
        assert_eq!(core::mem::align_of::<TrapFrame>(), 8);
    }

    #[test]
    fn slot_zero_reads_as_zero() {
        let mut frame = TrapFrame::zeroed();
        frame.regs[0] = 0xdead_beef;
        assert_eq!(frame.reg(reg::ZERO), 0);
        frame.set_reg(reg::ZERO, 7);
        assert_eq!(frame.regs[0], 0xdead_beef);
    }

    #[test]
    fn new_frame_carries_entry_state() {
        let frame = TrapFrame::new(0x8020_0000, 0x8800_0000, 0x8000_0000_0008_0200, PrivilegeMode::User);
        assert_eq!(frame.pc, 0x8020_0000);
        assert_eq!(frame.reg(reg::SP), 0x8800_0000);
        assert_eq!(frame.privilege(), Some(PrivilegeMode::User));
        assert_eq!(frame.scratch, [0; 3]);
    }

    #[test]
    fn syscall_accessors_use_a7_and_a0_to_a5() {
        let mut frame = TrapFrame::zeroed();
        frame.regs[reg::A7] = 5;
        frame.regs[reg::A0..=reg::A5].copy_from_slice(&[10, 20, 30, 0, 0, 0]);
        assert_eq!(frame.syscall_number(), 5);
        assert_eq!(frame.syscall_args(), [10, 20, 30, 0, 0, 0]);
        frame.set_return_value(99);
        assert_eq!(frame.reg(reg::A0), 99);
    }

    #[test]
    fn reserved_mode_encoding_is_rejected() {
        let mut frame = TrapFrame::zeroed();
        frame.mode = 2;
        assert_eq!(frame.privilege(), None);
    }
}
