// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall trampoline (`arch/riscv/syscall.S`)
//! OWNERS: @kernel-arch-team
//! PUBLIC API: syscall(), NUMBER_REG, ARG_REGS, RETURN_REG
//! INVARIANTS: One `ecall` per call; number in a7, arguments in a0..a5,
//! result in a0
//!
//! Callers pass the number first, so the trampoline shifts every argument
//! down one register and moves the number into a7 before trapping.

use crate::frame::reg;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(include_str!("arch/riscv/syscall.S"));

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    fn __syscall_trampoline(
        number: usize,
        a0: usize,
        a1: usize,
        a2: usize,
        a3: usize,
        a4: usize,
        a5: usize,
    ) -> usize;
}

/// Register the handler reads the syscall number from.
pub const NUMBER_REG: usize = reg::A7;
/// Registers holding the six arguments at trap time, in order.
pub const ARG_REGS: [usize; 6] = [reg::A0, reg::A1, reg::A2, reg::A3, reg::A4, reg::A5];
/// Register carrying the result back to the caller.
pub const RETURN_REG: usize = reg::A0;

/// Issues syscall `number` with `args` and returns the handler's a0.
///
/// # Safety
/// The trap handler must be installed and the frame behind `mscratch` valid
/// for the calling hart.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[inline]
pub unsafe fn syscall(number: usize, args: [usize; 6]) -> usize {
    let [a0, a1, a2, a3, a4, a5] = args;
    // SAFETY: forwarded from the caller's contract.
    unsafe { __syscall_trampoline(number, a0, a1, a2, a3, a4, a5) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_side_registers_are_the_c_argument_registers() {
        assert_eq!(NUMBER_REG, 17);
        assert_eq!(ARG_REGS, [10, 11, 12, 13, 14, 15]);
        assert_eq!(RETURN_REG, ARG_REGS[0]);
    }
}
