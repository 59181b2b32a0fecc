// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Machine-mode RISC-V helpers shared by the boot path and the collaborators.
//!
//! Host builds get inert stubs so the higher layers stay testable. The CLINT
//! layout is the QEMU `virt` one.

/// CLINT base on QEMU `virt`.
pub const CLINT_BASE: usize = 0x0200_0000;
const MSIP_OFFSET: usize = 0x0;
const MTIMECMP_OFFSET: usize = 0x4000;
const MTIME_OFFSET: usize = 0xbff8;

/// `mtime` ticks per second on QEMU `virt`.
pub const TIMEBASE_HZ: u64 = 10_000_000;

#[inline]
const fn msip_addr(hart: usize) -> usize {
    CLINT_BASE + MSIP_OFFSET + hart * 4
}

#[inline]
const fn mtimecmp_addr(hart: usize) -> usize {
    CLINT_BASE + MTIMECMP_OFFSET + hart * 8
}

/// Issues a WFI instruction or yields on the host.
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        core::hint::spin_loop();
    }
}

/// Halts the calling hart for good, waking only to sleep again.
pub fn park() -> ! {
    loop {
        wait_for_interrupt();
    }
}

/// Enables machine timer interrupts (`mie.MTIE`) on the calling hart.
#[inline]
pub fn enable_machine_timer() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    // SAFETY: M-mode only; `mtvec` points at the trap vector from boot on.
    unsafe {
        riscv::register::mie::set_mtimer();
    }
}

/// Reads the CLINT `mtime` counter.
#[inline]
pub fn read_mtime() -> u64 {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::ptr::read_volatile((CLINT_BASE + MTIME_OFFSET) as *const u64)
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        0
    }
}

/// Programs `mtimecmp` of `hart`.
#[inline]
pub fn set_timer(hart: usize, deadline: u64) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::ptr::write_volatile(mtimecmp_addr(hart) as *mut u64, deadline);
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = (mtimecmp_addr(hart), deadline);
    }
}

/// Raises a machine software interrupt on `hart`.
#[inline]
pub fn send_software_interrupt(hart: usize) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::ptr::write_volatile(msip_addr(hart) as *mut u32, 1);
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = msip_addr(hart);
    }
}

/// Acknowledges a pending machine software interrupt on `hart`.
#[inline]
pub fn clear_software_interrupt(hart: usize) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::ptr::write_volatile(msip_addr(hart) as *mut u32, 0);
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = msip_addr(hart);
    }
}
