// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal UART support for boot and trap diagnostics.
//!
//! On host builds every byte is discarded so tests never touch MMIO.

use core::fmt::{self, Write};
use spin::Mutex;

/// Address of the first UART on the `virt` machine.
const UART0_BASE: usize = 0x1000_0000;
const UART_TX: usize = 0x0;
const UART_LSR: usize = 0x5;
const LSR_TX_IDLE: u8 = 1 << 5;

/// Global UART writer used for kernel logs.
static UART0: Mutex<KernelUart> = Mutex::new(KernelUart::new(UART0_BASE));

/// UART implementation capable of formatted writes.
#[derive(Clone, Copy)]
pub struct KernelUart {
    base: usize,
}

impl KernelUart {
    /// Creates a UART abstraction rooted at `base`.
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Returns a guard for the kernel UART singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelUart> {
        UART0.lock()
    }

    fn write_raw(&self, offset: usize, value: u8) {
        write_mmio(self.base, offset, value);
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[inline]
fn write_mmio(base: usize, offset: usize, value: u8) {
    let addr = (base + offset) as *mut u8;
    // SAFETY: `base` is the NS16550A window on the virt machine, identity mapped
    // for machine mode and opened to supervisor mode by the boot PMP entry.
    unsafe {
        while core::ptr::read_volatile((base + UART_LSR) as *const u8) & LSR_TX_IDLE == 0 {}
        core::ptr::write_volatile(addr, value);
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
#[inline]
fn write_mmio(_base: usize, _offset: usize, _value: u8) {}

// Raw, lock-free UART emission for trap/panic contexts where the mutex may already be held.
pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                write_mmio(UART0_BASE, UART_TX, b'\r');
            }
            write_mmio(UART0_BASE, UART_TX, byte);
        }
        Ok(())
    }
}

pub fn raw_writer() -> RawUart {
    RawUart
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                self.write_raw(UART_TX, b'\r');
            }
            self.write_raw(UART_TX, byte);
        }
        Ok(())
    }
}
