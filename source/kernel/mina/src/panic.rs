// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Panic handler emitting diagnostics over the raw UART
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std, OS target only)
//! DEPENDS_ON: trap::write_panic_report(), uart::raw_writer()
//! INVARIANTS: No allocation; never takes the UART or trap locks; reads no
//! machine-mode CSR, since the boot hart panics from S-mode

use core::panic::PanicInfo;

use crate::{trap, uart};

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let mut w = uart::raw_writer();
    let location = info.location().map(|l| (l.file(), l.line()));
    let _ = trap::write_panic_report(&mut w, location, &info.message());
    crate::arch::riscv::park()
}
