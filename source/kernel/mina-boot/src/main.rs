// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bootable MINA image: the initializers `_start` drops into and the
//! Rust trap handler the vector calls
//! OWNERS: @kernel-arch-team
//! STATUS: Functional (QEMU virt, M-mode firmware-less boot)
//! PUBLIC API: kinit(), kinit_hart(), __trap_rust() (linker-visible symbols)
//! DEPENDS_ON: mina (boot, trap, switch, syscall), kernel.ld
//! INVARIANTS: kinit runs in S-mode and never touches M-mode CSRs; the trap
//! handler never takes the UART lock

#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_std, no_main)]

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[macro_use]
extern crate mina;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod image {
    use core::fmt::Write;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use mina::arch::riscv as arch;
    use mina::boot::{BootPlan, BootSymbols};
    use mina::hart::{self, HartId, StackLayout, MAX_HARTS};
    use mina::trap::{self, TrapArgs, TrapCause, TrapHandlerFn};
    use mina::{uart, TrapFrame};

    const SYS_YIELD: usize = 1;
    const SYS_HART_ID: usize = 2;
    const ENOSYS: usize = 38;

    /// Timer tick: 10 ms at the virt timebase.
    #[cfg(feature = "timer_irq")]
    const TICK: u64 = arch::TIMEBASE_HZ / 100;

    static ONLINE: AtomicUsize = AtomicUsize::new(0);

    const fn errno(code: usize) -> usize {
        (-(code as isize)) as usize
    }

    /// Boot hart, S-mode, entered once after `.bss` is clear.
    #[no_mangle]
    extern "C" fn kinit() -> ! {
        hart::install_kernel_frame(HartId::BOOT);
        ONLINE.fetch_or(1, Ordering::AcqRel);
        #[cfg(feature = "boot_banner")]
        log_info!(target: "boot", "mina: {} up in S-mode", HartId::BOOT);

        match StackLayout::from_linker() {
            Ok(layout) => log_info!(
                target: "boot",
                "stacks 0x{:x}..0x{:x} for {} harts",
                layout.bottom(),
                layout.top(),
                layout.harts()
            ),
            Err(err) => log_error!(target: "boot", "stack layout: {}", err),
        }
        let symbols = BootSymbols::linked();
        for raw in 0..MAX_HARTS {
            if let Some(plan) = BootPlan::for_hart(raw, &symbols) {
                log_debug!(
                    target: "boot",
                    "{}: sp=0x{:x} entry=0x{:x} frame=0x{:x}",
                    plan.hart,
                    plan.stack_top,
                    plan.entry,
                    plan.kernel_frame
                );
            }
        }

        // SAFETY: `_start` installed mtvec and this hart's frame in mscratch.
        let id = unsafe { mina::syscall::syscall(SYS_HART_ID, [0; 6]) };
        log_info!(target: "boot", "SYS_HART_ID -> {}", id);
        // SAFETY: as above.
        let unknown = unsafe { mina::syscall::syscall(0x7ff, [1, 2, 3, 4, 5, 6]) };
        log_debug!(target: "boot", "unknown syscall -> {}", unknown as isize);

        for raw in 1..MAX_HARTS {
            arch::send_software_interrupt(raw);
        }
        // SAFETY: as above.
        let _ = unsafe { mina::syscall::syscall(SYS_YIELD, [0; 6]) };
        log_info!(target: "boot", "online mask 0b{:b}", ONLINE.load(Ordering::Acquire));
        arch::park()
    }

    /// Secondary harts, M-mode with only MSIE enabled.
    #[no_mangle]
    extern "C" fn kinit_hart(raw: usize) -> ! {
        let Some(hart) = HartId::new(raw) else {
            arch::park();
        };
        hart::install_kernel_frame(hart);
        ONLINE.fetch_or(1 << hart.as_index(), Ordering::AcqRel);
        #[cfg(feature = "timer_irq")]
        {
            arch::set_timer(hart.as_index(), arch::read_mtime().wrapping_add(TICK));
            arch::enable_machine_timer();
        }
        arch::park()
    }

    const _: TrapHandlerFn = __trap_rust;

    /// Called by `__trap_vector` on the hart's trap stack. Returns the resume pc.
    #[no_mangle]
    extern "C" fn __trap_rust(
        epc: usize,
        tval: usize,
        cause: usize,
        hart: usize,
        status: usize,
        frame: *mut TrapFrame,
    ) -> usize {
        let args = TrapArgs { epc, tval, cause, hart, status };
        trap::record(&args);
        #[cfg(feature = "trap_trace")]
        {
            let mut w = uart::raw_writer();
            let _ = writeln!(w, "[TRACE trap] hart{} {} epc=0x{:x}", hart, trap::describe_cause(cause), epc);
        }

        let decoded = args.cause();
        if decoded.interrupt {
            match decoded.code {
                TrapCause::MACHINE_SOFT => {
                    arch::clear_software_interrupt(hart);
                    epc
                }
                TrapCause::MACHINE_TIMER => {
                    rearm_timer(hart);
                    epc
                }
                _ => unexpected(&args, frame),
            }
        } else if decoded.is_ecall() {
            // SAFETY: a5 is mscratch at trap time, the frame the vector just filled.
            let Some(frame) = (unsafe { frame.as_mut() }) else {
                unexpected(&args, frame)
            };
            let ret = dispatch(frame.syscall_number(), hart);
            frame.set_return_value(ret);
            epc + 4
        } else {
            unexpected(&args, frame)
        }
    }

    fn dispatch(number: usize, hart: usize) -> usize {
        match number {
            SYS_YIELD => 0,
            SYS_HART_ID => hart,
            _ => errno(ENOSYS),
        }
    }

    #[cfg(feature = "timer_irq")]
    fn rearm_timer(hart: usize) {
        arch::set_timer(hart, arch::read_mtime().wrapping_add(TICK));
    }

    #[cfg(not(feature = "timer_irq"))]
    fn rearm_timer(hart: usize) {
        arch::set_timer(hart, u64::MAX);
    }

    fn unexpected(args: &TrapArgs, frame: *mut TrapFrame) -> ! {
        let mut w = uart::raw_writer();
        let _ = writeln!(w, "TRAP: unhandled {} (mcause=0x{:x})", trap::describe_cause(args.cause), args.cause);
        // SAFETY: read-only view of the frame the vector filled, if any.
        if let Some(frame) = unsafe { frame.as_ref() } {
            let _ = trap::fmt_trap(args, frame, &mut w);
        }
        panic!("unhandled trap {} on hart{}", trap::describe_cause(args.cause), args.hart);
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn main() {}
