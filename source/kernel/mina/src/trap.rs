// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Machine trap vector (`arch/riscv/trap.S`) and trap diagnostics.
//!
//! The vector saves the interrupted context into the frame behind
//! `mscratch`, switches to the hart's trap stack and calls the external
//! handler as
//!
//! ```text
//! __trap_rust(epc, tval, cause, hart, status, frame) -> resume pc
//! ```
//!
//! It never interprets `cause` and never validates the returned address.
//! The context switcher lives in the same assembly file so both share the
//! save/restore macros; see [`crate::switch`].

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::frame::TrapFrame;
use crate::status::PrivilegeMode;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    include_str!("arch/riscv/trap.S"),
    OFF_REGS = const crate::frame::OFF_REGS,
    OFF_FREGS = const crate::frame::OFF_FREGS,
    OFF_SATP = const crate::frame::OFF_SATP,
    OFF_PC = const crate::frame::OFF_PC,
    OFF_MODE = const crate::frame::OFF_MODE,
    FS_SHIFT = const crate::status::FS_SHIFT,
    MPP_SHIFT = const crate::status::MPP_SHIFT,
    FIELD_MASK = const crate::status::FIELD_MASK,
    FS_DIRTY = const crate::status::FloatState::Dirty as usize,
    TRAP_STACK_SIZE = const crate::hart::TRAP_STACK_SIZE,
    CONTEXT_MSTATUS = const crate::status::CONTEXT_MSTATUS.bits(),
    CONTEXT_MIE = const crate::status::CONTEXT_MIE.bits(),
);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    fn __trap_vector();
}

/// Signature the vector calls; the sixth argument is `mscratch` at trap time.
pub type TrapHandlerFn =
    extern "C" fn(epc: usize, tval: usize, cause: usize, hart: usize, status: usize, frame: *mut TrapFrame) -> usize;

/// Address of `__trap_vector` (direct mode, 4-byte aligned).
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[inline]
pub fn vector_address() -> usize {
    __trap_vector as usize
}

/// Points `mtvec` of the calling hart at the vector. Boot already does this;
/// callers that replaced `mtvec` use it to restore it.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn install_vector() {
    use riscv::register::mtvec::{self, TrapMode};
    let addr = vector_address();
    // SAFETY: the vector is a valid direct-mode handler for the whole kernel lifetime.
    unsafe { mtvec::write(addr, TrapMode::Direct) };
    log_debug!(target: "trap", "mtvec=0x{:x}", addr);
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn install_vector() {
    log_debug!(target: "trap", "mtvec install skipped on host");
}

// ——— cause decoding ———

pub const INTERRUPT_FLAG: usize = usize::MAX - (usize::MAX >> 1);

/// Decoded `mcause`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrapCause {
    pub interrupt: bool,
    pub code: usize,
}

impl TrapCause {
    pub const MACHINE_SOFT: usize = 3;
    pub const MACHINE_TIMER: usize = 7;
    pub const MACHINE_EXTERNAL: usize = 11;

    pub const ILLEGAL_INSTRUCTION: usize = 2;
    pub const BREAKPOINT: usize = 3;
    pub const ECALL_U: usize = 8;
    pub const ECALL_S: usize = 9;
    pub const ECALL_M: usize = 11;

    #[inline]
    pub const fn from_raw(mcause: usize) -> Self {
        Self { interrupt: mcause & INTERRUPT_FLAG != 0, code: mcause & !INTERRUPT_FLAG }
    }

    #[inline]
    pub const fn bits(self) -> usize {
        if self.interrupt {
            self.code | INTERRUPT_FLAG
        } else {
            self.code
        }
    }

    #[inline]
    pub const fn is_ecall(self) -> bool {
        !self.interrupt && matches!(self.code, Self::ECALL_U | Self::ECALL_S | Self::ECALL_M)
    }
}

/// Exception code raised by `ecall` executed in `mode`.
pub const fn ecall_cause_for(mode: PrivilegeMode) -> usize {
    match mode {
        PrivilegeMode::User => TrapCause::ECALL_U,
        PrivilegeMode::Supervisor => TrapCause::ECALL_S,
        PrivilegeMode::Machine => TrapCause::ECALL_M,
    }
}

pub fn describe_cause(mcause: usize) -> &'static str {
    let cause = TrapCause::from_raw(mcause);
    if cause.interrupt {
        match cause.code {
            1 => "SupervisorSoftInt",
            3 => "MachineSoftInt",
            5 => "SupervisorTimerInt",
            7 => "MachineTimerInt",
            9 => "SupervisorExternalInt",
            11 => "MachineExternalInt",
            _ => "Interrupt",
        }
    } else {
        match cause.code {
            0 => "InstructionAddressMisaligned",
            1 => "InstructionAccessFault",
            2 => "IllegalInstruction",
            3 => "Breakpoint",
            4 => "LoadAddressMisaligned",
            5 => "LoadAccessFault",
            6 => "StoreAMOAddressMisaligned",
            7 => "StoreAMOAccessFault",
            8 => "EnvironmentCallFromUMode",
            9 => "EnvironmentCallFromSMode",
            11 => "EnvironmentCallFromMMode",
            12 => "InstructionPageFault",
            13 => "LoadPageFault",
            15 => "StoreAMOPageFault",
            _ => "Exception",
        }
    }
}

// ——— captured arguments and diagnostics ———

/// The five values the vector hands to the external handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapArgs {
    pub epc: usize,
    pub tval: usize,
    pub cause: usize,
    pub hart: usize,
    pub status: usize,
}

impl TrapArgs {
    #[inline]
    pub const fn cause(&self) -> TrapCause {
        TrapCause::from_raw(self.cause)
    }
}

/// Bounded history of recent traps, newest overwriting oldest.
pub const TRAP_RING_LEN: usize = 16;

struct TrapRing {
    slots: [Option<TrapArgs>; TRAP_RING_LEN],
    next: usize,
}

static LAST_TRAP: Mutex<Option<TrapArgs>> = Mutex::new(None);
static TRAP_RING: Mutex<TrapRing> = Mutex::new(TrapRing { slots: [None; TRAP_RING_LEN], next: 0 });
static DROPPED_TRAPS: AtomicUsize = AtomicUsize::new(0);

/// Records a trap from trap context.
///
/// Never spins: a trap that lands while its own hart holds a diagnostics lock
/// is counted in [`dropped_traps`] instead of being stored.
pub fn record(args: &TrapArgs) {
    let mut stored = true;
    match LAST_TRAP.try_lock() {
        Some(mut last) => *last = Some(*args),
        None => stored = false,
    }
    match TRAP_RING.try_lock() {
        Some(mut ring) => {
            let idx = ring.next;
            ring.slots[idx] = Some(*args);
            ring.next = (idx + 1) % TRAP_RING_LEN;
        }
        None => stored = false,
    }
    if !stored {
        DROPPED_TRAPS.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn last_trap() -> Option<TrapArgs> {
    *LAST_TRAP.lock()
}

/// Non-blocking variant for panic context, where the lock may already be held.
pub fn try_last_trap() -> Option<TrapArgs> {
    LAST_TRAP.try_lock().and_then(|guard| *guard)
}

fn ordered(ring: &TrapRing) -> [Option<TrapArgs>; TRAP_RING_LEN] {
    let mut out = [None; TRAP_RING_LEN];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = ring.slots[(ring.next + i) % TRAP_RING_LEN];
    }
    out
}

/// Recorded traps, oldest first.
pub fn recent_traps() -> [Option<TrapArgs>; TRAP_RING_LEN] {
    ordered(&TRAP_RING.lock())
}

/// As [`recent_traps`], `None` when the ring is locked.
pub fn try_recent_traps() -> Option<[Option<TrapArgs>; TRAP_RING_LEN]> {
    TRAP_RING.try_lock().map(|ring| ordered(&ring))
}

/// Traps [`record`] could not store because a lock was busy.
pub fn dropped_traps() -> usize {
    DROPPED_TRAPS.load(Ordering::Relaxed)
}

#[cfg(test)]
pub(crate) fn reset_diagnostics() {
    *LAST_TRAP.lock() = None;
    let mut ring = TRAP_RING.lock();
    ring.slots = [None; TRAP_RING_LEN];
    ring.next = 0;
    DROPPED_TRAPS.store(0, Ordering::Relaxed);
}

/// Panic report: location and message first, then the trap history.
///
/// Reads no CSR and takes no blocking lock, so it runs from S-mode and on a
/// hart that panicked while holding a diagnostics lock.
pub fn write_panic_report<W: Write>(
    w: &mut W,
    location: Option<(&str, u32)>,
    message: &dyn fmt::Display,
) -> fmt::Result {
    w.write_str("\nPANIC")?;
    if let Some((file, line)) = location {
        write!(w, " at {}:{}", file, line)?;
    }
    writeln!(w, ": {}", message)?;

    if let Some(args) = try_last_trap() {
        writeln!(
            w,
            "PANIC: last trap hart={} mepc=0x{:x} mcause=0x{:x} ({}) mtval=0x{:x}",
            args.hart,
            args.epc,
            args.cause,
            describe_cause(args.cause),
            args.tval
        )?;
    }
    match try_recent_traps() {
        Some(recent) => {
            for args in recent.iter().flatten() {
                writeln!(w, "  hart{} mepc=0x{:x} {}", args.hart, args.epc, describe_cause(args.cause))?;
            }
        }
        None => w.write_str("  trap ring busy\n")?,
    }
    let dropped = dropped_traps();
    if dropped != 0 {
        writeln!(w, "  {} traps not recorded", dropped)?;
    }
    Ok(())
}

pub fn fmt_trap<W: Write>(args: &TrapArgs, frame: &TrapFrame, f: &mut W) -> fmt::Result {
    writeln!(f, " hart={} mepc=0x{:016x}", args.hart, args.epc)?;
    writeln!(f, " mcause=0x{:016x} ({})", args.cause, describe_cause(args.cause))?;
    writeln!(f, " mtval=0x{:016x} mstatus=0x{:016x}", args.tval, args.status)?;
    writeln!(f, " ra=0x{:016x} sp=0x{:016x}", frame.regs[1], frame.regs[2])?;
    writeln!(f, " a0..a7 = {:016x?}", &frame.regs[10..=17])
}
