// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Reset entry (`_start`) and the per-hart boot handoff
//! OWNERS: @kernel-arch-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests; executed end to end by `sim::SoftHart::boot`
//! PUBLIC API: BootSymbols, BootPlan::for_hart(), clear_region(), PMP_* consts
//! DEPENDS_ON: linker symbols (__global_pointer$, __bss_start, __bss_end,
//! __stack_top), collaborator entry points `kinit` / `kinit_hart`
//! INVARIANTS: Only hart 0 clears .bss; each hart gets a disjoint stack;
//! privilege is lowered only through `mret`; mscratch and mtvec are valid
//! before the drop on every started hart
//!
//! The reset path itself is `arch/riscv/boot.S`. [`BootPlan`] is the same
//! decision table expressed in Rust so the host backend can replay it.

use core::ops::Range;

use crate::frame::FRAME_SIZE;
use crate::hart::{boot_stack_range, HartId, HART_STACK_SIZE, MAX_HARTS};
use crate::status::{Mie, Mstatus, BOOT_MSTATUS, SECONDARY_MIE, SECONDARY_MSTATUS};

/// `pmpaddr0` value covering the whole physical address space in NAPOT mode.
pub const PMP_ADDR_ALL: usize = usize::MAX >> 10;
/// `pmpcfg0` entry 0: R | W | X | A=NAPOT.
pub const PMP_CFG_NAPOT_RWX: usize = 0x1f;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    include_str!("arch/riscv/boot.S"),
    PMP_ADDR_ALL = const PMP_ADDR_ALL,
    PMP_CFG_NAPOT_RWX = const PMP_CFG_NAPOT_RWX,
    BOOT_MSTATUS = const BOOT_MSTATUS.bits(),
    SECONDARY_MSTATUS = const SECONDARY_MSTATUS.bits(),
    SECONDARY_MIE = const SECONDARY_MIE.bits(),
    MAX_HARTS = const MAX_HARTS,
    HART_STACK_SIZE = const HART_STACK_SIZE,
    FRAME_SIZE = const FRAME_SIZE,
);

/// Addresses the reset path consumes. Opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootSymbols {
    pub global_pointer: usize,
    pub bss: Range<usize>,
    pub stack_top: usize,
    /// Base of `__hart_frames`.
    pub frames: usize,
    pub kinit: usize,
    pub kinit_hart: usize,
    pub trap_vector: usize,
    pub park: usize,
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    #[link_name = "__global_pointer$"]
    static GLOBAL_POINTER: u8;
    static __bss_start: u8;
    static __bss_end: u8;
    static __stack_top: u8;
    fn kinit() -> !;
    fn kinit_hart(hart: usize) -> !;
    fn __boot_park() -> !;
}

impl BootSymbols {
    /// Symbols as resolved by the linker for this image.
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn linked() -> Self {
        use core::ptr::addr_of;
        // SAFETY: linker-provided symbols; only their addresses are taken.
        let (gp, bss_start, bss_end, stack_top) = unsafe {
            (
                addr_of!(GLOBAL_POINTER) as usize,
                addr_of!(__bss_start) as usize,
                addr_of!(__bss_end) as usize,
                addr_of!(__stack_top) as usize,
            )
        };
        Self {
            global_pointer: gp,
            bss: bss_start..bss_end,
            stack_top,
            frames: crate::hart::kernel_frames_base(),
            kinit: kinit as usize,
            kinit_hart: kinit_hart as usize,
            trap_vector: crate::trap::vector_address(),
            park: __boot_park as usize,
        }
    }
}

/// What `_start` programs on one hart before its `mret`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootPlan {
    pub hart: HartId,
    pub clears_bss: bool,
    pub stack_top: usize,
    pub mstatus: Mstatus,
    pub mie: Mie,
    pub entry: usize,
    /// Value of `ra` at the drop; an initializer that returns lands here.
    pub return_to: usize,
    pub trap_vector: usize,
    pub kernel_frame: usize,
}

impl BootPlan {
    /// Plan for raw `mhartid`; `None` for harts that park at reset.
    pub fn for_hart(raw: usize, symbols: &BootSymbols) -> Option<Self> {
        let hart = HartId::new(raw)?;
        let kernel_frame = symbols.frames + hart.as_index() * FRAME_SIZE;
        let stack_top = boot_stack_range(symbols.stack_top, hart).end;
        let plan = if hart.is_boot() {
            Self {
                hart,
                clears_bss: symbols.bss.start < symbols.bss.end,
                stack_top,
                mstatus: BOOT_MSTATUS,
                mie: Mie::empty(),
                entry: symbols.kinit,
                return_to: symbols.park,
                trap_vector: symbols.trap_vector,
                kernel_frame,
            }
        } else {
            Self {
                hart,
                clears_bss: false,
                stack_top,
                mstatus: SECONDARY_MSTATUS,
                mie: SECONDARY_MIE,
                entry: symbols.kinit_hart,
                return_to: symbols.park,
                trap_vector: symbols.trap_vector,
                kernel_frame,
            }
        };
        Some(plan)
    }
}

/// Zeroes `[start, end)` a doubleword at a time, like the reset loop.
/// Returns the number of doublewords written; an empty or inverted range writes none.
///
/// # Safety
/// The range must be valid for writes and 8-byte aligned.
pub unsafe fn clear_region(start: *mut u64, end: *mut u64) -> usize {
    let mut cursor = start;
    let mut written = 0;
    if cursor >= end {
        return 0;
    }
    while cursor < end {
        // SAFETY: caller guarantees the range is writable.
        unsafe {
            core::ptr::write_volatile(cursor, 0);
            cursor = cursor.add(1);
        }
        written += 1;
    }
    written
}
