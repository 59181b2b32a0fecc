// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hart identity, per-hart stacks and the per-hart active-frame table
//! OWNERS: @kernel-arch-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + property tests (tests_prop.rs)
//! PUBLIC API: HartId, MAX_HARTS, boot_stack_range(), trap_stack_range(),
//! StackLayout, kernel_frame(), current_frame(), set_current_frame()
//! DEPENDS_ON: riscv (mhartid), linker symbols __stack_bottom/__stack_top
//! INVARIANTS: Stack regions of distinct harts never overlap; exactly one
//! active frame slot per hart, never a single global
//!
//! Boot stacks are carved downward from `__stack_top`, one
//! [`HART_STACK_SIZE`] region per hart. Trap stacks are a separate static
//! array indexed upward, so a trap never runs on the interrupted stack.

use core::fmt;
use core::ops::Range;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::frame::TrapFrame;

/// Fixed hart ceiling; harts at or above it park at boot.
pub const MAX_HARTS: usize = 4;
/// Boot stack reserved per hart below `__stack_top`.
pub const HART_STACK_SIZE: usize = 0x1_0000;
/// Kernel stack the trap vector switches to, per hart.
pub const TRAP_STACK_SIZE: usize = 16 * 1024;
/// Required alignment of every stack top (RISC-V psABI).
pub const STACK_ALIGN: usize = 16;

/// Hardware hart identifier as reported by `mhartid`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HartId(u16);

impl HartId {
    /// The hart that clears `.bss` and runs the kernel initializer.
    pub const BOOT: Self = Self(0);

    /// Checked constructor; `None` for harts this kernel does not run.
    #[inline]
    pub const fn new(raw: usize) -> Option<Self> {
        if raw < MAX_HARTS {
            Some(Self(raw as u16))
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_boot(self) -> bool {
        self.0 == Self::BOOT.0
    }

    /// The calling hart, `None` past [`MAX_HARTS`]. Machine mode only.
    #[inline]
    pub fn current() -> Option<Self> {
        Self::new(current_raw())
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[inline]
pub(crate) fn current_raw() -> usize {
    riscv::register::mhartid::read()
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
#[inline]
pub(crate) fn current_raw() -> usize {
    HartId::BOOT.as_index()
}

impl fmt::Display for HartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hart{}", self.0)
    }
}

/// Boot stack of `hart` below `stack_top`: `top - hart * HART_STACK_SIZE`.
#[inline]
pub const fn boot_stack_range(stack_top: usize, hart: HartId) -> Range<usize> {
    let top = stack_top - hart.as_index() * HART_STACK_SIZE;
    (top - HART_STACK_SIZE)..top
}

#[repr(C, align(16))]
pub struct TrapStack([u8; TRAP_STACK_SIZE]);

#[allow(non_upper_case_globals)]
/// Per-hart trap stacks. The vector computes `__trap_stacks + (hart + 1) * TRAP_STACK_SIZE`.
#[no_mangle]
pub static mut __trap_stacks: [TrapStack; MAX_HARTS] =
    [const { TrapStack([0; TRAP_STACK_SIZE]) }; MAX_HARTS];

#[allow(non_upper_case_globals)]
/// Per-hart kernel frames installed in `mscratch` at boot so a hart can always trap.
#[no_mangle]
pub static mut __hart_frames: [TrapFrame; MAX_HARTS] = [const { TrapFrame::zeroed() }; MAX_HARTS];

/// Top of the trap stack for a raw hart index, exactly as the vector computes it.
#[inline]
pub fn trap_stack_top(raw_hart: usize) -> usize {
    // SAFETY: only the address is taken.
    let base = unsafe { ptr::addr_of!(__trap_stacks) } as usize;
    base + (raw_hart + 1) * TRAP_STACK_SIZE
}

#[inline]
pub fn trap_stack_range(hart: HartId) -> Range<usize> {
    let top = trap_stack_top(hart.as_index());
    (top - TRAP_STACK_SIZE)..top
}

/// Base of the per-hart kernel frame array (what the boot code indexes).
#[inline]
pub fn kernel_frames_base() -> usize {
    // SAFETY: only the address is taken.
    unsafe { ptr::addr_of!(__hart_frames) as usize }
}

/// The static kernel frame of `hart`.
#[inline]
pub fn kernel_frame(hart: HartId) -> NonNull<TrapFrame> {
    // SAFETY: bounded index into static storage; only the address is taken.
    let frame = unsafe { ptr::addr_of_mut!(__hart_frames[hart.as_index()]) };
    // `addr_of_mut!` on a static is never null.
    NonNull::new(frame).unwrap_or(NonNull::dangling())
}

// ——— per-hart active frame table ———

static CURRENT_FRAMES: [AtomicPtr<TrapFrame>; MAX_HARTS] =
    [const { AtomicPtr::new(ptr::null_mut()) }; MAX_HARTS];

/// Records `frame` as the active frame of `hart`.
///
/// The hardware copy lives in `mscratch`; this table is what Rust code reads.
#[inline]
pub fn set_current_frame(hart: HartId, frame: NonNull<TrapFrame>) {
    CURRENT_FRAMES[hart.as_index()].store(frame.as_ptr(), Ordering::Release);
}

#[inline]
pub fn current_frame(hart: HartId) -> Option<NonNull<TrapFrame>> {
    NonNull::new(CURRENT_FRAMES[hart.as_index()].load(Ordering::Acquire))
}

/// Adopts the kernel frame the boot sequencer already placed in `mscratch`.
pub fn install_kernel_frame(hart: HartId) {
    set_current_frame(hart, kernel_frame(hart));
}

#[cfg(test)]
pub(crate) static TEST_LOCK: spin::Mutex<()> = spin::Mutex::new(());

#[cfg(test)]
pub(crate) fn reset_current_frames() {
    for slot in &CURRENT_FRAMES {
        slot.store(ptr::null_mut(), Ordering::Release);
    }
}

// ——— linker-provided boot stack region ———

/// Reasons the boot stack region cannot host the configured harts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutError {
    NoHarts,
    TooManyHarts { harts: usize },
    Misaligned { top: usize },
    RegionTooSmall { needed: usize, available: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHarts => f.write_str("no harts configured"),
            Self::TooManyHarts { harts } => {
                write!(f, "{} harts requested, at most {} supported", harts, MAX_HARTS)
            }
            Self::Misaligned { top } => write!(f, "stack top 0x{:x} not 16-byte aligned", top),
            Self::RegionTooSmall { needed, available } => {
                write!(f, "stack region 0x{:x} bytes, need 0x{:x}", available, needed)
            }
        }
    }
}

/// Validated boot stack region shared by `harts` harts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackLayout {
    bottom: usize,
    top: usize,
    harts: usize,
}

impl StackLayout {
    pub fn new(bottom: usize, top: usize, harts: usize) -> Result<Self, LayoutError> {
        if harts == 0 {
            return Err(LayoutError::NoHarts);
        }
        if harts > MAX_HARTS {
            return Err(LayoutError::TooManyHarts { harts });
        }
        if top % STACK_ALIGN != 0 {
            return Err(LayoutError::Misaligned { top });
        }
        let needed = harts * HART_STACK_SIZE;
        let available = top.saturating_sub(bottom);
        if available < needed {
            return Err(LayoutError::RegionTooSmall { needed, available });
        }
        Ok(Self { bottom, top, harts })
    }

    /// Region between `__stack_bottom` and `__stack_top` for [`MAX_HARTS`].
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn from_linker() -> Result<Self, LayoutError> {
        extern "C" {
            static __stack_bottom: u8;
            static __stack_top: u8;
        }
        // SAFETY: linker symbols; only their addresses are used.
        let (bottom, top) = unsafe {
            (ptr::addr_of!(__stack_bottom) as usize, ptr::addr_of!(__stack_top) as usize)
        };
        Self::new(bottom, top, MAX_HARTS)
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    #[inline]
    pub fn bottom(&self) -> usize {
        self.bottom
    }

    #[inline]
    pub fn harts(&self) -> usize {
        self.harts
    }

    /// Stack of `hart`, `None` if the hart is outside this layout.
    pub fn stack(&self, hart: HartId) -> Option<Range<usize>> {
        if hart.as_index() >= self.harts {
            return None;
        }
        Some(boot_stack_range(self.top, hart))
    }
}


#[cfg(test)]
mod tests_prop;
