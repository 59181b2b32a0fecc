// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Machine status / interrupt-enable encodings used by the boot
//! sequencer, the trap vector and the context switcher
//! OWNERS: @kernel-arch-team
//! PUBLIC API: Mstatus, Mie, PrivilegeMode, FloatState, context_mstatus(),
//! BOOT_MSTATUS, SECONDARY_MSTATUS, SECONDARY_MIE, CONTEXT_MSTATUS, CONTEXT_MIE
//! INVARIANTS: Every word the assembly writes to `mstatus`/`mie` is defined here

use bitflags::bitflags;

/// Bit position of the `mstatus.MPP` field.
pub const MPP_SHIFT: usize = 11;
/// Bit position of the `mstatus.FS` field.
pub const FS_SHIFT: usize = 13;
/// Width mask of the two-bit `MPP` and `FS` fields.
pub const FIELD_MASK: usize = 0b11;

bitflags! {
    /// `mstatus` bits touched by this layer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mstatus: usize {
        const SIE = 1 << 1;
        const MIE = 1 << 3;
        const SPIE = 1 << 5;
        const MPIE = 1 << 7;
        const SPP = 1 << 8;
        const MPP = FIELD_MASK << MPP_SHIFT;
        const FS = FIELD_MASK << FS_SHIFT;
        const MPRV = 1 << 17;
    }
}

bitflags! {
    /// `mie` interrupt sources.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mie: usize {
        const SSIE = 1 << 1;
        const MSIE = 1 << 3;
        const STIE = 1 << 5;
        const MTIE = 1 << 7;
        const SEIE = 1 << 9;
        const MEIE = 1 << 11;
    }
}

/// Privilege level a context runs at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum PrivilegeMode {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

impl PrivilegeMode {
    pub const fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            0 => Some(Self::User),
            1 => Some(Self::Supervisor),
            3 => Some(Self::Machine),
            _ => None,
        }
    }

    #[inline]
    pub const fn bits(self) -> usize {
        self as usize
    }
}

/// State of the floating-point unit as tracked by `mstatus.FS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum FloatState {
    Off = 0,
    Initial = 1,
    Clean = 2,
    Dirty = 3,
}

impl FloatState {
    pub const fn from_bits(bits: usize) -> Self {
        match bits & FIELD_MASK {
            0 => Self::Off,
            1 => Self::Initial,
            2 => Self::Clean,
            _ => Self::Dirty,
        }
    }
}

impl Mstatus {
    #[inline]
    pub const fn with_mpp(self, mode: PrivilegeMode) -> Self {
        Self::from_bits_retain((self.bits() & !Self::MPP.bits()) | (mode.bits() << MPP_SHIFT))
    }

    #[inline]
    pub const fn with_fs(self, fs: FloatState) -> Self {
        Self::from_bits_retain((self.bits() & !Self::FS.bits()) | ((fs as usize) << FS_SHIFT))
    }

    /// Decoded `MPP`; `None` for the reserved encoding.
    #[inline]
    pub const fn mpp(self) -> Option<PrivilegeMode> {
        PrivilegeMode::from_bits((self.bits() >> MPP_SHIFT) & FIELD_MASK)
    }

    #[inline]
    pub const fn fs(self) -> FloatState {
        FloatState::from_bits(self.bits() >> FS_SHIFT)
    }

    /// The exact test the trap vector performs before touching `f0..f31`.
    #[inline]
    pub const fn fp_dirty(self) -> bool {
        (self.bits() >> FS_SHIFT) & FIELD_MASK == FloatState::Dirty as usize
    }
}

/// Boot hart: drop to supervisor with interrupts disabled and the FPU usable.
pub const BOOT_MSTATUS: Mstatus =
    Mstatus::empty().with_mpp(PrivilegeMode::Supervisor).with_fs(FloatState::Initial);

/// Secondary harts stay in machine mode with interrupts re-enabled on `mret`.
pub const SECONDARY_MSTATUS: Mstatus =
    Mstatus::MPIE.with_mpp(PrivilegeMode::Machine).with_fs(FloatState::Initial);

/// Secondary harts only listen for software interrupts (IPIs).
pub const SECONDARY_MIE: Mie = Mie::MSIE;

/// Base word for a context switch: FPU dirty, fixed interrupt-enable pattern.
/// The target privilege is ORed into `MPP` by the switcher.
pub const CONTEXT_MSTATUS: Mstatus =
    Mstatus::MPIE.union(Mstatus::SPIE).with_fs(FloatState::Dirty);

/// Interrupt sources enabled for every switched-in context (`0xaaa`).
pub const CONTEXT_MIE: Mie = Mie::all();

/// `mstatus` written by the context switcher for a frame's raw `mode` field.
///
/// Mirrors `andi/slli/or` in the switcher: junk above the two field bits is
/// dropped rather than leaking into neighbouring status bits.
#[inline]
pub const fn context_mstatus_word(mode_field: usize) -> usize {
    CONTEXT_MSTATUS.bits() | ((mode_field & FIELD_MASK) << MPP_SHIFT)
}

#[inline]
pub const fn context_mstatus(mode: PrivilegeMode) -> Mstatus {
    Mstatus::from_bits_retain(context_mstatus_word(mode.bits()))
}
