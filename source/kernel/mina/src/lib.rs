// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Lowest layer of the MINA kernel: boot handoff, machine trap vector,
//! context switch into a scheduled frame and the syscall trampoline
//! OWNERS: @kernel-arch-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Host unit + property tests (software hart backend in `sim`)
//! PUBLIC API: boot::BootPlan, frame::TrapFrame, hart::*, status::*, switch::switch_to,
//! syscall::syscall, trap::{install_vector, TrapArgs, TrapCause}
//! DEPENDS_ON: riscv (CSR access), spin, bitflags, static_assertions
//! INVARIANTS: One active TrapFrame per hart, addressed through `mscratch`;
//! the same Rust constants feed the assembly and the host backend
//!
//! The assembly lives in `arch/riscv/*.S` and is pulled in with
//! `global_asm!` on the OS target only. Every offset, status word and stack
//! size it uses is passed in as a `const` operand from this crate, so the
//! software hart in [`sim`] executes exactly the sequence the hardware runs.

#![cfg_attr(not(test), no_std)]
#![forbid(clippy::unwrap_used)]
#![deny(unsafe_op_in_unsafe_fn)]

#[macro_use]
pub mod log;

pub mod arch;
pub mod boot;
pub mod frame;
pub mod hart;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod panic;
pub mod status;
pub mod switch;
pub mod syscall;
pub mod trap;
pub mod uart;

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub mod sim;

pub use frame::TrapFrame;
pub use hart::HartId;
pub use status::PrivilegeMode;
