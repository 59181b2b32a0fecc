// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Software hart replaying the boot, trap, switch and syscall assembly
//! OWNERS: @kernel-arch-team
//! STATUS: Functional (host builds only)
//! TEST_COVERAGE: Unit tests + property tests (tests_prop.rs)
//! PUBLIC API: SoftHart, Csrs, TrapHandler, BootOutcome, SimError, TRAP_VECTOR
//! INVARIANTS: Each method performs the same register/CSR steps, in the same
//! order, as its routine in `arch/riscv/*.S`, using the same constants
//!
//! Memory is not modelled. The frame that `mscratch` designates is passed in
//! as `&mut TrapFrame` and its address is checked against the CSR, so a
//! frame mix-up surfaces as [`SimError::ScratchMismatch`].

use core::fmt;

use crate::boot::{clear_region, BootPlan, BootSymbols, PMP_ADDR_ALL, PMP_CFG_NAPOT_RWX};
use crate::frame::{reg, TrapFrame, REG_COUNT};
use crate::hart::trap_stack_top;
use crate::status::{context_mstatus_word, Mie, Mstatus, PrivilegeMode, CONTEXT_MIE};
use crate::trap::{ecall_cause_for, TrapArgs};

/// Address the software hart treats as `__trap_vector`.
pub const TRAP_VECTOR: usize = 0x8000_0100;

/// Stand-in for `__trap_rust`. The return value is the resume pc.
pub trait TrapHandler {
    fn handle(&mut self, args: &TrapArgs, frame: &mut TrapFrame) -> usize;
}

impl<F> TrapHandler for F
where
    F: FnMut(&TrapArgs, &mut TrapFrame) -> usize,
{
    fn handle(&mut self, args: &TrapArgs, frame: &mut TrapFrame) -> usize {
        self(args, frame)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Csrs {
    pub mstatus: usize,
    pub mepc: usize,
    pub mcause: usize,
    pub mtval: usize,
    pub mscratch: usize,
    pub mtvec: usize,
    pub mie: usize,
    pub satp: usize,
    pub mhartid: usize,
    pub pmpaddr0: usize,
    pub pmpcfg0: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimError {
    /// `mtvec` does not point at the trap vector.
    NoVector { mtvec: usize },
    /// The frame passed in is not the one `mscratch` designates.
    ScratchMismatch { expected: usize, found: usize },
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoVector { mtvec } => write!(f, "mtvec 0x{:x} is not the trap vector", mtvec),
            Self::ScratchMismatch { expected, found } => {
                write!(f, "mscratch 0x{:x} but frame at 0x{:x}", found, expected)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootOutcome {
    /// `mret` taken; the hart now runs `pc` at `mode`.
    Dropped { mode: PrivilegeMode, pc: usize, cleared: usize },
    /// Hart id beyond the ceiling; sitting in `__boot_park`.
    Parked,
}

/// One hart's architectural state.
#[derive(Clone, Debug)]
pub struct SoftHart {
    pub x: [usize; REG_COUNT],
    pub f: [u64; REG_COUNT],
    pub csr: Csrs,
    pub mode: PrivilegeMode,
    pub pc: usize,
    last_mstatus_write: Option<usize>,
    handler_sp: Option<usize>,
}

#[inline]
fn addr_of_frame(frame: &TrapFrame) -> usize {
    frame as *const TrapFrame as usize
}

impl SoftHart {
    /// A hart out of reset: machine mode, everything zero.
    pub fn new(hartid: usize) -> Self {
        Self {
            x: [0; REG_COUNT],
            f: [0; REG_COUNT],
            csr: Csrs { mhartid: hartid, ..Csrs::default() },
            mode: PrivilegeMode::Machine,
            pc: 0,
            last_mstatus_write: None,
            handler_sp: None,
        }
    }

    /// x0 reads as zero whatever the array holds.
    #[inline]
    pub fn read_x(&self, index: usize) -> usize {
        if index == reg::ZERO {
            0
        } else {
            self.x[index]
        }
    }

    #[inline]
    fn set_x(&mut self, index: usize, value: usize) {
        if index != reg::ZERO {
            self.x[index] = value;
        }
    }

    #[inline]
    fn write_mstatus(&mut self, value: usize) {
        self.csr.mstatus = value;
        self.last_mstatus_write = Some(value);
    }

    /// Last value an explicit `csrw mstatus` stored.
    pub fn last_mstatus_write(&self) -> Option<usize> {
        self.last_mstatus_write
    }

    /// `sp` the most recent handler call ran on.
    pub fn handler_sp(&self) -> Option<usize> {
        self.handler_sp
    }

    pub fn status(&self) -> Mstatus {
        Mstatus::from_bits_retain(self.csr.mstatus)
    }

    /// Points `mscratch` at `frame` and `mtvec` at the vector, as boot does.
    pub fn install_frame(&mut self, frame: &TrapFrame) {
        self.csr.mscratch = addr_of_frame(frame);
        self.csr.mtvec = TRAP_VECTOR;
    }

    // ——— hardware behaviour ———

    fn enter_trap(&mut self, mcause: usize, tval: usize) -> Result<(), SimError> {
        if self.csr.mtvec != TRAP_VECTOR {
            return Err(SimError::NoVector { mtvec: self.csr.mtvec });
        }
        let status = self.status();
        let mut next = status.with_mpp(self.mode);
        next.set(Mstatus::MPIE, status.contains(Mstatus::MIE));
        next.remove(Mstatus::MIE);
        self.csr.mstatus = next.bits();
        self.csr.mepc = self.pc;
        self.csr.mcause = mcause;
        self.csr.mtval = tval;
        self.mode = PrivilegeMode::Machine;
        self.pc = self.csr.mtvec;
        Ok(())
    }

    fn mret(&mut self) {
        let status = self.status();
        let target = status.mpp().unwrap_or(PrivilegeMode::User);
        let mut next = status.with_mpp(PrivilegeMode::User);
        next.set(Mstatus::MIE, status.contains(Mstatus::MPIE));
        next.insert(Mstatus::MPIE);
        self.csr.mstatus = next.bits();
        self.mode = target;
        self.pc = self.csr.mepc;
    }

    #[inline]
    fn fp_dirty(&self) -> bool {
        self.status().fp_dirty()
    }

    // ——— __trap_vector ———

    /// Raises a trap with `mcause`/`tval` and runs the vector through `mret`.
    pub fn trap<H: TrapHandler>(
        &mut self,
        mcause: usize,
        tval: usize,
        frame: &mut TrapFrame,
        handler: &mut H,
    ) -> Result<TrapArgs, SimError> {
        self.enter_trap(mcause, tval)?;
        self.run_vector(frame, handler)
    }

    /// `__trap_vector` from its first instruction; the hart must already be in the trap.
    pub fn run_vector<H: TrapHandler>(
        &mut self,
        frame: &mut TrapFrame,
        handler: &mut H,
    ) -> Result<TrapArgs, SimError> {
        // csrrw t6, mscratch, t6
        let interrupted_t6 = self.x[reg::T6];
        self.x[reg::T6] = self.csr.mscratch;
        self.csr.mscratch = interrupted_t6;
        let base = self.x[reg::T6];
        if base != addr_of_frame(frame) {
            return Err(SimError::ScratchMismatch { expected: addr_of_frame(frame), found: base });
        }
        for i in 0..reg::T6 {
            frame.regs[i] = self.read_x(i);
        }
        // mv t5, t6; csrr t6, mscratch; sd t6, 31*8(t5); csrw mscratch, t5
        self.set_x(reg::T5, self.x[reg::T6]);
        self.set_x(reg::T6, self.csr.mscratch);
        frame.regs[reg::T6] = self.x[reg::T6];
        self.csr.mscratch = self.x[reg::T5];

        if self.fp_dirty() {
            frame.fregs = self.f;
        }

        let args = TrapArgs {
            epc: self.csr.mepc,
            tval: self.csr.mtval,
            cause: self.csr.mcause,
            hart: self.csr.mhartid,
            status: self.csr.mstatus,
        };
        frame.pc = args.epc;
        self.set_x(reg::A0, args.epc);
        self.set_x(reg::A1, args.tval);
        self.set_x(reg::A2, args.cause);
        self.set_x(reg::A3, args.hart);
        self.set_x(reg::A4, args.status);
        self.set_x(reg::A5, self.csr.mscratch);
        self.set_x(reg::SP, trap_stack_top(args.hart));
        self.handler_sp = Some(self.x[reg::SP]);

        let resume = handler.handle(&args, frame);
        self.set_x(reg::A0, resume);

        self.csr.mepc = self.x[reg::A0];
        self.set_x(reg::T6, self.csr.mscratch);
        if self.x[reg::T6] != addr_of_frame(frame) {
            return Err(SimError::ScratchMismatch { expected: addr_of_frame(frame), found: self.x[reg::T6] });
        }
        if self.fp_dirty() {
            self.f = frame.fregs;
        }
        for i in 1..REG_COUNT {
            self.x[i] = frame.regs[i];
        }
        self.mret();
        Ok(args)
    }

    // ——— __switch_to_context ———

    /// Installs `frame` and drops into it.
    pub fn switch_to(&mut self, frame: &TrapFrame) {
        let addr = addr_of_frame(frame);
        self.set_x(reg::A0, addr);
        self.csr.mscratch = addr;
        self.set_x(reg::A1, frame.pc);
        self.set_x(reg::A2, frame.satp);
        self.set_x(reg::A3, frame.mode);
        let status = context_mstatus_word(self.x[reg::A3]);
        self.set_x(reg::T0, status);
        self.write_mstatus(status);
        self.csr.mepc = self.x[reg::A1];
        self.csr.satp = self.x[reg::A2];
        self.csr.mie = CONTEXT_MIE.bits();
        self.csr.mtvec = TRAP_VECTOR;
        self.set_x(reg::T6, addr);
        self.f = frame.fregs;
        for i in 1..REG_COUNT {
            self.x[i] = frame.regs[i];
        }
        self.mret();
    }

    // ——— __syscall_trampoline ———

    /// Calls the trampoline with the C convention and returns its a0.
    pub fn call_trampoline<H: TrapHandler>(
        &mut self,
        number: usize,
        args: [usize; 6],
        frame: &mut TrapFrame,
        handler: &mut H,
    ) -> Result<usize, SimError> {
        self.set_x(reg::A0, number);
        for (i, value) in args.iter().enumerate() {
            self.set_x(reg::A1 + i, *value);
        }
        // mv a7, a0; mv a0, a1; ... mv a5, a6
        self.set_x(reg::A7, self.x[reg::A0]);
        for i in 0..6 {
            self.set_x(reg::A0 + i, self.x[reg::A1 + i]);
        }
        self.trap(ecall_cause_for(self.mode), 0, frame, handler)?;
        // ret
        self.pc = self.x[reg::RA];
        Ok(self.x[reg::A0])
    }

    // ——— _start ———

    /// Runs `_start`. `bss` stands for the `__bss_start..__bss_end` memory.
    pub fn boot(&mut self, symbols: &BootSymbols, bss: &mut [u64]) -> BootOutcome {
        self.mode = PrivilegeMode::Machine;
        self.set_x(reg::GP, symbols.global_pointer);
        self.csr.mscratch = 0;
        self.csr.satp = 0;
        self.csr.pmpaddr0 = PMP_ADDR_ALL;
        self.csr.pmpcfg0 = PMP_CFG_NAPOT_RWX;
        self.set_x(reg::A0, self.csr.mhartid);

        let Some(plan) = BootPlan::for_hart(self.x[reg::A0], symbols) else {
            self.pc = symbols.park;
            return BootOutcome::Parked;
        };
        let mut cleared = 0;
        if plan.hart.is_boot() {
            let range = bss.as_mut_ptr_range();
            // SAFETY: the range comes from a live, exclusively borrowed slice.
            cleared = unsafe { clear_region(range.start, range.end) };
        }
        self.set_x(reg::SP, plan.stack_top);
        self.write_mstatus(plan.mstatus.bits());
        self.csr.mie = plan.mie.bits();
        self.csr.mscratch = plan.kernel_frame;
        self.csr.mepc = plan.entry;
        self.csr.mtvec = plan.trap_vector;
        self.set_x(reg::RA, plan.return_to);
        self.mret();
        BootOutcome::Dropped { mode: self.mode, pc: self.pc, cleared }
    }

    pub fn interrupt_sources(&self) -> Mie {
        Mie::from_bits_retain(self.csr.mie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::{HART_STACK_SIZE, MAX_HARTS};
    use crate::status::{FloatState, Mstatus};
    use crate::trap::TrapCause;

    fn symbols() -> BootSymbols {
        BootSymbols {
            global_pointer: 0x8000_8800,
            bss: 0x8002_0000..0x8002_0040,
            stack_top: 0x8010_0000,
            frames: 0x8003_0000,
            kinit: 0x8000_1000,
            kinit_hart: 0x8000_2000,
            trap_vector: TRAP_VECTOR,
            park: 0x8000_0080,
        }
    }

    fn resume_next(args: &TrapArgs, _frame: &mut TrapFrame) -> usize {
        args.epc + 4
    }

    #[test]
    fn boot_hart_clears_bss_and_drops_to_supervisor() {
        let mut hart = SoftHart::new(0);
        let mut bss = [0xffff_ffff_u64; 8];
        let outcome = hart.boot(&symbols(), &mut bss);
        assert_eq!(outcome, BootOutcome::Dropped { mode: PrivilegeMode::Supervisor, pc: 0x8000_1000, cleared: 8 });
        assert!(bss.iter().all(|w| *w == 0));
        assert_eq!(hart.x[reg::SP], 0x8010_0000);
        assert_eq!(hart.x[reg::GP], 0x8000_8800);
        assert_eq!(hart.x[reg::RA], 0x8000_0080);
        assert_eq!(hart.csr.satp, 0);
        assert_eq!(hart.csr.pmpcfg0, PMP_CFG_NAPOT_RWX);
        assert!(!hart.status().contains(Mstatus::MIE));
        assert!(hart.interrupt_sources().is_empty());
    }

    #[test]
    fn boot_with_empty_bss_proceeds() {
        let mut hart = SoftHart::new(0);
        let mut syms = symbols();
        syms.bss = 0x8002_0000..0x8002_0000;
        let outcome = hart.boot(&syms, &mut []);
        assert_eq!(outcome, BootOutcome::Dropped { mode: PrivilegeMode::Supervisor, pc: 0x8000_1000, cleared: 0 });
    }

    #[test]
    fn secondary_leaves_bss_alone() {
        let mut hart = SoftHart::new(1);
        let mut bss = [5u64; 4];
        let outcome = hart.boot(&symbols(), &mut bss);
        assert_eq!(outcome, BootOutcome::Dropped { mode: PrivilegeMode::Machine, pc: 0x8000_2000, cleared: 0 });
        assert_eq!(bss, [5; 4]);
        assert_eq!(hart.x[reg::A0], 1);
        assert_eq!(hart.x[reg::SP], 0x8010_0000 - HART_STACK_SIZE);
        assert_eq!(hart.interrupt_sources(), Mie::MSIE);
        assert_eq!(hart.csr.mtvec, TRAP_VECTOR);
        assert!(hart.status().contains(Mstatus::MIE));
    }

    #[test]
    fn harts_beyond_ceiling_park() {
        let mut hart = SoftHart::new(MAX_HARTS);
        assert_eq!(hart.boot(&symbols(), &mut []), BootOutcome::Parked);
        assert_eq!(hart.pc, 0x8000_0080);
    }

    #[test]
    fn trap_without_vector_is_rejected() {
        let mut hart = SoftHart::new(0);
        let mut frame = TrapFrame::zeroed();
        let err = hart.trap(2, 0, &mut frame, &mut resume_next).expect_err("no vector");
        assert_eq!(err, SimError::NoVector { mtvec: 0 });
    }

    #[test]
    fn trap_with_foreign_frame_is_rejected() {
        let mut hart = SoftHart::new(0);
        let installed = TrapFrame::zeroed();
        let mut other = TrapFrame::zeroed();
        hart.install_frame(&installed);
        let err = hart.trap(2, 0, &mut other, &mut resume_next).expect_err("mismatch");
        assert!(matches!(err, SimError::ScratchMismatch { .. }));
    }

    #[test]
    fn handler_runs_on_trap_stack_and_t6_survives() {
        let mut hart = SoftHart::new(2);
        let mut frame = TrapFrame::zeroed();
        hart.install_frame(&frame);
        hart.mode = PrivilegeMode::User;
        hart.pc = 0x4000;
        hart.x[reg::T6] = 0x6666;
        hart.x[reg::SP] = 0x7ff0;
        let args = hart.trap(TrapCause::BREAKPOINT, 0x4000, &mut frame, &mut resume_next).expect("trap");
        assert_eq!(args.hart, 2);
        assert_eq!(hart.handler_sp(), Some(trap_stack_top(2)));
        assert_eq!(frame.regs[reg::T6], 0x6666);
        assert_eq!(hart.x[reg::T6], 0x6666);
        assert_eq!(hart.x[reg::SP], 0x7ff0);
        assert_eq!(hart.csr.mscratch, addr_of_frame(&frame));
        assert_eq!(hart.mode, PrivilegeMode::User);
        assert_eq!(hart.pc, 0x4004);
    }

    #[test]
    fn switch_sets_interrupts_vector_and_satp() {
        let mut hart = SoftHart::new(0);
        let mut frame = TrapFrame::new(0x8040_0000, 0x8050_0000, 0x8000_0000_0008_0400, PrivilegeMode::User);
        frame.fregs[3] = 0x4008_0000_0000_0000;
        hart.switch_to(&frame);
        assert_eq!(hart.csr.satp, 0x8000_0000_0008_0400);
        assert_eq!(hart.interrupt_sources(), Mie::all());
        assert_eq!(hart.csr.mtvec, TRAP_VECTOR);
        assert_eq!(hart.f[3], 0x4008_0000_0000_0000);
        assert_eq!(hart.x[reg::SP], 0x8050_0000);
        assert_eq!(hart.pc, 0x8040_0000);
        assert_eq!(hart.mode, PrivilegeMode::User);
        assert_eq!(hart.status().fs(), FloatState::Dirty);
    }

    #[test]
    fn error_display() {
        let text = format!("{}", SimError::NoVector { mtvec: 0x10 });
        assert_eq!(text, "mtvec 0x10 is not the trap vector");
    }
}

#[cfg(test)]
mod tests_prop;
