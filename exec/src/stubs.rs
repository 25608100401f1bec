//! Shared stubs emitted at the start of the code cache.
//!
//! Register conventions between stubs and compiled sequences:
//! `rbp` holds the state pointer, `edi` carries the guest PC (bit 0
//! set when the PC names an instruction in a delay slot), `esi` the
//! faulting virtual address of TLB exceptions.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_backend::HostCodeGen;
use mips3_core::cop0::*;
use mips3_core::state::*;
use mips3_core::tlb::TLB_NO_READ;
use mips3_core::Exception;

use crate::entry::{L1_BITS, L2_MASK};
use crate::faults::{helper_find_fault_handler, FaultSites};
use crate::Drc;

/// Exit codes returned by the entry function.
pub const EXIT_CYCLES: u32 = 0;
pub const EXIT_RECOMPILE: u32 = 1;
pub const EXIT_LOST_FAULT: u32 = 2;

/// Code cache offsets of the shared stubs.
#[derive(Debug, Clone, Default)]
pub struct Stubs {
    pub entry: usize,
    /// Jump to the code for the PC in `edi`.
    pub dispatch: usize,
    /// Store `edi` as the PC and ask the host to recompile.
    pub miss: usize,
    /// Store `edi` as the PC and return: the slice is used up.
    pub exit_cycles: usize,
    pub lost_fault: usize,
    /// Re-check the page of the PC in `edi` after a guard failed.
    pub tlb_mismatch: usize,
    /// Route a trampoline fault to its call-site finisher.
    pub find_handler: usize,
    pub exceptions: [usize; 9],
}

impl Stubs {
    #[inline]
    pub fn exception(&self, exc: Exception) -> usize {
        self.exceptions[exc.stub_index()]
    }
}

impl Drc {
    /// Emit every shared stub into the (just reset) code cache.
    pub(crate) fn emit_stubs(&mut self) {
        self.codegen.emit_epilogue(&mut self.buf);
        self.emit_dispatch_stub();

        self.stubs.miss = self.buf.offset();
        emit_store(&mut self.buf, false, P1, AREG0, PC_OFFSET);
        self.codegen.emit_exit(&mut self.buf, EXIT_RECOMPILE);

        self.stubs.exit_cycles = self.buf.offset();
        emit_store(&mut self.buf, false, P1, AREG0, PC_OFFSET);
        self.codegen.emit_exit(&mut self.buf, EXIT_CYCLES);

        self.stubs.lost_fault = self.buf.offset();
        self.codegen.emit_exit(&mut self.buf, EXIT_LOST_FAULT);

        for (i, exc) in Exception::STUBS.iter().enumerate() {
            self.stubs.exceptions[i] = self.emit_exception_stub(*exc);
        }
        self.emit_tlb_mismatch_stub();
        self.emit_find_handler_stub();
        self.emit_entry_stub();
    }

    fn emit_dispatch_stub(&mut self) {
        self.stubs.dispatch = self.buf.offset();
        let l1 = self.entries.l1_ptr() as u64;
        let b = &mut self.buf;
        emit_mov_rr(b, false, Reg::Rax, P1);
        emit_shift_ri(b, ShiftOp::Shr, false, Reg::Rax, L1_BITS as u8);
        emit_mov_ri64(b, Reg::Rdx, l1);
        emit_load_sib(b, true, Reg::Rdx, Reg::Rdx, Reg::Rax, 3);
        emit_mov_rr(b, false, Reg::Rax, P1);
        emit_shift_ri(b, ShiftOp::Shr, false, Reg::Rax, 2);
        emit_arith_ri(b, ArithOp::And, false, Reg::Rax, L2_MASK as i32);
        emit_jmp_sib(b, Reg::Rdx, Reg::Rax, 3);
    }

    /// Sign-extend `eax` and store it to the 64-bit COP0 slot.
    fn store_cop0_sext(&mut self, offset: i32) {
        emit_movsx(&mut self.buf, OPC_MOVSLQ, Reg::Rax, Reg::Rax);
        emit_store(&mut self.buf, true, Reg::Rax, AREG0, offset);
    }

    fn emit_exception_stub(&mut self, exc: Exception) -> usize {
        let start = self.buf.offset();

        if exc.is_tlb() {
            let b = &mut self.buf;
            emit_movsx(b, OPC_MOVSLQ, Reg::Rax, P2);
            emit_store(b, true, Reg::Rax, AREG0, BADVADDR_OFFSET);

            emit_load(b, false, Reg::Rax, AREG0, ENTRYHI_OFFSET);
            emit_arith_ri(b, ArithOp::And, false, Reg::Rax, 0xff);
            emit_mov_rr(b, false, Reg::Rcx, P2);
            emit_arith_ri(b, ArithOp::And, false, Reg::Rcx, 0xffff_e000u32 as i32);
            emit_arith_rr(b, ArithOp::Or, false, Reg::Rax, Reg::Rcx);
            self.store_cop0_sext(ENTRYHI_OFFSET);

            let b = &mut self.buf;
            emit_load(b, false, Reg::Rax, AREG0, CONTEXT_OFFSET);
            emit_arith_ri(b, ArithOp::And, false, Reg::Rax, 0xff80_0000u32 as i32);
            emit_mov_rr(b, false, Reg::Rcx, P2);
            emit_shift_ri(b, ShiftOp::Shr, false, Reg::Rcx, 9);
            emit_arith_ri(b, ArithOp::And, false, Reg::Rcx, 0x007f_fff0);
            emit_arith_rr(b, ArithOp::Or, false, Reg::Rax, Reg::Rcx);
            self.store_cop0_sext(CONTEXT_OFFSET);
        }

        let mut not_delay = mips3_core::Label::new();
        let b = &mut self.buf;
        emit_load(b, false, Reg::Rax, AREG0, CAUSE_OFFSET);
        emit_arith_ri(b, ArithOp::And, false, Reg::Rax, !CAUSE_CLEAR_ON_EXCEPTION as i32);
        emit_test_ri(b, false, P1, 1);
        emit_jcc_label(b, X86Cond::Je, &mut not_delay);
        emit_arith_ri(b, ArithOp::Or, false, Reg::Rax, CAUSE_BD as i32);
        emit_arith_ri(b, ArithOp::Sub, false, P1, 5);
        bind_label(b, &mut not_delay);

        emit_movsx(b, OPC_MOVSLQ, Reg::Rcx, P1);
        emit_store(b, true, Reg::Rcx, AREG0, EPC_OFFSET);
        if exc.code() != 0 {
            emit_arith_ri(b, ArithOp::Or, false, Reg::Rax, (exc.code() << 2) as i32);
        }
        self.store_cop0_sext(CAUSE_OFFSET);

        let b = &mut self.buf;
        emit_load(b, false, Reg::Rax, AREG0, STATUS_OFFSET);
        emit_arith_ri(b, ArithOp::Or, false, Reg::Rax, SR_EXL as i32);
        self.store_cop0_sext(STATUS_OFFSET);

        let dispatch = self.stubs.dispatch;
        let b = &mut self.buf;
        emit_test_ri(b, false, Reg::Rax, SR_BEV);
        emit_mov_ri(b, false, P1, (VECTOR_BASE_RAM + exc.vector_offset()) as u64);
        emit_jcc(b, X86Cond::Je, dispatch);
        emit_mov_ri(b, false, P1, (VECTOR_BASE_BEV + exc.vector_offset()) as u64);
        emit_jmp(b, dispatch);
        start
    }

    fn emit_tlb_mismatch_stub(&mut self) {
        self.stubs.tlb_mismatch = self.buf.offset();
        let tlb_load = self.stubs.exception(Exception::TlbLoad);
        let miss = self.stubs.miss;
        let mut remapped = mips3_core::Label::new();
        let mut at_branch = mips3_core::Label::new();

        let b = &mut self.buf;
        emit_mov_rr(b, false, Reg::Rax, P1);
        emit_shift_ri(b, ShiftOp::Shr, false, Reg::Rax, 12);
        emit_load(b, true, Reg::Rdx, AREG0, TLB_TABLE_OFFSET);
        emit_load_sib(b, false, Reg::Rdx, Reg::Rdx, Reg::Rax, 2);
        emit_test_ri(b, false, Reg::Rdx, TLB_NO_READ);
        emit_jcc_label(b, X86Cond::Je, &mut remapped);
        emit_mov_rr(b, false, P2, P1);
        emit_arith_ri(b, ArithOp::And, false, P2, !1);
        emit_jmp(b, tlb_load);

        // Still fetchable, only the mapping moved: recompile. A delay
        // slot restarts at its branch.
        bind_label(b, &mut remapped);
        emit_test_ri(b, false, P1, 1);
        emit_jcc_label(b, X86Cond::Je, &mut at_branch);
        emit_arith_ri(b, ArithOp::Sub, false, P1, 5);
        bind_label(b, &mut at_branch);
        emit_jmp(b, miss);
    }

    fn emit_find_handler_stub(&mut self) {
        self.stubs.find_handler = self.buf.offset();
        let sites = &mut *self.faults as *mut FaultSites as u64;
        let b = &mut self.buf;
        emit_pop(b, Reg::Rax);
        emit_store(b, true, P2, Reg::Rsp, SLOT_SAVE_P2);
        emit_mov_ri64(b, P1, sites);
        emit_mov_rr(b, true, P2, Reg::Rax);
        emit_call_abs(b, helper_find_fault_handler as *const () as u64);
        emit_load(b, true, P2, Reg::Rsp, SLOT_SAVE_P2);
        emit_jmp_reg(b, Reg::Rax);
    }

    fn emit_entry_stub(&mut self) {
        self.stubs.entry = self.buf.offset();
        self.codegen.emit_prologue(&mut self.buf);
        let dispatch = self.stubs.dispatch;
        let interrupt = self.stubs.exception(Exception::Interrupt);

        let b = &mut self.buf;
        emit_load(b, false, P1, AREG0, PC_OFFSET);
        emit_load(b, false, Reg::Rax, AREG0, CAUSE_OFFSET);
        emit_arith_rm(b, ArithOp::And, false, Reg::Rax, AREG0, STATUS_OFFSET);
        emit_test_ri(b, false, Reg::Rax, SR_INT_MASK);
        emit_jcc(b, X86Cond::Je, dispatch);
        emit_load(b, false, Reg::Rax, AREG0, STATUS_OFFSET);
        emit_test_ri(b, false, Reg::Rax, SR_IE);
        emit_jcc(b, X86Cond::Je, dispatch);
        emit_test_ri(b, false, Reg::Rax, SR_EXL | SR_ERL);
        emit_jcc(b, X86Cond::Jne, dispatch);
        emit_jmp(b, interrupt);
    }
}
