//! COP0 (system control) and COP2 data moves.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::cop0::*;
use mips3_core::state::{ccr_offset, cpcond_offset, cpr_offset, EPC_OFFSET, ICOUNT_OFFSET, STATUS_OFFSET};
use mips3_core::{Exception, Label, Result};
use mips3_frontend::{InsnDesc, InsnKind};

use super::unimplemented;
use crate::compiler::CompilerState;
use crate::helpers::{
    helper_mfc0, helper_mtc0, helper_tlb, TLB_PROBE, TLB_READ, TLB_WRITE_INDEXED, TLB_WRITE_RANDOM,
};
use crate::oob::{Finisher, OobCond};
use crate::Drc;

impl Drc {
    /// Raise a coprocessor-unusable exception for COP0 use outside
    /// kernel mode when SR.CU0 is clear.
    fn check_cop0_usable(&mut self, compiler: &CompilerState, desc: &InsnDesc) -> Result<()> {
        if !self.config.strict_cop0 {
            return Ok(());
        }
        let mut ok = Label::new();
        let b = &mut self.buf;
        emit_load(b, false, Reg::Rax, AREG0, STATUS_OFFSET);
        emit_test_ri(b, false, Reg::Rax, SR_COP0 | SR_EXL | SR_ERL);
        emit_jcc_label(b, X86Cond::Jne, &mut ok);
        emit_test_ri(b, false, Reg::Rax, SR_KSU_MASK);
        let stub = self.stubs.exception(Exception::BadCop);
        self.oob_request(OobCond::If(X86Cond::Jne), Finisher::Exception, compiler, desc, stub)?;
        bind_label(&mut self.buf, &mut ok);
        Ok(())
    }

    /// MFC0/DMFC0 into `rt`.
    fn emit_mfc0(&mut self, compiler: &mut CompilerState, desc: &InsnDesc, wide: bool) {
        let o = desc.insn.ops;
        let reg = o.rd as usize;
        match reg {
            COP0_COUNT | COP0_RANDOM => {
                let extra = if reg == COP0_COUNT {
                    self.config.count_read_cycles
                } else {
                    0
                };
                self.flush_cycles(compiler, extra);
                emit_mov_ri(&mut self.buf, false, P2, reg as u64);
                self.call_state_helper(helper_mfc0 as *const () as u64);
            }
            _ => {
                if reg == COP0_CAUSE {
                    let extra = self.config.cause_read_cycles;
                    self.flush_cycles(compiler, extra);
                }
                emit_load(&mut self.buf, wide, Reg::Rax, AREG0, cpr_offset(0, reg));
            }
        }
        if wide {
            self.store_gpr(o.rt, Reg::Rax);
        } else {
            self.store_gpr_sext32(o.rt, Reg::Rax);
        }
    }

    /// MTC0/DMTC0; a write that exposes an interrupt leaves through
    /// the interrupt stub after the instruction.
    fn emit_mtc0(&mut self, compiler: &mut CompilerState, desc: &InsnDesc, wide: bool) -> Result<()> {
        let o = desc.insn.ops;
        self.flush_cycles(compiler, 0);
        self.load_gpr(wide, P3, o.rt);
        if !wide {
            emit_movsx(&mut self.buf, OPC_MOVSLQ, P3, P3);
        }
        emit_mov_ri(&mut self.buf, false, P2, o.rd as u64);
        self.call_state_helper(helper_mtc0 as *const () as u64);
        emit_test_rr(&mut self.buf, false, Reg::Rax, Reg::Rax);
        let stub = self.stubs.exception(Exception::Interrupt);
        self.oob_request(OobCond::If(X86Cond::Jne), Finisher::Interrupt, compiler, desc, stub)
    }

    fn emit_tlb_op(&mut self, compiler: &mut CompilerState, op: u32) {
        self.flush_cycles(compiler, 0);
        emit_mov_ri(&mut self.buf, false, P2, op as u64);
        self.call_state_helper(helper_tlb as *const () as u64);
    }

    /// ERET: return to ErrorEPC when SR.ERL is set, otherwise EPC.
    fn emit_eret(&mut self, compiler: &mut CompilerState) {
        let mut normal = Label::new();
        let mut done = Label::new();
        let b = &mut self.buf;
        emit_load(b, false, Reg::Rax, AREG0, STATUS_OFFSET);
        emit_test_ri(b, false, Reg::Rax, SR_ERL);
        emit_jcc_label(b, X86Cond::Je, &mut normal);
        emit_load(b, false, P1, AREG0, cpr_offset(0, COP0_ERROREPC));
        emit_arith_ri(b, ArithOp::And, false, Reg::Rax, !(SR_ERL as i32));
        emit_jmp_label(b, &mut done);
        bind_label(b, &mut normal);
        emit_load(b, false, P1, AREG0, EPC_OFFSET);
        emit_arith_ri(b, ArithOp::And, false, Reg::Rax, !(SR_EXL as i32));
        bind_label(b, &mut done);
        emit_movsx(b, OPC_MOVSLQ, Reg::Rax, Reg::Rax);
        emit_store(b, true, Reg::Rax, AREG0, STATUS_OFFSET);

        if compiler.cycles != 0 {
            emit_arith_mi(b, ArithOp::Sub, false, AREG0, ICOUNT_OFFSET, compiler.cycles as i32);
            emit_jcc(b, X86Cond::Js, self.stubs.exit_cycles);
        }
        compiler.cycles = 0;
        emit_jmp(&mut self.buf, self.stubs.dispatch);
    }

    /// BCzF/BCzT on the coprocessor condition line `cop`.
    fn emit_cop_condition_branch(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
        cop: usize,
        on_true: bool,
    ) -> Result<()> {
        emit_cmp_mb(&mut self.buf, AREG0, cpcond_offset(cop), 0);
        let skip = if on_true { X86Cond::Je } else { X86Cond::Jne };
        self.emit_conditional_branch(compiler, desc, skip)
    }

    pub(crate) fn emit_cop0(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let o = desc.insn.ops;
        self.check_cop0_usable(compiler, desc)?;
        match desc.insn.kind {
            Mfc0 => self.emit_mfc0(compiler, desc, false),
            Dmfc0 => self.emit_mfc0(compiler, desc, true),
            Mtc0 => self.emit_mtc0(compiler, desc, false)?,
            Dmtc0 => self.emit_mtc0(compiler, desc, true)?,
            Cfc0 => {
                emit_load(&mut self.buf, false, Reg::Rax, AREG0, ccr_offset(0, o.rd as usize));
                self.store_gpr_sext32(o.rt, Reg::Rax);
            }
            Ctc0 => {
                self.load_gpr(false, Reg::Rax, o.rt);
                emit_movsx(&mut self.buf, OPC_MOVSLQ, Reg::Rax, Reg::Rax);
                emit_store(&mut self.buf, true, Reg::Rax, AREG0, ccr_offset(0, o.rd as usize));
            }
            Tlbr => self.emit_tlb_op(compiler, TLB_READ),
            Tlbwi => self.emit_tlb_op(compiler, TLB_WRITE_INDEXED),
            Tlbwr => self.emit_tlb_op(compiler, TLB_WRITE_RANDOM),
            Tlbp => self.emit_tlb_op(compiler, TLB_PROBE),
            Eret => self.emit_eret(compiler),
            Wait => {}
            Bc0f => self.emit_cop_condition_branch(compiler, desc, 0, false)?,
            Bc0t => self.emit_cop_condition_branch(compiler, desc, 0, true)?,
            _ => return Err(unimplemented(desc)),
        }
        Ok(())
    }

    /// COP2 has no attached unit: moves go to the register file and
    /// branches test a condition line the host may drive.
    pub(crate) fn emit_cop2(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let o = desc.insn.ops;
        let rd = o.rd as usize;
        match desc.insn.kind {
            Mfc2 | Cfc2 => {
                let off = if desc.insn.kind == Mfc2 {
                    cpr_offset(2, rd)
                } else {
                    ccr_offset(2, rd)
                };
                emit_load(&mut self.buf, false, Reg::Rax, AREG0, off);
                self.store_gpr_sext32(o.rt, Reg::Rax);
            }
            Dmfc2 => {
                emit_load(&mut self.buf, true, Reg::Rax, AREG0, cpr_offset(2, rd));
                self.store_gpr(o.rt, Reg::Rax);
            }
            Mtc2 | Ctc2 => {
                let off = if desc.insn.kind == Mtc2 {
                    cpr_offset(2, rd)
                } else {
                    ccr_offset(2, rd)
                };
                self.load_gpr(false, Reg::Rax, o.rt);
                emit_movsx(&mut self.buf, OPC_MOVSLQ, Reg::Rax, Reg::Rax);
                emit_store(&mut self.buf, true, Reg::Rax, AREG0, off);
            }
            Dmtc2 => {
                self.load_gpr(true, Reg::Rax, o.rt);
                emit_store(&mut self.buf, true, Reg::Rax, AREG0, cpr_offset(2, rd));
            }
            Bc2f => self.emit_cop_condition_branch(compiler, desc, 2, false)?,
            Bc2t => self.emit_cop_condition_branch(compiler, desc, 2, true)?,
            _ => return Err(unimplemented(desc)),
        }
        Ok(())
    }
}
