//! COP1 (FPU) and COP1X.
//!
//! Moves, sign operations and conditional moves are inline; the
//! arithmetic goes through [`helper_fpu`] with the raw opcode.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::cop0::SR_COP1;
use mips3_core::fpu::FpFormat;
use mips3_core::state::{cpr_offset, fcc_offset, gpr_offset, STATUS_OFFSET};
use mips3_core::{Exception, Label, Result};
use mips3_frontend::{InsnDesc, InsnKind};

use super::unimplemented;
use crate::compiler::CompilerState;
use crate::helpers::{helper_cfc1, helper_ctc1, helper_fpu};
use crate::oob::{Finisher, OobCond};
use crate::Drc;

#[inline]
fn fpr(i: u8) -> i32 {
    cpr_offset(1, i as usize)
}

impl Drc {
    /// With `strict_cop1`, raise coprocessor-unusable when SR.CU1 is
    /// clear.
    pub(crate) fn check_cop1_usable(&mut self, compiler: &CompilerState, desc: &InsnDesc) -> Result<()> {
        if !self.config.strict_cop1 {
            return Ok(());
        }
        emit_test_mi(&mut self.buf, AREG0, STATUS_OFFSET, SR_COP1);
        let stub = self.stubs.exception(Exception::BadCop);
        self.oob_request(OobCond::If(X86Cond::Je), Finisher::Exception, compiler, desc, stub)
    }

    fn call_fpu_helper(&mut self, desc: &InsnDesc) {
        let mips4 = self.config.is_mips4() as u64;
        emit_mov_ri(&mut self.buf, false, P2, desc.opcode() as u64);
        emit_mov_ri(&mut self.buf, false, P3, mips4);
        self.call_state_helper(helper_fpu as *const () as u64);
    }

    /// fd = fs, sized by the format.
    fn emit_fpr_copy(&mut self, wide: bool, fd: u8, fs: u8) {
        emit_load(&mut self.buf, wide, Reg::Rax, AREG0, fpr(fs));
        emit_store(&mut self.buf, wide, Reg::Rax, AREG0, fpr(fd));
    }

    /// MOV.fmt, NEG.fmt and ABS.fmt: sign-bit operations only.
    fn emit_sign_op(&mut self, desc: &InsnDesc, wide: bool) {
        let o = desc.insn.ops;
        let kind = desc.insn.kind;
        let b = &mut self.buf;
        emit_load(b, wide, Reg::Rax, AREG0, fpr(o.fs()));
        let sign = if wide { 1u64 << 63 } else { 1u64 << 31 };
        match kind {
            InsnKind::FNeg => {
                emit_mov_ri(b, wide, Reg::Rdx, sign);
                emit_arith_rr(b, ArithOp::Xor, wide, Reg::Rax, Reg::Rdx);
            }
            InsnKind::FAbs => {
                emit_mov_ri(b, wide, Reg::Rdx, sign - 1);
                emit_arith_rr(b, ArithOp::And, wide, Reg::Rax, Reg::Rdx);
            }
            _ => {}
        }
        emit_store(b, wide, Reg::Rax, AREG0, fpr(o.fd()));
    }

    /// MOVF/MOVT.fmt and MOVZ/MOVN.fmt.
    fn emit_fpr_move_if(&mut self, desc: &InsnDesc, wide: bool) {
        let o = desc.insn.ops;
        let mut skip = Label::new();
        let skip_cond = match desc.insn.kind {
            InsnKind::FMovcf => {
                emit_cmp_mb(&mut self.buf, AREG0, fcc_offset(o.movc_cc() as usize), 0);
                // tf bit set: move when the condition is true
                if o.rt & 1 != 0 {
                    X86Cond::Je
                } else {
                    X86Cond::Jne
                }
            }
            kind => {
                emit_arith_mi(&mut self.buf, ArithOp::Cmp, true, AREG0, gpr_offset(o.ft() as usize), 0);
                if kind == InsnKind::FMovz {
                    X86Cond::Jne
                } else {
                    X86Cond::Je
                }
            }
        };
        emit_jcc_label(&mut self.buf, skip_cond, &mut skip);
        self.emit_fpr_copy(wide, o.fd(), o.fs());
        bind_label(&mut self.buf, &mut skip);
    }

    pub(crate) fn emit_cop1(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        self.check_cop1_usable(compiler, desc)?;
        let o = desc.insn.ops;
        let wide = FpFormat::from_fmt(o.fmt() as u32).is_some_and(FpFormat::is_double_width);
        match desc.insn.kind {
            Mfc1 => {
                emit_load(&mut self.buf, false, Reg::Rax, AREG0, fpr(o.fs()));
                self.store_gpr_sext32(o.rt, Reg::Rax);
            }
            Dmfc1 => {
                emit_load(&mut self.buf, true, Reg::Rax, AREG0, fpr(o.fs()));
                self.store_gpr(o.rt, Reg::Rax);
            }
            Mtc1 | Dmtc1 => {
                let wide = desc.insn.kind == Dmtc1;
                self.load_gpr(wide, Reg::Rax, o.rt);
                emit_store(&mut self.buf, wide, Reg::Rax, AREG0, fpr(o.fs()));
            }
            Cfc1 => {
                let mips4 = self.config.is_mips4() as u64;
                emit_mov_ri(&mut self.buf, false, P2, o.rd as u64);
                emit_mov_ri(&mut self.buf, false, P3, mips4);
                self.call_state_helper(helper_cfc1 as *const () as u64);
                self.store_gpr(o.rt, Reg::Rax);
            }
            Ctc1 => {
                let mips4 = self.config.is_mips4() as u64;
                self.load_gpr(true, P3, o.rt);
                emit_mov_ri(&mut self.buf, false, P2, o.rd as u64);
                emit_mov_ri(&mut self.buf, false, P4, mips4);
                self.call_state_helper(helper_ctc1 as *const () as u64);
            }
            FMov | FNeg | FAbs => self.emit_sign_op(desc, wide),
            FMovcf | FMovz | FMovn => self.emit_fpr_move_if(desc, wide),
            FAdd | FSub | FMul | FDiv | FSqrt | FRecip | FRsqrt | FRoundL | FTruncL | FCeilL
            | FFloorL | FRoundW | FTruncW | FCeilW | FFloorW | FCvtS | FCvtD | FCvtW | FCvtL
            | FCompare => self.call_fpu_helper(desc),
            _ => return Err(unimplemented(desc)),
        }
        Ok(())
    }

    pub(crate) fn emit_cop1x(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        self.check_cop1_usable(compiler, desc)?;
        match desc.insn.kind {
            Lwxc1 | Ldxc1 | Swxc1 | Sdxc1 => self.emit_indexed_fpr_access(compiler, desc)?,
            Prefx => {}
            FMadd | FMsub | FNmadd | FNmsub => self.call_fpu_helper(desc),
            _ => return Err(unimplemented(desc)),
        }
        Ok(())
    }
}
