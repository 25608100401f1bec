//! Integer ALU, multiply/divide, traps and system instructions.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::state::{fcc_offset, gpr_offset, HI_OFFSET, LO_OFFSET};
use mips3_core::{Exception, Result};
use mips3_frontend::{InsnDesc, InsnKind};

use super::unimplemented;
use crate::compiler::CompilerState;
use crate::helpers::helper_muldiv;
use crate::oob::{Finisher, OobCond};
use crate::Drc;

/// Second operand of a two-source ALU op.
#[derive(Clone, Copy)]
enum Rhs {
    Imm(i32),
    Gpr(u8),
}

impl Drc {
    /// Overflow-checked add/sub: 32-bit results are sign-extended.
    fn emit_trapping_arith(
        &mut self,
        compiler: &mut CompilerState,
        desc: &InsnDesc,
        op: ArithOp,
        wide: bool,
        imm: Option<i32>,
    ) -> Result<()> {
        let o = desc.insn.ops;
        self.load_gpr(wide, Reg::Rax, o.rs);
        match imm {
            Some(v) => emit_arith_ri(&mut self.buf, op, wide, Reg::Rax, v),
            None => emit_arith_rm(&mut self.buf, op, wide, Reg::Rax, AREG0, gpr_offset(o.rt as usize)),
        }
        let stub = self.stubs.exception(Exception::Overflow);
        self.oob_request(OobCond::If(X86Cond::Jo), Finisher::Exception, compiler, desc, stub)?;
        let dst = if imm.is_some() { o.rt } else { o.rd };
        if wide {
            self.store_gpr(dst, Reg::Rax);
        } else {
            self.store_gpr_sext32(dst, Reg::Rax);
        }
        Ok(())
    }

    fn emit_set_less(&mut self, dst: u8, rs: u8, cond: X86Cond, rhs: Rhs) {
        if dst == 0 {
            return;
        }
        self.load_gpr(true, Reg::Rax, rs);
        match rhs {
            Rhs::Imm(imm) => emit_arith_ri(&mut self.buf, ArithOp::Cmp, true, Reg::Rax, imm),
            Rhs::Gpr(rt) => emit_arith_rm(
                &mut self.buf,
                ArithOp::Cmp,
                true,
                Reg::Rax,
                AREG0,
                gpr_offset(rt as usize),
            ),
        }
        emit_setcc(&mut self.buf, cond, Reg::Rax);
        emit_movzx(&mut self.buf, OPC_MOVZBL, Reg::Rax, Reg::Rax);
        self.store_gpr(dst, Reg::Rax);
    }

    fn emit_shift_imm(&mut self, rd: u8, rt: u8, op: ShiftOp, wide: bool, count: u8) {
        if rd == 0 {
            return;
        }
        self.load_gpr(wide, Reg::Rax, rt);
        emit_shift_ri(&mut self.buf, op, wide, Reg::Rax, count);
        if wide {
            self.store_gpr(rd, Reg::Rax);
        } else {
            self.store_gpr_sext32(rd, Reg::Rax);
        }
    }

    fn emit_shift_var(&mut self, rd: u8, rt: u8, rs: u8, op: ShiftOp, wide: bool) {
        if rd == 0 {
            return;
        }
        self.load_gpr(false, Reg::Rcx, rs);
        self.load_gpr(wide, Reg::Rax, rt);
        emit_shift_cl(&mut self.buf, op, wide, Reg::Rax);
        if wide {
            self.store_gpr(rd, Reg::Rax);
        } else {
            self.store_gpr_sext32(rd, Reg::Rax);
        }
    }

    /// 64-bit logical op `rd = rs op rt`, or with an immediate.
    fn emit_logical(&mut self, dst: u8, rs: u8, op: ArithOp, rhs: Rhs, invert: bool) {
        if dst == 0 {
            return;
        }
        self.load_gpr(true, Reg::Rax, rs);
        match rhs {
            Rhs::Imm(imm) => emit_arith_ri(&mut self.buf, op, true, Reg::Rax, imm),
            Rhs::Gpr(rt) => emit_arith_rm(&mut self.buf, op, true, Reg::Rax, AREG0, gpr_offset(rt as usize)),
        }
        if invert {
            emit_not(&mut self.buf, true, Reg::Rax);
        }
        self.store_gpr(dst, Reg::Rax);
    }

    /// Move `rs` to `rd` when the flags set up by the caller satisfy
    /// `cond`.
    fn emit_move_if(&mut self, rd: u8, rs: u8, cond: X86Cond) {
        let mut skip = mips3_core::Label::new();
        emit_jcc_label(&mut self.buf, cond.invert(), &mut skip);
        self.load_gpr(true, Reg::Rax, rs);
        self.store_gpr(rd, Reg::Rax);
        bind_label(&mut self.buf, &mut skip);
    }

    pub(crate) fn emit_alu(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let o = desc.insn.ops;
        let (rs, rt, rd, sa) = (o.rs, o.rt, o.rd, o.sa);
        match desc.insn.kind {
            Addi => self.emit_trapping_arith(compiler, desc, ArithOp::Add, false, Some(o.simm()))?,
            Daddi => self.emit_trapping_arith(compiler, desc, ArithOp::Add, true, Some(o.simm()))?,
            Add => self.emit_trapping_arith(compiler, desc, ArithOp::Add, false, None)?,
            Sub => self.emit_trapping_arith(compiler, desc, ArithOp::Sub, false, None)?,
            Dadd => self.emit_trapping_arith(compiler, desc, ArithOp::Add, true, None)?,
            Dsub => self.emit_trapping_arith(compiler, desc, ArithOp::Sub, true, None)?,

            Addiu | Daddiu if rt != 0 => {
                let wide = desc.insn.kind == Daddiu;
                self.load_gpr(wide, Reg::Rax, rs);
                emit_arith_ri(&mut self.buf, ArithOp::Add, wide, Reg::Rax, o.simm());
                if wide {
                    self.store_gpr(rt, Reg::Rax);
                } else {
                    self.store_gpr_sext32(rt, Reg::Rax);
                }
            }
            Addu | Subu | Daddu | Dsubu if rd != 0 => {
                let kind = desc.insn.kind;
                let wide = matches!(kind, Daddu | Dsubu);
                let op = if matches!(kind, Addu | Daddu) {
                    ArithOp::Add
                } else {
                    ArithOp::Sub
                };
                self.load_gpr(wide, Reg::Rax, rs);
                emit_arith_rm(&mut self.buf, op, wide, Reg::Rax, AREG0, gpr_offset(rt as usize));
                if wide {
                    self.store_gpr(rd, Reg::Rax);
                } else {
                    self.store_gpr_sext32(rd, Reg::Rax);
                }
            }
            Addiu | Daddiu | Addu | Subu | Daddu | Dsubu => {}

            Slti => self.emit_set_less(rt, rs, X86Cond::Jl, Rhs::Imm(o.simm())),
            Sltiu => self.emit_set_less(rt, rs, X86Cond::Jb, Rhs::Imm(o.simm())),
            Slt => self.emit_set_less(rd, rs, X86Cond::Jl, Rhs::Gpr(rt)),
            Sltu => self.emit_set_less(rd, rs, X86Cond::Jb, Rhs::Gpr(rt)),

            Andi => self.emit_logical(rt, rs, ArithOp::And, Rhs::Imm(o.uimm() as i32), false),
            Ori => self.emit_logical(rt, rs, ArithOp::Or, Rhs::Imm(o.uimm() as i32), false),
            Xori => self.emit_logical(rt, rs, ArithOp::Xor, Rhs::Imm(o.uimm() as i32), false),
            And => self.emit_logical(rd, rs, ArithOp::And, Rhs::Gpr(rt), false),
            Or => self.emit_logical(rd, rs, ArithOp::Or, Rhs::Gpr(rt), false),
            Xor => self.emit_logical(rd, rs, ArithOp::Xor, Rhs::Gpr(rt), false),
            Nor => self.emit_logical(rd, rs, ArithOp::Or, Rhs::Gpr(rt), true),
            Lui => {
                if rt != 0 {
                    let value = o.simm() << 16;
                    emit_store_imm(&mut self.buf, true, AREG0, gpr_offset(rt as usize), value);
                }
            }

            Sll => self.emit_shift_imm(rd, rt, ShiftOp::Shl, false, sa),
            Srl => self.emit_shift_imm(rd, rt, ShiftOp::Shr, false, sa),
            Sra => self.emit_shift_imm(rd, rt, ShiftOp::Sar, false, sa),
            Dsll => self.emit_shift_imm(rd, rt, ShiftOp::Shl, true, sa),
            Dsrl => self.emit_shift_imm(rd, rt, ShiftOp::Shr, true, sa),
            Dsra => self.emit_shift_imm(rd, rt, ShiftOp::Sar, true, sa),
            Dsll32 => self.emit_shift_imm(rd, rt, ShiftOp::Shl, true, sa + 32),
            Dsrl32 => self.emit_shift_imm(rd, rt, ShiftOp::Shr, true, sa + 32),
            Dsra32 => self.emit_shift_imm(rd, rt, ShiftOp::Sar, true, sa + 32),
            Sllv => self.emit_shift_var(rd, rt, rs, ShiftOp::Shl, false),
            Srlv => self.emit_shift_var(rd, rt, rs, ShiftOp::Shr, false),
            Srav => self.emit_shift_var(rd, rt, rs, ShiftOp::Sar, false),
            Dsllv => self.emit_shift_var(rd, rt, rs, ShiftOp::Shl, true),
            Dsrlv => self.emit_shift_var(rd, rt, rs, ShiftOp::Shr, true),
            Dsrav => self.emit_shift_var(rd, rt, rs, ShiftOp::Sar, true),

            Movz | Movn if rd != 0 => {
                emit_arith_mi(&mut self.buf, ArithOp::Cmp, true, AREG0, gpr_offset(rt as usize), 0);
                let cond = if desc.insn.kind == Movz {
                    X86Cond::Je
                } else {
                    X86Cond::Jne
                };
                self.emit_move_if(rd, rs, cond);
            }
            Movf | Movt if rd != 0 => {
                emit_cmp_mb(&mut self.buf, AREG0, fcc_offset(o.movc_cc() as usize), 0);
                let cond = if desc.insn.kind == Movt {
                    X86Cond::Jne
                } else {
                    X86Cond::Je
                };
                self.emit_move_if(rd, rs, cond);
            }
            Movz | Movn | Movf | Movt => {}

            _ => return Err(unimplemented(desc)),
        }
        Ok(())
    }

    pub(crate) fn emit_muldiv(&mut self, _compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let o = desc.insn.ops;
        match desc.insn.kind {
            Mfhi | Mflo => {
                if o.rd != 0 {
                    let src = if desc.insn.kind == Mfhi { HI_OFFSET } else { LO_OFFSET };
                    emit_load(&mut self.buf, true, Reg::Rax, AREG0, src);
                    self.store_gpr(o.rd, Reg::Rax);
                }
            }
            Mthi | Mtlo => {
                let dst = if desc.insn.kind == Mthi { HI_OFFSET } else { LO_OFFSET };
                self.load_gpr(true, Reg::Rax, o.rs);
                emit_store(&mut self.buf, true, Reg::Rax, AREG0, dst);
            }
            Mult | Multu => {
                self.load_gpr(false, Reg::Rax, o.rs);
                self.load_gpr(false, Reg::Rcx, o.rt);
                if desc.insn.kind == Mult {
                    emit_imul1(&mut self.buf, false, Reg::Rcx);
                } else {
                    emit_mul(&mut self.buf, false, Reg::Rcx);
                }
                let b = &mut self.buf;
                emit_movsx(b, OPC_MOVSLQ, Reg::Rax, Reg::Rax);
                emit_store(b, true, Reg::Rax, AREG0, LO_OFFSET);
                emit_movsx(b, OPC_MOVSLQ, Reg::Rdx, Reg::Rdx);
                emit_store(b, true, Reg::Rdx, AREG0, HI_OFFSET);
            }
            Dmult | Dmultu => {
                self.load_gpr(true, Reg::Rax, o.rs);
                self.load_gpr(true, Reg::Rcx, o.rt);
                if desc.insn.kind == Dmult {
                    emit_imul1(&mut self.buf, true, Reg::Rcx);
                } else {
                    emit_mul(&mut self.buf, true, Reg::Rcx);
                }
                emit_store(&mut self.buf, true, Reg::Rax, AREG0, LO_OFFSET);
                emit_store(&mut self.buf, true, Reg::Rdx, AREG0, HI_OFFSET);
            }
            Mul => {
                if o.rd != 0 {
                    self.load_gpr(false, Reg::Rax, o.rs);
                    self.load_gpr(false, Reg::Rcx, o.rt);
                    emit_imul_rr(&mut self.buf, false, Reg::Rax, Reg::Rcx);
                    self.store_gpr_sext32(o.rd, Reg::Rax);
                }
            }
            Div | Divu | Ddiv | Ddivu | Mad | Madu => {
                emit_mov_ri(&mut self.buf, false, P2, desc.opcode() as u64);
                self.call_state_helper(helper_muldiv as *const () as u64);
            }
            _ => return Err(unimplemented(desc)),
        }
        Ok(())
    }

    pub(crate) fn emit_trap(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let o = desc.insn.ops;
        let cond = match desc.insn.kind {
            Tge | Tgei => X86Cond::Jge,
            Tgeu | Tgeiu => X86Cond::Jae,
            Tlt | Tlti => X86Cond::Jl,
            Tltu | Tltiu => X86Cond::Jb,
            Teq | Teqi => X86Cond::Je,
            Tne | Tnei => X86Cond::Jne,
            _ => return Err(unimplemented(desc)),
        };
        self.load_gpr(true, Reg::Rax, o.rs);
        if matches!(desc.insn.kind, Tgei | Tgeiu | Tlti | Tltiu | Teqi | Tnei) {
            emit_arith_ri(&mut self.buf, ArithOp::Cmp, true, Reg::Rax, o.simm());
        } else {
            emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, Reg::Rax, AREG0, gpr_offset(o.rt as usize));
        }
        let stub = self.stubs.exception(Exception::Trap);
        self.oob_request(OobCond::If(cond), Finisher::Exception, compiler, desc, stub)
    }

    pub(crate) fn emit_system(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let exc = match desc.insn.kind {
            Syscall => Exception::Syscall,
            Break => Exception::Break,
            Sync | Cache | Pref => return Ok(()),
            _ => return Err(unimplemented(desc)),
        };
        let stub = self.stubs.exception(exc);
        self.oob_request(OobCond::Always, Finisher::Exception, compiler, desc, stub)
    }
}
