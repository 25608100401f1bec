//! Loads and stores.
//!
//! Every access is `edi` = effective address, optional value in
//! `rsi`, then a call to the general trampoline for the access kind.
//! The call's return address is registered as a fault site whose
//! finisher raises the TLB exception for this instruction.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::state::{cpr_offset, gpr_offset};
use mips3_core::{Exception, Result};
use mips3_frontend::{InsnDesc, InsnKind};

use super::unimplemented;
use crate::compiler::CompilerState;
use crate::oob::{Finisher, OobCond};
use crate::trampolines::Access;
use crate::Drc;

/// Which half of an unaligned load/store pair.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Drc {
    fn emit_address(&mut self, desc: &InsnDesc) {
        let o = desc.insn.ops;
        self.load_gpr(false, P1, o.rs);
        if o.simm() != 0 {
            emit_arith_ri(&mut self.buf, ArithOp::Add, false, P1, o.simm());
        }
    }

    /// COP1X addressing: base + index.
    fn emit_indexed_address(&mut self, desc: &InsnDesc) {
        let o = desc.insn.ops;
        self.load_gpr(false, P1, o.rs);
        emit_arith_rm(&mut self.buf, ArithOp::Add, false, P1, AREG0, gpr_offset(o.rt as usize));
    }

    /// Call the trampoline and register the fault site.
    pub(crate) fn emit_access(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
        access: Access,
    ) -> Result<()> {
        emit_call(&mut self.buf, self.tramps.general(access));
        let exc = if access.is_write() {
            Exception::TlbStore
        } else {
            Exception::TlbLoad
        };
        let stub = self.stubs.exception(exc);
        self.oob_request(OobCond::CallSite, Finisher::Exception, compiler, desc, stub)
    }

    /// `ecx` = bit shift for an unaligned access: `8 * lane`, where
    /// the lane counts from the most significant end.
    fn emit_lane_shift(&mut self, src: Reg, wide: bool, side: Side) {
        let mask: i32 = if wide { 7 } else { 3 };
        let mut flip = if self.config.big_endian { 0 } else { mask };
        if side == Side::Right {
            flip ^= mask;
        }
        let b = &mut self.buf;
        emit_mov_rr(b, false, Reg::Rcx, src);
        emit_arith_ri(b, ArithOp::And, false, Reg::Rcx, mask);
        if flip != 0 {
            emit_arith_ri(b, ArithOp::Xor, false, Reg::Rcx, flip);
        }
        emit_shift_ri(b, ShiftOp::Shl, false, Reg::Rcx, 3);
    }

    /// LWL/LWR/LDL/LDR: merge the loaded word into `rt`.
    fn emit_load_unaligned(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
        wide: bool,
        side: Side,
    ) -> Result<()> {
        let rt = desc.insn.ops.rt;
        self.emit_address(desc);
        emit_store(&mut self.buf, false, P1, Reg::Rsp, SLOT_SAVE_P1);
        let align = if wide { !7 } else { !3 };
        emit_arith_ri(&mut self.buf, ArithOp::And, false, P1, align);
        let access = if wide {
            Access::ReadDword
        } else {
            Access::ReadWordUnsigned
        };
        self.emit_access(compiler, desc, access)?;
        if rt == 0 {
            return Ok(());
        }

        emit_load(&mut self.buf, false, Reg::Rdx, Reg::Rsp, SLOT_SAVE_P1);
        self.emit_lane_shift(Reg::Rdx, wide, side);
        let op = match side {
            Side::Left => ShiftOp::Shl,
            Side::Right => ShiftOp::Shr,
        };
        let b = &mut self.buf;
        emit_mov_ri(b, wide, Reg::Rdx, if wide { u64::MAX } else { u32::MAX as u64 });
        emit_shift_cl(b, op, wide, Reg::Rdx);
        emit_not(b, wide, Reg::Rdx);
        emit_arith_rm(b, ArithOp::And, wide, Reg::Rdx, AREG0, gpr_offset(rt as usize));
        emit_shift_cl(b, op, wide, Reg::Rax);
        emit_arith_rr(b, ArithOp::Or, wide, Reg::Rax, Reg::Rdx);
        if wide {
            self.store_gpr(rt, Reg::Rax);
        } else {
            self.store_gpr_sext32(rt, Reg::Rax);
        }
        Ok(())
    }

    /// SWL/SWR/SDL/SDR: masked store of the shifted `rt`.
    fn emit_store_unaligned(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
        wide: bool,
        side: Side,
    ) -> Result<()> {
        let rt = desc.insn.ops.rt;
        self.emit_address(desc);
        self.emit_lane_shift(P1, wide, side);
        let align = if wide { !7 } else { !3 };
        emit_arith_ri(&mut self.buf, ArithOp::And, false, P1, align);

        let op = match side {
            Side::Left => ShiftOp::Shr,
            Side::Right => ShiftOp::Shl,
        };
        self.load_gpr(wide, P2, rt);
        let b = &mut self.buf;
        emit_mov_ri(b, wide, P3, if wide { u64::MAX } else { u32::MAX as u64 });
        emit_shift_cl(b, op, wide, P2);
        emit_shift_cl(b, op, wide, P3);
        emit_not(b, wide, P3);
        let access = if wide {
            Access::WriteDwordMasked
        } else {
            Access::WriteWordMasked
        };
        self.emit_access(compiler, desc, access)
    }

    fn emit_simple_load(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
        access: Access,
        dst: Option<i32>,
        wide: bool,
    ) -> Result<()> {
        self.emit_address(desc);
        self.emit_access(compiler, desc, access)?;
        if let Some(off) = dst {
            emit_store(&mut self.buf, wide, Reg::Rax, AREG0, off);
        }
        Ok(())
    }

    fn emit_simple_store(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
        access: Access,
        src: i32,
        wide: bool,
    ) -> Result<()> {
        self.emit_address(desc);
        emit_load(&mut self.buf, wide, P2, AREG0, src);
        self.emit_access(compiler, desc, access)
    }

    fn invalid_op(&mut self, compiler: &CompilerState, desc: &InsnDesc) -> Result<()> {
        let stub = self.stubs.exception(Exception::InvalidOp);
        self.oob_request(OobCond::Always, Finisher::Exception, compiler, desc, stub)
    }

    pub(crate) fn emit_load(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let rt = desc.insn.ops.rt;
        let gpr = (rt != 0).then(|| gpr_offset(rt as usize));
        let compiler = &*compiler;
        match desc.insn.kind {
            Lb => self.emit_simple_load(compiler, desc, Access::ReadByteSigned, gpr, true),
            Lbu => self.emit_simple_load(compiler, desc, Access::ReadByteUnsigned, gpr, true),
            Lh => self.emit_simple_load(compiler, desc, Access::ReadHalfSigned, gpr, true),
            Lhu => self.emit_simple_load(compiler, desc, Access::ReadHalfUnsigned, gpr, true),
            Lw => self.emit_simple_load(compiler, desc, Access::ReadWordSigned, gpr, true),
            Lwu => self.emit_simple_load(compiler, desc, Access::ReadWordUnsigned, gpr, true),
            Ld => self.emit_simple_load(compiler, desc, Access::ReadDword, gpr, true),
            Lwl => self.emit_load_unaligned(compiler, desc, false, Side::Left),
            Lwr => self.emit_load_unaligned(compiler, desc, false, Side::Right),
            Ldl => self.emit_load_unaligned(compiler, desc, true, Side::Left),
            Ldr => self.emit_load_unaligned(compiler, desc, true, Side::Right),
            Lwc1 => {
                self.check_cop1_usable(compiler, desc)?;
                let dst = Some(cpr_offset(1, rt as usize));
                self.emit_simple_load(compiler, desc, Access::ReadWordUnsigned, dst, false)
            }
            Ldc1 => {
                self.check_cop1_usable(compiler, desc)?;
                let dst = Some(cpr_offset(1, rt as usize));
                self.emit_simple_load(compiler, desc, Access::ReadDword, dst, true)
            }
            Lwc2 => {
                let dst = Some(cpr_offset(2, rt as usize));
                self.emit_simple_load(compiler, desc, Access::ReadWordUnsigned, dst, true)
            }
            Ldc2 => {
                let dst = Some(cpr_offset(2, rt as usize));
                self.emit_simple_load(compiler, desc, Access::ReadDword, dst, true)
            }
            Ll | Lld => self.invalid_op(compiler, desc),
            _ => Err(unimplemented(desc)),
        }
    }

    pub(crate) fn emit_store(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let rt = desc.insn.ops.rt as usize;
        let gpr = gpr_offset(rt);
        let compiler = &*compiler;
        match desc.insn.kind {
            Sb => self.emit_simple_store(compiler, desc, Access::WriteByte, gpr, false),
            Sh => self.emit_simple_store(compiler, desc, Access::WriteHalf, gpr, false),
            Sw => self.emit_simple_store(compiler, desc, Access::WriteWord, gpr, false),
            Sd => self.emit_simple_store(compiler, desc, Access::WriteDword, gpr, true),
            Swl => self.emit_store_unaligned(compiler, desc, false, Side::Left),
            Swr => self.emit_store_unaligned(compiler, desc, false, Side::Right),
            Sdl => self.emit_store_unaligned(compiler, desc, true, Side::Left),
            Sdr => self.emit_store_unaligned(compiler, desc, true, Side::Right),
            Swc1 => {
                self.check_cop1_usable(compiler, desc)?;
                self.emit_simple_store(compiler, desc, Access::WriteWord, cpr_offset(1, rt), false)
            }
            Sdc1 => {
                self.check_cop1_usable(compiler, desc)?;
                self.emit_simple_store(compiler, desc, Access::WriteDword, cpr_offset(1, rt), true)
            }
            Swc2 => self.emit_simple_store(compiler, desc, Access::WriteWord, cpr_offset(2, rt), false),
            Sdc2 => self.emit_simple_store(compiler, desc, Access::WriteDword, cpr_offset(2, rt), true),
            Sc | Scd => self.invalid_op(compiler, desc),
            _ => Err(unimplemented(desc)),
        }
    }

    /// COP1X indexed loads and stores.
    pub(crate) fn emit_indexed_fpr_access(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
    ) -> Result<()> {
        use InsnKind::*;
        let o = desc.insn.ops;
        self.emit_indexed_address(desc);
        match desc.insn.kind {
            Lwxc1 | Ldxc1 => {
                let wide = desc.insn.kind == Ldxc1;
                let access = if wide {
                    Access::ReadDword
                } else {
                    Access::ReadWordUnsigned
                };
                self.emit_access(compiler, desc, access)?;
                emit_store(&mut self.buf, wide, Reg::Rax, AREG0, cpr_offset(1, o.fd() as usize));
            }
            Swxc1 | Sdxc1 => {
                let wide = desc.insn.kind == Sdxc1;
                emit_load(&mut self.buf, wide, P2, AREG0, cpr_offset(1, o.fs() as usize));
                let access = if wide {
                    Access::WriteDword
                } else {
                    Access::WriteWord
                };
                self.emit_access(compiler, desc, access)?;
            }
            _ => return Err(unimplemented(desc)),
        }
        Ok(())
    }
}
