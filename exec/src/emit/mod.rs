//! Per-family instruction emitters.
//!
//! Compiled code keeps no guest state in host registers between
//! instructions: every operand is read from and written back to the
//! state block through `rbp`. `rax`, `rcx`, `rdx`, `rsi` and `rdi`
//! are scratch.

mod alu;
mod branch;
mod cop0;
mod cop1;
mod memory;

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::state::{gpr_offset, ICOUNT_OFFSET};
use mips3_core::{Error, Result};
use mips3_frontend::{Family, InsnDesc};

use crate::compiler::CompilerState;
use crate::Drc;

/// Signature shared by every family emitter.
pub(crate) type EmitFn = fn(&mut Drc, &mut CompilerState, &InsnDesc) -> Result<()>;

/// Family emitters, indexed by [`Family`].
pub(crate) const EMIT: [EmitFn; Family::COUNT] = [
    Drc::emit_alu,
    Drc::emit_muldiv,
    Drc::emit_branch,
    Drc::emit_trap,
    Drc::emit_load,
    Drc::emit_store,
    Drc::emit_system,
    Drc::emit_cop0,
    Drc::emit_cop1,
    Drc::emit_cop1x,
    Drc::emit_cop2,
    Drc::emit_unknown,
];

#[inline]
pub(crate) fn unimplemented(desc: &InsnDesc) -> Error {
    Error::unimplemented(desc.opcode(), desc.pc)
}

impl Drc {
    fn emit_unknown(&mut self, _compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        Err(unimplemented(desc))
    }

    /// `dst` = GPR `r` (low word only unless `wide`).
    #[inline]
    pub(crate) fn load_gpr(&mut self, wide: bool, dst: Reg, r: u8) {
        emit_load(&mut self.buf, wide, dst, AREG0, gpr_offset(r as usize));
    }

    /// GPR `r` = `src`; writes to r0 are dropped.
    #[inline]
    pub(crate) fn store_gpr(&mut self, r: u8, src: Reg) {
        if r != 0 {
            emit_store(&mut self.buf, true, src, AREG0, gpr_offset(r as usize));
        }
    }

    /// GPR `r` = sign-extended low word of `src`.
    pub(crate) fn store_gpr_sext32(&mut self, r: u8, src: Reg) {
        if r != 0 {
            emit_movsx(&mut self.buf, OPC_MOVSLQ, src, src);
            emit_store(&mut self.buf, true, src, AREG0, gpr_offset(r as usize));
        }
    }

    /// Charge the accumulated cycles to `icount` without checking.
    pub(crate) fn flush_cycles(&mut self, compiler: &mut CompilerState, extra: u32) {
        let total = compiler.cycles + extra;
        if total != 0 {
            emit_arith_mi(&mut self.buf, ArithOp::Sub, false, AREG0, ICOUNT_OFFSET, total as i32);
        }
        compiler.cycles = 0;
    }

    /// Call an `extern "C"` helper whose first argument is the state.
    pub(crate) fn call_state_helper(&mut self, helper: u64) {
        emit_mov_rr(&mut self.buf, true, P1, AREG0);
        emit_call_abs(&mut self.buf, helper);
    }
}
