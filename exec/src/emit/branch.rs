//! Branches, jumps and delay-slot placement.
//!
//! The delay slot of a branch is compiled a second time inside the
//! taken path, followed by the jump to the target. The not-taken
//! path falls through to the next descriptor in the chain, which for
//! an ordinary branch is the same delay-slot instruction and for a
//! likely branch is the instruction after it.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::state::{fcc_offset, gpr_offset, sext32, ICOUNT_OFFSET};
use mips3_core::{Label, Result};
use mips3_frontend::{InsnDesc, InsnKind};

use super::unimplemented;
use crate::compiler::CompilerState;
use crate::Drc;

impl Drc {
    /// Compile the delay slot of `desc` and jump to its target.
    pub(crate) fn append_delay_slot_and_branch(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
    ) -> Result<()> {
        let delay = desc.delay.and_then(|id| self.seq.desc(id)).cloned();
        let mut temp = *compiler;
        if let Some(delay) = delay.as_ref() {
            self.compile_one(&mut temp, delay)?;
        }

        if desc.has_static_target() {
            emit_mov_ri(&mut self.buf, false, P1, desc.targetpc as u64);
        } else {
            emit_load(&mut self.buf, false, P1, Reg::Rsp, SLOT_NEXTPC);
        }
        if temp.cycles != 0 {
            emit_arith_mi(&mut self.buf, ArithOp::Sub, false, AREG0, ICOUNT_OFFSET, temp.cycles as i32);
            emit_jcc(&mut self.buf, X86Cond::Js, self.stubs.exit_cycles);
        }

        if desc.has_static_target() {
            self.emit_tentative_jump(desc.targetpc);
        } else {
            emit_jmp(&mut self.buf, self.stubs.dispatch);
        }
        Ok(())
    }

    /// Branch around the taken path when the flags satisfy `skip`.
    pub(crate) fn emit_conditional_branch(
        &mut self,
        compiler: &CompilerState,
        desc: &InsnDesc,
        skip: X86Cond,
    ) -> Result<()> {
        let mut not_taken = Label::new();
        emit_jcc_label(&mut self.buf, skip, &mut not_taken);
        self.append_delay_slot_and_branch(compiler, desc)?;
        bind_label(&mut self.buf, &mut not_taken);
        Ok(())
    }

    fn cmp_gpr_zero(&mut self, r: u8) {
        emit_arith_mi(&mut self.buf, ArithOp::Cmp, true, AREG0, gpr_offset(r as usize), 0);
    }

    /// r31 = return address; leaves the flags alone.
    fn store_link(&mut self, r: u8, pc: u32) {
        if r != 0 {
            let ret = sext32(pc.wrapping_add(8)) as i64 as i32;
            emit_store_imm(&mut self.buf, true, AREG0, gpr_offset(r as usize), ret);
        }
    }

    pub(crate) fn emit_branch(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        use InsnKind::*;
        let o = desc.insn.ops;
        let (rs, rt) = (o.rs, o.rt);
        let compiler = &*compiler;
        match desc.insn.kind {
            J => self.append_delay_slot_and_branch(compiler, desc),
            Jal => {
                self.store_link(31, desc.pc);
                self.append_delay_slot_and_branch(compiler, desc)
            }
            Jr | Jalr => {
                self.load_gpr(false, Reg::Rax, rs);
                emit_store(&mut self.buf, false, Reg::Rax, Reg::Rsp, SLOT_NEXTPC);
                if desc.insn.kind == Jalr {
                    self.store_link(o.rd, desc.pc);
                }
                self.append_delay_slot_and_branch(compiler, desc)
            }

            Beq | Beql if rs == rt => self.append_delay_slot_and_branch(compiler, desc),
            Bne | Bnel if rs == rt => Ok(()),
            Beq | Beql | Bne | Bnel => {
                self.load_gpr(true, Reg::Rax, rs);
                emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, Reg::Rax, AREG0, gpr_offset(rt as usize));
                let skip = if matches!(desc.insn.kind, Beq | Beql) {
                    X86Cond::Jne
                } else {
                    X86Cond::Je
                };
                self.emit_conditional_branch(compiler, desc, skip)
            }

            // r0 makes these static
            Blez | Blezl | Bgez | Bgezl if rs == 0 => self.append_delay_slot_and_branch(compiler, desc),
            Bgtz | Bgtzl | Bltz | Bltzl if rs == 0 => Ok(()),
            Blez | Blezl | Bgtz | Bgtzl | Bltz | Bltzl | Bgez | Bgezl => {
                self.cmp_gpr_zero(rs);
                let skip = match desc.insn.kind {
                    Blez | Blezl => X86Cond::Jg,
                    Bgtz | Bgtzl => X86Cond::Jle,
                    Bltz | Bltzl => X86Cond::Jge,
                    _ => X86Cond::Jl,
                };
                self.emit_conditional_branch(compiler, desc, skip)
            }

            // The link register is written whether or not the branch
            // is taken, after the condition has been evaluated.
            Bltzal | Bltzall | Bgezal | Bgezall => {
                let taken_if_zero = matches!(desc.insn.kind, Bgezal | Bgezall);
                if rs == 0 {
                    self.store_link(31, desc.pc);
                    return if taken_if_zero {
                        self.append_delay_slot_and_branch(compiler, desc)
                    } else {
                        Ok(())
                    };
                }
                self.cmp_gpr_zero(rs);
                self.store_link(31, desc.pc);
                let skip = if taken_if_zero { X86Cond::Jl } else { X86Cond::Jge };
                self.emit_conditional_branch(compiler, desc, skip)
            }

            Bc1f | Bc1fl | Bc1t | Bc1tl => {
                self.check_cop1_usable(compiler, desc)?;
                emit_cmp_mb(&mut self.buf, AREG0, fcc_offset(o.branch_cc() as usize), 0);
                let skip = if matches!(desc.insn.kind, Bc1f | Bc1fl) {
                    X86Cond::Jne
                } else {
                    X86Cond::Je
                };
                self.emit_conditional_branch(compiler, desc, skip)
            }

            _ => Err(unimplemented(desc)),
        }
    }
}
