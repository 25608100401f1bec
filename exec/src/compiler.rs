//! Sequence compiler: turns a described chain into host code.
//!
//! A chain is split into sub-sequences at `END_SEQUENCE`. Each
//! sub-sequence head is registered in the entry table at a guard
//! that re-checks the opcode words it was compiled from; every other
//! non-delay-slot instruction is registered at its own code.
//! Cycles are accumulated at compile time and charged to `icount`
//! at entry points, memory accesses and sub-sequence ends.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::state::{ICOUNT_OFFSET, PC_OFFSET, TLB_TABLE_OFFSET};
use mips3_core::tlb::TLB_UNMAPPED;
use mips3_core::{Error, Exception, MipsState, Result};
use mips3_frontend::{DescFlags, InsnDesc};

use crate::emit::EMIT;
use crate::fastram::GuestFetch;
use crate::helpers::{helper_step, HookSlot};
use crate::oob::{Finisher, OobCond};
use crate::Drc;

/// Code cache space that must be free before compiling a sequence.
pub const SEQUENCE_RESERVE: usize = 256 * 1024;

/// Per-path compile-time state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerState {
    /// Cycles executed since `icount` was last charged.
    pub cycles: u32,
}

/// A jump to the dispatcher that may be redirected to known code
/// once the sequence is complete.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tentative {
    field: usize,
    pc: u32,
}

impl Drc {
    /// Compile the code around `state.pc` into the cache.
    ///
    /// On any error the cache is flushed, so no partially emitted
    /// sequence stays reachable.
    pub fn recompile(&mut self, state: &mut MipsState) -> Result<()> {
        let remaining = self.buf.remaining();
        if remaining < SEQUENCE_RESERVE {
            return Err(Error::CodeBufferExhausted { remaining });
        }

        let pc = state.pc;
        let minpc = pc.saturating_sub(self.config.window_before);
        let maxpc = pc.saturating_add(self.config.window_after);
        let limit = self.config.sequence_limit();
        let head = {
            let mut src = GuestFetch {
                state: &mut *state,
                fastram: &self.fastram,
            };
            self.seq.describe_sequence(&mut src, pc, minpc, maxpc, limit)?
        };
        let chain: Vec<InsnDesc> = self.seq.chain(head).map(|(_, d)| d.clone()).collect();

        self.tlb_pages.clear();
        for desc in chain.iter().filter(|d| d.has(DescFlags::VALIDATE_TLB)) {
            self.tlb_pages.insert(desc.pc >> 12, state.tlb.lookup(desc.pc));
        }

        let start = self.buf.offset();
        self.oob.clear();
        self.tentative.clear();
        let result = self.compile_chain(&chain).map(|()| {
            self.finish_oob();
            self.resolve_tentative();
        });
        self.seq.release(head);

        if let Err(e) = result {
            log::warn!("compile of {pc:#010x} failed, flushing code cache: {e}");
            self.flush();
            return Err(e);
        }
        log::debug!(
            "compiled {:#010x}: {} instructions, {} bytes",
            pc,
            chain.len(),
            self.buf.offset() - start
        );
        Ok(())
    }

    fn compile_chain(&mut self, chain: &[InsnDesc]) -> Result<()> {
        let Some(first) = chain.first() else {
            return Ok(());
        };
        let startpc = first.pc;
        let mut override_existing = false;
        let mut i = 0;

        while i < chain.len() {
            let end = chain[i..]
                .iter()
                .position(|d| d.has(DescFlags::END_SEQUENCE))
                .map_or(chain.len() - 1, |n| i + n);
            let seq = &chain[i..=end];
            let head = &seq[0];

            // An existing head on the first sub-sequence means we are
            // here because that code went stale: replace everything.
            if let Some(existing) = self.entries.lookup(head.pc) {
                if i == 0 {
                    override_existing = true;
                } else if !override_existing {
                    self.emit_fixed_dispatch(head.pc, existing);
                    i = end + 1;
                    continue;
                }
            }

            let addr = self.buf.current_addr();
            self.entries.register(head.pc, addr);
            self.emit_validation(seq);

            let mut compiler = CompilerState::default();
            for (k, desc) in seq.iter().enumerate() {
                if k > 0 && !desc.in_delay_slot() {
                    self.flush_cycles(&mut compiler, 0);
                    let addr = self.buf.current_addr();
                    self.entries.register(desc.pc, addr);
                }
                self.compile_one(&mut compiler, desc)?;
            }
            self.emit_sequence_end(&mut compiler, seq, chain.get(end + 1), startpc);
            i = end + 1;
        }
        Ok(())
    }

    /// `mov edi, pc; jmp` straight into code compiled earlier.
    fn emit_fixed_dispatch(&mut self, pc: u32, existing: u64) {
        emit_mov_ri(&mut self.buf, false, P1, pc as u64);
        match self.buf.offset_of_addr(existing) {
            Some(off) => emit_jmp(&mut self.buf, off),
            None => emit_jmp(&mut self.buf, self.stubs.dispatch),
        }
    }

    /// Compare every opcode word of the sub-sequence against the
    /// memory it was fetched from; any difference recompiles.
    fn emit_validation(&mut self, seq: &[InsnDesc]) {
        let miss = self.stubs.miss;
        emit_mov_ri(&mut self.buf, false, P1, seq[0].pc as u64);

        let delays: Vec<InsnDesc> = seq
            .iter()
            .filter_map(|d| d.delay.and_then(|id| self.seq.desc(id)).cloned())
            .collect();
        let mut base: Option<u64> = None;
        let mut unchecked = 0usize;
        for desc in seq.iter().chain(delays.iter()) {
            let Some(ptr) = desc.opptr else {
                if desc.physpc.is_some() {
                    unchecked += 1;
                }
                continue;
            };
            let addr = ptr.as_ptr() as u64;
            let disp = match base {
                Some(b) if addr.wrapping_sub(b) < 0x7fff_0000 => addr - b,
                _ => {
                    emit_mov_ri64(&mut self.buf, Reg::Rax, addr);
                    base = Some(addr);
                    0
                }
            };
            emit_arith_mi(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, disp as i32, desc.opcode() as i32);
            emit_jcc(&mut self.buf, X86Cond::Jne, miss);
        }
        if unchecked != 0 {
            log::warn!(
                "{unchecked} opcodes near {:#010x} are outside fast RAM and cannot be validated",
                seq[0].pc
            );
        }
    }

    /// Compile one instruction, accumulating its cycles in `compiler`.
    pub(crate) fn compile_one(&mut self, compiler: &mut CompilerState, desc: &InsnDesc) -> Result<()> {
        if self.config.single_step {
            let slot = &mut *self.step_hook as *mut HookSlot as u64;
            emit_store_imm(&mut self.buf, false, AREG0, PC_OFFSET, desc.pc as i32);
            emit_mov_ri64(&mut self.buf, P2, slot);
            self.call_state_helper(helper_step as *const () as u64);
        }

        let mismatch = self.stubs.tlb_mismatch;
        if desc.has(DescFlags::VALIDATE_TLB) {
            let page = desc.pc >> 12;
            let expected = self.tlb_pages.get(&page).copied().unwrap_or(TLB_UNMAPPED);
            emit_load(&mut self.buf, true, Reg::Rax, AREG0, TLB_TABLE_OFFSET);
            emit_arith_mi(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, (page * 4) as i32, expected as i32);
            self.oob_request(OobCond::If(X86Cond::Jne), Finisher::Exception, compiler, desc, mismatch)?;
        }

        // the fetch itself faulted: nothing to execute, nothing charged
        if desc.physpc.is_none() {
            return self.oob_request(OobCond::Always, Finisher::Exception, compiler, desc, mismatch);
        }

        compiler.cycles += desc.cycles + self.config.hotspot_cycles(desc.pc, desc.opcode());

        if desc.has(DescFlags::INVALID_OPCODE) {
            let stub = self.stubs.exception(Exception::InvalidOp);
            return self.oob_request(OobCond::Always, Finisher::Exception, compiler, desc, stub);
        }

        EMIT[desc.insn.family() as usize](self, compiler, desc)?;

        // Memory may have raised an interrupt; check the budget here.
        if desc.has(DescFlags::READS_MEMORY | DescFlags::WRITES_MEMORY) && !desc.in_delay_slot() {
            emit_arith_mi(&mut self.buf, ArithOp::Sub, false, AREG0, ICOUNT_OFFSET, compiler.cycles as i32);
            compiler.cycles = 0;
            let exit = self.stubs.exit_cycles;
            self.oob_request(OobCond::If(X86Cond::Js), Finisher::Interrupt, compiler, desc, exit)?;
        }
        Ok(())
    }

    /// Charge the remaining cycles and leave for the next PC.
    fn emit_sequence_end(
        &mut self,
        compiler: &mut CompilerState,
        seq: &[InsnDesc],
        next: Option<&InsnDesc>,
        startpc: u32,
    ) {
        let Some(last) = seq.last() else {
            return;
        };
        if last.has(DescFlags::IS_UNCONDITIONAL_BRANCH | DescFlags::WILL_CAUSE_EXCEPTION) {
            return;
        }
        let nextpc = if last.has(DescFlags::RETURN_TO_START) {
            startpc
        } else if last.has(DescFlags::IS_LIKELY_BRANCH) {
            last.pc.wrapping_add(8)
        } else {
            last.pc.wrapping_add(4)
        };

        emit_mov_ri(&mut self.buf, false, P1, nextpc as u64);
        emit_arith_mi(&mut self.buf, ArithOp::Sub, false, AREG0, ICOUNT_OFFSET, compiler.cycles as i32);
        emit_jcc(&mut self.buf, X86Cond::Js, self.stubs.exit_cycles);
        compiler.cycles = 0;

        let falls_through = next.is_some_and(|n| n.pc == nextpc)
            && !last.has(DescFlags::REDISPATCH | DescFlags::RETURN_TO_START);
        if !falls_through {
            self.emit_tentative_jump(nextpc);
        }
    }

    /// Jump to the dispatcher for `pc` (already in `edi`), to be
    /// redirected to the code for `pc` if it exists once this
    /// sequence is done.
    pub(crate) fn emit_tentative_jump(&mut self, pc: u32) {
        emit_jmp(&mut self.buf, self.stubs.dispatch);
        let field = self.buf.offset() - 4;
        self.tentative.push(Tentative { field, pc });
    }

    fn resolve_tentative(&mut self) {
        for t in std::mem::take(&mut self.tentative) {
            let target = self
                .entries
                .lookup(t.pc)
                .and_then(|addr| self.buf.offset_of_addr(addr));
            if let Some(off) = target {
                patch_rel32(&mut self.buf, t.field, off);
            }
        }
    }
}
