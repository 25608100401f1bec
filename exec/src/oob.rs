//! Deferred ("out of band") handler requests.
//!
//! Rarely taken paths (exceptions, the cycle-budget exit, validation
//! failures) are emitted after the sequence body so the hot path
//! stays straight. The body records a request at the branch or call
//! site; once the body is complete every request is finished in
//! order.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::state::ICOUNT_OFFSET;
use mips3_core::{Error, Label, Result};
use mips3_frontend::InsnDesc;

use crate::compiler::CompilerState;
use crate::Drc;

/// How the body reaches the deferred code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobCond {
    /// Unconditional jump emitted now.
    Always,
    /// Conditional jump emitted now.
    If(X86Cond),
    /// Nothing is emitted; the request is keyed to the return
    /// address of the call that was just emitted and reached
    /// through the fault-site map.
    CallSite,
}

/// Which tail the deferred code gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finisher {
    /// Re-enter at the faulting instruction: `edi` = its PC, with
    /// bit 0 set in a delay slot.
    Exception,
    /// Resume after the instruction: `edi` = the PC that would have
    /// executed next.
    Interrupt,
}

/// Where execution resumes after a delay-slot instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Fixed(u32),
    /// Taken from the indirect-branch slot in the frame.
    Frame,
}

#[derive(Debug)]
struct Request {
    link: Label,
    site: Option<usize>,
    finisher: Finisher,
    cycles: u32,
    pc: u32,
    in_delay: bool,
    resume: Resume,
    target: usize,
}

/// Bounded list of pending requests.
#[derive(Debug)]
pub struct OobQueue {
    requests: Vec<Request>,
    limit: usize,
}

impl OobQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            requests: Vec::new(),
            limit,
        }
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    fn push(&mut self, req: Request) -> Result<()> {
        if self.requests.len() >= self.limit {
            return Err(Error::OobOverflow { limit: self.limit });
        }
        self.requests.push(req);
        Ok(())
    }
}

impl Drc {
    /// Record a deferred handler for `desc` that ends at the stub or
    /// trampoline at offset `target`.
    pub(crate) fn oob_request(
        &mut self,
        cond: OobCond,
        finisher: Finisher,
        compiler: &CompilerState,
        desc: &InsnDesc,
        target: usize,
    ) -> Result<()> {
        let in_delay = desc.in_delay_slot();
        let resume = match desc.branch.and_then(|id| self.seq.desc(id)) {
            Some(branch) if in_delay && branch.has_static_target() => {
                Resume::Fixed(branch.targetpc)
            }
            _ if in_delay => Resume::Frame,
            _ => Resume::Fixed(desc.pc.wrapping_add(4)),
        };

        let mut link = Label::new();
        let mut site = None;
        match cond {
            OobCond::Always => emit_jmp_label(&mut self.buf, &mut link),
            OobCond::If(c) => emit_jcc_label(&mut self.buf, c, &mut link),
            OobCond::CallSite => site = Some(self.buf.offset()),
        }

        self.oob.push(Request {
            link,
            site,
            finisher,
            cycles: compiler.cycles,
            pc: desc.pc,
            in_delay,
            resume,
            target,
        })
    }

    /// Emit the bodies of all pending requests.
    pub(crate) fn finish_oob(&mut self) {
        let requests = std::mem::take(&mut self.oob.requests);
        for mut req in requests {
            bind_label(&mut self.buf, &mut req.link);
            if let Some(site) = req.site {
                let ret = self.buf.addr_at(site);
                let here = self.buf.current_addr();
                self.faults.insert(ret, here);
            }

            if req.cycles != 0 {
                emit_arith_mi(
                    &mut self.buf,
                    ArithOp::Sub,
                    false,
                    AREG0,
                    ICOUNT_OFFSET,
                    req.cycles as i32,
                );
            }

            match (req.finisher, req.resume) {
                (Finisher::Exception, _) => {
                    let p1 = req.pc | req.in_delay as u32;
                    emit_mov_ri(&mut self.buf, false, P1, p1 as u64);
                }
                (Finisher::Interrupt, Resume::Fixed(pc)) => {
                    emit_mov_ri(&mut self.buf, false, P1, pc as u64);
                }
                (Finisher::Interrupt, Resume::Frame) => {
                    emit_load(&mut self.buf, false, P1, Reg::Rsp, SLOT_NEXTPC);
                }
            }
            emit_jmp(&mut self.buf, req.target);
        }
        self.oob.clear();
    }
}
