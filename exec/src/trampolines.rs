//! Memory access trampolines.
//!
//! Generated code performs every guest load and store as a `call`
//! to one of these. Arguments: `edi` = virtual address, `rsi` = store
//! value, `rdx` = keep mask for partial stores; loads return in
//! `rax`. All other caller-saved registers are clobbered.
//!
//! Each access kind has three entries. The general one walks the
//! TLB table for mapped addresses; for kseg0/kseg1 addresses it
//! rewrites the caller's `call` displacement to point at the cached
//! or uncached variant, which skip translation entirely. If such a
//! site later sees a different segment, the kseg variant rewrites it
//! back to the general entry.

use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::state::TLB_TABLE_OFFSET;
use mips3_core::tlb::{TLB_NO_READ, TLB_NO_WRITE, TLB_PAGE_MASK};
use mips3_core::Label;

use crate::helpers::helper_mem_access;
use crate::Drc;

const KSEG0_BASE: u32 = 0x8000_0000;
const KSEG1_BASE: u32 = 0xa000_0000;
const KSEG2_BASE: u32 = 0xc000_0000;
const KSEG_SIZE: u32 = 0x2000_0000;

/// Width, signedness and direction of one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Access {
    ReadByteSigned = 0,
    ReadByteUnsigned,
    ReadHalfSigned,
    ReadHalfUnsigned,
    ReadWordSigned,
    ReadWordUnsigned,
    ReadDword,
    WriteByte,
    WriteHalf,
    WriteWord,
    WriteWordMasked,
    WriteDword,
    WriteDwordMasked,
}

impl Access {
    pub const COUNT: usize = 13;

    pub const ALL: [Access; Access::COUNT] = [
        Access::ReadByteSigned,
        Access::ReadByteUnsigned,
        Access::ReadHalfSigned,
        Access::ReadHalfUnsigned,
        Access::ReadWordSigned,
        Access::ReadWordUnsigned,
        Access::ReadDword,
        Access::WriteByte,
        Access::WriteHalf,
        Access::WriteWord,
        Access::WriteWordMasked,
        Access::WriteDword,
        Access::WriteDwordMasked,
    ];

    pub fn from_u32(v: u32) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    #[inline]
    pub fn is_write(self) -> bool {
        self as u32 >= Access::WriteByte as u32
    }

    /// Access width in bytes.
    pub fn size(self) -> u32 {
        use Access::*;
        match self {
            ReadByteSigned | ReadByteUnsigned | WriteByte => 1,
            ReadHalfSigned | ReadHalfUnsigned | WriteHalf => 2,
            ReadWordSigned | ReadWordUnsigned | WriteWord | WriteWordMasked => 4,
            ReadDword | WriteDword | WriteDwordMasked => 8,
        }
    }
}

/// Entry offsets of the general trampolines.
#[derive(Debug, Clone, Default)]
pub struct Trampolines {
    general: [usize; Access::COUNT],
}

impl Trampolines {
    #[inline]
    pub fn general(&self, access: Access) -> usize {
        self.general[access as usize]
    }
}

impl Drc {
    /// Emit all trampolines. The fault-site stub must already exist.
    pub(crate) fn emit_trampolines(&mut self) {
        for access in Access::ALL {
            let mut to_general = Label::new();
            let cached = self.emit_kseg_trampoline(access, KSEG0_BASE, &mut to_general);
            let uncached = self.emit_kseg_trampoline(access, KSEG1_BASE, &mut to_general);
            let general = self.emit_general_trampoline(access, cached, uncached);
            bind_label(&mut self.buf, &mut to_general);
            self.emit_retarget(general);
            self.tramps.general[access as usize] = general;
        }
    }

    fn emit_kseg_trampoline(&mut self, access: Access, base: u32, wrong: &mut Label) -> usize {
        let start = self.buf.offset();
        let b = &mut self.buf;
        emit_mov_rr(b, false, Reg::Rax, P1);
        emit_arith_ri(b, ArithOp::Sub, false, Reg::Rax, base as i32);
        emit_arith_ri(b, ArithOp::Cmp, false, Reg::Rax, KSEG_SIZE as i32);
        emit_jcc_label(b, X86Cond::Jae, wrong);
        emit_mov_rr(b, false, P1, Reg::Rax);
        self.emit_physical_access(access);
        start
    }

    fn emit_general_trampoline(&mut self, access: Access, cached: usize, uncached: usize) -> usize {
        let start = self.buf.offset();
        let mut kernel = Label::new();
        let mut mapped = Label::new();
        let mut fault = Label::new();
        let mut to_cached = Label::new();
        let mut to_uncached = Label::new();
        let deny = if access.is_write() {
            TLB_NO_WRITE
        } else {
            TLB_NO_READ
        };

        let b = &mut self.buf;
        emit_test_rr(b, false, P1, P1);
        emit_jcc_label(b, X86Cond::Js, &mut kernel);

        bind_label(b, &mut mapped);
        emit_mov_rr(b, false, Reg::Rax, P1);
        emit_shift_ri(b, ShiftOp::Shr, false, Reg::Rax, 12);
        emit_load(b, true, Reg::Rcx, AREG0, TLB_TABLE_OFFSET);
        emit_load_sib(b, false, Reg::Rax, Reg::Rcx, Reg::Rax, 2);
        emit_test_ri(b, false, Reg::Rax, deny);
        emit_jcc_label(b, X86Cond::Jne, &mut fault);
        emit_arith_ri(b, ArithOp::And, false, Reg::Rax, TLB_PAGE_MASK as i32);
        emit_arith_ri(b, ArithOp::And, false, P1, 0xfff);
        emit_arith_rr(b, ArithOp::Or, false, P1, Reg::Rax);
        self.emit_physical_access(access);

        let b = &mut self.buf;
        bind_label(b, &mut kernel);
        emit_arith_ri(b, ArithOp::Cmp, false, P1, KSEG2_BASE as i32);
        emit_jcc_label(b, X86Cond::Jae, &mut mapped);
        emit_test_ri(b, false, P1, KSEG1_BASE & !KSEG0_BASE);
        emit_jcc_label(b, X86Cond::Jne, &mut to_uncached);
        emit_jmp_label(b, &mut to_cached);

        bind_label(b, &mut fault);
        emit_mov_rr(b, false, P2, P1);
        emit_jmp(b, self.stubs.find_handler);

        bind_label(&mut self.buf, &mut to_cached);
        self.emit_retarget(cached);
        bind_label(&mut self.buf, &mut to_uncached);
        self.emit_retarget(uncached);
        start
    }

    /// Point the caller's `call` at `target` and tail-jump there.
    fn emit_retarget(&mut self, target: usize) {
        let addr = self.buf.addr_at(target);
        let b = &mut self.buf;
        emit_mov_ri64(b, Reg::Rax, addr);
        emit_load(b, true, Reg::Rcx, Reg::Rsp, 0);
        emit_arith_rr(b, ArithOp::Sub, true, Reg::Rax, Reg::Rcx);
        emit_store(b, false, Reg::Rax, Reg::Rcx, -4);
        emit_jmp(b, target);
    }

    /// The access proper, with `edi` holding a physical address.
    fn emit_physical_access(&mut self, access: Access) {
        let big_endian = self.config.big_endian;
        let windows = self.fastram.clone();
        for win in windows.iter().filter(|w| !(access.is_write() && w.readonly)) {
            let mut next = Label::new();
            let b = &mut self.buf;
            if win.end != u32::MAX {
                emit_arith_ri(b, ArithOp::Cmp, false, P1, win.end as i32);
                emit_jcc_label(b, X86Cond::Ja, &mut next);
            }
            if win.start != 0 {
                emit_arith_ri(b, ArithOp::Cmp, false, P1, win.start as i32);
                emit_jcc_label(b, X86Cond::Jb, &mut next);
            }
            if big_endian {
                match access.size() {
                    1 => emit_arith_ri(b, ArithOp::Xor, false, P1, 3),
                    2 => emit_arith_ri(b, ArithOp::Xor, false, P1, 2),
                    _ => {}
                }
            }
            emit_mov_ri64(b, Reg::Rax, win.bias());
            emit_arith_rr(b, ArithOp::Add, true, Reg::Rax, P1);
            emit_host_access(b, access, big_endian);
            emit_ret(b);
            bind_label(b, &mut next);
        }

        // Nothing matched: go through the bus.
        let b = &mut self.buf;
        emit_arith_ri(b, ArithOp::Sub, true, Reg::Rsp, 8);
        emit_mov_rr(b, true, P4, P3);
        emit_mov_rr(b, true, P3, P2);
        emit_mov_rr(b, false, P2, P1);
        emit_mov_rr(b, true, P1, AREG0);
        emit_mov_ri(b, false, Reg::R8, access as u64);
        emit_call_abs(b, helper_mem_access as *const () as u64);
        emit_arith_ri(b, ArithOp::Add, true, Reg::Rsp, 8);
        emit_ret(b);
    }
}

/// Load or store through the host pointer in `rax`.
fn emit_host_access(b: &mut mips3_backend::CodeBuffer, access: Access, big_endian: bool) {
    use Access::*;
    match access {
        ReadByteSigned => emit_load_ext(b, OPC_MOVSBQ, Reg::Rax, Reg::Rax, 0),
        ReadByteUnsigned => emit_load_ext(b, OPC_MOVZBL, Reg::Rax, Reg::Rax, 0),
        ReadHalfSigned => emit_load_ext(b, OPC_MOVSWQ, Reg::Rax, Reg::Rax, 0),
        ReadHalfUnsigned => emit_load_ext(b, OPC_MOVZWL, Reg::Rax, Reg::Rax, 0),
        ReadWordSigned => emit_load_ext(b, OPC_MOVSLQ, Reg::Rax, Reg::Rax, 0),
        ReadWordUnsigned => emit_load(b, false, Reg::Rax, Reg::Rax, 0),
        ReadDword => {
            emit_load(b, true, Reg::Rax, Reg::Rax, 0);
            if big_endian {
                emit_shift_ri(b, ShiftOp::Ror, true, Reg::Rax, 32);
            }
        }
        WriteByte => emit_store_byte(b, P2, Reg::Rax, 0),
        WriteHalf => emit_store_half(b, P2, Reg::Rax, 0),
        WriteWord => emit_store(b, false, P2, Reg::Rax, 0),
        WriteWordMasked => {
            emit_load(b, false, Reg::Rcx, Reg::Rax, 0);
            emit_arith_rr(b, ArithOp::And, false, Reg::Rcx, P3);
            emit_not(b, false, P3);
            emit_arith_rr(b, ArithOp::And, false, P2, P3);
            emit_arith_rr(b, ArithOp::Or, false, Reg::Rcx, P2);
            emit_store(b, false, Reg::Rcx, Reg::Rax, 0);
        }
        WriteDword => {
            if big_endian {
                emit_shift_ri(b, ShiftOp::Ror, true, P2, 32);
            }
            emit_store(b, true, P2, Reg::Rax, 0);
        }
        WriteDwordMasked => {
            if big_endian {
                emit_shift_ri(b, ShiftOp::Ror, true, P2, 32);
                emit_shift_ri(b, ShiftOp::Ror, true, P3, 32);
            }
            emit_load(b, true, Reg::Rcx, Reg::Rax, 0);
            emit_arith_rr(b, ArithOp::And, true, Reg::Rcx, P3);
            emit_not(b, true, P3);
            emit_arith_rr(b, ArithOp::And, true, P2, P3);
            emit_arith_rr(b, ArithOp::Or, true, Reg::Rcx, P2);
            emit_store(b, true, Reg::Rcx, Reg::Rax, 0);
        }
    }
}
