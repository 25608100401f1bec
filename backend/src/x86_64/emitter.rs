//! x86-64 instruction encoders.
//!
//! An opcode travels as a `u32`: the low byte is the opcode byte and
//! the `P_*` bits above it ask for prefixes. Encoders append to a
//! [`CodeBuffer`] and know nothing about guest state; `wide` selects
//! the 64-bit operand size.

use mips3_core::{Label, RelocKind};

use crate::code_buffer::CodeBuffer;
use crate::x86_64::regs::{Reg, AREG0, CALLEE_SAVED, CALL_ARG_REGS, STACK_ADDEND};
use crate::HostCodeGen;

// ── Opcode words ──────────────────────────────────────────────

/// `0x0f` escape.
pub const P_EXT: u32 = 0x100;
/// `0x66` operand-size override.
pub const P_DATA16: u32 = 0x400;
pub const P_REXW: u32 = 0x1000;
/// The reg field names a byte register.
pub const P_REXB_R: u32 = 0x2000;
/// The r/m field names a byte register.
pub const P_REXB_RM: u32 = 0x4000;

/// Extending moves for [`emit_movzx`], [`emit_movsx`] and
/// [`emit_load_ext`].
pub const OPC_MOVZBL: u32 = 0xB6 | P_EXT;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_MOVSBQ: u32 = 0xBE | P_EXT | P_REXW;
pub const OPC_MOVSWQ: u32 = 0xBF | P_EXT | P_REXW;
pub const OPC_MOVSLQ: u32 = 0x63 | P_REXW;

const ALU_EB_IB: u32 = 0x80;
const ALU_EV_IZ: u32 = 0x81;
const ALU_EV_IB: u32 = 0x83;
/// First register-form row; `op << 3` picks the operation.
const ALU_GV_EV: u32 = 0x03;
const XOR_EV_GV: u32 = 0x31;
const SHIFT_ONE: u32 = 0xD1;
const SHIFT_IB: u32 = 0xC1;
const SHIFT_CL: u32 = 0xD3;
const MOV_EB_GB: u32 = 0x88;
const MOV_EV_GV: u32 = 0x89;
const MOV_GV_EV: u32 = 0x8B;
const MOV_EV_IZ: u32 = 0xC7;
const MOV_R_IV: u32 = 0xB8;
const TEST_EV_GV: u32 = 0x85;
const IMUL_GV_EV: u32 = 0xAF | P_EXT;
const SETCC: u32 = 0x90 | P_EXT | P_REXB_RM;
const JCC_REL32: u32 = 0x80 | P_EXT;
const JMP_REL32: u32 = 0xE9;
const CALL_REL32: u32 = 0xE8;
const PUSH_R: u32 = 0x50;
const POP_R: u32 = 0x58;
const RET: u8 = 0xC3;

const GROUP3: u32 = 0xF7;
const G3_TEST: u8 = 0;
const G3_NOT: u8 = 2;
const G3_MUL: u8 = 4;
const G3_IMUL: u8 = 5;

const GROUP5: u32 = 0xFF;
const G5_CALL: u8 = 2;
const G5_JMP: u8 = 4;

/// Two-operand ALU operations. The value is the `/digit` of the
/// immediate forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Ror = 1,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Condition codes, numbered as in the low nibble of `Jcc`/`SETcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jo = 0x0,
    Jno = 0x1,
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jp = 0xA,
    Jnp = 0xB,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

impl X86Cond {
    const ALL: [Self; 16] = [
        Self::Jo,
        Self::Jno,
        Self::Jb,
        Self::Jae,
        Self::Je,
        Self::Jne,
        Self::Jbe,
        Self::Ja,
        Self::Js,
        Self::Jns,
        Self::Jp,
        Self::Jnp,
        Self::Jl,
        Self::Jge,
        Self::Jle,
        Self::Jg,
    ];

    /// The opposite condition: codes come in pairs differing in bit 0.
    pub fn invert(self) -> Self {
        Self::ALL[self as usize ^ 1]
    }
}

// ── Operand encoding ──────────────────────────────────────────

#[inline]
fn width(wide: bool) -> u32 {
    if wide {
        P_REXW
    } else {
        0
    }
}

/// REX byte for an instruction whose fields hold register numbers
/// `r`, `rm` and `index`.
fn rex_for(opc: u32, r: u8, rm: u8, index: u8) -> Option<u8> {
    let bits = (u8::from(opc & P_REXW != 0) << 3)
        | (u8::from(r >= 8) << 2)
        | (u8::from(index >= 8) << 1)
        | u8::from(rm >= 8);
    // spl, bpl, sil and dil are only addressable with a REX present
    let low_byte = (opc & P_REXB_R != 0 && r >= 4) || (opc & P_REXB_RM != 0 && rm >= 4);
    (bits != 0 || low_byte).then_some(0x40 | bits)
}

/// Prefixes, REX and the opcode byte.
fn emit_opcode(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8, index: u8) {
    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if let Some(rex) = rex_for(opc, r, rm, index) {
        buf.emit_u8(rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

/// Register-direct form. `r` is a register number or a `/digit`.
fn modrm_reg(buf: &mut CodeBuffer, opc: u32, r: u8, rm: Reg) {
    emit_opcode(buf, opc, r, rm as u8, 0);
    buf.emit_u8(0xC0 | ((r & 7) << 3) | rm.low3());
}

/// `[base + disp]` form. `rbp`/`r13` have no displacement-free
/// encoding and `rsp`/`r12` always take a SIB byte.
fn modrm_mem(buf: &mut CodeBuffer, opc: u32, r: u8, base: Reg, disp: i32) {
    emit_opcode(buf, opc, r, base as u8, 0);
    let b = base.low3();
    let (mode, disp_len) = match disp {
        0 if b != 5 => (0x00, 0),
        -128..=127 => (0x40, 1),
        _ => (0x80, 4),
    };
    buf.emit_u8(mode | ((r & 7) << 3) | b);
    if b == 4 {
        buf.emit_u8(0x24);
    }
    match disp_len {
        1 => buf.emit_u8(disp as u8),
        4 => buf.emit_u32(disp as u32),
        _ => {}
    }
}

/// `[base + index << shift]` form.
fn modrm_sib(buf: &mut CodeBuffer, opc: u32, r: u8, base: Reg, index: Reg, shift: u8) {
    emit_opcode(buf, opc, r, base as u8, index as u8);
    let sib = (shift << 6) | (index.low3() << 3) | base.low3();
    if base.low3() == 5 {
        buf.emit_u8(0x44 | ((r & 7) << 3));
        buf.emit_u8(sib);
        buf.emit_u8(0);
    } else {
        buf.emit_u8(0x04 | ((r & 7) << 3));
        buf.emit_u8(sib);
    }
}

/// Opcode for `op r/m, imm`, preferring the sign-extended imm8 form.
fn alu_imm(wide: bool, imm: i32) -> (u32, bool) {
    let short = i8::try_from(imm).is_ok();
    let opc = if short { ALU_EV_IB } else { ALU_EV_IZ };
    (opc | width(wide), short)
}

fn emit_imm(buf: &mut CodeBuffer, imm: i32, short: bool) {
    if short {
        buf.emit_u8(imm as u8);
    } else {
        buf.emit_u32(imm as u32);
    }
}

#[inline]
fn alu_row(op: ArithOp, wide: bool) -> u32 {
    (ALU_GV_EV + ((op as u32) << 3)) | width(wide)
}

// ── ALU ───────────────────────────────────────────────────────

pub fn emit_arith_rr(buf: &mut CodeBuffer, op: ArithOp, wide: bool, dst: Reg, src: Reg) {
    modrm_reg(buf, alu_row(op, wide), dst as u8, src);
}

pub fn emit_arith_ri(buf: &mut CodeBuffer, op: ArithOp, wide: bool, dst: Reg, imm: i32) {
    let (opc, short) = alu_imm(wide, imm);
    modrm_reg(buf, opc, op as u8, dst);
    emit_imm(buf, imm, short);
}

/// `op dst, [base + offset]`.
pub fn emit_arith_rm(buf: &mut CodeBuffer, op: ArithOp, wide: bool, dst: Reg, base: Reg, offset: i32) {
    modrm_mem(buf, alu_row(op, wide), dst as u8, base, offset);
}

/// `op [base + offset], imm`; used on `icount` and guest registers
/// in the state block.
pub fn emit_arith_mi(buf: &mut CodeBuffer, op: ArithOp, wide: bool, base: Reg, offset: i32, imm: i32) {
    let (opc, short) = alu_imm(wide, imm);
    modrm_mem(buf, opc, op as u8, base, offset);
    emit_imm(buf, imm, short);
}

/// `cmp byte [base + offset], imm8`.
pub fn emit_cmp_mb(buf: &mut CodeBuffer, base: Reg, offset: i32, imm: u8) {
    modrm_mem(buf, ALU_EB_IB, ArithOp::Cmp as u8, base, offset);
    buf.emit_u8(imm);
}

pub fn emit_not(buf: &mut CodeBuffer, wide: bool, reg: Reg) {
    modrm_reg(buf, GROUP3 | width(wide), G3_NOT, reg);
}

/// Shift by a constant. A zero count emits nothing.
pub fn emit_shift_ri(buf: &mut CodeBuffer, op: ShiftOp, wide: bool, dst: Reg, count: u8) {
    let w = width(wide);
    match count {
        0 => {}
        1 => modrm_reg(buf, SHIFT_ONE | w, op as u8, dst),
        _ => {
            modrm_reg(buf, SHIFT_IB | w, op as u8, dst);
            buf.emit_u8(count);
        }
    }
}

/// Shift by `cl`.
pub fn emit_shift_cl(buf: &mut CodeBuffer, op: ShiftOp, wide: bool, dst: Reg) {
    modrm_reg(buf, SHIFT_CL | width(wide), op as u8, dst);
}

/// `rdx:rax = rax * reg`, unsigned.
pub fn emit_mul(buf: &mut CodeBuffer, wide: bool, reg: Reg) {
    modrm_reg(buf, GROUP3 | width(wide), G3_MUL, reg);
}

/// `rdx:rax = rax * reg`, signed.
pub fn emit_imul1(buf: &mut CodeBuffer, wide: bool, reg: Reg) {
    modrm_reg(buf, GROUP3 | width(wide), G3_IMUL, reg);
}

pub fn emit_imul_rr(buf: &mut CodeBuffer, wide: bool, dst: Reg, src: Reg) {
    modrm_reg(buf, IMUL_GV_EV | width(wide), dst as u8, src);
}

pub fn emit_setcc(buf: &mut CodeBuffer, cond: X86Cond, dst: Reg) {
    modrm_reg(buf, SETCC + cond as u32, 0, dst);
}

pub fn emit_test_rr(buf: &mut CodeBuffer, wide: bool, r1: Reg, r2: Reg) {
    modrm_reg(buf, TEST_EV_GV | width(wide), r1 as u8, r2);
}

pub fn emit_test_ri(buf: &mut CodeBuffer, wide: bool, reg: Reg, imm: u32) {
    modrm_reg(buf, GROUP3 | width(wide), G3_TEST, reg);
    buf.emit_u32(imm);
}

/// `test dword [base + offset], imm32`.
pub fn emit_test_mi(buf: &mut CodeBuffer, base: Reg, offset: i32, imm: u32) {
    modrm_mem(buf, GROUP3, G3_TEST, base, offset);
    buf.emit_u32(imm);
}

// ── Moves ─────────────────────────────────────────────────────

pub fn emit_mov_rr(buf: &mut CodeBuffer, wide: bool, dst: Reg, src: Reg) {
    modrm_reg(buf, MOV_EV_GV | width(wide), src as u8, dst);
}

/// Load a constant with the shortest encoding that yields it:
/// `xor` for zero, a zero-extending `mov r32` when it fits, the
/// sign-extended imm32 form, then `movabs`. Without `wide` only the
/// low 32 bits are loaded.
pub fn emit_mov_ri(buf: &mut CodeBuffer, wide: bool, reg: Reg, val: u64) {
    if val == 0 {
        modrm_reg(buf, XOR_EV_GV, reg as u8, reg);
    } else if !wide || val <= u32::MAX as u64 {
        emit_opcode(buf, MOV_R_IV + reg.low3() as u32, 0, reg as u8, 0);
        buf.emit_u32(val as u32);
    } else if i32::try_from(val as i64).is_ok() {
        modrm_reg(buf, MOV_EV_IZ | P_REXW, 0, reg);
        buf.emit_u32(val as u32);
    } else {
        emit_mov_ri64(buf, reg, val);
    }
}

/// `movabs reg, imm64`; always ten bytes, so callers can patch the
/// immediate.
pub fn emit_mov_ri64(buf: &mut CodeBuffer, reg: Reg, val: u64) {
    emit_opcode(buf, (MOV_R_IV + reg.low3() as u32) | P_REXW, 0, reg as u8, 0);
    buf.emit_u64(val);
}

/// Zero-extending register move (`OPC_MOVZ*`).
pub fn emit_movzx(buf: &mut CodeBuffer, opc: u32, dst: Reg, src: Reg) {
    modrm_reg(buf, opc | P_REXB_RM, dst as u8, src);
}

/// Sign-extending register move (`OPC_MOVS*`).
pub fn emit_movsx(buf: &mut CodeBuffer, opc: u32, dst: Reg, src: Reg) {
    modrm_reg(buf, opc | P_REXB_RM, dst as u8, src);
}

pub fn emit_load(buf: &mut CodeBuffer, wide: bool, dst: Reg, base: Reg, offset: i32) {
    modrm_mem(buf, MOV_GV_EV | width(wide), dst as u8, base, offset);
}

pub fn emit_store(buf: &mut CodeBuffer, wide: bool, src: Reg, base: Reg, offset: i32) {
    modrm_mem(buf, MOV_EV_GV | width(wide), src as u8, base, offset);
}

pub fn emit_store_half(buf: &mut CodeBuffer, src: Reg, base: Reg, offset: i32) {
    modrm_mem(buf, MOV_EV_GV | P_DATA16, src as u8, base, offset);
}

pub fn emit_store_byte(buf: &mut CodeBuffer, src: Reg, base: Reg, offset: i32) {
    modrm_mem(buf, MOV_EB_GB | P_REXB_R, src as u8, base, offset);
}

/// `mov [base + offset], imm32`, sign-extended when `wide`.
pub fn emit_store_imm(buf: &mut CodeBuffer, wide: bool, base: Reg, offset: i32, imm: i32) {
    modrm_mem(buf, MOV_EV_IZ | width(wide), 0, base, offset);
    buf.emit_u32(imm as u32);
}

/// `mov dst, [base + index << shift]`.
pub fn emit_load_sib(buf: &mut CodeBuffer, wide: bool, dst: Reg, base: Reg, index: Reg, shift: u8) {
    modrm_sib(buf, MOV_GV_EV | width(wide), dst as u8, base, index, shift);
}

/// Extending load from `[base + offset]` with one of the `OPC_MOV*X`
/// opcodes.
pub fn emit_load_ext(buf: &mut CodeBuffer, opc: u32, dst: Reg, base: Reg, offset: i32) {
    modrm_mem(buf, opc, dst as u8, base, offset);
}

// ── Control transfer ──────────────────────────────────────────

/// Point the rel32 field at `field` to `target`.
pub fn patch_rel32(buf: &mut CodeBuffer, field: usize, target: usize) {
    let disp = target as i64 - (field as i64 + 4);
    assert!(
        i32::try_from(disp).is_ok(),
        "branch at {field:#x} cannot reach {target:#x}"
    );
    buf.patch_u32(field, disp as u32);
}

/// Opcode followed by a zeroed rel32; returns the field offset.
fn rel32_field(buf: &mut CodeBuffer, opc: u32) -> usize {
    emit_opcode(buf, opc, 0, 0, 0);
    let field = buf.offset();
    buf.emit_u32(0);
    field
}

pub fn emit_jcc(buf: &mut CodeBuffer, cond: X86Cond, target: usize) {
    let field = rel32_field(buf, JCC_REL32 + cond as u32);
    patch_rel32(buf, field, target);
}

pub fn emit_jmp(buf: &mut CodeBuffer, target: usize) {
    let field = rel32_field(buf, JMP_REL32);
    patch_rel32(buf, field, target);
}

pub fn emit_call(buf: &mut CodeBuffer, target: usize) {
    let field = rel32_field(buf, CALL_REL32);
    patch_rel32(buf, field, target);
}

fn emit_to_label(buf: &mut CodeBuffer, opc: u32, label: &mut Label) {
    let field = rel32_field(buf, opc);
    match label.value {
        Some(target) => patch_rel32(buf, field, target),
        None => label.add_use(field, RelocKind::Rel32),
    }
}

pub fn emit_jcc_label(buf: &mut CodeBuffer, cond: X86Cond, label: &mut Label) {
    emit_to_label(buf, JCC_REL32 + cond as u32, label);
}

pub fn emit_jmp_label(buf: &mut CodeBuffer, label: &mut Label) {
    emit_to_label(buf, JMP_REL32, label);
}

/// Bind `label` here and resolve every branch already aimed at it.
pub fn bind_label(buf: &mut CodeBuffer, label: &mut Label) {
    let here = buf.offset();
    label.set_value(here);
    for reloc in label.take_uses() {
        match reloc.kind {
            RelocKind::Rel32 => patch_rel32(buf, reloc.offset, here),
        }
    }
}

/// Call a host function by absolute address; clobbers `rax`.
pub fn emit_call_abs(buf: &mut CodeBuffer, target: u64) {
    emit_mov_ri64(buf, Reg::Rax, target);
    modrm_reg(buf, GROUP5, G5_CALL, Reg::Rax);
}

pub fn emit_jmp_reg(buf: &mut CodeBuffer, reg: Reg) {
    modrm_reg(buf, GROUP5, G5_JMP, reg);
}

/// `jmp [base + index << shift]`: jump through a table of addresses.
pub fn emit_jmp_sib(buf: &mut CodeBuffer, base: Reg, index: Reg, shift: u8) {
    modrm_sib(buf, GROUP5, G5_JMP, base, index, shift);
}

pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    emit_opcode(buf, PUSH_R + reg.low3() as u32, 0, reg as u8, 0);
}

pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    emit_opcode(buf, POP_R + reg.low3() as u32, 0, reg as u8, 0);
}

pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(RET);
}

// ── Entry frame ───────────────────────────────────────────────

/// The frame around generated code: one prologue in the entry stub
/// and one shared epilogue that every exit jumps to.
#[derive(Debug, Default)]
pub struct X86_64CodeGen {
    epilogue: usize,
}

impl X86_64CodeGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave generated code, returning `code` from the entry stub.
    pub fn emit_exit(&self, buf: &mut CodeBuffer, code: u32) {
        emit_mov_ri(buf, false, Reg::Rax, code as u64);
        emit_jmp(buf, self.epilogue);
    }
}

impl HostCodeGen for X86_64CodeGen {
    fn emit_prologue(&mut self, buf: &mut CodeBuffer) {
        for &reg in CALLEE_SAVED {
            emit_push(buf, reg);
        }
        emit_mov_rr(buf, true, AREG0, CALL_ARG_REGS[0]);
        emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, STACK_ADDEND as i32);
    }

    fn emit_epilogue(&mut self, buf: &mut CodeBuffer) {
        self.epilogue = buf.offset();
        emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, STACK_ADDEND as i32);
        for &reg in CALLEE_SAVED.iter().rev() {
            emit_pop(buf, reg);
        }
        emit_ret(buf);
    }

    fn epilogue_offset(&self) -> usize {
        self.epilogue
    }
}
