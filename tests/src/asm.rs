//! Just enough of a MIPS assembler to write test programs.

#![allow(dead_code)]

pub const NOP: u32 = 0;
pub const SYSCALL: u32 = 0x0000_000c;
pub const ERET: u32 = 0x4200_0018;

pub fn special(rs: u32, rt: u32, rd: u32, sa: u32, funct: u32) -> u32 {
    (rs << 21) | (rt << 16) | (rd << 11) | (sa << 6) | funct
}

pub fn itype(op: u32, rs: u32, rt: u32, imm: i32) -> u32 {
    (op << 26) | (rs << 21) | (rt << 16) | (imm as u32 & 0xffff)
}

// ── Immediate ALU ─────────────────────────────────────────────

pub fn addi(rt: u32, rs: u32, imm: i32) -> u32 {
    itype(0x08, rs, rt, imm)
}

pub fn addiu(rt: u32, rs: u32, imm: i32) -> u32 {
    itype(0x09, rs, rt, imm)
}

pub fn slti(rt: u32, rs: u32, imm: i32) -> u32 {
    itype(0x0a, rs, rt, imm)
}

pub fn andi(rt: u32, rs: u32, imm: u16) -> u32 {
    itype(0x0c, rs, rt, imm as i32)
}

pub fn ori(rt: u32, rs: u32, imm: u16) -> u32 {
    itype(0x0d, rs, rt, imm as i32)
}

pub fn xori(rt: u32, rs: u32, imm: u16) -> u32 {
    itype(0x0e, rs, rt, imm as i32)
}

pub fn lui(rt: u32, imm: u16) -> u32 {
    itype(0x0f, 0, rt, imm as i32)
}

pub fn daddiu(rt: u32, rs: u32, imm: i32) -> u32 {
    itype(0x19, rs, rt, imm)
}

// ── Register ALU ──────────────────────────────────────────────

pub fn add(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x20)
}

pub fn addu(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x21)
}

pub fn subu(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x23)
}

pub fn and(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x24)
}

pub fn or(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x25)
}

pub fn xor(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x26)
}

pub fn nor(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x27)
}

pub fn slt(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x2a)
}

pub fn sltu(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x2b)
}

pub fn daddu(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x2d)
}

pub fn sll(rd: u32, rt: u32, sa: u32) -> u32 {
    special(0, rt, rd, sa, 0x00)
}

pub fn srl(rd: u32, rt: u32, sa: u32) -> u32 {
    special(0, rt, rd, sa, 0x02)
}

pub fn sra(rd: u32, rt: u32, sa: u32) -> u32 {
    special(0, rt, rd, sa, 0x03)
}

pub fn dsra(rd: u32, rt: u32, sa: u32) -> u32 {
    special(0, rt, rd, sa, 0x3b)
}

pub fn dsll32(rd: u32, rt: u32, sa: u32) -> u32 {
    special(0, rt, rd, sa, 0x3c)
}

pub fn movz(rd: u32, rs: u32, rt: u32) -> u32 {
    special(rs, rt, rd, 0, 0x0a)
}

// ── HI/LO ─────────────────────────────────────────────────────

pub fn mult(rs: u32, rt: u32) -> u32 {
    special(rs, rt, 0, 0, 0x18)
}

pub fn div(rs: u32, rt: u32) -> u32 {
    special(rs, rt, 0, 0, 0x1a)
}

pub fn divu(rs: u32, rt: u32) -> u32 {
    special(rs, rt, 0, 0, 0x1b)
}

pub fn mfhi(rd: u32) -> u32 {
    special(0, 0, rd, 0, 0x10)
}

pub fn mflo(rd: u32) -> u32 {
    special(0, 0, rd, 0, 0x12)
}

// ── Control flow ──────────────────────────────────────────────

pub fn beq(rs: u32, rt: u32, off: i32) -> u32 {
    itype(0x04, rs, rt, off)
}

pub fn bne(rs: u32, rt: u32, off: i32) -> u32 {
    itype(0x05, rs, rt, off)
}

pub fn beql(rs: u32, rt: u32, off: i32) -> u32 {
    itype(0x14, rs, rt, off)
}

pub fn bnel(rs: u32, rt: u32, off: i32) -> u32 {
    itype(0x15, rs, rt, off)
}

pub fn j(target: u32) -> u32 {
    (0x02 << 26) | ((target >> 2) & 0x03ff_ffff)
}

pub fn jal(target: u32) -> u32 {
    (0x03 << 26) | ((target >> 2) & 0x03ff_ffff)
}

pub fn jr(rs: u32) -> u32 {
    special(rs, 0, 0, 0, 0x08)
}

pub fn teq(rs: u32, rt: u32) -> u32 {
    special(rs, rt, 0, 0, 0x34)
}

/// `b .` with its delay slot: parks the CPU.
pub const HALT: [u32; 2] = [0x1000_ffff, NOP];

// ── Memory ────────────────────────────────────────────────────

fn mem(op: u32, rt: u32, off: i32, base: u32) -> u32 {
    itype(op, base, rt, off)
}

pub fn lb(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x20, rt, off, base)
}

pub fn lh(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x21, rt, off, base)
}

pub fn lwl(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x22, rt, off, base)
}

pub fn lw(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x23, rt, off, base)
}

pub fn lbu(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x24, rt, off, base)
}

pub fn lwr(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x26, rt, off, base)
}

pub fn sb(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x28, rt, off, base)
}

pub fn sw(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x2b, rt, off, base)
}

pub fn swl(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x2a, rt, off, base)
}

pub fn swr(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x2e, rt, off, base)
}

pub fn ld(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x37, rt, off, base)
}

pub fn sd(rt: u32, off: i32, base: u32) -> u32 {
    mem(0x3f, rt, off, base)
}

// ── Coprocessors ──────────────────────────────────────────────

pub fn mfc0(rt: u32, rd: u32) -> u32 {
    (0x10 << 26) | (rt << 16) | (rd << 11)
}

pub fn mtc0(rt: u32, rd: u32) -> u32 {
    (0x10 << 26) | (4 << 21) | (rt << 16) | (rd << 11)
}

pub fn mfc1(rt: u32, fs: u32) -> u32 {
    (0x11 << 26) | (rt << 16) | (fs << 11)
}

pub fn mtc1(rt: u32, fs: u32) -> u32 {
    (0x11 << 26) | (4 << 21) | (rt << 16) | (fs << 11)
}

pub fn add_s(fd: u32, fs: u32, ft: u32) -> u32 {
    (0x11 << 26) | (16 << 21) | (ft << 16) | (fs << 11) | (fd << 6)
}

pub fn c_lt_s(fs: u32, ft: u32) -> u32 {
    (0x11 << 26) | (16 << 21) | (ft << 16) | (fs << 11) | 0x3c
}

pub fn bc1t(off: i32) -> u32 {
    itype(0x11, 8, 1, off)
}

/// Single-precision COP1 arithmetic with function code `funct`.
fn fop_s(funct: u32, fd: u32, fs: u32) -> u32 {
    (0x11 << 26) | (16 << 21) | (fs << 11) | (fd << 6) | funct
}

pub fn round_w_s(fd: u32, fs: u32) -> u32 {
    fop_s(0x0c, fd, fs)
}

pub fn trunc_w_s(fd: u32, fs: u32) -> u32 {
    fop_s(0x0d, fd, fs)
}

pub fn ceil_w_s(fd: u32, fs: u32) -> u32 {
    fop_s(0x0e, fd, fs)
}

pub fn floor_w_s(fd: u32, fs: u32) -> u32 {
    fop_s(0x0f, fd, fs)
}
