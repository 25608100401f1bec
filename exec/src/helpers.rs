//! Host functions called from generated code.
//!
//! Everything here is `extern "C"` and takes the raw state pointer
//! that generated code keeps in `rbp`. Each helper does the one
//! thing that is too awkward to express inline: slow memory, COP0
//! side effects, divides, and FPU arithmetic with per-instruction
//! rounding.

use mips3_core::fpu::{self, FpFormat, FpOp, RoundMode};
use mips3_core::state::sext32;
use mips3_core::{MipsFlavor, MipsState};
use mips3_frontend::{decode, InsnKind};

use crate::trampolines::Access;

/// Host callback run before every instruction in single-step mode.
pub type StepHook = Box<dyn FnMut(&MipsState)>;

/// Owner of the optional step callback; boxed so generated code can
/// embed its address.
#[derive(Default)]
pub struct HookSlot {
    pub hook: Option<StepHook>,
}

/// Access that missed every fast RAM window.
///
/// # Safety
/// `state` must point to a live [`MipsState`].
pub unsafe extern "C" fn helper_mem_access(
    state: *mut MipsState,
    addr: u32,
    value: u64,
    keep: u64,
    kind: u32,
) -> u64 {
    let bus = &mut (*state).bus;
    match Access::from_u32(kind) {
        Some(Access::ReadByteSigned) => bus.read_byte(addr) as i8 as i64 as u64,
        Some(Access::ReadByteUnsigned) => bus.read_byte(addr) as u64,
        Some(Access::ReadHalfSigned) => bus.read_half(addr) as i16 as i64 as u64,
        Some(Access::ReadHalfUnsigned) => bus.read_half(addr) as u64,
        Some(Access::ReadWordSigned) => sext32(bus.read_word(addr)),
        Some(Access::ReadWordUnsigned) => bus.read_word(addr) as u64,
        Some(Access::ReadDword) => bus.read_dword(addr),
        Some(Access::WriteByte) => {
            bus.write_byte(addr, value as u8);
            0
        }
        Some(Access::WriteHalf) => {
            bus.write_half(addr, value as u16);
            0
        }
        Some(Access::WriteWord) => {
            bus.write_word(addr, value as u32);
            0
        }
        Some(Access::WriteWordMasked) => {
            bus.write_word_masked(addr, value as u32, keep as u32);
            0
        }
        Some(Access::WriteDword) => {
            bus.write_dword(addr, value);
            0
        }
        Some(Access::WriteDwordMasked) => {
            bus.write_dword_masked(addr, value, keep);
            0
        }
        None => {
            log::error!("bad memory access kind {kind}");
            0
        }
    }
}

/// MFC0 of a register derived from the cycle counter.
///
/// # Safety
/// `state` must point to a live [`MipsState`].
pub unsafe extern "C" fn helper_mfc0(state: *mut MipsState, reg: u32) -> u64 {
    (*state).read_cop0(reg as usize)
}

/// MTC0/DMTC0; returns nonzero when an interrupt became pending.
///
/// # Safety
/// `state` must point to a live [`MipsState`].
pub unsafe extern "C" fn helper_mtc0(state: *mut MipsState, reg: u32, value: u64) -> u32 {
    (*state).write_cop0(reg as usize, value) as u32
}

pub const TLB_READ: u32 = 0;
pub const TLB_WRITE_INDEXED: u32 = 1;
pub const TLB_WRITE_RANDOM: u32 = 2;
pub const TLB_PROBE: u32 = 3;

/// # Safety
/// `state` must point to a live [`MipsState`].
pub unsafe extern "C" fn helper_tlb(state: *mut MipsState, op: u32) {
    let s = &mut *state;
    match op {
        TLB_READ => s.tlbr(),
        TLB_WRITE_INDEXED => s.tlbwi(),
        TLB_WRITE_RANDOM => s.tlbwr(),
        _ => s.tlbp(),
    }
}

/// Divides and the multiply-accumulate ops, decoded from `op`.
///
/// # Safety
/// `state` must point to a live [`MipsState`].
pub unsafe extern "C" fn helper_muldiv(state: *mut MipsState, op: u32) {
    muldiv(&mut *state, op);
}

pub(crate) fn muldiv(s: &mut MipsState, op: u32) {
    let insn = decode(op, MipsFlavor::Mips3);
    let rs = s.r[insn.ops.rs as usize];
    let rt = s.r[insn.ops.rt as usize];
    match insn.kind {
        InsnKind::Div => {
            let (a, b) = (rs as i32, rt as i32);
            if b != 0 {
                s.lo = a.wrapping_div(b) as i64 as u64;
                s.hi = a.wrapping_rem(b) as i64 as u64;
            }
        }
        InsnKind::Divu => {
            let (a, b) = (rs as u32, rt as u32);
            if b != 0 {
                s.lo = sext32(a / b);
                s.hi = sext32(a % b);
            }
        }
        InsnKind::Ddiv => {
            let (a, b) = (rs as i64, rt as i64);
            if b != 0 {
                s.lo = a.wrapping_div(b) as u64;
                s.hi = a.wrapping_rem(b) as u64;
            }
        }
        InsnKind::Ddivu => {
            if rt != 0 {
                s.lo = rs / rt;
                s.hi = rs % rt;
            }
        }
        InsnKind::Mad | InsnKind::Madu => {
            let prod = if insn.kind == InsnKind::Mad {
                (rs as i32 as i64).wrapping_mul(rt as i32 as i64) as u64
            } else {
                (rs as u32 as u64).wrapping_mul(rt as u32 as u64)
            };
            let acc = ((s.hi as u32 as u64) << 32) | (s.lo as u32 as u64);
            let sum = acc.wrapping_add(prod);
            s.lo = sext32(sum as u32);
            s.hi = sext32((sum >> 32) as u32);
        }
        other => log::error!("muldiv helper reached with {other:?}"),
    }
}

/// CFC1: FCR31 with its condition codes, or a plain control register.
///
/// # Safety
/// `state` must point to a live [`MipsState`].
pub unsafe extern "C" fn helper_cfc1(state: *mut MipsState, reg: u32, mips4: u32) -> u64 {
    let s = &*state;
    match reg {
        31 => sext32(s.fcr31(mips4 != 0) as u32),
        r => sext32(s.ccr[1][r as usize & 31] as u32),
    }
}

/// # Safety
/// `state` must point to a live [`MipsState`].
pub unsafe extern "C" fn helper_ctc1(state: *mut MipsState, reg: u32, value: u64, mips4: u32) {
    let s = &mut *state;
    match reg {
        31 => s.set_fcr31(value as u32, mips4 != 0),
        r => s.ccr[1][r as usize & 31] = value & 0xffff_ffff,
    }
}

/// COP1/COP1X arithmetic, conversions and compares.
///
/// # Safety
/// `state` must point to a live [`MipsState`].
pub unsafe extern "C" fn helper_fpu(state: *mut MipsState, op: u32, mips4: u32) {
    fpu_op(&mut *state, op, mips4 != 0);
}

fn read_fpr(s: &MipsState, fmt: FpFormat, idx: u8) -> u64 {
    if fmt.is_double_width() {
        s.cpr[1][idx as usize]
    } else {
        s.fpr_single(idx as usize)
    }
}

fn write_fpr(s: &mut MipsState, fmt: FpFormat, idx: u8, bits: u64) {
    if fmt.is_double_width() {
        s.cpr[1][idx as usize] = bits;
    } else {
        s.set_fpr_single(idx as usize, bits);
    }
}

pub(crate) fn fpu_op(s: &mut MipsState, op: u32, mips4: bool) {
    use InsnKind::*;

    let flavor = if mips4 {
        MipsFlavor::Mips4
    } else {
        MipsFlavor::Mips3
    };
    let insn = decode(op, flavor);
    let o = insn.ops;
    let fcr31 = s.ccr[1][31];

    if matches!(insn.kind, FMadd | FMsub | FNmadd | FNmsub) {
        let fmt = if op & 7 == 1 { FpFormat::D } else { FpFormat::S };
        let subtract = matches!(insn.kind, FMsub | FNmsub);
        let negate = matches!(insn.kind, FNmadd | FNmsub);
        let (fs, ft, fr) = (
            read_fpr(s, fmt, o.fs()),
            read_fpr(s, fmt, o.ft()),
            read_fpr(s, fmt, o.fr()),
        );
        let res = match fmt {
            FpFormat::D => fpu::madd_d(fcr31, fs, ft, fr, subtract, negate),
            _ => fpu::madd_s(fcr31, fs, ft, fr, subtract, negate),
        };
        write_fpr(s, fmt, o.fd(), res);
        return;
    }

    let Some(fmt) = FpFormat::from_fmt(o.fmt() as u32) else {
        log::error!("fpu helper reached with bad format in {op:08x}");
        return;
    };
    let double = fmt == FpFormat::D;
    let a = read_fpr(s, fmt, o.fs());
    let b = read_fpr(s, fmt, o.ft());

    let binary = |fop: FpOp| {
        if double {
            fpu::arith_d(fop, fcr31, a, b)
        } else {
            fpu::arith_s(fop, fcr31, a, b)
        }
    };
    let (to, res) = match insn.kind {
        FAdd => (fmt, binary(FpOp::Add)),
        FSub => (fmt, binary(FpOp::Sub)),
        FMul => (fmt, binary(FpOp::Mul)),
        FDiv => (fmt, binary(FpOp::Div)),
        FSqrt if double => (fmt, fpu::sqrt_d(fcr31, a)),
        FSqrt => (fmt, fpu::sqrt_s(fcr31, a)),
        FRecip if double => (fmt, fpu::recip_d(fcr31, a)),
        FRecip => (fmt, fpu::recip_s(fcr31, a)),
        FRsqrt if double => (fmt, fpu::rsqrt_d(fcr31, a)),
        FRsqrt => (fmt, fpu::rsqrt_s(fcr31, a)),
        FRoundL | FTruncL | FCeilL | FFloorL | FRoundW | FTruncW | FCeilW | FFloorW => {
            let to = if (o.funct & 0x0c) == 0x08 {
                FpFormat::L
            } else {
                FpFormat::W
            };
            let mode = match o.funct & 3 {
                0 => RoundMode::Nearest,
                1 => RoundMode::Zero,
                2 => RoundMode::Up,
                _ => RoundMode::Down,
            };
            (to, fpu::convert(fcr31, fmt, to, a, Some(mode)))
        }
        FCvtS => (FpFormat::S, fpu::convert(fcr31, fmt, FpFormat::S, a, None)),
        FCvtD => (FpFormat::D, fpu::convert(fcr31, fmt, FpFormat::D, a, None)),
        FCvtW => (FpFormat::W, fpu::convert(fcr31, fmt, FpFormat::W, a, None)),
        FCvtL => (FpFormat::L, fpu::convert(fcr31, fmt, FpFormat::L, a, None)),
        FCompare => {
            let cc = if mips4 { o.compare_cc() as usize } else { 0 };
            s.fcc[cc] = fpu::compare(fmt, a, b, (o.funct & 0xf) as u32) as u8;
            return;
        }
        other => {
            log::error!("fpu helper reached with {other:?}");
            return;
        }
    };
    write_fpr(s, to, o.fd(), res);
}

/// Single-step callback trampoline.
///
/// # Safety
/// `state` must point to a live [`MipsState`] and `slot` to a live
/// [`HookSlot`].
pub unsafe extern "C" fn helper_step(state: *mut MipsState, slot: *mut HookSlot) {
    let s = &*state;
    log::trace!("step {:#010x}", s.pc);
    if let Some(hook) = (*slot).hook.as_mut() {
        hook(s);
    }
}
