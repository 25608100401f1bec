//! COP1 and the COP1X arithmetic, on the shared FPU primitives.

use mips3_core::fpu::{self, FpFormat, FpOp, RoundMode};
use mips3_core::state::sext32;
use mips3_core::MipsState;
use mips3_frontend::{InsnDesc, InsnKind};

fn read(s: &MipsState, fmt: FpFormat, idx: u8) -> u64 {
    if fmt.is_double_width() {
        s.cpr[1][idx as usize]
    } else {
        s.fpr_single(idx as usize)
    }
}

fn write(s: &mut MipsState, fmt: FpFormat, idx: u8, bits: u64) {
    if fmt.is_double_width() {
        s.cpr[1][idx as usize] = bits;
    } else {
        s.set_fpr_single(idx as usize, bits);
    }
}

pub(crate) fn execute(s: &mut MipsState, desc: &InsnDesc, mips4: bool) {
    use InsnKind::*;
    let o = desc.insn.ops;
    let (rt, rd) = (o.rt as usize, o.rd as usize);
    let fcr31 = s.ccr[1][31];

    match desc.insn.kind {
        Mfc1 => return s.set_gpr(rt, sext32(s.cpr[1][o.fs() as usize] as u32)),
        Dmfc1 => return s.set_gpr(rt, s.cpr[1][o.fs() as usize]),
        Mtc1 => return s.set_fpr_single(o.fs() as usize, s.r[rt]),
        Dmtc1 => {
            s.cpr[1][o.fs() as usize] = s.r[rt];
            return;
        }
        Cfc1 => {
            let v = match rd {
                31 => sext32(s.fcr31(mips4) as u32),
                r => sext32(s.ccr[1][r] as u32),
            };
            return s.set_gpr(rt, v);
        }
        Ctc1 => {
            let v = s.r[rt];
            match rd {
                31 => s.set_fcr31(v as u32, mips4),
                r => s.ccr[1][r] = v & 0xffff_ffff,
            }
            return;
        }
        Prefx => return,
        FMadd | FMsub | FNmadd | FNmsub => {
            let fmt = if desc.opcode() & 7 == 1 { FpFormat::D } else { FpFormat::S };
            let subtract = matches!(desc.insn.kind, FMsub | FNmsub);
            let negate = matches!(desc.insn.kind, FNmadd | FNmsub);
            let (a, b, c) = (read(s, fmt, o.fs()), read(s, fmt, o.ft()), read(s, fmt, o.fr()));
            let res = match fmt {
                FpFormat::D => fpu::madd_d(fcr31, a, b, c, subtract, negate),
                _ => fpu::madd_s(fcr31, a, b, c, subtract, negate),
            };
            return write(s, fmt, o.fd(), res);
        }
        _ => {}
    }

    let Some(fmt) = FpFormat::from_fmt(o.fmt() as u32) else {
        log::warn!("bad FPU format in {:08x}", desc.opcode());
        return;
    };
    let double = fmt == FpFormat::D;
    let a = read(s, fmt, o.fs());
    let b = read(s, fmt, o.ft());
    let sign = if fmt.is_double_width() { 1u64 << 63 } else { 1u64 << 31 };
    let arith = |op: FpOp| {
        if double {
            fpu::arith_d(op, fcr31, a, b)
        } else {
            fpu::arith_s(op, fcr31, a, b)
        }
    };

    let (to, res) = match desc.insn.kind {
        FAdd => (fmt, arith(FpOp::Add)),
        FSub => (fmt, arith(FpOp::Sub)),
        FMul => (fmt, arith(FpOp::Mul)),
        FDiv => (fmt, arith(FpOp::Div)),
        FSqrt if double => (fmt, fpu::sqrt_d(fcr31, a)),
        FSqrt => (fmt, fpu::sqrt_s(fcr31, a)),
        FRecip if double => (fmt, fpu::recip_d(fcr31, a)),
        FRecip => (fmt, fpu::recip_s(fcr31, a)),
        FRsqrt if double => (fmt, fpu::rsqrt_d(fcr31, a)),
        FRsqrt => (fmt, fpu::rsqrt_s(fcr31, a)),
        FMov => (fmt, a),
        FNeg => (fmt, a ^ sign),
        FAbs => (fmt, a & (sign - 1)),
        FMovcf => {
            let want = o.rt & 1 != 0;
            if (s.fcc[o.movc_cc() as usize] != 0) != want {
                return;
            }
            (fmt, a)
        }
        FMovz | FMovn => {
            let zero = s.r[o.ft() as usize] == 0;
            if zero != (desc.insn.kind == FMovz) {
                return;
            }
            (fmt, a)
        }
        FRoundL | FTruncL | FCeilL | FFloorL | FRoundW | FTruncW | FCeilW | FFloorW => {
            let to = if o.funct & 0x0c == 0x08 {
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
        _ => return,
    };
    write(s, to, o.fd(), res);
}
