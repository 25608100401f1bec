//! COP1 arithmetic kernels on raw register bits.
//!
//! Both the recompiler's runtime helpers and the reference
//! interpreter call into these, so FPU results are defined in one
//! place. Operands and results are raw IEEE bit patterns; singles
//! live in the low 32 bits of a 64-bit FPR.

use std::hint::black_box;
use std::os::raw::c_int;

extern "C" {
    fn fegetround() -> c_int;
    fn fesetround(round: c_int) -> c_int;
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const FE_TONEAREST: c_int = 0x0000;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const FE_DOWNWARD: c_int = 0x0400;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const FE_UPWARD: c_int = 0x0800;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const FE_TOWARDZERO: c_int = 0x0c00;

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
compile_error!("fenv constants need porting for this host architecture");

/// FCR31 rounding-mode field.
pub const FCR31_RM_MASK: u64 = 0x3;
/// FCR31 bit holding condition code 0.
pub const FCR31_FCC0_SHIFT: u32 = 23;
/// FCR31 bits 25..31 hold condition codes 1..7 on MIPS IV.
pub const FCR31_FCC1_SHIFT: u32 = 25;

/// MIPS rounding modes, in FCR31.RM encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
    Nearest = 0,
    Zero = 1,
    Up = 2,
    Down = 3,
}

impl RoundMode {
    pub fn from_bits(bits: u64) -> Self {
        match bits & FCR31_RM_MASK {
            0 => RoundMode::Nearest,
            1 => RoundMode::Zero,
            2 => RoundMode::Up,
            _ => RoundMode::Down,
        }
    }

    fn fenv(self) -> c_int {
        match self {
            RoundMode::Nearest => FE_TONEAREST,
            RoundMode::Zero => FE_TOWARDZERO,
            RoundMode::Up => FE_UPWARD,
            RoundMode::Down => FE_DOWNWARD,
        }
    }
}

/// Register formats named by the `fmt` field and the CVT targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpFormat {
    S,
    D,
    W,
    L,
}

impl FpFormat {
    /// Decode the 5-bit `fmt` field (16..=21).
    pub fn from_fmt(fmt: u32) -> Option<Self> {
        match fmt {
            16 => Some(FpFormat::S),
            17 => Some(FpFormat::D),
            20 => Some(FpFormat::W),
            21 => Some(FpFormat::L),
            _ => None,
        }
    }

    /// Whether values of this format occupy the full 64-bit FPR.
    #[inline]
    pub fn is_double_width(self) -> bool {
        matches!(self, FpFormat::D | FpFormat::L)
    }
}

/// Binary arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
}

fn with_rounding<T, F>(mode: RoundMode, f: F) -> T
where
    F: FnOnce() -> T,
{
    let old = unsafe { fegetround() };
    unsafe {
        fesetround(mode.fenv());
    }
    let res = f();
    unsafe {
        fesetround(old);
    }
    res
}

#[inline]
fn f32_of(bits: u64) -> f32 {
    f32::from_bits(bits as u32)
}

fn binop_f64(op: FpOp, a: f64, b: f64) -> f64 {
    let (a, b) = (black_box(a), black_box(b));
    match op {
        FpOp::Add => a + b,
        FpOp::Sub => a - b,
        FpOp::Mul => a * b,
        FpOp::Div => a / b,
    }
}

fn binop_f32(op: FpOp, a: f32, b: f32) -> f32 {
    let (a, b) = (black_box(a), black_box(b));
    match op {
        FpOp::Add => a + b,
        FpOp::Sub => a - b,
        FpOp::Mul => a * b,
        FpOp::Div => a / b,
    }
}

/// `fd = fs op ft` for single precision.
pub fn arith_s(op: FpOp, fcr31: u64, a: u64, b: u64) -> u64 {
    let mode = RoundMode::from_bits(fcr31);
    let res = with_rounding(mode, || binop_f32(op, f32_of(a), f32_of(b)));
    res.to_bits() as u64
}

/// `fd = fs op ft` for double precision.
pub fn arith_d(op: FpOp, fcr31: u64, a: u64, b: u64) -> u64 {
    let mode = RoundMode::from_bits(fcr31);
    let res = with_rounding(mode, || binop_f64(op, f64::from_bits(a), f64::from_bits(b)));
    res.to_bits()
}

pub fn sqrt_s(fcr31: u64, a: u64) -> u64 {
    let mode = RoundMode::from_bits(fcr31);
    with_rounding(mode, || black_box(f32_of(a)).sqrt()).to_bits() as u64
}

pub fn sqrt_d(fcr31: u64, a: u64) -> u64 {
    let mode = RoundMode::from_bits(fcr31);
    with_rounding(mode, || black_box(f64::from_bits(a)).sqrt()).to_bits()
}

pub fn recip_s(fcr31: u64, a: u64) -> u64 {
    arith_s(FpOp::Div, fcr31, 1.0f32.to_bits() as u64, a)
}

pub fn recip_d(fcr31: u64, a: u64) -> u64 {
    arith_d(FpOp::Div, fcr31, 1.0f64.to_bits(), a)
}

pub fn rsqrt_s(fcr31: u64, a: u64) -> u64 {
    recip_s(fcr31, sqrt_s(fcr31, a))
}

pub fn rsqrt_d(fcr31: u64, a: u64) -> u64 {
    recip_d(fcr31, sqrt_d(fcr31, a))
}

/// Multiply-accumulate family; `negate` flips the final sign and
/// `subtract` turns `fs*ft + fr` into `fs*ft - fr`. Not fused.
pub fn madd_s(fcr31: u64, fs: u64, ft: u64, fr: u64, subtract: bool, negate: bool) -> u64 {
    let mode = RoundMode::from_bits(fcr31);
    let res = with_rounding(mode, || {
        let prod = binop_f32(FpOp::Mul, f32_of(fs), f32_of(ft));
        let op = if subtract { FpOp::Sub } else { FpOp::Add };
        binop_f32(op, prod, f32_of(fr))
    });
    let res = if negate { -res } else { res };
    res.to_bits() as u64
}

pub fn madd_d(fcr31: u64, fs: u64, ft: u64, fr: u64, subtract: bool, negate: bool) -> u64 {
    let mode = RoundMode::from_bits(fcr31);
    let res = with_rounding(mode, || {
        let prod = binop_f64(FpOp::Mul, f64::from_bits(fs), f64::from_bits(ft));
        let op = if subtract { FpOp::Sub } else { FpOp::Add };
        binop_f64(op, prod, f64::from_bits(fr))
    });
    let res = if negate { -res } else { res };
    res.to_bits()
}

fn round_f64(v: f64, mode: RoundMode) -> f64 {
    match mode {
        RoundMode::Nearest => v.round_ties_even(),
        RoundMode::Zero => v.trunc(),
        RoundMode::Up => v.ceil(),
        RoundMode::Down => v.floor(),
    }
}

/// Float to 32-bit integer; NaN and out-of-range give the
/// "integer indefinite" value 0x8000_0000.
pub fn to_i32(v: f64, mode: RoundMode) -> i32 {
    let r = round_f64(v, mode);
    if r.is_nan() || r >= 2_147_483_648.0 || r < -2_147_483_648.0 {
        i32::MIN
    } else {
        r as i32
    }
}

/// Float to 64-bit integer, same conventions as [`to_i32`].
pub fn to_i64(v: f64, mode: RoundMode) -> i64 {
    let r = round_f64(v, mode);
    if r.is_nan() || r >= 9_223_372_036_854_775_808.0 || r < -9_223_372_036_854_775_808.0 {
        i64::MIN
    } else {
        r as i64
    }
}

fn value_of(from: FpFormat, bits: u64) -> f64 {
    match from {
        FpFormat::S => f32_of(bits) as f64,
        FpFormat::D => f64::from_bits(bits),
        FpFormat::W => bits as u32 as i32 as f64,
        FpFormat::L => bits as i64 as f64,
    }
}

/// Format conversion. `mode` overrides the FCR31 rounding mode for
/// ROUND/TRUNC/CEIL/FLOOR; CVT passes `None`.
pub fn convert(fcr31: u64, from: FpFormat, to: FpFormat, bits: u64, mode: Option<RoundMode>) -> u64 {
    let mode = mode.unwrap_or_else(|| RoundMode::from_bits(fcr31));
    match to {
        FpFormat::S => {
            let res = match from {
                FpFormat::S => f32_of(bits),
                FpFormat::W => with_rounding(mode, || black_box(bits as u32 as i32) as f32),
                FpFormat::L => with_rounding(mode, || black_box(bits as i64) as f32),
                FpFormat::D => with_rounding(mode, || black_box(f64::from_bits(bits)) as f32),
            };
            res.to_bits() as u64
        }
        FpFormat::D => {
            let res = match from {
                FpFormat::L => with_rounding(mode, || black_box(bits as i64) as f64),
                other => value_of(other, bits),
            };
            res.to_bits()
        }
        FpFormat::W => to_i32(value_of(from, bits), mode) as u32 as u64,
        FpFormat::L => to_i64(value_of(from, bits), mode) as u64,
    }
}

/// C.cond.fmt: bit 0 of `cond` selects unordered, bit 1 equal,
/// bit 2 less-than. The signalling bit 3 is ignored.
pub fn compare(fmt: FpFormat, a: u64, b: u64, cond: u32) -> bool {
    let (x, y) = match fmt {
        FpFormat::S => (f32_of(a) as f64, f32_of(b) as f64),
        _ => (f64::from_bits(a), f64::from_bits(b)),
    };
    let unordered = x.is_nan() || y.is_nan();
    (cond & 1 != 0 && unordered) || (cond & 2 != 0 && x == y) || (cond & 4 != 0 && x < y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: f32) -> u64 {
        v.to_bits() as u64
    }

    #[test]
    fn single_arith_uses_low_word() {
        let junk = 0xdead_beef_0000_0000u64;
        assert_eq!(arith_s(FpOp::Add, 0, s(1.5) | junk, s(2.25)), s(3.75));
        assert_eq!(arith_d(FpOp::Mul, 0, 3.0f64.to_bits(), 0.5f64.to_bits()), 1.5f64.to_bits());
    }

    #[test]
    fn explicit_rounding_modes() {
        let v = (-2.5f64).to_bits();
        assert_eq!(convert(0, FpFormat::D, FpFormat::W, v, Some(RoundMode::Nearest)) as u32 as i32, -2);
        assert_eq!(convert(0, FpFormat::D, FpFormat::W, v, Some(RoundMode::Zero)) as u32 as i32, -2);
        assert_eq!(convert(0, FpFormat::D, FpFormat::W, v, Some(RoundMode::Up)) as u32 as i32, -2);
        assert_eq!(convert(0, FpFormat::D, FpFormat::W, v, Some(RoundMode::Down)) as u32 as i32, -3);
        assert_eq!(convert(1, FpFormat::S, FpFormat::L, s(7.9), None) as i64, 7);
    }

    #[test]
    fn out_of_range_conversion_is_indefinite() {
        assert_eq!(to_i32(f64::NAN, RoundMode::Zero), i32::MIN);
        assert_eq!(to_i32(3.0e9, RoundMode::Zero), i32::MIN);
        assert_eq!(to_i64(-1.0e19, RoundMode::Zero), i64::MIN);
    }

    #[test]
    fn compare_conditions() {
        let one = 1.0f64.to_bits();
        let two = 2.0f64.to_bits();
        let nan = f64::NAN.to_bits();
        assert!(compare(FpFormat::D, one, two, 4)); // C.OLT
        assert!(!compare(FpFormat::D, two, one, 6)); // C.OLE
        assert!(compare(FpFormat::D, nan, one, 1)); // C.UN
        assert!(!compare(FpFormat::D, nan, nan, 2)); // C.EQ
        assert!(compare(FpFormat::S, s(1.0), s(1.0), 2));
    }
}
