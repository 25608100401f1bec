//! Loads and stores through the TLB and the bus.

use mips3_core::state::sext32;
use mips3_core::{Exception, MipsState};
use mips3_frontend::{InsnDesc, InsnKind};

use crate::Flow;

type Access<T> = Result<T, Flow>;

fn phys(s: &MipsState, vaddr: u32, write: bool) -> Access<u32> {
    s.tlb.translate(vaddr, write).ok_or_else(|| {
        let exc = if write {
            Exception::TlbStore
        } else {
            Exception::TlbLoad
        };
        Flow::Raise(exc, vaddr)
    })
}

fn read_word(s: &mut MipsState, vaddr: u32) -> Access<u32> {
    let p = phys(s, vaddr, false)?;
    Ok(s.bus.read_word(p))
}

fn read_dword(s: &mut MipsState, vaddr: u32) -> Access<u64> {
    let p = phys(s, vaddr, false)?;
    Ok(s.bus.read_dword(p))
}

/// Bit shift of the lane at `addr` for a left/right partial access,
/// counted from the most significant end.
fn lane_shift(addr: u32, mask: u32, big_endian: bool, right: bool) -> u32 {
    let mut lane = addr & mask;
    if !big_endian {
        lane ^= mask;
    }
    if right {
        lane ^= mask;
    }
    8 * lane
}

pub(crate) fn access(s: &mut MipsState, desc: &InsnDesc, big_endian: bool) -> Flow {
    match run(s, desc, big_endian) {
        Ok(()) => Flow::Next,
        Err(flow) => flow,
    }
}

fn run(s: &mut MipsState, desc: &InsnDesc, be: bool) -> Access<()> {
    use InsnKind::*;
    let o = desc.insn.ops;
    let rt = o.rt as usize;
    let addr = match desc.insn.kind {
        Lwxc1 | Ldxc1 | Swxc1 | Sdxc1 => (s.r[o.rs as usize] as u32).wrapping_add(s.r[rt] as u32),
        _ => (s.r[o.rs as usize] as u32).wrapping_add(o.simm() as u32),
    };
    let value = s.r[rt];

    match desc.insn.kind {
        Lb | Lbu => {
            let p = phys(s, addr, false)?;
            let b = s.bus.read_byte(p);
            let v = if desc.insn.kind == Lb { b as i8 as i64 as u64 } else { b as u64 };
            s.set_gpr(rt, v);
        }
        Lh | Lhu => {
            let p = phys(s, addr, false)?;
            let h = s.bus.read_half(p);
            let v = if desc.insn.kind == Lh { h as i16 as i64 as u64 } else { h as u64 };
            s.set_gpr(rt, v);
        }
        Lw => {
            let w = read_word(s, addr)?;
            s.set_gpr(rt, sext32(w));
        }
        Lwu => {
            let w = read_word(s, addr)?;
            s.set_gpr(rt, w as u64);
        }
        Ld => {
            let d = read_dword(s, addr)?;
            s.set_gpr(rt, d);
        }
        Lwl | Lwr => {
            let mem = read_word(s, addr & !3)?;
            let right = desc.insn.kind == Lwr;
            let sh = lane_shift(addr, 3, be, right);
            let old = value as u32;
            let merged = if right {
                (mem >> sh) | (old & !(u32::MAX >> sh))
            } else {
                (mem << sh) | (old & !(u32::MAX << sh))
            };
            s.set_gpr(rt, sext32(merged));
        }
        Ldl | Ldr => {
            let mem = read_dword(s, addr & !7)?;
            let right = desc.insn.kind == Ldr;
            let sh = lane_shift(addr, 7, be, right);
            let merged = if right {
                (mem >> sh) | (value & !(u64::MAX >> sh))
            } else {
                (mem << sh) | (value & !(u64::MAX << sh))
            };
            s.set_gpr(rt, merged);
        }
        Lwc1 => {
            let w = read_word(s, addr)?;
            s.set_fpr_single(rt, w as u64);
        }
        Ldc1 => s.cpr[1][rt] = read_dword(s, addr)?,
        Lwc2 => s.cpr[2][rt] = read_word(s, addr)? as u64,
        Ldc2 => s.cpr[2][rt] = read_dword(s, addr)?,
        Lwxc1 => {
            let w = read_word(s, addr)?;
            s.set_fpr_single(o.fd() as usize, w as u64);
        }
        Ldxc1 => s.cpr[1][o.fd() as usize] = read_dword(s, addr)?,

        Sb => {
            let p = phys(s, addr, true)?;
            s.bus.write_byte(p, value as u8);
        }
        Sh => {
            let p = phys(s, addr, true)?;
            s.bus.write_half(p, value as u16);
        }
        Sw | Swc1 | Swc2 | Swxc1 => {
            let v = match desc.insn.kind {
                Swc1 => s.cpr[1][rt],
                Swc2 => s.cpr[2][rt],
                Swxc1 => s.cpr[1][o.fs() as usize],
                _ => value,
            };
            let p = phys(s, addr, true)?;
            s.bus.write_word(p, v as u32);
        }
        Sd | Sdc1 | Sdc2 | Sdxc1 => {
            let v = match desc.insn.kind {
                Sdc1 => s.cpr[1][rt],
                Sdc2 => s.cpr[2][rt],
                Sdxc1 => s.cpr[1][o.fs() as usize],
                _ => value,
            };
            let p = phys(s, addr, true)?;
            s.bus.write_dword(p, v);
        }
        Swl | Swr => {
            let right = desc.insn.kind == Swr;
            let sh = lane_shift(addr, 3, be, right);
            let v = value as u32;
            let (data, keep) = if right {
                (v << sh, !(u32::MAX << sh))
            } else {
                (v >> sh, !(u32::MAX >> sh))
            };
            let p = phys(s, addr & !3, true)?;
            s.bus.write_word_masked(p, data, keep);
        }
        Sdl | Sdr => {
            let right = desc.insn.kind == Sdr;
            let sh = lane_shift(addr, 7, be, right);
            let (data, keep) = if right {
                (value << sh, !(u64::MAX << sh))
            } else {
                (value >> sh, !(u64::MAX >> sh))
            };
            let p = phys(s, addr & !7, true)?;
            s.bus.write_dword_masked(p, data, keep);
        }
        _ => {}
    }
    Ok(())
}
