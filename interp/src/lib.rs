//! Reference interpreter for the MIPS III/IV core.
//!
//! Executes one instruction at a time against the same
//! [`MipsState`] the recompiler uses, with the same cycle costs,
//! exception entry and FPU primitives. The differential tests run a
//! program through both and compare the resulting states.

mod cop1;
mod memory;

use mips3_core::cop0::*;
use mips3_core::state::sext32;
use mips3_core::{DrcConfig, Exception, MipsFlavor, MipsState};
use mips3_frontend::{decode, describe_insn, DescFlags, Insn, InsnDesc, InsnKind};

/// What an instruction asks the driver to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    /// Execute the delay slot, then continue at the target, or
    /// sequentially when `None`.
    Branch(Option<u32>),
    /// Likely branch not taken: skip the delay slot.
    Skip,
    /// Continue at an address with no delay slot.
    Jump(u32),
    /// Raise an exception for this instruction, with the faulting
    /// virtual address for TLB exceptions.
    Raise(Exception, u32),
    /// Finish this instruction, then take the interrupt.
    Interrupt,
}

/// Single-stepping interpreter.
#[derive(Debug, Clone)]
pub struct Interpreter {
    config: DrcConfig,
    /// Target of the branch whose delay slot executes next.
    delay: Option<Option<u32>>,
}

impl Interpreter {
    pub fn new(config: DrcConfig) -> Self {
        Self {
            config,
            delay: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &DrcConfig {
        &self.config
    }

    /// Whether the next instruction is a delay slot.
    #[inline]
    pub fn in_delay_slot(&self) -> bool {
        self.delay.is_some()
    }

    /// Run for about `cycles` cycles, slicing at the Count/Compare
    /// deadline the same way the recompiler does. Returns the cycles
    /// executed.
    pub fn run(&mut self, s: &mut MipsState, cycles: i32) -> u64 {
        let budget = cycles.max(0) as u64;
        let mut executed = 0u64;
        while executed < budget {
            let left = (budget - executed).min(i32::MAX as u64) as i32;
            s.grant(left);
            if !self.in_delay_slot() && s.interrupt_pending() {
                let pc = s.pc;
                s.take_exception(Exception::Interrupt, pc, false, 0);
            }
            loop {
                self.step(s);
                if s.icount < 0 && !self.in_delay_slot() {
                    break;
                }
            }
            executed += s.retire();
            s.check_timer();
        }
        executed
    }

    /// Execute the instruction at `s.pc`.
    pub fn step(&mut self, s: &mut MipsState) {
        let pc = s.pc;
        let in_delay = self.delay.is_some();
        let Some(phys) = s.tlb.translate(pc, false) else {
            self.delay = None;
            s.take_exception(Exception::TlbLoad, pc, in_delay, pc);
            return;
        };

        let word = s.bus.read_word(phys);
        let insn = decode(word, self.config.flavor);
        let mut desc = InsnDesc::blank(pc);
        describe_insn(&mut desc, insn);
        if in_delay && desc.is_branch() {
            desc = InsnDesc::blank(pc);
            describe_insn(&mut desc, Insn { kind: InsnKind::Invalid, ..insn });
        }

        let cycles = desc.cycles + self.config.hotspot_cycles(pc, word);
        s.icount = s.icount.wrapping_sub(cycles as i32);

        let flow = if desc.flags.contains(DescFlags::INVALID_OPCODE) {
            Flow::Raise(Exception::InvalidOp, 0)
        } else {
            self.execute(s, &desc)
        };

        let pending = self.delay.take();
        let sequential = match pending {
            Some(Some(target)) => target,
            _ => pc.wrapping_add(4),
        };
        match flow {
            Flow::Next => s.pc = sequential,
            Flow::Branch(target) => {
                s.pc = pc.wrapping_add(4);
                self.delay = Some(target);
            }
            Flow::Skip => s.pc = pc.wrapping_add(8),
            Flow::Jump(target) => s.pc = target,
            Flow::Raise(exc, bad) => {
                log::trace!("{exc:?} at {pc:#010x}{}", if in_delay { " (delay slot)" } else { "" });
                s.take_exception(exc, pc, in_delay, bad);
            }
            Flow::Interrupt => s.take_exception(Exception::Interrupt, sequential, false, 0),
        }
    }

    fn execute(&mut self, s: &mut MipsState, desc: &InsnDesc) -> Flow {
        use InsnKind::*;
        match desc.insn.kind {
            Addi | Addiu | Slti | Sltiu | Andi | Ori | Xori | Lui | Daddi | Daddiu | Add | Addu
            | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Dadd | Daddu | Dsub | Dsubu | Sll
            | Srl | Sra | Sllv | Srlv | Srav | Dsll | Dsrl | Dsra | Dsll32 | Dsrl32 | Dsra32
            | Dsllv | Dsrlv | Dsrav | Movz | Movn | Movf | Movt => alu(s, desc),
            Mfhi | Mthi | Mflo | Mtlo | Mult | Multu | Div | Divu | Dmult | Dmultu | Ddiv
            | Ddivu | Mad | Madu | Mul => {
                muldiv(s, desc);
                Flow::Next
            }
            J | Jal | Jr | Jalr | Beq | Bne | Blez | Bgtz | Beql | Bnel | Blezl | Bgtzl | Bltz
            | Bgez | Bltzl | Bgezl | Bltzal | Bgezal | Bltzall | Bgezall => branch(s, desc),
            Bc1f | Bc1t | Bc1fl | Bc1tl => {
                if !self.cop1_usable(s) {
                    return Flow::Raise(Exception::BadCop, 0);
                }
                let set = s.fcc[desc.insn.ops.branch_cc() as usize] != 0;
                let on_true = matches!(desc.insn.kind, Bc1t | Bc1tl);
                conditional(desc, set == on_true)
            }
            Tge | Tgeu | Tlt | Tltu | Teq | Tne | Tgei | Tgeiu | Tlti | Tltiu | Teqi | Tnei => {
                trap(s, desc)
            }
            Syscall => Flow::Raise(Exception::Syscall, 0),
            Break => Flow::Raise(Exception::Break, 0),
            Sync | Cache | Pref => Flow::Next,
            Ll | Lld | Sc | Scd => Flow::Raise(Exception::InvalidOp, 0),
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld | Lwl | Lwr | Ldl | Ldr | Lwc2 | Ldc2 | Sb | Sh
            | Sw | Sd | Swl | Swr | Sdl | Sdr | Swc2 | Sdc2 => {
                memory::access(s, desc, self.config.big_endian)
            }
            Lwc1 | Ldc1 | Swc1 | Sdc1 | Lwxc1 | Ldxc1 | Swxc1 | Sdxc1 => {
                if !self.cop1_usable(s) {
                    return Flow::Raise(Exception::BadCop, 0);
                }
                memory::access(s, desc, self.config.big_endian)
            }
            Mfc0 | Dmfc0 | Cfc0 | Mtc0 | Dmtc0 | Ctc0 | Tlbr | Tlbwi | Tlbwr | Tlbp | Eret
            | Wait | Bc0f | Bc0t => {
                if !self.cop0_usable(s) {
                    return Flow::Raise(Exception::BadCop, 0);
                }
                self.cop0(s, desc)
            }
            Mfc2 | Dmfc2 | Cfc2 | Mtc2 | Dmtc2 | Ctc2 | Bc2f | Bc2t => cop2(s, desc),
            Invalid => Flow::Raise(Exception::InvalidOp, 0),
            _ => {
                if !self.cop1_usable(s) {
                    return Flow::Raise(Exception::BadCop, 0);
                }
                cop1::execute(s, desc, self.config.flavor >= MipsFlavor::Mips4);
                Flow::Next
            }
        }
    }

    fn cop0_usable(&self, s: &MipsState) -> bool {
        let sr = s.status();
        !self.config.strict_cop0 || sr & (SR_COP0 | SR_EXL | SR_ERL) != 0 || sr & SR_KSU_MASK == 0
    }

    fn cop1_usable(&self, s: &MipsState) -> bool {
        !self.config.strict_cop1 || s.status() & SR_COP1 != 0
    }

    fn cop0(&mut self, s: &mut MipsState, desc: &InsnDesc) -> Flow {
        use InsnKind::*;
        let o = desc.insn.ops;
        let (rt, rd) = (o.rt as usize, o.rd as usize);
        match desc.insn.kind {
            Mfc0 | Dmfc0 => {
                let extra = match rd {
                    COP0_COUNT => self.config.count_read_cycles,
                    COP0_CAUSE => self.config.cause_read_cycles,
                    _ => 0,
                };
                s.icount = s.icount.wrapping_sub(extra as i32);
                let v = s.read_cop0(rd);
                let v = if desc.insn.kind == Mfc0 { sext32(v as u32) } else { v };
                s.set_gpr(rt, v);
            }
            Mtc0 | Dmtc0 => {
                let v = s.r[rt];
                let v = if desc.insn.kind == Mtc0 { sext32(v as u32) } else { v };
                if s.write_cop0(rd, v) {
                    return Flow::Interrupt;
                }
            }
            Cfc0 => s.set_gpr(rt, sext32(s.ccr[0][rd] as u32)),
            Ctc0 => s.ccr[0][rd] = sext32(s.r[rt] as u32),
            Tlbr => s.tlbr(),
            Tlbwi => s.tlbwi(),
            Tlbwr => s.tlbwr(),
            Tlbp => s.tlbp(),
            Eret => {
                let sr = s.status();
                let target = if sr & SR_ERL != 0 {
                    s.cpr[0][COP0_STATUS] = sext32(sr & !SR_ERL);
                    s.cpr[0][COP0_ERROREPC] as u32
                } else {
                    s.cpr[0][COP0_STATUS] = sext32(sr & !SR_EXL);
                    s.cpr[0][COP0_EPC] as u32
                };
                return Flow::Jump(target);
            }
            Bc0f | Bc0t => {
                let set = s.cpcond[0] != 0;
                return conditional(desc, set == (desc.insn.kind == Bc0t));
            }
            _ => {}
        }
        Flow::Next
    }
}

fn alu(s: &mut MipsState, desc: &InsnDesc) -> Flow {
    use InsnKind::*;
    let o = desc.insn.ops;
    let (rs, rt, rd) = (s.r[o.rs as usize], s.r[o.rt as usize], o.rd as usize);
    let (rs32, rt32) = (rs as u32, rt as u32);
    let imm = o.simm() as i64 as u64;
    let uimm = o.uimm() as u64;
    let sa = o.sa as u32;
    let t = o.rt as usize;

    match desc.insn.kind {
        Addi => match (rs32 as i32).checked_add(o.simm()) {
            Some(v) => s.set_gpr(t, v as i64 as u64),
            None => return Flow::Raise(Exception::Overflow, 0),
        },
        Daddi => match (rs as i64).checked_add(o.simm() as i64) {
            Some(v) => s.set_gpr(t, v as u64),
            None => return Flow::Raise(Exception::Overflow, 0),
        },
        Add | Sub => {
            let v = if desc.insn.kind == Add {
                (rs32 as i32).checked_add(rt32 as i32)
            } else {
                (rs32 as i32).checked_sub(rt32 as i32)
            };
            match v {
                Some(v) => s.set_gpr(rd, v as i64 as u64),
                None => return Flow::Raise(Exception::Overflow, 0),
            }
        }
        Dadd | Dsub => {
            let v = if desc.insn.kind == Dadd {
                (rs as i64).checked_add(rt as i64)
            } else {
                (rs as i64).checked_sub(rt as i64)
            };
            match v {
                Some(v) => s.set_gpr(rd, v as u64),
                None => return Flow::Raise(Exception::Overflow, 0),
            }
        }
        Addiu => s.set_gpr(t, sext32(rs32.wrapping_add(imm as u32))),
        Daddiu => s.set_gpr(t, rs.wrapping_add(imm)),
        Addu => s.set_gpr(rd, sext32(rs32.wrapping_add(rt32))),
        Subu => s.set_gpr(rd, sext32(rs32.wrapping_sub(rt32))),
        Daddu => s.set_gpr(rd, rs.wrapping_add(rt)),
        Dsubu => s.set_gpr(rd, rs.wrapping_sub(rt)),
        Slti => s.set_gpr(t, ((rs as i64) < (imm as i64)) as u64),
        Sltiu => s.set_gpr(t, (rs < imm) as u64),
        Slt => s.set_gpr(rd, ((rs as i64) < (rt as i64)) as u64),
        Sltu => s.set_gpr(rd, (rs < rt) as u64),
        Andi => s.set_gpr(t, rs & uimm),
        Ori => s.set_gpr(t, rs | uimm),
        Xori => s.set_gpr(t, rs ^ uimm),
        Lui => s.set_gpr(t, sext32((o.imm as u32) << 16)),
        And => s.set_gpr(rd, rs & rt),
        Or => s.set_gpr(rd, rs | rt),
        Xor => s.set_gpr(rd, rs ^ rt),
        Nor => s.set_gpr(rd, !(rs | rt)),
        Sll => s.set_gpr(rd, sext32(rt32 << sa)),
        Srl => s.set_gpr(rd, sext32(rt32 >> sa)),
        Sra => s.set_gpr(rd, sext32(((rt32 as i32) >> sa) as u32)),
        Sllv => s.set_gpr(rd, sext32(rt32 << (rs32 & 31))),
        Srlv => s.set_gpr(rd, sext32(rt32 >> (rs32 & 31))),
        Srav => s.set_gpr(rd, sext32(((rt32 as i32) >> (rs32 & 31)) as u32)),
        Dsll => s.set_gpr(rd, rt << sa),
        Dsrl => s.set_gpr(rd, rt >> sa),
        Dsra => s.set_gpr(rd, ((rt as i64) >> sa) as u64),
        Dsll32 => s.set_gpr(rd, rt << (sa + 32)),
        Dsrl32 => s.set_gpr(rd, rt >> (sa + 32)),
        Dsra32 => s.set_gpr(rd, ((rt as i64) >> (sa + 32)) as u64),
        Dsllv => s.set_gpr(rd, rt << (rs32 & 63)),
        Dsrlv => s.set_gpr(rd, rt >> (rs32 & 63)),
        Dsrav => s.set_gpr(rd, ((rt as i64) >> (rs32 & 63)) as u64),
        Movz if rt == 0 => s.set_gpr(rd, rs),
        Movn if rt != 0 => s.set_gpr(rd, rs),
        Movf if s.fcc[o.movc_cc() as usize] == 0 => s.set_gpr(rd, rs),
        Movt if s.fcc[o.movc_cc() as usize] != 0 => s.set_gpr(rd, rs),
        _ => {}
    }
    Flow::Next
}

fn muldiv(s: &mut MipsState, desc: &InsnDesc) {
    use InsnKind::*;
    let o = desc.insn.ops;
    let (rs, rt) = (s.r[o.rs as usize], s.r[o.rt as usize]);
    match desc.insn.kind {
        Mfhi => s.set_gpr(o.rd as usize, s.hi),
        Mflo => s.set_gpr(o.rd as usize, s.lo),
        Mthi => s.hi = rs,
        Mtlo => s.lo = rs,
        Mult | Multu => {
            let p = if desc.insn.kind == Mult {
                (rs as i32 as i64).wrapping_mul(rt as i32 as i64) as u64
            } else {
                (rs as u32 as u64) * (rt as u32 as u64)
            };
            s.lo = sext32(p as u32);
            s.hi = sext32((p >> 32) as u32);
        }
        Dmult => {
            let p = (rs as i64 as i128) * (rt as i64 as i128);
            s.lo = p as u64;
            s.hi = (p >> 64) as u64;
        }
        Dmultu => {
            let p = (rs as u128) * (rt as u128);
            s.lo = p as u64;
            s.hi = (p >> 64) as u64;
        }
        Mul => s.set_gpr(o.rd as usize, sext32((rs as i32).wrapping_mul(rt as i32) as u32)),
        Div if rt as u32 != 0 => {
            let (a, b) = (rs as i32, rt as i32);
            s.lo = a.wrapping_div(b) as i64 as u64;
            s.hi = a.wrapping_rem(b) as i64 as u64;
        }
        Divu if rt as u32 != 0 => {
            s.lo = sext32(rs as u32 / rt as u32);
            s.hi = sext32(rs as u32 % rt as u32);
        }
        Ddiv if rt != 0 => {
            s.lo = (rs as i64).wrapping_div(rt as i64) as u64;
            s.hi = (rs as i64).wrapping_rem(rt as i64) as u64;
        }
        Ddivu if rt != 0 => {
            s.lo = rs / rt;
            s.hi = rs % rt;
        }
        Mad | Madu => {
            let p = if desc.insn.kind == Mad {
                (rs as i32 as i64).wrapping_mul(rt as i32 as i64) as u64
            } else {
                (rs as u32 as u64) * (rt as u32 as u64)
            };
            let acc = ((s.hi as u32 as u64) << 32) | s.lo as u32 as u64;
            let sum = acc.wrapping_add(p);
            s.lo = sext32(sum as u32);
            s.hi = sext32((sum >> 32) as u32);
        }
        _ => {}
    }
}

/// Taken/not-taken outcome of a conditional branch.
fn conditional(desc: &InsnDesc, taken: bool) -> Flow {
    match (taken, desc.flags.contains(DescFlags::IS_LIKELY_BRANCH)) {
        (true, _) => Flow::Branch(Some(desc.targetpc)),
        (false, true) => Flow::Skip,
        (false, false) => Flow::Branch(None),
    }
}

fn branch(s: &mut MipsState, desc: &InsnDesc) -> Flow {
    use InsnKind::*;
    let o = desc.insn.ops;
    let (rs, rt) = (s.r[o.rs as usize], s.r[o.rt as usize]);
    let link = sext32(desc.pc.wrapping_add(8));
    match desc.insn.kind {
        J => Flow::Branch(Some(desc.targetpc)),
        Jal => {
            s.set_gpr(31, link);
            Flow::Branch(Some(desc.targetpc))
        }
        Jr => Flow::Branch(Some(rs as u32)),
        Jalr => {
            s.set_gpr(o.rd as usize, link);
            Flow::Branch(Some(rs as u32))
        }
        Beq | Beql => conditional(desc, rs == rt),
        Bne | Bnel => conditional(desc, rs != rt),
        Blez | Blezl => conditional(desc, rs as i64 <= 0),
        Bgtz | Bgtzl => conditional(desc, rs as i64 > 0),
        Bltz | Bltzl => conditional(desc, (rs as i64) < 0),
        Bgez | Bgezl => conditional(desc, rs as i64 >= 0),
        Bltzal | Bltzall | Bgezal | Bgezall => {
            let taken = if matches!(desc.insn.kind, Bltzal | Bltzall) {
                (rs as i64) < 0
            } else {
                rs as i64 >= 0
            };
            s.set_gpr(31, link);
            conditional(desc, taken)
        }
        _ => Flow::Next,
    }
}

fn trap(s: &MipsState, desc: &InsnDesc) -> Flow {
    use InsnKind::*;
    let o = desc.insn.ops;
    let a = s.r[o.rs as usize];
    let b = match desc.insn.kind {
        Tgei | Tgeiu | Tlti | Tltiu | Teqi | Tnei => o.simm() as i64 as u64,
        _ => s.r[o.rt as usize],
    };
    let hit = match desc.insn.kind {
        Tge | Tgei => a as i64 >= b as i64,
        Tgeu | Tgeiu => a >= b,
        Tlt | Tlti => (a as i64) < b as i64,
        Tltu | Tltiu => a < b,
        Teq | Teqi => a == b,
        _ => a != b,
    };
    if hit {
        Flow::Raise(Exception::Trap, 0)
    } else {
        Flow::Next
    }
}

fn cop2(s: &mut MipsState, desc: &InsnDesc) -> Flow {
    use InsnKind::*;
    let o = desc.insn.ops;
    let (rt, rd) = (o.rt as usize, o.rd as usize);
    match desc.insn.kind {
        Mfc2 => s.set_gpr(rt, sext32(s.cpr[2][rd] as u32)),
        Cfc2 => s.set_gpr(rt, sext32(s.ccr[2][rd] as u32)),
        Dmfc2 => s.set_gpr(rt, s.cpr[2][rd]),
        Mtc2 => s.cpr[2][rd] = sext32(s.r[rt] as u32),
        Ctc2 => s.ccr[2][rd] = sext32(s.r[rt] as u32),
        Dmtc2 => s.cpr[2][rd] = s.r[rt],
        Bc2f | Bc2t => {
            let set = s.cpcond[2] != 0;
            return conditional(desc, set == (desc.insn.kind == Bc2t));
        }
        _ => {}
    }
    Flow::Next
}

#[cfg(test)]
mod tests {
    use super::*;
    use mips3_core::SimpleRam;

    fn machine(words: &[u32]) -> (Interpreter, MipsState) {
        let mut ram = SimpleRam::new(0, 0x1000, true);
        ram.load_words(0, words);
        let mut s = MipsState::new(Box::new(ram));
        s.pc = 0x8000_0000;
        (Interpreter::new(DrcConfig::default()), s)
    }

    fn exc_code(s: &MipsState) -> u32 {
        (s.cause() >> 2) & 0x1f
    }

    #[test]
    fn add_overflow_leaves_destination() {
        let (mut cpu, mut s) = machine(&[0x3c01_7fff, 0x3421_ffff, 0x2022_0001]);
        for _ in 0..3 {
            cpu.step(&mut s);
        }
        assert_eq!(s.r[1], 0x7fff_ffff);
        assert_eq!(s.r[2], 0);
        assert_eq!(exc_code(&s), Exception::Overflow.code());
        assert_eq!(s.cpr[0][COP0_EPC] as u32, 0x8000_0008);
        assert_eq!(s.pc, VECTOR_BASE_BEV + Exception::Overflow.vector_offset());
    }

    #[test]
    fn taken_branch_runs_delay_slot() {
        let (mut cpu, mut s) = machine(&[0x1000_0002, 0x2403_0005, 0x2404_0001, 0x2405_0002]);
        cpu.step(&mut s);
        assert!(cpu.in_delay_slot());
        assert_eq!(s.pc, 0x8000_0004);
        cpu.step(&mut s);
        assert_eq!(s.pc, 0x8000_000c);
        cpu.step(&mut s);
        assert_eq!((s.r[3], s.r[4], s.r[5]), (5, 0, 2));
    }

    #[test]
    fn untaken_likely_branch_skips_delay_slot() {
        let (mut cpu, mut s) = machine(&[0x5400_0001, 0x2403_0005]);
        cpu.step(&mut s);
        assert_eq!(s.pc, 0x8000_0008);
        assert_eq!(s.r[3], 0);
        assert!(!cpu.in_delay_slot());
    }

    #[test]
    fn branch_in_delay_slot_is_reserved() {
        let (mut cpu, mut s) = machine(&[0x0800_0040, 0x0800_0080]);
        cpu.step(&mut s);
        cpu.step(&mut s);
        assert_eq!(exc_code(&s), Exception::InvalidOp.code());
        assert_ne!(s.cause() & CAUSE_BD, 0);
        assert_eq!(s.cpr[0][COP0_EPC] as u32, 0x8000_0000);
    }

    #[test]
    fn cycles_are_charged_per_instruction() {
        let (mut cpu, mut s) = machine(&[0x2403_0005, 0x2404_0001]);
        s.grant(100);
        cpu.step(&mut s);
        cpu.step(&mut s);
        assert_eq!(s.retire(), 2);
    }
}
