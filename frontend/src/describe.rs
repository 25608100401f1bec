//! Static description of a decoded instruction: register usage,
//! branch behaviour, exception potential and cycle cost.

use mips3_core::cop0::{COP0_CAUSE, COP0_STATUS};

use crate::desc::{regflag, InsnDesc, REGFLAG_FCC, REGFLAG_HI, REGFLAG_LO};
use crate::flags::DescFlags;
use crate::insn::{Family, Insn, InsnKind};

type DescribeFn = fn(&mut InsnDesc, &Insn);

/// Indexed by [`Family`].
const DESCRIBE: [DescribeFn; Family::COUNT] = [
    describe_alu,
    describe_muldiv,
    describe_branch,
    describe_trap,
    describe_load,
    describe_store,
    describe_system,
    describe_cop0,
    describe_cop1,
    describe_cop1x,
    describe_cop2,
    describe_invalid,
];

/// Fill in `desc` from `insn`. The descriptor is expected to hold
/// the defaults from [`InsnDesc::blank`].
pub fn describe_insn(desc: &mut InsnDesc, insn: Insn) {
    desc.insn = insn;
    DESCRIBE[insn.family() as usize](desc, &insn);
    desc.gpr.modified &= !regflag(0);
}

fn invalid_opcode(desc: &mut InsnDesc) {
    desc.flags |=
        DescFlags::WILL_CAUSE_EXCEPTION | DescFlags::END_SEQUENCE | DescFlags::INVALID_OPCODE;
}

fn describe_invalid(desc: &mut InsnDesc, _insn: &Insn) {
    invalid_opcode(desc);
}

fn describe_alu(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    match insn.kind {
        Addi | Daddi => {
            desc.gpr.used |= regflag(o.rs);
            desc.gpr.modified |= regflag(o.rt);
            desc.flags |= DescFlags::CAN_CAUSE_EXCEPTION;
        }
        Addiu | Slti | Sltiu | Andi | Ori | Xori | Daddiu => {
            desc.gpr.used |= regflag(o.rs);
            desc.gpr.modified |= regflag(o.rt);
        }
        Lui => desc.gpr.modified |= regflag(o.rt),
        Sll | Srl | Sra | Dsll | Dsrl | Dsra | Dsll32 | Dsrl32 | Dsra32 => {
            desc.gpr.used |= regflag(o.rt);
            desc.gpr.modified |= regflag(o.rd);
        }
        Add | Sub | Dadd | Dsub => {
            desc.gpr.used |= regflag(o.rs) | regflag(o.rt);
            desc.gpr.modified |= regflag(o.rd);
            desc.flags |= DescFlags::CAN_CAUSE_EXCEPTION;
        }
        Movz | Movn => {
            desc.gpr.used |= regflag(o.rs) | regflag(o.rt) | regflag(o.rd);
            desc.gpr.modified |= regflag(o.rd);
        }
        Movf | Movt => {
            desc.gpr.used |= regflag(o.rs);
            desc.fpr.used |= REGFLAG_FCC;
            desc.gpr.modified |= regflag(o.rd);
        }
        _ => {
            desc.gpr.used |= regflag(o.rs) | regflag(o.rt);
            desc.gpr.modified |= regflag(o.rd);
        }
    }
}

fn describe_muldiv(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    match insn.kind {
        Mfhi => {
            desc.gpr.used |= REGFLAG_HI;
            desc.gpr.modified |= regflag(o.rd);
        }
        Mflo => {
            desc.gpr.used |= REGFLAG_LO;
            desc.gpr.modified |= regflag(o.rd);
        }
        Mthi => {
            desc.gpr.used |= regflag(o.rs);
            desc.gpr.modified |= REGFLAG_HI;
        }
        Mtlo => {
            desc.gpr.used |= regflag(o.rs);
            desc.gpr.modified |= REGFLAG_LO;
        }
        Mad | Madu => {
            desc.gpr.used |= regflag(o.rs) | regflag(o.rt) | REGFLAG_LO | REGFLAG_HI;
            desc.gpr.modified |= REGFLAG_LO | REGFLAG_HI;
        }
        Mul => {
            desc.gpr.used |= regflag(o.rs) | regflag(o.rt);
            desc.gpr.modified |= regflag(o.rd);
            desc.cycles = 3;
        }
        kind => {
            desc.gpr.used |= regflag(o.rs) | regflag(o.rt);
            desc.gpr.modified |= REGFLAG_LO | REGFLAG_HI;
            desc.cycles = match kind {
                Mult | Multu => 3,
                Div | Divu => 35,
                Dmult | Dmultu => 7,
                _ => 67,
            };
        }
    }
}

fn describe_branch(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    let pc = desc.pc;
    if insn.kind.is_likely() {
        desc.flags |= DescFlags::IS_LIKELY_BRANCH;
    }
    match insn.kind {
        J | Jal => {
            if insn.kind == Jal {
                desc.gpr.modified |= regflag(31);
            }
            desc.flags |= DescFlags::IS_UNCONDITIONAL_BRANCH | DescFlags::END_SEQUENCE;
            desc.targetpc = o.jump_target(pc);
        }
        Jr | Jalr => {
            desc.gpr.used |= regflag(o.rs);
            if insn.kind == Jalr {
                desc.gpr.modified |= regflag(o.rd);
            }
            desc.flags |= DescFlags::IS_UNCONDITIONAL_BRANCH | DescFlags::END_SEQUENCE;
        }
        Beq | Bne | Beql | Bnel => {
            if matches!(insn.kind, Beq | Beql) && o.rs == o.rt {
                desc.flags |= DescFlags::IS_UNCONDITIONAL_BRANCH | DescFlags::END_SEQUENCE;
            } else {
                desc.gpr.used |= regflag(o.rs) | regflag(o.rt);
                desc.flags |= DescFlags::IS_CONDITIONAL_BRANCH;
            }
            desc.targetpc = o.branch_target(pc);
        }
        Blez | Bgtz | Blezl | Bgtzl | Bltz | Bgez | Bltzl | Bgezl => {
            if matches!(insn.kind, Blez | Blezl | Bgez) && o.rs == 0 {
                desc.flags |= DescFlags::IS_UNCONDITIONAL_BRANCH | DescFlags::END_SEQUENCE;
            } else {
                desc.gpr.used |= regflag(o.rs);
                desc.flags |= DescFlags::IS_CONDITIONAL_BRANCH;
            }
            desc.targetpc = o.branch_target(pc);
        }
        Bltzal | Bgezal | Bltzall | Bgezall => {
            if insn.kind == Bgezal && o.rs == 0 {
                desc.flags |= DescFlags::IS_UNCONDITIONAL_BRANCH | DescFlags::END_SEQUENCE;
            } else {
                desc.gpr.used |= regflag(o.rs);
                desc.flags |= DescFlags::IS_CONDITIONAL_BRANCH;
            }
            desc.gpr.modified |= regflag(31);
            desc.targetpc = o.branch_target(pc);
        }
        Bc1f | Bc1t | Bc1fl | Bc1tl => {
            desc.fpr.used |= REGFLAG_FCC;
            desc.flags |= DescFlags::IS_CONDITIONAL_BRANCH;
            desc.targetpc = o.branch_target(pc);
        }
        _ => invalid_opcode(desc),
    }
}

fn describe_trap(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    desc.gpr.used |= regflag(o.rs);
    if matches!(insn.kind, Tge | Tgeu | Tlt | Tltu | Teq | Tne) {
        desc.gpr.used |= regflag(o.rt);
    }
    desc.flags |= DescFlags::CAN_CAUSE_EXCEPTION;
}

fn describe_load(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    desc.gpr.used |= regflag(o.rs);
    match insn.kind {
        Lwc1 | Ldc1 => desc.fpr.modified |= regflag(o.rt),
        Lwc2 | Ldc2 => {}
        Lwl | Lwr | Ldl | Ldr => {
            desc.gpr.used |= regflag(o.rt);
            desc.gpr.modified |= regflag(o.rt);
        }
        _ => desc.gpr.modified |= regflag(o.rt),
    }
    desc.flags |= DescFlags::READS_MEMORY | DescFlags::CAN_CAUSE_EXCEPTION;
}

fn describe_store(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    desc.gpr.used |= regflag(o.rs);
    match insn.kind {
        Swc1 | Sdc1 => desc.fpr.used |= regflag(o.rt),
        Swc2 | Sdc2 => {}
        _ => desc.gpr.used |= regflag(o.rt),
    }
    desc.flags |= DescFlags::WRITES_MEMORY | DescFlags::CAN_CAUSE_EXCEPTION;
}

fn describe_system(desc: &mut InsnDesc, insn: &Insn) {
    if matches!(insn.kind, InsnKind::Syscall | InsnKind::Break) {
        desc.flags |= DescFlags::WILL_CAUSE_EXCEPTION | DescFlags::END_SEQUENCE;
    }
}

fn describe_cop0(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    desc.flags |= DescFlags::CAN_CAUSE_EXCEPTION;
    match insn.kind {
        Mfc0 | Dmfc0 | Cfc0 => desc.gpr.modified |= regflag(o.rt),
        Mtc0 | Dmtc0 | Ctc0 => {
            desc.gpr.used |= regflag(o.rt);
            if insn.kind != Ctc0 {
                match o.rd as usize {
                    COP0_CAUSE => desc.flags |= DescFlags::CAN_TRIGGER_SW_INT,
                    COP0_STATUS => desc.flags |= DescFlags::CAN_EXPOSE_EXTERNAL_INT,
                    _ => {}
                }
            }
        }
        Bc0f | Bc0t => {
            desc.flags |= DescFlags::IS_CONDITIONAL_BRANCH;
            desc.targetpc = o.branch_target(desc.pc);
        }
        Tlbwi | Tlbwr => desc.flags |= DescFlags::MODIFIES_TRANSLATION,
        Eret => desc.flags |= DescFlags::IS_UNCONDITIONAL_BRANCH | DescFlags::END_SEQUENCE,
        _ => {}
    }
}

fn describe_cop1(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    match insn.kind {
        Mfc1 | Dmfc1 => {
            desc.fpr.used |= regflag(o.fs());
            desc.gpr.modified |= regflag(o.rt);
        }
        Cfc1 => desc.gpr.modified |= regflag(o.rt),
        Mtc1 | Dmtc1 => {
            desc.gpr.used |= regflag(o.rt);
            desc.fpr.modified |= regflag(o.fs());
        }
        Ctc1 => desc.gpr.used |= regflag(o.rt),
        FAdd | FSub | FMul | FDiv | FMovz | FMovn => {
            desc.fpr.used |= regflag(o.fs()) | regflag(o.ft());
            desc.fpr.modified |= regflag(o.fd());
            if matches!(insn.kind, FMovz | FMovn) {
                // the condition comes from a GPR in the ft slot
                desc.fpr.used &= !regflag(o.ft());
                desc.gpr.used |= regflag(o.ft());
                desc.fpr.used |= regflag(o.fd());
            }
        }
        FMovcf => {
            desc.fpr.used |= regflag(o.fs()) | regflag(o.fd()) | REGFLAG_FCC;
            desc.fpr.modified |= regflag(o.fd());
        }
        FCompare => {
            // C.F and C.UN never look at their operands
            if !matches!(o.funct, 0x30 | 0x31 | 0x38 | 0x39) {
                desc.fpr.used |= regflag(o.fs()) | regflag(o.ft());
            }
            desc.fpr.modified |= REGFLAG_FCC;
        }
        _ => {
            desc.fpr.used |= regflag(o.fs());
            desc.fpr.modified |= regflag(o.fd());
        }
    }
}

fn describe_cop1x(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    match insn.kind {
        Lwxc1 | Ldxc1 => {
            desc.gpr.used |= regflag(o.rs) | regflag(o.rt);
            desc.fpr.modified |= regflag(o.fd());
            desc.flags |= DescFlags::READS_MEMORY | DescFlags::CAN_CAUSE_EXCEPTION;
        }
        Swxc1 | Sdxc1 => {
            desc.gpr.used |= regflag(o.rs) | regflag(o.rt);
            desc.fpr.used |= regflag(o.fs());
            desc.flags |= DescFlags::WRITES_MEMORY | DescFlags::CAN_CAUSE_EXCEPTION;
        }
        Prefx => {}
        _ => {
            desc.fpr.used |= regflag(o.fs()) | regflag(o.ft()) | regflag(o.fr());
            desc.fpr.modified |= regflag(o.fd());
        }
    }
}

fn describe_cop2(desc: &mut InsnDesc, insn: &Insn) {
    use InsnKind::*;
    let o = &insn.ops;
    desc.flags |= DescFlags::CAN_CAUSE_EXCEPTION;
    match insn.kind {
        Mfc2 | Dmfc2 | Cfc2 => desc.gpr.modified |= regflag(o.rt),
        Mtc2 | Dmtc2 | Ctc2 => desc.gpr.used |= regflag(o.rt),
        _ => {
            desc.flags |= DescFlags::IS_CONDITIONAL_BRANCH;
            desc.targetpc = o.branch_target(desc.pc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::decode;
    use mips3_core::MipsFlavor;

    fn describe(pc: u32, word: u32) -> InsnDesc {
        let mut desc = InsnDesc::blank(pc);
        describe_insn(&mut desc, decode(word, MipsFlavor::Mips4));
        desc
    }

    #[test]
    fn beq_self_compare_is_unconditional() {
        // beq r0, r0, -1
        let d = describe(0x1000, 0x1000_ffff);
        assert!(d.flags.contains(DescFlags::IS_UNCONDITIONAL_BRANCH | DescFlags::END_SEQUENCE));
        assert_eq!(d.targetpc, 0x1000);
        // bne r1, r2
        let d = describe(0x1000, 0x1422_0004);
        assert!(d.flags.contains(DescFlags::IS_CONDITIONAL_BRANCH));
        assert_eq!(d.gpr.used, regflag(1) | regflag(2));
        assert_eq!(d.targetpc, 0x1014);
    }

    #[test]
    fn writes_to_r0_are_dropped() {
        // addu r0, r1, r2
        let d = describe(0, 0x0022_0021);
        assert_eq!(d.gpr.modified, 0);
        assert_eq!(d.gpr.used, regflag(1) | regflag(2));
    }

    #[test]
    fn divide_costs_and_hilo() {
        // div r1, r2
        let d = describe(0, 0x0022_001a);
        assert_eq!(d.cycles, 35);
        assert_eq!(d.gpr.modified, REGFLAG_LO | REGFLAG_HI);
    }

    #[test]
    fn mtc0_status_flags() {
        // mtc0 r2, Status
        let d = describe(0, 0x4082_6000);
        assert!(d.flags.contains(DescFlags::CAN_EXPOSE_EXTERNAL_INT));
        assert!(d.flags.contains(DescFlags::CAN_CAUSE_EXCEPTION));
        // mtc0 r2, Cause
        let d = describe(0, 0x4082_6800);
        assert!(d.flags.contains(DescFlags::CAN_TRIGGER_SW_INT));
    }

    #[test]
    fn invalid_ends_sequence() {
        let d = describe(0, 0xec00_0000);
        assert!(d.flags.contains(
            DescFlags::INVALID_OPCODE | DescFlags::END_SEQUENCE | DescFlags::WILL_CAUSE_EXCEPTION
        ));
    }

    #[test]
    fn unaligned_loads_merge_rt() {
        // lwl r3, 0(r4)
        let d = describe(0, 0x8883_0000);
        assert_eq!(d.gpr.used, regflag(3) | regflag(4));
        assert_eq!(d.gpr.modified, regflag(3));
        assert!(d.flags.contains(DescFlags::READS_MEMORY));
    }
}
