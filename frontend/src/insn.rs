//! Instruction decoding: raw word to [`InsnKind`] plus [`Operands`].
//!
//! The opcode space is closed, so decoding is one pass over the
//! nested opcode fields producing a flat tag. Everything downstream
//! (describe, code generation, the interpreter) dispatches on
//! [`InsnKind::family`] through a table instead of re-walking the
//! primary/function/sub-field switches.

use mips3_core::MipsFlavor;

/// Fields of an instruction word, extracted once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Operands {
    pub rs: u8,
    pub rt: u8,
    pub rd: u8,
    pub sa: u8,
    pub funct: u8,
    pub imm: u16,
    /// 26-bit jump index.
    pub target: u32,
}

impl Operands {
    pub fn from_word(op: u32) -> Self {
        Self {
            rs: ((op >> 21) & 0x1f) as u8,
            rt: ((op >> 16) & 0x1f) as u8,
            rd: ((op >> 11) & 0x1f) as u8,
            sa: ((op >> 6) & 0x1f) as u8,
            funct: (op & 0x3f) as u8,
            imm: op as u16,
            target: op & 0x03ff_ffff,
        }
    }

    /// Sign-extended immediate.
    #[inline]
    pub fn simm(&self) -> i32 {
        self.imm as i16 as i32
    }

    /// Zero-extended immediate.
    #[inline]
    pub fn uimm(&self) -> u32 {
        self.imm as u32
    }

    // COP1 register aliases.

    #[inline]
    pub fn fmt(&self) -> u8 {
        self.rs
    }

    #[inline]
    pub fn ft(&self) -> u8 {
        self.rt
    }

    #[inline]
    pub fn fs(&self) -> u8 {
        self.rd
    }

    #[inline]
    pub fn fd(&self) -> u8 {
        self.sa
    }

    /// COP1X third source.
    #[inline]
    pub fn fr(&self) -> u8 {
        self.rs
    }

    /// Condition code selector of BC1x and MOVF/MOVT (MIPS IV).
    #[inline]
    pub fn branch_cc(&self) -> u8 {
        self.rt >> 2
    }

    #[inline]
    pub fn movc_cc(&self) -> u8 {
        self.rt >> 2
    }

    /// Condition code written by C.cond.fmt (MIPS IV).
    #[inline]
    pub fn compare_cc(&self) -> u8 {
        self.sa >> 2
    }

    /// Branch displacement target relative to the delay slot.
    #[inline]
    pub fn branch_target(&self, pc: u32) -> u32 {
        pc.wrapping_add(4).wrapping_add((self.simm() << 2) as u32)
    }

    /// J/JAL target within the current 256 MiB region.
    #[inline]
    pub fn jump_target(&self, pc: u32) -> u32 {
        (pc & 0xf000_0000) | (self.target << 2)
    }
}

/// Opcode families, the unit of table dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Family {
    /// Immediate and register ALU ops, shifts, conditional moves.
    Alu = 0,
    /// Multiply/divide and the HI/LO moves.
    MulDiv,
    Branch,
    Trap,
    Load,
    Store,
    /// SYSCALL, BREAK and the architectural no-ops.
    System,
    Cop0,
    Cop1,
    Cop1x,
    Cop2,
    Invalid,
}

impl Family {
    pub const COUNT: usize = 12;
}

/// Every instruction the recompiler knows, flattened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsnKind {
    // ALU, immediate
    Addi,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,
    Daddi,
    Daddiu,
    // ALU, register
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
    Dadd,
    Daddu,
    Dsub,
    Dsubu,
    // shifts
    Sll,
    Srl,
    Sra,
    Sllv,
    Srlv,
    Srav,
    Dsll,
    Dsrl,
    Dsra,
    Dsll32,
    Dsrl32,
    Dsra32,
    Dsllv,
    Dsrlv,
    Dsrav,
    // conditional moves (MIPS IV)
    Movz,
    Movn,
    Movf,
    Movt,
    // multiply/divide
    Mfhi,
    Mthi,
    Mflo,
    Mtlo,
    Mult,
    Multu,
    Div,
    Divu,
    Dmult,
    Dmultu,
    Ddiv,
    Ddivu,
    Mad,
    Madu,
    Mul,
    // branches and jumps
    J,
    Jal,
    Jr,
    Jalr,
    Beq,
    Bne,
    Blez,
    Bgtz,
    Beql,
    Bnel,
    Blezl,
    Bgtzl,
    Bltz,
    Bgez,
    Bltzl,
    Bgezl,
    Bltzal,
    Bgezal,
    Bltzall,
    Bgezall,
    Bc0f,
    Bc0t,
    Bc1f,
    Bc1t,
    Bc1fl,
    Bc1tl,
    Bc2f,
    Bc2t,
    // traps
    Tge,
    Tgeu,
    Tlt,
    Tltu,
    Teq,
    Tne,
    Tgei,
    Tgeiu,
    Tlti,
    Tltiu,
    Teqi,
    Tnei,
    // loads
    Lb,
    Lbu,
    Lh,
    Lhu,
    Lw,
    Lwu,
    Ld,
    Lwl,
    Lwr,
    Ldl,
    Ldr,
    Ll,
    Lld,
    Lwc1,
    Ldc1,
    Lwc2,
    Ldc2,
    // stores
    Sb,
    Sh,
    Sw,
    Sd,
    Swl,
    Swr,
    Sdl,
    Sdr,
    Sc,
    Scd,
    Swc1,
    Sdc1,
    Swc2,
    Sdc2,
    // system
    Syscall,
    Break,
    Sync,
    Cache,
    Pref,
    // COP0
    Mfc0,
    Dmfc0,
    Cfc0,
    Mtc0,
    Dmtc0,
    Ctc0,
    Tlbr,
    Tlbwi,
    Tlbwr,
    Tlbp,
    Eret,
    Wait,
    // COP1 moves
    Mfc1,
    Dmfc1,
    Cfc1,
    Mtc1,
    Dmtc1,
    Ctc1,
    // COP1 arithmetic (format in Operands::fmt)
    FAdd,
    FSub,
    FMul,
    FDiv,
    FSqrt,
    FAbs,
    FMov,
    FNeg,
    FRoundL,
    FTruncL,
    FCeilL,
    FFloorL,
    FRoundW,
    FTruncW,
    FCeilW,
    FFloorW,
    FMovcf,
    FMovz,
    FMovn,
    FRecip,
    FRsqrt,
    FCvtS,
    FCvtD,
    FCvtW,
    FCvtL,
    FCompare,
    // COP1X
    Lwxc1,
    Ldxc1,
    Swxc1,
    Sdxc1,
    Prefx,
    FMadd,
    FMsub,
    FNmadd,
    FNmsub,
    // COP2
    Mfc2,
    Dmfc2,
    Cfc2,
    Mtc2,
    Dmtc2,
    Ctc2,
    Invalid,
}

impl InsnKind {
    pub fn family(self) -> Family {
        use InsnKind::*;
        match self {
            Addi | Addiu | Slti | Sltiu | Andi | Ori | Xori | Lui | Daddi | Daddiu | Add | Addu
            | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Dadd | Daddu | Dsub | Dsubu
            | Sll | Srl | Sra | Sllv | Srlv | Srav | Dsll | Dsrl | Dsra | Dsll32 | Dsrl32
            | Dsra32 | Dsllv | Dsrlv | Dsrav | Movz | Movn | Movf | Movt => Family::Alu,
            Mfhi | Mthi | Mflo | Mtlo | Mult | Multu | Div | Divu | Dmult | Dmultu | Ddiv
            | Ddivu | Mad | Madu | Mul => Family::MulDiv,
            J | Jal | Jr | Jalr | Beq | Bne | Blez | Bgtz | Beql | Bnel | Blezl | Bgtzl | Bltz
            | Bgez | Bltzl | Bgezl | Bltzal | Bgezal | Bltzall | Bgezall | Bc1f | Bc1t
            | Bc1fl | Bc1tl => Family::Branch,
            Tge | Tgeu | Tlt | Tltu | Teq | Tne | Tgei | Tgeiu | Tlti | Tltiu | Teqi | Tnei => {
                Family::Trap
            }
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld | Lwl | Lwr | Ldl | Ldr | Ll | Lld | Lwc1
            | Ldc1 | Lwc2 | Ldc2 => Family::Load,
            Sb | Sh | Sw | Sd | Swl | Swr | Sdl | Sdr | Sc | Scd | Swc1 | Sdc1 | Swc2 | Sdc2 => {
                Family::Store
            }
            Syscall | Break | Sync | Cache | Pref => Family::System,
            Mfc0 | Dmfc0 | Cfc0 | Mtc0 | Dmtc0 | Ctc0 | Tlbr | Tlbwi | Tlbwr | Tlbp | Eret
            | Wait | Bc0f | Bc0t => Family::Cop0,
            Mfc1 | Dmfc1 | Cfc1 | Mtc1 | Dmtc1 | Ctc1 | FAdd | FSub | FMul | FDiv | FSqrt
            | FAbs | FMov | FNeg | FRoundL | FTruncL | FCeilL | FFloorL | FRoundW | FTruncW
            | FCeilW | FFloorW | FMovcf | FMovz | FMovn | FRecip | FRsqrt | FCvtS | FCvtD
            | FCvtW | FCvtL | FCompare => Family::Cop1,
            Lwxc1 | Ldxc1 | Swxc1 | Sdxc1 | Prefx | FMadd | FMsub | FNmadd | FNmsub => {
                Family::Cop1x
            }
            Mfc2 | Dmfc2 | Cfc2 | Mtc2 | Dmtc2 | Ctc2 | Bc2f | Bc2t => Family::Cop2,
            Invalid => Family::Invalid,
        }
    }

    /// Branch-likely forms.
    pub fn is_likely(self) -> bool {
        use InsnKind::*;
        matches!(
            self,
            Beql | Bnel | Blezl | Bgtzl | Bltzl | Bgezl | Bltzall | Bgezall | Bc1fl | Bc1tl
        )
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    pub kind: InsnKind,
    pub ops: Operands,
    pub word: u32,
}

impl Insn {
    #[inline]
    pub fn primary(&self) -> u8 {
        (self.word >> 26) as u8
    }

    #[inline]
    pub fn family(&self) -> Family {
        self.kind.family()
    }
}

const FMT_S: u8 = 16;
const FMT_D: u8 = 17;
const FMT_W: u8 = 20;
const FMT_L: u8 = 21;

/// Decode one instruction word for the given CPU flavor.
///
/// Encodings the flavor does not implement decode as
/// [`InsnKind::Invalid`].
pub fn decode(word: u32, flavor: MipsFlavor) -> Insn {
    let ops = Operands::from_word(word);
    let mips4 = flavor >= MipsFlavor::Mips4;
    let kind = decode_kind(word, &ops, mips4);
    Insn { kind, ops, word }
}

fn decode_kind(word: u32, o: &Operands, mips4: bool) -> InsnKind {
    use InsnKind::*;
    match word >> 26 {
        0x00 => decode_special(o, mips4),
        0x01 => decode_regimm(o),
        0x02 => J,
        0x03 => Jal,
        0x04 => Beq,
        0x05 => Bne,
        0x06 => Blez,
        0x07 => Bgtz,
        0x08 => Addi,
        0x09 => Addiu,
        0x0a => Slti,
        0x0b => Sltiu,
        0x0c => Andi,
        0x0d => Ori,
        0x0e => Xori,
        0x0f => Lui,
        0x10 => decode_cop0(word, o),
        0x11 => decode_cop1(o, mips4),
        0x12 => decode_cop2(o),
        0x13 if mips4 => decode_cop1x(o),
        0x14 => Beql,
        0x15 => Bnel,
        0x16 => Blezl,
        0x17 => Bgtzl,
        0x18 => Daddi,
        0x19 => Daddiu,
        0x1a => Ldl,
        0x1b => Ldr,
        0x1c => match word & 0x1f {
            0 => Mad,
            1 => Madu,
            2 => Mul,
            _ => Invalid,
        },
        0x20 => Lb,
        0x21 => Lh,
        0x22 => Lwl,
        0x23 => Lw,
        0x24 => Lbu,
        0x25 => Lhu,
        0x26 => Lwr,
        0x27 => Lwu,
        0x28 => Sb,
        0x29 => Sh,
        0x2a => Swl,
        0x2b => Sw,
        0x2c => Sdl,
        0x2d => Sdr,
        0x2e => Swr,
        0x2f => Cache,
        0x30 => Ll,
        0x31 => Lwc1,
        0x32 => Lwc2,
        0x33 if mips4 => Pref,
        0x34 => Lld,
        0x35 => Ldc1,
        0x36 => Ldc2,
        0x37 => Ld,
        0x38 => Sc,
        0x39 => Swc1,
        0x3a => Swc2,
        0x3c => Scd,
        0x3d => Sdc1,
        0x3e => Sdc2,
        0x3f => Sd,
        _ => Invalid,
    }
}

fn decode_special(o: &Operands, mips4: bool) -> InsnKind {
    use InsnKind::*;
    match o.funct {
        0x00 => Sll,
        0x01 if mips4 => {
            if o.rt & 1 != 0 {
                Movt
            } else {
                Movf
            }
        }
        0x02 => Srl,
        0x03 => Sra,
        0x04 => Sllv,
        0x06 => Srlv,
        0x07 => Srav,
        0x08 => Jr,
        0x09 => Jalr,
        0x0a if mips4 => Movz,
        0x0b if mips4 => Movn,
        0x0c => Syscall,
        0x0d => Break,
        0x0f => Sync,
        0x10 => Mfhi,
        0x11 => Mthi,
        0x12 => Mflo,
        0x13 => Mtlo,
        0x14 => Dsllv,
        0x16 => Dsrlv,
        0x17 => Dsrav,
        0x18 => Mult,
        0x19 => Multu,
        0x1a => Div,
        0x1b => Divu,
        0x1c => Dmult,
        0x1d => Dmultu,
        0x1e => Ddiv,
        0x1f => Ddivu,
        0x20 => Add,
        0x21 => Addu,
        0x22 => Sub,
        0x23 => Subu,
        0x24 => And,
        0x25 => Or,
        0x26 => Xor,
        0x27 => Nor,
        0x2a => Slt,
        0x2b => Sltu,
        0x2c => Dadd,
        0x2d => Daddu,
        0x2e => Dsub,
        0x2f => Dsubu,
        0x30 => Tge,
        0x31 => Tgeu,
        0x32 => Tlt,
        0x33 => Tltu,
        0x34 => Teq,
        0x36 => Tne,
        0x38 => Dsll,
        0x3a => Dsrl,
        0x3b => Dsra,
        0x3c => Dsll32,
        0x3e => Dsrl32,
        0x3f => Dsra32,
        _ => Invalid,
    }
}

fn decode_regimm(o: &Operands) -> InsnKind {
    use InsnKind::*;
    match o.rt {
        0x00 => Bltz,
        0x01 => Bgez,
        0x02 => Bltzl,
        0x03 => Bgezl,
        0x08 => Tgei,
        0x09 => Tgeiu,
        0x0a => Tlti,
        0x0b => Tltiu,
        0x0c => Teqi,
        0x0e => Tnei,
        0x10 => Bltzal,
        0x11 => Bgezal,
        0x12 => Bltzall,
        0x13 => Bgezall,
        _ => Invalid,
    }
}

fn decode_cop0(word: u32, o: &Operands) -> InsnKind {
    use InsnKind::*;
    match o.rs {
        0x00 => Mfc0,
        0x01 => Dmfc0,
        0x02 => Cfc0,
        0x04 => Mtc0,
        0x05 => Dmtc0,
        0x06 => Ctc0,
        0x08 => match o.rt {
            0x00 => Bc0f,
            0x01 => Bc0t,
            _ => Invalid,
        },
        0x10..=0x1f => match word & 0x01ff_ffff {
            0x01 => Tlbr,
            0x02 => Tlbwi,
            0x06 => Tlbwr,
            0x08 => Tlbp,
            0x18 => Eret,
            0x20 => Wait,
            _ => Invalid,
        },
        _ => Invalid,
    }
}

fn decode_cop1(o: &Operands, mips4: bool) -> InsnKind {
    use InsnKind::*;
    match o.rs {
        0x00 => Mfc1,
        0x01 => Dmfc1,
        0x02 => Cfc1,
        0x04 => Mtc1,
        0x05 => Dmtc1,
        0x06 => Ctc1,
        0x08 => {
            // MIPS III only has condition code 0
            if !mips4 && o.branch_cc() != 0 {
                return Invalid;
            }
            match o.rt & 3 {
                0 => Bc1f,
                1 => Bc1t,
                2 => Bc1fl,
                _ => Bc1tl,
            }
        }
        0x10..=0x1f => decode_cop1_arith(o, mips4),
        _ => Invalid,
    }
}

fn decode_cop1_arith(o: &Operands, mips4: bool) -> InsnKind {
    use InsnKind::*;
    let fmt = o.fmt();
    let sd = fmt == FMT_S || fmt == FMT_D;
    let kind = match o.funct {
        0x00 => FAdd,
        0x01 => FSub,
        0x02 => FMul,
        0x03 => FDiv,
        0x04 => FSqrt,
        0x05 => FAbs,
        0x06 => FMov,
        0x07 => FNeg,
        0x08 => FRoundL,
        0x09 => FTruncL,
        0x0a => FCeilL,
        0x0b => FFloorL,
        0x0c => FRoundW,
        0x0d => FTruncW,
        0x0e => FCeilW,
        0x0f => FFloorW,
        0x11 if mips4 => FMovcf,
        0x12 if mips4 => FMovz,
        0x13 if mips4 => FMovn,
        0x15 if mips4 => FRecip,
        0x16 if mips4 => FRsqrt,
        0x20 => {
            return if matches!(fmt, FMT_D | FMT_W | FMT_L) {
                FCvtS
            } else {
                Invalid
            }
        }
        0x21 => {
            return if matches!(fmt, FMT_S | FMT_W | FMT_L) {
                FCvtD
            } else {
                Invalid
            }
        }
        0x24 => FCvtW,
        0x25 => FCvtL,
        0x30..=0x3f => FCompare,
        _ => return Invalid,
    };
    if sd {
        kind
    } else {
        Invalid
    }
}

fn decode_cop1x(o: &Operands) -> InsnKind {
    use InsnKind::*;
    match o.funct {
        0x00 => Lwxc1,
        0x01 => Ldxc1,
        0x08 => Swxc1,
        0x09 => Sdxc1,
        0x0f => Prefx,
        0x20 | 0x21 => FMadd,
        0x28 | 0x29 => FMsub,
        0x30 | 0x31 => FNmadd,
        0x38 | 0x39 => FNmsub,
        _ => Invalid,
    }
}

fn decode_cop2(o: &Operands) -> InsnKind {
    use InsnKind::*;
    match o.rs {
        0x00 => Mfc2,
        0x01 => Dmfc2,
        0x02 => Cfc2,
        0x04 => Mtc2,
        0x05 => Dmtc2,
        0x06 => Ctc2,
        0x08 => match o.rt {
            0x00 => Bc2f,
            0x01 => Bc2t,
            _ => Invalid,
        },
        _ => Invalid,
    }
}
