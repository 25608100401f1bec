/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }
}

/// RBP holds the `MipsState` pointer for the whole time generated
/// code runs. It is callee-saved, so helper calls preserve it.
pub const AREG0: Reg = Reg::Rbp;

/// Parameter registers shared by generated code, stubs and
/// trampolines. They double as the first System V argument
/// registers so a trampoline can reach a Rust helper with little
/// shuffling.
///
/// P1: guest PC or address (always written as a 32-bit value).
pub const P1: Reg = Reg::Rdi;
/// P2: store value, or the faulting address for TLB exceptions.
pub const P2: Reg = Reg::Rsi;
/// P3: keep-mask for masked stores.
pub const P3: Reg = Reg::Rdx;
pub const P4: Reg = Reg::Rcx;

/// Callee-saved registers that the prologue must save/restore
/// (System V ABI).
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

pub const STACK_ALIGN: usize = 16;

// Frame slots, relative to rsp inside a compiled sequence.

/// Runtime branch target for JR/JALR.
pub const SLOT_NEXTPC: i32 = 0;
pub const SLOT_SAVE_P1: i32 = 8;
pub const SLOT_SAVE_P2: i32 = 16;
pub const SLOT_SAVE_P3: i32 = 24;
/// Number of 8-byte frame slots.
pub const FRAME_SLOTS: usize = 5;

/// Return address plus callee-saved pushes.
pub const PUSH_SIZE: usize = (1 + CALLEE_SAVED.len()) * 8;

/// Total frame size (16-byte aligned).
pub const FRAME_SIZE: usize = {
    let raw = PUSH_SIZE + FRAME_SLOTS * 8;
    (raw + STACK_ALIGN - 1) & !(STACK_ALIGN - 1)
};

/// Stack adjustment after pushes. Sequence code runs with rsp
/// 16-byte aligned; code entered by `call` (trampolines, stubs
/// behind a call) sees the slots 8 bytes higher.
pub const STACK_ADDEND: usize = FRAME_SIZE - PUSH_SIZE;
