//! The instruction descriptor record.

use std::ptr::NonNull;

use crate::flags::DescFlags;
use crate::insn::{Insn, InsnKind, Operands};
use crate::pool::DescId;

/// Bit of the GPR masks tracking LO.
pub const REGFLAG_LO: u64 = 1 << 32;
/// Bit of the GPR masks tracking HI.
pub const REGFLAG_HI: u64 = 1 << 33;
/// Bit of the FPR masks tracking the FPU condition codes.
pub const REGFLAG_FCC: u64 = 1 << 32;

/// Target PC value meaning "known only at runtime".
pub const TARGET_DYNAMIC: u32 = !0;

#[inline]
pub const fn regflag(reg: u8) -> u64 {
    1 << (reg & 0x1f)
}

/// Register usage of one instruction plus its liveness within the
/// sub-sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegUsage {
    pub used: u64,
    pub modified: u64,
    pub liveread: u64,
    pub livewrite: u64,
}

/// One decoded guest instruction.
#[derive(Debug, Clone)]
pub struct InsnDesc {
    pub pc: u32,
    /// `None` when the instruction fetch itself failed to translate.
    pub physpc: Option<u32>,
    pub insn: Insn,
    /// Host location the opcode was read from, when it sits in fast
    /// RAM. Compiled validation guards compare against this word.
    pub opptr: Option<NonNull<u32>>,
    pub targetpc: u32,
    pub flags: DescFlags,
    pub cycles: u32,
    pub gpr: RegUsage,
    pub fpr: RegUsage,
    /// Owned delay-slot descriptor of a branch.
    pub delay: Option<DescId>,
    /// Owning branch of a delay-slot descriptor.
    pub branch: Option<DescId>,
    /// Next descriptor in compile order.
    pub next: Option<DescId>,
}

impl InsnDesc {
    /// Defaults applied before describing the instruction at `pc`.
    pub fn blank(pc: u32) -> Self {
        Self {
            pc,
            physpc: Some(pc),
            insn: Insn {
                kind: InsnKind::Sll,
                ops: Operands::default(),
                word: 0,
            },
            opptr: None,
            targetpc: TARGET_DYNAMIC,
            flags: DescFlags::NONE,
            cycles: 1,
            gpr: RegUsage::default(),
            fpr: RegUsage::default(),
            delay: None,
            branch: None,
            next: None,
        }
    }

    #[inline]
    pub fn opcode(&self) -> u32 {
        self.insn.word
    }

    #[inline]
    pub fn has(&self, flags: DescFlags) -> bool {
        self.flags.intersects(flags)
    }

    #[inline]
    pub fn is_branch(&self) -> bool {
        self.flags.intersects(DescFlags::IS_BRANCH)
    }

    #[inline]
    pub fn in_delay_slot(&self) -> bool {
        self.flags.contains(DescFlags::IN_DELAY_SLOT)
    }

    #[inline]
    pub fn has_static_target(&self) -> bool {
        self.targetpc != TARGET_DYNAMIC
    }
}
