//! Descriptor flag bits.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Statically determined facts about one decoded instruction.
///
/// Bits are only ever added while a sequence is being described;
/// nothing clears them once liveness analysis has started.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DescFlags(u32);

impl DescFlags {
    pub const NONE: DescFlags = DescFlags(0);
    /// Branch whose outcome depends on a runtime condition.
    pub const IS_CONDITIONAL_BRANCH: DescFlags = DescFlags(0x0000_0001);
    /// Branch that is always taken.
    pub const IS_UNCONDITIONAL_BRANCH: DescFlags = DescFlags(0x0000_0002);
    /// Branch that squashes its delay slot when not taken.
    pub const IS_LIKELY_BRANCH: DescFlags = DescFlags(0x0000_0004);
    /// Branch target lies inside the exploration window.
    pub const INTRABLOCK_BRANCH: DescFlags = DescFlags(0x0000_0008);
    pub const READS_MEMORY: DescFlags = DescFlags(0x0000_0010);
    pub const WRITES_MEMORY: DescFlags = DescFlags(0x0000_0020);
    pub const CAN_CAUSE_EXCEPTION: DescFlags = DescFlags(0x0000_0040);
    pub const WILL_CAUSE_EXCEPTION: DescFlags = DescFlags(0x0000_0080);
    /// Compiled code for the sub-sequence stops after this instruction.
    pub const END_SEQUENCE: DescFlags = DescFlags(0x0000_0100);
    /// Some control flow lands on this instruction.
    pub const IS_BRANCH_TARGET: DescFlags = DescFlags(0x0000_0200);
    pub const IN_DELAY_SLOT: DescFlags = DescFlags(0x0000_0400);
    /// Falls off the end of the window: dispatch to the next PC.
    pub const REDISPATCH: DescFlags = DescFlags(0x0000_0800);
    /// Falls into the entry PC: jump back to the head of the sequence.
    pub const RETURN_TO_START: DescFlags = DescFlags(0x0000_1000);
    /// Emit a guard re-checking the opcode and its page mapping.
    pub const VALIDATE_TLB: DescFlags = DescFlags(0x0000_2000);
    pub const INVALID_OPCODE: DescFlags = DescFlags(0x0000_4000);
    /// TLBWI/TLBWR: rewrites the translation table.
    pub const MODIFIES_TRANSLATION: DescFlags = DescFlags(0x0000_8000);
    /// MTC0 Cause: may raise a software interrupt.
    pub const CAN_TRIGGER_SW_INT: DescFlags = DescFlags(0x0001_0000);
    /// MTC0 Status: may unmask a pending external interrupt.
    pub const CAN_EXPOSE_EXTERNAL_INT: DescFlags = DescFlags(0x0002_0000);

    pub const IS_BRANCH: DescFlags =
        DescFlags(Self::IS_CONDITIONAL_BRANCH.0 | Self::IS_UNCONDITIONAL_BRANCH.0);

    const NAMES: [(DescFlags, &'static str); 18] = [
        (Self::IS_CONDITIONAL_BRANCH, "COND"),
        (Self::IS_UNCONDITIONAL_BRANCH, "UNCOND"),
        (Self::IS_LIKELY_BRANCH, "LIKELY"),
        (Self::INTRABLOCK_BRANCH, "INTRA"),
        (Self::READS_MEMORY, "READ"),
        (Self::WRITES_MEMORY, "WRITE"),
        (Self::CAN_CAUSE_EXCEPTION, "CANEXC"),
        (Self::WILL_CAUSE_EXCEPTION, "WILLEXC"),
        (Self::END_SEQUENCE, "END"),
        (Self::IS_BRANCH_TARGET, "TARGET"),
        (Self::IN_DELAY_SLOT, "DELAY"),
        (Self::REDISPATCH, "REDISPATCH"),
        (Self::RETURN_TO_START, "RETSTART"),
        (Self::VALIDATE_TLB, "VALIDATE"),
        (Self::INVALID_OPCODE, "INVALID"),
        (Self::MODIFIES_TRANSLATION, "TLBMOD"),
        (Self::CAN_TRIGGER_SW_INT, "SWINT"),
        (Self::CAN_EXPOSE_EXTERNAL_INT, "EXTINT"),
    ];

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// All bits of `other` are set.
    #[inline]
    pub const fn contains(self, other: DescFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set.
    #[inline]
    pub const fn intersects(self, other: DescFlags) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn union(self, other: DescFlags) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub fn insert(&mut self, other: DescFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DescFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for DescFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl BitAnd for DescFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for DescFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
