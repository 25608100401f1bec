//! COP0 register numbers, status/cause bits and exception codes.

pub const COP0_INDEX: usize = 0;
pub const COP0_RANDOM: usize = 1;
pub const COP0_ENTRYLO0: usize = 2;
pub const COP0_ENTRYLO1: usize = 3;
pub const COP0_CONTEXT: usize = 4;
pub const COP0_PAGEMASK: usize = 5;
pub const COP0_WIRED: usize = 6;
pub const COP0_BADVADDR: usize = 8;
pub const COP0_COUNT: usize = 9;
pub const COP0_ENTRYHI: usize = 10;
pub const COP0_COMPARE: usize = 11;
pub const COP0_STATUS: usize = 12;
pub const COP0_CAUSE: usize = 13;
pub const COP0_EPC: usize = 14;
pub const COP0_PRID: usize = 15;
pub const COP0_CONFIG: usize = 16;
pub const COP0_LLADDR: usize = 17;
pub const COP0_XCONTEXT: usize = 20;
pub const COP0_ERROREPC: usize = 30;

// -- Status register --

pub const SR_IE: u32 = 0x0000_0001;
pub const SR_EXL: u32 = 0x0000_0002;
pub const SR_ERL: u32 = 0x0000_0004;
pub const SR_KSU_MASK: u32 = 0x0000_0018;
/// Interrupt mask bit for the Count/Compare timer (IM7).
pub const SR_IMEX5: u32 = 0x0000_8000;
pub const SR_INT_MASK: u32 = 0x0000_ff00;
pub const SR_BEV: u32 = 0x0040_0000;
pub const SR_FR: u32 = 0x0400_0000;
pub const SR_COP0: u32 = 0x1000_0000;
pub const SR_COP1: u32 = 0x2000_0000;

// -- Cause register --

/// Hardware interrupt pending bits IP2..IP7.
pub const CAUSE_HW_INT_MASK: u32 = 0x0000_fc00;
/// Software interrupt bits IP0..IP1.
pub const CAUSE_SW_INT_MASK: u32 = 0x0000_0300;
/// Timer interrupt (IP7).
pub const CAUSE_TIMER: u32 = 0x0000_8000;
pub const CAUSE_BD: u32 = 0x8000_0000;
/// Bits cleared when a new exception is recorded.
pub const CAUSE_CLEAR_ON_EXCEPTION: u32 = 0x8000_00ff;

/// Exception vectors.
pub const VECTOR_BASE_RAM: u32 = 0x8000_0000;
pub const VECTOR_BASE_BEV: u32 = 0xbfc0_0200;

/// Exceptions the recompiler can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Exception {
    Interrupt = 0,
    TlbMod = 1,
    TlbLoad = 2,
    TlbStore = 3,
    Syscall = 8,
    Break = 9,
    InvalidOp = 10,
    BadCop = 11,
    Overflow = 12,
    Trap = 13,
}

impl Exception {
    /// The kinds for which shared stubs are generated, in stub order.
    pub const STUBS: [Exception; 9] = [
        Exception::Interrupt,
        Exception::BadCop,
        Exception::Overflow,
        Exception::InvalidOp,
        Exception::Syscall,
        Exception::Break,
        Exception::Trap,
        Exception::TlbLoad,
        Exception::TlbStore,
    ];

    /// ExcCode field value.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// TLB exceptions take the refill vector; everything else the
    /// general one at +0x180.
    #[inline]
    pub const fn vector_offset(self) -> u32 {
        match self {
            Exception::TlbMod | Exception::TlbLoad | Exception::TlbStore => 0x000,
            _ => 0x180,
        }
    }

    /// Whether the exception records a faulting virtual address.
    #[inline]
    pub const fn is_tlb(self) -> bool {
        matches!(self, Exception::TlbLoad | Exception::TlbStore)
    }

    /// Index into [`Exception::STUBS`]. Write-protect faults share the
    /// TLB store stub.
    pub const fn stub_index(self) -> usize {
        match self {
            Exception::Interrupt => 0,
            Exception::BadCop => 1,
            Exception::Overflow => 2,
            Exception::InvalidOp => 3,
            Exception::Syscall => 4,
            Exception::Break => 5,
            Exception::Trap => 6,
            Exception::TlbLoad => 7,
            Exception::TlbMod | Exception::TlbStore => 8,
        }
    }
}
