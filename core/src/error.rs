use std::io;

/// Errors surfaced by the recompiler and its collaborators.
///
/// Guest-visible conditions (overflow, TLB misses, traps) never
/// appear here: they are delivered through the guest's own
/// exception vectors by generated code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not enough room left in the code cache for another sequence.
    #[error("code cache exhausted ({remaining} bytes left)")]
    CodeBufferExhausted { remaining: usize },

    /// The executable mapping for the code cache could not be created.
    #[error("code cache allocation failed: {0}")]
    Mmap(#[from] io::Error),

    /// More deferred handlers were requested than a sequence can hold.
    #[error("deferred handler queue overflow (limit {limit})")]
    OobOverflow { limit: usize },

    /// The descriptor arena ran out of slots.
    #[error("descriptor arena exhausted (limit {limit})")]
    ArenaExhausted { limit: usize },

    /// Fast RAM registration beyond the fixed window count.
    #[error("too many fast RAM windows (limit {limit})")]
    TooManyFastRam { limit: usize },

    /// Fast RAM window bounds or host base not word aligned.
    #[error("fast RAM window {start:#010x}..={end:#010x} is not word aligned")]
    MisalignedFastRam { start: u32, end: u32 },

    /// The code generator met an opcode family it has no emitter for.
    /// This is a recompiler defect, never a guest condition.
    #[error("unimplemented op {op:08X} ({primary:02X},{function:02X}) at {pc:#010x}")]
    UnimplementedOp {
        op: u32,
        primary: u8,
        function: u8,
        pc: u32,
    },

    /// A faulting call site had no registered finisher.
    #[error("no fault handler registered for call site {0:#x}")]
    LostFaultSite(u64),
}

impl Error {
    /// Build an [`Error::UnimplementedOp`] from a raw opcode word.
    pub fn unimplemented(op: u32, pc: u32) -> Self {
        Error::UnimplementedOp {
            op,
            primary: (op >> 26) as u8,
            function: (op & 0x3f) as u8,
            pc,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
