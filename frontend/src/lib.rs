//! Front end of the MIPS III/IV recompiler.
//!
//! Turns guest memory around an entry PC into an ordered chain of
//! instruction descriptors: decoded operands, side-effect flags,
//! delay-slot linkage, cycle costs and per-sub-sequence register
//! liveness. The chain is consumed by the code generator and by the
//! `seqdump` tool, then handed back to the arena.

pub mod desc;
pub mod describe;
pub mod flags;
pub mod insn;
pub mod pool;
pub mod sequence;

pub use desc::{InsnDesc, RegUsage, REGFLAG_FCC, REGFLAG_HI, REGFLAG_LO, TARGET_DYNAMIC};
pub use describe::describe_insn;
pub use flags::DescFlags;
pub use insn::{decode, Family, Insn, InsnKind, Operands};
pub use pool::{DescId, DescPool};
pub use sequence::{ChainIter, FetchedOp, InsnSource, Sequencer, MAX_STACK_DEPTH};
