//! Guest-side definitions shared by the MIPS III/IV recompiler,
//! the reference interpreter and the tools.
//!
//! Everything generated code touches by address lives here:
//! the `#[repr(C)]` CPU state with its field offsets, the
//! page-indexed translation table, and the COP0 constants the
//! exception stubs are built from.

pub mod config;
pub mod cop0;
pub mod error;
pub mod fpu;
pub mod label;
pub mod memory;
pub mod state;
pub mod tlb;

pub use config::{DrcConfig, Hotspot, MipsFlavor};
pub use cop0::Exception;
pub use error::{Error, Result};
pub use label::{Label, LabelUse, RelocKind};
pub use memory::{MemoryBus, SimpleRam};
pub use state::MipsState;
pub use tlb::{Tlb, TlbEntry};
