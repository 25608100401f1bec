//! x86-64 host code emission for the MIPS recompiler.
//!
//! The recompiler treats this crate as a write-only instruction
//! stream: a mapped [`CodeBuffer`], free `emit_*` encoders, and the
//! frame that every entry into generated code sets up.

pub mod code_buffer;
pub mod x86_64;

pub use code_buffer::CodeBuffer;
pub use x86_64::X86_64CodeGen;

/// Host frame management for generated code.
///
/// Generated code is entered once through a prologue and leaves
/// through a shared epilogue; everything in between (stubs,
/// trampolines, compiled sequences) jumps between blocks without
/// touching the frame.
pub trait HostCodeGen {
    /// Emit the prologue: save callee-saved registers, load the
    /// state pointer from the first argument, allocate the frame.
    fn emit_prologue(&mut self, buf: &mut CodeBuffer);

    /// Emit the epilogue: release the frame, restore callee-saved
    /// registers, return with the exit code in `eax`.
    fn emit_epilogue(&mut self, buf: &mut CodeBuffer);

    /// Offset of the epilogue entry.
    fn epilogue_offset(&self) -> usize;
}
