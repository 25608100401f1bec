//! Integration and differential tests for the MIPS III/IV recompiler.
//!
//! Programs are assembled with the helpers in `asm`, loaded into a
//! small RAM behind kseg0 and run through both the recompiler and
//! the reference interpreter.

#[cfg(test)]
mod asm;
#[cfg(test)]
mod backend;
#[cfg(test)]
mod exec;
#[cfg(test)]
mod frontend;
#[cfg(test)]
mod harness;
