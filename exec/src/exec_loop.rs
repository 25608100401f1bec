//! Host side of execution: enter generated code, service its exits.

use mips3_core::{Error, MipsState, Result};

use crate::stubs::{EXIT_CYCLES, EXIT_LOST_FAULT, EXIT_RECOMPILE};
use crate::Drc;

/// Why generated code returned to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The cycle slice ran out; `state.pc` is where to resume.
    CyclesExhausted,
    /// No code for `state.pc`, or its code went stale.
    Recompile,
    /// A trampoline faulted at a call site with no finisher.
    LostFault,
}

impl ExitReason {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            EXIT_CYCLES => Some(Self::CyclesExhausted),
            EXIT_RECOMPILE => Some(Self::Recompile),
            EXIT_LOST_FAULT => Some(Self::LostFault),
            _ => None,
        }
    }
}

type EntryFn = unsafe extern "C" fn(*mut MipsState) -> u32;

impl Drc {
    /// Run `state` for about `cycles` cycles and return how many
    /// were actually executed.
    ///
    /// Execution stops at the first sub-sequence end or memory
    /// access after the budget is spent, so the count may overshoot.
    /// Pending interrupts are taken on entry and whenever the
    /// Count/Compare timer splits the slice.
    pub fn execute(&mut self, state: &mut MipsState, cycles: i32) -> Result<u64> {
        let budget = cycles.max(0) as u64;
        let mut executed = 0u64;

        while executed < budget {
            let left = (budget - executed).min(i32::MAX as u64) as i32;
            state.grant(left);
            let code = self.enter(state);
            executed += state.retire();
            state.check_timer();

            match ExitReason::from_code(code) {
                Some(ExitReason::CyclesExhausted) => {}
                Some(ExitReason::Recompile) => self.recompile_or_flush(state)?,
                Some(ExitReason::LostFault) => {
                    let site = self.faults.take_lost().unwrap_or_default();
                    log::error!("fault at call site {site:#x} has no handler");
                    return Err(Error::LostFaultSite(site));
                }
                None => {
                    log::error!("generated code returned unknown exit {code}");
                    return Err(Error::LostFaultSite(0));
                }
            }
        }
        log::trace!("slice done: {executed} cycles, pc {:#010x}", state.pc);
        Ok(executed)
    }

    fn enter(&mut self, state: &mut MipsState) -> u32 {
        let addr = self.buf.addr_at(self.stubs.entry);
        // SAFETY: the entry stub follows the C calling convention and
        // the cache is executable; `state` outlives the call.
        unsafe {
            let entry: EntryFn = std::mem::transmute(addr as usize as *const u8);
            entry(state as *mut MipsState)
        }
    }

    /// Compile at `state.pc`, flushing once if the cache is full.
    fn recompile_or_flush(&mut self, state: &mut MipsState) -> Result<()> {
        match self.recompile(state) {
            Err(Error::CodeBufferExhausted { remaining }) => {
                log::info!("code cache full ({remaining} bytes left), flushing");
                self.flush();
                self.recompile(state)
            }
            other => other,
        }
    }
}
