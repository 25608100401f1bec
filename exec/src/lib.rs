//! MIPS III/IV dynamic recompiler for x86-64 hosts.
//!
//! [`Drc`] owns the code cache and everything generated code points
//! into: the entry table, the fault-site map, the fast RAM windows
//! and the step hook. Guest state is borrowed per call, so one
//! recompiler can drive any [`mips3_core::MipsState`] built with a matching
//! configuration.
//!
//! The cache starts with shared stubs and memory trampolines; guest
//! code is compiled on demand when the dispatcher misses, and the
//! whole cache is flushed when it fills up.

mod compiler;
mod emit;
mod entry;
mod exec_loop;
mod faults;
mod fastram;
mod helpers;
mod oob;
mod stubs;
mod trampolines;

use std::collections::HashMap;
use std::ptr::NonNull;

use mips3_backend::{CodeBuffer, X86_64CodeGen};
use mips3_core::{DrcConfig, Error, Result};
use mips3_frontend::Sequencer;

pub use compiler::{CompilerState, SEQUENCE_RESERVE};
pub use entry::EntryTable;
pub use exec_loop::ExitReason;
pub use fastram::FastRam;
pub use helpers::StepHook;
pub use trampolines::Access;

use compiler::Tentative;
use faults::FaultSites;
use helpers::HookSlot;
use oob::OobQueue;
use stubs::Stubs;
use trampolines::Trampolines;

/// Maximum number of fast RAM windows.
pub const MAX_FASTRAM: usize = 16;

/// Upper bound on the deferred handler requests one descriptor makes.
const OOB_PER_INSN: usize = 4;

/// The recompiler.
pub struct Drc {
    config: DrcConfig,
    buf: CodeBuffer,
    codegen: X86_64CodeGen,
    seq: Sequencer,
    entries: EntryTable,
    oob: OobQueue,
    faults: Box<FaultSites>,
    fastram: Vec<FastRam>,
    stubs: Stubs,
    tramps: Trampolines,
    tentative: Vec<Tentative>,
    step_hook: Box<HookSlot>,
    /// Translation table values the current sequence was compiled
    /// against, by virtual page.
    tlb_pages: HashMap<u32, u32>,
}

impl Drc {
    /// Map the code cache and emit the shared stubs.
    pub fn new(config: DrcConfig) -> Result<Self> {
        let buf = CodeBuffer::new(config.cache_size)?;
        let window = config.window_before.saturating_add(config.window_after);
        let seq = Sequencer::new(config.flavor, window);
        // every descriptor the pool can hold may defer its handlers
        let oob_limit = seq.pool().limit() * OOB_PER_INSN;
        let mut drc = Self {
            seq,
            config,
            buf,
            codegen: X86_64CodeGen::new(),
            entries: EntryTable::new(),
            oob: OobQueue::new(oob_limit),
            faults: Box::default(),
            fastram: Vec::new(),
            stubs: Stubs::default(),
            tramps: Trampolines::default(),
            tentative: Vec::new(),
            step_hook: Box::default(),
            tlb_pages: HashMap::new(),
        };
        drc.flush();
        let remaining = drc.buf.remaining();
        if remaining < SEQUENCE_RESERVE {
            return Err(Error::CodeBufferExhausted { remaining });
        }
        log::info!(
            "recompiler ready: {:?}, {} endian, {} KiB cache, {} bytes of stubs",
            drc.config.flavor,
            if drc.config.big_endian { "big" } else { "little" },
            drc.buf.capacity() / 1024,
            drc.buf.offset()
        );
        Ok(drc)
    }

    #[inline]
    pub fn config(&self) -> &DrcConfig {
        &self.config
    }

    /// Register physical `[start, end]` as directly addressable at
    /// `base`, laid out as host-native 32-bit words. Flushes the
    /// cache so the trampolines pick the window up.
    ///
    /// # Safety
    /// `base` must stay valid for reads (and writes unless
    /// `readonly`) of `end - start + 1` bytes for as long as this
    /// recompiler executes code.
    pub unsafe fn add_fastram(
        &mut self,
        start: u32,
        end: u32,
        readonly: bool,
        base: NonNull<u8>,
    ) -> Result<()> {
        if self.fastram.len() >= MAX_FASTRAM {
            return Err(Error::TooManyFastRam { limit: MAX_FASTRAM });
        }
        if start & 3 != 0 || end & 3 != 3 || end < start || base.as_ptr() as usize & 3 != 0 {
            return Err(Error::MisalignedFastRam { start, end });
        }
        log::debug!("fast RAM {start:#010x}..={end:#010x}{}", if readonly { " (ro)" } else { "" });
        self.fastram.push(FastRam {
            start,
            end,
            readonly,
            base,
        });
        self.flush();
        Ok(())
    }

    /// Install (or clear) the callback run before every instruction
    /// when single-stepping.
    pub fn set_step_hook(&mut self, hook: Option<StepHook>) {
        self.step_hook.hook = hook;
    }

    /// Drop all compiled code and re-emit the stubs.
    pub fn flush(&mut self) {
        self.buf.reset();
        self.oob.clear();
        self.tentative.clear();
        self.emit_stubs();
        let miss = self.buf.addr_at(self.stubs.miss);
        let lost = self.buf.addr_at(self.stubs.lost_fault);
        self.entries.reset(miss);
        self.faults.reset(lost);
        self.emit_trampolines();
        log::debug!("code cache flushed");
    }

    /// Host address of the code for `pc`, if compiled.
    pub fn lookup(&self, pc: u32) -> Option<u64> {
        self.entries.lookup(pc)
    }

    /// Bytes of the cache in use.
    pub fn code_size(&self) -> usize {
        self.buf.offset()
    }

    /// Generated code so far, for disassembly.
    pub fn code(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Guest call sites with a registered fault finisher.
    pub fn fault_sites(&self) -> usize {
        self.faults.len()
    }
}
