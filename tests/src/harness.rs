//! A tiny machine: RAM at physical 0 reached through kseg0, halt
//! loops on both exception vectors, and a program at [`CODE`].

use std::ptr::NonNull;

use mips3_core::cop0::*;
use mips3_core::state::sext32;
use mips3_core::{DrcConfig, MipsState, SimpleRam};
use mips3_drc::Drc;
use mips3_interp::Interpreter;

use crate::asm::HALT;

pub const CODE: u32 = 0x8000_0200;
pub const DATA: u32 = 0x8000_1000;
pub const RAM_SIZE: usize = 0x4000;
/// General exception vector with SR.BEV clear.
pub const GENERAL_VECTOR: u32 = VECTOR_BASE_RAM + 0x180;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config() -> DrcConfig {
    DrcConfig::default().with_cache_size(1 << 20)
}

pub struct Machine {
    pub state: MipsState,
    host: NonNull<u8>,
    config: DrcConfig,
}

impl Machine {
    pub fn new(program: &[u32]) -> Self {
        Self::with_config(program, config())
    }

    pub fn with_config(program: &[u32], config: DrcConfig) -> Self {
        let mut ram = SimpleRam::new(0, RAM_SIZE, config.big_endian);
        ram.load_words(0x000, &HALT);
        ram.load_words(0x180, &HALT);
        let code = CODE & 0x1fff_ffff;
        ram.load_words(code, program);
        ram.load_words(code + program.len() as u32 * 4, &HALT);
        let host = NonNull::new(ram.host_ptr()).expect("RAM storage");

        let mut state = MipsState::new(Box::new(ram));
        // kernel mode, RAM vectors, interrupts off
        state.cpr[0][COP0_STATUS] = 0;
        state.pc = CODE;
        Self {
            state,
            host,
            config,
        }
    }

    /// Preload GPRs with 32-bit values, sign-extended.
    pub fn regs(mut self, regs: &[(usize, u32)]) -> Self {
        for &(r, v) in regs {
            self.state.set_gpr(r, sext32(v));
        }
        self
    }

    /// A recompiler with this machine's RAM registered as fast RAM.
    pub fn drc(&self) -> Drc {
        init_logging();
        let mut drc = Drc::new(self.config.clone()).expect("recompiler");
        // SAFETY: the storage belongs to the state's bus, which
        // outlives `drc` in every test.
        unsafe { drc.add_fastram(0, RAM_SIZE as u32 - 1, false, self.host) }.expect("fast RAM");
        drc
    }

    pub fn run_drc(mut self, cycles: i32) -> (MipsState, u64) {
        let mut drc = self.drc();
        let executed = drc.execute(&mut self.state, cycles).expect("execute");
        (self.state, executed)
    }

    pub fn run_interp(mut self, cycles: i32) -> (MipsState, u64) {
        let mut cpu = Interpreter::new(self.config.clone());
        let executed = cpu.run(&mut self.state, cycles);
        (self.state, executed)
    }
}

/// Run `program` through both engines and check they agree.
pub fn run_both(program: &[u32], regs: &[(usize, u32)], cycles: i32) -> MipsState {
    let (mut drc, _) = Machine::new(program).regs(regs).run_drc(cycles);
    let (mut interp, _) = Machine::new(program).regs(regs).run_interp(cycles);
    assert_same(&mut drc, &mut interp);
    drc
}

pub fn assert_same(drc: &mut MipsState, interp: &mut MipsState) {
    for r in 0..32 {
        assert_eq!(drc.r[r], interp.r[r], "r{r}: recompiler vs interpreter");
    }
    assert_eq!(drc.hi, interp.hi, "hi");
    assert_eq!(drc.lo, interp.lo, "lo");
    assert_eq!(drc.pc, interp.pc, "pc");
    for (reg, name) in [
        (COP0_STATUS, "status"),
        (COP0_CAUSE, "cause"),
        (COP0_EPC, "epc"),
        (COP0_BADVADDR, "badvaddr"),
    ] {
        assert_eq!(drc.cpr[0][reg], interp.cpr[0][reg], "{name}");
    }
    assert_eq!(drc.cpr[1], interp.cpr[1], "FPRs");
    assert_eq!(drc.fcc, interp.fcc, "FCC");
    let data = DATA & 0x1fff_ffff;
    for addr in (data..data + 0x100).step_by(4) {
        assert_eq!(
            drc.bus.read_word(addr),
            interp.bus.read_word(addr),
            "memory at {addr:#x}"
        );
    }
}

pub fn exc_code(s: &MipsState) -> u32 {
    (s.cause() >> 2) & 0x1f
}
