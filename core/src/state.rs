//! MIPS III/IV architectural state.

use std::mem::offset_of;

use crate::cop0::*;
use crate::fpu::{FCR31_FCC0_SHIFT, FCR31_FCC1_SHIFT};
use crate::memory::MemoryBus;
use crate::tlb::{Tlb, TlbEntry, TLB_ENTRIES};
use crate::Exception;

/// Number of general-purpose registers.
pub const NUM_GPRS: usize = 32;
/// Coprocessors with a register file in the state (COP0..COP2).
pub const NUM_COPS: usize = 3;

/// PC the CPU starts fetching from after reset.
pub const RESET_PC: u32 = 0xbfc0_0000;
/// R4600 processor id.
pub const DEFAULT_PRID: u64 = 0x2000;
/// Cache line and size bits reported through Config.
pub const DEFAULT_CONFIG: u64 = 0x0002_6030 | (3 << 6) | (3 << 9);

/// Sign-extend the low 32 bits.
#[inline]
pub const fn sext32(v: u32) -> u64 {
    v as i32 as i64 as u64
}

/// Guest CPU state.
///
/// `#[repr(C)]` with the fields generated code touches first; the
/// recompiler keeps a pointer to this struct in `rbp` and addresses
/// every field by its byte offset (see the `*_OFFSET` constants).
/// Everything after `tlb_table` is host-only.
#[repr(C)]
pub struct MipsState {
    /// r0..r31; r0 is kept at zero by never writing it.
    pub r: [u64; NUM_GPRS],
    pub hi: u64,
    pub lo: u64,
    /// Coprocessor data registers. COP1 uses the FR=1 layout: one
    /// 64-bit register per index, singles in the low word.
    pub cpr: [[u64; 32]; NUM_COPS],
    /// Coprocessor control registers.
    pub ccr: [[u64; 32]; NUM_COPS],
    /// FPU condition codes, one byte each.
    pub fcc: [u8; 8],
    /// BCzF/BCzT condition lines for COP0 and COP2.
    pub cpcond: [u8; 4],
    pub pc: u32,
    /// Remaining cycles in the current slice; generated code
    /// subtracts from it and exits when it goes negative.
    pub icount: i32,
    /// Value `icount` had when the slice was granted.
    pub icount_granted: i32,
    /// Cycles retired before the current slice.
    pub cycles_retired: u64,
    /// Cycle count at which COP0 Count was zero.
    pub count_zero_time: u64,
    /// Cycle count at which Count reaches Compare, or `u64::MAX`.
    pub compare_deadline: u64,
    /// Mirror of `tlb.table_ptr()` for generated code.
    pub tlb_table: *const u32,

    pub tlb: Tlb,
    pub bus: Box<dyn MemoryBus>,
}

/// Byte offset of `r[i]`.
pub const fn gpr_offset(i: usize) -> i32 {
    (offset_of!(MipsState, r) + i * 8) as i32
}

/// Byte offset of `cpr[cop][i]`.
pub const fn cpr_offset(cop: usize, i: usize) -> i32 {
    (offset_of!(MipsState, cpr) + (cop * 32 + i) * 8) as i32
}

/// Byte offset of `ccr[cop][i]`.
pub const fn ccr_offset(cop: usize, i: usize) -> i32 {
    (offset_of!(MipsState, ccr) + (cop * 32 + i) * 8) as i32
}

/// Byte offset of `fcc[i]`.
pub const fn fcc_offset(i: usize) -> i32 {
    (offset_of!(MipsState, fcc) + i) as i32
}

/// Byte offset of `cpcond[i]`.
pub const fn cpcond_offset(i: usize) -> i32 {
    (offset_of!(MipsState, cpcond) + i) as i32
}

pub const HI_OFFSET: i32 = offset_of!(MipsState, hi) as i32;
pub const LO_OFFSET: i32 = offset_of!(MipsState, lo) as i32;
pub const PC_OFFSET: i32 = offset_of!(MipsState, pc) as i32;
pub const ICOUNT_OFFSET: i32 = offset_of!(MipsState, icount) as i32;
pub const TLB_TABLE_OFFSET: i32 = offset_of!(MipsState, tlb_table) as i32;

pub const STATUS_OFFSET: i32 = cpr_offset(0, COP0_STATUS);
pub const CAUSE_OFFSET: i32 = cpr_offset(0, COP0_CAUSE);
pub const EPC_OFFSET: i32 = cpr_offset(0, COP0_EPC);
pub const BADVADDR_OFFSET: i32 = cpr_offset(0, COP0_BADVADDR);
pub const ENTRYHI_OFFSET: i32 = cpr_offset(0, COP0_ENTRYHI);
pub const CONTEXT_OFFSET: i32 = cpr_offset(0, COP0_CONTEXT);
pub const FCR31_OFFSET: i32 = ccr_offset(1, 31);

impl MipsState {
    pub fn new(bus: Box<dyn MemoryBus>) -> Self {
        let tlb = Tlb::new();
        let mut s = Self {
            r: [0; NUM_GPRS],
            hi: 0,
            lo: 0,
            cpr: [[0; 32]; NUM_COPS],
            ccr: [[0; 32]; NUM_COPS],
            fcc: [0; 8],
            cpcond: [0; 4],
            pc: 0,
            icount: 0,
            icount_granted: 0,
            cycles_retired: 0,
            count_zero_time: 0,
            compare_deadline: u64::MAX,
            tlb_table: tlb.table_ptr(),
            tlb,
            bus,
        };
        s.reset();
        s
    }

    /// Cold reset: registers cleared, boot vector, kernel mode with
    /// ERL and BEV set, TLB empty.
    pub fn reset(&mut self) {
        self.r = [0; NUM_GPRS];
        self.hi = 0;
        self.lo = 0;
        self.cpr = [[0; 32]; NUM_COPS];
        self.ccr = [[0; 32]; NUM_COPS];
        self.fcc = [0; 8];
        self.cpcond = [0; 4];
        self.pc = RESET_PC;
        self.icount = 0;
        self.icount_granted = 0;

        self.cpr[0][COP0_STATUS] = (SR_BEV | SR_ERL) as u64;
        self.cpr[0][COP0_COMPARE] = 0xffff_ffff;
        self.cpr[0][COP0_PRID] = DEFAULT_PRID;
        self.cpr[0][COP0_CONFIG] = DEFAULT_CONFIG;
        self.cpr[0][COP0_WIRED] = 0;
        self.count_zero_time = self.total_cycles();
        self.compare_deadline = u64::MAX;

        self.tlb = Tlb::new();
        self.tlb_table = self.tlb.table_ptr();
    }

    #[inline]
    pub fn status(&self) -> u32 {
        self.cpr[0][COP0_STATUS] as u32
    }

    #[inline]
    pub fn cause(&self) -> u32 {
        self.cpr[0][COP0_CAUSE] as u32
    }

    /// Write a GPR, ignoring r0.
    #[inline]
    pub fn set_gpr(&mut self, idx: usize, value: u64) {
        if idx != 0 {
            self.r[idx] = value;
        }
    }

    // ── cycle accounting ──────────────────────────────────────

    /// Cycles executed since the state was created.
    pub fn total_cycles(&self) -> u64 {
        let used = self.icount_granted as i64 - self.icount as i64;
        (self.cycles_retired as i64 + used) as u64
    }

    /// Start a slice of at most `cycles`, shortened so that the
    /// slice ends when the Count/Compare timer is due.
    pub fn grant(&mut self, cycles: i32) {
        let now = self.total_cycles();
        let mut slice = cycles.max(0) as u64;
        if self.compare_deadline != u64::MAX {
            slice = slice.min(self.compare_deadline.saturating_sub(now));
        }
        self.cycles_retired = now;
        self.icount = slice as i32;
        self.icount_granted = self.icount;
    }

    /// Fold the slice's consumed cycles into `cycles_retired` and
    /// return how many were used.
    pub fn retire(&mut self) -> u64 {
        let before = self.cycles_retired;
        let now = self.total_cycles();
        self.cycles_retired = now;
        self.icount_granted = self.icount;
        now - before
    }

    /// Current value of COP0 Count.
    pub fn count(&self) -> u32 {
        (self.total_cycles().wrapping_sub(self.count_zero_time) / 2) as u32
    }

    /// Current value of COP0 Random.
    pub fn random(&self) -> u32 {
        let wired = (self.cpr[0][COP0_WIRED] & 0x3f) as u64;
        let range = 48 - wired.min(48);
        if range == 0 {
            return 47;
        }
        let elapsed = self.total_cycles().wrapping_sub(self.count_zero_time);
        ((elapsed % range + wired) & 0x3f) as u32
    }

    /// Recompute when Count will match Compare, and shorten the
    /// running slice if that happens before it ends.
    pub fn update_cycle_counting(&mut self) {
        let compare = self.cpr[0][COP0_COMPARE] as u32;
        if self.status() & SR_IMEX5 == 0 || compare == 0xffff_ffff {
            self.compare_deadline = u64::MAX;
            return;
        }
        let now = self.total_cycles();
        let delta = match compare.wrapping_sub(self.count()) {
            0 => 1u64 << 32,
            d => d as u64,
        };
        self.compare_deadline = now + delta * 2;

        let left = self.compare_deadline - now;
        if left < self.icount.max(0) as u64 {
            let cut = self.icount - left as i32;
            self.icount -= cut;
            self.icount_granted -= cut;
        }
    }

    /// Raise the timer interrupt if its deadline has passed.
    pub fn check_timer(&mut self) -> bool {
        if self.total_cycles() < self.compare_deadline {
            return false;
        }
        log::trace!("compare timer fired at count {:#x}", self.count());
        self.cpr[0][COP0_CAUSE] |= CAUSE_TIMER as u64;
        self.compare_deadline = u64::MAX;
        true
    }

    // ── interrupts and exceptions ─────────────────────────────

    /// Whether an enabled interrupt is pending.
    pub fn interrupt_pending(&self) -> bool {
        let sr = self.status();
        (self.cause() & sr & SR_INT_MASK) != 0
            && sr & SR_IE != 0
            && sr & (SR_EXL | SR_ERL) == 0
    }

    /// Drive hardware interrupt line `line` (0..=5, IP2..IP7).
    pub fn set_irq_line(&mut self, line: u32, asserted: bool) {
        if line > 5 {
            return;
        }
        let bit = (0x400u64) << line;
        if asserted {
            self.cpr[0][COP0_CAUSE] |= bit;
        } else {
            self.cpr[0][COP0_CAUSE] &= !bit;
        }
    }

    /// Enter exception `exc` for the instruction at `pc`.
    ///
    /// `in_delay` marks a fault in a branch delay slot; EPC then
    /// points at the branch. `bad_vaddr` is the faulting address of
    /// TLB exceptions. Mirrors the recompiler's exception stubs.
    pub fn take_exception(&mut self, exc: Exception, pc: u32, in_delay: bool, bad_vaddr: u32) {
        if exc.is_tlb() || exc == Exception::TlbMod {
            let entry_hi = (self.cpr[0][COP0_ENTRYHI] as u32 & 0xff) | (bad_vaddr & 0xffff_e000);
            let context =
                (self.cpr[0][COP0_CONTEXT] as u32 & 0xff80_0000) | ((bad_vaddr >> 9) & 0x007f_fff0);
            self.cpr[0][COP0_BADVADDR] = sext32(bad_vaddr);
            self.cpr[0][COP0_ENTRYHI] = sext32(entry_hi);
            self.cpr[0][COP0_CONTEXT] = sext32(context);
        }

        let mut cause = self.cause() & !CAUSE_CLEAR_ON_EXCEPTION;
        let mut epc = pc;
        if in_delay {
            cause |= CAUSE_BD;
            epc = pc.wrapping_sub(4);
        }
        self.cpr[0][COP0_EPC] = sext32(epc);
        self.cpr[0][COP0_CAUSE] = sext32(cause | (exc.code() << 2));
        self.cpr[0][COP0_STATUS] = sext32(self.status() | SR_EXL);

        let base = if self.status() & SR_BEV != 0 {
            VECTOR_BASE_BEV
        } else {
            VECTOR_BASE_RAM
        };
        self.pc = base + exc.vector_offset();
    }

    // ── COP0 registers ────────────────────────────────────────

    /// Read COP0 register `reg`; Count and Random are derived from
    /// the cycle counter.
    pub fn read_cop0(&self, reg: usize) -> u64 {
        match reg {
            COP0_COUNT => self.count() as u64,
            COP0_RANDOM => self.random() as u64,
            _ => self.cpr[0][reg & 31],
        }
    }

    /// Write COP0 register `reg` with its side effects. Returns true
    /// when the write leaves an interrupt pending.
    pub fn write_cop0(&mut self, reg: usize, value: u64) -> bool {
        let reg = reg & 31;
        let old = self.cpr[0][reg];
        match reg {
            COP0_STATUS => {
                self.cpr[0][reg] = value;
                if (old ^ value) & SR_IMEX5 as u64 != 0 {
                    self.update_cycle_counting();
                }
                self.interrupt_pending()
            }
            COP0_CAUSE => {
                let hw = CAUSE_HW_INT_MASK as u64;
                self.cpr[0][reg] = (old & hw) | (value & !hw);
                self.interrupt_pending()
            }
            COP0_COUNT => {
                self.cpr[0][reg] = value;
                self.count_zero_time = self
                    .total_cycles()
                    .wrapping_sub((value as u32 as u64) * 2);
                self.update_cycle_counting();
                false
            }
            COP0_COMPARE => {
                self.cpr[0][reg] = value & 0xffff_ffff;
                self.cpr[0][COP0_CAUSE] &= !(CAUSE_TIMER as u64);
                self.update_cycle_counting();
                false
            }
            COP0_PRID | COP0_RANDOM => false,
            COP0_CONFIG => {
                self.cpr[0][reg] = (old & !7) | (value & 7);
                false
            }
            COP0_ENTRYHI => {
                self.cpr[0][reg] = value;
                if (old ^ value) & 0xff != 0 {
                    self.tlb.recompute(value as u8);
                }
                false
            }
            _ => {
                self.cpr[0][reg] = value;
                false
            }
        }
    }

    // ── TLB instructions ──────────────────────────────────────

    fn asid(&self) -> u8 {
        self.cpr[0][COP0_ENTRYHI] as u8
    }

    fn staged_entry(&self) -> TlbEntry {
        let page_mask = self.cpr[0][COP0_PAGEMASK];
        TlbEntry {
            page_mask,
            entry_hi: self.cpr[0][COP0_ENTRYHI] & !(page_mask & 0x01ff_e000),
            entry_lo: [self.cpr[0][COP0_ENTRYLO0], self.cpr[0][COP0_ENTRYLO1]],
        }
    }

    pub fn tlbr(&mut self) {
        let idx = (self.cpr[0][COP0_INDEX] & 0x3f) as usize;
        if idx < TLB_ENTRIES {
            let e = self.tlb.entries[idx];
            self.cpr[0][COP0_PAGEMASK] = e.page_mask;
            self.cpr[0][COP0_ENTRYHI] = e.entry_hi;
            self.cpr[0][COP0_ENTRYLO0] = e.entry_lo[0];
            self.cpr[0][COP0_ENTRYLO1] = e.entry_lo[1];
        }
    }

    pub fn tlbwi(&mut self) {
        let idx = (self.cpr[0][COP0_INDEX] & 0x3f) as usize;
        let entry = self.staged_entry();
        let asid = self.asid();
        log::trace!("tlbwi {idx}: {entry:x?}");
        self.tlb.write_entry(idx, entry, asid);
    }

    pub fn tlbwr(&mut self) {
        let idx = self.random() as usize;
        let entry = self.staged_entry();
        let asid = self.asid();
        log::trace!("tlbwr {idx}: {entry:x?}");
        self.tlb.write_entry(idx, entry, asid);
    }

    pub fn tlbp(&mut self) {
        self.cpr[0][COP0_INDEX] = match self.tlb.probe(self.cpr[0][COP0_ENTRYHI]) {
            Some(idx) => idx as u64,
            None => 0x8000_0000,
        };
    }

    // ── FPRs ──────────────────────────────────────────────────

    /// Single-width view of FPR `idx`: the low word.
    #[inline]
    pub fn fpr_single(&self, idx: usize) -> u64 {
        self.cpr[1][idx & 31] & 0xffff_ffff
    }

    /// Replace the low word of FPR `idx`, keeping the high word.
    #[inline]
    pub fn set_fpr_single(&mut self, idx: usize, bits: u64) {
        let r = &mut self.cpr[1][idx & 31];
        *r = (*r & !0xffff_ffff) | (bits & 0xffff_ffff);
    }

    // ── FCR31 ─────────────────────────────────────────────────

    /// FCR31 with the condition codes folded back in.
    pub fn fcr31(&self, mips4: bool) -> u64 {
        let mut v = sext32(self.ccr[1][31] as u32) & !0xfe80_0000;
        if self.fcc[0] != 0 {
            v |= 1 << FCR31_FCC0_SHIFT;
        }
        if mips4 {
            for i in 1..8 {
                if self.fcc[i] != 0 {
                    v |= 1 << (FCR31_FCC1_SHIFT + i as u32 - 1);
                }
            }
        }
        v
    }

    /// Store FCR31 and split out its condition codes.
    pub fn set_fcr31(&mut self, value: u32, mips4: bool) {
        self.ccr[1][31] = value as u64;
        self.fcc[0] = (value >> FCR31_FCC0_SHIFT & 1) as u8;
        if mips4 {
            for i in 1..8 {
                self.fcc[i] = (value >> (FCR31_FCC1_SHIFT + i as u32 - 1) & 1) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SimpleRam;

    fn state() -> MipsState {
        MipsState::new(Box::new(SimpleRam::new(0, 0x1000, true)))
    }

    #[test]
    fn reset_values() {
        let s = state();
        assert_eq!(s.pc, RESET_PC);
        assert_eq!(s.status(), SR_BEV | SR_ERL);
        assert_eq!(s.random(), 0);
        assert_eq!(s.read_cop0(COP0_COMPARE), 0xffff_ffff);
        assert_eq!(s.tlb_table, s.tlb.table_ptr());
    }

    #[test]
    fn offsets_are_stable() {
        assert_eq!(gpr_offset(0), 0);
        assert_eq!(gpr_offset(31), 248);
        assert_eq!(HI_OFFSET, 256);
        assert_eq!(LO_OFFSET, 264);
        assert_eq!(cpr_offset(0, 0), 272);
        assert_eq!(STATUS_OFFSET, 272 + 12 * 8);
        assert_eq!(fcc_offset(0), 272 + 2 * 3 * 32 * 8);
    }

    #[test]
    fn cycle_accounting_tracks_slices() {
        let mut s = state();
        s.grant(100);
        s.icount -= 30;
        assert_eq!(s.total_cycles(), 30);
        assert_eq!(s.retire(), 30);
        s.icount -= 80;
        assert_eq!(s.retire(), 80);
        assert_eq!(s.total_cycles(), 110);
        assert_eq!(s.count(), 55);
    }

    #[test]
    fn compare_deadline_shortens_slice() {
        let mut s = state();
        s.write_cop0(COP0_STATUS, (SR_IMEX5 | SR_IE) as u64);
        s.write_cop0(COP0_COUNT, 0);
        s.write_cop0(COP0_COMPARE, 10);
        assert_eq!(s.compare_deadline, 20);
        s.grant(1000);
        assert_eq!(s.icount, 20);
        s.icount = 0;
        assert!(s.check_timer());
        assert_ne!(s.cause() & CAUSE_TIMER, 0);
        assert!(s.interrupt_pending());
    }

    #[test]
    fn cause_write_keeps_hardware_bits() {
        let mut s = state();
        s.set_irq_line(1, true);
        s.write_cop0(COP0_CAUSE, 0x100);
        assert_eq!(s.cause(), 0x800 | 0x100);
        s.write_cop0(COP0_STATUS, (0x100 | SR_IE) as u64);
        assert!(s.interrupt_pending());
    }

    #[test]
    fn exception_in_delay_slot() {
        let mut s = state();
        s.write_cop0(COP0_STATUS, 0);
        s.take_exception(Exception::Overflow, 0x8000_0104, true, 0);
        assert_eq!(s.cpr[0][COP0_EPC], sext32(0x8000_0100));
        assert_eq!(s.cause() & 0x7c, 12 << 2);
        assert_ne!(s.cause() & CAUSE_BD, 0);
        assert_ne!(s.status() & SR_EXL, 0);
        assert_eq!(s.pc, 0x8000_0180);
    }

    #[test]
    fn tlb_exception_records_address() {
        let mut s = state();
        s.take_exception(Exception::TlbLoad, 0x8000_0000, false, 0x0040_1234);
        assert_eq!(s.cpr[0][COP0_BADVADDR], 0x0040_1234);
        assert_eq!(s.cpr[0][COP0_ENTRYHI] & 0xffff_e000, 0x0040_0000);
        assert_eq!(s.cpr[0][COP0_CONTEXT], (0x0040_1234 >> 9) & 0x7f_fff0);
        assert_eq!(s.pc, VECTOR_BASE_BEV);
    }

    #[test]
    fn tlb_write_and_probe() {
        let mut s = state();
        s.cpr[0][COP0_INDEX] = 5;
        s.cpr[0][COP0_ENTRYHI] = 0x0010_0000;
        s.cpr[0][COP0_ENTRYLO0] = (0x200 << 6) | 6;
        s.cpr[0][COP0_ENTRYLO1] = (0x201 << 6) | 6;
        s.tlbwi();
        assert_eq!(s.tlb.translate(0x0010_0004, false), Some(0x0020_0004));
        s.tlbp();
        assert_eq!(s.cpr[0][COP0_INDEX], 5);
        s.cpr[0][COP0_ENTRYHI] = 0x0050_0000;
        s.tlbp();
        assert_eq!(s.cpr[0][COP0_INDEX], 0x8000_0000);
    }

    #[test]
    fn fcr31_condition_codes() {
        let mut s = state();
        s.set_fcr31((1 << 23) | (1 << 27) | 2, true);
        assert_eq!(s.fcc[0], 1);
        assert_eq!(s.fcc[3], 1);
        assert_eq!(s.fcr31(true), (1 << 23) | (1 << 27) | 2);
        s.set_fcr31(1 << 23, false);
        assert_eq!(s.fcr31(false), 1 << 23);
    }
}
