//! End-to-end scenarios: each program runs through the recompiler
//! and the interpreter, the states must match, and the interesting
//! architectural effects are checked explicitly.

mod difftest;

use std::cell::RefCell;
use std::rc::Rc;

use mips3_core::cop0::*;
use mips3_core::state::sext32;
use mips3_core::{DrcConfig, Exception, MipsFlavor, MipsState};

use crate::asm::*;
use crate::harness::*;

const BUDGET: i32 = 1000;

#[test]
fn add_of_opposites_is_zero() {
    let s = run_both(&[addiu(1, 0, 5), addiu(2, 0, -5), add(3, 1, 2)], &[(3, 0xdead)], BUDGET);
    assert_eq!(s.r[1], 5);
    assert_eq!(s.r[2], sext32(-5i32 as u32));
    assert_eq!(s.r[3], 0);
    assert_eq!(exc_code(&s), 0);
}

#[test]
fn add_overflow_traps_without_writing() {
    let prog = [lui(1, 0x7fff), ori(1, 1, 0xffff), addi(2, 1, 1), addiu(4, 0, 1)];
    let s = run_both(&prog, &[], BUDGET);
    assert_eq!(s.r[2], 0);
    assert_eq!(s.r[4], 0);
    assert_eq!(exc_code(&s), Exception::Overflow.code());
    assert_eq!(s.cpr[0][COP0_EPC], sext32(CODE + 8));
    assert_ne!(s.status() & SR_EXL, 0);
    assert_eq!(s.pc, GENERAL_VECTOR);
}

#[test]
fn add_of_max_to_itself_overflows_at_the_add() {
    let s = run_both(&[add(3, 1, 1), addiu(4, 0, 1)], &[(1, 0x7fff_ffff), (3, 0xdead)], BUDGET);
    assert_eq!(exc_code(&s), Exception::Overflow.code());
    assert_eq!(s.cpr[0][COP0_EPC], sext32(CODE));
    assert_eq!(s.cause() & CAUSE_BD, 0);
    assert_eq!(s.r[3], 0xdead);
    assert_eq!(s.r[4], 0);
    assert_eq!(s.pc, GENERAL_VECTOR);
}

#[test]
fn self_loop_runs_delay_slot_every_iteration() {
    let s = run_both(&[beq(0, 0, -1), addiu(1, 1, 1)], &[], 100);
    assert!(s.r[1] >= 50, "only {} iterations", s.r[1]);
    assert_eq!(s.pc, CODE);
}

#[test]
fn untaken_likely_branch_skips_delay_slot() {
    let prog = [beql(1, 0, 2), addiu(3, 0, 7), addiu(4, 0, 9)];
    let s = run_both(&prog, &[(1, 1)], BUDGET);
    assert_eq!(s.r[3], 0);
    assert_eq!(s.r[4], 9);
}

#[test]
fn taken_likely_branch_runs_delay_slot() {
    let prog = [beql(1, 2, 2), addiu(3, 0, 7), addiu(4, 0, 9)];
    let s = run_both(&prog, &[], BUDGET);
    assert_eq!(s.r[3], 7);
    assert_eq!(s.r[4], 0);
}

#[test]
fn likely_delay_slot_reached_as_branch_target() {
    let prog = [
        beql(0, 1, 2),
        addiu(3, 3, 1),
        addiu(4, 4, 1),
        bne(4, 5, -3),
        NOP,
        addiu(6, 0, 7),
    ];
    let s = run_both(&prog, &[(1, 1), (5, 2)], BUDGET);
    // skipped on the untaken fall-through, run once through the bne
    assert_eq!(s.r[3], 1);
    assert_eq!(s.r[4], 2);
    assert_eq!(s.r[6], 7);
}

#[test]
fn call_and_return() {
    let prog = [
        jal(CODE + 0x14),
        addiu(4, 0, 3),
        addiu(5, 0, 1),
        beq(0, 0, -1),
        NOP,
        addiu(6, 0, 2),
        jr(31),
        addiu(7, 0, 4),
    ];
    let s = run_both(&prog, &[], BUDGET);
    assert_eq!(s.r[31], sext32(CODE + 8));
    assert_eq!((s.r[4], s.r[5], s.r[6], s.r[7]), (3, 1, 2, 4));
    assert_eq!(s.pc, CODE + 0xc);
}

#[test]
fn loads_and_stores() {
    let prog = [
        lui(2, 0x1234),
        ori(2, 2, 0x5678),
        sw(2, 0, 1),
        lb(3, 0, 1),
        lbu(4, 3, 1),
        lh(5, 2, 1),
        addiu(6, 0, -1),
        sb(6, 1, 1),
        lw(7, 0, 1),
        lwl(8, 1, 1),
        lwr(8, 4, 1),
        sd(2, 8, 1),
        ld(9, 8, 1),
        swl(2, 0x11, 1),
        swr(2, 0x14, 1),
        lw(10, 0x10, 1),
        lw(11, 0x14, 1),
    ];
    let s = run_both(&prog, &[(1, DATA)], BUDGET);
    assert_eq!(s.r[3], 0x12);
    assert_eq!(s.r[4], 0x78);
    assert_eq!(s.r[5], 0x5678);
    assert_eq!(s.r[7], 0x12ff_5678);
    assert_eq!(s.r[8], 0xffff_ffff_ff56_7800);
    assert_eq!(s.r[9], 0x1234_5678);
    assert_eq!(s.r[10], 0x0012_3456);
    assert_eq!(s.r[11], 0x7800_0000);
}

#[test]
fn multiply_and_divide() {
    let prog = [
        addiu(1, 0, -7),
        addiu(2, 0, 2),
        mult(1, 2),
        mflo(3),
        mfhi(4),
        div(1, 2),
        mflo(5),
        mfhi(6),
        divu(1, 0),
        mflo(7),
    ];
    let s = run_both(&prog, &[], BUDGET);
    assert_eq!(s.r[3], -14i64 as u64);
    assert_eq!(s.r[4], u64::MAX);
    assert_eq!(s.r[5], -3i64 as u64);
    assert_eq!(s.r[6], u64::MAX);
    // divide by zero leaves LO alone
    assert_eq!(s.r[7], -3i64 as u64);
}

#[test]
fn syscall_enters_general_vector() {
    let s = run_both(&[addiu(1, 0, 1), SYSCALL, addiu(2, 0, 1)], &[], BUDGET);
    assert_eq!(exc_code(&s), Exception::Syscall.code());
    assert_eq!(s.cpr[0][COP0_EPC], sext32(CODE + 4));
    assert_eq!(s.cause() & CAUSE_BD, 0);
    assert_eq!(s.r[2], 0);
}

#[test]
fn exception_in_delay_slot_points_at_branch() {
    let s = run_both(&[beq(0, 0, 2), SYSCALL, NOP, addiu(2, 0, 1)], &[], BUDGET);
    assert_eq!(exc_code(&s), Exception::Syscall.code());
    assert_eq!(s.cpr[0][COP0_EPC], sext32(CODE));
    assert_ne!(s.cause() & CAUSE_BD, 0);
    assert_eq!(s.r[2], 0);
}

#[test]
fn trap_on_equal() {
    let s = run_both(&[teq(0, 0)], &[], BUDGET);
    assert_eq!(exc_code(&s), Exception::Trap.code());
    assert_eq!(s.cpr[0][COP0_EPC], sext32(CODE));
}

#[test]
fn unmapped_load_takes_tlb_refill() {
    let s = run_both(&[lw(2, 0, 1), addiu(3, 0, 1)], &[(1, 0x1000)], BUDGET);
    assert_eq!(exc_code(&s), Exception::TlbLoad.code());
    assert_eq!(s.cpr[0][COP0_BADVADDR], 0x1000);
    assert_eq!(s.cpr[0][COP0_EPC], sext32(CODE));
    assert_eq!(s.pc, VECTOR_BASE_RAM);
    assert_eq!(s.r[3], 0);
}

#[test]
fn cop0_moves_and_eret() {
    let prog = [
        lui(1, 0x8000),
        ori(1, 1, 0x0220),
        mtc0(1, COP0_EPC as u32),
        mfc0(2, COP0_EPC as u32),
        addiu(3, 0, SR_EXL as i32),
        mtc0(3, COP0_STATUS as u32),
        ERET,
        addiu(4, 0, 9),
        addiu(5, 0, 1),
    ];
    let s = run_both(&prog, &[], BUDGET);
    assert_eq!(s.r[2], sext32(CODE + 0x20));
    assert_eq!(s.r[4], 0);
    assert_eq!(s.r[5], 1);
    assert_eq!(s.status() & SR_EXL, 0);
}

#[test]
fn single_precision_add_and_compare() {
    let prog = [
        lui(1, 0x3f80),
        mtc1(1, 0),
        add_s(2, 0, 0),
        mfc1(3, 2),
        c_lt_s(0, 2),
        bc1t(2),
        NOP,
        addiu(4, 0, 1),
        addiu(5, 0, 1),
    ];
    let s = run_both(&prog, &[], BUDGET);
    assert_eq!(s.r[3], 0x4000_0000);
    assert_eq!(s.fcc[0], 1);
    assert_eq!(s.r[4], 0);
    assert_eq!(s.r[5], 1);
}

#[test]
fn float_to_word_rounding_modes() {
    let prog = [
        lui(1, 0x4020),
        mtc1(1, 0),
        lui(2, 0xc020),
        mtc1(2, 2),
        round_w_s(4, 0),
        round_w_s(5, 2),
        trunc_w_s(6, 0),
        trunc_w_s(7, 2),
        ceil_w_s(8, 0),
        ceil_w_s(9, 2),
        floor_w_s(10, 0),
        floor_w_s(11, 2),
        mfc1(3, 4),
        mfc1(4, 5),
        mfc1(5, 6),
        mfc1(6, 7),
        mfc1(7, 8),
        mfc1(8, 9),
        mfc1(9, 10),
        mfc1(10, 11),
    ];
    let s = run_both(&prog, &[], BUDGET);
    // 2.5 and -2.5: round to even, toward zero, up, down
    let got: Vec<i64> = (3..=10).map(|r| s.r[r] as i64).collect();
    assert_eq!(got, [2, -2, 2, -2, 3, -2, 2, -3]);
}

#[test]
fn mips4_conditional_move() {
    let cfg = config().with_flavor(MipsFlavor::Mips4);
    let prog = [addiu(1, 0, 42), movz(2, 1, 0), movz(3, 1, 1)];
    let (mut a, _) = Machine::with_config(&prog, cfg.clone()).run_drc(BUDGET);
    let (mut b, _) = Machine::with_config(&prog, cfg).run_interp(BUDGET);
    assert_same(&mut a, &mut b);
    assert_eq!(a.r[2], 42);
    assert_eq!(a.r[3], 0);
}

#[test]
fn budget_is_spent_and_reported() {
    let (s, executed) = Machine::new(&[beq(0, 0, -1), addiu(1, 1, 1)]).run_drc(100);
    assert!(executed >= 100, "ran {executed} cycles");
    assert!(executed < 110, "overshot to {executed} cycles");
    assert_eq!(s.pc, CODE);
}

#[test]
fn entries_are_reused_across_calls() {
    let mut m = Machine::new(&[addiu(1, 1, 1), beq(0, 0, -2), NOP]);
    let mut drc = m.drc();
    drc.execute(&mut m.state, 200).expect("first slice");
    assert!(drc.lookup(CODE).is_some());
    let size = drc.code_size();
    let first = m.state.r[1];
    assert!(first > 0);

    drc.execute(&mut m.state, 200).expect("second slice");
    assert_eq!(drc.code_size(), size, "loop recompiled on second slice");
    assert!(m.state.r[1] > first);
}

#[test]
fn flush_discards_entries() {
    let mut m = Machine::new(&[addiu(1, 1, 1), beq(0, 0, -2), NOP]);
    let mut drc = m.drc();
    drc.execute(&mut m.state, 50).expect("execute");
    assert!(drc.lookup(CODE).is_some());
    drc.flush();
    assert!(drc.lookup(CODE).is_none());
    drc.execute(&mut m.state, 50).expect("recompile after flush");
    assert!(drc.lookup(CODE).is_some());
}

#[test]
fn timer_interrupt_is_taken_at_compare() {
    let prog = [
        addiu(1, 0, 40),
        mtc0(1, COP0_COMPARE as u32),
        ori(2, 0, (SR_IE | SR_IMEX5) as u16),
        mtc0(2, COP0_STATUS as u32),
        beq(0, 0, -1),
        addiu(3, 3, 1),
    ];
    let (s, _) = Machine::new(&prog).run_drc(2000);
    assert_eq!(exc_code(&s), Exception::Interrupt.code());
    assert_ne!(s.cause() & CAUSE_TIMER, 0, "IP7 pending");
    assert_eq!(s.pc, GENERAL_VECTOR);
    assert!(s.r[3] > 0);
}

#[test]
fn count_matches_interpreter_through_loops_and_memory() {
    let prog = [
        addiu(1, 0, 5),
        mfc0(10, COP0_COUNT as u32),
        sw(1, 0, 8),
        lw(3, 0, 8),
        addiu(1, 1, -1),
        bne(1, 0, -4),
        addiu(4, 4, 1),
        mfc0(11, COP0_COUNT as u32),
        mfc0(12, COP0_CAUSE as u32),
        mfc0(13, COP0_COUNT as u32),
    ];
    let s = run_both(&prog, &[(8, DATA)], BUDGET);
    assert_eq!(s.r[4], 5);
    assert!(s.r[11] > s.r[10]);
    assert!(s.r[13] >= s.r[11]);
}

#[test]
fn hotspot_cycles_are_charged() {
    let prog = [addiu(1, 0, 1), mfc0(2, COP0_COUNT as u32)];
    let count = |cfg: DrcConfig| {
        let (mut a, _) = Machine::with_config(&prog, cfg.clone()).run_drc(BUDGET);
        let (mut b, _) = Machine::with_config(&prog, cfg).run_interp(BUDGET);
        assert_same(&mut a, &mut b);
        a.r[2]
    };
    let plain = count(config());
    let slow = count(config().with_hotspot(CODE, addiu(1, 0, 1), 100));
    assert_eq!(slow - plain, 50, "Count ticks every other cycle");
}

#[test]
fn large_window_compiles_long_store_runs() {
    let mut cfg = config();
    cfg.window_after = 0x3000;
    let mut prog = vec![lui(5, 0x8000), ori(5, 5, 0x3c00)];
    prog.extend(std::iter::repeat(sw(6, 0, 5)).take(2400));
    let mut m = Machine::with_config(&prog, cfg).regs(&[(6, 0x1234_5678)]);
    let mut drc = m.drc();
    drc.execute(&mut m.state, 10_000).expect("long sequence");
    assert_eq!(m.state.pc, CODE + prog.len() as u32 * 4);
    assert_eq!(m.state.bus.read_word(0x3c00), 0x1234_5678);
}

#[test]
fn patched_code_is_recompiled() {
    let mut m = Machine::new(&[addiu(2, 0, 1)]);
    let mut drc = m.drc();
    drc.execute(&mut m.state, 100).expect("first run");
    assert_eq!(m.state.r[2], 1);
    let size = drc.code_size();

    m.state.bus.write_word(CODE & 0x1fff_ffff, addiu(2, 0, 2));
    m.state.pc = CODE;
    drc.execute(&mut m.state, 100).expect("after patch");
    assert_eq!(m.state.r[2], 2);
    assert!(drc.code_size() > size, "stale code was reused");
}

/// Map the even half of TLB entry 0: `vaddr` to physical page `pfn`.
fn map_page(s: &mut MipsState, vaddr: u32, pfn: u32) {
    s.cpr[0][COP0_INDEX] = 0;
    s.cpr[0][COP0_PAGEMASK] = 0;
    s.cpr[0][COP0_ENTRYHI] = vaddr as u64;
    // valid, dirty, global
    s.cpr[0][COP0_ENTRYLO0] = ((pfn << 6) | 0x7) as u64;
    s.cpr[0][COP0_ENTRYLO1] = 1;
    s.tlbwi();
}

#[test]
fn remapped_code_page_is_recompiled() {
    const VADDR: u32 = 0x0040_0000;
    let mut m = Machine::new(&[]);
    for (page, value) in [(0x2000, 1), (0x3000, 2)] {
        m.state.bus.write_word(page, addiu(2, 0, value));
        m.state.bus.write_word(page + 4, HALT[0]);
        m.state.bus.write_word(page + 8, HALT[1]);
    }
    let mut drc = m.drc();

    map_page(&mut m.state, VADDR, 2);
    m.state.pc = VADDR;
    drc.execute(&mut m.state, 100).expect("first mapping");
    assert_eq!(m.state.r[2], 1);
    assert_eq!(m.state.pc, VADDR + 4);
    assert!(drc.lookup(VADDR).is_some());

    map_page(&mut m.state, VADDR, 3);
    m.state.pc = VADDR;
    drc.execute(&mut m.state, 100).expect("second mapping");
    assert_eq!(m.state.r[2], 2);
    assert_eq!(m.state.pc, VADDR + 4);
}

#[test]
fn step_hook_sees_every_instruction() {
    let prog = [addiu(1, 0, 1), addiu(2, 1, 1), addiu(3, 2, 1)];
    let mut m = Machine::with_config(&prog, config().with_single_step(true));
    let mut drc = m.drc();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    drc.set_step_hook(Some(Box::new(move |s: &MipsState| sink.borrow_mut().push(s.pc))));
    drc.execute(&mut m.state, 10).expect("execute");

    assert_eq!(m.state.r[3], 3);
    let seen = seen.borrow();
    assert_eq!(seen[..4], [CODE, CODE + 4, CODE + 8, CODE + 12]);
}
