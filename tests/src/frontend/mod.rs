//! Front-end tests: decoder coverage, descriptor invariants and
//! sequence building over synthetic guest code.

use std::collections::HashSet;

use mips3_core::MipsFlavor;
use mips3_frontend::{
    decode, describe_insn, DescFlags, FetchedOp, InsnDesc, InsnKind, InsnSource, Sequencer,
};
use proptest::prelude::*;

use crate::asm::*;

const BASE: u32 = 0x8000_0000;
const WINDOW: u32 = 0x100;

/// Guest code at [`BASE`], fixed mapped.
struct Program {
    words: Vec<u32>,
}

impl InsnSource for Program {
    fn translate_pc(&self, pc: u32) -> Option<u32> {
        Some(pc & 0x1fff_ffff)
    }

    fn fetch(&mut self, physpc: u32) -> FetchedOp {
        let idx = (physpc / 4) as usize;
        FetchedOp {
            word: self.words.get(idx).copied().unwrap_or(0),
            host: None,
        }
    }
}

fn describe(word: u32, flavor: MipsFlavor) -> InsnDesc {
    let mut desc = InsnDesc::blank(BASE);
    describe_insn(&mut desc, decode(word, flavor));
    desc
}

/// Describe `words` from [`BASE`] and collect the chain.
fn chain(words: Vec<u32>, maxseq: u32) -> (Sequencer, Vec<InsnDesc>) {
    let mut src = Program { words };
    let mut seq = Sequencer::new(MipsFlavor::Mips4, WINDOW);
    let head = seq
        .describe_sequence(&mut src, BASE, BASE, BASE + WINDOW, maxseq)
        .unwrap();
    let list = seq.chain(head).map(|(_, d)| d.clone()).collect();
    seq.release(head);
    (seq, list)
}

// ── Decoder ───────────────────────────────────────────────────

#[test]
fn test_decode_is_total() {
    for flavor in [MipsFlavor::Mips3, MipsFlavor::Mips4] {
        for primary in 0..64u32 {
            for rs in 0..32u32 {
                for rt in [0u32, 1, 2, 3, 8, 16, 17, 31] {
                    for funct in 0..64u32 {
                        let word = (primary << 26) | (rs << 21) | (rt << 16) | funct;
                        let desc = describe(word, flavor);
                        let invalid = desc.insn.kind == InsnKind::Invalid;
                        assert_eq!(
                            desc.flags.contains(DescFlags::INVALID_OPCODE),
                            invalid,
                            "{word:#010x}"
                        );
                        if invalid {
                            assert!(desc.flags.contains(DescFlags::END_SEQUENCE));
                        }
                        assert_eq!(desc.gpr.modified & 1, 0, "{word:#010x} writes r0");
                    }
                }
            }
        }
    }
}

#[test]
fn test_mips4_only_encodings() {
    let movz_word = movz(2, 1, 3);
    assert_eq!(decode(movz_word, MipsFlavor::Mips3).kind, InsnKind::Invalid);
    assert_eq!(decode(movz_word, MipsFlavor::Mips4).kind, InsnKind::Movz);
    // pref
    let pref = itype(0x33, 1, 0, 0);
    assert_eq!(decode(pref, MipsFlavor::Mips3).kind, InsnKind::Invalid);
    assert_eq!(decode(pref, MipsFlavor::Mips4).kind, InsnKind::Pref);
}

#[test]
fn test_branch_flags() {
    let d = describe(beq(1, 2, 4), MipsFlavor::Mips3);
    assert!(d.flags.contains(DescFlags::IS_CONDITIONAL_BRANCH));
    assert_eq!(d.targetpc, BASE + 4 + 16);

    let d = describe(beql(1, 2, -1), MipsFlavor::Mips3);
    assert!(d.flags.contains(DescFlags::IS_LIKELY_BRANCH));
    assert_eq!(d.targetpc, BASE);

    let d = describe(j(0x8000_1000), MipsFlavor::Mips3);
    assert!(d.flags.contains(DescFlags::IS_UNCONDITIONAL_BRANCH));
    assert_eq!(d.targetpc, 0x8000_1000);

    let d = describe(jr(31), MipsFlavor::Mips3);
    assert!(d.flags.contains(DescFlags::IS_UNCONDITIONAL_BRANCH));
    assert!(!d.has_static_target());
}

#[test]
fn test_memory_ops_can_fault() {
    for word in [lw(2, 0, 1), sb(2, 4, 1), ld(3, 8, 1), swl(2, 1, 1)] {
        let d = describe(word, MipsFlavor::Mips3);
        assert!(d.flags.contains(DescFlags::CAN_CAUSE_EXCEPTION), "{word:#010x}");
        assert!(
            d.flags.contains(DescFlags::READS_MEMORY) || d.flags.contains(DescFlags::WRITES_MEMORY)
        );
    }
}

// ── Sequences ─────────────────────────────────────────────────

#[test]
fn test_every_branch_owns_its_delay_slot() {
    let prog = vec![
        addiu(1, 0, 3),
        bne(1, 0, 3),
        addiu(1, 1, -1),
        beql(1, 0, -3),
        addiu(2, 2, 1),
        jr(31),
        NOP,
    ];
    let mut src = Program { words: prog };
    let mut seq = Sequencer::new(MipsFlavor::Mips3, WINDOW);
    let head = seq
        .describe_sequence(&mut src, BASE, BASE, BASE + WINDOW, 32)
        .unwrap();
    let mut branches = 0;
    for (_, d) in seq.chain(head) {
        if !d.is_branch() {
            assert!(d.delay.is_none());
            continue;
        }
        branches += 1;
        let slot = seq.desc(d.delay.unwrap()).unwrap();
        assert_eq!(slot.pc, d.pc + 4);
        assert!(slot.in_delay_slot());
        assert!(!slot.is_branch());
    }
    assert_eq!(branches, 3);
    seq.release(head);
    assert_eq!(seq.pool().live(), 0);
}

#[test]
fn test_branch_in_delay_slot_is_invalid() {
    let (_, list) = chain(vec![j(BASE + 0x40), j(BASE + 0x80)], 32);
    assert_eq!(list[0].pc, BASE);
    assert!(list[0].is_branch());
}

#[test]
fn test_branch_target_splits_sequence() {
    // the loop head at BASE+4 is a branch target
    let prog = vec![NOP, addiu(1, 1, 1), bne(1, 2, -2), NOP, NOP];
    let (_, list) = chain(prog, 32);
    let first = list.iter().find(|d| d.pc == BASE).unwrap();
    assert!(first.flags.contains(DescFlags::END_SEQUENCE));
    let head = list.iter().find(|d| d.pc == BASE + 4).unwrap();
    assert!(head.flags.contains(DescFlags::IS_BRANCH_TARGET));
}

#[test]
fn test_code_before_entry_returns_to_start() {
    // entry in the middle; a backward branch reaches code before it
    let prog = vec![addiu(1, 1, 1), NOP, beq(0, 0, -3), NOP];
    let mut src = Program { words: prog };
    let mut seq = Sequencer::new(MipsFlavor::Mips3, WINDOW);
    let start = BASE + 8;
    let head = seq
        .describe_sequence(&mut src, start, BASE, BASE + WINDOW, 32)
        .unwrap();
    let list: Vec<_> = seq.chain(head).map(|(_, d)| (d.pc, d.flags)).collect();
    assert_eq!(list[0].0, start);
    let (pc, flags) = *list.last().unwrap();
    assert_eq!(pc, BASE + 4);
    assert!(flags.contains(DescFlags::END_SEQUENCE | DescFlags::RETURN_TO_START));
    seq.release(head);
}

fn alu_word() -> impl Strategy<Value = u32> {
    let r = 0u32..8;
    prop_oneof![
        (r.clone(), r.clone(), any::<i16>()).prop_map(|(t, s, i)| addiu(t, s, i as i32)),
        (r.clone(), r.clone(), r.clone()).prop_map(|(d, s, t)| addu(d, s, t)),
        (r.clone(), r.clone(), r.clone()).prop_map(|(d, s, t)| or(d, s, t)),
        (r.clone(), r.clone(), 0u32..32).prop_map(|(d, t, sa)| sll(d, t, sa)),
        (r.clone(), any::<u16>()).prop_map(|(t, i)| lui(t, i)),
        (r.clone(), r).prop_map(|(s, t)| mult(s, t)),
    ]
}

proptest! {
    /// Any word soup describes, terminates and visits each address
    /// once.
    #[test]
    fn prop_sequence_terminates(words in prop::collection::vec(any::<u32>(), 1..64)) {
        let (seq, list) = chain(words, 8);
        prop_assert!(list.len() <= (WINDOW / 4) as usize);
        let mut seen = HashSet::new();
        for d in &list {
            prop_assert!(seen.insert(d.pc), "{:#x} twice", d.pc);
            prop_assert!(d.pc >= BASE && d.pc < BASE + WINDOW);
        }
        if let Some(last) = list.last() {
            prop_assert!(last.flags.contains(DescFlags::END_SEQUENCE));
        }
        prop_assert_eq!(seq.pool().live(), 0);
    }

    /// Liveness of a straight-line sub-sequence: a register is live
    /// at an instruction when it is read both at or before it and at
    /// or after it.
    #[test]
    fn prop_liveness_is_exact(prog in prop::collection::vec(alu_word(), 1..40), maxseq in 2u32..12) {
        let (_, list) = chain(prog, maxseq);
        let mut start = 0;
        for end in 0..list.len() {
            if !list[end].flags.contains(DescFlags::END_SEQUENCE) {
                continue;
            }
            let sub = &list[start..=end];
            for (i, d) in sub.iter().enumerate() {
                let before = sub[..=i].iter().fold(0, |a, x| a | x.gpr.used);
                let after = sub[i..].iter().fold(0, |a, x| a | x.gpr.used);
                prop_assert_eq!(d.gpr.liveread, before & after, "at {:#x}", d.pc);
                prop_assert_eq!(d.gpr.used & !d.gpr.liveread, 0);
            }
            start = end + 1;
        }
    }
}
