//! Random straight-line programs must leave the recompiler and the
//! interpreter in the same state.

use proptest::prelude::*;

use crate::asm::*;
use crate::harness::*;

fn reg() -> impl Strategy<Value = u32> {
    1u32..8
}

fn alu_insn() -> impl Strategy<Value = u32> {
    prop_oneof![
        (reg(), reg(), any::<i16>()).prop_map(|(t, s, i)| addiu(t, s, i as i32)),
        (reg(), reg(), any::<i16>()).prop_map(|(t, s, i)| daddiu(t, s, i as i32)),
        (reg(), reg(), any::<i16>()).prop_map(|(t, s, i)| slti(t, s, i as i32)),
        (reg(), reg(), any::<u16>()).prop_map(|(t, s, i)| andi(t, s, i)),
        (reg(), reg(), any::<u16>()).prop_map(|(t, s, i)| ori(t, s, i)),
        (reg(), reg(), any::<u16>()).prop_map(|(t, s, i)| xori(t, s, i)),
        (reg(), any::<u16>()).prop_map(|(t, i)| lui(t, i)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| addu(d, s, t)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| subu(d, s, t)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| and(d, s, t)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| or(d, s, t)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| xor(d, s, t)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| nor(d, s, t)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| slt(d, s, t)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| sltu(d, s, t)),
        (reg(), reg(), reg()).prop_map(|(d, s, t)| daddu(d, s, t)),
        (reg(), reg(), 0u32..32).prop_map(|(d, t, sa)| sll(d, t, sa)),
        (reg(), reg(), 0u32..32).prop_map(|(d, t, sa)| srl(d, t, sa)),
        (reg(), reg(), 0u32..32).prop_map(|(d, t, sa)| sra(d, t, sa)),
        (reg(), reg(), 0u32..32).prop_map(|(d, t, sa)| dsra(d, t, sa)),
        (reg(), reg(), 0u32..32).prop_map(|(d, t, sa)| dsll32(d, t, sa)),
        (reg(), reg()).prop_map(|(s, t)| mult(s, t)),
        (reg(), reg()).prop_map(|(s, t)| divu(s, t)),
        reg().prop_map(mflo),
        reg().prop_map(mfhi),
    ]
}

/// Stores into the data page, addressed off r8.
fn store_insn() -> impl Strategy<Value = u32> {
    prop_oneof![
        (reg(), 0i32..64).prop_map(|(t, o)| sw(t, o * 4, 8)),
        (reg(), 0i32..255).prop_map(|(t, o)| sb(t, o, 8)),
        (reg(), 0i32..32).prop_map(|(t, o)| sd(t, o * 8, 8)),
        (reg(), 0i32..255).prop_map(|(t, o)| swl(t, o, 8)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn alu_programs_agree(
        prog in prop::collection::vec(alu_insn(), 1..40),
        seeds in prop::collection::vec(any::<u32>(), 7),
    ) {
        let regs: Vec<_> = seeds.iter().enumerate().map(|(i, &v)| (i + 1, v)).collect();
        run_both(&prog, &regs, 1000);
    }

    #[test]
    fn store_programs_agree(
        prog in prop::collection::vec(prop_oneof![alu_insn(), store_insn()], 1..40),
        seeds in prop::collection::vec(any::<u32>(), 7),
    ) {
        let mut regs: Vec<_> = seeds.iter().enumerate().map(|(i, &v)| (i + 1, v)).collect();
        regs.push((8, DATA));
        run_both(&prog, &regs, 1000);
    }
}
