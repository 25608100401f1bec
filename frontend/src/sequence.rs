//! Sequence exploration, linearization and liveness.

use std::ptr::NonNull;

use mips3_core::{MipsFlavor, Result, Tlb};

use crate::desc::{InsnDesc, RegUsage};
use crate::describe::describe_insn;
use crate::flags::DescFlags;
use crate::insn::{decode, Insn, InsnKind};
use crate::pool::{DescId, DescPool};

/// Depth of the branch-target exploration stack. Targets beyond it
/// are simply not explored.
pub const MAX_STACK_DEPTH: usize = 100;

/// Slack kept past the end of the window in the lookup array.
const WINDOW_SLACK: usize = 10;

/// An opcode read from guest memory.
#[derive(Debug, Clone, Copy)]
pub struct FetchedOp {
    pub word: u32,
    /// Host address of the word, when it lives in directly
    /// addressable RAM.
    pub host: Option<NonNull<u32>>,
}

/// Where instructions come from.
pub trait InsnSource {
    /// Translate an instruction address; `None` if fetching it would
    /// fault.
    fn translate_pc(&self, pc: u32) -> Option<u32>;

    /// Read the opcode at a physical address.
    fn fetch(&mut self, physpc: u32) -> FetchedOp;

    /// Whether `pc` lies in an unmapped segment whose translation
    /// can never change.
    fn is_fixed_mapped(&self, pc: u32) -> bool {
        Tlb::is_fixed_mapped(pc)
    }
}

#[derive(Clone, Copy)]
struct StackEntry {
    srcpc: u32,
    targetpc: u32,
}

/// Describes and orders the instructions around an entry PC.
///
/// Owns the descriptor arena and the dense per-window lookup array;
/// neither is reentrant, so one sequence is described, compiled and
/// released before the next one starts.
pub struct Sequencer {
    pool: DescPool,
    window: Vec<Option<DescId>>,
    flavor: MipsFlavor,
}

impl Sequencer {
    pub fn new(flavor: MipsFlavor, window_bytes: u32) -> Self {
        let slots = window_bytes as usize / 4 + WINDOW_SLACK;
        Self {
            pool: DescPool::new(slots * 2),
            window: vec![None; slots],
            flavor,
        }
    }

    #[inline]
    pub fn pool(&self) -> &DescPool {
        &self.pool
    }

    #[inline]
    pub fn desc(&self, id: DescId) -> Option<&InsnDesc> {
        self.pool.get(id)
    }

    /// Iterate a chain from `head` in compile order.
    pub fn chain(&self, head: Option<DescId>) -> ChainIter<'_> {
        ChainIter {
            pool: &self.pool,
            cur: head,
        }
    }

    /// Release everything reachable from `head`.
    pub fn release(&mut self, head: Option<DescId>) {
        self.pool.release_chain(head);
    }

    /// Describe the code reachable from `startpc` inside
    /// `[minpc, maxpc)` and return the head of the ordered chain.
    ///
    /// Sub-sequences never exceed `maxseq` consecutive instructions.
    pub fn describe_sequence(
        &mut self,
        src: &mut dyn InsnSource,
        startpc: u32,
        minpc: u32,
        maxpc: u32,
        maxseq: u32,
    ) -> Result<Option<DescId>> {
        let slots = (maxpc.wrapping_sub(minpc) / 4) as usize + WINDOW_SLACK;
        if slots > self.window.len() {
            self.window.resize(slots, None);
        }
        self.pool.reserve_limit(slots * 2);

        let mut stack: Vec<StackEntry> = Vec::with_capacity(MAX_STACK_DEPTH);
        stack.push(StackEntry {
            srcpc: 0,
            targetpc: startpc,
        });

        while let Some(entry) = stack.pop() {
            let slot = Self::slot(minpc, entry.targetpc);
            if let Some(id) = self.window[slot] {
                let fixed = self.pool.get(id).map(|d| src.is_fixed_mapped(d.pc));
                if let (Some(desc), Some(fixed)) = (self.pool.get_mut(id), fixed) {
                    desc.flags |= DescFlags::IS_BRANCH_TARGET;
                    if !fixed && (entry.srcpc ^ desc.pc) & !0xfff != 0 {
                        desc.flags |= DescFlags::VALIDATE_TLB | DescFlags::CAN_CAUSE_EXCEPTION;
                    }
                }
                continue;
            }

            let mut curpc = entry.targetpc;
            while curpc < maxpc && self.window[Self::slot(minpc, curpc)].is_none() {
                let (id, ok) = self.describe_one(src, curpc, false)?;
                self.window[Self::slot(minpc, curpc)] = Some(id);
                if !ok {
                    break;
                }
                let fixed = src.is_fixed_mapped(curpc);
                let Some(desc) = self.pool.get_mut(id) else {
                    break;
                };

                if curpc == entry.targetpc {
                    desc.flags |= DescFlags::IS_BRANCH_TARGET;
                }
                if !fixed && (curpc == startpc || curpc & 0xfff == 0) {
                    desc.flags |= DescFlags::VALIDATE_TLB | DescFlags::CAN_CAUSE_EXCEPTION;
                }
                if desc.is_branch()
                    && desc.targetpc >= minpc
                    && desc.targetpc < maxpc
                    && stack.len() < MAX_STACK_DEPTH
                {
                    desc.flags |= DescFlags::INTRABLOCK_BRANCH;
                    stack.push(StackEntry {
                        srcpc: desc.pc,
                        targetpc: desc.targetpc,
                    });
                }

                if desc.flags.contains(DescFlags::END_SEQUENCE) {
                    break;
                }
                if desc.flags.contains(DescFlags::IS_LIKELY_BRANCH) {
                    curpc = curpc.wrapping_add(4);
                }
                curpc = curpc.wrapping_add(4);
            }
        }

        let start = Self::slot(minpc, startpc);
        let end = Self::slot(minpc, maxpc);
        let mut head = None;
        let mut tail = None;
        self.build_sequence(&mut head, &mut tail, start, end, DescFlags::REDISPATCH, maxseq);
        self.build_sequence(&mut head, &mut tail, 0, start, DescFlags::RETURN_TO_START, maxseq);
        log::trace!(
            "described {startpc:#010x} in [{minpc:#010x}, {maxpc:#010x}): {} descriptors",
            self.pool.live()
        );
        Ok(head)
    }

    #[inline]
    fn slot(minpc: u32, pc: u32) -> usize {
        (pc.wrapping_sub(minpc) / 4) as usize
    }

    /// Describe one instruction and, for branches, its delay slot.
    /// The flag is false when the instruction could not be fetched.
    ///
    /// A branch sitting in a delay slot is architecturally
    /// unpredictable; it is described as a reserved instruction.
    fn describe_one(
        &mut self,
        src: &mut dyn InsnSource,
        pc: u32,
        in_delay: bool,
    ) -> Result<(DescId, bool)> {
        let mut desc = InsnDesc::blank(pc);
        let Some(physpc) = src.translate_pc(pc) else {
            desc.physpc = None;
            desc.flags =
                DescFlags::CAN_CAUSE_EXCEPTION | DescFlags::END_SEQUENCE | DescFlags::REDISPATCH;
            return Ok((self.pool.alloc(desc)?, false));
        };
        desc.physpc = Some(physpc);
        let op = src.fetch(physpc);
        desc.opptr = op.host;
        let insn = decode(op.word, self.flavor);
        describe_insn(&mut desc, insn);
        if in_delay && desc.is_branch() {
            desc = InsnDesc::blank(pc);
            desc.physpc = Some(physpc);
            desc.opptr = op.host;
            describe_insn(&mut desc, Insn { kind: InsnKind::Invalid, ..insn });
        }

        let is_branch = desc.is_branch();
        let id = self.pool.alloc(desc)?;
        if is_branch {
            let (delay, _) = self.describe_one(src, pc.wrapping_add(4), true)?;
            if let Some(d) = self.pool.get_mut(delay) {
                d.flags |= DescFlags::IN_DELAY_SLOT;
                d.branch = Some(id);
            }
            if let Some(b) = self.pool.get_mut(id) {
                b.delay = Some(delay);
            }
        }
        Ok((id, true))
    }

    /// Link the window slots `[start, end)` onto the chain, deciding
    /// sub-sequence boundaries and computing liveness on the way.
    fn build_sequence(
        &mut self,
        head: &mut Option<DescId>,
        tail: &mut Option<DescId>,
        start: usize,
        end: usize,
        endflag: DescFlags,
        maxseq: u32,
    ) {
        let mut acc = Accumulators::default();
        let mut consecutive = 0u32;
        let mut seqstart: Option<usize> = None;

        for descnum in start..end {
            let Some(id) = self.window[descnum] else {
                continue;
            };
            let Some(flags) = self.pool.get(id).map(|d| d.flags) else {
                continue;
            };

            let nextoffs = if flags.contains(DescFlags::IS_LIKELY_BRANCH) { 2 } else { 1 };
            let next = if descnum + nextoffs < end {
                self.window[descnum + nextoffs]
            } else {
                None
            };
            let next_is_target = next
                .and_then(|n| self.pool.get(n))
                .is_some_and(|n| n.flags.contains(DescFlags::IS_BRANCH_TARGET));
            let delay_slot_visited = self.window.get(descnum + 1).copied().flatten().is_some();

            if seqstart.is_none() {
                seqstart = Some(descnum);
            }

            let mut flags = flags;
            // rule order: likely skip, next target, window end, length
            if flags.contains(DescFlags::IS_LIKELY_BRANCH) && delay_slot_visited {
                flags |= DescFlags::END_SEQUENCE;
            }
            if next_is_target {
                flags |= DescFlags::END_SEQUENCE;
            }
            if next.is_none() {
                flags |= DescFlags::END_SEQUENCE | endflag;
            }
            if !flags.contains(DescFlags::END_SEQUENCE) {
                consecutive += 1;
                if consecutive >= maxseq {
                    flags |= DescFlags::END_SEQUENCE;
                }
            }
            if flags.contains(DescFlags::END_SEQUENCE) {
                consecutive = 0;
            }
            if let Some(desc) = self.pool.get_mut(id) {
                desc.flags = flags;
            }

            self.accumulate_forwards(id, &mut acc);

            if flags.contains(DescFlags::END_SEQUENCE) {
                let first = seqstart.take().unwrap_or(descnum);
                let mut back = Accumulators::default();
                for backdesc in (first..=descnum).rev() {
                    if let Some(bid) = self.window[backdesc] {
                        self.accumulate_backwards(bid, &mut back);
                    }
                }
                acc = Accumulators::default();
            }

            match (*tail).and_then(|t| self.pool.get_mut(t)) {
                Some(prev) => prev.next = Some(id),
                None => *head = Some(id),
            }
            *tail = Some(id);
        }

        for slot in &mut self.window[start..end] {
            *slot = None;
        }
    }

    fn accumulate_forwards(&mut self, id: DescId, acc: &mut Accumulators) {
        let Some(desc) = self.pool.get_mut(id) else {
            return;
        };
        acc.gpr.forward(&mut desc.gpr);
        acc.fpr.forward(&mut desc.fpr);
        if let Some(delay) = desc.delay {
            self.accumulate_forwards(delay, acc);
        }
    }

    fn accumulate_backwards(&mut self, id: DescId, acc: &mut Accumulators) {
        let delay = self.pool.get(id).and_then(|d| d.delay);
        if let Some(delay) = delay {
            self.accumulate_backwards(delay, acc);
        }
        if let Some(desc) = self.pool.get_mut(id) {
            acc.gpr.backward(&mut desc.gpr);
            acc.fpr.backward(&mut desc.fpr);
        }
    }
}

#[derive(Default)]
struct Accumulators {
    gpr: Live,
    fpr: Live,
}

#[derive(Default)]
struct Live {
    read: u64,
    write: u64,
}

impl Live {
    fn forward(&mut self, usage: &mut RegUsage) {
        self.read |= usage.used;
        self.write |= usage.modified;
        usage.liveread = self.read;
        usage.livewrite = self.write;
    }

    fn backward(&mut self, usage: &mut RegUsage) {
        self.read |= usage.used;
        self.write |= usage.modified;
        usage.liveread &= self.read;
        usage.livewrite &= self.write;
    }
}

/// Walks a descriptor chain in compile order.
pub struct ChainIter<'a> {
    pool: &'a DescPool,
    cur: Option<DescId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (DescId, &'a InsnDesc);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let desc = self.pool.get(id)?;
        self.cur = desc.next;
        Some((id, desc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat program at 0x8000_0000 (fixed mapped).
    struct Words {
        base: u32,
        words: Vec<u32>,
    }

    impl InsnSource for Words {
        fn translate_pc(&self, pc: u32) -> Option<u32> {
            Some(pc)
        }

        fn fetch(&mut self, physpc: u32) -> FetchedOp {
            let idx = (physpc.wrapping_sub(self.base) / 4) as usize;
            FetchedOp {
                word: self.words.get(idx).copied().unwrap_or(0),
                host: None,
            }
        }
    }

    const NOP: u32 = 0;
    const BASE: u32 = 0x8000_0000;

    fn run(words: Vec<u32>, maxseq: u32) -> (Sequencer, Vec<(u32, DescFlags)>) {
        let mut src = Words { base: BASE, words };
        let mut seq = Sequencer::new(MipsFlavor::Mips3, 64);
        let head = seq
            .describe_sequence(&mut src, BASE, BASE, BASE + 64, maxseq)
            .unwrap();
        let list = seq.chain(head).map(|(_, d)| (d.pc, d.flags)).collect();
        (seq, list)
    }

    #[test]
    fn self_loop_terminates() {
        // beq r0, r0, -1 ; addiu r4, r4, 1
        let (seq, list) = run(vec![0x1000_ffff, 0x2484_0001], 32);
        assert_eq!(list.len(), 1);
        let (pc, flags) = list[0];
        assert_eq!(pc, BASE);
        assert!(flags.contains(DescFlags::IS_BRANCH_TARGET | DescFlags::INTRABLOCK_BRANCH));
        // the branch plus its delay slot
        assert_eq!(seq.pool().live(), 2);
    }

    #[test]
    fn straight_line_ends_at_window() {
        let (_, list) = run(vec![NOP; 16], 32);
        assert_eq!(list.len(), 16);
        let (_, last) = list[15];
        assert!(last.contains(DescFlags::END_SEQUENCE | DescFlags::REDISPATCH));
        assert!(!list[14].1.contains(DescFlags::END_SEQUENCE));
    }

    #[test]
    fn max_sequence_splits() {
        let (_, list) = run(vec![NOP; 16], 4);
        let ends = list
            .iter()
            .filter(|(_, f)| f.contains(DescFlags::END_SEQUENCE))
            .count();
        assert_eq!(ends, 4);
        assert!(list[3].1.contains(DescFlags::END_SEQUENCE));
    }

    #[test]
    fn branch_target_splits_previous_instruction() {
        // 0: nop ; 4: nop ; 8: beq r1, r2, -2 (to 4) ; 12: nop ; 16: jr r31 ; 20: nop
        let words = vec![NOP, NOP, 0x1022_fffe, NOP, 0x03e0_0008, NOP];
        let (_, list) = run(words, 32);
        let pcs: Vec<u32> = list.iter().map(|(pc, _)| pc - BASE).collect();
        assert_eq!(pcs, vec![0, 4, 8, 12, 16]);
        assert!(list[0].1.contains(DescFlags::END_SEQUENCE));
        assert!(list[1].1.contains(DescFlags::IS_BRANCH_TARGET));
        assert!(list[4].1.contains(DescFlags::END_SEQUENCE));
    }

    #[test]
    fn delay_slots_link_back() {
        let words = vec![0x1422_0003, 0x2484_0001, NOP, NOP, NOP];
        let mut src = Words { base: BASE, words };
        let mut seq = Sequencer::new(MipsFlavor::Mips3, 64);
        let head = seq
            .describe_sequence(&mut src, BASE, BASE, BASE + 20, 32)
            .unwrap();
        let (id, branch) = seq.chain(head).next().unwrap();
        let delay = seq.desc(branch.delay.unwrap()).unwrap();
        assert!(delay.in_delay_slot());
        assert_eq!(delay.branch, Some(id));
        assert_eq!(delay.pc, BASE + 4);

        seq.release(head);
        assert_eq!(seq.pool().live(), 0);
    }

    #[test]
    fn liveness_is_scoped_to_sub_sequence() {
        // addiu r1, r0, 1 ; addu r2, r1, r1 ; jr r31 ; nop
        let words = vec![0x2401_0001, 0x0021_1021, 0x03e0_0008, NOP];
        let mut src = Words { base: BASE, words };
        let mut seq = Sequencer::new(MipsFlavor::Mips3, 64);
        let head = seq
            .describe_sequence(&mut src, BASE, BASE, BASE + 16, 32)
            .unwrap();
        let descs: Vec<&InsnDesc> = seq.chain(head).map(|(_, d)| d).collect();
        assert_eq!(descs.len(), 3);
        // r1 is read by the addu, r0 by every instruction
        assert_ne!(descs[1].gpr.liveread & (1 << 1), 0);
        assert_ne!(descs[0].gpr.liveread & 1, 0);
        assert_eq!(descs[0].gpr.liveread & (1 << 1), 0);
        // r31 is only read by the last instruction
        assert_eq!(descs[0].gpr.liveread & (1 << 31), 0);
        assert_ne!(descs[2].gpr.liveread & (1 << 31), 0);
    }

    #[test]
    fn untranslatable_fetch_ends_sequence() {
        struct Unmapped;
        impl InsnSource for Unmapped {
            fn translate_pc(&self, _pc: u32) -> Option<u32> {
                None
            }
            fn fetch(&mut self, _physpc: u32) -> FetchedOp {
                unreachable!()
            }
            fn is_fixed_mapped(&self, _pc: u32) -> bool {
                false
            }
        }
        let mut seq = Sequencer::new(MipsFlavor::Mips3, 64);
        let head = seq
            .describe_sequence(&mut Unmapped, 0x1000, 0x1000, 0x1040, 32)
            .unwrap();
        let list: Vec<_> = seq.chain(head).collect();
        assert_eq!(list.len(), 1);
        assert!(list[0].1.physpc.is_none());
        assert!(list[0].1.flags.contains(DescFlags::END_SEQUENCE | DescFlags::REDISPATCH));
    }
}
