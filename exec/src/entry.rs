//! Two-level guest PC → host code table walked by the dispatcher.
//!
//! The top level is indexed by `pc >> 16`, the second by
//! `(pc >> 2) & 0x3fff`. Both levels hold raw host addresses so the
//! dispatch stub can do two indexed loads and an indirect jump.
//! Unpopulated top-level slots share one second level filled with
//! the miss stub.

pub const L1_BITS: u32 = 16;
pub const L2_BITS: u32 = 14;
const L1_SIZE: usize = 1 << L1_BITS;
const L2_SIZE: usize = 1 << L2_BITS;
pub const L2_MASK: u32 = (L2_SIZE - 1) as u32;

const NO_L2: u32 = u32::MAX;

pub struct EntryTable {
    l1: Box<[u64]>,
    /// Which `l2` block backs each top-level slot.
    l1_index: Box<[u32]>,
    l2: Vec<Box<[u64]>>,
    empty: Box<[u64]>,
    miss: u64,
}

impl EntryTable {
    pub fn new() -> Self {
        let empty = vec![0u64; L2_SIZE].into_boxed_slice();
        let empty_addr = empty.as_ptr() as u64;
        Self {
            l1: vec![empty_addr; L1_SIZE].into_boxed_slice(),
            l1_index: vec![NO_L2; L1_SIZE].into_boxed_slice(),
            l2: Vec::new(),
            empty,
            miss: 0,
        }
    }

    /// Drop every entry; lookups now land on `miss`.
    pub fn reset(&mut self, miss: u64) {
        self.miss = miss;
        self.empty.fill(miss);
        self.l2.clear();
        let empty_addr = self.empty.as_ptr() as u64;
        self.l1.fill(empty_addr);
        self.l1_index.fill(NO_L2);
    }

    /// Base of the top-level table, embedded in the dispatch stub.
    pub fn l1_ptr(&self) -> *const u64 {
        self.l1.as_ptr()
    }

    #[inline]
    fn split(pc: u32) -> (usize, usize) {
        ((pc >> L1_BITS) as usize, ((pc >> 2) & L2_MASK) as usize)
    }

    /// Host code for `pc`, if any has been registered.
    pub fn lookup(&self, pc: u32) -> Option<u64> {
        let (hi, lo) = Self::split(pc);
        match self.l1_index[hi] {
            NO_L2 => None,
            idx => {
                let addr = self.l2[idx as usize][lo];
                (addr != self.miss).then_some(addr)
            }
        }
    }

    pub fn contains(&self, pc: u32) -> bool {
        self.lookup(pc).is_some()
    }

    /// Point `pc` at `addr`, replacing any previous entry.
    pub fn register(&mut self, pc: u32, addr: u64) {
        let (hi, lo) = Self::split(pc);
        let idx = match self.l1_index[hi] {
            NO_L2 => {
                let block = vec![self.miss; L2_SIZE].into_boxed_slice();
                self.l1[hi] = block.as_ptr() as u64;
                self.l2.push(block);
                let idx = (self.l2.len() - 1) as u32;
                self.l1_index[hi] = idx;
                idx
            }
            idx => idx,
        };
        self.l2[idx as usize][lo] = addr;
    }

    /// Number of populated second-level blocks.
    pub fn blocks(&self) -> usize {
        self.l2.len()
    }
}

impl Default for EntryTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_until_registered() {
        let mut t = EntryTable::new();
        t.reset(0x100);
        assert_eq!(t.lookup(0x8000_0000), None);
        t.register(0x8000_0000, 0x5000);
        assert_eq!(t.lookup(0x8000_0000), Some(0x5000));
        assert_eq!(t.lookup(0x8000_0004), None);
        assert_eq!(t.blocks(), 1);
    }

    #[test]
    fn register_overwrites() {
        let mut t = EntryTable::new();
        t.reset(0x100);
        t.register(0xbfc0_0000, 1);
        t.register(0xbfc0_0000, 2);
        assert_eq!(t.lookup(0xbfc0_0000), Some(2));
    }

    #[test]
    fn unpopulated_slots_share_miss_block() {
        let mut t = EntryTable::new();
        t.reset(0x100);
        let l1 = t.l1_ptr();
        let block = unsafe { *l1.add(0x1234) } as *const u64;
        assert_eq!(unsafe { *block.add(7) }, 0x100);
        t.reset(0x200);
        assert_eq!(unsafe { *block.add(7) }, 0x200);
        assert_eq!(t.blocks(), 0);
    }
}
