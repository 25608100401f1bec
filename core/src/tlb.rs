//! Software TLB and the page-indexed translation table.
//!
//! Generated code never walks TLB entries. It indexes `table` by
//! `vaddr >> 12` and gets back the physical page plus permission
//! bits; the entries below only exist so that TLBR/TLBWI/TLBWR/TLBP
//! have something to operate on and so the table can be rebuilt.

/// Number of TLB entries (R4600-class).
pub const TLB_ENTRIES: usize = 48;
/// Number of 4 KiB pages in the 32-bit virtual space.
pub const TLB_TABLE_SIZE: usize = 1 << 20;

/// Page may be read but not written.
pub const TLB_NO_WRITE: u32 = 0x1;
/// Page may not be read (and therefore not executed).
pub const TLB_NO_READ: u32 = 0x2;
/// Table value for an unmapped page.
pub const TLB_UNMAPPED: u32 = 0xffff_ffff;
/// Bits of a table value that carry the physical page.
pub const TLB_PAGE_MASK: u32 = 0xffff_f000;

/// kseg0/kseg1: the always-resident, unmapped region.
pub const FIXED_MAP_START: u32 = 0x8000_0000;
pub const FIXED_MAP_END: u32 = 0xbfff_ffff;

/// One TLB entry as software sees it through COP0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlbEntry {
    pub page_mask: u64,
    pub entry_hi: u64,
    pub entry_lo: [u64; 2],
}

impl TlbEntry {
    #[inline]
    pub fn is_global(&self) -> bool {
        self.entry_lo[0] & self.entry_lo[1] & 1 != 0
    }

    #[inline]
    pub fn asid(&self) -> u8 {
        self.entry_hi as u8
    }

    /// Number of 4 KiB pages covered by each half of the pair.
    #[inline]
    pub fn pages_per_half(&self) -> u32 {
        (((self.page_mask >> 13) & 0xfff) as u32) + 1
    }

    /// First 4 KiB virtual page covered by the entry.
    #[inline]
    pub fn first_page(&self) -> u32 {
        let vpn = (((self.entry_hi >> 13) & 0x07ff_ffff) as u32) << 1;
        vpn & !(self.pages_per_half() * 2 - 1)
    }

    /// Whether the entry translates `vaddr` for address space `asid`.
    pub fn matches(&self, vaddr: u32, asid: u8) -> bool {
        let first = self.first_page();
        let page = vaddr >> 12;
        let span = self.pages_per_half() * 2;
        page.wrapping_sub(first) < span && (self.is_global() || self.asid() == asid)
    }
}

/// TLB entries plus the flat translation table derived from them.
pub struct Tlb {
    pub entries: [TlbEntry; TLB_ENTRIES],
    table: Box<[u32]>,
}

impl Tlb {
    /// An empty TLB: only the fixed kseg0/kseg1 mapping is present.
    pub fn new() -> Self {
        let mut tlb = Self {
            entries: [TlbEntry::default(); TLB_ENTRIES],
            table: vec![TLB_UNMAPPED; TLB_TABLE_SIZE].into_boxed_slice(),
        };
        tlb.map_fixed();
        tlb
    }

    /// Host pointer to the table; stable for the life of the TLB.
    #[inline]
    pub fn table_ptr(&self) -> *const u32 {
        self.table.as_ptr()
    }

    /// Raw table value for the page containing `vaddr`.
    #[inline]
    pub fn lookup(&self, vaddr: u32) -> u32 {
        self.table[(vaddr >> 12) as usize]
    }

    /// Translate `vaddr`, honouring the permission bits.
    pub fn translate(&self, vaddr: u32, write: bool) -> Option<u32> {
        let entry = self.lookup(vaddr);
        let deny = if write { TLB_NO_WRITE } else { TLB_NO_READ };
        if entry & deny != 0 {
            None
        } else {
            Some((entry & TLB_PAGE_MASK) | (vaddr & 0xfff))
        }
    }

    /// Whether `vaddr` lies in the unmapped kernel segments.
    #[inline]
    pub fn is_fixed_mapped(vaddr: u32) -> bool {
        (FIXED_MAP_START..=FIXED_MAP_END).contains(&vaddr)
    }

    /// Rebuild the whole table for address space `asid`.
    pub fn recompute(&mut self, asid: u8) {
        self.table.fill(TLB_UNMAPPED);
        self.map_fixed();
        for idx in 0..TLB_ENTRIES {
            self.map_entry(idx, asid);
        }
    }

    /// Replace entry `idx` and update the table incrementally.
    pub fn write_entry(&mut self, idx: usize, entry: TlbEntry, asid: u8) {
        if idx >= TLB_ENTRIES {
            return;
        }
        self.unmap_entry(idx);
        self.entries[idx] = entry;
        self.map_entry(idx, asid);
    }

    /// Index of the entry matching `entry_hi`, if any.
    pub fn probe(&self, entry_hi: u64) -> Option<usize> {
        let vaddr = (entry_hi as u32) & 0xffff_e000;
        let asid = entry_hi as u8;
        self.entries.iter().position(|e| e.matches(vaddr, asid))
    }

    fn map_fixed(&mut self) {
        let first = FIXED_MAP_START >> 12;
        let last = FIXED_MAP_END >> 12;
        for page in first..=last {
            self.table[page as usize] = (page << 12) & 0x1fff_f000;
        }
    }

    fn map_entry(&mut self, idx: usize, asid: u8) {
        let entry = self.entries[idx];
        if !entry.is_global() && entry.asid() != asid {
            return;
        }
        let count = entry.pages_per_half();
        let first = entry.first_page();
        for (half, &lo) in entry.entry_lo.iter().enumerate() {
            if lo & 2 == 0 {
                continue;
            }
            let pfn = ((lo >> 6) & 0x00ff_ffff) as u32;
            let flags = if lo & 4 == 0 { TLB_NO_WRITE } else { 0 };
            for i in 0..count {
                let page = first + half as u32 * count + i;
                if Self::is_fixed_page(page) || page as usize >= TLB_TABLE_SIZE {
                    continue;
                }
                self.table[page as usize] = (pfn.wrapping_add(i) << 12) | flags;
            }
        }
    }

    fn unmap_entry(&mut self, idx: usize) {
        let entry = self.entries[idx];
        let count = entry.pages_per_half();
        let first = entry.first_page();
        for page in first..first.saturating_add(count * 2) {
            if Self::is_fixed_page(page) || page as usize >= TLB_TABLE_SIZE {
                continue;
            }
            self.table[page as usize] = TLB_UNMAPPED;
        }
    }

    #[inline]
    fn is_fixed_page(page: u32) -> bool {
        (FIXED_MAP_START >> 12..=FIXED_MAP_END >> 12).contains(&page)
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(vaddr: u32, pfn0: u32, pfn1: u32, asid: u8, dirty: bool) -> TlbEntry {
        let d = if dirty { 4 } else { 0 };
        TlbEntry {
            page_mask: 0,
            entry_hi: ((vaddr & 0xffff_e000) | asid as u32) as u64,
            entry_lo: [
                ((pfn0 as u64) << 6) | 2 | d,
                ((pfn1 as u64) << 6) | 2 | d,
            ],
        }
    }

    #[test]
    fn kseg_is_fixed_mapped() {
        let tlb = Tlb::new();
        assert_eq!(tlb.translate(0x8000_1234, false), Some(0x0000_1234));
        assert_eq!(tlb.translate(0xbfc0_0000, true), Some(0x1fc0_0000));
        assert_eq!(tlb.translate(0x0040_0000, false), None);
        assert_eq!(tlb.lookup(0xc000_0000), TLB_UNMAPPED);
    }

    #[test]
    fn write_maps_both_halves() {
        let mut tlb = Tlb::new();
        tlb.write_entry(3, entry(0x0040_0000, 0x100, 0x200, 0, true), 0);
        assert_eq!(tlb.translate(0x0040_0010, false), Some(0x0010_0010));
        assert_eq!(tlb.translate(0x0040_1ffc, true), Some(0x0020_0ffc));
        assert_eq!(tlb.probe(0x0040_0000), Some(3));
    }

    #[test]
    fn clean_page_is_read_only() {
        let mut tlb = Tlb::new();
        tlb.write_entry(0, entry(0x1000_0000, 0x10, 0x11, 0, false), 0);
        assert!(tlb.translate(0x1000_0000, false).is_some());
        assert_eq!(tlb.translate(0x1000_0000, true), None);
    }

    #[test]
    fn asid_mismatch_leaves_page_unmapped() {
        let mut tlb = Tlb::new();
        tlb.write_entry(1, entry(0x0800_0000, 0x30, 0x31, 5, true), 7);
        assert_eq!(tlb.lookup(0x0800_0000), TLB_UNMAPPED);
        tlb.recompute(5);
        assert_ne!(tlb.lookup(0x0800_0000), TLB_UNMAPPED);
    }

    #[test]
    fn overwrite_unmaps_previous_pages() {
        let mut tlb = Tlb::new();
        tlb.write_entry(2, entry(0x0040_0000, 0x100, 0x101, 0, true), 0);
        tlb.write_entry(2, entry(0x0060_0000, 0x100, 0x101, 0, true), 0);
        assert_eq!(tlb.lookup(0x0040_0000), TLB_UNMAPPED);
        assert!(tlb.translate(0x0060_0000, false).is_some());
    }
}
