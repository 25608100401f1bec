//! Physical memory interface used when an access misses every fast
//! RAM window.

/// Generic physical-address memory handlers.
///
/// Addresses are physical (after TLB or kseg translation) and
/// naturally aligned for the access width. Values are in guest
/// register order; the implementation owns the byte order.
pub trait MemoryBus {
    fn read_byte(&mut self, addr: u32) -> u8;
    fn read_half(&mut self, addr: u32) -> u16;
    fn read_word(&mut self, addr: u32) -> u32;
    fn read_dword(&mut self, addr: u32) -> u64;

    fn write_byte(&mut self, addr: u32, value: u8);
    fn write_half(&mut self, addr: u32, value: u16);
    fn write_word(&mut self, addr: u32, value: u32);
    fn write_dword(&mut self, addr: u32, value: u64);

    /// Write the bits of `value` not covered by `keep`; bits set in
    /// `keep` retain their old memory contents.
    fn write_word_masked(&mut self, addr: u32, value: u32, keep: u32) {
        let old = self.read_word(addr);
        self.write_word(addr, (old & keep) | (value & !keep));
    }

    fn write_dword_masked(&mut self, addr: u32, value: u64, keep: u64) {
        let old = self.read_dword(addr);
        self.write_dword(addr, (old & keep) | (value & !keep));
    }
}

/// Flat RAM stored as host-native 32-bit words.
///
/// Guest words sit at their natural word index, so the storage can
/// also be registered as a fast RAM window: big-endian byte lanes
/// are reached with `addr ^ 3`, halfwords with `addr ^ 2`, and
/// doublewords are two words with the high half first.
pub struct SimpleRam {
    base: u32,
    words: Vec<u32>,
    big_endian: bool,
}

impl SimpleRam {
    /// RAM covering `[base, base + size)`; `size` is rounded up to a
    /// whole doubleword.
    pub fn new(base: u32, size: usize, big_endian: bool) -> Self {
        let words = (size + 7) / 8 * 2;
        Self {
            base,
            words: vec![0; words],
            big_endian,
        }
    }

    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.words.len() * 4
    }

    /// Last valid physical address.
    #[inline]
    pub fn end(&self) -> u32 {
        self.base.wrapping_add(self.size() as u32).wrapping_sub(1)
    }

    /// Host pointer to the first byte of storage, for fast RAM
    /// registration. Valid for the lifetime of `self`.
    pub fn host_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr() as *mut u8
    }

    /// Store a run of instruction words starting at `addr`.
    pub fn load_words(&mut self, addr: u32, words: &[u32]) {
        for (i, &w) in words.iter().enumerate() {
            self.write_word(addr.wrapping_add(i as u32 * 4), w);
        }
    }

    fn index(&self, addr: u32) -> Option<usize> {
        let off = addr.wrapping_sub(self.base) as usize;
        let idx = off >> 2;
        (idx < self.words.len()).then_some(idx)
    }

    fn lane_shift(&self, addr: u32, width: u32) -> u32 {
        let lane = addr & (4 - width);
        if self.big_endian {
            8 * (4 - width - lane)
        } else {
            8 * lane
        }
    }
}

impl MemoryBus for SimpleRam {
    fn read_byte(&mut self, addr: u32) -> u8 {
        match self.index(addr) {
            Some(i) => (self.words[i] >> self.lane_shift(addr, 1)) as u8,
            None => 0xff,
        }
    }

    fn read_half(&mut self, addr: u32) -> u16 {
        match self.index(addr) {
            Some(i) => (self.words[i] >> self.lane_shift(addr, 2)) as u16,
            None => 0xffff,
        }
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        match self.index(addr) {
            Some(i) => self.words[i],
            None => 0xffff_ffff,
        }
    }

    fn read_dword(&mut self, addr: u32) -> u64 {
        let lo_addr = addr & !7;
        let first = self.read_word(lo_addr) as u64;
        let second = self.read_word(lo_addr + 4) as u64;
        if self.big_endian {
            (first << 32) | second
        } else {
            first | (second << 32)
        }
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        if let Some(i) = self.index(addr) {
            let shift = self.lane_shift(addr, 1);
            self.words[i] = (self.words[i] & !(0xff << shift)) | ((value as u32) << shift);
        }
    }

    fn write_half(&mut self, addr: u32, value: u16) {
        if let Some(i) = self.index(addr) {
            let shift = self.lane_shift(addr, 2);
            self.words[i] = (self.words[i] & !(0xffff << shift)) | ((value as u32) << shift);
        }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        if let Some(i) = self.index(addr) {
            self.words[i] = value;
        }
    }

    fn write_dword(&mut self, addr: u32, value: u64) {
        let lo_addr = addr & !7;
        let (first, second) = if self.big_endian {
            ((value >> 32) as u32, value as u32)
        } else {
            (value as u32, (value >> 32) as u32)
        };
        self.write_word(lo_addr, first);
        self.write_word(lo_addr + 4, second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_lanes() {
        let mut ram = SimpleRam::new(0, 64, true);
        ram.write_word(0, 0x1122_3344);
        assert_eq!(ram.read_byte(0), 0x11);
        assert_eq!(ram.read_byte(3), 0x44);
        assert_eq!(ram.read_half(2), 0x3344);
        ram.write_byte(1, 0xaa);
        assert_eq!(ram.read_word(0), 0x11aa_3344);
    }

    #[test]
    fn little_endian_lanes() {
        let mut ram = SimpleRam::new(0x1000, 64, false);
        ram.write_word(0x1000, 0x1122_3344);
        assert_eq!(ram.read_byte(0x1000), 0x44);
        assert_eq!(ram.read_half(0x1002), 0x1122);
    }

    #[test]
    fn doubleword_order_follows_endianness() {
        let mut be = SimpleRam::new(0, 64, true);
        be.write_dword(8, 0x0102_0304_0506_0708);
        assert_eq!(be.read_word(8), 0x0102_0304);
        assert_eq!(be.read_dword(8), 0x0102_0304_0506_0708);

        let mut le = SimpleRam::new(0, 64, false);
        le.write_dword(8, 0x0102_0304_0506_0708);
        assert_eq!(le.read_word(8), 0x0506_0708);
    }

    #[test]
    fn masked_write_keeps_selected_bits() {
        let mut ram = SimpleRam::new(0, 16, true);
        ram.write_word(4, 0xaabb_ccdd);
        ram.write_word_masked(4, 0x1122_3344, 0xffff_0000);
        assert_eq!(ram.read_word(4), 0xaabb_3344);
    }

    #[test]
    fn out_of_range_reads_float_high() {
        let mut ram = SimpleRam::new(0, 16, true);
        assert_eq!(ram.read_word(0x100), 0xffff_ffff);
        ram.write_word(0x100, 0);
    }
}
