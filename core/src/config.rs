//! Recompiler configuration.

/// Default code cache size: 16 MiB.
pub const DEFAULT_CACHE_SIZE: usize = 16 * 1024 * 1024;
/// Default maximum number of instructions in one sub-sequence.
pub const DEFAULT_MAX_SEQUENCE: u32 = 32;
/// Bytes explored before the entry PC.
pub const DEFAULT_WINDOW_BEFORE: u32 = 128;
/// Bytes explored after the entry PC.
pub const DEFAULT_WINDOW_AFTER: u32 = 512;
/// Maximum number of hotspot entries consulted by the compiler.
pub const MAX_HOTSPOTS: usize = 16;

/// Guest CPU feature level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MipsFlavor {
    #[default]
    Mips3,
    Mips4,
}

/// A known-slow (pc, opcode) pair and the extra cycles to charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hotspot {
    pub pc: u32,
    pub opcode: u32,
    pub cycles: u32,
}

/// Options shared by the recompiler and the reference interpreter.
#[derive(Debug, Clone)]
pub struct DrcConfig {
    pub flavor: MipsFlavor,
    pub big_endian: bool,
    pub cache_size: usize,
    pub max_sequence: u32,
    pub window_before: u32,
    pub window_after: u32,
    /// One instruction per sequence, with a debug hook call before
    /// each instruction.
    pub single_step: bool,
    /// Check COP0 usability in user/supervisor mode.
    pub strict_cop0: bool,
    /// Check SR.CU1 before every COP1/COP1X instruction.
    pub strict_cop1: bool,
    /// Extra cycles charged on MFC0 Count / Cause reads, to speed up
    /// guests polling those registers.
    pub count_read_cycles: u32,
    pub cause_read_cycles: u32,
    pub hotspots: Vec<Hotspot>,
}

impl Default for DrcConfig {
    fn default() -> Self {
        Self {
            flavor: MipsFlavor::Mips3,
            big_endian: true,
            cache_size: DEFAULT_CACHE_SIZE,
            max_sequence: DEFAULT_MAX_SEQUENCE,
            window_before: DEFAULT_WINDOW_BEFORE,
            window_after: DEFAULT_WINDOW_AFTER,
            single_step: false,
            strict_cop0: false,
            strict_cop1: false,
            count_read_cycles: 0,
            cause_read_cycles: 0,
            hotspots: Vec::new(),
        }
    }
}

impl DrcConfig {
    pub fn with_flavor(mut self, flavor: MipsFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn with_big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_max_sequence(mut self, max: u32) -> Self {
        self.max_sequence = max.max(1);
        self
    }

    pub fn with_single_step(mut self, on: bool) -> Self {
        self.single_step = on;
        self
    }

    pub fn with_strict_cop0(mut self, on: bool) -> Self {
        self.strict_cop0 = on;
        self
    }

    pub fn with_strict_cop1(mut self, on: bool) -> Self {
        self.strict_cop1 = on;
        self
    }

    /// Add a hotspot; entries past [`MAX_HOTSPOTS`] are dropped.
    pub fn with_hotspot(mut self, pc: u32, opcode: u32, cycles: u32) -> Self {
        if self.hotspots.len() < MAX_HOTSPOTS {
            self.hotspots.push(Hotspot { pc, opcode, cycles });
        } else {
            log::warn!("hotspot table full, ignoring {pc:#010x}");
        }
        self
    }

    #[inline]
    pub fn is_mips4(&self) -> bool {
        self.flavor >= MipsFlavor::Mips4
    }

    /// Sub-sequence length limit actually applied.
    #[inline]
    pub fn sequence_limit(&self) -> u32 {
        if self.single_step {
            1
        } else {
            self.max_sequence.max(1)
        }
    }

    /// Extra cycles for an instruction at `pc` with word `op`.
    pub fn hotspot_cycles(&self, pc: u32, op: u32) -> u32 {
        self.hotspots
            .iter()
            .filter(|h| h.pc == pc && h.opcode == op)
            .map(|h| h.cycles)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_step_limits_sequences() {
        let cfg = DrcConfig::default().with_single_step(true);
        assert_eq!(cfg.sequence_limit(), 1);
        assert_eq!(DrcConfig::default().sequence_limit(), DEFAULT_MAX_SEQUENCE);
    }

    #[test]
    fn hotspot_table_is_bounded() {
        let mut cfg = DrcConfig::default();
        for i in 0..(MAX_HOTSPOTS as u32 + 4) {
            cfg = cfg.with_hotspot(i * 4, 0x1000_ffff, 100);
        }
        assert_eq!(cfg.hotspots.len(), MAX_HOTSPOTS);
        assert_eq!(cfg.hotspot_cycles(8, 0x1000_ffff), 100);
        assert_eq!(cfg.hotspot_cycles(8, 0), 0);
    }
}
