//! Directly addressable RAM windows.
//!
//! A window maps a physical range onto host memory laid out as
//! host-native 32-bit words (the [`SimpleRam`] layout). Trampolines
//! test windows in registration order and touch the host bytes
//! directly; only accesses that miss every window reach the bus.
//!
//! [`SimpleRam`]: mips3_core::SimpleRam

use std::ptr::NonNull;

use mips3_core::{MipsState, Tlb};
use mips3_frontend::{FetchedOp, InsnSource};

/// One registered fast RAM window.
#[derive(Debug, Clone, Copy)]
pub struct FastRam {
    pub start: u32,
    /// Inclusive.
    pub end: u32,
    pub readonly: bool,
    pub base: NonNull<u8>,
}

impl FastRam {
    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr <= self.end
    }

    /// Host pointer to the word holding physical `addr`.
    #[inline]
    pub fn word_ptr(&self, addr: u32) -> NonNull<u32> {
        let off = ((addr & !3) - self.start) as usize;
        // SAFETY: registration guarantees the window covers `addr`.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(off) as *mut u32) }
    }

    /// Displacement added to a physical address to reach host memory.
    #[inline]
    pub fn bias(&self) -> u64 {
        (self.base.as_ptr() as u64).wrapping_sub(self.start as u64)
    }
}

/// Instruction fetch through the guest TLB, preferring fast RAM.
pub(crate) struct GuestFetch<'a> {
    pub state: &'a mut MipsState,
    pub fastram: &'a [FastRam],
}

impl InsnSource for GuestFetch<'_> {
    fn translate_pc(&self, pc: u32) -> Option<u32> {
        self.state.tlb.translate(pc, false)
    }

    fn fetch(&mut self, physpc: u32) -> FetchedOp {
        if let Some(win) = self.fastram.iter().find(|w| w.contains(physpc)) {
            let ptr = win.word_ptr(physpc);
            // SAFETY: window memory stays valid while registered.
            let word = unsafe { ptr.as_ptr().read() };
            return FetchedOp {
                word,
                host: Some(ptr),
            };
        }
        FetchedOp {
            word: self.state.bus.read_word(physpc),
            host: None,
        }
    }

    fn is_fixed_mapped(&self, pc: u32) -> bool {
        Tlb::is_fixed_mapped(pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_addressing() {
        let mut mem = vec![0u32; 4];
        mem[2] = 0x1234_5678;
        let win = FastRam {
            start: 0x1000,
            end: 0x100f,
            readonly: false,
            base: NonNull::new(mem.as_mut_ptr() as *mut u8).unwrap(),
        };
        assert!(win.contains(0x100f));
        assert!(!win.contains(0x1010));
        assert_eq!(unsafe { *win.word_ptr(0x100a).as_ptr() }, 0x1234_5678);
        assert_eq!(win.bias().wrapping_add(0x1008), mem.as_ptr() as u64 + 8);
    }
}
