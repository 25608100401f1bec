//! Descriptor arena.
//!
//! Descriptors are addressed by [`DescId`], an index plus the
//! generation of the slot when it was handed out. Releasing a slot
//! bumps its generation, so a stale id can never reach a recycled
//! descriptor: lookups through it return `None`.

use mips3_core::{Error, Result};

use crate::desc::InsnDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescId {
    index: u32,
    generation: u32,
}

impl DescId {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

struct Slot {
    generation: u32,
    desc: Option<InsnDesc>,
}

pub struct DescPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    limit: usize,
}

impl DescPool {
    /// An arena that never holds more than `limit` live descriptors.
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            limit,
        }
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Raise the live-descriptor bound; never lowers it.
    pub fn reserve_limit(&mut self, limit: usize) {
        self.limit = self.limit.max(limit);
    }

    /// Number of descriptors currently handed out.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn alloc(&mut self, desc: InsnDesc) -> Result<DescId> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.desc = Some(desc);
            return Ok(DescId {
                index,
                generation: slot.generation,
            });
        }
        if self.slots.len() >= self.limit {
            return Err(Error::ArenaExhausted { limit: self.limit });
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            desc: Some(desc),
        });
        Ok(DescId {
            index,
            generation: 0,
        })
    }

    pub fn get(&self, id: DescId) -> Option<&InsnDesc> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.desc.as_ref()
    }

    pub fn get_mut(&mut self, id: DescId) -> Option<&mut InsnDesc> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.desc.as_mut()
    }

    /// Return one descriptor and, recursively, its delay slot.
    pub fn release(&mut self, id: DescId) {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        if slot.generation != id.generation {
            return;
        }
        let Some(desc) = slot.desc.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        if let Some(delay) = desc.delay {
            self.release(delay);
        }
    }

    /// Release a whole `next`-linked chain.
    pub fn release_chain(&mut self, head: Option<DescId>) {
        let mut cur = head;
        while let Some(id) = cur {
            cur = self.get(id).and_then(|d| d.next);
            self.release(id);
        }
    }
}
