//! Call-site to finisher map for faulting memory accesses.
//!
//! A memory access is a `call` into a trampoline. When the TLB
//! refuses the access, the trampoline has no caller-specific code to
//! jump to, so it hands its own return address to
//! [`helper_find_fault_handler`] and continues at whatever finisher
//! the compiler registered for that call site.

use std::collections::HashMap;

/// Fault sites of everything currently in the code cache.
///
/// Boxed by the owner so generated code can embed its address.
#[derive(Debug, Default)]
pub struct FaultSites {
    sites: HashMap<u64, u64>,
    /// Where to go when a return address has no entry.
    lost: u64,
    /// Return address of the last unresolved fault.
    last_lost: Option<u64>,
}

impl FaultSites {
    /// Forget every site; `lost` is the stub reporting a missing one.
    pub fn reset(&mut self, lost: u64) {
        self.sites.clear();
        self.lost = lost;
        self.last_lost = None;
    }

    /// Take the call site of the last fault that had no finisher.
    pub fn take_lost(&mut self) -> Option<u64> {
        self.last_lost.take()
    }

    /// Route faults of the call returning to `ret` to `finisher`.
    pub fn insert(&mut self, ret: u64, finisher: u64) {
        self.sites.insert(ret, finisher);
    }

    pub fn get(&self, ret: u64) -> Option<u64> {
        self.sites.get(&ret).copied()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }
}

/// Resolve the finisher of the access that returned to `ret`.
///
/// Called from the find-handler stub after it has popped the
/// trampoline's return address, so the stack is back at the frame's
/// aligned depth.
///
/// # Safety
/// `sites` must point to a live [`FaultSites`].
pub unsafe extern "C" fn helper_find_fault_handler(sites: *mut FaultSites, ret: u64) -> u64 {
    let sites = &mut *sites;
    match sites.get(ret) {
        Some(finisher) => finisher,
        None => {
            log::warn!("memory fault at unregistered call site {ret:#x}");
            sites.last_lost = Some(ret);
            sites.lost
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_site_resolves() {
        let mut f = FaultSites::default();
        f.reset(0xdead);
        f.insert(0x1000, 0x2000);
        let got = unsafe { helper_find_fault_handler(&mut f, 0x1000) };
        assert_eq!(got, 0x2000);
    }

    #[test]
    fn unknown_site_goes_to_lost_stub() {
        let mut f = FaultSites::default();
        f.reset(0xdead);
        assert_eq!(unsafe { helper_find_fault_handler(&mut f, 0x1234) }, 0xdead);
        assert_eq!(f.take_lost(), Some(0x1234));
        assert_eq!(f.take_lost(), None);
        f.insert(0x1234, 1);
        f.reset(0xbeef);
        assert_eq!(f.len(), 0);
        assert_eq!(unsafe { helper_find_fault_handler(&mut f, 0x1234) }, 0xbeef);
    }
}
