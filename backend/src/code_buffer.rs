use std::io;
use std::ptr;

/// Code cache backed by an anonymous mapping.
///
/// The mapping is readable, writable and executable at once: the
/// memory trampolines rewrite their callers' displacements while
/// generated code is running, so W^X toggling is not an option.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
}

// SAFETY: CodeBuffer owns its mapping exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Map a buffer of `size` bytes, rounded up to the page size.
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size.max(1) + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        log::debug!("code cache mapped: {size} bytes at {ptr:p}");
        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
        })
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    /// Discard everything emitted so far.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Host address of the byte at `offset`.
    #[inline]
    pub fn addr_at(&self, offset: usize) -> u64 {
        assert!(offset <= self.size);
        self.ptr as u64 + offset as u64
    }

    /// Host address of the current write position.
    #[inline]
    pub fn current_addr(&self) -> u64 {
        self.addr_at(self.offset)
    }

    /// Buffer offset of a host address inside the mapping.
    pub fn offset_of_addr(&self, addr: u64) -> Option<usize> {
        let base = self.ptr as u64;
        (addr >= base && addr < base + self.size as u64).then(|| (addr - base) as usize)
    }

    // -- Emit methods --

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        assert!(self.offset < self.size, "code buffer overflow");
        unsafe { self.ptr.add(self.offset).write(val) };
        self.offset += 1;
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        assert!(self.offset + 4 <= self.size, "code buffer overflow");
        unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
        self.offset += 4;
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        assert!(self.offset + 8 <= self.size, "code buffer overflow");
        unsafe { (self.ptr.add(self.offset) as *mut u64).write_unaligned(val) };
        self.offset += 8;
    }

    /// Patch a u32 at `offset` (back-patching jump displacements).
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size);
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size);
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }

    /// Emitted code up to the current offset.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset lies inside the mapping.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }

    /// Bytes emitted since `start`.
    pub fn slice_from(&self, start: usize) -> &[u8] {
        &self.as_slice()[start.min(self.offset)..]
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
