//! Anonymous shared memory.
//!
//! A fixed array of `AtomicU64` backed by a `MAP_SHARED | MAP_ANONYMOUS`
//! mapping. Created in the master before any fork, so every process in the
//! tree sees the same physical pages.

use std::io;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicU64;

/// Fixed-size array of atomics shared across forked processes.
#[derive(Debug)]
pub struct SharedSlots {
    ptr: NonNull<AtomicU64>,
    len: usize,
}

// The mapping only holds atomics, so shared access from any thread is fine.
unsafe impl Send for SharedSlots {}
unsafe impl Sync for SharedSlots {}

impl SharedSlots {
    /// Map `len` zeroed slots.
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared region needs at least one slot",
            ));
        }
        let bytes = len
            .checked_mul(size_of::<AtomicU64>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "shared region too large"))?;

        // SAFETY: fresh anonymous mapping, no existing memory is aliased.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr as *mut AtomicU64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;

        Ok(Self { ptr, len })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All slots. Anonymous mappings are zero-filled, and a zeroed
    /// `AtomicU64` is a valid value.
    pub fn slots(&self) -> &[AtomicU64] {
        // SAFETY: the mapping is page aligned, `len` slots long and lives
        // until drop.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for SharedSlots {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly what `new` mapped, in this process only.
        unsafe {
            libc::munmap(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.len * size_of::<AtomicU64>(),
            );
        }
    }
}
