//! Executable memory pages for compiled traces (spec.md §4.11).
//!
//! Pages are allocated write-only (`PROT_READ | PROT_WRITE`), filled with
//! machine code, then transitioned to `PROT_READ | PROT_EXEC` before first
//! use — never RWX at once, so a code-generation bug can't be exploited as
//! an arbitrary-write-then-execute primitive.

use std::ffi::c_void;

/// An owned, page-aligned block of memory that has been written to and is
/// now executable. Dropping it unmaps the pages.
pub struct ExecutableMemory {
    ptr: *mut c_void,
    len: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("JIT page allocation failed: {0}")]
pub struct MmapError(pub String);

impl ExecutableMemory {
    /// Writes `code` into a freshly mapped page-aligned region, then flips
    /// it RX. `code` must already be valid machine code for the host
    /// architecture — this function does no verification.
    pub fn new(code: &[u8]) -> Result<Self, MmapError> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let len = code.len().div_ceil(page_size) * page_size;

        // SAFETY: `len` is a positive multiple of the page size; the
        // requested protection/flags are a plain anonymous mapping with no
        // file backing, which `mmap` supports unconditionally on the
        // platforms this crate targets.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MmapError(std::io::Error::last_os_error().to_string()));
        }

        // SAFETY: `ptr` was just mapped above with write access and is
        // large enough to hold `code.len()` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr.cast::<u8>(), code.len());
        }

        // SAFETY: `ptr`/`len` describe exactly the mapping created above.
        let rc = unsafe { libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_EXEC) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: `ptr`/`len` describe exactly the mapping created above.
            unsafe {
                libc::munmap(ptr, len);
            }
            return Err(MmapError(err.to_string()));
        }

        Ok(Self { ptr, len })
    }

    /// Returns the page as a callable function pointer. The caller is
    /// responsible for matching `F`'s ABI to the bytes written by the
    /// codegen that produced this page.
    ///
    /// # Safety
    /// `F` must exactly match the calling convention and signature the
    /// machine code at `self.ptr` was generated for.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        let fn_ptr = self.ptr as usize;
        std::mem::transmute_copy::<usize, F>(&fn_ptr)
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        // SAFETY: `self.ptr`/`self.len` describe exactly the mapping this
        // value owns, created in `new` and never shared.
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}
