//! Executable code pages
//!
//! One private, anonymous page per compiled function: mapped read/write,
//! filled, then flipped to read/execute. The runtime keeps every page in a
//! list so shutdown can unmap them all; a page dropped before protection
//! (failed compilation) simply unmaps.

use super::CodegenError;

/// Fixed code capacity per compiled function.
pub const PAGE_SIZE: usize = 4096;

/// A single mapped code region.
pub struct CodePage {
    base: *mut u8,
    size: usize,
}

impl CodePage {
    /// Map a fresh read/write region. Mapping failure is survivable: the
    /// caller falls back to the interpreter.
    pub fn new(size: usize) -> Result<CodePage, CodegenError> {
        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(CodegenError::Failure);
        }
        Ok(CodePage {
            base: base as *mut u8,
            size,
        })
    }

    /// Base address (also the function entry point).
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Copy the generated code into the page. The caller has checked the
    /// size against [`PAGE_SIZE`].
    pub fn fill(&self, code: &[u8]) {
        assert!(code.len() <= self.size);
        unsafe {
            core::ptr::copy_nonoverlapping(code.as_ptr(), self.base, code.len());
        }
    }

    /// Drop write access, allow execution.
    pub fn protect_exec(&self) -> Result<(), CodegenError> {
        let rc = unsafe {
            libc::mprotect(
                self.base as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(CodegenError::Failure);
        }
        Ok(())
    }
}

impl Drop for CodePage {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}
