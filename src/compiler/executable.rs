//! JitKernel: generated eltwise code plus the means to run it.
//!
//! On an AArch64 host whose capabilities match the kernel's target, the code
//! lives in an mmap'd executable region and is called through a function
//! pointer. Otherwise the same bytes run in [`crate::compiler::emu`].

use crate::compiler::codegen::{KernelArgs, KernelConf};
use crate::compiler::emu::Machine;
use crate::dispatch::CpuCaps;
use crate::types::{JitError, JitResult};

/// Signature of a generated kernel.
pub type KernelFn = unsafe extern "C" fn(*const KernelArgs);

enum Backing {
    Native(ExecutableBuffer),
    Emulated(Vec<u8>),
}

/// A generated, ready-to-call eltwise kernel.
pub struct JitKernel {
    conf: KernelConf,
    backing: Backing,
    code_size: usize,
}

impl JitKernel {
    /// Wrap freshly generated code for execution under `caps`.
    pub fn new(conf: KernelConf, code: Vec<u8>, caps: &CpuCaps) -> JitResult<Self> {
        let code_size = code.len();
        let backing = if runs_natively(&conf, caps) {
            Backing::Native(ExecutableBuffer::new(&code)?)
        } else {
            Backing::Emulated(code)
        };
        Ok(JitKernel { conf, backing, code_size })
    }

    pub fn conf(&self) -> &KernelConf {
        &self.conf
    }

    /// Size of the machine code including the constants table.
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    pub fn is_native(&self) -> bool {
        matches!(self.backing, Backing::Native(_))
    }

    /// Run the kernel once over `args.work_amount` elements.
    ///
    /// # Safety
    /// `src` (and `diff_dst` for backward kernels) must be readable and `dst`
    /// writable for `work_amount` elements of the kernel's element type.
    pub unsafe fn call(&self, args: &KernelArgs) -> JitResult<()> {
        match &self.backing {
            Backing::Native(buf) => {
                // SAFETY: the buffer holds a complete routine with this ABI.
                let f: KernelFn = unsafe { std::mem::transmute(buf.ptr) };
                unsafe { f(args as *const KernelArgs) };
                Ok(())
            }
            Backing::Emulated(code) => {
                let mut machine = Machine::new(self.conf.target.vlen)
                    .map_err(|e| JitError::InvalidArguments(e.to_string()))?;
                unsafe { machine.call(code, args as *const KernelArgs as u64) }
                    .map_err(|e| JitError::Codegen(format!("emulation failed: {e}")))
            }
        }
    }
}

impl std::fmt::Debug for JitKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitKernel")
            .field("conf", &self.conf)
            .field("code_size", &self.code_size)
            .field("native", &self.is_native())
            .finish()
    }
}

/// Native execution needs an AArch64 host whose vector length is the one
/// baked into the kernel.
fn runs_natively(conf: &KernelConf, caps: &CpuCaps) -> bool {
    cfg!(target_arch = "aarch64")
        && caps.native
        && caps.mayiuse(conf.target.isa)
        && caps.vlen(conf.target.isa) == conf.target.vlen
}

/// An executable memory buffer backed by mmap.
struct ExecutableBuffer {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: ExecutableBuffer owns its mmap'd memory exclusively and the pages
// are read-only (PROT_READ|PROT_EXEC) after construction.
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

impl ExecutableBuffer {
    /// Allocate an executable region and copy `code` into it.
    fn new(code: &[u8]) -> JitResult<Self> {
        if code.is_empty() {
            return Err(JitError::ExecMemory("empty code buffer".into()));
        }

        let page_size = page_size();
        let len = (code.len() + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no fd; MAP_FAILED is checked.
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
            return Err(JitError::ExecMemory(format!(
                "mmap of {len} bytes failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let ptr = ptr as *mut u8;

        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }
        flush_icache(ptr, code.len());

        let ret = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::munmap(ptr as *mut _, len);
            }
            return Err(JitError::ExecMemory(format!("mprotect failed: {err}")));
        }

        log::trace!("mapped {} code bytes at {ptr:p} ({len} byte region)", code.len());
        Ok(ExecutableBuffer { ptr, len })
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() && self.len > 0 {
            unsafe {
                libc::munmap(self.ptr as *mut _, self.len);
            }
        }
    }
}

#[cfg(target_arch = "aarch64")]
fn flush_icache(ptr: *mut u8, len: usize) {
    extern "C" {
        fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
    }
    // SAFETY: the range lies inside the mapping created by the caller.
    unsafe { __clear_cache(ptr as *mut _, ptr.add(len) as *mut _) };
}

#[cfg(not(target_arch = "aarch64"))]
fn flush_icache(_ptr: *mut u8, _len: usize) {}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
