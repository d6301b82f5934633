//! Public eltwise primitives.
//!
//! A primitive is created from an [`EltwiseDesc`] by walking the
//! implementation list (SVE before ASIMD) and keeping the first descriptor
//! whose `init` succeeds; its kernel is generated once and reused for every
//! execution.
//!
//! ```no_run
//! use eltwise_jit::{AlgKind, EltwiseDesc, EltwiseForward, Engine, MemoryDesc, PrimitiveAttr};
//! use eltwise_jit::types::DType;
//!
//! let md = MemoryDesc::plain(&[1024], DType::F32);
//! let desc = EltwiseDesc::forward(AlgKind::GeluTanh, 0.0, 0.0, md.clone(), md);
//! let prim = EltwiseForward::new(&Engine::detect(), &desc, &PrimitiveAttr::default())?;
//! let src = vec![0.5f32; 1024];
//! let mut dst = vec![0.0f32; 1024];
//! prim.forward(&src, &mut dst)?;
//! # Ok::<(), eltwise_jit::JitError>(())
//! ```

pub mod driver;
pub mod pd;

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;

use crate::compiler::{kernel_for, JitKernel};
use crate::config::JitConfig;
use crate::desc::{EltwiseDesc, PrimitiveAttr, PropKind};
use crate::dispatch::{cpu_caps, CpuCaps};
use crate::memory::MemoryDesc;
use crate::types::{Element, JitError, JitResult};

pub use driver::{balance211, Bases};
pub use pd::{impl_list, EltwisePd};

/// Where primitives run: the capabilities they may use and the process
/// configuration.
#[derive(Debug, Clone)]
pub struct Engine {
    caps: CpuCaps,
    config: JitConfig,
}

impl Engine {
    /// Host capabilities and environment configuration.
    pub fn detect() -> Self {
        Engine { caps: *cpu_caps(), config: JitConfig::global().clone() }
    }

    pub fn with_caps(caps: CpuCaps) -> Self {
        Engine { caps, config: JitConfig::global().clone() }
    }

    pub fn with_config(mut self, config: JitConfig) -> Self {
        self.config = config;
        self
    }

    pub fn caps(&self) -> &CpuCaps {
        &self.caps
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }
}

/// Execution argument slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Src,
    Dst,
    DiffDst,
    DiffSrc,
}

/// Resource map for one execution: base pointers of each tensor buffer.
/// Each descriptor's `offset0` is applied by the primitive.
#[derive(Debug, Default, Clone)]
pub struct ExecArgs {
    args: HashMap<ArgKind, *mut c_void>,
}

impl ExecArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input<T>(mut self, kind: ArgKind, ptr: *const T) -> Self {
        self.args.insert(kind, ptr as *mut c_void);
        self
    }

    pub fn output<T>(mut self, kind: ArgKind, ptr: *mut T) -> Self {
        self.args.insert(kind, ptr.cast());
        self
    }

    pub fn get(&self, kind: ArgKind) -> JitResult<*mut c_void> {
        match self.args.get(&kind) {
            Some(p) if !p.is_null() => Ok(*p),
            _ => Err(JitError::InvalidArguments(format!("missing {kind:?} argument"))),
        }
    }
}

/// Try every implementation for `prop`; the last rejection is reported
/// when none fits.
fn create(engine: &Engine, desc: &EltwiseDesc, attr: &PrimitiveAttr, prop: PropKind) -> JitResult<(EltwisePd, Arc<JitKernel>)> {
    let mut last = JitError::Unimplemented("no implementation".into());
    for &(isa, dtype) in impl_list(prop) {
        match EltwisePd::init(engine, desc, attr, prop, isa, dtype) {
            Ok(pd) => {
                let kernel = kernel_for(&pd.kernel_conf(), engine.caps(), engine.config())?;
                log::debug!(
                    "eltwise {:?} {} -> {} ({} bytes, {})",
                    prop,
                    desc.alg,
                    pd.name(),
                    kernel.code_size(),
                    if kernel.is_native() { "native" } else { "emulated" }
                );
                return Ok((pd, kernel));
            }
            Err(e) => {
                log::debug!("eltwise {:?} {} on {isa}/{dtype} rejected: {e}", prop, desc.alg);
                last = e;
            }
        }
    }
    Err(last)
}

fn offset_addr(base: *mut c_void, md: &MemoryDesc) -> usize {
    base as usize + md.offset0 * md.dtype.size_bytes()
}

/// Elements a typed slice must hold for `md` (offset and padding included).
fn required_len(md: &MemoryDesc) -> usize {
    md.size_bytes() / md.dtype.size_bytes()
}

fn check_slice<T: Element>(name: &str, len: usize, md: &MemoryDesc) -> JitResult<()> {
    if T::DTYPE != md.dtype {
        return Err(JitError::InvalidArguments(format!(
            "{name}: element type {} does not match descriptor {}",
            T::DTYPE,
            md.dtype
        )));
    }
    let need = required_len(md);
    if len < need {
        return Err(JitError::InvalidArguments(format!("{name}: {len} elements, need {need}")));
    }
    Ok(())
}

// ── Forward ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EltwiseForward {
    pd: EltwisePd,
    kernel: Arc<JitKernel>,
    nthr: usize,
}

impl EltwiseForward {
    pub fn new(engine: &Engine, desc: &EltwiseDesc, attr: &PrimitiveAttr) -> JitResult<Self> {
        let (pd, kernel) = create(engine, desc, attr, PropKind::Forward)?;
        Ok(EltwiseForward { pd, kernel, nthr: engine.config().threads() })
    }

    pub fn pd(&self) -> &EltwisePd {
        &self.pd
    }

    pub fn kernel(&self) -> &JitKernel {
        &self.kernel
    }

    /// Override the partition count used by `execute`.
    pub fn with_threads(mut self, nthr: usize) -> Self {
        self.nthr = nthr.max(1);
        self
    }

    /// Run on raw buffers: `Src` is read, `Dst` written (may alias `Src`).
    ///
    /// # Safety
    /// Both buffers must be valid for the descriptor's layout, offset included.
    pub unsafe fn execute(&self, args: &ExecArgs) -> JitResult<()> {
        let d = self.pd.desc();
        let bases = Bases {
            src: offset_addr(args.get(ArgKind::Src)?, &d.data_md),
            dst: offset_addr(args.get(ArgKind::Dst)?, &d.dst_md),
            diff_dst: 0,
        };
        unsafe { driver::run(&self.kernel, bases, self.pd.nelems(), self.pd.dtype(), self.nthr) }
    }

    pub fn forward<T: Element>(&self, src: &[T], dst: &mut [T]) -> JitResult<()> {
        let d = self.pd.desc();
        check_slice::<T>("src", src.len(), &d.data_md)?;
        check_slice::<T>("dst", dst.len(), &d.dst_md)?;
        let args = ExecArgs::new()
            .input(ArgKind::Src, src.as_ptr())
            .output(ArgKind::Dst, dst.as_mut_ptr());
        // SAFETY: lengths checked against the descriptors above.
        unsafe { self.execute(&args) }
    }

    pub fn forward_inplace<T: Element>(&self, data: &mut [T]) -> JitResult<()> {
        let d = self.pd.desc();
        check_slice::<T>("data", data.len(), &d.data_md)?;
        let p = data.as_mut_ptr();
        let args = ExecArgs::new().input(ArgKind::Src, p as *const T).output(ArgKind::Dst, p);
        // SAFETY: one checked buffer, read and written at the same index.
        unsafe { self.execute(&args) }
    }
}

// ── Backward ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EltwiseBackward {
    pd: EltwisePd,
    kernel: Arc<JitKernel>,
    nthr: usize,
}

impl EltwiseBackward {
    pub fn new(engine: &Engine, desc: &EltwiseDesc, attr: &PrimitiveAttr) -> JitResult<Self> {
        let (pd, kernel) = create(engine, desc, attr, PropKind::Backward)?;
        Ok(EltwiseBackward { pd, kernel, nthr: engine.config().threads() })
    }

    pub fn pd(&self) -> &EltwisePd {
        &self.pd
    }

    pub fn kernel(&self) -> &JitKernel {
        &self.kernel
    }

    pub fn with_threads(mut self, nthr: usize) -> Self {
        self.nthr = nthr.max(1);
        self
    }

    /// Run on raw buffers. The value argument is `Dst` when the descriptor
    /// has `use_dst`, otherwise `Src`; `DiffSrc` may alias `DiffDst`.
    ///
    /// # Safety
    /// All buffers must be valid for the descriptor's layout, offset included.
    pub unsafe fn execute(&self, args: &ExecArgs) -> JitResult<()> {
        let d = self.pd.desc();
        let value = if d.use_dst { ArgKind::Dst } else { ArgKind::Src };
        let diff_md = d.diff_dst_md.as_ref().unwrap_or(&d.dst_md);
        let bases = Bases {
            src: offset_addr(args.get(value)?, &d.data_md),
            dst: offset_addr(args.get(ArgKind::DiffSrc)?, &d.dst_md),
            diff_dst: offset_addr(args.get(ArgKind::DiffDst)?, diff_md),
        };
        unsafe { driver::run(&self.kernel, bases, self.pd.nelems(), self.pd.dtype(), self.nthr) }
    }

    /// `data` is the forward input, or the forward output with `use_dst`.
    pub fn backward<T: Element>(&self, data: &[T], diff_dst: &[T], diff_src: &mut [T]) -> JitResult<()> {
        let d = self.pd.desc();
        check_slice::<T>("data", data.len(), &d.data_md)?;
        check_slice::<T>("diff_dst", diff_dst.len(), &d.data_md)?;
        check_slice::<T>("diff_src", diff_src.len(), &d.dst_md)?;
        let value = if d.use_dst { ArgKind::Dst } else { ArgKind::Src };
        let args = ExecArgs::new()
            .input(value, data.as_ptr())
            .input(ArgKind::DiffDst, diff_dst.as_ptr())
            .output(ArgKind::DiffSrc, diff_src.as_mut_ptr());
        // SAFETY: lengths checked against the descriptors above.
        unsafe { self.execute(&args) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::AlgKind;
    use crate::dispatch::Isa;
    use crate::types::DType;

    fn engine() -> Engine {
        Engine::with_caps(CpuCaps::emulated(Isa::Sve, 32))
    }

    #[test]
    fn test_forward_picks_sve_first() {
        let md = MemoryDesc::plain(&[10], DType::BF16);
        let desc = EltwiseDesc::forward(AlgKind::Abs, 0.0, 0.0, md.clone(), md);
        let p = EltwiseForward::new(&engine(), &desc, &PrimitiveAttr::default()).unwrap();
        assert_eq!(p.pd().name(), "jit:sve_256:bf16");
    }

    #[test]
    fn test_no_isa_is_unimplemented() {
        let md = MemoryDesc::plain(&[10], DType::F32);
        let desc = EltwiseDesc::forward(AlgKind::Abs, 0.0, 0.0, md.clone(), md);
        let r = EltwiseForward::new(&Engine::with_caps(CpuCaps::none()), &desc, &PrimitiveAttr::default());
        assert!(matches!(r, Err(JitError::Unimplemented(_))));
    }

    #[test]
    fn test_missing_argument() {
        let md = MemoryDesc::plain(&[10], DType::F32);
        let desc = EltwiseDesc::forward(AlgKind::Abs, 0.0, 0.0, md.clone(), md);
        let p = EltwiseForward::new(&engine(), &desc, &PrimitiveAttr::default()).unwrap();
        let src = [0.0f32; 10];
        let args = ExecArgs::new().input(ArgKind::Src, src.as_ptr());
        let r = unsafe { p.execute(&args) };
        assert!(matches!(r, Err(JitError::InvalidArguments(_))));
    }

    #[test]
    fn test_typed_wrapper_checks() {
        let md = MemoryDesc::plain(&[10], DType::F32).with_offset(2);
        let desc = EltwiseDesc::forward(AlgKind::Square, 0.0, 0.0, md.clone(), md);
        let p = EltwiseForward::new(&engine(), &desc, &PrimitiveAttr::default()).unwrap();
        let mut short = vec![0.0f32; 10];
        assert!(matches!(p.forward_inplace(&mut short), Err(JitError::InvalidArguments(_))));
        let mut half_buf = vec![half::f16::ZERO; 12];
        assert!(p.forward_inplace(&mut half_buf).is_err());

        let mut buf: Vec<f32> = (0..12).map(|i| i as f32).collect();
        p.forward_inplace(&mut buf).unwrap();
        assert_eq!(&buf[..2], &[0.0, 1.0]);
        assert_eq!(buf[2], 4.0);
        assert_eq!(buf[11], 121.0);
    }

    #[test]
    fn test_debug_names_kernel_backing() {
        let md = MemoryDesc::plain(&[4], DType::F32);
        let desc = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, md.clone(), md);
        let p = EltwiseForward::new(&engine(), &desc, &PrimitiveAttr::default()).unwrap();
        let s = format!("{p:?}");
        assert!(s.contains("JitKernel"), "{s}");
        assert!(s.contains("native: false"), "{s}");

        let bare = Engine::with_caps(CpuCaps::none());
        let err = EltwiseForward::new(&bare, &desc, &PrimitiveAttr::default()).unwrap_err();
        assert!(err.is_unimplemented());
    }
}
