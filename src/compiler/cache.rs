//! Kernel cache: identical primitives share one emitted kernel.
//!
//! The key captures everything that changes the emitted bytes plus whether
//! the kernel runs natively; α and β are compared by bit pattern so `-0.0`
//! and `0.0` stay distinct.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::compiler::codegen::{self, KernelConf};
use crate::compiler::executable::JitKernel;
use crate::config::JitConfig;
use crate::desc::{AlgKind, PropKind};
use crate::dispatch::{CpuCaps, Isa};
use crate::types::{DType, JitError, JitResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    isa: Isa,
    vlen: usize,
    sve2: bool,
    dtype: DType,
    prop: PropKind,
    alg: AlgKind,
    alpha_bits: u32,
    beta_bits: u32,
    use_dst: bool,
    native: bool,
}

impl KernelKey {
    pub fn new(conf: &KernelConf, caps: &CpuCaps) -> Self {
        KernelKey {
            isa: conf.target.isa,
            vlen: conf.target.vlen,
            sve2: conf.target.sve2,
            dtype: conf.dtype,
            prop: conf.prop,
            alg: conf.alg,
            alpha_bits: conf.alpha.to_bits(),
            beta_bits: conf.beta.to_bits(),
            use_dst: conf.use_dst,
            native: caps.native,
        }
    }
}

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct KernelCache {
    entries: Mutex<HashMap<KernelKey, Arc<JitKernel>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for KernelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCache {
    pub fn new() -> Self {
        KernelCache {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Process-wide cache.
    pub fn global() -> &'static KernelCache {
        static GLOBAL: OnceLock<KernelCache> = OnceLock::new();
        GLOBAL.get_or_init(KernelCache::new)
    }

    /// Return the cached kernel for `conf`, generating it on a miss.
    ///
    /// Generation happens under the lock, so concurrent requests for the
    /// same key emit once.
    pub fn get_or_build(&self, conf: &KernelConf, caps: &CpuCaps) -> JitResult<Arc<JitKernel>> {
        let key = KernelKey::new(conf, caps);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| JitError::Codegen("kernel cache lock poisoned".into()))?;
        if let Some(k) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("kernel cache hit: {key:?}");
            return Ok(Arc::clone(k));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let kernel = Arc::new(build_kernel(conf, caps)?);
        entries.insert(key, Arc::clone(&kernel));
        Ok(kernel)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.entries.lock() {
            e.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Generate and load a kernel without consulting any cache.
pub fn build_kernel(conf: &KernelConf, caps: &CpuCaps) -> JitResult<JitKernel> {
    let out = codegen::generate(conf).map_err(JitError::Codegen)?;
    JitKernel::new(*conf, out.code, caps)
}

/// Kernel for `conf`, through the global cache unless the configuration
/// disables it.
pub fn kernel_for(conf: &KernelConf, caps: &CpuCaps, config: &JitConfig) -> JitResult<Arc<JitKernel>> {
    if config.kernel_cache {
        KernelCache::global().get_or_build(conf, caps)
    } else {
        build_kernel(conf, caps).map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::TargetDesc;

    fn conf(alpha: f32) -> KernelConf {
        KernelConf {
            target: TargetDesc { isa: Isa::Sve, vlen: 32, sve2: false },
            dtype: DType::F32,
            prop: PropKind::Forward,
            alg: AlgKind::Relu,
            alpha,
            beta: 0.0,
            use_dst: false,
        }
    }

    #[test]
    fn test_cache_shares_kernels() {
        let caps = CpuCaps::emulated(Isa::Sve, 32);
        let cache = KernelCache::new();
        let a = cache.get_or_build(&conf(0.5), &caps).unwrap();
        let b = cache.get_or_build(&conf(0.5), &caps).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });

        let c = cache.get_or_build(&conf(0.25), &caps).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_distinguishes_signed_zero() {
        let caps = CpuCaps::emulated(Isa::Sve, 32);
        assert_ne!(KernelKey::new(&conf(0.0), &caps), KernelKey::new(&conf(-0.0), &caps));
    }

    #[test]
    fn test_cache_disabled_builds_fresh() {
        let caps = CpuCaps::emulated(Isa::Sve, 32);
        let cfg = JitConfig { kernel_cache: false, ..JitConfig::default() };
        let a = kernel_for(&conf(1.0), &caps, &cfg).unwrap();
        let b = kernel_for(&conf(1.0), &caps, &cfg).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
