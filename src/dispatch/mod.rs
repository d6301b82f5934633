//! Host capability detection for the kernel dispatcher.
//!
//! Provides [`CpuCaps`], the single source of truth the primitive descriptors
//! consult before any code is emitted.

pub mod cpu_caps;

pub use cpu_caps::{CpuCaps, Isa};

use std::sync::OnceLock;

use crate::config::{IsaOverride, JitConfig};

static CAPS: OnceLock<CpuCaps> = OnceLock::new();

/// Capabilities of this process (detected once, honouring `ELTWISE_JIT_ISA`).
pub fn cpu_caps() -> &'static CpuCaps {
    CAPS.get_or_init(|| {
        let cfg = JitConfig::global();
        let caps = match cfg.isa {
            IsaOverride::Native => CpuCaps::detect(),
            IsaOverride::Emulated { isa, vlen } => CpuCaps::emulated(isa, vlen),
        };
        let caps = if cfg.force_emulation { caps.into_emulated() } else { caps };
        log::info!("eltwise-jit capabilities: {caps}");
        caps
    })
}
