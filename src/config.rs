//! Process-wide configuration read from `ELTWISE_JIT_*` environment variables.
//!
//! | Variable              | Effect                                                    |
//! |-----------------------|-----------------------------------------------------------|
//! | `ELTWISE_JIT_ISA`     | `native`, `asimd`, `sve` or `sveNNN` (vector bytes)       |
//! | `ELTWISE_JIT_THREADS` | worker count used by the execution driver                 |
//! | `ELTWISE_JIT_EMULATE` | `1` runs kernels through the emulator even on AArch64     |
//! | `ELTWISE_JIT_CACHE`   | `0` disables the shared kernel cache                      |

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::dispatch::Isa;

/// Default SVE vector length (bytes) when `ELTWISE_JIT_ISA=sve` carries no size.
pub const DEFAULT_EMULATED_SVE_VLEN: usize = 32;

/// ISA override requested through the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsaOverride {
    /// Use whatever the host implements.
    Native,
    /// Emulate the given ISA with the given vector length in bytes.
    Emulated { isa: Isa, vlen: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitConfig {
    pub isa: IsaOverride,
    /// `None` means "size of the rayon pool".
    pub num_threads: Option<usize>,
    pub force_emulation: bool,
    pub kernel_cache: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            isa: IsaOverride::Native,
            num_threads: None,
            force_emulation: false,
            kernel_cache: true,
        }
    }
}

static GLOBAL: OnceLock<JitConfig> = OnceLock::new();

impl JitConfig {
    /// Configuration of this process, parsed once.
    pub fn global() -> &'static JitConfig {
        GLOBAL.get_or_init(JitConfig::from_env)
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse from an arbitrary key lookup. Malformed values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = JitConfig::default();

        if let Some(v) = lookup("ELTWISE_JIT_ISA") {
            match parse_isa_override(&v) {
                Some(isa) => cfg.isa = isa,
                None => log::warn!("ignoring unrecognised ELTWISE_JIT_ISA={v:?}"),
            }
        }

        if let Some(v) = lookup("ELTWISE_JIT_THREADS") {
            match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => cfg.num_threads = Some(n),
                _ => log::warn!("ignoring invalid ELTWISE_JIT_THREADS={v:?}"),
            }
        }

        if let Some(v) = lookup("ELTWISE_JIT_EMULATE") {
            cfg.force_emulation = parse_flag(&v).unwrap_or_else(|| {
                log::warn!("ignoring invalid ELTWISE_JIT_EMULATE={v:?}");
                false
            });
        }

        if let Some(v) = lookup("ELTWISE_JIT_CACHE") {
            cfg.kernel_cache = parse_flag(&v).unwrap_or_else(|| {
                log::warn!("ignoring invalid ELTWISE_JIT_CACHE={v:?}");
                true
            });
        }

        cfg
    }

    /// Worker count for the driver.
    pub fn threads(&self) -> usize {
        self.num_threads.unwrap_or_else(rayon::current_num_threads).max(1)
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn parse_isa_override(v: &str) -> Option<IsaOverride> {
    let v = v.trim().to_ascii_lowercase();
    match v.as_str() {
        "native" | "" => Some(IsaOverride::Native),
        "asimd" | "neon" => Some(IsaOverride::Emulated { isa: Isa::Asimd, vlen: 16 }),
        "sve" => Some(IsaOverride::Emulated { isa: Isa::Sve, vlen: DEFAULT_EMULATED_SVE_VLEN }),
        other => {
            let bytes: usize = other.strip_prefix("sve")?.parse().ok()?;
            Isa::Sve
                .is_valid_vlen(bytes)
                .then_some(IsaOverride::Emulated { isa: Isa::Sve, vlen: bytes })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> JitConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        JitConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = cfg(&[]);
        assert_eq!(c, JitConfig::default());
        assert!(c.kernel_cache);
        assert!(c.threads() >= 1);
    }

    #[test]
    fn test_isa_override() {
        assert_eq!(
            cfg(&[("ELTWISE_JIT_ISA", "sve64")]).isa,
            IsaOverride::Emulated { isa: Isa::Sve, vlen: 64 }
        );
        assert_eq!(
            cfg(&[("ELTWISE_JIT_ISA", "NEON")]).isa,
            IsaOverride::Emulated { isa: Isa::Asimd, vlen: 16 }
        );
        // 48 is not a power of two
        assert_eq!(cfg(&[("ELTWISE_JIT_ISA", "sve48")]).isa, IsaOverride::Native);
        assert_eq!(cfg(&[("ELTWISE_JIT_ISA", "avx512")]).isa, IsaOverride::Native);
    }

    #[test]
    fn test_threads_and_flags() {
        let c = cfg(&[
            ("ELTWISE_JIT_THREADS", "7"),
            ("ELTWISE_JIT_EMULATE", "1"),
            ("ELTWISE_JIT_CACHE", "off"),
        ]);
        assert_eq!(c.threads(), 7);
        assert!(c.force_emulation);
        assert!(!c.kernel_cache);

        let c = cfg(&[("ELTWISE_JIT_THREADS", "0")]);
        assert_eq!(c.num_threads, None);
    }
}
