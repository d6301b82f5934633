//! AArch64 ISA detection.
//!
//! Native detection uses `is_aarch64_feature_detected!` and, for SVE, the
//! `PR_SVE_GET_VL` prctl to learn the vector length of the calling thread.
//! Emulated capabilities describe an ISA that is executed by
//! [`crate::compiler::emu`] instead of the host CPU.

use serde::{Deserialize, Serialize};

/// Vector ISA a kernel is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Isa {
    /// Advanced SIMD, fixed 128-bit vectors.
    Asimd,
    /// Scalable Vector Extension, vector length fixed per kernel instance.
    Sve,
}

/// Largest architectural SVE vector length in bytes (2048 bits).
pub const SVE_MAX_VLEN: usize = 256;

impl Isa {
    pub const fn name(self) -> &'static str {
        match self {
            Isa::Asimd => "asimd",
            Isa::Sve => "sve",
        }
    }

    /// Whether `vlen` bytes is a vector length this ISA can have.
    pub fn is_valid_vlen(self, vlen: usize) -> bool {
        match self {
            Isa::Asimd => vlen == 16,
            Isa::Sve => vlen >= 16 && vlen <= SVE_MAX_VLEN && vlen.is_power_of_two(),
        }
    }
}

impl std::fmt::Display for Isa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the executing machine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuCaps {
    pub asimd: bool,
    pub sve: bool,
    pub sve2: bool,
    /// SVE vector length in bytes, 0 without SVE.
    pub sve_vlen: usize,
    /// Kernels run on the host CPU; otherwise they run in the emulator.
    pub native: bool,
}

impl CpuCaps {
    /// No vector ISA at all (every descriptor is rejected).
    pub const fn none() -> Self {
        CpuCaps { asimd: false, sve: false, sve2: false, sve_vlen: 0, native: false }
    }

    /// Detect the host CPU.
    pub fn detect() -> Self {
        detect_native()
    }

    /// Capabilities executed by the emulator. An invalid SVE length
    /// degrades to Advanced SIMD only.
    pub fn emulated(isa: Isa, vlen: usize) -> Self {
        match isa {
            Isa::Asimd => CpuCaps { asimd: true, ..Self::none() },
            Isa::Sve if Isa::Sve.is_valid_vlen(vlen) => CpuCaps {
                asimd: true,
                sve: true,
                sve2: false,
                sve_vlen: vlen,
                native: false,
            },
            Isa::Sve => {
                log::warn!("invalid SVE vector length {vlen}, falling back to asimd");
                CpuCaps { asimd: true, ..Self::none() }
            }
        }
    }

    /// Same ISA set, executed by the emulator.
    pub fn into_emulated(self) -> Self {
        CpuCaps { native: false, ..self }
    }

    pub fn with_sve2(self, sve2: bool) -> Self {
        CpuCaps { sve2: sve2 && self.sve, ..self }
    }

    /// Whether kernels for `isa` may be generated.
    pub fn mayiuse(&self, isa: Isa) -> bool {
        match isa {
            Isa::Asimd => self.asimd,
            Isa::Sve => self.sve && Isa::Sve.is_valid_vlen(self.sve_vlen),
        }
    }

    /// Vector length in bytes for `isa` on this machine.
    pub fn vlen(&self, isa: Isa) -> usize {
        match isa {
            Isa::Asimd => 16,
            Isa::Sve => self.sve_vlen,
        }
    }
}

impl std::fmt::Display for CpuCaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "asimd={} sve={} sve2={} vlen={} mode={}",
            self.asimd,
            self.sve,
            self.sve2,
            self.sve_vlen,
            if self.native { "native" } else { "emulated" }
        )
    }
}

#[cfg(target_arch = "aarch64")]
fn detect_native() -> CpuCaps {
    let asimd = std::arch::is_aarch64_feature_detected!("neon");
    let mut sve = std::arch::is_aarch64_feature_detected!("sve");
    let mut sve2 = sve && std::arch::is_aarch64_feature_detected!("sve2");
    let mut sve_vlen = 0;
    if sve {
        match sve_vector_length() {
            Some(vl) if Isa::Sve.is_valid_vlen(vl) => sve_vlen = vl,
            other => {
                log::warn!("SVE reported but vector length unusable ({other:?}), disabling SVE");
                sve = false;
                sve2 = false;
            }
        }
    }
    CpuCaps { asimd, sve, sve2, sve_vlen, native: true }
}

#[cfg(not(target_arch = "aarch64"))]
fn detect_native() -> CpuCaps {
    log::debug!("host is not AArch64; no native vector ISA for eltwise kernels");
    CpuCaps::none()
}

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
fn sve_vector_length() -> Option<usize> {
    const PR_SVE_GET_VL: libc::c_int = 51;
    const PR_SVE_VL_LEN_MASK: libc::c_int = 0xffff;
    // SAFETY: PR_SVE_GET_VL takes no further arguments and only reads thread state.
    let ret = unsafe { libc::prctl(PR_SVE_GET_VL, 0, 0, 0, 0) };
    if ret < 0 {
        None
    } else {
        Some((ret & PR_SVE_VL_LEN_MASK) as usize)
    }
}

#[cfg(all(target_arch = "aarch64", not(target_os = "linux")))]
fn sve_vector_length() -> Option<usize> {
    None
}
