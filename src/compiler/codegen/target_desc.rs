//! Target descriptor: the vector unit a kernel is generated for.
//!
//! Captured once per kernel from `CpuCaps`. An SVE kernel bakes its vector
//! length into loop strides, so a descriptor is only valid on machines with
//! the same length.

use serde::{Deserialize, Serialize};

use crate::dispatch::{CpuCaps, Isa};
use crate::types::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDesc {
    pub isa: Isa,
    /// Vector register width in bytes.
    pub vlen: usize,
    /// SVE2 widening/narrowing conversions are available.
    pub sve2: bool,
}

impl TargetDesc {
    /// Describe `isa` on `caps`, `None` when the machine cannot run it.
    pub fn from_caps(caps: &CpuCaps, isa: Isa) -> Option<Self> {
        if !caps.mayiuse(isa) {
            return None;
        }
        Some(TargetDesc {
            isa,
            vlen: caps.vlen(isa),
            sve2: isa == Isa::Sve && caps.sve2,
        })
    }

    /// F32 lanes per vector register.
    #[inline]
    pub fn simd_w(&self) -> usize {
        self.vlen / 4
    }

    /// Elements of `dtype` consumed by one loop iteration. Half types fill
    /// two F32 registers per iteration.
    #[inline]
    pub fn step_elems(&self, dtype: DType) -> usize {
        self.vlen / dtype.size_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_caps() {
        let caps = CpuCaps::emulated(Isa::Sve, 64);
        let t = TargetDesc::from_caps(&caps, Isa::Sve).unwrap();
        assert_eq!(t.simd_w(), 16);
        assert_eq!(t.step_elems(DType::BF16), 32);
        let neon = TargetDesc::from_caps(&caps, Isa::Asimd).unwrap();
        assert_eq!(neon.simd_w(), 4);
        assert!(TargetDesc::from_caps(&CpuCaps::emulated(Isa::Asimd, 16), Isa::Sve).is_none());
    }
}
