//! AArch64 code generation for eltwise kernels.
//!
//! Layering, bottom-up:
//! - `asm`, `neon`, `sve`: raw instruction encoders and the label-aware buffer
//! - `simd_ops`: the `SimdOps` virtual vector ISA with NEON and SVE backends
//! - `math_approx`: transcendental bodies written against `SimdOps`
//! - `injector`: per-algorithm bodies, register contract, constants table
//! - `kernel`: the loop/tail/conversion skeleton that calls the injector

pub mod asm;
pub mod injector;
pub mod kernel;
pub mod math_approx;
pub mod neon;
pub mod simd_ops;
pub mod sve;
pub mod target_desc;

pub use kernel::{generate, KernelArgs, KernelConf, KernelGenerator};
pub use target_desc::TargetDesc;

/// Output of code generation: raw machine code bytes.
#[derive(Debug, Clone)]
pub struct CodegenOutput {
    /// Machine code followed by the constants table.
    pub code: Vec<u8>,
    /// Entries in the constants table.
    pub n_consts: usize,
}
