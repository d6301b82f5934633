//! Kernel compiler: code generation, executable memory and kernel reuse.
//!
//! # Pipeline
//!
//! ```text
//! KernelConf → KernelGenerator → CodegenOutput → JitKernel (native | emu)
//!                   ↑                                 ↑
//!             EltwiseInjector                    KernelCache
//! ```

pub mod cache;
pub mod codegen;
pub mod emu;
pub mod executable;

pub use cache::{build_kernel, kernel_for, CacheStats, KernelCache, KernelKey};
pub use codegen::{CodegenOutput, KernelArgs, KernelConf, TargetDesc};
pub use executable::{JitKernel, KernelFn};
