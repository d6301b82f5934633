//! eltwise-jit: AArch64 JIT element-wise kernels.
//!
//! This crate generates vectorized machine code for activation functions
//! and their gradients over dense tensors:
//! - **Targets**: Advanced SIMD (128-bit) and SVE at any vector length
//! - **Element types**: f32, bf16 and f16 (half types compute in f32)
//! - **Predicated tails**: no scalar remainder loop on SVE
//! - **Off-target execution**: an instruction-level emulator runs the same
//!   bytes on hosts without the ISA
//!
//! # Quick Start
//!
//! ```ignore
//! use eltwise_jit::{AlgKind, EltwiseDesc, EltwiseForward, Engine, MemoryDesc, PrimitiveAttr};
//!
//! let md = MemoryDesc::plain(&[n], DType::F32);
//! let desc = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, md.clone(), md);
//! let relu = EltwiseForward::new(&Engine::detect(), &desc, &PrimitiveAttr::default())?;
//! relu.forward(&src, &mut dst)?;
//! ```

pub mod compiler;
pub mod config;
pub mod desc;
pub mod dispatch;
pub mod memory;
pub mod primitive;
pub mod scalar_ops;
pub mod types;

pub use config::JitConfig;
pub use desc::{AlgKind, EltwiseDesc, PostOp, PrimitiveAttr, PropKind};
pub use dispatch::{cpu_caps, CpuCaps, Isa};
pub use memory::{Layout, MemoryDesc};
pub use primitive::{ArgKind, EltwiseBackward, EltwiseForward, Engine, ExecArgs};
pub use types::{DType, Element, JitError, JitResult};
