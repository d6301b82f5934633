//! Core types shared by the descriptor, generator and driver layers.

use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage element type of every tensor touched by one kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    BF16,
    F16,
}

impl DType {
    /// Size of one element in bytes.
    #[inline]
    pub const fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::BF16 | DType::F16 => 2,
        }
    }

    /// True for the 16-bit storage formats that are widened to F32 for compute.
    #[inline]
    pub const fn is_half(self) -> bool {
        !matches!(self, DType::F32)
    }

    pub const fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::BF16 => "bf16",
            DType::F16 => "f16",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Host element types that can back a tensor.
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f32(self) -> f32;
    /// Round-to-nearest-even conversion from f32.
    fn from_f32(v: f32) -> Self;
    fn to_bits_u32(self) -> u32;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
    #[inline]
    fn to_bits_u32(self) -> u32 {
        self.to_bits()
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
    #[inline]
    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }
    #[inline]
    fn to_bits_u32(self) -> u32 {
        self.to_bits() as u32
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
    #[inline]
    fn to_bits_u32(self) -> u32 {
        self.to_bits() as u32
    }
}

/// Errors produced while building or running an eltwise primitive.
#[derive(Debug, Error)]
pub enum JitError {
    /// The descriptor cannot be served by this implementation.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    /// The assembler could not complete the kernel.
    #[error("code generation failed: {0}")]
    Codegen(String),
    /// Executable memory could not be mapped.
    #[error("executable memory: {0}")]
    ExecMemory(String),
    /// Execution-time misuse caught by the safe wrappers.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

pub type JitResult<T> = Result<T, JitError>;

impl JitError {
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, JitError::Unimplemented(_))
    }
}
