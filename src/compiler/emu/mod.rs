//! Software AArch64 machine for running generated kernels off-target.
//!
//! Decodes and executes exactly the instruction subset the eltwise generator
//! emits, against host memory. Used when the host cannot run the target
//! natively: x86_64 development machines, or an SVE vector length the
//! hardware does not have.

pub mod decoder;
pub mod machine;

use thiserror::Error;

pub use decoder::{decode, Insn};
pub use machine::Machine;

#[derive(Debug, Error)]
pub enum EmuError {
    #[error("unsupported instruction word {0:#010x}")]
    Unsupported(u32),
    #[error("pc {0:#x} outside code buffer")]
    PcOutOfRange(u64),
    #[error("invalid vector length {0}")]
    InvalidVlen(usize),
}
