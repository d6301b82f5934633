//! Scalar reference implementations of the eltwise algorithms.
//!
//! These are the golden reference for correctness testing of the emitted
//! kernels. They compute in f64 and round once to f32.

pub mod activations;

pub use activations::{eltwise_bwd, eltwise_fwd, reference_bwd, reference_fwd};
