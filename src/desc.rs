//! Operation descriptors: algorithm, parameters, direction and tensors.

use serde::{Deserialize, Serialize};

use crate::memory::MemoryDesc;

/// Element-wise function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgKind {
    /// `x > 0 ? x : alpha * x`
    Relu,
    Tanh,
    /// `x > 0 ? x : alpha * (e^x - 1)`
    Elu,
    Square,
    Abs,
    Sqrt,
    /// `alpha * x + beta`
    Linear,
    SoftRelu,
    /// `1 / (1 + e^-x)`
    Logistic,
    Exp,
    /// `0.5 x (1 + tanh(sqrt(2/pi) (x + 0.044715 x^3)))`
    GeluTanh,
    /// `x * logistic(alpha * x)`
    Swish,
    Log,
    /// `min(max(x, alpha), beta)`
    Clip,
    Pow,
    GeluErf,
    Round,
    Mish,
    /// `max(0, min(1, alpha * x + beta))`
    HardSigmoid,
    /// `x * hardsigmoid(x)`
    HardSwish,
}

impl AlgKind {
    pub const ALL: [AlgKind; 20] = [
        AlgKind::Relu,
        AlgKind::Tanh,
        AlgKind::Elu,
        AlgKind::Square,
        AlgKind::Abs,
        AlgKind::Sqrt,
        AlgKind::Linear,
        AlgKind::SoftRelu,
        AlgKind::Logistic,
        AlgKind::Exp,
        AlgKind::GeluTanh,
        AlgKind::Swish,
        AlgKind::Log,
        AlgKind::Clip,
        AlgKind::Pow,
        AlgKind::GeluErf,
        AlgKind::Round,
        AlgKind::Mish,
        AlgKind::HardSigmoid,
        AlgKind::HardSwish,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            AlgKind::Relu => "relu",
            AlgKind::Tanh => "tanh",
            AlgKind::Elu => "elu",
            AlgKind::Square => "square",
            AlgKind::Abs => "abs",
            AlgKind::Sqrt => "sqrt",
            AlgKind::Linear => "linear",
            AlgKind::SoftRelu => "soft_relu",
            AlgKind::Logistic => "logistic",
            AlgKind::Exp => "exp",
            AlgKind::GeluTanh => "gelu_tanh",
            AlgKind::Swish => "swish",
            AlgKind::Log => "log",
            AlgKind::Clip => "clip",
            AlgKind::Pow => "pow",
            AlgKind::GeluErf => "gelu_erf",
            AlgKind::Round => "round",
            AlgKind::Mish => "mish",
            AlgKind::HardSigmoid => "hardsigmoid",
            AlgKind::HardSwish => "hardswish",
        }
    }

    /// Whether the backward pass can be expressed through the forward output.
    pub const fn supports_use_dst(self) -> bool {
        matches!(
            self,
            AlgKind::Relu
                | AlgKind::Tanh
                | AlgKind::Elu
                | AlgKind::Sqrt
                | AlgKind::Logistic
                | AlgKind::Exp
        )
    }
}

impl std::fmt::Display for AlgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropKind {
    Forward,
    Backward,
}

/// Whether padding zeros stay zero under the operation.
///
/// Forward needs `f(0) == 0`. Backward multiplies the derivative by a zero
/// `diff_dst`, which stays zero unless the derivative is infinite at 0.
pub fn is_zero_preserved(prop: PropKind, alg: AlgKind, alpha: f32, beta: f32) -> bool {
    match prop {
        PropKind::Forward => match alg {
            AlgKind::Relu
            | AlgKind::Tanh
            | AlgKind::Elu
            | AlgKind::Square
            | AlgKind::Abs
            | AlgKind::Sqrt
            | AlgKind::GeluTanh
            | AlgKind::Swish
            | AlgKind::GeluErf
            | AlgKind::Round
            | AlgKind::Mish
            | AlgKind::HardSwish => true,
            AlgKind::Linear => beta == 0.0,
            AlgKind::Clip => alpha <= 0.0 && beta >= 0.0,
            AlgKind::HardSigmoid => beta <= 0.0,
            AlgKind::Pow => alpha == 0.0 || beta > 0.0,
            AlgKind::SoftRelu | AlgKind::Logistic | AlgKind::Exp | AlgKind::Log => false,
        },
        PropKind::Backward => match alg {
            AlgKind::Sqrt | AlgKind::Log => false,
            AlgKind::Pow => beta >= 1.0 || beta == 0.0,
            _ => true,
        },
    }
}

/// Non-default attributes make a descriptor unimplementable here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveAttr {
    pub post_ops: Vec<PostOp>,
    pub output_scale: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PostOp {
    Eltwise { alg: AlgKind, alpha: f32, beta: f32 },
    Sum { scale: f32 },
}

impl PrimitiveAttr {
    pub fn has_default_values(&self) -> bool {
        self.post_ops.is_empty() && self.output_scale.is_none()
    }
}

/// Eltwise operation descriptor.
///
/// Forward: `data_md` is SRC and `dst_md` is DST. Backward: `data_md` is SRC
/// (or DST when `use_dst`), `dst_md` is DIFF_SRC and `diff_dst_md` is DIFF_DST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EltwiseDesc {
    pub prop: PropKind,
    pub alg: AlgKind,
    pub alpha: f32,
    pub beta: f32,
    pub use_dst: bool,
    pub data_md: MemoryDesc,
    pub dst_md: MemoryDesc,
    pub diff_dst_md: Option<MemoryDesc>,
}

impl EltwiseDesc {
    pub fn forward(
        alg: AlgKind,
        alpha: f32,
        beta: f32,
        src_md: MemoryDesc,
        dst_md: MemoryDesc,
    ) -> Self {
        EltwiseDesc {
            prop: PropKind::Forward,
            alg,
            alpha,
            beta,
            use_dst: false,
            data_md: src_md,
            dst_md,
            diff_dst_md: None,
        }
    }

    pub fn backward(
        alg: AlgKind,
        alpha: f32,
        beta: f32,
        data_md: MemoryDesc,
        diff_src_md: MemoryDesc,
        diff_dst_md: MemoryDesc,
        use_dst: bool,
    ) -> Self {
        EltwiseDesc {
            prop: PropKind::Backward,
            alg,
            alpha,
            beta,
            use_dst,
            data_md,
            dst_md: diff_src_md,
            diff_dst_md: Some(diff_dst_md),
        }
    }

    /// Every tensor descriptor taking part in the operation.
    pub fn tensors(&self) -> impl Iterator<Item = &MemoryDesc> {
        std::iter::once(&self.data_md)
            .chain(std::iter::once(&self.dst_md))
            .chain(self.diff_dst_md.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;

    #[test]
    fn test_zero_preservation_forward() {
        let fwd = PropKind::Forward;
        assert!(is_zero_preserved(fwd, AlgKind::Relu, 0.0, 0.0));
        assert!(is_zero_preserved(fwd, AlgKind::GeluTanh, 0.0, 0.0));
        assert!(!is_zero_preserved(fwd, AlgKind::Logistic, 0.0, 0.0));
        assert!(!is_zero_preserved(fwd, AlgKind::Exp, 0.0, 0.0));
        assert!(is_zero_preserved(fwd, AlgKind::Linear, 2.0, 0.0));
        assert!(!is_zero_preserved(fwd, AlgKind::Linear, 2.0, 1.0));
        assert!(is_zero_preserved(fwd, AlgKind::Clip, -1.0, 1.0));
        assert!(!is_zero_preserved(fwd, AlgKind::Clip, 0.5, 1.0));
        assert!(!is_zero_preserved(fwd, AlgKind::HardSigmoid, 1.0 / 6.0, 0.5));
    }

    #[test]
    fn test_zero_preservation_backward() {
        let bwd = PropKind::Backward;
        assert!(is_zero_preserved(bwd, AlgKind::Logistic, 0.0, 0.0));
        assert!(is_zero_preserved(bwd, AlgKind::Exp, 0.0, 0.0));
        assert!(!is_zero_preserved(bwd, AlgKind::Sqrt, 0.0, 0.0));
    }

    #[test]
    fn test_default_attr() {
        assert!(PrimitiveAttr::default().has_default_values());
        let attr = PrimitiveAttr { output_scale: Some(2.0), ..Default::default() };
        assert!(!attr.has_default_values());
        let attr = PrimitiveAttr { post_ops: vec![PostOp::Sum { scale: 1.0 }], ..Default::default() };
        assert!(!attr.has_default_values());
    }

    #[test]
    fn test_desc_tensors() {
        let md = MemoryDesc::plain(&[8], DType::F32);
        let fwd = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, md.clone(), md.clone());
        assert_eq!(fwd.tensors().count(), 2);
        let bwd = EltwiseDesc::backward(AlgKind::Tanh, 0.0, 0.0, md.clone(), md.clone(), md, true);
        assert_eq!(bwd.tensors().count(), 3);
        assert!(bwd.use_dst);
    }
}
