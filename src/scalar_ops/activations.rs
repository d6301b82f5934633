//! Scalar activation functions and their derivatives.

use crate::desc::{AlgKind, EltwiseDesc, PropKind};
use crate::types::Element;

const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;
const GELU_COEFF: f64 = 0.044715;

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Forward value of `alg` at `x`, `None` for algorithms without a kernel.
pub fn eltwise_fwd(alg: AlgKind, x: f32, alpha: f32, beta: f32) -> Option<f32> {
    let (s, a, b) = (x as f64, alpha as f64, beta as f64);
    let r = match alg {
        AlgKind::Relu => {
            if s > 0.0 {
                s
            } else if a == 0.0 && !s.is_nan() {
                0.0
            } else {
                a * s
            }
        }
        AlgKind::Tanh => s.tanh(),
        AlgKind::Elu => {
            if s > 0.0 {
                s
            } else {
                a * s.exp_m1()
            }
        }
        AlgKind::Square => s * s,
        AlgKind::Abs => s.abs(),
        AlgKind::Sqrt => s.sqrt(),
        AlgKind::Linear => a * s + b,
        AlgKind::Logistic => logistic(s),
        AlgKind::Exp => s.exp(),
        AlgKind::GeluTanh => {
            let u = SQRT_2_OVER_PI * (s + GELU_COEFF * s * s * s);
            0.5 * s * (1.0 + u.tanh())
        }
        AlgKind::Swish => s * logistic(a * s),
        AlgKind::Clip => s.max(a).min(b),
        AlgKind::HardSigmoid => (a * s + b).min(1.0).max(0.0),
        AlgKind::HardSwish => s * (a * s + b).min(1.0).max(0.0),
        AlgKind::SoftRelu
        | AlgKind::Log
        | AlgKind::Pow
        | AlgKind::GeluErf
        | AlgKind::Round
        | AlgKind::Mish => return None,
    };
    Some(r as f32)
}

/// Backward gradient `f'(v) * dd`, where `v` is the forward input, or the
/// forward output when `use_dst` is set.
pub fn eltwise_bwd(
    alg: AlgKind,
    dd: f32,
    v: f32,
    alpha: f32,
    beta: f32,
    use_dst: bool,
) -> Option<f32> {
    let (dd, s, a, b) = (dd as f64, v as f64, alpha as f64, beta as f64);
    let deriv = match (alg, use_dst) {
        (AlgKind::Relu, _) => {
            if s > 0.0 {
                1.0
            } else {
                a
            }
        }
        (AlgKind::Tanh, false) => 1.0 - s.tanh() * s.tanh(),
        (AlgKind::Tanh, true) => 1.0 - s * s,
        (AlgKind::Elu, false) => {
            if s > 0.0 {
                1.0
            } else {
                a * s.exp()
            }
        }
        (AlgKind::Elu, true) => {
            if s > 0.0 {
                1.0
            } else {
                s + a
            }
        }
        (AlgKind::Square, false) => 2.0 * s,
        (AlgKind::Abs, false) => {
            if s > 0.0 {
                1.0
            } else if s < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        (AlgKind::Sqrt, false) => 0.5 / s.sqrt(),
        (AlgKind::Sqrt, true) => 0.5 / s,
        (AlgKind::Linear, false) => a,
        (AlgKind::Logistic, false) => {
            let l = logistic(s);
            l * (1.0 - l)
        }
        (AlgKind::Logistic, true) => s * (1.0 - s),
        (AlgKind::Exp, false) => s.exp(),
        (AlgKind::Exp, true) => s,
        (AlgKind::GeluTanh, false) => {
            let u = SQRT_2_OVER_PI * (s + GELU_COEFF * s * s * s);
            let t = u.tanh();
            let du = SQRT_2_OVER_PI * (1.0 + 3.0 * GELU_COEFF * s * s);
            0.5 * (1.0 + t) + 0.5 * s * (1.0 - t * t) * du
        }
        (AlgKind::Swish, false) => {
            let l = logistic(a * s);
            l + a * s * l * (1.0 - l)
        }
        (AlgKind::Clip, false) => {
            if a < s && s <= b {
                1.0
            } else {
                0.0
            }
        }
        (AlgKind::HardSigmoid, false) => {
            let t = a * s + b;
            if t > 0.0 && t < 1.0 {
                a
            } else {
                0.0
            }
        }
        (AlgKind::HardSwish, false) => {
            let t = a * s + b;
            if t <= 0.0 {
                0.0
            } else if t >= 1.0 {
                1.0
            } else {
                2.0 * a * s + b
            }
        }
        _ => return None,
    };
    Some((deriv * dd) as f32)
}

/// Apply the forward reference over a slice, rounding through `T`.
///
/// Returns `None` when the algorithm has no reference.
pub fn reference_fwd<T: Element>(desc: &EltwiseDesc, src: &[T]) -> Option<Vec<T>> {
    debug_assert_eq!(desc.prop, PropKind::Forward);
    src.iter()
        .map(|&x| eltwise_fwd(desc.alg, x.to_f32(), desc.alpha, desc.beta).map(T::from_f32))
        .collect()
}

/// Apply the backward reference over slices, rounding through `T`.
pub fn reference_bwd<T: Element>(desc: &EltwiseDesc, data: &[T], diff_dst: &[T]) -> Option<Vec<T>> {
    debug_assert_eq!(desc.prop, PropKind::Backward);
    data.iter()
        .zip(diff_dst)
        .map(|(&v, &dd)| {
            eltwise_bwd(desc.alg, dd.to_f32(), v.to_f32(), desc.alpha, desc.beta, desc.use_dst)
                .map(T::from_f32)
        })
        .collect()
}
