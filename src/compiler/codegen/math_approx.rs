//! Shared math approximations: ISA-independent transcendental bodies.
//!
//! Every function emits through the `SimdOps` trait and therefore works for
//! NEON and SVE alike. All approximations target f32 precision.
//!
//! Register convention: the value register is transformed in place unless a
//! separate `dst` is given; `s` lists scratch registers, which must be
//! distinct from the value register and from each other.

use super::simd_ops::{SimdOps, VReg};

// ── Exp coefficients (Cephes degree-5 polynomial) ───────────────────────────

/// Inputs are clamped to this range before range reduction.
pub const EXP_CLAMP_LO: f32 = -87.336_55;
pub const EXP_CLAMP_HI: f32 = 88.376;
pub const EXP_LOG2E: f32 = std::f32::consts::LOG2_E;
/// Cody-Waite split of `-ln 2`.
pub const EXP_C1: f32 = -0.693_359_375;
pub const EXP_C2: f32 = 2.121_944_4e-4;
pub const EXP_P0: f32 = 1.987_569_1e-4;
pub const EXP_P1: f32 = 1.398_199_9e-3;
pub const EXP_P2: f32 = 8.333_452e-3;
pub const EXP_P3: f32 = 4.166_579_6e-2;
pub const EXP_P4: f32 = 1.666_666_6e-1;
pub const EXP_P5: f32 = 0.5;
/// IEEE single exponent bias, used as an integer lane constant.
pub const EXP_BIAS: u32 = 127;

// ── Expm1 ───────────────────────────────────────────────────────────────────

/// Below this magnitude `expm1` uses the Taylor series instead of `exp - 1`.
pub const EXPM1_POLY_BOUND: f32 = 1.0;
/// Taylor coefficients `1/2!` .. `1/12!` of `(expm1(x) - x) / x^2`.
pub const EXPM1_POLY: [f32; 11] = [
    0.5,
    0.166_666_67,
    0.041_666_668,
    0.008_333_334,
    0.001_388_888_9,
    1.984_127e-4,
    2.480_158_8e-5,
    2.755_731_9e-6,
    2.755_732e-7,
    2.505_210_8e-8,
    2.087_675_6e-9,
];

// ── Tanh ────────────────────────────────────────────────────────────────────

/// Below this magnitude the odd polynomial is used instead of the exp form.
pub const TANH_POLY_BOUND: f32 = 0.5;
/// Odd Taylor coefficients c3..c15 of tanh.
pub const TANH_POLY: [f32; 7] = [
    -0.333_333_34,
    0.133_333_34,
    -0.053_968_254,
    0.021_869_49,
    -0.008_863_236,
    0.003_592_128,
    -0.001_455_834,
];

// ── GELU ────────────────────────────────────────────────────────────────────

/// `2 sqrt(2/pi)`: linear term of the logistic argument.
pub const GELU_ARG_LINEAR: f32 = 1.595_769_2;
/// `2 sqrt(2/pi) * 0.044715`: cubic term of the logistic argument.
pub const GELU_ARG_CUBIC: f32 = 0.071_354_814;

/// `dst = exp(src)`.
///
/// 1. clamp `src` to `[EXP_CLAMP_LO, EXP_CLAMP_HI]`
/// 2. `k = round(x * log2(e))`, `r = x - k ln 2` (two-step Cody-Waite)
/// 3. `p = 1 + r + r^2 q(r)` with `q` the degree-5 Horner polynomial
/// 4. `exp(x) = 2 * (p * 2^(k-1))`
///
/// Building `2^(k-1)` keeps the exponent field representable at the upper
/// clamp, and makes everything below `EXP_CLAMP_LO` flush to zero.
/// `dst` may alias `src`; `s` must not alias either.
pub fn emit_exp<E: SimdOps>(e: &mut E, dst: VReg, src: VReg, s: [VReg; 3]) -> Result<(), String> {
    let [r, t, k] = s;

    e.vbroadcast_const(t, EXP_CLAMP_LO)?;
    e.vmax(r, src, t)?;
    e.vbroadcast_const(t, EXP_CLAMP_HI)?;
    e.vmin(r, r, t)?;

    e.vbroadcast_const(t, EXP_LOG2E)?;
    e.vmul(t, r, t)?;
    e.vround(k, t)?;

    e.vbroadcast_const(t, EXP_C1)?;
    e.vfmla(r, k, t)?;
    e.vbroadcast_const(t, EXP_C2)?;
    e.vfmla(r, k, t)?;

    // k <- bits of 2^(k-1)
    e.vbroadcast_const(t, 1.0)?;
    e.vsub(k, k, t)?;
    e.vcvt_f32_i32(k, k)?;
    e.vbroadcast_bits(t, EXP_BIAS)?;
    e.vadd_i32(k, k, t)?;
    e.vshl_i32(k, k, 23)?;

    // Horner, alternating accumulators so each step is one fmla
    e.vbroadcast_const(dst, EXP_P0)?;
    e.vbroadcast_const(t, EXP_P1)?;
    e.vfmla(t, dst, r)?;
    e.vbroadcast_const(dst, EXP_P2)?;
    e.vfmla(dst, t, r)?;
    e.vbroadcast_const(t, EXP_P3)?;
    e.vfmla(t, dst, r)?;
    e.vbroadcast_const(dst, EXP_P4)?;
    e.vfmla(dst, t, r)?;
    e.vbroadcast_const(t, EXP_P5)?;
    e.vfmla(t, dst, r)?;

    e.vmul(dst, r, r)?;
    e.vmul(dst, dst, t)?;
    e.vadd(dst, dst, r)?;
    e.vbroadcast_const(t, 1.0)?;
    e.vadd(dst, dst, t)?;

    e.vmul(dst, dst, k)?;
    e.vadd(dst, dst, dst)
}

/// `x = 1 / (1 + exp(-x))`.
pub fn emit_logistic<E: SimdOps>(e: &mut E, x: VReg, s: [VReg; 4]) -> Result<(), String> {
    let [a, b, c, d] = s;
    e.vneg(a, x)?;
    emit_exp(e, x, a, [b, c, d])?;
    e.vbroadcast_const(a, 1.0)?;
    e.vadd(x, x, a)?;
    e.vdiv(x, a, x)
}

/// `x = tanh(x)`.
///
/// `|x| < 0.5` uses the odd polynomial `x + x^3 q(x^2)`; elsewhere
/// `sign(x) * (1 - 2 / (exp(2|x|) + 1))`. NaN falls through the second
/// branch unchanged. Uses the backend mask.
pub fn emit_tanh<E: SimdOps>(e: &mut E, x: VReg, s: [VReg; 5]) -> Result<(), String> {
    let [abs, big, x2, p, q] = s;

    e.vabs(abs, x)?;
    e.vadd(big, abs, abs)?;
    emit_exp(e, big, big, [x2, p, q])?;
    e.vbroadcast_const(x2, 1.0)?;
    e.vadd(big, big, x2)?;
    e.vbroadcast_const(p, 2.0)?;
    e.vdiv(big, p, big)?;
    e.vsub(big, x2, big)?;

    e.vmul(x2, x, x)?;
    let [c3, c5, c7, c9, c11, c13, c15] = TANH_POLY;
    e.vbroadcast_const(p, c15)?;
    e.vbroadcast_const(q, c13)?;
    e.vfmla(q, p, x2)?;
    e.vbroadcast_const(p, c11)?;
    e.vfmla(p, q, x2)?;
    e.vbroadcast_const(q, c9)?;
    e.vfmla(q, p, x2)?;
    e.vbroadcast_const(p, c7)?;
    e.vfmla(p, q, x2)?;
    e.vbroadcast_const(q, c5)?;
    e.vfmla(q, p, x2)?;
    e.vbroadcast_const(p, c3)?;
    e.vfmla(p, q, x2)?;
    e.vmul(p, p, x2)?;
    e.vmul(p, p, x)?;
    e.vadd(p, p, x)?;

    // restore the sign on the large branch
    e.vneg(q, big)?;
    e.vbroadcast_const(x2, 0.0)?;
    e.vcmp_gt(x2, x)?;
    e.vselect(big, q, big)?;

    e.vbroadcast_const(x2, TANH_POLY_BOUND)?;
    e.vcmp_gt(x2, abs)?;
    e.vselect(x, p, big)
}

/// `dst = expm1(src)`.
///
/// `|x| < EXPM1_POLY_BOUND` takes `x + x^2 q(x)` with `q` the Taylor tail,
/// so small arguments keep full relative precision; elsewhere `exp(x) - 1`.
/// `dst` must not alias `src` or `s`.
pub fn emit_expm1<E: SimdOps>(e: &mut E, dst: VReg, src: VReg, s: [VReg; 3]) -> Result<(), String> {
    let [a, b, c] = s;
    emit_exp(e, dst, src, [a, b, c])?;
    e.vbroadcast_const(a, 1.0)?;
    e.vsub(dst, dst, a)?;

    let (last, rest) = EXPM1_POLY.split_last().ok_or("empty expm1 polynomial")?;
    let (mut acc, mut tmp) = (a, b);
    e.vbroadcast_const(acc, *last)?;
    for &coeff in rest.iter().rev() {
        e.vbroadcast_const(tmp, coeff)?;
        e.vfmla(tmp, acc, src)?;
        std::mem::swap(&mut acc, &mut tmp);
    }
    e.vmul(acc, acc, src)?;
    e.vmov(tmp, src)?;
    e.vfmla(tmp, acc, src)?;

    e.vabs(acc, src)?;
    e.vbroadcast_const(c, EXPM1_POLY_BOUND)?;
    e.vcmp_gt(c, acc)?;
    e.vselect(dst, tmp, dst)
}

/// `x = 2 sqrt(2/pi) (x + 0.044715 x^3)`, so that
/// `0.5 (1 + tanh(u)) = logistic(x)` for the GELU tanh argument `u`.
pub fn emit_gelu_arg<E: SimdOps>(e: &mut E, x: VReg, s: [VReg; 2]) -> Result<(), String> {
    let [a, b] = s;
    e.vmul(a, x, x)?;
    e.vbroadcast_const(b, GELU_ARG_CUBIC)?;
    e.vmul(a, a, b)?;
    e.vbroadcast_const(b, GELU_ARG_LINEAR)?;
    e.vadd(a, a, b)?;
    e.vmul(x, a, x)
}
