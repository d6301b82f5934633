//! End-to-end tests: descriptor → PD → generated kernel → driver.
//!
//! Every engine below runs through the emulator, so the same assertions
//! cover Advanced SIMD and SVE at several vector lengths on any host.

use half::{bf16, f16};

use eltwise_jit::scalar_ops::{eltwise_fwd, reference_bwd, reference_fwd};
use eltwise_jit::{
    AlgKind, CpuCaps, DType, EltwiseBackward, EltwiseDesc, EltwiseForward, Element, Engine, Isa,
    JitError, Layout, MemoryDesc, PostOp, PrimitiveAttr,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engines() -> Vec<(&'static str, Engine)> {
    init_logging();
    vec![
        ("asimd", Engine::with_caps(CpuCaps::emulated(Isa::Asimd, 16))),
        ("sve128", Engine::with_caps(CpuCaps::emulated(Isa::Sve, 16))),
        ("sve256", Engine::with_caps(CpuCaps::emulated(Isa::Sve, 32))),
        ("sve512", Engine::with_caps(CpuCaps::emulated(Isa::Sve, 64))),
        ("sve2_256", Engine::with_caps(CpuCaps::emulated(Isa::Sve, 32).with_sve2(true))),
    ]
}

fn attr() -> PrimitiveAttr {
    PrimitiveAttr::default()
}

fn fwd_desc(alg: AlgKind, alpha: f32, beta: f32, n: usize, dtype: DType) -> EltwiseDesc {
    let md = MemoryDesc::plain(&[n], dtype);
    EltwiseDesc::forward(alg, alpha, beta, md.clone(), md)
}

fn bwd_desc(alg: AlgKind, alpha: f32, beta: f32, n: usize, use_dst: bool) -> EltwiseDesc {
    let md = MemoryDesc::plain(&[n], DType::F32);
    EltwiseDesc::backward(alg, alpha, beta, md.clone(), md.clone(), md, use_dst)
}

/// Algorithms with a kernel body.
fn kernel_algs() -> impl Iterator<Item = AlgKind> {
    AlgKind::ALL.iter().copied().filter(|&a| eltwise_fwd(a, 0.0, 0.0, 0.0).is_some())
}

fn alpha_beta(alg: AlgKind) -> (f32, f32) {
    match alg {
        AlgKind::Relu => (0.1, 0.0),
        AlgKind::Elu => (0.8, 0.0),
        AlgKind::Linear => (0.5, 0.25),
        AlgKind::Swish => (1.2, 0.0),
        AlgKind::Clip => (-1.5, 2.0),
        AlgKind::HardSigmoid | AlgKind::HardSwish => (1.0 / 6.0, 0.5),
        _ => (0.0, 0.0),
    }
}

/// Results that are one correctly rounded f32 operation (or a selection)
/// must match the reference exactly.
fn is_exact(alg: AlgKind) -> bool {
    matches!(
        alg,
        AlgKind::Relu | AlgKind::Abs | AlgKind::Square | AlgKind::Sqrt | AlgKind::Linear | AlgKind::Clip
    )
}

fn inputs(n: usize, alg: AlgKind) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let x = if i == 0 { 0.0 } else { (i as f32 * 0.618).sin() * 5.0 };
            if alg == AlgKind::Sqrt {
                x.abs()
            } else {
                x
            }
        })
        .collect()
}

fn convert<T: Element>(v: &[f32]) -> Vec<T> {
    v.iter().map(|&x| T::from_f32(x)).collect()
}

/// Largest distance, in representable steps of the storage type, a forward
/// result may sit from the rounded reference.
fn max_ulps(alg: AlgKind, dtype: DType) -> u32 {
    if is_exact(alg) {
        return 0;
    }
    if dtype != DType::F32 {
        return 1;
    }
    match alg {
        AlgKind::HardSigmoid => 1,
        AlgKind::HardSwish => 2,
        AlgKind::Exp | AlgKind::Logistic | AlgKind::Tanh | AlgKind::Elu => 8,
        AlgKind::Swish => 16,
        // the rounding of the tanh argument u is scaled by |2u|
        AlgKind::GeluTanh => 64,
        _ => 0,
    }
}

/// Storage bits mapped to a monotonic integer line (-0 and +0 coincide).
fn ordered<T: Element>(v: T) -> i64 {
    let sign = 1u32 << (T::DTYPE.size_bytes() * 8 - 1);
    let bits = v.to_bits_u32();
    if bits & sign != 0 {
        -i64::from(bits & (sign - 1))
    } else {
        i64::from(bits)
    }
}

fn assert_ulps<T: Element>(got: &[T], want: &[T], max: u32, ctx: &str) {
    assert_eq!(got.len(), want.len());
    for (i, (&g, &w)) in got.iter().zip(want).enumerate() {
        if w.to_f32().is_nan() {
            assert!(g.to_f32().is_nan(), "{ctx}[{i}]: got {}, want NaN", g.to_f32());
            continue;
        }
        let d = (ordered(g) - ordered(w)).unsigned_abs();
        assert!(d <= u64::from(max), "{ctx}[{i}]: got {}, want {} ({d} ulp)", g.to_f32(), w.to_f32());
    }
}

fn assert_close<T: Element>(got: &[T], want: &[T], exact: bool, (rtol, atol): (f32, f32), ctx: &str) {
    assert_eq!(got.len(), want.len());
    for (i, (&g, &w)) in got.iter().zip(want).enumerate() {
        let (g, w) = (g.to_f32(), w.to_f32());
        if w.is_nan() {
            assert!(g.is_nan(), "{ctx}[{i}]: got {g}, want NaN");
            continue;
        }
        if exact {
            assert_eq!(g, w, "{ctx}[{i}]");
        } else {
            assert!((g - w).abs() <= atol + rtol * w.abs(), "{ctx}[{i}]: got {g}, want {w}");
        }
    }
}

fn check_forward<T: Element>(engine: &Engine, name: &str, n: usize) {
    for alg in kernel_algs() {
        let (alpha, beta) = alpha_beta(alg);
        let desc = fwd_desc(alg, alpha, beta, n, T::DTYPE);
        let prim = EltwiseForward::new(engine, &desc, &attr())
            .unwrap_or_else(|e| panic!("{name} {alg} {}: {e}", T::DTYPE));
        let src: Vec<T> = convert(&inputs(n, alg));
        let mut dst = vec![T::from_f32(0.0); n];
        prim.forward(&src, &mut dst).unwrap();
        let want = reference_fwd(&desc, &src).unwrap();
        let ctx = format!("{name} fwd {alg} {}", T::DTYPE);
        assert_ulps(&dst, &want, max_ulps(alg, T::DTYPE), &ctx);
    }
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn test_relu_f32_seventeen_elements() {
    let src = [
        -3.0f32, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0, -5.0, -6.0, -7.0, -8.0, 9.0, 10.0, 11.0, 12.0, -13.0,
    ];
    let want = [0.0f32, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0, 9.0, 10.0, 11.0, 12.0, 0.0];
    for (name, engine) in engines() {
        let prim = EltwiseForward::new(&engine, &fwd_desc(AlgKind::Relu, 0.0, 0.0, 17, DType::F32), &attr()).unwrap();
        let mut dst = [f32::NAN; 17];
        prim.forward(&src, &mut dst).unwrap();
        assert_eq!(dst, want, "{name}");
    }
}

#[test]
fn test_relu_bf16_signs() {
    for (name, engine) in engines() {
        let prim = EltwiseForward::new(&engine, &fwd_desc(AlgKind::Relu, 0.0, 0.0, 8, DType::BF16), &attr()).unwrap();

        let pos: Vec<bf16> = [0.0f32, 0.5, 1.0, 1.5, 2.0, 100.0, 3.25, 1e-3].iter().map(|&x| bf16::from_f32(x)).collect();
        let mut dst = vec![bf16::from_f32(-1.0); 8];
        prim.forward(&pos, &mut dst).unwrap();
        assert_eq!(dst, pos, "{name}");

        let neg: Vec<bf16> = pos.iter().map(|&x| -x - bf16::from_f32(0.25)).collect();
        prim.forward(&neg, &mut dst).unwrap();
        assert!(dst.iter().all(|d| d.to_bits() == 0x0000), "{name}: {dst:?}");
    }
}

#[test]
fn test_logistic_of_zero_is_half() {
    for (name, engine) in engines() {
        let prim = EltwiseForward::new(&engine, &fwd_desc(AlgKind::Logistic, 0.0, 0.0, 1, DType::F32), &attr()).unwrap();
        let mut dst = [0.0f32];
        prim.forward(&[0.0f32], &mut dst).unwrap();
        assert_eq!(dst[0], 0.5, "{name}");
    }
}

#[test]
fn test_tanh_backward_use_dst_at_zero() {
    for (name, engine) in engines() {
        let prim = EltwiseBackward::new(&engine, &bwd_desc(AlgKind::Tanh, 0.0, 0.0, 4, true), &attr()).unwrap();
        let mut diff_src = [0.0f32; 4];
        prim.backward(&[0.0f32; 4], &[1.0f32; 4], &mut diff_src).unwrap();
        assert_eq!(diff_src, [1.0f32; 4], "{name}");
    }
}

#[test]
fn test_elu_saturates_at_negative_infinity() {
    for (name, engine) in engines() {
        let prim = EltwiseForward::new(&engine, &fwd_desc(AlgKind::Elu, 1.0, 0.0, 3, DType::F32), &attr()).unwrap();
        let mut dst = [f32::NAN; 3];
        prim.forward(&[f32::NEG_INFINITY, 0.0, 1.0], &mut dst).unwrap();
        assert!((dst[0] + 1.0).abs() < 1e-6, "{name}: {dst:?}");
        assert_eq!(dst[1], 0.0, "{name}");
        assert_eq!(dst[2], 1.0, "{name}");
    }
}

#[test]
fn test_thread_count_does_not_change_results() {
    let n = 1000;
    let src = inputs(n, AlgKind::GeluTanh);
    for (name, engine) in engines() {
        let desc = fwd_desc(AlgKind::GeluTanh, 0.0, 0.0, n, DType::F32);
        let single = EltwiseForward::new(&engine, &desc, &attr()).unwrap().with_threads(1);
        let multi = EltwiseForward::new(&engine, &desc, &attr()).unwrap().with_threads(7);
        let mut a = vec![0.0f32; n];
        let mut b = vec![0.0f32; n];
        single.forward(&src, &mut a).unwrap();
        multi.forward(&src, &mut b).unwrap();
        let a_bits: Vec<u32> = a.iter().map(|x| x.to_bits()).collect();
        let b_bits: Vec<u32> = b.iter().map(|x| x.to_bits()).collect();
        assert_eq!(a_bits, b_bits, "{name}");
    }
}

// ── Element-type fidelity ────────────────────────────────────────────

#[test]
fn test_forward_fidelity_f32() {
    for (name, engine) in engines() {
        check_forward::<f32>(&engine, name, 97);
    }
}

#[test]
fn test_forward_fidelity_bf16() {
    for (name, engine) in engines() {
        check_forward::<bf16>(&engine, name, 97);
    }
}

#[test]
fn test_forward_fidelity_f16() {
    for (name, engine) in engines() {
        check_forward::<f16>(&engine, name, 97);
    }
}

#[test]
fn test_elu_and_gelu_keep_precision_where_results_vanish() {
    // ELU near zero and the GELU negative tail both sit where exp(x) - 1 or
    // 1 + tanh(u) would cancel.
    let elu_src = [-1e-7f32, -3e-5, -1e-3, -0.2, -0.99, -1.0, -1.5, -6.0, 2e-6];
    let gelu_src = [-5.158f32, -4.0, -3.0, -1e-3, 1e-4, 2.5];
    for (name, engine) in engines() {
        for (alg, alpha, src) in [(AlgKind::Elu, 0.8, &elu_src[..]), (AlgKind::GeluTanh, 0.0, &gelu_src[..])] {
            let desc = fwd_desc(alg, alpha, 0.0, src.len(), DType::F32);
            let prim = EltwiseForward::new(&engine, &desc, &attr()).unwrap();
            let mut dst = vec![0.0f32; src.len()];
            prim.forward(src, &mut dst).unwrap();
            let want = reference_fwd(&desc, src).unwrap();
            assert_ulps(&dst, &want, max_ulps(alg, DType::F32), &format!("{name} {alg}"));
        }
    }
}

#[test]
fn test_zero_preserving_algorithms_keep_zero() {
    for (name, engine) in engines() {
        for alg in [AlgKind::Relu, AlgKind::Tanh, AlgKind::GeluTanh, AlgKind::Swish, AlgKind::Square] {
            for dtype in [DType::F32, DType::BF16, DType::F16] {
                let prim = EltwiseForward::new(&engine, &fwd_desc(alg, 0.0, 0.0, 5, dtype), &attr()).unwrap();
                // 5 zeros, bit patterns compared through u32
                let bits: Vec<u32> = match dtype {
                    DType::F32 => {
                        let mut d = [1.0f32; 5];
                        prim.forward(&[0.0f32; 5], &mut d).unwrap();
                        d.iter().map(|x| x.to_bits_u32()).collect()
                    }
                    DType::BF16 => {
                        let mut d = [bf16::ONE; 5];
                        prim.forward(&[bf16::ZERO; 5], &mut d).unwrap();
                        d.iter().map(|x| x.to_bits_u32()).collect()
                    }
                    DType::F16 => {
                        let mut d = [f16::ONE; 5];
                        prim.forward(&[f16::ZERO; 5], &mut d).unwrap();
                        d.iter().map(|x| x.to_bits_u32()).collect()
                    }
                };
                assert!(bits.iter().all(|&b| b == 0), "{name} {alg} {dtype}: {bits:x?}");
            }
        }
    }
}

// ── Backward chain rule ──────────────────────────────────────────────

#[test]
fn test_backward_chain_rule() {
    let n = 61;
    for (name, engine) in engines() {
        for alg in kernel_algs() {
            for use_dst in [false, true] {
                if use_dst && !alg.supports_use_dst() {
                    continue;
                }
                let (alpha, beta) = alpha_beta(alg);
                let desc = bwd_desc(alg, alpha, beta, n, use_dst);
                let prim = EltwiseBackward::new(&engine, &desc, &attr())
                    .unwrap_or_else(|e| panic!("{name} {alg} use_dst={use_dst}: {e}"));
                let data: Vec<f32> = if alg == AlgKind::Sqrt {
                    inputs(n, alg).iter().map(|x| x + 0.5).collect()
                } else {
                    inputs(n, alg)
                };
                let diff_dst: Vec<f32> = (0..n).map(|i| 1.0 - 0.03 * i as f32).collect();
                let mut diff_src = vec![f32::NAN; n];
                prim.backward(&data, &diff_dst, &mut diff_src).unwrap();
                let want = reference_bwd(&desc, &data, &diff_dst).unwrap();
                let ctx = format!("{name} bwd {alg} use_dst={use_dst}");
                assert_close(&diff_src, &want, false, (1e-5, 1e-5), &ctx);
            }
        }
    }
}

#[test]
fn test_backward_in_place_on_diff_dst() {
    let n = 23;
    let engine = Engine::with_caps(CpuCaps::emulated(Isa::Sve, 32));
    let desc = bwd_desc(AlgKind::Square, 0.0, 0.0, n, false);
    let prim = EltwiseBackward::new(&engine, &desc, &attr()).unwrap();
    let data = inputs(n, AlgKind::Square);
    let mut grad = vec![2.0f32; n];
    let args = eltwise_jit::ExecArgs::new()
        .input(eltwise_jit::ArgKind::Src, data.as_ptr())
        .input(eltwise_jit::ArgKind::DiffDst, grad.as_ptr())
        .output(eltwise_jit::ArgKind::DiffSrc, grad.as_mut_ptr());
    // SAFETY: all three buffers hold `n` f32 elements.
    unsafe { prim.execute(&args) }.unwrap();
    for (g, x) in grad.iter().zip(&data) {
        assert_eq!(*g, 4.0 * x);
    }
}

// ── Tails, aliasing, offsets ─────────────────────────────────────────

fn check_tail_guard<T: Element + PartialEq + std::fmt::Debug>(engine: &Engine, name: &str) {
    let sentinel = T::from_f32(-777.0);
    for n in [1usize, 2, 3, 5, 7, 8, 9, 15, 17, 31, 33, 63, 65, 129] {
        let prim = EltwiseForward::new(engine, &fwd_desc(AlgKind::Abs, 0.0, 0.0, n, T::DTYPE), &attr()).unwrap();
        let src: Vec<T> = convert(&inputs(n, AlgKind::Abs));
        let mut dst = vec![sentinel; n + 16];
        prim.forward(&src, &mut dst).unwrap();
        let want = reference_fwd(prim.pd().desc(), &src).unwrap();
        assert_eq!(&dst[..n], &want[..], "{name} {} n={n}", T::DTYPE);
        assert!(dst[n..].iter().all(|&g| g == sentinel), "{name} {} n={n}: wrote past the end", T::DTYPE);
    }
}

#[test]
fn test_tail_never_writes_past_end() {
    for (name, engine) in engines() {
        check_tail_guard::<f32>(&engine, name);
        check_tail_guard::<bf16>(&engine, name);
        check_tail_guard::<f16>(&engine, name);
    }
}

#[test]
fn test_in_place_matches_out_of_place() {
    let n = 100;
    for (name, engine) in engines() {
        let prim = EltwiseForward::new(&engine, &fwd_desc(AlgKind::Tanh, 0.0, 0.0, n, DType::BF16), &attr()).unwrap();
        let src: Vec<bf16> = convert(&inputs(n, AlgKind::Tanh));
        let mut out = vec![bf16::ZERO; n];
        prim.forward(&src, &mut out).unwrap();
        let mut inplace = src.clone();
        prim.forward_inplace(&mut inplace).unwrap();
        assert_eq!(out, inplace, "{name}");
    }
}

#[test]
fn test_offset_applied_to_both_tensors() {
    let n = 13;
    let engine = Engine::with_caps(CpuCaps::emulated(Isa::Sve, 64));
    let md = MemoryDesc::plain(&[n], DType::F32).with_offset(3);
    let desc = EltwiseDesc::forward(AlgKind::Square, 0.0, 0.0, md.clone(), md);
    let prim = EltwiseForward::new(&engine, &desc, &attr()).unwrap();
    let src: Vec<f32> = (0..n + 3).map(|i| i as f32).collect();
    let mut dst = vec![-1.0f32; n + 3];
    prim.forward(&src, &mut dst).unwrap();
    assert_eq!(&dst[..3], &[-1.0, -1.0, -1.0]);
    for i in 3..n + 3 {
        assert_eq!(dst[i], (i * i) as f32);
    }
}

#[test]
fn test_blocked_padding_processed_when_zero_preserved() {
    let engine = Engine::with_caps(CpuCaps::emulated(Isa::Asimd, 16));
    // 2 x 5 blocked by 4 on dim 1: 2 x 8 physical elements
    let md = MemoryDesc::new(&[2, 5], DType::F32, Layout::Blocked { dim: 1, block: 4 });
    let relu = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, md.clone(), md.clone());
    let prim = EltwiseForward::new(&engine, &relu, &attr()).unwrap();
    assert_eq!(prim.pd().nelems(), 16);
    let src: Vec<f32> = (0..16).map(|i| i as f32 - 8.0).collect();
    let mut dst = vec![f32::NAN; 16];
    prim.forward(&src, &mut dst).unwrap();
    assert!(dst.iter().zip(&src).all(|(d, s)| *d == s.max(0.0)));

    let exp = EltwiseDesc::forward(AlgKind::Exp, 0.0, 0.0, md.clone(), md);
    assert!(EltwiseForward::new(&engine, &exp, &attr()).unwrap_err().is_unimplemented());
}

// ── PD rejections and argument checks ────────────────────────────────

#[test]
fn test_rejections_are_unimplemented() {
    let engine = Engine::with_caps(CpuCaps::emulated(Isa::Sve, 32));
    let n = 8;

    let half_bwd = {
        let md = MemoryDesc::plain(&[n], DType::BF16);
        EltwiseDesc::backward(AlgKind::Relu, 0.0, 0.0, md.clone(), md.clone(), md, false)
    };
    assert!(EltwiseBackward::new(&engine, &half_bwd, &attr()).unwrap_err().is_unimplemented());

    let mish = fwd_desc(AlgKind::Mish, 0.0, 0.0, n, DType::F32);
    assert!(EltwiseForward::new(&engine, &mish, &attr()).unwrap_err().is_unimplemented());

    let mixed = EltwiseDesc::forward(
        AlgKind::Relu,
        0.0,
        0.0,
        MemoryDesc::plain(&[n], DType::F32),
        MemoryDesc::plain(&[n], DType::BF16),
    );
    assert!(EltwiseForward::new(&engine, &mixed, &attr()).unwrap_err().is_unimplemented());

    let post_ops = PrimitiveAttr {
        post_ops: vec![PostOp::Sum { scale: 1.0 }],
        output_scale: None,
    };
    let relu = fwd_desc(AlgKind::Relu, 0.0, 0.0, n, DType::F32);
    assert!(EltwiseForward::new(&engine, &relu, &post_ops).unwrap_err().is_unimplemented());

    let bare = Engine::with_caps(CpuCaps::none());
    assert!(EltwiseForward::new(&bare, &relu, &attr()).unwrap_err().is_unimplemented());

    let swish_dst = bwd_desc(AlgKind::Swish, 1.0, 0.0, n, true);
    assert!(EltwiseBackward::new(&engine, &swish_dst, &attr()).unwrap_err().is_unimplemented());
}

#[test]
fn test_asimd_chosen_without_sve() {
    let engine = Engine::with_caps(CpuCaps::emulated(Isa::Asimd, 16));
    let prim = EltwiseForward::new(&engine, &fwd_desc(AlgKind::Exp, 0.0, 0.0, 4, DType::F16), &attr()).unwrap();
    assert_eq!(prim.pd().name(), "jit:asimd:f16");
    assert!(!prim.kernel().is_native());
}

#[test]
fn test_typed_wrappers_check_buffers() {
    let engine = Engine::with_caps(CpuCaps::emulated(Isa::Sve, 32));
    let prim = EltwiseForward::new(&engine, &fwd_desc(AlgKind::Abs, 0.0, 0.0, 10, DType::BF16), &attr()).unwrap();

    let mut dst = vec![0.0f32; 10];
    let err = prim.forward(&[0.0f32; 10], &mut dst).unwrap_err();
    assert!(matches!(err, JitError::InvalidArguments(_)), "{err}");

    let mut short = vec![bf16::ZERO; 9];
    let err = prim.forward(&[bf16::ZERO; 10], &mut short).unwrap_err();
    assert!(matches!(err, JitError::InvalidArguments(_)), "{err}");
}

// ── Native execution ─────────────────────────────────────────────────

#[test]
fn test_native_matches_emulator_when_available() {
    let caps = CpuCaps::detect();
    if !caps.mayiuse(Isa::Asimd) {
        return;
    }
    let n = 77;
    let native = Engine::with_caps(caps);
    let emulated = Engine::with_caps(caps.into_emulated());
    for alg in [AlgKind::GeluTanh, AlgKind::Logistic, AlgKind::Elu] {
        let desc = fwd_desc(alg, 1.0, 0.0, n, DType::F32);
        let a = EltwiseForward::new(&native, &desc, &attr()).unwrap();
        let b = EltwiseForward::new(&emulated, &desc, &attr()).unwrap();
        assert!(a.kernel().is_native());
        let src = inputs(n, alg);
        let mut da = vec![0.0f32; n];
        let mut db = vec![0.0f32; n];
        a.forward(&src, &mut da).unwrap();
        b.forward(&src, &mut db).unwrap();
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&da), bits(&db), "{alg}");
    }
}
