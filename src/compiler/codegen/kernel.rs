//! Eltwise JIT kernel generator.
//!
//! Emits one AArch64 routine per (target, element type, direction,
//! algorithm). The routine takes a pointer to [`KernelArgs`] in `x0` and
//! processes `work_amount` contiguous elements:
//!
//! ```text
//!   prologue; load args; injector.load_table_addr
//!   while work >= STEP { body; advance pointers; work -= STEP }
//!   tail (SVE: one more predicated pass, NEON: lane gather/compute/scatter)
//!   epilogue; ret; constants table
//! ```
//!
//! Register convention (AAPCS64, caller-saved only):
//! - x0 = args, x11 = src, x8 = dst, x10 = diff_dst, x6 = remaining work
//! - x9 = injector table base, x16 = injector address scratch,
//!   x12-x14 = NEON tail lane pointers
//! - v1/z1 = values (even half of a 16-bit vector), v2/z2 = odd half
//! - v3/z3 = diff_dst, v4/z4 = conversion temp, v5-v6/z5 = conversion constants
//! - v16-v23/z16-z23 = injector scratch; v8-v15 are never touched
//! - p5 = f32 lane predicate, p7 = 16-bit lane predicate,
//!   p1/p4 = injector mask/governing predicates

use std::ffi::c_void;

use super::asm::{Assembler, Cond, PReg, XReg, FP, LR, SP, XZR};
use super::injector::{EltwiseInjector, InjectorParams, RegisterContract};
use super::neon::{self, Arrangement};
use super::simd_ops::VReg;
use super::sve::{self, ESize};
use super::target_desc::TargetDesc;
use super::CodegenOutput;
use crate::desc::{AlgKind, PropKind};
use crate::dispatch::Isa;
use crate::types::DType;

/// Argument record passed by reference in `x0`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KernelArgs {
    pub src: *const c_void,
    pub dst: *mut c_void,
    pub diff_dst: *const c_void,
    /// Elements to process.
    pub work_amount: usize,
}

const OFF_SRC: u32 = 0;
const OFF_DST: u32 = 8;
const OFF_DIFF_DST: u32 = 16;
const OFF_WORK: u32 = 24;

const REG_PARAM: XReg = XReg(0);
const REG_SRC: XReg = XReg(11);
const REG_DST: XReg = XReg(8);
const REG_DIFF_DST: XReg = XReg(10);
const REG_WORK: XReg = XReg(6);
const REG_TABLE: XReg = XReg(9);
const REG_ADDR: XReg = XReg(16);
const REG_SRC_LANE: XReg = XReg(12);
const REG_DST_LANE: XReg = XReg(13);
const REG_DIFF_DST_LANE: XReg = XReg(14);

const VMM_SRC: VReg = VReg(1);
const VMM_ODD: VReg = VReg(2);
const VMM_DIFF_DST: VReg = VReg(3);
const VMM_TMP: VReg = VReg(4);
/// BF16 rounding bias 0x7FFF per lane.
const VMM_BIAS: VReg = VReg(5);
/// Integer 1 per lane (NEON only; SVE uses an `and` immediate).
const VMM_ONE: VReg = VReg(6);

const PG_S: PReg = PReg(5);
const PG_H: PReg = PReg(7);
const P_MASK: PReg = PReg(1);
const P_TMP: PReg = PReg(4);

const AUX_FIRST: u8 = 16;
const AUX_COUNT: u8 = 8;

/// Everything that determines the emitted code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelConf {
    pub target: TargetDesc,
    pub dtype: DType,
    pub prop: PropKind,
    pub alg: AlgKind,
    pub alpha: f32,
    pub beta: f32,
    pub use_dst: bool,
}

impl KernelConf {
    fn is_bwd(&self) -> bool {
        self.prop == PropKind::Backward
    }

    /// Elements consumed by one full loop iteration.
    pub fn step(&self) -> usize {
        self.target.step_elems(self.dtype)
    }
}

/// The fixed register contract handed to the injector.
pub fn injector_contract() -> RegisterContract {
    RegisterContract {
        table: REG_TABLE,
        addr: REG_ADDR,
        p_mask: P_MASK,
        p_tmp: P_TMP,
        aux: (AUX_FIRST..AUX_FIRST + AUX_COUNT).map(VReg).collect(),
    }
}

pub struct KernelGenerator {
    conf: KernelConf,
    asm: Assembler,
    injector: EltwiseInjector,
}

impl KernelGenerator {
    pub fn new(conf: KernelConf) -> Result<Self, String> {
        let t = conf.target;
        if !t.isa.is_valid_vlen(t.vlen) {
            return Err(format!("invalid {} vector length {}", t.isa, t.vlen));
        }
        if conf.is_bwd() && conf.dtype != DType::F32 {
            return Err(format!("backward kernels are f32 only, got {}", conf.dtype));
        }
        let params = InjectorParams {
            alg: conf.alg,
            alpha: conf.alpha,
            beta: conf.beta,
            scale: 1.0,
            save_state: conf.is_bwd(),
            prop: conf.prop,
            use_dst: conf.use_dst,
        };
        let injector = EltwiseInjector::new(t.isa, params, injector_contract())?;
        Ok(KernelGenerator { conf, asm: Assembler::new(), injector })
    }

    pub fn generate(mut self) -> Result<CodegenOutput, String> {
        self.asm.stp_pre(FP, LR, SP, -16)?;
        self.asm.add_imm(FP, SP, 0)?;

        self.asm.ldr_x(REG_SRC, REG_PARAM, OFF_SRC)?;
        self.asm.ldr_x(REG_DST, REG_PARAM, OFF_DST)?;
        if self.conf.is_bwd() {
            self.asm.ldr_x(REG_DIFF_DST, REG_PARAM, OFF_DIFF_DST)?;
        }
        self.asm.ldr_x(REG_WORK, REG_PARAM, OFF_WORK)?;

        self.injector.load_table_addr(&mut self.asm)?;

        match self.conf.target.isa {
            Isa::Sve => self.emit_sve()?,
            Isa::Asimd => self.emit_neon()?,
        }

        self.asm.ldp_post(FP, LR, SP, 16)?;
        self.asm.ret();
        self.injector.prepare_table(&mut self.asm)?;

        let n_consts = self.injector.constants().len();
        let code = self.asm.finish()?;
        log::debug!(
            "eltwise kernel {} {} {} {:?}: {} bytes, {} constants",
            self.conf.target.isa,
            self.conf.dtype,
            self.conf.alg,
            self.conf.prop,
            code.len(),
            n_consts
        );
        if log::log_enabled!(log::Level::Trace) {
            for (i, w) in code.chunks_exact(4).enumerate() {
                log::trace!("{:06x}: {:08x}", i * 4, u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
            }
        }
        Ok(CodegenOutput { code, n_consts })
    }

    /// Registers holding F32 values after up-conversion.
    fn value_regs(&self) -> &'static [VReg] {
        if self.conf.dtype.is_half() {
            &[VMM_SRC, VMM_ODD]
        } else {
            &[VMM_SRC]
        }
    }

    // ── SVE ─────────────────────────────────────────────────────────────

    fn emit_sve(&mut self) -> Result<(), String> {
        let step = self.conf.step() as u32;
        let vlen = self.conf.target.vlen as u32;
        let half = self.conf.dtype.is_half();

        self.asm.emit(sve::ptrue(PG_S.0, ESize::S));
        if half {
            self.asm.emit(sve::ptrue(PG_H.0, ESize::H));
        }
        if self.conf.dtype == DType::BF16 {
            self.asm.emit(sve::dupm_s(VMM_BIAS.0, 0x7FFF)?);
        }

        let l_loop = self.asm.new_label();
        let l_tail = self.asm.new_label();
        let l_end = self.asm.new_label();

        self.asm.cmp_imm(REG_WORK, step)?;
        self.asm.b_cond(Cond::Lt, l_tail)?;

        self.asm.bind(l_loop)?;
        self.emit_sve_body()?;
        self.asm.add_imm(REG_SRC, REG_SRC, vlen)?;
        self.asm.add_imm(REG_DST, REG_DST, vlen)?;
        if self.conf.is_bwd() {
            self.asm.add_imm(REG_DIFF_DST, REG_DIFF_DST, vlen)?;
        }
        self.asm.sub_imm(REG_WORK, REG_WORK, step)?;
        self.asm.cmp_imm(REG_WORK, step)?;
        self.asm.b_cond(Cond::Ge, l_loop)?;

        // Remainder: one more pass with a partial predicate. Work then
        // goes non-positive and the second visit falls through to the end.
        self.asm.bind(l_tail)?;
        self.asm.cmp_imm(REG_WORK, 0)?;
        self.asm.b_cond(Cond::Le, l_end)?;
        if half {
            self.asm.emit(sve::whilelt(PG_H.0, ESize::H, XZR.0, REG_WORK.0));
        } else {
            self.asm.emit(sve::whilelt(PG_S.0, ESize::S, XZR.0, REG_WORK.0));
        }
        self.asm.b(l_loop)?;

        self.asm.bind(l_end)
    }

    fn emit_sve_body(&mut self) -> Result<(), String> {
        match self.conf.dtype {
            DType::F32 => {
                self.asm.emit(sve::ld1w(VMM_SRC.0, PG_S.0, REG_SRC.0)?);
                self.injector.compute_vector(&mut self.asm, VMM_SRC)?;
                if self.conf.is_bwd() {
                    self.asm.emit(sve::ld1w(VMM_DIFF_DST.0, PG_S.0, REG_DIFF_DST.0)?);
                    self.asm.emit(sve::fmul(VMM_SRC.0, VMM_SRC.0, VMM_DIFF_DST.0));
                }
                self.asm.emit(sve::st1w(VMM_SRC.0, PG_S.0, REG_DST.0)?);
            }
            DType::BF16 => {
                self.asm.emit(sve::ld1h(VMM_SRC.0, PG_H.0, REG_SRC.0)?);
                self.asm.emit(sve::mov(VMM_ODD.0, VMM_SRC.0));
                self.asm.emit(sve::lsl_s(VMM_SRC.0, VMM_SRC.0, 16)?);
                self.asm.emit(sve::and_imm_s(VMM_ODD.0, 0xFFFF_0000)?);

                self.injector.compute_vector_range(&mut self.asm, &[VMM_SRC, VMM_ODD])?;

                for r in [VMM_SRC, VMM_ODD] {
                    self.asm.emit(sve::lsr_s(VMM_TMP.0, r.0, 16)?);
                    self.asm.emit(sve::and_imm_s(VMM_TMP.0, 1)?);
                    self.asm.emit(sve::add_s(r.0, r.0, VMM_TMP.0));
                    self.asm.emit(sve::add_s(r.0, r.0, VMM_BIAS.0));
                }
                self.asm.emit(sve::lsr_s(VMM_SRC.0, VMM_SRC.0, 16)?);
                self.asm.emit(sve::and_imm_s(VMM_ODD.0, 0xFFFF_0000)?);
                self.asm.emit(sve::orr_d(VMM_SRC.0, VMM_SRC.0, VMM_ODD.0));
                self.asm.emit(sve::st1h(VMM_SRC.0, PG_H.0, REG_DST.0)?);
            }
            DType::F16 => {
                let (src, odd, pg) = (VMM_SRC.0, VMM_ODD.0, PG_S.0);
                self.asm.emit(sve::ld1h(src, PG_H.0, REG_SRC.0)?);
                if self.conf.target.sve2 {
                    self.asm.emit(sve::fcvtlt_h2s(odd, pg, src)?);
                } else {
                    self.asm.emit(sve::lsr_s(odd, src, 16)?);
                    self.asm.emit(sve::fcvt_h2s(odd, pg, odd)?);
                }
                self.asm.emit(sve::fcvt_h2s(src, pg, src)?);

                self.injector.compute_vector_range(&mut self.asm, &[VMM_SRC, VMM_ODD])?;

                self.asm.emit(sve::fcvt_s2h(src, pg, src)?);
                if self.conf.target.sve2 {
                    self.asm.emit(sve::fcvtnt_s2h(src, pg, odd)?);
                } else {
                    self.asm.emit(sve::fcvt_s2h(odd, pg, odd)?);
                    self.asm.emit(sve::lsl_s(odd, odd, 16)?);
                    self.asm.emit(sve::orr_d(src, src, odd));
                }
                self.asm.emit(sve::st1h(src, PG_H.0, REG_DST.0)?);
            }
        }
        Ok(())
    }

    // ── NEON ────────────────────────────────────────────────────────────

    fn emit_neon(&mut self) -> Result<(), String> {
        let step = self.conf.step() as u32;
        let arr = if self.conf.dtype.is_half() { Arrangement::H8 } else { Arrangement::S4 };

        if self.conf.dtype == DType::BF16 {
            self.asm.emit(neon::movi_4s(VMM_ONE.0, 1));
            self.asm.emit(neon::movi_4s_msl8(VMM_BIAS.0, 0x7F));
        }

        let l_loop = self.asm.new_label();
        let l_tail = self.asm.new_label();
        let l_end = self.asm.new_label();

        self.asm.cmp_imm(REG_WORK, step)?;
        self.asm.b_cond(Cond::Lt, l_tail)?;

        self.asm.bind(l_loop)?;
        self.asm.emit(neon::ld1(VMM_SRC.0, arr, REG_SRC.0));
        if self.conf.is_bwd() {
            self.asm.emit(neon::ld1(VMM_DIFF_DST.0, arr, REG_DIFF_DST.0));
        }
        self.emit_neon_compute()?;
        self.asm.emit(neon::st1(VMM_SRC.0, arr, REG_DST.0));
        self.asm.add_imm(REG_SRC, REG_SRC, 16)?;
        self.asm.add_imm(REG_DST, REG_DST, 16)?;
        if self.conf.is_bwd() {
            self.asm.add_imm(REG_DIFF_DST, REG_DIFF_DST, 16)?;
        }
        self.asm.sub_imm(REG_WORK, REG_WORK, step)?;
        self.asm.cmp_imm(REG_WORK, step)?;
        self.asm.b_cond(Cond::Ge, l_loop)?;

        self.asm.bind(l_tail)?;
        self.asm.cmp_imm(REG_WORK, 0)?;
        self.asm.b_cond(Cond::Le, l_end)?;
        self.emit_neon_tail(step)?;

        self.asm.bind(l_end)
    }

    /// Gather the `work < step` remaining lanes into zeroed registers, run
    /// the body once and scatter the same lanes back.
    fn emit_neon_tail(&mut self, step: u32) -> Result<(), String> {
        let esize = self.conf.dtype.size_bytes();
        let bwd = self.conf.is_bwd();

        self.asm.emit(neon::movi_zero(VMM_SRC.0));
        self.asm.mov_reg(REG_SRC_LANE, REG_SRC);
        if bwd {
            self.asm.emit(neon::movi_zero(VMM_DIFF_DST.0));
            self.asm.mov_reg(REG_DIFF_DST_LANE, REG_DIFF_DST);
        }

        let l_gathered = self.asm.new_label();
        for lane in 0..step {
            if lane > 0 {
                self.asm.cmp_imm(REG_WORK, lane)?;
                self.asm.b_cond(Cond::Le, l_gathered)?;
            }
            self.asm.emit(neon::ld1_lane_post(VMM_SRC.0, lane as u8, esize, REG_SRC_LANE.0)?);
            if bwd {
                self.asm.emit(neon::ld1_lane_post(
                    VMM_DIFF_DST.0,
                    lane as u8,
                    esize,
                    REG_DIFF_DST_LANE.0,
                )?);
            }
        }
        self.asm.bind(l_gathered)?;

        self.emit_neon_compute()?;

        self.asm.mov_reg(REG_DST_LANE, REG_DST);
        let l_scattered = self.asm.new_label();
        for lane in 0..step {
            if lane > 0 {
                self.asm.cmp_imm(REG_WORK, lane)?;
                self.asm.b_cond(Cond::Le, l_scattered)?;
            }
            self.asm.emit(neon::st1_lane_post(VMM_SRC.0, lane as u8, esize, REG_DST_LANE.0)?);
        }
        self.asm.bind(l_scattered)
    }

    /// Up-convert `v1`, transform, apply diff_dst, down-convert into `v1`.
    fn emit_neon_compute(&mut self) -> Result<(), String> {
        let (src, odd) = (VMM_SRC.0, VMM_ODD.0);
        match self.conf.dtype {
            DType::F32 => {}
            DType::BF16 => {
                self.asm.emit(neon::shll2(odd, src));
                self.asm.emit(neon::shll(src, src));
            }
            DType::F16 => {
                self.asm.emit(neon::fcvtl2(odd, src));
                self.asm.emit(neon::fcvtl(src, src));
            }
        }

        let regs = self.value_regs();
        self.injector.compute_vector_range(&mut self.asm, regs)?;
        if self.conf.is_bwd() {
            self.asm.emit(neon::fmul(src, src, VMM_DIFF_DST.0));
        }

        match self.conf.dtype {
            DType::F32 => {}
            DType::BF16 => {
                for r in [src, odd] {
                    self.asm.emit(neon::ushr_4s(VMM_TMP.0, r, 16)?);
                    self.asm.emit(neon::and(VMM_TMP.0, VMM_TMP.0, VMM_ONE.0));
                    self.asm.emit(neon::add_4s(r, r, VMM_TMP.0));
                    self.asm.emit(neon::add_4s(r, r, VMM_BIAS.0));
                }
                self.asm.emit(neon::uzp2_8h(src, src, odd));
            }
            DType::F16 => {
                self.asm.emit(neon::fcvtn(src, src));
                self.asm.emit(neon::fcvtn2(src, odd));
            }
        }
        Ok(())
    }
}

/// Generate the kernel described by `conf`.
pub fn generate(conf: &KernelConf) -> Result<CodegenOutput, String> {
    KernelGenerator::new(*conf)?.generate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CpuCaps;

    fn conf(isa: Isa, vlen: usize, dtype: DType, prop: PropKind, alg: AlgKind) -> KernelConf {
        let caps = CpuCaps::emulated(isa, vlen);
        KernelConf {
            target: TargetDesc::from_caps(&caps, isa).unwrap(),
            dtype,
            prop,
            alg,
            alpha: 0.0,
            beta: 0.0,
            use_dst: false,
        }
    }

    fn words(code: &[u8]) -> Vec<u32> {
        code.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_args_layout() {
        assert_eq!(std::mem::size_of::<KernelArgs>(), 32);
        assert_eq!(std::mem::offset_of!(KernelArgs, dst), OFF_DST as usize);
        assert_eq!(std::mem::offset_of!(KernelArgs, diff_dst), OFF_DIFF_DST as usize);
        assert_eq!(std::mem::offset_of!(KernelArgs, work_amount), OFF_WORK as usize);
    }

    #[test]
    fn test_prologue_and_arg_loads() {
        let out = generate(&conf(Isa::Asimd, 16, DType::F32, PropKind::Forward, AlgKind::Relu)).unwrap();
        let w = words(&out.code);
        assert_eq!(w[0], 0xA9BF7BFD); // stp x29, x30, [sp, #-16]!
        assert_eq!(w[1], 0x910003FD); // mov x29, sp
        assert_eq!(w[2], 0xF940000B); // ldr x11, [x0]
        assert_eq!(w[3], 0xF9400408); // ldr x8, [x0, #8]
        assert_eq!(w[4], 0xF9400C06); // ldr x6, [x0, #24]
        assert!(w.contains(&0xD65F03C0));
    }

    #[test]
    fn test_backward_loads_diff_dst() {
        let out = generate(&conf(Isa::Sve, 32, DType::F32, PropKind::Backward, AlgKind::Tanh)).unwrap();
        let w = words(&out.code);
        assert_eq!(w[4], 0xF940080A); // ldr x10, [x0, #16]
        assert!(out.n_consts > 0);
    }

    #[test]
    fn test_every_combination_generates() {
        for (isa, vlen) in [(Isa::Asimd, 16), (Isa::Sve, 16), (Isa::Sve, 64), (Isa::Sve, 256)] {
            for dtype in [DType::F32, DType::BF16, DType::F16] {
                for alg in [AlgKind::Relu, AlgKind::GeluTanh, AlgKind::Exp] {
                    let c = conf(isa, vlen, dtype, PropKind::Forward, alg);
                    assert!(generate(&c).is_ok(), "{isa} {vlen} {dtype} {alg}");
                }
            }
        }
    }

    #[test]
    fn test_half_backward_rejected() {
        let c = conf(Isa::Sve, 32, DType::BF16, PropKind::Backward, AlgKind::Relu);
        assert!(KernelGenerator::new(c).is_err());
    }

    #[test]
    fn test_sve2_f16_uses_top_conversions() {
        let mut c = conf(Isa::Sve, 32, DType::F16, PropKind::Forward, AlgKind::Square);
        c.target.sve2 = true;
        let w = words(&generate(&c).unwrap().code);
        assert!(w.contains(&sve::fcvtlt_h2s(2, 5, 1).unwrap()));
        assert!(w.contains(&sve::fcvtnt_s2h(1, 5, 2).unwrap()));
        c.target.sve2 = false;
        let w = words(&generate(&c).unwrap().code);
        assert!(!w.contains(&sve::fcvtlt_h2s(2, 5, 1).unwrap()));
    }
}
