//! Element-wise math injector.
//!
//! Inlines the body of an element-wise algorithm (forward value or backward
//! derivative) into a kernel being generated. The kernel hands the injector a
//! [`RegisterContract`] naming every resource the injector may clobber; the
//! injector never touches anything else.
//!
//! Lifecycle inside a kernel:
//! - `load_table_addr` once in the prologue (puts the constants table base in
//!   `contract.table`, and on SVE sets `contract.p_tmp` all-true),
//! - `compute_vector_range` wherever values need transforming,
//! - `prepare_table` once after the epilogue to emit the constants.

use super::asm::{Assembler, Label, PReg, XReg};
use super::math_approx::{
    emit_exp, emit_expm1, emit_gelu_arg, emit_logistic, emit_tanh, GELU_ARG_CUBIC, GELU_ARG_LINEAR,
};
use super::simd_ops::{NeonOps, SimdOps, SveOps, VReg};
use super::sve;
use crate::desc::{AlgKind, PropKind};
use crate::dispatch::Isa;

// ── Constants table ─────────────────────────────────────────────────────────

/// 32-bit constants referenced by the emitted body, deduplicated by bit
/// pattern. Entry `i` lives at byte offset `4 * i` from the table base.
#[derive(Debug, Default, Clone)]
pub struct ConstTable {
    entries: Vec<u32>,
}

impl ConstTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset of `bits`, appending it on first use.
    pub fn offset_of(&mut self, bits: u32) -> u32 {
        let idx = match self.entries.iter().position(|&b| b == bits) {
            Some(i) => i,
            None => {
                self.entries.push(bits);
                self.entries.len() - 1
            }
        };
        (idx * 4) as u32
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }
}

// ── Parameters and register contract ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjectorParams {
    pub alg: AlgKind,
    pub alpha: f32,
    pub beta: f32,
    /// Multiplier applied to the forward result.
    pub scale: f32,
    /// Spill and restore the aux registers around every body.
    pub save_state: bool,
    pub prop: PropKind,
    pub use_dst: bool,
}

/// Resources the injector may use. Everything else belongs to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterContract {
    /// General-purpose register holding the constants table base.
    pub table: XReg,
    /// General-purpose scratch for constant addresses beyond the `ld1rw`
    /// immediate range (SVE).
    pub addr: XReg,
    /// Predicate written by compares (SVE).
    pub p_mask: PReg,
    /// Predicate set all-true by `load_table_addr` and governing the body (SVE).
    pub p_tmp: PReg,
    /// Vector registers available as scratch, in allocation order.
    pub aux: Vec<VReg>,
}

/// Whether the injector has a body for `alg` on `isa`.
pub fn is_supported(_isa: Isa, alg: AlgKind) -> bool {
    !matches!(
        alg,
        AlgKind::SoftRelu
            | AlgKind::Log
            | AlgKind::Pow
            | AlgKind::GeluErf
            | AlgKind::Round
            | AlgKind::Mish
    )
}

/// Whether the backward body can take the forward output as input.
pub fn is_use_dst_supported(alg: AlgKind, alpha: f32) -> bool {
    match alg {
        AlgKind::Relu => alpha >= 0.0,
        _ => alg.supports_use_dst(),
    }
}

/// Vector scratch registers the body needs, excluding the NEON mask register.
pub fn aux_vecs_count(alg: AlgKind, prop: PropKind, use_dst: bool) -> usize {
    match prop {
        PropKind::Forward => match alg {
            AlgKind::Relu | AlgKind::Linear | AlgKind::HardSigmoid | AlgKind::HardSwish => 2,
            AlgKind::Tanh | AlgKind::Swish | AlgKind::GeluTanh => 5,
            AlgKind::Elu | AlgKind::Logistic => 4,
            AlgKind::Exp => 3,
            AlgKind::Clip => 1,
            _ => 0,
        },
        PropKind::Backward => match (alg, use_dst) {
            (AlgKind::Relu, _)
            | (AlgKind::Abs, _)
            | (AlgKind::Clip, _)
            | (AlgKind::HardSigmoid, _)
            | (AlgKind::HardSwish, _)
            | (AlgKind::Elu, true) => 3,
            (AlgKind::Tanh, false) | (AlgKind::Swish, _) | (AlgKind::GeluTanh, _) => 5,
            (AlgKind::Tanh, true) | (AlgKind::Sqrt, false) => 2,
            (AlgKind::Elu, false) | (AlgKind::Logistic, false) => 4,
            (AlgKind::Sqrt, true) | (AlgKind::Logistic, true) => 1,
            (AlgKind::Exp, false) => 3,
            _ => 0,
        },
    }
}

// ── Injector ────────────────────────────────────────────────────────────────

pub struct EltwiseInjector {
    isa: Isa,
    params: InjectorParams,
    contract: RegisterContract,
    consts: ConstTable,
    table_label: Option<Label>,
    /// Scratch registers of one body, then the NEON mask register if any.
    used: Vec<VReg>,
}

impl EltwiseInjector {
    pub fn new(isa: Isa, params: InjectorParams, contract: RegisterContract) -> Result<Self, String> {
        if !is_supported(isa, params.alg) {
            return Err(format!("algorithm {} has no {} body", params.alg, isa.name()));
        }
        if params.use_dst && params.prop == PropKind::Backward && !is_use_dst_supported(params.alg, params.alpha) {
            return Err(format!("algorithm {} cannot use dst", params.alg));
        }
        if matches!(contract.table.0, 18 | 29 | 30 | 31) {
            return Err(format!("x{} cannot hold the table base", contract.table.0));
        }
        if matches!(contract.addr.0, 18 | 29 | 30 | 31) || contract.addr == contract.table {
            return Err(format!("x{} cannot be the address scratch", contract.addr.0));
        }

        let mut n = aux_vecs_count(params.alg, params.prop, params.use_dst);
        if params.prop == PropKind::Forward && params.scale != 1.0 {
            n = n.max(1);
        }
        if isa == Isa::Asimd {
            n += 1;
        }
        if contract.aux.len() < n {
            return Err(format!(
                "{} {:?} needs {} aux vector registers, contract gives {}",
                params.alg,
                params.prop,
                n,
                contract.aux.len()
            ));
        }
        let used = contract.aux[..n].to_vec();
        for (i, r) in used.iter().enumerate() {
            if r.0 > 31 || (8..16).contains(&r.0) {
                return Err(format!("v{} is not usable as an aux register", r.0));
            }
            if used[..i].contains(r) {
                return Err(format!("aux register v{} listed twice", r.0));
            }
        }
        if isa == Isa::Sve {
            if contract.p_mask == contract.p_tmp {
                return Err("p_mask and p_tmp must differ".into());
            }
            if contract.p_tmp.0 > 7 || contract.p_mask.0 > 15 {
                return Err("predicate out of range".into());
            }
        }

        Ok(EltwiseInjector {
            isa,
            params,
            contract,
            consts: ConstTable::new(),
            table_label: None,
            used,
        })
    }

    pub fn params(&self) -> &InjectorParams {
        &self.params
    }

    /// Vector registers the body clobbers.
    pub fn clobbered(&self) -> &[VReg] {
        &self.used
    }

    pub fn constants(&self) -> &ConstTable {
        &self.consts
    }

    /// Emit `adr table, <constants>`; on SVE also set the governing predicate.
    pub fn load_table_addr(&mut self, asm: &mut Assembler) -> Result<(), String> {
        let label = match self.table_label {
            Some(l) => l,
            None => {
                let l = asm.new_label();
                self.table_label = Some(l);
                l
            }
        };
        asm.adr(self.contract.table, label)?;
        if self.isa == Isa::Sve {
            asm.emit(sve::ptrue(self.contract.p_tmp.0, sve::ESize::S));
        }
        Ok(())
    }

    pub fn compute_vector(&mut self, asm: &mut Assembler, reg: VReg) -> Result<(), String> {
        self.compute_vector_range(asm, &[reg])
    }

    /// Transform every register in `regs` in place.
    pub fn compute_vector_range(&mut self, asm: &mut Assembler, regs: &[VReg]) -> Result<(), String> {
        if self.table_label.is_none() {
            return Err("load_table_addr must be emitted before the body".into());
        }
        if let Some(r) = regs.iter().find(|r| self.used.contains(r)) {
            return Err(format!("value register v{} overlaps injector scratch", r.0));
        }

        let params = self.params;
        let saved: &[VReg] = if params.save_state { &self.used } else { &[] };
        match self.isa {
            Isa::Asimd => {
                let (aux, mask) = self.used.split_at(self.used.len() - 1);
                let mut ops = NeonOps::new(asm, &mut self.consts, self.contract.table, mask[0]);
                emit_range(&mut ops, &params, regs, aux, saved)
            }
            Isa::Sve => {
                let mut ops = SveOps::new(
                    asm,
                    &mut self.consts,
                    self.contract.table,
                    self.contract.addr,
                    self.contract.p_mask,
                    self.contract.p_tmp,
                );
                emit_range(&mut ops, &params, regs, &self.used, saved)
            }
        }
    }

    /// Bind the table label here and emit the constants.
    pub fn prepare_table(&mut self, asm: &mut Assembler) -> Result<(), String> {
        let label = self
            .table_label
            .ok_or_else(|| "prepare_table without load_table_addr".to_string())?;
        asm.bind(label)?;
        for &bits in self.consts.entries() {
            asm.emit_data_u32(bits);
        }
        Ok(())
    }
}

fn emit_range<E: SimdOps>(
    e: &mut E,
    p: &InjectorParams,
    regs: &[VReg],
    aux: &[VReg],
    saved: &[VReg],
) -> Result<(), String> {
    e.spill(saved)?;
    for &x in regs {
        match p.prop {
            PropKind::Forward => {
                emit_fwd(e, p, x, aux)?;
                if p.scale != 1.0 {
                    e.vbroadcast_const(aux[0], p.scale)?;
                    e.vmul(x, x, aux[0])?;
                }
            }
            PropKind::Backward => emit_bwd(e, p, x, aux)?,
        }
    }
    e.fill(saved)
}

fn aux5(a: &[VReg]) -> [VReg; 5] {
    [a[0], a[1], a[2], a[3], a[4]]
}

// ── Forward bodies ──────────────────────────────────────────────────────────

fn emit_fwd<E: SimdOps>(e: &mut E, p: &InjectorParams, x: VReg, a: &[VReg]) -> Result<(), String> {
    match p.alg {
        AlgKind::Relu => {
            if p.alpha == 0.0 {
                e.vbroadcast_const(a[0], 0.0)?;
                e.vmax(x, x, a[0])
            } else {
                e.vbroadcast_const(a[0], p.alpha)?;
                e.vmul(a[0], x, a[0])?;
                e.vbroadcast_const(a[1], 0.0)?;
                e.vcmp_gt(x, a[1])?;
                e.vselect(x, x, a[0])
            }
        }
        AlgKind::Tanh => emit_tanh(e, x, aux5(a)),
        AlgKind::Elu => {
            emit_expm1(e, a[0], x, [a[1], a[2], a[3]])?;
            e.vbroadcast_const(a[1], p.alpha)?;
            e.vmul(a[0], a[0], a[1])?;
            e.vbroadcast_const(a[1], 0.0)?;
            e.vcmp_gt(x, a[1])?;
            e.vselect(x, x, a[0])
        }
        AlgKind::Square => e.vmul(x, x, x),
        AlgKind::Abs => e.vabs(x, x),
        AlgKind::Sqrt => e.vsqrt(x, x),
        AlgKind::Linear => {
            e.vbroadcast_const(a[0], p.alpha)?;
            e.vbroadcast_const(a[1], p.beta)?;
            e.vfmla(a[1], x, a[0])?;
            e.vmov(x, a[1])
        }
        AlgKind::Logistic => emit_logistic(e, x, [a[0], a[1], a[2], a[3]]),
        AlgKind::Exp => emit_exp(e, x, x, [a[0], a[1], a[2]]),
        AlgKind::GeluTanh => {
            // x * logistic(2u) == 0.5 x (1 + tanh(u))
            let keep = a[4];
            e.vmov(keep, x)?;
            emit_gelu_arg(e, x, [a[0], a[1]])?;
            emit_logistic(e, x, [a[0], a[1], a[2], a[3]])?;
            e.vmul(x, x, keep)
        }
        AlgKind::Swish => {
            e.vbroadcast_const(a[0], p.alpha)?;
            e.vmul(a[0], x, a[0])?;
            emit_logistic(e, a[0], [a[1], a[2], a[3], a[4]])?;
            e.vmul(x, x, a[0])
        }
        AlgKind::Clip => {
            e.vbroadcast_const(a[0], p.alpha)?;
            e.vmax(x, x, a[0])?;
            e.vbroadcast_const(a[0], p.beta)?;
            e.vmin(x, x, a[0])
        }
        AlgKind::HardSigmoid => {
            emit_hard_sigmoid(e, p, x, a[1], a[0])?;
            e.vmov(x, a[1])
        }
        AlgKind::HardSwish => {
            emit_hard_sigmoid(e, p, x, a[1], a[0])?;
            e.vmul(x, x, a[1])
        }
        other => Err(format!("no forward body for {other}")),
    }
}

/// `dst = max(0, min(1, alpha * x + beta))`.
fn emit_hard_sigmoid<E: SimdOps>(
    e: &mut E,
    p: &InjectorParams,
    x: VReg,
    dst: VReg,
    tmp: VReg,
) -> Result<(), String> {
    e.vbroadcast_const(tmp, p.alpha)?;
    e.vbroadcast_const(dst, p.beta)?;
    e.vfmla(dst, x, tmp)?;
    e.vbroadcast_const(tmp, 1.0)?;
    e.vmin(dst, dst, tmp)?;
    e.vbroadcast_const(tmp, 0.0)?;
    e.vmax(dst, dst, tmp)
}

// ── Backward bodies ─────────────────────────────────────────────────────────
//
// `x` holds the forward input (or output with `use_dst`) and is replaced by
// the derivative; the kernel multiplies by diff_dst afterwards.

fn emit_bwd<E: SimdOps>(e: &mut E, p: &InjectorParams, x: VReg, a: &[VReg]) -> Result<(), String> {
    match (p.alg, p.use_dst) {
        (AlgKind::Relu, _) => {
            e.vbroadcast_const(a[0], 1.0)?;
            e.vbroadcast_const(a[1], p.alpha)?;
            e.vbroadcast_const(a[2], 0.0)?;
            e.vcmp_gt(x, a[2])?;
            e.vselect(x, a[0], a[1])
        }
        (AlgKind::Tanh, use_dst) => {
            if !use_dst {
                emit_tanh(e, x, aux5(a))?;
            }
            e.vmul(a[0], x, x)?;
            e.vbroadcast_const(a[1], 1.0)?;
            e.vsub(x, a[1], a[0])
        }
        (AlgKind::Elu, false) => {
            emit_exp(e, a[0], x, [a[1], a[2], a[3]])?;
            e.vbroadcast_const(a[1], p.alpha)?;
            e.vmul(a[0], a[0], a[1])?;
            e.vbroadcast_const(a[1], 1.0)?;
            e.vbroadcast_const(a[2], 0.0)?;
            e.vcmp_gt(x, a[2])?;
            e.vselect(x, a[1], a[0])
        }
        (AlgKind::Elu, true) => {
            e.vbroadcast_const(a[0], p.alpha)?;
            e.vadd(a[0], x, a[0])?;
            e.vbroadcast_const(a[1], 1.0)?;
            e.vbroadcast_const(a[2], 0.0)?;
            e.vcmp_gt(x, a[2])?;
            e.vselect(x, a[1], a[0])
        }
        (AlgKind::Square, _) => e.vadd(x, x, x),
        (AlgKind::Abs, _) => {
            e.vbroadcast_const(a[0], 1.0)?;
            e.vbroadcast_const(a[1], -1.0)?;
            e.vbroadcast_const(a[2], 0.0)?;
            e.vcmp_gt(x, a[2])?;
            e.vselect(a[0], a[0], a[2])?;
            e.vcmp_gt(a[2], x)?;
            e.vselect(x, a[1], a[0])
        }
        (AlgKind::Sqrt, false) => {
            e.vsqrt(a[0], x)?;
            e.vbroadcast_const(a[1], 0.5)?;
            e.vdiv(x, a[1], a[0])
        }
        (AlgKind::Sqrt, true) => {
            e.vbroadcast_const(a[0], 0.5)?;
            e.vdiv(x, a[0], x)
        }
        (AlgKind::Linear, _) => e.vbroadcast_const(x, p.alpha),
        (AlgKind::Logistic, use_dst) => {
            if !use_dst {
                emit_logistic(e, x, [a[0], a[1], a[2], a[3]])?;
            }
            e.vbroadcast_const(a[0], 1.0)?;
            e.vsub(a[0], a[0], x)?;
            e.vmul(x, x, a[0])
        }
        (AlgKind::Exp, false) => emit_exp(e, x, x, [a[0], a[1], a[2]]),
        (AlgKind::Exp, true) => Ok(()),
        (AlgKind::GeluTanh, _) => {
            // g = logistic(2u): g + x g (1 - g) d(2u)/dx
            let s = a[4];
            e.vmov(s, x)?;
            emit_gelu_arg(e, x, [a[0], a[1]])?;
            emit_logistic(e, x, [a[0], a[1], a[2], a[3]])?;
            e.vmul(a[0], s, s)?;
            e.vbroadcast_const(a[1], 3.0 * GELU_ARG_CUBIC)?;
            e.vbroadcast_const(a[2], GELU_ARG_LINEAR)?;
            e.vfmla(a[2], a[0], a[1])?;
            e.vmul(a[2], a[2], s)?;
            e.vbroadcast_const(a[1], 1.0)?;
            e.vsub(a[1], a[1], x)?;
            e.vmul(a[2], a[2], a[1])?;
            e.vmul(a[2], a[2], x)?;
            e.vadd(x, x, a[2])
        }
        (AlgKind::Swish, _) => {
            e.vbroadcast_const(a[0], p.alpha)?;
            e.vmul(a[0], x, a[0])?;
            e.vmov(x, a[0])?;
            emit_logistic(e, x, [a[1], a[2], a[3], a[4]])?;
            e.vbroadcast_const(a[1], 1.0)?;
            e.vsub(a[1], a[1], x)?;
            e.vmul(a[1], a[1], x)?;
            e.vmul(a[1], a[1], a[0])?;
            e.vadd(x, x, a[1])
        }
        (AlgKind::Clip, _) => {
            e.vbroadcast_const(a[0], 1.0)?;
            e.vbroadcast_const(a[1], 0.0)?;
            e.vbroadcast_const(a[2], p.alpha)?;
            e.vcmp_gt(x, a[2])?;
            e.vselect(a[0], a[0], a[1])?;
            e.vbroadcast_const(a[2], p.beta)?;
            e.vcmp_gt(x, a[2])?;
            e.vselect(x, a[1], a[0])
        }
        (AlgKind::HardSigmoid, _) => {
            e.vbroadcast_const(a[0], p.alpha)?;
            e.vbroadcast_const(a[1], p.beta)?;
            e.vfmla(a[1], x, a[0])?;
            e.vbroadcast_const(a[2], 0.0)?;
            e.vcmp_gt(a[1], a[2])?;
            e.vselect(x, a[0], a[2])?;
            e.vbroadcast_const(a[0], 1.0)?;
            e.vcmp_ge(a[1], a[0])?;
            e.vselect(x, a[2], x)
        }
        (AlgKind::HardSwish, _) => {
            e.vbroadcast_const(a[0], p.alpha)?;
            e.vbroadcast_const(a[1], p.beta)?;
            e.vmov(a[2], a[1])?;
            e.vfmla(a[2], x, a[0])?;
            e.vadd(a[0], a[0], a[0])?;
            e.vfmla(a[1], x, a[0])?;
            e.vbroadcast_const(a[0], 0.0)?;
            e.vcmp_gt(a[2], a[0])?;
            e.vselect(x, a[1], a[0])?;
            e.vbroadcast_const(a[0], 1.0)?;
            e.vcmp_ge(a[2], a[0])?;
            e.vselect(x, a[0], x)
        }
        (other, use_dst) => Err(format!("no backward body for {other} (use_dst={use_dst})")),
    }
}
