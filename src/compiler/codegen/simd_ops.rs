//! SimdOps trait: the virtual f32 vector ISA the math bodies are written in.
//!
//! `math_approx.rs` and the injector generate code by calling methods on
//! `SimdOps`. Two backends emit real instructions:
//! - [`NeonOps`]: Advanced SIMD, `.4s` lanes, masks live in a vector register.
//! - [`SveOps`]: SVE at any vector length, masks live in a predicate register,
//!   destructive forms are fed through `movprfx` or their reversed variants.
//!
//! All methods return `Result<(), String>`; the kernel generator turns the
//! message into a codegen error.

use super::asm::{Assembler, PReg, XReg, SP};
use super::injector::ConstTable;
use super::{neon, sve};
use crate::dispatch::Isa;

/// Physical SIMD register index (`v<n>` on NEON, `z<n>` on SVE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u8);

pub trait SimdOps {
    fn isa(&self) -> Isa;

    // ── Arithmetic ──────────────────────────────────────────────────────

    /// dst = a + b
    fn vadd(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a - b
    fn vsub(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a * b
    fn vmul(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a / b
    fn vdiv(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = max(a, b)
    fn vmax(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = min(a, b)
    fn vmin(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// acc += a * b (fused)
    fn vfmla(&mut self, acc: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = -a
    fn vneg(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = |a|
    fn vabs(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = sqrt(a)
    fn vsqrt(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = round-to-nearest-even(a)
    fn vround(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = a as i32 (truncating, saturating)
    fn vcvt_f32_i32(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    fn vmov(&mut self, dst: VReg, a: VReg) -> Result<(), String>;

    // ── Integer lanes ───────────────────────────────────────────────────

    fn vadd_i32(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    fn vshl_i32(&mut self, dst: VReg, a: VReg, shift: u32) -> Result<(), String>;

    // ── Constants ───────────────────────────────────────────────────────

    /// Broadcast an f32 constant (through the constants table).
    fn vbroadcast_const(&mut self, dst: VReg, value: f32) -> Result<(), String> {
        self.vbroadcast_bits(dst, value.to_bits())
    }
    /// Broadcast a raw 32-bit pattern.
    fn vbroadcast_bits(&mut self, dst: VReg, bits: u32) -> Result<(), String>;

    // ── Masking ─────────────────────────────────────────────────────────

    /// mask = a > b
    fn vcmp_gt(&mut self, a: VReg, b: VReg) -> Result<(), String>;
    /// mask = a >= b
    fn vcmp_ge(&mut self, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = mask ? if_true : if_false
    fn vselect(&mut self, dst: VReg, if_true: VReg, if_false: VReg) -> Result<(), String>;

    // ── State save / restore ────────────────────────────────────────────

    /// Push `regs` onto the stack.
    fn spill(&mut self, regs: &[VReg]) -> Result<(), String>;
    /// Pop `regs` (same slice as the matching `spill`).
    fn fill(&mut self, regs: &[VReg]) -> Result<(), String>;
}

// ── NEON backend ────────────────────────────────────────────────────────────

pub struct NeonOps<'a> {
    asm: &'a mut Assembler,
    consts: &'a mut ConstTable,
    table: XReg,
    mask: VReg,
}

impl<'a> NeonOps<'a> {
    pub fn new(asm: &'a mut Assembler, consts: &'a mut ConstTable, table: XReg, mask: VReg) -> Self {
        NeonOps { asm, consts, table, mask }
    }

    fn e(&mut self, word: u32) -> Result<(), String> {
        self.asm.emit(word);
        Ok(())
    }
}

impl SimdOps for NeonOps<'_> {
    fn isa(&self) -> Isa {
        Isa::Asimd
    }

    fn vadd(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(neon::fadd(dst.0, a.0, b.0))
    }
    fn vsub(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(neon::fsub(dst.0, a.0, b.0))
    }
    fn vmul(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(neon::fmul(dst.0, a.0, b.0))
    }
    fn vdiv(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(neon::fdiv(dst.0, a.0, b.0))
    }
    fn vmax(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(neon::fmax(dst.0, a.0, b.0))
    }
    fn vmin(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(neon::fmin(dst.0, a.0, b.0))
    }
    fn vfmla(&mut self, acc: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(neon::fmla(acc.0, a.0, b.0))
    }
    fn vneg(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.e(neon::fneg(dst.0, a.0))
    }
    fn vabs(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.e(neon::fabs(dst.0, a.0))
    }
    fn vsqrt(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.e(neon::fsqrt(dst.0, a.0))
    }
    fn vround(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.e(neon::frintn(dst.0, a.0))
    }
    fn vcvt_f32_i32(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.e(neon::fcvtzs(dst.0, a.0))
    }
    fn vmov(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        if dst != a {
            self.asm.emit(neon::mov(dst.0, a.0));
        }
        Ok(())
    }

    fn vadd_i32(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(neon::add_4s(dst.0, a.0, b.0))
    }
    fn vshl_i32(&mut self, dst: VReg, a: VReg, shift: u32) -> Result<(), String> {
        let w = neon::shl_4s(dst.0, a.0, shift)?;
        self.e(w)
    }

    fn vbroadcast_bits(&mut self, dst: VReg, bits: u32) -> Result<(), String> {
        if bits == 0 {
            return self.e(neon::movi_zero(dst.0));
        }
        let off = self.consts.offset_of(bits);
        let w = neon::ldr_s(dst.0, self.table.0, off)?;
        self.asm.emit(w);
        self.e(neon::dup_lane0(dst.0, dst.0))
    }

    fn vcmp_gt(&mut self, a: VReg, b: VReg) -> Result<(), String> {
        let m = self.mask;
        self.e(neon::fcmgt(m.0, a.0, b.0))
    }
    fn vcmp_ge(&mut self, a: VReg, b: VReg) -> Result<(), String> {
        let m = self.mask;
        self.e(neon::fcmge(m.0, a.0, b.0))
    }
    fn vselect(&mut self, dst: VReg, if_true: VReg, if_false: VReg) -> Result<(), String> {
        let m = self.mask;
        if dst == m {
            return Err(format!("select destination v{} is the mask register", dst.0));
        }
        if dst == if_false {
            self.e(neon::bit(dst.0, if_true.0, m.0))
        } else if dst == if_true {
            self.e(neon::bif(dst.0, if_false.0, m.0))
        } else {
            self.asm.emit(neon::mov(dst.0, if_false.0));
            self.e(neon::bit(dst.0, if_true.0, m.0))
        }
    }

    fn spill(&mut self, regs: &[VReg]) -> Result<(), String> {
        if regs.is_empty() {
            return Ok(());
        }
        self.asm.sub_imm(SP, SP, 16 * regs.len() as u32)?;
        for (i, r) in regs.iter().enumerate() {
            let w = neon::str_q(r.0, SP.0, 16 * i as u32)?;
            self.asm.emit(w);
        }
        Ok(())
    }

    fn fill(&mut self, regs: &[VReg]) -> Result<(), String> {
        if regs.is_empty() {
            return Ok(());
        }
        for (i, r) in regs.iter().enumerate() {
            let w = neon::ldr_q(r.0, SP.0, 16 * i as u32)?;
            self.asm.emit(w);
        }
        self.asm.add_imm(SP, SP, 16 * regs.len() as u32)
    }
}

// ── SVE backend ─────────────────────────────────────────────────────────────

pub struct SveOps<'a> {
    asm: &'a mut Assembler,
    consts: &'a mut ConstTable,
    table: XReg,
    /// Address scratch for table offsets beyond the `ld1rw` immediate range.
    scratch: XReg,
    p_mask: PReg,
    /// All-true `.s` predicate governing every predicated op.
    p_all: PReg,
}

impl<'a> SveOps<'a> {
    pub fn new(
        asm: &'a mut Assembler,
        consts: &'a mut ConstTable,
        table: XReg,
        scratch: XReg,
        p_mask: PReg,
        p_all: PReg,
    ) -> Self {
        SveOps { asm, consts, table, scratch, p_mask, p_all }
    }

    fn e(&mut self, word: u32) -> Result<(), String> {
        self.asm.emit(word);
        Ok(())
    }

    /// `dst = a <op> b` from a destructive predicated op. `reversed` is the
    /// variant computing `b <op> a`, used when `dst` aliases `b`.
    fn destructive(
        &mut self,
        op: fn(u8, u8, u8) -> Result<u32, String>,
        reversed: fn(u8, u8, u8) -> Result<u32, String>,
        dst: VReg,
        a: VReg,
        b: VReg,
    ) -> Result<(), String> {
        let pg = self.p_all.0;
        if dst == a {
            let w = op(dst.0, pg, b.0)?;
            self.e(w)
        } else if dst == b {
            let w = reversed(dst.0, pg, a.0)?;
            self.e(w)
        } else {
            self.asm.emit(sve::movprfx(dst.0, a.0));
            let w = op(dst.0, pg, b.0)?;
            self.e(w)
        }
    }

    fn unary(
        &mut self,
        op: fn(u8, u8, u8) -> Result<u32, String>,
        dst: VReg,
        a: VReg,
    ) -> Result<(), String> {
        let w = op(dst.0, self.p_all.0, a.0)?;
        self.e(w)
    }
}

impl SimdOps for SveOps<'_> {
    fn isa(&self) -> Isa {
        Isa::Sve
    }

    fn vadd(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(sve::fadd(dst.0, a.0, b.0))
    }
    fn vsub(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(sve::fsub(dst.0, a.0, b.0))
    }
    fn vmul(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(sve::fmul(dst.0, a.0, b.0))
    }
    fn vdiv(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.destructive(sve::fdiv, sve::fdivr, dst, a, b)
    }
    fn vmax(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.destructive(sve::fmax, sve::fmax, dst, a, b)
    }
    fn vmin(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.destructive(sve::fmin, sve::fmin, dst, a, b)
    }
    fn vfmla(&mut self, acc: VReg, a: VReg, b: VReg) -> Result<(), String> {
        let w = sve::fmla(acc.0, self.p_all.0, a.0, b.0)?;
        self.e(w)
    }
    fn vneg(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.unary(sve::fneg, dst, a)
    }
    fn vabs(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.unary(sve::fabs, dst, a)
    }
    fn vsqrt(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.unary(sve::fsqrt, dst, a)
    }
    fn vround(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.unary(sve::frintn, dst, a)
    }
    fn vcvt_f32_i32(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.unary(sve::fcvtzs, dst, a)
    }
    fn vmov(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        if dst != a {
            self.asm.emit(sve::mov(dst.0, a.0));
        }
        Ok(())
    }

    fn vadd_i32(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.e(sve::add_s(dst.0, a.0, b.0))
    }
    fn vshl_i32(&mut self, dst: VReg, a: VReg, shift: u32) -> Result<(), String> {
        let w = sve::lsl_s(dst.0, a.0, shift)?;
        self.e(w)
    }

    fn vbroadcast_bits(&mut self, dst: VReg, bits: u32) -> Result<(), String> {
        if bits == 0 {
            return self.e(sve::dup_imm_s(dst.0, 0));
        }
        let off = self.consts.offset_of(bits);
        let pg = self.p_all.0;
        if off <= sve::LD1RW_MAX_OFFSET {
            let w = sve::ld1rw(dst.0, pg, self.table.0, off)?;
            self.e(w)
        } else {
            let (scratch, table) = (self.scratch, self.table);
            self.asm.add_imm(scratch, table, off)?;
            let w = sve::ld1rw(dst.0, pg, scratch.0, 0)?;
            self.e(w)
        }
    }

    fn vcmp_gt(&mut self, a: VReg, b: VReg) -> Result<(), String> {
        let w = sve::fcmgt(self.p_mask.0, self.p_all.0, a.0, b.0)?;
        self.e(w)
    }
    fn vcmp_ge(&mut self, a: VReg, b: VReg) -> Result<(), String> {
        let w = sve::fcmge(self.p_mask.0, self.p_all.0, a.0, b.0)?;
        self.e(w)
    }
    fn vselect(&mut self, dst: VReg, if_true: VReg, if_false: VReg) -> Result<(), String> {
        self.e(sve::sel(dst.0, self.p_mask.0, if_true.0, if_false.0))
    }

    fn spill(&mut self, regs: &[VReg]) -> Result<(), String> {
        if regs.is_empty() {
            return Ok(());
        }
        self.asm.addvl(SP, SP, -(regs.len() as i32))?;
        for (i, r) in regs.iter().enumerate() {
            let w = sve::str_z(r.0, SP.0, i as i32)?;
            self.asm.emit(w);
        }
        Ok(())
    }

    fn fill(&mut self, regs: &[VReg]) -> Result<(), String> {
        if regs.is_empty() {
            return Ok(());
        }
        for (i, r) in regs.iter().enumerate() {
            let w = sve::ldr_z(r.0, SP.0, i as i32)?;
            self.asm.emit(w);
        }
        self.asm.addvl(SP, SP, regs.len() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sve_destructive_forms() {
        let mut asm = Assembler::new();
        let mut consts = ConstTable::new();
        let mut ops = SveOps::new(&mut asm, &mut consts, XReg(9), XReg(16), PReg(1), PReg(4));
        // dst == b picks the reversed divide
        ops.vdiv(VReg(17), VReg(16), VReg(17)).unwrap();
        // dst distinct from both needs a movprfx
        ops.vmax(VReg(18), VReg(16), VReg(17)).unwrap();
        let w = asm.words();
        assert_eq!(w[0], sve::fdivr(17, 4, 16).unwrap());
        assert_eq!(w[1], sve::movprfx(18, 16));
        assert_eq!(w[2], sve::fmax(18, 4, 17).unwrap());
    }

    #[test]
    fn test_neon_select_variants() {
        let mut asm = Assembler::new();
        let mut consts = ConstTable::new();
        let mut ops = NeonOps::new(&mut asm, &mut consts, XReg(9), VReg(23));
        ops.vselect(VReg(1), VReg(16), VReg(1)).unwrap();
        ops.vselect(VReg(1), VReg(1), VReg(16)).unwrap();
        ops.vselect(VReg(2), VReg(16), VReg(17)).unwrap();
        assert!(ops.vselect(VReg(23), VReg(16), VReg(17)).is_err());
        let w = asm.words();
        assert_eq!(w[0], neon::bit(1, 16, 23));
        assert_eq!(w[1], neon::bif(1, 16, 23));
        assert_eq!(w[2], neon::mov(2, 17));
        assert_eq!(w[3], neon::bit(2, 16, 23));
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let mut asm = Assembler::new();
        let mut consts = ConstTable::new();
        {
            let mut ops = NeonOps::new(&mut asm, &mut consts, XReg(9), VReg(23));
            ops.vbroadcast_const(VReg(16), 1.0).unwrap();
            ops.vbroadcast_const(VReg(17), 2.0).unwrap();
            ops.vbroadcast_const(VReg(18), 1.0).unwrap();
            ops.vbroadcast_const(VReg(19), 0.0).unwrap();
        }
        assert_eq!(consts.len(), 2);
        let w = asm.words();
        assert_eq!(w[0], neon::ldr_s(16, 9, 0).unwrap());
        assert_eq!(w[2], neon::ldr_s(17, 9, 4).unwrap());
        assert_eq!(w[4], neon::ldr_s(18, 9, 0).unwrap());
        assert_eq!(w[6], neon::movi_zero(19));
    }
}
