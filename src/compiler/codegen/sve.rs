//! SVE instruction encoders.
//!
//! Element size is `.s` unless stated. Governing predicates of predicated
//! data-processing forms must be `p0..p7`.

#[inline]
fn r(x: u8) -> u32 {
    x as u32 & 0x1F
}

#[inline]
fn gov(pg: u8) -> Result<u32, String> {
    if pg > 7 {
        return Err(format!("p{pg} cannot govern a predicated instruction"));
    }
    Ok(pg as u32)
}

/// SVE element size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ESize {
    H = 0b01,
    S = 0b10,
}

pub const PTRUE: u32 = 0x2518E000;
pub const WHILELT_X: u32 = 0x25201400;
pub const LD1W: u32 = 0xA540A000;
pub const LD1H: u32 = 0xA4A0A000;
pub const ST1W: u32 = 0xE540E000;
pub const ST1H: u32 = 0xE4A0E000;
pub const LD1RW: u32 = 0x8540C000;
pub const STR_Z: u32 = 0xE5804000;
pub const LDR_Z: u32 = 0x85804000;

pub const FADD_U: u32 = 0x65800000;
pub const FSUB_U: u32 = 0x65800400;
pub const FMUL_U: u32 = 0x65800800;
pub const FMAX_P: u32 = 0x65868000;
pub const FMIN_P: u32 = 0x65878000;
pub const FDIVR_P: u32 = 0x658C8000;
pub const FDIV_P: u32 = 0x658D8000;
pub const FMLA_P: u32 = 0x65A00000;
pub const FMLS_P: u32 = 0x65A02000;
pub const FABS_P: u32 = 0x049CA000;
pub const FNEG_P: u32 = 0x049DA000;
pub const FSQRT_P: u32 = 0x658DA000;
pub const FRINTN_P: u32 = 0x6580A000;
pub const FCVTZS_P: u32 = 0x659CA000;
pub const FCVT_H2S: u32 = 0x6589A000;
pub const FCVT_S2H: u32 = 0x6588A000;
pub const FCVTLT_H2S: u32 = 0x6489A000;
pub const FCVTNT_S2H: u32 = 0x6488A000;
pub const FCMGE_P: u32 = 0x65804000;
pub const FCMGT_P: u32 = 0x65804010;

pub const ADD_S: u32 = 0x04A00000;
pub const AND_D: u32 = 0x04203000;
pub const ORR_D: u32 = 0x04603000;
pub const EOR_D: u32 = 0x04A03000;
pub const SHIFT_IMM: u32 = 0x04209000;
pub const AND_IMM: u32 = 0x05800000;
pub const DUPM: u32 = 0x05C00000;
pub const DUP_IMM_S: u32 = 0x25B8C000;
pub const SEL_S: u32 = 0x05A0C000;
pub const MOVPRFX: u32 = 0x0420BC00;

// ── Predicates ──────────────────────────────────────────────────────────────

/// `ptrue pd.<T>` (pattern ALL)
pub fn ptrue(pd: u8, es: ESize) -> u32 {
    PTRUE | ((es as u32) << 22) | (0x1F << 5) | (pd as u32 & 0xF)
}

/// `whilelt pd.<T>, xn, xm`
pub fn whilelt(pd: u8, es: ESize, xn: u8, xm: u8) -> u32 {
    WHILELT_X | ((es as u32) << 22) | (r(xm) << 16) | (r(xn) << 5) | (pd as u32 & 0xF)
}

// ── Memory ──────────────────────────────────────────────────────────────────

fn contiguous(base: u32, zt: u8, pg: u8, xn: u8) -> Result<u32, String> {
    Ok(base | (gov(pg)? << 10) | (r(xn) << 5) | r(zt))
}

/// `ld1w {zt.s}, pg/z, [xn]`
pub fn ld1w(zt: u8, pg: u8, xn: u8) -> Result<u32, String> {
    contiguous(LD1W, zt, pg, xn)
}
/// `ld1h {zt.h}, pg/z, [xn]`
pub fn ld1h(zt: u8, pg: u8, xn: u8) -> Result<u32, String> {
    contiguous(LD1H, zt, pg, xn)
}
/// `st1w {zt.s}, pg, [xn]`
pub fn st1w(zt: u8, pg: u8, xn: u8) -> Result<u32, String> {
    contiguous(ST1W, zt, pg, xn)
}
/// `st1h {zt.h}, pg, [xn]`
pub fn st1h(zt: u8, pg: u8, xn: u8) -> Result<u32, String> {
    contiguous(ST1H, zt, pg, xn)
}

/// Largest byte offset `ld1rw` can encode.
pub const LD1RW_MAX_OFFSET: u32 = 63 * 4;

/// `ld1rw {zt.s}, pg/z, [xn, #imm]` (broadcast one word).
pub fn ld1rw(zt: u8, pg: u8, xn: u8, imm: u32) -> Result<u32, String> {
    if imm % 4 != 0 || imm > LD1RW_MAX_OFFSET {
        return Err(format!("ld1rw offset {imm} not encodable"));
    }
    Ok(LD1RW | ((imm / 4) << 16) | (gov(pg)? << 10) | (r(xn) << 5) | r(zt))
}

fn fill_spill(base: u32, zt: u8, xn: u8, vl_index: i32) -> Result<u32, String> {
    if !(-256..=255).contains(&vl_index) {
        return Err(format!("vector spill index {vl_index} out of range"));
    }
    let imm9 = (vl_index as u32) & 0x1FF;
    Ok(base | ((imm9 >> 3) << 16) | ((imm9 & 7) << 10) | (r(xn) << 5) | r(zt))
}

/// `str zt, [xn, #idx, mul vl]`
pub fn str_z(zt: u8, xn: u8, vl_index: i32) -> Result<u32, String> {
    fill_spill(STR_Z, zt, xn, vl_index)
}
/// `ldr zt, [xn, #idx, mul vl]`
pub fn ldr_z(zt: u8, xn: u8, vl_index: i32) -> Result<u32, String> {
    fill_spill(LDR_Z, zt, xn, vl_index)
}

// ── Floating point ──────────────────────────────────────────────────────────

fn unpred3(base: u32, zd: u8, zn: u8, zm: u8) -> u32 {
    base | (r(zm) << 16) | (r(zn) << 5) | r(zd)
}

pub fn fadd(zd: u8, zn: u8, zm: u8) -> u32 {
    unpred3(FADD_U, zd, zn, zm)
}
pub fn fsub(zd: u8, zn: u8, zm: u8) -> u32 {
    unpred3(FSUB_U, zd, zn, zm)
}
pub fn fmul(zd: u8, zn: u8, zm: u8) -> u32 {
    unpred3(FMUL_U, zd, zn, zm)
}

/// Destructive predicated binary op: `zdn = zdn <op> zm`.
fn destructive(base: u32, zdn: u8, pg: u8, zm: u8) -> Result<u32, String> {
    Ok(base | (gov(pg)? << 10) | (r(zm) << 5) | r(zdn))
}

pub fn fmax(zdn: u8, pg: u8, zm: u8) -> Result<u32, String> {
    destructive(FMAX_P, zdn, pg, zm)
}
pub fn fmin(zdn: u8, pg: u8, zm: u8) -> Result<u32, String> {
    destructive(FMIN_P, zdn, pg, zm)
}
/// `zdn = zdn / zm`
pub fn fdiv(zdn: u8, pg: u8, zm: u8) -> Result<u32, String> {
    destructive(FDIV_P, zdn, pg, zm)
}
/// `zdn = zm / zdn`
pub fn fdivr(zdn: u8, pg: u8, zm: u8) -> Result<u32, String> {
    destructive(FDIVR_P, zdn, pg, zm)
}

/// `zda += zn * zm`
pub fn fmla(zda: u8, pg: u8, zn: u8, zm: u8) -> Result<u32, String> {
    Ok(FMLA_P | (r(zm) << 16) | (gov(pg)? << 10) | (r(zn) << 5) | r(zda))
}
/// `zda -= zn * zm`
pub fn fmls(zda: u8, pg: u8, zn: u8, zm: u8) -> Result<u32, String> {
    Ok(FMLS_P | (r(zm) << 16) | (gov(pg)? << 10) | (r(zn) << 5) | r(zda))
}

/// Predicated unary op, merging: `zd = op(zn)` on active lanes.
fn unary(base: u32, zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    Ok(base | (gov(pg)? << 10) | (r(zn) << 5) | r(zd))
}

pub fn fabs(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FABS_P, zd, pg, zn)
}
pub fn fneg(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FNEG_P, zd, pg, zn)
}
pub fn fsqrt(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FSQRT_P, zd, pg, zn)
}
pub fn frintn(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FRINTN_P, zd, pg, zn)
}
pub fn fcvtzs(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FCVTZS_P, zd, pg, zn)
}
/// `fcvt zd.s, pg/m, zn.h`: widen the low half of every 32-bit container.
pub fn fcvt_h2s(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FCVT_H2S, zd, pg, zn)
}
/// `fcvt zd.h, pg/m, zn.s`: narrow into the low half, zeroing the high half.
pub fn fcvt_s2h(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FCVT_S2H, zd, pg, zn)
}
/// `fcvtlt zd.s, pg/m, zn.h` (SVE2): widen the odd halfwords.
pub fn fcvtlt_h2s(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FCVTLT_H2S, zd, pg, zn)
}
/// `fcvtnt zd.h, pg/m, zn.s` (SVE2): narrow into the odd halfwords.
pub fn fcvtnt_s2h(zd: u8, pg: u8, zn: u8) -> Result<u32, String> {
    unary(FCVTNT_S2H, zd, pg, zn)
}

fn compare(base: u32, pd: u8, pg: u8, zn: u8, zm: u8) -> Result<u32, String> {
    Ok(base | (r(zm) << 16) | (gov(pg)? << 10) | (r(zn) << 5) | (pd as u32 & 0xF))
}

/// `fcmgt pd.s, pg/z, zn.s, zm.s`
pub fn fcmgt(pd: u8, pg: u8, zn: u8, zm: u8) -> Result<u32, String> {
    compare(FCMGT_P, pd, pg, zn, zm)
}
/// `fcmge pd.s, pg/z, zn.s, zm.s`
pub fn fcmge(pd: u8, pg: u8, zn: u8, zm: u8) -> Result<u32, String> {
    compare(FCMGE_P, pd, pg, zn, zm)
}

// ── Integer and bitwise ─────────────────────────────────────────────────────

pub fn add_s(zd: u8, zn: u8, zm: u8) -> u32 {
    unpred3(ADD_S, zd, zn, zm)
}
pub fn and_d(zd: u8, zn: u8, zm: u8) -> u32 {
    unpred3(AND_D, zd, zn, zm)
}
pub fn orr_d(zd: u8, zn: u8, zm: u8) -> u32 {
    unpred3(ORR_D, zd, zn, zm)
}
pub fn eor_d(zd: u8, zn: u8, zm: u8) -> u32 {
    unpred3(EOR_D, zd, zn, zm)
}
pub fn mov(zd: u8, zn: u8) -> u32 {
    orr_d(zd, zn, zn)
}

/// `sel zd.s, pg, zn.s, zm.s` (pg may be any of p0..p15)
pub fn sel(zd: u8, pg: u8, zn: u8, zm: u8) -> u32 {
    SEL_S | (r(zm) << 16) | ((pg as u32 & 0xF) << 10) | (r(zn) << 5) | r(zd)
}

/// `movprfx zd, zn`
pub fn movprfx(zd: u8, zn: u8) -> u32 {
    MOVPRFX | (r(zn) << 5) | r(zd)
}

fn shift_imm(opc: u32, zd: u8, zn: u8, field: u32) -> u32 {
    let tszh = (field >> 5) & 0x3;
    let tszl = (field >> 3) & 0x3;
    let imm3 = field & 0x7;
    SHIFT_IMM | (tszh << 22) | (tszl << 19) | (imm3 << 16) | (opc << 10) | (r(zn) << 5) | r(zd)
}

/// `lsl zd.s, zn.s, #shift`
pub fn lsl_s(zd: u8, zn: u8, shift: u32) -> Result<u32, String> {
    if shift > 31 {
        return Err(format!("lsl #{shift} out of range for .s"));
    }
    Ok(shift_imm(0b11, zd, zn, 32 + shift))
}

/// `lsr zd.s, zn.s, #shift`
pub fn lsr_s(zd: u8, zn: u8, shift: u32) -> Result<u32, String> {
    if !(1..=32).contains(&shift) {
        return Err(format!("lsr #{shift} out of range for .s"));
    }
    Ok(shift_imm(0b01, zd, zn, 64 - shift))
}

/// Encode a 64-bit logical immediate as `N:immr:imms`.
pub fn encode_bitmask_imm(imm: u64) -> Option<u32> {
    if imm == 0 || imm == u64::MAX {
        return None;
    }
    let mut size = 64u32;
    while size > 2 {
        let half = size / 2;
        let mask = (1u64 << half) - 1;
        if imm & mask != (imm >> half) & mask {
            break;
        }
        size = half;
    }
    let mask = if size == 64 { u64::MAX } else { (1u64 << size) - 1 };
    let elem = imm & mask;
    let ones = elem.count_ones();
    let run = if ones == 64 { u64::MAX } else { (1u64 << ones) - 1 };
    let ror = |x: u64, r: u32| -> u64 {
        if r == 0 {
            x
        } else {
            ((x >> r) | (x << (size - r))) & mask
        }
    };
    let immr = (0..size).find(|&r| ror(run, r) == elem)?;
    let n = u32::from(size == 64);
    let imms = ((!(size * 2 - 1)) & 0x3F) | (ones - 1);
    Some((n << 12) | (immr << 6) | imms)
}

fn imm13_s(value: u32) -> Result<u32, String> {
    let rep = ((value as u64) << 32) | value as u64;
    encode_bitmask_imm(rep).ok_or_else(|| format!("{value:#x} is not a bitmask immediate"))
}

/// `and zdn.s, zdn.s, #imm`
pub fn and_imm_s(zdn: u8, value: u32) -> Result<u32, String> {
    Ok(AND_IMM | (imm13_s(value)? << 5) | r(zdn))
}

/// `dupm zd.s, #imm`
pub fn dupm_s(zd: u8, value: u32) -> Result<u32, String> {
    Ok(DUPM | (imm13_s(value)? << 5) | r(zd))
}

/// `dup zd.s, #imm8` (signed, no shift)
pub fn dup_imm_s(zd: u8, imm8: i8) -> u32 {
    DUP_IMM_S | ((imm8 as u8 as u32) << 5) | r(zd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_words() {
        assert_eq!(ptrue(0, ESize::S), 0x2598E3E0);
        assert_eq!(ptrue(7, ESize::H), 0x2558E3E7);
        // whilelt p5.s, xzr, x6
        assert_eq!(whilelt(5, ESize::S, 31, 6), 0x25A617E5);
    }

    #[test]
    fn test_memory_words() {
        assert_eq!(ld1w(0, 0, 0).unwrap(), 0xA540A000);
        assert_eq!(ld1w(1, 5, 11).unwrap(), 0xA540B561);
        assert_eq!(st1h(1, 7, 8).unwrap(), 0xE4A0FD01);
        assert_eq!(ld1rw(16, 4, 9, 8).unwrap(), 0x8542D130);
        assert!(ld1rw(16, 4, 9, 256).is_err());
        assert!(ld1w(1, 9, 11).is_err());
        assert_eq!(str_z(16, 31, 0).unwrap(), 0xE58043F0);
        // ldr z17, [sp, #9, mul vl]
        assert_eq!(ldr_z(17, 31, 9).unwrap(), 0x858147F1);
    }

    #[test]
    fn test_arith_words() {
        assert_eq!(fadd(0, 1, 2), 0x65820020);
        assert_eq!(fmla(0, 0, 1, 2).unwrap(), 0x65A20020);
        assert_eq!(fdiv(16, 4, 17).unwrap(), 0x658D9230);
        assert_eq!(fcmgt(1, 4, 1, 16).unwrap(), 0x65905031);
        assert_eq!(sel(1, 1, 16, 1), 0x05A1C601);
        assert_eq!(movprfx(0, 1), 0x0420BC20);
        assert_eq!(dup_imm_s(0, 0), 0x25B8C000);
    }

    #[test]
    fn test_shift_words() {
        assert_eq!(lsl_s(1, 1, 16).unwrap(), 0x04709C21);
        assert_eq!(lsr_s(5, 1, 16).unwrap(), 0x04709425);
        assert!(lsl_s(1, 1, 32).is_err());
    }

    #[test]
    fn test_bitmask_immediates() {
        assert_eq!(encode_bitmask_imm(0xFFFF_0000_FFFF_0000), Some(0x40F));
        assert_eq!(encode_bitmask_imm(0x0000_7FFF_0000_7FFF), Some(0x00E));
        assert_eq!(encode_bitmask_imm(0x0000_0001_0000_0001), Some(0x000));
        assert_eq!(encode_bitmask_imm(0x5555_5555_5555_5555), Some(0x03C));
        assert_eq!(encode_bitmask_imm(0), None);
        assert!(and_imm_s(2, 0x1234_5678).is_err());
        assert_eq!(and_imm_s(2, 0xFFFF_0000).unwrap(), 0x058081E2);
    }
}
