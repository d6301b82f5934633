//! Advanced SIMD (NEON) instruction encoders.
//!
//! All arithmetic operates on the `.4s` arrangement unless the name says
//! otherwise. Register arguments are `v0..v31` indices.

#[inline]
fn r(x: u8) -> u32 {
    x as u32 & 0x1F
}

#[inline]
fn three(base: u32, rd: u8, rn: u8, rm: u8) -> u32 {
    base | (r(rm) << 16) | (r(rn) << 5) | r(rd)
}

#[inline]
fn two(base: u32, rd: u8, rn: u8) -> u32 {
    base | (r(rn) << 5) | r(rd)
}

// ── Opcode bases (Q=1) ──────────────────────────────────────────────────────

pub const FADD_4S: u32 = 0x4E20D400;
pub const FSUB_4S: u32 = 0x4EA0D400;
pub const FMUL_4S: u32 = 0x6E20DC00;
pub const FDIV_4S: u32 = 0x6E20FC00;
pub const FMAX_4S: u32 = 0x4E20F400;
pub const FMIN_4S: u32 = 0x4EA0F400;
pub const FMLA_4S: u32 = 0x4E20CC00;
pub const FMLS_4S: u32 = 0x4EA0CC00;
pub const FCMGT_4S: u32 = 0x6EA0E400;
pub const FCMGE_4S: u32 = 0x6E20E400;
pub const ADD_4S: u32 = 0x4EA08400;
pub const AND_16B: u32 = 0x4E201C00;
pub const ORR_16B: u32 = 0x4EA01C00;
pub const EOR_16B: u32 = 0x6E201C00;
pub const BIT_16B: u32 = 0x6EA01C00;
pub const BIF_16B: u32 = 0x6EE01C00;
pub const UZP2_8H: u32 = 0x4E405800;

pub const FABS_4S: u32 = 0x4EA0F800;
pub const FNEG_4S: u32 = 0x6EA0F800;
pub const FSQRT_4S: u32 = 0x6EA1F800;
pub const FRINTN_4S: u32 = 0x4E218800;
pub const FCVTZS_4S: u32 = 0x4EA1B800;

/// `shll vd.4s, vn.4h, #16` / `shll2 vd.4s, vn.8h, #16`
pub const SHLL_4S: u32 = 0x2E613800;
pub const SHLL2_4S: u32 = 0x6E613800;
/// `fcvtl vd.4s, vn.4h` / `fcvtl2 vd.4s, vn.8h`
pub const FCVTL_4S: u32 = 0x0E217800;
pub const FCVTL2_4S: u32 = 0x4E217800;
/// `fcvtn vd.4h, vn.4s` / `fcvtn2 vd.8h, vn.4s`
pub const FCVTN_4H: u32 = 0x0E216800;
pub const FCVTN2_8H: u32 = 0x4E216800;

pub const SHL_4S: u32 = 0x4F005400;
pub const USHR_4S: u32 = 0x6F000400;
pub const DUP_4S_LANE: u32 = 0x4E040400;
pub const MOVI_2D_ZERO: u32 = 0x6F00E400;
pub const MOVI_4S: u32 = 0x4F000400;

pub const LDR_S: u32 = 0xBD400000;
pub const LDR_Q: u32 = 0x3DC00000;
pub const STR_Q: u32 = 0x3D800000;

pub const LD1_1REG: u32 = 0x4C407000;
pub const ST1_1REG: u32 = 0x4C007000;
pub const LD1_LANE_POST: u32 = 0x0DC00000;
pub const ST1_LANE_POST: u32 = 0x0D800000;

// ── Three-register forms ────────────────────────────────────────────────────

pub fn fadd(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FADD_4S, rd, rn, rm)
}
pub fn fsub(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FSUB_4S, rd, rn, rm)
}
pub fn fmul(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FMUL_4S, rd, rn, rm)
}
pub fn fdiv(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FDIV_4S, rd, rn, rm)
}
pub fn fmax(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FMAX_4S, rd, rn, rm)
}
pub fn fmin(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FMIN_4S, rd, rn, rm)
}
/// `rd += rn * rm`
pub fn fmla(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FMLA_4S, rd, rn, rm)
}
/// `rd -= rn * rm`
pub fn fmls(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FMLS_4S, rd, rn, rm)
}
/// All-ones lanes where `rn > rm`.
pub fn fcmgt(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FCMGT_4S, rd, rn, rm)
}
pub fn fcmge(rd: u8, rn: u8, rm: u8) -> u32 {
    three(FCMGE_4S, rd, rn, rm)
}
pub fn add_4s(rd: u8, rn: u8, rm: u8) -> u32 {
    three(ADD_4S, rd, rn, rm)
}
pub fn and(rd: u8, rn: u8, rm: u8) -> u32 {
    three(AND_16B, rd, rn, rm)
}
pub fn orr(rd: u8, rn: u8, rm: u8) -> u32 {
    three(ORR_16B, rd, rn, rm)
}
pub fn eor(rd: u8, rn: u8, rm: u8) -> u32 {
    three(EOR_16B, rd, rn, rm)
}
/// Insert bits of `rn` into `rd` where `rm` is set.
pub fn bit(rd: u8, rn: u8, rm: u8) -> u32 {
    three(BIT_16B, rd, rn, rm)
}
/// Insert bits of `rn` into `rd` where `rm` is clear.
pub fn bif(rd: u8, rn: u8, rm: u8) -> u32 {
    three(BIF_16B, rd, rn, rm)
}
/// Odd halfwords of `rn:rm`, i.e. the high half of every 32-bit lane.
pub fn uzp2_8h(rd: u8, rn: u8, rm: u8) -> u32 {
    three(UZP2_8H, rd, rn, rm)
}
pub fn mov(rd: u8, rn: u8) -> u32 {
    three(ORR_16B, rd, rn, rn)
}

// ── Two-register forms ──────────────────────────────────────────────────────

pub fn fabs(rd: u8, rn: u8) -> u32 {
    two(FABS_4S, rd, rn)
}
pub fn fneg(rd: u8, rn: u8) -> u32 {
    two(FNEG_4S, rd, rn)
}
pub fn fsqrt(rd: u8, rn: u8) -> u32 {
    two(FSQRT_4S, rd, rn)
}
/// Round to nearest, ties to even.
pub fn frintn(rd: u8, rn: u8) -> u32 {
    two(FRINTN_4S, rd, rn)
}
pub fn fcvtzs(rd: u8, rn: u8) -> u32 {
    two(FCVTZS_4S, rd, rn)
}
pub fn shll(rd: u8, rn: u8) -> u32 {
    two(SHLL_4S, rd, rn)
}
pub fn shll2(rd: u8, rn: u8) -> u32 {
    two(SHLL2_4S, rd, rn)
}
pub fn fcvtl(rd: u8, rn: u8) -> u32 {
    two(FCVTL_4S, rd, rn)
}
pub fn fcvtl2(rd: u8, rn: u8) -> u32 {
    two(FCVTL2_4S, rd, rn)
}
pub fn fcvtn(rd: u8, rn: u8) -> u32 {
    two(FCVTN_4H, rd, rn)
}
pub fn fcvtn2(rd: u8, rn: u8) -> u32 {
    two(FCVTN2_8H, rd, rn)
}
/// Broadcast lane 0.
pub fn dup_lane0(rd: u8, rn: u8) -> u32 {
    two(DUP_4S_LANE, rd, rn)
}

// ── Shifts and immediates ───────────────────────────────────────────────────

pub fn shl_4s(rd: u8, rn: u8, shift: u32) -> Result<u32, String> {
    if shift > 31 {
        return Err(format!("shl #{shift} out of range for .4s"));
    }
    Ok(two(SHL_4S, rd, rn) | ((32 + shift) << 16))
}

pub fn ushr_4s(rd: u8, rn: u8, shift: u32) -> Result<u32, String> {
    if !(1..=32).contains(&shift) {
        return Err(format!("ushr #{shift} out of range for .4s"));
    }
    Ok(two(USHR_4S, rd, rn) | ((64 - shift) << 16))
}

pub fn movi_zero(rd: u8) -> u32 {
    MOVI_2D_ZERO | r(rd)
}

/// `movi vd.4s, #imm8`
pub fn movi_4s(rd: u8, imm8: u8) -> u32 {
    let abc = (imm8 as u32 >> 5) & 0x7;
    let defgh = imm8 as u32 & 0x1F;
    MOVI_4S | (abc << 16) | (defgh << 5) | r(rd)
}

/// `movi vd.4s, #imm8, msl #8` (value `imm8 << 8 | 0xFF`).
pub fn movi_4s_msl8(rd: u8, imm8: u8) -> u32 {
    movi_4s(rd, imm8) | (0xC << 12)
}

// ── Loads and stores ────────────────────────────────────────────────────────

/// Arrangement of a full 128-bit vector transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrangement {
    S4,
    H8,
}

impl Arrangement {
    fn size_bits(self) -> u32 {
        match self {
            Arrangement::S4 => 0b10,
            Arrangement::H8 => 0b01,
        }
    }
}

/// `ld1 {vt.<T>}, [xn]`
pub fn ld1(rt: u8, arr: Arrangement, rn: u8) -> u32 {
    LD1_1REG | (arr.size_bits() << 10) | (r(rn) << 5) | r(rt)
}

/// `st1 {vt.<T>}, [xn]`
pub fn st1(rt: u8, arr: Arrangement, rn: u8) -> u32 {
    ST1_1REG | (arr.size_bits() << 10) | (r(rn) << 5) | r(rt)
}

/// Q:S:size fields selecting one lane of a single-structure transfer.
fn lane_fields(lane: u8, esize: usize) -> Result<u32, String> {
    let lane = lane as u32;
    match esize {
        4 if lane < 4 => {
            let (q, s) = (lane >> 1, lane & 1);
            Ok((q << 30) | (0b100 << 13) | (s << 12))
        }
        2 if lane < 8 => {
            let (q, s, size) = (lane >> 2, (lane >> 1) & 1, (lane & 1) << 1);
            Ok((q << 30) | (0b010 << 13) | (s << 12) | (size << 10))
        }
        _ => Err(format!("lane {lane} invalid for {esize}-byte elements")),
    }
}

/// `ld1 {vt.<T>}[lane], [xn], #esize`
pub fn ld1_lane_post(rt: u8, lane: u8, esize: usize, rn: u8) -> Result<u32, String> {
    Ok(LD1_LANE_POST | (0x1F << 16) | lane_fields(lane, esize)? | (r(rn) << 5) | r(rt))
}

/// `st1 {vt.<T>}[lane], [xn], #esize`
pub fn st1_lane_post(rt: u8, lane: u8, esize: usize, rn: u8) -> Result<u32, String> {
    Ok(ST1_LANE_POST | (0x1F << 16) | lane_fields(lane, esize)? | (r(rn) << 5) | r(rt))
}

/// `ldr st, [xn, #imm]`
pub fn ldr_s(rt: u8, rn: u8, imm: u32) -> Result<u32, String> {
    if imm % 4 != 0 || imm / 4 > 0xFFF {
        return Err(format!("ldr s offset {imm} not encodable"));
    }
    Ok(LDR_S | ((imm / 4) << 10) | (r(rn) << 5) | r(rt))
}

/// `ldr qt, [xn, #imm]`
pub fn ldr_q(rt: u8, rn: u8, imm: u32) -> Result<u32, String> {
    if imm % 16 != 0 || imm / 16 > 0xFFF {
        return Err(format!("ldr q offset {imm} not encodable"));
    }
    Ok(LDR_Q | ((imm / 16) << 10) | (r(rn) << 5) | r(rt))
}

/// `str qt, [xn, #imm]`
pub fn str_q(rt: u8, rn: u8, imm: u32) -> Result<u32, String> {
    if imm % 16 != 0 || imm / 16 > 0xFFF {
        return Err(format!("str q offset {imm} not encodable"));
    }
    Ok(STR_Q | ((imm / 16) << 10) | (r(rn) << 5) | r(rt))
}
