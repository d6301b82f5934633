//! A64 decoder for the instruction subset the eltwise generator emits.
//!
//! Anything outside that subset decodes to [`EmuError::Unsupported`], so the
//! decoder doubles as a check that the generator only produces what the
//! machine model implements.

use super::EmuError;

/// Binary NEON operations on full 128-bit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VBin {
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fmax,
    Fmin,
    Fmla,
    Fmls,
    Fcmgt,
    Fcmge,
    AddS,
    And,
    Orr,
    Eor,
    Bit,
    Bif,
    Uzp2H,
}

/// Unary NEON operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VUn {
    Fabs,
    Fneg,
    Fsqrt,
    Frintn,
    Fcvtzs,
    Shll,
    Shll2,
    Fcvtl,
    Fcvtl2,
    Fcvtn,
    Fcvtn2,
}

/// Unpredicated SVE binary operations (`.s` or bitwise `.d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZBin {
    Fadd,
    Fsub,
    Fmul,
    AddS,
    And,
    Orr,
    Eor,
}

/// Destructive predicated SVE operations: `zdn = zdn <op> zm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZBinP {
    Fmax,
    Fmin,
    Fdiv,
    Fdivr,
}

/// Predicated merging SVE unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZUn {
    Fabs,
    Fneg,
    Fsqrt,
    Frintn,
    Fcvtzs,
    FcvtH2S,
    FcvtS2H,
    FcvtltH2S,
    FcvtntS2H,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    // ── General purpose ──
    StpPre { rt1: u8, rt2: u8, rn: u8, imm: i64 },
    LdpPost { rt1: u8, rt2: u8, rn: u8, imm: i64 },
    LdrX { rt: u8, rn: u8, imm: u64 },
    AddImm { rd: u8, rn: u8, imm: u64 },
    SubImm { rd: u8, rn: u8, imm: u64 },
    SubsImm { rd: u8, rn: u8, imm: u64 },
    OrrReg { rd: u8, rn: u8, rm: u8 },
    Movz { rd: u8, imm: u64 },
    Movk { rd: u8, imm16: u16, shift: u32 },
    Addvl { rd: u8, rn: u8, imm: i64 },
    Adr { rd: u8, off: i64 },
    B { off: i64 },
    BCond { cond: u8, off: i64 },
    Cbz { rt: u8, off: i64, nonzero: bool },
    Ret { rn: u8 },
    Nop,

    // ── Advanced SIMD ──
    VBin { op: VBin, rd: u8, rn: u8, rm: u8 },
    VUn { op: VUn, rd: u8, rn: u8 },
    Shl { rd: u8, rn: u8, shift: u32 },
    Ushr { rd: u8, rn: u8, shift: u32 },
    DupLane { rd: u8, rn: u8, lane: u8 },
    MoviZero { rd: u8 },
    Movi4s { rd: u8, value: u32 },
    LdrS { rt: u8, rn: u8, imm: u64 },
    LdrQ { rt: u8, rn: u8, imm: u64 },
    StrQ { rt: u8, rn: u8, imm: u64 },
    Ld1 { rt: u8, rn: u8 },
    St1 { rt: u8, rn: u8 },
    Ld1Lane { rt: u8, rn: u8, lane: u8, esize: u8 },
    St1Lane { rt: u8, rn: u8, lane: u8, esize: u8 },

    // ── SVE ──
    Ptrue { pd: u8, esize: u8 },
    Whilelt { pd: u8, esize: u8, rn: u8, rm: u8 },
    SveLd { zt: u8, pg: u8, rn: u8, esize: u8 },
    SveSt { zt: u8, pg: u8, rn: u8, esize: u8 },
    Ld1rw { zt: u8, pg: u8, rn: u8, imm: u64 },
    StrZ { zt: u8, rn: u8, idx: i64 },
    LdrZ { zt: u8, rn: u8, idx: i64 },
    ZBin { op: ZBin, zd: u8, zn: u8, zm: u8 },
    ZBinP { op: ZBinP, zdn: u8, pg: u8, zm: u8 },
    ZFma { sub: bool, zda: u8, pg: u8, zn: u8, zm: u8 },
    ZUn { op: ZUn, zd: u8, pg: u8, zn: u8 },
    ZCmp { ge: bool, pd: u8, pg: u8, zn: u8, zm: u8 },
    Sel { zd: u8, pg: u8, zn: u8, zm: u8 },
    Movprfx { zd: u8, zn: u8 },
    ZShift { left: bool, zd: u8, zn: u8, shift: u32 },
    AndImm { zdn: u8, imm: u64 },
    Dupm { zd: u8, imm: u64 },
    DupImm { zd: u8, imm: i32 },
}

#[inline]
fn f(w: u32, lo: u32, bits: u32) -> u32 {
    (w >> lo) & ((1 << bits) - 1)
}

#[inline]
fn rd(w: u32) -> u8 {
    (w & 0x1F) as u8
}

#[inline]
fn rn(w: u32) -> u8 {
    f(w, 5, 5) as u8
}

#[inline]
fn rm(w: u32) -> u8 {
    f(w, 16, 5) as u8
}

#[inline]
fn pg(w: u32) -> u8 {
    f(w, 10, 3) as u8
}

fn sext(v: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

/// `DecodeBitMasks` for a 13-bit `N:immr:imms` field, replicated to 64 bits.
pub fn decode_bitmask_imm(imm13: u32) -> Option<u64> {
    let n = f(imm13, 12, 1);
    let immr = f(imm13, 6, 6);
    let imms = f(imm13, 0, 6);
    let combined = (n << 6) | (!imms & 0x3F);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    let size = 1u32 << len;
    let levels = size - 1;
    let s = imms & levels;
    let r = immr & levels;
    if s == levels {
        return None;
    }
    let mask = if size == 64 { u64::MAX } else { (1u64 << size) - 1 };
    let ones = (1u64 << (s + 1)) - 1;
    let elem = if r == 0 {
        ones
    } else {
        ((ones >> r) | (ones << (size - r))) & mask
    };
    let mut out = 0u64;
    let mut pos = 0;
    while pos < 64 {
        out |= elem << pos;
        pos += size;
    }
    Some(out)
}

pub fn decode(w: u32) -> Result<Insn, EmuError> {
    decode_gp(w)
        .or_else(|| decode_neon(w))
        .or_else(|| decode_sve(w))
        .ok_or(EmuError::Unsupported(w))
}

fn decode_gp(w: u32) -> Option<Insn> {
    let insn = match w {
        0xD503201F => Insn::Nop,
        _ if w & 0xFFFFFC1F == 0xD65F0000 => Insn::Ret { rn: rn(w) },
        _ if w & 0xFFC00000 == 0xA9800000 => Insn::StpPre {
            rt1: rd(w),
            rt2: f(w, 10, 5) as u8,
            rn: rn(w),
            imm: sext(f(w, 15, 7) as u64, 7) * 8,
        },
        _ if w & 0xFFC00000 == 0xA8C00000 => Insn::LdpPost {
            rt1: rd(w),
            rt2: f(w, 10, 5) as u8,
            rn: rn(w),
            imm: sext(f(w, 15, 7) as u64, 7) * 8,
        },
        _ if w & 0xFFC00000 == 0xF9400000 => Insn::LdrX {
            rt: rd(w),
            rn: rn(w),
            imm: f(w, 10, 12) as u64 * 8,
        },
        _ if w & 0xFF800000 == 0x91000000 => Insn::AddImm {
            rd: rd(w),
            rn: rn(w),
            imm: (f(w, 10, 12) as u64) << (12 * f(w, 22, 1)),
        },
        _ if w & 0xFF800000 == 0xD1000000 => Insn::SubImm {
            rd: rd(w),
            rn: rn(w),
            imm: (f(w, 10, 12) as u64) << (12 * f(w, 22, 1)),
        },
        _ if w & 0xFF800000 == 0xF1000000 => Insn::SubsImm {
            rd: rd(w),
            rn: rn(w),
            imm: (f(w, 10, 12) as u64) << (12 * f(w, 22, 1)),
        },
        _ if w & 0xFFE0FC00 == 0xAA000000 => Insn::OrrReg { rd: rd(w), rn: rn(w), rm: rm(w) },
        _ if w & 0xFF800000 == 0xD2800000 => Insn::Movz {
            rd: rd(w),
            imm: (f(w, 5, 16) as u64) << (16 * f(w, 21, 2)),
        },
        _ if w & 0xFF800000 == 0xF2800000 => Insn::Movk {
            rd: rd(w),
            imm16: f(w, 5, 16) as u16,
            shift: 16 * f(w, 21, 2),
        },
        _ if w & 0xFFE0F800 == 0x04205000 => Insn::Addvl {
            rd: rd(w),
            rn: rm(w),
            imm: sext(f(w, 5, 6) as u64, 6),
        },
        _ if w & 0x9F000000 == 0x10000000 => {
            let imm = (f(w, 5, 19) << 2) | f(w, 29, 2);
            Insn::Adr { rd: rd(w), off: sext(imm as u64, 21) }
        }
        _ if w & 0xFC000000 == 0x14000000 => Insn::B { off: sext(f(w, 0, 26) as u64, 26) * 4 },
        _ if w & 0xFF000010 == 0x54000000 => Insn::BCond {
            cond: f(w, 0, 4) as u8,
            off: sext(f(w, 5, 19) as u64, 19) * 4,
        },
        _ if w & 0xFE000000 == 0xB4000000 => Insn::Cbz {
            rt: rd(w),
            off: sext(f(w, 5, 19) as u64, 19) * 4,
            nonzero: f(w, 24, 1) == 1,
        },
        _ => return None,
    };
    Some(insn)
}

fn decode_neon(w: u32) -> Option<Insn> {
    let (d, n, m) = (rd(w), rn(w), rm(w));

    let bin = match w & 0xFFE0FC00 {
        0x4E20D400 => Some(VBin::Fadd),
        0x4EA0D400 => Some(VBin::Fsub),
        0x6E20DC00 => Some(VBin::Fmul),
        0x6E20FC00 => Some(VBin::Fdiv),
        0x4E20F400 => Some(VBin::Fmax),
        0x4EA0F400 => Some(VBin::Fmin),
        0x4E20CC00 => Some(VBin::Fmla),
        0x4EA0CC00 => Some(VBin::Fmls),
        0x6EA0E400 => Some(VBin::Fcmgt),
        0x6E20E400 => Some(VBin::Fcmge),
        0x4EA08400 => Some(VBin::AddS),
        0x4E201C00 => Some(VBin::And),
        0x4EA01C00 => Some(VBin::Orr),
        0x6E201C00 => Some(VBin::Eor),
        0x6EA01C00 => Some(VBin::Bit),
        0x6EE01C00 => Some(VBin::Bif),
        0x4E405800 => Some(VBin::Uzp2H),
        _ => None,
    };
    if let Some(op) = bin {
        return Some(Insn::VBin { op, rd: d, rn: n, rm: m });
    }

    let un = match w & 0xFFFFFC00 {
        0x4EA0F800 => Some(VUn::Fabs),
        0x6EA0F800 => Some(VUn::Fneg),
        0x6EA1F800 => Some(VUn::Fsqrt),
        0x4E218800 => Some(VUn::Frintn),
        0x4EA1B800 => Some(VUn::Fcvtzs),
        0x2E613800 => Some(VUn::Shll),
        0x6E613800 => Some(VUn::Shll2),
        0x0E217800 => Some(VUn::Fcvtl),
        0x4E217800 => Some(VUn::Fcvtl2),
        0x0E216800 => Some(VUn::Fcvtn),
        0x4E216800 => Some(VUn::Fcvtn2),
        _ => None,
    };
    if let Some(op) = un {
        return Some(Insn::VUn { op, rd: d, rn: n });
    }

    let insn = match w {
        _ if w & 0xFFE0FC00 == 0x4F205400 => Insn::Shl { rd: d, rn: n, shift: f(w, 16, 7) - 32 },
        _ if w & 0xFFE0FC00 == 0x6F200400 => Insn::Ushr { rd: d, rn: n, shift: 64 - f(w, 16, 7) },
        _ if w & 0xFFE0FC00 == 0x4E000400 && f(w, 16, 3) == 0b100 => Insn::DupLane {
            rd: d,
            rn: n,
            lane: f(w, 19, 2) as u8,
        },
        _ if w & 0xFFFFFFE0 == 0x6F00E400 => Insn::MoviZero { rd: d },
        _ if w & 0xFFF8FC00 == 0x4F000400 || w & 0xFFF8FC00 == 0x4F00C400 => {
            let imm8 = (f(w, 16, 3) << 5) | f(w, 5, 5);
            let value = if f(w, 12, 4) == 0xC { (imm8 << 8) | 0xFF } else { imm8 };
            Insn::Movi4s { rd: d, value }
        }
        _ if w & 0xFFC00000 == 0xBD400000 => Insn::LdrS { rt: d, rn: n, imm: f(w, 10, 12) as u64 * 4 },
        _ if w & 0xFFC00000 == 0x3DC00000 => Insn::LdrQ { rt: d, rn: n, imm: f(w, 10, 12) as u64 * 16 },
        _ if w & 0xFFC00000 == 0x3D800000 => Insn::StrQ { rt: d, rn: n, imm: f(w, 10, 12) as u64 * 16 },
        _ if w & 0xFFFFF000 == 0x4C407000 => Insn::Ld1 { rt: d, rn: n },
        _ if w & 0xFFFFF000 == 0x4C007000 => Insn::St1 { rt: d, rn: n },
        _ if w & 0xBFFF0000 == 0x0DDF0000 || w & 0xBFFF0000 == 0x0D9F0000 => {
            let (lane, esize) = decode_lane(w)?;
            let load = f(w, 22, 1) == 1;
            if load {
                Insn::Ld1Lane { rt: d, rn: n, lane, esize }
            } else {
                Insn::St1Lane { rt: d, rn: n, lane, esize }
            }
        }
        _ => return None,
    };
    Some(insn)
}

/// Lane index and element size of a single-structure transfer.
fn decode_lane(w: u32) -> Option<(u8, u8)> {
    let q = f(w, 30, 1);
    let s = f(w, 12, 1);
    let size = f(w, 10, 2);
    match f(w, 13, 3) {
        0b100 if size == 0 => Some((((q << 1) | s) as u8, 4)),
        0b010 if size & 1 == 0 => Some((((q << 2) | (s << 1) | (size >> 1)) as u8, 2)),
        _ => None,
    }
}

fn decode_sve(w: u32) -> Option<Insn> {
    let (d, n, m) = (rd(w), rn(w), rm(w));
    let esize_of = |sz: u32| -> Option<u8> {
        match sz {
            0b01 => Some(2),
            0b10 => Some(4),
            _ => None,
        }
    };

    let insn = match w {
        _ if w & 0xFF3FFFF0 == 0x2518E3E0 => Insn::Ptrue {
            pd: (w & 0xF) as u8,
            esize: esize_of(f(w, 22, 2))?,
        },
        _ if w & 0xFF20FC10 == 0x25201400 => Insn::Whilelt {
            pd: (w & 0xF) as u8,
            esize: esize_of(f(w, 22, 2))?,
            rn: n,
            rm: m,
        },
        _ if w & 0xFFFFE000 == 0xA540A000 => Insn::SveLd { zt: d, pg: pg(w), rn: n, esize: 4 },
        _ if w & 0xFFFFE000 == 0xA4A0A000 => Insn::SveLd { zt: d, pg: pg(w), rn: n, esize: 2 },
        _ if w & 0xFFFFE000 == 0xE540E000 => Insn::SveSt { zt: d, pg: pg(w), rn: n, esize: 4 },
        _ if w & 0xFFFFE000 == 0xE4A0E000 => Insn::SveSt { zt: d, pg: pg(w), rn: n, esize: 2 },
        _ if w & 0xFFC0E000 == 0x8540C000 => Insn::Ld1rw {
            zt: d,
            pg: pg(w),
            rn: n,
            imm: f(w, 16, 6) as u64 * 4,
        },
        _ if w & 0xFFC0E000 == 0xE5804000 || w & 0xFFC0E000 == 0x85804000 => {
            let imm9 = (f(w, 16, 6) << 3) | f(w, 10, 3);
            let idx = sext(imm9 as u64, 9);
            if w & 0xF0000000 == 0xE0000000 {
                Insn::StrZ { zt: d, rn: n, idx }
            } else {
                Insn::LdrZ { zt: d, rn: n, idx }
            }
        }
        _ if w & 0xFFE0FC00 == 0x65800000 => Insn::ZBin { op: ZBin::Fadd, zd: d, zn: n, zm: m },
        _ if w & 0xFFE0FC00 == 0x65800400 => Insn::ZBin { op: ZBin::Fsub, zd: d, zn: n, zm: m },
        _ if w & 0xFFE0FC00 == 0x65800800 => Insn::ZBin { op: ZBin::Fmul, zd: d, zn: n, zm: m },
        _ if w & 0xFFE0FC00 == 0x04A00000 => Insn::ZBin { op: ZBin::AddS, zd: d, zn: n, zm: m },
        _ if w & 0xFFE0FC00 == 0x04203000 => Insn::ZBin { op: ZBin::And, zd: d, zn: n, zm: m },
        _ if w & 0xFFE0FC00 == 0x04603000 => Insn::ZBin { op: ZBin::Orr, zd: d, zn: n, zm: m },
        _ if w & 0xFFE0FC00 == 0x04A03000 => Insn::ZBin { op: ZBin::Eor, zd: d, zn: n, zm: m },
        _ if w & 0xFFFFE000 == 0x65868000 => Insn::ZBinP { op: ZBinP::Fmax, zdn: d, pg: pg(w), zm: n },
        _ if w & 0xFFFFE000 == 0x65878000 => Insn::ZBinP { op: ZBinP::Fmin, zdn: d, pg: pg(w), zm: n },
        _ if w & 0xFFFFE000 == 0x658D8000 => Insn::ZBinP { op: ZBinP::Fdiv, zdn: d, pg: pg(w), zm: n },
        _ if w & 0xFFFFE000 == 0x658C8000 => Insn::ZBinP { op: ZBinP::Fdivr, zdn: d, pg: pg(w), zm: n },
        _ if w & 0xFFE0E000 == 0x65A00000 => Insn::ZFma { sub: false, zda: d, pg: pg(w), zn: n, zm: m },
        _ if w & 0xFFE0E000 == 0x65A02000 => Insn::ZFma { sub: true, zda: d, pg: pg(w), zn: n, zm: m },
        _ if w & 0xFFE0E010 == 0x65804000 || w & 0xFFE0E010 == 0x65804010 => Insn::ZCmp {
            ge: f(w, 4, 1) == 0,
            pd: (w & 0xF) as u8,
            pg: pg(w),
            zn: n,
            zm: m,
        },
        _ if w & 0xFFE0C000 == 0x05A0C000 => Insn::Sel {
            zd: d,
            pg: f(w, 10, 4) as u8,
            zn: n,
            zm: m,
        },
        _ if w & 0xFFFFFC00 == 0x0420BC00 => Insn::Movprfx { zd: d, zn: n },
        _ if w & 0xFF20F000 == 0x04209000 && (f(w, 10, 2) == 0b01 || f(w, 10, 2) == 0b11) => {
            let tsz = (f(w, 22, 2) << 2) | f(w, 19, 2);
            // .s only
            if tsz >> 2 != 0b01 {
                return None;
            }
            let imm = (tsz << 3) | f(w, 16, 3);
            let left = f(w, 10, 2) == 0b11;
            let shift = if left { imm.checked_sub(32)? } else { 64u32.checked_sub(imm)? };
            Insn::ZShift { left, zd: d, zn: n, shift }
        }
        _ if w & 0xFFFC0000 == 0x05800000 => Insn::AndImm {
            zdn: d,
            imm: decode_bitmask_imm(f(w, 5, 13))?,
        },
        _ if w & 0xFFFC0000 == 0x05C00000 => Insn::Dupm {
            zd: d,
            imm: decode_bitmask_imm(f(w, 5, 13))?,
        },
        _ if w & 0xFFFFE000 == 0x25B8C000 => Insn::DupImm {
            zd: d,
            imm: f(w, 5, 8) as u8 as i8 as i32,
        },
        _ => return decode_sve_unary(w),
    };
    Some(insn)
}

fn decode_sve_unary(w: u32) -> Option<Insn> {
    let op = match w & 0xFFFFE000 {
        0x049CA000 => ZUn::Fabs,
        0x049DA000 => ZUn::Fneg,
        0x658DA000 => ZUn::Fsqrt,
        0x6580A000 => ZUn::Frintn,
        0x659CA000 => ZUn::Fcvtzs,
        0x6589A000 => ZUn::FcvtH2S,
        0x6588A000 => ZUn::FcvtS2H,
        0x6489A000 => ZUn::FcvtltH2S,
        0x6488A000 => ZUn::FcvtntS2H,
        _ => return None,
    };
    Some(Insn::ZUn { op, zd: rd(w), pg: pg(w), zn: rn(w) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::asm::{self, XReg};
    use crate::compiler::codegen::{neon, sve};

    #[test]
    fn test_gp_round_trip() {
        let w = asm::encode_stp_pre(XReg(29), XReg(30), XReg(31), -16).unwrap();
        assert_eq!(decode(w).unwrap(), Insn::StpPre { rt1: 29, rt2: 30, rn: 31, imm: -16 });
        let w = asm::encode_ldr_x(XReg(6), XReg(0), 24).unwrap();
        assert_eq!(decode(w).unwrap(), Insn::LdrX { rt: 6, rn: 0, imm: 24 });
        let w = asm::encode_cmp_imm(XReg(6), 8).unwrap();
        assert_eq!(decode(w).unwrap(), Insn::SubsImm { rd: 31, rn: 6, imm: 8 });
        let w = asm::encode_addvl(XReg(31), XReg(31), -3).unwrap();
        assert_eq!(decode(w).unwrap(), Insn::Addvl { rd: 31, rn: 31, imm: -3 });
        assert_eq!(decode(asm::RET).unwrap(), Insn::Ret { rn: 30 });
        // b.lt +8
        assert_eq!(decode(0x5400004B).unwrap(), Insn::BCond { cond: 0xB, off: 8 });
        // b -8
        assert_eq!(decode(0x17FFFFFE).unwrap(), Insn::B { off: -8 });
    }

    #[test]
    fn test_neon_lane_fields() {
        for lane in 0..4u8 {
            let w = neon::ld1_lane_post(1, lane, 4, 12).unwrap();
            assert_eq!(decode(w).unwrap(), Insn::Ld1Lane { rt: 1, rn: 12, lane, esize: 4 });
        }
        for lane in 0..8u8 {
            let w = neon::st1_lane_post(1, lane, 2, 13).unwrap();
            assert_eq!(decode(w).unwrap(), Insn::St1Lane { rt: 1, rn: 13, lane, esize: 2 });
        }
    }

    #[test]
    fn test_neon_immediates() {
        assert_eq!(decode(neon::shl_4s(1, 2, 23).unwrap()).unwrap(), Insn::Shl { rd: 1, rn: 2, shift: 23 });
        assert_eq!(decode(neon::ushr_4s(4, 1, 16).unwrap()).unwrap(), Insn::Ushr { rd: 4, rn: 1, shift: 16 });
        assert_eq!(decode(neon::movi_4s(6, 1)).unwrap(), Insn::Movi4s { rd: 6, value: 1 });
        assert_eq!(decode(neon::movi_4s_msl8(5, 0x7F)).unwrap(), Insn::Movi4s { rd: 5, value: 0x7FFF });
        assert_eq!(decode(neon::dup_lane0(16, 16)).unwrap(), Insn::DupLane { rd: 16, rn: 16, lane: 0 });
    }

    #[test]
    fn test_sve_round_trip() {
        assert_eq!(decode(sve::lsl_s(1, 1, 16).unwrap()).unwrap(), Insn::ZShift { left: true, zd: 1, zn: 1, shift: 16 });
        assert_eq!(decode(sve::lsr_s(5, 1, 16).unwrap()).unwrap(), Insn::ZShift { left: false, zd: 5, zn: 1, shift: 16 });
        assert_eq!(
            decode(sve::and_imm_s(2, 0xFFFF_0000).unwrap()).unwrap(),
            Insn::AndImm { zdn: 2, imm: 0xFFFF_0000_FFFF_0000 }
        );
        assert_eq!(
            decode(sve::dupm_s(5, 0x7FFF).unwrap()).unwrap(),
            Insn::Dupm { zd: 5, imm: 0x0000_7FFF_0000_7FFF }
        );
        assert_eq!(decode(sve::str_z(17, 31, -2).unwrap()).unwrap(), Insn::StrZ { zt: 17, rn: 31, idx: -2 });
        assert_eq!(decode(sve::fdivr(17, 4, 16).unwrap()).unwrap(), Insn::ZBinP { op: ZBinP::Fdivr, zdn: 17, pg: 4, zm: 16 });
        assert_eq!(decode(sve::dup_imm_s(3, 0)).unwrap(), Insn::DupImm { zd: 3, imm: 0 });
    }

    #[test]
    fn test_unknown_word_rejected() {
        assert!(matches!(decode(0x00000000), Err(EmuError::Unsupported(0))));
    }
}
