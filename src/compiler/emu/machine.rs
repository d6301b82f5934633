//! Register file and execution engine.
//!
//! Z registers are `vlen` bytes; NEON writes land in the low 128 bits and
//! zero the rest, as on hardware with SVE. Predicates keep one bit per
//! vector byte so `.h` and `.s` views share storage.

use half::f16;

use super::decoder::{decode, Insn, VBin, VUn, ZBin, ZBinP, ZUn};
use super::EmuError;

const STACK_BYTES: usize = 64 * 1024;
const RETURN_SENTINEL: u64 = 0xFFFF_FFFF_FFFF_FFF0;
const MAX_VLEN: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    n: bool,
    z: bool,
    c: bool,
    v: bool,
}

pub struct Machine {
    vlen: usize,
    x: [u64; 31],
    sp: u64,
    flags: Flags,
    z: Vec<Vec<u8>>,
    p: Vec<Vec<bool>>,
    stack: Vec<u8>,
    steps: u64,
}

// ── Lane helpers ────────────────────────────────────────────────────

#[inline]
fn lane_u32(bytes: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([bytes[4 * i], bytes[4 * i + 1], bytes[4 * i + 2], bytes[4 * i + 3]])
}

#[inline]
fn put_u32(bytes: &mut [u8], i: usize, v: u32) {
    bytes[4 * i..4 * i + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn lane_u16(bytes: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]])
}

#[inline]
fn put_u16(bytes: &mut [u8], i: usize, v: u16) {
    bytes[2 * i..2 * i + 2].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn quiet(a: f32) -> f32 {
    f32::from_bits(a.to_bits() | 0x0040_0000)
}

/// FMAX: NaN operands propagate, `max(-0, +0) = +0`.
fn fmax(a: f32, b: f32) -> f32 {
    if a.is_nan() {
        quiet(a)
    } else if b.is_nan() {
        quiet(b)
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_negative() { b } else { a }
    } else if a > b {
        a
    } else {
        b
    }
}

/// FMIN: NaN operands propagate, `min(-0, +0) = -0`.
fn fmin(a: f32, b: f32) -> f32 {
    if a.is_nan() {
        quiet(a)
    } else if b.is_nan() {
        quiet(b)
    } else if a == 0.0 && b == 0.0 {
        if a.is_sign_negative() { a } else { b }
    } else if a < b {
        a
    } else {
        b
    }
}

fn f32_bin(op: VBin, d: f32, a: f32, b: f32) -> u32 {
    let r = match op {
        VBin::Fadd => a + b,
        VBin::Fsub => a - b,
        VBin::Fmul => a * b,
        VBin::Fdiv => a / b,
        VBin::Fmax => fmax(a, b),
        VBin::Fmin => fmin(a, b),
        VBin::Fmla => a.mul_add(b, d),
        VBin::Fmls => (-a).mul_add(b, d),
        VBin::Fcmgt => return if a > b { u32::MAX } else { 0 },
        VBin::Fcmge => return if a >= b { u32::MAX } else { 0 },
        _ => unreachable!("integer op routed to f32 lane"),
    };
    r.to_bits()
}

fn f32_un(op: ZUn, bits: u32) -> u32 {
    let a = f32::from_bits(bits);
    match op {
        ZUn::Fabs => bits & 0x7FFF_FFFF,
        ZUn::Fneg => bits ^ 0x8000_0000,
        ZUn::Fsqrt => a.sqrt().to_bits(),
        ZUn::Frintn => a.round_ties_even().to_bits(),
        ZUn::Fcvtzs => (a as i32) as u32,
        _ => unreachable!("conversion routed to f32 lane"),
    }
}

fn neon_un_lane(op: VUn) -> Option<ZUn> {
    match op {
        VUn::Fabs => Some(ZUn::Fabs),
        VUn::Fneg => Some(ZUn::Fneg),
        VUn::Fsqrt => Some(ZUn::Fsqrt),
        VUn::Frintn => Some(ZUn::Frintn),
        VUn::Fcvtzs => Some(ZUn::Fcvtzs),
        _ => None,
    }
}

#[inline]
fn h2s(h: u16) -> u32 {
    f16::from_bits(h).to_f32().to_bits()
}

#[inline]
fn s2h(s: u32) -> u16 {
    f16::from_f32(f32::from_bits(s)).to_bits()
}

// ── Host memory ─────────────────────────────────────────────────────

/// # Safety
/// `addr..addr+out.len()` must be readable.
unsafe fn load(addr: u64, out: &mut [u8]) {
    unsafe { std::ptr::copy_nonoverlapping(addr as *const u8, out.as_mut_ptr(), out.len()) }
}

/// # Safety
/// `addr..addr+data.len()` must be writable.
unsafe fn store(addr: u64, data: &[u8]) {
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len()) }
}

impl Machine {
    pub fn new(vlen: usize) -> Result<Self, EmuError> {
        if vlen < 16 || vlen > MAX_VLEN || vlen % 16 != 0 {
            return Err(EmuError::InvalidVlen(vlen));
        }
        Ok(Machine {
            vlen,
            x: [0; 31],
            sp: 0,
            flags: Flags::default(),
            z: vec![vec![0u8; vlen]; 32],
            p: vec![vec![false; vlen]; 16],
            stack: vec![0u8; STACK_BYTES],
            steps: 0,
        })
    }

    pub fn vlen(&self) -> usize {
        self.vlen
    }

    /// Instructions retired by the last `call`.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run `code` from offset 0 with `x0 = arg0` until it returns.
    ///
    /// # Safety
    /// Every address the code touches through `arg0` must be valid for the
    /// access it makes, exactly as for a native call.
    pub unsafe fn call(&mut self, code: &[u8], arg0: u64) -> Result<(), EmuError> {
        let base = code.as_ptr() as u64;
        let n_words = code.len() / 4;
        let mut cache: Vec<Option<Insn>> = vec![None; n_words];

        let top = self.stack.as_ptr() as u64 + self.stack.len() as u64;
        self.sp = top & !0xF;
        self.x = [0; 31];
        self.x[0] = arg0;
        self.x[30] = RETURN_SENTINEL;
        self.steps = 0;

        let mut pc: u64 = 0;
        loop {
            let idx = (pc / 4) as usize;
            if pc % 4 != 0 || idx >= n_words {
                return Err(EmuError::PcOutOfRange(pc));
            }
            let insn = match cache[idx] {
                Some(insn) => insn,
                None => {
                    let b = &code[idx * 4..idx * 4 + 4];
                    let insn = decode(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))?;
                    cache[idx] = Some(insn);
                    insn
                }
            };
            self.steps += 1;

            let next = match insn {
                Insn::Ret { rn } => {
                    let target = self.xr(rn);
                    if target == RETURN_SENTINEL {
                        return Ok(());
                    }
                    target.wrapping_sub(base)
                }
                Insn::B { off } => pc.wrapping_add(off as u64),
                Insn::BCond { cond, off } => {
                    if self.cond_holds(cond) {
                        pc.wrapping_add(off as u64)
                    } else {
                        pc + 4
                    }
                }
                Insn::Cbz { rt, off, nonzero } => {
                    if (self.xr(rt) != 0) == nonzero {
                        pc.wrapping_add(off as u64)
                    } else {
                        pc + 4
                    }
                }
                Insn::Adr { rd, off } => {
                    self.set_x(rd, base.wrapping_add(pc).wrapping_add(off as u64));
                    pc + 4
                }
                other => {
                    unsafe { self.exec(other) };
                    pc + 4
                }
            };
            pc = next;
        }
    }

    // ── General purpose registers ──

    /// Register 31 reads as XZR.
    fn xr(&self, r: u8) -> u64 {
        if r == 31 { 0 } else { self.x[r as usize] }
    }

    /// Register 31 reads as SP.
    fn xr_sp(&self, r: u8) -> u64 {
        if r == 31 { self.sp } else { self.x[r as usize] }
    }

    fn set_x(&mut self, r: u8, v: u64) {
        if r != 31 {
            self.x[r as usize] = v;
        }
    }

    fn set_x_sp(&mut self, r: u8, v: u64) {
        if r == 31 {
            self.sp = v;
        } else {
            self.x[r as usize] = v;
        }
    }

    fn cond_holds(&self, cond: u8) -> bool {
        let Flags { n, z, c, v } = self.flags;
        let r = match cond >> 1 {
            0 => z,
            1 => c,
            2 => n,
            3 => v,
            4 => c && !z,
            5 => n == v,
            6 => n == v && !z,
            _ => true,
        };
        if cond & 1 == 1 && cond != 0xF { !r } else { r }
    }

    // ── Vector registers ──

    fn v128(&self, r: u8) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&self.z[r as usize][..16]);
        out
    }

    /// Write the low 128 bits and zero the remainder of the Z register.
    fn set_v128(&mut self, r: u8, v: [u8; 16]) {
        let z = &mut self.z[r as usize];
        z[..16].copy_from_slice(&v);
        z[16..].fill(0);
    }

    fn active(&self, pg: u8, i: usize, esize: usize) -> bool {
        self.p[pg as usize][i * esize]
    }

    /// Set a `.s` predicate from per-element results and update NZCV like
    /// the flag-setting predicate producers.
    fn set_pred_s(&mut self, pd: u8, esize: usize, bits: &[bool]) {
        let p = &mut self.p[pd as usize];
        p.fill(false);
        for (i, &b) in bits.iter().enumerate() {
            p[i * esize] = b;
        }
        let first = bits.first().copied().unwrap_or(false);
        let last = bits.last().copied().unwrap_or(false);
        self.flags = Flags {
            n: first,
            z: !bits.iter().any(|&b| b),
            c: !last,
            v: false,
        };
    }

    unsafe fn exec(&mut self, insn: Insn) {
        let vl = self.vlen;
        let lanes = vl / 4;
        match insn {
            Insn::Nop => {}
            Insn::StpPre { rt1, rt2, rn, imm } => {
                let addr = self.xr_sp(rn).wrapping_add(imm as u64);
                unsafe {
                    store(addr, &self.xr(rt1).to_le_bytes());
                    store(addr + 8, &self.xr(rt2).to_le_bytes());
                }
                self.set_x_sp(rn, addr);
            }
            Insn::LdpPost { rt1, rt2, rn, imm } => {
                let addr = self.xr_sp(rn);
                let (mut a, mut b) = ([0u8; 8], [0u8; 8]);
                unsafe {
                    load(addr, &mut a);
                    load(addr + 8, &mut b);
                }
                self.set_x(rt1, u64::from_le_bytes(a));
                self.set_x(rt2, u64::from_le_bytes(b));
                self.set_x_sp(rn, addr.wrapping_add(imm as u64));
            }
            Insn::LdrX { rt, rn, imm } => {
                let mut b = [0u8; 8];
                unsafe { load(self.xr_sp(rn) + imm, &mut b) };
                self.set_x(rt, u64::from_le_bytes(b));
            }
            Insn::AddImm { rd, rn, imm } => {
                let v = self.xr_sp(rn).wrapping_add(imm);
                self.set_x_sp(rd, v);
            }
            Insn::SubImm { rd, rn, imm } => {
                let v = self.xr_sp(rn).wrapping_sub(imm);
                self.set_x_sp(rd, v);
            }
            Insn::SubsImm { rd, rn, imm } => {
                let a = self.xr_sp(rn);
                let r = a.wrapping_sub(imm);
                self.flags = Flags {
                    n: (r as i64) < 0,
                    z: r == 0,
                    c: a >= imm,
                    v: ((a ^ imm) & (a ^ r)) >> 63 == 1,
                };
                self.set_x(rd, r);
            }
            Insn::OrrReg { rd, rn, rm } => {
                let v = self.xr(rn) | self.xr(rm);
                self.set_x(rd, v);
            }
            Insn::Movz { rd, imm } => self.set_x(rd, imm),
            Insn::Movk { rd, imm16, shift } => {
                let v = (self.xr(rd) & !(0xFFFFu64 << shift)) | ((imm16 as u64) << shift);
                self.set_x(rd, v);
            }
            Insn::Addvl { rd, rn, imm } => {
                let v = self.xr_sp(rn).wrapping_add((imm * vl as i64) as u64);
                self.set_x_sp(rd, v);
            }

            // ── Advanced SIMD ──
            Insn::VBin { op, rd, rn, rm } => {
                let (d, n, m) = (self.v128(rd), self.v128(rn), self.v128(rm));
                let mut out = [0u8; 16];
                match op {
                    VBin::AddS => {
                        for i in 0..4 {
                            put_u32(&mut out, i, lane_u32(&n, i).wrapping_add(lane_u32(&m, i)));
                        }
                    }
                    VBin::And | VBin::Orr | VBin::Eor | VBin::Bit | VBin::Bif => {
                        for i in 0..16 {
                            out[i] = match op {
                                VBin::And => n[i] & m[i],
                                VBin::Orr => n[i] | m[i],
                                VBin::Eor => n[i] ^ m[i],
                                VBin::Bit => (d[i] & !m[i]) | (n[i] & m[i]),
                                _ => (d[i] & m[i]) | (n[i] & !m[i]),
                            };
                        }
                    }
                    VBin::Uzp2H => {
                        for i in 0..4 {
                            put_u16(&mut out, i, lane_u16(&n, 2 * i + 1));
                            put_u16(&mut out, 4 + i, lane_u16(&m, 2 * i + 1));
                        }
                    }
                    _ => {
                        for i in 0..4 {
                            let r = f32_bin(
                                op,
                                f32::from_bits(lane_u32(&d, i)),
                                f32::from_bits(lane_u32(&n, i)),
                                f32::from_bits(lane_u32(&m, i)),
                            );
                            put_u32(&mut out, i, r);
                        }
                    }
                }
                self.set_v128(rd, out);
            }
            Insn::VUn { op, rd, rn } => {
                let (d, n) = (self.v128(rd), self.v128(rn));
                let mut out = [0u8; 16];
                if let Some(lane_op) = neon_un_lane(op) {
                    for i in 0..4 {
                        put_u32(&mut out, i, f32_un(lane_op, lane_u32(&n, i)));
                    }
                } else {
                    match op {
                        VUn::Shll | VUn::Shll2 => {
                            let half = if op == VUn::Shll2 { 4 } else { 0 };
                            for i in 0..4 {
                                put_u32(&mut out, i, (lane_u16(&n, half + i) as u32) << 16);
                            }
                        }
                        VUn::Fcvtl | VUn::Fcvtl2 => {
                            let half = if op == VUn::Fcvtl2 { 4 } else { 0 };
                            for i in 0..4 {
                                put_u32(&mut out, i, h2s(lane_u16(&n, half + i)));
                            }
                        }
                        VUn::Fcvtn => {
                            for i in 0..4 {
                                put_u16(&mut out, i, s2h(lane_u32(&n, i)));
                            }
                        }
                        _ => {
                            out[..8].copy_from_slice(&d[..8]);
                            for i in 0..4 {
                                put_u16(&mut out, 4 + i, s2h(lane_u32(&n, i)));
                            }
                        }
                    }
                }
                self.set_v128(rd, out);
            }
            Insn::Shl { rd, rn, shift } | Insn::Ushr { rd, rn, shift } => {
                let left = matches!(insn, Insn::Shl { .. });
                let n = self.v128(rn);
                let mut out = [0u8; 16];
                for i in 0..4 {
                    let a = lane_u32(&n, i);
                    put_u32(&mut out, i, if left { a << shift } else { a >> shift });
                }
                self.set_v128(rd, out);
            }
            Insn::DupLane { rd, rn, lane } => {
                let v = lane_u32(&self.v128(rn), lane as usize);
                let mut out = [0u8; 16];
                for i in 0..4 {
                    put_u32(&mut out, i, v);
                }
                self.set_v128(rd, out);
            }
            Insn::MoviZero { rd } => self.set_v128(rd, [0u8; 16]),
            Insn::Movi4s { rd, value } => {
                let mut out = [0u8; 16];
                for i in 0..4 {
                    put_u32(&mut out, i, value);
                }
                self.set_v128(rd, out);
            }
            Insn::LdrS { rt, rn, imm } => {
                let mut out = [0u8; 16];
                unsafe { load(self.xr_sp(rn) + imm, &mut out[..4]) };
                self.set_v128(rt, out);
            }
            Insn::LdrQ { rt, rn, imm } => {
                let mut out = [0u8; 16];
                unsafe { load(self.xr_sp(rn) + imm, &mut out) };
                self.set_v128(rt, out);
            }
            Insn::StrQ { rt, rn, imm } => {
                let v = self.v128(rt);
                unsafe { store(self.xr_sp(rn) + imm, &v) };
            }
            Insn::Ld1 { rt, rn } => {
                let mut out = [0u8; 16];
                unsafe { load(self.xr_sp(rn), &mut out) };
                self.set_v128(rt, out);
            }
            Insn::St1 { rt, rn } => {
                let v = self.v128(rt);
                unsafe { store(self.xr_sp(rn), &v) };
            }
            Insn::Ld1Lane { rt, rn, lane, esize } => {
                let (lane, es) = (lane as usize, esize as usize);
                let addr = self.xr_sp(rn);
                let mut out = self.v128(rt);
                unsafe { load(addr, &mut out[lane * es..(lane + 1) * es]) };
                self.set_v128(rt, out);
                self.set_x_sp(rn, addr + es as u64);
            }
            Insn::St1Lane { rt, rn, lane, esize } => {
                let (lane, es) = (lane as usize, esize as usize);
                let addr = self.xr_sp(rn);
                let v = self.v128(rt);
                unsafe { store(addr, &v[lane * es..(lane + 1) * es]) };
                self.set_x_sp(rn, addr + es as u64);
            }

            // ── SVE ──
            Insn::Ptrue { pd, esize } => {
                let es = esize as usize;
                let p = &mut self.p[pd as usize];
                for (i, b) in p.iter_mut().enumerate() {
                    *b = i % es == 0;
                }
            }
            Insn::Whilelt { pd, esize, rn, rm } => {
                let es = esize as usize;
                let (start, limit) = (self.xr(rn) as i64, self.xr(rm) as i64);
                let bits: Vec<bool> = (0..vl / es).map(|i| start + (i as i64) < limit).collect();
                self.set_pred_s(pd, es, &bits);
            }
            Insn::SveLd { zt, pg, rn, esize } => {
                let es = esize as usize;
                let addr = self.xr_sp(rn);
                let mut out = vec![0u8; vl];
                for i in 0..vl / es {
                    if self.active(pg, i, es) {
                        unsafe { load(addr + (i * es) as u64, &mut out[i * es..(i + 1) * es]) };
                    }
                }
                self.z[zt as usize] = out;
            }
            Insn::SveSt { zt, pg, rn, esize } => {
                let es = esize as usize;
                let addr = self.xr_sp(rn);
                for i in 0..vl / es {
                    if self.active(pg, i, es) {
                        let z = &self.z[zt as usize];
                        unsafe { store(addr + (i * es) as u64, &z[i * es..(i + 1) * es]) };
                    }
                }
            }
            Insn::Ld1rw { zt, pg, rn, imm } => {
                let mut out = vec![0u8; vl];
                if (0..lanes).any(|i| self.active(pg, i, 4)) {
                    let mut w = [0u8; 4];
                    unsafe { load(self.xr_sp(rn) + imm, &mut w) };
                    let v = u32::from_le_bytes(w);
                    for i in 0..lanes {
                        if self.active(pg, i, 4) {
                            put_u32(&mut out, i, v);
                        }
                    }
                }
                self.z[zt as usize] = out;
            }
            Insn::StrZ { zt, rn, idx } => {
                let addr = self.xr_sp(rn).wrapping_add((idx * vl as i64) as u64);
                unsafe { store(addr, &self.z[zt as usize]) };
            }
            Insn::LdrZ { zt, rn, idx } => {
                let addr = self.xr_sp(rn).wrapping_add((idx * vl as i64) as u64);
                let mut out = vec![0u8; vl];
                unsafe { load(addr, &mut out) };
                self.z[zt as usize] = out;
            }
            Insn::ZBin { op, zd, zn, zm } => {
                let (n, m) = (&self.z[zn as usize], &self.z[zm as usize]);
                let mut out = vec![0u8; vl];
                for i in 0..lanes {
                    let (a, b) = (lane_u32(n, i), lane_u32(m, i));
                    let (fa, fb) = (f32::from_bits(a), f32::from_bits(b));
                    let r = match op {
                        ZBin::Fadd => (fa + fb).to_bits(),
                        ZBin::Fsub => (fa - fb).to_bits(),
                        ZBin::Fmul => (fa * fb).to_bits(),
                        ZBin::AddS => a.wrapping_add(b),
                        ZBin::And => a & b,
                        ZBin::Orr => a | b,
                        ZBin::Eor => a ^ b,
                    };
                    put_u32(&mut out, i, r);
                }
                self.z[zd as usize] = out;
            }
            Insn::ZBinP { op, zdn, pg, zm } => {
                let mut out = self.z[zdn as usize].clone();
                let m = &self.z[zm as usize];
                for i in 0..lanes {
                    if !self.active(pg, i, 4) {
                        continue;
                    }
                    let a = f32::from_bits(lane_u32(&out, i));
                    let b = f32::from_bits(lane_u32(m, i));
                    let r = match op {
                        ZBinP::Fmax => fmax(a, b),
                        ZBinP::Fmin => fmin(a, b),
                        ZBinP::Fdiv => a / b,
                        ZBinP::Fdivr => b / a,
                    };
                    put_u32(&mut out, i, r.to_bits());
                }
                self.z[zdn as usize] = out;
            }
            Insn::ZFma { sub, zda, pg, zn, zm } => {
                let mut out = self.z[zda as usize].clone();
                let (n, m) = (&self.z[zn as usize], &self.z[zm as usize]);
                for i in 0..lanes {
                    if !self.active(pg, i, 4) {
                        continue;
                    }
                    let acc = f32::from_bits(lane_u32(&out, i));
                    let a = f32::from_bits(lane_u32(n, i));
                    let b = f32::from_bits(lane_u32(m, i));
                    let a = if sub { -a } else { a };
                    put_u32(&mut out, i, a.mul_add(b, acc).to_bits());
                }
                self.z[zda as usize] = out;
            }
            Insn::ZUn { op, zd, pg, zn } => {
                let mut out = self.z[zd as usize].clone();
                let n = &self.z[zn as usize];
                for i in 0..lanes {
                    if !self.active(pg, i, 4) {
                        continue;
                    }
                    match op {
                        ZUn::FcvtH2S => put_u32(&mut out, i, h2s(lane_u16(n, 2 * i))),
                        ZUn::FcvtltH2S => put_u32(&mut out, i, h2s(lane_u16(n, 2 * i + 1))),
                        ZUn::FcvtS2H => {
                            put_u16(&mut out, 2 * i, s2h(lane_u32(n, i)));
                            put_u16(&mut out, 2 * i + 1, 0);
                        }
                        ZUn::FcvtntS2H => put_u16(&mut out, 2 * i + 1, s2h(lane_u32(n, i))),
                        _ => put_u32(&mut out, i, f32_un(op, lane_u32(n, i))),
                    }
                }
                self.z[zd as usize] = out;
            }
            Insn::ZCmp { ge, pd, pg, zn, zm } => {
                let (n, m) = (&self.z[zn as usize], &self.z[zm as usize]);
                let bits: Vec<bool> = (0..lanes)
                    .map(|i| {
                        let a = f32::from_bits(lane_u32(n, i));
                        let b = f32::from_bits(lane_u32(m, i));
                        self.active(pg, i, 4) && if ge { a >= b } else { a > b }
                    })
                    .collect();
                self.set_pred_s(pd, 4, &bits);
            }
            Insn::Sel { zd, pg, zn, zm } => {
                let (n, m) = (&self.z[zn as usize], &self.z[zm as usize]);
                let mut out = vec![0u8; vl];
                for i in 0..lanes {
                    let src = if self.active(pg, i, 4) { n } else { m };
                    put_u32(&mut out, i, lane_u32(src, i));
                }
                self.z[zd as usize] = out;
            }
            Insn::Movprfx { zd, zn } => {
                let v = self.z[zn as usize].clone();
                self.z[zd as usize] = v;
            }
            Insn::ZShift { left, zd, zn, shift } => {
                let n = &self.z[zn as usize];
                let mut out = vec![0u8; vl];
                for i in 0..lanes {
                    let a = lane_u32(n, i);
                    put_u32(&mut out, i, if left { a << shift } else { a >> shift });
                }
                self.z[zd as usize] = out;
            }
            Insn::AndImm { zdn, imm } => {
                let z = &mut self.z[zdn as usize];
                for chunk in z.chunks_exact_mut(8) {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(chunk);
                    chunk.copy_from_slice(&(u64::from_le_bytes(b) & imm).to_le_bytes());
                }
            }
            Insn::Dupm { zd, imm } => {
                for chunk in self.z[zd as usize].chunks_exact_mut(8) {
                    chunk.copy_from_slice(&imm.to_le_bytes());
                }
            }
            Insn::DupImm { zd, imm } => {
                let z = &mut self.z[zd as usize];
                for i in 0..lanes {
                    put_u32(z, i, imm as u32);
                }
            }
            Insn::Ret { .. } | Insn::B { .. } | Insn::BCond { .. } | Insn::Cbz { .. } | Insn::Adr { .. } => {
                unreachable!("control flow handled by call")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::asm::{Assembler, Cond, XReg};
    use crate::compiler::codegen::{neon, sve};

    fn run(asm: Assembler, vlen: usize, arg0: u64) -> Machine {
        let code = asm.finish().unwrap();
        let mut m = Machine::new(vlen).unwrap();
        unsafe { m.call(&code, arg0).unwrap() };
        m
    }

    #[test]
    fn test_counted_loop() {
        let mut asm = Assembler::new();
        asm.mov_imm(XReg(1), 0);
        asm.mov_imm(XReg(6), 5);
        let top = asm.new_label();
        asm.bind(top).unwrap();
        asm.add_imm(XReg(1), XReg(1), 3).unwrap();
        asm.sub_imm(XReg(6), XReg(6), 1).unwrap();
        asm.cmp_imm(XReg(6), 0).unwrap();
        asm.b_cond(Cond::Gt, top).unwrap();
        asm.ret();
        let m = run(asm, 16, 0);
        assert_eq!(m.x[1], 15);
        assert_eq!(m.steps(), 2 + 5 * 4 + 1);
    }

    #[test]
    fn test_neon_fmax_zero_signs() {
        let mut buf = [-0.0f32, 0.0, f32::NAN, 1.0];
        let mut asm = Assembler::new();
        asm.emit(neon::ld1(1, neon::Arrangement::S4, 0));
        asm.emit(neon::movi_zero(2));
        asm.emit(neon::fmax(1, 1, 2));
        asm.emit(neon::st1(1, neon::Arrangement::S4, 0));
        asm.ret();
        run(asm, 16, buf.as_mut_ptr() as u64);
        assert_eq!(buf[0].to_bits(), 0);
        assert_eq!(buf[1].to_bits(), 0);
        assert!(buf[2].is_nan());
        assert_eq!(buf[3], 1.0);
    }

    #[test]
    fn test_sve_whilelt_partial_store() {
        let src: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut dst = vec![-1.0f32; 16];
        let args = [src.as_ptr() as u64, dst.as_mut_ptr() as u64];
        let mut asm = Assembler::new();
        asm.ldr_x(XReg(11), XReg(0), 0).unwrap();
        asm.ldr_x(XReg(8), XReg(0), 8).unwrap();
        asm.mov_imm(XReg(6), 5);
        asm.emit(sve::whilelt(5, sve::ESize::S, 31, 6));
        asm.emit(sve::ld1w(1, 5, 11).unwrap());
        asm.emit(sve::st1w(1, 5, 8).unwrap());
        asm.ret();
        let m = run(asm, 64, args.as_ptr() as u64);
        assert_eq!(&dst[..5], &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(dst[5..].iter().all(|&v| v == -1.0));
        assert!(m.p[5][16] && !m.p[5][20]);
    }

    #[test]
    fn test_neon_write_clears_upper_z() {
        let mut asm = Assembler::new();
        asm.emit(sve::dup_imm_s(1, -1));
        asm.emit(neon::movi_4s(1, 1));
        asm.ret();
        let m = run(asm, 32, 0);
        assert_eq!(lane_u32(&m.z[1], 0), 1);
        assert_eq!(lane_u32(&m.z[1], 4), 0);
    }

    #[test]
    fn test_invalid_vlen() {
        assert!(matches!(Machine::new(24), Err(EmuError::InvalidVlen(24))));
        assert!(Machine::new(512).is_err());
    }
}
