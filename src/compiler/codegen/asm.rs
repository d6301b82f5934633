//! Raw AArch64 assembler: code buffer, labels, fix-ups and GP encoders.
//!
//! Instructions are fixed-width 32-bit words emitted little-endian. Forward
//! branches are emitted with a zero displacement and patched when the label
//! is bound; the patcher recognises the instruction class from its opcode
//! bits (B, B.cond, CBZ/CBNZ, ADR).

/// General-purpose register. Index 31 is SP or XZR depending on the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XReg(pub u8);

/// Stack pointer (only valid in SP-capable operand slots).
pub const SP: XReg = XReg(31);
/// Zero register (only valid in ZR-capable operand slots).
pub const XZR: XReg = XReg(31);

/// Frame pointer and link register.
pub const FP: XReg = XReg(29);
pub const LR: XReg = XReg(30);

/// SVE predicate register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PReg(pub u8);

/// Branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// Condition codes used by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Cond {
    Eq = 0x0,
    Ne = 0x1,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
}

impl Cond {
    pub fn from_bits(bits: u32) -> Option<Cond> {
        Some(match bits {
            0x0 => Cond::Eq,
            0x1 => Cond::Ne,
            0xA => Cond::Ge,
            0xB => Cond::Lt,
            0xC => Cond::Gt,
            0xD => Cond::Le,
            _ => return None,
        })
    }
}

// ── GP encoders ─────────────────────────────────────────────────────────────

pub const RET: u32 = 0xD65F03C0;
pub const NOP: u32 = 0xD503201F;

#[inline]
fn rd(r: XReg) -> u32 {
    r.0 as u32 & 0x1F
}

/// `stp xt1, xt2, [xn, #imm]!`
pub fn encode_stp_pre(rt1: XReg, rt2: XReg, rn: XReg, imm: i32) -> Result<u32, String> {
    if imm % 8 != 0 || !(-512..=504).contains(&imm) {
        return Err(format!("stp pre-index offset {imm} out of range"));
    }
    let imm7 = ((imm / 8) as u32) & 0x7F;
    Ok(0xA9800000 | (imm7 << 15) | (rd(rt2) << 10) | (rd(rn) << 5) | rd(rt1))
}

/// `ldp xt1, xt2, [xn], #imm`
pub fn encode_ldp_post(rt1: XReg, rt2: XReg, rn: XReg, imm: i32) -> Result<u32, String> {
    if imm % 8 != 0 || !(-512..=504).contains(&imm) {
        return Err(format!("ldp post-index offset {imm} out of range"));
    }
    let imm7 = ((imm / 8) as u32) & 0x7F;
    Ok(0xA8C00000 | (imm7 << 15) | (rd(rt2) << 10) | (rd(rn) << 5) | rd(rt1))
}

/// `ldr xt, [xn, #imm]` (unsigned scaled offset).
pub fn encode_ldr_x(rt: XReg, rn: XReg, imm: u32) -> Result<u32, String> {
    if imm % 8 != 0 || imm / 8 > 0xFFF {
        return Err(format!("ldr x offset {imm} not encodable"));
    }
    Ok(0xF9400000 | ((imm / 8) << 10) | (rd(rn) << 5) | rd(rt))
}

/// `add xd, xn, #imm` (SP-capable on both sides).
pub fn encode_add_imm(d: XReg, n: XReg, imm: u32) -> Result<u32, String> {
    if imm > 0xFFF {
        return Err(format!("add immediate {imm} not encodable"));
    }
    Ok(0x91000000 | (imm << 10) | (rd(n) << 5) | rd(d))
}

/// `sub xd, xn, #imm` (SP-capable on both sides).
pub fn encode_sub_imm(d: XReg, n: XReg, imm: u32) -> Result<u32, String> {
    if imm > 0xFFF {
        return Err(format!("sub immediate {imm} not encodable"));
    }
    Ok(0xD1000000 | (imm << 10) | (rd(n) << 5) | rd(d))
}

/// `cmp xn, #imm` (alias of `subs xzr, xn, #imm`).
pub fn encode_cmp_imm(n: XReg, imm: u32) -> Result<u32, String> {
    if imm > 0xFFF {
        return Err(format!("cmp immediate {imm} not encodable"));
    }
    Ok(0xF100001F | (imm << 10) | (rd(n) << 5))
}

/// `mov xd, xm` (alias of `orr xd, xzr, xm`).
pub fn encode_mov_reg(d: XReg, m: XReg) -> u32 {
    0xAA0003E0 | (rd(m) << 16) | rd(d)
}

/// `movz xd, #imm16, lsl #(hw*16)`
pub fn encode_movz(d: XReg, imm16: u16, hw: u32) -> u32 {
    0xD2800000 | ((hw & 3) << 21) | ((imm16 as u32) << 5) | rd(d)
}

/// `movk xd, #imm16, lsl #(hw*16)`
pub fn encode_movk(d: XReg, imm16: u16, hw: u32) -> u32 {
    0xF2800000 | ((hw & 3) << 21) | ((imm16 as u32) << 5) | rd(d)
}

/// `addvl xd, xn, #imm` (SVE; adds `imm` times the vector length in bytes).
pub fn encode_addvl(d: XReg, n: XReg, imm: i32) -> Result<u32, String> {
    if !(-32..=31).contains(&imm) {
        return Err(format!("addvl multiplier {imm} out of range"));
    }
    Ok(0x04205000 | (rd(n) << 16) | (((imm as u32) & 0x3F) << 5) | rd(d))
}

// ── Assembler ───────────────────────────────────────────────────────────────

/// Growable code buffer with labels.
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    /// (instruction byte offset, label) awaiting the label's position.
    pending_patches: Vec<(usize, Label)>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            code: Vec::with_capacity(4096),
            labels: Vec::new(),
            pending_patches: Vec::new(),
        }
    }

    /// Current code size in bytes.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[inline]
    pub fn emit(&mut self, insn: u32) {
        self.code.extend_from_slice(&insn.to_le_bytes());
    }

    /// Emit a 32-bit data word into the instruction stream.
    pub fn emit_data_u32(&mut self, word: u32) {
        self.code.extend_from_slice(&word.to_le_bytes());
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Bind `label` to the current position and resolve pending references.
    pub fn bind(&mut self, label: Label) -> Result<(), String> {
        let id = label.0 as usize;
        let here = self.code.len();
        match self.labels.get_mut(id) {
            Some(slot @ None) => *slot = Some(here),
            Some(Some(_)) => return Err(format!("label {id} bound twice")),
            None => return Err(format!("unknown label {id}")),
        }

        let mut i = 0;
        while i < self.pending_patches.len() {
            if self.pending_patches[i].1 == label {
                let patch_pos = self.pending_patches[i].0;
                let existing = self.word_at(patch_pos);
                let patched = patch_word(existing, here as i64 - patch_pos as i64)?;
                self.code[patch_pos..patch_pos + 4].copy_from_slice(&patched.to_le_bytes());
                self.pending_patches.swap_remove(i);
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    fn word_at(&self, pos: usize) -> u32 {
        u32::from_le_bytes([
            self.code[pos],
            self.code[pos + 1],
            self.code[pos + 2],
            self.code[pos + 3],
        ])
    }

    /// Emit a label-relative instruction whose displacement is filled in now
    /// (bound label) or at bind time.
    fn emit_label_ref(&mut self, insn: u32, label: Label) -> Result<(), String> {
        let pos = self.code.len();
        match self.labels.get(label.0 as usize) {
            Some(Some(target)) => {
                let word = patch_word(insn, *target as i64 - pos as i64)?;
                self.emit(word);
            }
            Some(None) => {
                self.emit(insn);
                self.pending_patches.push((pos, label));
            }
            None => return Err(format!("unknown label {}", label.0)),
        }
        Ok(())
    }

    pub fn b(&mut self, label: Label) -> Result<(), String> {
        self.emit_label_ref(0x14000000, label)
    }

    pub fn b_cond(&mut self, cond: Cond, label: Label) -> Result<(), String> {
        self.emit_label_ref(0x54000000 | cond as u32, label)
    }

    pub fn cbz(&mut self, rt: XReg, label: Label) -> Result<(), String> {
        self.emit_label_ref(0xB4000000 | rd(rt), label)
    }

    pub fn cbnz(&mut self, rt: XReg, label: Label) -> Result<(), String> {
        self.emit_label_ref(0xB5000000 | rd(rt), label)
    }

    /// `adr xd, label`
    pub fn adr(&mut self, d: XReg, label: Label) -> Result<(), String> {
        self.emit_label_ref(0x10000000 | rd(d), label)
    }

    // ── GP convenience wrappers ─────────────────────────────────────────

    pub fn stp_pre(&mut self, rt1: XReg, rt2: XReg, rn: XReg, imm: i32) -> Result<(), String> {
        let w = encode_stp_pre(rt1, rt2, rn, imm)?;
        self.emit(w);
        Ok(())
    }

    pub fn ldp_post(&mut self, rt1: XReg, rt2: XReg, rn: XReg, imm: i32) -> Result<(), String> {
        let w = encode_ldp_post(rt1, rt2, rn, imm)?;
        self.emit(w);
        Ok(())
    }

    pub fn ldr_x(&mut self, rt: XReg, rn: XReg, imm: u32) -> Result<(), String> {
        let w = encode_ldr_x(rt, rn, imm)?;
        self.emit(w);
        Ok(())
    }

    pub fn add_imm(&mut self, d: XReg, n: XReg, imm: u32) -> Result<(), String> {
        let w = encode_add_imm(d, n, imm)?;
        self.emit(w);
        Ok(())
    }

    pub fn sub_imm(&mut self, d: XReg, n: XReg, imm: u32) -> Result<(), String> {
        let w = encode_sub_imm(d, n, imm)?;
        self.emit(w);
        Ok(())
    }

    pub fn cmp_imm(&mut self, n: XReg, imm: u32) -> Result<(), String> {
        let w = encode_cmp_imm(n, imm)?;
        self.emit(w);
        Ok(())
    }

    pub fn mov_reg(&mut self, d: XReg, m: XReg) {
        self.emit(encode_mov_reg(d, m));
    }

    /// Materialise a 64-bit constant with movz/movk.
    pub fn mov_imm(&mut self, d: XReg, value: u64) {
        self.emit(encode_movz(d, (value & 0xFFFF) as u16, 0));
        for hw in 1..4u32 {
            let chunk = ((value >> (hw * 16)) & 0xFFFF) as u16;
            if chunk != 0 {
                self.emit(encode_movk(d, chunk, hw));
            }
        }
    }

    pub fn addvl(&mut self, d: XReg, n: XReg, imm: i32) -> Result<(), String> {
        let w = encode_addvl(d, n, imm)?;
        self.emit(w);
        Ok(())
    }

    pub fn ret(&mut self) {
        self.emit(RET);
    }

    /// Finish assembly. Fails if any label reference is still unresolved.
    pub fn finish(self) -> Result<Vec<u8>, String> {
        if let Some((pos, label)) = self.pending_patches.first() {
            return Err(format!(
                "label {} referenced at offset {pos:#x} was never bound",
                label.0
            ));
        }
        Ok(self.code)
    }

    /// Emitted words, for inspection.
    pub fn words(&self) -> Vec<u32> {
        self.code
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Insert a byte displacement into a label-relative instruction.
fn patch_word(insn: u32, disp: i64) -> Result<u32, String> {
    if insn & 0x9F000000 == 0x10000000 {
        // ADR: 21-bit byte offset split into immlo:immhi
        if !(-(1 << 20)..(1 << 20)).contains(&disp) {
            return Err(format!("adr displacement {disp} out of range"));
        }
        let d = disp as u32;
        let immlo = d & 0x3;
        let immhi = (d >> 2) & 0x7FFFF;
        return Ok((insn & 0x9F00001F) | (immlo << 29) | (immhi << 5));
    }

    if disp % 4 != 0 {
        return Err(format!("branch displacement {disp} not word aligned"));
    }
    let words = disp / 4;
    if insn & 0xFC000000 == 0x14000000 {
        if !(-(1 << 25)..(1 << 25)).contains(&words) {
            return Err(format!("b displacement {disp} out of range"));
        }
        Ok(0x14000000 | ((words as u32) & 0x3FFFFFF))
    } else if insn & 0xFF000010 == 0x54000000 || insn & 0x7E000000 == 0x34000000 {
        // B.cond / CBZ / CBNZ: imm19 at bits 23:5
        if !(-(1 << 18)..(1 << 18)).contains(&words) {
            return Err(format!("conditional branch displacement {disp} out of range"));
        }
        Ok((insn & 0xFF00001F) | (((words as u32) & 0x7FFFF) << 5))
    } else {
        Err(format!("instruction {insn:#010x} is not label-relative"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encodings() {
        assert_eq!(encode_stp_pre(FP, LR, SP, -16).unwrap(), 0xA9BF7BFD);
        assert_eq!(encode_ldp_post(FP, LR, SP, 16).unwrap(), 0xA8C17BFD);
        assert_eq!(encode_add_imm(FP, SP, 0).unwrap(), 0x910003FD);
        assert!(encode_stp_pre(FP, LR, SP, -12).is_err());
    }

    #[test]
    fn test_gp_encodings() {
        // ldr x11, [x0]
        assert_eq!(encode_ldr_x(XReg(11), XReg(0), 0).unwrap(), 0xF940000B);
        // ldr x6, [x0, #24]
        assert_eq!(encode_ldr_x(XReg(6), XReg(0), 24).unwrap(), 0xF9400C06);
        // cmp x6, #4
        assert_eq!(encode_cmp_imm(XReg(6), 4).unwrap(), 0xF10010DF);
        // mov x12, x11
        assert_eq!(encode_mov_reg(XReg(12), XReg(11)), 0xAA0B03EC);
        // add x11, x11, #16
        assert_eq!(encode_add_imm(XReg(11), XReg(11), 16).unwrap(), 0x9100416B);
        assert!(encode_add_imm(XReg(1), XReg(1), 4096).is_err());
        // addvl sp, sp, #-2
        assert_eq!(encode_addvl(SP, SP, -2).unwrap(), 0x043F57DF);
    }

    #[test]
    fn test_forward_and_backward_branches() {
        let mut a = Assembler::new();
        let top = a.new_label();
        let end = a.new_label();
        a.bind(top).unwrap();
        a.emit(NOP);
        a.b_cond(Cond::Lt, end).unwrap();
        a.b(top).unwrap();
        a.bind(end).unwrap();
        a.ret();
        let w = a.words();
        // b.lt +8
        assert_eq!(w[1], 0x5400004B);
        // b -8
        assert_eq!(w[2], 0x17FFFFFE);
        assert!(a.finish().is_ok());
    }

    #[test]
    fn test_adr_patch() {
        let mut a = Assembler::new();
        let table = a.new_label();
        a.adr(XReg(9), table).unwrap();
        a.ret();
        a.bind(table).unwrap();
        a.emit_data_u32(0x3F80_0000);
        // adr x9, #8 -> immlo = 0, immhi = 2
        assert_eq!(a.words()[0], 0x10000049);
    }

    #[test]
    fn test_unbound_label_is_error() {
        let mut a = Assembler::new();
        let l = a.new_label();
        a.cbnz(XReg(3), l).unwrap();
        assert!(a.finish().is_err());

        let mut a = Assembler::new();
        let l = a.new_label();
        a.bind(l).unwrap();
        assert!(a.bind(l).is_err());
    }

    #[test]
    fn test_mov_imm_chunks() {
        let mut a = Assembler::new();
        a.mov_imm(XReg(1), 0x0001_0000_0000_0002);
        // movz x1, #2 ; movk x1, #1, lsl #48
        assert_eq!(a.words(), vec![0xD2800041, 0xF2E00021]);
    }
}
