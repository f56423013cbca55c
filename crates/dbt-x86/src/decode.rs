//! Instruction stream parsing: prefixes, opcode bytes, ModR/M, SIB,
//! displacements and immediates.
//!
//! Only 32-bit addressing is decoded. The prefix rules are strict by
//! design: segment overrides, `LOCK`, and the address-size prefix are
//! fatal because the translator has no rewrite for them (see
//! `TranslateError`).

use tracing::error;

use crate::TranslateError;
use crate::bus::GuestBus;
use crate::operand::Rm;

/// Sequential reader over guest code.
pub struct Reader<'a, B: GuestBus> {
    bus: &'a B,
    /// Current guest program counter.
    pub pc: u32,
}

impl<'a, B: GuestBus> Reader<'a, B> {
    pub const fn new(bus: &'a B, pc: u32) -> Self {
        Self { bus, pc }
    }

    pub fn u8(&mut self) -> u8 {
        let b = self.bus.fetch(self.pc);
        self.pc = self.pc.wrapping_add(1);
        b
    }

    pub fn u16(&mut self) -> u16 {
        u16::from(self.u8()) | (u16::from(self.u8()) << 8)
    }

    pub fn u32(&mut self) -> u32 {
        u32::from(self.u16()) | (u32::from(self.u16()) << 16)
    }

    /// Read a sign-extended relative displacement of 1, 2 or 4 bytes.
    pub fn rel(&mut self, bytes: u8) -> i32 {
        match bytes {
            1 => i32::from(self.u8() as i8),
            2 => i32::from(self.u16() as i16),
            _ => self.u32() as i32,
        }
    }
}

/// Prefix state accumulated before the opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prefixes {
    /// Operand-size prefix (`0x66`) present.
    pub opsize: bool,
    /// `REP`/`REPE` (`0xF3`) or `REPNE` (`0xF2`), if any.
    pub rep: Option<u8>,
}

/// Consume prefixes until a non-prefix byte, which is returned.
///
/// Prefixes may appear in any order. Unsupported prefixes abort the
/// translation.
pub fn parse_prefixes<B: GuestBus>(
    r: &mut Reader<'_, B>,
) -> Result<(Prefixes, u8), TranslateError> {
    let start = r.pc;
    let mut prefixes = Prefixes::default();
    loop {
        let byte = r.u8();
        match byte {
            0xF0 => {
                error!("LOCK prefix not supported at {start:#x}");
                return Err(TranslateError::LockPrefix { pc: start });
            }
            0xF2 | 0xF3 => prefixes.rep = Some(byte),
            0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 => {
                error!("segment override prefix {byte:#04x} not supported at {start:#x}");
                return Err(TranslateError::SegmentOverride {
                    prefix: byte,
                    pc: start,
                });
            }
            0x66 => prefixes.opsize = true,
            0x67 => {
                error!("address size prefix not supported at {start:#x}");
                return Err(TranslateError::AddressSizePrefix { pc: start });
            }
            _ => return Ok((prefixes, byte)),
        }
    }
}

const fn modrm_mod(byte: u8) -> u8 {
    (byte >> 6) & 3
}

const fn modrm_r(byte: u8) -> u8 {
    (byte >> 3) & 7
}

const fn modrm_rm(byte: u8) -> u8 {
    byte & 7
}

const fn sib_scale(byte: u8) -> u8 {
    byte >> 6
}

const fn sib_index(byte: u8) -> u8 {
    (byte >> 3) & 7
}

const fn sib_base(byte: u8) -> u8 {
    byte & 7
}

/// Parse a ModR/M byte (plus SIB and displacement) into `(r, rm)`.
pub fn parse_modrm<B: GuestBus>(r: &mut Reader<'_, B>) -> (u8, Rm) {
    let modrm = r.u8();
    let reg = modrm_r(modrm);
    let mut m = modrm_mod(modrm);
    if m == 3 {
        return (reg, Rm::reg(modrm_rm(modrm)));
    }

    let mut rm = Rm::scaled(None, None, 0, 0);
    match modrm_rm(modrm) {
        4 => {
            // SIB byte follows.
            let sib = r.u8();
            rm.scale = sib_scale(sib);
            rm.index = match sib_index(sib) {
                4 => None, // "no index"
                i => Some(i),
            };
            let base = sib_base(sib);
            if base == 5 && m == 0 {
                // Base replaced by a bare disp32.
                rm.base = None;
                m = 2;
            } else {
                rm.base = Some(base);
            }
        }
        5 if m == 0 => {
            // Bare disp32, no base register.
            rm.disp = r.u32() as i32;
            return (reg, rm);
        }
        base => rm.base = Some(base),
    }

    rm.disp = match m {
        1 => i32::from(r.u8() as i8),
        2 => r.u32() as i32,
        _ => 0,
    };
    (reg, rm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FlatCode;
    use crate::operand::{EBP, EBX, ECX, ESP};

    fn decode(bytes: &[u8]) -> (u8, Rm, u32) {
        let code = FlatCode::new(0x1000, bytes);
        let mut r = Reader::new(&code, 0x1000);
        let (reg, rm) = parse_modrm(&mut r);
        (reg, rm, r.pc - 0x1000)
    }

    #[test]
    fn mod3_is_pure_register() {
        let (reg, rm, len) = decode(&[0xC8]); // mod=3 r=1 rm=0
        assert_eq!(reg, 1);
        assert_eq!(rm, Rm::reg(0));
        assert_eq!(len, 1);
    }

    #[test]
    fn mod0_rm5_is_bare_disp32() {
        let (reg, rm, len) = decode(&[0x05, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(reg, 0);
        assert_eq!(rm, Rm::disp32(0x1234_5678));
        assert_eq!(len, 5);
    }

    #[test]
    fn mod0_plain_base_no_disp() {
        let (_, rm, len) = decode(&[0x03]); // [ebx]
        assert_eq!(rm, Rm::mem(EBX, 0));
        assert_eq!(len, 1);
    }

    #[test]
    fn mod1_disp8_sign_extends() {
        let (_, rm, len) = decode(&[0x41, 0xFC]); // [ecx - 4]
        assert_eq!(rm, Rm::mem(ECX, -4));
        assert_eq!(len, 2);
    }

    #[test]
    fn mod2_disp32() {
        let (_, rm, len) = decode(&[0x83, 0x00, 0x00, 0x01, 0x00]); // [ebx + 0x10000]
        assert_eq!(rm, Rm::mem(EBX, 0x1_0000));
        assert_eq!(len, 5);
    }

    #[test]
    fn sib_with_scaled_index() {
        // [ebx + ecx*4 + 8]: mod=1 rm=4, sib scale=2 index=1 base=3, disp8
        let (_, rm, len) = decode(&[0x44, 0x8B, 0x08]);
        assert_eq!(rm, Rm::scaled(Some(EBX), Some(ECX), 2, 8));
        assert_eq!(len, 3);
    }

    #[test]
    fn sib_index4_means_no_index() {
        // [esp + 8]: mod=1 rm=4, sib index=4 base=4
        let (_, rm, len) = decode(&[0x44, 0x24, 0x08]);
        assert_eq!(rm, Rm::mem(ESP, 8));
        assert_eq!(len, 3);
    }

    #[test]
    fn sib_base5_mod0_becomes_disp32() {
        // [ecx*2 + disp32]: mod=0 rm=4, sib scale=1 index=1 base=5
        let (_, rm, len) = decode(&[0x04, 0x4D, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(rm, Rm::scaled(None, Some(ECX), 1, 0x10));
        assert_eq!(len, 6);
    }

    #[test]
    fn sib_base5_mod1_keeps_ebp_base() {
        // [ebp + ecx*2 + 0x10]: mod=1 rm=4, sib scale=1 index=1 base=5, disp8
        let (_, rm, len) = decode(&[0x44, 0x4D, 0x10]);
        assert_eq!(rm, Rm::scaled(Some(EBP), Some(ECX), 1, 0x10));
        assert_eq!(len, 3);
    }

    #[test]
    fn prefixes_in_any_order() {
        let code = FlatCode::new(0, &[0x66, 0xF3, 0xAB]);
        let mut r = Reader::new(&code, 0);
        let (p, op) = parse_prefixes(&mut r).expect("prefixes");
        assert!(p.opsize);
        assert_eq!(p.rep, Some(0xF3));
        assert_eq!(op, 0xAB);

        let code = FlatCode::new(0, &[0xF2, 0x66, 0x90]);
        let mut r = Reader::new(&code, 0);
        let (p, op) = parse_prefixes(&mut r).expect("prefixes");
        assert!(p.opsize);
        assert_eq!(p.rep, Some(0xF2));
        assert_eq!(op, 0x90);
    }

    #[test]
    fn rejected_prefixes() {
        for (byte, want_segment) in [
            (0xF0u8, false),
            (0x67, false),
            (0x2E, true),
            (0x36, true),
            (0x3E, true),
            (0x26, true),
            (0x64, true),
            (0x65, true),
        ] {
            let bytes = [byte, 0x90];
            let code = FlatCode::new(0, &bytes);
            let mut r = Reader::new(&code, 0);
            let err = parse_prefixes(&mut r).expect_err("must reject");
            if want_segment {
                assert_eq!(err, TranslateError::SegmentOverride { prefix: byte, pc: 0 });
            }
        }
    }
}
