//! Static per-opcode descriptor tables.
//!
//! The translator only needs to understand instruction *shape* (prefixes,
//! ModR/M, immediate width) and *class* (copy verbatim, rewrite as a
//! control transfer, refuse). Everything else about x86 semantics is the
//! guest CPU's business — non-control instructions are re-emitted as-is.
//!
//! Opcodes whose `/r` field selects between sub-instructions of different
//! shape or class carry an 8-entry extension table; groups whose members
//! all share one shape (the shift groups, `BT` group 8) are flattened to
//! a plain entry since the translator treats every member identically.

use crate::operand::{EAX, EBX, ECX, EDI, EDX, ESI, reg_mask};

/// Instruction classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Copy verbatim.
    Normal,
    /// Not in the tables; translation aborts.
    Unknown,
    /// Architecturally invalid encoding.
    Invalid,
    /// Requires ring 0; the guest never legitimately runs these.
    Privileged,
    /// Valid but not translatable (far control flow, segment pushes, ...).
    Unsupported,
    /// Shape depends on `modrm.r`; see the extension table.
    Extension,
    CallDirect,
    CallIndirect,
    Ret,
    RetImm16,
    JmpDirect,
    JmpIndirect,
    /// Conditional jump with the condition code baked in.
    Jcc(u8),
    /// `LOOP*`/`J*CXZ`: rel8-only conditional with no rel32 form.
    JccRel8,
    /// `INT imm8`.
    Int,
    /// `MOV r/m, Sreg`.
    MovFromSeg,
    /// `MOV Sreg, r/m`.
    MovToSeg,
}

/// Immediate operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
    None,
    B1,
    B2,
    /// `ENTER imm16, imm8`.
    B3,
    /// moffs operands: always a 4-byte address in 32-bit code.
    B4,
    /// 2 bytes under the operand-size prefix, else 4.
    OpSize,
}

impl Imm {
    /// Resolved immediate width given the prefix state.
    #[must_use]
    pub const fn bytes(self, opsize_prefix: bool) -> u8 {
        match self {
            Self::None => 0,
            Self::B1 => 1,
            Self::B2 => 2,
            Self::B3 => 3,
            Self::B4 => 4,
            Self::OpSize => {
                if opsize_prefix {
                    2
                } else {
                    4
                }
            }
        }
    }
}

/// Per-opcode descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Desc {
    pub kind: Kind,
    pub has_modrm: bool,
    pub imm: Imm,
    /// Registers the instruction reads implicitly (beyond ModR/M operands).
    pub reads: u8,
    /// Registers the instruction writes implicitly.
    pub writes: u8,
    /// Sub-table for `Kind::Extension`, indexed by `modrm.r`.
    pub ext: Option<&'static [Desc; 8]>,
}

impl Desc {
    const fn of(kind: Kind) -> Self {
        Self {
            kind,
            has_modrm: false,
            imm: Imm::None,
            reads: 0,
            writes: 0,
            ext: None,
        }
    }

    pub const UNKNOWN: Self = Self::of(Kind::Unknown);
    pub const INVALID: Self = Self::of(Kind::Invalid);
    pub const PRIVILEGED: Self = Self::of(Kind::Privileged);
    pub const UNSUPPORTED: Self = Self::of(Kind::Unsupported);

    /// Plain instruction, no ModR/M, no immediate.
    const fn op() -> Self {
        Self::of(Kind::Normal)
    }

    /// Plain instruction with an immediate.
    const fn op_imm(imm: Imm) -> Self {
        let mut d = Self::of(Kind::Normal);
        d.imm = imm;
        d
    }

    /// ModR/M instruction, no immediate.
    const fn modrm() -> Self {
        let mut d = Self::of(Kind::Normal);
        d.has_modrm = true;
        d
    }

    /// ModR/M instruction with an immediate.
    const fn modrm_imm(imm: Imm) -> Self {
        let mut d = Self::modrm();
        d.imm = imm;
        d
    }

    /// Control-transfer descriptor.
    const fn ctrl(kind: Kind, imm: Imm) -> Self {
        let mut d = Self::of(kind);
        d.imm = imm;
        d
    }

    /// ModR/M control-transfer descriptor (indirect forms, segment moves).
    const fn ctrl_modrm(kind: Kind) -> Self {
        let mut d = Self::of(kind);
        d.has_modrm = true;
        d
    }

    /// Extension group.
    const fn group(table: &'static [Desc; 8]) -> Self {
        let mut d = Self::of(Kind::Extension);
        d.has_modrm = true;
        d.ext = Some(table);
        d
    }

    /// Attach implicit register usage.
    const fn regs(mut self, reads: u8, writes: u8) -> Self {
        self.reads = reads;
        self.writes = writes;
        self
    }
}

/// `0x8F`: only `/0` (POP r/m) exists.
static GROUP_1A: [Desc; 8] = [
    Desc::modrm(),
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
];

/// `0xC6`: only `/0` (MOV r/m8, imm8) exists.
static GROUP_11B: [Desc; 8] = [
    Desc::modrm_imm(Imm::B1),
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
];

/// `0xC7`: only `/0` (MOV r/m32, imm) exists.
static GROUP_11D: [Desc; 8] = [
    Desc::modrm_imm(Imm::OpSize),
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
];

const AX_DX: u8 = reg_mask(EAX) | reg_mask(EDX);

/// `0xF6`: TEST takes imm8, NOT/NEG don't, MUL family hits eax/edx.
static GROUP_3B: [Desc; 8] = [
    Desc::modrm_imm(Imm::B1),
    Desc::modrm_imm(Imm::B1),
    Desc::modrm(),
    Desc::modrm(),
    Desc::modrm().regs(reg_mask(EAX), AX_DX),
    Desc::modrm().regs(reg_mask(EAX), AX_DX),
    Desc::modrm().regs(AX_DX, AX_DX),
    Desc::modrm().regs(AX_DX, AX_DX),
];

/// `0xF7`: as `0xF6` with operand-size immediates.
static GROUP_3D: [Desc; 8] = [
    Desc::modrm_imm(Imm::OpSize),
    Desc::modrm_imm(Imm::OpSize),
    Desc::modrm(),
    Desc::modrm(),
    Desc::modrm().regs(reg_mask(EAX), AX_DX),
    Desc::modrm().regs(reg_mask(EAX), AX_DX),
    Desc::modrm().regs(AX_DX, AX_DX),
    Desc::modrm().regs(AX_DX, AX_DX),
];

/// `0xFE`: INC/DEC r/m8.
static GROUP_4: [Desc; 8] = [
    Desc::modrm(),
    Desc::modrm(),
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
    Desc::INVALID,
];

/// `0xFF`: the mixed bag — INC/DEC, indirect call/jmp (near and far), PUSH.
static GROUP_5: [Desc; 8] = [
    Desc::modrm(),
    Desc::modrm(),
    Desc::ctrl_modrm(Kind::CallIndirect),
    Desc::UNSUPPORTED,
    Desc::ctrl_modrm(Kind::JmpIndirect),
    Desc::UNSUPPORTED,
    Desc::modrm(),
    Desc::INVALID,
];

const fn build_one_byte() -> [Desc; 256] {
    let mut t = [Desc::UNKNOWN; 256];

    // ALU rows: ADD, OR, ADC, SBB, AND, SUB, XOR, CMP. Each row is
    // r/m8,r8 / r/m32,r32 / r8,r/m8 / r32,r/m32 / AL,imm8 / eAX,imm.
    let mut row = 0x00;
    while row <= 0x38 {
        t[row] = Desc::modrm();
        t[row + 1] = Desc::modrm();
        t[row + 2] = Desc::modrm();
        t[row + 3] = Desc::modrm();
        t[row + 4] = Desc::op_imm(Imm::B1).regs(reg_mask(EAX), reg_mask(EAX));
        t[row + 5] = Desc::op_imm(Imm::OpSize).regs(reg_mask(EAX), reg_mask(EAX));
        row += 8;
    }

    // Segment register pushes/pops: the guest ABI never reloads segments
    // this way, and emulating them is not worth the trouble.
    t[0x06] = Desc::UNSUPPORTED;
    t[0x07] = Desc::UNSUPPORTED;
    t[0x0E] = Desc::UNSUPPORTED;
    t[0x16] = Desc::UNSUPPORTED;
    t[0x17] = Desc::UNSUPPORTED;
    t[0x1E] = Desc::UNSUPPORTED;
    t[0x1F] = Desc::UNSUPPORTED;
    // 0x0F is the two-byte escape, consumed before table lookup.

    t[0x27] = Desc::op().regs(reg_mask(EAX), reg_mask(EAX)); // DAA
    t[0x2F] = Desc::op().regs(reg_mask(EAX), reg_mask(EAX)); // DAS
    t[0x37] = Desc::op().regs(reg_mask(EAX), reg_mask(EAX)); // AAA
    t[0x3F] = Desc::op().regs(reg_mask(EAX), reg_mask(EAX)); // AAS

    // INC/DEC/PUSH/POP on the register encoded in the opcode.
    let mut op = 0x40;
    while op <= 0x5F {
        t[op] = Desc::op();
        op += 1;
    }

    t[0x60] = Desc::op(); // PUSHA
    t[0x61] = Desc::op(); // POPA
    t[0x62] = Desc::UNSUPPORTED; // BOUND
    t[0x63] = Desc::UNSUPPORTED; // ARPL
    t[0x68] = Desc::op_imm(Imm::OpSize); // PUSH imm
    t[0x69] = Desc::modrm_imm(Imm::OpSize); // IMUL r, r/m, imm
    t[0x6A] = Desc::op_imm(Imm::B1); // PUSH imm8
    t[0x6B] = Desc::modrm_imm(Imm::B1); // IMUL r, r/m, imm8
    t[0x6C] = Desc::PRIVILEGED; // INS/OUTS: port I/O
    t[0x6D] = Desc::PRIVILEGED;
    t[0x6E] = Desc::PRIVILEGED;
    t[0x6F] = Desc::PRIVILEGED;

    // Jcc rel8.
    let mut cc = 0;
    while cc < 16 {
        t[0x70 + cc] = Desc::ctrl(Kind::Jcc(cc as u8), Imm::B1);
        cc += 1;
    }

    // Group 1 ALU-with-immediate rows are uniform in shape.
    t[0x80] = Desc::modrm_imm(Imm::B1);
    t[0x81] = Desc::modrm_imm(Imm::OpSize);
    t[0x82] = Desc::INVALID; // alias of 0x80, invalid in 32-bit mode
    t[0x83] = Desc::modrm_imm(Imm::B1);

    t[0x84] = Desc::modrm(); // TEST
    t[0x85] = Desc::modrm();
    t[0x86] = Desc::modrm(); // XCHG
    t[0x87] = Desc::modrm();
    t[0x88] = Desc::modrm(); // MOV
    t[0x89] = Desc::modrm();
    t[0x8A] = Desc::modrm();
    t[0x8B] = Desc::modrm();
    t[0x8C] = Desc::ctrl_modrm(Kind::MovFromSeg);
    t[0x8D] = Desc::modrm(); // LEA
    t[0x8E] = Desc::ctrl_modrm(Kind::MovToSeg);
    t[0x8F] = Desc::group(&GROUP_1A);

    // NOP and XCHG eAX, reg.
    let mut op = 0x90;
    while op <= 0x97 {
        t[op] = Desc::op();
        op += 1;
    }

    t[0x98] = Desc::op().regs(reg_mask(EAX), reg_mask(EAX)); // CWDE
    t[0x99] = Desc::op().regs(reg_mask(EAX), reg_mask(EDX)); // CDQ
    t[0x9A] = Desc::UNSUPPORTED; // CALL far
    t[0x9B] = Desc::op(); // FWAIT
    t[0x9C] = Desc::op(); // PUSHFD
    t[0x9D] = Desc::op(); // POPFD
    t[0x9E] = Desc::op().regs(reg_mask(EAX), 0); // SAHF
    t[0x9F] = Desc::op().regs(0, reg_mask(EAX)); // LAHF

    // MOV AL/eAX, moffs and back: a 4-byte absolute address operand.
    t[0xA0] = Desc::op_imm(Imm::B4).regs(0, reg_mask(EAX));
    t[0xA1] = Desc::op_imm(Imm::B4).regs(0, reg_mask(EAX));
    t[0xA2] = Desc::op_imm(Imm::B4).regs(reg_mask(EAX), 0);
    t[0xA3] = Desc::op_imm(Imm::B4).regs(reg_mask(EAX), 0);

    // String ops. ECX is included for the REP forms.
    let si_di_c = reg_mask(ESI) | reg_mask(EDI) | reg_mask(ECX);
    t[0xA4] = Desc::op().regs(si_di_c, si_di_c); // MOVS
    t[0xA5] = Desc::op().regs(si_di_c, si_di_c);
    t[0xA6] = Desc::op().regs(si_di_c, si_di_c); // CMPS
    t[0xA7] = Desc::op().regs(si_di_c, si_di_c);
    t[0xA8] = Desc::op_imm(Imm::B1).regs(reg_mask(EAX), 0); // TEST AL, imm8
    t[0xA9] = Desc::op_imm(Imm::OpSize).regs(reg_mask(EAX), 0);
    let di_c = reg_mask(EDI) | reg_mask(ECX);
    t[0xAA] = Desc::op().regs(reg_mask(EAX) | di_c, di_c); // STOS
    t[0xAB] = Desc::op().regs(reg_mask(EAX) | di_c, di_c);
    let si_c = reg_mask(ESI) | reg_mask(ECX);
    t[0xAC] = Desc::op().regs(si_c, si_c | reg_mask(EAX)); // LODS
    t[0xAD] = Desc::op().regs(si_c, si_c | reg_mask(EAX));
    t[0xAE] = Desc::op().regs(reg_mask(EAX) | di_c, di_c); // SCAS
    t[0xAF] = Desc::op().regs(reg_mask(EAX) | di_c, di_c);

    // MOV reg, imm.
    let mut op = 0xB0;
    while op <= 0xB7 {
        t[op] = Desc::op_imm(Imm::B1);
        op += 1;
    }
    let mut op = 0xB8;
    while op <= 0xBF {
        t[op] = Desc::op_imm(Imm::OpSize);
        op += 1;
    }

    // Shift groups: uniform shape across /r.
    t[0xC0] = Desc::modrm_imm(Imm::B1);
    t[0xC1] = Desc::modrm_imm(Imm::B1);

    t[0xC2] = Desc::ctrl(Kind::RetImm16, Imm::B2);
    t[0xC3] = Desc::ctrl(Kind::Ret, Imm::None);
    t[0xC4] = Desc::UNSUPPORTED; // LES
    t[0xC5] = Desc::UNSUPPORTED; // LDS
    t[0xC6] = Desc::group(&GROUP_11B);
    t[0xC7] = Desc::group(&GROUP_11D);
    t[0xC8] = Desc::op_imm(Imm::B3); // ENTER imm16, imm8
    t[0xC9] = Desc::op(); // LEAVE
    t[0xCA] = Desc::UNSUPPORTED; // RET far
    t[0xCB] = Desc::UNSUPPORTED;
    t[0xCC] = Desc::UNSUPPORTED; // INT3
    t[0xCD] = Desc::ctrl(Kind::Int, Imm::B1);
    t[0xCE] = Desc::UNSUPPORTED; // INTO
    t[0xCF] = Desc::PRIVILEGED; // IRET

    t[0xD0] = Desc::modrm(); // shifts by 1
    t[0xD1] = Desc::modrm();
    t[0xD2] = Desc::modrm().regs(reg_mask(ECX), 0); // shifts by CL
    t[0xD3] = Desc::modrm().regs(reg_mask(ECX), 0);
    t[0xD4] = Desc::op_imm(Imm::B1).regs(reg_mask(EAX), reg_mask(EAX)); // AAM
    t[0xD5] = Desc::op_imm(Imm::B1).regs(reg_mask(EAX), reg_mask(EAX)); // AAD
    t[0xD6] = Desc::INVALID; // SALC
    t[0xD7] = Desc::op().regs(reg_mask(EAX) | reg_mask(EBX), reg_mask(EAX)); // XLAT

    // x87: ModR/M encodes either a memory operand or a stack register.
    let mut op = 0xD8;
    while op <= 0xDF {
        t[op] = Desc::modrm();
        op += 1;
    }

    // LOOP/LOOPE/LOOPNE/JECXZ: rel8 with no rel32 equivalent.
    t[0xE0] = Desc::ctrl(Kind::JccRel8, Imm::B1).regs(reg_mask(ECX), reg_mask(ECX));
    t[0xE1] = Desc::ctrl(Kind::JccRel8, Imm::B1).regs(reg_mask(ECX), reg_mask(ECX));
    t[0xE2] = Desc::ctrl(Kind::JccRel8, Imm::B1).regs(reg_mask(ECX), reg_mask(ECX));
    t[0xE3] = Desc::ctrl(Kind::JccRel8, Imm::B1).regs(reg_mask(ECX), 0);

    t[0xE4] = Desc::PRIVILEGED; // IN/OUT imm8
    t[0xE5] = Desc::PRIVILEGED;
    t[0xE6] = Desc::PRIVILEGED;
    t[0xE7] = Desc::PRIVILEGED;
    t[0xE8] = Desc::ctrl(Kind::CallDirect, Imm::OpSize);
    t[0xE9] = Desc::ctrl(Kind::JmpDirect, Imm::OpSize);
    t[0xEA] = Desc::UNSUPPORTED; // JMP far
    t[0xEB] = Desc::ctrl(Kind::JmpDirect, Imm::B1);
    t[0xEC] = Desc::PRIVILEGED; // IN/OUT dx
    t[0xED] = Desc::PRIVILEGED;
    t[0xEE] = Desc::PRIVILEGED;
    t[0xEF] = Desc::PRIVILEGED;

    // 0xF0/0xF2/0xF3 are prefixes, consumed before table lookup.
    t[0xF1] = Desc::INVALID; // INT1
    t[0xF4] = Desc::PRIVILEGED; // HLT
    t[0xF5] = Desc::op(); // CMC
    t[0xF6] = Desc::group(&GROUP_3B);
    t[0xF7] = Desc::group(&GROUP_3D);
    t[0xF8] = Desc::op(); // CLC
    t[0xF9] = Desc::op(); // STC
    t[0xFA] = Desc::PRIVILEGED; // CLI
    t[0xFB] = Desc::PRIVILEGED; // STI
    t[0xFC] = Desc::op(); // CLD
    t[0xFD] = Desc::op(); // STD
    t[0xFE] = Desc::group(&GROUP_4);
    t[0xFF] = Desc::group(&GROUP_5);

    t
}

const fn build_two_byte() -> [Desc; 256] {
    let mut t = [Desc::UNKNOWN; 256];

    t[0x00] = Desc::PRIVILEGED; // group 6: sldt and friends
    t[0x01] = Desc::PRIVILEGED; // group 7: lgdt and friends
    t[0x02] = Desc::UNSUPPORTED; // LAR
    t[0x03] = Desc::UNSUPPORTED; // LSL
    t[0x06] = Desc::PRIVILEGED; // CLTS
    t[0x08] = Desc::PRIVILEGED; // INVD
    t[0x09] = Desc::PRIVILEGED; // WBINVD
    t[0x0B] = Desc::INVALID; // UD2
    t[0x0D] = Desc::modrm(); // prefetch

    // SSE moves and conversions, plus the long-NOP row.
    let mut op = 0x10;
    while op <= 0x1F {
        t[op] = Desc::modrm();
        op += 1;
    }

    t[0x20] = Desc::PRIVILEGED; // MOV from/to CRn/DRn
    t[0x21] = Desc::PRIVILEGED;
    t[0x22] = Desc::PRIVILEGED;
    t[0x23] = Desc::PRIVILEGED;

    let mut op = 0x28;
    while op <= 0x2F {
        t[op] = Desc::modrm();
        op += 1;
    }

    t[0x30] = Desc::PRIVILEGED; // WRMSR
    t[0x31] = Desc::op().regs(0, AX_DX); // RDTSC
    t[0x32] = Desc::PRIVILEGED; // RDMSR
    t[0x33] = Desc::PRIVILEGED; // RDPMC
    t[0x34] = Desc::UNSUPPORTED; // SYSENTER
    t[0x35] = Desc::UNSUPPORTED; // SYSEXIT
    t[0x38] = Desc::UNSUPPORTED; // three-byte escape
    t[0x3A] = Desc::UNSUPPORTED; // three-byte escape

    // CMOVcc.
    let mut op = 0x40;
    while op <= 0x4F {
        t[op] = Desc::modrm();
        op += 1;
    }

    // SSE/MMX arithmetic block.
    let mut op = 0x50;
    while op <= 0x6F {
        t[op] = Desc::modrm();
        op += 1;
    }

    t[0x70] = Desc::modrm_imm(Imm::B1); // PSHUF*
    t[0x71] = Desc::modrm_imm(Imm::B1); // shift groups 12-14: uniform shape
    t[0x72] = Desc::modrm_imm(Imm::B1);
    t[0x73] = Desc::modrm_imm(Imm::B1);
    t[0x74] = Desc::modrm(); // PCMPEQ*
    t[0x75] = Desc::modrm();
    t[0x76] = Desc::modrm();
    t[0x77] = Desc::op(); // EMMS
    t[0x7C] = Desc::modrm(); // HADDP*
    t[0x7D] = Desc::modrm();
    t[0x7E] = Desc::modrm(); // MOVD/MOVQ
    t[0x7F] = Desc::modrm();

    // Jcc rel32.
    let mut cc = 0;
    while cc < 16 {
        t[0x80 + cc] = Desc::ctrl(Kind::Jcc(cc as u8), Imm::OpSize);
        cc += 1;
    }

    // SETcc.
    let mut op = 0x90;
    while op <= 0x9F {
        t[op] = Desc::modrm();
        op += 1;
    }

    t[0xA0] = Desc::UNSUPPORTED; // PUSH FS
    t[0xA1] = Desc::UNSUPPORTED; // POP FS
    t[0xA2] = Desc::op().regs(
        reg_mask(EAX) | reg_mask(ECX),
        reg_mask(EAX) | reg_mask(EBX) | reg_mask(ECX) | reg_mask(EDX),
    ); // CPUID
    t[0xA3] = Desc::modrm(); // BT
    t[0xA4] = Desc::modrm_imm(Imm::B1); // SHLD imm8
    t[0xA5] = Desc::modrm().regs(reg_mask(ECX), 0); // SHLD CL
    t[0xA8] = Desc::UNSUPPORTED; // PUSH GS
    t[0xA9] = Desc::UNSUPPORTED; // POP GS
    t[0xAA] = Desc::PRIVILEGED; // RSM
    t[0xAB] = Desc::modrm(); // BTS
    t[0xAC] = Desc::modrm_imm(Imm::B1); // SHRD imm8
    t[0xAD] = Desc::modrm().regs(reg_mask(ECX), 0); // SHRD CL
    t[0xAE] = Desc::modrm(); // group 15: fences, fxsave
    t[0xAF] = Desc::modrm(); // IMUL r, r/m
    t[0xB0] = Desc::modrm().regs(reg_mask(EAX), reg_mask(EAX)); // CMPXCHG
    t[0xB1] = Desc::modrm().regs(reg_mask(EAX), reg_mask(EAX));
    t[0xB2] = Desc::UNSUPPORTED; // LSS
    t[0xB3] = Desc::modrm(); // BTR
    t[0xB4] = Desc::UNSUPPORTED; // LFS
    t[0xB5] = Desc::UNSUPPORTED; // LGS
    t[0xB6] = Desc::modrm(); // MOVZX
    t[0xB7] = Desc::modrm();
    t[0xB9] = Desc::INVALID; // UD1
    t[0xBA] = Desc::modrm_imm(Imm::B1); // group 8: BT* imm8, uniform shape
    t[0xBB] = Desc::modrm(); // BTC
    t[0xBC] = Desc::modrm(); // BSF
    t[0xBD] = Desc::modrm(); // BSR
    t[0xBE] = Desc::modrm(); // MOVSX
    t[0xBF] = Desc::modrm();
    t[0xC0] = Desc::modrm(); // XADD
    t[0xC1] = Desc::modrm();
    t[0xC2] = Desc::modrm_imm(Imm::B1); // CMPPS
    t[0xC3] = Desc::modrm(); // MOVNTI
    t[0xC4] = Desc::modrm_imm(Imm::B1); // PINSRW
    t[0xC5] = Desc::modrm_imm(Imm::B1); // PEXTRW
    t[0xC6] = Desc::modrm_imm(Imm::B1); // SHUFPS
    t[0xC7] = Desc::modrm(); // group 9: CMPXCHG8B

    // BSWAP reg.
    let mut op = 0xC8;
    while op <= 0xCF {
        t[op] = Desc::op();
        op += 1;
    }

    // MMX/SSE block through the end of the map.
    let mut op = 0xD0;
    while op <= 0xFE {
        t[op] = Desc::modrm();
        op += 1;
    }
    t[0xFF] = Desc::INVALID; // UD0

    t
}

/// One-byte opcode map.
pub static ONE_BYTE: [Desc; 256] = build_one_byte();
/// Two-byte (`0x0F`-escaped) opcode map.
pub static TWO_BYTE: [Desc; 256] = build_two_byte();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_transfer_classes() {
        assert_eq!(ONE_BYTE[0xE8].kind, Kind::CallDirect);
        assert_eq!(ONE_BYTE[0xE9].kind, Kind::JmpDirect);
        assert_eq!(ONE_BYTE[0xEB].kind, Kind::JmpDirect);
        assert_eq!(ONE_BYTE[0xC3].kind, Kind::Ret);
        assert_eq!(ONE_BYTE[0xC2].kind, Kind::RetImm16);
        assert_eq!(ONE_BYTE[0xC2].imm, Imm::B2);
        assert_eq!(ONE_BYTE[0xCD].kind, Kind::Int);

        let group5 = ONE_BYTE[0xFF].ext.expect("group 5");
        assert_eq!(group5[2].kind, Kind::CallIndirect);
        assert_eq!(group5[4].kind, Kind::JmpIndirect);
        assert_eq!(group5[6].kind, Kind::Normal);
    }

    #[test]
    fn jcc_condition_codes() {
        for cc in 0..16u8 {
            assert_eq!(ONE_BYTE[0x70 + cc as usize].kind, Kind::Jcc(cc));
            assert_eq!(ONE_BYTE[0x70 + cc as usize].imm, Imm::B1);
            assert_eq!(TWO_BYTE[0x80 + cc as usize].kind, Kind::Jcc(cc));
            assert_eq!(TWO_BYTE[0x80 + cc as usize].imm, Imm::OpSize);
        }
    }

    #[test]
    fn opsize_sentinel_resolution() {
        assert_eq!(Imm::OpSize.bytes(false), 4);
        assert_eq!(Imm::OpSize.bytes(true), 2);
        assert_eq!(Imm::B4.bytes(true), 4);
        assert_eq!(Imm::None.bytes(true), 0);
    }

    #[test]
    fn segment_moves_and_groups() {
        assert_eq!(ONE_BYTE[0x8C].kind, Kind::MovFromSeg);
        assert_eq!(ONE_BYTE[0x8E].kind, Kind::MovToSeg);
        assert!(ONE_BYTE[0x8C].has_modrm);

        let group3 = ONE_BYTE[0xF7].ext.expect("group 3");
        assert_eq!(group3[0].imm, Imm::OpSize);
        assert_eq!(group3[2].imm, Imm::None);
    }

    #[test]
    fn fatal_classes() {
        assert_eq!(ONE_BYTE[0xF4].kind, Kind::Privileged); // HLT
        assert_eq!(ONE_BYTE[0x9A].kind, Kind::Unsupported); // CALL far
        assert_eq!(ONE_BYTE[0xD6].kind, Kind::Invalid); // SALC
        assert_eq!(TWO_BYTE[0x0B].kind, Kind::Invalid); // UD2
        assert_eq!(TWO_BYTE[0x30].kind, Kind::Privileged); // WRMSR
    }
}
