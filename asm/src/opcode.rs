use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use tracing::trace;

use crate::operand::AddressingMode::{self, *};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("invalid instruction: \"{0}\"")]
    InvalidInstruction(String),

    #[error("invalid addressing mode for {mnemonic}: {mode}")]
    InvalidAddressingMode {
        mnemonic: Mnemonic,
        mode: AddressingMode,
    },

    #[error("value out of range for {mnemonic} {mode}: {value}")]
    ValueRange {
        mnemonic: Mnemonic,
        mode: AddressingMode,
        value: i32,
    },
}

/// One concrete encoding of a mnemonic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpcodeForm {
    pub mode: AddressingMode,
    pub opcode: u8,
    pub len: u8,
}

const fn form(mode: AddressingMode, opcode: u8) -> OpcodeForm {
    let len = match mode {
        Implied | Accumulator => 1,
        Absolute | AbsoluteXIndex | AbsoluteYIndex | Indirect => 3,
        Immediate | Zeropage | ZeropageXIndexed | ZeropageYIndexed | XIndexedIndirect
        | IndirectYIndexed | Relative => 2,
    };
    OpcodeForm { mode, opcode, len }
}

impl OpcodeForm {
    #[inline]
    pub fn operand_len(&self) -> usize {
        self.len as usize - 1
    }

    /// Whether `value` can be stored in this form's operand.
    pub fn fits(&self, value: i32) -> bool {
        match self.mode {
            Implied | Accumulator => false,
            Immediate => (-128..=255).contains(&value),
            Relative => (-128..=127).contains(&value),
            Zeropage | ZeropageXIndexed | ZeropageYIndexed | XIndexedIndirect
            | IndirectYIndexed => (0..=255).contains(&value),
            Absolute | AbsoluteXIndex | AbsoluteYIndex | Indirect => (0..=65535).contains(&value),
        }
    }

    /// The opcode byte followed by the operand, low byte first. A missing
    /// value encodes as zeros.
    pub fn emit(&self, value: Option<i32>) -> Vec<u8> {
        let operand = value.unwrap_or(0);
        let mut bytes = Vec::with_capacity(self.len as usize);
        bytes.push(self.opcode);
        match self.operand_len() {
            0 => {}
            1 => bytes.push(operand as u8),
            _ => bytes.extend_from_slice(&(operand as u16).to_le_bytes()),
        }
        bytes
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
}

pub const MNEMONICS: [Mnemonic; 56] = [
    Mnemonic::Adc,
    Mnemonic::And,
    Mnemonic::Asl,
    Mnemonic::Bcc,
    Mnemonic::Bcs,
    Mnemonic::Beq,
    Mnemonic::Bit,
    Mnemonic::Bmi,
    Mnemonic::Bne,
    Mnemonic::Bpl,
    Mnemonic::Brk,
    Mnemonic::Bvc,
    Mnemonic::Bvs,
    Mnemonic::Clc,
    Mnemonic::Cld,
    Mnemonic::Cli,
    Mnemonic::Clv,
    Mnemonic::Cmp,
    Mnemonic::Cpx,
    Mnemonic::Cpy,
    Mnemonic::Dec,
    Mnemonic::Dex,
    Mnemonic::Dey,
    Mnemonic::Eor,
    Mnemonic::Inc,
    Mnemonic::Inx,
    Mnemonic::Iny,
    Mnemonic::Jmp,
    Mnemonic::Jsr,
    Mnemonic::Lda,
    Mnemonic::Ldx,
    Mnemonic::Ldy,
    Mnemonic::Lsr,
    Mnemonic::Nop,
    Mnemonic::Ora,
    Mnemonic::Pha,
    Mnemonic::Php,
    Mnemonic::Pla,
    Mnemonic::Plp,
    Mnemonic::Rol,
    Mnemonic::Ror,
    Mnemonic::Rti,
    Mnemonic::Rts,
    Mnemonic::Sbc,
    Mnemonic::Sec,
    Mnemonic::Sed,
    Mnemonic::Sei,
    Mnemonic::Sta,
    Mnemonic::Stx,
    Mnemonic::Sty,
    Mnemonic::Tax,
    Mnemonic::Tay,
    Mnemonic::Tsx,
    Mnemonic::Txa,
    Mnemonic::Txs,
    Mnemonic::Tya,
];

// The eight "group one" instructions share a layout: the opcode's low bits
// pick the addressing mode.
const fn group_one(base: u8) -> [OpcodeForm; 8] {
    [
        form(Immediate, base + 0x08),
        form(Zeropage, base + 0x04),
        form(ZeropageXIndexed, base + 0x14),
        form(Absolute, base + 0x0C),
        form(AbsoluteXIndex, base + 0x1C),
        form(AbsoluteYIndex, base + 0x18),
        form(XIndexedIndirect, base),
        form(IndirectYIndexed, base + 0x10),
    ]
}

const fn shift(base: u8) -> [OpcodeForm; 5] {
    [
        form(Accumulator, base + 0x0A),
        form(Zeropage, base + 0x06),
        form(ZeropageXIndexed, base + 0x16),
        form(Absolute, base + 0x0E),
        form(AbsoluteXIndex, base + 0x1E),
    ]
}

const ADC: [OpcodeForm; 8] = group_one(0x61);
const AND: [OpcodeForm; 8] = group_one(0x21);
const CMP: [OpcodeForm; 8] = group_one(0xC1);
const EOR: [OpcodeForm; 8] = group_one(0x41);
const LDA: [OpcodeForm; 8] = group_one(0xA1);
const ORA: [OpcodeForm; 8] = group_one(0x01);
const SBC: [OpcodeForm; 8] = group_one(0xE1);

const STA: [OpcodeForm; 7] = [
    form(Zeropage, 0x85),
    form(ZeropageXIndexed, 0x95),
    form(Absolute, 0x8D),
    form(AbsoluteXIndex, 0x9D),
    form(AbsoluteYIndex, 0x99),
    form(XIndexedIndirect, 0x81),
    form(IndirectYIndexed, 0x91),
];

const ASL: [OpcodeForm; 5] = shift(0x00);
const LSR: [OpcodeForm; 5] = shift(0x40);
const ROL: [OpcodeForm; 5] = shift(0x20);
const ROR: [OpcodeForm; 5] = shift(0x60);

const BIT: [OpcodeForm; 2] = [form(Zeropage, 0x24), form(Absolute, 0x2C)];

const CPX: [OpcodeForm; 3] = [
    form(Immediate, 0xE0),
    form(Zeropage, 0xE4),
    form(Absolute, 0xEC),
];

const CPY: [OpcodeForm; 3] = [
    form(Immediate, 0xC0),
    form(Zeropage, 0xC4),
    form(Absolute, 0xCC),
];

const DEC: [OpcodeForm; 4] = [
    form(Zeropage, 0xC6),
    form(ZeropageXIndexed, 0xD6),
    form(Absolute, 0xCE),
    form(AbsoluteXIndex, 0xDE),
];

const INC: [OpcodeForm; 4] = [
    form(Zeropage, 0xE6),
    form(ZeropageXIndexed, 0xF6),
    form(Absolute, 0xEE),
    form(AbsoluteXIndex, 0xFE),
];

const JMP: [OpcodeForm; 2] = [form(Absolute, 0x4C), form(Indirect, 0x6C)];

const LDX: [OpcodeForm; 5] = [
    form(Immediate, 0xA2),
    form(Zeropage, 0xA6),
    form(ZeropageYIndexed, 0xB6),
    form(Absolute, 0xAE),
    form(AbsoluteYIndex, 0xBE),
];

const LDY: [OpcodeForm; 5] = [
    form(Immediate, 0xA0),
    form(Zeropage, 0xA4),
    form(ZeropageXIndexed, 0xB4),
    form(Absolute, 0xAC),
    form(AbsoluteXIndex, 0xBC),
];

const STX: [OpcodeForm; 3] = [
    form(Zeropage, 0x86),
    form(ZeropageYIndexed, 0x96),
    form(Absolute, 0x8E),
];

const STY: [OpcodeForm; 3] = [
    form(Zeropage, 0x84),
    form(ZeropageXIndexed, 0x94),
    form(Absolute, 0x8C),
];

const BCC: [OpcodeForm; 1] = [form(Relative, 0x90)];
const BCS: [OpcodeForm; 1] = [form(Relative, 0xB0)];
const BEQ: [OpcodeForm; 1] = [form(Relative, 0xF0)];
const BMI: [OpcodeForm; 1] = [form(Relative, 0x30)];
const BNE: [OpcodeForm; 1] = [form(Relative, 0xD0)];
const BPL: [OpcodeForm; 1] = [form(Relative, 0x10)];
const BRK: [OpcodeForm; 1] = [form(Implied, 0x00)];
const BVC: [OpcodeForm; 1] = [form(Relative, 0x50)];
const BVS: [OpcodeForm; 1] = [form(Relative, 0x70)];
const CLC: [OpcodeForm; 1] = [form(Implied, 0x18)];
const CLD: [OpcodeForm; 1] = [form(Implied, 0xD8)];
const CLI: [OpcodeForm; 1] = [form(Implied, 0x58)];
const CLV: [OpcodeForm; 1] = [form(Implied, 0xB8)];
const DEX: [OpcodeForm; 1] = [form(Implied, 0xCA)];
const DEY: [OpcodeForm; 1] = [form(Implied, 0x88)];
const INX: [OpcodeForm; 1] = [form(Implied, 0xE8)];
const INY: [OpcodeForm; 1] = [form(Implied, 0xC8)];
const JSR: [OpcodeForm; 1] = [form(Absolute, 0x20)];
const NOP: [OpcodeForm; 1] = [form(Implied, 0xEA)];
const PHA: [OpcodeForm; 1] = [form(Implied, 0x48)];
const PHP: [OpcodeForm; 1] = [form(Implied, 0x08)];
const PLA: [OpcodeForm; 1] = [form(Implied, 0x68)];
const PLP: [OpcodeForm; 1] = [form(Implied, 0x28)];
const RTI: [OpcodeForm; 1] = [form(Implied, 0x40)];
const RTS: [OpcodeForm; 1] = [form(Implied, 0x60)];
const SEC: [OpcodeForm; 1] = [form(Implied, 0x38)];
const SED: [OpcodeForm; 1] = [form(Implied, 0xF8)];
const SEI: [OpcodeForm; 1] = [form(Implied, 0x78)];
const TAX: [OpcodeForm; 1] = [form(Implied, 0xAA)];
const TAY: [OpcodeForm; 1] = [form(Implied, 0xA8)];
const TSX: [OpcodeForm; 1] = [form(Implied, 0xBA)];
const TXA: [OpcodeForm; 1] = [form(Implied, 0x8A)];
const TXS: [OpcodeForm; 1] = [form(Implied, 0x9A)];
const TYA: [OpcodeForm; 1] = [form(Implied, 0x98)];

impl Mnemonic {
    pub fn name(self) -> &'static str {
        match self {
            Self::Adc => "ADC",
            Self::And => "AND",
            Self::Asl => "ASL",
            Self::Bcc => "BCC",
            Self::Bcs => "BCS",
            Self::Beq => "BEQ",
            Self::Bit => "BIT",
            Self::Bmi => "BMI",
            Self::Bne => "BNE",
            Self::Bpl => "BPL",
            Self::Brk => "BRK",
            Self::Bvc => "BVC",
            Self::Bvs => "BVS",
            Self::Clc => "CLC",
            Self::Cld => "CLD",
            Self::Cli => "CLI",
            Self::Clv => "CLV",
            Self::Cmp => "CMP",
            Self::Cpx => "CPX",
            Self::Cpy => "CPY",
            Self::Dec => "DEC",
            Self::Dex => "DEX",
            Self::Dey => "DEY",
            Self::Eor => "EOR",
            Self::Inc => "INC",
            Self::Inx => "INX",
            Self::Iny => "INY",
            Self::Jmp => "JMP",
            Self::Jsr => "JSR",
            Self::Lda => "LDA",
            Self::Ldx => "LDX",
            Self::Ldy => "LDY",
            Self::Lsr => "LSR",
            Self::Nop => "NOP",
            Self::Ora => "ORA",
            Self::Pha => "PHA",
            Self::Php => "PHP",
            Self::Pla => "PLA",
            Self::Plp => "PLP",
            Self::Rol => "ROL",
            Self::Ror => "ROR",
            Self::Rti => "RTI",
            Self::Rts => "RTS",
            Self::Sbc => "SBC",
            Self::Sec => "SEC",
            Self::Sed => "SED",
            Self::Sei => "SEI",
            Self::Sta => "STA",
            Self::Stx => "STX",
            Self::Sty => "STY",
            Self::Tax => "TAX",
            Self::Tay => "TAY",
            Self::Tsx => "TSX",
            Self::Txa => "TXA",
            Self::Txs => "TXS",
            Self::Tya => "TYA",
        }
    }

    /// Every encoding this mnemonic has on an NMOS 6502.
    pub fn forms(self) -> &'static [OpcodeForm] {
        match self {
            Self::Adc => &ADC,
            Self::And => &AND,
            Self::Asl => &ASL,
            Self::Bcc => &BCC,
            Self::Bcs => &BCS,
            Self::Beq => &BEQ,
            Self::Bit => &BIT,
            Self::Bmi => &BMI,
            Self::Bne => &BNE,
            Self::Bpl => &BPL,
            Self::Brk => &BRK,
            Self::Bvc => &BVC,
            Self::Bvs => &BVS,
            Self::Clc => &CLC,
            Self::Cld => &CLD,
            Self::Cli => &CLI,
            Self::Clv => &CLV,
            Self::Cmp => &CMP,
            Self::Cpx => &CPX,
            Self::Cpy => &CPY,
            Self::Dec => &DEC,
            Self::Dex => &DEX,
            Self::Dey => &DEY,
            Self::Eor => &EOR,
            Self::Inc => &INC,
            Self::Inx => &INX,
            Self::Iny => &INY,
            Self::Jmp => &JMP,
            Self::Jsr => &JSR,
            Self::Lda => &LDA,
            Self::Ldx => &LDX,
            Self::Ldy => &LDY,
            Self::Lsr => &LSR,
            Self::Nop => &NOP,
            Self::Ora => &ORA,
            Self::Pha => &PHA,
            Self::Php => &PHP,
            Self::Pla => &PLA,
            Self::Plp => &PLP,
            Self::Rol => &ROL,
            Self::Ror => &ROR,
            Self::Rti => &RTI,
            Self::Rts => &RTS,
            Self::Sbc => &SBC,
            Self::Sec => &SEC,
            Self::Sed => &SED,
            Self::Sei => &SEI,
            Self::Sta => &STA,
            Self::Stx => &STX,
            Self::Sty => &STY,
            Self::Tax => &TAX,
            Self::Tay => &TAY,
            Self::Tsx => &TSX,
            Self::Txa => &TXA,
            Self::Txs => &TXS,
            Self::Tya => &TYA,
        }
    }

    /// Branches only have a relative form; their operand is written as an
    /// absolute target and converted to a displacement.
    #[inline]
    pub fn is_branch(self) -> bool {
        matches!(self.forms(), [OpcodeForm { mode: Relative, .. }])
    }

    /// Picks the form to encode `mode` with.
    ///
    /// The mode is widened to its candidate list (see
    /// [`AddressingMode::candidates`]) and the narrowest candidate this
    /// mnemonic defines that can hold `value` wins. Without a value the
    /// widest defined candidate is taken so the operand can be patched in
    /// later.
    pub fn select(self, mode: AddressingMode, value: Option<i32>) -> Result<OpcodeForm, EncodeError> {
        let forms = self.forms();
        let defined = mode
            .candidates()
            .iter()
            .filter_map(|&candidate| forms.iter().find(|form| form.mode == candidate))
            .collect::<Vec<_>>();

        if defined.is_empty() {
            return Err(EncodeError::InvalidAddressingMode {
                mnemonic: self,
                mode,
            });
        }

        let selected = match value {
            None => defined.iter().max_by_key(|form| form.len),
            Some(value) => defined.iter().find(|form| form.fits(value)),
        };
        match selected {
            Some(&&form) => Ok(form),
            None => Err(EncodeError::ValueRange {
                mnemonic: self,
                mode,
                value: value.unwrap_or_default(),
            }),
        }
    }

    pub fn encode(self, mode: AddressingMode, value: Option<i32>) -> Result<Vec<u8>, EncodeError> {
        if let (Implied | Accumulator, Some(value)) = (mode, value) {
            return Err(EncodeError::ValueRange {
                mnemonic: self,
                mode,
                value,
            });
        }

        let form = self.select(mode, value)?;
        trace!(mnemonic = %self, mode = %form.mode, opcode = form.opcode, "selected form");
        Ok(form.emit(value))
    }
}

impl Display for Mnemonic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Mnemonic {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MNEMONICS
            .iter()
            .copied()
            .find(|mnemonic| mnemonic.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| EncodeError::InvalidInstruction(s.to_string()))
    }
}

/// Encodes one instruction given its mnemonic text.
pub fn encode_instruction(
    mnemonic: &str,
    mode: AddressingMode,
    value: Option<i32>,
) -> Result<Vec<u8>, EncodeError> {
    mnemonic.parse::<Mnemonic>()?.encode(mode, value)
}
