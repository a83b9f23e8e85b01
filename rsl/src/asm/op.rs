//! Opcodes and the packed instruction-stream word format
use serde::{Deserialize, Serialize};

/// Bytecode opcodes
///
/// Mnemonics are the lowercase variant names.  For arithmetic, the suffix
/// gives the class of each source operand (`s` for scalar, `v` for vector);
/// the destination is scalar only for the `ss` forms.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::FromRepr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[repr(u8)]
pub enum Opcode {
    MovSS,
    /// Broadcasts a scalar into all three components
    MovVS,
    MovVV,
    AbsSS,
    AbsVS,
    AbsVV,

    AddSS,
    AddVS,
    AddSV,
    AddVV,
    SubSS,
    SubVS,
    SubSV,
    SubVV,
    MulSS,
    MulVS,
    MulSV,
    MulVV,
    DivSS,
    DivVS,
    DivSV,
    DivVV,

    /// Assembles a vector from three scalars
    MovVS3,
    /// Loads a literal scalar
    Ld1,
    /// Loads a literal vector
    Ld3,

    // Comparisons write 1.0 or 0.0
    CmpLT,
    CmpLE,
    CmpGT,
    CmpGE,
    CmpEQ,
    CmpNE,

    // `noise<out><in>`: scalar or vector output over a 1D, 2D, or 3D domain
    Noise11,
    Noise12,
    Noise13,
    Noise31,
    Noise32,
    Noise33,

    GetVX,
    GetVY,
    GetVZ,
    SetVX,
    SetVY,
    SetVZ,

    Normalize,
    FaceForward,
    Diffuse,
    Ambient,
    CalculateNormal,

    /// Calls a function by index
    Call,
    /// Returns from a call, or halts at the outermost frame
    Ret,
}

impl Opcode {
    /// Number of operands (including the destination) taken by this opcode
    pub fn operand_count(&self) -> usize {
        use Opcode::*;
        match self {
            Ret => 0,
            Ambient | Call => 1,
            MovSS | MovVS | MovVV | AbsSS | AbsVS | AbsVV | Ld1 | Normalize
            | Diffuse | CalculateNormal | GetVX | GetVY | GetVZ | SetVX
            | SetVY | SetVZ | Noise11 | Noise13 | Noise31 | Noise33 => 2,
            AddSS | AddVS | AddSV | AddVV | SubSS | SubVS | SubSV | SubVV
            | MulSS | MulVS | MulSV | MulVV | DivSS | DivVS | DivSV | DivVV
            | CmpLT | CmpLE | CmpGT | CmpGE | CmpEQ | CmpNE | FaceForward
            | Noise12 | Noise32 => 3,
            MovVS3 | Ld3 => 4,
        }
    }
}

/// Coarse type of an instruction's first operand
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum OperandType {
    /// A single float
    F1,
    /// A three-component vector (point, color, vector, normal)
    F3,
    /// A 4x4 matrix
    M44,
}

/// Leading word of an instruction
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OpWord {
    /// [`Opcode`] discriminant
    pub opcode: u8,
    pub operand_count: u8,
    /// Type of the first operand, recorded at assembly time
    pub dest_type: OperandType,
    /// Source line of the instruction, for fault reports
    pub line: u32,
}

impl OpWord {
    /// Decodes the opcode
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_repr(self.opcode)
    }
}

/// Operand word, following its [`OpWord`]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OperandWord {
    /// Index into the shader's symbol table (or function table, for `call`)
    pub symbol: u32,
    pub varying: bool,
}

impl OperandWord {
    /// Per-point stride through the operand's data: 1 if varying, else 0
    pub fn step(&self) -> usize {
        self.varying as usize
    }
}

/// A single word in the instruction stream
///
/// Each instruction is one [`Word::Op`] followed by exactly
/// `operand_count` [`Word::Operand`] words.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Word {
    Op(OpWord),
    Operand(OperandWord),
}

static_assertions::const_assert!(std::mem::size_of::<Word>() <= 12);
