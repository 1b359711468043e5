//! Instruction primitives: the operand-less instructions, the conditional branches, and encoders
//! for every instruction that takes an operand.
//!
//! Encoders write into a [`BytecodeWriter`], so the same code runs in every layout phase. The
//! representation is slightly different from the usual presentation of the instruction set:
//!
//!   - `wide` never shows up on its own, it gets picked by [`encode_local`] when needed
//!
//!   - the branches are grouped by the kind of comparison, so inverting a condition is just a
//!     matter of negating the comparison
//!
//!   - `bipush`/`sipush` are never used (small integers use `iconst_*`, the rest use `ldc`)
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-6.html

use super::{BytecodeWriter, SynLabel};
use crate::jvm::class_file::ConstantIndex;
use crate::jvm::{BaseType, Error, JavaType, Serialize};
use std::convert::TryFrom;
use std::io::Result as IoResult;
use std::ops::Not;

pub const NOP: u8 = 0x00;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const GOTO: u8 = 0xa7;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const WIDE: u8 = 0xc4;

/// Instructions that take no operand
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    IShl,
    LShl,
    IShr,
    LShr,
    IUShr,
    LUShr,
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmpL,
    FCmpG,
    DCmpL,
    DCmpG,
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    ArrayLength,
    AThrow,
    MonitorEnter,
    MonitorExit,
}

impl Instruction {
    pub fn opcode(self) -> u8 {
        use Instruction::*;
        match self {
            Nop => NOP,
            AConstNull => 0x01,
            IConstM1 => 0x02,
            IConst0 => 0x03,
            IConst1 => 0x04,
            IConst2 => 0x05,
            IConst3 => 0x06,
            IConst4 => 0x07,
            IConst5 => 0x08,
            LConst0 => 0x09,
            LConst1 => 0x0a,
            FConst0 => 0x0b,
            FConst1 => 0x0c,
            FConst2 => 0x0d,
            DConst0 => 0x0e,
            DConst1 => 0x0f,
            IALoad => 0x2e,
            LALoad => 0x2f,
            FALoad => 0x30,
            DALoad => 0x31,
            AALoad => 0x32,
            BALoad => 0x33,
            CALoad => 0x34,
            SALoad => 0x35,
            IAStore => 0x4f,
            LAStore => 0x50,
            FAStore => 0x51,
            DAStore => 0x52,
            AAStore => 0x53,
            BAStore => 0x54,
            CAStore => 0x55,
            SAStore => 0x56,
            Pop => 0x57,
            Pop2 => 0x58,
            Dup => 0x59,
            DupX1 => 0x5a,
            DupX2 => 0x5b,
            Dup2 => 0x5c,
            Dup2X1 => 0x5d,
            Dup2X2 => 0x5e,
            Swap => 0x5f,
            IAdd => 0x60,
            LAdd => 0x61,
            FAdd => 0x62,
            DAdd => 0x63,
            ISub => 0x64,
            LSub => 0x65,
            FSub => 0x66,
            DSub => 0x67,
            IMul => 0x68,
            LMul => 0x69,
            FMul => 0x6a,
            DMul => 0x6b,
            IDiv => 0x6c,
            LDiv => 0x6d,
            FDiv => 0x6e,
            DDiv => 0x6f,
            IRem => 0x70,
            LRem => 0x71,
            FRem => 0x72,
            DRem => 0x73,
            INeg => 0x74,
            LNeg => 0x75,
            FNeg => 0x76,
            DNeg => 0x77,
            IShl => 0x78,
            LShl => 0x79,
            IShr => 0x7a,
            LShr => 0x7b,
            IUShr => 0x7c,
            LUShr => 0x7d,
            IAnd => 0x7e,
            LAnd => 0x7f,
            IOr => 0x80,
            LOr => 0x81,
            IXor => 0x82,
            LXor => 0x83,
            I2L => 0x85,
            I2F => 0x86,
            I2D => 0x87,
            L2I => 0x88,
            L2F => 0x89,
            L2D => 0x8a,
            F2I => 0x8b,
            F2L => 0x8c,
            F2D => 0x8d,
            D2I => 0x8e,
            D2L => 0x8f,
            D2F => 0x90,
            I2B => 0x91,
            I2C => 0x92,
            I2S => 0x93,
            LCmp => 0x94,
            FCmpL => 0x95,
            FCmpG => 0x96,
            DCmpL => 0x97,
            DCmpG => 0x98,
            IReturn => 0xac,
            LReturn => 0xad,
            FReturn => 0xae,
            DReturn => 0xaf,
            AReturn => 0xb0,
            Return => 0xb1,
            ArrayLength => 0xbe,
            AThrow => 0xbf,
            MonitorEnter => 0xc2,
            MonitorExit => 0xc3,
        }
    }

    /// Type of the value this instruction leaves on the stack
    ///
    /// Stack manipulation instructions are `void` here: their result depends on what is already on
    /// the stack, so the expression using them should say what it produces with [`Expr::is`].
    ///
    /// [`Expr::is`]: super::Expr::is
    pub fn result_type(self) -> JavaType {
        use Instruction::*;
        match self {
            AConstNull => JavaType::NULL_TYPE,
            IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => JavaType::INT,
            LConst0 | LConst1 => JavaType::LONG,
            FConst0 | FConst1 | FConst2 => JavaType::FLOAT,
            DConst0 | DConst1 => JavaType::DOUBLE,

            IALoad => JavaType::INT,
            LALoad => JavaType::LONG,
            FALoad => JavaType::FLOAT,
            DALoad => JavaType::DOUBLE,
            AALoad => JavaType::OBJECT,
            BALoad => JavaType::BYTE,
            CALoad => JavaType::CHAR,
            SALoad => JavaType::SHORT,

            IAdd | ISub | IMul | IDiv | IRem | INeg | IShl | IShr | IUShr | IAnd | IOr | IXor => {
                JavaType::INT
            }
            LAdd | LSub | LMul | LDiv | LRem | LNeg | LShl | LShr | LUShr | LAnd | LOr | LXor => {
                JavaType::LONG
            }
            FAdd | FSub | FMul | FDiv | FRem | FNeg => JavaType::FLOAT,
            DAdd | DSub | DMul | DDiv | DRem | DNeg => JavaType::DOUBLE,

            L2I | F2I | D2I => JavaType::INT,
            I2L | F2L | D2L => JavaType::LONG,
            I2F | L2F | D2F => JavaType::FLOAT,
            I2D | L2D | F2D => JavaType::DOUBLE,
            I2B => JavaType::BYTE,
            I2C => JavaType::CHAR,
            I2S => JavaType::SHORT,

            LCmp | FCmpL | FCmpG | DCmpL | DCmpG | ArrayLength => JavaType::INT,

            Nop | IAStore | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore
            | Pop | Pop2 | Dup | DupX1 | DupX2 | Dup2 | Dup2X1 | Dup2X2 | Swap | IReturn
            | LReturn | FReturn | DReturn | AReturn | Return | AThrow | MonitorEnter
            | MonitorExit => JavaType::Void,
        }
    }

    /// Does control never fall through to the next instruction?
    pub fn ends_path(self) -> bool {
        use Instruction::*;
        matches!(
            self,
            IReturn | LReturn | FReturn | DReturn | AReturn | Return | AThrow
        )
    }
}

/// Ordered comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    NE,
    LT,
    GE,
    GT,
    LE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::NE => OrdComparison::EQ,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Conditional branch instructions
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum BranchOp {
    If(OrdComparison),     // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison), // covers `if_icmpeq`, `if_icmpne`, ... `if_icmple`
    IfACmp(EqComparison),  // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison),  // covers `ifnull`, `ifnonnull`
}

impl BranchOp {
    pub const IFEQ: BranchOp = BranchOp::If(OrdComparison::EQ);
    pub const IFNE: BranchOp = BranchOp::If(OrdComparison::NE);
    pub const IFLT: BranchOp = BranchOp::If(OrdComparison::LT);
    pub const IFGE: BranchOp = BranchOp::If(OrdComparison::GE);
    pub const IFGT: BranchOp = BranchOp::If(OrdComparison::GT);
    pub const IFLE: BranchOp = BranchOp::If(OrdComparison::LE);
    pub const IF_ICMPEQ: BranchOp = BranchOp::IfICmp(OrdComparison::EQ);
    pub const IF_ICMPNE: BranchOp = BranchOp::IfICmp(OrdComparison::NE);
    pub const IF_ICMPLT: BranchOp = BranchOp::IfICmp(OrdComparison::LT);
    pub const IF_ICMPGE: BranchOp = BranchOp::IfICmp(OrdComparison::GE);
    pub const IF_ICMPGT: BranchOp = BranchOp::IfICmp(OrdComparison::GT);
    pub const IF_ICMPLE: BranchOp = BranchOp::IfICmp(OrdComparison::LE);
    pub const IF_ACMPEQ: BranchOp = BranchOp::IfACmp(EqComparison::EQ);
    pub const IF_ACMPNE: BranchOp = BranchOp::IfACmp(EqComparison::NE);
    pub const IFNULL: BranchOp = BranchOp::IfNull(EqComparison::EQ);
    pub const IFNONNULL: BranchOp = BranchOp::IfNull(EqComparison::NE);

    pub fn opcode(self) -> u8 {
        match self {
            BranchOp::If(comp) => match comp {
                OrdComparison::EQ => 0x99,
                OrdComparison::NE => 0x9a,
                OrdComparison::LT => 0x9b,
                OrdComparison::GE => 0x9c,
                OrdComparison::GT => 0x9d,
                OrdComparison::LE => 0x9e,
            },
            BranchOp::IfICmp(comp) => match comp {
                OrdComparison::EQ => 0x9f,
                OrdComparison::NE => 0xa0,
                OrdComparison::LT => 0xa1,
                OrdComparison::GE => 0xa2,
                OrdComparison::GT => 0xa3,
                OrdComparison::LE => 0xa4,
            },
            BranchOp::IfACmp(EqComparison::EQ) => 0xa5,
            BranchOp::IfACmp(EqComparison::NE) => 0xa6,
            BranchOp::IfNull(EqComparison::EQ) => 0xc6,
            BranchOp::IfNull(EqComparison::NE) => 0xc7,
        }
    }

    /// Branch taken exactly when this one is not
    pub fn negate(self) -> BranchOp {
        !self
    }

    /// Number of values popped by the test
    pub fn operand_count(self) -> usize {
        match self {
            BranchOp::If(_) | BranchOp::IfNull(_) => 1,
            BranchOp::IfICmp(_) | BranchOp::IfACmp(_) => 2,
        }
    }
}

impl Not for BranchOp {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            BranchOp::If(comp) => BranchOp::If(!comp),
            BranchOp::IfICmp(comp) => BranchOp::IfICmp(!comp),
            BranchOp::IfACmp(comp) => BranchOp::IfACmp(!comp),
            BranchOp::IfNull(comp) => BranchOp::IfNull(!comp),
        }
    }
}

/// Local variable loads and stores
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum LocalOp {
    ILoad,
    LLoad,
    FLoad,
    DLoad,
    ALoad,
    IStore,
    LStore,
    FStore,
    DStore,
    AStore,
}

impl LocalOp {
    /// Opcode of the form taking an index operand
    pub fn opcode(self) -> u8 {
        match self {
            LocalOp::ILoad => 0x15,
            LocalOp::LLoad => 0x16,
            LocalOp::FLoad => 0x17,
            LocalOp::DLoad => 0x18,
            LocalOp::ALoad => 0x19,
            LocalOp::IStore => 0x36,
            LocalOp::LStore => 0x37,
            LocalOp::FStore => 0x38,
            LocalOp::DStore => 0x39,
            LocalOp::AStore => 0x3a,
        }
    }

    /// Opcode of the `_0` short form (the `_1`, `_2`, `_3` forms follow it)
    fn short_form_start(self) -> u8 {
        match self {
            LocalOp::ILoad => 0x1a,
            LocalOp::LLoad => 0x1e,
            LocalOp::FLoad => 0x22,
            LocalOp::DLoad => 0x26,
            LocalOp::ALoad => 0x2a,
            LocalOp::IStore => 0x3b,
            LocalOp::LStore => 0x3f,
            LocalOp::FStore => 0x43,
            LocalOp::DStore => 0x47,
            LocalOp::AStore => 0x4b,
        }
    }

    pub fn is_load(self) -> bool {
        matches!(
            self,
            LocalOp::ILoad | LocalOp::LLoad | LocalOp::FLoad | LocalOp::DLoad | LocalOp::ALoad
        )
    }

    /// Number of local slots read or written
    pub fn slots(self) -> u16 {
        match self {
            LocalOp::LLoad | LocalOp::DLoad | LocalOp::LStore | LocalOp::DStore => 2,
            _ => 1,
        }
    }
}

/// Field access instructions
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

impl FieldOp {
    pub fn opcode(self) -> u8 {
        match self {
            FieldOp::GetStatic => GETSTATIC,
            FieldOp::PutStatic => PUTSTATIC,
            FieldOp::GetField => GETFIELD,
            FieldOp::PutField => PUTFIELD,
        }
    }

    /// Does the instruction pop an object reference?
    pub fn has_receiver(self) -> bool {
        matches!(self, FieldOp::GetField | FieldOp::PutField)
    }
}

/// Type of method to invoke
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    pub fn opcode(self) -> u8 {
        match self {
            InvokeKind::Virtual => INVOKEVIRTUAL,
            InvokeKind::Special => INVOKESPECIAL,
            InvokeKind::Static => INVOKESTATIC,
            InvokeKind::Interface => INVOKEINTERFACE,
        }
    }

    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}

/// Element types for `newarray`
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum NewArrayType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl NewArrayType {
    /// `atype` operand of `newarray`
    pub fn code(self) -> u8 {
        match self {
            NewArrayType::Boolean => 4,
            NewArrayType::Char => 5,
            NewArrayType::Float => 6,
            NewArrayType::Double => 7,
            NewArrayType::Byte => 8,
            NewArrayType::Short => 9,
            NewArrayType::Int => 10,
            NewArrayType::Long => 11,
        }
    }

    pub fn base_type(self) -> BaseType {
        match self {
            NewArrayType::Boolean => BaseType::Boolean,
            NewArrayType::Char => BaseType::Char,
            NewArrayType::Float => BaseType::Float,
            NewArrayType::Double => BaseType::Double,
            NewArrayType::Byte => BaseType::Byte,
            NewArrayType::Short => BaseType::Short,
            NewArrayType::Int => BaseType::Int,
            NewArrayType::Long => BaseType::Long,
        }
    }
}

impl From<BaseType> for NewArrayType {
    fn from(base_type: BaseType) -> NewArrayType {
        match base_type {
            BaseType::Boolean => NewArrayType::Boolean,
            BaseType::Char => NewArrayType::Char,
            BaseType::Float => NewArrayType::Float,
            BaseType::Double => NewArrayType::Double,
            BaseType::Byte => NewArrayType::Byte,
            BaseType::Short => NewArrayType::Short,
            BaseType::Int => NewArrayType::Int,
            BaseType::Long => NewArrayType::Long,
        }
    }
}

/* The load/store instructions follow the same pattern:
 *
 *   - short form (0-3) have special bytes
 *   - normal form (0-255) use `iload` plus a byte operand
 *   - wide form (255-65535) use `wide iload` plus two byte operands
 */
pub fn encode_local<W: BytecodeWriter>(writer: &mut W, op: LocalOp, index: u16) -> IoResult<()> {
    match u8::try_from(index) {
        Ok(n @ 0..=3) => (op.short_form_start() + n).serialize(writer),
        Ok(n) => {
            op.opcode().serialize(writer)?;
            n.serialize(writer)
        }
        Err(_) => {
            WIDE.serialize(writer)?;
            op.opcode().serialize(writer)?;
            index.serialize(writer)
        }
    }
}

/// Push a constant from the pool, picking `ldc`, `ldc_w`, or `ldc2_w`
pub fn encode_ldc<W: BytecodeWriter>(
    writer: &mut W,
    index: ConstantIndex,
    two_slot: bool,
) -> IoResult<()> {
    if two_slot {
        LDC2_W.serialize(writer)?;
        index.serialize(writer)
    } else if let Ok(n) = u8::try_from(index.0) {
        LDC.serialize(writer)?;
        n.serialize(writer)
    } else {
        LDC_W.serialize(writer)?;
        index.serialize(writer)
    }
}

/// Instruction with a 2-byte constant pool index operand
pub fn encode_cp<W: BytecodeWriter>(
    writer: &mut W,
    opcode: u8,
    index: impl Into<ConstantIndex>,
) -> IoResult<()> {
    opcode.serialize(writer)?;
    index.into().serialize(writer)
}

/// `invokeinterface`, whose `count` includes the receiver and counts long/double twice
pub fn encode_invokeinterface<W: BytecodeWriter>(
    writer: &mut W,
    index: impl Into<ConstantIndex>,
    count: u8,
) -> IoResult<()> {
    INVOKEINTERFACE.serialize(writer)?;
    index.into().serialize(writer)?;
    count.serialize(writer)?;
    0u8.serialize(writer)
}

/// Jump with a 2-byte offset, which is relative to the position of `from`
pub fn encode_branch<W: BytecodeWriter>(
    writer: &mut W,
    opcode: u8,
    from: SynLabel,
    to: SynLabel,
) -> Result<(), Error> {
    let offset = writer.branch_offset(from, to)?;
    opcode.serialize(writer)?;
    offset.serialize(writer)?;
    Ok(())
}
