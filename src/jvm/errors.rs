use super::class_file::{Constant, ConstantPoolError};
use super::code::SynLabel;
use thiserror::Error;

const SPLIT_ADVICE: &str =
    "To solve this, you might simplify the code or split it up into several smaller methods.";

#[derive(Debug, Error)]
pub enum Error {
    /// Method body is longer than the 65535 bytes a `Code` attribute can hold
    #[error("Code of method `{method}` is too large ({size} bytes). {}", SPLIT_ADVICE)]
    CodeTooLarge { method: String, size: usize },

    /// A jump in the method doesn't fit a signed 16-bit offset
    #[error("Branch offset {offset} in method `{method}` is out of range. {}", SPLIT_ADVICE)]
    BranchOffsetOverflow { method: String, offset: i64 },

    /// An `invokeinterface` passes more than 255 argument slots
    #[error(
        "Call to interface method `{method}` passes {count} argument slots (at most 255). {}",
        SPLIT_ADVICE
    )]
    InterfaceCallArgOverflow { method: String, count: usize },

    #[error("Constant pool is full: cannot add {constant:?} at offset {offset}")]
    ConstantPoolOverflow { constant: Constant, offset: usize },

    /// A string, name, or descriptor is longer than a utf8 constant can hold
    #[error("Constant string is {length} bytes in modified UTF-8, at most 65535 are allowed")]
    Utf8TooLong { length: usize },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A label position was read before the layout phase that sets it
    #[error("Label {0:?} has not been placed")]
    LabelNotPlaced(SynLabel),

    /// The same label is placed twice within one layout pass (indicates a bug)
    #[error("Label {0:?} is placed more than once")]
    DuplicateLabel(SynLabel),

    /// A label's position grew between layout phases (indicates a bug)
    #[error("Label {label:?} moved from {expected} to {actual}")]
    LabelMoved {
        label: SynLabel,
        expected: u32,
        actual: u32,
    },

    /// Error trying to compute stack map frames
    #[error("Verifier error at bytecode offset {position}: {kind}")]
    VerifierError {
        position: u32,
        kind: VerifierErrorKind,
    },

    #[error("Bad descriptor: {0}")]
    BadDescriptor(String),

    #[error("Bad name: {0}")]
    BadName(String),

    /// Structural mutation of a class that has already been serialized
    #[error("Class `{0}` is already finished")]
    ClassFinished(String),
}

#[derive(Debug, Error)]
pub enum VerifierErrorKind {
    #[error("the operand stack is empty")]
    EmptyStack,

    #[error("expected a value of width {0}")]
    InvalidWidth(usize),

    #[error("unexpected value type")]
    InvalidType,

    #[error("local variable index is out of range")]
    InvalidIndex,

    #[error("incompatible stack heights at a merge point")]
    IncompatibleStacks,

    #[error("bad descriptor: {0}")]
    BadDescriptor(String),
}

impl From<ConstantPoolError> for Error {
    fn from(error: ConstantPoolError) -> Error {
        match error {
            ConstantPoolError::Overflow { constant, offset } => {
                Error::ConstantPoolOverflow { constant, offset }
            }
            ConstantPoolError::Utf8TooLong { length } => Error::Utf8TooLong { length },
        }
    }
}
