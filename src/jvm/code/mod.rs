//! Bytecode representation and generation
//!
//! ### Structure
//!
//! Method bodies get built as [`Expr`] trees: typed, immutable, and cheap to share. Leaves are the
//! [instructions][0] themselves (see [`opcodes`]), and inner nodes add structure: sequencing,
//! branches, jumps to labels, exception handlers, and source line information.
//!
//! ### Code generation
//!
//! Since the encoded size of an instruction can depend on where it ends up (eg. through branch
//! offsets), bytes are produced by walking the same tree several times with different
//! [`BytecodeWriter`]s. Once the layout is fixed, the tree is walked again to compute the stack
//! map frames (see [`crate::jvm::verifier`]) and the line number table. [`MethodCode`] runs all of
//! these walks in order and produces the `Code` attribute.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-6.html#jvms-6.5

mod expr;
mod label;
mod line_numbers;
mod method_code;
pub mod opcodes;
mod writer;

pub use expr::*;
pub use label::*;
pub use line_numbers::*;
pub use method_code::*;
pub use opcodes::{
    encode_local, BranchOp, EqComparison, FieldOp, Instruction, InvokeKind, LocalOp,
    NewArrayType, OrdComparison,
};
pub use writer::*;
