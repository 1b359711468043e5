//! Stack map frames
//!
//! For any specific instruction inside a method body, the stack and locals must have the same
//! structure regardless of which control flow reached that instruction. That structure is the
//! _stack map frame_ (represented using [`Frame`]), and the frames for every jump target in a
//! method make up the _stack map table_.
//!
//! The JVM checks method bodies by [type-checking][0] against that table, so every `Code`
//! attribute carries one. Inferring the table means simulating every instruction on "types"
//! (represented using [`VerificationType`]) that are slightly augmented to take into account
//! initialization and null. Where several paths meet, their frames are merged: any slot where the
//! paths disagree becomes `Top`.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1

mod frame;
mod stack_map;
mod types;

pub use frame::*;
pub use stack_map::*;
pub use types::*;
