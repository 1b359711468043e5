//! Assemble JVM class files from typed instruction trees
//!
//! The entry points are [`jvm::ClassBuilder`] (one per class file) and [`jvm::code::ExprBuilder`]
//! (for the parts of an instruction tree that need fresh labels). Method bodies are described
//! as [`jvm::code::Expr`] trees, laid out in three passes, and annotated with the stack map
//! frames that the JVM verifier requires.

pub mod jvm;
pub mod util;
