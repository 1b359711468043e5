//! JVM class files
//!
//! A class gets built with a [`ClassBuilder`], which owns the constant pool along with the fields,
//! methods, and attributes of the class. Method bodies are [`code::Expr`] trees: the builder lays
//! each one out, computes its stack map frames, and finally serializes the whole [class file][0].
//!
//! ```
//! use jvm_assembler::jvm::code::{Expr, Instruction};
//! use jvm_assembler::jvm::*;
//!
//! let name = BinaryName::from_string("demo/Adder").unwrap();
//! let mut class = ClassBuilder::new(AssemblerConfig::default(), name, None, false).unwrap();
//! class
//!     .add_method(
//!         MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//!         UnqualifiedName::from_string("add").unwrap(),
//!         MethodDescriptor::parse("(II)I").unwrap(),
//!         Expr::iload(0)
//!             .and_then(Expr::iload(1))
//!             .and_then(Expr::op(Instruction::IAdd))
//!             .and_then(Expr::op(Instruction::IReturn)),
//!         2,
//!     )
//!     .unwrap();
//!
//! let bytes = class.bytes().unwrap();
//! assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
//! ```
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html

mod access_flags;
pub mod archive;
mod binary_format;
mod class_builder;
pub mod class_file;
pub mod code;
mod config;
mod descriptors;
mod errors;
mod java_type;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use binary_format::*;
pub use class_builder::*;
pub use class_file::{ClassConstantIndex, ConstantIndex, Utf8ConstantIndex};
pub use config::*;
pub use descriptors::*;
pub use errors::*;
pub use java_type::*;
pub use names::*;
