//! Wire-level structures of a class file
//!
//! Everything in here is plain data that knows how to [`Serialize`](crate::jvm::Serialize)
//! itself. Building the structures (laying out code, computing frames) happens elsewhere.

mod attribute;
mod class;
mod constants;
mod member;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use member::*;
pub use version::*;
