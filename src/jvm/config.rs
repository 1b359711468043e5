use crate::jvm::class_file::Version;

/// Settings threaded through [`ExprBuilder`] and [`ClassBuilder`]
///
/// [`ExprBuilder`]: super::code::ExprBuilder
/// [`ClassBuilder`]: super::ClassBuilder
#[derive(Clone, Debug)]
pub struct AssemblerConfig {
    /// Emit `ldc "message"; pop` for comments
    ///
    /// This is only useful when reading generated bytecode with `javap -c`: the messages show up
    /// next to the instructions they describe.
    pub emit_comments: bool,

    /// Class file version written in the header
    pub version: Version,

    /// Rewrite a `checkcast` to `nop`s when the value is already known to have that type
    pub elide_redundant_casts: bool,
}

impl Default for AssemblerConfig {
    fn default() -> AssemblerConfig {
        AssemblerConfig {
            emit_comments: false,
            version: Version::JAVA7,
            elide_redundant_casts: true,
        }
    }
}
