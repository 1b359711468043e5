use super::Error;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// Names of methods and fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces, with `/` between package segments
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: &str) -> Result<(), Error>;

    /// Wrap a string that has already been validated
    fn from_cow_unchecked(name: Cow<'static, str>) -> Self;

    /// Extract the raw underlying string name
    fn as_str(&self) -> &str;

    /// Try to construct a name from a string
    fn from_string(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        Self::check_valid(&name)?;
        Ok(Self::from_cow_unchecked(Cow::Owned(name)))
    }
}

impl Name for UnqualifiedName {
    fn check_valid(name: &str) -> Result<(), Error> {
        if name.is_empty() {
            Err(Error::BadName(String::from("unqualified name is empty")))
        } else if name.contains(&['.', ';', '[', '/'][..]) {
            Err(Error::BadName(format!(
                "unqualified name '{}' contains an illegal character",
                name
            )))
        } else if name.contains(&['<', '>'][..]) && name != "<init>" && name != "<clinit>" {
            Err(Error::BadName(format!(
                "only '<init>' and '<clinit>' may contain angle brackets, not '{}'",
                name
            )))
        } else {
            Ok(())
        }
    }

    fn from_cow_unchecked(name: Cow<'static, str>) -> Self {
        UnqualifiedName(name)
    }

    fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl Name for BinaryName {
    fn check_valid(name: &str) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::BadName(String::from("binary name is empty")));
        }
        for segment in name.split('/') {
            if segment.is_empty() || segment.contains(&['.', ';', '[', '<', '>'][..]) {
                return Err(Error::BadName(format!(
                    "binary name '{}' has a malformed segment '{}'",
                    name, segment
                )));
            }
        }
        Ok(())
    }

    fn from_cow_unchecked(name: Cow<'static, str>) -> Self {
        BinaryName(name)
    }

    fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Display for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Display for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    // Special unqualified names - only these are allowed to have angle brackets in them
    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");
}

impl BinaryName {
    const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    /// Last segment of the name (`Point` for `me/alec/Point`)
    pub fn simple_name(&self) -> &str {
        let name = self.as_str();
        match name.rfind('/') {
            Some(idx) => &name[idx + 1..],
            None => name,
        }
    }

    /// Relative path of the class file, eg. `me/alec/Point.class`
    pub fn class_file_name(&self) -> String {
        format!("{}.class", self.as_str())
    }

    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const STRING: Self = Self::name("java/lang/String");
    pub const THROWABLE: Self = Self::name("java/lang/Throwable");
}
