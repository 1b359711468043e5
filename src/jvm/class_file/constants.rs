use crate::jvm::class_file::{Attribute, AttributeLike};
use crate::jvm::descriptors::RenderDescriptor;
use crate::jvm::{BinaryName, Error, FieldType, MethodDescriptor, RefType, Serialize};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::collections::BTreeMap;

/// Class file constants pool builder
///
/// Constants are interned: asking for a constant that is structurally equal to one already in the
/// pool returns the existing index. Lookup goes through an ordered map (so pool construction never
/// depends on hashing), while the wire order is the order in which constants were first requested.
///
/// Composite constants (class, string, name & type, member refs) hold the indices of their
/// components, so every component is interned before the constant that refers to it.
/// Longest modified UTF-8 encoding a utf8 constant can hold
pub const MAX_UTF8_LENGTH: usize = u16::MAX as usize;

#[derive(Debug)]
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,
    lookup: BTreeMap<Constant, ConstantIndex>,
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            lookup: BTreeMap::new(),
        }
    }

    /// Reuse an existing equal constant or push a new one, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn get_or_push(&mut self, constant: Constant) -> Result<ConstantIndex, ConstantPoolError> {
        if let Some(idx) = self.lookup.get(&constant) {
            return Ok(*idx);
        }

        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(ConstantPoolError::Overflow { constant, offset });
        }

        let idx = ConstantIndex(offset as u16);
        self.lookup.insert(constant.clone(), idx);
        self.constants.push(constant);
        Ok(idx)
    }

    /// Constants in wire order
    pub fn constants(&self) -> &OffsetVec<Constant> {
        &self.constants
    }

    /// Look up the constant at some index
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get_offset(Offset(index.0 as usize))
    }

    /// Next free index (also the `constant_pool_count` that goes on the wire)
    pub fn next_index(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    /// Get or insert a utf8 constant
    ///
    /// The length limit applies to the modified UTF-8 encoding, which can be up to three times
    /// longer than the number of characters.
    pub fn get_utf8(
        &mut self,
        utf8: impl AsRef<str>,
    ) -> Result<Utf8ConstantIndex, ConstantPoolError> {
        let length = modified_utf8_length(utf8.as_ref());
        if length > MAX_UTF8_LENGTH {
            return Err(ConstantPoolError::Utf8TooLong { length });
        }
        let constant = Constant::Utf8(String::from(utf8.as_ref()));
        self.get_or_push(constant).map(Utf8ConstantIndex)
    }

    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, ConstantPoolError> {
        self.get_or_push(Constant::Integer(integer))
    }

    /// Floats are interned by bit pattern, so `0.0` and `-0.0` (or two different NaNs) are
    /// distinct constants
    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, ConstantPoolError> {
        self.get_or_push(Constant::Float(float.to_bits()))
    }

    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, ConstantPoolError> {
        self.get_or_push(Constant::Long(long))
    }

    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, ConstantPoolError> {
        self.get_or_push(Constant::Double(double.to_bits()))
    }

    /// Get or insert a string constant (and the utf8 constant it refers to)
    pub fn get_string(
        &mut self,
        string: impl AsRef<str>,
    ) -> Result<StringConstantIndex, ConstantPoolError> {
        let utf8 = self.get_utf8(string)?;
        self.get_or_push(Constant::String(utf8))
            .map(StringConstantIndex)
    }

    /// Get or insert a class constant
    ///
    /// When making a `CONSTANT_Class_info`, reference types are almost always objects. However,
    /// there are a handful of places where an array type needs to be fit in (eg. for a
    /// `checkcast` to an array type). See [the JVMS section on class constants][0] for more.
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4.1
    pub fn get_class(
        &mut self,
        class: &RefType<BinaryName>,
    ) -> Result<ClassConstantIndex, ConstantPoolError> {
        let name = self.get_utf8(class.class_name())?;
        self.get_or_push(Constant::Class(name))
            .map(ClassConstantIndex)
    }

    /// Get or insert a name & type constant
    pub fn get_name_and_type(
        &mut self,
        name: impl AsRef<str>,
        descriptor: impl AsRef<str>,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolError> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        self.get_or_push(Constant::NameAndType { name, descriptor })
            .map(NameAndTypeConstantIndex)
    }

    /// Get or insert a `CONSTANT_Fieldref_info`
    pub fn get_field_ref(
        &mut self,
        class: &BinaryName,
        name: impl AsRef<str>,
        descriptor: &FieldType,
    ) -> Result<FieldRefConstantIndex, ConstantPoolError> {
        let class = self.get_class(&RefType::Object(class.clone()))?;
        let name_and_type = self.get_name_and_type(name, descriptor.render())?;
        self.get_or_push(Constant::FieldRef {
            class,
            name_and_type,
        })
        .map(FieldRefConstantIndex)
    }

    /// Get or insert a `CONSTANT_Methodref_info`
    ///
    /// The class is a reference type since methods such as `clone` can be invoked on arrays.
    pub fn get_method_ref(
        &mut self,
        class: &RefType<BinaryName>,
        name: impl AsRef<str>,
        descriptor: &MethodDescriptor,
    ) -> Result<MethodRefConstantIndex, ConstantPoolError> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor.render())?;
        self.get_or_push(Constant::MethodRef {
            class,
            name_and_type,
        })
        .map(MethodRefConstantIndex)
    }

    /// Get or insert a `CONSTANT_InterfaceMethodref_info`
    pub fn get_interface_method_ref(
        &mut self,
        class: &BinaryName,
        name: impl AsRef<str>,
        descriptor: &MethodDescriptor,
    ) -> Result<MethodRefConstantIndex, ConstantPoolError> {
        let class = self.get_class(&RefType::Object(class.clone()))?;
        let name_and_type = self.get_name_and_type(name, descriptor.render())?;
        self.get_or_push(Constant::InterfaceMethodRef {
            class,
            name_and_type,
        })
        .map(MethodRefConstantIndex)
    }

    /// Get or insert a constant that `ldc`, `ldc_w`, or `ldc2_w` can push
    pub fn get_loadable(
        &mut self,
        constant: &LoadableConstant,
    ) -> Result<ConstantIndex, ConstantPoolError> {
        match constant {
            LoadableConstant::Integer(i) => self.get_integer(*i),
            LoadableConstant::Float(f) => self.get_float(*f),
            LoadableConstant::Long(l) => self.get_long(*l),
            LoadableConstant::Double(d) => self.get_double(*d),
            LoadableConstant::String(s) => self.get_string(s).map(|idx| idx.0),
            LoadableConstant::Class(cls) => self.get_class(cls).map(|idx| idx.0),
        }
    }

    /// Serialize an attribute, interning its name
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }
}

impl Default for ConstantsPool {
    fn default() -> ConstantsPool {
        ConstantsPool::new()
    }
}

#[derive(Debug)]
pub enum ConstantPoolError {
    /// No index left for the constant
    Overflow { constant: Constant, offset: usize },

    /// Utf8 constant longer than its `u2` length field can describe
    Utf8TooLong { length: usize },
}

/// Constants as in the constant pool
///
/// Variants are declared in tag order, so the derived ordering compares tags first and then
/// content. Floating point values are kept as their bit patterns so that they can be ordered.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Constant {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(u32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(u64),

    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    FieldRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    InterfaceMethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => 1,
            Constant::Integer(_) => 3,
            Constant::Float(_) => 4,
            Constant::Long(_) => 5,
            Constant::Double(_) => 6,
            Constant::Class(_) => 7,
            Constant::String(_) => 8,
            Constant::FieldRef { .. } => 9,
            Constant::MethodRef { .. } => 10,
            Constant::InterfaceMethodRef { .. } => 11,
            Constant::NameAndType { .. } => 12,
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.tag().serialize(writer)?;
        match self {
            Constant::Utf8(string) => {
                let buffer: Vec<u8> = encode_modified_utf8(string);
                let length = u16::try_from(buffer.len()).map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("utf8 constant of {} bytes", buffer.len()),
                    )
                })?;
                length.serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => integer.serialize(writer)?,
            Constant::Float(bits) => bits.serialize(writer)?,
            Constant::Long(long) => long.serialize(writer)?,
            Constant::Double(bits) => bits.serialize(writer)?,
            Constant::Class(name) | Constant::String(name) => name.serialize(writer)?,
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
            }
            | Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVMS:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Constants that can be pushed onto the stack with `ldc` and friends
#[derive(Debug, Clone, PartialEq)]
pub enum LoadableConstant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType<BinaryName>),
}

impl LoadableConstant {
    /// Whether the constant needs `ldc2_w`
    pub fn is_wide(&self) -> bool {
        matches!(self, LoadableConstant::Long(_) | LoadableConstant::Double(_))
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
/// Number of bytes [`encode_modified_utf8`] produces
pub fn modified_utf8_length(string: &str) -> usize {
    string
        .encode_utf16()
        .map(|unit| match unit {
            0x01..=0x7F => 1,
            0x00 | 0x80..=0x7FF => 2,
            _ => 3,
        })
        .sum()
}

pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    let mut units = [0u16; 2];
    for c in string.chars() {
        for unit in c.encode_utf16(&mut units) {
            let code = *unit as u32;
            if code != 0 && code < 0x80 {
                buffer.push(code as u8);
            } else if code < 0x800 {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            } else {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct StringConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct FieldRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct MethodRefConstantIndex(pub ConstantIndex);

macro_rules! typed_constant_index {
    ($($typed:ident),*) => {
        $(
            impl From<$typed> for ConstantIndex {
                fn from(index: $typed) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $typed {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )*
    };
}

typed_constant_index!(
    Utf8ConstantIndex,
    StringConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex
);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}


#[cfg(test)]
mod pool_tests {
    use super::*;

    #[test]
    fn equal_constants_are_interned() {
        let mut pool = ConstantsPool::new();
        let hello1 = pool.get_string("hello").unwrap();
        let world = pool.get_string("world").unwrap();
        let hello2 = pool.get_string("hello").unwrap();
        assert_eq!(hello1, hello2);
        assert_ne!(hello1, world);

        // utf8 "hello", string "hello", utf8 "world", string "world"
        assert_eq!(pool.next_index(), 5);
        assert_eq!(
            pool.get(hello1.0),
            Some(&Constant::String(Utf8ConstantIndex(ConstantIndex(1))))
        );
    }

    #[test]
    fn wide_constants_use_two_slots() {
        let mut pool = ConstantsPool::new();
        assert_eq!(pool.get_integer(1_000_000).unwrap(), ConstantIndex(1));
        assert_eq!(pool.get_long(1).unwrap(), ConstantIndex(2));
        assert_eq!(pool.get_double(2.5).unwrap(), ConstantIndex(4));
        assert_eq!(pool.get_float(2.5).unwrap(), ConstantIndex(6));
        assert_eq!(pool.next_index(), 7);
        assert_eq!(pool.get(ConstantIndex(3)), None);
    }

    #[test]
    fn floats_intern_by_bits() {
        let mut pool = ConstantsPool::new();
        let zero = pool.get_float(0.0).unwrap();
        let neg_zero = pool.get_float(-0.0).unwrap();
        assert_ne!(zero, neg_zero);
        assert_eq!(pool.get_float(f32::NAN).unwrap(), pool.get_float(f32::NAN).unwrap());
    }

    #[test]
    fn member_refs_share_components() {
        let mut pool = ConstantsPool::new();
        let descriptor = MethodDescriptor {
            parameters: vec![FieldType::int()],
            return_type: None,
        };
        let m1 = pool
            .get_method_ref(&RefType::Object(BinaryName::OBJECT), "wait", &descriptor)
            .unwrap();
        let before = pool.next_index();
        let m2 = pool
            .get_method_ref(&RefType::Object(BinaryName::OBJECT), "wait", &descriptor)
            .unwrap();
        assert_eq!(m1, m2);
        assert_eq!(pool.next_index(), before);

        let i1 = pool
            .get_interface_method_ref(&BinaryName::OBJECT, "wait", &descriptor)
            .unwrap();
        assert_ne!(ConstantIndex::from(i1), ConstantIndex::from(m1));
        assert_eq!(pool.next_index(), before + 1);
    }

    #[test]
    fn pool_overflows() {
        let mut pool = ConstantsPool::new();
        for i in 0..(u16::MAX as i32 - 1) {
            pool.get_integer(i).unwrap();
        }
        assert_eq!(pool.next_index(), u16::MAX);
        assert!(matches!(
            pool.get_integer(-1),
            Err(ConstantPoolError::Overflow { offset: 65535, .. })
        ));
        assert!(pool.get_integer(7).is_ok());
    }

    #[test]
    fn utf8_length_is_limited() {
        let mut pool = ConstantsPool::new();
        assert!(pool.get_utf8("a".repeat(MAX_UTF8_LENGTH)).is_ok());
        assert!(matches!(
            pool.get_utf8("a".repeat(70_000)),
            Err(ConstantPoolError::Utf8TooLong { length: 70_000 })
        ));

        // Two bytes per character once encoded
        assert!(matches!(
            pool.get_string("\u{e9}".repeat(40_000)),
            Err(ConstantPoolError::Utf8TooLong { length: 80_000 })
        ));
        assert_eq!(pool.next_index(), 2);
    }

    #[test]
    fn modified_utf8_lengths() {
        for string in ["", "foo", "a\x00a", "ĄǍ", "ऄअ", "\u{10000}\u{10FFFF}"] {
            assert_eq!(modified_utf8_length(string), encode_modified_utf8(string).len());
        }
    }
}
