use crate::jvm::class_file::{Attribute, Constant, Field, Method, Version};
use crate::jvm::{ClassAccessFlags, ClassConstantIndex, Serialize};
use crate::util::OffsetVec;
use byteorder::WriteBytesExt;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug)]
pub struct ClassFile<'a> {
    pub version: Version,
    pub constants: &'a OffsetVec<Constant>,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,
    pub super_class: ClassConstantIndex,
    pub interfaces: &'a [ClassConstantIndex],
    pub fields: &'a [Field],
    pub methods: &'a [Method],
    pub attributes: &'a [Attribute],
}

impl<'a> ClassFile<'a> {
    /// Magic header bytes that go at the front of the serialized class file
    pub const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];
}

fn serialize_slice<A: Serialize, W: WriteBytesExt>(
    elems: &[A],
    writer: &mut W,
) -> std::io::Result<()> {
    (elems.len() as u16).serialize(writer)?;
    for elem in elems {
        elem.serialize(writer)?;
    }
    Ok(())
}

impl<'a> Serialize for ClassFile<'a> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        serialize_slice(self.interfaces, writer)?;
        serialize_slice(self.fields, writer)?;
        serialize_slice(self.methods, writer)?;
        serialize_slice(self.attributes, writer)?;
        Ok(())
    }
}
