use crate::util::{OffsetVec, Width};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Result;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - every multi-byte integer is big-endian
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

macro_rules! serialize_big_endian {
    ($($int:ty => $method:ident),* $(,)?) => {
        $(
            impl Serialize for $int {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                    writer.$method::<BigEndian>(*self)
                }
            }
        )*
    };
}

serialize_big_endian! {
    u16 => write_u16,
    u32 => write_u32,
    u64 => write_u64,
    i16 => write_i16,
    i32 => write_i32,
    i64 => write_i64,
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

/// Size in `u16` is the first thing serialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

/// The constant pool count is the next free offset, not the number of entries
impl<A: Serialize + Width> Serialize for OffsetVec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.offset_len().0 as u16).serialize(writer)?;
        for elem in self.values() {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}
