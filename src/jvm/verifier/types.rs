use crate::jvm::class_file::{ClassConstantIndex, ConstantPoolError, ConstantsPool};
use crate::jvm::{BaseType, BinaryName, FieldType, RefType, Serialize};
use crate::util::Width;
use byteorder::WriteBytesExt;

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable slot: unset local, second half of a wide local, or a merge of incompatible types
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called but `<init>` has not
    ///
    /// `U` is the offset of the `new` instruction from the start of the method body.
    Uninitialized(U),
}

/// Verification type as tracked while walking method code: class names are not yet interned
pub type VType = VerificationType<RefType<BinaryName>, u16>;

/// Verification type as it goes on the wire
pub type WireVType = VerificationType<ClassConstantIndex, u16>;

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Object(_)
                | VerificationType::Uninitialized(_)
        )
    }

    pub fn map<C2, U2>(
        &self,
        map_class: impl Fn(&Cls) -> C2,
        map_uninitialized: impl Fn(&U) -> U2,
    ) -> VerificationType<C2, U2> {
        match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)),
            VerificationType::Uninitialized(uninit) => {
                VerificationType::Uninitialized(map_uninitialized(uninit))
            }
        }
    }
}

impl<Cls: PartialEq + Clone, U: PartialEq + Clone> VerificationType<Cls, U> {
    /// Least upper bound, coarsened: any mismatch becomes `Top`
    ///
    /// Two different object types also become `Top` rather than their common superclass, since
    /// there is no class hierarchy to consult.
    pub fn union(&self, other: &Self) -> Self {
        if self == other {
            self.clone()
        } else {
            VerificationType::Top
        }
    }

    /// Slot-wise union of two lists, where the tail of the longer list unions with `Top`
    pub fn union_all(left: &[Self], right: &[Self]) -> Vec<Self> {
        let len = left.len().max(right.len());
        (0..len)
            .map(|i| match (left.get(i), right.get(i)) {
                (Some(l), Some(r)) => l.union(r),
                _ => VerificationType::Top,
            })
            .collect()
    }
}

impl VType {
    /// Intern class names in the constants pool
    pub fn resolve(&self, constants: &mut ConstantsPool) -> Result<WireVType, ConstantPoolError> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(ref_type) => {
                VerificationType::Object(constants.get_class(ref_type)?)
            }
            VerificationType::Uninitialized(off) => VerificationType::Uninitialized(*off),
        })
    }
}

impl<C, U> From<FieldType<C>> for VerificationType<RefType<C>, U> {
    fn from(field_type: FieldType<C>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl Serialize for WireVType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn object(name: BinaryName) -> VType {
        VerificationType::Object(RefType::Object(name))
    }

    #[test]
    fn union_coarsens_to_top() {
        assert_eq!(
            VType::Integer.union(&VType::Integer),
            VerificationType::Integer
        );
        assert_eq!(VType::Integer.union(&VType::Float), VerificationType::Top);
        assert_eq!(
            object(BinaryName::STRING).union(&object(BinaryName::STRING)),
            object(BinaryName::STRING)
        );
        assert_eq!(
            object(BinaryName::STRING).union(&object(BinaryName::OBJECT)),
            VerificationType::Top
        );
        assert_eq!(VType::Null.union(&object(BinaryName::OBJECT)), VerificationType::Top);
        assert_eq!(VType::Top.union(&VType::Top), VerificationType::Top);
    }

    #[test]
    fn union_of_lists() {
        let left = vec![VType::Integer, VType::Float, VType::Long];
        let right = vec![VType::Integer, VType::Integer];
        assert_eq!(
            VType::union_all(&left, &right),
            vec![VType::Integer, VType::Top, VType::Top]
        );
        assert_eq!(VType::union_all(&right, &left), VType::union_all(&left, &right));
    }

    #[test]
    fn resolve_interns_classes() {
        let mut pool = ConstantsPool::new();
        let resolved = object(BinaryName::STRING).resolve(&mut pool).unwrap();
        let again = object(BinaryName::STRING).resolve(&mut pool).unwrap();
        assert_eq!(resolved, again);
        assert_eq!(
            VType::Uninitialized(12).resolve(&mut pool).unwrap(),
            WireVType::Uninitialized(12)
        );
        assert_eq!(VType::Long.resolve(&mut pool).unwrap(), WireVType::Long);
    }
}
