use crate::jvm::code::{Expr, Instruction, LocalOp, NewArrayType};
use crate::jvm::descriptors::{ParseDescriptor, RenderDescriptor};
use crate::jvm::verifier::VType;
use crate::jvm::{BaseType, BinaryName, Error, FieldType, MethodDescriptor, RefType};
use crate::util::Width;

/// Type of the value an expression leaves on the stack
///
/// This is a field type extended with `void`, which is the type of expressions that leave nothing
/// behind. Each type knows which instructions load, store, return, pop, or allocate arrays of it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum JavaType {
    Void,
    Base(BaseType),
    Object(RefType),
}

impl JavaType {
    pub const BOOLEAN: JavaType = JavaType::Base(BaseType::Boolean);
    pub const BYTE: JavaType = JavaType::Base(BaseType::Byte);
    pub const CHAR: JavaType = JavaType::Base(BaseType::Char);
    pub const SHORT: JavaType = JavaType::Base(BaseType::Short);
    pub const INT: JavaType = JavaType::Base(BaseType::Int);
    pub const LONG: JavaType = JavaType::Base(BaseType::Long);
    pub const FLOAT: JavaType = JavaType::Base(BaseType::Float);
    pub const DOUBLE: JavaType = JavaType::Base(BaseType::Double);
    pub const OBJECT: JavaType = JavaType::Object(RefType::Object(BinaryName::OBJECT));
    pub const STRING: JavaType = JavaType::Object(RefType::Object(BinaryName::STRING));
    pub const CLASS: JavaType = JavaType::Object(RefType::Object(BinaryName::CLASS));

    /// Type given to `aconst_null`
    pub const NULL_TYPE: JavaType = JavaType::OBJECT;

    pub fn object(class: BinaryName) -> JavaType {
        JavaType::Object(RefType::Object(class))
    }

    /// Type of a method's result (`None` is `void`)
    pub fn from_return_type(return_type: Option<FieldType>) -> JavaType {
        match return_type {
            None => JavaType::Void,
            Some(field_type) => JavaType::from(field_type),
        }
    }

    /// Parse a field descriptor, or `V`
    pub fn from_descriptor(descriptor: &str) -> Result<JavaType, Error> {
        if descriptor == "V" {
            Ok(JavaType::Void)
        } else {
            FieldType::parse(descriptor).map(JavaType::from)
        }
    }

    /// Types of the arguments of a method descriptor
    pub fn arg_types(method_descriptor: &str) -> Result<Vec<JavaType>, Error> {
        let descriptor: MethodDescriptor = MethodDescriptor::parse(method_descriptor)?;
        Ok(descriptor
            .parameters
            .into_iter()
            .map(JavaType::from)
            .collect())
    }

    /// Number of argument slots of a method descriptor (long and double count twice)
    pub fn arg_slots(method_descriptor: &str) -> Result<usize, Error> {
        let descriptor: MethodDescriptor = MethodDescriptor::parse(method_descriptor)?;
        Ok(descriptor.parameter_length(false))
    }

    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            JavaType::Void => None,
            JavaType::Base(base_type) => Some(FieldType::Base(*base_type)),
            JavaType::Object(ref_type) => Some(FieldType::Ref(ref_type.clone())),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, JavaType::Void)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, JavaType::Object(_))
    }

    /// Number of stack or local slots taken by a value of this type
    pub fn slots(&self) -> usize {
        match self {
            JavaType::Void => 0,
            JavaType::Base(base_type) => base_type.width(),
            JavaType::Object(_) => 1,
        }
    }

    /// Descriptor of the type, with `V` for void
    pub fn descriptor(&self) -> String {
        match self.field_type() {
            None => String::from("V"),
            Some(field_type) => field_type.render(),
        }
    }

    /// Descriptor of the type in an argument list, where void arguments are just omitted
    pub fn arg_descriptor(&self) -> String {
        match self.field_type() {
            None => String::new(),
            Some(field_type) => field_type.render(),
        }
    }

    /// Verification type of a value of this type, if there is a value
    pub fn vtype(&self) -> Option<VType> {
        self.field_type().map(VType::from)
    }

    /// Array with elements of this type (there are no arrays of void, so that's just an object)
    pub fn array(&self) -> JavaType {
        match self.field_type() {
            None => JavaType::OBJECT,
            Some(field_type) => JavaType::Object(RefType::array(field_type)),
        }
    }

    /// Load the local variable at `index`
    pub fn load(&self, index: u16) -> Expr {
        match self {
            JavaType::Void => Expr::UNIT,
            JavaType::Base(BaseType::Long) => Expr::lload(index),
            JavaType::Base(BaseType::Float) => Expr::fload(index),
            JavaType::Base(BaseType::Double) => Expr::dload(index),
            JavaType::Base(_) => Expr::local(LocalOp::ILoad, index, self.clone()),
            JavaType::Object(_) => Expr::aload(index, self.clone()),
        }
    }

    /// Store the top of the stack into the local variable at `index`
    pub fn store(&self, index: u16) -> Expr {
        match self {
            JavaType::Void => Expr::UNIT,
            JavaType::Base(BaseType::Long) => Expr::lstore(index),
            JavaType::Base(BaseType::Float) => Expr::fstore(index),
            JavaType::Base(BaseType::Double) => Expr::dstore(index),
            JavaType::Base(_) => Expr::istore(index),
            JavaType::Object(_) => Expr::astore(index),
        }
    }

    /// Discard a value of this type from the stack
    pub fn pop(&self) -> Expr {
        match self.slots() {
            0 => Expr::UNIT,
            1 => Expr::op(Instruction::Pop),
            _ => Expr::op(Instruction::Pop2),
        }
    }

    /// Return a value of this type from the current method
    pub fn return_expr(&self) -> Expr {
        Expr::op(match self {
            JavaType::Void => Instruction::Return,
            JavaType::Base(BaseType::Long) => Instruction::LReturn,
            JavaType::Base(BaseType::Float) => Instruction::FReturn,
            JavaType::Base(BaseType::Double) => Instruction::DReturn,
            JavaType::Base(_) => Instruction::IReturn,
            JavaType::Object(_) => Instruction::AReturn,
        })
    }

    /// Allocate an array of this type, using the length on the stack
    pub fn new_array(&self) -> Expr {
        match self {
            JavaType::Void => Expr::op(Instruction::Pop).and_then(Expr::op(Instruction::AConstNull)),
            JavaType::Base(base_type) => Expr::newarray(NewArrayType::from(*base_type)),
            JavaType::Object(ref_type) => Expr::anewarray(ref_type.clone()),
        }
    }

    /// Load an element of type from an array, using the array and index on the stack
    pub fn array_load(&self) -> Expr {
        let instruction = match self {
            JavaType::Void => {
                return Expr::op(Instruction::Pop).and_then(Expr::op(Instruction::Pop));
            }
            JavaType::Object(_) => return Expr::aaload(self.clone()),
            JavaType::Base(BaseType::Boolean) | JavaType::Base(BaseType::Byte) => {
                Instruction::BALoad
            }
            JavaType::Base(BaseType::Char) => Instruction::CALoad,
            JavaType::Base(BaseType::Short) => Instruction::SALoad,
            JavaType::Base(BaseType::Int) => Instruction::IALoad,
            JavaType::Base(BaseType::Long) => Instruction::LALoad,
            JavaType::Base(BaseType::Float) => Instruction::FALoad,
            JavaType::Base(BaseType::Double) => Instruction::DALoad,
        };
        Expr::op(instruction).is(self.clone())
    }

    /// Store an element of this type into an array, using the array, index, and value on the
    /// stack
    pub fn array_store(&self) -> Expr {
        Expr::op(match self {
            JavaType::Void => {
                return Expr::op(Instruction::Pop).and_then(Expr::op(Instruction::Pop));
            }
            JavaType::Object(_) => Instruction::AAStore,
            JavaType::Base(BaseType::Boolean) | JavaType::Base(BaseType::Byte) => {
                Instruction::BAStore
            }
            JavaType::Base(BaseType::Char) => Instruction::CAStore,
            JavaType::Base(BaseType::Short) => Instruction::SAStore,
            JavaType::Base(BaseType::Int) => Instruction::IAStore,
            JavaType::Base(BaseType::Long) => Instruction::LAStore,
            JavaType::Base(BaseType::Float) => Instruction::FAStore,
            JavaType::Base(BaseType::Double) => Instruction::DAStore,
        })
    }
}

impl From<FieldType> for JavaType {
    fn from(field_type: FieldType) -> JavaType {
        match field_type {
            FieldType::Base(base_type) => JavaType::Base(base_type),
            FieldType::Ref(ref_type) => JavaType::Object(ref_type),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn descriptors() {
        assert_eq!(JavaType::Void.descriptor(), "V");
        assert_eq!(JavaType::Void.arg_descriptor(), "");
        assert_eq!(JavaType::LONG.descriptor(), "J");
        assert_eq!(JavaType::STRING.descriptor(), "Ljava/lang/String;");
        assert_eq!(JavaType::INT.array().descriptor(), "[I");
        assert_eq!(JavaType::Void.array(), JavaType::OBJECT);
        assert_eq!(
            JavaType::from_descriptor("[Ljava/lang/Object;").unwrap(),
            JavaType::OBJECT.array()
        );
        assert_eq!(JavaType::from_descriptor("V").unwrap(), JavaType::Void);
        assert!(JavaType::from_descriptor("Q").is_err());
    }

    #[test]
    fn argument_slots() {
        assert_eq!(
            JavaType::arg_types("(IJLjava/lang/String;)V").unwrap(),
            vec![JavaType::INT, JavaType::LONG, JavaType::STRING]
        );
        assert_eq!(JavaType::arg_slots("(IJLjava/lang/String;D)V").unwrap(), 6);
        assert_eq!(JavaType::arg_slots("()I").unwrap(), 0);
    }

    #[test]
    fn void_special_cases() {
        assert!(JavaType::Void.load(3).is_unit());
        assert!(JavaType::Void.store(3).is_unit());
        assert!(JavaType::Void.pop().is_unit());
        assert_eq!(JavaType::Void.slots(), 0);
        assert_eq!(JavaType::Void.vtype(), None);
        assert_eq!(JavaType::Void.new_array().ty(), &JavaType::NULL_TYPE);
        assert_eq!(JavaType::Void.array_load().ty(), &JavaType::Void);
    }

    #[test]
    fn instruction_selection() {
        assert_eq!(JavaType::DOUBLE.pop().ty(), &JavaType::Void);
        assert_eq!(JavaType::BOOLEAN.load(1).ty(), &JavaType::BOOLEAN);
        assert_eq!(JavaType::BYTE.array_load().ty(), &JavaType::BYTE);
        assert_eq!(JavaType::STRING.array_load().ty(), &JavaType::STRING);
        assert_eq!(JavaType::INT.new_array().ty(), &JavaType::INT.array());
        assert_eq!(JavaType::STRING.new_array().ty(), &JavaType::STRING.array());
    }
}
