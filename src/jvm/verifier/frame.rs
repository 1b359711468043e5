use super::{VType, VerificationType, WireVType};
use crate::jvm::class_file::{ConstantPoolError, ConstantsPool, LoadableConstant};
use crate::jvm::code::{BranchOp, ExprKind, FieldOp, Instruction, InvokeKind, LocalOp};
use crate::jvm::{
    BaseType, BinaryName, FieldType, JavaType, MethodDescriptor, RefType, UnqualifiedName,
    VerifierErrorKind,
};
use crate::util::{OffsetVec, Width};

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Locals are indexed by slot: a `long` or `double` at slot `i` is followed by `Top` at slot
/// `i + 1`. The stack is an [`OffsetVec`], so its offset length is the stack height in slots.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame {
    /// Local variables, one entry per slot
    pub locals: Vec<VType>,

    /// Types of values on the stack
    pub stack: OffsetVec<VType>,
}

impl Frame {
    /// Frame at the start of a method, with the given argument types in the first local slots
    pub fn new(arguments: impl IntoIterator<Item = VType>) -> Frame {
        let mut locals = vec![];
        for argument in arguments {
            let wide = argument.width() == 2;
            locals.push(argument);
            if wide {
                locals.push(VerificationType::Top);
            }
        }
        Frame {
            locals,
            stack: OffsetVec::new(),
        }
    }

    /// Same locals, but with a different stack (eg. the exception in a handler)
    pub fn with_stack(&self, stack: impl IntoIterator<Item = VType>) -> Frame {
        Frame {
            locals: self.locals.clone(),
            stack: stack.into_iter().collect(),
        }
    }

    /// Stack height in slots
    pub fn stack_slots(&self) -> usize {
        self.stack.total_width()
    }

    /// Assign a type to a local, growing the locals with `Top` as needed
    ///
    /// Overwriting either half of a wide local invalidates the other half.
    pub fn store_local(&mut self, index: u16, vtype: VType) {
        let index = index as usize;
        let width = vtype.width();
        if self.locals.len() < index + width {
            self.locals.resize(index + width, VerificationType::Top);
        }
        if index > 0 && self.locals[index - 1].width() == 2 {
            self.locals[index - 1] = VerificationType::Top;
        }
        if self.locals[index].width() == 2 && width == 1 {
            if let Some(second_half) = self.locals.get_mut(index + 1) {
                *second_half = VerificationType::Top;
            }
        }
        self.locals[index] = vtype;
        if width == 2 {
            self.locals[index + 1] = VerificationType::Top;
        }
    }

    /// Merge of two frames reaching the same position
    ///
    /// Locals that disagree become `Top`. Stacks must have the same shape.
    pub fn union(&self, other: &Frame) -> Result<Frame, VerifierErrorKind> {
        if self.stack.len() != other.stack.len() {
            return Err(VerifierErrorKind::IncompatibleStacks);
        }
        let mut stack = OffsetVec::new();
        for (left, right) in self.stack.values().zip(other.stack.values()) {
            if left.width() != right.width() {
                return Err(VerifierErrorKind::IncompatibleStacks);
            }
            stack.push(left.union(right));
        }
        Ok(Frame {
            locals: VerificationType::union_all(&self.locals, &other.locals),
            stack,
        })
    }

    /// Locals and stack as they go into a `full_frame`
    ///
    /// Wide locals take one entry (not two) and trailing `Top` locals are left out.
    pub fn full_frame(
        &self,
        constants: &mut ConstantsPool,
    ) -> Result<(Vec<WireVType>, Vec<WireVType>), ConstantPoolError> {
        let mut locals = vec![];
        let mut slot = 0;
        while let Some(local) = self.locals.get(slot) {
            locals.push(local.resolve(constants)?);
            slot += local.width();
        }
        while let Some(VerificationType::Top) = locals.last() {
            locals.pop();
        }

        let stack = self
            .stack
            .values()
            .map(|vtype| vtype.resolve(constants))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((locals, stack))
    }

    /// Pop the operands of a conditional branch
    pub fn branch(&mut self, op: BranchOp) -> Result<(), VerifierErrorKind> {
        let stack = &mut self.stack;
        match op {
            BranchOp::If(_) => pop_offset_vec_expecting_type(stack, VerificationType::Integer),
            BranchOp::IfICmp(_) => {
                pop_offset_vec_expecting_type(stack, VerificationType::Integer)?;
                pop_offset_vec_expecting_type(stack, VerificationType::Integer)
            }
            BranchOp::IfACmp(_) => {
                pop_reference(stack)?;
                pop_reference(stack).map(|_| ())
            }
            BranchOp::IfNull(_) => pop_reference(stack).map(|_| ()),
        }
    }

    /// Simulate a leaf of an instruction tree
    ///
    /// `declared` is the type the tree node claims to leave on the stack, `position` is the offset
    /// of the instruction (for `new`), and `this_class` is what `UninitializedThis` turns into once
    /// the super constructor has been called.
    pub fn execute(
        &mut self,
        kind: &ExprKind,
        declared: &JavaType,
        position: u32,
        this_class: &BinaryName,
    ) -> Result<(), VerifierErrorKind> {
        match kind {
            ExprKind::Op(instruction) => verify_instruction(self, *instruction),
            ExprKind::Ldc(constant) => {
                let vtype = match constant {
                    LoadableConstant::Integer(_) => VerificationType::Integer,
                    LoadableConstant::Float(_) => VerificationType::Float,
                    LoadableConstant::Long(_) => VerificationType::Long,
                    LoadableConstant::Double(_) => VerificationType::Double,
                    LoadableConstant::String(_) => {
                        VerificationType::Object(RefType::Object(BinaryName::STRING))
                    }
                    LoadableConstant::Class(_) => {
                        VerificationType::Object(RefType::Object(BinaryName::CLASS))
                    }
                };
                self.stack.push(vtype);
                Ok(())
            }
            ExprKind::Local { op, index } => self.local(*op, *index, declared),
            ExprKind::Field { op, field_type, .. } => self.field(*op, field_type),
            ExprKind::Invoke {
                kind,
                class,
                name,
                descriptor,
            } => self.invoke(*kind, class, name, descriptor, this_class),
            ExprKind::New(_) => {
                let offset = u16::try_from(position).map_err(|_| VerifierErrorKind::InvalidIndex)?;
                self.stack.push(VerificationType::Uninitialized(offset));
                Ok(())
            }
            ExprKind::NewArray(element_type) => {
                pop_offset_vec_expecting_type(&mut self.stack, VerificationType::Integer)?;
                let array = RefType::array(FieldType::Base(element_type.base_type()));
                self.stack.push(VerificationType::Object(array));
                Ok(())
            }
            ExprKind::ANewArray(element_type) => {
                pop_offset_vec_expecting_type(&mut self.stack, VerificationType::Integer)?;
                let array = RefType::array(FieldType::Ref(element_type.clone()));
                self.stack.push(VerificationType::Object(array));
                Ok(())
            }
            ExprKind::CheckCast(ref_type) => {
                pop_reference(&mut self.stack)?;
                self.stack.push(VerificationType::Object(ref_type.clone()));
                Ok(())
            }
            ExprKind::InstanceOf(_) => {
                pop_reference(&mut self.stack)?;
                self.stack.push(VerificationType::Integer);
                Ok(())
            }

            // Structure, not instructions
            ExprKind::Label(_)
            | ExprKind::Branch { .. }
            | ExprKind::Goto { .. }
            | ExprKind::Seq(..)
            | ExprKind::Retype(_)
            | ExprKind::TryCatch { .. }
            | ExprKind::Line { .. } => Ok(()),
        }
    }

    fn local(&mut self, op: LocalOp, index: u16, declared: &JavaType) -> Result<(), VerifierErrorKind> {
        let Frame {
            ref mut locals,
            ref mut stack,
        } = *self;
        let expected = match op {
            LocalOp::ILoad | LocalOp::IStore => VerificationType::Integer,
            LocalOp::LLoad | LocalOp::LStore => VerificationType::Long,
            LocalOp::FLoad | LocalOp::FStore => VerificationType::Float,
            LocalOp::DLoad | LocalOp::DStore => VerificationType::Double,

            LocalOp::ALoad => {
                let local = get_local(locals, index)?;
                if local.is_reference() {
                    stack.push(local);
                } else {
                    match declared.vtype() {
                        Some(vtype) if vtype.is_reference() => stack.push(vtype),
                        _ => return Err(VerifierErrorKind::InvalidType),
                    };
                }
                return Ok(());
            }
            LocalOp::AStore => {
                let value = pop_reference(stack)?;
                self.store_local(index, value);
                return Ok(());
            }
        };

        if op.is_load() {
            if get_local(locals, index)? != expected {
                return Err(VerifierErrorKind::InvalidType);
            }
            stack.push(expected);
        } else {
            pop_offset_vec_expecting_type(stack, expected.clone())?;
            self.store_local(index, expected);
        }
        Ok(())
    }

    fn field(&mut self, op: FieldOp, field_type: &FieldType) -> Result<(), VerifierErrorKind> {
        let stack = &mut self.stack;
        let value = VType::from(field_type.clone());
        match op {
            FieldOp::GetStatic => {
                stack.push(value);
            }
            FieldOp::PutStatic => {
                pop_compatible(stack, &value)?;
            }
            FieldOp::GetField => {
                pop_reference(stack)?;
                stack.push(value);
            }
            FieldOp::PutField => {
                pop_compatible(stack, &value)?;
                pop_reference(stack)?;
            }
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        kind: InvokeKind,
        class: &RefType,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
        this_class: &BinaryName,
    ) -> Result<(), VerifierErrorKind> {
        for parameter in descriptor.parameters.iter().rev() {
            pop_compatible(&mut self.stack, &VType::from(parameter.clone()))?;
        }

        let is_init = *name == UnqualifiedName::INIT;
        if let (InvokeKind::Special, true) = (kind, is_init) {
            // Initialize
            match pop_reference(&mut self.stack)? {
                VerificationType::UninitializedThis => {
                    let initialized = VerificationType::Object(RefType::Object(this_class.clone()));
                    self.replace_all(&VerificationType::UninitializedThis, &initialized);
                }
                uninitialized @ VerificationType::Uninitialized(_) => {
                    let initialized = VerificationType::Object(class.clone());
                    self.replace_all(&uninitialized, &initialized);
                }
                _ => return Err(VerifierErrorKind::InvalidType),
            }
            if descriptor.return_type.is_some() {
                return Err(VerifierErrorKind::InvalidType);
            }
            return Ok(());
        }

        if kind.has_receiver() {
            pop_reference(&mut self.stack)?;
        }
        if let Some(return_type) = &descriptor.return_type {
            self.stack.push(VType::from(return_type.clone()));
        }
        Ok(())
    }

    /// Replace every occurrence of a type, in both locals and stack
    fn replace_all(&mut self, original: &VType, updated: &VType) {
        for local in self.locals.iter_mut() {
            if local == original {
                *local = updated.clone();
            }
        }
        self.stack = self
            .stack
            .values()
            .map(|vtype| {
                if vtype == original {
                    updated.clone()
                } else {
                    vtype.clone()
                }
            })
            .collect();
    }
}

fn verify_instruction(frame: &mut Frame, insn: Instruction) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let Frame { ref mut stack, .. } = *frame;
    match insn {
        Nop => (),
        AConstNull => {
            stack.push(Null);
        }
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            stack.push(Integer);
        }
        LConst0 | LConst1 => {
            stack.push(Long);
        }
        FConst0 | FConst1 | FConst2 => {
            stack.push(Float);
        }
        DConst0 | DConst1 => {
            stack.push(Double);
        }

        IALoad | BALoad | CALoad | SALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
            stack.push(Integer);
        }
        LALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
            stack.push(Long);
        }
        FALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
            stack.push(Float);
        }
        DALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
            stack.push(Double);
        }
        AALoad => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            let element = match pop_reference(stack)? {
                Null => Null,
                Object(array_type) => match array_type.element_type() {
                    Some(FieldType::Ref(element)) => Object(element),
                    _ => return Err(VerifierErrorKind::InvalidType),
                },
                _ => return Err(VerifierErrorKind::InvalidType),
            };
            stack.push(element);
        }

        IAStore | BAStore | CAStore | SAStore => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }
        LAStore => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }
        FAStore => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }
        DAStore => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }
        AAStore => {
            pop_reference(stack)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_reference(stack)?;
        }

        Pop => {
            pop_offset_vec_expecting_width(stack, 1)?;
        }
        Pop2 => {
            let top = pop_offset_vec(stack)?;
            if top.width() == 1 {
                pop_offset_vec_expecting_width(stack, 1)?;
            }
        }
        Dup => {
            let top = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(top.clone());
            stack.push(top);
        }
        DupX1 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1.clone());
            stack.push(arg2);
            stack.push(arg1);
        }
        DupX2 => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec(stack)?;
            match arg2.width() {
                // Form 1
                1 => {
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }
            }
        }
        Dup2 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    stack.push(arg1.clone());
                    stack.push(arg1);
                }
            }
        }
        Dup2X1 => {
            let arg1 = pop_offset_vec(stack)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    let arg3 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg2.clone());
                    stack.push(arg1.clone());
                    stack.push(arg3);
                    stack.push(arg2);
                    stack.push(arg1);
                }

                // Form 2
                _ => {
                    let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
                    stack.push(arg1.clone());
                    stack.push(arg2);
                    stack.push(arg1);
                }
            }
        }
        Dup2X2 => {
            let arg1 = pop_offset_vec(stack)?;
            let arg2 = if arg1.width() == 1 {
                Some(pop_offset_vec_expecting_width(stack, 1)?)
            } else {
                None
            };
            let arg3 = pop_offset_vec(stack)?;
            let arg4 = if arg3.width() == 1 {
                Some(pop_offset_vec_expecting_width(stack, 1)?)
            } else {
                None
            };

            // The top one or two values get copied under the next one or two
            let top: Vec<VType> = arg2.into_iter().chain(Some(arg1)).collect();
            stack.extend(top.iter().cloned());
            stack.extend(arg4);
            stack.push(arg3);
            stack.extend(top);
        }
        Swap => {
            let arg1 = pop_offset_vec_expecting_width(stack, 1)?;
            let arg2 = pop_offset_vec_expecting_width(stack, 1)?;
            stack.push(arg1);
            stack.push(arg2);
        }

        IAdd | ISub | IMul | IDiv | IRem | IShl | IShr | IUShr | IAnd | IOr | IXor => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Integer);
        }
        LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }
        LShl | LShr | LUShr => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }
        FAdd | FSub | FMul | FDiv | FRem => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Float);
        }
        DAdd | DSub | DMul | DDiv | DRem => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Double);
        }
        INeg | I2B | I2C | I2S => {
            pop_offset_vec_expecting_type(stack, Integer)?;
            stack.push(Integer);
        }
        LNeg => {
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Long);
        }
        FNeg => {
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Float);
        }
        DNeg => {
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Double);
        }

        I2L | I2F | I2D | L2I | L2F | L2D | F2I | F2L | F2D | D2I | D2L | D2F => {
            let (from, to) = conversion_types(insn);
            pop_offset_vec_expecting_type(stack, from)?;
            stack.push(to);
        }

        LCmp => {
            pop_offset_vec_expecting_type(stack, Long)?;
            pop_offset_vec_expecting_type(stack, Long)?;
            stack.push(Integer);
        }
        FCmpL | FCmpG => {
            pop_offset_vec_expecting_type(stack, Float)?;
            pop_offset_vec_expecting_type(stack, Float)?;
            stack.push(Integer);
        }
        DCmpL | DCmpG => {
            pop_offset_vec_expecting_type(stack, Double)?;
            pop_offset_vec_expecting_type(stack, Double)?;
            stack.push(Integer);
        }

        IReturn => pop_offset_vec_expecting_type(stack, Integer)?,
        LReturn => pop_offset_vec_expecting_type(stack, Long)?,
        FReturn => pop_offset_vec_expecting_type(stack, Float)?,
        DReturn => pop_offset_vec_expecting_type(stack, Double)?,
        AReturn | AThrow | MonitorEnter | MonitorExit => {
            pop_reference(stack)?;
        }
        Return => (),

        ArrayLength => {
            match pop_reference(stack)? {
                Null | Object(RefType::PrimitiveArray(_) | RefType::ObjectArray(_)) => (),
                _ => return Err(VerifierErrorKind::InvalidType),
            }
            stack.push(Integer);
        }
    }

    Ok(())
}

/// Operand and result types of a primitive conversion
fn conversion_types(insn: Instruction) -> (VType, VType) {
    use Instruction::*;

    let base = |base_type: BaseType| VType::from(FieldType::Base(base_type));
    let (from, to) = match insn {
        I2L => (BaseType::Int, BaseType::Long),
        I2F => (BaseType::Int, BaseType::Float),
        I2D => (BaseType::Int, BaseType::Double),
        L2I => (BaseType::Long, BaseType::Int),
        L2F => (BaseType::Long, BaseType::Float),
        L2D => (BaseType::Long, BaseType::Double),
        F2I => (BaseType::Float, BaseType::Int),
        F2L => (BaseType::Float, BaseType::Long),
        F2D => (BaseType::Float, BaseType::Double),
        D2I => (BaseType::Double, BaseType::Int),
        D2L => (BaseType::Double, BaseType::Long),
        _ => (BaseType::Double, BaseType::Float),
    };
    (base(from), base(to))
}

fn get_local(locals: &[VType], index: u16) -> Result<VType, VerifierErrorKind> {
    locals
        .get(index as usize)
        .cloned()
        .ok_or(VerifierErrorKind::InvalidIndex)
}

fn pop_offset_vec(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    stack.pop().ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_offset_vec_expecting_width(
    stack: &mut OffsetVec<VType>,
    expected_width: usize,
) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

fn pop_offset_vec_expecting_type(
    stack: &mut OffsetVec<VType>,
    expected_type: VType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

fn pop_reference(stack: &mut OffsetVec<VType>) -> Result<VType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ.is_reference() {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

/// Pop a value that could be passed where `expected` is required
///
/// Without a class hierarchy, any reference is accepted where a reference is expected.
fn pop_compatible(stack: &mut OffsetVec<VType>, expected: &VType) -> Result<(), VerifierErrorKind> {
    if expected.is_reference() {
        pop_reference(stack).map(|_| ())
    } else {
        pop_offset_vec_expecting_type(stack, expected.clone())
    }
}
