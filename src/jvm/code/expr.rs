//! Typed instruction trees
//!
//! An [`Expr`] is a sequence of instructions that, once executed, leaves a value of its declared
//! [`JavaType`] on the stack (or nothing, for `void`). Trees get built once and are never mutated:
//! the layout passes, the stack map walk, and the line number walk all replay the same tree
//! through [`Expr::walk`].
//!
//! Sub-trees are reference counted, so sharing one is cheap and structural. Anything that needs
//! fresh labels (branches, jumps, loops, exception handlers) or configuration (comments) goes
//! through an [`ExprBuilder`].

use super::opcodes::{self, encode_branch, encode_cp, encode_invokeinterface, encode_ldc};
use super::{
    encode_local, BranchOp, BytecodeWriter, FieldOp, Instruction, InvokeKind, LabelGenerator,
    LocalOp, NewArrayType, SynLabel, SynLabelGenerator,
};
use crate::jvm::class_file::{ConstantsPool, LoadableConstant};
use crate::jvm::config::AssemblerConfig;
use crate::jvm::descriptors::RenderDescriptor;
use crate::jvm::{
    BinaryName, Error, FieldType, JavaType, MethodDescriptor, Name, RefType, Serialize,
    UnqualifiedName,
};
use log::error;
use std::fmt;
use std::rc::Rc;

/// Largest `count` operand of `invokeinterface`
const MAX_INVOKE_INTERFACE_SLOTS: usize = 255;

static VOID_TYPE: JavaType = JavaType::Void;

/// Instruction tree
///
/// The empty tree is [`Expr::UNIT`]: it emits nothing and has type `void`.
#[derive(Clone)]
pub struct Expr(Option<Rc<ExprNode>>);

#[derive(Debug)]
pub struct ExprNode {
    kind: ExprKind,

    /// Type of the value left on the stack
    ty: JavaType,

    /// Ends in an unconditional backward jump
    jumps_backward: bool,

    /// Control never falls out of the end of the tree
    ends_path: bool,
}

#[derive(Debug)]
pub enum ExprKind {
    Op(Instruction),
    Ldc(LoadableConstant),
    Local {
        op: LocalOp,
        index: u16,
    },
    Field {
        op: FieldOp,
        class: BinaryName,
        name: UnqualifiedName,
        field_type: FieldType,
    },
    Invoke {
        kind: InvokeKind,
        class: RefType,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    },
    New(BinaryName),
    NewArray(NewArrayType),

    /// Array of the given element type
    ANewArray(RefType),
    CheckCast(RefType),
    InstanceOf(RefType),
    Label(SynLabel),

    /// `start: op target; first; second; end:`
    ///
    /// The branch jumps over `first` to `target` when the condition holds.
    Branch {
        op: BranchOp,
        start: SynLabel,
        target: SynLabel,
        end: SynLabel,
        first: Expr,
        second: Expr,
    },

    /// `from: goto to`
    Goto {
        from: SynLabel,
        to: SynLabel,
    },
    Seq(Expr, Expr),

    /// Same bytes, different declared type
    Retype(Expr),

    /// `start: body; end: [exit: goto after]; handler: handler_body; after:`
    TryCatch {
        start: SynLabel,
        end: SynLabel,
        exit: Option<SynLabel>,
        handler: SynLabel,
        after: SynLabel,
        body: Expr,
        catch_type: Option<BinaryName>,
        handler_body: Expr,
    },

    /// Code attributed to a source line
    Line {
        line: u16,
        body: Expr,
    },
}

/// Observer of a walk over an instruction tree
///
/// Every hook gets called before the corresponding bytes are written, so `position` is the
/// offset of the instruction (or label) in the method body.
pub trait CodeVisitor {
    fn place_label(&mut self, _label: SynLabel, _position: u32) -> Result<(), Error> {
        Ok(())
    }

    /// Leaf instruction (anything other than labels, jumps, and structure)
    fn instruction(&mut self, _expr: &Expr, _position: u32) -> Result<(), Error> {
        Ok(())
    }

    /// Conditional (`Some`) or unconditional (`None`) jump
    fn jump(&mut self, _op: Option<BranchOp>, _from: SynLabel, _to: SynLabel) -> Result<(), Error> {
        Ok(())
    }

    /// Start of a region protected by an exception handler
    fn enter_try(
        &mut self,
        _handler: SynLabel,
        _catch_type: Option<&BinaryName>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// End of the region protected by the handler at `handler`
    fn exit_try(&mut self, _handler: SynLabel) -> Result<(), Error> {
        Ok(())
    }

    fn line(&mut self, _line: u16, _position: u32) -> Result<(), Error> {
        Ok(())
    }
}

/// Layout passes don't need to observe anything
impl CodeVisitor for () {}

/// Pending work of [`Expr::walk`]
enum WalkStep<'a> {
    Walk(&'a Expr),
    Place(SynLabel),
    Jump(SynLabel, SynLabel),
    ExitTry(SynLabel),

    /// End of the body of the innermost `Line`
    EndLine,
}

impl ExprKind {
    /// Move the sub-trees out, leaving `UNIT` behind
    fn take_children(&mut self, into: &mut Vec<Expr>) {
        match self {
            ExprKind::Branch { first, second, .. } | ExprKind::Seq(first, second) => {
                into.push(std::mem::take(first));
                into.push(std::mem::take(second));
            }
            ExprKind::TryCatch {
                body, handler_body, ..
            } => {
                into.push(std::mem::take(body));
                into.push(std::mem::take(handler_body));
            }
            ExprKind::Retype(body) | ExprKind::Line { body, .. } => {
                into.push(std::mem::take(body))
            }
            _ => (),
        }
    }
}

/// Sub-trees get dropped from a work list, not recursively
impl Drop for ExprNode {
    fn drop(&mut self) {
        let mut pending = vec![];
        self.kind.take_children(&mut pending);
        while let Some(Expr(child)) = pending.pop() {
            if let Some(mut node) = child.and_then(|node| Rc::try_unwrap(node).ok()) {
                node.kind.take_children(&mut pending);
            }
        }
    }
}

impl Expr {
    pub const UNIT: Expr = Expr(None);

    fn node(kind: ExprKind, ty: JavaType) -> Expr {
        Expr::node_with_flow(kind, ty, false, false)
    }

    fn node_with_flow(kind: ExprKind, ty: JavaType, jumps_backward: bool, ends_path: bool) -> Expr {
        Expr(Some(Rc::new(ExprNode {
            kind,
            ty,
            jumps_backward,
            ends_path,
        })))
    }

    pub fn is_unit(&self) -> bool {
        self.0.is_none()
    }

    /// Structure of the tree (`None` for [`Expr::UNIT`])
    pub fn kind(&self) -> Option<&ExprKind> {
        self.0.as_ref().map(|node| &node.kind)
    }

    /// Declared type of the value left on the stack
    pub fn ty(&self) -> &JavaType {
        match &self.0 {
            None => &VOID_TYPE,
            Some(node) => &node.ty,
        }
    }

    pub fn jumps_backward(&self) -> bool {
        self.0.as_ref().map_or(false, |node| node.jumps_backward)
    }

    /// Does control never reach the end of this code?
    pub fn ends_path(&self) -> bool {
        self.0.as_ref().map_or(false, |node| node.ends_path)
    }

    pub fn op(instruction: Instruction) -> Expr {
        Expr::node_with_flow(
            ExprKind::Op(instruction),
            instruction.result_type(),
            false,
            instruction.ends_path(),
        )
    }

    pub fn nop() -> Expr {
        Expr::op(Instruction::Nop)
    }

    pub fn aconst_null() -> Expr {
        Expr::op(Instruction::AConstNull)
    }

    pub fn dup() -> Expr {
        Expr::op(Instruction::Dup)
    }

    pub fn pop() -> Expr {
        Expr::op(Instruction::Pop)
    }

    pub fn arraylength() -> Expr {
        Expr::op(Instruction::ArrayLength)
    }

    pub fn athrow() -> Expr {
        Expr::op(Instruction::AThrow)
    }

    pub fn return_void() -> Expr {
        Expr::op(Instruction::Return)
    }

    fn ldc(constant: LoadableConstant, ty: JavaType) -> Expr {
        Expr::node(ExprKind::Ldc(constant), ty)
    }

    /// Push an `int`, using `iconst_*` for -1 through 5
    pub fn iconst(value: i32) -> Expr {
        let instruction = match value {
            -1 => Instruction::IConstM1,
            0 => Instruction::IConst0,
            1 => Instruction::IConst1,
            2 => Instruction::IConst2,
            3 => Instruction::IConst3,
            4 => Instruction::IConst4,
            5 => Instruction::IConst5,
            _ => return Expr::ldc(LoadableConstant::Integer(value), JavaType::INT),
        };
        Expr::op(instruction)
    }

    pub fn lconst(value: i64) -> Expr {
        match value {
            0 => Expr::op(Instruction::LConst0),
            1 => Expr::op(Instruction::LConst1),
            _ => Expr::ldc(LoadableConstant::Long(value), JavaType::LONG),
        }
    }

    /// Push a `float`, comparing bit patterns so that `-0.0` still goes through the pool
    pub fn fconst(value: f32) -> Expr {
        match value.to_bits() {
            bits if bits == 0f32.to_bits() => Expr::op(Instruction::FConst0),
            bits if bits == 1f32.to_bits() => Expr::op(Instruction::FConst1),
            bits if bits == 2f32.to_bits() => Expr::op(Instruction::FConst2),
            _ => Expr::ldc(LoadableConstant::Float(value), JavaType::FLOAT),
        }
    }

    pub fn dconst(value: f64) -> Expr {
        match value.to_bits() {
            bits if bits == 0f64.to_bits() => Expr::op(Instruction::DConst0),
            bits if bits == 1f64.to_bits() => Expr::op(Instruction::DConst1),
            _ => Expr::ldc(LoadableConstant::Double(value), JavaType::DOUBLE),
        }
    }

    pub fn string_const(value: impl Into<String>) -> Expr {
        Expr::ldc(LoadableConstant::String(value.into()), JavaType::STRING)
    }

    /// Push a `java/lang/Class` instance
    pub fn class_const(class: RefType) -> Expr {
        Expr::ldc(LoadableConstant::Class(class), JavaType::CLASS)
    }

    /// Load or store a local variable
    ///
    /// For loads, `ty` is the declared type of the result. Stores are always `void`.
    pub fn local(op: LocalOp, index: u16, ty: JavaType) -> Expr {
        let ty = if op.is_load() { ty } else { JavaType::Void };
        Expr::node(ExprKind::Local { op, index }, ty)
    }

    pub fn iload(index: u16) -> Expr {
        Expr::local(LocalOp::ILoad, index, JavaType::INT)
    }

    pub fn istore(index: u16) -> Expr {
        Expr::local(LocalOp::IStore, index, JavaType::Void)
    }

    pub fn lload(index: u16) -> Expr {
        Expr::local(LocalOp::LLoad, index, JavaType::LONG)
    }

    pub fn lstore(index: u16) -> Expr {
        Expr::local(LocalOp::LStore, index, JavaType::Void)
    }

    pub fn fload(index: u16) -> Expr {
        Expr::local(LocalOp::FLoad, index, JavaType::FLOAT)
    }

    pub fn fstore(index: u16) -> Expr {
        Expr::local(LocalOp::FStore, index, JavaType::Void)
    }

    pub fn dload(index: u16) -> Expr {
        Expr::local(LocalOp::DLoad, index, JavaType::DOUBLE)
    }

    pub fn dstore(index: u16) -> Expr {
        Expr::local(LocalOp::DStore, index, JavaType::Void)
    }

    /// Load a reference, declared to have type `ty`
    pub fn aload(index: u16, ty: JavaType) -> Expr {
        Expr::local(LocalOp::ALoad, index, ty)
    }

    pub fn astore(index: u16) -> Expr {
        Expr::local(LocalOp::AStore, index, JavaType::Void)
    }

    /// Load from an array of references, declared to produce an element of type `ty`
    pub fn aaload(ty: JavaType) -> Expr {
        Expr::op(Instruction::AALoad).is(ty)
    }

    /// Allocate an uninitialized object (the constructor still needs to be called)
    pub fn new_object(class: BinaryName) -> Expr {
        let ty = JavaType::object(class.clone());
        Expr::node(ExprKind::New(class), ty)
    }

    /// Allocate an array of references with the length on the stack
    pub fn anewarray(element_type: RefType) -> Expr {
        let ty = JavaType::Object(RefType::array(FieldType::Ref(element_type.clone())));
        Expr::node(ExprKind::ANewArray(element_type), ty)
    }

    /// Allocate an array of primitives with the length on the stack
    pub fn newarray(element_type: NewArrayType) -> Expr {
        let ty = JavaType::Object(RefType::array(FieldType::Base(element_type.base_type())));
        Expr::node(ExprKind::NewArray(element_type), ty)
    }

    pub fn checkcast(ty: RefType) -> Expr {
        let result = JavaType::Object(ty.clone());
        Expr::node(ExprKind::CheckCast(ty), result)
    }

    pub fn instance_of(ty: RefType) -> Expr {
        Expr::node(ExprKind::InstanceOf(ty), JavaType::INT)
    }

    fn field(op: FieldOp, class: BinaryName, name: UnqualifiedName, field_type: FieldType) -> Expr {
        let ty = match op {
            FieldOp::GetField | FieldOp::GetStatic => JavaType::from(field_type.clone()),
            FieldOp::PutField | FieldOp::PutStatic => JavaType::Void,
        };
        let kind = ExprKind::Field {
            op,
            class,
            name,
            field_type,
        };
        Expr::node(kind, ty)
    }

    pub fn getfield(class: BinaryName, name: UnqualifiedName, field_type: FieldType) -> Expr {
        Expr::field(FieldOp::GetField, class, name, field_type)
    }

    pub fn putfield(class: BinaryName, name: UnqualifiedName, field_type: FieldType) -> Expr {
        Expr::field(FieldOp::PutField, class, name, field_type)
    }

    pub fn getstatic(class: BinaryName, name: UnqualifiedName, field_type: FieldType) -> Expr {
        Expr::field(FieldOp::GetStatic, class, name, field_type)
    }

    pub fn putstatic(class: BinaryName, name: UnqualifiedName, field_type: FieldType) -> Expr {
        Expr::field(FieldOp::PutStatic, class, name, field_type)
    }

    fn invoke(
        kind: InvokeKind,
        class: RefType,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Expr {
        let ty = JavaType::from_return_type(descriptor.return_type.clone());
        let kind = ExprKind::Invoke {
            kind,
            class,
            name,
            descriptor,
        };
        Expr::node(kind, ty)
    }

    pub fn invoke_static(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Expr {
        Expr::invoke(InvokeKind::Static, RefType::Object(class), name, descriptor)
    }

    /// Call a constructor, private method, or super method
    pub fn invoke_special(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Expr {
        Expr::invoke(InvokeKind::Special, RefType::Object(class), name, descriptor)
    }

    /// Call a virtual method (the class can be an array type, eg. for `clone`)
    pub fn invoke_virtual(
        class: RefType,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Expr {
        Expr::invoke(InvokeKind::Virtual, class, name, descriptor)
    }

    pub fn invoke_interface(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Expr {
        Expr::invoke(InvokeKind::Interface, RefType::Object(class), name, descriptor)
    }

    /// Mark the current position with a label
    pub fn place_label(label: SynLabel) -> Expr {
        Expr::node(ExprKind::Label(label), JavaType::Void)
    }

    /// Execute `self` then `next`
    ///
    /// Code after an unconditional backward jump is unreachable, so `next` is dropped in that
    /// case.
    pub fn and_then(self, next: Expr) -> Expr {
        if self.is_unit() {
            next
        } else if next.is_unit() || self.jumps_backward() {
            self
        } else {
            let ty = next.ty().clone();
            let jumps_backward = next.jumps_backward();
            let ends_path = next.ends_path();
            Expr::node_with_flow(ExprKind::Seq(self, next), ty, jumps_backward, ends_path)
        }
    }

    /// Execute `self`, then `statements`, then push `value` (if there is one)
    ///
    /// A missing value means that the statements don't return normally.
    pub fn and_then_pair(self, statements: Expr, value: Option<Expr>) -> Expr {
        self.and_then(statements)
            .and_then(value.unwrap_or(Expr::UNIT))
    }

    /// Declare the type of the value left on the stack
    ///
    /// Useful when the last instruction doesn't make the result obvious, eg. `new; dup; <init>`
    /// leaves the new object on the stack but ends in a `void` call.
    pub fn is(self, ty: JavaType) -> Expr {
        let jumps_backward = self.jumps_backward();
        let ends_path = self.ends_path();
        Expr::node_with_flow(ExprKind::Retype(self), ty, jumps_backward, ends_path)
    }

    /// Evaluate for side effects and discard the result
    pub fn drop(self) -> Expr {
        match self.kind() {
            Some(ExprKind::Local { op, .. }) if op.is_load() => Expr::UNIT,
            _ => {
                let pop = self.ty().pop();
                self.and_then(pop)
            }
        }
    }

    /// Read a field from the object this leaves on the stack, or just drop the object when the
    /// field is `void`
    pub fn get_field_or_unit(self, class: BinaryName, name: UnqualifiedName, ty: &JavaType) -> Expr {
        match ty.field_type() {
            None => self.drop(),
            Some(field_type) => self.and_then(Expr::getfield(class, name, field_type)),
        }
    }

    /// Attribute this code to a source line
    pub fn at_line(self, line: u16) -> Expr {
        let ty = self.ty().clone();
        let jumps_backward = self.jumps_backward();
        let ends_path = self.ends_path();
        Expr::node_with_flow(
            ExprKind::Line { line, body: self },
            ty,
            jumps_backward,
            ends_path,
        )
    }

    /// Walk the tree, encoding instructions into `writer` and notifying `visitor`
    ///
    /// Constants get interned into `constants` as they are encountered, in every pass. Since the
    /// pool only ever grows, every pass sees the same indices. The walk keeps its own work stack,
    /// so long chains of [`Expr::and_then`] don't grow the call stack.
    pub fn walk<W: BytecodeWriter, V: CodeVisitor>(
        &self,
        writer: &mut W,
        constants: &mut ConstantsPool,
        visitor: &mut V,
    ) -> Result<(), Error> {
        fn place<W: BytecodeWriter, V: CodeVisitor>(
            label: SynLabel,
            writer: &mut W,
            visitor: &mut V,
        ) -> Result<(), Error> {
            writer.place_label(label)?;
            visitor.place_label(label, writer.position())
        }

        fn jump<W: BytecodeWriter, V: CodeVisitor>(
            op: Option<BranchOp>,
            from: SynLabel,
            to: SynLabel,
            writer: &mut W,
            visitor: &mut V,
        ) -> Result<(), Error> {
            place(from, writer, visitor)?;
            visitor.jump(op, from, to)?;
            let opcode = op.map_or(opcodes::GOTO, BranchOp::opcode);
            encode_branch(writer, opcode, from, to)
        }

        // Source lines whose bodies are still being walked, innermost last
        let mut lines: Vec<u16> = vec![];
        let mut steps: Vec<WalkStep<'_>> = vec![WalkStep::Walk(self)];

        while let Some(step) = steps.pop() {
            let expr = match step {
                WalkStep::Walk(expr) => expr,
                WalkStep::Place(label) => {
                    place(label, writer, visitor)?;
                    continue;
                }
                WalkStep::Jump(from, to) => {
                    jump(None, from, to, writer, visitor)?;
                    continue;
                }
                WalkStep::ExitTry(handler) => {
                    visitor.exit_try(handler)?;
                    continue;
                }
                WalkStep::EndLine => {
                    lines.pop();
                    if let Some(outer) = lines.last() {
                        visitor.line(*outer, writer.position())?;
                    }
                    continue;
                }
            };
            let node = match &expr.0 {
                None => continue,
                Some(node) => node,
            };

            // Steps get pushed in reverse order
            match &node.kind {
                ExprKind::Label(label) => place(*label, writer, visitor)?,
                ExprKind::Branch {
                    op,
                    start,
                    target,
                    end,
                    first,
                    second,
                } => {
                    jump(Some(*op), *start, *target, writer, visitor)?;
                    steps.push(WalkStep::Place(*end));
                    steps.push(WalkStep::Walk(second));
                    steps.push(WalkStep::Walk(first));
                }
                ExprKind::Goto { from, to } => jump(None, *from, *to, writer, visitor)?,
                ExprKind::Seq(first, second) => {
                    steps.push(WalkStep::Walk(second));
                    steps.push(WalkStep::Walk(first));
                }
                ExprKind::Retype(inner) => steps.push(WalkStep::Walk(inner)),
                ExprKind::Line { line, body } => {
                    visitor.line(*line, writer.position())?;
                    lines.push(*line);
                    steps.push(WalkStep::EndLine);
                    steps.push(WalkStep::Walk(body));
                }
                ExprKind::TryCatch {
                    start,
                    end,
                    exit,
                    handler,
                    after,
                    body,
                    catch_type,
                    handler_body,
                } => {
                    place(*start, writer, visitor)?;
                    let catch_index = match catch_type {
                        None => None,
                        Some(class) => {
                            Some(constants.get_class(&RefType::Object(class.clone()))?)
                        }
                    };
                    writer.exception_handler(*start, *end, *handler, catch_index)?;
                    visitor.enter_try(*handler, catch_type.as_ref())?;

                    steps.push(WalkStep::Place(*after));
                    steps.push(WalkStep::Walk(handler_body));
                    steps.push(WalkStep::Place(*handler));
                    if let Some(exit) = exit {
                        steps.push(WalkStep::Jump(*exit, *after));
                    }
                    steps.push(WalkStep::ExitTry(*handler));
                    steps.push(WalkStep::Place(*end));
                    steps.push(WalkStep::Walk(body));
                }
                leaf => {
                    visitor.instruction(expr, writer.position())?;
                    Expr::encode_leaf(leaf, writer, constants)?;
                }
            }
        }
        Ok(())
    }

    fn encode_leaf<W: BytecodeWriter>(
        kind: &ExprKind,
        writer: &mut W,
        constants: &mut ConstantsPool,
    ) -> Result<(), Error> {
        match kind {
            ExprKind::Op(instruction) => instruction.opcode().serialize(writer)?,
            ExprKind::Ldc(constant) => {
                let index = constants.get_loadable(constant)?;
                encode_ldc(writer, index, constant.is_wide())?;
            }
            ExprKind::Local { op, index } => encode_local(writer, *op, *index)?,
            ExprKind::Field {
                op,
                class,
                name,
                field_type,
            } => {
                let index = constants.get_field_ref(class, name.as_str(), field_type)?;
                encode_cp(writer, op.opcode(), index)?;
            }
            ExprKind::Invoke {
                kind: InvokeKind::Interface,
                class,
                name,
                descriptor,
            } => {
                let count = descriptor.parameter_length(true);
                let callee = format!("{}.{}{}", class.class_name(), name, descriptor.render());
                if count > MAX_INVOKE_INTERFACE_SLOTS {
                    error!(
                        "Call to `{}` needs {} argument slots, at most {} are allowed",
                        callee, count, MAX_INVOKE_INTERFACE_SLOTS
                    );
                    return Err(Error::InterfaceCallArgOverflow {
                        method: callee,
                        count,
                    });
                }
                let interface = match class {
                    RefType::Object(interface) => interface,
                    _ => return Err(Error::BadDescriptor(callee)),
                };
                let index =
                    constants.get_interface_method_ref(interface, name.as_str(), descriptor)?;
                encode_invokeinterface(writer, index, count as u8)?;
            }
            ExprKind::Invoke {
                kind,
                class,
                name,
                descriptor,
            } => {
                let index = constants.get_method_ref(class, name.as_str(), descriptor)?;
                encode_cp(writer, kind.opcode(), index)?;
            }
            ExprKind::New(class) => {
                let index = constants.get_class(&RefType::Object(class.clone()))?;
                encode_cp(writer, opcodes::NEW, index)?;
            }
            ExprKind::NewArray(element_type) => {
                opcodes::NEWARRAY.serialize(writer)?;
                element_type.code().serialize(writer)?;
            }
            ExprKind::ANewArray(element_type) => {
                let index = constants.get_class(element_type)?;
                encode_cp(writer, opcodes::ANEWARRAY, index)?;
            }
            ExprKind::CheckCast(ty) => {
                let index = constants.get_class(ty)?;
                encode_cp(writer, opcodes::CHECKCAST, index)?;
            }
            ExprKind::InstanceOf(ty) => {
                let index = constants.get_class(ty)?;
                encode_cp(writer, opcodes::INSTANCEOF, index)?;
            }
            ExprKind::Label(_)
            | ExprKind::Branch { .. }
            | ExprKind::Goto { .. }
            | ExprKind::Seq(..)
            | ExprKind::Retype(_)
            | ExprKind::TryCatch { .. }
            | ExprKind::Line { .. } => (),
        }
        Ok(())
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("UNIT"),
            Some(node) => node.kind.fmt(f),
        }
    }
}

impl Default for Expr {
    fn default() -> Expr {
        Expr::UNIT
    }
}

/// Builds the parts of instruction trees that need fresh labels or configuration
pub struct ExprBuilder {
    config: AssemblerConfig,
    labels: SynLabelGenerator,
}

impl ExprBuilder {
    pub fn new(config: AssemblerConfig) -> ExprBuilder {
        ExprBuilder {
            config,
            labels: SynLabelGenerator::new(SynLabel::FIRST),
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Fresh label, to be placed with [`ExprBuilder::place`]
    pub fn label(&mut self) -> SynLabel {
        self.labels.fresh_label()
    }

    pub fn place(&self, label: SynLabel) -> Expr {
        Expr::place_label(label)
    }

    /// Execute `pos` if the condition holds and `neg` otherwise
    ///
    /// With only one arm, this is a single branch (negated if the arm is `pos`) that jumps over
    /// the arm. With two arms, `neg` comes first and ends with a jump over `pos`.
    pub fn branch(&mut self, op: BranchOp, pos: Expr, neg: Expr) -> Expr {
        let start = self.label();
        let end = self.label();
        let kind = if pos.is_unit() {
            ExprKind::Branch {
                op,
                start,
                target: end,
                end,
                first: neg,
                second: Expr::UNIT,
            }
        } else if neg.is_unit() {
            ExprKind::Branch {
                op: op.negate(),
                start,
                target: end,
                end,
                first: pos,
                second: Expr::UNIT,
            }
        } else {
            let pos_label = self.label();
            let first = if neg.ends_path() {
                neg
            } else {
                let skip = self.goto_label(end);
                neg.and_then(skip)
            };
            ExprKind::Branch {
                op,
                start,
                target: pos_label,
                end,
                first,
                second: Expr::place_label(pos_label).and_then(pos),
            }
        };
        let ends_path = match &kind {
            ExprKind::Branch { first, second, .. } => first.ends_path() && second.ends_path(),
            _ => false,
        };
        Expr::node_with_flow(kind, JavaType::Void, false, ends_path)
    }

    /// Execute `pos` only if the condition holds
    pub fn branch_if(&mut self, op: BranchOp, pos: Expr) -> Expr {
        self.branch(op, pos, Expr::UNIT)
    }

    /// Jump forward to a label
    pub fn goto_label(&mut self, to: SynLabel) -> Expr {
        let from = self.label();
        Expr::node_with_flow(ExprKind::Goto { from, to }, JavaType::Void, false, true)
    }

    /// Jump back to a label that was placed earlier
    pub fn go_back_to_label(&mut self, to: SynLabel) -> Expr {
        let from = self.label();
        Expr::node_with_flow(ExprKind::Goto { from, to }, JavaType::Void, true, true)
    }

    /// Empty loop that never exits
    ///
    /// Useful after calls that never return, so the verifier doesn't expect a value afterwards.
    pub fn endless_loop(&mut self) -> Expr {
        let label = self.label();
        let back = self.go_back_to_label(label);
        Expr::place_label(label).and_then(back)
    }

    /// Execute `body`, jumping to `handler` if it throws an instance of `catch_type` (any
    /// throwable, if that is `None`)
    ///
    /// The handler starts with the exception on the stack.
    pub fn try_catch(&mut self, body: Expr, catch_type: Option<BinaryName>, handler: Expr) -> Expr {
        let start = self.label();
        let end = self.label();
        let exit = if body.ends_path() {
            None
        } else {
            Some(self.label())
        };
        let handler_label = self.label();
        let after = self.label();
        let ty = body.ty().clone();
        let ends_path = body.ends_path() && handler.ends_path();
        let kind = ExprKind::TryCatch {
            start,
            end,
            exit,
            handler: handler_label,
            after,
            body,
            catch_type,
            handler_body: handler,
        };
        Expr::node_with_flow(kind, ty, false, ends_path)
    }

    /// Message that shows up in disassembled bytecode, if comments are enabled
    pub fn comment(&self, message: impl Into<String>) -> Expr {
        if self.config.emit_comments {
            self.comment_always(message)
        } else {
            Expr::UNIT
        }
    }

    /// Message that shows up in disassembled bytecode, as `ldc "message"; pop`
    pub fn comment_always(&self, message: impl Into<String>) -> Expr {
        Expr::string_const(message).drop()
    }
}
