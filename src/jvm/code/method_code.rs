use super::opcodes::NOP;
use super::{
    BytecodeWriter, CodeEmitter, Expr, FixLabels, LabelArena, LineNumberCollector, SizeEstimate,
};
use crate::jvm::class_file::{BytecodeArray, Code, ConstantsPool};
use crate::jvm::config::AssemblerConfig;
use crate::jvm::descriptors::RenderDescriptor;
use crate::jvm::verifier::{Frame, StackMapBuilder, VType, VerificationType};
use crate::jvm::{BinaryName, Error, MethodDescriptor, RefType, UnqualifiedName};
use log::{debug, error, warn};

/// Largest method body a `Code` attribute can hold
pub const MAX_CODE_SIZE: usize = 0xffff;

/// Length of a `checkcast` instruction (opcode plus a 2-byte class index)
const CHECKCAST_LENGTH: usize = 3;

/// Body of a method, ready to be laid out
#[derive(Debug, Clone)]
pub struct MethodCode {
    /// Human-readable identity of the method, eg. `Point.<init>(II)V`
    pub method: String,

    /// Local slots used by the body (the frames may discover more)
    pub num_locals: u16,

    pub body: Expr,

    /// Locals on entry to the method
    pub initial_locals: Vec<VType>,
}

impl MethodCode {
    /// Body of a method, with `this` (unless static) and the parameters as initial locals
    ///
    /// Inside a constructor, `this` starts as `UninitializedThis`.
    pub fn new(
        class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
        is_static: bool,
        num_locals: u16,
        body: Expr,
    ) -> MethodCode {
        let mut initial_locals = vec![];
        if !is_static {
            if *name == UnqualifiedName::INIT && *class != BinaryName::OBJECT {
                initial_locals.push(VerificationType::UninitializedThis);
            } else {
                initial_locals.push(VerificationType::Object(RefType::Object(class.clone())));
            }
        }
        initial_locals.extend(descriptor.parameters.iter().cloned().map(VType::from));

        MethodCode {
            method: format!("{}.{}{}", class, name, descriptor.render()),
            num_locals,
            body,
            initial_locals,
        }
    }

    /// Lay out the body and compute everything else the `Code` attribute needs
    ///
    /// The walks happen in a fixed order: size estimate, fix labels, write, stack map, line
    /// numbers. Each one relies on label positions fixed by the earlier ones.
    pub fn assemble(
        &self,
        constants: &mut ConstantsPool,
        config: &AssemblerConfig,
        this_class: &BinaryName,
    ) -> Result<Code, Error> {
        let mut labels = LabelArena::new();

        let mut estimate = SizeEstimate::new(&mut labels);
        self.body.walk(&mut estimate, constants, &mut ())?;
        let estimated_size = estimate.position();

        let mut fix_labels = FixLabels::new(&mut labels, &self.method);
        self.body.walk(&mut fix_labels, constants, &mut ())?;
        let size = fix_labels.position() as usize;
        debug!(
            "{}: estimated {} bytes, laid out {} bytes",
            self.method, estimated_size, size
        );
        if size > MAX_CODE_SIZE {
            error!(
                "{}: code is {} bytes, more than the {} allowed",
                self.method, size, MAX_CODE_SIZE
            );
            return Err(Error::CodeTooLarge {
                method: self.method.clone(),
                size,
            });
        }

        let mut emitter = CodeEmitter::new(&labels);
        self.body.walk(&mut emitter, constants, &mut ())?;
        let jumps = std::mem::take(&mut emitter.jumps);
        let exception_table = std::mem::take(&mut emitter.exception_handlers);
        let mut code = emitter.into_bytes();

        let initial = Frame::new(self.initial_locals.iter().cloned());
        let mut stack_maps = StackMapBuilder::new(
            &labels,
            &self.method,
            this_class.clone(),
            initial,
            &jumps,
            &exception_table,
        );
        self.body
            .walk(&mut CodeEmitter::replay(&labels), constants, &mut stack_maps)?;
        let stack_maps = stack_maps.finish(constants)?;

        if config.elide_redundant_casts {
            for position in &stack_maps.redundant_casts {
                let start = *position as usize;
                if let Some(cast) = code.get_mut(start..start + CHECKCAST_LENGTH) {
                    warn!(
                        "{}: checkcast at {} is redundant, replacing it with nop",
                        self.method, position
                    );
                    cast.fill(NOP);
                }
            }
        }

        let mut lines = LineNumberCollector::new();
        self.body
            .walk(&mut CodeEmitter::replay(&labels), constants, &mut lines)?;

        debug!(
            "{}: {} stack map frames, max stack {}, max locals {}",
            self.method,
            stack_maps.table.0.len(),
            stack_maps.max_stack,
            stack_maps.max_locals
        );

        let attributes = vec![
            constants.get_attribute(stack_maps.table)?,
            constants.get_attribute(lines.into_table(code.len()))?,
        ];
        Ok(Code {
            max_stack: stack_maps.max_stack,
            max_locals: stack_maps.max_locals.max(self.num_locals),
            code_array: BytecodeArray(code),
            exception_table,
            attributes,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{BranchOp, ExprBuilder, Instruction};
    use crate::jvm::descriptors::ParseDescriptor;
    use crate::jvm::{JavaType, Name};
    use std::collections::BTreeSet;

    fn method(name: &str, descriptor: &str, is_static: bool, body: Expr) -> MethodCode {
        let class = BinaryName::from_string("demo/Point").unwrap();
        let name = UnqualifiedName::from_string(name).unwrap();
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        MethodCode::new(&class, &name, &descriptor, is_static, 0, body)
    }

    fn assemble(code: &MethodCode, config: &AssemblerConfig) -> Result<Code, Error> {
        let mut constants = ConstantsPool::new();
        let this_class = BinaryName::from_string("demo/Point").unwrap();
        code.assemble(&mut constants, config, &this_class)
    }

    /// `static int pick(int a, int b)`: a countdown loop on `b`, a guarded store, and an if/else
    fn branchy_body() -> Expr {
        let mut builder = ExprBuilder::new(AssemblerConfig::default());

        let top = builder.label();
        let back = builder.go_back_to_label(top);
        let decrement = Expr::iload(1)
            .and_then(Expr::iconst(1))
            .and_then(Expr::op(Instruction::ISub))
            .and_then(Expr::istore(1))
            .and_then(back);
        let countdown = builder
            .place(top)
            .and_then(Expr::iload(1))
            .and_then(builder.branch_if(BranchOp::IFGT, decrement));

        let guarded = builder.try_catch(
            Expr::iload(0).and_then(Expr::istore(2)),
            None,
            Expr::pop(),
        );

        let choice = Expr::iload(0)
            .and_then(builder.branch(BranchOp::IFLT, Expr::iconst(1), Expr::iconst(1_000)))
            .and_then(Expr::op(Instruction::IReturn));

        countdown.and_then(guarded).and_then(choice)
    }

    #[test]
    fn label_distances_only_shrink() {
        let code = method("pick", "(II)I", true, branchy_body());
        let mut constants = ConstantsPool::new();
        let mut labels = LabelArena::new();
        code.body
            .walk(&mut SizeEstimate::new(&mut labels), &mut constants, &mut ())
            .unwrap();
        code.body
            .walk(&mut FixLabels::new(&mut labels, &code.method), &mut constants, &mut ())
            .unwrap();

        let positions: Vec<(i64, i64)> = labels
            .iter()
            .map(|(_, record)| {
                (
                    record.estimate.unwrap() as i64,
                    record.final_position.unwrap() as i64,
                )
            })
            .collect();
        assert!(positions.len() >= 10);
        for (estimate_a, final_a) in &positions {
            assert!(final_a <= estimate_a);
            for (estimate_b, final_b) in &positions {
                assert!((estimate_a - estimate_b).abs() >= (final_a - final_b).abs());
            }
        }
    }

    #[test]
    fn one_frame_per_jump_end() {
        let code = method("pick", "(II)I", true, branchy_body());
        let mut constants = ConstantsPool::new();
        let mut labels = LabelArena::new();
        code.body
            .walk(&mut SizeEstimate::new(&mut labels), &mut constants, &mut ())
            .unwrap();
        code.body
            .walk(&mut FixLabels::new(&mut labels, &code.method), &mut constants, &mut ())
            .unwrap();
        let mut emitter = CodeEmitter::new(&labels);
        code.body.walk(&mut emitter, &mut constants, &mut ()).unwrap();
        let jumps = std::mem::take(&mut emitter.jumps);
        let handlers = std::mem::take(&mut emitter.exception_handlers);
        assert_eq!(jumps.len(), 5);
        assert_eq!(handlers.len(), 1);

        let this_class = BinaryName::from_string("demo/Point").unwrap();
        let mut builder = StackMapBuilder::new(
            &labels,
            &code.method,
            this_class,
            Frame::new(code.initial_locals.iter().cloned()),
            &jumps,
            &handlers,
        );
        code.body
            .walk(&mut CodeEmitter::replay(&labels), &mut constants, &mut builder)
            .unwrap();
        let stack_maps = builder.finish(&mut constants).unwrap();

        let mut framed = vec![];
        for frame in &stack_maps.table.0 {
            let position = match framed.last() {
                None => frame.offset_delta as u32,
                Some(previous) => previous + frame.offset_delta as u32 + 1,
            };
            framed.push(position);
        }
        let expected: BTreeSet<u32> = jumps
            .iter()
            .flat_map(|(from, to)| [*from, *to])
            .chain(handlers.iter().map(|handler| handler.handler_pc.0 as u32))
            .collect();
        assert_eq!(framed, expected.into_iter().collect::<Vec<u32>>());
    }

    #[test]
    fn initial_locals() {
        let code = method("<init>", "(JI)V", false, Expr::UNIT);
        assert_eq!(code.method, "demo/Point.<init>(JI)V");
        assert_eq!(
            code.initial_locals,
            vec![VType::UninitializedThis, VType::Long, VType::Integer]
        );

        let code = method("run", "(Ljava/lang/String;)V", true, Expr::UNIT);
        assert_eq!(
            code.initial_locals,
            vec![VType::Object(RefType::Object(BinaryName::STRING))]
        );
    }

    #[test]
    fn straight_line_code() {
        let body = Expr::lload(0)
            .and_then(Expr::iload(2))
            .and_then(Expr::op(Instruction::I2L))
            .and_then(Expr::op(Instruction::LAdd))
            .and_then(Expr::op(Instruction::LReturn));
        let code = method("sum", "(JI)J", true, body);
        let assembled = assemble(&code, &AssemblerConfig::default()).unwrap();
        assert_eq!(assembled.code_array.0, vec![0x1e, 0x1c, 0x85, 0x61, 0xad]);
        assert_eq!(assembled.max_stack, 4);
        assert_eq!(assembled.max_locals, 3);
        assert!(assembled.exception_table.is_empty());
        assert_eq!(assembled.attributes.len(), 2);
    }

    #[test]
    fn redundant_casts_become_nops() {
        let string = RefType::Object(BinaryName::STRING);
        let body = Expr::aload(0, JavaType::STRING)
            .and_then(Expr::checkcast(string))
            .and_then(Expr::op(Instruction::AReturn));
        let code = method("same", "(Ljava/lang/String;)Ljava/lang/String;", true, body);

        let assembled = assemble(&code, &AssemblerConfig::default()).unwrap();
        assert_eq!(assembled.code_array.0, vec![0x2a, 0x00, 0x00, 0x00, 0xb0]);

        let config = AssemblerConfig {
            elide_redundant_casts: false,
            ..AssemblerConfig::default()
        };
        let assembled = assemble(&code, &config).unwrap();
        assert_eq!(assembled.code_array.0[1], 0xc0);
    }

    #[test]
    fn oversized_code_is_fatal() {
        // 512 bytes, shared 128 times
        let mut chunk = Expr::UNIT;
        for _ in 0..256 {
            chunk = chunk.and_then(Expr::iconst(1)).and_then(Expr::pop());
        }
        let mut body = Expr::UNIT;
        for _ in 0..128 {
            body = body.and_then(chunk.clone());
        }
        let code = method("big", "()V", true, body.and_then(Expr::return_void()));
        match assemble(&code, &AssemblerConfig::default()) {
            Err(Error::CodeTooLarge { method, size }) => {
                assert_eq!(method, "demo/Point.big()V");
                assert!(size > MAX_CODE_SIZE);
            }
            other => panic!("expected the code to be too large, got {:?}", other),
        }
    }

    #[test]
    fn long_statement_chains() {
        let mut body = Expr::UNIT;
        for _ in 0..20_000 {
            body = body.and_then(Expr::iconst(1)).and_then(Expr::pop());
        }
        let code = method("long", "()V", true, body.and_then(Expr::return_void()));
        let assembled = assemble(&code, &AssemblerConfig::default()).unwrap();
        assert_eq!(assembled.code_array.0.len(), 40_001);
        assert_eq!(&assembled.code_array.0[..4], &[0x04, 0x57, 0x04, 0x57]);
        assert_eq!(assembled.code_array.0[40_000], 0xb1);
        assert_eq!(assembled.max_stack, 1);
    }

    #[test]
    fn handler_frames() {
        let mut builder = ExprBuilder::new(AssemblerConfig::default());
        let body = builder
            .try_catch(
                Expr::iload(0).and_then(Expr::istore(1)),
                None,
                Expr::pop(),
            )
            .and_then(Expr::return_void());
        let code = method("guarded", "(I)V", true, body);
        let assembled = assemble(&code, &AssemblerConfig::default()).unwrap();

        // iload_0; istore_1; goto +4; pop; return
        assert_eq!(
            assembled.code_array.0,
            vec![0x1a, 0x3c, 0xa7, 0x00, 0x04, 0x57, 0xb1]
        );
        assert_eq!(assembled.exception_table.len(), 1);
        assert_eq!(assembled.exception_table[0].handler_pc.0, 5);
        assert_eq!(assembled.max_locals, 2);
    }
}
