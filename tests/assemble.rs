//! Assemble whole classes and read the serialized class files back

use byteorder::{BigEndian, ReadBytesExt};
use jvm_assembler::jvm::archive::MemoryArchive;
use jvm_assembler::jvm::code::{BranchOp, Expr, ExprBuilder, Instruction, OrdComparison};
use jvm_assembler::jvm::*;
use std::io::{Cursor, Read};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Just enough of a class file reader to check what the assembler produced
#[derive(Debug)]
struct ParsedClass {
    /// Pool entries, indexed by constant index (wide constants leave a `None` gap)
    constants: Vec<Option<PoolEntry>>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<ParsedMember>,
    methods: Vec<ParsedMember>,
    attributes: Vec<(u16, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq)]
enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Ref(u8, u16, u16),
    NameAndType(u16, u16),
}

#[derive(Debug)]
struct ParsedMember {
    access_flags: u16,
    name: u16,
    descriptor: u16,
    attributes: Vec<(u16, Vec<u8>)>,
}

#[derive(Debug)]
struct ParsedCode {
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    exception_table: Vec<(u16, u16, u16, u16)>,
    attributes: Vec<(u16, Vec<u8>)>,
}

/// `(offset_delta, locals, stack)` of a full frame, with verification types as `(tag, data)`
type ParsedFrame = (u16, Vec<(u8, u16)>, Vec<(u8, u16)>);

fn read_attributes(cursor: &mut Cursor<&[u8]>) -> Vec<(u16, Vec<u8>)> {
    let count = cursor.read_u16::<BigEndian>().unwrap();
    (0..count)
        .map(|_| {
            let name = cursor.read_u16::<BigEndian>().unwrap();
            let len = cursor.read_u32::<BigEndian>().unwrap();
            let mut info = vec![0; len as usize];
            cursor.read_exact(&mut info).unwrap();
            (name, info)
        })
        .collect()
}

fn read_members(cursor: &mut Cursor<&[u8]>) -> Vec<ParsedMember> {
    let count = cursor.read_u16::<BigEndian>().unwrap();
    (0..count)
        .map(|_| ParsedMember {
            access_flags: cursor.read_u16::<BigEndian>().unwrap(),
            name: cursor.read_u16::<BigEndian>().unwrap(),
            descriptor: cursor.read_u16::<BigEndian>().unwrap(),
            attributes: read_attributes(cursor),
        })
        .collect()
}

fn read_vtype(cursor: &mut Cursor<&[u8]>) -> (u8, u16) {
    let tag = cursor.read_u8().unwrap();
    let data = match tag {
        7 | 8 => cursor.read_u16::<BigEndian>().unwrap(),
        _ => 0,
    };
    (tag, data)
}

impl ParsedClass {
    fn parse(bytes: &[u8]) -> ParsedClass {
        let mut cursor = Cursor::new(bytes);
        assert_eq!(cursor.read_u32::<BigEndian>().unwrap(), 0xCAFEBABE);
        let _minor = cursor.read_u16::<BigEndian>().unwrap();
        let _major = cursor.read_u16::<BigEndian>().unwrap();

        let count = cursor.read_u16::<BigEndian>().unwrap();
        let mut constants = vec![None];
        while constants.len() < count as usize {
            let entry = match cursor.read_u8().unwrap() {
                1 => {
                    let len = cursor.read_u16::<BigEndian>().unwrap();
                    let mut utf8 = vec![0; len as usize];
                    cursor.read_exact(&mut utf8).unwrap();
                    PoolEntry::Utf8(String::from_utf8(utf8).unwrap())
                }
                3 => PoolEntry::Integer(cursor.read_i32::<BigEndian>().unwrap()),
                4 => PoolEntry::Float(cursor.read_u32::<BigEndian>().unwrap()),
                5 => PoolEntry::Long(cursor.read_i64::<BigEndian>().unwrap()),
                6 => PoolEntry::Double(cursor.read_u64::<BigEndian>().unwrap()),
                7 => PoolEntry::Class(cursor.read_u16::<BigEndian>().unwrap()),
                8 => PoolEntry::String(cursor.read_u16::<BigEndian>().unwrap()),
                tag @ (9 | 10 | 11) => PoolEntry::Ref(
                    tag,
                    cursor.read_u16::<BigEndian>().unwrap(),
                    cursor.read_u16::<BigEndian>().unwrap(),
                ),
                12 => PoolEntry::NameAndType(
                    cursor.read_u16::<BigEndian>().unwrap(),
                    cursor.read_u16::<BigEndian>().unwrap(),
                ),
                tag => panic!("unexpected constant tag {}", tag),
            };
            let wide = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
            constants.push(Some(entry));
            if wide {
                constants.push(None);
            }
        }

        let access_flags = cursor.read_u16::<BigEndian>().unwrap();
        let this_class = cursor.read_u16::<BigEndian>().unwrap();
        let super_class = cursor.read_u16::<BigEndian>().unwrap();
        let interface_count = cursor.read_u16::<BigEndian>().unwrap();
        let interfaces = (0..interface_count)
            .map(|_| cursor.read_u16::<BigEndian>().unwrap())
            .collect();
        let fields = read_members(&mut cursor);
        let methods = read_members(&mut cursor);
        let attributes = read_attributes(&mut cursor);
        assert_eq!(cursor.position() as usize, bytes.len(), "trailing bytes");

        ParsedClass {
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        }
    }

    fn constant(&self, index: u16) -> &PoolEntry {
        self.constants[index as usize].as_ref().unwrap()
    }

    fn utf8(&self, index: u16) -> &str {
        match self.constant(index) {
            PoolEntry::Utf8(s) => s,
            other => panic!("expected utf8 at {}, got {:?}", index, other),
        }
    }

    fn class_name(&self, index: u16) -> &str {
        match self.constant(index) {
            PoolEntry::Class(name) => self.utf8(*name),
            other => panic!("expected class at {}, got {:?}", index, other),
        }
    }

    fn attribute<'a>(&self, attributes: &'a [(u16, Vec<u8>)], name: &str) -> Vec<&'a [u8]> {
        attributes
            .iter()
            .filter(|(attr_name, _)| self.utf8(*attr_name) == name)
            .map(|(_, info)| info.as_slice())
            .collect()
    }

    fn method(&self, name: &str) -> &ParsedMember {
        self.methods
            .iter()
            .find(|method| self.utf8(method.name) == name)
            .unwrap_or_else(|| panic!("no method {}", name))
    }

    fn code(&self, method: &str) -> ParsedCode {
        let method = self.method(method);
        let code = self.attribute(&method.attributes, "Code");
        assert_eq!(code.len(), 1);
        let mut cursor = Cursor::new(code[0]);
        let max_stack = cursor.read_u16::<BigEndian>().unwrap();
        let max_locals = cursor.read_u16::<BigEndian>().unwrap();
        let len = cursor.read_u32::<BigEndian>().unwrap();
        let mut code = vec![0; len as usize];
        cursor.read_exact(&mut code).unwrap();
        let handlers = cursor.read_u16::<BigEndian>().unwrap();
        let exception_table = (0..handlers)
            .map(|_| {
                (
                    cursor.read_u16::<BigEndian>().unwrap(),
                    cursor.read_u16::<BigEndian>().unwrap(),
                    cursor.read_u16::<BigEndian>().unwrap(),
                    cursor.read_u16::<BigEndian>().unwrap(),
                )
            })
            .collect();
        let attributes = read_attributes(&mut cursor);
        ParsedCode {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        }
    }

    fn frames(&self, code: &ParsedCode) -> Vec<ParsedFrame> {
        let tables = self.attribute(&code.attributes, "StackMapTable");
        assert_eq!(tables.len(), 1, "exactly one StackMapTable");
        assert_eq!(self.attribute(&code.attributes, "LineNumberTable").len(), 1);

        let mut cursor = Cursor::new(tables[0]);
        let count = cursor.read_u16::<BigEndian>().unwrap();
        (0..count)
            .map(|_| {
                assert_eq!(cursor.read_u8().unwrap(), 255, "only full frames");
                let offset_delta = cursor.read_u16::<BigEndian>().unwrap();
                let locals_count = cursor.read_u16::<BigEndian>().unwrap();
                let locals = (0..locals_count).map(|_| read_vtype(&mut cursor)).collect();
                let stack_count = cursor.read_u16::<BigEndian>().unwrap();
                let stack = (0..stack_count).map(|_| read_vtype(&mut cursor)).collect();
                (offset_delta, locals, stack)
            })
            .collect()
    }
}

fn name(name: &str) -> UnqualifiedName {
    UnqualifiedName::from_string(name).unwrap()
}

fn descriptor(descriptor: &str) -> MethodDescriptor {
    MethodDescriptor::parse(descriptor).unwrap()
}

fn class(class: &str) -> ClassBuilder {
    let class = BinaryName::from_string(class).unwrap();
    ClassBuilder::new(AssemblerConfig::default(), class, None, false).unwrap()
}

fn public_static() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC
}

const INTEGER: (u8, u16) = (1, 0);

#[test]
fn one_armed_branch() {
    init_logging();
    let mut builder = ExprBuilder::new(AssemblerConfig::default());
    let body = Expr::iload(0)
        .and_then(builder.branch_if(
            BranchOp::If(OrdComparison::EQ),
            Expr::iconst(0).and_then(Expr::istore(0)),
        ))
        .and_then(Expr::return_void());

    let mut class = class("demo/Flags");
    class
        .add_method(public_static(), name("reset"), descriptor("(I)V"), body, 1)
        .unwrap();
    let parsed = ParsedClass::parse(&class.bytes().unwrap());
    let code = parsed.code("reset");

    // iload_0; ifne +5; iconst_0; istore_0; return
    assert_eq!(code.code, vec![0x1a, 0x9a, 0x00, 0x05, 0x03, 0x3b, 0xb1]);
    assert_eq!(code.max_stack, 1);
    assert_eq!(code.max_locals, 1);

    // One frame at the branch itself, one at the label after it
    let frames = parsed.frames(&code);
    assert_eq!(
        frames,
        vec![
            (1, vec![INTEGER], vec![INTEGER]),
            (4, vec![INTEGER], vec![]),
        ]
    );
}

#[test]
fn merged_locals_coarsen_to_top() {
    init_logging();
    let mut builder = ExprBuilder::new(AssemblerConfig::default());
    let body = Expr::iload(0)
        .and_then(builder.branch_if(
            BranchOp::If(OrdComparison::EQ),
            Expr::iconst(0).and_then(Expr::istore(1)),
        ))
        .and_then(Expr::return_void());

    let mut class = class("demo/Flags");
    class
        .add_method(
            public_static(),
            name("clobber"),
            descriptor("(ILjava/lang/String;)V"),
            body,
            2,
        )
        .unwrap();
    let parsed = ParsedClass::parse(&class.bytes().unwrap());
    let code = parsed.code("clobber");
    assert_eq!(code.code, vec![0x1a, 0x9a, 0x00, 0x05, 0x03, 0x3c, 0xb1]);
    assert_eq!(code.max_locals, 2);

    let frames = parsed.frames(&code);
    assert_eq!(frames.len(), 2);
    let (_, locals, _) = &frames[0];
    assert_eq!(locals[0], INTEGER);
    assert_eq!(locals[1].0, 7);
    assert_eq!(parsed.class_name(locals[1].1), "java/lang/String");

    // `String` on one path and `int` on the other: the trailing `Top` is left out
    assert_eq!(frames[1], (4, vec![INTEGER], vec![]));
}

#[test]
fn identical_strings_share_one_constant() {
    init_logging();
    let body = Expr::string_const("hello")
        .drop()
        .and_then(Expr::string_const("hello").drop())
        .and_then(Expr::string_const("world").drop())
        .and_then(Expr::return_void());

    let mut class = class("demo/Greeter");
    class
        .add_method(public_static(), name("greet"), descriptor("()V"), body, 0)
        .unwrap();
    let parsed = ParsedClass::parse(&class.bytes().unwrap());
    let code = parsed.code("greet");

    // ldc #a; pop; ldc #a; pop; ldc #b; pop; return
    assert_eq!(code.code.len(), 10);
    assert_eq!(code.code[0], 0x12);
    assert_eq!(code.code[1], code.code[4]);
    assert_ne!(code.code[1], code.code[7]);
    match parsed.constant(code.code[1] as u16) {
        PoolEntry::String(utf8) => assert_eq!(parsed.utf8(*utf8), "hello"),
        other => panic!("expected a string constant, got {:?}", other),
    }

    let hello_count = parsed
        .constants
        .iter()
        .flatten()
        .filter(|entry| **entry == PoolEntry::Utf8(String::from("hello")))
        .count();
    let string_count = parsed
        .constants
        .iter()
        .flatten()
        .filter(|entry| matches!(entry, PoolEntry::String(_)))
        .count();
    assert_eq!(hello_count, 1);
    assert_eq!(string_count, 2);
}

/// A class with a field, a constructor, a static initializer, and an exception handler
fn counter_class() -> ClassBuilder {
    let this = BinaryName::from_string("demo/Counter").unwrap();
    let mut class = ClassBuilder::new(AssemblerConfig::default(), this.clone(), None, false)
        .unwrap();
    let mut builder = ExprBuilder::new(class.config().clone());

    class
        .add_implements(BinaryName::from_string("java/lang/Runnable").unwrap())
        .unwrap();
    class
        .add_field(FieldAccessFlags::PRIVATE, name("count"), FieldType::long())
        .unwrap();
    class
        .add_field(
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
            name("created"),
            FieldType::int(),
        )
        .unwrap();

    let constructor = Expr::aload(0, JavaType::object(this.clone()))
        .and_then(Expr::invoke_special(
            BinaryName::OBJECT,
            UnqualifiedName::INIT,
            descriptor("()V"),
        ))
        .and_then(Expr::return_void());
    class
        .add_method(
            MethodAccessFlags::PUBLIC,
            UnqualifiedName::INIT,
            descriptor("()V"),
            constructor,
            1,
        )
        .unwrap();

    let guarded = builder
        .try_catch(
            Expr::aload(0, JavaType::object(this.clone()))
                .and_then(Expr::dup())
                .and_then(Expr::getfield(this.clone(), name("count"), FieldType::long()))
                .and_then(Expr::lconst(1))
                .and_then(Expr::op(Instruction::LAdd))
                .and_then(Expr::putfield(this.clone(), name("count"), FieldType::long()))
                .at_line(12),
            Some(BinaryName::from_string("java/lang/IllegalStateException").unwrap()),
            Expr::pop().at_line(14),
        )
        .and_then(Expr::return_void().at_line(15));
    class
        .add_method(
            MethodAccessFlags::PUBLIC,
            name("run"),
            descriptor("()V"),
            guarded,
            1,
        )
        .unwrap();

    class
        .add_to_clinit(Expr::iconst(0).and_then(Expr::putstatic(
            this,
            name("created"),
            FieldType::int(),
        )))
        .unwrap();
    class
}

#[test]
fn whole_class() {
    init_logging();
    let mut class = counter_class();
    let bytes = class.bytes().unwrap();
    let parsed = ParsedClass::parse(&bytes);

    assert_eq!(parsed.access_flags, 0x0021);
    assert_eq!(parsed.class_name(parsed.this_class), "demo/Counter");
    assert_eq!(parsed.class_name(parsed.super_class), "java/lang/Object");
    assert_eq!(parsed.interfaces.len(), 1);
    assert_eq!(parsed.class_name(parsed.interfaces[0]), "java/lang/Runnable");

    let field_names: Vec<&str> = parsed.fields.iter().map(|f| parsed.utf8(f.name)).collect();
    assert_eq!(field_names, vec!["count", "created"]);
    assert_eq!(parsed.utf8(parsed.fields[0].descriptor), "J");

    let method_names: Vec<&str> = parsed.methods.iter().map(|m| parsed.utf8(m.name)).collect();
    assert_eq!(method_names, vec!["<init>", "run", "<clinit>"]);
    let clinit = parsed.method("<clinit>");
    assert_eq!(clinit.access_flags, 0x0009);
    assert_eq!(parsed.utf8(clinit.descriptor), "()V");

    // iconst_0; putstatic created; return
    let code = parsed.code("<clinit>").code;
    assert_eq!(code.len(), 5);
    assert_eq!((code[0], code[1], code[4]), (0x03, 0xb3, 0xb1));
    match parsed.constant(u16::from_be_bytes([code[2], code[3]])) {
        PoolEntry::Ref(9, class, _) => assert_eq!(parsed.class_name(*class), "demo/Counter"),
        other => panic!("expected a field ref, got {:?}", other),
    }

    let source_file = parsed.attribute(&parsed.attributes, "SourceFile");
    assert_eq!(source_file.len(), 1);
    let index = Cursor::new(source_file[0]).read_u16::<BigEndian>().unwrap();
    assert_eq!(parsed.utf8(index), "Counter.java");

    // aload_0; dup; getfield; lconst_1; ladd; putfield; goto; pop; return
    let run = parsed.code("run");
    assert_eq!(run.exception_table.len(), 1);
    let (start_pc, end_pc, handler_pc, catch_type) = run.exception_table[0];
    assert_eq!((start_pc, end_pc, handler_pc), (0, 10, 13));
    assert_eq!(
        parsed.class_name(catch_type),
        "java/lang/IllegalStateException"
    );
    assert_eq!(run.max_stack, 5);

    let frames = parsed.frames(&run);
    let (_, locals, stack) = frames
        .iter()
        .scan(None, |previous: &mut Option<u16>, frame| {
            let position = match *previous {
                None => frame.0,
                Some(p) => p + frame.0 + 1,
            };
            *previous = Some(position);
            Some((position, frame))
        })
        .find(|(position, _)| *position == handler_pc)
        .map(|(_, frame)| frame.clone())
        .unwrap();
    assert_eq!(locals.len(), 1);
    assert_eq!(parsed.class_name(locals[0].1), "demo/Counter");
    assert_eq!(stack.len(), 1);
    assert_eq!(
        parsed.class_name(stack[0].1),
        "java/lang/IllegalStateException"
    );
}

#[test]
fn output_is_deterministic() {
    init_logging();
    let first = counter_class().bytes().unwrap();
    let second = counter_class().bytes().unwrap();
    assert_eq!(first, second);

    let mut class = counter_class();
    let mut archive = MemoryArchive::new();
    class.write_to_archive(&mut archive).unwrap();
    assert_eq!(archive.get("demo/Counter.class"), Some(first.as_slice()));
}

#[test]
fn oversized_methods_fail_the_class() {
    init_logging();
    let mut chunk = Expr::UNIT;
    for _ in 0..512 {
        chunk = chunk.and_then(Expr::lconst(1).drop());
    }
    let mut body = Expr::UNIT;
    for _ in 0..64 {
        body = body.and_then(chunk.clone());
    }

    let mut class = class("demo/Huge");
    class
        .add_method(
            public_static(),
            name("huge"),
            descriptor("()V"),
            body.and_then(Expr::return_void()),
            0,
        )
        .unwrap();
    match class.bytes() {
        Err(Error::CodeTooLarge { method, size }) => {
            assert_eq!(method, "demo/Huge.huge()V");
            assert!(size > 0xffff);
        }
        other => panic!("expected the method to be too large, got {:?}", other),
    }
}
