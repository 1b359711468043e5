use super::archive::{ClassArchive, DirectoryArchive};
use super::class_file::{Attribute, ClassFile, ConstantsPool, Field, Method, SourceFile};
use super::code::{Expr, MethodCode};
use super::descriptors::RenderDescriptor;
use super::*;
use log::{debug, info};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Method whose body has not been laid out yet
#[derive(Debug)]
struct PendingMethod {
    method: Method,
    code: Option<MethodCode>,
}

/// Builder for a single class file
///
/// Fields and methods get added in the order they should appear in the class file. Method bodies
/// are only laid out once the class is finished (see [`ClassBuilder::finish`]), after which the
/// class can't be changed anymore.
pub struct ClassBuilder {
    config: AssemblerConfig,

    constants: ConstantsPool,

    access_flags: ClassAccessFlags,

    /// Class name
    this_class: BinaryName,

    this_class_index: ClassConstantIndex,
    super_class_index: ClassConstantIndex,

    /// Implemented interfaces, in the order they were first added
    interfaces: Vec<(BinaryName, ClassConstantIndex)>,

    fields: Vec<Field>,
    field_names: BTreeSet<UnqualifiedName>,

    methods: Vec<PendingMethod>,
    method_signatures: BTreeSet<(UnqualifiedName, MethodDescriptor)>,

    /// Code accumulated for the static initializer
    clinit: Expr,

    /// Name for the `SourceFile` attribute
    source_file: String,

    /// Class-level attributes, filled in by `finish`
    attributes: Vec<Attribute>,

    finished: bool,
}

impl ClassBuilder {
    /// Create a new class builder
    ///
    /// The superclass defaults to `java/lang/Object`.
    pub fn new(
        config: AssemblerConfig,
        this_class: BinaryName,
        super_class: Option<BinaryName>,
        is_interface: bool,
    ) -> Result<ClassBuilder, Error> {
        let super_class = super_class.unwrap_or(BinaryName::OBJECT);
        let mut constants = ConstantsPool::new();
        let this_class_index = constants.get_class(&RefType::Object(this_class.clone()))?;
        let super_class_index = constants.get_class(&RefType::Object(super_class))?;
        let source_file = format!("{}.java", this_class.simple_name());

        Ok(ClassBuilder {
            config,
            constants,
            access_flags: ClassAccessFlags::for_class(is_interface),
            this_class,
            this_class_index,
            super_class_index,
            interfaces: vec![],
            fields: vec![],
            field_names: BTreeSet::new(),
            methods: vec![],
            method_signatures: BTreeSet::new(),
            clinit: Expr::UNIT,
            source_file,
            attributes: vec![],
            finished: false,
        })
    }

    pub fn this_class(&self) -> &BinaryName {
        &self.this_class
    }

    pub fn access_flags(&self) -> ClassAccessFlags {
        self.access_flags
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Constants pool (mostly useful for inspecting the pool of a finished class)
    pub fn constants(&self) -> &ConstantsPool {
        &self.constants
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Relative path of the class file, eg. `me/alec/Point.class`
    pub fn class_file_name(&self) -> String {
        self.this_class.class_file_name()
    }

    fn check_not_finished(&self) -> Result<(), Error> {
        if self.finished {
            Err(Error::ClassFinished(self.this_class.as_str().to_owned()))
        } else {
            Ok(())
        }
    }

    /// Add an interface to the class (adding the same interface twice has no effect)
    pub fn add_implements(&mut self, interface: BinaryName) -> Result<(), Error> {
        self.check_not_finished()?;
        if self.interfaces.iter().any(|(name, _)| *name == interface) {
            return Ok(());
        }
        let index = self
            .constants
            .get_class(&RefType::Object(interface.clone()))?;
        self.interfaces.push((interface, index));
        Ok(())
    }

    /// Add a field to the class
    pub fn add_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: UnqualifiedName,
        field_type: FieldType,
    ) -> Result<(), Error> {
        self.check_not_finished()?;
        let name_index = self.constants.get_utf8(name.as_str())?;
        let descriptor_index = self.constants.get_utf8(field_type.render())?;
        self.fields.push(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![],
        });
        self.field_names.insert(name);
        Ok(())
    }

    pub fn has_field(&self, name: &UnqualifiedName) -> bool {
        self.field_names.contains(name)
    }

    /// Add a method with a body to the class
    ///
    /// `num_locals` is the number of local variable slots the body uses, including the receiver and
    /// parameters. The body is laid out when the class is finished.
    pub fn add_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        body: Expr,
        num_locals: u16,
    ) -> Result<(), Error> {
        self.check_not_finished()?;
        let code = MethodCode::new(
            &self.this_class,
            &name,
            &descriptor,
            access_flags.contains(MethodAccessFlags::STATIC),
            num_locals,
            body,
        );
        self.push_method(access_flags, name, descriptor, Some(code))
    }

    /// Add a method without a body
    pub fn add_abstract_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> Result<(), Error> {
        self.check_not_finished()?;
        let access_flags = access_flags | MethodAccessFlags::ABSTRACT;
        self.push_method(access_flags, name, descriptor, None)
    }

    fn push_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        code: Option<MethodCode>,
    ) -> Result<(), Error> {
        let name_index = self.constants.get_utf8(name.as_str())?;
        let descriptor_index = self.constants.get_utf8(descriptor.render())?;
        self.methods.push(PendingMethod {
            method: Method {
                access_flags,
                name_index,
                descriptor_index,
                attributes: vec![],
            },
            code,
        });
        self.method_signatures.insert((name, descriptor));
        Ok(())
    }

    pub fn has_method(&self, name: &UnqualifiedName, descriptor: &MethodDescriptor) -> bool {
        self.method_signatures
            .contains(&(name.clone(), descriptor.clone()))
    }

    /// Append code to the static initializer
    ///
    /// The static initializer only gets generated if some code was added.
    pub fn add_to_clinit(&mut self, code: Expr) -> Result<(), Error> {
        self.check_not_finished()?;
        if !code.is_unit() {
            let clinit = std::mem::replace(&mut self.clinit, Expr::UNIT);
            self.clinit = clinit.and_then(code);
        }
        Ok(())
    }

    /// Set the name recorded in the `SourceFile` attribute
    pub fn set_source_file(&mut self, source_file: impl Into<String>) -> Result<(), Error> {
        self.check_not_finished()?;
        self.source_file = source_file.into();
        Ok(())
    }

    /// Lay out every method body and add the class attributes
    ///
    /// Laying out a body can add entries to the constant pool (for instance, classes only
    /// mentioned in stack map frames), so this must happen before the pool is serialized.
    pub fn finish(&mut self) -> Result<(), Error> {
        self.check_not_finished()?;

        if !self.clinit.is_unit() {
            let clinit = std::mem::replace(&mut self.clinit, Expr::UNIT);
            self.add_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                UnqualifiedName::CLINIT,
                MethodDescriptor {
                    parameters: vec![],
                    return_type: None,
                },
                clinit.and_then(Expr::return_void()),
                0,
            )?;
        }

        // A body is only dropped once its `Code` attribute is in place, so a failed layout fails
        // again on the next attempt
        for pending in &mut self.methods {
            if let Some(code) = &pending.code {
                let code = code.assemble(&mut self.constants, &self.config, &self.this_class)?;
                let code = self.constants.get_attribute(code)?;
                pending.method.attributes.push(code);
                pending.code = None;
            }
        }

        let source_file = self.constants.get_utf8(&self.source_file)?;
        let source_file = self.constants.get_attribute(SourceFile(source_file))?;
        self.attributes.push(source_file);

        debug!(
            "Finished {}: {} fields, {} methods, {} constants",
            self.this_class,
            self.fields.len(),
            self.methods.len(),
            self.constants.next_index() - 1
        );
        self.finished = true;
        Ok(())
    }

    /// Serialized class file, finishing the class first if needed
    pub fn bytes(&mut self) -> Result<Vec<u8>, Error> {
        if !self.finished {
            self.finish()?;
        }

        let interfaces: Vec<ClassConstantIndex> =
            self.interfaces.iter().map(|(_, index)| *index).collect();
        let methods: Vec<Method> = self
            .methods
            .iter()
            .map(|pending| pending.method.clone())
            .collect();
        let class_file = ClassFile {
            version: self.config.version,
            constants: self.constants.constants(),
            access_flags: self.access_flags,
            this_class: self.this_class_index,
            super_class: self.super_class_index,
            interfaces: &interfaces,
            fields: &self.fields,
            methods: &methods,
            attributes: &self.attributes,
        };

        let mut bytes = vec![];
        class_file.serialize(&mut bytes)?;
        Ok(bytes)
    }

    /// Write the serialized class file into a stream
    pub fn write_to<W: io::Write>(&mut self, writer: &mut W) -> Result<(), Error> {
        let bytes = self.bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Write the class file as an entry of an archive
    pub fn write_to_archive(&mut self, archive: &mut impl ClassArchive) -> Result<(), Error> {
        let bytes = self.bytes()?;
        let name = self.class_file_name();
        info!("Writing '{}' ({} bytes)", name, bytes.len());
        archive.add_entry(&name, &bytes)
    }

    /// Save the class file under a directory, creating missing package directories
    pub fn save_to_dir(&mut self, dir: impl AsRef<Path>) -> Result<PathBuf, Error> {
        let mut archive = DirectoryArchive::new(dir);
        self.write_to_archive(&mut archive)?;
        Ok(archive.entry_path(&self.class_file_name()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::archive::MemoryArchive;
    use crate::jvm::class_file::Constant;
    use crate::jvm::code::Instruction;

    fn name(name: &str) -> UnqualifiedName {
        UnqualifiedName::from_string(name).unwrap()
    }

    fn descriptor(descriptor: &str) -> MethodDescriptor {
        MethodDescriptor::parse(descriptor).unwrap()
    }

    fn point() -> ClassBuilder {
        let class = BinaryName::from_string("me/alec/Point").unwrap();
        ClassBuilder::new(AssemblerConfig::default(), class, None, false).unwrap()
    }

    fn has_utf8(class: &ClassBuilder, text: &str) -> bool {
        class
            .constants()
            .constants()
            .values()
            .any(|constant| matches!(constant, Constant::Utf8(s) if s == text))
    }

    #[test]
    fn header() {
        let mut class = point();
        let bytes = class.bytes().unwrap();
        assert_eq!(&bytes[0..4], &ClassFile::MAGIC);
        // Java 7: minor 0, major 51
        assert_eq!(&bytes[4..8], &[0, 0, 0, 51]);
        assert_eq!(class.class_file_name(), "me/alec/Point.class");
        assert!(has_utf8(&class, "java/lang/Object"));
        assert!(has_utf8(&class, "SourceFile"));
        assert!(has_utf8(&class, "Point.java"));
    }

    #[test]
    fn members() {
        let mut class = point();
        class
            .add_field(FieldAccessFlags::PRIVATE, name("x"), FieldType::int())
            .unwrap();
        class
            .add_method(
                MethodAccessFlags::PUBLIC,
                name("getX"),
                descriptor("()I"),
                Expr::aload(0, JavaType::object(class.this_class().clone()))
                    .and_then(Expr::getfield(
                        class.this_class().clone(),
                        name("x"),
                        FieldType::int(),
                    ))
                    .and_then(Expr::op(Instruction::IReturn)),
                1,
            )
            .unwrap();

        assert!(class.has_field(&name("x")));
        assert!(!class.has_field(&name("y")));
        assert!(class.has_method(&name("getX"), &descriptor("()I")));
        assert!(!class.has_method(&name("getX"), &descriptor("()J")));

        class.finish().unwrap();
        assert!(class.is_finished());
        assert!(has_utf8(&class, "Code"));
        assert!(has_utf8(&class, "StackMapTable"));
        assert!(has_utf8(&class, "LineNumberTable"));
    }

    #[test]
    fn interfaces_are_deduplicated() {
        let class = BinaryName::from_string("me/alec/Shape").unwrap();
        let mut class = ClassBuilder::new(AssemblerConfig::default(), class, None, true).unwrap();
        let runnable = BinaryName::from_string("java/lang/Runnable").unwrap();
        class.add_implements(runnable.clone()).unwrap();
        class.add_implements(runnable).unwrap();
        class
            .add_abstract_method(MethodAccessFlags::PUBLIC, name("area"), descriptor("()D"))
            .unwrap();
        assert!(class.access_flags().contains(ClassAccessFlags::INTERFACE));

        let bytes = class.bytes().unwrap();
        let before = class.constants().next_index();
        assert_eq!(class.bytes().unwrap(), bytes);
        assert_eq!(class.constants().next_index(), before);
        assert_eq!(class.interfaces.len(), 1);
    }

    #[test]
    fn static_initializer() {
        let mut class = point();
        class.add_to_clinit(Expr::UNIT).unwrap();
        class.finish().unwrap();
        assert!(!has_utf8(&class, "<clinit>"));

        let mut class = point();
        class
            .add_field(
                FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
                name("ORIGIN"),
                FieldType::int(),
            )
            .unwrap();
        for value in [1, 2] {
            class
                .add_to_clinit(Expr::iconst(value).and_then(Expr::putstatic(
                    class.this_class().clone(),
                    name("ORIGIN"),
                    FieldType::int(),
                )))
                .unwrap();
        }
        class.finish().unwrap();
        assert!(has_utf8(&class, "<clinit>"));
        assert!(class.has_method(&UnqualifiedName::CLINIT, &descriptor("()V")));
        assert_eq!(class.methods.len(), 1);
    }

    #[test]
    fn finished_classes_are_frozen() {
        let mut class = point();
        class.set_source_file("Geometry.kt").unwrap();
        let mut archive = MemoryArchive::new();
        class.write_to_archive(&mut archive).unwrap();
        assert!(has_utf8(&class, "Geometry.kt"));
        assert!(archive.get("me/alec/Point.class").is_some());

        assert!(matches!(
            class.add_field(FieldAccessFlags::PUBLIC, name("x"), FieldType::int()),
            Err(Error::ClassFinished(_))
        ));
        assert!(matches!(
            class.add_to_clinit(Expr::nop()),
            Err(Error::ClassFinished(_))
        ));
        assert!(matches!(class.finish(), Err(Error::ClassFinished(_))));

        let mut written = vec![];
        class.write_to(&mut written).unwrap();
        assert_eq!(Some(written.as_slice()), archive.get("me/alec/Point.class"));
    }

    #[test]
    fn failed_layout_fails_again() {
        let mut class = point();
        class
            .add_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                name("bad"),
                descriptor("()I"),
                Expr::op(Instruction::IReturn),
                0,
            )
            .unwrap();

        for _ in 0..2 {
            assert!(matches!(
                class.bytes(),
                Err(Error::VerifierError {
                    position: 0,
                    kind: VerifierErrorKind::EmptyStack,
                })
            ));
        }
        assert!(class.methods[0].code.is_some());
        assert!(class.methods[0].method.attributes.is_empty());
    }

    #[test]
    fn long_strings_are_rejected() {
        let mut class = point();
        class
            .add_method(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                name("greeting"),
                descriptor("()Ljava/lang/String;"),
                Expr::string_const("a".repeat(70_000)).and_then(Expr::op(Instruction::AReturn)),
                0,
            )
            .unwrap();
        assert!(matches!(
            class.bytes(),
            Err(Error::Utf8TooLong { length: 70_000 })
        ));
    }
}
