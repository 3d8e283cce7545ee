use std::cell::RefCell;
use stackflow::continuation::{
    ClassTransformer, ContinuationMethod, Error, Failure, MethodOutcome, Settings,
    SuspensionInjector,
};
use stackflow::jvm::class_file::{
    BytecodeArray, ClassFile, Code, ConstantsPool, ExceptionHandler, Method, StackMapTable, Version,
};
use stackflow::jvm::class_graph::{ClassData, ClassGraph, ClassGraphArenas, TypeHierarchy};
use stackflow::jvm::code::{decode_method, AppendInstructions, Insn, Instruction, MethodBody};
use stackflow::jvm::verifier::{analyze, TypeInterpreter};
use stackflow::jvm::{BinaryName, ClassAccessFlags, MethodAccessFlags, RefType, UnqualifiedName};

const WIDGET: &str = "demo/Widget";

fn name(name: &str) -> BinaryName {
    name.parse().unwrap()
}

fn class(class: &str) -> RefType {
    RefType::Object(name(class))
}

/// Type universe with the Java library types and the classes the tests refer to
fn universe(arenas: &ClassGraphArenas) -> ClassGraph<'_> {
    let graph = ClassGraph::new(arenas);
    graph.insert_java_library_types();
    for (class, superclass) in [
        ("Foo", BinaryName::OBJECT),
        ("Bar", BinaryName::OBJECT),
        ("Wrapper", BinaryName::RUNTIMEEXCEPTION),
        (WIDGET, BinaryName::OBJECT),
    ] {
        graph.add_class(ClassData::new(name(class), superclass, false));
    }
    graph
}

/// Assembles a class out of hand-written bytecode
struct ClassBuilder {
    class: ClassFile,
}

impl ClassBuilder {
    fn new() -> ClassBuilder {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class(&class(WIDGET)).unwrap();
        let super_class = constants.get_class(&RefType::OBJECT).unwrap();
        ClassBuilder {
            class: ClassFile {
                version: Version::JAVA8,
                constants,
                access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
                this_class,
                super_class: Some(super_class),
                interfaces: vec![],
                fields: vec![],
                methods: vec![],
                attributes: vec![],
            },
        }
    }

    fn class_ref(&mut self, name: &str) -> [u8; 2] {
        let index = self.class.constants.get_class(&class(name)).unwrap();
        index.0 .0.to_be_bytes()
    }

    fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> [u8; 2] {
        let index = self
            .class
            .constants
            .get_method_ref(&class(owner), name, descriptor, false)
            .unwrap();
        index.0.to_be_bytes()
    }

    fn method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        code: Option<Code>,
    ) {
        let constants = &mut self.class.constants;
        let name_index = constants.get_utf8(name).unwrap();
        let descriptor_index = constants.get_utf8(descriptor).unwrap();
        let attributes = code
            .into_iter()
            .map(|code| constants.get_attribute(code).unwrap())
            .collect();
        self.class.methods.push(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }

    fn static_method(&mut self, name: &str, descriptor: &str, code: Code) {
        let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
        self.method(flags, name, descriptor, Some(code));
    }

    fn bytes(&self) -> Vec<u8> {
        self.class.to_bytes().unwrap()
    }
}

fn code(max_stack: u16, max_locals: u16, bytecode: Vec<u8>) -> Code {
    Code {
        max_stack,
        max_locals,
        code_array: BytecodeArray(bytecode),
        exception_table: vec![],
        attributes: vec![],
    }
}

/// `Foo foo = new Foo(helper());`
fn scenario_a(builder: &mut ClassBuilder) {
    let foo = builder.class_ref("Foo");
    let helper = builder.method_ref(WIDGET, "helper", "()I");
    let init = builder.method_ref("Foo", "<init>", "(I)V");
    let bytecode = vec![
        0xbb, foo[0], foo[1], // new Foo
        0x59, // dup
        0xb8, helper[0], helper[1], // invokestatic helper
        0xb7, init[0], init[1], // invokespecial Foo.<init>
        0x57, // pop
        0xb1, // return
    ];
    builder.static_method("scenarioA", "()V", code(3, 0, bytecode));
}

/// `int x = 1; return x;`
fn scenario_b(builder: &mut ClassBuilder) {
    let bytecode = vec![
        0x04, // iconst_1
        0x3b, // istore_0
        0x1a, // iload_0
        0xac, // ireturn
    ];
    builder.static_method("noCalls", "()I", code(1, 1, bytecode));
}

/// `new Foo(1L, bar.name(), 2);`
fn scenario_c(builder: &mut ClassBuilder) {
    let foo = builder.class_ref("Foo");
    let name = builder.method_ref("Bar", "name", "()Ljava/lang/String;");
    let init = builder.method_ref("Foo", "<init>", "(JLjava/lang/String;I)V");
    let bytecode = vec![
        0xbb, foo[0], foo[1], // new Foo
        0x59, // dup
        0x0a, // lconst_1
        0x2a, // aload_0
        0xb6, name[0], name[1], // invokevirtual Bar.name
        0x05, // iconst_2
        0xb7, init[0], init[1], // invokespecial Foo.<init>
        0x57, // pop
        0xb1, // return
    ];
    builder.static_method("scenarioC", "(LBar;)V", code(6, 1, bytecode));
}

/// `try { helper(); } catch (Throwable t) { throw new Wrapper(t); }`
fn rethrow(builder: &mut ClassBuilder) {
    let wrapper = builder.class_ref("Wrapper");
    let helper = builder.method_ref(WIDGET, "helper", "()I");
    let init = builder.method_ref("Wrapper", "<init>", "(Ljava/lang/Throwable;)V");
    let bytecode = vec![
        0xb8, helper[0], helper[1], // invokestatic helper
        0x57, // pop
        0xb1, // return
        0xbb, wrapper[0], wrapper[1], // new Wrapper
        0x5a, // dup_x1
        0x5f, // swap
        0xb7, init[0], init[1], // invokespecial Wrapper.<init>
        0xbf, // athrow
    ];
    let mut code = code(3, 0, bytecode);
    code.exception_table.push(ExceptionHandler {
        start_pc: 0,
        end_pc: 4,
        handler_pc: 5,
        catch_type: None,
    });
    builder.static_method("rethrow", "()V", code);
}

/// `Widget() { super(); run(); }`
fn constructor(builder: &mut ClassBuilder) {
    let super_init = builder.method_ref("java/lang/Object", "<init>", "()V");
    let run = builder.method_ref(WIDGET, "run", "()V");
    let bytecode = vec![
        0x2a, // aload_0
        0xb7, super_init[0], super_init[1], // invokespecial Object.<init>
        0x2a, // aload_0
        0xb6, run[0], run[1], // invokevirtual run
        0xb1, // return
    ];
    builder.method(MethodAccessFlags::PUBLIC, "<init>", "()V", Some(code(1, 1, bytecode)));
}

fn find_method<'c>(class: &'c ClassFile, method_name: &str) -> &'c Method {
    class
        .methods
        .iter()
        .find(|method| method.name(&class.constants).unwrap() == method_name)
        .unwrap()
}

fn method_code(class: &ClassFile, method: &Method) -> Code {
    let index = method.find_attribute::<Code>(&class.constants).unwrap();
    method.attributes[index].decode::<Code>().unwrap()
}

/// Decode a method of a rewritten class, checking that it verifies
fn decode_verified(class: &ClassFile, graph: &ClassGraph, method_name: &str) -> (Code, MethodBody) {
    let method = find_method(class, method_name);
    let code = method_code(class, method);
    let owner = class.class_name().unwrap();
    let body = decode_method(&owner, method, &code, &class.constants, &mut AppendInstructions)
        .unwrap();

    let interpreter = TypeInterpreter::new(TypeHierarchy::new(graph), RefType::Object(owner));
    let frames = analyze(&body, &interpreter).unwrap();
    assert!(frames.max_stack <= code.max_stack as usize);
    assert!(frames.max_locals <= code.max_locals as usize);
    (code, body)
}

/// Instructions, in a form that is easy to compare
fn shapes(body: &MethodBody) -> Vec<String> {
    body.instructions
        .iter()
        .filter_map(|(_, insn)| match insn {
            Insn::Op(Instruction::New(operand)) => Some(format!("new {}", operand.class.class_name())),
            Insn::Op(Instruction::Invoke(_, method)) => Some(format!("invoke {}", method.name)),
            Insn::Op(op) => Some(format!("{:?}", op)),
            Insn::Branch(branch) => Some(format!("{:?}", branch)),
            Insn::Label(_) | Insn::LineNumber(_) => None,
        })
        .collect()
}

/// No suspending call sits between an allocation and its initializer
fn assert_no_call_while_uninitialized(body: &MethodBody) {
    let mut pending_allocation = false;
    for (_, insn) in body.instructions.iter() {
        match insn {
            Insn::Op(Instruction::New(_)) => pending_allocation = true,
            Insn::Op(Instruction::Invoke(_, method)) if method.name == UnqualifiedName::INIT => {
                pending_allocation = false
            }
            Insn::Op(Instruction::Invoke(_, method)) => {
                assert!(!pending_allocation, "{} called while uninitialized", method.name)
            }
            _ => (),
        }
    }
}

fn transform(builder: &ClassBuilder, graph: &ClassGraph) -> ClassFile {
    let transformer = ClassTransformer::new(graph, Settings::default());
    ClassFile::parse(&transformer.transform(&builder.bytes()).unwrap()).unwrap()
}

#[test]
fn allocation_moved_past_suspension_point() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    scenario_a(&mut builder);

    let output = transform(&builder, &graph);
    let (code, body) = decode_verified(&output, &graph, "scenarioA");
    assert_eq!(
        shapes(&body),
        vec![
            "invoke helper",
            "new Foo",
            "Dup",
            "Dup2X1",
            "Pop2",
            "invoke <init>",
            "Pop",
            "Return",
        ]
    );
    assert_eq!(code.max_stack, 5);
    assert_eq!(code.max_locals, 0);
    assert_no_call_while_uninitialized(&body);
}

#[test]
fn class_without_suspension_points_is_untouched() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    scenario_b(&mut builder);
    let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT;
    builder.method(flags, "abstractMethod", "()V", None);

    let input = builder.bytes();
    let transformer = ClassTransformer::new(&graph, Settings::default());
    assert_eq!(transformer.transform(&input).unwrap(), input);

    let mut class = ClassFile::parse(&input).unwrap();
    let report = transformer.transform_class(&mut class).unwrap();
    assert_eq!(report.rewritten(), 0);
    assert!(report
        .methods
        .iter()
        .all(|method| method.outcome == MethodOutcome::Trivial));
}

#[test]
fn wide_constructor_arguments_go_through_temporaries() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    scenario_c(&mut builder);

    let output = transform(&builder, &graph);
    let (code, body) = decode_verified(&output, &graph, "scenarioC");
    assert_eq!(
        shapes(&body),
        vec![
            "LConst1",
            "ALoad(0)",
            "invoke name",
            "IConst2",
            "IStore(1)",
            "AStore(2)",
            "LStore(3)",
            "new Foo",
            "Dup",
            "LLoad(3)",
            "ALoad(2)",
            "AConstNull",
            "AStore(2)",
            "ILoad(1)",
            "invoke <init>",
            "Pop",
            "Return",
        ]
    );

    // Locals grow by the width of the arguments (long + reference + int)
    assert_eq!(code.max_locals, 1 + 4);
    assert_eq!(code.max_stack, 7);
    assert_no_call_while_uninitialized(&body);
}

#[test]
fn exception_handler_idiom() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    rethrow(&mut builder);

    let output = transform(&builder, &graph);
    let (code, body) = decode_verified(&output, &graph, "rethrow");
    assert_eq!(
        shapes(&body),
        vec![
            "invoke helper",
            "Pop",
            "Return",
            "new Wrapper",
            "Dup",
            "Dup2X1",
            "Pop2",
            "invoke <init>",
            "AThrow",
        ]
    );
    assert_eq!(
        code.exception_table,
        vec![ExceptionHandler {
            start_pc: 0,
            end_pc: 4,
            handler_pc: 5,
            catch_type: None,
        }]
    );
    assert!(code
        .attributes
        .iter()
        .any(|attribute| attribute.is::<StackMapTable>(&output.constants)));
}

#[test]
fn constructors_are_skipped_by_default() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    constructor(&mut builder);
    scenario_a(&mut builder);
    let input = ClassFile::parse(&builder.bytes()).unwrap();

    let output = transform(&builder, &graph);
    assert_eq!(
        find_method(&output, "<init>").attributes,
        find_method(&input, "<init>").attributes
    );

    // Opting in works too: `this` is initialized before the suspending call
    let transformer = ClassTransformer::new(&graph, Settings::default()).with_filter(|_| true);
    let mut class = ClassFile::parse(&builder.bytes()).unwrap();
    let report = transformer.transform_class(&mut class).unwrap();
    assert_eq!(report.rewritten(), 2);
    let output = ClassFile::parse(&class.to_bytes().unwrap()).unwrap();
    decode_verified(&output, &graph, "<init>");
}

#[test]
fn method_filter_selects_methods() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    scenario_a(&mut builder);
    scenario_c(&mut builder);

    let transformer = ClassTransformer::new(&graph, Settings::default())
        .with_filter(|method| method.name == "scenarioC");
    let mut class = ClassFile::parse(&builder.bytes()).unwrap();
    let report = transformer.transform_class(&mut class).unwrap();
    let outcomes: Vec<_> = report
        .methods
        .iter()
        .map(|method| (method.method.name.as_str(), &method.outcome))
        .collect();
    assert_eq!(outcomes[0], ("scenarioA", &MethodOutcome::NotSelected));
    assert!(matches!(
        outcomes[1],
        ("scenarioC", MethodOutcome::Rewritten { relocated: 1, suspension_points: 1, .. })
    ));
}

/// Injector recording what it is handed
struct Recording<'r>(&'r RefCell<Vec<(String, usize)>>);

impl<'r> SuspensionInjector for Recording<'r> {
    fn inject(&self, method: &mut ContinuationMethod) -> Result<(), Failure> {
        for point in &method.suspension_points {
            let instructions = &method.body.instructions;
            assert_eq!(instructions.get(point.label_node), &Insn::Label(point.label));
            assert_eq!(instructions.next(point.label_node), Some(point.call));
        }
        assert!(method.frames.is_some());
        self.0
            .borrow_mut()
            .push((method.body.name.to_string(), method.suspension_points.len()));
        Ok(())
    }
}

#[test]
fn injector_sees_labelled_suspension_points() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    scenario_a(&mut builder);
    scenario_b(&mut builder);
    rethrow(&mut builder);

    let seen = RefCell::new(vec![]);
    let transformer =
        ClassTransformer::new(&graph, Settings::default()).with_injector(Recording(&seen));
    transformer.transform(&builder.bytes()).unwrap();
    drop(transformer);
    assert_eq!(
        seen.into_inner(),
        vec![(String::from("scenarioA"), 1), (String::from("rethrow"), 1)]
    );
}

#[test]
fn failures_name_the_method() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    scenario_a(&mut builder);
    let bytecode = vec![
        0xa8, 0x00, 0x03, // jsr +3
        0xb1, // return
    ];
    builder.static_method("legacy", "()V", code(1, 0, bytecode));

    let transformer = ClassTransformer::new(&graph, Settings::default());
    match transformer.transform(&builder.bytes()) {
        Err(Error::Method {
            method,
            failure: Failure::Analysis(_),
        }) => {
            assert_eq!(method.owner, WIDGET);
            assert_eq!(method.name, "legacy");
            assert_eq!(method.descriptor, "()V");
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn frames_are_optional() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    let mut builder = ClassBuilder::new();
    rethrow(&mut builder);

    let settings = Settings {
        compute_frames: false,
        ..Settings::default()
    };
    let transformer = ClassTransformer::new(&graph, settings);
    let output = ClassFile::parse(&transformer.transform(&builder.bytes()).unwrap()).unwrap();
    let code = method_code(&output, find_method(&output, "rethrow"));
    assert!(code
        .attributes
        .iter()
        .all(|attribute| !attribute.is::<StackMapTable>(&output.constants)));
}

#[test]
fn common_ancestors() {
    let arenas = ClassGraphArenas::new();
    let graph = universe(&arenas);
    graph.add_class(ClassData::new(name("InterfaceA"), BinaryName::OBJECT, true));
    graph.add_class(ClassData::new(name("InterfaceB"), BinaryName::OBJECT, true));
    graph.add_class(ClassData::new(name("Base"), BinaryName::OBJECT, false));
    graph.add_class(ClassData::new(name("SubclassX"), name("Base"), false));
    graph.add_class(ClassData::new(name("SubclassY"), name("Base"), false));

    let hierarchy = TypeHierarchy::new(&graph);
    assert_eq!(
        hierarchy
            .merge_ref_types(&class("InterfaceA"), &class("InterfaceB"))
            .unwrap(),
        RefType::OBJECT
    );
    assert_eq!(
        hierarchy
            .merge_ref_types(&class("SubclassX"), &class("SubclassY"))
            .unwrap(),
        class("Base")
    );
}
