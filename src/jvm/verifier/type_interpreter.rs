use super::{Interpreter, UninitializedRef, VType, VerificationType};
use crate::jvm::class_graph::{TypeHierarchy, TypeNotFound};
use crate::jvm::code::{BranchInstruction, Insn, InsnId, Instruction, LoadableConstant, MethodBody};
use crate::jvm::{BinaryName, FieldType, RefType, UnqualifiedName, VerifierErrorKind};

/// Interpreter computing verification types, used to produce stack map frames
///
/// Type checking is deliberately shallow: it catches values of the wrong shape (an `int` where a
/// `long` is expected, a primitive where a reference is expected) but leaves subtyping checks of
/// field and method arguments to the JVM.
#[derive(Clone)]
pub struct TypeInterpreter<'u> {
    hierarchy: TypeHierarchy<'u>,

    /// Type `this` takes once the superclass constructor has run
    this_class: RefType,
}

impl<'u> TypeInterpreter<'u> {
    pub fn new(hierarchy: TypeHierarchy<'u>, this_class: RefType) -> TypeInterpreter<'u> {
        TypeInterpreter {
            hierarchy,
            this_class,
        }
    }

    fn object(class: RefType) -> VType {
        VerificationType::Object(class)
    }
}

fn expect(arguments: &[VType], expected: &[VType]) -> Result<(), VerifierErrorKind> {
    if arguments == expected {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

fn expect_reference(value: &VType) -> Result<(), VerifierErrorKind> {
    if value.is_reference() {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

fn array_element(array: &VType) -> Result<VType, VerifierErrorKind> {
    match array {
        VerificationType::Null => Ok(VerificationType::Null),
        VerificationType::Object(ref_type) => ref_type
            .element_type()
            .map(VType::from)
            .ok_or(VerifierErrorKind::NotArrayType),
        _ => Err(VerifierErrorKind::NotArrayType),
    }
}

impl<'u> Interpreter for TypeInterpreter<'u> {
    type Value = VType;

    fn this_value(&self, body: &MethodBody) -> VType {
        if body.name == UnqualifiedName::INIT && body.owner != BinaryName::OBJECT {
            VerificationType::UninitializedThis
        } else {
            Self::object(RefType::Object(body.owner.clone()))
        }
    }

    fn parameter_value(&self, parameter: &FieldType) -> VType {
        VType::from(parameter.clone())
    }

    fn empty_value(&self) -> VType {
        VerificationType::Top
    }

    fn exception_value(&self, catch_type: Option<&BinaryName>) -> VType {
        let class = catch_type.cloned().unwrap_or(BinaryName::THROWABLE);
        Self::object(RefType::Object(class))
    }

    fn copy_operation(
        &self,
        _id: InsnId,
        instruction: &Instruction,
        value: &VType,
    ) -> Result<VType, VerifierErrorKind> {
        use Instruction::*;
        use VerificationType::*;

        let expected = match instruction {
            ILoad(_) | IStore(_) => Some(Integer),
            LLoad(_) | LStore(_) => Some(Long),
            FLoad(_) | FStore(_) => Some(Float),
            DLoad(_) | DStore(_) => Some(Double),
            ALoad(_) | AStore(_) => {
                expect_reference(value)?;
                None
            }
            _ => None,
        };
        match expected {
            Some(expected) if &expected != value => Err(VerifierErrorKind::InvalidType),
            _ => Ok(value.clone()),
        }
    }

    fn operation(
        &self,
        id: InsnId,
        insn: &Insn,
        arguments: &[VType],
    ) -> Result<Option<VType>, VerifierErrorKind> {
        use Instruction::*;
        use VerificationType::*;

        let op = match insn {
            Insn::Op(op) => op,
            Insn::Branch(branch) => {
                match branch {
                    BranchInstruction::If(_, _)
                    | BranchInstruction::IfICmp(_, _)
                    | BranchInstruction::TableSwitch { .. }
                    | BranchInstruction::LookupSwitch { .. }
                    | BranchInstruction::IReturn => {
                        for argument in arguments {
                            expect(std::slice::from_ref(argument), &[Integer])?;
                        }
                    }
                    BranchInstruction::IfACmp(_, _)
                    | BranchInstruction::IfNull(_, _)
                    | BranchInstruction::AReturn
                    | BranchInstruction::AThrow => {
                        for argument in arguments {
                            expect_reference(argument)?;
                        }
                    }
                    BranchInstruction::LReturn => expect(arguments, &[Long])?,
                    BranchInstruction::FReturn => expect(arguments, &[Float])?,
                    BranchInstruction::DReturn => expect(arguments, &[Double])?,
                    BranchInstruction::Goto(_) | BranchInstruction::Return => (),
                }
                return Ok(None);
            }
            Insn::Label(_) | Insn::LineNumber(_) => return Ok(None),
        };

        let result = match op {
            Nop => None,
            AConstNull => Some(Null),
            IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 | BiPush(_)
            | SiPush(_) => Some(Integer),
            LConst0 | LConst1 => Some(Long),
            FConst0 | FConst1 | FConst2 => Some(Float),
            DConst0 | DConst1 => Some(Double),
            Ldc(constant) | Ldc2(constant) => Some(match &constant.value {
                LoadableConstant::Integer(_) => Integer,
                LoadableConstant::Float(_) => Float,
                LoadableConstant::Long(_) => Long,
                LoadableConstant::Double(_) => Double,
                LoadableConstant::String => Self::object(RefType::Object(BinaryName::STRING)),
                LoadableConstant::Class => Self::object(RefType::Object(BinaryName::CLASS)),
                LoadableConstant::MethodType => {
                    Self::object(RefType::Object(BinaryName::METHODTYPE))
                }
                LoadableConstant::MethodHandle => {
                    Self::object(RefType::Object(BinaryName::METHODHANDLE))
                }
                LoadableConstant::Dynamic(field_type) => VType::from(field_type.clone()),
            }),

            IALoad | BALoad | CALoad | SALoad | LALoad | FALoad | DALoad | AALoad => {
                let (array, index) = (&arguments[0], &arguments[1]);
                expect(std::slice::from_ref(index), &[Integer])?;
                let element = array_element(array)?;
                Some(match op {
                    IALoad | BALoad | CALoad | SALoad => Integer,
                    LALoad => Long,
                    FALoad => Float,
                    DALoad => Double,
                    _ => element,
                })
            }
            IAStore | BAStore | CAStore | SAStore | LAStore | FAStore | DAStore | AAStore => {
                array_element(&arguments[0])?;
                expect(&arguments[1..2], &[Integer])?;
                None
            }

            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | ISh(_) => {
                expect(arguments, &[Integer, Integer])?;
                Some(Integer)
            }
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
                expect(arguments, &[Long, Long])?;
                Some(Long)
            }
            LSh(_) => {
                expect(arguments, &[Long, Integer])?;
                Some(Long)
            }
            FAdd | FSub | FMul | FDiv | FRem => {
                expect(arguments, &[Float, Float])?;
                Some(Float)
            }
            DAdd | DSub | DMul | DDiv | DRem => {
                expect(arguments, &[Double, Double])?;
                Some(Double)
            }
            INeg | IInc(_, _) => {
                expect(arguments, &[Integer])?;
                Some(Integer)
            }
            LNeg => {
                expect(arguments, &[Long])?;
                Some(Long)
            }
            FNeg => {
                expect(arguments, &[Float])?;
                Some(Float)
            }
            DNeg => {
                expect(arguments, &[Double])?;
                Some(Double)
            }

            I2L | I2F | I2D | I2B | I2C | I2S => {
                expect(arguments, &[Integer])?;
                Some(match op {
                    I2L => Long,
                    I2F => Float,
                    I2D => Double,
                    _ => Integer,
                })
            }
            L2I | L2F | L2D => {
                expect(arguments, &[Long])?;
                Some(match op {
                    L2I => Integer,
                    L2F => Float,
                    _ => Double,
                })
            }
            F2I | F2L | F2D => {
                expect(arguments, &[Float])?;
                Some(match op {
                    F2I => Integer,
                    F2L => Long,
                    _ => Double,
                })
            }
            D2I | D2L | D2F => {
                expect(arguments, &[Double])?;
                Some(match op {
                    D2I => Integer,
                    D2L => Long,
                    _ => Float,
                })
            }
            LCmp => {
                expect(arguments, &[Long, Long])?;
                Some(Integer)
            }
            FCmp(_) => {
                expect(arguments, &[Float, Float])?;
                Some(Integer)
            }
            DCmp(_) => {
                expect(arguments, &[Double, Double])?;
                Some(Integer)
            }

            GetStatic(field) => Some(VType::from(field.descriptor.clone())),
            GetField(field) => {
                expect_reference(&arguments[0])?;
                Some(VType::from(field.descriptor.clone()))
            }
            PutStatic(_) => None,
            PutField(_) => {
                expect_reference(&arguments[0])?;
                None
            }
            Invoke(_, method) => method.descriptor.return_type.clone().map(VType::from),
            InvokeDynamic(call_site) => call_site.descriptor.return_type.clone().map(VType::from),

            New(class) => Some(Uninitialized(UninitializedRef {
                allocation: id,
                class: class.class.clone(),
            })),
            NewArray(base_type) => {
                expect(arguments, &[Integer])?;
                Some(Self::object(RefType::array(FieldType::Base(*base_type))))
            }
            ANewArray(class) => {
                expect(arguments, &[Integer])?;
                Some(Self::object(RefType::array(FieldType::Ref(
                    class.class.clone(),
                ))))
            }
            ArrayLength => {
                array_element(&arguments[0])?;
                Some(Integer)
            }
            CheckCast(class) => {
                expect_reference(&arguments[0])?;
                Some(Self::object(class.class.clone()))
            }
            InstanceOf(_) => {
                expect_reference(&arguments[0])?;
                Some(Integer)
            }
            MonitorEnter | MonitorExit => {
                expect_reference(&arguments[0])?;
                None
            }
            MultiANewArray(class, _) => {
                for argument in arguments {
                    expect(std::slice::from_ref(argument), &[Integer])?;
                }
                Some(Self::object(class.class.clone()))
            }

            // Handled by the frame
            ILoad(_) | LLoad(_) | FLoad(_) | DLoad(_) | ALoad(_) | IStore(_) | LStore(_)
            | FStore(_) | DStore(_) | AStore(_) | Pop | Pop2 | Dup | DupX1 | DupX2 | Dup2
            | Dup2X1 | Dup2X2 | Swap => None,
        };
        Ok(result)
    }

    fn initialize(&self, receiver: &VType) -> Option<VType> {
        match receiver {
            VerificationType::Uninitialized(uninitialized) => {
                Some(Self::object(uninitialized.class.clone()))
            }
            VerificationType::UninitializedThis => Some(Self::object(self.this_class.clone())),
            _ => None,
        }
    }

    fn merge(&self, value1: &VType, value2: &VType) -> Result<VType, VerifierErrorKind> {
        use VerificationType::*;

        if value1 == value2 {
            return Ok(value1.clone());
        }
        Ok(match (value1, value2) {
            (Null, Object(_)) => value2.clone(),
            (Object(_), Null) => value1.clone(),
            (Object(type1), Object(type2)) => Object(
                self.hierarchy
                    .merge_ref_types(type1, type2)
                    .map_err(|TypeNotFound(name)| VerifierErrorKind::TypeNotFound(name))?,
            ),
            _ => Top,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex};
    use crate::jvm::class_graph::{ClassData, ClassGraph, ClassGraphArenas};
    use crate::jvm::code::{ClassOperand, InsnList, InvokeType, MethodOperand};
    use crate::jvm::verifier::Frame;
    use crate::jvm::{MethodDescriptor, ParseDescriptor};
    use std::collections::HashMap;
    use VerificationType::*;

    fn name(name: &str) -> BinaryName {
        name.parse().unwrap()
    }

    fn some_id() -> InsnId {
        InsnList::new().push_back(Instruction::Nop)
    }

    fn new_frame<const N: usize, const M: usize>(locals: [VType; N], stack: [VType; M]) -> Frame<VType> {
        Frame {
            locals: locals.to_vec(),
            stack: stack.to_vec(),
        }
    }

    fn init_call(owner: &str) -> Instruction {
        Instruction::Invoke(
            InvokeType::Special,
            MethodOperand {
                index: ConstantIndex(4),
                owner: RefType::Object(name(owner)),
                name: UnqualifiedName::INIT,
                descriptor: MethodDescriptor::parse("()V").unwrap(),
                is_interface: false,
            },
        )
    }

    #[test]
    fn arithmetic() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let interpreter =
            TypeInterpreter::new(TypeHierarchy::new(&class_graph), RefType::Object(name("Me")));
        let id = some_id();

        let binops = [
            (Integer, vec![Instruction::IAdd, Instruction::ISub, Instruction::IAnd]),
            (Long, vec![Instruction::LAdd, Instruction::LMul, Instruction::LXor]),
            (Float, vec![Instruction::FAdd, Instruction::FDiv]),
            (Double, vec![Instruction::DAdd, Instruction::DRem]),
        ];

        for (good_typ, instructions) in binops {
            for instruction in instructions {
                let insn = Insn::Op(instruction);
                for typ in [Integer, Long, Float, Double] {
                    let mut frame = new_frame([], [typ.clone(), typ.clone()]);
                    let result = frame.execute(id, &insn, &interpreter);
                    if typ == good_typ {
                        assert_eq!(result, Ok(()), "Verification of {:?}", insn);
                        assert_eq!(frame, new_frame([], [typ]), "Output frame of {:?}", insn);
                    } else {
                        assert!(result.is_err(), "Verification of {:?} on {:?}", insn, typ);
                    }
                }

                let mut frame = new_frame([], [good_typ.clone()]);
                assert_eq!(
                    frame.execute(id, &insn, &interpreter),
                    Err(VerifierErrorKind::EmptyStack),
                    "Verification of {:?}",
                    insn
                );
            }
        }
    }

    #[test]
    fn constructor_initializes_every_copy() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let interpreter =
            TypeInterpreter::new(TypeHierarchy::new(&class_graph), RefType::Object(name("Me")));

        let mut list = InsnList::new();
        let new_id = list.push_back(Instruction::New(ClassOperand {
            index: ClassConstantIndex(ConstantIndex(2)),
            class: RefType::Object(name("Foo")),
        }));
        let dup_id = list.push_back(Instruction::Dup);
        let init_id = list.push_back(init_call("Foo"));

        let mut frame: Frame<VType> = new_frame([Top], []);
        frame.execute(new_id, list.get(new_id), &interpreter).unwrap();
        frame.execute(dup_id, list.get(dup_id), &interpreter).unwrap();
        let uninitialized = Uninitialized(UninitializedRef {
            allocation: new_id,
            class: RefType::Object(name("Foo")),
        });
        assert_eq!(
            frame,
            new_frame([Top], [uninitialized.clone(), uninitialized])
        );

        frame.execute(init_id, list.get(init_id), &interpreter).unwrap();
        assert_eq!(frame, new_frame([Top], [Object(RefType::Object(name("Foo")))]));
    }

    #[test]
    fn super_constructor_initializes_this() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let interpreter =
            TypeInterpreter::new(TypeHierarchy::new(&class_graph), RefType::Object(name("Me")));

        let mut list = InsnList::new();
        let load_id = list.push_back(Instruction::ALoad(0));
        let init_id = list.push_back(init_call("java/lang/Object"));

        let mut frame: Frame<VType> = new_frame([UninitializedThis], []);
        frame.execute(load_id, list.get(load_id), &interpreter).unwrap();
        frame.execute(init_id, list.get(init_id), &interpreter).unwrap();
        assert_eq!(frame, new_frame([Object(RefType::Object(name("Me")))], []));
    }

    #[test]
    fn loading_the_wrong_type() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let interpreter =
            TypeInterpreter::new(TypeHierarchy::new(&class_graph), RefType::Object(name("Me")));
        let id = some_id();

        let mut frame: Frame<VType> = new_frame([Integer], []);
        assert_eq!(
            frame.execute(id, &Insn::Op(Instruction::ALoad(0)), &interpreter),
            Err(VerifierErrorKind::InvalidType)
        );
        let mut frame: Frame<VType> = new_frame([Long, Top], []);
        assert_eq!(
            frame.execute(id, &Insn::Op(Instruction::ILoad(0)), &interpreter),
            Err(VerifierErrorKind::InvalidType)
        );
    }

    #[test]
    fn merging_values() {
        let mut universe = HashMap::new();
        for data in [
            ClassData {
                name: BinaryName::OBJECT,
                superclass: None,
                interfaces: vec![],
                is_interface: false,
            },
            ClassData::new(name("Base"), BinaryName::OBJECT, false),
            ClassData::new(name("SubclassX"), name("Base"), false),
            ClassData::new(name("SubclassY"), name("Base"), false),
        ] {
            universe.insert(data.name.clone(), data);
        }
        let interpreter =
            TypeInterpreter::new(TypeHierarchy::new(&universe), RefType::Object(name("Me")));

        let x = Object(RefType::Object(name("SubclassX")));
        let y = Object(RefType::Object(name("SubclassY")));
        let base = Object(RefType::Object(name("Base")));

        assert_eq!(interpreter.merge(&x, &y), Ok(base));
        assert_eq!(interpreter.merge(&Null, &x), Ok(x.clone()));
        assert_eq!(interpreter.merge(&x, &Null), Ok(x.clone()));
        assert_eq!(interpreter.merge(&Integer, &Float), Ok(Top));
        assert_eq!(interpreter.merge(&Integer, &Integer), Ok(Integer));

        let unknown = Object(RefType::Object(name("Unknown")));
        assert_eq!(
            interpreter.merge(&x, &unknown),
            Err(VerifierErrorKind::TypeNotFound(name("Unknown")))
        );
    }
}
