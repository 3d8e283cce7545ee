use crate::jvm::code::{Insn, InsnId, Instruction, InstructionVisitor, Label, MethodBody};
use crate::jvm::UnqualifiedName;

/// Call after which execution state must be capturable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspensionPoint {
    /// Label guarding the call
    pub label: Label,

    /// Node of the label (always placed right before `call`)
    pub label_node: InsnId,

    /// The call instruction
    pub call: InsnId,
}

/// How a call instruction is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// `invokeinterface`, `invokestatic`, `invokevirtual`, or `invokespecial` of a non-initializer
    Suspension,

    /// `invokespecial` of `<init>`
    Initializer,

    /// Not a method call (`invokedynamic` included)
    NotACall,
}

/// Classify an instruction, based only on the kind of call and the name of the target
pub fn classify(insn: &Insn) -> CallClass {
    match insn {
        Insn::Op(Instruction::Invoke(_, method)) if method.name == UnqualifiedName::INIT => {
            CallClass::Initializer
        }
        Insn::Op(Instruction::Invoke(_, _)) => CallClass::Suspension,
        _ => CallClass::NotACall,
    }
}

/// Visitor tagging suspension points as a method body gets decoded
///
/// Each suspension call gets a fresh label placed immediately before it. Initializer calls are
/// recorded separately since those are the calls whose receivers may need their allocation
/// moved.
#[derive(Debug, Default)]
pub struct SuspensionClassifier {
    /// Suspension points, in program order
    pub suspension_points: Vec<SuspensionPoint>,

    /// `<init>` calls, in program order
    pub initializer_calls: Vec<InsnId>,
}

impl SuspensionClassifier {
    pub fn new() -> SuspensionClassifier {
        SuspensionClassifier::default()
    }
}

impl InstructionVisitor for SuspensionClassifier {
    fn visit_instruction(&mut self, body: &mut MethodBody, insn: Insn) -> InsnId {
        match classify(&insn) {
            CallClass::Suspension => {
                let label = body.fresh_label();
                let label_node = body.instructions.push_back(Insn::Label(label));
                let call = body.instructions.push_back(insn);
                self.suspension_points.push(SuspensionPoint {
                    label,
                    label_node,
                    call,
                });
                call
            }
            CallClass::Initializer => {
                let call = body.instructions.push_back(insn);
                self.initializer_calls.push(call);
                call
            }
            CallClass::NotACall => body.instructions.push_back(insn),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantIndex;
    use crate::jvm::code::{DynamicOperand, InvokeType, MethodOperand};
    use crate::jvm::{MethodAccessFlags, MethodDescriptor, ParseDescriptor, RefType};

    fn call(typ: InvokeType, name: &str) -> Insn {
        Insn::Op(Instruction::Invoke(
            typ,
            MethodOperand {
                index: ConstantIndex(7),
                owner: RefType::Object("Foo".parse().unwrap()),
                name: name.parse().unwrap(),
                descriptor: MethodDescriptor::parse("()V").unwrap(),
                is_interface: typ == InvokeType::Interface,
            },
        ))
    }

    #[test]
    fn call_kinds() {
        for typ in [
            InvokeType::Interface,
            InvokeType::Static,
            InvokeType::Virtual,
            InvokeType::Special,
        ] {
            assert_eq!(classify(&call(typ, "run")), CallClass::Suspension, "{:?}", typ);
        }
        assert_eq!(
            classify(&call(InvokeType::Special, "<init>")),
            CallClass::Initializer
        );
        assert_eq!(classify(&Insn::Op(Instruction::Dup)), CallClass::NotACall);

        let indy = Insn::Op(Instruction::InvokeDynamic(DynamicOperand {
            index: ConstantIndex(9),
            name: "apply".parse().unwrap(),
            descriptor: MethodDescriptor::parse("()Ljava/lang/Runnable;").unwrap(),
        }));
        assert_eq!(classify(&indy), CallClass::NotACall);
    }

    #[test]
    fn labels_precede_suspension_calls() {
        let mut body = MethodBody::new(
            "Test".parse().unwrap(),
            "run".parse().unwrap(),
            MethodDescriptor::parse("()V").unwrap(),
            MethodAccessFlags::STATIC,
        );
        let mut classifier = SuspensionClassifier::new();
        for insn in [
            call(InvokeType::Static, "first"),
            Insn::Op(Instruction::Nop),
            call(InvokeType::Special, "<init>"),
            call(InvokeType::Virtual, "second"),
        ] {
            classifier.visit_instruction(&mut body, insn);
        }

        assert_eq!(classifier.suspension_points.len(), 2);
        assert_eq!(classifier.initializer_calls.len(), 1);
        assert_eq!(body.instructions.len(), 6);
        for point in &classifier.suspension_points {
            assert_eq!(body.instructions.next(point.label_node), Some(point.call));
            assert_eq!(body.instructions.get(point.label_node), &Insn::Label(point.label));
        }
        let first = classifier.suspension_points[0];
        let second = classifier.suspension_points[1];
        assert_ne!(first.label, second.label);
        assert_eq!(body.instructions.first(), Some(first.label_node));
    }
}
