//! Method bodies built by hand, for tests

use super::SuspensionClassifier;
use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex};
use crate::jvm::code::{
    ClassOperand, Insn, InstructionVisitor, Instruction, InvokeType, MethodBody, MethodOperand,
};
use crate::jvm::{MethodAccessFlags, MethodDescriptor, ParseDescriptor, RefType};

pub fn new_object(class: &str) -> Insn {
    Insn::Op(Instruction::New(ClassOperand {
        index: ClassConstantIndex(ConstantIndex(2)),
        class: RefType::Object(class.parse().unwrap()),
    }))
}

pub fn invoke(typ: InvokeType, owner: &str, name: &str, descriptor: &str) -> Insn {
    Insn::Op(Instruction::Invoke(
        typ,
        MethodOperand {
            index: ConstantIndex(3),
            owner: RefType::Object(owner.parse().unwrap()),
            name: name.parse().unwrap(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
            is_interface: typ == InvokeType::Interface,
        },
    ))
}

pub fn init(class: &str, descriptor: &str) -> Insn {
    invoke(InvokeType::Special, class, "<init>", descriptor)
}

/// Build a static method body, running the classifier over the instructions
pub fn classified_body(
    descriptor: &str,
    max_locals: usize,
    max_stack: usize,
    insns: Vec<Insn>,
) -> (MethodBody, SuspensionClassifier) {
    let mut body = MethodBody::new(
        "Test".parse().unwrap(),
        "run".parse().unwrap(),
        MethodDescriptor::parse(descriptor).unwrap(),
        MethodAccessFlags::STATIC,
    );
    body.max_locals = max_locals;
    body.max_stack = max_stack;
    let mut classifier = SuspensionClassifier::new();
    for insn in insns {
        match insn {
            Insn::Label(_) | Insn::LineNumber(_) => {
                body.instructions.push_back(insn);
            }
            insn => {
                classifier.visit_instruction(&mut body, insn);
            }
        }
    }
    (body, classifier)
}

/// Real instructions of a body, in order
pub fn real_instructions(body: &MethodBody) -> Vec<Insn> {
    body.instructions
        .iter()
        .map(|(_, insn)| insn.clone())
        .filter(Insn::is_real)
        .collect()
}
