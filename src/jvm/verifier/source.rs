use super::Interpreter;
use crate::jvm::code::{Insn, InsnId, Instruction, MethodBody};
use crate::jvm::{BinaryName, FieldType, VerifierErrorKind};
use crate::util::Width;
use std::collections::BTreeSet;

/// Value tracked by provenance: which instructions could have produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceValue {
    /// Width of the value, in slots
    pub size: usize,

    /// Producing instructions (empty for parameters, unset locals, and caught exceptions)
    pub insns: BTreeSet<InsnId>,
}

impl SourceValue {
    pub fn new(size: usize) -> SourceValue {
        SourceValue {
            size,
            insns: BTreeSet::new(),
        }
    }

    pub fn produced_by(size: usize, id: InsnId) -> SourceValue {
        SourceValue {
            size,
            insns: BTreeSet::from([id]),
        }
    }
}

impl Width for SourceValue {
    fn width(&self) -> usize {
        self.size
    }
}

/// Interpreter recording the producers of every value
///
/// Every instruction pushing a value (including loads, stores, and the `dup`/`swap` family) is
/// recorded as its producer. Merging takes the union of producers.
#[derive(Debug, Default, Copy, Clone)]
pub struct SourceInterpreter;

impl Interpreter for SourceInterpreter {
    type Value = SourceValue;

    fn this_value(&self, _body: &MethodBody) -> SourceValue {
        SourceValue::new(1)
    }

    fn parameter_value(&self, parameter: &FieldType) -> SourceValue {
        SourceValue::new(parameter.width())
    }

    fn empty_value(&self) -> SourceValue {
        SourceValue::new(1)
    }

    fn exception_value(&self, _catch_type: Option<&BinaryName>) -> SourceValue {
        SourceValue::new(1)
    }

    fn copy_operation(
        &self,
        id: InsnId,
        _instruction: &Instruction,
        value: &SourceValue,
    ) -> Result<SourceValue, VerifierErrorKind> {
        Ok(SourceValue::produced_by(value.size, id))
    }

    fn operation(
        &self,
        id: InsnId,
        insn: &Insn,
        arguments: &[SourceValue],
    ) -> Result<Option<SourceValue>, VerifierErrorKind> {
        Ok(match insn {
            Insn::Op(Instruction::IInc(_, _)) => {
                let size = arguments.first().map_or(1, |value| value.size);
                Some(SourceValue::produced_by(size, id))
            }
            Insn::Op(op) => op
                .pushed_width()
                .map(|size| SourceValue::produced_by(size, id)),
            _ => None,
        })
    }

    fn initialize(&self, _receiver: &SourceValue) -> Option<SourceValue> {
        None
    }

    fn merge(
        &self,
        value1: &SourceValue,
        value2: &SourceValue,
    ) -> Result<SourceValue, VerifierErrorKind> {
        if value1.insns.is_superset(&value2.insns) && value1.size == value2.size {
            return Ok(value1.clone());
        }
        Ok(SourceValue {
            size: value1.size.min(value2.size),
            insns: value1.insns.union(&value2.insns).copied().collect(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex};
    use crate::jvm::code::{
        BranchInstruction, ClassOperand, InsnList, InvokeType, LabelGenerator, MethodOperand,
        OrdComparison,
    };
    use crate::jvm::verifier::{analyze, Frame};
    use crate::jvm::{MethodAccessFlags, MethodDescriptor, ParseDescriptor, RefType, UnqualifiedName};
    use std::str::FromStr;

    fn body(descriptor: &str, max_locals: usize, insns: Vec<Insn>) -> MethodBody {
        let mut body = MethodBody::new(
            BinaryName::from_str("Test").unwrap(),
            UnqualifiedName::from_str("run").unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            MethodAccessFlags::STATIC,
        );
        body.max_locals = max_locals;
        let mut list = InsnList::new();
        for insn in insns {
            list.push_back(insn);
        }
        body.instructions = list;
        body
    }

    fn new_foo() -> Instruction {
        Instruction::New(ClassOperand {
            index: ClassConstantIndex(ConstantIndex(2)),
            class: RefType::Object(BinaryName::from_str("Foo").unwrap()),
        })
    }

    fn init(descriptor: &str) -> Instruction {
        Instruction::Invoke(
            InvokeType::Special,
            MethodOperand {
                index: ConstantIndex(3),
                owner: RefType::Object(BinaryName::from_str("Foo").unwrap()),
                name: UnqualifiedName::INIT,
                descriptor: MethodDescriptor::parse(descriptor).unwrap(),
                is_interface: false,
            },
        )
    }

    fn frame_before(body: &MethodBody, position: usize) -> Frame<SourceValue> {
        let frames = analyze(body, &SourceInterpreter).unwrap();
        let id = body.instructions.ids()[position];
        frames.get(id).unwrap().clone()
    }

    #[test]
    fn dup_keeps_original_underneath() {
        let body = body(
            "()V",
            0,
            vec![
                Insn::Op(new_foo()),
                Insn::Op(Instruction::Dup),
                Insn::Op(init("()V")),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let ids = body.instructions.ids();
        let frame = frame_before(&body, 2);
        assert_eq!(frame.stack[0].insns, BTreeSet::from([ids[0]]));
        assert_eq!(frame.stack[1].insns, BTreeSet::from([ids[1]]));
    }

    #[test]
    fn swap_produces_both() {
        let body = body(
            "(I)V",
            1,
            vec![
                Insn::Op(new_foo()),
                Insn::Op(Instruction::ILoad(0)),
                Insn::Op(Instruction::Swap),
                Insn::Op(Instruction::Pop),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let ids = body.instructions.ids();
        let frame = frame_before(&body, 3);
        assert_eq!(frame.stack.len(), 2);
        assert!(frame.stack.iter().all(|value| value.insns == BTreeSet::from([ids[2]])));
    }

    #[test]
    fn dup_x1_copy_goes_under() {
        let body = body(
            "(I)V",
            1,
            vec![
                Insn::Op(Instruction::ILoad(0)),
                Insn::Op(new_foo()),
                Insn::Op(Instruction::DupX1),
                Insn::Op(Instruction::Pop),
                Insn::Op(Instruction::Pop),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let ids = body.instructions.ids();
        let frame = frame_before(&body, 3);
        let producers: Vec<_> = frame.stack.iter().map(|value| value.insns.clone()).collect();
        assert_eq!(
            producers,
            vec![
                BTreeSet::from([ids[2]]),
                BTreeSet::from([ids[0]]),
                BTreeSet::from([ids[1]]),
            ]
        );
    }

    #[test]
    fn merge_unions_producers() {
        let mut labels = LabelGenerator::new();
        let label_else = labels.fresh_label();
        let label_join = labels.fresh_label();
        let body = body(
            "(I)V",
            1,
            vec![
                Insn::Op(Instruction::ILoad(0)),
                Insn::Branch(BranchInstruction::If(OrdComparison::EQ, label_else)),
                Insn::Op(Instruction::IConst1),
                Insn::Branch(BranchInstruction::Goto(label_join)),
                Insn::Label(label_else),
                Insn::Op(Instruction::IConst2),
                Insn::Label(label_join),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let ids = body.instructions.ids();
        let frame = frame_before(&body, 7);
        assert_eq!(frame.stack[0].insns, BTreeSet::from([ids[2], ids[5]]));
    }

    #[test]
    fn wide_parameters_take_two_slots() {
        let body = body(
            "(JI)V",
            3,
            vec![
                Insn::Op(Instruction::ILoad(2)),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let frame = frame_before(&body, 0);
        assert_eq!(frame.locals.len(), 3);
        assert_eq!(frame.locals[0].size, 2);
        assert_eq!(frame.locals[2].size, 1);
    }

    #[test]
    fn falling_off_the_end() {
        let body = body("()V", 0, vec![Insn::Op(Instruction::Nop)]);
        let err = analyze(&body, &SourceInterpreter).unwrap_err();
        assert_eq!(err.kind, VerifierErrorKind::FallOffEnd);
    }

    #[test]
    fn popping_an_empty_stack() {
        let body = body(
            "()V",
            0,
            vec![
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let err = analyze(&body, &SourceInterpreter).unwrap_err();
        assert_eq!(err.kind, VerifierErrorKind::EmptyStack);
        assert_eq!(err.instruction, 0);
    }
}
