use super::{next_instruction, AllocationIdiom, Failure, RelocationEntry};
use crate::jvm;
use crate::jvm::code::{Insn, InsnId, Instruction, MethodBody};
use crate::jvm::{BaseType, FieldType, UnqualifiedName};
use crate::util::Width;
use log::trace;

/// What relocating allocations did to a method
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelocationSummary {
    /// Number of allocations moved
    pub relocated: usize,

    /// Transient stack slots added on top of the original maximum
    pub extra_stack: usize,

    /// Local slots added for temporaries
    pub extra_locals: usize,
}

fn load(field_type: &FieldType, index: u16) -> Instruction {
    match field_type {
        FieldType::Base(BaseType::Long) => Instruction::LLoad(index),
        FieldType::Base(BaseType::Float) => Instruction::FLoad(index),
        FieldType::Base(BaseType::Double) => Instruction::DLoad(index),
        FieldType::Base(_) => Instruction::ILoad(index),
        FieldType::Ref(_) => Instruction::ALoad(index),
    }
}

fn store(field_type: &FieldType, index: u16) -> Instruction {
    match field_type {
        FieldType::Base(BaseType::Long) => Instruction::LStore(index),
        FieldType::Base(BaseType::Float) => Instruction::FStore(index),
        FieldType::Base(BaseType::Double) => Instruction::DStore(index),
        FieldType::Base(_) => Instruction::IStore(index),
        FieldType::Ref(_) => Instruction::AStore(index),
    }
}

fn inconsistent(message: String) -> Failure {
    Failure::InternalConsistency(message)
}

/// Code to place around the allocation, right before the initializer
struct Replacement {
    /// Before the `new`
    before: Vec<Instruction>,

    /// After the `new`
    after: Vec<Instruction>,

    extra_stack: usize,

    /// One past the highest temporary slot used
    locals_end: usize,
}

/// Choose the code that puts a fresh reference under the arguments already on the stack
///
/// `temporaries` is the first local slot free for saving arguments, in the general case.
fn replacement(
    parameters: &[FieldType],
    requires_dup: bool,
    temporaries: usize,
) -> Result<Replacement, Failure> {
    use Instruction::*;

    let widths: Vec<usize> = parameters.iter().map(Width::width).collect();
    let dup = if requires_dup { vec![Dup] } else { vec![] };
    let simple = |after: Vec<Instruction>, extra_stack: usize| Replacement {
        before: vec![],
        after,
        extra_stack,
        locals_end: temporaries,
    };

    Ok(match widths.as_slice() {
        [] => simple(dup, 0),
        [1] if requires_dup => simple(vec![Dup, Dup2X1, Pop2], 2),
        [1] => simple(vec![Swap], 0),
        [2] | [1, 1] if requires_dup => simple(vec![Dup, Dup2X2, Pop2], 2),
        [2] | [1, 1] => simple(vec![DupX2, Pop], 1),
        _ => {
            let mut before = vec![];
            let mut after = dup;
            let mut extra_stack = 0;
            let slot = |offset: usize| {
                u16::try_from(offset).map_err(|_| {
                    Failure::Encoding(jvm::Error::MethodCodeMaxLocalsOverflow(offset))
                })
            };

            // Save the arguments, last one first
            let mut offset = temporaries;
            for parameter in parameters.iter().rev() {
                before.push(store(parameter, slot(offset)?));
                offset += parameter.width();
            }
            let locals_end = offset;

            // Restore them, clearing reference temporaries as soon as they are reloaded
            for parameter in parameters {
                offset -= parameter.width();
                after.push(load(parameter, slot(offset)?));
                if let FieldType::Ref(_) = parameter {
                    after.push(AConstNull);
                    after.push(AStore(slot(offset)?));
                    extra_stack = 1;
                }
            }

            Replacement {
                before,
                after,
                extra_stack,
                locals_end,
            }
        }
    })
}

/// Detach the allocation and the shuffling instructions of its idiom
fn detach_allocation(body: &mut MethodBody, entry: &RelocationEntry) -> Result<(), Failure> {
    let instructions = &body.instructions;
    let allocation = entry.allocation;
    if !instructions.is_attached(allocation)
        || !instructions
            .get(allocation)
            .is_op(|op| matches!(op, Instruction::New(_)))
    {
        return Err(inconsistent(format!(
            "allocation {:?} is no longer a `new` in the method",
            allocation
        )));
    }

    let expect_next = |after: InsnId, expected: Instruction| -> Result<InsnId, Failure> {
        match next_instruction(instructions, after) {
            Some(next) if instructions.get(next).is_op(|op| *op == expected) => Ok(next),
            _ => Err(inconsistent(format!(
                "expected {:?} after {:?}",
                expected,
                instructions.get(after)
            ))),
        }
    };
    let shuffles: Vec<InsnId> = match entry.idiom {
        AllocationIdiom::Direct => vec![],
        AllocationIdiom::ViaDup => vec![expect_next(allocation, Instruction::Dup)?],
        AllocationIdiom::ViaDupX1Swap => {
            let dup = expect_next(allocation, Instruction::DupX1)?;
            vec![dup, expect_next(dup, Instruction::Swap)?]
        }
    };

    body.instructions.remove(allocation);
    for shuffle in shuffles {
        body.instructions.remove(shuffle);
    }
    Ok(())
}

/// Move each allocation so that it sits right before its initializer
///
/// The `new` node itself is moved (so its handle stays valid), the shuffling instructions of its
/// idiom are dropped, and whatever code is needed to get the fresh reference under the arguments
/// gets inserted. The maximum stack grows by the largest transient requirement of any entry;
/// temporaries for the general case start at the original `max_locals` and are shared between
/// entries.
pub fn relocate_allocations(
    body: &mut MethodBody,
    entries: &[RelocationEntry],
) -> Result<RelocationSummary, Failure> {
    let original_max_locals = body.max_locals;
    let mut max_locals = body.max_locals;
    let mut summary = RelocationSummary::default();

    for entry in entries {
        let parameters = match body.instructions.get(entry.initializer) {
            Insn::Op(Instruction::Invoke(_, method))
                if method.name == UnqualifiedName::INIT
                    && body.instructions.is_attached(entry.initializer) =>
            {
                method.descriptor.parameters.clone()
            }
            other => {
                return Err(inconsistent(format!(
                    "expected an attached initializer call, found {:?}",
                    other
                )))
            }
        };
        detach_allocation(body, entry)?;

        let replacement = replacement(
            &parameters,
            entry.idiom.requires_dup(),
            original_max_locals,
        )?;
        trace!(
            "{}.{}: moving {:?} ({:?}) before {:?}: {:?} new {:?}",
            body.owner,
            body.name,
            body.instructions.get(entry.allocation),
            entry.idiom,
            body.instructions.get(entry.initializer),
            replacement.before,
            replacement.after
        );

        for instruction in replacement.before {
            body.instructions.insert_before(entry.initializer, instruction);
        }
        body.instructions
            .move_before(entry.initializer, entry.allocation);
        for instruction in replacement.after {
            body.instructions.insert_before(entry.initializer, instruction);
        }

        summary.relocated += 1;
        summary.extra_stack = summary.extra_stack.max(replacement.extra_stack);
        max_locals = max_locals.max(replacement.locals_end);
    }

    body.max_stack += summary.extra_stack;
    summary.extra_locals = max_locals - original_max_locals;
    body.max_locals = max_locals;
    Ok(summary)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::continuation::fixtures::*;
    use crate::jvm::code::BranchInstruction;
    use crate::jvm::verifier::{Frame, Interpreter};
    use crate::jvm::{BinaryName, MethodDescriptor, ParseDescriptor, VerifierErrorKind};

    /// Symbolic value: a name and a width
    #[derive(Debug, Clone, PartialEq)]
    struct Sym(String, usize);

    impl Width for Sym {
        fn width(&self) -> usize {
            self.1
        }
    }

    /// Interpreter where values are just moved around, so that stacks can be compared
    struct Symbolic;

    impl Interpreter for Symbolic {
        type Value = Sym;

        fn this_value(&self, _body: &MethodBody) -> Sym {
            Sym(String::from("this"), 1)
        }
        fn parameter_value(&self, parameter: &FieldType) -> Sym {
            Sym(String::from("parameter"), parameter.width())
        }
        fn empty_value(&self) -> Sym {
            Sym(String::from("empty"), 1)
        }
        fn exception_value(&self, _catch_type: Option<&BinaryName>) -> Sym {
            Sym(String::from("exception"), 1)
        }
        fn copy_operation(
            &self,
            _id: InsnId,
            _instruction: &Instruction,
            value: &Sym,
        ) -> Result<Sym, VerifierErrorKind> {
            Ok(value.clone())
        }
        fn operation(
            &self,
            _id: InsnId,
            insn: &Insn,
            _arguments: &[Sym],
        ) -> Result<Option<Sym>, VerifierErrorKind> {
            Ok(match insn {
                Insn::Op(Instruction::New(_)) => Some(Sym(String::from("new"), 1)),
                Insn::Op(Instruction::AConstNull) => Some(Sym(String::from("null"), 1)),
                _ => None,
            })
        }
        fn initialize(&self, _receiver: &Sym) -> Option<Sym> {
            None
        }
        fn merge(&self, value1: &Sym, _value2: &Sym) -> Result<Sym, VerifierErrorKind> {
            Ok(value1.clone())
        }
    }

    /// Frame right before the initializer, starting from locals holding distinct arguments
    fn frame_at(body: &MethodBody, target: InsnId) -> Frame<Sym> {
        let mut locals = vec![];
        for (i, parameter) in body.descriptor.parameters.iter().enumerate() {
            locals.push(Sym(format!("arg{}", i), parameter.width()));
            if parameter.width() == 2 {
                locals.push(Sym(String::from("upper"), 1));
            }
        }
        locals.resize(body.max_locals, Sym(String::from("empty"), 1));
        let mut frame = Frame {
            locals,
            stack: vec![Sym(String::from("below"), 1)],
        };
        for (id, insn) in body.instructions.iter() {
            if id == target {
                return frame;
            }
            frame.execute(id, insn, &Symbolic).unwrap();
        }
        panic!("initializer not found")
    }

    fn loads(descriptor: &str) -> Vec<Insn> {
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        let mut offset = 0;
        let mut insns = vec![];
        for parameter in &descriptor.parameters {
            insns.push(Insn::Op(load(parameter, offset)));
            offset += parameter.width() as u16;
        }
        insns
    }

    /// Relocate `new Foo(args)` where the arguments are loaded from the method parameters, and
    /// check that the initializer sees the same stack before and after
    fn check_relocation(descriptor: &str, idiom: AllocationIdiom) -> (MethodBody, RelocationSummary) {
        let init_descriptor = format!("{}V", descriptor);
        let mut insns = vec![new_object("Foo")];
        if idiom == AllocationIdiom::ViaDup {
            insns.push(Insn::Op(Instruction::Dup));
        }
        insns.extend(loads(&init_descriptor));
        insns.push(init("Foo", &init_descriptor));
        insns.push(Insn::Branch(BranchInstruction::Return));

        let max_locals = MethodDescriptor::parse(&init_descriptor)
            .unwrap()
            .parameter_length(false);
        let (mut body, classifier) = classified_body(&init_descriptor, max_locals, 8, insns);
        let entry = RelocationEntry {
            allocation: body.instructions.first().unwrap(),
            initializer: classifier.initializer_calls[0],
            idiom,
        };

        let before = frame_at(&body, entry.initializer);
        let summary = relocate_allocations(&mut body, &[entry]).unwrap();
        let after = frame_at(&body, entry.initializer);
        assert_eq!(before.stack, after.stack, "stack for {} ({:?})", descriptor, idiom);
        (body, summary)
    }

    #[test]
    fn no_arguments() {
        let (body, summary) = check_relocation("()", AllocationIdiom::ViaDup);
        assert_eq!(summary.extra_stack, 0);
        assert_eq!(
            real_instructions(&body),
            vec![
                new_object("Foo"),
                Insn::Op(Instruction::Dup),
                init("Foo", "()V"),
                Insn::Branch(BranchInstruction::Return),
            ]
        );

        let (_, summary) = check_relocation("()", AllocationIdiom::Direct);
        assert_eq!(summary.relocated, 1);
    }

    #[test]
    fn one_narrow_argument() {
        let (body, summary) = check_relocation("(I)", AllocationIdiom::ViaDup);
        assert_eq!(summary.extra_stack, 2);
        assert_eq!(body.max_stack, 10);
        assert_eq!(
            real_instructions(&body),
            vec![
                Insn::Op(Instruction::ILoad(0)),
                new_object("Foo"),
                Insn::Op(Instruction::Dup),
                Insn::Op(Instruction::Dup2X1),
                Insn::Op(Instruction::Pop2),
                init("Foo", "(I)V"),
                Insn::Branch(BranchInstruction::Return),
            ]
        );

        let (body, summary) = check_relocation("(Ljava/lang/String;)", AllocationIdiom::Direct);
        assert_eq!(summary.extra_stack, 0);
        assert!(real_instructions(&body).contains(&Insn::Op(Instruction::Swap)));
    }

    #[test]
    fn two_argument_slots() {
        for descriptor in ["(J)", "(D)", "(IF)", "(Ljava/lang/Object;I)"] {
            let (_, summary) = check_relocation(descriptor, AllocationIdiom::ViaDup);
            assert_eq!(summary.extra_stack, 2, "{}", descriptor);
            assert_eq!(summary.extra_locals, 0, "{}", descriptor);

            let (body, summary) = check_relocation(descriptor, AllocationIdiom::Direct);
            assert_eq!(summary.extra_stack, 1, "{}", descriptor);
            assert!(real_instructions(&body).contains(&Insn::Op(Instruction::DupX2)));
        }
    }

    #[test]
    fn general_case_uses_temporaries() {
        let (body, summary) = check_relocation("(ILjava/lang/String;J)", AllocationIdiom::ViaDup);
        // Parameters take 4 slots, temporaries another 4
        assert_eq!(summary.extra_locals, 4);
        assert_eq!(body.max_locals, 8);
        assert_eq!(summary.extra_stack, 1);
        assert_eq!(
            real_instructions(&body),
            vec![
                Insn::Op(Instruction::ILoad(0)),
                Insn::Op(Instruction::ALoad(1)),
                Insn::Op(Instruction::LLoad(2)),
                Insn::Op(Instruction::LStore(4)),
                Insn::Op(Instruction::AStore(6)),
                Insn::Op(Instruction::IStore(7)),
                new_object("Foo"),
                Insn::Op(Instruction::Dup),
                Insn::Op(Instruction::ILoad(7)),
                Insn::Op(Instruction::ALoad(6)),
                Insn::Op(Instruction::AConstNull),
                Insn::Op(Instruction::AStore(6)),
                Insn::Op(Instruction::LLoad(4)),
                init("Foo", "(ILjava/lang/String;J)V"),
                Insn::Branch(BranchInstruction::Return),
            ]
        );
    }

    #[test]
    fn reference_temporaries_are_cleared() {
        let (body, _) = check_relocation(
            "([ILjava/lang/Object;Ljava/lang/Object;)",
            AllocationIdiom::Direct,
        );
        let initializer = body
            .instructions
            .iter()
            .find(|(_, insn)| insn.is_op(|op| matches!(op, Instruction::Invoke(_, _))))
            .map(|(id, _)| id)
            .unwrap();
        let frame = frame_at(&body, initializer);
        for slot in 3..6 {
            assert_eq!(frame.locals[slot], Sym(String::from("null"), 1), "slot {}", slot);
        }
    }

    #[test]
    fn broken_pattern_is_an_internal_failure() {
        let (mut body, classifier) = classified_body(
            "()V",
            0,
            2,
            vec![
                new_object("Foo"),
                Insn::Op(Instruction::IConst0),
                init("Foo", "(I)V"),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let entry = RelocationEntry {
            allocation: body.instructions.first().unwrap(),
            initializer: classifier.initializer_calls[0],
            idiom: AllocationIdiom::ViaDup,
        };
        assert!(matches!(
            relocate_allocations(&mut body, &[entry]),
            Err(Failure::InternalConsistency(_))
        ));
    }
}
