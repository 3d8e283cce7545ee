use super::Failure;
use crate::jvm;
use crate::jvm::code::{Insn, InsnId, InsnList, Instruction, MethodBody};
use crate::jvm::verifier::{analyze, Frames, SourceInterpreter, SourceValue};
use log::{debug, warn};
use std::collections::HashSet;

/// How the receiver of an initializer was traced back to its allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationIdiom {
    /// The receiver is the value pushed by `new`
    Direct,

    /// `new; dup`: the receiver is the copy pushed by `dup`
    ViaDup,

    /// `new; dup_x1; swap`: the allocation gets moved under a value already on the stack (this is
    /// what shows up when constructing an object around a caught exception)
    ViaDupX1Swap,
}

impl AllocationIdiom {
    /// Does a copy of the reference have to be left on the stack after the initializer?
    pub fn requires_dup(self) -> bool {
        !matches!(self, AllocationIdiom::Direct)
    }
}

/// Allocation to move right in front of the initializer consuming it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    /// The `new` instruction
    pub allocation: InsnId,

    /// The `invokespecial <init>` consuming the allocation
    pub initializer: InsnId,

    pub idiom: AllocationIdiom,
}

/// Initializer receiver which could not be traced through any known idiom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedIdiom {
    pub initializer: InsnId,

    /// The instruction which produced the receiver
    pub producer: InsnId,
}

/// Outcome of the allocation provenance analysis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceReport {
    /// Relocations, in the order of their initializer calls
    pub relocations: Vec<RelocationEntry>,

    /// Receiver producers matching no idiom (left untouched)
    pub skipped: Vec<SkippedIdiom>,
}

/// Previous node which is not a line number marker
pub fn previous_instruction(instructions: &InsnList, id: InsnId) -> Option<InsnId> {
    let mut cursor = instructions.prev(id);
    while let Some(prev) = cursor {
        if !matches!(instructions.get(prev), Insn::LineNumber(_)) {
            return Some(prev);
        }
        cursor = instructions.prev(prev);
    }
    None
}

/// Next node which is not a line number marker
pub fn next_instruction(instructions: &InsnList, id: InsnId) -> Option<InsnId> {
    let mut cursor = instructions.next(id);
    while let Some(next) = cursor {
        if !matches!(instructions.get(next), Insn::LineNumber(_)) {
            return Some(next);
        }
        cursor = instructions.next(next);
    }
    None
}

fn is_op(instructions: &InsnList, id: Option<InsnId>, pred: impl FnOnce(&Instruction) -> bool) -> bool {
    id.map_or(false, |id| instructions.get(id).is_op(pred))
}

/// Outcome of matching one producer of an initializer receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdiomMatch {
    Allocation(InsnId, AllocationIdiom),

    /// The receiver comes from a local variable (`this` in a constructor, for instance)
    ///
    /// A local holding a spilled `new` is still an allocation: see [`holds_allocation`].
    NotAnAllocation,

    Unrecognized,
}

/// Trace a producer of an initializer receiver back to its allocation
pub fn match_idiom(instructions: &InsnList, producer: InsnId) -> IdiomMatch {
    let is_new = |id: Option<InsnId>| is_op(instructions, id, |op| matches!(op, Instruction::New(_)));
    match instructions.get(producer) {
        Insn::Op(Instruction::New(_)) => IdiomMatch::Allocation(producer, AllocationIdiom::Direct),
        Insn::Op(Instruction::Dup) => {
            let prev = previous_instruction(instructions, producer);
            match prev {
                Some(allocation) if is_new(prev) => {
                    IdiomMatch::Allocation(allocation, AllocationIdiom::ViaDup)
                }
                _ => IdiomMatch::Unrecognized,
            }
        }
        Insn::Op(Instruction::Swap) => {
            let prev1 = previous_instruction(instructions, producer);
            let prev2 = prev1.and_then(|prev1| previous_instruction(instructions, prev1));
            match prev2 {
                Some(allocation)
                    if is_op(instructions, prev1, |op| *op == Instruction::DupX1)
                        && is_new(prev2) =>
                {
                    IdiomMatch::Allocation(allocation, AllocationIdiom::ViaDupX1Swap)
                }
                _ => IdiomMatch::Unrecognized,
            }
        }
        Insn::Op(Instruction::ALoad(_)) => IdiomMatch::NotAnAllocation,
        _ => IdiomMatch::Unrecognized,
    }
}

/// Can the value pushed by this producer be the result of a `new`?
///
/// Follows values through local variable loads and stores, and through the `dup`/`swap` family.
/// The stack shuffling instructions are followed through every value they may have moved.
pub fn holds_allocation(
    instructions: &InsnList,
    frames: &Frames<SourceValue>,
    producer: InsnId,
) -> bool {
    let mut visited: HashSet<InsnId> = HashSet::new();
    let mut to_visit = vec![producer];
    while let Some(id) = to_visit.pop() {
        if !visited.insert(id) {
            continue;
        }
        let frame = match frames.get(id) {
            Some(frame) => frame,
            None => continue,
        };
        let inputs: Vec<&SourceValue> = match instructions.get(id) {
            Insn::Op(Instruction::New(_)) => return true,
            Insn::Op(Instruction::ALoad(index)) => {
                frame.locals.get(*index as usize).into_iter().collect()
            }
            Insn::Op(Instruction::AStore(_)) => frame.stack_value(0).into_iter().collect(),
            Insn::Op(
                Instruction::Dup
                | Instruction::DupX1
                | Instruction::DupX2
                | Instruction::Dup2
                | Instruction::Dup2X1
                | Instruction::Dup2X2
                | Instruction::Swap,
            ) => frame.stack.iter().rev().take(4).collect(),
            _ => vec![],
        };
        to_visit.extend(inputs.into_iter().flat_map(|value| value.insns.iter().copied()));
    }
    false
}

/// Find the allocations to move in front of their initializer calls
///
/// A provenance analysis gives, for the frame before each initializer call, the set of
/// instructions which may have pushed the receiver. Each producer is matched against the known
/// allocation idioms. Allocations get relocated at most once: if several initializers trace back
/// to the same `new`, the first one wins.
pub fn find_relocations(
    body: &MethodBody,
    initializer_calls: &[InsnId],
) -> Result<ProvenanceReport, Failure> {
    let frames = analyze(body, &SourceInterpreter)
        .map_err(|err| Failure::analysis(jvm::Error::from(err)))?;

    let mut report = ProvenanceReport::default();
    let mut relocated: HashSet<InsnId> = HashSet::new();
    for initializer in initializer_calls {
        let argument_count = match body.instructions.get(*initializer) {
            Insn::Op(Instruction::Invoke(_, method)) => method.descriptor.parameters.len(),
            other => {
                return Err(Failure::InternalConsistency(format!(
                    "expected an initializer call, found {:?}",
                    other
                )))
            }
        };
        let frame = match frames.get(*initializer) {
            Some(frame) => frame,
            None => continue,
        };
        let receiver = frame.stack_value(argument_count).ok_or_else(|| {
            Failure::InternalConsistency(String::from("initializer receiver missing from the stack"))
        })?;

        for producer in &receiver.insns {
            let matched = match match_idiom(&body.instructions, *producer) {
                IdiomMatch::NotAnAllocation
                    if holds_allocation(&body.instructions, &frames, *producer) =>
                {
                    IdiomMatch::Unrecognized
                }
                matched => matched,
            };
            match matched {
                IdiomMatch::Allocation(allocation, idiom) => {
                    if relocated.insert(allocation) {
                        report.relocations.push(RelocationEntry {
                            allocation,
                            initializer: *initializer,
                            idiom,
                        });
                    } else {
                        debug!(
                            "{}.{}: allocation {:?} already relocated",
                            body.owner, body.name, allocation
                        );
                    }
                }
                IdiomMatch::NotAnAllocation => (),
                IdiomMatch::Unrecognized => {
                    warn!(
                        "{}.{}: initializer receiver produced by unrecognized {:?}",
                        body.owner,
                        body.name,
                        body.instructions.get(*producer)
                    );
                    report.skipped.push(SkippedIdiom {
                        initializer: *initializer,
                        producer: *producer,
                    });
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::continuation::fixtures::*;
    use crate::jvm::code::{BranchInstruction, InvokeType};

    #[test]
    fn allocation_via_dup() {
        let (body, classifier) = classified_body(
            "()V",
            0,
            3,
            vec![
                new_object("Foo"),
                Insn::Op(Instruction::Dup),
                invoke(InvokeType::Static, "Test", "helper", "()I"),
                init("Foo", "(I)V"),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let report = find_relocations(&body, &classifier.initializer_calls).unwrap();
        let allocation = body.instructions.first().unwrap();
        assert_eq!(
            report.relocations,
            vec![RelocationEntry {
                allocation,
                initializer: classifier.initializer_calls[0],
                idiom: AllocationIdiom::ViaDup,
            }]
        );
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn direct_allocation() {
        let (body, classifier) = classified_body(
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
        let report = find_relocations(&body, &classifier.initializer_calls).unwrap();
        assert_eq!(report.relocations.len(), 1);
        assert_eq!(report.relocations[0].idiom, AllocationIdiom::Direct);
        assert_eq!(report.relocations[0].allocation, body.instructions.first().unwrap());
    }

    #[test]
    fn allocation_around_caught_exception() {
        let (body, classifier) = classified_body(
            "(Ljava/lang/Throwable;)V",
            1,
            4,
            vec![
                Insn::Op(Instruction::ALoad(0)),
                new_object("Wrapper"),
                Insn::Op(Instruction::DupX1),
                Insn::Op(Instruction::Swap),
                init("Wrapper", "(Ljava/lang/Throwable;)V"),
                Insn::Branch(BranchInstruction::AThrow),
            ],
        );
        let report = find_relocations(&body, &classifier.initializer_calls).unwrap();
        let ids = body.instructions.ids();
        assert_eq!(
            report.relocations,
            vec![RelocationEntry {
                allocation: ids[1],
                initializer: classifier.initializer_calls[0],
                idiom: AllocationIdiom::ViaDupX1Swap,
            }]
        );
    }

    #[test]
    fn super_constructor_call_is_not_an_allocation() {
        let (body, classifier) = classified_body(
            "(LTest;)V",
            1,
            1,
            vec![
                Insn::Op(Instruction::ALoad(0)),
                init("java/lang/Object", "()V"),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let report = find_relocations(&body, &classifier.initializer_calls).unwrap();
        assert_eq!(report, ProvenanceReport::default());
    }

    #[test]
    fn allocation_spilled_to_locals_is_counted() {
        let (body, classifier) = classified_body(
            "()V",
            2,
            3,
            vec![
                new_object("Foo"),
                Insn::Op(Instruction::Dup),
                Insn::Op(Instruction::AStore(0)),
                Insn::Op(Instruction::AStore(1)),
                invoke(InvokeType::Static, "Test", "helper", "()I"),
                Insn::Op(Instruction::ALoad(1)),
                Insn::Op(Instruction::Swap),
                Insn::Op(Instruction::Pop),
                Insn::Op(Instruction::ALoad(0)),
                init("Foo", "()V"),
                Insn::Op(Instruction::ALoad(1)),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let report = find_relocations(&body, &classifier.initializer_calls).unwrap();
        let aload = body
            .instructions
            .ids()
            .into_iter()
            .filter(|id| *body.instructions.get(*id) == Insn::Op(Instruction::ALoad(0)))
            .last()
            .unwrap();
        assert!(report.relocations.is_empty());
        assert_eq!(
            report.skipped,
            vec![SkippedIdiom {
                initializer: classifier.initializer_calls[0],
                producer: aload,
            }]
        );
    }

    #[test]
    fn unrecognized_idiom_is_counted() {
        let (body, classifier) = classified_body(
            "()V",
            0,
            3,
            vec![
                new_object("Foo"),
                Insn::Op(Instruction::IConst0),
                Insn::Op(Instruction::Pop),
                Insn::Op(Instruction::Dup),
                init("Foo", "()V"),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let report = find_relocations(&body, &classifier.initializer_calls).unwrap();
        let ids = body.instructions.ids();
        assert!(report.relocations.is_empty());
        assert_eq!(
            report.skipped,
            vec![SkippedIdiom {
                initializer: classifier.initializer_calls[0],
                producer: ids[3],
            }]
        );
    }

    #[test]
    fn line_numbers_do_not_break_idioms() {
        let (body, classifier) = classified_body(
            "()V",
            0,
            2,
            vec![
                new_object("Foo"),
                Insn::LineNumber(12),
                Insn::Op(Instruction::Dup),
                init("Foo", "()V"),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
        );
        let report = find_relocations(&body, &classifier.initializer_calls).unwrap();
        assert_eq!(report.relocations.len(), 1);
        assert_eq!(report.relocations[0].idiom, AllocationIdiom::ViaDup);
    }
}
