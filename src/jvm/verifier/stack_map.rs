use super::{Frame, Frames, VType, VerificationType};
use crate::jvm::class_file::{ClassConstantIndex, ConstantsPool, StackMapFrame, StackMapTable};
use crate::jvm::code::{Insn, Layout, MethodBody};
use crate::jvm::{BinaryName, Error, RefType};
use crate::util::Width;
use std::collections::{BTreeSet, HashMap};

/// Verification type, as it gets serialized into a class file
pub type SerializableType = VerificationType<ClassConstantIndex, u16>;

/// Offsets which need an explicit frame in the `StackMapTable`
///
/// Those are jump targets, exception handler entries, and instructions following an
/// instruction which does not fall through. The first instruction of unreachable code also needs
/// a frame (but it is always covered by the last case).
fn frame_offsets(body: &MethodBody, layout: &Layout) -> Result<BTreeSet<usize>, Error> {
    let mut offsets = BTreeSet::new();
    let mut after_jump = false;
    for (id, insn) in body.instructions.iter() {
        match insn {
            Insn::Branch(branch) => {
                if after_jump {
                    offsets.insert(layout.offsets[&id]);
                }
                for target in branch.targets() {
                    offsets.insert(layout.label_offset(*target)?);
                }
                after_jump = !branch.falls_through();
            }
            Insn::Op(_) => {
                if after_jump {
                    offsets.insert(layout.offsets[&id]);
                }
                after_jump = false;
            }
            Insn::Label(_) | Insn::LineNumber(_) => (),
        }
    }
    for block in &body.try_catch_blocks {
        offsets.insert(layout.label_offset(block.handler)?);
    }
    offsets.retain(|offset| *offset < layout.code_length);
    Ok(offsets)
}

/// Locals as listed in a stack map frame: one entry per value, trailing `top` dropped
fn compress_locals(locals: &[VType]) -> Vec<&VType> {
    let mut compressed = vec![];
    let mut slot = 0;
    while slot < locals.len() {
        compressed.push(&locals[slot]);
        slot += locals[slot].width();
    }
    while let Some(VerificationType::Top) = compressed.last() {
        compressed.pop();
    }
    compressed
}

fn serializable_type(
    vtype: &VType,
    constants: &mut ConstantsPool,
    layout: &Layout,
) -> Result<SerializableType, Error> {
    vtype.map(
        |class| constants.get_class(class),
        |uninitialized| {
            let offset = layout.offsets.get(&uninitialized.allocation).ok_or_else(|| {
                Error::Malformed(format!(
                    "allocation of {:?} is no longer in the method",
                    uninitialized.class
                ))
            })?;
            u16::try_from(*offset).map_err(|_| Error::MethodCodeOverflow(*offset))
        },
    )
}

fn serializable_frame(
    frame: &Frame<VType>,
    constants: &mut ConstantsPool,
    layout: &Layout,
) -> Result<Frame<SerializableType>, Error> {
    Ok(Frame {
        locals: compress_locals(&frame.locals)
            .into_iter()
            .map(|vtype| serializable_type(vtype, constants, layout))
            .collect::<Result<_, _>>()?,
        stack: frame
            .stack
            .iter()
            .map(|vtype| serializable_type(vtype, constants, layout))
            .collect::<Result<_, _>>()?,
    })
}

/// Compute the `StackMapTable` of a method from the frames of a type analysis
///
/// Unreachable instructions get a frame with no locals and a `Throwable` on the stack. This only
/// verifies if each unreachable run is `nop`s followed by an `athrow` (see
/// [`super::fill_dead_code`]).
pub fn stack_map_table(
    body: &MethodBody,
    frames: &Frames<VType>,
    layout: &Layout,
    constants: &mut ConstantsPool,
) -> Result<StackMapTable, Error> {
    let offsets = frame_offsets(body, layout)?;

    // Frame before the first real instruction at each offset
    let mut frame_at_offset: HashMap<usize, Option<&Frame<VType>>> = HashMap::new();
    for (id, frame) in frames.iter() {
        if body.instructions.get(id).is_real() {
            frame_at_offset.entry(layout.offsets[&id]).or_insert(frame);
        }
    }

    let mut previous = match frames.iter().next().and_then(|(_, frame)| frame) {
        Some(initial) => serializable_frame(initial, constants, layout)?,
        None => return Ok(StackMapTable(vec![])),
    };
    let throwable = constants.get_class(&RefType::Object(BinaryName::THROWABLE))?;
    let dead_frame = Frame {
        locals: vec![],
        stack: vec![VerificationType::Object(throwable)],
    };

    let mut stack_map_frames = vec![];
    let mut previous_offset: Option<usize> = None;
    for offset in offsets {
        let frame = match frame_at_offset.get(&offset).copied().flatten() {
            Some(frame) => serializable_frame(frame, constants, layout)?,
            None => dead_frame.clone(),
        };
        let offset_delta = match previous_offset {
            None => offset,
            Some(previous_offset) => offset - previous_offset - 1,
        };
        let offset_delta =
            u16::try_from(offset_delta).map_err(|_| Error::MethodCodeOverflow(offset))?;

        stack_map_frames.push(frame.stack_map_frame(offset_delta, &previous));
        previous = frame;
        previous_offset = Some(offset);
    }

    Ok(StackMapTable(stack_map_frames))
}

impl Frame<SerializableType> {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option using [`Self::full_stack_map_frame`] only if none
    /// of the other stack map frame variants are enough to encode the transition.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        match self.stack.len() {
            0 => {
                let this_locals_len = self.locals.len();
                let prev_locals_len = previous_frame.locals.len();

                if this_locals_len <= prev_locals_len {
                    let len_difference = prev_locals_len - this_locals_len;
                    let this_is_prefix_of_prev = self
                        .locals
                        .iter()
                        .zip(previous_frame.locals.iter())
                        .all(|(t1, t2)| t1 == t2);

                    if len_difference < 4 && this_is_prefix_of_prev {
                        if len_difference == 0 {
                            return StackMapFrame::SameLocalsNoStack { offset_delta };
                        } else {
                            return StackMapFrame::ChopLocalsNoStack {
                                offset_delta,
                                chopped_k: len_difference as u8,
                            };
                        }
                    }
                } else if this_locals_len - prev_locals_len < 4 {
                    let prev_is_prefix_of_this = previous_frame
                        .locals
                        .iter()
                        .zip(self.locals.iter())
                        .all(|(t1, t2)| t1 == t2);

                    if prev_is_prefix_of_this {
                        return StackMapFrame::AppendLocalsNoStack {
                            offset_delta,
                            locals: self.locals[prev_locals_len..].to_vec(),
                        };
                    }
                }
            }
            1 if self.locals == previous_frame.locals => {
                return StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack: self.stack[0],
                }
            }
            _ => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a `Full` stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.clone(),
            locals: self.locals.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::{ClassGraph, ClassGraphArenas, TypeHierarchy};
    use crate::jvm::code::{
        layout, BranchInstruction, Instruction, LabelGenerator, OrdComparison,
    };
    use crate::jvm::verifier::{analyze, fill_dead_code, TypeInterpreter};
    use crate::jvm::{MethodAccessFlags, MethodDescriptor, ParseDescriptor};

    fn body(descriptor: &str, insns: Vec<Insn>, labels: LabelGenerator) -> MethodBody {
        let mut body = MethodBody::new(
            "Test".parse().unwrap(),
            "run".parse().unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            MethodAccessFlags::STATIC,
        );
        for insn in insns {
            body.instructions.push_back(insn);
        }
        body.labels = labels;
        body
    }

    #[test]
    fn branch_target_gets_same_frame() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let interpreter = TypeInterpreter::new(
            TypeHierarchy::new(&class_graph),
            RefType::Object("Test".parse().unwrap()),
        );

        let mut labels = LabelGenerator::new();
        let zero = labels.fresh_label();
        let mut body = body(
            "(I)I",
            vec![
                Insn::Op(Instruction::ILoad(0)),
                Insn::Branch(BranchInstruction::If(OrdComparison::EQ, zero)),
                Insn::Op(Instruction::IConst1),
                Insn::Branch(BranchInstruction::IReturn),
                Insn::Label(zero),
                Insn::Op(Instruction::IConst0),
                Insn::Branch(BranchInstruction::IReturn),
            ],
            labels,
        );
        body.max_locals = 1;

        let frames = analyze(&body, &interpreter).unwrap();
        assert_eq!(frames.max_stack, 1);
        let layout = layout(&body).unwrap();
        let mut constants = ConstantsPool::new();
        let table = stack_map_table(&body, &frames, &layout, &mut constants).unwrap();
        assert_eq!(
            table.0,
            vec![StackMapFrame::SameLocalsNoStack { offset_delta: 6 }]
        );
    }

    #[test]
    fn dead_code_becomes_athrow() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let interpreter = TypeInterpreter::new(
            TypeHierarchy::new(&class_graph),
            RefType::Object("Test".parse().unwrap()),
        );

        let mut body = body(
            "()V",
            vec![
                Insn::Branch(BranchInstruction::Return),
                Insn::Op(Instruction::IConst0),
                Insn::Op(Instruction::Pop),
                Insn::Branch(BranchInstruction::Return),
            ],
            LabelGenerator::new(),
        );

        let frames = analyze(&body, &interpreter).unwrap();
        assert_eq!(fill_dead_code(&mut body, &frames), 1);
        let real: Vec<Insn> = body
            .instructions
            .iter()
            .map(|(_, insn)| insn.clone())
            .filter(Insn::is_real)
            .collect();
        assert_eq!(
            real,
            vec![
                Insn::Branch(BranchInstruction::Return),
                Insn::Op(Instruction::Nop),
                Insn::Op(Instruction::Nop),
                Insn::Branch(BranchInstruction::AThrow),
            ]
        );

        let frames = analyze(&body, &interpreter).unwrap();
        let layout = layout(&body).unwrap();
        let mut constants = ConstantsPool::new();
        let table = stack_map_table(&body, &frames, &layout, &mut constants).unwrap();
        let throwable = constants
            .get_class(&RefType::Object(BinaryName::THROWABLE))
            .unwrap();
        assert_eq!(
            table.0,
            vec![StackMapFrame::SameLocalsOneStack {
                offset_delta: 1,
                stack: VerificationType::Object(throwable),
            }]
        );
    }

    #[test]
    fn wide_locals_are_listed_once() {
        let locals = [
            VerificationType::Long,
            VerificationType::Top,
            VerificationType::Integer,
            VerificationType::Top,
            VerificationType::Top,
        ];
        assert_eq!(
            compress_locals(&locals),
            vec![&VerificationType::Long, &VerificationType::Integer]
        );
    }
}
