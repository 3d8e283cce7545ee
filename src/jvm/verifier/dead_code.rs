use super::Frames;
use crate::jvm::code::{BranchInstruction, Insn, InsnId, Instruction, Label, MethodBody, TryCatchBlock};
use std::collections::HashMap;

/// Replace unreachable code with `nop`s followed by `athrow`
///
/// Unreachable code still gets verified, but there is no frame that could describe it. Each
/// maximal run of unreachable instructions gets overwritten so that a frame with an empty set of
/// locals and just a `Throwable` on the stack is valid for it. Exception handler ranges get split
/// around the runs so that the runs are not covered by any handler.
///
/// Returns the number of runs replaced.
pub fn fill_dead_code<V>(body: &mut MethodBody, frames: &Frames<V>) -> usize {
    let mut runs: Vec<(InsnId, InsnId)> = vec![];
    let mut current: Option<(InsnId, InsnId)> = None;
    for (id, insn) in body.instructions.iter() {
        if !insn.is_real() {
            continue;
        }
        if frames.is_reachable(id) {
            runs.extend(current.take());
        } else {
            current = Some(match current {
                None => (id, id),
                Some((first, _)) => (first, id),
            });
        }
    }
    runs.extend(current);

    let mut boundaries: Vec<(Label, Label)> = vec![];
    for (first, last) in &runs {
        let mut cursor = Some(*first);
        while let Some(id) = cursor {
            if body.instructions.get(id).is_real() {
                *body.instructions.get_mut(id) = if id == *last {
                    Insn::Branch(BranchInstruction::AThrow)
                } else {
                    Insn::Op(Instruction::Nop)
                };
            }
            cursor = if id == *last {
                None
            } else {
                body.instructions.next(id)
            };
        }

        let start = body.fresh_label();
        let end = body.fresh_label();
        body.instructions.insert_before(*first, Insn::Label(start));
        body.instructions.insert_after(*last, Insn::Label(end));
        boundaries.push((start, end));
    }

    if !boundaries.is_empty() {
        split_handlers(body, &boundaries);
    }
    runs.len()
}

fn split_handlers(body: &mut MethodBody, boundaries: &[(Label, Label)]) {
    let mut positions: HashMap<Label, usize> = HashMap::new();
    let mut real_before: Vec<usize> = vec![];
    let mut real_count = 0;
    for (position, (_, insn)) in body.instructions.iter().enumerate() {
        if let Insn::Label(label) = insn {
            positions.insert(*label, position);
        }
        real_before.push(real_count);
        if insn.is_real() {
            real_count += 1;
        }
    }
    let position = |label: &Label| positions.get(label).copied();

    let mut blocks: Vec<TryCatchBlock> = vec![];
    for block in &body.try_catch_blocks {
        let mut pieces = vec![(block.start, block.end)];
        for (dead_start, dead_end) in boundaries {
            let mut split = vec![];
            for (start, end) in pieces {
                match (position(&start), position(&end), position(dead_start), position(dead_end)) {
                    (Some(s), Some(e), Some(ds), Some(de)) if s < de && ds < e => {
                        if s < ds {
                            split.push((start, *dead_start));
                        }
                        if de < e {
                            split.push((*dead_end, end));
                        }
                    }
                    _ => split.push((start, end)),
                }
            }
            pieces = split;
        }

        for (start, end) in pieces {
            let covers_code = match (position(&start), position(&end)) {
                (Some(s), Some(e)) => real_before[s] < real_before[e],
                _ => true,
            };
            if covers_code {
                blocks.push(TryCatchBlock {
                    start,
                    end,
                    ..block.clone()
                });
            }
        }
    }
    body.try_catch_blocks = blocks;
}
