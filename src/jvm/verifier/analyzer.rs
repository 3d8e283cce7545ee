use super::{Frame, Interpreter};
use crate::jvm::code::{Insn, InsnId, Label, MethodBody};
use crate::jvm::{BinaryName, Error, VerifierErrorKind};
use log::trace;
use std::collections::HashMap;

/// Failure of the analysis at a given position in the instruction list
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerError {
    /// Position of the offending node (counting labels and line markers)
    pub instruction: usize,
    pub kind: VerifierErrorKind,
}

impl From<AnalyzerError> for Error {
    fn from(err: AnalyzerError) -> Error {
        Error::VerifierError {
            instruction: err.instruction,
            kind: err.kind,
        }
    }
}

/// Result of analyzing a method: the frame before each node in the instruction list
#[derive(Debug, Clone)]
pub struct Frames<V> {
    order: Vec<InsnId>,
    positions: HashMap<InsnId, usize>,
    frames: Vec<Option<Frame<V>>>,

    /// Largest stack height observed (in words)
    pub max_stack: usize,

    /// Number of local slots used by the frames
    pub max_locals: usize,
}

impl<V> Frames<V> {
    /// Frame before the given node, or `None` if the node is unreachable (or not in the list)
    pub fn get(&self, id: InsnId) -> Option<&Frame<V>> {
        self.position(id)
            .and_then(|position| self.frames[position].as_ref())
    }

    /// Position of a node in the analyzed order
    pub fn position(&self, id: InsnId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn is_reachable(&self, id: InsnId) -> bool {
        self.get(id).is_some()
    }

    /// Nodes in list order, alongside the frame before them
    pub fn iter(&self) -> impl Iterator<Item = (InsnId, Option<&Frame<V>>)> + '_ {
        self.order
            .iter()
            .zip(self.frames.iter())
            .map(|(id, frame)| (*id, frame.as_ref()))
    }
}

struct Handler<'a> {
    start: usize,
    end: usize,
    handler: usize,
    catch_type: Option<&'a BinaryName>,
}

/// Forward dataflow analysis over a method body
///
/// Starting from the entry frame, frames are propagated to every successor of each node (the
/// next node, branch targets, and the handlers covering the node) and merged until a fixed point
/// is reached. What the values mean is entirely up to the interpreter.
pub fn analyze<I: Interpreter>(
    body: &MethodBody,
    interpreter: &I,
) -> Result<Frames<I::Value>, AnalyzerError> {
    let order = body.instructions.ids();
    let positions: HashMap<InsnId, usize> = order
        .iter()
        .enumerate()
        .map(|(position, id)| (*id, position))
        .collect();
    let mut label_positions: HashMap<Label, usize> = HashMap::new();
    for (position, id) in order.iter().enumerate() {
        if let Insn::Label(label) = body.instructions.get(*id) {
            label_positions.insert(*label, position);
        }
    }
    let label_position = |label: &Label, at: usize| -> Result<usize, AnalyzerError> {
        label_positions
            .get(label)
            .copied()
            .ok_or(AnalyzerError {
                instruction: at,
                kind: VerifierErrorKind::UnknownLabel(*label),
            })
    };

    let handlers = body
        .try_catch_blocks
        .iter()
        .map(|block| {
            Ok(Handler {
                start: label_position(&block.start, 0)?,
                end: label_position(&block.end, 0)?,
                handler: label_position(&block.handler, 0)?,
                catch_type: block.catch_type.as_ref().map(|(_, name)| name),
            })
        })
        .collect::<Result<Vec<_>, AnalyzerError>>()?;

    let count = order.len();
    let mut frames: Vec<Option<Frame<I::Value>>> = vec![None; count];
    let mut max_stack = 0;
    let mut max_locals = body.max_locals;
    if count == 0 {
        return Ok(Frames {
            order,
            positions,
            frames,
            max_stack,
            max_locals,
        });
    }

    let entry = Frame::initial(body, interpreter).map_err(|kind| AnalyzerError {
        instruction: 0,
        kind,
    })?;
    max_locals = max_locals.max(entry.locals.len());
    frames[0] = Some(entry);

    let mut queued = vec![false; count];
    let mut worklist = vec![0];
    queued[0] = true;

    while let Some(position) = worklist.pop() {
        queued[position] = false;
        let id = order[position];
        let insn = body.instructions.get(id);
        let at = |kind| AnalyzerError {
            instruction: position,
            kind,
        };

        let before = match &frames[position] {
            Some(frame) => frame.clone(),
            None => continue,
        };
        let mut after = before.clone();
        after.execute(id, insn, interpreter).map_err(at)?;
        max_stack = max_stack.max(before.stack_words()).max(after.stack_words());
        trace!("analyzed {:?} at {}: {:?}", insn, position, after);

        let mut successors = vec![];
        let falls_through = match insn {
            Insn::Branch(branch) => {
                for target in branch.targets() {
                    successors.push(label_position(target, position)?);
                }
                branch.falls_through()
            }
            _ => true,
        };
        if falls_through {
            if position + 1 == count {
                return Err(at(VerifierErrorKind::FallOffEnd));
            }
            successors.push(position + 1);
        }

        for successor in successors {
            merge_into(
                &mut frames,
                &mut worklist,
                &mut queued,
                successor,
                &after,
                interpreter,
            )?;
        }

        for handler in &handlers {
            if handler.start <= position && position < handler.end {
                let exception = interpreter.exception_value(handler.catch_type);
                for frame in [&before, &after] {
                    let handler_frame = frame.exception_frame(exception.clone());
                    merge_into(
                        &mut frames,
                        &mut worklist,
                        &mut queued,
                        handler.handler,
                        &handler_frame,
                        interpreter,
                    )?;
                }
            }
        }
    }

    Ok(Frames {
        order,
        positions,
        frames,
        max_stack,
        max_locals,
    })
}

fn merge_into<I: Interpreter>(
    frames: &mut [Option<Frame<I::Value>>],
    worklist: &mut Vec<usize>,
    queued: &mut [bool],
    position: usize,
    incoming: &Frame<I::Value>,
    interpreter: &I,
) -> Result<(), AnalyzerError> {
    let changed = if let Some(existing) = &mut frames[position] {
        existing
            .merge(incoming, interpreter)
            .map_err(|kind| AnalyzerError {
                instruction: position,
                kind,
            })?
    } else {
        frames[position] = Some(incoming.clone());
        true
    };
    if changed && !queued[position] {
        queued[position] = true;
        worklist.push(position);
    }
    Ok(())
}
