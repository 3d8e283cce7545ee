use super::Interpreter;
use crate::jvm::code::{BranchInstruction, Insn, InsnId, Instruction, InvokeType, MethodBody};
use crate::jvm::{UnqualifiedName, VerifierErrorKind};
use crate::util::Width;
use std::fmt::Debug;

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Every local variable slot gets an entry (so a `long` in slot `n` has an empty value in slot
/// `n + 1`) while every stack value gets exactly one entry, regardless of its width.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame<V> {
    /// Local variables in scope
    pub locals: Vec<V>,

    /// Values on the stack (top of the stack last)
    pub stack: Vec<V>,
}

impl<V: Clone + PartialEq + Debug + Width> Frame<V> {
    /// Frame on entry to the method
    pub fn initial<I: Interpreter<Value = V>>(
        body: &MethodBody,
        interpreter: &I,
    ) -> Result<Frame<V>, VerifierErrorKind> {
        let mut locals = vec![];
        if !body.is_static() {
            locals.push(interpreter.this_value(body));
        }
        for parameter in &body.descriptor.parameters {
            locals.push(interpreter.parameter_value(parameter));
            if parameter.width() == 2 {
                locals.push(interpreter.empty_value());
            }
        }
        if locals.len() > body.max_locals {
            return Err(VerifierErrorKind::TooManyParameters(locals.len()));
        }
        locals.resize(body.max_locals, interpreter.empty_value());

        Ok(Frame {
            locals,
            stack: vec![],
        })
    }

    /// Size of the stack, in words (`long` and `double` count twice)
    pub fn stack_words(&self) -> usize {
        self.stack.width()
    }

    /// Value at the given depth below the top of the stack (`0` is the top)
    pub fn stack_value(&self, depth: usize) -> Option<&V> {
        self.stack.iter().rev().nth(depth)
    }

    /// Frame at the start of an exception handler covering an instruction with this frame
    pub fn exception_frame(&self, exception: V) -> Frame<V> {
        Frame {
            locals: self.locals.clone(),
            stack: vec![exception],
        }
    }

    fn pop(&mut self) -> Result<V, VerifierErrorKind> {
        self.stack.pop().ok_or(VerifierErrorKind::EmptyStack)
    }

    fn pop_width(&mut self, width: usize) -> Result<V, VerifierErrorKind> {
        let value = self.pop()?;
        if value.width() == width {
            Ok(value)
        } else {
            Err(VerifierErrorKind::InvalidWidth(value.width()))
        }
    }

    /// Pop the arguments of an instruction, returning them deepest first
    fn pop_arguments(&mut self, insn: &Insn) -> Result<Vec<V>, VerifierErrorKind> {
        let widths = popped_widths(insn);
        let mut arguments = Vec::with_capacity(widths.len());
        for width in widths.iter().rev() {
            arguments.push(self.pop_width(*width)?);
        }
        arguments.reverse();
        Ok(arguments)
    }

    fn get_local(&self, index: u16) -> Result<&V, VerifierErrorKind> {
        self.locals
            .get(index as usize)
            .ok_or(VerifierErrorKind::InvalidIndex(index))
    }

    fn set_local(&mut self, index: u16, value: V, empty: V) -> Result<(), VerifierErrorKind> {
        let idx = index as usize;
        let width = value.width();
        if idx + width > self.locals.len() {
            return Err(VerifierErrorKind::InvalidIndex(index));
        }

        // Overwriting the upper half of a wide value invalidates it
        if idx > 0 && self.locals[idx - 1].width() == 2 {
            self.locals[idx - 1] = empty.clone();
        }
        self.locals[idx] = value;
        if width == 2 {
            self.locals[idx + 1] = empty;
        }
        Ok(())
    }

    /// Replace every occurrence of a value in the stack and locals
    pub fn replace_all(&mut self, old: &V, new: &V) {
        for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if value == old {
                *value = new.clone();
            }
        }
    }

    /// Update the frame to reflect the effects of executing the given node
    pub fn execute<I: Interpreter<Value = V>>(
        &mut self,
        id: InsnId,
        insn: &Insn,
        interpreter: &I,
    ) -> Result<(), VerifierErrorKind> {
        use Instruction::*;

        let op = match insn {
            Insn::Label(_) | Insn::LineNumber(_) => return Ok(()),
            Insn::Branch(_) => {
                let arguments = self.pop_arguments(insn)?;
                interpreter.operation(id, insn, &arguments)?;
                return Ok(());
            }
            Insn::Op(op) => op,
        };
        let copy = |value: &V| interpreter.copy_operation(id, op, value);

        match op {
            ILoad(index) | LLoad(index) | FLoad(index) | DLoad(index) | ALoad(index) => {
                let value = copy(self.get_local(*index)?)?;
                self.stack.push(value);
            }
            IStore(index) | LStore(index) | FStore(index) | DStore(index) | AStore(index) => {
                let width = if matches!(op, LStore(_) | DStore(_)) { 2 } else { 1 };
                let value = copy(&self.pop_width(width)?)?;
                self.set_local(*index, value, interpreter.empty_value())?;
            }
            IInc(index, _) => {
                let value = self.get_local(*index)?.clone();
                let value = interpreter
                    .operation(id, insn, &[value])?
                    .ok_or(VerifierErrorKind::InvalidType)?;
                self.set_local(*index, value, interpreter.empty_value())?;
            }

            Pop => {
                self.pop_width(1)?;
            }
            Pop2 => {
                if self.pop()?.width() == 1 {
                    self.pop_width(1)?;
                }
            }
            Dup => {
                let value1 = self.pop_width(1)?;
                let copied = copy(&value1)?;
                self.stack.push(value1);
                self.stack.push(copied);
            }
            DupX1 => {
                let value1 = self.pop_width(1)?;
                let value2 = self.pop_width(1)?;
                self.stack.push(copy(&value1)?);
                self.stack.push(value2);
                self.stack.push(value1);
            }
            DupX2 => {
                let value1 = self.pop_width(1)?;
                let value2 = self.pop()?;
                if value2.width() == 1 {
                    let value3 = self.pop_width(1)?;
                    self.stack.push(copy(&value1)?);
                    self.stack.push(value3);
                } else {
                    self.stack.push(copy(&value1)?);
                }
                self.stack.push(value2);
                self.stack.push(value1);
            }
            Dup2 => {
                let value1 = self.pop()?;
                if value1.width() == 1 {
                    let value2 = self.pop_width(1)?;
                    let (copy2, copy1) = (copy(&value2)?, copy(&value1)?);
                    self.stack.extend([value2, value1, copy2, copy1]);
                } else {
                    let copy1 = copy(&value1)?;
                    self.stack.extend([value1, copy1]);
                }
            }
            Dup2X1 => {
                let value1 = self.pop()?;
                if value1.width() == 1 {
                    let value2 = self.pop_width(1)?;
                    let value3 = self.pop_width(1)?;
                    let (copy2, copy1) = (copy(&value2)?, copy(&value1)?);
                    self.stack.extend([copy2, copy1, value3, value2, value1]);
                } else {
                    let value2 = self.pop_width(1)?;
                    let copy1 = copy(&value1)?;
                    self.stack.extend([copy1, value2, value1]);
                }
            }
            Dup2X2 => {
                let value1 = self.pop()?;
                if value1.width() == 1 {
                    let value2 = self.pop_width(1)?;
                    let value3 = self.pop()?;
                    let (copy2, copy1) = (copy(&value2)?, copy(&value1)?);
                    if value3.width() == 1 {
                        let value4 = self.pop_width(1)?;
                        self.stack.extend([copy2, copy1, value4, value3, value2, value1]);
                    } else {
                        self.stack.extend([copy2, copy1, value3, value2, value1]);
                    }
                } else {
                    let value2 = self.pop()?;
                    let copy1 = copy(&value1)?;
                    if value2.width() == 1 {
                        let value3 = self.pop_width(1)?;
                        self.stack.extend([copy1, value3, value2, value1]);
                    } else {
                        self.stack.extend([copy1, value2, value1]);
                    }
                }
            }
            Swap => {
                let value1 = self.pop_width(1)?;
                let value2 = self.pop_width(1)?;
                let (copy1, copy2) = (copy(&value1)?, copy(&value2)?);
                self.stack.extend([copy1, copy2]);
            }

            Invoke(InvokeType::Special, method) if method.name == UnqualifiedName::INIT => {
                let arguments = self.pop_arguments(insn)?;
                let receiver = arguments.first().ok_or(VerifierErrorKind::EmptyStack)?;
                interpreter.operation(id, insn, &arguments)?;
                if let Some(initialized) = interpreter.initialize(receiver) {
                    self.replace_all(receiver, &initialized);
                }
            }

            _ => {
                let arguments = self.pop_arguments(insn)?;
                if let Some(result) = interpreter.operation(id, insn, &arguments)? {
                    self.stack.push(result);
                }
            }
        }
        Ok(())
    }

    /// Merge another frame reaching the same instruction into this one
    ///
    /// Returns whether this frame changed.
    pub fn merge<I: Interpreter<Value = V>>(
        &mut self,
        other: &Frame<V>,
        interpreter: &I,
    ) -> Result<bool, VerifierErrorKind> {
        let incompatible_heights =
            || VerifierErrorKind::IncompatibleStackHeights(self.stack_words(), other.stack_words());
        if self.stack.len() != other.stack.len() || self.locals.len() != other.locals.len() {
            return Err(incompatible_heights());
        }
        if self
            .stack
            .iter()
            .zip(&other.stack)
            .any(|(value1, value2)| value1.width() != value2.width())
        {
            return Err(incompatible_heights());
        }

        let mut changed = false;
        for (value1, value2) in self
            .locals
            .iter_mut()
            .chain(self.stack.iter_mut())
            .zip(other.locals.iter().chain(other.stack.iter()))
        {
            let merged = interpreter.merge(value1, value2)?;
            if &merged != value1 {
                *value1 = merged;
                changed = true;
            }
        }
        Ok(changed)
    }
}

/// Widths of the values an instruction pops, deepest first
///
/// Loads, stores, `iinc`, and the stack shuffling instructions are handled by the frame directly
/// and report no arguments here.
pub fn popped_widths(insn: &Insn) -> Vec<usize> {
    use Instruction::*;
    match insn {
        Insn::Label(_) | Insn::LineNumber(_) => vec![],
        Insn::Op(op) => match op {
            IALoad | LALoad | FALoad | DALoad | AALoad | BALoad | CALoad | SALoad => vec![1, 1],
            IAStore | FAStore | AAStore | BAStore | CAStore | SAStore => vec![1, 1, 1],
            LAStore | DAStore => vec![1, 1, 2],
            IAdd | FAdd | ISub | FSub | IMul | FMul | IDiv | FDiv | IRem | FRem | ISh(_)
            | IAnd | IOr | IXor | FCmp(_) => vec![1, 1],
            LAdd | DAdd | LSub | DSub | LMul | DMul | LDiv | DDiv | LRem | DRem | LAnd | LOr
            | LXor | LCmp | DCmp(_) => vec![2, 2],
            LSh(_) => vec![2, 1],
            INeg | FNeg | I2L | I2F | I2D | F2I | F2L | F2D | I2B | I2C | I2S => vec![1],
            LNeg | DNeg | L2I | L2F | L2D | D2I | D2L | D2F => vec![2],
            GetField(_) => vec![1],
            PutStatic(field) => vec![field.descriptor.width()],
            PutField(field) => vec![1, field.descriptor.width()],
            Invoke(typ, method) => {
                let mut widths = if *typ == InvokeType::Static {
                    vec![]
                } else {
                    vec![1]
                };
                widths.extend(method.descriptor.parameters.iter().map(Width::width));
                widths
            }
            InvokeDynamic(call_site) => call_site
                .descriptor
                .parameters
                .iter()
                .map(Width::width)
                .collect(),
            NewArray(_) | ANewArray(_) | ArrayLength | CheckCast(_) | InstanceOf(_)
            | MonitorEnter | MonitorExit => vec![1],
            MultiANewArray(_, dimensions) => vec![1; *dimensions as usize],
            _ => vec![],
        },
        Insn::Branch(branch) => match branch {
            BranchInstruction::If(_, _)
            | BranchInstruction::IfNull(_, _)
            | BranchInstruction::TableSwitch { .. }
            | BranchInstruction::LookupSwitch { .. }
            | BranchInstruction::IReturn
            | BranchInstruction::FReturn
            | BranchInstruction::AReturn
            | BranchInstruction::AThrow => vec![1],
            BranchInstruction::IfICmp(_, _) | BranchInstruction::IfACmp(_, _) => vec![1, 1],
            BranchInstruction::LReturn | BranchInstruction::DReturn => vec![2],
            BranchInstruction::Goto(_) | BranchInstruction::Return => vec![],
        },
    }
}
