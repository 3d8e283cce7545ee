//! Assemble a [`MethodBody`] back into bytecode
//!
//! Encoding happens in two steps. [`layout`] decides the offset of every node, and then [`emit`]
//! writes out the bytes. Laying out is iterative: a `goto` whose target ends up further away than
//! a signed 16-bit offset allows gets turned into a `goto_w`, which may in turn push other jumps
//! out of range. Since the set of widened jumps only ever grows, this terminates. Conditional
//! branches have no wide form, so one that doesn't fit is an error.

use super::opcodes::*;
use crate::jvm::code::{
    BranchInstruction, EqComparison, Insn, InsnId, Instruction, InvokeType, Label, MethodBody,
    OrdComparison,
};
use crate::jvm::Error;
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::{HashMap, HashSet};

/// Offsets assigned to the nodes of a method body
#[derive(Debug, Clone)]
pub struct Layout {
    /// Offset of every attached node
    ///
    /// Labels and line number markers share the offset of the next real instruction.
    pub offsets: HashMap<InsnId, usize>,

    /// Offset of every label in the body
    pub labels: HashMap<Label, usize>,

    /// `goto` instructions which need the `goto_w` encoding
    wide_gotos: HashSet<InsnId>,

    /// Total length of the code
    pub code_length: usize,
}

impl Layout {
    pub fn label_offset(&self, label: Label) -> Result<usize, Error> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(Error::UnplacedLabel(label))
    }
}

/// Padding needed after a switch opcode at the given offset
fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn local_variable_width(index: u16) -> usize {
    match index {
        0..=3 => 1,
        4..=255 => 2,
        _ => 4,
    }
}

/// Encoded width of a non-branching instruction
pub fn instruction_width(instruction: &Instruction) -> usize {
    use Instruction::*;
    match instruction {
        BiPush(_) | NewArray(_) => 2,
        SiPush(_) | Ldc2(_) => 3,
        Ldc(constant) => {
            if constant.index.0 <= u8::MAX as u16 {
                2
            } else {
                3
            }
        }
        ILoad(idx) | LLoad(idx) | FLoad(idx) | DLoad(idx) | ALoad(idx) | IStore(idx)
        | LStore(idx) | FStore(idx) | DStore(idx) | AStore(idx) => local_variable_width(*idx),
        IInc(idx, amount) => {
            if *idx <= u8::MAX as u16 && i8::try_from(*amount).is_ok() {
                3
            } else {
                6
            }
        }
        GetStatic(_) | PutStatic(_) | GetField(_) | PutField(_) => 3,
        Invoke(InvokeType::Interface, _) | InvokeDynamic(_) => 5,
        Invoke(_, _) => 3,
        New(_) | ANewArray(_) | CheckCast(_) | InstanceOf(_) => 3,
        MultiANewArray(_, _) => 4,
        _ => 1,
    }
}

/// Encoded width of a branch instruction starting at the given offset
fn branch_width(branch: &BranchInstruction, offset: usize, wide: bool) -> usize {
    match branch {
        BranchInstruction::If(_, _)
        | BranchInstruction::IfICmp(_, _)
        | BranchInstruction::IfACmp(_, _)
        | BranchInstruction::IfNull(_, _) => 3,
        BranchInstruction::Goto(_) => {
            if wide {
                5
            } else {
                3
            }
        }
        BranchInstruction::TableSwitch { targets, .. } => {
            1 + switch_padding(offset) + 12 + 4 * targets.len()
        }
        BranchInstruction::LookupSwitch { targets, .. } => {
            1 + switch_padding(offset) + 8 + 8 * targets.len()
        }
        BranchInstruction::IReturn
        | BranchInstruction::LReturn
        | BranchInstruction::FReturn
        | BranchInstruction::DReturn
        | BranchInstruction::AReturn
        | BranchInstruction::Return
        | BranchInstruction::AThrow => 1,
    }
}

fn fits_in_i16(from: usize, to: usize) -> bool {
    i16::try_from(to as i64 - from as i64).is_ok()
}

/// Assign offsets to every node of the body
pub fn layout(body: &MethodBody) -> Result<Layout, Error> {
    let mut wide_gotos: HashSet<InsnId> = HashSet::new();
    loop {
        let mut offsets = HashMap::new();
        let mut labels = HashMap::new();
        let mut offset = 0;
        for (id, insn) in body.instructions.iter() {
            offsets.insert(id, offset);
            let width = match insn {
                Insn::Label(label) => {
                    labels.insert(*label, offset);
                    0
                }
                Insn::LineNumber(_) => 0,
                Insn::Op(instruction) => instruction_width(instruction),
                Insn::Branch(branch) => branch_width(branch, offset, wide_gotos.contains(&id)),
            };
            offset += width;
        }
        let layout = Layout {
            offsets,
            labels,
            wide_gotos: HashSet::new(),
            code_length: offset,
        };

        // Find jumps that don't fit
        let mut widened = false;
        for (id, insn) in body.instructions.iter() {
            let branch = match insn {
                Insn::Branch(branch) => branch,
                _ => continue,
            };
            let from = layout.offsets[&id];
            match branch {
                BranchInstruction::Goto(target) => {
                    let to = layout.label_offset(*target)?;
                    if !wide_gotos.contains(&id) && !fits_in_i16(from, to) {
                        wide_gotos.insert(id);
                        widened = true;
                    }
                }
                BranchInstruction::If(_, target)
                | BranchInstruction::IfICmp(_, target)
                | BranchInstruction::IfACmp(_, target)
                | BranchInstruction::IfNull(_, target) => {
                    let to = layout.label_offset(*target)?;
                    if !fits_in_i16(from, to) {
                        return Err(Error::BranchOffsetOverflow {
                            offset: from,
                            target: to,
                        });
                    }
                }
                other => {
                    for target in other.targets() {
                        layout.label_offset(*target)?;
                    }
                }
            }
        }

        if !widened {
            if layout.code_length > u16::MAX as usize {
                return Err(Error::MethodCodeOverflow(layout.code_length));
            }
            return Ok(Layout {
                wide_gotos,
                ..layout
            });
        }
    }
}

/// Write out the bytecode, according to a layout computed with [`layout`]
pub fn emit(body: &MethodBody, layout: &Layout) -> Result<Vec<u8>, Error> {
    let mut code: Vec<u8> = Vec::with_capacity(layout.code_length);
    for (id, insn) in body.instructions.iter() {
        let offset = code.len();
        debug_assert_eq!(layout.offsets.get(&id), Some(&offset));
        match insn {
            Insn::Label(_) | Insn::LineNumber(_) => (),
            Insn::Op(instruction) => emit_instruction(&mut code, instruction)?,
            Insn::Branch(branch) => {
                let relative = |label: &Label| -> Result<i32, Error> {
                    Ok(layout.label_offset(*label)? as i32 - offset as i32)
                };
                emit_branch(
                    &mut code,
                    branch,
                    layout.wide_gotos.contains(&id),
                    relative,
                )?;
            }
        }
    }
    Ok(code)
}

fn emit_local_variable<W: WriteBytesExt>(code: &mut W, opcode: u8, index: u16) -> Result<(), Error> {
    let compact_base = if opcode <= ALOAD {
        ILOAD_0 + (opcode - ILOAD) * 4
    } else {
        ISTORE_0 + (opcode - ISTORE) * 4
    };
    match u8::try_from(index) {
        Ok(index @ 0..=3) => code.write_u8(compact_base + index)?,
        Ok(index) => {
            code.write_u8(opcode)?;
            code.write_u8(index)?;
        }
        Err(_) => {
            code.write_u8(WIDE)?;
            code.write_u8(opcode)?;
            code.write_u16::<BigEndian>(index)?;
        }
    }
    Ok(())
}

fn emit_instruction(code: &mut Vec<u8>, instruction: &Instruction) -> Result<(), Error> {
    use Instruction::*;

    if let Some(opcode) = encode_simple(instruction) {
        code.write_u8(opcode)?;
        return Ok(());
    }

    match instruction {
        BiPush(value) => {
            code.write_u8(BIPUSH)?;
            code.write_i8(*value)?;
        }
        SiPush(value) => {
            code.write_u8(SIPUSH)?;
            code.write_i16::<BigEndian>(*value)?;
        }
        Ldc(constant) => match u8::try_from(constant.index.0) {
            Ok(index) => {
                code.write_u8(LDC)?;
                code.write_u8(index)?;
            }
            Err(_) => {
                code.write_u8(LDC_W)?;
                code.write_u16::<BigEndian>(constant.index.0)?;
            }
        },
        Ldc2(constant) => {
            code.write_u8(LDC2_W)?;
            code.write_u16::<BigEndian>(constant.index.0)?;
        }
        ILoad(idx) => emit_local_variable(code, ILOAD, *idx)?,
        LLoad(idx) => emit_local_variable(code, LLOAD, *idx)?,
        FLoad(idx) => emit_local_variable(code, FLOAD, *idx)?,
        DLoad(idx) => emit_local_variable(code, DLOAD, *idx)?,
        ALoad(idx) => emit_local_variable(code, ALOAD, *idx)?,
        IStore(idx) => emit_local_variable(code, ISTORE, *idx)?,
        LStore(idx) => emit_local_variable(code, LSTORE, *idx)?,
        FStore(idx) => emit_local_variable(code, FSTORE, *idx)?,
        DStore(idx) => emit_local_variable(code, DSTORE, *idx)?,
        AStore(idx) => emit_local_variable(code, ASTORE, *idx)?,
        IInc(idx, amount) => match (u8::try_from(*idx), i8::try_from(*amount)) {
            (Ok(idx), Ok(amount)) => {
                code.write_u8(IINC)?;
                code.write_u8(idx)?;
                code.write_i8(amount)?;
            }
            _ => {
                code.write_u8(WIDE)?;
                code.write_u8(IINC)?;
                code.write_u16::<BigEndian>(*idx)?;
                code.write_i16::<BigEndian>(*amount)?;
            }
        },
        GetStatic(field) | PutStatic(field) | GetField(field) | PutField(field) => {
            let opcode = match instruction {
                GetStatic(_) => GETSTATIC,
                PutStatic(_) => PUTSTATIC,
                GetField(_) => GETFIELD,
                _ => PUTFIELD,
            };
            code.write_u8(opcode)?;
            code.write_u16::<BigEndian>(field.index.0)?;
        }
        Invoke(InvokeType::Interface, method) => {
            code.write_u8(INVOKEINTERFACE)?;
            code.write_u16::<BigEndian>(method.index.0)?;
            let count = u8::try_from(method.descriptor.parameter_length(true)).map_err(|_| {
                Error::Malformed(format!("too many arguments for {}", method.name))
            })?;
            code.write_u8(count)?;
            code.write_u8(0)?;
        }
        Invoke(typ, method) => {
            let opcode = match typ {
                InvokeType::Virtual => INVOKEVIRTUAL,
                InvokeType::Special => INVOKESPECIAL,
                _ => INVOKESTATIC,
            };
            code.write_u8(opcode)?;
            code.write_u16::<BigEndian>(method.index.0)?;
        }
        InvokeDynamic(call_site) => {
            code.write_u8(INVOKEDYNAMIC)?;
            code.write_u16::<BigEndian>(call_site.index.0)?;
            code.write_u16::<BigEndian>(0)?;
        }
        New(class) | ANewArray(class) | CheckCast(class) | InstanceOf(class) => {
            let opcode = match instruction {
                New(_) => NEW,
                ANewArray(_) => ANEWARRAY,
                CheckCast(_) => CHECKCAST,
                _ => INSTANCEOF,
            };
            code.write_u8(opcode)?;
            code.write_u16::<BigEndian>((class.index.0).0)?;
        }
        NewArray(base_type) => {
            code.write_u8(NEWARRAY)?;
            code.write_u8(base_type.array_type_code())?;
        }
        MultiANewArray(class, dimensions) => {
            code.write_u8(MULTIANEWARRAY)?;
            code.write_u16::<BigEndian>((class.index.0).0)?;
            code.write_u8(*dimensions)?;
        }
        other => unreachable!("{:?} is missing from the opcode table", other),
    }
    Ok(())
}

fn ord_opcode(base: u8, comparison: OrdComparison) -> u8 {
    base + match comparison {
        OrdComparison::EQ => 0,
        OrdComparison::NE => 1,
        OrdComparison::LT => 2,
        OrdComparison::GE => 3,
        OrdComparison::GT => 4,
        OrdComparison::LE => 5,
    }
}

fn emit_branch(
    code: &mut Vec<u8>,
    branch: &BranchInstruction,
    wide: bool,
    relative: impl Fn(&Label) -> Result<i32, Error>,
) -> Result<(), Error> {
    let offset = code.len();
    let short_jump = |code: &mut Vec<u8>, opcode: u8, label: &Label| -> Result<(), Error> {
        let jump = relative(label)?;
        let jump = i16::try_from(jump).map_err(|_| Error::BranchOffsetOverflow {
            offset,
            target: (offset as i64 + jump as i64) as usize,
        })?;
        code.write_u8(opcode)?;
        code.write_i16::<BigEndian>(jump)?;
        Ok(())
    };

    match branch {
        BranchInstruction::If(comparison, label) => {
            short_jump(code, ord_opcode(IFEQ, *comparison), label)?
        }
        BranchInstruction::IfICmp(comparison, label) => {
            short_jump(code, ord_opcode(IF_ICMPEQ, *comparison), label)?
        }
        BranchInstruction::IfACmp(comparison, label) => {
            let opcode = match comparison {
                EqComparison::EQ => IF_ACMPEQ,
                EqComparison::NE => IF_ACMPNE,
            };
            short_jump(code, opcode, label)?
        }
        BranchInstruction::IfNull(comparison, label) => {
            let opcode = match comparison {
                EqComparison::EQ => IFNULL,
                EqComparison::NE => IFNONNULL,
            };
            short_jump(code, opcode, label)?
        }
        BranchInstruction::Goto(label) if wide => {
            code.write_u8(GOTO_W)?;
            code.write_i32::<BigEndian>(relative(label)?)?;
        }
        BranchInstruction::Goto(label) => short_jump(code, GOTO, label)?,
        BranchInstruction::TableSwitch {
            default,
            low,
            targets,
        } => {
            code.write_u8(TABLESWITCH)?;
            for _ in 0..switch_padding(offset) {
                code.write_u8(0)?;
            }
            code.write_i32::<BigEndian>(relative(default)?)?;
            code.write_i32::<BigEndian>(*low)?;
            let high = *low as i64 + targets.len() as i64 - 1;
            code.write_i32::<BigEndian>(high as i32)?;
            for target in targets {
                code.write_i32::<BigEndian>(relative(target)?)?;
            }
        }
        BranchInstruction::LookupSwitch { default, targets } => {
            code.write_u8(LOOKUPSWITCH)?;
            for _ in 0..switch_padding(offset) {
                code.write_u8(0)?;
            }
            code.write_i32::<BigEndian>(relative(default)?)?;
            code.write_i32::<BigEndian>(targets.len() as i32)?;
            for (key, target) in targets {
                code.write_i32::<BigEndian>(*key)?;
                code.write_i32::<BigEndian>(relative(target)?)?;
            }
        }
        BranchInstruction::IReturn => code.write_u8(IRETURN)?,
        BranchInstruction::LReturn => code.write_u8(LRETURN)?,
        BranchInstruction::FReturn => code.write_u8(FRETURN)?,
        BranchInstruction::DReturn => code.write_u8(DRETURN)?,
        BranchInstruction::AReturn => code.write_u8(ARETURN)?,
        BranchInstruction::Return => code.write_u8(RETURN)?,
        BranchInstruction::AThrow => code.write_u8(ATHROW)?,
    }
    Ok(())
}
