//! Decode a `Code` attribute into a [`MethodBody`]

use super::opcodes::*;
use crate::jvm::class_file::{
    ClassConstantIndex, Code, Constant, ConstantIndex, ConstantsPool, LineNumberTable,
    LocalVariable, LocalVariableTable, LocalVariableTypeTable, Method, StackMapTable,
};
use crate::jvm::code::{
    BranchInstruction, ClassOperand, ConstantOperand, DynamicOperand, EqComparison,
    FieldOperand, Insn, InsnId, Instruction, InvokeType, Label, LoadableConstant,
    LocalVariableRange, MethodBody, MethodOperand, OrdComparison, TryCatchBlock,
};
use crate::jvm::{
    BaseType, BinaryName, Error, FieldType, MethodDescriptor, Name, ParseDescriptor, RefType,
    UnqualifiedName,
};
use byteorder::{BigEndian, ReadBytesExt};
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

/// Hook called for every real instruction as a method body gets built up
///
/// Implementations may insert extra nodes (typically labels) around the instruction, but must
/// add the instruction itself exactly once and return its handle.
pub trait InstructionVisitor {
    fn visit_instruction(&mut self, body: &mut MethodBody, insn: Insn) -> InsnId {
        body.instructions.push_back(insn)
    }
}

/// Visitor which just appends instructions
pub struct AppendInstructions;

impl InstructionVisitor for AppendInstructions {}

/// Instruction as decoded, before jump offsets are turned into labels
enum Decoded {
    Op(Instruction),
    Branch(BranchInstruction<usize>),
}

/// Decode the code of a method
///
/// Debug attributes (`LineNumberTable`, `LocalVariableTable`, `LocalVariableTypeTable`) are
/// carried over as label-based entries. `StackMapTable` is dropped since it gets recomputed, and
/// any other code attribute is dropped with a warning.
pub fn decode_method(
    owner: &BinaryName,
    method: &Method,
    code: &Code,
    constants: &ConstantsPool,
    visitor: &mut impl InstructionVisitor,
) -> Result<MethodBody, Error> {
    let name = parse_name(method.name(constants)?)?;
    let descriptor = parse_method_descriptor(method.descriptor(constants)?)?;
    let mut body = MethodBody::new(owner.clone(), name, descriptor, method.access_flags);
    body.max_stack = code.max_stack as usize;
    body.max_locals = code.max_locals as usize;

    let bytes = &code.code_array.0;
    let code_length = bytes.len();
    let instructions = decode_instructions(bytes, constants)?;
    let boundaries: BTreeSet<usize> = instructions.iter().map(|(offset, _)| *offset).collect();

    // Debug attributes
    let mut line_numbers: BTreeMap<usize, u16> = BTreeMap::new();
    let mut local_variables = vec![];
    let mut local_variable_types = vec![];
    for attribute in &code.attributes {
        if attribute.is::<LineNumberTable>(constants) {
            for entry in attribute.decode::<LineNumberTable>()?.0 {
                // Entries pointing into the middle of an instruction are meaningless
                if boundaries.contains(&(entry.start_pc as usize)) {
                    line_numbers.insert(entry.start_pc as usize, entry.line_number);
                }
            }
        } else if attribute.is::<LocalVariableTable>(constants) {
            local_variables.extend(attribute.decode::<LocalVariableTable>()?.0);
        } else if attribute.is::<LocalVariableTypeTable>(constants) {
            local_variable_types.extend(attribute.decode::<LocalVariableTypeTable>()?.0);
        } else if !attribute.is::<StackMapTable>(constants) {
            let attribute_name = constants.utf8(attribute.name_index)?;
            warn!(
                "{}.{}: dropping code attribute '{}'",
                body.owner, body.name, attribute_name
            );
        }
    }

    // Every offset something refers to gets a label
    let is_target = |target: usize| target < code_length && boundaries.contains(&target);
    let is_end = |end: usize| end == code_length || is_target(end);
    let mut labelled_offsets: BTreeSet<usize> = BTreeSet::new();
    for (offset, decoded) in &instructions {
        if let Decoded::Branch(branch) = decoded {
            for target in branch.targets() {
                if !is_target(*target) {
                    return Err(Error::InvalidBranchTarget {
                        offset: *offset,
                        target: *target as i64,
                    });
                }
                labelled_offsets.insert(*target);
            }
        }
    }
    for handler in &code.exception_table {
        let (start, end, handler_pc) = (
            handler.start_pc as usize,
            handler.end_pc as usize,
            handler.handler_pc as usize,
        );
        if !is_target(start) || !is_end(end) || start >= end || !is_target(handler_pc) {
            return Err(Error::Malformed(format!(
                "exception handler [{}, {}) -> {} does not line up with instructions",
                start, end, handler_pc
            )));
        }
        labelled_offsets.extend([start, end, handler_pc]);
    }
    let keep_variable = |variable: &LocalVariable| {
        let start = variable.start_pc as usize;
        is_target(start) && is_end(start + variable.length as usize)
    };
    local_variables.retain(keep_variable);
    local_variable_types.retain(keep_variable);
    for variable in local_variables.iter().chain(&local_variable_types) {
        let start = variable.start_pc as usize;
        labelled_offsets.extend([start, start + variable.length as usize]);
    }

    let labels: BTreeMap<usize, Label> = labelled_offsets
        .into_iter()
        .map(|offset| (offset, body.fresh_label()))
        .collect();
    let label_at = |offset: &usize| -> Result<Label, Error> {
        labels.get(offset).copied().ok_or(Error::InvalidBranchTarget {
            offset: *offset,
            target: *offset as i64,
        })
    };

    // Emit the instruction stream
    for (offset, decoded) in instructions {
        if let Some(label) = labels.get(&offset) {
            body.instructions.push_back(Insn::Label(*label));
        }
        if let Some(line) = line_numbers.get(&offset) {
            body.instructions.push_back(Insn::LineNumber(*line));
        }
        let insn = match decoded {
            Decoded::Op(op) => Insn::Op(op),
            Decoded::Branch(branch) => Insn::Branch(branch.map_labels(&label_at)?),
        };
        visitor.visit_instruction(&mut body, insn);
    }
    if let Some(label) = labels.get(&code_length) {
        body.instructions.push_back(Insn::Label(*label));
    }

    for handler in &code.exception_table {
        let catch_type = match handler.catch_type {
            None => None,
            Some(index) => Some((index, class_binary_name(constants, index)?)),
        };
        body.try_catch_blocks.push(TryCatchBlock {
            start: label_at(&(handler.start_pc as usize))?,
            end: label_at(&(handler.end_pc as usize))?,
            handler: label_at(&(handler.handler_pc as usize))?,
            catch_type,
        });
    }
    let to_range = |variable: &LocalVariable| -> Result<LocalVariableRange, Error> {
        let start = variable.start_pc as usize;
        Ok(LocalVariableRange {
            start: label_at(&start)?,
            end: label_at(&(start + variable.length as usize))?,
            name_index: variable.name_index,
            type_index: variable.type_index,
            index: variable.index,
        })
    };
    body.local_variables = local_variables
        .iter()
        .map(to_range)
        .collect::<Result<_, _>>()?;
    body.local_variable_types = local_variable_types
        .iter()
        .map(to_range)
        .collect::<Result<_, _>>()?;

    Ok(body)
}

fn class_binary_name(
    constants: &ConstantsPool,
    index: ClassConstantIndex,
) -> Result<BinaryName, Error> {
    let name = constants.class_name(index)?;
    BinaryName::from_string(name.to_owned()).map_err(Error::BadName)
}

fn parse_field_type(descriptor: &str) -> Result<FieldType, Error> {
    FieldType::parse(descriptor).map_err(|_| Error::BadDescriptor(descriptor.to_owned()))
}

fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor, Error> {
    MethodDescriptor::parse(descriptor).map_err(|_| Error::BadDescriptor(descriptor.to_owned()))
}

fn parse_name(name: &str) -> Result<UnqualifiedName, Error> {
    UnqualifiedName::from_string(name.to_owned()).map_err(Error::BadName)
}

fn class_operand(constants: &ConstantsPool, index: u16) -> Result<ClassOperand, Error> {
    let index = ClassConstantIndex(ConstantIndex(index));
    Ok(ClassOperand {
        index,
        class: constants.class_type(index)?,
    })
}

fn field_operand(constants: &ConstantsPool, index: u16) -> Result<FieldOperand, Error> {
    let index = ConstantIndex(index);
    let field = constants.field_ref(index)?;
    Ok(FieldOperand {
        index,
        owner: RefType::from_class_name(field.class)
            .map_err(|_| Error::BadName(field.class.to_owned()))?,
        name: parse_name(field.name)?,
        descriptor: parse_field_type(field.descriptor)?,
    })
}

fn method_operand(constants: &ConstantsPool, index: u16) -> Result<MethodOperand, Error> {
    let index = ConstantIndex(index);
    let method = constants.method_ref(index)?;
    Ok(MethodOperand {
        index,
        owner: RefType::from_class_name(method.class)
            .map_err(|_| Error::BadName(method.class.to_owned()))?,
        name: parse_name(method.name)?,
        descriptor: parse_method_descriptor(method.descriptor)?,
        is_interface: method.is_interface,
    })
}

fn constant_operand(constants: &ConstantsPool, index: u16) -> Result<ConstantOperand, Error> {
    let index = ConstantIndex(index);
    let value = match constants.get(index) {
        Some(Constant::Integer(value)) => LoadableConstant::Integer(*value),
        Some(Constant::Float(value)) => LoadableConstant::Float(*value),
        Some(Constant::Long(value)) => LoadableConstant::Long(*value),
        Some(Constant::Double(value)) => LoadableConstant::Double(*value),
        Some(Constant::String(_)) => LoadableConstant::String,
        Some(Constant::Class(_)) => LoadableConstant::Class,
        Some(Constant::MethodType { .. }) => LoadableConstant::MethodType,
        Some(Constant::MethodHandle { .. }) => LoadableConstant::MethodHandle,
        Some(Constant::Dynamic { name_and_type, .. }) => {
            let (_, descriptor) = constants.name_and_type(*name_and_type)?;
            LoadableConstant::Dynamic(parse_field_type(descriptor)?)
        }
        _ => {
            return Err(Error::BadConstant {
                index: index.0,
                expected: "loadable constant",
            })
        }
    };
    Ok(ConstantOperand { index, value })
}

/// Decode all instructions, along with their starting offsets
fn decode_instructions(
    bytes: &[u8],
    constants: &ConstantsPool,
) -> Result<Vec<(usize, Decoded)>, Error> {
    let mut cursor = Cursor::new(bytes);
    let mut decoded = vec![];
    while (cursor.position() as usize) < bytes.len() {
        let offset = cursor.position() as usize;
        let instruction = decode_instruction(&mut cursor, offset, constants)?;
        decoded.push((offset, instruction));
    }
    Ok(decoded)
}

/// Compute an absolute jump target from a relative offset
fn jump_target(offset: usize, relative: i64) -> Result<usize, Error> {
    let target = offset as i64 + relative;
    usize::try_from(target).map_err(|_| Error::InvalidBranchTarget { offset, target })
}

fn decode_instruction(
    cursor: &mut Cursor<&[u8]>,
    offset: usize,
    constants: &ConstantsPool,
) -> Result<Decoded, Error> {
    use Instruction::*;

    let opcode = cursor.read_u8()?;
    if let Some(simple) = decode_simple(opcode) {
        return Ok(Decoded::Op(simple));
    }

    let op = match opcode {
        BIPUSH => BiPush(cursor.read_i8()?),
        SIPUSH => SiPush(cursor.read_i16::<BigEndian>()?),
        LDC => Ldc(constant_operand(constants, cursor.read_u8()? as u16)?),
        LDC_W => Ldc(constant_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        LDC2_W => Ldc2(constant_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        ILOAD..=ALOAD | ISTORE..=ASTORE => {
            let index = cursor.read_u8()? as u16;
            local_variable_op(opcode, index)
        }
        ILOAD_0..=0x2d => {
            let relative = opcode - ILOAD_0;
            local_variable_op(ILOAD + relative / 4, (relative % 4) as u16)
        }
        ISTORE_0..=0x4e => {
            let relative = opcode - ISTORE_0;
            local_variable_op(ISTORE + relative / 4, (relative % 4) as u16)
        }
        IINC => IInc(cursor.read_u8()? as u16, cursor.read_i8()? as i16),
        WIDE => {
            let modified = cursor.read_u8()?;
            let index = cursor.read_u16::<BigEndian>()?;
            match modified {
                ILOAD..=ALOAD | ISTORE..=ASTORE => local_variable_op(modified, index),
                IINC => IInc(index, cursor.read_i16::<BigEndian>()?),
                _ => {
                    return Err(Error::UnsupportedInstruction {
                        offset,
                        opcode: modified,
                    })
                }
            }
        }
        IFEQ..=0xa4 => {
            let comparison = ORD_COMPARISONS[((opcode - IFEQ) % 6) as usize];
            let target = jump_target(offset, cursor.read_i16::<BigEndian>()? as i64)?;
            let branch = if opcode < IF_ICMPEQ {
                BranchInstruction::If(comparison, target)
            } else {
                BranchInstruction::IfICmp(comparison, target)
            };
            return Ok(Decoded::Branch(branch));
        }
        IF_ACMPEQ | IF_ACMPNE | IFNULL | IFNONNULL => {
            let comparison = if opcode == IF_ACMPEQ || opcode == IFNULL {
                EqComparison::EQ
            } else {
                EqComparison::NE
            };
            let target = jump_target(offset, cursor.read_i16::<BigEndian>()? as i64)?;
            let branch = if opcode == IF_ACMPEQ || opcode == IF_ACMPNE {
                BranchInstruction::IfACmp(comparison, target)
            } else {
                BranchInstruction::IfNull(comparison, target)
            };
            return Ok(Decoded::Branch(branch));
        }
        GOTO => {
            let target = jump_target(offset, cursor.read_i16::<BigEndian>()? as i64)?;
            return Ok(Decoded::Branch(BranchInstruction::Goto(target)));
        }
        GOTO_W => {
            let target = jump_target(offset, cursor.read_i32::<BigEndian>()? as i64)?;
            return Ok(Decoded::Branch(BranchInstruction::Goto(target)));
        }
        TABLESWITCH => {
            skip_switch_padding(cursor)?;
            let default = jump_target(offset, cursor.read_i32::<BigEndian>()? as i64)?;
            let low = cursor.read_i32::<BigEndian>()?;
            let high = cursor.read_i32::<BigEndian>()?;
            if high < low {
                return Err(Error::Malformed(format!(
                    "tableswitch at {} has high {} below low {}",
                    offset, high, low
                )));
            }
            let mut targets = vec![];
            for _ in low..=high {
                targets.push(jump_target(offset, cursor.read_i32::<BigEndian>()? as i64)?);
            }
            return Ok(Decoded::Branch(BranchInstruction::TableSwitch {
                default,
                low,
                targets,
            }));
        }
        LOOKUPSWITCH => {
            skip_switch_padding(cursor)?;
            let default = jump_target(offset, cursor.read_i32::<BigEndian>()? as i64)?;
            let pairs = cursor.read_i32::<BigEndian>()?;
            let mut targets = vec![];
            for _ in 0..pairs.max(0) {
                let key = cursor.read_i32::<BigEndian>()?;
                let target = jump_target(offset, cursor.read_i32::<BigEndian>()? as i64)?;
                targets.push((key, target));
            }
            return Ok(Decoded::Branch(BranchInstruction::LookupSwitch { default, targets }));
        }
        IRETURN => return Ok(Decoded::Branch(BranchInstruction::IReturn)),
        LRETURN => return Ok(Decoded::Branch(BranchInstruction::LReturn)),
        FRETURN => return Ok(Decoded::Branch(BranchInstruction::FReturn)),
        DRETURN => return Ok(Decoded::Branch(BranchInstruction::DReturn)),
        ARETURN => return Ok(Decoded::Branch(BranchInstruction::AReturn)),
        RETURN => return Ok(Decoded::Branch(BranchInstruction::Return)),
        ATHROW => return Ok(Decoded::Branch(BranchInstruction::AThrow)),
        GETSTATIC => GetStatic(field_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        PUTSTATIC => PutStatic(field_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        GETFIELD => GetField(field_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        PUTFIELD => PutField(field_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC => {
            let typ = match opcode {
                INVOKEVIRTUAL => InvokeType::Virtual,
                INVOKESPECIAL => InvokeType::Special,
                _ => InvokeType::Static,
            };
            Invoke(typ, method_operand(constants, cursor.read_u16::<BigEndian>()?)?)
        }
        INVOKEINTERFACE => {
            let method = method_operand(constants, cursor.read_u16::<BigEndian>()?)?;
            let _count = cursor.read_u8()?;
            let _zero = cursor.read_u8()?;
            Invoke(InvokeType::Interface, method)
        }
        INVOKEDYNAMIC => {
            let index = ConstantIndex(cursor.read_u16::<BigEndian>()?);
            let _zeros = cursor.read_u16::<BigEndian>()?;
            let (name, descriptor) = constants.invoke_dynamic(index)?;
            InvokeDynamic(DynamicOperand {
                index,
                name: parse_name(name)?,
                descriptor: parse_method_descriptor(descriptor)?,
            })
        }
        NEW => New(class_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        NEWARRAY => {
            let code = cursor.read_u8()?;
            match BaseType::from_array_type_code(code) {
                Some(base_type) => NewArray(base_type),
                None => {
                    return Err(Error::Malformed(format!(
                        "newarray at {} has bad type code {}",
                        offset, code
                    )))
                }
            }
        }
        ANEWARRAY => ANewArray(class_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        CHECKCAST => CheckCast(class_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        INSTANCEOF => InstanceOf(class_operand(constants, cursor.read_u16::<BigEndian>()?)?),
        MULTIANEWARRAY => {
            let class = class_operand(constants, cursor.read_u16::<BigEndian>()?)?;
            MultiANewArray(class, cursor.read_u8()?)
        }

        // Subroutines can't be described by stack map frames
        JSR | RET | JSR_W => return Err(Error::UnsupportedInstruction { offset, opcode }),
        _ => return Err(Error::UnsupportedInstruction { offset, opcode }),
    };
    Ok(Decoded::Op(op))
}

/// Comparisons in opcode order (`ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`)
const ORD_COMPARISONS: [OrdComparison; 6] = [
    OrdComparison::EQ,
    OrdComparison::NE,
    OrdComparison::LT,
    OrdComparison::GE,
    OrdComparison::GT,
    OrdComparison::LE,
];

/// Load or store, given the long-form opcode (`iload`, ..., `astore`)
fn local_variable_op(opcode: u8, index: u16) -> Instruction {
    match opcode {
        ILOAD => Instruction::ILoad(index),
        LLOAD => Instruction::LLoad(index),
        FLOAD => Instruction::FLoad(index),
        DLOAD => Instruction::DLoad(index),
        ALOAD => Instruction::ALoad(index),
        ISTORE => Instruction::IStore(index),
        LSTORE => Instruction::LStore(index),
        FSTORE => Instruction::FStore(index),
        DSTORE => Instruction::DStore(index),
        _ => Instruction::AStore(index),
    }
}

/// Switch operands are aligned on a multiple of 4 from the start of the code
fn skip_switch_padding(cursor: &mut Cursor<&[u8]>) -> Result<(), Error> {
    while cursor.position() % 4 != 0 {
        cursor.read_u8()?;
    }
    Ok(())
}
