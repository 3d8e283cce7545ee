//! This module contains the AST of JVM bytecode. The representations is slightly different from
//! the usual presentation to make it more convenient to analyze and rewrite bytecode. For
//! instance:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify. Likewise `ldc`/`ldc_w`, `goto`/`goto_w`, and the
//!     short forms of loads and stores are one instruction each. The assembler picks the smallest
//!     encoding.
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches.
//!
//!   - Operands referencing the constant pool keep the original index alongside the resolved
//!     names and descriptors, so that re-encoding does not need to touch the pool.
//!
//!   - `jsr` and `ret` are omitted. Class files using subroutines are rejected when decoding.

use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex};
use crate::jvm::code::Label;
use crate::jvm::{BaseType, FieldType, MethodDescriptor, RefType, UnqualifiedName};
use crate::util::Width;
use std::ops::Not;

/// Class operand (`new`, `anewarray`, `checkcast`, `instanceof`, `multianewarray`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassOperand {
    pub index: ClassConstantIndex,
    pub class: RefType,
}

/// Field operand (`getstatic`, `putstatic`, `getfield`, `putfield`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldOperand {
    pub index: ConstantIndex,
    pub owner: RefType,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
}

/// Method operand of one of the `invoke*` instructions (other than `invokedynamic`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodOperand {
    pub index: ConstantIndex,
    /// Usually a class, but `clone` is invoked on array types
    pub owner: RefType,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub is_interface: bool,
}

/// Call site of an `invokedynamic`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicOperand {
    pub index: ConstantIndex,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

/// Loadable constant (`ldc`, `ldc_w`, `ldc2_w`)
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantOperand {
    pub index: ConstantIndex,
    pub value: LoadableConstant,
}

/// What kind of value a loadable constant pushes
#[derive(Clone, Debug, PartialEq)]
pub enum LoadableConstant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String,
    Class,
    MethodType,
    MethodHandle,
    /// Dynamically-computed constant of the given type
    Dynamic(FieldType),
}

impl Width for LoadableConstant {
    fn width(&self) -> usize {
        match self {
            LoadableConstant::Long(_) | LoadableConstant::Double(_) => 2,
            LoadableConstant::Dynamic(field_type) => field_type.width(),
            _ => 1,
        }
    }
}

/// Non-branching JVM bytecode instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantOperand), // covers both `ldc` and `ldc_w`
    Ldc2(ConstantOperand),
    ILoad(u16), // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldOperand),
    PutStatic(FieldOperand),
    GetField(FieldOperand),
    PutField(FieldOperand),
    Invoke(InvokeType, MethodOperand),
    InvokeDynamic(DynamicOperand),
    New(ClassOperand),
    NewArray(BaseType),
    ANewArray(ClassOperand),
    ArrayLength,
    CheckCast(ClassOperand),
    InstanceOf(ClassOperand),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(ClassOperand, u8),
}

impl Instruction {
    /// Width of the value this instruction pushes onto the stack, if any
    ///
    /// Stack manipulation instructions (`dup`, `swap`, etc.) and loads/stores only move existing
    /// values around; for those, this returns the width of what a load pushes (stores and the
    /// stack shuffles return `None`).
    pub fn pushed_width(&self) -> Option<usize> {
        use Instruction::*;
        match self {
            Nop | IStore(_) | LStore(_) | FStore(_) | DStore(_) | AStore(_) | IAStore
            | LAStore | FAStore | DAStore | AAStore | BAStore | CAStore | SAStore | Pop | Pop2
            | Dup | DupX1 | DupX2 | Dup2 | Dup2X1 | Dup2X2 | Swap | PutStatic(_)
            | PutField(_) | MonitorEnter | MonitorExit => None,

            LConst0 | LConst1 | DConst0 | DConst1 | LLoad(_) | DLoad(_) | LALoad | DALoad
            | LAdd | DAdd | LSub | DSub | LMul | DMul | LDiv | DDiv | LRem | DRem | LNeg
            | DNeg | LSh(_) | LAnd | LOr | LXor | I2L | I2D | L2D | F2L | F2D | D2L => Some(2),

            Ldc(constant) | Ldc2(constant) => Some(constant.value.width()),
            GetStatic(field) | GetField(field) => Some(field.descriptor.width()),
            Invoke(_, method) => method.descriptor.return_type.as_ref().map(Width::width),
            InvokeDynamic(call_site) => {
                call_site.descriptor.return_type.as_ref().map(Width::width)
            }

            AConstNull | IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5
            | FConst0 | FConst1 | FConst2 | BiPush(_) | SiPush(_) | ILoad(_) | FLoad(_)
            | ALoad(_) | IALoad | FALoad | AALoad | BALoad | CALoad | SALoad | IAdd | FAdd
            | ISub | FSub | IMul | FMul | IDiv | FDiv | IRem | FRem | INeg | FNeg | ISh(_)
            | IAnd | IOr | IXor | IInc(_, _) | I2F | L2I | L2F | F2I | D2I | D2F | I2B | I2C
            | I2S | LCmp | FCmp(_) | DCmp(_) | New(_) | NewArray(_) | ANewArray(_)
            | ArrayLength | CheckCast(_) | InstanceOf(_) | MultiANewArray(_, _) => Some(1),
        }
    }
}

/// Branching JVM bytecode instruction
///
/// The type parameter abstracts over the representation of jump targets: labels while the code
/// is being analyzed and rewritten, raw bytecode offsets while it is being decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction<Lbl = Label> {
    If(OrdComparison, Lbl), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Lbl), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, Lbl), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, Lbl), // covers `ifnull`, `ifnonnull`
    Goto(Lbl),                 // covers `goto` and `goto_w`
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: Lbl,
        /// Value associated with the first jump target
        low: i32,
        /// Jump targets
        targets: Vec<Lbl>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: Lbl,
        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, Lbl)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl<Lbl> BranchInstruction<Lbl> {
    /// Can execution continue with the next instruction?
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            BranchInstruction::If(_, _)
                | BranchInstruction::IfICmp(_, _)
                | BranchInstruction::IfACmp(_, _)
                | BranchInstruction::IfNull(_, _)
        )
    }

    /// Every label this instruction may jump to (switch targets may repeat)
    pub fn targets(&self) -> Vec<&Lbl> {
        match self {
            BranchInstruction::If(_, lbl)
            | BranchInstruction::IfICmp(_, lbl)
            | BranchInstruction::IfACmp(_, lbl)
            | BranchInstruction::IfNull(_, lbl)
            | BranchInstruction::Goto(lbl) => vec![lbl],
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut all = vec![default];
                all.extend(targets.iter());
                all
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut all = vec![default];
                all.extend(targets.iter().map(|(_, target)| target));
                all
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => vec![],
        }
    }

    /// Change the representation of jump targets
    pub fn map_labels<Lbl2, E>(
        &self,
        mut map_label: impl FnMut(&Lbl) -> Result<Lbl2, E>,
    ) -> Result<BranchInstruction<Lbl2>, E> {
        use BranchInstruction::*;
        Ok(match self {
            If(ord, lbl) => If(*ord, map_label(lbl)?),
            IfICmp(ord, lbl) => IfICmp(*ord, map_label(lbl)?),
            IfACmp(eq, lbl) => IfACmp(*eq, map_label(lbl)?),
            IfNull(eq, lbl) => IfNull(*eq, map_label(lbl)?),
            Goto(lbl) => Goto(map_label(lbl)?),
            TableSwitch {
                default,
                low,
                targets,
            } => TableSwitch {
                default: map_label(default)?,
                low: *low,
                targets: targets
                    .iter()
                    .map(&mut map_label)
                    .collect::<Result<_, _>>()?,
            },
            LookupSwitch { default, targets } => LookupSwitch {
                default: map_label(default)?,
                targets: targets
                    .iter()
                    .map(|(key, target)| Ok((*key, map_label(target)?)))
                    .collect::<Result<_, _>>()?,
            },
            IReturn => IReturn,
            LReturn => LReturn,
            FReturn => FReturn,
            DReturn => DReturn,
            AReturn => AReturn,
            Return => Return,
            AThrow => AThrow,
        })
    }
}

/// Entry in an instruction list
///
/// Besides real instructions, the list contains labels (positions that branches, exception
/// handlers and debug tables refer to) and line number markers.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    Label(Label),
    /// Instructions following this marker come from the given source line
    LineNumber(u16),
    Op(Instruction),
    Branch(BranchInstruction),
}

impl Insn {
    /// Does this correspond to actual bytecode?
    pub fn is_real(&self) -> bool {
        matches!(self, Insn::Op(_) | Insn::Branch(_))
    }

    /// Is this the given non-branching instruction?
    pub fn is_op(&self, pred: impl FnOnce(&Instruction) -> bool) -> bool {
        match self {
            Insn::Op(op) => pred(op),
            _ => false,
        }
    }
}

impl From<Instruction> for Insn {
    fn from(op: Instruction) -> Insn {
        Insn::Op(op)
    }
}

impl From<BranchInstruction> for Insn {
    fn from(branch: BranchInstruction) -> Insn {
        Insn::Branch(branch)
    }
}

/// Type of shift
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    ArithmeticRight,
    LogicalRight,
}

/// How to treat `NaN` when comparing floating point numbers
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// `NaN` compares as smaller
    L,
    /// `NaN` compares as greater
    G,
}

/// Ordering comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because the constant argument it expects is not to a
/// `Constant::MethodRef`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn branch_targets() {
        let switch: BranchInstruction<usize> = BranchInstruction::LookupSwitch {
            default: 10,
            targets: vec![(-1, 20), (4, 10)],
        };
        assert_eq!(switch.targets(), vec![&10, &20, &10]);
        assert!(!switch.falls_through());

        let cond = BranchInstruction::IfNull(EqComparison::NE, 3usize);
        assert!(cond.falls_through());
        let relabelled = cond.map_labels(|off| Ok::<_, ()>(off * 2)).unwrap();
        assert_eq!(relabelled, BranchInstruction::IfNull(EqComparison::NE, 6));
    }

    #[test]
    fn pushed_widths() {
        assert_eq!(Instruction::LConst1.pushed_width(), Some(2));
        assert_eq!(Instruction::I2L.pushed_width(), Some(2));
        assert_eq!(Instruction::L2I.pushed_width(), Some(1));
        assert_eq!(Instruction::Dup.pushed_width(), None);
        assert_eq!(Instruction::AStore(4).pushed_width(), None);
        assert_eq!(!OrdComparison::LT, OrdComparison::GE);
    }
}
