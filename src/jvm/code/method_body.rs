use crate::jvm::class_file::{ClassConstantIndex, Utf8ConstantIndex};
use crate::jvm::code::{InsnList, Label, LabelGenerator};
use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, UnqualifiedName};

/// Exception handler range, expressed with labels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryCatchBlock {
    /// Start of the covered range (inclusive)
    pub start: Label,
    /// End of the covered range (exclusive)
    pub end: Label,
    pub handler: Label,
    /// Class of exceptions caught (`None` catches everything)
    pub catch_type: Option<(ClassConstantIndex, BinaryName)>,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`, expressed with labels
///
/// The name and descriptor/signature are kept as pool indices since the rewrite never changes
/// them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableRange {
    pub start: Label,
    pub end: Label,
    pub name_index: Utf8ConstantIndex,
    pub type_index: Utf8ConstantIndex,
    pub index: u16,
}

/// Editable model of a method's code
#[derive(Clone, Debug)]
pub struct MethodBody {
    pub owner: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,

    /// Instructions, labels, and line number markers
    pub instructions: InsnList,

    /// Exception handlers, in priority order
    pub try_catch_blocks: Vec<TryCatchBlock>,

    pub local_variables: Vec<LocalVariableRange>,
    pub local_variable_types: Vec<LocalVariableRange>,

    /// Maximum operand stack depth (in words)
    pub max_stack: usize,

    /// Number of local variable slots
    pub max_locals: usize,

    pub labels: LabelGenerator,
}

impl MethodBody {
    /// Empty body for the given method
    pub fn new(
        owner: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        access_flags: MethodAccessFlags,
    ) -> MethodBody {
        let has_this = !access_flags.contains(MethodAccessFlags::STATIC);
        let max_locals = descriptor.parameter_length(has_this);
        MethodBody {
            owner,
            name,
            descriptor,
            access_flags,
            instructions: InsnList::new(),
            try_catch_blocks: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            max_stack: 0,
            max_locals,
            labels: LabelGenerator::new(),
        }
    }

    pub fn fresh_label(&mut self) -> Label {
        self.labels.fresh_label()
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Does the body contain any actual bytecode (as opposed to just labels)?
    pub fn has_instructions(&self) -> bool {
        self.instructions.iter().any(|(_, insn)| insn.is_real())
    }
}
