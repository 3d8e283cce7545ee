use crate::jvm::code::{Insn, InsnId, Instruction, MethodBody};
use crate::jvm::{BinaryName, FieldType, VerifierErrorKind};
use crate::util::Width;
use std::fmt::Debug;

/// Semantics of the abstract values tracked by the [analyzer](super::analyze)
///
/// The frame takes care of the shape of the stack and locals (which values get popped, pushed,
/// stored, or shuffled around). The interpreter decides what the values are.
pub trait Interpreter {
    type Value: Clone + PartialEq + Debug + Width;

    /// Value of the receiver on method entry
    fn this_value(&self, body: &MethodBody) -> Self::Value;

    /// Value of a parameter on method entry
    fn parameter_value(&self, parameter: &FieldType) -> Self::Value;

    /// Value of unused local slots (including the upper half of a wide local)
    fn empty_value(&self) -> Self::Value;

    /// Value on the stack on entry to an exception handler
    fn exception_value(&self, catch_type: Option<&BinaryName>) -> Self::Value;

    /// Value moved around without change: loads, stores, and the `dup`/`swap` family
    fn copy_operation(
        &self,
        id: InsnId,
        instruction: &Instruction,
        value: &Self::Value,
    ) -> Result<Self::Value, VerifierErrorKind>;

    /// Result of any other instruction, given its popped arguments (deepest first)
    ///
    /// Returns `None` for instructions that don't push anything.
    fn operation(
        &self,
        id: InsnId,
        insn: &Insn,
        arguments: &[Self::Value],
    ) -> Result<Option<Self::Value>, VerifierErrorKind>;

    /// Initialized version of the receiver of an `<init>` call
    ///
    /// If this returns a value, every copy of the receiver in the frame gets replaced with it.
    fn initialize(&self, receiver: &Self::Value) -> Option<Self::Value>;

    /// Value for a slot reachable with either of two values
    fn merge(&self, value1: &Self::Value, value2: &Self::Value)
        -> Result<Self::Value, VerifierErrorKind>;
}
