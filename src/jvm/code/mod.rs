//! Bytecode representation, decoding, and encoding
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::jvm::class_file::Code),
//! the bytecode is the part of the class file that gets rewritten. Instructions are split in
//! two groups:
//!
//!   - [`Instruction`] for straight-line instructions
//!   - [`BranchInstruction`] for instructions that may branch or end the method
//!
//! A method body ([`MethodBody`]) is an [`InsnList`] of those, interleaved with [`Label`]s and
//! line number markers. Unlike a flat vector, the list hands out stable [`InsnId`] handles so
//! that analysis results can keep referring to nodes while the list gets rearranged.
//!
//! ### Decoding and encoding
//!
//! [`decode_method`] turns a `Code` attribute into a [`MethodBody`], with every jump target,
//! exception range boundary, and local variable range boundary becoming a label. An
//! [`InstructionVisitor`] sees each instruction as it gets appended. [`layout`] and [`emit`] go
//! the other way.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod decode;
mod encode;
mod insn_list;
mod instructions;
mod label;
mod method_body;
mod opcodes;

pub use decode::*;
pub use encode::*;
pub use insn_list::*;
pub use instructions::*;
pub use label::*;
pub use method_body::*;
