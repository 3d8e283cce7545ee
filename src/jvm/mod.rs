//! Read, model, analyze and write JVM classes
//!
//! The modules here are layered roughly from the bytes upwards:
//!
//!   - [`class_file`] is a faithful model of the `.class` format (constant pool, members, raw
//!     attributes) which can be parsed and re-serialized
//!   - [`code`] decodes a `Code` attribute into an editable list of instructions and labels, and
//!     assembles that list back into bytecode
//!   - [`class_graph`] records the class hierarchy needed to merge reference types
//!   - [`verifier`] runs a forward dataflow analysis over instruction lists, parametrized by an
//!     interpreter, and turns the resulting frames into a `StackMapTable`

mod access_flags;
mod binary_format;
pub mod class_file;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use binary_format::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
