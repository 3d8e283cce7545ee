//! Dataflow analysis of method bodies, and stack map frames
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ and the set of stack map frames for all possible jump targets in a method is the
//! _stack map table_.
//!
//! Rewriting a method invalidates its stack map table, so here it gets inferred from scratch.
//! [`analyze`] is a fix-point algorithm which propagates [`Frame`]s along every control flow edge
//! and merges them where edges join. What gets tracked in the frames is up to the
//! [`Interpreter`]:
//!
//!   - [`TypeInterpreter`] tracks [`VerificationType`]s (types slightly augmented to take into
//!     account initialization and null), which is what [`stack_map_table`] needs
//!   - [`SourceInterpreter`] tracks which instructions produced each value, which is how the
//!     receivers of constructor calls get traced back to their allocation
//!
//! See [verification by type checking][0] for the rules the resulting frames must satisfy.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod analyzer;
mod dead_code;
mod frame;
mod interpreter;
mod source;
mod stack_map;
mod type_interpreter;
mod types;

pub use analyzer::*;
pub use dead_code::*;
pub use frame::*;
pub use interpreter::*;
pub use source::*;
pub use stack_map::*;
pub use type_interpreter::*;
pub use types::*;
