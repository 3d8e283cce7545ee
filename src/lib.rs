//! Prepare JVM methods for stackful continuations
//!
//! A suspendable method must be able to unwind its frame at any suspension call and rebuild it
//! later. The JVM refuses to let an uninitialized object (one which was allocated with `new` but
//! whose constructor has not yet run) live on the operand stack across such a point, so before any
//! capture logic is injected, every allocation is moved down so that it sits right in front of its
//! matching `<init>` call.
//!
//! The crate is split in two halves:
//!
//!   - [`jvm`] reads, models, analyzes and writes class files
//!   - [`continuation`] finds suspension points, tracks where constructor receivers come from,
//!     and rewrites allocations
//!
//! ### Example
//!
//! ```no_run
//! use stackflow::continuation::{ClassTransformer, Settings};
//! use stackflow::jvm::class_graph::{ClassGraph, ClassGraphArenas};
//!
//! # fn transform(bytes: &[u8]) -> Result<Vec<u8>, stackflow::continuation::Error> {
//! let arenas = ClassGraphArenas::new();
//! let class_graph = ClassGraph::new(&arenas);
//! class_graph.insert_java_library_types();
//!
//! let transformer = ClassTransformer::new(&class_graph, Settings::default());
//! transformer.transform(bytes)
//! # }
//! ```

pub mod continuation;
pub mod jvm;
pub mod util;
