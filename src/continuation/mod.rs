//! Preparing methods for stackful continuations
//!
//! A method goes through the following steps:
//!
//!   1. While its code gets decoded, the [`SuspensionClassifier`] puts a fresh label in front of
//!      every call that may suspend (anything but `invokespecial <init>` and `invokedynamic`) and
//!      records the `<init>` calls on the side.
//!   2. A provenance analysis ([`find_relocations`]) traces the receiver of each `<init>` call back
//!      to the `new` that allocated it, through the `dup` and `dup_x1; swap` idioms compilers emit.
//!   3. [`relocate_allocations`] moves each such `new` right in front of its initializer, shuffling
//!      the constructor arguments on the stack (or through temporary locals) so that the
//!      initializer still sees the same operands. After this, no uninitialized reference is live
//!      across a suspension point.
//!   4. The verifying interpreter re-checks the body, a [`SuspensionInjector`] gets to insert its
//!      capture/restore logic, and the method is assembled back with fresh maxima and frames.
//!
//! [`ClassTransformer`] drives this for every selected method of a class.

mod classifier;
mod errors;
#[cfg(test)]
mod fixtures;
mod method;
mod provenance;
mod relocate;
mod settings;
mod transformer;

pub use classifier::*;
pub use errors::*;
pub use method::*;
pub use provenance::*;
pub use relocate::*;
pub use settings::*;
pub use transformer::*;
