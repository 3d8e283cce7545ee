//! Faithful model of the `.class` file format
//!
//! Everything here can be parsed from bytes and serialized back. Structures which this crate never
//! needs to look inside (fields, most attributes) are kept as raw bytes so that they round-trip
//! exactly.

mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use version::*;
