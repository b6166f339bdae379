//! Core abstractions shared by the migration engine.
//!
//! - [`value`]: schemaless record and field value representation
//! - [`ids`]: identity fields, coerced id values, and id tuples
//!
//! Everything above this module (mapper, executor, drivers) exchanges data
//! exclusively through these types, keeping the engine agnostic of any
//! concrete source or destination format.

pub mod ids;
pub mod value;

// Re-export commonly used types for convenience
pub use ids::{extract_ids, IdField, IdKind, IdTuple, IdValue};
pub use value::{Record, Value};
