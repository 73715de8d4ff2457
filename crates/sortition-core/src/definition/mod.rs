//! Sortition definition parsing and validation.
//!
//! A definition file bundles everything a selection run reads from the
//! domain: panel size, strata with their quota percentages, and the pool.

mod parser;
mod schema;

pub use parser::{DefinitionError, SortitionDefinition};
pub use schema::validate_definition_schema;
