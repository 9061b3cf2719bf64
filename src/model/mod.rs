//! Relational model types: identifiers, JSON paths, elements and the derived set

mod derived_set;
mod elements;
mod identifiers;
mod json_path;

pub use derived_set::*;
pub use elements::*;
pub use identifiers::*;
pub use json_path::{JsonPathExpression, JsonPathSegment};
