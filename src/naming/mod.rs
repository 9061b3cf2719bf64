//! Naming services: conventions, constraint names, dialect rules and collision detection

pub mod collision;
pub mod constraint_naming;
pub mod conventions;
mod dialect;

pub use dialect::{DialectRules, LengthMeasure, SqlDialect};
