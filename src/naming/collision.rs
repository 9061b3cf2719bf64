//! Identifier collision detection
//!
//! Every derived identifier is registered with its original (pre-shortening)
//! name and a human-readable origin. Two distinct registrations that end up
//! with the same final name in the same scope are a collision; registering the
//! exact same origin twice is not.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RelSchemaError, Result};
use crate::model::{DbSchemaName, DbTableName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IdentifierKind {
    Schema,
    Table,
    Column,
    Constraint,
    Index,
    Trigger,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IdentifierKind::Schema => "schema name",
            IdentifierKind::Table => "table name",
            IdentifierKind::Column => "column name",
            IdentifierKind::Constraint => "constraint name",
            IdentifierKind::Index => "index name",
            IdentifierKind::Trigger => "trigger name",
        };
        f.write_str(label)
    }
}

/// Namespace in which a final identifier must be unique
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum CollisionScope {
    Database,
    Schema(DbSchemaName),
    Table(DbTableName),
}

impl fmt::Display for CollisionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionScope::Database => f.write_str("in database"),
            CollisionScope::Schema(schema) => write!(f, "in schema '{}'", schema),
            CollisionScope::Table(table) => write!(f, "in table '{}'", table),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IdentifierOrigin {
    pub original_name: String,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct IdentifierCollisionDetector {
    entries: BTreeMap<(IdentifierKind, CollisionScope, String), Vec<IdentifierOrigin>>,
}

impl IdentifierCollisionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: IdentifierKind,
        scope: CollisionScope,
        final_name: &str,
        original_name: &str,
        description: impl Into<String>,
    ) {
        self.entries
            .entry((kind, scope, final_name.to_string()))
            .or_default()
            .push(IdentifierOrigin {
                original_name: original_name.to_string(),
                description: description.into(),
            });
    }

    /// Fail with every collision found, labelled with `stage`.
    pub fn ensure_no_collisions(&self, stage: &str) -> Result<()> {
        let mut reports = Vec::new();

        for ((kind, scope, final_name), origins) in &self.entries {
            let mut distinct = origins.clone();
            distinct.sort();
            distinct.dedup();
            if distinct.len() < 2 {
                continue;
            }

            let members = distinct
                .iter()
                .map(|origin| {
                    format!(
                        "{} -> {} ({})",
                        origin.original_name, final_name, origin.description
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            reports.push(format!("{} collision {} {}: {}", kind, stage, scope, members));
        }

        if reports.is_empty() {
            return Ok(());
        }

        Err(RelSchemaError::IdentifierCollision {
            message: format!(
                "Identifier shortening collisions detected: {}",
                reports.join("; ")
            ),
        })
    }
}
