//! Index inventory
//!
//! Per table: the PK-implied index, one unique index per UNIQUE constraint
//! and one support index per foreign key. A support index is skipped when
//! the FK columns are a leftmost prefix of an index already emitted for the
//! table, so emission order (PK, UKs, FKs) is significant.

use tracing::debug;

use super::SetPass;
use crate::builder::RelationalModelSetBuilderContext;
use crate::error::{RelSchemaError, Result};
use crate::model::{DbColumnName, DbIndexInfo, DbIndexKind, DbIndexName, DbTableModel, TableConstraint};
use crate::naming::constraint_naming::foreign_key_support_index_name;

pub struct IndexInventoryPass;

impl SetPass for IndexInventoryPass {
    fn name(&self) -> &'static str {
        "IndexInventory"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        let mut indexes = Vec::new();

        for entry in ctx.relational_resources() {
            for table in &entry.model.tables_in_dependency_order {
                indexes.extend(table_indexes(table)?);
            }
        }
        for info in &ctx.abstract_identity_tables {
            indexes.extend(table_indexes(&info.table)?);
        }

        debug!(count = indexes.len(), "derived index inventory");
        ctx.indexes = indexes;
        Ok(())
    }
}

/// Indexes for one table in creation order.
pub fn table_indexes(table: &DbTableModel) -> Result<Vec<DbIndexInfo>> {
    let mut indexes = vec![DbIndexInfo {
        name: DbIndexName::new(table.key.constraint_name.clone()),
        table: table.table.clone(),
        key_columns: table.key.column_names(),
        is_unique: true,
        kind: DbIndexKind::PrimaryKey,
    }];

    for constraint in &table.constraints {
        if let TableConstraint::Unique { name, columns } = constraint {
            indexes.push(DbIndexInfo {
                name: DbIndexName::new(name.clone()),
                table: table.table.clone(),
                key_columns: columns.clone(),
                is_unique: true,
                kind: DbIndexKind::UniqueConstraint,
            });
        }
    }

    for constraint in &table.constraints {
        let TableConstraint::ForeignKey { name, columns, .. } = constraint else {
            continue;
        };
        ensure_stored_fk_columns(table, name, columns)?;

        if indexes.iter().any(|index| is_leftmost_prefix(columns, &index.key_columns)) {
            debug!(table = %table.table, foreign_key = %name, "foreign key covered by existing index");
            continue;
        }
        indexes.push(DbIndexInfo {
            name: DbIndexName::new(foreign_key_support_index_name(&table.table, columns)),
            table: table.table.clone(),
            key_columns: columns.clone(),
            is_unique: false,
            kind: DbIndexKind::ForeignKeySupport,
        });
    }

    Ok(indexes)
}

fn is_leftmost_prefix(columns: &[DbColumnName], key_columns: &[DbColumnName]) -> bool {
    !columns.is_empty() && key_columns.starts_with(columns)
}

fn ensure_stored_fk_columns(table: &DbTableModel, fk_name: &str, columns: &[DbColumnName]) -> Result<()> {
    for column_name in columns {
        let column = table.column(column_name).ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Foreign key '{}' on table '{}' references missing column '{}'.",
                fk_name, table.table, column_name
            ))
        })?;
        if column.is_synthetic_presence() {
            return Err(RelSchemaError::invariant(format!(
                "Foreign key '{}' on table '{}' references synthetic presence column '{}'.",
                fk_name, table.table, column_name
            )));
        }
        if !column.is_stored() {
            return Err(RelSchemaError::invariant(format!(
                "Foreign key '{}' on table '{}' references unified alias column '{}'; \
                 foreign keys must use stored columns.",
                fk_name, table.table, column_name
            )));
        }
    }
    Ok(())
}
