//! Final foreign key storage check
//!
//! Every FK column, local or target, must be a stored column. Targets in the
//! `dms` schema are core tables outside the derived set and are not checked.

use std::collections::BTreeMap;

use super::SetPass;
use crate::builder::RelationalModelSetBuilderContext;
use crate::error::{RelSchemaError, Result};
use crate::model::{DbColumnName, DbTableModel, TableConstraint};
use crate::naming::conventions::DMS_SCHEMA;

pub struct ForeignKeyStorageValidationPass;

impl SetPass for ForeignKeyStorageValidationPass {
    fn name(&self) -> &'static str {
        "ForeignKeyStorageValidation"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        let tables = ctx
            .relational_resources()
            .flat_map(|entry| entry.model.tables_in_dependency_order.iter())
            .chain(ctx.abstract_identity_tables.iter().map(|info| &info.table))
            .map(|table| (&table.table, table))
            .collect::<BTreeMap<_, _>>();

        for table in tables.values() {
            for constraint in &table.constraints {
                let TableConstraint::ForeignKey {
                    name,
                    columns,
                    target_table,
                    target_columns,
                    ..
                } = constraint
                else {
                    continue;
                };

                check_columns(table, name, columns, "column")?;
                if target_table.schema.as_str() == DMS_SCHEMA {
                    continue;
                }
                let target = tables.get(target_table).ok_or_else(|| {
                    RelSchemaError::invariant(format!(
                        "Foreign key '{}' on table '{}' targets unknown table '{}'.",
                        name, table.table, target_table
                    ))
                })?;
                check_columns(target, name, target_columns, "target column")?;
            }
        }
        Ok(())
    }
}

fn check_columns(table: &DbTableModel, fk_name: &str, columns: &[DbColumnName], role: &str) -> Result<()> {
    for column_name in columns {
        let reject = |problem: &str| {
            RelSchemaError::invariant(format!(
                "Foreign key '{}' {} '{}' on table '{}' {}.",
                fk_name,
                role,
                column_name,
                table.table,
                problem
            ))
        };
        let column = table.column(column_name).ok_or_else(|| reject("does not exist"))?;
        if !column.is_stored() {
            return Err(reject("is a unified alias; foreign keys must use stored columns"));
        }
        if column.is_synthetic_presence() {
            return Err(reject("is a synthetic presence column"));
        }
    }
    Ok(())
}
