//! Descriptor foreign keys
//!
//! One FK to `dms.Descriptor(DocumentId)` per stored descriptor column. When
//! key unification collapsed several descriptor bindings onto one column, a
//! deduplication entry records which binding columns share it.

use std::collections::BTreeMap;

use tracing::debug;

use super::unified_alias::{metadata_for, resolve_storage_column, PresenceGatePolicy};
use super::SetPass;
use crate::builder::{descriptor_table, RelationalModelSetBuilderContext};
use crate::error::Result;
use crate::model::{
    ColumnKind, DbColumnName, DbTableModel, DescriptorForeignKeyDeduplication, ReferentialAction,
    TableConstraint,
};
use crate::naming::constraint_naming::descriptor_foreign_key_name;
use crate::naming::conventions::document_id_column;
use crate::passes::unified_alias::TableStorageMetadata;

pub struct DescriptorForeignKeyPass;

impl SetPass for DescriptorForeignKeyPass {
    fn name(&self) -> &'static str {
        "DescriptorForeignKey"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        let storage_metadata = std::mem::take(&mut ctx.storage_metadata);

        for entry in ctx.concrete_resources.iter_mut() {
            if entry.model.is_descriptor_storage() {
                continue;
            }
            let resource = entry.model.resource.clone();
            let mut deduplications = Vec::new();

            for table in entry.model.tables_in_dependency_order.iter_mut() {
                let metadata = metadata_for(&storage_metadata, table)?;
                let groups = group_by_storage(table, &metadata, &resource.to_string())?;

                for (storage_column, binding_columns) in groups {
                    let constraint = TableConstraint::ForeignKey {
                        name: descriptor_foreign_key_name(&table.table, &storage_column),
                        columns: vec![storage_column.clone()],
                        target_table: descriptor_table(),
                        target_columns: vec![document_id_column()],
                        on_delete: ReferentialAction::NoAction,
                        on_update: ReferentialAction::NoAction,
                    };
                    if !table.constraints.contains(&constraint) {
                        table.constraints.push(constraint);
                    }

                    if binding_columns.len() > 1 {
                        debug!(
                            table = %table.table,
                            storage = %storage_column,
                            bindings = binding_columns.len(),
                            "deduplicated descriptor foreign key"
                        );
                        deduplications.push(DescriptorForeignKeyDeduplication {
                            table: table.table.clone(),
                            storage_column,
                            binding_columns,
                        });
                    }
                }
            }

            entry.model.descriptor_foreign_key_deduplications = deduplications;
        }

        ctx.storage_metadata = storage_metadata;
        Ok(())
    }
}

/// Descriptor columns grouped by the stored column holding their value.
///
/// Each group lists the JSON-bound columns that resolved to it, ordinally.
fn group_by_storage(
    table: &DbTableModel,
    metadata: &TableStorageMetadata,
    resource: &str,
) -> Result<BTreeMap<DbColumnName, Vec<DbColumnName>>> {
    let context = format!("Descriptor foreign key on resource '{}'", resource);
    let mut groups: BTreeMap<DbColumnName, Vec<DbColumnName>> = BTreeMap::new();

    for column in table.columns.iter().filter(|c| c.kind == ColumnKind::DescriptorFk) {
        let storage = resolve_storage_column(
            &column.column_name,
            metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            &context,
        )?;
        let bindings = groups.entry(storage).or_default();
        if column.source_json_path.is_some() {
            bindings.push(column.column_name.clone());
        }
    }

    for bindings in groups.values_mut() {
        bindings.sort();
    }
    Ok(groups)
}
