//! Deterministic ordering of columns, constraints and resource-level lists
//!
//! Columns are ordered by group (key, unification support, document FKs,
//! descriptor FKs, scalars, other) then name, with every unified alias placed
//! after the canonical and presence columns it depends on.

use std::collections::{BTreeMap, BTreeSet};

use super::SetPass;
use crate::builder::RelationalModelSetBuilderContext;
use crate::error::{RelSchemaError, Result};
use crate::model::{ColumnKind, ColumnStorage, DbColumnModel, DbColumnName, DbTableModel, RelationalResourceModel};

pub struct CanonicalizePass;

impl SetPass for CanonicalizePass {
    fn name(&self) -> &'static str {
        "Canonicalize"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        for entry in ctx.concrete_resources.iter_mut() {
            canonicalize_resource(&mut entry.model)?;
        }
        for info in ctx.abstract_identity_tables.iter_mut() {
            canonicalize_table(&mut info.table)?;
        }
        Ok(())
    }
}

pub fn canonicalize_resource(model: &mut RelationalResourceModel) -> Result<()> {
    for table in model.tables_in_dependency_order.iter_mut() {
        canonicalize_table(table)?;
    }
    model
        .document_reference_bindings
        .sort_by(|a, b| (&a.table, &a.reference_object_path).cmp(&(&b.table, &b.reference_object_path)));
    model
        .descriptor_edge_sources
        .sort_by(|a, b| (&a.table, &a.descriptor_value_path).cmp(&(&b.table, &b.descriptor_value_path)));
    model
        .descriptor_foreign_key_deduplications
        .sort_by(|a, b| (&a.table, &a.storage_column).cmp(&(&b.table, &b.storage_column)));
    Ok(())
}

pub fn canonicalize_table(table: &mut DbTableModel) -> Result<()> {
    table.columns = order_columns(table)?;
    table
        .constraints
        .sort_by(|a, b| (a.ordering_group(), a.name()).cmp(&(b.ordering_group(), b.name())));
    table
        .key_unification_classes
        .sort_by(|a, b| a.canonical_column.cmp(&b.canonical_column));
    Ok(())
}

/// `(group, key index, name)`; the derived ordering is the column order.
type ColumnRank = (u8, usize, DbColumnName);

fn rank(column: &DbColumnModel, key_order: &BTreeMap<&DbColumnName, usize>) -> ColumnRank {
    let name = column.column_name.clone();
    if let Some(&index) = key_order.get(&column.column_name) {
        return (0, index, name);
    }
    if column.is_stored() && column.source_json_path.is_none() {
        return (1, usize::MAX, name);
    }
    let group = match column.kind {
        ColumnKind::DocumentFk => 2,
        ColumnKind::DescriptorFk => 3,
        ColumnKind::Scalar => 4,
        ColumnKind::Ordinal | ColumnKind::ParentKeyPart => 5,
    };
    (group, usize::MAX, name)
}

fn order_columns(table: &DbTableModel) -> Result<Vec<DbColumnModel>> {
    let mut by_name: BTreeMap<&DbColumnName, &DbColumnModel> = BTreeMap::new();
    for column in &table.columns {
        if by_name.insert(&column.column_name, column).is_some() {
            return Err(RelSchemaError::invariant(format!(
                "Duplicate column '{}' encountered while canonicalizing table '{}'.",
                column.column_name, table.table
            )));
        }
    }

    let key_order = table
        .key
        .columns
        .iter()
        .enumerate()
        .map(|(index, key)| (&key.column_name, index))
        .collect::<BTreeMap<_, _>>();

    // Alias depends on its canonical column and its presence gate
    let mut pending: BTreeMap<&DbColumnName, usize> = by_name.keys().map(|name| (*name, 0)).collect();
    let mut dependents: BTreeMap<&DbColumnName, BTreeSet<&DbColumnName>> = BTreeMap::new();

    for column in &table.columns {
        let ColumnStorage::UnifiedAlias {
            canonical_column,
            presence_column,
        } = &column.storage
        else {
            continue;
        };
        let dependencies = std::iter::once(("canonical column", canonical_column))
            .chain(presence_column.iter().map(|p| ("presence-gate column", p)));

        for (role, dependency) in dependencies {
            let Some((dependency, _)) = by_name.get_key_value(dependency) else {
                return Err(RelSchemaError::invariant(format!(
                    "Unified alias column '{}' on table '{}' references missing {} '{}'.",
                    column.column_name, table.table, role, dependency
                )));
            };
            if *dependency == &column.column_name {
                return Err(RelSchemaError::invariant(format!(
                    "Unified alias column '{}' on table '{}' cannot depend on itself.",
                    column.column_name, table.table
                )));
            }
            if dependents.entry(*dependency).or_default().insert(&column.column_name) {
                *pending.entry(&column.column_name).or_default() += 1;
            }
        }
    }

    let mut available = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| rank(by_name[name], &key_order))
        .collect::<BTreeSet<_>>();
    let mut ordered = Vec::with_capacity(table.columns.len());

    while let Some(next) = available.pop_first() {
        let column = by_name[&next.2];
        ordered.push(column.clone());

        for dependent in dependents.get(&column.column_name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    available.insert(rank(by_name[dependent], &key_order));
                }
            }
        }
    }

    if ordered.len() != table.columns.len() {
        let blocked = pending
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(RelSchemaError::invariant(format!(
            "Detected circular unified alias column dependencies while canonicalizing table '{}': {}.",
            table.table, blocked
        )));
    }

    Ok(ordered)
}
