//! Array uniqueness constraints
//!
//! `arrayUniquenessConstraints` name JSON paths whose values must be unique
//! within one array. Each group of paths sharing an array scope becomes a
//! `UX_` constraint on the child table of that scope, keyed by the parent
//! key parts plus the bound columns.

use std::collections::BTreeMap;

use tracing::debug;

use super::unified_alias::{metadata_for, resolve_storage_column, PresenceGatePolicy};
use super::SetPass;
use crate::builder::{ConcreteResourceEntry, RelationalModelSetBuilderContext};
use crate::error::{RelSchemaError, Result};
use crate::model::{
    ColumnKind, DbColumnName, DbTableModel, DbTableName, JsonPathExpression,
    QualifiedResourceName, TableConstraint,
};
use crate::naming::constraint_naming::array_uniqueness_name;
use crate::schema::ArrayUniquenessConstraint;

pub struct ArrayUniquenessPass;

impl SetPass for ArrayUniquenessPass {
    fn name(&self) -> &'static str {
        "ArrayUniqueness"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        let mut additions = Vec::new();

        for (index, entry) in ctx.concrete_resources.iter().enumerate() {
            if entry.model.is_descriptor_storage() {
                continue;
            }
            let mut resolver = UniquenessResolver { ctx, entry, found: Vec::new() };
            for constraint in &entry.inputs.schema.array_uniqueness_constraints {
                resolver.apply(constraint)?;
            }
            additions.extend(resolver.found.into_iter().map(|(table, columns)| (index, table, columns)));
        }

        for (index, table_name, columns) in additions {
            let entry = &mut ctx.concrete_resources[index];
            let resource = entry.model.resource.clone();
            let table = entry.model.table_mut(&table_name).ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "Table '{}' was not found on resource '{}'.",
                    table_name, resource
                ))
            })?;
            if table.has_unique_on(&columns) {
                continue;
            }
            let name = array_uniqueness_name(&table.table, &columns);
            debug!(table = %table.table, constraint = %name, "added array uniqueness constraint");
            table.constraints.push(TableConstraint::Unique { name, columns });
        }

        Ok(())
    }
}

struct UniquenessResolver<'a> {
    ctx: &'a RelationalModelSetBuilderContext,
    entry: &'a ConcreteResourceEntry,
    found: Vec<(DbTableName, Vec<DbColumnName>)>,
}

impl UniquenessResolver<'_> {
    fn resource(&self) -> &QualifiedResourceName {
        &self.entry.model.resource
    }

    fn apply(&mut self, constraint: &ArrayUniquenessConstraint) -> Result<()> {
        if constraint.paths.is_empty() {
            return Err(RelSchemaError::schema_input(format!(
                "arrayUniquenessConstraints on resource '{}' must include at least one path.",
                self.resource()
            )));
        }

        let mut paths_by_scope: BTreeMap<JsonPathExpression, Vec<JsonPathExpression>> = BTreeMap::new();
        for path in &constraint.paths {
            let resolved = match &constraint.base_path {
                Some(base) => base.join(path),
                None => path.clone(),
            };
            let scope = resolved.array_scope().ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "arrayUniquenessConstraints path '{}' on resource '{}' must include an array wildcard segment.",
                    resolved,
                    self.resource()
                ))
            })?;
            paths_by_scope.entry(scope).or_default().push(resolved);
        }

        for (scope, paths) in &paths_by_scope {
            let found = self.resolve_scope(scope, paths)?;
            self.found.push(found);
        }

        for nested in &constraint.nested_constraints {
            self.apply(nested)?;
        }
        Ok(())
    }

    fn resolve_scope(
        &self,
        scope: &JsonPathExpression,
        paths: &[JsonPathExpression],
    ) -> Result<(DbTableName, Vec<DbColumnName>)> {
        let mut candidates = self
            .entry
            .model
            .tables_in_dependency_order
            .iter()
            .filter(|table| &table.json_scope == scope)
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| a.table.cmp(&b.table));

        let mut matches = Vec::new();
        let mut failures = Vec::new();
        for candidate in candidates {
            match self.unique_columns(candidate, paths) {
                Ok(columns) => matches.push((candidate.table.clone(), columns)),
                Err(error) => failures.push(error),
            }
        }

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 if !failures.is_empty() => {
                if failures.len() == 1 {
                    return Err(failures.remove(0));
                }
                let combined = failures
                    .iter()
                    .map(|error| error.message())
                    .collect::<Vec<_>>()
                    .join(" ");
                Err(RelSchemaError::invariant(combined))
            }
            0 => Err(RelSchemaError::invariant(format!(
                "arrayUniquenessConstraints scope '{}' on resource '{}' did not map to a child table.",
                scope,
                self.resource()
            ))),
            _ => {
                let names = matches
                    .iter()
                    .map(|(table, _)| table.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(RelSchemaError::invariant(format!(
                    "arrayUniquenessConstraints scope '{}' on resource '{}' matched multiple tables: {}.",
                    scope,
                    self.resource(),
                    names
                )))
            }
        }
    }

    fn unique_columns(&self, table: &DbTableModel, paths: &[JsonPathExpression]) -> Result<Vec<DbColumnName>> {
        let metadata = metadata_for(&self.ctx.storage_metadata, table)?;
        let context = format!("Array uniqueness on resource '{}'", self.resource());

        let mut columns = table
            .key
            .columns
            .iter()
            .filter(|column| column.kind == ColumnKind::ParentKeyPart)
            .map(|column| column.column_name.clone())
            .collect::<Vec<_>>();

        for path in paths {
            let column = self.column_for_path(table, path)?;
            let stored = resolve_storage_column(
                &column,
                &metadata,
                PresenceGatePolicy::RejectSyntheticScalarPresence,
                &context,
            )?;
            if !columns.contains(&stored) {
                columns.push(stored);
            }
        }
        Ok(columns)
    }

    /// Reference identity paths collapse onto the reference anchor column.
    fn column_for_path(&self, table: &DbTableModel, path: &JsonPathExpression) -> Result<DbColumnName> {
        if let Some((binding, _)) = self.entry.model.binding_for_identity_path(path) {
            if binding.table != table.table {
                return Err(RelSchemaError::invariant(format!(
                    "arrayUniquenessConstraints path '{}' on resource '{}' did not bind to the owning table scope.",
                    path,
                    self.resource()
                )));
            }
            return Ok(binding.fk_column.clone());
        }

        table
            .columns_by_source_path(path)
            .first()
            .map(|column| column.column_name.clone())
            .ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "arrayUniquenessConstraints path '{}' on resource '{}' did not map to a column on table '{}'.",
                    path,
                    self.resource(),
                    table.table.name
                ))
            })
    }
}
