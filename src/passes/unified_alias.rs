//! Unified-alias storage metadata and resolution
//!
//! After key unification a column may be a `UnifiedAlias` of a canonical
//! stored column, optionally gated by a presence column. Anything that needs
//! a physical column (FKs, uniques, indexes, triggers) goes through
//! `resolve_storage_column`.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use super::SetPass;
use crate::builder::RelationalModelSetBuilderContext;
use crate::error::{RelSchemaError, Result};
use crate::model::{ColumnKind, ColumnStorage, DbColumnModel, DbColumnName, DbTableModel, DbTableName};

/// Per-table lookup of columns and their presence-gate roles
#[derive(Debug, Clone, Default)]
pub struct TableStorageMetadata {
    pub table: Option<DbTableName>,
    pub columns_by_name: BTreeMap<DbColumnName, DbColumnModel>,
    /// Every column named as a presence gate by some alias
    pub presence_gates: BTreeSet<DbColumnName>,
    /// Presence gates that are synthetic `_Present` flags
    pub synthetic_presence_columns: BTreeSet<DbColumnName>,
}

/// Which presence columns a caller refuses to accept as storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceGatePolicy {
    RejectSyntheticScalarPresence,
    RejectAllPresenceGates,
}

impl TableStorageMetadata {
    /// Build and validate metadata for `table`.
    pub fn build(table: &DbTableModel) -> Result<Self> {
        let columns_by_name = table
            .columns
            .iter()
            .map(|c| (c.column_name.clone(), c.clone()))
            .collect::<BTreeMap<_, _>>();

        let mut presence_gates = BTreeSet::new();
        let mut synthetic_presence_columns = BTreeSet::new();

        for column in &table.columns {
            let ColumnStorage::UnifiedAlias {
                canonical_column,
                presence_column,
            } = &column.storage
            else {
                continue;
            };

            match columns_by_name.get(canonical_column) {
                Some(canonical) if canonical.is_stored() => {}
                Some(_) => {
                    return Err(RelSchemaError::invariant(format!(
                        "Unified alias '{}' on table '{}' points at canonical column '{}' which is not stored.",
                        column.column_name, table.table, canonical_column
                    )))
                }
                None => {
                    return Err(RelSchemaError::invariant(format!(
                        "Unified alias '{}' on table '{}' points at missing canonical column '{}'.",
                        column.column_name, table.table, canonical_column
                    )))
                }
            }

            let Some(presence_name) = presence_column else {
                continue;
            };
            let presence = columns_by_name.get(presence_name).ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "Unified alias '{}' on table '{}' points at missing presence column '{}'.",
                    column.column_name, table.table, presence_name
                ))
            })?;

            if presence.kind == ColumnKind::DocumentFk {
                if !presence.is_stored() {
                    return Err(RelSchemaError::invariant(format!(
                        "Reference presence column '{}' on table '{}' must be stored.",
                        presence_name, table.table
                    )));
                }
            } else if presence.is_synthetic_presence() {
                synthetic_presence_columns.insert(presence_name.clone());
            } else {
                return Err(RelSchemaError::invariant(format!(
                    "Presence column '{}' for alias '{}' on table '{}' must be a reference anchor \
                     or a nullable stored boolean without a JSON source.",
                    presence_name, column.column_name, table.table
                )));
            }
            presence_gates.insert(presence_name.clone());
        }

        Ok(Self {
            table: Some(table.table.clone()),
            columns_by_name,
            presence_gates,
            synthetic_presence_columns,
        })
    }

    fn table_label(&self) -> String {
        self.table
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

/// Map a column to the stored column holding its value.
pub fn resolve_storage_column(
    column: &DbColumnName,
    metadata: &TableStorageMetadata,
    policy: PresenceGatePolicy,
    context: &str,
) -> Result<DbColumnName> {
    let model = metadata.columns_by_name.get(column).ok_or_else(|| {
        RelSchemaError::invariant(format!(
            "{}: column '{}' does not exist on table '{}'.",
            context,
            column,
            metadata.table_label()
        ))
    })?;

    let rejected = match policy {
        PresenceGatePolicy::RejectSyntheticScalarPresence => {
            metadata.synthetic_presence_columns.contains(column)
        }
        PresenceGatePolicy::RejectAllPresenceGates => metadata.presence_gates.contains(column),
    };
    if rejected {
        return Err(RelSchemaError::invariant(format!(
            "{}: column '{}' on table '{}' is a presence gate and has no storage value.",
            context,
            column,
            metadata.table_label()
        )));
    }

    match &model.storage {
        ColumnStorage::Stored => Ok(column.clone()),
        ColumnStorage::UnifiedAlias {
            canonical_column, ..
        } => match metadata.columns_by_name.get(canonical_column) {
            Some(canonical) if canonical.is_stored() => Ok(canonical_column.clone()),
            _ => Err(RelSchemaError::invariant(format!(
                "{}: alias '{}' on table '{}' does not resolve to a stored canonical column.",
                context,
                column,
                metadata.table_label()
            ))),
        },
    }
}

/// Resolve several columns, keeping first-seen order and dropping duplicates.
pub fn resolve_storage_columns(
    columns: &[DbColumnName],
    metadata: &TableStorageMetadata,
    policy: PresenceGatePolicy,
    context: &str,
) -> Result<Vec<DbColumnName>> {
    let mut resolved = Vec::with_capacity(columns.len());
    for column in columns {
        let storage = resolve_storage_column(column, metadata, policy, context)?;
        if !resolved.contains(&storage) {
            resolved.push(storage);
        }
    }
    Ok(resolved)
}

/// Cached metadata for `table`, built on the spot when the cache has no entry.
pub fn metadata_for<'a>(
    cache: &'a BTreeMap<DbTableName, TableStorageMetadata>,
    table: &DbTableModel,
) -> Result<Cow<'a, TableStorageMetadata>> {
    match cache.get(&table.table) {
        Some(metadata) => Ok(Cow::Borrowed(metadata)),
        None => TableStorageMetadata::build(table).map(Cow::Owned),
    }
}

/// Validates every alias and fills the context's storage metadata cache.
pub struct UnifiedAliasValidationPass;

impl SetPass for UnifiedAliasValidationPass {
    fn name(&self) -> &'static str {
        "UnifiedAliasValidation"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        ctx.storage_metadata = build_storage_metadata(ctx)?;
        Ok(())
    }
}

/// Metadata for every relational table, keyed by table name.
pub fn build_storage_metadata(
    ctx: &RelationalModelSetBuilderContext,
) -> Result<BTreeMap<DbTableName, TableStorageMetadata>> {
    let mut cache = BTreeMap::new();
    for entry in ctx.relational_resources() {
        for table in &entry.model.tables_in_dependency_order {
            cache.insert(table.table.clone(), TableStorageMetadata::build(table)?);
        }
    }
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DbSchemaName, RelationalScalarType, ScalarKind, TableKey};

    fn column(name: &str, kind: ColumnKind, scalar: ScalarKind, nullable: bool) -> DbColumnModel {
        DbColumnModel {
            column_name: DbColumnName::from(name),
            kind,
            scalar_type: Some(RelationalScalarType::of(scalar)),
            is_nullable: nullable,
            source_json_path: None,
            target_resource: None,
            storage: ColumnStorage::Stored,
        }
    }

    fn alias(name: &str, canonical: &str, presence: Option<&str>) -> DbColumnModel {
        DbColumnModel {
            storage: ColumnStorage::UnifiedAlias {
                canonical_column: DbColumnName::from(canonical),
                presence_column: presence.map(DbColumnName::from),
            },
            ..column(name, ColumnKind::Scalar, ScalarKind::Int32, true)
        }
    }

    fn table(columns: Vec<DbColumnModel>) -> DbTableModel {
        DbTableModel {
            table: DbTableName::new(DbSchemaName::from("edfi"), "Section"),
            json_scope: crate::model::JsonPathExpression::root(),
            key: TableKey {
                constraint_name: "PK_Section".to_string(),
                columns: Vec::new(),
            },
            columns,
            constraints: Vec::new(),
            key_unification_classes: Vec::new(),
        }
    }

    #[test]
    fn test_alias_resolves_to_canonical() {
        let metadata = TableStorageMetadata::build(&table(vec![
            column("SchoolId_Unified", ColumnKind::Scalar, ScalarKind::Int32, false),
            column("School_DocumentId", ColumnKind::DocumentFk, ScalarKind::Int64, true),
            alias("School_SchoolId", "SchoolId_Unified", Some("School_DocumentId")),
        ]))
        .unwrap();

        let resolved = resolve_storage_column(
            &DbColumnName::from("School_SchoolId"),
            &metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            "test",
        )
        .unwrap();
        assert_eq!(resolved.as_str(), "SchoolId_Unified");

        // Reference anchors are gates but keep their own storage
        let anchor = resolve_storage_column(
            &DbColumnName::from("School_DocumentId"),
            &metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            "test",
        )
        .unwrap();
        assert_eq!(anchor.as_str(), "School_DocumentId");
        assert!(resolve_storage_column(
            &DbColumnName::from("School_DocumentId"),
            &metadata,
            PresenceGatePolicy::RejectAllPresenceGates,
            "test",
        )
        .is_err());
    }

    #[test]
    fn test_synthetic_presence_is_rejected() {
        let metadata = TableStorageMetadata::build(&table(vec![
            column("SchoolId_Unified", ColumnKind::Scalar, ScalarKind::Int32, true),
            column("SchoolId_Present", ColumnKind::Scalar, ScalarKind::Boolean, true),
            alias("SchoolId", "SchoolId_Unified", Some("SchoolId_Present")),
        ]))
        .unwrap();

        let error = resolve_storage_column(
            &DbColumnName::from("SchoolId_Present"),
            &metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            "Foreign key 'FK_X'",
        )
        .unwrap_err();
        assert!(error.to_string().contains("is a presence gate"));
    }

    #[test]
    fn test_non_boolean_presence_is_invalid() {
        let error = TableStorageMetadata::build(&table(vec![
            column("SchoolId_Unified", ColumnKind::Scalar, ScalarKind::Int32, true),
            column("Flag", ColumnKind::Scalar, ScalarKind::Int32, true),
            alias("SchoolId", "SchoolId_Unified", Some("Flag")),
        ]))
        .unwrap_err();
        assert!(error.to_string().contains("must be a reference anchor"));
    }

    #[test]
    fn test_missing_canonical_is_invalid() {
        let error =
            TableStorageMetadata::build(&table(vec![alias("SchoolId", "Nope", None)])).unwrap_err();
        assert!(error.to_string().contains("missing canonical column 'Nope'"));
    }

    #[test]
    fn test_missing_column_resolution_fails() {
        let metadata = TableStorageMetadata::build(&table(Vec::new())).unwrap();
        let error = resolve_storage_column(
            &DbColumnName::from("Ghost"),
            &metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            "Index",
        )
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invariant violation: Index: column 'Ghost' does not exist on table 'edfi.Section'."
        );
    }

    #[test]
    fn test_metadata_for_borrows_cached_entry() {
        let section = table(vec![column("SchoolId", ColumnKind::Scalar, ScalarKind::Int32, false)]);
        let mut cache = BTreeMap::new();

        let built = metadata_for(&cache, &section).unwrap();
        assert!(matches!(built, Cow::Owned(_)));
        assert!(built.columns_by_name.contains_key(&DbColumnName::from("SchoolId")));

        cache.insert(section.table.clone(), TableStorageMetadata::build(&section).unwrap());
        let cached = metadata_for(&cache, &section).unwrap();
        assert!(matches!(cached, Cow::Borrowed(_)));
    }
}
