//! Reference constraints
//!
//! Each bound document reference gets a composite foreign key from its anchor
//! column plus propagated identity columns to the target's `DocumentId` plus
//! identity columns. Optional references also get an all-or-none check.
//! Concrete targets receive a shared `UX_{T}_RefKey`, and every root table
//! receives its natural-key unique constraint.

use std::collections::BTreeMap;

use tracing::debug;

use super::unified_alias::{
    metadata_for, resolve_storage_column, resolve_storage_columns, PresenceGatePolicy,
    TableStorageMetadata,
};
use super::SetPass;
use crate::builder::{ConcreteResourceEntry, ReferenceMapping, RelationalModelSetBuilderContext};
use crate::error::{RelSchemaError, Result};
use crate::model::{
    DbColumnName, DbTableName, DocumentReferenceBinding, JsonPathExpression,
    QualifiedResourceName, ReferentialAction, TableConstraint,
};
use crate::naming::constraint_naming::{
    all_or_none_name, constraint_signature, natural_key_unique_name, reference_foreign_key_name,
    reference_key_unique_name,
};
use crate::naming::conventions::{document_id_column, DOCUMENT_ID_SUFFIX};
use crate::naming::SqlDialect;

pub struct ReferenceConstraintPass;

/// Identity surface of a reference target
struct TargetIdentity {
    resource: QualifiedResourceName,
    table: DbTableName,
    is_abstract: bool,
    allow_identity_updates: bool,
    identity_paths: Vec<JsonPathExpression>,
    identity_columns: Vec<DbColumnName>,
    metadata: TableStorageMetadata,
}

/// Constraint to attach once every resource has been read
struct PendingConstraint {
    resource: QualifiedResourceName,
    table: DbTableName,
    constraint: TableConstraint,
}

impl SetPass for ReferenceConstraintPass {
    fn name(&self) -> &'static str {
        "ReferenceConstraint"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        let mut targets: BTreeMap<QualifiedResourceName, TargetIdentity> = BTreeMap::new();
        let mut pending = Vec::new();

        for entry in ctx.relational_resources() {
            pending.extend(natural_key_constraint(ctx, entry)?);

            for mapping in &entry.inputs.reference_mappings {
                if !targets.contains_key(&mapping.target_resource) {
                    let target = target_identity(ctx, &mapping.target_resource)?;
                    targets.insert(mapping.target_resource.clone(), target);
                }
                let target = &targets[&mapping.target_resource];
                pending.extend(reference_constraints(ctx, entry, mapping, target)?);
            }
        }

        for item in pending {
            let index = ctx.concrete_index(&item.resource).ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "Concrete resource '{}' was not found for constraint derivation.",
                    item.resource
                ))
            })?;
            let table = ctx.concrete_resources[index]
                .model
                .table_mut(&item.table)
                .ok_or_else(|| {
                    RelSchemaError::invariant(format!(
                        "Table '{}' was not found on resource '{}'.",
                        item.table, item.resource
                    ))
                })?;

            let signature = constraint_signature(&table.table, &item.constraint);
            let exists = table
                .constraints
                .iter()
                .any(|existing| constraint_signature(&table.table, existing) == signature);
            let covered = matches!(&item.constraint, TableConstraint::Unique { columns, .. } if table.has_unique_on(columns));
            if !exists && !covered {
                debug!(table = %table.table, constraint = item.constraint.name(), "added reference constraint");
                table.constraints.push(item.constraint);
            }
        }

        Ok(())
    }
}

/// `UX_{Root}_NK` over the stored identity columns of a resource.
fn natural_key_constraint(
    ctx: &RelationalModelSetBuilderContext,
    entry: &ConcreteResourceEntry,
) -> Result<Option<PendingConstraint>> {
    let resource = &entry.model.resource;
    let root = entry.model.root();
    let columns = identity_columns(entry)?;
    if columns.is_empty() {
        return Ok(None);
    }

    let metadata = metadata_for(&ctx.storage_metadata, root)?;
    let stored = resolve_storage_columns(
        &columns,
        &metadata,
        PresenceGatePolicy::RejectSyntheticScalarPresence,
        &format!("Natural key of resource '{}'", resource),
    )?;

    Ok(Some(PendingConstraint {
        resource: resource.clone(),
        table: root.table.clone(),
        constraint: TableConstraint::Unique {
            name: natural_key_unique_name(&root.table),
            columns: stored,
        },
    }))
}

/// Root columns bound to each identity path, in identity path order.
pub fn identity_columns(entry: &ConcreteResourceEntry) -> Result<Vec<DbColumnName>> {
    let resource = &entry.model.resource;
    let root = entry.model.root();

    entry
        .inputs
        .schema
        .identity_json_paths
        .iter()
        .map(|path| {
            if path.has_wildcard() {
                return Err(RelSchemaError::invariant(format!(
                    "Identity path '{}' on resource '{}' must not include array segments when deriving reference constraints.",
                    path, resource
                )));
            }
            root.columns_by_source_path(path)
                .first()
                .map(|column| column.column_name.clone())
                .ok_or_else(|| {
                    RelSchemaError::invariant(format!(
                        "Identity path '{}' on resource '{}' did not map to a root table column.",
                        path, resource
                    ))
                })
        })
        .collect()
}

fn target_identity(
    ctx: &RelationalModelSetBuilderContext,
    resource: &QualifiedResourceName,
) -> Result<TargetIdentity> {
    if let Some(info) = ctx.abstract_identity_table(resource) {
        let identity_paths = info
            .table
            .columns
            .iter()
            .filter_map(|column| column.source_json_path.clone())
            .collect();
        return Ok(TargetIdentity {
            resource: resource.clone(),
            table: info.table.table.clone(),
            is_abstract: true,
            allow_identity_updates: false,
            identity_paths,
            identity_columns: info.identity_columns.clone(),
            metadata: TableStorageMetadata::build(&info.table)?,
        });
    }

    let entry = ctx
        .concrete(resource)
        .filter(|entry| !entry.model.is_descriptor_storage())
        .ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Reference target resource '{}' was not found for constraint derivation.",
                resource
            ))
        })?;

    Ok(TargetIdentity {
        resource: resource.clone(),
        table: entry.model.root().table.clone(),
        is_abstract: false,
        allow_identity_updates: entry.inputs.schema.allow_identity_updates,
        identity_paths: entry.inputs.schema.identity_json_paths.clone(),
        identity_columns: identity_columns(entry)?,
        metadata: metadata_for(&ctx.storage_metadata, entry.model.root())?.into_owned(),
    })
}

fn mapping_context(mapping: &ReferenceMapping, resource: &QualifiedResourceName) -> String {
    format!(
        "Reference mapping '{}' on resource '{}'",
        mapping.mapping_key, resource
    )
}

/// `{RefBase}` recovered from the `{RefBase}_DocumentId` anchor column.
fn reference_base(
    binding: &DocumentReferenceBinding,
    mapping: &ReferenceMapping,
    resource: &QualifiedResourceName,
) -> Result<String> {
    binding
        .fk_column
        .as_str()
        .strip_suffix(DOCUMENT_ID_SUFFIX)
        .map(str::to_string)
        .ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "{} expected FK column '{}' to end with '{}'.",
                mapping_context(mapping, resource),
                binding.fk_column,
                DOCUMENT_ID_SUFFIX
            ))
        })
}

fn format_path_count(path: &str, expected: usize, found: usize) -> String {
    format!("'{}' (expected {}, found {})", path, expected, found)
}

/// Mapping paths and captured identity bindings must agree one to one.
pub fn check_binding_alignment(
    mapping: &ReferenceMapping,
    binding: &DocumentReferenceBinding,
    resource: &QualifiedResourceName,
) -> Result<()> {
    let mut expected: BTreeMap<&str, usize> = BTreeMap::new();
    for path in &mapping.reference_json_paths {
        *expected.entry(path.reference_json_path.canonical()).or_default() += 1;
    }
    let mut found: BTreeMap<&str, usize> = BTreeMap::new();
    for identity in &binding.identity_bindings {
        *found.entry(identity.reference_json_path.canonical()).or_default() += 1;
    }

    let mut missing = Vec::new();
    let mut extra = Vec::new();
    for (path, &count) in &expected {
        let actual = found.get(path).copied().unwrap_or(0);
        if actual < count {
            missing.push(format_path_count(path, count, actual));
        } else if actual > count {
            extra.push(format_path_count(path, count, actual));
        }
    }
    for (path, &count) in &found {
        if !expected.contains_key(path) {
            extra.push(format_path_count(path, 0, count));
        }
    }

    if missing.is_empty() && extra.is_empty() {
        return Ok(());
    }

    missing.sort();
    extra.sort();
    let mut details = Vec::new();
    if !missing.is_empty() {
        details.push(format!("missing bindings for {}", missing.join(", ")));
    }
    if !extra.is_empty() {
        details.push(format!("extra bindings for {}", extra.join(", ")));
    }
    Err(RelSchemaError::constraint(format!(
        "{} did not align referenceJsonPaths with identity bindings: {}.",
        mapping_context(mapping, resource),
        details.join("; ")
    )))
}

/// Local and target identity columns paired in the target's identity path order.
fn paired_identity_columns(
    mapping: &ReferenceMapping,
    binding: &DocumentReferenceBinding,
    target: &TargetIdentity,
    resource: &QualifiedResourceName,
) -> Result<(Vec<DbColumnName>, Vec<DbColumnName>)> {
    let mut local_by_identity_path: BTreeMap<&JsonPathExpression, &DbColumnName> = BTreeMap::new();
    for path in &mapping.reference_json_paths {
        let identity = binding
            .identity_bindings
            .iter()
            .find(|identity| identity.reference_json_path == path.reference_json_path)
            .ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "{} did not resolve identity column for path '{}' under reference path '{}'.",
                    mapping_context(mapping, resource),
                    path.identity_json_path,
                    path.reference_json_path
                ))
            })?;
        local_by_identity_path.insert(&path.identity_json_path, &identity.column);
    }

    let mut local = Vec::with_capacity(target.identity_paths.len());
    let mut remote = Vec::with_capacity(target.identity_paths.len());
    let mut missing = Vec::new();

    for (index, identity_path) in target.identity_paths.iter().enumerate() {
        let Some(column) = local_by_identity_path.get(identity_path) else {
            missing.push(format!("'{}'", identity_path));
            continue;
        };
        let target_column = target.identity_columns.get(index).ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "{} did not resolve identity path '{}' on target '{}'.",
                mapping_context(mapping, resource),
                identity_path,
                target.resource
            ))
        })?;
        local.push((*column).clone());
        remote.push(target_column.clone());
    }

    if !missing.is_empty() {
        return Err(RelSchemaError::constraint(format!(
            "{} did not include identity path(s) {} required by target '{}'.",
            mapping_context(mapping, resource),
            missing.join(", "),
            target.resource
        )));
    }

    Ok((local, remote))
}

/// Resolve both sides to storage, dropping repeated pairs and rejecting a
/// local column that would map to two different target columns.
fn map_pairs_to_storage(
    local: &[DbColumnName],
    remote: &[DbColumnName],
    local_metadata: &TableStorageMetadata,
    target: &TargetIdentity,
    context: &str,
) -> Result<(Vec<DbColumnName>, Vec<DbColumnName>)> {
    let mut target_by_local: BTreeMap<DbColumnName, DbColumnName> = BTreeMap::new();
    let mut local_storage = Vec::with_capacity(local.len());
    let mut target_storage = Vec::with_capacity(remote.len());

    for (local_column, target_column) in local.iter().zip(remote) {
        let local_stored = resolve_storage_column(
            local_column,
            local_metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            context,
        )?;
        let target_stored = resolve_storage_column(
            target_column,
            &target.metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            context,
        )?;

        match target_by_local.get(&local_stored) {
            Some(existing) if existing != &target_stored => {
                return Err(RelSchemaError::invariant(format!(
                    "{} mapped storage column '{}' to multiple target storage columns ('{}', '{}').",
                    context, local_stored, existing, target_stored
                )))
            }
            Some(_) => continue,
            None => {
                target_by_local.insert(local_stored.clone(), target_stored.clone());
                local_storage.push(local_stored);
                target_storage.push(target_stored);
            }
        }
    }

    Ok((local_storage, target_storage))
}

/// `ON UPDATE` of a reference FK. SQL Server rejects multiple cascade paths.
pub fn on_update_action(dialect: SqlDialect, target_is_abstract: bool, allow_identity_updates: bool) -> ReferentialAction {
    match dialect {
        SqlDialect::Mssql => ReferentialAction::NoAction,
        SqlDialect::Pgsql if target_is_abstract || allow_identity_updates => ReferentialAction::Cascade,
        SqlDialect::Pgsql => ReferentialAction::NoAction,
    }
}

fn reference_constraints(
    ctx: &RelationalModelSetBuilderContext,
    entry: &ConcreteResourceEntry,
    mapping: &ReferenceMapping,
    target: &TargetIdentity,
) -> Result<Vec<PendingConstraint>> {
    let resource = &entry.model.resource;
    let context = mapping_context(mapping, resource);

    let binding = entry
        .model
        .document_reference_bindings
        .iter()
        .find(|binding| binding.reference_object_path == mapping.reference_object_path)
        .ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Reference object path '{}' on resource '{}' was not bound to a table.",
                mapping.reference_object_path, resource
            ))
        })?;
    let table = entry.model.table(&binding.table).ok_or_else(|| {
        RelSchemaError::invariant(format!(
            "Reference object path '{}' on resource '{}' did not map to table '{}'.",
            binding.reference_object_path, resource, binding.table
        ))
    })?;

    check_binding_alignment(mapping, binding, resource)?;
    let base = reference_base(binding, mapping, resource)?;
    let (local, remote) = paired_identity_columns(mapping, binding, target, resource)?;

    let mut constraints = Vec::new();

    let anchor_is_nullable = table
        .column(&binding.fk_column)
        .is_some_and(|column| column.is_nullable);
    if anchor_is_nullable && !local.is_empty() {
        constraints.push(PendingConstraint {
            resource: resource.clone(),
            table: table.table.clone(),
            constraint: TableConstraint::AllOrNoneNullability {
                name: all_or_none_name(&table.table, &base),
                fk_column: binding.fk_column.clone(),
                dependent_columns: local.clone(),
            },
        });
    }

    let local_metadata = metadata_for(&ctx.storage_metadata, table)?;
    let (local_stored, target_stored) =
        map_pairs_to_storage(&local, &remote, &local_metadata, target, &context)?;

    let anchor = resolve_storage_column(
        &binding.fk_column,
        &local_metadata,
        PresenceGatePolicy::RejectSyntheticScalarPresence,
        &context,
    )?;
    let target_document_id = resolve_storage_column(
        &document_id_column(),
        &target.metadata,
        PresenceGatePolicy::RejectSyntheticScalarPresence,
        &context,
    )?;

    let mut columns = vec![anchor];
    columns.extend(local_stored);
    let mut target_columns = vec![target_document_id.clone()];
    target_columns.extend(target_stored.iter().cloned());

    constraints.push(PendingConstraint {
        resource: resource.clone(),
        table: table.table.clone(),
        constraint: TableConstraint::ForeignKey {
            name: reference_foreign_key_name(&table.table, &base, columns.len() > 1),
            columns,
            target_table: target.table.clone(),
            target_columns,
            on_delete: ReferentialAction::NoAction,
            on_update: on_update_action(ctx.dialect, target.is_abstract, target.allow_identity_updates),
        },
    });

    // Abstract identity tables already carry their RefKey.
    if !target.is_abstract && !target_stored.is_empty() {
        let mut unique_columns = vec![target_document_id];
        unique_columns.extend(target_stored);
        constraints.push(PendingConstraint {
            resource: target.resource.clone(),
            table: target.table.clone(),
            constraint: TableConstraint::Unique {
                name: reference_key_unique_name(&target.table),
                columns: unique_columns,
            },
        });
    }

    Ok(constraints)
}
