//! Document reference binding
//!
//! Each reference mapping becomes a `{Ref}_DocumentId` anchor column plus one
//! propagated column per identity part, placed on the table whose JSON scope
//! is the longest prefix of the reference object path.

use std::collections::{BTreeMap, BTreeSet};

use super::columns::push_column;
use super::inputs::{NameOverrideKind, ReferenceMapping, ResourceInputs};
use super::scalar_types::resolve_scalar_type;
use super::scopes::TableScope;
use crate::error::{RelSchemaError, Result};
use crate::model::{
    ColumnKind, ColumnStorage, DbColumnModel, DbColumnName, DescriptorEdgeSource,
    DocumentReferenceBinding, JsonPathExpression, JsonPathSegment, QualifiedResourceName,
    ReferenceIdentityBinding, RelationalScalarType, ScalarKind,
};
use crate::naming::conventions::{descriptor_id_column, document_fk_column, to_pascal_case};
use crate::schema::JsonSchemaNode;

/// `{RefBase}` for a mapping: a column override on the reference object, else the mapping key.
pub fn reference_base_name(inputs: &ResourceInputs, mapping: &ReferenceMapping) -> String {
    inputs
        .name_override(&mapping.reference_object_path, NameOverrideKind::Column)
        .map(str::to_string)
        .unwrap_or_else(|| to_pascal_case(&mapping.mapping_key))
}

/// Index of the scope that owns `path`: longest scope prefix, ordinal-smaller canonical on ties.
pub fn owning_scope_index(scopes: &[TableScope], path: &JsonPathExpression) -> Option<usize> {
    scopes
        .iter()
        .enumerate()
        .filter(|(_, scope)| path.starts_with(&scope.table.json_scope))
        .max_by(|(_, a), (_, b)| {
            let a_scope = &a.table.json_scope;
            let b_scope = &b.table.json_scope;
            a_scope
                .segments()
                .len()
                .cmp(&b_scope.segments().len())
                .then_with(|| b_scope.cmp(a_scope))
        })
        .map(|(index, _)| index)
}

fn identity_part_base_name(
    inputs: &ResourceInputs,
    mapping: &ReferenceMapping,
    reference_json_path: &JsonPathExpression,
) -> String {
    if let Some(name) = inputs.name_override(reference_json_path, NameOverrideKind::Column) {
        return name.to_string();
    }
    reference_json_path
        .relative_to(&mapping.reference_object_path)
        .unwrap_or_default()
        .iter()
        .filter_map(|segment| match segment {
            JsonPathSegment::Property(name) => Some(to_pascal_case(name)),
            JsonPathSegment::AnyArrayElement => None,
        })
        .collect()
}

/// Descriptor target of a propagated identity part, if it is descriptor-valued.
fn descriptor_target(
    inputs: &ResourceInputs,
    mapping: &ReferenceMapping,
    identity_json_path: &JsonPathExpression,
    reference_json_path: &JsonPathExpression,
) -> Option<QualifiedResourceName> {
    if let Some(target) = inputs.descriptor_paths.get(reference_json_path) {
        return Some(target.clone());
    }
    let last = identity_json_path.last_property()?;
    if last.ends_with("Descriptor") {
        Some(QualifiedResourceName::new(
            mapping.target_resource.project_name.clone(),
            to_pascal_case(last),
        ))
    } else {
        None
    }
}

/// Bind every reference mapping onto the table scopes.
pub fn bind_references(
    inputs: &ResourceInputs,
    schema: &JsonSchemaNode,
    scopes: &mut [TableScope],
    descriptor_edge_sources: &mut Vec<DescriptorEdgeSource>,
    used_descriptor_paths: &mut BTreeSet<JsonPathExpression>,
) -> Result<Vec<DocumentReferenceBinding>> {
    let resource = inputs.resource();
    let mut bindings = Vec::with_capacity(inputs.reference_mappings.len());
    let mut bound_paths: BTreeMap<JsonPathExpression, JsonPathExpression> = BTreeMap::new();

    for mapping in &inputs.reference_mappings {
        let table_index = owning_scope_index(scopes, &mapping.reference_object_path).ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Reference object path '{}' on resource '{}' did not map to any table scope.",
                mapping.reference_object_path, resource
            ))
        })?;

        let reference_base = reference_base_name(inputs, mapping);
        let is_nullable = !mapping.is_required;
        let table_name = scopes[table_index].table.table.clone();
        let fk_column = document_fk_column(&reference_base);

        push_column(
            &mut scopes[table_index].table,
            DbColumnModel {
                column_name: fk_column.clone(),
                kind: ColumnKind::DocumentFk,
                scalar_type: Some(RelationalScalarType::of(ScalarKind::Int64)),
                is_nullable,
                source_json_path: Some(mapping.reference_object_path.clone()),
                target_resource: Some(mapping.target_resource.clone()),
                storage: ColumnStorage::Stored,
            },
        )?;

        let mut identity_bindings = Vec::with_capacity(mapping.reference_json_paths.len());
        for path in &mapping.reference_json_paths {
            let reference_json_path = &path.reference_json_path;

            if let Some(previous) =
                bound_paths.insert(reference_json_path.clone(), mapping.reference_object_path.clone())
            {
                if previous != mapping.reference_object_path {
                    return Err(RelSchemaError::invariant(format!(
                        "Reference path '{}' on resource '{}' is bound under both '{}' and '{}'.",
                        reference_json_path, resource, previous, mapping.reference_object_path
                    )));
                }
            }

            let part_base = identity_part_base_name(inputs, mapping, reference_json_path);
            let column = match descriptor_target(
                inputs,
                mapping,
                &path.identity_json_path,
                reference_json_path,
            ) {
                Some(descriptor) => {
                    let column_name = descriptor_id_column(&format!("{}_{}", reference_base, part_base));
                    used_descriptor_paths.insert(reference_json_path.clone());
                    descriptor_edge_sources.push(DescriptorEdgeSource {
                        is_identity_component: mapping.is_part_of_identity,
                        descriptor_value_path: reference_json_path.clone(),
                        table: table_name.clone(),
                        fk_column: column_name.clone(),
                        descriptor_resource: descriptor.clone(),
                    });
                    DbColumnModel {
                        column_name,
                        kind: ColumnKind::DescriptorFk,
                        scalar_type: Some(RelationalScalarType::of(ScalarKind::Int64)),
                        is_nullable,
                        source_json_path: Some(reference_json_path.clone()),
                        target_resource: Some(descriptor),
                        storage: ColumnStorage::Stored,
                    }
                }
                None => {
                    let scalar = schema
                        .resolve(reference_json_path)
                        .and_then(JsonSchemaNode::as_scalar)
                        .ok_or_else(|| {
                            RelSchemaError::schema_input(format!(
                                "Reference identity path '{}' on resource '{}' was not found as a scalar in jsonSchemaForInsert.",
                                reference_json_path, resource
                            ))
                        })?;
                    DbColumnModel {
                        column_name: DbColumnName::new(format!("{}_{}", reference_base, part_base)),
                        kind: ColumnKind::Scalar,
                        scalar_type: Some(resolve_scalar_type(
                            scalar,
                            reference_json_path,
                            &inputs.decimal_infos,
                        )?),
                        is_nullable,
                        source_json_path: Some(reference_json_path.clone()),
                        target_resource: None,
                        storage: ColumnStorage::Stored,
                    }
                }
            };

            identity_bindings.push(ReferenceIdentityBinding {
                reference_json_path: reference_json_path.clone(),
                column: column.column_name.clone(),
            });
            push_column(&mut scopes[table_index].table, column)?;
        }

        bindings.push(DocumentReferenceBinding {
            is_identity_component: mapping.is_part_of_identity,
            reference_object_path: mapping.reference_object_path.clone(),
            table: table_name,
            fk_column,
            target_resource: mapping.target_resource.clone(),
            identity_bindings,
        });
    }

    Ok(bindings)
}
