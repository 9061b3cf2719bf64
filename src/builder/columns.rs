//! Base traversal: tables and columns from `jsonSchemaForInsert`
//!
//! Properties are visited in ordinal order. Nested objects flatten into their
//! enclosing table (column names concatenate the PascalCase property names);
//! arrays open a child table. Reference identity values are skipped here and
//! bound later by the reference binder.

use std::collections::BTreeSet;

use super::inputs::{NameOverrideKind, ResourceInputs};
use super::scalar_types::resolve_scalar_type;
use super::scopes::{create_child_table, TableScope};
use crate::error::{RelSchemaError, Result};
use crate::model::{
    ColumnKind, ColumnStorage, DbColumnModel, DbColumnName, DbTableModel, DescriptorEdgeSource,
    JsonPathExpression, JsonPathSegment, RelationalScalarType, ScalarKind,
};
use crate::naming::conventions::{
    collection_base_name, descriptor_id_column, singularize, to_pascal_case,
};
use crate::schema::{JsonSchemaKind, JsonSchemaNode, ObjectSchema, ScalarSchema};

const EXTENSION_PROPERTY: &str = "_ext";
const LINK_PROPERTY: &str = "link";

/// Add a column, failing when the name is already taken on the table.
pub fn push_column(table: &mut DbTableModel, column: DbColumnModel) -> Result<()> {
    if let Some(existing) = table.column(&column.column_name) {
        let describe = |c: &DbColumnModel| {
            c.source_json_path
                .as_ref()
                .map(|p| p.canonical().to_string())
                .unwrap_or_else(|| "<derived>".to_string())
        };
        return Err(RelSchemaError::IdentifierCollision {
            message: format!(
                "Column name collision on table '{}': '{}' derived from '{}' and '{}'.",
                table.table,
                column.column_name,
                describe(existing),
                describe(&column)
            ),
        });
    }
    table.columns.push(column);
    Ok(())
}

pub(crate) struct ColumnWalker<'a> {
    inputs: &'a ResourceInputs,
    pub scopes: Vec<TableScope>,
    pub descriptor_edge_sources: Vec<DescriptorEdgeSource>,
    pub extension_sites: Vec<JsonPathExpression>,
    pub used_descriptor_paths: BTreeSet<JsonPathExpression>,
    reference_identity_paths: BTreeSet<JsonPathExpression>,
    reference_object_paths: BTreeSet<JsonPathExpression>,
}

impl<'a> ColumnWalker<'a> {
    pub fn new(inputs: &'a ResourceInputs, root: TableScope) -> Self {
        let reference_identity_paths = inputs
            .reference_mappings
            .iter()
            .flat_map(|m| m.reference_json_paths.iter())
            .map(|p| p.reference_json_path.clone())
            .collect();
        let reference_object_paths = inputs
            .reference_mappings
            .iter()
            .map(|m| m.reference_object_path.clone())
            .collect();

        Self {
            inputs,
            scopes: vec![root],
            descriptor_edge_sources: Vec::new(),
            extension_sites: Vec::new(),
            used_descriptor_paths: BTreeSet::new(),
            reference_identity_paths,
            reference_object_paths,
        }
    }

    /// Walk the insert schema from the document root.
    pub fn walk_root(&mut self, schema: &JsonSchemaNode) -> Result<()> {
        let root = schema.as_object().ok_or_else(|| {
            RelSchemaError::schema_input(format!(
                "Json schema root must be an object for resource '{}'.",
                self.inputs.resource()
            ))
        })?;
        self.walk_object(root, &JsonPathExpression::root(), 0, &[], false)
    }

    fn walk_object(
        &mut self,
        object: &ObjectSchema,
        path: &JsonPathExpression,
        table_index: usize,
        column_segments: &[String],
        optional_ancestor: bool,
    ) -> Result<()> {
        let in_reference_object = self.reference_object_paths.contains(path);

        for (name, node) in &object.properties {
            let child_path = path.child(JsonPathSegment::Property(name.clone()));

            if name == EXTENSION_PROPERTY {
                self.extension_sites.push(child_path);
                continue;
            }
            if in_reference_object && name == LINK_PROPERTY {
                continue;
            }

            let is_nullable = optional_ancestor || !object.required.contains(name) || node.x_nullable;
            let mut segments = column_segments.to_vec();
            segments.push(name.clone());

            match &node.kind {
                JsonSchemaKind::Object(inner) => {
                    self.walk_object(inner, &child_path, table_index, &segments, is_nullable)?
                }
                JsonSchemaKind::Array(items) => {
                    self.walk_array(name, items, &child_path, table_index)?
                }
                JsonSchemaKind::Scalar(scalar) => {
                    self.add_value_column(table_index, &child_path, &segments, scalar, is_nullable)?
                }
            }
        }

        Ok(())
    }

    fn walk_array(
        &mut self,
        property_name: &str,
        items: &JsonSchemaNode,
        array_path: &JsonPathExpression,
        parent_index: usize,
    ) -> Result<()> {
        let scope_path = array_path.child(JsonPathSegment::AnyArrayElement);
        let base_name = self
            .inputs
            .name_override(&scope_path, NameOverrideKind::Collection)
            .map(str::to_string)
            .unwrap_or_else(|| collection_base_name(property_name));

        let mut collection_names = self.scopes[parent_index].collection_base_names.clone();
        collection_names.push(base_name);

        let scope = create_child_table(
            &self.inputs.root_base_name,
            &self.scopes[parent_index],
            collection_names,
            scope_path.clone(),
        );
        self.scopes.push(scope);
        let table_index = self.scopes.len() - 1;

        match &items.kind {
            JsonSchemaKind::Object(inner) => {
                self.walk_object(inner, &scope_path, table_index, &[], false)
            }
            JsonSchemaKind::Scalar(scalar) => {
                let segments = vec![singularize(property_name)];
                self.add_value_column(table_index, &scope_path, &segments, scalar, false)
            }
            JsonSchemaKind::Array(_) => Err(RelSchemaError::schema_input(format!(
                "Arrays of arrays are not supported at {} on resource '{}'.",
                scope_path,
                self.inputs.resource()
            ))),
        }
    }

    fn column_base_name(&self, path: &JsonPathExpression, segments: &[String]) -> String {
        self.inputs
            .name_override(path, NameOverrideKind::Column)
            .map(str::to_string)
            .unwrap_or_else(|| segments.iter().map(|s| to_pascal_case(s)).collect())
    }

    fn add_value_column(
        &mut self,
        table_index: usize,
        path: &JsonPathExpression,
        segments: &[String],
        scalar: &ScalarSchema,
        is_nullable: bool,
    ) -> Result<()> {
        if self.reference_identity_paths.contains(path) {
            return Ok(());
        }

        let is_identity = self.inputs.is_identity_path(path);
        if is_identity && is_nullable {
            return Err(RelSchemaError::schema_input(format!(
                "Identity path '{}' on resource '{}' maps to a nullable column. Identity components must be non-null.",
                path,
                self.inputs.resource()
            )));
        }

        let base_name = self.column_base_name(path, segments);

        let column = if let Some(descriptor) = self.inputs.descriptor_paths.get(path) {
            let column_name = descriptor_id_column(&base_name);
            self.used_descriptor_paths.insert(path.clone());
            self.descriptor_edge_sources.push(DescriptorEdgeSource {
                is_identity_component: is_identity,
                descriptor_value_path: path.clone(),
                table: self.scopes[table_index].table.table.clone(),
                fk_column: column_name.clone(),
                descriptor_resource: descriptor.clone(),
            });
            DbColumnModel {
                column_name,
                kind: ColumnKind::DescriptorFk,
                scalar_type: Some(RelationalScalarType::of(ScalarKind::Int64)),
                is_nullable,
                source_json_path: Some(path.clone()),
                target_resource: Some(descriptor.clone()),
                storage: ColumnStorage::Stored,
            }
        } else {
            DbColumnModel {
                column_name: DbColumnName::new(base_name),
                kind: ColumnKind::Scalar,
                scalar_type: Some(resolve_scalar_type(scalar, path, &self.inputs.decimal_infos)?),
                is_nullable,
                source_json_path: Some(path.clone()),
                target_resource: None,
                storage: ColumnStorage::Stored,
            }
        };

        push_column(&mut self.scopes[table_index].table, column)
    }
}
