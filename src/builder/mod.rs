//! Per-resource model building and the shared set-level context
//!
//! The `ResourceModelBuilder` turns one resource's validated inputs into its
//! initial table/column skeleton. The set-level passes then operate on all
//! resources at once through `RelationalModelSetBuilderContext`.

mod columns;
mod context;
mod inputs;
mod references;
mod scalar_types;
mod scopes;

use crate::error::{RelSchemaError, Result};
use crate::model::{JsonPathExpression, RelationalResourceModel, ResourceStorageKind};

pub use columns::push_column;
pub use context::{AbstractResourceInput, ConcreteResourceEntry, RelationalModelSetBuilderContext};
pub use inputs::{NameOverride, NameOverrideKind, ReferenceMapping, ResourceInputs};
pub use references::reference_base_name;
pub use scopes::{descriptor_table, document_table, key_column_models};

/// Output of building one resource
#[derive(Debug, Clone)]
pub struct ResourceBuildOutput {
    pub model: RelationalResourceModel,
    /// `_ext` locations skipped during traversal
    pub extension_sites: Vec<JsonPathExpression>,
}

/// Builds the initial relational model of a single resource.
pub trait ResourceModelBuilder: Send + Sync {
    fn build(&self, inputs: &ResourceInputs) -> Result<ResourceBuildOutput>;
}

/// Default builder: walks `jsonSchemaForInsert`, then binds references.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseTraversalBuilder;

impl ResourceModelBuilder for BaseTraversalBuilder {
    fn build(&self, inputs: &ResourceInputs) -> Result<ResourceBuildOutput> {
        let resource = inputs.resource().clone();

        if inputs.schema.is_descriptor {
            return Ok(ResourceBuildOutput {
                model: RelationalResourceModel {
                    resource,
                    physical_schema: inputs.physical_schema.clone(),
                    storage_kind: ResourceStorageKind::SharedDescriptorTable,
                    tables_in_dependency_order: vec![scopes::create_descriptor_root_table()],
                    document_reference_bindings: Vec::new(),
                    descriptor_edge_sources: Vec::new(),
                    descriptor_foreign_key_deduplications: Vec::new(),
                    equality_constraint_diagnostics: Vec::new(),
                },
                extension_sites: Vec::new(),
            });
        }

        let schema = inputs.schema.json_schema_for_insert.as_ref().ok_or_else(|| {
            RelSchemaError::schema_input(format!(
                "resource '{}': jsonSchemaForInsert is required.",
                resource
            ))
        })?;

        let root = scopes::create_root_table(&inputs.physical_schema, &inputs.root_base_name);
        let mut walker = columns::ColumnWalker::new(inputs, root);
        walker.walk_root(schema)?;

        let document_reference_bindings = references::bind_references(
            inputs,
            schema,
            &mut walker.scopes,
            &mut walker.descriptor_edge_sources,
            &mut walker.used_descriptor_paths,
        )?;

        let unused = inputs
            .descriptor_paths
            .keys()
            .filter(|path| !walker.used_descriptor_paths.contains(*path))
            .map(|path| path.canonical().to_string())
            .collect::<Vec<_>>();
        if !unused.is_empty() {
            return Err(RelSchemaError::schema_input(format!(
                "Descriptor paths were not found in JSON schema on resource '{}': {}",
                resource,
                unused.join(", ")
            )));
        }

        Ok(ResourceBuildOutput {
            model: RelationalResourceModel {
                resource,
                physical_schema: inputs.physical_schema.clone(),
                storage_kind: ResourceStorageKind::RelationalTables,
                tables_in_dependency_order: walker.scopes.into_iter().map(|s| s.table).collect(),
                document_reference_bindings,
                descriptor_edge_sources: walker.descriptor_edge_sources,
                descriptor_foreign_key_deduplications: Vec::new(),
                equality_constraint_diagnostics: Vec::new(),
            },
            extension_sites: walker.extension_sites,
        })
    }
}
