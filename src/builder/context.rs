//! Shared set-level builder context
//!
//! Single owner of everything the passes read and write: concrete resource
//! models in name order, abstract identity tables and union views, the index
//! and trigger inventories and the unified-alias storage metadata cache.

use std::collections::{BTreeMap, BTreeSet};

use super::inputs::ResourceInputs;
use super::{BaseTraversalBuilder, ResourceModelBuilder};
use crate::error::{RelSchemaError, Result};
use crate::model::{
    AbstractIdentityTableInfo, AbstractUnionViewInfo, ConcreteResourceModel, DbIndexInfo,
    DbSchemaName, DbTableName, DbTriggerInfo, DerivedRelationalModelSet, JsonPathExpression,
    ProjectSchemaInfo, QualifiedResourceName, RelationalResourceModel, ResourceKeyEntry,
};
use crate::naming::conventions::{normalize_schema_name, to_pascal_case};
use crate::naming::SqlDialect;
use crate::passes::unified_alias::TableStorageMetadata;
use crate::schema::ApiSchemaDocument;

/// Abstract (superclass) resource declared by a project
#[derive(Debug, Clone)]
pub struct AbstractResourceInput {
    pub resource: QualifiedResourceName,
    pub physical_schema: DbSchemaName,
    pub base_name: String,
    pub identity_json_paths: Vec<JsonPathExpression>,
}

/// A concrete resource with its inputs and its (pass-mutated) model
#[derive(Debug, Clone)]
pub struct ConcreteResourceEntry {
    pub resource_key: ResourceKeyEntry,
    pub inputs: ResourceInputs,
    pub model: RelationalResourceModel,
    pub extension_sites: Vec<JsonPathExpression>,
}

pub struct RelationalModelSetBuilderContext {
    pub dialect: SqlDialect,
    pub project_schemas: Vec<ProjectSchemaInfo>,
    /// Name-ordered inputs awaiting base traversal
    pub pending_inputs: Vec<ResourceInputs>,
    /// Name-ordered concrete resources, populated by base traversal
    pub concrete_resources: Vec<ConcreteResourceEntry>,
    /// Ordered by resource name, then project name
    pub abstract_resources: Vec<AbstractResourceInput>,
    pub resource_keys: Vec<ResourceKeyEntry>,
    pub abstract_identity_tables: Vec<AbstractIdentityTableInfo>,
    pub abstract_union_views: Vec<AbstractUnionViewInfo>,
    pub indexes: Vec<DbIndexInfo>,
    pub triggers: Vec<DbTriggerInfo>,
    pub storage_metadata: BTreeMap<DbTableName, TableStorageMetadata>,
    pub resource_builder: Box<dyn ResourceModelBuilder>,
}

impl std::fmt::Debug for RelationalModelSetBuilderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalModelSetBuilderContext")
            .field("dialect", &self.dialect)
            .field("project_schemas", &self.project_schemas)
            .field("pending_inputs", &self.pending_inputs)
            .field("concrete_resources", &self.concrete_resources)
            .field("abstract_resources", &self.abstract_resources)
            .field("resource_keys", &self.resource_keys)
            .field("abstract_identity_tables", &self.abstract_identity_tables)
            .field("abstract_union_views", &self.abstract_union_views)
            .field("indexes", &self.indexes)
            .field("triggers", &self.triggers)
            .field("storage_metadata", &self.storage_metadata)
            .finish_non_exhaustive()
    }
}

impl RelationalModelSetBuilderContext {
    /// Build a context from loaded schema documents using the default builder.
    pub fn new(documents: &[ApiSchemaDocument], dialect: SqlDialect) -> Result<Self> {
        Self::with_builder(documents, dialect, Box::new(BaseTraversalBuilder))
    }

    pub fn with_builder(
        documents: &[ApiSchemaDocument],
        dialect: SqlDialect,
        resource_builder: Box<dyn ResourceModelBuilder>,
    ) -> Result<Self> {
        let mut project_schemas = Vec::new();
        let mut project_names = BTreeSet::new();
        let mut pending_inputs = Vec::new();
        let mut abstract_resources = Vec::new();
        let mut seen = BTreeSet::new();

        for document in documents {
            let project = &document.project;
            if !project_names.insert(project.project_name.clone()) {
                return Err(RelSchemaError::schema_input(format!(
                    "Project '{}' is defined by more than one schema document.",
                    project.project_name
                )));
            }

            let physical_schema = normalize_schema_name(&project.project_endpoint_name);
            project_schemas.push(ProjectSchemaInfo {
                project_name: project.project_name.clone(),
                project_endpoint_name: project.project_endpoint_name.clone(),
                physical_schema: physical_schema.clone(),
            });

            for resource in &project.resources {
                if resource.is_resource_extension {
                    return Err(RelSchemaError::schema_input(format!(
                        "Resource extension '{}' is not supported.",
                        resource.resource
                    )));
                }
                if !seen.insert(resource.resource.clone()) {
                    return Err(RelSchemaError::schema_input(format!(
                        "Resource '{}' is defined more than once.",
                        resource.resource
                    )));
                }
                pending_inputs.push(ResourceInputs::extract(project, resource)?);
            }

            for abstract_resource in &project.abstract_resources {
                if !seen.insert(abstract_resource.resource.clone()) {
                    return Err(RelSchemaError::schema_input(format!(
                        "Abstract resource '{}' collides with another resource of the same name.",
                        abstract_resource.resource
                    )));
                }
                abstract_resources.push(AbstractResourceInput {
                    resource: abstract_resource.resource.clone(),
                    physical_schema: physical_schema.clone(),
                    base_name: to_pascal_case(&abstract_resource.resource.resource_name),
                    identity_json_paths: abstract_resource.identity_json_paths.clone(),
                });
            }
        }

        project_schemas.sort_by(|a, b| a.project_endpoint_name.cmp(&b.project_endpoint_name));
        pending_inputs.sort_by(|a, b| a.resource().cmp(b.resource()));
        abstract_resources.sort_by(|a, b| {
            a.resource
                .resource_name
                .cmp(&b.resource.resource_name)
                .then_with(|| a.resource.project_name.cmp(&b.resource.project_name))
        });

        let abstract_names = abstract_resources
            .iter()
            .map(|a| a.resource.clone())
            .collect::<BTreeSet<_>>();
        let resource_keys = seen
            .into_iter()
            .enumerate()
            .map(|(index, resource)| {
                let resource_key_id = u16::try_from(index + 1).map_err(|_| {
                    RelSchemaError::invariant("More than 65535 resources cannot be keyed.")
                })?;
                Ok(ResourceKeyEntry {
                    resource_key_id,
                    is_abstract: abstract_names.contains(&resource),
                    resource,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dialect,
            project_schemas,
            pending_inputs,
            concrete_resources: Vec::new(),
            abstract_resources,
            resource_keys,
            abstract_identity_tables: Vec::new(),
            abstract_union_views: Vec::new(),
            indexes: Vec::new(),
            triggers: Vec::new(),
            storage_metadata: BTreeMap::new(),
            resource_builder,
        })
    }

    pub fn resource_key(&self, resource: &QualifiedResourceName) -> Result<&ResourceKeyEntry> {
        self.resource_keys
            .iter()
            .find(|entry| &entry.resource == resource)
            .ok_or_else(|| {
                RelSchemaError::invariant(format!("Resource '{}' has no resource key.", resource))
            })
    }

    pub fn concrete_index(&self, resource: &QualifiedResourceName) -> Option<usize> {
        self.concrete_resources
            .iter()
            .position(|entry| &entry.model.resource == resource)
    }

    pub fn concrete(&self, resource: &QualifiedResourceName) -> Option<&ConcreteResourceEntry> {
        self.concrete_resources
            .iter()
            .find(|entry| &entry.model.resource == resource)
    }

    pub fn abstract_resource(&self, resource: &QualifiedResourceName) -> Option<&AbstractResourceInput> {
        self.abstract_resources
            .iter()
            .find(|entry| &entry.resource == resource)
    }

    pub fn is_abstract(&self, resource: &QualifiedResourceName) -> bool {
        self.abstract_resource(resource).is_some()
    }

    pub fn abstract_identity_table(
        &self,
        resource: &QualifiedResourceName,
    ) -> Option<&AbstractIdentityTableInfo> {
        self.abstract_identity_tables
            .iter()
            .find(|info| &info.abstract_resource_key.resource == resource)
    }

    /// Concrete resources that own relational tables (descriptors excluded).
    pub fn relational_resources(&self) -> impl Iterator<Item = &ConcreteResourceEntry> {
        self.concrete_resources
            .iter()
            .filter(|entry| !entry.model.is_descriptor_storage())
    }

    /// Finish the run and hand out the derived set.
    ///
    /// Indexes and triggers are emitted per table; the final inventories are
    /// ordered by table, then name.
    pub fn into_derived_set(mut self) -> DerivedRelationalModelSet {
        self.indexes
            .sort_by(|a, b| (&a.table, a.name.as_str()).cmp(&(&b.table, b.name.as_str())));
        self.triggers
            .sort_by(|a, b| (&a.table, a.name.as_str()).cmp(&(&b.table, b.name.as_str())));

        DerivedRelationalModelSet {
            dialect: self.dialect,
            project_schemas_in_endpoint_order: self.project_schemas,
            resource_keys_in_id_order: self.resource_keys,
            concrete_resources_in_name_order: self
                .concrete_resources
                .into_iter()
                .map(|entry| ConcreteResourceModel {
                    resource_key: entry.resource_key,
                    model: entry.model,
                })
                .collect(),
            abstract_identity_tables_in_name_order: self.abstract_identity_tables,
            abstract_union_views_in_name_order: self.abstract_union_views,
            indexes_in_create_order: self.indexes,
            triggers_in_create_order: self.triggers,
        }
    }
}
