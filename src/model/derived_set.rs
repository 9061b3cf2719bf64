//! Set-level derived artifacts and the final derived model set

use serde::Serialize;

use super::elements::{DbTableModel, RelationalResourceModel, RelationalScalarType};
use super::identifiers::{
    DbColumnName, DbIndexName, DbSchemaName, DbTableName, DbTriggerName, QualifiedResourceName,
};
use super::json_path::JsonPathExpression;
use crate::naming::SqlDialect;

/// A project schema and its physical database schema
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSchemaInfo {
    pub project_name: String,
    pub project_endpoint_name: String,
    pub physical_schema: DbSchemaName,
}

/// Stable small-integer key for every resource (abstract and concrete)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKeyEntry {
    pub resource_key_id: u16,
    pub resource: QualifiedResourceName,
    pub is_abstract: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcreteResourceModel {
    pub resource_key: ResourceKeyEntry,
    pub model: RelationalResourceModel,
}

/// Identity table of an abstract resource: DocumentId, identity columns, Discriminator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractIdentityTableInfo {
    pub abstract_resource_key: ResourceKeyEntry,
    pub table: DbTableModel,
    /// Identity columns in declared identity path order
    pub identity_columns: Vec<DbColumnName>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractUnionViewOutputColumn {
    pub column_name: DbColumnName,
    pub scalar_type: RelationalScalarType,
    pub source_json_path: Option<JsonPathExpression>,
    pub target_resource: Option<QualifiedResourceName>,
}

/// One projected value in a union view arm
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AbstractUnionViewProjectionExpression {
    /// Root-table column, cast to `cast_to` when the member stores a different type
    #[serde(rename_all = "camelCase")]
    SourceColumn {
        column_name: DbColumnName,
        cast_to: Option<RelationalScalarType>,
    },
    #[serde(rename_all = "camelCase")]
    StringLiteral { value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractUnionViewArm {
    pub concrete_member_resource_key: ResourceKeyEntry,
    pub from_table: DbTableName,
    pub projection_expressions: Vec<AbstractUnionViewProjectionExpression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractUnionViewInfo {
    pub abstract_resource_key: ResourceKeyEntry,
    pub view_name: DbTableName,
    pub output_columns_in_select_order: Vec<AbstractUnionViewOutputColumn>,
    pub union_arms_in_order: Vec<AbstractUnionViewArm>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DbIndexKind {
    PrimaryKey,
    UniqueConstraint,
    ForeignKeySupport,
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbIndexInfo {
    pub name: DbIndexName,
    pub table: DbTableName,
    pub key_columns: Vec<DbColumnName>,
    pub is_unique: bool,
    pub kind: DbIndexKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerColumnMapping {
    pub source_column: DbColumnName,
    pub target_column: DbColumnName,
}

/// Referrer table updated by an identity propagation trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationReferrerTarget {
    pub referrer_table: DbTableName,
    pub referrer_document_id_column: DbColumnName,
    pub identity_column_pairs: Vec<TriggerColumnMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DbTriggerKind {
    DocumentStamping,
    #[serde(rename_all = "camelCase")]
    ReferentialIdentityMaintenance { resource_key_id: u16 },
    #[serde(rename_all = "camelCase")]
    AbstractIdentityMaintenance {
        target_table: DbTableName,
        target_column_mappings: Vec<TriggerColumnMapping>,
        discriminator_value: String,
    },
    #[serde(rename_all = "camelCase")]
    IdentityPropagationFallback {
        referrer_updates: Vec<PropagationReferrerTarget>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTriggerInfo {
    pub name: DbTriggerName,
    pub table: DbTableName,
    pub key_columns: Vec<DbColumnName>,
    pub identity_projection_columns: Vec<DbColumnName>,
    pub kind: DbTriggerKind,
}

/// The complete derivation result, consumed by DDL emitters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedRelationalModelSet {
    pub dialect: SqlDialect,
    pub project_schemas_in_endpoint_order: Vec<ProjectSchemaInfo>,
    pub resource_keys_in_id_order: Vec<ResourceKeyEntry>,
    pub concrete_resources_in_name_order: Vec<ConcreteResourceModel>,
    pub abstract_identity_tables_in_name_order: Vec<AbstractIdentityTableInfo>,
    pub abstract_union_views_in_name_order: Vec<AbstractUnionViewInfo>,
    pub indexes_in_create_order: Vec<DbIndexInfo>,
    pub triggers_in_create_order: Vec<DbTriggerInfo>,
}

impl DerivedRelationalModelSet {
    pub fn resource(&self, resource_name: &str) -> Option<&RelationalResourceModel> {
        self.concrete_resources_in_name_order
            .iter()
            .map(|entry| &entry.model)
            .find(|model| model.resource.resource_name == resource_name)
    }

    pub fn abstract_identity_table(&self, resource_name: &str) -> Option<&AbstractIdentityTableInfo> {
        self.abstract_identity_tables_in_name_order
            .iter()
            .find(|info| info.abstract_resource_key.resource.resource_name == resource_name)
    }

    pub fn abstract_union_view(&self, resource_name: &str) -> Option<&AbstractUnionViewInfo> {
        self.abstract_union_views_in_name_order
            .iter()
            .find(|info| info.abstract_resource_key.resource.resource_name == resource_name)
    }

    pub fn indexes_for(&self, table: &DbTableName) -> Vec<&DbIndexInfo> {
        self.indexes_in_create_order
            .iter()
            .filter(|index| &index.table == table)
            .collect()
    }

    pub fn triggers_for(&self, table: &DbTableName) -> Vec<&DbTriggerInfo> {
        self.triggers_in_create_order
            .iter()
            .filter(|trigger| &trigger.table == table)
            .collect()
    }
}
