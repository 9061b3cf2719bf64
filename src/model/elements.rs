//! Relational model element types

use serde::Serialize;

use super::identifiers::{DbColumnName, DbSchemaName, DbTableName, QualifiedResourceName};
use super::json_path::JsonPathExpression;

/// Role a column plays in its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ColumnKind {
    Scalar,
    /// `{Reference}_DocumentId` pointing at a referenced document
    DocumentFk,
    /// `{Name}_DescriptorId` pointing at `dms.Descriptor`
    DescriptorFk,
    Ordinal,
    ParentKeyPart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ScalarKind {
    String,
    Int32,
    Int64,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
}

/// Physical scalar type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalScalarType {
    pub kind: ScalarKind,
    /// String max length; `None` for unbounded strings and non-strings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Decimal `(precision, scale)`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimal: Option<(u32, u32)>,
}

impl RelationalScalarType {
    pub fn of(kind: ScalarKind) -> Self {
        Self {
            kind,
            max_length: None,
            decimal: None,
        }
    }

    pub fn string(max_length: Option<u32>) -> Self {
        Self {
            kind: ScalarKind::String,
            max_length,
            decimal: None,
        }
    }

    pub fn decimal(precision: u32, scale: u32) -> Self {
        Self {
            kind: ScalarKind::Decimal,
            max_length: None,
            decimal: Some((precision, scale)),
        }
    }
}

impl std::fmt::Display for RelationalScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, self.max_length, self.decimal) {
            (ScalarKind::String, Some(length), _) => write!(f, "String({})", length),
            (ScalarKind::String, None, _) => write!(f, "String(max)"),
            (ScalarKind::Decimal, _, Some((precision, scale))) => {
                write!(f, "Decimal({},{})", precision, scale)
            }
            (kind, _, _) => write!(f, "{:?}", kind),
        }
    }
}

/// Where a column's value physically lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ColumnStorage {
    Stored,
    /// Value is read from `canonical_column`, gated by `presence_column` when optional
    #[serde(rename_all = "camelCase")]
    UnifiedAlias {
        canonical_column: DbColumnName,
        presence_column: Option<DbColumnName>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbColumnModel {
    pub column_name: DbColumnName,
    pub kind: ColumnKind,
    pub scalar_type: Option<RelationalScalarType>,
    pub is_nullable: bool,
    pub source_json_path: Option<JsonPathExpression>,
    pub target_resource: Option<QualifiedResourceName>,
    pub storage: ColumnStorage,
}

impl DbColumnModel {
    pub fn is_stored(&self) -> bool {
        matches!(self.storage, ColumnStorage::Stored)
    }

    /// Synthetic presence flag: nullable stored boolean with no JSON source.
    pub fn is_synthetic_presence(&self) -> bool {
        self.kind == ColumnKind::Scalar
            && self.is_stored()
            && self.is_nullable
            && self.source_json_path.is_none()
            && self.scalar_type.map(|t| t.kind) == Some(ScalarKind::Boolean)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbKeyColumn {
    pub column_name: DbColumnName,
    pub kind: ColumnKind,
}

/// Primary key of a table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableKey {
    pub constraint_name: String,
    pub columns: Vec<DbKeyColumn>,
}

impl TableKey {
    pub fn column_names(&self) -> Vec<DbColumnName> {
        self.columns.iter().map(|c| c.column_name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReferentialAction {
    NoAction,
    Cascade,
}

/// Table-level constraint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TableConstraint {
    #[serde(rename_all = "camelCase")]
    Unique {
        name: String,
        columns: Vec<DbColumnName>,
    },
    #[serde(rename_all = "camelCase")]
    ForeignKey {
        name: String,
        columns: Vec<DbColumnName>,
        target_table: DbTableName,
        target_columns: Vec<DbColumnName>,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    },
    /// Either the FK column and every dependent column are null, or none are.
    #[serde(rename_all = "camelCase")]
    AllOrNoneNullability {
        name: String,
        fk_column: DbColumnName,
        dependent_columns: Vec<DbColumnName>,
    },
    /// Presence flag is either NULL or TRUE, never FALSE.
    #[serde(rename_all = "camelCase")]
    NullOrTrue { name: String, column: DbColumnName },
}

impl TableConstraint {
    pub fn name(&self) -> &str {
        match self {
            TableConstraint::Unique { name, .. }
            | TableConstraint::ForeignKey { name, .. }
            | TableConstraint::AllOrNoneNullability { name, .. }
            | TableConstraint::NullOrTrue { name, .. } => name,
        }
    }

    pub fn set_name(&mut self, new_name: String) {
        match self {
            TableConstraint::Unique { name, .. }
            | TableConstraint::ForeignKey { name, .. }
            | TableConstraint::AllOrNoneNullability { name, .. }
            | TableConstraint::NullOrTrue { name, .. } => *name = new_name,
        }
    }

    /// Ordering group used by canonicalization.
    pub fn ordering_group(&self) -> u8 {
        match self {
            TableConstraint::Unique { .. } => 1,
            TableConstraint::ForeignKey { .. } => 2,
            TableConstraint::AllOrNoneNullability { .. } => 3,
            TableConstraint::NullOrTrue { .. } => 4,
        }
    }

    /// Every local column the constraint touches.
    pub fn local_columns(&self) -> Vec<&DbColumnName> {
        match self {
            TableConstraint::Unique { columns, .. } | TableConstraint::ForeignKey { columns, .. } => {
                columns.iter().collect()
            }
            TableConstraint::AllOrNoneNullability {
                fk_column,
                dependent_columns,
                ..
            } => std::iter::once(fk_column)
                .chain(dependent_columns.iter())
                .collect(),
            TableConstraint::NullOrTrue { column, .. } => vec![column],
        }
    }
}

/// One equality-constraint merge on a table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUnificationClass {
    pub canonical_column: DbColumnName,
    pub member_path_columns: Vec<DbColumnName>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTableModel {
    pub table: DbTableName,
    pub json_scope: JsonPathExpression,
    pub key: TableKey,
    pub columns: Vec<DbColumnModel>,
    pub constraints: Vec<TableConstraint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key_unification_classes: Vec<KeyUnificationClass>,
}

impl DbTableModel {
    pub fn column(&self, name: &DbColumnName) -> Option<&DbColumnModel> {
        self.columns.iter().find(|c| &c.column_name == name)
    }

    pub fn column_mut(&mut self, name: &DbColumnName) -> Option<&mut DbColumnModel> {
        self.columns.iter_mut().find(|c| &c.column_name == name)
    }

    pub fn has_column(&self, name: &DbColumnName) -> bool {
        self.column(name).is_some()
    }

    /// Columns bound to a JSON path, ordinal-first by column name.
    pub fn columns_by_source_path(&self, path: &JsonPathExpression) -> Vec<&DbColumnModel> {
        let mut matches = self
            .columns
            .iter()
            .filter(|c| c.source_json_path.as_ref() == Some(path))
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| a.column_name.cmp(&b.column_name));
        matches
    }

    pub fn has_unique_on(&self, columns: &[DbColumnName]) -> bool {
        self.constraints.iter().any(|constraint| {
            matches!(constraint, TableConstraint::Unique { columns: existing, .. } if existing == columns)
        })
    }

    pub fn has_constraint_named(&self, name: &str) -> bool {
        self.constraints.iter().any(|c| c.name() == name)
    }
}

/// Propagated identity part of a document reference
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceIdentityBinding {
    /// Path of the identity value inside the referencing document
    pub reference_json_path: JsonPathExpression,
    pub column: DbColumnName,
}

/// A reference from one resource to another, bound to an FK anchor column
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReferenceBinding {
    pub is_identity_component: bool,
    pub reference_object_path: JsonPathExpression,
    pub table: DbTableName,
    pub fk_column: DbColumnName,
    pub target_resource: QualifiedResourceName,
    pub identity_bindings: Vec<ReferenceIdentityBinding>,
}

/// A descriptor-valued path bound to a `_DescriptorId` column
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorEdgeSource {
    pub is_identity_component: bool,
    pub descriptor_value_path: JsonPathExpression,
    pub table: DbTableName,
    pub fk_column: DbColumnName,
    pub descriptor_resource: QualifiedResourceName,
}

/// Several descriptor bindings collapsed onto one stored column
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorForeignKeyDeduplication {
    pub table: DbTableName,
    pub storage_column: DbColumnName,
    pub binding_columns: Vec<DbColumnName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum EqualityConstraintOutcome {
    Applied,
    /// Both endpoints already bind the same column
    Redundant,
    /// Endpoints land on different tables
    IgnoredCrossTable,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EqualityConstraintDiagnostic {
    pub outcome: EqualityConstraintOutcome,
    pub source_json_path: JsonPathExpression,
    pub target_json_path: JsonPathExpression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceStorageKind {
    RelationalTables,
    SharedDescriptorTable,
}

/// Relational model of one concrete resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalResourceModel {
    pub resource: QualifiedResourceName,
    pub physical_schema: DbSchemaName,
    pub storage_kind: ResourceStorageKind,
    /// Root first, then children in discovery (parent-before-child) order
    pub tables_in_dependency_order: Vec<DbTableModel>,
    pub document_reference_bindings: Vec<DocumentReferenceBinding>,
    pub descriptor_edge_sources: Vec<DescriptorEdgeSource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub descriptor_foreign_key_deduplications: Vec<DescriptorForeignKeyDeduplication>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub equality_constraint_diagnostics: Vec<EqualityConstraintDiagnostic>,
}

impl RelationalResourceModel {
    pub fn root(&self) -> &DbTableModel {
        &self.tables_in_dependency_order[0]
    }

    pub fn root_mut(&mut self) -> &mut DbTableModel {
        &mut self.tables_in_dependency_order[0]
    }

    pub fn table(&self, name: &DbTableName) -> Option<&DbTableModel> {
        self.tables_in_dependency_order
            .iter()
            .find(|t| &t.table == name)
    }

    pub fn table_mut(&mut self, name: &DbTableName) -> Option<&mut DbTableModel> {
        self.tables_in_dependency_order
            .iter_mut()
            .find(|t| &t.table == name)
    }

    pub fn is_descriptor_storage(&self) -> bool {
        self.storage_kind == ResourceStorageKind::SharedDescriptorTable
    }

    /// Binding whose propagated identity parts include `path`.
    pub fn binding_for_identity_path(
        &self,
        path: &JsonPathExpression,
    ) -> Option<(&DocumentReferenceBinding, &ReferenceIdentityBinding)> {
        self.document_reference_bindings.iter().find_map(|binding| {
            binding
                .identity_bindings
                .iter()
                .find(|identity| &identity.reference_json_path == path)
                .map(|identity| (binding, identity))
        })
    }
}
