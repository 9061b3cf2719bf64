//! Table scopes and primary keys
//!
//! One table per JSON scope: the root table for `$` and one child table per
//! array scope. Child tables carry the root document id, every ancestor
//! collection ordinal and their own ordinal as the key.

use crate::model::{
    ColumnKind, ColumnStorage, DbColumnModel, DbKeyColumn, DbSchemaName, DbTableModel,
    DbTableName, JsonPathExpression, ReferentialAction, RelationalScalarType, ScalarKind,
    TableConstraint, TableKey,
};
use crate::naming::constraint_naming::{foreign_key_name, primary_key_name, DOCUMENT_TOKEN};
use crate::naming::conventions::{
    document_id_column, is_document_id_column, ordinal_column, parent_collection_ordinal_column,
    root_document_id_column, DESCRIPTOR_TABLE, DMS_SCHEMA, DOCUMENT_TABLE,
};

/// A table under construction plus the collection names that lead to it
#[derive(Debug, Clone)]
pub struct TableScope {
    pub table: DbTableModel,
    pub collection_base_names: Vec<String>,
}

pub fn document_table() -> DbTableName {
    DbTableName::new(DbSchemaName::from(DMS_SCHEMA), DOCUMENT_TABLE)
}

pub fn descriptor_table() -> DbTableName {
    DbTableName::new(DbSchemaName::from(DMS_SCHEMA), DESCRIPTOR_TABLE)
}

fn document_cascade_fk(table: &DbTableName) -> TableConstraint {
    TableConstraint::ForeignKey {
        name: foreign_key_name(table, &[DOCUMENT_TOKEN]),
        columns: vec![document_id_column()],
        target_table: document_table(),
        target_columns: vec![document_id_column()],
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::NoAction,
    }
}

fn root_key(table: &DbTableName) -> TableKey {
    TableKey {
        constraint_name: primary_key_name(table),
        columns: vec![DbKeyColumn {
            column_name: document_id_column(),
            kind: ColumnKind::ParentKeyPart,
        }],
    }
}

/// Non-null, stored columns for every key column.
pub fn key_column_models(key: &TableKey) -> Vec<DbColumnModel> {
    key.columns
        .iter()
        .map(|key_column| {
            let kind = match key_column.kind {
                ColumnKind::ParentKeyPart if is_document_id_column(&key_column.column_name) => {
                    ScalarKind::Int64
                }
                ColumnKind::DocumentFk => ScalarKind::Int64,
                _ => ScalarKind::Int32,
            };
            DbColumnModel {
                column_name: key_column.column_name.clone(),
                kind: key_column.kind,
                scalar_type: Some(RelationalScalarType::of(kind)),
                is_nullable: false,
                source_json_path: None,
                target_resource: None,
                storage: ColumnStorage::Stored,
            }
        })
        .collect()
}

/// Root table `{schema}.{RootBase}` keyed by `DocumentId`.
pub fn create_root_table(schema: &DbSchemaName, root_base_name: &str) -> TableScope {
    let table = DbTableName::new(schema.clone(), root_base_name);
    let key = root_key(&table);
    TableScope {
        table: DbTableModel {
            columns: key_column_models(&key),
            constraints: vec![document_cascade_fk(&table)],
            json_scope: JsonPathExpression::root(),
            key,
            table,
            key_unification_classes: Vec::new(),
        },
        collection_base_names: Vec::new(),
    }
}

/// Shared `dms.Descriptor` table used by every descriptor resource.
pub fn create_descriptor_root_table() -> DbTableModel {
    let table = descriptor_table();
    let key = root_key(&table);
    DbTableModel {
        columns: key_column_models(&key),
        constraints: vec![document_cascade_fk(&table)],
        json_scope: JsonPathExpression::root(),
        key,
        table,
        key_unification_classes: Vec::new(),
    }
}

/// Child table for an array scope under `parent`.
pub fn create_child_table(
    root_base_name: &str,
    parent: &TableScope,
    collection_base_names: Vec<String>,
    json_scope: JsonPathExpression,
) -> TableScope {
    let table_name = format!("{}{}", root_base_name, collection_base_names.concat());
    let table = parent.table.table.with_name(table_name);

    let mut key_columns = vec![DbKeyColumn {
        column_name: root_document_id_column(root_base_name),
        kind: ColumnKind::ParentKeyPart,
    }];
    for ancestor in &collection_base_names[..collection_base_names.len().saturating_sub(1)] {
        key_columns.push(DbKeyColumn {
            column_name: parent_collection_ordinal_column(ancestor),
            kind: ColumnKind::ParentKeyPart,
        });
    }
    key_columns.push(DbKeyColumn {
        column_name: ordinal_column(),
        kind: ColumnKind::Ordinal,
    });

    let key = TableKey {
        constraint_name: primary_key_name(&table),
        columns: key_columns,
    };

    // Parent-referencing columns are this table's key minus its own ordinal.
    let mut parent_columns = vec![root_document_id_column(root_base_name)];
    parent_columns.extend(
        parent
            .collection_base_names
            .iter()
            .map(|name| parent_collection_ordinal_column(name)),
    );

    let parent_fk = TableConstraint::ForeignKey {
        name: foreign_key_name(&table, &[parent.table.table.name.as_str()]),
        columns: parent_columns,
        target_table: parent.table.table.clone(),
        target_columns: parent.table.key.column_names(),
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::NoAction,
    };

    TableScope {
        table: DbTableModel {
            columns: key_column_models(&key),
            constraints: vec![parent_fk],
            json_scope,
            key,
            table,
            key_unification_classes: Vec::new(),
        },
        collection_base_names,
    }
}
