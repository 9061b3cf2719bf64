//! Deterministic constraint, index and trigger name builders
//!
//! Every name has the shape `{PREFIX}_{Table}` or `{PREFIX}_{Table}_{tokens...}`.

use std::collections::BTreeMap;

use crate::model::{DbColumnName, DbTableName, ReferentialAction, TableConstraint};

use super::conventions::descriptor_base_name;

pub const NATURAL_KEY_TOKEN: &str = "NK";
pub const REFERENCE_KEY_TOKEN: &str = "RefKey";
pub const ALL_NONE_TOKEN: &str = "AllNone";
pub const NULL_OR_TRUE_TOKEN: &str = "NullOrTrue";
pub const DOCUMENT_TOKEN: &str = "Document";

/// Trigger purposes, rendered as the trailing name token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerToken {
    Stamp,
    ReferentialIdentity,
    AbstractIdentity,
    PropagateIdentity,
}

impl TriggerToken {
    fn as_str(self) -> &'static str {
        match self {
            TriggerToken::Stamp => "Stamp",
            TriggerToken::ReferentialIdentity => "ReferentialIdentity",
            TriggerToken::AbstractIdentity => "AbstractIdentity",
            TriggerToken::PropagateIdentity => "PropagateIdentity",
        }
    }
}

fn build_name<S: AsRef<str>>(prefix: &str, table: &DbTableName, tokens: &[S]) -> String {
    if tokens.is_empty() {
        return format!("{}_{}", prefix, table.name);
    }
    let joined = tokens
        .iter()
        .map(|token| token.as_ref())
        .collect::<Vec<_>>()
        .join("_");
    format!("{}_{}_{}", prefix, table.name, joined)
}

pub fn primary_key_name(table: &DbTableName) -> String {
    build_name::<&str>("PK", table, &[])
}

pub fn natural_key_unique_name(table: &DbTableName) -> String {
    build_name("UX", table, &[NATURAL_KEY_TOKEN])
}

pub fn reference_key_unique_name(table: &DbTableName) -> String {
    build_name("UX", table, &[REFERENCE_KEY_TOKEN])
}

/// `UX_{Table}_...` with column names grouped by their prefix before the last `_`.
///
/// `[School_DocumentId, School_SchoolId, Ordinal]` becomes
/// `UX_T_Ordinal_School_DocumentId_SchoolId`.
pub fn array_uniqueness_name(table: &DbTableName, columns: &[DbColumnName]) -> String {
    let mut suffixes_by_prefix: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for column in columns {
        let (prefix, suffix) = split_column_name(column.as_str());
        suffixes_by_prefix.entry(prefix).or_default().push(suffix);
    }

    let mut tokens = Vec::new();
    for (prefix, mut suffixes) in suffixes_by_prefix {
        suffixes.sort_unstable();
        if !prefix.is_empty() {
            tokens.push(prefix);
        }
        tokens.extend(suffixes);
    }

    build_name("UX", table, &tokens)
}

fn split_column_name(column: &str) -> (&str, &str) {
    match column.rfind('_') {
        Some(index) if index > 0 && index < column.len() - 1 => {
            (&column[..index], &column[index + 1..])
        }
        _ => ("", column),
    }
}

pub fn foreign_key_name(table: &DbTableName, tokens: &[&str]) -> String {
    build_name("FK", table, tokens)
}

pub fn reference_foreign_key_name(
    table: &DbTableName,
    reference_base_name: &str,
    is_composite: bool,
) -> String {
    if is_composite {
        build_name("FK", table, &[reference_base_name, REFERENCE_KEY_TOKEN])
    } else {
        build_name("FK", table, &[reference_base_name])
    }
}

pub fn descriptor_foreign_key_name(table: &DbTableName, descriptor_column: &DbColumnName) -> String {
    build_name("FK", table, &[descriptor_base_name(descriptor_column)])
}

pub fn all_or_none_name(table: &DbTableName, reference_base_name: &str) -> String {
    build_name("CK", table, &[reference_base_name, ALL_NONE_TOKEN])
}

pub fn null_or_true_name(table: &DbTableName, column: &DbColumnName) -> String {
    build_name("CK", table, &[column.as_str(), NULL_OR_TRUE_TOKEN])
}

pub fn foreign_key_support_index_name(table: &DbTableName, key_columns: &[DbColumnName]) -> String {
    let tokens = key_columns.iter().map(|c| c.as_str()).collect::<Vec<_>>();
    build_name("IX", table, &tokens)
}

pub fn trigger_name(table: &DbTableName, token: TriggerToken) -> String {
    build_name("TR", table, &[token.as_str()])
}

fn action_token(action: ReferentialAction) -> &'static str {
    match action {
        ReferentialAction::NoAction => "NoAction",
        ReferentialAction::Cascade => "Cascade",
    }
}

fn join_columns(columns: &[DbColumnName]) -> String {
    columns
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn primary_key_signature(table: &DbTableName, key_columns: &[DbColumnName]) -> String {
    format!("PrimaryKey|{}|{}", table, join_columns(key_columns))
}

/// Structural signature of a constraint, hashed when its name must be shortened.
pub fn constraint_signature(table: &DbTableName, constraint: &TableConstraint) -> String {
    match constraint {
        TableConstraint::Unique { columns, .. } => {
            format!("Unique|{}|{}", table, join_columns(columns))
        }
        TableConstraint::ForeignKey {
            columns,
            target_table,
            target_columns,
            on_delete,
            on_update,
            ..
        } => format!(
            "ForeignKey|{}|{}|{}|{}|{}|{}",
            table,
            join_columns(columns),
            target_table,
            join_columns(target_columns),
            action_token(*on_delete),
            action_token(*on_update)
        ),
        TableConstraint::AllOrNoneNullability {
            fk_column,
            dependent_columns,
            ..
        } => format!(
            "AllOrNone|{}|{}|{}",
            table,
            fk_column,
            join_columns(dependent_columns)
        ),
        TableConstraint::NullOrTrue { column, .. } => {
            format!("NullOrTrue|{}|{}", table, column)
        }
    }
}
