//! Relational naming conventions for derived schemas, tables and columns

use crate::model::{DbColumnName, DbSchemaName};

pub const DOCUMENT_ID: &str = "DocumentId";
pub const ORDINAL: &str = "Ordinal";
pub const DISCRIMINATOR: &str = "Discriminator";
pub const DOCUMENT_ID_SUFFIX: &str = "_DocumentId";
pub const DESCRIPTOR_ID_SUFFIX: &str = "_DescriptorId";
pub const DMS_SCHEMA: &str = "dms";
pub const DOCUMENT_TABLE: &str = "Document";
pub const DESCRIPTOR_TABLE: &str = "Descriptor";

pub fn document_id_column() -> DbColumnName {
    DbColumnName::from(DOCUMENT_ID)
}

pub fn ordinal_column() -> DbColumnName {
    DbColumnName::from(ORDINAL)
}

pub fn discriminator_column() -> DbColumnName {
    DbColumnName::from(DISCRIMINATOR)
}

/// `DocumentId` itself or any `{Something}_DocumentId` column
pub fn is_document_id_column(name: &DbColumnName) -> bool {
    name.as_str() == DOCUMENT_ID || name.as_str().ends_with(DOCUMENT_ID_SUFFIX)
}

/// `{Root}_DocumentId` key column carried by every child table
pub fn root_document_id_column(root_base_name: &str) -> DbColumnName {
    DbColumnName::new(format!("{}{}", root_base_name, DOCUMENT_ID_SUFFIX))
}

/// `{Collection}Ordinal` parent key column of nested collection tables
pub fn parent_collection_ordinal_column(collection_base_name: &str) -> DbColumnName {
    DbColumnName::new(format!("{}{}", collection_base_name, ORDINAL))
}

pub fn descriptor_id_column(base_name: &str) -> DbColumnName {
    DbColumnName::new(format!("{}{}", base_name, DESCRIPTOR_ID_SUFFIX))
}

pub fn document_fk_column(reference_base_name: &str) -> DbColumnName {
    DbColumnName::new(format!("{}{}", reference_base_name, DOCUMENT_ID_SUFFIX))
}

/// Lowercase ASCII alphanumerics; prefixed with `p` unless it starts with a letter.
pub fn normalize_schema_name(project_endpoint_name: &str) -> DbSchemaName {
    let normalized = project_endpoint_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect::<String>();

    match normalized.chars().next() {
        Some(first) if first.is_ascii_alphabetic() => DbSchemaName::new(normalized),
        _ => DbSchemaName::new(format!("p{}", normalized)),
    }
}

/// PascalCase: drop non-alphanumerics, upper-case the first character and every
/// character following a dropped separator.
pub fn to_pascal_case(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut upper_next = true;

    for c in value.chars() {
        if c.is_alphanumeric() {
            if upper_next {
                result.extend(c.to_uppercase());
            } else {
                result.push(c);
            }
            upper_next = false;
        } else {
            upper_next = true;
        }
    }

    result
}

/// English plural to singular for collection property names.
pub fn singularize(value: &str) -> String {
    if value.len() > 3 && value.ends_with("ies") {
        return format!("{}y", &value[..value.len() - 3]);
    }

    for suffix in ["ches", "shes", "xes", "zes", "ses"] {
        if value.len() > suffix.len() && value.ends_with(suffix) {
            return value[..value.len() - 2].to_string();
        }
    }

    if value.len() > 1 && value.ends_with('s') && !value.ends_with("ss") {
        return value[..value.len() - 1].to_string();
    }

    value.to_string()
}

/// Base name of a collection table derived from its array property
pub fn collection_base_name(property_name: &str) -> String {
    to_pascal_case(&singularize(property_name))
}

/// Strip a `_DescriptorId` suffix when present
pub fn descriptor_base_name(column: &DbColumnName) -> &str {
    column
        .as_str()
        .strip_suffix(DESCRIPTOR_ID_SUFFIX)
        .unwrap_or(column.as_str())
}
