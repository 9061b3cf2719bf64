//! JSON schema scalar to relational scalar type resolution

use std::collections::BTreeMap;

use crate::error::{RelSchemaError, Result};
use crate::model::{JsonPathExpression, RelationalScalarType, ScalarKind};
use crate::schema::{DecimalPropertyValidationInfo, ScalarSchema};

pub fn resolve_scalar_type(
    schema: &ScalarSchema,
    path: &JsonPathExpression,
    decimal_infos: &BTreeMap<JsonPathExpression, DecimalPropertyValidationInfo>,
) -> Result<RelationalScalarType> {
    match schema.json_type.as_str() {
        "string" => resolve_string(schema, path),
        "integer" => Ok(match schema.format.as_deref() {
            Some("int64") => RelationalScalarType::of(ScalarKind::Int64),
            _ => RelationalScalarType::of(ScalarKind::Int32),
        }),
        "number" => resolve_decimal(path, decimal_infos),
        "boolean" => Ok(RelationalScalarType::of(ScalarKind::Boolean)),
        other => Err(RelSchemaError::schema_input(format!(
            "Unsupported scalar type '{}' at {}.",
            other, path
        ))),
    }
}

fn resolve_string(schema: &ScalarSchema, path: &JsonPathExpression) -> Result<RelationalScalarType> {
    match schema.format.as_deref() {
        Some("date") => return Ok(RelationalScalarType::of(ScalarKind::Date)),
        Some("date-time") => return Ok(RelationalScalarType::of(ScalarKind::DateTime)),
        Some("time") => return Ok(RelationalScalarType::of(ScalarKind::Time)),
        _ => {}
    }

    let max_length = schema.max_length.ok_or_else(|| {
        RelSchemaError::schema_input(format!("String schema maxLength is required at {}.", path))
    })?;

    match u32::try_from(max_length) {
        Ok(length) if length > 0 => Ok(RelationalScalarType::string(Some(length))),
        _ => Err(RelSchemaError::schema_input(format!(
            "String schema maxLength must be a positive 32-bit value at {}.",
            path
        ))),
    }
}

fn resolve_decimal(
    path: &JsonPathExpression,
    decimal_infos: &BTreeMap<JsonPathExpression, DecimalPropertyValidationInfo>,
) -> Result<RelationalScalarType> {
    let info = decimal_infos.get(path).ok_or_else(|| {
        RelSchemaError::schema_input(format!(
            "Decimal property validation info is required for number properties at {}.",
            path
        ))
    })?;

    let (Some(total_digits), Some(decimal_places)) = (info.total_digits, info.decimal_places) else {
        return Err(RelSchemaError::schema_input(format!(
            "Decimal property validation info must include totalDigits and decimalPlaces at {}.",
            path
        )));
    };

    if total_digits == 0 {
        return Err(RelSchemaError::schema_input(format!(
            "Decimal totalDigits must be positive at {}.",
            path
        )));
    }
    if decimal_places > total_digits {
        return Err(RelSchemaError::schema_input(format!(
            "Decimal decimalPlaces ({}) must not exceed totalDigits ({}) at {}.",
            decimal_places, total_digits, path
        )));
    }

    Ok(RelationalScalarType::decimal(total_digits, decimal_places))
}
