//! ApiSchema loading and validation

mod api_schema;
mod json_schema;

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::error::{RelSchemaError, Result};

pub use api_schema::*;
pub use json_schema::{JsonSchemaKind, JsonSchemaNode, ObjectSchema, ScalarSchema};

/// Below this many files sequential loading is faster than fanning out.
const PARALLEL_LOAD_THRESHOLD: usize = 8;

/// Expand schema inputs into a sorted, de-duplicated list of JSON files.
///
/// Directories are walked recursively for `*.json`; arguments containing glob
/// metacharacters are expanded as patterns; anything else is taken as a file.
pub fn collect_schema_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        let text = input.to_string_lossy();
        if input.is_dir() {
            files.extend(
                WalkDir::new(input)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "json")),
            );
        } else if text.contains(['*', '?', '[']) {
            let entries = glob::glob(&text).map_err(|source| RelSchemaError::SchemaPattern {
                pattern: text.to_string(),
                source,
            })?;
            files.extend(entries.filter_map(|e| e.ok()).filter(|p| p.is_file()));
        } else {
            files.push(input.clone());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Read and validate one ApiSchema file.
pub fn load_schema_file(path: &Path) -> Result<ApiSchemaDocument> {
    let content = fs::read_to_string(path).map_err(|source| RelSchemaError::SchemaFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| RelSchemaError::SchemaParse {
            path: path.to_path_buf(),
            source,
        })?;
    ApiSchemaDocument::from_value(value).map_err(|e| match e {
        RelSchemaError::SchemaInput { message } => RelSchemaError::SchemaInput {
            message: format!("{} ({})", message, path.display()),
        },
        other => other,
    })
}

/// Load many schema files, preserving input order.
pub fn load_schema_files(paths: &[PathBuf]) -> Result<Vec<ApiSchemaDocument>> {
    if paths.len() >= PARALLEL_LOAD_THRESHOLD {
        paths.par_iter().map(|p| load_schema_file(p)).collect()
    } else {
        paths.iter().map(|p| load_schema_file(p)).collect()
    }
}
