//! JSON manifest of a derived model set
//!
//! The manifest is the serialized `DerivedRelationalModelSet`. Field order is
//! fixed by the struct definitions and every collection is already in its
//! canonical order, so the same inputs always produce byte-identical output.

use std::fs;
use std::path::Path;

use crate::error::{RelSchemaError, Result};
use crate::model::DerivedRelationalModelSet;

/// Render the manifest as pretty-printed JSON with a trailing newline.
pub fn render_manifest(set: &DerivedRelationalModelSet) -> Result<String> {
    let mut text = serde_json::to_string_pretty(set).map_err(|e| RelSchemaError::ManifestSerialize {
        message: e.to_string(),
    })?;
    text.push('\n');
    Ok(text)
}

/// Write the manifest to `output_path`, creating parent directories.
pub fn write_manifest(set: &DerivedRelationalModelSet, output_path: &Path) -> Result<()> {
    let text = render_manifest(set)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| RelSchemaError::ManifestWrite {
                path: output_path.to_path_buf(),
                source,
            })?;
        }
    }

    fs::write(output_path, text).map_err(|source| RelSchemaError::ManifestWrite {
        path: output_path.to_path_buf(),
        source,
    })
}
