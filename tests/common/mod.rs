//! Common test utilities for rust-relschema tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use rust_relschema::model::{DbTableModel, DerivedRelationalModelSet, TableConstraint};
use rust_relschema::{DeriveOptions, SqlDialect};

/// Test context with temporary directory for isolated test execution
pub struct TestContext {
    /// Kept to prevent temp directory cleanup until TestContext is dropped
    _temp_dir: TempDir,
    pub schema_dir: PathBuf,
}

impl TestContext {
    /// Create a new test context by copying a fixture to a temp directory
    pub fn with_fixture(fixture_name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let fixture_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(fixture_name);

        let schema_dir = temp_dir.path().join("schemas");
        copy_dir_recursive(&fixture_path, &schema_dir).expect("Failed to copy fixture");

        Self {
            _temp_dir: temp_dir,
            schema_dir,
        }
    }

    /// Create a context holding the given ApiSchema documents, one file each
    pub fn with_documents(documents: &[Value]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let schema_dir = temp_dir.path().join("schemas");
        fs::create_dir_all(&schema_dir).expect("Failed to create schema directory");

        for (index, document) in documents.iter().enumerate() {
            let text = serde_json::to_string_pretty(document).expect("Failed to render document");
            fs::write(schema_dir.join(format!("ApiSchema-{}.json", index)), text)
                .expect("Failed to write document");
        }

        Self {
            _temp_dir: temp_dir,
            schema_dir,
        }
    }

    /// Path for output files inside the temp directory
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.schema_dir
            .parent()
            .expect("schema dir has a parent")
            .join("out")
            .join(name)
    }

    pub fn options(&self, dialect: SqlDialect) -> DeriveOptions {
        DeriveOptions {
            schema_paths: vec![self.schema_dir.clone()],
            dialect,
            output_path: None,
            verbose: false,
        }
    }

    pub fn derive(&self, dialect: SqlDialect) -> anyhow::Result<DerivedRelationalModelSet> {
        rust_relschema::derive(self.options(dialect))
    }

    /// Derive, panicking with the full error chain on failure
    pub fn derive_successfully(&self, dialect: SqlDialect) -> DerivedRelationalModelSet {
        match self.derive(dialect) {
            Ok(set) => set,
            Err(e) => panic!("Derivation failed: {:#}", e),
        }
    }

    /// Derive and return the full error chain, panicking on success
    pub fn derive_error(&self, dialect: SqlDialect) -> String {
        match self.derive(dialect) {
            Ok(_) => panic!("Derivation was expected to fail"),
            Err(e) => format!("{:#}", e),
        }
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Root table of a concrete resource, panicking when it is absent
pub fn root_table<'a>(set: &'a DerivedRelationalModelSet, resource_name: &str) -> &'a DbTableModel {
    set.resource(resource_name)
        .unwrap_or_else(|| panic!("missing resource {}", resource_name))
        .root()
}

pub fn constraint<'a>(table: &'a DbTableModel, name: &str) -> &'a TableConstraint {
    table
        .constraints
        .iter()
        .find(|c| c.name() == name)
        .unwrap_or_else(|| panic!("missing constraint {} on {}", name, table.table))
}

pub fn column_names(table: &DbTableModel) -> Vec<&str> {
    table.columns.iter().map(|c| c.column_name.as_str()).collect()
}

/// Minimal single-project document in the core Ed-Fi project
pub fn ed_fi_project(resources: Value, abstract_resources: Value) -> Value {
    serde_json::json!({
        "projectSchema": {
            "projectName": "Ed-Fi",
            "projectVersion": "5.2.0",
            "projectEndpointName": "ed-fi",
            "isExtensionProject": false,
            "resourceSchemas": resources,
            "abstractResources": abstract_resources
        }
    })
}
