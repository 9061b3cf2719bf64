//! rust-relschema: deterministic relational schema derivation
//!
//! This library reads ApiSchema resource descriptions and derives the
//! dialect-specific relational model (tables, keys, constraints, abstract
//! identity tables, union views, indexes and triggers) that DDL emitters
//! consume. The same inputs always produce the same model.

pub mod builder;
pub mod error;
pub mod manifest;
pub mod model;
pub mod naming;
pub mod passes;
pub mod schema;
pub mod util;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub use error::RelSchemaError;
pub use manifest::write_manifest;
pub use model::DerivedRelationalModelSet;
pub use naming::SqlDialect;

use builder::RelationalModelSetBuilderContext;
use schema::ApiSchemaDocument;

/// Options for deriving a model set from schema files
#[derive(Debug, Clone)]
pub struct DeriveOptions {
    /// ApiSchema files, directories or glob patterns
    pub schema_paths: Vec<PathBuf>,
    /// Target SQL dialect
    pub dialect: SqlDialect,
    /// Where to write the JSON manifest, if anywhere
    pub output_path: Option<PathBuf>,
    /// Enable verbose output
    pub verbose: bool,
}

/// Run the full pass pipeline over already-loaded documents.
pub fn derive_model_set(
    documents: &[ApiSchemaDocument],
    dialect: SqlDialect,
) -> Result<DerivedRelationalModelSet> {
    let mut ctx = RelationalModelSetBuilderContext::new(documents, dialect)
        .context("Failed to initialize derivation context")?;
    passes::run_passes(&mut ctx, passes::DEFAULT_PASSES)
        .with_context(|| format!("Failed to derive {} relational model", dialect))?;
    Ok(ctx.into_derived_set())
}

/// Load schema files, derive the model set and optionally write its manifest
pub fn derive(options: DeriveOptions) -> Result<DerivedRelationalModelSet> {
    // Step 1: Expand inputs into schema files
    let files = schema::collect_schema_files(&options.schema_paths)?;
    if files.is_empty() {
        anyhow::bail!("No ApiSchema files found in the given inputs");
    }

    if options.verbose {
        eprintln!("Found {} schema files", files.len());
    }

    // Step 2: Load and validate every document
    let documents = schema::load_schema_files(&files)?;

    if options.verbose {
        eprintln!("Loaded {} projects", documents.len());
    }

    // Step 3: Derive
    let set = derive_model_set(&documents, options.dialect)?;

    if options.verbose {
        eprintln!(
            "Derived {} resources, {} indexes, {} triggers for {}",
            set.concrete_resources_in_name_order.len(),
            set.indexes_in_create_order.len(),
            set.triggers_in_create_order.len(),
            options.dialect
        );
    }

    // Step 4: Manifest
    if let Some(output_path) = &options.output_path {
        manifest::write_manifest(&set, output_path)?;
        if options.verbose {
            eprintln!("Wrote manifest: {}", output_path.display());
        }
    }

    Ok(set)
}
