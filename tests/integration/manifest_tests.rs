//! Integration tests for manifest output and determinism

use std::fs;

use pretty_assertions::assert_eq;
use serde_json::Value;

use rust_relschema::manifest::render_manifest;
use rust_relschema::SqlDialect;

use crate::common::TestContext;

#[test]
fn test_repeated_runs_produce_identical_manifests() {
    let ctx = TestContext::with_fixture("ed_org");
    for dialect in [SqlDialect::Pgsql, SqlDialect::Mssql] {
        let first = render_manifest(&ctx.derive_successfully(dialect)).unwrap();
        let second = render_manifest(&ctx.derive_successfully(dialect)).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn test_input_order_does_not_change_manifest() {
    let ctx = TestContext::with_fixture("ed_org");
    let edfi = ctx.schema_dir.join("ApiSchema-EdFi.json");
    let tpdm = ctx.schema_dir.join("ApiSchema-TPDM.json");

    let mut forward = ctx.options(SqlDialect::Pgsql);
    forward.schema_paths = vec![edfi.clone(), tpdm.clone()];
    let mut reverse = ctx.options(SqlDialect::Pgsql);
    reverse.schema_paths = vec![tpdm, edfi];

    let forward = render_manifest(&rust_relschema::derive(forward).unwrap()).unwrap();
    let reverse = render_manifest(&rust_relschema::derive(reverse).unwrap()).unwrap();
    assert_eq!(forward, reverse);
}

#[test]
fn test_output_path_writes_manifest() {
    let ctx = TestContext::with_fixture("ed_org");
    let output = ctx.output_path("model-set.json");
    let mut options = ctx.options(SqlDialect::Mssql);
    options.output_path = Some(output.clone());

    let set = rust_relschema::derive(options).unwrap();

    let written = fs::read_to_string(&output).expect("manifest should be written");
    assert_eq!(written, render_manifest(&set).unwrap());

    let value: Value = serde_json::from_str(&written).unwrap();
    assert_eq!(value["dialect"], "Mssql");
    assert_eq!(value["projectSchemasInEndpointOrder"][1]["physicalSchema"], "tpdm");
    assert_eq!(
        value["resourceKeysInIdOrder"][0]["resource"]["resourceName"],
        "AcademicSubjectDescriptor"
    );
    assert!(!value["indexesInCreateOrder"].as_array().unwrap().is_empty());
}

#[test]
fn test_dialects_differ_only_where_expected() {
    let ctx = TestContext::with_fixture("ed_org");
    let pgsql = ctx.derive_successfully(SqlDialect::Pgsql);
    let mssql = ctx.derive_successfully(SqlDialect::Mssql);

    // Same tables either way; only actions and triggers depend on the dialect here
    let tables = |set: &rust_relschema::DerivedRelationalModelSet| {
        set.concrete_resources_in_name_order
            .iter()
            .flat_map(|e| e.model.tables_in_dependency_order.iter())
            .map(|t| t.table.to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(tables(&pgsql), tables(&mssql));
    assert_eq!(pgsql.indexes_in_create_order, mssql.indexes_in_create_order);
    assert!(mssql.triggers_in_create_order.len() > pgsql.triggers_in_create_order.len());
}
