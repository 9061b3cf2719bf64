//! Integration tests for the derive workflow
//!
//! These tests run the full pass pipeline over ApiSchema files on disk and
//! check the resulting model set.

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use serde_json::json;

use rust_relschema::model::{
    AbstractUnionViewProjectionExpression, ColumnStorage, DbColumnName, DbIndexKind, DbSchemaName,
    DbTableModel, DbTableName, DbTriggerKind, DerivedRelationalModelSet, ReferentialAction,
    RelationalScalarType, ScalarKind, TableConstraint,
};
use rust_relschema::SqlDialect;

use crate::common::{column_names, constraint, ed_fi_project, root_table, TestContext};

fn ed_org(dialect: SqlDialect) -> DerivedRelationalModelSet {
    TestContext::with_fixture("ed_org").derive_successfully(dialect)
}

fn table_name(schema: &str, name: &str) -> DbTableName {
    DbTableName::new(DbSchemaName::from(schema), name)
}

/// Every table in the set: resource tables, then abstract identity tables
fn all_tables(set: &DerivedRelationalModelSet) -> Vec<&DbTableModel> {
    set.concrete_resources_in_name_order
        .iter()
        .flat_map(|entry| entry.model.tables_in_dependency_order.iter())
        .chain(
            set.abstract_identity_tables_in_name_order
                .iter()
                .map(|info| &info.table),
        )
        .collect()
}

// ============================================================================
// Ordering and keys
// ============================================================================

#[test]
fn test_project_schemas_follow_endpoint_order() {
    let set = ed_org(SqlDialect::Pgsql);
    let schemas = set
        .project_schemas_in_endpoint_order
        .iter()
        .map(|p| (p.project_name.as_str(), p.physical_schema.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(schemas, vec![("Ed-Fi", "edfi"), ("TPDM", "tpdm")]);
}

#[test]
fn test_resource_keys_cover_abstract_and_concrete_resources() {
    let set = ed_org(SqlDialect::Pgsql);
    let keys = set
        .resource_keys_in_id_order
        .iter()
        .map(|k| (k.resource_key_id, k.resource.to_string(), k.is_abstract))
        .collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec![
            (1, "Ed-Fi:AcademicSubjectDescriptor".to_string(), false),
            (2, "Ed-Fi:Course".to_string(), false),
            (3, "Ed-Fi:EducationOrganization".to_string(), true),
            (4, "Ed-Fi:GradingPeriod".to_string(), false),
            (5, "Ed-Fi:LocalEducationAgency".to_string(), false),
            (6, "Ed-Fi:ReportCard".to_string(), false),
            (7, "Ed-Fi:School".to_string(), false),
            (8, "TPDM:Candidate".to_string(), false),
        ]
    );

    let concrete = set
        .concrete_resources_in_name_order
        .iter()
        .map(|entry| entry.model.resource.resource_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        concrete,
        vec![
            "AcademicSubjectDescriptor",
            "Course",
            "GradingPeriod",
            "LocalEducationAgency",
            "ReportCard",
            "School",
            "Candidate"
        ]
    );
}

#[test]
fn test_resources_land_in_their_project_schema() {
    let set = ed_org(SqlDialect::Pgsql);
    assert_eq!(root_table(&set, "School").table, table_name("edfi", "School"));
    assert_eq!(root_table(&set, "Candidate").table, table_name("tpdm", "Candidate"));

    let school = set.resource("School").unwrap();
    let tables = school
        .tables_in_dependency_order
        .iter()
        .map(|t| t.table.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(tables, vec!["School", "SchoolAddress"]);
}

// ============================================================================
// Abstract identity
// ============================================================================

#[test]
fn test_int32_member_is_cast_in_union_view() {
    let set = ed_org(SqlDialect::Pgsql);

    let identity = set.abstract_identity_table("EducationOrganization").unwrap();
    assert_eq!(identity.table.table, table_name("edfi", "EducationOrganizationIdentity"));
    assert_eq!(
        column_names(&identity.table),
        vec!["DocumentId", "EducationOrganizationId", "Discriminator"]
    );
    assert_eq!(
        identity.table.columns[1].scalar_type,
        Some(RelationalScalarType::of(ScalarKind::Int64))
    );

    let view = set.abstract_union_view("EducationOrganization").unwrap();
    assert_eq!(view.view_name, table_name("edfi", "EducationOrganization_View"));
    let arms = view
        .union_arms_in_order
        .iter()
        .map(|arm| arm.from_table.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(arms, vec!["LocalEducationAgency", "School"]);

    assert_eq!(
        view.union_arms_in_order[1].projection_expressions[1],
        AbstractUnionViewProjectionExpression::SourceColumn {
            column_name: DbColumnName::from("SchoolId"),
            cast_to: Some(RelationalScalarType::of(ScalarKind::Int64)),
        }
    );
    assert!(matches!(
        &view.union_arms_in_order[0].projection_expressions[1],
        AbstractUnionViewProjectionExpression::SourceColumn { cast_to: None, .. }
    ));
    assert_eq!(
        view.union_arms_in_order[1].projection_expressions[2],
        AbstractUnionViewProjectionExpression::StringLiteral {
            value: "Ed-Fi:School".to_string()
        }
    );
}

#[test]
fn test_member_kind_mismatch_fails() {
    let member = |name: &str, id: &str, id_schema: serde_json::Value| {
        json!({
            "resourceName": name,
            "isSubclass": true,
            "superclassProjectName": "Ed-Fi",
            "superclassResourceName": "EducationOrganization",
            "superclassIdentityJsonPath": "$.educationOrganizationId",
            "identityJsonPaths": [format!("$.{}", id)],
            "documentPathsMapping": {
                "Id": { "isReference": false, "path": format!("$.{}", id) }
            },
            "jsonSchemaForInsert": {
                "type": "object",
                "properties": { id: id_schema },
                "required": [id]
            }
        })
    };
    let document = ed_fi_project(
        json!({
            "schools": member("School", "schoolId", json!({ "type": "integer" })),
            "localEducationAgencies": member(
                "LocalEducationAgency",
                "localEducationAgencyId",
                json!({ "type": "string", "maxLength": 20 })
            )
        }),
        json!({ "EducationOrganization": { "identityJsonPaths": ["$.educationOrganizationId"] } }),
    );

    let error = TestContext::with_documents(&[document]).derive_error(SqlDialect::Pgsql);
    assert!(
        error.contains("has inconsistent column types"),
        "unexpected error: {}",
        error
    );
}

// ============================================================================
// Key unification and scalar types
// ============================================================================

#[test]
fn test_own_field_unifies_with_reference_part_without_presence_column() {
    let set = ed_org(SqlDialect::Pgsql);
    let report_card = root_table(&set, "ReportCard");

    let own = report_card
        .column(&DbColumnName::from("GradingPeriodSchoolId"))
        .unwrap();
    assert_eq!(
        own.storage,
        ColumnStorage::UnifiedAlias {
            canonical_column: DbColumnName::from("SchoolId_Unified"),
            presence_column: None,
        }
    );

    let propagated = report_card
        .column(&DbColumnName::from("GradingPeriod_SchoolId"))
        .unwrap();
    assert_eq!(
        propagated.storage,
        ColumnStorage::UnifiedAlias {
            canonical_column: DbColumnName::from("SchoolId_Unified"),
            presence_column: Some(DbColumnName::from("GradingPeriod_DocumentId")),
        }
    );

    let canonical = report_card
        .column(&DbColumnName::from("SchoolId_Unified"))
        .unwrap();
    assert!(canonical.is_stored());
    assert!(!canonical.is_nullable);
    assert!(!report_card
        .columns
        .iter()
        .any(|c| c.is_synthetic_presence()));

    let TableConstraint::ForeignKey { columns, .. } =
        constraint(report_card, "FK_ReportCard_GradingPeriod_RefKey")
    else {
        panic!("expected a foreign key");
    };
    assert!(columns.contains(&DbColumnName::from("SchoolId_Unified")));
    assert!(!columns.contains(&DbColumnName::from("GradingPeriod_SchoolId")));
}

#[test]
fn test_decimal_column_uses_validation_info() {
    let set = ed_org(SqlDialect::Pgsql);
    let gpa = root_table(&set, "ReportCard")
        .column(&DbColumnName::from("GpaCumulative"))
        .unwrap();
    assert_eq!(gpa.scalar_type, Some(RelationalScalarType::decimal(18, 4)));
    assert!(gpa.is_nullable);
}

// ============================================================================
// Constraints
// ============================================================================

#[test]
fn test_optional_cross_project_reference() {
    let set = ed_org(SqlDialect::Pgsql);
    let candidate = root_table(&set, "Candidate");

    match constraint(candidate, "FK_Candidate_School_RefKey") {
        TableConstraint::ForeignKey {
            columns,
            target_table,
            target_columns,
            ..
        } => {
            assert_eq!(
                columns,
                &vec![
                    DbColumnName::from("School_DocumentId"),
                    DbColumnName::from("School_SchoolId")
                ]
            );
            assert_eq!(target_table, &table_name("edfi", "School"));
            assert_eq!(
                target_columns,
                &vec![DbColumnName::from("DocumentId"), DbColumnName::from("SchoolId")]
            );
        }
        other => panic!("expected a foreign key, got {:?}", other),
    }
    assert!(candidate.has_constraint_named("CK_Candidate_School_AllNone"));
    assert!(root_table(&set, "School").has_constraint_named("UX_School_RefKey"));
}

#[test]
fn test_on_update_cascades_to_abstract_target_on_pgsql_only() {
    let on_update = |dialect| {
        let set = ed_org(dialect);
        match constraint(root_table(&set, "Course"), "FK_Course_EducationOrganization_RefKey") {
            TableConstraint::ForeignKey {
                target_table,
                on_update,
                ..
            } => {
                assert_eq!(target_table.name, "EducationOrganizationIdentity");
                *on_update
            }
            other => panic!("expected a foreign key, got {:?}", other),
        }
    };

    assert_eq!(on_update(SqlDialect::Pgsql), ReferentialAction::Cascade);
    assert_eq!(on_update(SqlDialect::Mssql), ReferentialAction::NoAction);
}

#[test]
fn test_descriptor_reference_targets_core_descriptor_table() {
    let set = ed_org(SqlDialect::Pgsql);
    match constraint(root_table(&set, "Course"), "FK_Course_AcademicSubjectDescriptor") {
        TableConstraint::ForeignKey {
            columns,
            target_table,
            ..
        } => {
            assert_eq!(columns, &vec![DbColumnName::from("AcademicSubjectDescriptor_DescriptorId")]);
            assert_eq!(target_table, &table_name("dms", "Descriptor"));
        }
        other => panic!("expected a foreign key, got {:?}", other),
    }
}

#[test]
fn test_every_foreign_key_uses_stored_columns() {
    for dialect in [SqlDialect::Pgsql, SqlDialect::Mssql] {
        let set = ed_org(dialect);
        let tables = all_tables(&set)
            .into_iter()
            .map(|t| (t.table.clone(), t))
            .collect::<BTreeMap<_, _>>();

        for table in tables.values() {
            for c in &table.constraints {
                let TableConstraint::ForeignKey {
                    name,
                    columns,
                    target_table,
                    target_columns,
                    ..
                } = c
                else {
                    continue;
                };
                for column in columns {
                    let model = table.column(column).unwrap();
                    assert!(model.is_stored(), "{} uses alias {}", name, column);
                    assert!(!model.is_synthetic_presence(), "{} uses presence {}", name, column);
                }
                if target_table.schema.as_str() == "dms" {
                    continue;
                }
                let target = tables[target_table];
                for column in target_columns {
                    assert!(target.column(column).unwrap().is_stored(), "{} targets alias {}", name, column);
                }
            }
        }
    }
}

// ============================================================================
// Indexes
// ============================================================================

#[test]
fn test_foreign_keys_on_key_prefix_get_no_support_index() {
    let set = ed_org(SqlDialect::Pgsql);

    let address = set
        .indexes_for(&table_name("edfi", "SchoolAddress"))
        .into_iter()
        .map(|i| (i.name.as_str(), i.kind))
        .collect::<Vec<_>>();
    assert_eq!(address, vec![("PK_SchoolAddress", DbIndexKind::PrimaryKey)]);

    assert!(!set
        .indexes_in_create_order
        .iter()
        .any(|i| i.kind == DbIndexKind::ForeignKeySupport
            && i.key_columns == vec![DbColumnName::from("DocumentId")]));

    let candidate = set.indexes_for(&table_name("tpdm", "Candidate"));
    let support = candidate
        .iter()
        .filter(|i| i.kind == DbIndexKind::ForeignKeySupport)
        .map(|i| i.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(support, vec!["IX_Candidate_School_DocumentId_School_SchoolId"]);
}

#[test]
fn test_inventories_are_ordered_by_table_then_name() {
    let set = ed_org(SqlDialect::Mssql);

    let index_keys = set
        .indexes_in_create_order
        .iter()
        .map(|i| (i.table.clone(), i.name.as_str().to_string()))
        .collect::<Vec<_>>();
    let mut sorted = index_keys.clone();
    sorted.sort();
    assert_eq!(index_keys, sorted);

    let trigger_keys = set
        .triggers_in_create_order
        .iter()
        .map(|t| (t.table.clone(), t.name.as_str().to_string()))
        .collect::<Vec<_>>();
    let mut sorted = trigger_keys.clone();
    sorted.sort();
    assert_eq!(trigger_keys, sorted);
}

// ============================================================================
// Triggers
// ============================================================================

#[test]
fn test_identity_propagation_is_mssql_only() {
    let is_propagation =
        |kind: &DbTriggerKind| matches!(kind, DbTriggerKind::IdentityPropagationFallback { .. });

    let pgsql = ed_org(SqlDialect::Pgsql);
    assert!(!pgsql.triggers_in_create_order.iter().any(|t| is_propagation(&t.kind)));

    let mssql = ed_org(SqlDialect::Mssql);
    let propagation = mssql
        .triggers_in_create_order
        .iter()
        .filter(|t| is_propagation(&t.kind))
        .collect::<Vec<_>>();
    assert_eq!(propagation.len(), 1);
    assert_eq!(
        propagation[0].name.as_str(),
        "TR_EducationOrganizationIdentity_PropagateIdentity"
    );
    let DbTriggerKind::IdentityPropagationFallback { referrer_updates } = &propagation[0].kind else {
        unreachable!();
    };
    let referrers = referrer_updates
        .iter()
        .map(|r| r.referrer_table.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(referrers, vec!["Course"]);
}

#[test]
fn test_every_table_has_a_stamp_trigger() {
    let set = ed_org(SqlDialect::Pgsql);
    for entry in &set.concrete_resources_in_name_order {
        if entry.model.is_descriptor_storage() {
            continue;
        }
        for table in &entry.model.tables_in_dependency_order {
            let stamps = set
                .triggers_for(&table.table)
                .into_iter()
                .filter(|t| t.kind == DbTriggerKind::DocumentStamping)
                .count();
            assert_eq!(stamps, 1, "table {}", table.table);
        }
    }

    let school = set.triggers_for(&table_name("edfi", "School"));
    let names = school.iter().map(|t| t.name.as_str()).collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "TR_School_AbstractIdentity",
            "TR_School_ReferentialIdentity",
            "TR_School_Stamp"
        ]
    );
}

// ============================================================================
// Dialect shortening
// ============================================================================

const LONG_RESOURCE: &str = "StudentEducationOrganizationResponsibilityAssociationWithExtraDetail";

fn long_named_document() -> serde_json::Value {
    ed_fi_project(
        json!({
            "studentEducationOrganizationResponsibilityAssociationWithExtraDetails": {
                "resourceName": LONG_RESOURCE,
                "identityJsonPaths": ["$.responsibilityIdentifier"],
                "documentPathsMapping": {
                    "ResponsibilityIdentifier": { "isReference": false, "path": "$.responsibilityIdentifier" }
                },
                "jsonSchemaForInsert": {
                    "type": "object",
                    "properties": {
                        "responsibilityIdentifier": { "type": "string", "maxLength": 60 },
                        "periods": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": { "beginDate": { "type": "string", "format": "date" } },
                                "required": ["beginDate"]
                            }
                        }
                    },
                    "required": ["responsibilityIdentifier"]
                }
            }
        }),
        json!({}),
    )
}

fn all_identifiers(set: &DerivedRelationalModelSet) -> Vec<String> {
    let mut names = Vec::new();
    for table in all_tables(set) {
        names.push(table.table.name.clone());
        names.push(table.key.constraint_name.clone());
        names.extend(table.columns.iter().map(|c| c.column_name.as_str().to_string()));
        names.extend(table.constraints.iter().map(|c| c.name().to_string()));
    }
    names.extend(set.indexes_in_create_order.iter().map(|i| i.name.as_str().to_string()));
    names.extend(set.triggers_in_create_order.iter().map(|t| t.name.as_str().to_string()));
    names
}

#[test]
fn test_pgsql_identifiers_fit_63_bytes() {
    let ctx = TestContext::with_documents(&[long_named_document()]);
    let set = ctx.derive_successfully(SqlDialect::Pgsql);

    for name in all_identifiers(&set) {
        assert!(name.len() <= 63, "identifier too long: {}", name);
    }

    let root = set.resource(LONG_RESOURCE).unwrap().root();
    assert_ne!(root.table.name, LONG_RESOURCE);
    assert_eq!(root.table.name.len(), 63);
    assert!(root.table.name.starts_with(&LONG_RESOURCE[..54]));

    // Child FK still points at the renamed root
    let child = &set.resource(LONG_RESOURCE).unwrap().tables_in_dependency_order[1];
    assert!(child.constraints.iter().any(|c| matches!(
        c,
        TableConstraint::ForeignKey { target_table, .. } if target_table == &root.table
    )));
}

#[test]
fn test_mssql_keeps_names_within_128_characters() {
    let ctx = TestContext::with_documents(&[long_named_document()]);
    let set = ctx.derive_successfully(SqlDialect::Mssql);

    let root = set.resource(LONG_RESOURCE).unwrap().root();
    assert_eq!(root.table.name, LONG_RESOURCE);
    for name in all_identifiers(&set) {
        assert!(name.chars().count() <= 128, "identifier too long: {}", name);
    }
}

// ============================================================================
// Input errors
// ============================================================================

#[test]
fn test_duplicate_project_is_rejected() {
    let document = ed_fi_project(json!({}), json!({}));
    let error = TestContext::with_documents(&[document.clone(), document]).derive_error(SqlDialect::Pgsql);
    assert!(
        error.contains("Project 'Ed-Fi' is defined by more than one schema document."),
        "unexpected error: {}",
        error
    );
}

#[test]
fn test_missing_schema_file_is_reported() {
    let ctx = TestContext::with_documents(&[]);
    let mut options = ctx.options(SqlDialect::Pgsql);
    options.schema_paths = vec![ctx.schema_dir.join("missing.json")];

    let error = format!("{:#}", rust_relschema::derive(options).unwrap_err());
    assert!(error.contains("Failed to read schema file"), "unexpected error: {}", error);
}

#[test]
fn test_empty_directory_is_rejected() {
    let ctx = TestContext::with_documents(&[]);
    let error = ctx.derive_error(SqlDialect::Pgsql);
    assert!(error.contains("No ApiSchema files found"), "unexpected error: {}", error);
}
