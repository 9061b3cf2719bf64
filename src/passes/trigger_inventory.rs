//! Trigger inventory
//!
//! Every relational table gets a document stamping trigger. Root tables also
//! get referential identity maintenance, subclass roots get abstract identity
//! maintenance, and on Mssql referenced tables whose identity can change get
//! a propagation trigger standing in for `ON UPDATE CASCADE`.

use std::collections::BTreeMap;

use tracing::debug;

use super::abstract_identity::{discriminator_value, map_identity_path_for_member, member_root_column};
use super::reference_constraints::identity_columns;
use super::unified_alias::{
    metadata_for, resolve_storage_column, resolve_storage_columns, PresenceGatePolicy,
    TableStorageMetadata,
};
use super::SetPass;
use crate::builder::{ConcreteResourceEntry, RelationalModelSetBuilderContext};
use crate::error::{RelSchemaError, Result};
use crate::model::{
    AbstractIdentityTableInfo, ColumnKind, DbColumnName, DbTableModel, DbTriggerInfo,
    DbTriggerKind, DbTriggerName, DocumentReferenceBinding, PropagationReferrerTarget,
    QualifiedResourceName, TriggerColumnMapping,
};
use crate::naming::constraint_naming::{trigger_name, TriggerToken};
use crate::naming::conventions::{document_id_column, is_document_id_column};
use crate::naming::SqlDialect;

pub struct TriggerInventoryPass;

impl SetPass for TriggerInventoryPass {
    fn name(&self) -> &'static str {
        "TriggerInventory"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        let mut triggers = Vec::new();

        for entry in ctx.relational_resources() {
            triggers.extend(resource_triggers(ctx, entry)?);
        }
        if ctx.dialect == SqlDialect::Mssql {
            triggers.extend(propagation_triggers(ctx)?);
        }

        debug!(count = triggers.len(), "derived trigger inventory");
        ctx.triggers = triggers;
        Ok(())
    }
}

fn resource_triggers(
    ctx: &RelationalModelSetBuilderContext,
    entry: &ConcreteResourceEntry,
) -> Result<Vec<DbTriggerInfo>> {
    let resource = &entry.model.resource;
    let root = entry.model.root();

    let identity = identity_columns(entry)?;
    if identity.is_empty() {
        return Err(RelSchemaError::invariant(format!(
            "Resource '{}' requires at least one identity element for referential identity computation, \
             but none were derived.",
            resource
        )));
    }
    let metadata = metadata_for(&ctx.storage_metadata, root)?;
    let projection = resolve_storage_columns(
        &identity,
        &metadata,
        PresenceGatePolicy::RejectSyntheticScalarPresence,
        &format!("Identity projection of resource '{}'", resource),
    )?;

    let mut triggers = Vec::new();

    for table in &entry.model.tables_in_dependency_order {
        let key_column = table
            .key
            .columns
            .iter()
            .find(|c| c.kind == ColumnKind::ParentKeyPart && is_document_id_column(&c.column_name))
            .ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "DocumentStamping trigger derivation requires a DocumentId key column, \
                     but none was found on table '{}' for resource '{}'.",
                    table.table, resource
                ))
            })?;
        let is_root = table.table == root.table;

        triggers.push(DbTriggerInfo {
            name: DbTriggerName::new(trigger_name(&table.table, TriggerToken::Stamp)),
            table: table.table.clone(),
            key_columns: vec![key_column.column_name.clone()],
            identity_projection_columns: if is_root { projection.clone() } else { Vec::new() },
            kind: DbTriggerKind::DocumentStamping,
        });
    }

    if let Some(superclass) = &entry.inputs.schema.superclass {
        ctx.resource_key(&superclass.resource)?;
        if let Some(info) = ctx.abstract_identity_table(&superclass.resource) {
            triggers.push(DbTriggerInfo {
                name: DbTriggerName::new(trigger_name(&root.table, TriggerToken::AbstractIdentity)),
                table: root.table.clone(),
                key_columns: vec![document_id_column()],
                identity_projection_columns: projection.clone(),
                kind: DbTriggerKind::AbstractIdentityMaintenance {
                    target_table: info.table.table.clone(),
                    target_column_mappings: abstract_identity_mappings(entry, info, &metadata)?,
                    discriminator_value: discriminator_value(resource)?,
                },
            });
        }
    }

    triggers.push(DbTriggerInfo {
        name: DbTriggerName::new(trigger_name(&root.table, TriggerToken::ReferentialIdentity)),
        table: root.table.clone(),
        key_columns: vec![document_id_column()],
        identity_projection_columns: projection,
        kind: DbTriggerKind::ReferentialIdentityMaintenance {
            resource_key_id: entry.resource_key.resource_key_id,
        },
    });

    Ok(triggers)
}

/// Member root columns feeding each identity column of the abstract identity table.
fn abstract_identity_mappings(
    entry: &ConcreteResourceEntry,
    info: &AbstractIdentityTableInfo,
    metadata: &TableStorageMetadata,
) -> Result<Vec<TriggerColumnMapping>> {
    let abstract_resource = &info.abstract_resource_key.resource;
    let context = format!("Abstract identity maintenance for resource '{}'", entry.model.resource);

    info.table
        .columns
        .iter()
        .filter_map(|column| column.source_json_path.as_ref().map(|path| (column, path)))
        .map(|(column, abstract_path)| {
            let member_path = map_identity_path_for_member(entry, abstract_path, abstract_resource)?;
            let source = member_root_column(entry, &member_path)?;
            Ok(TriggerColumnMapping {
                source_column: resolve_storage_column(
                    &source.column_name,
                    metadata,
                    PresenceGatePolicy::RejectSyntheticScalarPresence,
                    &context,
                )?,
                target_column: column.column_name.clone(),
            })
        })
        .collect()
}

/// Root-table reference from one resource, keyed by its target below
struct Referrer<'a> {
    entry: &'a ConcreteResourceEntry,
    binding: &'a DocumentReferenceBinding,
}

/// Table whose identity updates must be pushed to referrers
struct PropagationSource<'a> {
    table: &'a DbTableModel,
    identity_projection: Vec<DbColumnName>,
}

fn propagation_triggers(ctx: &RelationalModelSetBuilderContext) -> Result<Vec<DbTriggerInfo>> {
    let mut referrers: BTreeMap<&QualifiedResourceName, Vec<Referrer>> = BTreeMap::new();
    for entry in ctx.relational_resources() {
        let root = &entry.model.root().table;
        for binding in &entry.model.document_reference_bindings {
            if &binding.table == root {
                referrers
                    .entry(&binding.target_resource)
                    .or_default()
                    .push(Referrer { entry, binding });
            }
        }
    }

    let mut triggers = Vec::new();
    for (target, target_referrers) in referrers {
        let Some(source) = propagation_source(ctx, target)? else {
            continue;
        };

        let referrer_updates = target_referrers
            .iter()
            .map(|referrer| propagation_target(ctx, referrer, source.table, target))
            .collect::<Result<Vec<_>>>()?;

        debug!(target = %target, referrers = referrer_updates.len(), "identity propagation trigger");
        triggers.push(DbTriggerInfo {
            name: DbTriggerName::new(trigger_name(&source.table.table, TriggerToken::PropagateIdentity)),
            table: source.table.table.clone(),
            key_columns: vec![document_id_column()],
            identity_projection_columns: source.identity_projection,
            kind: DbTriggerKind::IdentityPropagationFallback { referrer_updates },
        });
    }
    Ok(triggers)
}

/// Abstract identity table, or the root of a concrete target that allows identity updates.
fn propagation_source<'a>(
    ctx: &'a RelationalModelSetBuilderContext,
    target: &QualifiedResourceName,
) -> Result<Option<PropagationSource<'a>>> {
    if let Some(info) = ctx.abstract_identity_table(target) {
        return Ok(Some(PropagationSource {
            table: &info.table,
            identity_projection: info.identity_columns.clone(),
        }));
    }

    let Some(entry) = ctx.concrete(target) else {
        return Ok(None);
    };
    if entry.model.is_descriptor_storage() || !entry.inputs.schema.allow_identity_updates {
        return Ok(None);
    }

    let root = entry.model.root();
    let metadata = metadata_for(&ctx.storage_metadata, root)?;
    let identity_projection = resolve_storage_columns(
        &identity_columns(entry)?,
        &metadata,
        PresenceGatePolicy::RejectSyntheticScalarPresence,
        &format!("Identity propagation from resource '{}'", target),
    )?;
    Ok(Some(PropagationSource {
        table: root,
        identity_projection,
    }))
}

fn propagation_target(
    ctx: &RelationalModelSetBuilderContext,
    referrer: &Referrer,
    source_table: &DbTableModel,
    target: &QualifiedResourceName,
) -> Result<PropagationReferrerTarget> {
    let referrer_resource = &referrer.entry.model.resource;
    let binding = referrer.binding;
    let mapping = referrer
        .entry
        .inputs
        .reference_by_object_path(&binding.reference_object_path)
        .ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Propagation fallback trigger derivation for referrer '{}': reference '{}' has no mapping.",
                referrer_resource, binding.reference_object_path
            ))
        })?;

    let referrer_root = referrer.entry.model.root();
    let metadata = metadata_for(&ctx.storage_metadata, referrer_root)?;
    let source_metadata = metadata_for(&ctx.storage_metadata, source_table)?;
    let context = format!("Identity propagation into resource '{}'", referrer_resource);
    let source_context = format!("Identity propagation from resource '{}'", target);

    let mut pairs = Vec::with_capacity(binding.identity_bindings.len());
    for identity_binding in &binding.identity_bindings {
        let identity_path = mapping
            .reference_json_paths
            .iter()
            .find(|p| p.reference_json_path == identity_binding.reference_json_path)
            .map(|p| &p.identity_json_path)
            .ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "Propagation fallback trigger derivation for referrer '{}': reference JSON path '{}' \
                     did not map to a target identity path.",
                    referrer_resource, identity_binding.reference_json_path
                ))
            })?;

        let source_column = source_table
            .columns_by_source_path(identity_path)
            .first()
            .map(|c| c.column_name.clone())
            .ok_or_else(|| {
                RelSchemaError::invariant(format!(
                    "Propagation fallback trigger derivation for target '{}': identity path '{}' \
                     did not map to a column on trigger table '{}'.",
                    target, identity_path, source_table.table
                ))
            })?;
        let source_column = resolve_storage_column(
            &source_column,
            &source_metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            &source_context,
        )?;
        let target_column = resolve_storage_column(
            &identity_binding.column,
            &metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            &context,
        )?;

        let pair = TriggerColumnMapping {
            source_column,
            target_column,
        };
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }

    Ok(PropagationReferrerTarget {
        referrer_table: referrer_root.table.clone(),
        referrer_document_id_column: binding.fk_column.clone(),
        identity_column_pairs: pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::test_support::{project, run_through};
    use serde_json::{json, Value};

    fn ed_org_member(name: &str, id_property: &str) -> Value {
        json!({
            "resourceName": name,
            "isSubclass": true,
            "superclassProjectName": "Ed-Fi",
            "superclassResourceName": "EducationOrganization",
            "superclassIdentityJsonPath": "$.educationOrganizationId",
            "identityJsonPaths": [format!("$.{}", id_property)],
            "documentPathsMapping": {
                "Id": { "isReference": false, "path": format!("$.{}", id_property) }
            },
            "jsonSchemaForInsert": {
                "type": "object",
                "properties": {
                    id_property: { "type": "integer" },
                    "addresses": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": { "city": { "type": "string", "maxLength": 30 } }
                        }
                    }
                },
                "required": [id_property]
            }
        })
    }

    fn course() -> Value {
        json!({
            "resourceName": "Course",
            "identityJsonPaths": ["$.courseCode", "$.educationOrganizationReference.educationOrganizationId"],
            "documentPathsMapping": {
                "CourseCode": { "isReference": false, "path": "$.courseCode" },
                "EducationOrganization": {
                    "isReference": true, "isRequired": true,
                    "projectName": "Ed-Fi", "resourceName": "EducationOrganization",
                    "referenceJsonPaths": [{
                        "identityJsonPath": "$.educationOrganizationId",
                        "referenceJsonPath": "$.educationOrganizationReference.educationOrganizationId"
                    }]
                }
            },
            "jsonSchemaForInsert": {
                "type": "object",
                "properties": {
                    "courseCode": { "type": "string", "maxLength": 60 },
                    "educationOrganizationReference": {
                        "type": "object",
                        "properties": { "educationOrganizationId": { "type": "integer" } },
                        "required": ["educationOrganizationId"]
                    }
                },
                "required": ["courseCode", "educationOrganizationReference"]
            }
        })
    }

    fn derive(dialect: SqlDialect) -> RelationalModelSetBuilderContext {
        let document = project(
            json!({
                "courses": course(),
                "schools": ed_org_member("School", "schoolId"),
                "localEducationAgencies": ed_org_member("LocalEducationAgency", "localEducationAgencyId")
            }),
            json!({
                "EducationOrganization": { "identityJsonPaths": ["$.educationOrganizationId"] }
            }),
        );
        run_through(&[document], dialect, "TriggerInventory").unwrap()
    }

    fn trigger<'a>(ctx: &'a RelationalModelSetBuilderContext, name: &str) -> &'a DbTriggerInfo {
        ctx.triggers
            .iter()
            .find(|t| t.name.as_str() == name)
            .unwrap_or_else(|| panic!("missing trigger {}", name))
    }

    #[test]
    fn test_stamp_triggers_cover_child_tables() {
        let ctx = derive(SqlDialect::Pgsql);
        let stamp = trigger(&ctx, "TR_SchoolAddress_Stamp");
        assert_eq!(stamp.key_columns, vec![DbColumnName::from("School_DocumentId")]);
        assert!(stamp.identity_projection_columns.is_empty());

        let root_stamp = trigger(&ctx, "TR_School_Stamp");
        assert_eq!(root_stamp.identity_projection_columns, vec![DbColumnName::from("SchoolId")]);
    }

    #[test]
    fn test_referential_identity_projects_reference_identity_parts() {
        let ctx = derive(SqlDialect::Pgsql);
        let course_trigger = trigger(&ctx, "TR_Course_ReferentialIdentity");
        assert_eq!(
            course_trigger.identity_projection_columns,
            vec![
                DbColumnName::from("CourseCode"),
                DbColumnName::from("EducationOrganization_EducationOrganizationId")
            ]
        );
        let key = ctx
            .resource_key(&QualifiedResourceName::new("Ed-Fi", "Course"))
            .unwrap()
            .resource_key_id;
        assert_eq!(
            course_trigger.kind,
            DbTriggerKind::ReferentialIdentityMaintenance { resource_key_id: key }
        );
    }

    #[test]
    fn test_subclass_maintains_abstract_identity() {
        let ctx = derive(SqlDialect::Pgsql);
        let school = trigger(&ctx, "TR_School_AbstractIdentity");
        match &school.kind {
            DbTriggerKind::AbstractIdentityMaintenance {
                target_table,
                target_column_mappings,
                discriminator_value,
            } => {
                assert_eq!(target_table.name, "EducationOrganizationIdentity");
                assert_eq!(
                    target_column_mappings,
                    &vec![TriggerColumnMapping {
                        source_column: DbColumnName::from("SchoolId"),
                        target_column: DbColumnName::from("EducationOrganizationId"),
                    }]
                );
                assert_eq!(discriminator_value, "Ed-Fi:School");
            }
            other => panic!("unexpected trigger kind {:?}", other),
        }
    }

    #[test]
    fn test_pgsql_has_no_propagation_triggers() {
        let ctx = derive(SqlDialect::Pgsql);
        assert!(!ctx
            .triggers
            .iter()
            .any(|t| matches!(t.kind, DbTriggerKind::IdentityPropagationFallback { .. })));
    }

    #[test]
    fn test_mssql_propagates_abstract_identity_to_referrers() {
        let ctx = derive(SqlDialect::Mssql);
        let propagate = trigger(&ctx, "TR_EducationOrganizationIdentity_PropagateIdentity");
        assert_eq!(
            propagate.identity_projection_columns,
            vec![DbColumnName::from("EducationOrganizationId")]
        );
        let DbTriggerKind::IdentityPropagationFallback { referrer_updates } = &propagate.kind else {
            panic!("unexpected trigger kind {:?}", propagate.kind);
        };
        assert_eq!(referrer_updates.len(), 1);
        assert_eq!(referrer_updates[0].referrer_table.name, "Course");
        assert_eq!(
            referrer_updates[0].referrer_document_id_column,
            DbColumnName::from("EducationOrganization_DocumentId")
        );
        assert_eq!(
            referrer_updates[0].identity_column_pairs,
            vec![TriggerColumnMapping {
                source_column: DbColumnName::from("EducationOrganizationId"),
                target_column: DbColumnName::from("EducationOrganization_EducationOrganizationId"),
            }]
        );
    }

    #[test]
    fn test_mssql_propagation_reads_unified_identity_from_storage() {
        let section = json!({
            "resourceName": "Section",
            "allowIdentityUpdates": true,
            "identityJsonPaths": ["$.schoolId"],
            "equalityConstraints": [
                { "sourceJsonPath": "$.schoolId", "targetJsonPath": "$.localSchoolId" }
            ],
            "documentPathsMapping": {
                "SchoolId": { "isReference": false, "path": "$.schoolId" }
            },
            "jsonSchemaForInsert": {
                "type": "object",
                "properties": {
                    "schoolId": { "type": "integer" },
                    "localSchoolId": { "type": "integer" }
                },
                "required": ["schoolId", "localSchoolId"]
            }
        });
        let attendance = json!({
            "resourceName": "SectionAttendance",
            "identityJsonPaths": ["$.sectionReference.schoolId"],
            "documentPathsMapping": {
                "Section": {
                    "isReference": true, "isRequired": true,
                    "projectName": "Ed-Fi", "resourceName": "Section",
                    "referenceJsonPaths": [
                        { "identityJsonPath": "$.schoolId", "referenceJsonPath": "$.sectionReference.schoolId" }
                    ]
                }
            },
            "jsonSchemaForInsert": {
                "type": "object",
                "properties": {
                    "sectionReference": {
                        "type": "object",
                        "properties": { "schoolId": { "type": "integer" } },
                        "required": ["schoolId"]
                    }
                },
                "required": ["sectionReference"]
            }
        });
        let document = project(
            json!({ "sections": section, "sectionAttendances": attendance }),
            json!({}),
        );
        let ctx = run_through(&[document], SqlDialect::Mssql, "TriggerInventory").unwrap();

        let section_root = ctx
            .concrete(&QualifiedResourceName::new("Ed-Fi", "Section"))
            .unwrap()
            .model
            .root();
        assert_eq!(section_root.key_unification_classes.len(), 1);
        let canonical = section_root.key_unification_classes[0].canonical_column.clone();
        assert!(section_root.column(&canonical).unwrap().is_stored());
        assert!(!section_root
            .column(&DbColumnName::from("SchoolId"))
            .unwrap()
            .is_stored());

        let propagate = trigger(&ctx, "TR_Section_PropagateIdentity");
        assert_eq!(propagate.identity_projection_columns, vec![canonical.clone()]);
        let DbTriggerKind::IdentityPropagationFallback { referrer_updates } = &propagate.kind else {
            panic!("unexpected trigger kind {:?}", propagate.kind);
        };
        assert_eq!(referrer_updates.len(), 1);
        assert_eq!(
            referrer_updates[0].identity_column_pairs,
            vec![TriggerColumnMapping {
                source_column: canonical,
                target_column: DbColumnName::from("Section_SchoolId"),
            }]
        );
    }
}
