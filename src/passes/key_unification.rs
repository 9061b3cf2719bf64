//! Key unification
//!
//! Equality constraints declare that two JSON paths of one document always
//! carry the same value. Same-table endpoints are merged into connected
//! components; each component gets one canonical stored column and every
//! member becomes a `UnifiedAlias` of it, gated by a presence column when the
//! member is optional.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::SetPass;
use crate::builder::RelationalModelSetBuilderContext;
use crate::error::{RelSchemaError, Result};
use crate::model::{
    ColumnKind, ColumnStorage, DbColumnModel, DbColumnName, DbTableModel,
    DocumentReferenceBinding, EqualityConstraintDiagnostic, EqualityConstraintOutcome,
    JsonPathExpression, JsonPathSegment, KeyUnificationClass, QualifiedResourceName,
    RelationalResourceModel, RelationalScalarType, ScalarKind, TableConstraint,
};
use crate::naming::constraint_naming::null_or_true_name;
use crate::naming::conventions::{singularize, to_pascal_case};
use crate::schema::EqualityConstraint;
use crate::util::hash8;

const CANONICAL_NAME_SALT: &str = "key-unification-canonical-name:v1";
const PRESENCE_NAME_SALT: &str = "key-unification-presence-name:v1";

pub struct KeyUnificationPass;

impl SetPass for KeyUnificationPass {
    fn name(&self) -> &'static str {
        "KeyUnification"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        for entry in ctx.concrete_resources.iter_mut() {
            if entry.model.is_descriptor_storage() {
                continue;
            }
            let constraints = dedupe_undirected(&entry.inputs.schema.equality_constraints);
            if constraints.is_empty() {
                continue;
            }
            apply_key_unification(&mut entry.model, &constraints)?;
        }
        Ok(())
    }
}

/// Drop constraints that repeat an earlier pair in either direction.
fn dedupe_undirected(constraints: &[EqualityConstraint]) -> Vec<(JsonPathExpression, JsonPathExpression)> {
    let mut seen = BTreeSet::new();
    let mut result = Vec::with_capacity(constraints.len());
    for constraint in constraints {
        let source = constraint.source_json_path.clone();
        let target = constraint.target_json_path.clone();
        let key = if source <= target {
            (source.clone(), target.clone())
        } else {
            (target.clone(), source.clone())
        };
        if seen.insert(key) {
            result.push((source, target));
        }
    }
    result
}

/// A column bound to a JSON path, located by table index
#[derive(Debug, Clone)]
struct BoundColumn {
    table_index: usize,
    column: DbColumnModel,
}

fn describe_candidate(model: &RelationalResourceModel, candidate: &BoundColumn) -> String {
    let table = &model.tables_in_dependency_order[candidate.table_index];
    format!(
        "{}[{}].{}",
        table.table, table.json_scope, candidate.column.column_name
    )
}

fn resolve_candidates(
    model: &RelationalResourceModel,
    path: &JsonPathExpression,
) -> Result<Vec<BoundColumn>> {
    let mut candidates = model
        .tables_in_dependency_order
        .iter()
        .enumerate()
        .flat_map(|(table_index, table)| {
            table
                .columns
                .iter()
                .filter(|c| c.source_json_path.as_ref() == Some(path))
                .map(move |column| BoundColumn {
                    table_index,
                    column: column.clone(),
                })
        })
        .collect::<Vec<_>>();

    if candidates.is_empty() {
        return Err(RelSchemaError::invariant(format!(
            "Equality constraint endpoint '{}' on resource '{}' was not bound to any column.",
            path, model.resource
        )));
    }

    candidates.sort_by(|a, b| {
        let ta = &model.tables_in_dependency_order[a.table_index];
        let tb = &model.tables_in_dependency_order[b.table_index];
        ta.table
            .cmp(&tb.table)
            .then_with(|| ta.json_scope.cmp(&tb.json_scope))
            .then_with(|| a.column.column_name.cmp(&b.column.column_name))
    });
    Ok(candidates)
}

fn ambiguous_endpoint(
    model: &RelationalResourceModel,
    path: &JsonPathExpression,
    candidates: &[BoundColumn],
) -> RelSchemaError {
    let details = candidates
        .iter()
        .map(|c| describe_candidate(model, c))
        .collect::<Vec<_>>()
        .join(", ");
    RelSchemaError::invariant(format!(
        "Equality constraint endpoint '{}' on resource '{}' resolved to multiple distinct bindings: {}.",
        path, model.resource, details
    ))
}

fn endpoint_table(
    model: &RelationalResourceModel,
    path: &JsonPathExpression,
    candidates: &[BoundColumn],
) -> Result<usize> {
    let tables = candidates.iter().map(|c| c.table_index).collect::<BTreeSet<_>>();
    match tables.into_iter().collect::<Vec<_>>().as_slice() {
        [single] => Ok(*single),
        _ => Err(ambiguous_endpoint(model, path, candidates)),
    }
}

fn ensure_supported_kind(
    model: &RelationalResourceModel,
    path: &JsonPathExpression,
    endpoint: &BoundColumn,
) -> Result<()> {
    if matches!(endpoint.column.kind, ColumnKind::Scalar | ColumnKind::DescriptorFk) {
        return Ok(());
    }
    Err(RelSchemaError::invariant(format!(
        "Equality constraint endpoint '{}' on resource '{}' resolved to unsupported column kind '{:?}' at '{}.{}'.",
        path,
        model.resource,
        endpoint.column.kind,
        model.tables_in_dependency_order[endpoint.table_index].table,
        endpoint.column.column_name
    )))
}

/// Disjoint sets keyed by column name; the ordinal-smaller root wins.
#[derive(Debug, Default)]
struct UnionFind {
    parent: BTreeMap<DbColumnName, DbColumnName>,
}

impl UnionFind {
    fn find(&mut self, key: &DbColumnName) -> DbColumnName {
        let mut root = key.clone();
        while let Some(parent) = self.parent.get(&root) {
            if parent == &root {
                break;
            }
            root = parent.clone();
        }

        let mut current = key.clone();
        while current != root {
            let next = self
                .parent
                .insert(current.clone(), root.clone())
                .unwrap_or_else(|| root.clone());
            current = next;
        }
        root
    }

    fn union(&mut self, left: &DbColumnName, right: &DbColumnName) {
        self.parent.entry(left.clone()).or_insert_with(|| left.clone());
        self.parent.entry(right.clone()).or_insert_with(|| right.clone());

        let left_root = self.find(left);
        let right_root = self.find(right);
        if left_root == right_root {
            return;
        }
        if left_root < right_root {
            self.parent.insert(right_root, left_root);
        } else {
            self.parent.insert(left_root, right_root);
        }
    }

    /// Components of two or more columns, members and components ordinal-sorted.
    fn components(&mut self) -> Vec<Vec<DbColumnName>> {
        let keys = self.parent.keys().cloned().collect::<Vec<_>>();
        let mut groups: BTreeMap<DbColumnName, Vec<DbColumnName>> = BTreeMap::new();
        for key in keys {
            let root = self.find(&key);
            groups.entry(root).or_default().push(key);
        }

        let mut components = groups
            .into_values()
            .filter(|members| members.len() > 1)
            .map(|mut members| {
                members.sort();
                members
            })
            .collect::<Vec<_>>();
        components.sort_by(|a, b| {
            a[0].cmp(&b[0])
                .then_with(|| a.len().cmp(&b.len()))
                .then_with(|| a.cmp(b))
        });
        components
    }
}

fn apply_key_unification(
    model: &mut RelationalResourceModel,
    constraints: &[(JsonPathExpression, JsonPathExpression)],
) -> Result<()> {
    let mut edges_by_table: BTreeMap<usize, UnionFind> = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for (source, target) in constraints {
        let left_candidates = resolve_candidates(model, source)?;
        let right_candidates = resolve_candidates(model, target)?;
        let left_table = endpoint_table(model, source, &left_candidates)?;
        let right_table = endpoint_table(model, target, &right_candidates)?;

        let left = &left_candidates[0];
        let right = &right_candidates[0];
        ensure_supported_kind(model, source, left)?;
        ensure_supported_kind(model, target, right)?;

        let (first, second) = if source <= target {
            (source.clone(), target.clone())
        } else {
            (target.clone(), source.clone())
        };
        let diagnostic = |outcome| EqualityConstraintDiagnostic {
            outcome,
            source_json_path: first.clone(),
            target_json_path: second.clone(),
        };

        if left_table != right_table {
            diagnostics.push(diagnostic(EqualityConstraintOutcome::IgnoredCrossTable));
            continue;
        }
        if left_candidates.len() != 1 {
            return Err(ambiguous_endpoint(model, source, &left_candidates));
        }
        if right_candidates.len() != 1 {
            return Err(ambiguous_endpoint(model, target, &right_candidates));
        }
        if left.column.column_name == right.column.column_name {
            diagnostics.push(diagnostic(EqualityConstraintOutcome::Redundant));
            continue;
        }

        edges_by_table
            .entry(left_table)
            .or_default()
            .union(&left.column.column_name, &right.column.column_name);
        diagnostics.push(diagnostic(EqualityConstraintOutcome::Applied));
    }

    let resource = model.resource.clone();
    let bindings = model.document_reference_bindings.clone();
    for (table_index, mut union_find) in edges_by_table {
        let table = &mut model.tables_in_dependency_order[table_index];
        let local_bindings = bindings
            .iter()
            .filter(|b| b.table == table.table)
            .collect::<Vec<_>>();
        unify_table(table, &resource, &local_bindings, union_find.components())?;
    }

    diagnostics.sort();
    model.equality_constraint_diagnostics = diagnostics;
    Ok(())
}

fn required_source_path<'a>(
    column: &'a DbColumnModel,
    resource: &QualifiedResourceName,
    table: &DbTableModel,
) -> Result<&'a JsonPathExpression> {
    column.source_json_path.as_ref().ok_or_else(|| {
        RelSchemaError::invariant(format!(
            "Key-unification member '{}' on resource '{}' table '{}' has no source JSON path.",
            column.column_name, resource, table.table
        ))
    })
}

fn unify_table(
    table: &mut DbTableModel,
    resource: &QualifiedResourceName,
    local_bindings: &[&DocumentReferenceBinding],
    components: Vec<Vec<DbColumnName>>,
) -> Result<()> {
    let binding_by_identity_path = local_bindings
        .iter()
        .flat_map(|binding| {
            binding
                .identity_bindings
                .iter()
                .map(move |identity| (identity.reference_json_path.clone(), *binding))
        })
        .collect::<BTreeMap<_, _>>();

    let mut existing_names = table
        .columns
        .iter()
        .map(|c| c.column_name.as_str().to_string())
        .collect::<BTreeSet<_>>();
    let mut synthetic_presence = Vec::new();
    let mut classes = Vec::new();

    for component in components {
        let mut members = component
            .iter()
            .map(|name| {
                table.column(name).cloned().ok_or_else(|| {
                    RelSchemaError::invariant(format!(
                        "Key-unification member column '{}' was not found on table '{}' for resource '{}'.",
                        name, table.table, resource
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut keyed = members
            .drain(..)
            .map(|m| Ok((required_source_path(&m, resource, table)?.clone(), m)))
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.column_name.cmp(&b.1.column_name)));
        let members = keyed.into_iter().map(|(_, m)| m).collect::<Vec<_>>();

        validate_members(&members, resource, table)?;

        let first = &members[0];
        let first_path = required_source_path(first, resource, table)?;
        let base_name = member_base_token(first_path, table, &binding_by_identity_path, resource)?;
        let canonical_name =
            allocate_canonical_name(&base_name, &members, &mut existing_names, resource, table)?;

        table.columns.push(DbColumnModel {
            column_name: canonical_name.clone(),
            kind: first.kind,
            scalar_type: first.scalar_type,
            is_nullable: members.iter().all(|m| m.is_nullable),
            source_json_path: None,
            target_resource: first.target_resource.clone(),
            storage: ColumnStorage::Stored,
        });

        for member in &members {
            let path = required_source_path(member, resource, table)?;
            let presence = if let Some(binding) = binding_by_identity_path.get(path) {
                Some(binding.fk_column.clone())
            } else if !member.is_nullable {
                None
            } else {
                let name = allocate_presence_name(&member.column_name, path, &mut existing_names);
                table.columns.push(DbColumnModel {
                    column_name: name.clone(),
                    kind: ColumnKind::Scalar,
                    scalar_type: Some(RelationalScalarType::of(ScalarKind::Boolean)),
                    is_nullable: true,
                    source_json_path: None,
                    target_resource: None,
                    storage: ColumnStorage::Stored,
                });
                synthetic_presence.push(name.clone());
                Some(name)
            };

            if let Some(column) = table.column_mut(&member.column_name) {
                column.storage = ColumnStorage::UnifiedAlias {
                    canonical_column: canonical_name.clone(),
                    presence_column: presence,
                };
            }
        }

        debug!(
            resource = %resource,
            table = %table.table,
            canonical = %canonical_name,
            members = members.len(),
            "unified key columns"
        );
        classes.push(KeyUnificationClass {
            canonical_column: canonical_name,
            member_path_columns: members.into_iter().map(|m| m.column_name).collect(),
        });
    }

    synthetic_presence.sort();
    for column in synthetic_presence {
        let name = null_or_true_name(&table.table, &column);
        if !table.has_constraint_named(&name) {
            table.constraints.push(TableConstraint::NullOrTrue { name, column });
        }
    }

    rewrite_foreign_keys(table, &classes);

    table.key_unification_classes.extend(classes);
    table
        .key_unification_classes
        .sort_by(|a, b| a.canonical_column.cmp(&b.canonical_column));
    Ok(())
}

/// Point any existing FK column that became an alias at its canonical column.
///
/// At this point in the pipeline only the Document and parent FKs exist.
/// Reference and descriptor FKs are built later from storage-resolved columns.
fn rewrite_foreign_keys(table: &mut DbTableModel, classes: &[KeyUnificationClass]) {
    let canonical_by_member = classes
        .iter()
        .flat_map(|class| {
            class
                .member_path_columns
                .iter()
                .map(move |member| (member.clone(), class.canonical_column.clone()))
        })
        .collect::<BTreeMap<_, _>>();

    for constraint in &mut table.constraints {
        if let TableConstraint::ForeignKey { columns, .. } = constraint {
            for column in columns.iter_mut() {
                if let Some(canonical) = canonical_by_member.get(column) {
                    *column = canonical.clone();
                }
            }
        }
    }
}

fn validate_members(
    members: &[DbColumnModel],
    resource: &QualifiedResourceName,
    table: &DbTableModel,
) -> Result<()> {
    let first = &members[0];
    let has_scalar = members.iter().any(|m| m.kind == ColumnKind::Scalar);
    let has_descriptor = members.iter().any(|m| m.kind == ColumnKind::DescriptorFk);

    if has_scalar && has_descriptor {
        return Err(RelSchemaError::invariant(format!(
            "Key unification on resource '{}' table '{}' cannot mix scalar and descriptor members: {}.",
            resource,
            table.table,
            members
                .iter()
                .map(|m| m.column_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    if has_scalar {
        if let Some(mismatch) = members.iter().skip(1).find(|m| m.scalar_type != first.scalar_type) {
            return Err(RelSchemaError::invariant(format!(
                "Key unification scalar type mismatch on resource '{}' table '{}': '{}' does not match '{}'.",
                resource, table.table, mismatch.column_name, first.column_name
            )));
        }
        return Ok(());
    }

    if let Some(missing) = members.iter().find(|m| m.target_resource.is_none()) {
        return Err(RelSchemaError::invariant(format!(
            "Key unification descriptor target resource is required on resource '{}' table '{}' for column '{}'.",
            resource, table.table, missing.column_name
        )));
    }
    if let Some(mismatch) = members
        .iter()
        .skip(1)
        .find(|m| m.target_resource != first.target_resource)
    {
        return Err(RelSchemaError::invariant(format!(
            "Key unification descriptor target mismatch on resource '{}' table '{}': '{}' does not match '{}'.",
            resource, table.table, mismatch.column_name, first.column_name
        )));
    }
    Ok(())
}

/// Base token from the member path relative to its reference object or table scope.
fn member_base_token(
    source_path: &JsonPathExpression,
    table: &DbTableModel,
    binding_by_identity_path: &BTreeMap<JsonPathExpression, &DocumentReferenceBinding>,
    resource: &QualifiedResourceName,
) -> Result<String> {
    let prefix = binding_by_identity_path
        .get(source_path)
        .map(|binding| &binding.reference_object_path)
        .unwrap_or(&table.json_scope);

    let relative = source_path.relative_to(prefix).ok_or_else(|| {
        RelSchemaError::invariant(format!(
            "Key-unification member path '{}' does not match expected prefix on resource '{}' table '{}'.",
            source_path, resource, table.table
        ))
    })?;

    if relative.iter().any(|s| matches!(s, JsonPathSegment::AnyArrayElement)) {
        return Err(RelSchemaError::invariant(format!(
            "Key-unification member path '{}' on resource '{}' contains unsupported wildcard segments.",
            source_path, resource
        )));
    }

    if !relative.is_empty() {
        return Ok(relative
            .iter()
            .filter_map(|segment| match segment {
                JsonPathSegment::Property(name) => Some(to_pascal_case(name)),
                JsonPathSegment::AnyArrayElement => None,
            })
            .collect());
    }

    prefix
        .last_property()
        .map(|name| to_pascal_case(&singularize(name)))
        .ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Unable to derive key-unification base token for path '{}' on resource '{}'.",
                source_path, resource
            ))
        })
}

fn allocate_with_fallback(
    initial: String,
    disambiguated: String,
    fallback: impl Fn(usize) -> String,
    existing: &mut BTreeSet<String>,
) -> Option<String> {
    if existing.insert(initial.clone()) {
        return Some(initial);
    }
    if existing.insert(disambiguated.clone()) {
        return Some(disambiguated);
    }
    let max_index = existing.len() + 2;
    (2..=max_index)
        .map(fallback)
        .find(|candidate| existing.insert(candidate.clone()))
}

fn allocate_canonical_name(
    base_name: &str,
    members: &[DbColumnModel],
    existing: &mut BTreeSet<String>,
    resource: &QualifiedResourceName,
    table: &DbTableModel,
) -> Result<DbColumnName> {
    let suffix = if members[0].kind == ColumnKind::DescriptorFk {
        "_Unified_DescriptorId"
    } else {
        "_Unified"
    };

    let mut paths = members
        .iter()
        .map(|m| required_source_path(m, resource, table).map(|p| p.canonical().to_string()))
        .collect::<Result<Vec<_>>>()?;
    paths.sort();
    let hash = hash8(&format!("{}\n{}", CANONICAL_NAME_SALT, paths.join("\n")));

    allocate_with_fallback(
        format!("{}{}", base_name, suffix),
        format!("{}_U{}{}", base_name, hash, suffix),
        |index| format!("{}_U{}_{}{}", base_name, hash, index, suffix),
        existing,
    )
    .map(DbColumnName::new)
    .ok_or_else(|| {
        RelSchemaError::invariant(format!(
            "Could not allocate unique canonical column name for base '{}' on table '{}'.",
            base_name, table.table
        ))
    })
}

fn allocate_presence_name(
    member: &DbColumnName,
    source_path: &JsonPathExpression,
    existing: &mut BTreeSet<String>,
) -> DbColumnName {
    let hash = hash8(&format!("{}\n{}", PRESENCE_NAME_SALT, source_path.canonical()));
    let name = allocate_with_fallback(
        format!("{}_Present", member),
        format!("{}_U{}_Present", member, hash),
        |index| format!("{}_U{}_{}_Present", member, hash, index),
        existing,
    );
    // The fallback range always exceeds the number of taken names.
    DbColumnName::new(name.unwrap_or_else(|| format!("{}_U{}_{}_Present", member, hash, existing.len() + 3)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::SqlDialect;
    use crate::passes::test_support::{project, run_through, simple_resource};
    use serde_json::{json, Value};

    fn course_offering_resource(equality_constraints: Value, session_required: bool) -> Value {
        let required = if session_required {
            json!(["localCourseCode", "schoolReference", "sessionReference"])
        } else {
            json!(["localCourseCode", "schoolReference"])
        };
        json!({
            "resourceName": "CourseOffering",
            "identityJsonPaths": ["$.localCourseCode", "$.schoolReference.schoolId"],
            "equalityConstraints": equality_constraints,
            "documentPathsMapping": {
                "LocalCourseCode": { "isReference": false, "path": "$.localCourseCode" },
                "School": {
                    "isReference": true, "isDescriptor": false, "isRequired": true,
                    "projectName": "Ed-Fi", "resourceName": "School",
                    "referenceJsonPaths": [
                        { "identityJsonPath": "$.schoolId", "referenceJsonPath": "$.schoolReference.schoolId" }
                    ]
                },
                "Session": {
                    "isReference": true, "isDescriptor": false, "isRequired": session_required,
                    "projectName": "Ed-Fi", "resourceName": "Session",
                    "referenceJsonPaths": [
                        { "identityJsonPath": "$.schoolId", "referenceJsonPath": "$.sessionReference.schoolId" },
                        { "identityJsonPath": "$.sessionName", "referenceJsonPath": "$.sessionReference.sessionName" }
                    ]
                }
            },
            "jsonSchemaForInsert": {
                "type": "object",
                "properties": {
                    "localCourseCode": { "type": "string", "maxLength": 60 },
                    "schoolReference": {
                        "type": "object",
                        "properties": { "schoolId": { "type": "integer" } },
                        "required": ["schoolId"]
                    },
                    "sessionReference": {
                        "type": "object",
                        "properties": {
                            "schoolId": { "type": "integer" },
                            "sessionName": { "type": "string", "maxLength": 60 }
                        },
                        "required": ["schoolId", "sessionName"]
                    }
                },
                "required": required
            }
        })
    }

    fn session_resource() -> Value {
        json!({
            "resourceName": "Session",
            "identityJsonPaths": ["$.schoolId", "$.sessionName"],
            "documentPathsMapping": {
                "SchoolId": { "isReference": false, "path": "$.schoolId" },
                "SessionName": { "isReference": false, "path": "$.sessionName" }
            },
            "jsonSchemaForInsert": {
                "type": "object",
                "properties": {
                    "schoolId": { "type": "integer" },
                    "sessionName": { "type": "string", "maxLength": 60 }
                },
                "required": ["schoolId", "sessionName"]
            }
        })
    }

    fn unify(course_offering: Value) -> Result<RelationalResourceModel> {
        let document = project(
            json!({
                "courseOfferings": course_offering,
                "schools": simple_resource("School", "schoolId"),
                "sessions": session_resource()
            }),
            json!({}),
        );
        let ctx = run_through(&[document], SqlDialect::Pgsql, "KeyUnification")?;
        Ok(ctx
            .concrete(&QualifiedResourceName::new("Ed-Fi", "CourseOffering"))
            .map(|e| e.model.clone())
            .unwrap())
    }

    #[test]
    fn test_reference_members_are_gated_by_reference_anchors() {
        let model = unify(course_offering_resource(
            json!([{ "sourceJsonPath": "$.schoolReference.schoolId", "targetJsonPath": "$.sessionReference.schoolId" }]),
            false,
        ))
        .unwrap();
        let root = model.root();

        let canonical = root.column(&DbColumnName::from("SchoolId_Unified")).unwrap();
        assert!(canonical.is_stored());
        assert!(!canonical.is_nullable, "School member is required");
        assert!(canonical.source_json_path.is_none());

        let session_school = root.column(&DbColumnName::from("Session_SchoolId")).unwrap();
        assert_eq!(
            session_school.storage,
            ColumnStorage::UnifiedAlias {
                canonical_column: DbColumnName::from("SchoolId_Unified"),
                presence_column: Some(DbColumnName::from("Session_DocumentId")),
            }
        );
        assert!(!root.columns.iter().any(|c| c.column_name.as_str().ends_with("_Present")));

        assert_eq!(root.key_unification_classes.len(), 1);
        assert_eq!(
            root.key_unification_classes[0].member_path_columns,
            vec![DbColumnName::from("School_SchoolId"), DbColumnName::from("Session_SchoolId")]
        );
        assert_eq!(
            model.equality_constraint_diagnostics[0].outcome,
            EqualityConstraintOutcome::Applied
        );
    }

    #[test]
    fn test_undirected_duplicates_are_applied_once() {
        let model = unify(course_offering_resource(
            json!([
                { "sourceJsonPath": "$.schoolReference.schoolId", "targetJsonPath": "$.sessionReference.schoolId" },
                { "sourceJsonPath": "$.sessionReference.schoolId", "targetJsonPath": "$.schoolReference.schoolId" }
            ]),
            true,
        ))
        .unwrap();
        assert_eq!(model.equality_constraint_diagnostics.len(), 1);
        assert_eq!(model.root().key_unification_classes.len(), 1);
    }

    #[test]
    fn test_redundant_constraint_is_diagnosed() {
        let model = unify(course_offering_resource(
            json!([{ "sourceJsonPath": "$.schoolReference.schoolId", "targetJsonPath": "$.schoolReference.schoolId" }]),
            true,
        ))
        .unwrap();
        assert_eq!(
            model.equality_constraint_diagnostics[0].outcome,
            EqualityConstraintOutcome::Redundant
        );
        assert!(model.root().key_unification_classes.is_empty());
    }

    #[test]
    fn test_unbound_endpoint_fails() {
        let error = unify(course_offering_resource(
            json!([{ "sourceJsonPath": "$.schoolReference.schoolId", "targetJsonPath": "$.nowhere" }]),
            true,
        ))
        .unwrap_err();
        assert!(error
            .to_string()
            .contains("Equality constraint endpoint '$.nowhere' on resource 'Ed-Fi:CourseOffering' was not bound to any column."));
    }

    #[test]
    fn test_scalar_type_mismatch_fails() {
        let error = unify(course_offering_resource(
            json!([{ "sourceJsonPath": "$.localCourseCode", "targetJsonPath": "$.schoolReference.schoolId" }]),
            true,
        ))
        .unwrap_err();
        assert!(error.to_string().contains("Key unification scalar type mismatch"));
    }

    #[test]
    fn test_optional_scalar_members_get_synthetic_presence() {
        let document = project(
            json!({
                "budgets": {
                    "resourceName": "Budget",
                    "identityJsonPaths": ["$.budgetId"],
                    "equalityConstraints": [
                        { "sourceJsonPath": "$.fiscalYear", "targetJsonPath": "$.localFiscalYear" }
                    ],
                    "documentPathsMapping": {
                        "BudgetId": { "isReference": false, "path": "$.budgetId" }
                    },
                    "jsonSchemaForInsert": {
                        "type": "object",
                        "properties": {
                            "budgetId": { "type": "integer" },
                            "fiscalYear": { "type": "integer" },
                            "localFiscalYear": { "type": "integer" }
                        },
                        "required": ["budgetId"]
                    }
                }
            }),
            json!({}),
        );
        let ctx = run_through(&[document], SqlDialect::Pgsql, "KeyUnification").unwrap();
        let root = ctx.concrete_resources[0].model.root().clone();

        let canonical = root.column(&DbColumnName::from("FiscalYear_Unified")).unwrap();
        assert!(canonical.is_nullable);
        assert!(root.column(&DbColumnName::from("FiscalYear_Present")).unwrap().is_synthetic_presence());
        assert!(root.column(&DbColumnName::from("LocalFiscalYear_Present")).is_some());
        assert!(root.has_constraint_named("CK_Budget_FiscalYear_Present_NullOrTrue"));
        assert!(root.has_constraint_named("CK_Budget_LocalFiscalYear_Present_NullOrTrue"));
    }

    #[test]
    fn test_canonical_name_collision_uses_hash() {
        let mut existing = BTreeSet::from(["SchoolId_Unified".to_string()]);
        let table = DbTableModel {
            table: crate::model::DbTableName::new(crate::model::DbSchemaName::from("edfi"), "T"),
            json_scope: JsonPathExpression::root(),
            key: crate::model::TableKey {
                constraint_name: "PK_T".to_string(),
                columns: Vec::new(),
            },
            columns: Vec::new(),
            constraints: Vec::new(),
            key_unification_classes: Vec::new(),
        };
        let member = DbColumnModel {
            column_name: DbColumnName::from("SchoolId"),
            kind: ColumnKind::Scalar,
            scalar_type: Some(RelationalScalarType::of(ScalarKind::Int32)),
            is_nullable: false,
            source_json_path: Some(JsonPathExpression::compile("$.schoolId").unwrap()),
            target_resource: None,
            storage: ColumnStorage::Stored,
        };
        let name = allocate_canonical_name(
            "SchoolId",
            &[member],
            &mut existing,
            &QualifiedResourceName::new("Ed-Fi", "T"),
            &table,
        )
        .unwrap();
        let expected_hash = hash8("key-unification-canonical-name:v1\n$.schoolId");
        assert_eq!(name.as_str(), format!("SchoolId_U{}_Unified", expected_hash));
    }

    #[test]
    fn test_scalar_and_descriptor_members_cannot_unify() {
        let table = DbTableModel {
            table: crate::model::DbTableName::new(crate::model::DbSchemaName::from("edfi"), "Grade"),
            json_scope: JsonPathExpression::root(),
            key: crate::model::TableKey {
                constraint_name: "PK_Grade".to_string(),
                columns: Vec::new(),
            },
            columns: Vec::new(),
            constraints: Vec::new(),
            key_unification_classes: Vec::new(),
        };
        let scalar = DbColumnModel {
            column_name: DbColumnName::from("GradeLevelCode"),
            kind: ColumnKind::Scalar,
            scalar_type: Some(RelationalScalarType::of(ScalarKind::Int64)),
            is_nullable: false,
            source_json_path: Some(JsonPathExpression::compile("$.gradeLevelCode").unwrap()),
            target_resource: None,
            storage: ColumnStorage::Stored,
        };
        let descriptor = DbColumnModel {
            column_name: DbColumnName::from("GradeLevelDescriptor_DescriptorId"),
            kind: ColumnKind::DescriptorFk,
            source_json_path: Some(JsonPathExpression::compile("$.gradeLevelDescriptor").unwrap()),
            target_resource: Some(QualifiedResourceName::new("Ed-Fi", "GradeLevelDescriptor")),
            ..scalar.clone()
        };

        // Same storage type, so only the kind differs
        let error = validate_members(
            &[scalar, descriptor],
            &QualifiedResourceName::new("Ed-Fi", "Grade"),
            &table,
        )
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invariant violation: Key unification on resource 'Ed-Fi:Grade' table 'edfi.Grade' cannot mix \
             scalar and descriptor members: GradeLevelCode, GradeLevelDescriptor_DescriptorId."
        );
    }

    #[test]
    fn test_union_find_prefers_ordinal_smaller_root() {
        let mut union_find = UnionFind::default();
        union_find.union(&DbColumnName::from("C"), &DbColumnName::from("B"));
        union_find.union(&DbColumnName::from("B"), &DbColumnName::from("A"));
        union_find.union(&DbColumnName::from("Y"), &DbColumnName::from("Z"));
        assert_eq!(union_find.find(&DbColumnName::from("C")).as_str(), "A");
        assert_eq!(
            union_find.components(),
            vec![
                vec![DbColumnName::from("A"), DbColumnName::from("B"), DbColumnName::from("C")],
                vec![DbColumnName::from("Y"), DbColumnName::from("Z")],
            ]
        );
    }
}
