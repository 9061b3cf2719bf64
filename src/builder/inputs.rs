//! Per-resource input extraction
//!
//! Classifies the validated ApiSchema resource into the lookups the builder
//! and the set passes need (reference mappings, descriptor paths, decimal
//! validation info, name overrides) and checks cross-field consistency.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{RelSchemaError, Result};
use crate::model::{
    DbSchemaName, JsonPathExpression, JsonPathSegment, QualifiedResourceName,
};
use crate::naming::conventions::{normalize_schema_name, to_pascal_case};
use crate::schema::{
    DecimalPropertyValidationInfo, DocumentPathMapping, ProjectSchema, ReferenceJsonPath,
    ResourceSchema,
};

/// A document reference declared in `documentPathsMapping`
#[derive(Debug, Clone)]
pub struct ReferenceMapping {
    pub mapping_key: String,
    pub target_resource: QualifiedResourceName,
    pub is_required: bool,
    pub is_part_of_identity: bool,
    /// Common parent of every `referenceJsonPath`, e.g. `$.schoolReference`
    pub reference_object_path: JsonPathExpression,
    pub reference_json_paths: Vec<ReferenceJsonPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOverrideKind {
    Column,
    Collection,
}

#[derive(Debug, Clone)]
pub struct NameOverride {
    pub kind: NameOverrideKind,
    pub name: String,
}

/// Everything the builder and set passes read about one resource
#[derive(Debug, Clone)]
pub struct ResourceInputs {
    pub schema: ResourceSchema,
    pub project_endpoint_name: String,
    pub physical_schema: DbSchemaName,
    pub root_base_name: String,
    pub reference_mappings: Vec<ReferenceMapping>,
    pub descriptor_paths: BTreeMap<JsonPathExpression, QualifiedResourceName>,
    pub decimal_infos: BTreeMap<JsonPathExpression, DecimalPropertyValidationInfo>,
    pub name_overrides: BTreeMap<JsonPathExpression, NameOverride>,
}

impl ResourceInputs {
    pub fn resource(&self) -> &QualifiedResourceName {
        &self.schema.resource
    }

    pub fn is_identity_path(&self, path: &JsonPathExpression) -> bool {
        self.schema.identity_json_paths.contains(path)
    }

    pub fn name_override(&self, path: &JsonPathExpression, kind: NameOverrideKind) -> Option<&str> {
        self.name_overrides
            .get(path)
            .filter(|o| o.kind == kind)
            .map(|o| o.name.as_str())
    }

    /// Reference mapping whose `referenceJsonPaths` include `path`.
    pub fn reference_for_path(
        &self,
        path: &JsonPathExpression,
    ) -> Option<(&ReferenceMapping, &ReferenceJsonPath)> {
        self.reference_mappings.iter().find_map(|mapping| {
            mapping
                .reference_json_paths
                .iter()
                .find(|p| &p.reference_json_path == path)
                .map(|p| (mapping, p))
        })
    }

    pub fn reference_by_object_path(&self, path: &JsonPathExpression) -> Option<&ReferenceMapping> {
        self.reference_mappings
            .iter()
            .find(|m| &m.reference_object_path == path)
    }

    pub fn is_subclass(&self) -> bool {
        self.schema.superclass.is_some()
    }

    /// Extract and validate inputs for one resource of a project.
    pub fn extract(project: &ProjectSchema, schema: &ResourceSchema) -> Result<Self> {
        let resource = &schema.resource;

        let mut reference_mappings = Vec::new();
        let mut descriptor_paths = BTreeMap::new();
        let mut mapped_paths = BTreeSet::new();

        for (key, mapping) in &schema.document_paths_mapping {
            match mapping {
                DocumentPathMapping::Scalar { path } => {
                    if let Some(path) = path {
                        mapped_paths.insert(path.clone());
                    }
                }
                DocumentPathMapping::Descriptor {
                    path,
                    descriptor_resource,
                } => {
                    mapped_paths.insert(path.clone());
                    descriptor_paths.insert(path.clone(), descriptor_resource.clone());
                }
                DocumentPathMapping::Reference {
                    target_resource,
                    is_required,
                    reference_json_paths,
                } => {
                    let reference = build_reference_mapping(
                        schema,
                        key,
                        target_resource,
                        *is_required,
                        reference_json_paths,
                    )?;
                    mapped_paths.extend(
                        reference
                            .reference_json_paths
                            .iter()
                            .map(|p| p.reference_json_path.clone()),
                    );
                    reference_mappings.push(reference);
                }
            }
        }

        let missing_identity = schema
            .identity_json_paths
            .iter()
            .filter(|path| !mapped_paths.contains(*path))
            .map(|path| path.canonical().to_string())
            .collect::<Vec<_>>();
        if !missing_identity.is_empty() {
            return Err(RelSchemaError::schema_input(format!(
                "identityJsonPaths on resource '{}' were not found in documentPathsMapping: {}",
                resource,
                missing_identity.join(", ")
            )));
        }

        let mut decimal_infos = BTreeMap::new();
        for info in &schema.decimal_property_validation_infos {
            if decimal_infos.insert(info.path.clone(), info.clone()).is_some() {
                return Err(RelSchemaError::schema_input(format!(
                    "Duplicate decimalPropertyValidationInfos path '{}' on resource '{}'.",
                    info.path, resource
                )));
            }
        }

        let name_overrides = build_name_overrides(schema, &reference_mappings)?;

        let root_base_name = match &schema.relational.root_table_name_override {
            Some(name) => to_pascal_case(name),
            None => to_pascal_case(&resource.resource_name),
        };

        Ok(Self {
            schema: schema.clone(),
            project_endpoint_name: project.project_endpoint_name.clone(),
            physical_schema: normalize_schema_name(&project.project_endpoint_name),
            root_base_name,
            reference_mappings,
            descriptor_paths,
            decimal_infos,
            name_overrides,
        })
    }
}

fn build_reference_mapping(
    schema: &ResourceSchema,
    key: &str,
    target_resource: &QualifiedResourceName,
    is_required: bool,
    reference_json_paths: &[ReferenceJsonPath],
) -> Result<ReferenceMapping> {
    let resource = &schema.resource;

    let mut object_paths = reference_json_paths
        .iter()
        .map(|p| {
            match p.reference_json_path.segments().last() {
                Some(JsonPathSegment::Property(_)) => Ok(p.reference_json_path.parent()),
                _ => Err(RelSchemaError::schema_input(format!(
                    "Reference mapping '{}' on resource '{}' has referenceJsonPath '{}' that does not end in a property.",
                    key, resource, p.reference_json_path
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    object_paths.sort();
    object_paths.dedup();

    let reference_object_path = match object_paths.as_slice() {
        [single] => single.clone(),
        _ => {
            return Err(RelSchemaError::schema_input(format!(
                "Reference mapping '{}' on resource '{}' has inconsistent reference object paths: {}",
                key,
                resource,
                object_paths
                    .iter()
                    .map(|p| p.canonical())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    };

    let mut seen_identity = BTreeSet::new();
    for path in reference_json_paths {
        if !seen_identity.insert(path.identity_json_path.clone()) {
            return Err(RelSchemaError::schema_input(format!(
                "Reference mapping '{}' on resource '{}' declares identityJsonPath '{}' more than once.",
                key, resource, path.identity_json_path
            )));
        }
    }

    let identity_flags = reference_json_paths
        .iter()
        .map(|p| schema.identity_json_paths.contains(&p.reference_json_path))
        .collect::<Vec<_>>();
    let is_part_of_identity = identity_flags.iter().any(|flag| *flag);

    if is_part_of_identity {
        if !identity_flags.iter().all(|flag| *flag) {
            return Err(RelSchemaError::schema_input(format!(
                "Reference mapping '{}' on resource '{}' is part of the identity but not every referenceJsonPath is an identity path.",
                key, resource
            )));
        }
        if !is_required {
            return Err(RelSchemaError::schema_input(format!(
                "Reference mapping '{}' on resource '{}' is part of the identity and must be required.",
                key, resource
            )));
        }
    }

    Ok(ReferenceMapping {
        mapping_key: key.to_string(),
        target_resource: target_resource.clone(),
        is_required,
        is_part_of_identity,
        reference_object_path,
        reference_json_paths: reference_json_paths.to_vec(),
    })
}

fn build_name_overrides(
    schema: &ResourceSchema,
    references: &[ReferenceMapping],
) -> Result<BTreeMap<JsonPathExpression, NameOverride>> {
    let resource = &schema.resource;
    let mut overrides = BTreeMap::new();

    for (path, raw_name) in &schema.relational.name_overrides {
        let name = to_pascal_case(raw_name);
        if name.is_empty() {
            return Err(RelSchemaError::schema_input(format!(
                "nameOverrides entry '{}' on resource '{}' normalizes to an empty name.",
                path, resource
            )));
        }

        for reference in references {
            let inside = path.starts_with(&reference.reference_object_path)
                && path != &reference.reference_object_path;
            let is_identity_part = reference
                .reference_json_paths
                .iter()
                .any(|p| &p.reference_json_path == path);
            if inside && !is_identity_part {
                return Err(RelSchemaError::schema_input(format!(
                    "nameOverrides entry '{}' on resource '{}' is inside reference object '{}'; only reference identity paths may be overridden there.",
                    path, resource, reference.reference_object_path
                )));
            }
        }

        let kind = if path.ends_with_wildcard() {
            NameOverrideKind::Collection
        } else {
            NameOverrideKind::Column
        };

        overrides.insert(path.clone(), NameOverride { kind, name });
    }

    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ApiSchemaDocument;
    use serde_json::{json, Value};

    fn extract(resource: Value) -> Result<ResourceInputs> {
        let document = ApiSchemaDocument::from_value(json!({
            "projectSchema": {
                "projectName": "Ed-Fi",
                "projectEndpointName": "ed-fi",
                "resourceSchemas": { "things": resource }
            }
        }))?;
        let project = &document.project;
        ResourceInputs::extract(project, &project.resources[0])
    }

    fn base_resource() -> Value {
        json!({
            "resourceName": "Section",
            "identityJsonPaths": ["$.sectionIdentifier", "$.courseOfferingReference.schoolId"],
            "documentPathsMapping": {
                "SectionIdentifier": { "isReference": false, "path": "$.sectionIdentifier" },
                "CourseOffering": {
                    "isReference": true,
                    "projectName": "Ed-Fi",
                    "resourceName": "CourseOffering",
                    "isRequired": true,
                    "referenceJsonPaths": [
                        { "identityJsonPath": "$.schoolReference.schoolId",
                          "referenceJsonPath": "$.courseOfferingReference.schoolId" },
                        { "identityJsonPath": "$.localCourseCode",
                          "referenceJsonPath": "$.courseOfferingReference.localCourseCode" }
                    ]
                }
            },
            "jsonSchemaForInsert": { "type": "object", "properties": {} }
        })
    }

    #[test]
    fn test_partial_identity_reference_is_rejected() {
        let error = extract(base_resource()).unwrap_err();
        assert!(error.to_string().contains("not every referenceJsonPath"));
    }

    #[test]
    fn test_reference_object_path_and_identity_flag() {
        let mut resource = base_resource();
        resource["identityJsonPaths"] = json!([
            "$.sectionIdentifier",
            "$.courseOfferingReference.schoolId",
            "$.courseOfferingReference.localCourseCode"
        ]);
        let inputs = extract(resource).unwrap();
        let mapping = &inputs.reference_mappings[0];
        assert_eq!(mapping.reference_object_path.canonical(), "$.courseOfferingReference");
        assert!(mapping.is_part_of_identity);
        assert_eq!(inputs.physical_schema.as_str(), "edfi");
        assert_eq!(inputs.root_base_name, "Section");
    }

    #[test]
    fn test_unmapped_identity_path_is_rejected() {
        let mut resource = base_resource();
        resource["identityJsonPaths"] = json!(["$.missing"]);
        let error = extract(resource).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Invalid ApiSchema input: identityJsonPaths on resource 'Ed-Fi:Section' were not found in documentPathsMapping: $.missing"
        );
    }

    #[test]
    fn test_override_inside_reference_object_is_rejected() {
        let mut resource = base_resource();
        resource["identityJsonPaths"] = json!(["$.sectionIdentifier"]);
        resource["documentPathsMapping"]["CourseOffering"]["isRequired"] = json!(false);
        resource["relational"] = json!({ "nameOverrides": { "$.courseOfferingReference.link": "L" } });
        let error = extract(resource).unwrap_err();
        assert!(error.to_string().contains("only reference identity paths"));
    }

    #[test]
    fn test_inconsistent_reference_object_paths() {
        let mut resource = base_resource();
        resource["identityJsonPaths"] = json!(["$.sectionIdentifier"]);
        resource["documentPathsMapping"]["CourseOffering"]["referenceJsonPaths"][1]["referenceJsonPath"] =
            json!("$.otherReference.localCourseCode");
        let error = extract(resource).unwrap_err();
        assert!(error.to_string().contains("inconsistent reference object paths"));
    }
}
