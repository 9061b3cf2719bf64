//! Typed ApiSchema model
//!
//! Raw documents are deserialized into serde DTOs, then converted into a
//! validated model: every JSONPath is compiled, reference and descriptor
//! mappings are classified and the insert schema is parsed. Passes only ever
//! see the validated model.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::json_schema::JsonSchemaNode;
use crate::error::{RelSchemaError, Result};
use crate::model::{JsonPathExpression, QualifiedResourceName};

// ============================================================================
// Raw DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSchemaDto {
    project_schema: ProjectSchemaDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectSchemaDto {
    project_name: String,
    project_endpoint_name: String,
    #[serde(default)]
    is_extension_project: bool,
    #[serde(default)]
    resource_schemas: BTreeMap<String, Value>,
    #[serde(default)]
    abstract_resources: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSchemaDto {
    resource_name: String,
    #[serde(default)]
    is_descriptor: bool,
    #[serde(default)]
    is_subclass: bool,
    #[serde(default)]
    is_resource_extension: bool,
    #[serde(default)]
    allow_identity_updates: bool,
    superclass_project_name: Option<String>,
    superclass_resource_name: Option<String>,
    superclass_identity_json_path: Option<String>,
    #[serde(default)]
    identity_json_paths: Vec<String>,
    #[serde(default)]
    equality_constraints: Vec<EqualityConstraintDto>,
    #[serde(default)]
    array_uniqueness_constraints: Vec<ArrayUniquenessConstraintDto>,
    #[serde(default)]
    decimal_property_validation_infos: Vec<DecimalPropertyValidationInfoDto>,
    #[serde(default)]
    document_paths_mapping: BTreeMap<String, DocumentPathMappingDto>,
    json_schema_for_insert: Option<Value>,
    relational: Option<RelationalDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EqualityConstraintDto {
    source_json_path: String,
    target_json_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrayUniquenessConstraintDto {
    base_path: Option<String>,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    nested_constraints: Vec<ArrayUniquenessConstraintDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecimalPropertyValidationInfoDto {
    path: String,
    total_digits: Option<u32>,
    decimal_places: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentPathMappingDto {
    is_reference: bool,
    #[serde(default)]
    is_descriptor: bool,
    path: Option<String>,
    project_name: Option<String>,
    resource_name: Option<String>,
    #[serde(default)]
    is_required: bool,
    #[serde(default)]
    reference_json_paths: Vec<ReferenceJsonPathDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceJsonPathDto {
    identity_json_path: String,
    reference_json_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationalDto {
    root_table_name_override: Option<String>,
    #[serde(default)]
    name_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbstractResourceDto {
    #[serde(default)]
    identity_json_paths: Vec<String>,
}

// ============================================================================
// Validated model
// ============================================================================

/// One loaded ApiSchema document
#[derive(Debug, Clone)]
pub struct ApiSchemaDocument {
    pub project: ProjectSchema,
}

#[derive(Debug, Clone)]
pub struct ProjectSchema {
    pub project_name: String,
    pub project_endpoint_name: String,
    pub is_extension_project: bool,
    /// Ordered by endpoint name
    pub resources: Vec<ResourceSchema>,
    /// Ordered by resource name
    pub abstract_resources: Vec<AbstractResourceSchema>,
}

#[derive(Debug, Clone)]
pub struct AbstractResourceSchema {
    pub resource: QualifiedResourceName,
    pub identity_json_paths: Vec<JsonPathExpression>,
}

#[derive(Debug, Clone)]
pub struct SuperclassInfo {
    pub resource: QualifiedResourceName,
    /// Member identity path renamed to the superclass identity path
    pub identity_json_path: Option<JsonPathExpression>,
}

#[derive(Debug, Clone)]
pub struct EqualityConstraint {
    pub source_json_path: JsonPathExpression,
    pub target_json_path: JsonPathExpression,
}

#[derive(Debug, Clone)]
pub struct ArrayUniquenessConstraint {
    pub base_path: Option<JsonPathExpression>,
    pub paths: Vec<JsonPathExpression>,
    pub nested_constraints: Vec<ArrayUniquenessConstraint>,
}

#[derive(Debug, Clone)]
pub struct DecimalPropertyValidationInfo {
    pub path: JsonPathExpression,
    pub total_digits: Option<u32>,
    pub decimal_places: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ReferenceJsonPath {
    pub identity_json_path: JsonPathExpression,
    pub reference_json_path: JsonPathExpression,
}

/// Classified `documentPathsMapping` entry
#[derive(Debug, Clone)]
pub enum DocumentPathMapping {
    Scalar {
        path: Option<JsonPathExpression>,
    },
    Descriptor {
        path: JsonPathExpression,
        descriptor_resource: QualifiedResourceName,
    },
    Reference {
        target_resource: QualifiedResourceName,
        is_required: bool,
        reference_json_paths: Vec<ReferenceJsonPath>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RelationalOverrides {
    pub root_table_name_override: Option<String>,
    /// Ordered by canonical path
    pub name_overrides: Vec<(JsonPathExpression, String)>,
}

#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub endpoint_name: String,
    pub resource: QualifiedResourceName,
    pub is_descriptor: bool,
    pub is_resource_extension: bool,
    pub allow_identity_updates: bool,
    pub superclass: Option<SuperclassInfo>,
    pub identity_json_paths: Vec<JsonPathExpression>,
    pub equality_constraints: Vec<EqualityConstraint>,
    pub array_uniqueness_constraints: Vec<ArrayUniquenessConstraint>,
    pub decimal_property_validation_infos: Vec<DecimalPropertyValidationInfo>,
    /// Ordered by mapping key
    pub document_paths_mapping: Vec<(String, DocumentPathMapping)>,
    pub json_schema_for_insert: Option<JsonSchemaNode>,
    pub relational: RelationalOverrides,
}

impl ApiSchemaDocument {
    /// Build a validated document from parsed JSON.
    pub fn from_value(value: Value) -> Result<Self> {
        let dto: ApiSchemaDto = serde_json::from_value(value).map_err(|e| {
            RelSchemaError::schema_input(format!("projectSchema is malformed: {}", e))
        })?;
        let project = convert_project(dto.project_schema)?;
        Ok(Self { project })
    }
}

fn convert_project(dto: ProjectSchemaDto) -> Result<ProjectSchema> {
    if dto.project_name.trim().is_empty() {
        return Err(RelSchemaError::schema_input(
            "projectSchema.projectName must be a non-empty string.",
        ));
    }
    if dto.project_endpoint_name.trim().is_empty() {
        return Err(RelSchemaError::schema_input(format!(
            "projectSchema.projectEndpointName must be a non-empty string for project '{}'.",
            dto.project_name
        )));
    }

    let mut resources = Vec::with_capacity(dto.resource_schemas.len());
    for (endpoint_name, value) in dto.resource_schemas {
        let label = format!("{} resource endpoint '{}'", dto.project_name, endpoint_name);
        let resource_dto: ResourceSchemaDto = serde_json::from_value(value)
            .map_err(|e| RelSchemaError::schema_input(format!("{}: {}", label, e)))?;
        resources.push(convert_resource(
            &dto.project_name,
            endpoint_name,
            resource_dto,
        )?);
    }

    let mut abstract_resources = Vec::with_capacity(dto.abstract_resources.len());
    for (resource_name, value) in dto.abstract_resources {
        let resource = QualifiedResourceName::new(dto.project_name.clone(), resource_name);
        let abstract_dto: AbstractResourceDto = serde_json::from_value(value).map_err(|e| {
            RelSchemaError::schema_input(format!("abstract resource '{}': {}", resource, e))
        })?;
        let identity_json_paths = compile_all(&abstract_dto.identity_json_paths, &resource)?;
        abstract_resources.push(AbstractResourceSchema {
            resource,
            identity_json_paths,
        });
    }

    Ok(ProjectSchema {
        project_name: dto.project_name,
        project_endpoint_name: dto.project_endpoint_name,
        is_extension_project: dto.is_extension_project,
        resources,
        abstract_resources,
    })
}

fn compile(path: &str, resource: &QualifiedResourceName) -> Result<JsonPathExpression> {
    JsonPathExpression::compile(path).map_err(|e| {
        RelSchemaError::schema_input(format!("resource '{}': {}", resource, e))
    })
}

fn compile_all(paths: &[String], resource: &QualifiedResourceName) -> Result<Vec<JsonPathExpression>> {
    paths.iter().map(|path| compile(path, resource)).collect()
}

fn convert_resource(
    project_name: &str,
    endpoint_name: String,
    dto: ResourceSchemaDto,
) -> Result<ResourceSchema> {
    let resource = QualifiedResourceName::new(project_name, dto.resource_name.clone());

    let superclass = if dto.is_subclass {
        let superclass_project = dto.superclass_project_name.ok_or_else(|| {
            RelSchemaError::schema_input(format!(
                "resource '{}': superclassProjectName is required when isSubclass is true.",
                resource
            ))
        })?;
        let superclass_resource = dto.superclass_resource_name.ok_or_else(|| {
            RelSchemaError::schema_input(format!(
                "resource '{}': superclassResourceName is required when isSubclass is true.",
                resource
            ))
        })?;
        let identity_json_path = dto
            .superclass_identity_json_path
            .as_deref()
            .map(|path| compile(path, &resource))
            .transpose()?;
        Some(SuperclassInfo {
            resource: QualifiedResourceName::new(superclass_project, superclass_resource),
            identity_json_path,
        })
    } else {
        None
    };

    let equality_constraints = dto
        .equality_constraints
        .iter()
        .map(|c| {
            Ok(EqualityConstraint {
                source_json_path: compile(&c.source_json_path, &resource)?,
                target_json_path: compile(&c.target_json_path, &resource)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let array_uniqueness_constraints = dto
        .array_uniqueness_constraints
        .iter()
        .map(|c| convert_array_uniqueness(c, &resource))
        .collect::<Result<Vec<_>>>()?;

    let decimal_property_validation_infos = dto
        .decimal_property_validation_infos
        .iter()
        .map(|info| {
            Ok(DecimalPropertyValidationInfo {
                path: compile(&info.path, &resource)?,
                total_digits: info.total_digits,
                decimal_places: info.decimal_places,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut document_paths_mapping = Vec::with_capacity(dto.document_paths_mapping.len());
    for (key, mapping) in &dto.document_paths_mapping {
        document_paths_mapping.push((
            key.clone(),
            convert_mapping(key, mapping, project_name, &resource)?,
        ));
    }

    let json_schema_for_insert = match (&dto.json_schema_for_insert, dto.is_descriptor) {
        (Some(value), _) => Some(JsonSchemaNode::parse(value, "$").map_err(|e| {
            RelSchemaError::schema_input(format!("resource '{}': {}", resource, e))
        })?),
        (None, true) => None,
        (None, false) => {
            return Err(RelSchemaError::schema_input(format!(
                "resource '{}': jsonSchemaForInsert is required.",
                resource
            )))
        }
    };

    let relational = match dto.relational {
        Some(relational) => {
            let mut name_overrides = relational
                .name_overrides
                .iter()
                .map(|(path, name)| Ok((compile(path, &resource)?, name.clone())))
                .collect::<Result<Vec<_>>>()?;
            name_overrides.sort_by(|a, b| a.0.cmp(&b.0));
            RelationalOverrides {
                root_table_name_override: relational
                    .root_table_name_override
                    .filter(|name| !name.trim().is_empty()),
                name_overrides,
            }
        }
        None => RelationalOverrides::default(),
    };

    Ok(ResourceSchema {
        endpoint_name,
        identity_json_paths: compile_all(&dto.identity_json_paths, &resource)?,
        resource,
        is_descriptor: dto.is_descriptor,
        is_resource_extension: dto.is_resource_extension,
        allow_identity_updates: dto.allow_identity_updates,
        superclass,
        equality_constraints,
        array_uniqueness_constraints,
        decimal_property_validation_infos,
        document_paths_mapping,
        json_schema_for_insert,
        relational,
    })
}

fn convert_array_uniqueness(
    dto: &ArrayUniquenessConstraintDto,
    resource: &QualifiedResourceName,
) -> Result<ArrayUniquenessConstraint> {
    Ok(ArrayUniquenessConstraint {
        base_path: dto
            .base_path
            .as_deref()
            .map(|path| compile(path, resource))
            .transpose()?,
        paths: compile_all(&dto.paths, resource)?,
        nested_constraints: dto
            .nested_constraints
            .iter()
            .map(|nested| convert_array_uniqueness(nested, resource))
            .collect::<Result<Vec<_>>>()?,
    })
}

fn convert_mapping(
    key: &str,
    dto: &DocumentPathMappingDto,
    default_project: &str,
    resource: &QualifiedResourceName,
) -> Result<DocumentPathMapping> {
    let missing = |field: &str| {
        RelSchemaError::schema_input(format!(
            "resource '{}': documentPathsMapping '{}' is missing {}.",
            resource, key, field
        ))
    };

    if !dto.is_reference {
        return Ok(DocumentPathMapping::Scalar {
            path: dto
                .path
                .as_deref()
                .map(|path| compile(path, resource))
                .transpose()?,
        });
    }

    let target = QualifiedResourceName::new(
        dto.project_name
            .clone()
            .unwrap_or_else(|| default_project.to_string()),
        dto.resource_name
            .clone()
            .ok_or_else(|| missing("resourceName"))?,
    );

    if dto.is_descriptor {
        let path = dto.path.as_deref().ok_or_else(|| missing("path"))?;
        return Ok(DocumentPathMapping::Descriptor {
            path: compile(path, resource)?,
            descriptor_resource: target,
        });
    }

    if dto.reference_json_paths.is_empty() {
        return Err(missing("referenceJsonPaths"));
    }

    let reference_json_paths = dto
        .reference_json_paths
        .iter()
        .map(|pair| {
            Ok(ReferenceJsonPath {
                identity_json_path: compile(&pair.identity_json_path, resource)?,
                reference_json_path: compile(&pair.reference_json_path, resource)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DocumentPathMapping::Reference {
        target_resource: target,
        is_required: dto.is_required,
        reference_json_paths,
    })
}
