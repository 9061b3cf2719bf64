//! Abstract identity tables and union views
//!
//! Every abstract resource gets a `{Base}Identity` table holding the document
//! id, the reconciled identity columns and a discriminator, plus a
//! `{Base}_View` that unions the concrete members' root tables.

use tracing::debug;

use super::unified_alias::{metadata_for, resolve_storage_column, PresenceGatePolicy};
use super::SetPass;
use crate::builder::{document_table, key_column_models, ConcreteResourceEntry, RelationalModelSetBuilderContext};
use crate::error::{RelSchemaError, Result};
use crate::model::{
    AbstractIdentityTableInfo, AbstractUnionViewArm, AbstractUnionViewInfo,
    AbstractUnionViewOutputColumn, AbstractUnionViewProjectionExpression, ColumnKind,
    ColumnStorage, DbColumnModel, DbColumnName, DbKeyColumn, DbTableModel, DbTableName,
    JsonPathExpression, JsonPathSegment, QualifiedResourceName, ReferentialAction,
    RelationalScalarType, ScalarKind, TableConstraint, TableKey,
};
use crate::naming::constraint_naming::{
    foreign_key_name, natural_key_unique_name, primary_key_name, reference_key_unique_name,
    DOCUMENT_TOKEN,
};
use crate::naming::conventions::{discriminator_column, document_id_column, to_pascal_case};

pub const DISCRIMINATOR_MAX_LENGTH: usize = 256;

pub struct AbstractIdentityPass;

impl SetPass for AbstractIdentityPass {
    fn name(&self) -> &'static str {
        "AbstractIdentity"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        validate_superclasses(ctx)?;

        let mut tables = Vec::with_capacity(ctx.abstract_resources.len());
        let mut views = Vec::with_capacity(ctx.abstract_resources.len());

        for abstract_resource in &ctx.abstract_resources {
            let resource = &abstract_resource.resource;
            let members = members_of(ctx, resource)?;

            let mut derivations = Vec::with_capacity(abstract_resource.identity_json_paths.len());
            for identity_path in &abstract_resource.identity_json_paths {
                derivations.push(derive_identity_column(ctx, resource, identity_path, &members)?);
            }

            let resource_key = ctx.resource_key(resource)?.clone();
            let table_name = DbTableName::new(
                abstract_resource.physical_schema.clone(),
                format!("{}Identity", abstract_resource.base_name),
            );
            let identity_columns = derivations
                .iter()
                .map(|d| d.column.column_name.clone())
                .collect::<Vec<_>>();

            let table = build_identity_table(&table_name, &derivations);
            debug!(
                resource = %resource,
                table = %table_name,
                members = members.len(),
                "derived abstract identity table"
            );

            let view_name = DbTableName::new(
                abstract_resource.physical_schema.clone(),
                format!("{}_View", abstract_resource.base_name),
            );
            let view = AbstractUnionViewInfo {
                abstract_resource_key: resource_key.clone(),
                view_name,
                output_columns_in_select_order: view_output_columns(&derivations),
                union_arms_in_order: union_arms(&derivations, &members)?,
            };

            tables.push(AbstractIdentityTableInfo {
                abstract_resource_key: resource_key,
                table,
                identity_columns,
            });
            views.push(view);
        }

        tables.sort_by(|a, b| a.table.table.cmp(&b.table.table));
        views.sort_by(|a, b| a.view_name.cmp(&b.view_name));
        ctx.abstract_identity_tables = tables;
        ctx.abstract_union_views = views;
        Ok(())
    }
}

fn validate_superclasses(ctx: &RelationalModelSetBuilderContext) -> Result<()> {
    for entry in &ctx.concrete_resources {
        if let Some(superclass) = &entry.inputs.schema.superclass {
            if !ctx.is_abstract(&superclass.resource) {
                return Err(RelSchemaError::invariant(format!(
                    "Subclass resource '{}' declares superclass '{}' that is not abstract. \
                     Subclass-of-subclass is not permitted.",
                    entry.model.resource, superclass.resource
                )));
            }
        }
    }
    Ok(())
}

/// Concrete members of an abstract resource ordered by resource name, then project.
fn members_of<'a>(
    ctx: &'a RelationalModelSetBuilderContext,
    abstract_resource: &QualifiedResourceName,
) -> Result<Vec<&'a ConcreteResourceEntry>> {
    let mut members = ctx
        .relational_resources()
        .filter(|entry| {
            entry
                .inputs
                .schema
                .superclass
                .as_ref()
                .is_some_and(|s| &s.resource == abstract_resource)
        })
        .collect::<Vec<_>>();

    if members.is_empty() {
        return Err(RelSchemaError::invariant(format!(
            "Abstract resource '{}' has no concrete members.",
            abstract_resource
        )));
    }

    members.sort_by(|a, b| {
        let (a, b) = (&a.model.resource, &b.model.resource);
        a.resource_name
            .cmp(&b.resource_name)
            .then_with(|| a.project_name.cmp(&b.project_name))
    });

    for pair in members.windows(2) {
        if pair[0].model.resource.resource_name == pair[1].model.resource.resource_name {
            return Err(RelSchemaError::invariant(format!(
                "Abstract resource '{}' has members '{}' and '{}' with the same resource name.",
                abstract_resource, pair[0].model.resource, pair[1].model.resource
            )));
        }
    }

    Ok(members)
}

/// Identity path on `member` that carries the abstract identity path.
pub fn map_identity_path_for_member(
    member: &ConcreteResourceEntry,
    abstract_identity_path: &JsonPathExpression,
    abstract_resource: &QualifiedResourceName,
) -> Result<JsonPathExpression> {
    let schema = &member.inputs.schema;
    let has_rename = schema
        .superclass
        .as_ref()
        .is_some_and(|s| s.identity_json_path.is_some());

    if has_rename {
        return match schema.identity_json_paths.as_slice() {
            [single] => Ok(single.clone()),
            paths => Err(RelSchemaError::invariant(format!(
                "Member '{}' has superclassIdentityJsonPath set but {} identity paths (expected exactly 1).",
                member.model.resource,
                paths.len()
            ))),
        };
    }

    schema
        .identity_json_paths
        .iter()
        .find(|path| *path == abstract_identity_path)
        .cloned()
        .ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Abstract identity path '{}' for resource '{}' was not found in identityJsonPaths for member '{}'.",
                abstract_identity_path, abstract_resource, member.model.resource
            ))
        })
}

/// Root column of `member` bound to `path`, required non-null and scalar-typed.
pub fn member_root_column<'a>(
    member: &'a ConcreteResourceEntry,
    path: &JsonPathExpression,
) -> Result<&'a DbColumnModel> {
    let root = member.model.root();
    let column = root
        .columns
        .iter()
        .find(|c| c.source_json_path.as_ref() == Some(path))
        .ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Identity path '{}' for member '{}' did not resolve to a root-column SourceJsonPath mapping on table '{}'.",
                path, member.model.resource, root.table
            ))
        })?;

    if column.is_nullable {
        return Err(RelSchemaError::invariant(format!(
            "Identity path '{}' resolved to nullable source column '{}' on resource '{}'.",
            path, column.column_name, member.model.resource
        )));
    }
    if column.scalar_type.is_none() {
        return Err(RelSchemaError::invariant(format!(
            "Identity path '{}' resolved to a non-scalar column on resource '{}'.",
            path, member.model.resource
        )));
    }
    Ok(column)
}

/// Kind, type and descriptor target of one identity column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSignature {
    pub kind: ColumnKind,
    pub scalar_type: RelationalScalarType,
    pub target_resource: Option<QualifiedResourceName>,
}

impl std::fmt::Display for ColumnSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, &self.target_resource) {
            (ColumnKind::DescriptorFk, Some(target)) => write!(f, "DescriptorFk:Descriptor({})", target),
            (ColumnKind::DescriptorFk, None) => write!(f, "DescriptorFk:Descriptor"),
            (ColumnKind::Scalar, _) => write!(f, "Scalar:{}", self.scalar_type),
            (kind, _) => write!(f, "{:?}:{:?}", kind, kind),
        }
    }
}

fn inconsistent_types(
    expected: &ColumnSignature,
    actual: &ColumnSignature,
    path: &JsonPathExpression,
    abstract_resource: &QualifiedResourceName,
    member: &QualifiedResourceName,
) -> RelSchemaError {
    RelSchemaError::invariant(format!(
        "Abstract identity path '{}' for resource '{}' has inconsistent column types. \
         Expected {} but member '{}' provides {}.",
        path, abstract_resource, expected, member, actual
    ))
}

fn decimal_parts(
    scalar: &RelationalScalarType,
    path: &JsonPathExpression,
    abstract_resource: &QualifiedResourceName,
) -> Result<(u32, u32)> {
    let (precision, scale) = scalar.decimal.ok_or_else(|| {
        RelSchemaError::invariant(format!(
            "Expected decimal type metadata for abstract identity path '{}' on resource '{}'.",
            path, abstract_resource
        ))
    })?;
    if scale > precision {
        return Err(RelSchemaError::constraint(format!(
            "Decimal type metadata is invalid for abstract identity path '{}' on resource '{}'. \
             Precision {} must be greater than or equal to scale {}.",
            path, abstract_resource, precision, scale
        )));
    }
    Ok((precision, scale))
}

/// Widen `current` so it can hold `member` as well.
pub fn reconcile_signatures(
    current: &ColumnSignature,
    member: &ColumnSignature,
    path: &JsonPathExpression,
    abstract_resource: &QualifiedResourceName,
    member_resource: &QualifiedResourceName,
) -> Result<ColumnSignature> {
    let mismatch = || inconsistent_types(current, member, path, abstract_resource, member_resource);

    if current.kind != member.kind || current.target_resource != member.target_resource {
        return Err(mismatch());
    }

    let (a, b) = (current.scalar_type, member.scalar_type);
    let scalar_type = match (a.kind, b.kind) {
        (ScalarKind::String, ScalarKind::String) => match (a.max_length, b.max_length) {
            (Some(x), Some(y)) => RelationalScalarType::string(Some(x.max(y))),
            _ => RelationalScalarType::string(None),
        },
        (ScalarKind::Decimal, ScalarKind::Decimal) => {
            let (ap, as_) = decimal_parts(&a, path, abstract_resource)?;
            let (bp, bs) = decimal_parts(&b, path, abstract_resource)?;
            let integer_digits = (ap - as_).max(bp - bs);
            let scale = as_.max(bs);
            RelationalScalarType::decimal(integer_digits + scale, scale)
        }
        (x, y) if x == y => a,
        (ScalarKind::Int32, ScalarKind::Int64) | (ScalarKind::Int64, ScalarKind::Int32) => {
            RelationalScalarType::of(ScalarKind::Int64)
        }
        _ => return Err(mismatch()),
    };

    Ok(ColumnSignature {
        scalar_type,
        ..current.clone()
    })
}

/// `$.educationOrganizationId` becomes `EducationOrganizationId`.
pub fn identity_part_base_name(path: &JsonPathExpression) -> Result<String> {
    let mut name = String::new();
    for segment in path.segments() {
        match segment {
            JsonPathSegment::Property(property) => name.push_str(&to_pascal_case(property)),
            JsonPathSegment::AnyArrayElement => {
                return Err(RelSchemaError::invariant(format!(
                    "Identity path '{}' must not include array segments.",
                    path
                )))
            }
        }
    }
    if name.is_empty() {
        return Err(RelSchemaError::invariant(format!(
            "Identity path '{}' must include at least one property segment.",
            path
        )));
    }
    Ok(name)
}

/// One abstract identity column and the member columns feeding it
struct IdentityColumnDerivation {
    column: DbColumnModel,
    /// Stored member column and its own scalar type, in member order
    member_sources: Vec<(DbColumnName, RelationalScalarType)>,
}

fn derive_identity_column(
    ctx: &RelationalModelSetBuilderContext,
    abstract_resource: &QualifiedResourceName,
    identity_path: &JsonPathExpression,
    members: &[&ConcreteResourceEntry],
) -> Result<IdentityColumnDerivation> {
    let mut signature: Option<ColumnSignature> = None;
    let mut member_sources = Vec::with_capacity(members.len());

    for member in members {
        let mapped = map_identity_path_for_member(member, identity_path, abstract_resource)?;
        let column = member_root_column(member, &mapped)?;
        let scalar_type = column.scalar_type.ok_or_else(|| {
            RelSchemaError::invariant(format!(
                "Identity column '{}' is missing a scalar type.",
                column.column_name
            ))
        })?;
        let member_signature = ColumnSignature {
            kind: column.kind,
            scalar_type,
            target_resource: column.target_resource.clone(),
        };

        signature = Some(match signature {
            None => member_signature,
            Some(current) => reconcile_signatures(
                &current,
                &member_signature,
                identity_path,
                abstract_resource,
                &member.model.resource,
            )?,
        });

        let metadata = metadata_for(&ctx.storage_metadata, member.model.root())?;
        let storage = resolve_storage_column(
            &column.column_name,
            &metadata,
            PresenceGatePolicy::RejectSyntheticScalarPresence,
            &format!("Abstract identity '{}'", abstract_resource),
        )?;
        member_sources.push((storage, scalar_type));
    }

    let signature = signature.ok_or_else(|| {
        RelSchemaError::invariant(format!(
            "Abstract identity path '{}' for resource '{}' did not resolve a column signature.",
            identity_path, abstract_resource
        ))
    })?;

    Ok(IdentityColumnDerivation {
        column: DbColumnModel {
            column_name: DbColumnName::new(identity_part_base_name(identity_path)?),
            kind: signature.kind,
            scalar_type: Some(signature.scalar_type),
            is_nullable: false,
            source_json_path: Some(identity_path.clone()),
            target_resource: signature.target_resource,
            storage: ColumnStorage::Stored,
        },
        member_sources,
    })
}

fn discriminator_model() -> DbColumnModel {
    DbColumnModel {
        column_name: discriminator_column(),
        kind: ColumnKind::Scalar,
        scalar_type: Some(RelationalScalarType::string(Some(DISCRIMINATOR_MAX_LENGTH as u32))),
        is_nullable: false,
        source_json_path: None,
        target_resource: None,
        storage: ColumnStorage::Stored,
    }
}

fn build_identity_table(table_name: &DbTableName, derivations: &[IdentityColumnDerivation]) -> DbTableModel {
    let key = TableKey {
        constraint_name: primary_key_name(table_name),
        columns: vec![DbKeyColumn {
            column_name: document_id_column(),
            kind: ColumnKind::ParentKeyPart,
        }],
    };

    let mut columns = key_column_models(&key);
    columns.extend(derivations.iter().map(|d| d.column.clone()));
    columns.push(discriminator_model());

    let natural_key = derivations
        .iter()
        .map(|d| d.column.column_name.clone())
        .collect::<Vec<_>>();

    let mut constraints = Vec::new();
    if !natural_key.is_empty() {
        let mut reference_key = vec![document_id_column()];
        reference_key.extend(natural_key.iter().cloned());
        constraints.push(TableConstraint::Unique {
            name: natural_key_unique_name(table_name),
            columns: natural_key,
        });
        constraints.push(TableConstraint::Unique {
            name: reference_key_unique_name(table_name),
            columns: reference_key,
        });
    }
    constraints.push(TableConstraint::ForeignKey {
        name: foreign_key_name(table_name, &[DOCUMENT_TOKEN]),
        columns: vec![document_id_column()],
        target_table: document_table(),
        target_columns: vec![document_id_column()],
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::NoAction,
    });

    DbTableModel {
        table: table_name.clone(),
        json_scope: JsonPathExpression::root(),
        key,
        columns,
        constraints,
        key_unification_classes: Vec::new(),
    }
}

fn view_output_columns(derivations: &[IdentityColumnDerivation]) -> Vec<AbstractUnionViewOutputColumn> {
    let mut columns = vec![AbstractUnionViewOutputColumn {
        column_name: document_id_column(),
        scalar_type: RelationalScalarType::of(ScalarKind::Int64),
        source_json_path: None,
        target_resource: None,
    }];
    for derivation in derivations {
        let column = &derivation.column;
        columns.push(AbstractUnionViewOutputColumn {
            column_name: column.column_name.clone(),
            scalar_type: column
                .scalar_type
                .unwrap_or_else(|| RelationalScalarType::of(ScalarKind::Int64)),
            source_json_path: column.source_json_path.clone(),
            target_resource: column.target_resource.clone(),
        });
    }
    columns.push(AbstractUnionViewOutputColumn {
        column_name: discriminator_column(),
        scalar_type: RelationalScalarType::string(Some(DISCRIMINATOR_MAX_LENGTH as u32)),
        source_json_path: None,
        target_resource: None,
    });
    columns
}

/// `Project:Resource` discriminator of a concrete member.
pub fn discriminator_value(resource: &QualifiedResourceName) -> Result<String> {
    let value = resource.to_string();
    if value.chars().count() > DISCRIMINATOR_MAX_LENGTH {
        return Err(RelSchemaError::constraint(format!(
            "Discriminator value '{}' exceeds max length {} for resource '{}'.",
            value, DISCRIMINATOR_MAX_LENGTH, resource
        )));
    }
    Ok(value)
}

fn union_arms(
    derivations: &[IdentityColumnDerivation],
    members: &[&ConcreteResourceEntry],
) -> Result<Vec<AbstractUnionViewArm>> {
    let mut arms = Vec::with_capacity(members.len());

    for (index, member) in members.iter().enumerate() {
        let discriminator = discriminator_value(&member.model.resource)?;

        let mut projections = Vec::with_capacity(derivations.len() + 2);
        projections.push(AbstractUnionViewProjectionExpression::SourceColumn {
            column_name: document_id_column(),
            cast_to: None,
        });
        for derivation in derivations {
            let (source, source_type) = &derivation.member_sources[index];
            let canonical = derivation.column.scalar_type;
            projections.push(AbstractUnionViewProjectionExpression::SourceColumn {
                column_name: source.clone(),
                cast_to: canonical.filter(|canonical| canonical != source_type),
            });
        }
        projections.push(AbstractUnionViewProjectionExpression::StringLiteral {
            value: discriminator,
        });

        arms.push(AbstractUnionViewArm {
            concrete_member_resource_key: member.resource_key.clone(),
            from_table: member.model.root().table.clone(),
            projection_expressions: projections,
        });
    }

    Ok(arms)
}
