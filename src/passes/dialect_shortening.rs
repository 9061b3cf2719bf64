//! Dialect identifier shortening
//!
//! Every identifier is checked against the dialect's length limit and
//! rewritten to `{prefix}_{hash8}` when it does not fit. Plain identifiers
//! hash themselves, so a column is renamed the same way wherever it is
//! referenced; constraint names hash their structural signature instead.
//! All identifiers are registered with a collision detector before and after
//! shortening.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::unified_alias::build_storage_metadata;
use super::SetPass;
use crate::builder::RelationalModelSetBuilderContext;
use crate::error::Result;
use crate::model::{
    AbstractUnionViewInfo, AbstractUnionViewProjectionExpression, ColumnStorage, DbColumnName,
    DbIndexInfo, DbIndexKind, DbIndexName, DbSchemaName, DbTableModel, DbTableName,
    DbTriggerInfo, DbTriggerKind, DbTriggerName, RelationalResourceModel, TableConstraint,
    TriggerColumnMapping,
};
use crate::naming::collision::{CollisionScope, IdentifierCollisionDetector, IdentifierKind};
use crate::naming::constraint_naming::{constraint_signature, primary_key_signature};
use crate::naming::{DialectRules, SqlDialect};

pub struct DialectShorteningPass;

impl SetPass for DialectShorteningPass {
    fn name(&self) -> &'static str {
        "DialectShortening"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        let rules = ctx.dialect.rules();

        let mut before = IdentifierCollisionDetector::new();
        register_identifiers(ctx, &Shortener::identity(), &mut before);
        before.ensure_no_collisions("BeforeDialectShortening")?;

        let shortener = Shortener::for_context(rules, ctx);
        let mut after = IdentifierCollisionDetector::new();
        register_identifiers(ctx, &shortener, &mut after);
        after.ensure_no_collisions(&format!("AfterDialectShortening({})", rules.label()))?;

        let renamed = apply(ctx, &shortener);
        ctx.storage_metadata = build_storage_metadata(ctx)?;
        info!(dialect = %ctx.dialect, renamed, "applied identifier shortening");
        Ok(())
    }
}

/// Final name of every identifier; the identity shortener keeps names as they are.
struct Shortener {
    rules: Option<DialectRules>,
    /// `(original table, original constraint name)` to shortened name
    constraint_names: BTreeMap<(DbTableName, String), String>,
}

impl Shortener {
    fn identity() -> Self {
        Self {
            rules: None,
            constraint_names: BTreeMap::new(),
        }
    }

    fn for_context(rules: DialectRules, ctx: &RelationalModelSetBuilderContext) -> Self {
        let tables = ctx
            .relational_resources()
            .flat_map(|entry| entry.model.tables_in_dependency_order.iter())
            .chain(ctx.abstract_identity_tables.iter().map(|info| &info.table));

        let mut constraint_names = BTreeMap::new();
        for table in tables {
            let key = &table.key;
            constraint_names.insert(
                (table.table.clone(), key.constraint_name.clone()),
                rules.shorten_with_signature(
                    &key.constraint_name,
                    &primary_key_signature(&table.table, &key.column_names()),
                ),
            );
            for constraint in &table.constraints {
                constraint_names.insert(
                    (table.table.clone(), constraint.name().to_string()),
                    rules.shorten_with_signature(
                        constraint.name(),
                        &constraint_signature(&table.table, constraint),
                    ),
                );
            }
        }

        Self {
            rules: Some(rules),
            constraint_names,
        }
    }

    fn name(&self, value: &str) -> String {
        match &self.rules {
            Some(rules) => rules.shorten(value),
            None => value.to_string(),
        }
    }

    fn schema(&self, schema: &DbSchemaName) -> DbSchemaName {
        DbSchemaName::new(self.name(schema.as_str()))
    }

    fn table(&self, table: &DbTableName) -> DbTableName {
        DbTableName::new(self.schema(&table.schema), self.name(&table.name))
    }

    fn column(&self, column: &DbColumnName) -> DbColumnName {
        DbColumnName::new(self.name(column.as_str()))
    }

    fn columns(&self, columns: &[DbColumnName]) -> Vec<DbColumnName> {
        columns.iter().map(|c| self.column(c)).collect()
    }

    fn constraint(&self, table: &DbTableName, name: &str) -> String {
        self.constraint_names
            .get(&(table.clone(), name.to_string()))
            .cloned()
            .unwrap_or_else(|| self.name(name))
    }

    /// PK and UK indexes carry the name of the constraint they implement.
    fn index(&self, index: &DbIndexInfo) -> String {
        match index.kind {
            DbIndexKind::PrimaryKey | DbIndexKind::UniqueConstraint => {
                self.constraint(&index.table, index.name.as_str())
            }
            DbIndexKind::ForeignKeySupport | DbIndexKind::Explicit => self.name(index.name.as_str()),
        }
    }

    fn mappings(&self, mappings: &[TriggerColumnMapping]) -> Vec<TriggerColumnMapping> {
        mappings
            .iter()
            .map(|m| TriggerColumnMapping {
                source_column: self.column(&m.source_column),
                target_column: self.column(&m.target_column),
            })
            .collect()
    }
}

fn register_identifiers(
    ctx: &RelationalModelSetBuilderContext,
    shortener: &Shortener,
    detector: &mut IdentifierCollisionDetector,
) {
    for project in &ctx.project_schemas {
        let schema = &project.physical_schema;
        detector.register(
            IdentifierKind::Schema,
            CollisionScope::Database,
            shortener.schema(schema).as_str(),
            schema.as_str(),
            format!("schema of project {}", project.project_name),
        );
    }

    for entry in ctx.relational_resources() {
        let owner = format!("resource {}", entry.model.resource);
        for table in &entry.model.tables_in_dependency_order {
            register_table(detector, shortener, table, &owner);
        }
    }
    for info in &ctx.abstract_identity_tables {
        let owner = format!("abstract identity of {}", info.abstract_resource_key.resource);
        register_table(detector, shortener, &info.table, &owner);
    }
    for view in &ctx.abstract_union_views {
        register_view(detector, shortener, view);
    }

    for index in &ctx.indexes {
        let table = shortener.table(&index.table);
        let scope = match ctx.dialect {
            SqlDialect::Pgsql => CollisionScope::Schema(table.schema.clone()),
            SqlDialect::Mssql => CollisionScope::Table(table),
        };
        detector.register(
            IdentifierKind::Index,
            scope,
            &shortener.index(index),
            index.name.as_str(),
            format!("index on {}", index.table),
        );
    }

    for trigger in &ctx.triggers {
        let table = shortener.table(&trigger.table);
        let scope = match ctx.dialect {
            SqlDialect::Pgsql => CollisionScope::Table(table),
            SqlDialect::Mssql => CollisionScope::Schema(table.schema.clone()),
        };
        detector.register(
            IdentifierKind::Trigger,
            scope,
            &shortener.name(trigger.name.as_str()),
            trigger.name.as_str(),
            format!("trigger on {}", trigger.table),
        );
    }
}

fn register_table(
    detector: &mut IdentifierCollisionDetector,
    shortener: &Shortener,
    table: &DbTableModel,
    owner: &str,
) {
    let original = &table.table;
    let renamed = shortener.table(original);
    let schema_scope = CollisionScope::Schema(renamed.schema.clone());

    detector.register(
        IdentifierKind::Table,
        schema_scope.clone(),
        &renamed.name,
        &original.name,
        format!("table {} ({})", original, owner),
    );
    for column in &table.columns {
        detector.register(
            IdentifierKind::Column,
            CollisionScope::Table(renamed.clone()),
            shortener.column(&column.column_name).as_str(),
            column.column_name.as_str(),
            format!("column {}.{} ({})", original, column.column_name, owner),
        );
    }

    let constraint_names = std::iter::once(table.key.constraint_name.as_str())
        .chain(table.constraints.iter().map(TableConstraint::name));
    for name in constraint_names {
        detector.register(
            IdentifierKind::Constraint,
            schema_scope.clone(),
            &shortener.constraint(original, name),
            name,
            format!("constraint on {}", original),
        );
    }
}

fn register_view(detector: &mut IdentifierCollisionDetector, shortener: &Shortener, view: &AbstractUnionViewInfo) {
    let original = &view.view_name;
    let renamed = shortener.table(original);
    let owner = format!("union view of {}", view.abstract_resource_key.resource);

    detector.register(
        IdentifierKind::Table,
        CollisionScope::Schema(renamed.schema.clone()),
        &renamed.name,
        &original.name,
        format!("view {} ({})", original, owner),
    );
    for column in &view.output_columns_in_select_order {
        detector.register(
            IdentifierKind::Column,
            CollisionScope::Table(renamed.clone()),
            shortener.column(&column.column_name).as_str(),
            column.column_name.as_str(),
            format!("column {}.{} ({})", original, column.column_name, owner),
        );
    }
}

/// Rewrite every identifier in place; returns how many table names changed.
fn apply(ctx: &mut RelationalModelSetBuilderContext, shortener: &Shortener) -> usize {
    let mut renamed = 0;

    for project in ctx.project_schemas.iter_mut() {
        project.physical_schema = shortener.schema(&project.physical_schema);
    }

    for entry in ctx.concrete_resources.iter_mut() {
        renamed += apply_to_resource(&mut entry.model, shortener);
    }
    for info in ctx.abstract_identity_tables.iter_mut() {
        renamed += apply_to_table(&mut info.table, shortener);
        info.identity_columns = shortener.columns(&info.identity_columns);
    }
    for view in ctx.abstract_union_views.iter_mut() {
        apply_to_view(view, shortener);
    }

    for index in ctx.indexes.iter_mut() {
        index.name = DbIndexName::new(shortener.index(index));
        index.table = shortener.table(&index.table);
        index.key_columns = shortener.columns(&index.key_columns);
    }
    for trigger in ctx.triggers.iter_mut() {
        apply_to_trigger(trigger, shortener);
    }

    renamed
}

fn apply_to_resource(model: &mut RelationalResourceModel, shortener: &Shortener) -> usize {
    model.physical_schema = shortener.schema(&model.physical_schema);

    let renamed = model
        .tables_in_dependency_order
        .iter_mut()
        .map(|table| apply_to_table(table, shortener))
        .sum();

    for binding in model.document_reference_bindings.iter_mut() {
        binding.table = shortener.table(&binding.table);
        binding.fk_column = shortener.column(&binding.fk_column);
        for identity in binding.identity_bindings.iter_mut() {
            identity.column = shortener.column(&identity.column);
        }
    }
    for edge in model.descriptor_edge_sources.iter_mut() {
        edge.table = shortener.table(&edge.table);
        edge.fk_column = shortener.column(&edge.fk_column);
    }
    for dedup in model.descriptor_foreign_key_deduplications.iter_mut() {
        dedup.table = shortener.table(&dedup.table);
        dedup.storage_column = shortener.column(&dedup.storage_column);
        dedup.binding_columns = shortener.columns(&dedup.binding_columns);
    }

    renamed
}

fn apply_to_table(table: &mut DbTableModel, shortener: &Shortener) -> usize {
    let original = table.table.clone();
    table.table = shortener.table(&original);

    table.key.constraint_name = shortener.constraint(&original, &table.key.constraint_name);
    for key_column in table.key.columns.iter_mut() {
        key_column.column_name = shortener.column(&key_column.column_name);
    }

    for column in table.columns.iter_mut() {
        column.column_name = shortener.column(&column.column_name);
        if let ColumnStorage::UnifiedAlias {
            canonical_column,
            presence_column,
        } = &mut column.storage
        {
            *canonical_column = shortener.column(canonical_column);
            if let Some(presence) = presence_column {
                *presence = shortener.column(presence);
            }
        }
    }

    for constraint in table.constraints.iter_mut() {
        let name = shortener.constraint(&original, constraint.name());
        match constraint {
            TableConstraint::Unique { columns, .. } => {
                *columns = shortener.columns(columns);
            }
            TableConstraint::ForeignKey {
                columns,
                target_table,
                target_columns,
                ..
            } => {
                *columns = shortener.columns(columns);
                *target_table = shortener.table(target_table);
                *target_columns = shortener.columns(target_columns);
            }
            TableConstraint::AllOrNoneNullability {
                fk_column,
                dependent_columns,
                ..
            } => {
                *fk_column = shortener.column(fk_column);
                *dependent_columns = shortener.columns(dependent_columns);
            }
            TableConstraint::NullOrTrue { column, .. } => {
                *column = shortener.column(column);
            }
        }
        constraint.set_name(name);
    }

    for class in table.key_unification_classes.iter_mut() {
        class.canonical_column = shortener.column(&class.canonical_column);
        class.member_path_columns = shortener.columns(&class.member_path_columns);
    }

    if table.table == original {
        0
    } else {
        debug!(from = %original, to = %table.table, "shortened table name");
        1
    }
}

fn apply_to_view(view: &mut AbstractUnionViewInfo, shortener: &Shortener) {
    view.view_name = shortener.table(&view.view_name);
    for column in view.output_columns_in_select_order.iter_mut() {
        column.column_name = shortener.column(&column.column_name);
    }
    for arm in view.union_arms_in_order.iter_mut() {
        arm.from_table = shortener.table(&arm.from_table);
        for projection in arm.projection_expressions.iter_mut() {
            if let AbstractUnionViewProjectionExpression::SourceColumn { column_name, .. } = projection {
                *column_name = shortener.column(column_name);
            }
        }
    }
}

fn apply_to_trigger(trigger: &mut DbTriggerInfo, shortener: &Shortener) {
    trigger.name = DbTriggerName::new(shortener.name(trigger.name.as_str()));
    trigger.table = shortener.table(&trigger.table);
    trigger.key_columns = shortener.columns(&trigger.key_columns);
    trigger.identity_projection_columns = shortener.columns(&trigger.identity_projection_columns);

    match &mut trigger.kind {
        DbTriggerKind::DocumentStamping | DbTriggerKind::ReferentialIdentityMaintenance { .. } => {}
        DbTriggerKind::AbstractIdentityMaintenance {
            target_table,
            target_column_mappings,
            ..
        } => {
            *target_table = shortener.table(target_table);
            *target_column_mappings = shortener.mappings(target_column_mappings);
        }
        DbTriggerKind::IdentityPropagationFallback { referrer_updates } => {
            for update in referrer_updates.iter_mut() {
                update.referrer_table = shortener.table(&update.referrer_table);
                update.referrer_document_id_column = shortener.column(&update.referrer_document_id_column);
                update.identity_column_pairs = shortener.mappings(&update.identity_column_pairs);
            }
        }
    }
}
