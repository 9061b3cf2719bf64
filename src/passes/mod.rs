//! Set-level derivation passes
//!
//! Each pass reads and mutates the shared `RelationalModelSetBuilderContext`.
//! Passes run in the fixed order of `DEFAULT_PASSES`; later passes rely on the
//! invariants established by earlier ones (e.g. index inventory expects every
//! FK column to be a stored column after key unification).

pub mod abstract_identity;
pub mod array_uniqueness;
pub mod base_traversal;
pub mod canonicalize;
pub mod descriptor_fk;
pub mod dialect_shortening;
pub mod fk_storage_validation;
pub mod index_inventory;
pub mod key_unification;
pub mod reference_constraints;
pub mod trigger_inventory;
pub mod unified_alias;

use std::time::Instant;

use tracing::{debug, info};

use crate::builder::RelationalModelSetBuilderContext;
use crate::error::Result;

/// One step of the set-level pipeline.
pub trait SetPass: Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()>;
}

pub const DEFAULT_PASSES: &[&dyn SetPass] = &[
    &base_traversal::BaseTraversalPass,
    &key_unification::KeyUnificationPass,
    &unified_alias::UnifiedAliasValidationPass,
    &abstract_identity::AbstractIdentityPass,
    &reference_constraints::ReferenceConstraintPass,
    &array_uniqueness::ArrayUniquenessPass,
    &descriptor_fk::DescriptorForeignKeyPass,
    &canonicalize::CanonicalizePass,
    &index_inventory::IndexInventoryPass,
    &trigger_inventory::TriggerInventoryPass,
    &dialect_shortening::DialectShorteningPass,
    &fk_storage_validation::ForeignKeyStorageValidationPass,
];

/// Run `passes` in order, stopping at the first failure.
pub fn run_passes(ctx: &mut RelationalModelSetBuilderContext, passes: &[&dyn SetPass]) -> Result<()> {
    for pass in passes {
        let started = Instant::now();
        debug!(pass = pass.name(), "starting pass");
        pass.execute(ctx)?;
        info!(
            pass = pass.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pass complete"
        );
    }
    Ok(())
}
