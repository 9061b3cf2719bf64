//! Base traversal: build every concrete resource's initial model.

use tracing::debug;

use super::SetPass;
use crate::builder::{ConcreteResourceEntry, RelationalModelSetBuilderContext};
use crate::error::Result;

pub struct BaseTraversalPass;

impl SetPass for BaseTraversalPass {
    fn name(&self) -> &'static str {
        "BaseTraversal"
    }

    fn execute(&self, ctx: &mut RelationalModelSetBuilderContext) -> Result<()> {
        let pending = std::mem::take(&mut ctx.pending_inputs);
        let mut entries = Vec::with_capacity(pending.len());

        for inputs in pending {
            let output = ctx.resource_builder.build(&inputs)?;
            let resource_key = ctx.resource_key(inputs.resource())?.clone();
            debug!(
                resource = %inputs.resource(),
                tables = output.model.tables_in_dependency_order.len(),
                references = output.model.document_reference_bindings.len(),
                "built resource model"
            );
            entries.push(ConcreteResourceEntry {
                resource_key,
                inputs,
                model: output.model,
                extension_sites: output.extension_sites,
            });
        }

        ctx.concrete_resources = entries;
        Ok(())
    }
}
