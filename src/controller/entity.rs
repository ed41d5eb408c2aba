//! Generic reconcilable-entity interface.
//!
//! The operator serves several structurally similar resource kinds
//! (cluster, standalone). Each implements this capability set — observe,
//! build targets, apply, project status — and shares the conflict-safe
//! applier and change classifier as library calls instead of duplicating
//! them per kind.

use crate::controller::context::Context;
use crate::controller::error::Result;

/// A resource kind the operator can converge.
pub trait ReconcilableEntity {
    /// Observed live state relevant to this kind.
    type Observed;
    /// The set of target objects built from the desired spec.
    type Targets;

    /// Kind name for logs and events.
    const KIND: &'static str;

    /// Fetch the observed state from the API server.
    fn fetch_observed(
        &self,
        ctx: &Context,
    ) -> impl std::future::Future<Output = Result<Self::Observed>> + Send;

    /// Build the desired target objects. Pure: no I/O.
    fn build_targets(&self, observed: &Self::Observed) -> Result<Self::Targets>;

    /// Apply the targets through the conflict-safe applier.
    fn apply_targets(
        &self,
        ctx: &Context,
        targets: &Self::Targets,
        observed: &Self::Observed,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Project the observed state into the status subresource.
    fn project_status(
        &self,
        ctx: &Context,
        observed: &Self::Observed,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Run one convergence pass for an entity: observe, build, apply, project.
pub async fn converge<E: ReconcilableEntity + Sync>(entity: &E, ctx: &Context) -> Result<()> {
    let observed = entity.fetch_observed(ctx).await?;
    let targets = entity.build_targets(&observed)?;
    entity.apply_targets(ctx, &targets, &observed).await?;
    entity.project_status(ctx, &observed).await?;
    Ok(())
}
