use crate::{Error, Minecraft, Reconciler, Result, manager::Context};
use async_trait::async_trait;
use chrono::Utc;
use common::constants::FINALIZER;
use kube::{
    api::{Api, ResourceExt},
    runtime::{
        controller::Action,
        finalizer::{Event as Finalizer, finalizer},
    },
};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{Span, field, instrument, warn};

#[instrument(skip(ctx, mc), fields(instance))]
pub async fn reconcile(mc: Arc<Minecraft>, ctx: Arc<Context>) -> Result<Action> {
    let _mes = ctx.metrics.reconcile.count_and_measure();
    let ns = mc.namespace().ok_or(Error::IllegalMinecraft)?;
    Span::current().record("instance", field::display(format!("{ns}/{}", mc.name_any())));
    let mcs: Api<Minecraft> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&mcs, FINALIZER, mc, |event| async {
        match event {
            Finalizer::Apply(mc) => mc.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(mc) => mc.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

#[async_trait]
impl Reconciler for Minecraft {
    // Make sure a sync task follows this instance
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        ctx.diagnostics.write().await.last_event = Utc::now();
        if ctx.registry.update(&self.key()) {
            tracing::info!("live sync started");
        }
        Ok(Action::requeue(Duration::from_secs(5 * 60)))
    }

    // The instance is going away: stop following it
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        ctx.diagnostics.write().await.last_event = Utc::now();
        ctx.registry.stop(&self.key()).await;
        Ok(Action::await_change())
    }
}

#[must_use]
pub fn error_policy(mc: Arc<Minecraft>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed for {:?}: {:?}", mc.metadata.name, error);
    ctx.metrics.reconcile.reconcile_failure(&mc, error);
    Action::requeue(Duration::from_secs(60))
}
