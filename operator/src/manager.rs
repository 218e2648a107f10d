use crate::{
    Error, Metrics, Minecraft, Result, minecraft,
    process::{AgentFactory, GrpcAgentFactory, KubeStore, LiveSyncProcess, Store},
    registry::{InstanceRegistry, Runner},
};
use chrono::{DateTime, Utc};
use common::{InstanceKey, constants::CONTROLLER_NAME};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{controller::Controller, events::Reporter, watcher::Config},
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Live sync tasks, one per instance
    pub registry: Arc<InstanceRegistry>,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
    pub instances: usize,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: CONTROLLER_NAME.into(),
            instances: 0,
        }
    }
}

/// Build the registry runner spawning a [`LiveSyncProcess`] per instance
pub fn live_sync_runner(
    store: Arc<dyn Store>,
    agents: Arc<dyn AgentFactory>,
    interval: Duration,
    metrics: Metrics,
) -> Runner {
    Arc::new(move |key: InstanceKey, cancel: CancellationToken| {
        LiveSyncProcess::new(key, store.clone(), agents.clone(), interval, metrics.clone())
            .run(cancel)
            .boxed()
    })
}

/// Data owned by the Manager
#[derive(Clone)]
pub struct Manager {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Metrics,
    registry: Arc<InstanceRegistry>,
}

/// Manager that owns a Controller for Minecraft
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// This returns a `Manager` that drives a `Controller` + a future to be awaited
    /// It is up to `main` to wait for the controller stream.
    pub async fn new(check_interval: Duration) -> Result<(Self, BoxFuture<'static, ()>)> {
        let client = Client::try_default().await.map_err(Error::KubeError)?;
        let metrics = Metrics::default();
        let runner = live_sync_runner(
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(GrpcAgentFactory),
            check_interval,
            metrics.clone(),
        );
        let manager = Manager {
            diagnostics: Arc::default(),
            metrics: metrics.clone(),
            registry: Arc::new(InstanceRegistry::new(runner)),
        };
        let context = Arc::new(Context {
            client: client.clone(),
            metrics,
            diagnostics: manager.diagnostics.clone(),
            registry: manager.registry.clone(),
        });

        let mcs = Api::<Minecraft>::all(client);
        // Ensure CRD is installed before loop-watching
        if let Err(e) = mcs.list(&ListParams::default().limit(1)).await {
            tracing::error!("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");
            return Err(Error::KubeError(e));
        }

        // All good. Start controller and return its future.
        let controller = Controller::new(mcs, Config::default().any_semantic())
            .run(minecraft::reconcile, minecraft::error_policy, context)
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        Ok((manager, controller))
    }

    /// Metrics getter
    #[must_use]
    pub fn metrics(&self) -> String {
        self.metrics.encode()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        let mut d = self.diagnostics.read().await.clone();
        d.instances = self.registry.len();
        d
    }

    /// Stop every live sync task and wait for them
    pub async fn shutdown(&self) {
        self.registry.stop_all().await;
    }
}
