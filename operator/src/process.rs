use crate::{Error, Metrics, Result};
use async_trait::async_trait;
use common::{
    InstanceKey, Minecraft,
    agentconn::{AgentConn, SyncOperations},
};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::{sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Read access to the cluster state a sync pass needs
#[async_trait]
pub trait Store: Send + Sync {
    async fn minecraft(&self, key: &InstanceKey) -> Result<Minecraft>;
    /// IP of a pod, `None` while it has none or does not exist yet
    async fn pod_ip(&self, namespace: &str, pod: &str) -> Result<Option<String>>;
}

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn minecraft(&self, key: &InstanceKey) -> Result<Minecraft> {
        let api: Api<Minecraft> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name).await.map_err(Error::KubeError)
    }

    async fn pod_ip(&self, namespace: &str, pod: &str) -> Result<Option<String>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api.get_opt(pod).await.map_err(Error::KubeError)?;
        Ok(pod
            .and_then(|p| p.status)
            .and_then(|s| s.pod_ip)
            .filter(|ip| !ip.is_empty()))
    }
}

/// Opens connections to the agent of an instance
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn connect(&self, pod_ip: &str) -> common::Result<Box<dyn SyncOperations>>;
}

pub struct GrpcAgentFactory;

#[async_trait]
impl AgentFactory for GrpcAgentFactory {
    async fn connect(&self, pod_ip: &str) -> common::Result<Box<dyn SyncOperations>> {
        Ok(Box::new(AgentConn::connect_pod(pod_ip).await?))
    }
}

/// Periodically pushes the declared whitelist and operators of one instance to its agent
pub struct LiveSyncProcess {
    key: InstanceKey,
    store: Arc<dyn Store>,
    agents: Arc<dyn AgentFactory>,
    interval: Duration,
    metrics: Metrics,
}

impl LiveSyncProcess {
    pub fn new(
        key: InstanceKey,
        store: Arc<dyn Store>,
        agents: Arc<dyn AgentFactory>,
        interval: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            key,
            store,
            agents,
            interval,
            metrics,
        }
    }

    /// One convergence pass. The connection is dropped on return.
    pub async fn pass(&self) -> Result<()> {
        let mc = self.store.minecraft(&self.key).await?;
        tracing::debug!(whitelist = ?mc.spec.whitelist, ops = ?mc.spec.ops, "got Minecraft");
        let pod = mc.pod_name();
        let ip = self
            .store
            .pod_ip(&self.key.namespace, &pod)
            .await?
            .ok_or_else(|| Error::NoAddress(format!("{}/{}", self.key.namespace, pod)))?;

        let mut agent = self.agents.connect(&ip).await.map_err(Error::AgentError)?;
        // whitelist first: promoting operators may depend on who is allowed in
        agent
            .sync_whitelist(mc.spec.whitelist.enabled, mc.spec.whitelist.users.clone())
            .await
            .map_err(Error::AgentError)?;
        agent
            .sync_ops(mc.spec.ops.users.clone())
            .await
            .map_err(Error::AgentError)?;
        Ok(())
    }

    /// Run passes on every tick until cancelled. A pass never overlaps the next one,
    /// a slow pass only delays it.
    pub async fn run(self, cancel: CancellationToken) {
        let span = tracing::info_span!("sync", instance = %self.key);
        async move {
            let mut tick = tokio::time::interval(self.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately; wait a full period like a ticker
            tick.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                tracing::debug!("start operation");
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = self.pass() => result,
                };
                self.metrics.sync.passes.inc();
                match result {
                    Ok(()) => tracing::info!("finish operation"),
                    Err(e) if e.is_transient() => tracing::info!("waiting for instance: {e}"),
                    Err(e) => {
                        tracing::error!("sync failed: {e}");
                        self.metrics.sync.sync_failure(&self.key, &e);
                    }
                }
            }
            tracing::info!("quit");
        }
        .instrument(span)
        .await
    }
}
