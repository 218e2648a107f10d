use crate::{
    Error, Result,
    constants::AGENT_PORT,
    proto::{
        AgentClient, ReloadRequest, SaveAllFlushRequest, SaveOffRequest, SaveOnRequest, SyncOpsRequest,
        SyncWhitelistRequest,
    },
};
use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Operations the sync loop drives against an agent
#[async_trait]
pub trait SyncOperations: Send {
    async fn reload(&mut self) -> Result<()>;
    async fn sync_whitelist(&mut self, enabled: bool, users: Vec<String>) -> Result<()>;
    async fn sync_ops(&mut self, users: Vec<String>) -> Result<()>;
}

/// Operations the backup workflow drives against an agent
#[async_trait]
pub trait BackupOperations: Send {
    async fn save_off(&mut self) -> Result<()>;
    async fn save_all_flush(&mut self) -> Result<()>;
    async fn save_on(&mut self) -> Result<()>;
}

/// A gRPC connection to one instance's agent.
///
/// The underlying channel is closed when the value is dropped.
#[derive(Clone, Debug)]
pub struct AgentConn {
    client: AgentClient<Channel>,
}

impl AgentConn {
    /// Connect to an agent listening on `host:port`
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let endpoint = Endpoint::from_shared(format!("http://{host}:{port}"))
            .map_err(|_| Error::InvalidAddress(format!("{host}:{port}")))?
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .http2_keep_alive_interval(Duration::from_secs(60));
        let channel = endpoint.connect().await?;
        Ok(Self {
            client: AgentClient::new(channel),
        })
    }

    /// Connect to the agent of a pod through its cluster IP
    pub async fn connect_pod(pod_ip: &str) -> Result<Self> {
        if pod_ip.contains(':') {
            Self::connect(&format!("[{pod_ip}]"), AGENT_PORT).await
        } else {
            Self::connect(pod_ip, AGENT_PORT).await
        }
    }
}

#[async_trait]
impl SyncOperations for AgentConn {
    async fn reload(&mut self) -> Result<()> {
        self.client.reload(ReloadRequest {}).await?;
        Ok(())
    }

    async fn sync_whitelist(&mut self, enabled: bool, users: Vec<String>) -> Result<()> {
        self.client
            .sync_whitelist(SyncWhitelistRequest { enabled, users })
            .await?;
        Ok(())
    }

    async fn sync_ops(&mut self, users: Vec<String>) -> Result<()> {
        self.client.sync_ops(SyncOpsRequest { users }).await?;
        Ok(())
    }
}

#[async_trait]
impl BackupOperations for AgentConn {
    async fn save_off(&mut self) -> Result<()> {
        self.client.save_off(SaveOffRequest {}).await?;
        Ok(())
    }

    async fn save_all_flush(&mut self) -> Result<()> {
        self.client.save_all_flush(SaveAllFlushRequest {}).await?;
        Ok(())
    }

    async fn save_on(&mut self) -> Result<()> {
        self.client.save_on(SaveOnRequest {}).await?;
        Ok(())
    }
}
