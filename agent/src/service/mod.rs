//! gRPC bridge between the operator and the server console.
mod sync;
pub use sync::{Convergence, difference_set, sync_ops, sync_whitelist};

use crate::{
    rcon::{Rcon, RconError, RemoteConsole},
    serverprops,
};
use async_trait::async_trait;
use common::{
    constants::{RCON_PORT, RCON_PORT_PROPS, SERVER_PROPS_NAME},
    proto::{
        Agent, ReloadRequest, ReloadResponse, SaveAllFlushRequest, SaveAllFlushResponse, SaveOffRequest,
        SaveOffResponse, SaveOnRequest, SaveOnResponse, SyncOpsRequest, SyncOpsResponse, SyncWhitelistRequest,
        SyncWhitelistResponse,
    },
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tonic::{Request, Response, Status};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Rcon(#[from] RconError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {key} value {value:?} in server.properties")]
    Property { key: String, value: String },

    #[error("failed to parse ops.json: {0}")]
    Ops(#[from] serde_json::Error),
}

impl From<ServiceError> for Status {
    fn from(e: ServiceError) -> Self {
        let message = e.to_string();
        match e {
            ServiceError::Rcon(RconError::Connection(_) | RconError::Closed) => Status::unavailable(message),
            ServiceError::Rcon(RconError::Auth) => Status::permission_denied(message),
            ServiceError::Rcon(RconError::Desync { .. }) => Status::aborted(message),
            ServiceError::Rcon(RconError::InvalidAction(_)) => Status::invalid_argument(message),
            ServiceError::Rcon(RconError::OpFailed(_)) => Status::failed_precondition(message),
            ServiceError::Read { .. } | ServiceError::Property { .. } | ServiceError::Ops(_) => {
                Status::failed_precondition(message)
            }
        }
    }
}

/// Opens console sessions to the colocated server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Rcon, ServiceError>;
}

/// Dials the server console on localhost, reading the port from server.properties
pub struct RconConnector {
    pub data_dir: PathBuf,
    pub password: String,
}

#[async_trait]
impl Connector for RconConnector {
    async fn connect(&self) -> Result<Rcon, ServiceError> {
        let path = self.data_dir.join(SERVER_PROPS_NAME);
        let props = serverprops::parse_from_path(&path)
            .await
            .map_err(|source| ServiceError::Read { path, source })?;
        let port = match props.get(RCON_PORT_PROPS) {
            Some(p) => p.trim().parse::<u16>().map_err(|_| ServiceError::Property {
                key: RCON_PORT_PROPS.to_string(),
                value: p.clone(),
            })?,
            None => RCON_PORT,
        };
        tracing::info!(port, "connecting to rcon");
        let console = RemoteConsole::connect(("127.0.0.1", port), &self.password).await?;
        Ok(Rcon::new(Box::new(console)))
    }
}

/// The agent service. One console session is shared by every call and guarded
/// by a mutex so commands never interleave on the connection.
#[derive(Clone)]
pub struct AgentService {
    connector: Arc<dyn Connector>,
    session: Arc<Mutex<Option<Rcon>>>,
    data_dir: PathBuf,
}

impl AgentService {
    pub fn new(connector: Arc<dyn Connector>, data_dir: PathBuf) -> Self {
        Self {
            connector,
            session: Arc::new(Mutex::new(None)),
            data_dir,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Lock the session, dialling a new one when there is none or the last one broke
    pub async fn session(&self) -> Result<MappedMutexGuard<'_, Rcon>, ServiceError> {
        let mut guard = self.session.lock().await;
        let rcon = match guard.take() {
            Some(rcon) if rcon.is_usable() => rcon,
            previous => {
                if previous.is_some() {
                    tracing::warn!("dropping unusable rcon session");
                }
                self.connector.connect().await?
            }
        };
        Ok(MutexGuard::map(guard, |slot| slot.insert(rcon)))
    }
}

#[tonic::async_trait]
impl Agent for AgentService {
    async fn reload(&self, _: Request<ReloadRequest>) -> Result<Response<ReloadResponse>, Status> {
        tracing::info!("reload");
        self.session().await?.reload().await.map_err(ServiceError::from)?;
        Ok(Response::new(ReloadResponse {}))
    }

    async fn sync_whitelist(
        &self,
        request: Request<SyncWhitelistRequest>,
    ) -> Result<Response<SyncWhitelistResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(enabled = req.enabled, users = ?req.users, "start sync whitelist");
        let mut rcon = self.session().await?;
        let done = sync_whitelist(&mut rcon, &self.data_dir, req.enabled, &req.users).await?;
        tracing::info!(added = ?done.added, removed = ?done.removed, "finish sync whitelist");
        Ok(Response::new(SyncWhitelistResponse {}))
    }

    async fn sync_ops(&self, request: Request<SyncOpsRequest>) -> Result<Response<SyncOpsResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(users = ?req.users, "start sync ops");
        let mut rcon = self.session().await?;
        let done = sync_ops(&mut rcon, &self.data_dir, &req.users).await?;
        tracing::info!(added = ?done.added, removed = ?done.removed, "finish sync ops");
        Ok(Response::new(SyncOpsResponse {}))
    }

    async fn save_off(&self, _: Request<SaveOffRequest>) -> Result<Response<SaveOffResponse>, Status> {
        tracing::info!("save-off");
        self.session().await?.save_off().await.map_err(ServiceError::from)?;
        Ok(Response::new(SaveOffResponse {}))
    }

    async fn save_all_flush(
        &self,
        _: Request<SaveAllFlushRequest>,
    ) -> Result<Response<SaveAllFlushResponse>, Status> {
        tracing::info!("save-all flush");
        self.session()
            .await?
            .save_all_flush()
            .await
            .map_err(ServiceError::from)?;
        Ok(Response::new(SaveAllFlushResponse {}))
    }

    async fn save_on(&self, _: Request<SaveOnRequest>) -> Result<Response<SaveOnResponse>, Status> {
        tracing::info!("save-on");
        self.session().await?.save_on().await.map_err(ServiceError::from)?;
        Ok(Response::new(SaveOnResponse {}))
    }
}
