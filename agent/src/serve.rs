use crate::{
    service::{AgentService, RconConnector},
    watcher::ConfigWatcher,
};
use clap::Args;
use common::{
    Result,
    constants::{CONFIG_PATH, DATA_PATH, DEFAULT_RCON_PASSWORD, RCON_PASSWORD_ENV_NAME},
    proto::AgentServer,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

#[derive(Args, Debug)]
pub struct Parameters {
    /// Address the agent API listens on
    #[arg(
        short = 'a',
        long = "address",
        env = "AGENT_ADDRESS",
        value_name = "ADDRESS",
        default_value = "0.0.0.0:9080"
    )]
    address: SocketAddr,
    /// Server data directory
    #[arg(long = "data-dir", env = "DATA_DIR", value_name = "DATA_DIR", default_value = DATA_PATH)]
    data_dir: PathBuf,
    /// Mounted configuration directory
    #[arg(long = "config-dir", env = "CONFIG_DIR", value_name = "CONFIG_DIR", default_value = CONFIG_PATH)]
    config_dir: PathBuf,
    /// Seconds between two checks of the configuration directory
    #[arg(long = "watch-interval", env = "WATCH_INTERVAL", value_name = "SECONDS", default_value_t = 10)]
    watch_interval: u64,
    /// RCON password of the server
    #[arg(
        long = "rcon-password",
        env = RCON_PASSWORD_ENV_NAME,
        value_name = "PASSWORD",
        default_value = DEFAULT_RCON_PASSWORD,
        hide_env_values = true
    )]
    rcon_password: String,
}

async fn shutdown_signal() {
    let interrupt = tokio::signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}

pub async fn run(args: &Parameters) -> Result<()> {
    let connector = RconConnector {
        data_dir: args.data_dir.clone(),
        password: args.rcon_password.clone(),
    };
    let service = AgentService::new(Arc::new(connector), args.data_dir.clone());
    let cancel = CancellationToken::new();

    let watcher = match ConfigWatcher::new(args.config_dir.clone(), args.data_dir.clone()).await {
        Ok(w) => Some(tokio::spawn(w.run(
            service.clone(),
            Duration::from_secs(args.watch_interval.max(1)),
            cancel.clone(),
        ))),
        Err(e) => {
            tracing::warn!(dir = %args.config_dir.display(), "config watcher disabled: {e}");
            None
        }
    };

    tracing::info!(address = %args.address, "agent listening");
    let served = Server::builder()
        .add_service(AgentServer::new(service))
        .serve_with_shutdown(args.address, shutdown_signal())
        .await;
    tracing::info!("agent stopping");
    cancel.cancel();
    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }
    Ok(served?)
}
