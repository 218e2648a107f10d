use crate::executor::{ExecError, Executor, KubeExecutor, Tunnel};
use async_trait::async_trait;
use clap::Args;
use common::{
    InstanceKey, Minecraft,
    agentconn::{AgentConn, BackupOperations},
    constants::{AGENT_PORT, DATA_PATH, MINECRAFT_CONTAINER_NAME},
};
use kube::{Api, Client};
use std::{io, path::PathBuf};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct Parameters {
    /// Name of the Minecraft instance to download
    #[arg(value_name = "NAME")]
    name: String,
    /// Namespace of the instance
    #[arg(
        short = 'n',
        long = "namespace",
        env = "NAMESPACE",
        value_name = "NAMESPACE",
        default_value = "default"
    )]
    namespace: String,
    /// Archive to write, defaults to <NAME>-data.tar.gz
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,
    /// Container running the game server
    #[arg(long = "container", value_name = "CONTAINER", default_value = MINECRAFT_CONTAINER_NAME)]
    container: String,
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("failed to get Minecraft resource: {0}")]
    Lookup(#[source] common::Error),

    #[error("failed to open tunnel to agent: {0}")]
    Tunnel(#[source] ExecError),

    #[error("failed to connect to agent: {0}")]
    Agent(#[source] common::Error),

    #[error("failed to execute {step}: {source}")]
    Prepare {
        step: &'static str,
        #[source]
        source: common::Error,
    },

    #[error("{cause} (also failed to check sleep status: {probe})")]
    Probe {
        #[source]
        cause: Box<DownloadError>,
        probe: ExecError,
    },

    #[error("failed to download data: {0}")]
    Archive(#[source] ExecError),

    #[error("output error: {0}")]
    Output(#[from] io::Error),
}

/// Reads the declared state of an instance
#[async_trait]
pub trait MinecraftStore: Send + Sync {
    async fn get(&self, key: &InstanceKey) -> common::Result<Minecraft>;
}

pub struct KubeStore {
    client: Client,
}

#[async_trait]
impl MinecraftStore for KubeStore {
    async fn get(&self, key: &InstanceKey) -> common::Result<Minecraft> {
        let api: Api<Minecraft> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get(&key.name).await?)
    }
}

/// Opens agent connections through a forwarded local port
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, local_port: u16) -> common::Result<Box<dyn BackupOperations>>;
}

pub struct GrpcConnector;

#[async_trait]
impl AgentConnector for GrpcConnector {
    async fn connect(&self, local_port: u16) -> common::Result<Box<dyn BackupOperations>> {
        Ok(Box::new(AgentConn::connect("127.0.0.1", local_port).await?))
    }
}

/// An agent connection with saving turned off. `finish` turns it back on.
struct Session {
    agent: Box<dyn BackupOperations>,
    _tunnel: Tunnel,
}

impl Session {
    async fn finish(mut self) {
        tracing::info!("Enabling auto-save");
        if let Err(e) = self.agent.save_on().await {
            tracing::error!("Failed to execute save-on: {e}");
        }
    }
}

enum Prepared {
    Ready(Session),
    Unreachable(DownloadError),
    Failed(DownloadError),
}

/// `tar` invocation producing the gzipped archive of the data directory on stdout
pub fn archive_command(excludes: &[String]) -> Vec<String> {
    let mut cmd: Vec<String> = ["tar", "czf", "-", "-C", DATA_PATH].iter().map(|s| s.to_string()).collect();
    for ex in excludes {
        cmd.push("--exclude".to_string());
        cmd.push(ex.clone());
    }
    cmd.push(".".to_string());
    cmd
}

pub struct BackupCoordinator {
    store: Box<dyn MinecraftStore>,
    executor: Box<dyn Executor>,
    agents: Box<dyn AgentConnector>,
    container: String,
}

impl BackupCoordinator {
    pub fn new(
        store: Box<dyn MinecraftStore>,
        executor: Box<dyn Executor>,
        agents: Box<dyn AgentConnector>,
        container: String,
    ) -> Self {
        Self {
            store,
            executor,
            agents,
            container,
        }
    }

    /// Export the data directory of an instance into `output`.
    ///
    /// Saving is suspended through the agent for the duration of the export. A
    /// server that cannot be reached because it is paused is exported as is.
    pub async fn run(
        &self,
        key: &InstanceKey,
        output: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let mc = self.store.get(key).await.map_err(DownloadError::Lookup)?;
        let pod = mc.pod_name();

        let session = match self.prepare(&key.namespace, &pod).await {
            Prepared::Ready(session) => Some(session),
            Prepared::Failed(e) => return Err(e),
            Prepared::Unreachable(e) => match self.is_sleeping(&mc, &key.namespace, &pod, cancel).await {
                Ok(true) => {
                    tracing::warn!(
                        "Server appears to be sleeping, skipping save-off and save-all. Original error: {e}"
                    );
                    None
                }
                Ok(false) => return Err(e),
                Err(probe) => {
                    return Err(DownloadError::Probe {
                        cause: Box::new(e),
                        probe,
                    });
                }
            },
        };

        tracing::info!("Downloading data");
        let command = archive_command(&mc.backup_excludes());
        let archived = self
            .executor
            .exec(&key.namespace, &pod, &self.container, &command, output, cancel)
            .await
            .map_err(DownloadError::Archive);
        if let Some(session) = session {
            session.finish().await;
        }
        archived?;
        output.flush().await?;
        tracing::info!("Download completed");
        Ok(())
    }

    async fn prepare(&self, namespace: &str, pod: &str) -> Prepared {
        let tunnel = match self.executor.port_forward(namespace, pod, AGENT_PORT).await {
            Ok(t) => t,
            Err(e) => return Prepared::Unreachable(DownloadError::Tunnel(e)),
        };
        let agent = match self.agents.connect(tunnel.local_port).await {
            Ok(a) => a,
            Err(e) => return Prepared::Unreachable(DownloadError::Agent(e)),
        };
        let mut session = Session { agent, _tunnel: tunnel };

        tracing::info!("Disabling auto-save");
        if let Err(e) = session.agent.save_off().await {
            // a live agent in front of a paused server cannot reach its console
            if e.is_unreachable() {
                session.finish().await;
                return Prepared::Unreachable(DownloadError::Prepare {
                    step: "save-off",
                    source: e,
                });
            }
            session.finish().await;
            return Prepared::Failed(DownloadError::Prepare {
                step: "save-off",
                source: e,
            });
        }
        tracing::info!("Saving game to disk");
        if let Err(e) = session.agent.save_all_flush().await {
            session.finish().await;
            return Prepared::Failed(DownloadError::Prepare {
                step: "save-all",
                source: e,
            });
        }
        Prepared::Ready(session)
    }

    /// Whether the server process is stopped by auto-pause
    async fn is_sleeping(
        &self,
        mc: &Minecraft,
        namespace: &str,
        pod: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ExecError> {
        if !mc.auto_pause_enabled() {
            return Ok(false);
        }
        let probe = vec!["pgrep".to_string(), "java".to_string()];
        let mut sink = tokio::io::sink();
        match self
            .executor
            .exec(namespace, pod, &self.container, &probe, &mut sink, cancel)
            .await
        {
            Ok(()) => Ok(false),
            // pgrep exits with 1 when nothing matches
            Err(e) if e.exit_code() == Some(1) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

pub async fn run(args: &Parameters) -> Result<(), DownloadError> {
    let client = Client::try_default()
        .await
        .map_err(|e| DownloadError::Lookup(e.into()))?;
    let coordinator = BackupCoordinator::new(
        Box::new(KubeStore { client: client.clone() }),
        Box::new(KubeExecutor::new(client)),
        Box::new(GrpcConnector),
        args.container.clone(),
    );
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}-data.tar.gz", args.name)));
    let mut file = tokio::fs::File::create(&output).await?;
    tracing::info!("Writing archive to {}", output.display());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling download");
            interrupt.cancel();
        }
    });
    let key = InstanceKey::new(&args.namespace, &args.name);
    coordinator.run(&key, &mut file, &cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::minecraft::{AutoPause, Backup, MinecraftSpec};
    use flate2::{Compression, read::GzDecoder, write::GzEncoder};
    use std::{
        io::Read,
        sync::{Arc, Mutex},
    };

    type Calls = Arc<Mutex<Vec<String>>>;

    fn instance(auto_pause: Option<bool>, excludes: &[&str]) -> Minecraft {
        let mut mc = Minecraft::new(
            "mc",
            MinecraftSpec {
                auto_pause: AutoPause {
                    enabled: auto_pause,
                    ..Default::default()
                },
                backup: Backup {
                    excludes: excludes.iter().map(|s| s.to_string()).collect(),
                },
                ..Default::default()
            },
        );
        mc.metadata.namespace = Some("games".to_string());
        mc
    }

    struct FakeStore(Minecraft);

    #[async_trait]
    impl MinecraftStore for FakeStore {
        async fn get(&self, _key: &InstanceKey) -> common::Result<Minecraft> {
            Ok(self.0.clone())
        }
    }

    /// Game container running `tar`, answering the sleep probe from a script
    struct FakeExecutor {
        calls: Calls,
        tunnel_up: bool,
        java_running: bool,
        probe_broken: bool,
        tar_fails: bool,
    }

    impl FakeExecutor {
        fn new(calls: &Calls) -> Self {
            Self {
                calls: calls.clone(),
                tunnel_up: true,
                java_running: true,
                probe_broken: false,
                tar_fails: false,
            }
        }
    }

    fn world_archive() -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let data = b"level-name=world\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "./server.properties", &data[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn port_forward(&self, namespace: &str, pod: &str, remote_port: u16) -> Result<Tunnel, ExecError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("port-forward {namespace}/{pod}:{remote_port}"));
            if !self.tunnel_up {
                return Err(ExecError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            Ok(Tunnel::new(40000, CancellationToken::new()))
        }

        async fn exec(
            &self,
            _namespace: &str,
            _pod: &str,
            container: &str,
            command: &[String],
            stdout: &mut (dyn AsyncWrite + Unpin + Send),
            cancel: &CancellationToken,
        ) -> Result<(), ExecError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("exec {container}: {}", command.join(" ")));
            if command[0] == "pgrep" {
                if self.probe_broken {
                    return Err(ExecError::Failed {
                        message: "container not found".to_string(),
                        stderr: String::new(),
                    });
                }
                return if self.java_running {
                    Ok(())
                } else {
                    Err(ExecError::ExitCode {
                        code: 1,
                        stderr: String::new(),
                    })
                };
            }
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            if self.tar_fails {
                return Err(ExecError::ExitCode {
                    code: 2,
                    stderr: "tar: /data: Cannot open".to_string(),
                });
            }
            stdout.write_all(&world_archive()).await?;
            Ok(())
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum SaveOff {
        Ok,
        Unavailable,
        Rejected,
    }

    struct FakeAgent {
        calls: Calls,
        save_off: SaveOff,
    }

    #[async_trait]
    impl BackupOperations for FakeAgent {
        async fn save_off(&mut self) -> common::Result<()> {
            self.calls.lock().unwrap().push("save-off".to_string());
            match self.save_off {
                SaveOff::Ok => Ok(()),
                SaveOff::Unavailable => Err(tonic::Status::unavailable("rcon connection error").into()),
                SaveOff::Rejected => Err(tonic::Status::internal("boom").into()),
            }
        }

        async fn save_all_flush(&mut self) -> common::Result<()> {
            self.calls.lock().unwrap().push("save-all flush".to_string());
            Ok(())
        }

        async fn save_on(&mut self) -> common::Result<()> {
            self.calls.lock().unwrap().push("save-on".to_string());
            Ok(())
        }
    }

    struct FakeConnector {
        calls: Calls,
        save_off: SaveOff,
    }

    #[async_trait]
    impl AgentConnector for FakeConnector {
        async fn connect(&self, local_port: u16) -> common::Result<Box<dyn BackupOperations>> {
            self.calls.lock().unwrap().push(format!("connect {local_port}"));
            Ok(Box::new(FakeAgent {
                calls: self.calls.clone(),
                save_off: self.save_off,
            }))
        }
    }

    fn coordinator(mc: Minecraft, executor: FakeExecutor, save_off: SaveOff) -> BackupCoordinator {
        let calls = executor.calls.clone();
        BackupCoordinator::new(
            Box::new(FakeStore(mc)),
            Box::new(executor),
            Box::new(FakeConnector { calls, save_off }),
            MINECRAFT_CONTAINER_NAME.to_string(),
        )
    }

    fn key() -> InstanceKey {
        InstanceKey::new("games", "mc")
    }

    fn entries(archive: &[u8]) -> Vec<String> {
        let mut reader = tar::Archive::new(GzDecoder::new(archive));
        reader
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let mut content = String::new();
                e.read_to_string(&mut content).unwrap();
                e.path().unwrap().display().to_string()
            })
            .collect()
    }

    #[test]
    fn test_archive_command() {
        let cmd = archive_command(&["session.lock".to_string(), "logs/*".to_string()]);
        assert_eq!(
            cmd.join(" "),
            "tar czf - -C /data --exclude session.lock --exclude logs/* ."
        );
    }

    #[tokio::test]
    async fn test_awake_server_is_saved_around_export() {
        let calls = Calls::default();
        let c = coordinator(instance(None, &["logs"]), FakeExecutor::new(&calls), SaveOff::Ok);
        let mut out = Vec::new();
        c.run(&key(), &mut out, &CancellationToken::new()).await.unwrap();

        assert_eq!(entries(&out), vec!["server.properties"]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "port-forward games/mcing-mc-0:9080",
                "connect 40000",
                "save-off",
                "save-all flush",
                "exec minecraft: tar czf - -C /data --exclude session.lock --exclude logs .",
                "save-on",
            ]
        );
    }

    #[tokio::test]
    async fn test_sleeping_server_is_exported_without_saving() {
        let calls = Calls::default();
        let mut executor = FakeExecutor::new(&calls);
        executor.tunnel_up = false;
        executor.java_running = false;
        let c = coordinator(instance(Some(true), &[]), executor, SaveOff::Ok);
        let mut out = Vec::new();
        c.run(&key(), &mut out, &CancellationToken::new()).await.unwrap();

        assert!(!out.is_empty());
        let calls = calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c.starts_with("save")));
        assert!(calls.contains(&"exec minecraft: pgrep java".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_awake_server_aborts() {
        let calls = Calls::default();
        let mut executor = FakeExecutor::new(&calls);
        executor.tunnel_up = false;
        let c = coordinator(instance(None, &[]), executor, SaveOff::Ok);
        let mut out = Vec::new();
        let err = c.run(&key(), &mut out, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, DownloadError::Tunnel(_)));
        assert!(out.is_empty());
        assert!(!calls.lock().unwrap().iter().any(|c| c.contains("tar")));
    }

    #[tokio::test]
    async fn test_probe_skipped_when_auto_pause_disabled() {
        let calls = Calls::default();
        let mut executor = FakeExecutor::new(&calls);
        executor.tunnel_up = false;
        executor.java_running = false;
        let c = coordinator(instance(Some(false), &[]), executor, SaveOff::Ok);
        let err = c
            .run(&key(), &mut Vec::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Tunnel(_)));
        assert!(!calls.lock().unwrap().iter().any(|c| c.contains("pgrep")));
    }

    #[tokio::test]
    async fn test_probe_failure_reports_both_errors() {
        let calls = Calls::default();
        let mut executor = FakeExecutor::new(&calls);
        executor.tunnel_up = false;
        executor.probe_broken = true;
        let c = coordinator(instance(None, &[]), executor, SaveOff::Ok);
        let err = c
            .run(&key(), &mut Vec::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("connection refused"));
        assert!(message.contains("container not found"));
    }

    #[tokio::test]
    async fn test_unavailable_console_counts_as_unreachable() {
        let calls = Calls::default();
        let mut executor = FakeExecutor::new(&calls);
        executor.java_running = false;
        let c = coordinator(instance(None, &[]), executor, SaveOff::Unavailable);
        let mut out = Vec::new();
        c.run(&key(), &mut out, &CancellationToken::new()).await.unwrap();
        assert!(!out.is_empty());
        let calls = calls.lock().unwrap();
        assert!(!calls.contains(&"save-all flush".to_string()));
        let save_on = calls.iter().position(|c| c == "save-on").unwrap();
        let tar = calls.iter().position(|c| c.contains("tar")).unwrap();
        assert!(save_on < tar);
    }

    #[tokio::test]
    async fn test_rejected_save_off_aborts_after_save_on() {
        let calls = Calls::default();
        let c = coordinator(instance(None, &[]), FakeExecutor::new(&calls), SaveOff::Rejected);
        let mut out = Vec::new();
        let err = c.run(&key(), &mut out, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Prepare { step: "save-off", .. }));
        assert!(out.is_empty());
        let calls = calls.lock().unwrap();
        assert_eq!(calls.last().map(String::as_str), Some("save-on"));
        assert!(!calls.iter().any(|c| c.contains("tar")));
    }

    #[tokio::test]
    async fn test_failed_export_still_turns_saving_back_on() {
        let calls = Calls::default();
        let mut executor = FakeExecutor::new(&calls);
        executor.tar_fails = true;
        let c = coordinator(instance(None, &[]), executor, SaveOff::Ok);
        let err = c
            .run(&key(), &mut Vec::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tar: /data: Cannot open"));
        assert_eq!(calls.lock().unwrap().last().map(String::as_str), Some("save-on"));
    }

    #[tokio::test]
    async fn test_cancelled_export() {
        let calls = Calls::default();
        let c = coordinator(instance(None, &[]), FakeExecutor::new(&calls), SaveOff::Ok);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = c.run(&key(), &mut Vec::new(), &cancel).await.unwrap_err();
        assert!(matches!(err, DownloadError::Archive(ExecError::Cancelled)));
        assert_eq!(calls.lock().unwrap().last().map(String::as_str), Some("save-on"));
    }
}
