//! Pod access through the Kubernetes API: port forwarding and remote commands.
use async_trait::async_trait;
use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::apis::meta::v1::Status};
use kube::{
    Client,
    api::{Api, AttachParams},
};
use std::io;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("stream error: {0}")]
    Io(#[from] io::Error),

    #[error("command exited with code {code}: {stderr}")]
    ExitCode { code: i32, stderr: String },

    #[error("command failed: {message}: {stderr}")]
    Failed { message: String, stderr: String },

    #[error("cancelled")]
    Cancelled,
}

impl ExecError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitCode { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A local port forwarded to a pod. The tunnel closes when dropped.
pub struct Tunnel {
    pub local_port: u16,
    cancel: CancellationToken,
}

impl Tunnel {
    pub fn new(local_port: u16, cancel: CancellationToken) -> Self {
        Self { local_port, cancel }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Forward a free local port to `remote_port` of the pod
    async fn port_forward(&self, namespace: &str, pod: &str, remote_port: u16) -> Result<Tunnel, ExecError>;

    /// Run `command` in a container of the pod, streaming its stdout into `stdout`.
    /// Stderr is collected and returned inside the error when the command fails.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        stdout: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancellationToken,
    ) -> Result<(), ExecError>;
}

pub struct KubeExecutor {
    client: Client,
}

impl KubeExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for KubeExecutor {
    async fn port_forward(&self, namespace: &str, pod: &str, remote_port: u16) -> Result<Tunnel, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        // fail early on a missing pod rather than on the first connection
        pods.get(pod).await?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_port = listener.local_addr()?.port();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let pod = pod.to_string();
        tokio::spawn(async move {
            loop {
                let (mut conn, _) = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!("port-forward accept failed: {e}");
                            break;
                        }
                    },
                };
                let pods = pods.clone();
                let pod = pod.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    let mut forwarder = match pods.portforward(&pod, &[remote_port]).await {
                        Ok(f) => f,
                        Err(e) => {
                            tracing::warn!(pod = %pod, "port-forward failed: {e}");
                            return;
                        }
                    };
                    let Some(mut upstream) = forwarder.take_stream(remote_port) else {
                        tracing::warn!(pod = %pod, port = remote_port, "port-forward stream missing");
                        return;
                    };
                    tokio::select! {
                        _ = token.cancelled() => {}
                        copied = tokio::io::copy_bidirectional(&mut conn, &mut upstream) => {
                            if let Err(e) = copied {
                                tracing::debug!(pod = %pod, "port-forward connection closed: {e}");
                            }
                        }
                    }
                    drop(upstream);
                    forwarder.abort();
                });
            }
        });
        tracing::debug!(local_port, remote_port, "port-forward ready");
        Ok(Tunnel::new(local_port, cancel))
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        stdout: &mut (dyn AsyncWrite + Unpin + Send),
        cancel: &CancellationToken,
    ) -> Result<(), ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut process = pods.exec(pod, command.to_vec(), &params).await?;
        let mut out = process
            .stdout()
            .ok_or_else(|| io::Error::other("remote command has no stdout"))?;
        let mut err = process
            .stderr()
            .ok_or_else(|| io::Error::other("remote command has no stderr"))?;
        let status = process.take_status();

        let streams = async {
            let (copied, stderr) = tokio::join!(tokio::io::copy(&mut out, stdout), collect_stderr(&mut err));
            copied.map(|_| stderr)
        };
        let stderr = tokio::select! {
            _ = cancel.cancelled() => {
                process.abort();
                return Err(ExecError::Cancelled);
            }
            streamed = streams => streamed?,
        };

        if let Some(status) = status {
            if let Some(status) = status.await {
                check_status(&status, &stderr)?;
            }
        }
        process.join().await.map_err(|e| ExecError::Failed {
            message: e.to_string(),
            stderr,
        })
    }
}

/// Read what a remote command wrote on stderr. Bytes that are not UTF-8 are
/// replaced, and whatever arrived before a stream error is kept.
async fn collect_stderr(stream: &mut (impl AsyncRead + Unpin)) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        tracing::warn!("failed to read remote stderr: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Turn the final status of a remote command into an error when it did not succeed
pub fn check_status(status: &Status, stderr: &str) -> Result<(), ExecError> {
    if status.status.as_deref() != Some("Failure") {
        return Ok(());
    }
    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .and_then(|causes| causes.iter().find(|c| c.reason.as_deref() == Some("ExitCode")))
            .and_then(|c| c.message.as_deref())
            .and_then(|m| m.parse::<i32>().ok());
        if let Some(code) = code {
            return Err(ExecError::ExitCode {
                code,
                stderr: stderr.trim().to_string(),
            });
        }
    }
    Err(ExecError::Failed {
        message: status.message.clone().unwrap_or_else(|| "unknown failure".to_string()),
        stderr: stderr.trim().to_string(),
    })
}
