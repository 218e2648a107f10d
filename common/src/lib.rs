use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Stdio error {0}")]
    Stdio(#[from] std::io::Error),

    #[error("Agent transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Agent call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Invalid agent address {0}")]
    InvalidAddress(String),

    #[error("Error: {0}")]
    Other(String),
}
impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::SerializationError(_) => "serialization",
            Error::KubeError(_) => "kube",
            Error::Stdio(_) => "stdio",
            Error::Transport(_) => "transport",
            Error::Rpc(_) => "rpc",
            Error::InvalidAddress(_) => "address",
            Error::Other(_) => "other",
        }
        .to_string()
    }

    /// True when the agent could not be reached at all, as opposed to the agent
    /// answering with a failure.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Rpc(status) => status.code() == tonic::Code::Unavailable,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod agentconn;
pub mod constants;
pub mod minecraft;
pub mod proto;

pub use minecraft::{InstanceKey, Minecraft};
