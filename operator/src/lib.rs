use async_trait::async_trait;
use kube::runtime::controller::Action;
use manager::Context;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("pod {0} has no IP yet")]
    NoAddress(String),

    #[error("Agent Error: {0}")]
    AgentError(#[source] common::Error),

    #[error("IllegalMinecraft")]
    IllegalMinecraft,
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    #[must_use]
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube".to_string(),
            Error::FinalizerError(_) => "finalizer".to_string(),
            Error::NoAddress(_) => "no_address".to_string(),
            Error::AgentError(e) => format!("agent_{}", e.metric_label()),
            Error::IllegalMinecraft => "illegal_minecraft".to_string(),
        }
    }

    /// Expected states that the next sync pass is likely to get past
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NoAddress(_))
    }
}

#[async_trait]
pub trait Reconciler {
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action>;
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action>;
}

pub mod minecraft;
pub mod process;
pub mod registry;

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::Manager;

/// Generated type, for crdgen
pub use common::Minecraft;

/// Metrics
mod metrics;
pub use metrics::Metrics;
