use crate::service::AgentService;
use common::constants::SERVER_PROPS_NAME;
use std::{collections::BTreeMap, io, path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;

/// Files mirrored from the mounted config directory into the data directory
const WATCHED: &[&str] = &[SERVER_PROPS_NAME];

/// Copies updated config files into the data directory and reloads the server
pub struct ConfigWatcher {
    config_dir: PathBuf,
    data_dir: PathBuf,
    seen: BTreeMap<&'static str, Vec<u8>>,
}

impl ConfigWatcher {
    /// Record the current content of every watched file as the baseline
    pub async fn new(config_dir: PathBuf, data_dir: PathBuf) -> io::Result<Self> {
        let mut seen = BTreeMap::new();
        for name in WATCHED {
            seen.insert(*name, tokio::fs::read(config_dir.join(name)).await?);
        }
        Ok(Self {
            config_dir,
            data_dir,
            seen,
        })
    }

    /// Copy changed files over, returning the names of those copied.
    /// Unreadable files are skipped until the next check.
    pub async fn check(&mut self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        for (name, previous) in self.seen.iter_mut() {
            let current = match tokio::fs::read(self.config_dir.join(name)).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(file = *name, "cannot read config file: {e}");
                    continue;
                }
            };
            if current == *previous {
                continue;
            }
            if let Err(e) = tokio::fs::write(self.data_dir.join(name), &current).await {
                tracing::warn!(file = *name, "cannot copy config file: {e}");
                continue;
            }
            tracing::info!(file = *name, "config file updated");
            *previous = current;
            changed.push(*name);
        }
        changed
    }

    pub async fn run(mut self, service: AgentService, interval: Duration, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(interval);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("config watcher stopped");
                    return;
                }
                _ = tick.tick() => {}
            }
            if self.check().await.is_empty() {
                continue;
            }
            let reloaded = match service.session().await {
                Ok(mut rcon) => rcon.reload().await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = reloaded {
                tracing::error!("reload after config change failed: {e}");
            }
        }
    }
}
