use crate::constants::BACKUP_BASELINE_EXCLUDE;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whitelist represents the whitelist.json file
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Whitelist {
    /// exec /whitelist on
    pub enabled: bool,
    /// user names for /whitelist add or /whitelist remove
    #[serde(default)]
    pub users: Vec<String>,
}

/// Ops represents the ops.json file
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ops {
    /// user names for /op or /deop
    #[serde(default)]
    pub users: Vec<String>,
}

/// AutoPause stops the server process while nobody is connected
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoPause {
    /// Enables the auto-pause function. Default to true
    pub enabled: Option<bool>,
    /// Time in seconds to wait before pausing the server. Default to 300
    #[serde(default = "default_pause_timeout")]
    pub timeout_seconds: u32,
}
fn default_pause_timeout() -> u32 {
    300
}
impl Default for AutoPause {
    fn default() -> Self {
        Self {
            enabled: None,
            timeout_seconds: default_pause_timeout(),
        }
    }
}

/// Backup configuration
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// File patterns to exclude from the backup
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Describe a managed minecraft server
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Minecraft",
    shortname = "mc",
    group = "mcing.kmdkuk.com",
    version = "v1alpha1",
    namespaced
)]
#[kube(
    doc = "Custom resource representing a managed Minecraft server",
    printcolumn = r#"
    {"name":"whitelist", "type":"boolean", "description":"Whitelist enabled", "jsonPath":".spec.whitelist.enabled"},
    {"name":"autopause", "type":"boolean", "description":"Auto-pause enabled", "jsonPath":".spec.autoPause.enabled"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftSpec {
    /// Operators on the server
    #[serde(default)]
    pub ops: Ops,
    /// Whitelist of the server
    #[serde(default)]
    pub whitelist: Whitelist,
    /// Auto-pause configuration
    #[serde(default)]
    pub auto_pause: AutoPause,
    /// Backup configuration
    #[serde(default)]
    pub backup: Backup,
}

impl Minecraft {
    pub fn prefixed_name(&self) -> String {
        format!("mcing-{}", self.name_any())
    }

    pub fn pod_name(&self) -> String {
        format!("{}-0", self.prefixed_name())
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    pub fn auto_pause_enabled(&self) -> bool {
        self.spec.auto_pause.enabled.unwrap_or(true)
    }

    /// Patterns left out of a data export: the baseline lock file then the declared ones
    pub fn backup_excludes(&self) -> Vec<String> {
        let mut excludes = vec![BACKUP_BASELINE_EXCLUDE.to_string()];
        excludes.extend(self.spec.backup.excludes.iter().cloned());
        excludes
    }
}

/// Identity of a managed instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
