//! Remote console client.
//!
//! A [`Rcon`] session wraps one [`Console`] connection. The protocol is strictly
//! half-duplex: every write is followed by exactly one read, and the id of the
//! response must match the id of the request. A mismatch means the two sides are
//! out of step, so the session refuses any further command and the caller has to
//! dial a new one.
mod conn;
pub use conn::RemoteConsole;

use async_trait::async_trait;
use thiserror::Error;

/// Literal answer of the server to `op` for an unknown player
pub const PLAYER_NOT_EXIST: &str = "That player does not exist";

#[derive(Error, Debug)]
pub enum RconError {
    #[error("rcon connection error: {0}")]
    Connection(#[source] std::io::Error),

    #[error("rcon authentication rejected")]
    Auth,

    #[error("rcon desynchronized: sent request {expected} but got response {got}")]
    Desync { expected: i32, got: i32 },

    #[error("rcon session is no longer usable")]
    Closed,

    #[error("invalid whitelist action {0:?}, expected add or remove")]
    InvalidAction(String),

    #[error("failed to make operator: {}", .0.join(", "))]
    OpFailed(Vec<String>),
}

pub type Result<T, E = RconError> = std::result::Result<T, E>;

/// Wire-level access to a remote console
#[async_trait]
pub trait Console: Send {
    /// Send one command line, returning the id assigned to the request
    async fn write(&mut self, cmd: &str) -> std::io::Result<i32>;
    /// Read one response and the id of the request it answers
    async fn read(&mut self) -> std::io::Result<(String, i32)>;
}

pub struct Rcon {
    console: Box<dyn Console>,
    broken: bool,
}

impl Rcon {
    pub fn new(console: Box<dyn Console>) -> Self {
        Self { console, broken: false }
    }

    pub fn is_usable(&self) -> bool {
        !self.broken
    }

    pub async fn execute(&mut self, command: &[&str]) -> Result<String> {
        if self.broken {
            return Err(RconError::Closed);
        }
        let line = command.join(" ");
        tracing::debug!(command = %line, "rcon execute");
        // stays set until the matching response is read, so a call dropped
        // between write and read leaves the session unusable
        self.broken = true;
        let expected = self.console.write(&line).await.map_err(RconError::Connection)?;
        let (response, got) = self.console.read().await.map_err(RconError::Connection)?;
        if got != expected {
            return Err(RconError::Desync { expected, got });
        }
        self.broken = false;
        Ok(response)
    }

    pub async fn reload(&mut self) -> Result<()> {
        self.execute(&["reload"]).await?;
        Ok(())
    }

    pub async fn whitelist_switch(&mut self, enabled: bool) -> Result<()> {
        self.execute(&["whitelist", if enabled { "on" } else { "off" }]).await?;
        Ok(())
    }

    pub async fn whitelist(&mut self, action: &str, user: &str) -> Result<()> {
        match action {
            "add" | "remove" => {
                self.execute(&["whitelist", action, user]).await?;
                Ok(())
            }
            _ => Err(RconError::InvalidAction(action.to_string())),
        }
    }

    pub async fn list_whitelist(&mut self) -> Result<Vec<String>> {
        let response = self.execute(&["whitelist", "list"]).await?;
        Ok(parse_whitelist(&response))
    }

    /// Make every user an operator. Unknown players do not stop the loop; they
    /// are reported together once every user has been tried.
    pub async fn op(&mut self, users: &[String]) -> Result<()> {
        let mut missing = Vec::new();
        for user in users {
            let response = self.execute(&["op", user.as_str()]).await?;
            if response.trim() == PLAYER_NOT_EXIST {
                tracing::warn!(user = %user, "cannot make operator, player does not exist");
                missing.push(user.clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RconError::OpFailed(missing))
        }
    }

    pub async fn deop(&mut self, users: &[String]) -> Result<()> {
        for user in users {
            self.execute(&["deop", user.as_str()]).await?;
        }
        Ok(())
    }

    pub async fn save_off(&mut self) -> Result<()> {
        self.execute(&["save-off"]).await?;
        Ok(())
    }

    pub async fn save_all_flush(&mut self) -> Result<()> {
        self.execute(&["save-all", "flush"]).await?;
        Ok(())
    }

    pub async fn save_on(&mut self) -> Result<()> {
        self.execute(&["save-on"]).await?;
        Ok(())
    }
}

// There are 2 whitelisted players: hoge, fuga
fn parse_whitelist(response: &str) -> Vec<String> {
    let Some((_, users)) = response.split_once(':') else {
        return Vec::new();
    };
    let users = users.trim();
    if users.is_empty() {
        return Vec::new();
    }
    users.split(',').map(|u| u.trim().to_string()).collect()
}
