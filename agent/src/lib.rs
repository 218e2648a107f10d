//! Sidecar agent: bridges operator calls to the server console and exports
//! instance data.
pub mod download;
pub mod executor;
pub mod rcon;
pub mod serve;
pub mod serverprops;
pub mod service;
pub mod version;
pub mod watcher;
