//! Messages of the `mcing.Agent` service.
//!
//! The service stubs are generated by `build.rs`; the messages are plain prost
//! structs so no protoc is needed at build time.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReloadRequest {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReloadResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncWhitelistRequest {
    #[prost(bool, tag = "1")]
    pub enabled: bool,
    #[prost(string, repeated, tag = "2")]
    pub users: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncWhitelistResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncOpsRequest {
    #[prost(string, repeated, tag = "1")]
    pub users: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncOpsResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SaveOffRequest {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SaveOffResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SaveAllFlushRequest {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SaveAllFlushResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SaveOnRequest {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SaveOnResponse {}

include!(concat!(env!("OUT_DIR"), "/mcing.Agent.rs"));

pub use agent_client::AgentClient;
pub use agent_server::{Agent, AgentServer};
