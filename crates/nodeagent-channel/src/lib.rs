//! Request/response control channel between the agent and a running worker.
//!
//! A channel is a rendezvous directory named after the application. The
//! server advertises itself with a heartbeat file; clients drop request
//! files and poll for the matching response file.

mod app_host;
mod client;
mod host_client;
mod host_server;
mod protocol;
mod server;

pub use app_host::{AppHost, AppHostFactory, GuardedAppHost, HostContext, HostRegistry};
pub use client::FileChannelClient;
pub use host_client::{ServiceHostClient, MIN_CHANNEL_TIMEOUT};
pub use host_server::ServiceHostServer;
pub use protocol::{
    ChannelPaths, ChannelRequest, ChannelResponse, ServerInfo, GET_STATUS, POLL_INTERVAL, START,
    STALE_HEARTBEAT, STOP,
};
pub use server::{FileChannelServer, Subscription};

#[cfg(test)]
mod tests;
