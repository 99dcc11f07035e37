use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nodeagent_core::{AgentResult, ServiceOptions};
use serde_json::Value;

use crate::client::FileChannelClient;
use crate::protocol::{timeout_args, GET_STATUS, START, STOP};

/// Configured channel timeouts below this are raised to it.
pub const MIN_CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Calls `GetStatus`, `Start` and `Stop` on the worker of one installation.
///
/// The channel client is created on first use.
#[derive(Debug)]
pub struct ServiceHostClient {
    channel_directory: PathBuf,
    app_name: String,
    default_timeout: Duration,
    client: OnceCell<FileChannelClient>,
}

impl ServiceHostClient {
    pub fn new(channel_directory: &Path, options: &ServiceOptions, configured_timeout: Duration) -> Self {
        Self {
            channel_directory: channel_directory.to_path_buf(),
            app_name: options.app_name(),
            default_timeout: configured_timeout.max(MIN_CHANNEL_TIMEOUT),
            client: OnceCell::new(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// How long one call waits: the default, unless the caller asked for
    /// longer.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|requested| *requested > self.default_timeout)
            .unwrap_or(self.default_timeout)
    }

    pub fn is_reachable(&self) -> bool {
        self.client().is_reachable()
    }

    pub fn get_status(&self) -> AgentResult<Value> {
        self.client()
            .invoke(GET_STATUS, Value::Null, Some(self.default_timeout))
    }

    /// `timeout` is handed to the hosted application and, when longer than
    /// the default, also bounds this call.
    pub fn start(&self, timeout: Option<Duration>) -> AgentResult<()> {
        self.client()
            .invoke(START, timeout_args(timeout), Some(self.effective_timeout(timeout)))?;
        Ok(())
    }

    pub fn stop(&self, timeout: Option<Duration>) -> AgentResult<()> {
        self.client()
            .invoke(STOP, timeout_args(timeout), Some(self.effective_timeout(timeout)))?;
        Ok(())
    }

    fn client(&self) -> &FileChannelClient {
        self.client
            .get_or_init(|| FileChannelClient::new(&self.channel_directory, &self.app_name))
    }
}
