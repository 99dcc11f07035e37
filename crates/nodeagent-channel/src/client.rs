use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use nodeagent_core::{AgentError, AgentResult};
use serde_json::Value;

use crate::protocol::{
    new_request_id, now_unix_ms, read_json, write_json_atomic, ChannelPaths, ChannelRequest,
    ChannelResponse, POLL_INTERVAL,
};

/// Sends requests to the server listening on one channel.
#[derive(Debug, Clone)]
pub struct FileChannelClient {
    name: String,
    paths: ChannelPaths,
}

impl FileChannelClient {
    pub fn new(channel_directory: &Path, app_name: &str) -> Self {
        Self {
            name: app_name.to_string(),
            paths: ChannelPaths::new(channel_directory, app_name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_reachable(&self) -> bool {
        self.check_server().is_ok()
    }

    /// Fails with [`AgentError::ChannelUnreachable`] unless a server with a
    /// fresh heartbeat is listening.
    pub fn check_server(&self) -> AgentResult<()> {
        let info = self
            .paths
            .read_server_info()
            .map_err(|err| self.unreachable(format!("{err:#}")))?
            .ok_or_else(|| self.unreachable("no server is listening"))?;
        if info.is_stale(now_unix_ms()) {
            return Err(self.unreachable(format!(
                "server heartbeat from pid {} is stale",
                info.pid
            )));
        }
        Ok(())
    }

    /// Sends one request and waits for its response. `None` waits without
    /// limit. On timeout the request is withdrawn if the server has not
    /// claimed it yet; otherwise the outcome is unknown.
    pub fn invoke(
        &self,
        operation: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> AgentResult<Value> {
        self.check_server()?;
        self.paths.ensure_dirs()?;

        let request = ChannelRequest {
            id: new_request_id(),
            operation: operation.to_string(),
            args,
        };
        let request_path = self.paths.request_path(&request.id);
        let response_path = self.paths.response_path(&request.id);
        write_json_atomic(&request_path, &request)?;
        tracing::debug!(channel = %self.name, operation, request = %request.id, "sent request");

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(response) = self.take_response(&response_path)? {
                return self.into_result(operation, response);
            }

            if let Err(err) = self.check_server() {
                // The server may answer and exit between the two checks.
                if let Some(response) = self.take_response(&response_path)? {
                    return self.into_result(operation, response);
                }
                withdraw(&request_path);
                return Err(err);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let withdrawn = withdraw(&request_path);
                tracing::warn!(
                    channel = %self.name,
                    operation,
                    withdrawn,
                    "request timed out"
                );
                return Err(AgentError::ChannelTimeout {
                    channel: self.name.clone(),
                    operation: operation.to_string(),
                    timeout: timeout.unwrap_or_default(),
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn take_response(&self, path: &Path) -> AgentResult<Option<ChannelResponse>> {
        let Some(response) = read_json::<ChannelResponse>(path)? else {
            return Ok(None);
        };
        if let Err(err) = fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %err, "failed removing response");
        }
        Ok(Some(response))
    }

    fn into_result(&self, operation: &str, response: ChannelResponse) -> AgentResult<Value> {
        match response.error {
            Some(message) => Err(AgentError::RemoteOperationFailed {
                channel: self.name.clone(),
                operation: operation.to_string(),
                message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    fn unreachable(&self, reason: impl Into<String>) -> AgentError {
        AgentError::ChannelUnreachable {
            channel: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Removes a request the server has not claimed. Returns whether it did.
fn withdraw(request_path: &Path) -> bool {
    match fs::remove_file(request_path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            tracing::debug!(path = %request_path.display(), error = %err, "failed withdrawing request");
            false
        }
    }
}
