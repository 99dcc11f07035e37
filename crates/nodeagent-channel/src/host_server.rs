use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::app_host::GuardedAppHost;
use crate::protocol::{parse_timeout_args, ChannelPaths, GET_STATUS, START, STOP};
use crate::server::{FileChannelServer, Subscription};

/// The worker side of the control channel.
///
/// `Stop` always ends with `on_shutdown`, whether the application stopped,
/// failed to stop, or was not running.
pub struct ServiceHostServer {
    server: FileChannelServer,
}

impl ServiceHostServer {
    pub fn new<S>(
        channel_directory: &Path,
        app_name: &str,
        host: Arc<GuardedAppHost>,
        on_shutdown: S,
    ) -> Self
    where
        S: Fn() + Send + Sync + 'static,
    {
        let mut server = FileChannelServer::new(channel_directory, app_name);

        let status_host = Arc::clone(&host);
        server.subscribe(
            GET_STATUS,
            Subscription::new(move |_| {
                let status = status_host.status()?;
                Ok(serde_json::json!({
                    "Started": status_host.is_started(),
                    "Status": status,
                }))
            }),
        );

        let start_host = Arc::clone(&host);
        server.subscribe(
            START,
            Subscription::new(move |args| {
                start_host.start(parse_timeout_args(&args))?;
                Ok(Value::Null)
            }),
        );

        let on_shutdown = Arc::new(on_shutdown);
        let on_stopped = Arc::clone(&on_shutdown);
        let on_failed = Arc::clone(&on_shutdown);
        server.subscribe(
            STOP,
            Subscription::new(move |args| {
                host.stop(parse_timeout_args(&args))?;
                Ok(Value::Null)
            })
            .on_success(move || (*on_stopped)())
            .on_error(move || (*on_failed)()),
        );

        Self { server }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.server = self.server.with_stop_grace(grace);
        self
    }

    pub fn paths(&self) -> &ChannelPaths {
        self.server.paths()
    }

    pub fn start(&mut self) -> Result<()> {
        self.server.start()
    }

    pub fn stop(&mut self) {
        self.server.stop();
    }
}
