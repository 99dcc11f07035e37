use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GET_STATUS: &str = "GetStatus";
pub const START: &str = "Start";
pub const STOP: &str = "Stop";

/// A server whose heartbeat is older than this is treated as gone.
pub const STALE_HEARTBEAT: Duration = Duration::from_secs(3);
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);
pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

const SERVER_FILE_NAME: &str = "server.json";
const REQUESTS_DIR: &str = "requests";
const PROCESSING_DIR: &str = "processing";
const RESPONSES_DIR: &str = "responses";
const MESSAGE_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub pid: u32,
    pub heartbeat_unix_ms: u64,
}

impl ServerInfo {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            heartbeat_unix_ms: now_unix_ms(),
        }
    }

    pub fn is_stale(&self, now_unix_ms: u64) -> bool {
        now_unix_ms.saturating_sub(self.heartbeat_unix_ms) > STALE_HEARTBEAT.as_millis() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub id: String,
    pub operation: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelResponse {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// File locations of one channel: `<channel_directory>/<app_name>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    root: PathBuf,
}

impl ChannelPaths {
    pub fn new(channel_directory: &Path, app_name: &str) -> Self {
        Self {
            root: channel_directory.join(app_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_file(&self) -> PathBuf {
        self.root.join(SERVER_FILE_NAME)
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.root.join(REQUESTS_DIR)
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.root.join(PROCESSING_DIR)
    }

    pub fn responses_dir(&self) -> PathBuf {
        self.root.join(RESPONSES_DIR)
    }

    pub fn request_path(&self, id: &str) -> PathBuf {
        self.requests_dir().join(message_file_name(id))
    }

    pub fn processing_path(&self, id: &str) -> PathBuf {
        self.processing_dir().join(message_file_name(id))
    }

    pub fn response_path(&self, id: &str) -> PathBuf {
        self.responses_dir().join(message_file_name(id))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.requests_dir(), self.processing_dir(), self.responses_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn read_server_info(&self) -> Result<Option<ServerInfo>> {
        read_json(&self.server_file())
    }
}

fn message_file_name(id: &str) -> String {
    format!("{id}.{MESSAGE_EXTENSION}")
}

/// The request id behind a message file name, if it is one.
pub(crate) fn message_id(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(MESSAGE_EXTENSION) {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// Writes `value` next to `path` and renames it into place, so readers never
/// observe a partial message.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let staging = path.with_extension("tmp");
    let content = serde_json::to_vec(value)
        .with_context(|| format!("failed serializing {}", path.display()))?;
    fs::write(&staging, content)
        .with_context(|| format!("failed writing {}", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("failed moving {} into place", path.display()))
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()));
        }
    };
    let value = serde_json::from_slice(&content)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    Ok(Some(value))
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

pub(crate) fn new_request_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("{}-{nanos}-{sequence}", std::process::id())
}

/// `{"Timeout": seconds}` or `{"Timeout": null}` for no limit.
pub(crate) fn timeout_args(timeout: Option<Duration>) -> Value {
    serde_json::json!({ "Timeout": timeout.map(|timeout| timeout.as_secs_f64()) })
}

pub(crate) fn parse_timeout_args(args: &Value) -> Option<Duration> {
    args.get("Timeout")
        .and_then(Value::as_f64)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
