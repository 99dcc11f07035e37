use serde::{Deserialize, Serialize};

use crate::installation::InstallationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Running,
    Stopped,
}

/// What the process inspector knows about a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at_unix: Option<u64>,
}

impl ProcessInfo {
    pub fn stopped() -> Self {
        Self {
            id: None,
            state: ProcessState::Stopped,
            module_name: None,
            file_version: None,
            product_name: None,
            started_at_unix: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }
}

/// Contents of `worker.pid`, written by a running worker and removed when it
/// exits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProcessRecord {
    pub pid: u32,
    pub started_at_unix: u64,
    pub module_name: String,
    pub file_version: String,
    #[serde(default)]
    pub product_name: Option<String>,
}

impl WorkerProcessRecord {
    pub fn running_info(&self) -> ProcessInfo {
        ProcessInfo {
            id: Some(self.pid),
            state: ProcessState::Running,
            module_name: Some(self.module_name.clone()),
            file_version: Some(self.file_version.clone()),
            product_name: self.product_name.clone(),
            started_at_unix: Some(self.started_at_unix),
        }
    }
}

/// One element of the `status` report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppStatus {
    pub id: String,
    pub version: String,
    pub instance: String,
    pub app_full_name: String,
    pub process_info: ProcessInfo,
    pub status: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl AppStatus {
    pub fn new(installation: &InstallationRecord, process_info: ProcessInfo) -> Self {
        Self {
            id: installation.package_id.clone(),
            version: installation.package_version.clone(),
            instance: installation.instance.clone(),
            app_full_name: installation.app_name(),
            process_info,
            status: None,
            error: None,
        }
    }
}
