mod content;
mod error;
mod identity;
mod installation;
mod manifest;
mod options;
mod status;

pub use content::{PackageContent, PackageFile};
pub use error::{AgentError, AgentResult};
pub use identity::{
    app_name, is_valid_instance, is_valid_package_id, parse_package_version, PackageIdentity,
    INSTANCE_DELIMITER,
};
pub use installation::{
    InstallationFilter, InstallationRecord, SERVICE_FILE_NAME, WORKER_PID_FILE_NAME,
};
pub use manifest::{PackageManifest, WorkerSpec, DEFAULT_WORKER_HOST, MANIFEST_FILE_NAME};
pub use options::ServiceOptions;
pub use status::{AppStatus, ProcessInfo, ProcessState, WorkerProcessRecord};
