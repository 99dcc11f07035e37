use std::time::Duration;

use anyhow::Result;
use nodeagent_core::{
    AgentResult, AppStatus, InstallationFilter, InstallationRecord, ProcessInfo, ServiceOptions,
};

use crate::context::Agent;

/// One status entry per matching installation. Failures are reported in the
/// entry's `Error` field and never abort the batch.
pub(crate) fn run_status(
    agent: &Agent<'_>,
    filter: &InstallationFilter,
    timeout: Option<Duration>,
) -> AgentResult<Vec<AppStatus>> {
    let installations = agent.layout.find(filter)?;
    Ok(installations
        .iter()
        .map(|installation| installation_status(agent, installation, timeout))
        .collect())
}

fn installation_status(
    agent: &Agent<'_>,
    installation: &InstallationRecord,
    timeout: Option<Duration>,
) -> AppStatus {
    let process = match agent.inspector.find_running(installation) {
        Ok(process) => process,
        Err(err) => {
            tracing::warn!(installation = %installation, error = %err, "failed inspecting worker process");
            let mut status = AppStatus::new(installation, ProcessInfo::stopped());
            status.error = Some(err.to_string());
            return status;
        }
    };

    let Some(process) = process else {
        return AppStatus::new(installation, ProcessInfo::stopped());
    };

    let mut status = AppStatus::new(installation, process);
    let options = ServiceOptions::from_installation(installation).with_timeout(timeout);
    match agent.host_client(&options).get_status() {
        Ok(value) => status.status = Some(value),
        Err(err) => {
            tracing::warn!(installation = %installation, error = %err, "failed reading application status");
            status.error = Some(err.to_string());
        }
    }
    status
}

/// Package ids on the feeds containing `term`.
pub(crate) fn run_packages(
    agent: &Agent<'_>,
    term: &str,
    allow_prerelease: bool,
) -> Result<Vec<String>> {
    let ids = agent.repository.search(term, allow_prerelease)?;
    tracing::debug!(term, count = ids.len(), "searched package feeds");
    Ok(ids)
}
