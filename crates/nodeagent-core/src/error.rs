use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("package not found: {package}")]
    PackageNotFound { package: String },

    #[error("{installation} is already installed: {}", directory.display())]
    AlreadyInstalled {
        installation: String,
        directory: PathBuf,
    },

    #[error("package {package} does not declare the platform dependency '{dependency}'")]
    MissingPlatformDependency { package: String, dependency: String },

    #[error("invalid instance name '{instance}'")]
    InvalidInstance { instance: String },

    #[error("invalid package version '{version}'")]
    InvalidVersion { version: String },

    #[error("no installed applications match ({filter})")]
    NoMatchingInstallations { filter: String },

    #[error("installation {installation} is busy: directory was not deleted after {attempts} attempts")]
    DirectoryBusy { installation: String, attempts: u32 },

    #[error("control channel '{channel}' is unreachable: {reason}")]
    ChannelUnreachable { channel: String, reason: String },

    #[error("control channel '{channel}' did not answer '{operation}' within {timeout:?}")]
    ChannelTimeout {
        channel: String,
        operation: String,
        timeout: Duration,
    },

    #[error("'{operation}' failed in '{channel}': {message}")]
    RemoteOperationFailed {
        channel: String,
        operation: String,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// The domain error behind this one. `Other` is searched through its
    /// context chain, so a `PackageNotFound` wrapped by `.context(..)` is
    /// still reported as such.
    pub fn kind(&self) -> &AgentError {
        match self {
            Self::Other(error) => error
                .chain()
                .find_map(|cause| cause.downcast_ref::<AgentError>())
                .map(AgentError::kind)
                .unwrap_or(self),
            _ => self,
        }
    }

    pub fn is_channel_unreachable(&self) -> bool {
        matches!(self.kind(), Self::ChannelUnreachable { .. })
    }

    pub fn is_channel_timeout(&self) -> bool {
        matches!(self.kind(), Self::ChannelTimeout { .. })
    }
}

impl From<std::io::Error> for AgentError {
    fn from(error: std::io::Error) -> Self {
        Self::Other(error.into())
    }
}
