use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// State of a deployment as the platform reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Pending,
    InProgress,
    Success,
    Failure,
    Unknown,
}

impl DeploymentState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Maps a deployment status string from a webhook payload.
    #[must_use]
    pub fn from_platform_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "pending" | "queued" | "waiting" => Self::Pending,
            "in_progress" => Self::InProgress,
            "success" => Self::Success,
            "failure" | "error" => Self::Failure,
            _ => Self::Unknown,
        }
    }

    pub const IN_FLIGHT: [DeploymentState; 2] = [Self::Pending, Self::InProgress];
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(Error::Config(format!("unknown deployment state: {other}"))),
        }
    }
}

/// Status of a deployment started by this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NativeStatus {
    Waiting,
    Queued,
    InProgress,
    DeploymentSuccess,
    Failed,
    IoError,
    Unknown,
}

impl NativeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::DeploymentSuccess => "DEPLOYMENT_SUCCESS",
            Self::Failed => "FAILED",
            Self::IoError => "IO_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Fixed table used when a native deployment is shown next to external ones.
    #[must_use]
    pub fn to_deployment_state(&self) -> DeploymentState {
        match self {
            Self::Waiting | Self::Queued => DeploymentState::Pending,
            Self::InProgress => DeploymentState::InProgress,
            Self::DeploymentSuccess => DeploymentState::Success,
            Self::Failed => DeploymentState::Failure,
            Self::IoError | Self::Unknown => DeploymentState::Unknown,
        }
    }

    /// Inverse direction, applied when an external deployment confirms a native one.
    #[must_use]
    pub fn from_deployment_state(state: DeploymentState) -> Self {
        match state {
            DeploymentState::Pending => Self::Queued,
            DeploymentState::InProgress => Self::InProgress,
            DeploymentState::Success => Self::DeploymentSuccess,
            DeploymentState::Failure => Self::Failed,
            DeploymentState::Unknown => Self::Unknown,
        }
    }

    // WAITING sits on a human approval, so it is not counted as in flight.
    pub const IN_FLIGHT: [NativeStatus; 2] = [Self::Queued, Self::InProgress];
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NativeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "QUEUED" => Ok(Self::Queued),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "DEPLOYMENT_SUCCESS" => Ok(Self::DeploymentSuccess),
            "FAILED" => Ok(Self::Failed),
            "IO_ERROR" => Ok(Self::IoError),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(Error::Config(format!("unknown native status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncRunStatus {
    InProgress,
    Success,
    Failed,
}

impl SyncRunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncRunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(Error::Config(format!("unknown sync run status: {other}"))),
        }
    }
}
