use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{DeploymentState, ExternalDeployment, NativeDeployment};

/// The deployment to show for one environment, whichever side produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentView {
    External(ExternalDeployment),
    Native(NativeDeployment),
}

impl DeploymentView {
    #[must_use]
    pub fn environment_id(&self) -> i64 {
        match self {
            Self::External(d) => d.environment_id,
            Self::Native(d) => d.environment_id,
        }
    }

    #[must_use]
    pub fn sha(&self) -> &str {
        match self {
            Self::External(d) => &d.sha,
            Self::Native(d) => &d.sha,
        }
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::External(d) => d.updated_at,
            Self::Native(d) => d.updated_at,
        }
    }

    /// Platform-vocabulary state, translating native statuses.
    #[must_use]
    pub fn state(&self) -> DeploymentState {
        match self {
            Self::External(d) => d.state,
            Self::Native(d) => d.status.to_deployment_state(),
        }
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}
