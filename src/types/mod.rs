mod models;
mod state;

pub use models::*;
pub use state::{DeploymentState, NativeStatus, SyncRunStatus};
