//! External/native deployment reconciliation.

pub mod events;
mod reconciler;
mod view;

pub use events::{DeploymentHandler, DeploymentStatusHandler, WorkflowRunHandler};
pub use reconciler::{DeploymentReconciler, DeploymentSource};
pub use view::DeploymentView;
