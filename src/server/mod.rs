mod ops;
pub mod response;
mod router;
pub mod validation;

pub use router::{AppState, create_router};
