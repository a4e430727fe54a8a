//! # Deckhand
//!
//! Keeps a local database of a source platform's repositories, environments
//! and deployments in step with the platform. Webhook events arrive through a
//! durable JetStream consumer; a rate-limited pull sync against the REST API
//! fills the gaps; periodic loops fail stuck deployments and release expired
//! environment locks.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! deckhand = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use deckhand::config::Settings;
//! use deckhand::platform::GitHubClient;
//! use deckhand::store::{SqliteStore, Store};
//! use deckhand::sync::SyncOrchestrator;
//!
//! let settings = Settings::load("deckhand.toml")?;
//! let store = SqliteStore::new(settings.db_path())?;
//! store.initialize()?;
//!
//! let orchestrator = SyncOrchestrator::new(
//!     Arc::new(store),
//!     Arc::new(GitHubClient::new(&settings.github)?),
//!     &settings.sync,
//! );
//! let outcome = orchestrator.sync_repository("acme/shop").await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `deckhand` binary. Disable with `default-features = false`.

pub mod backoff;
pub mod bus;
pub mod config;
pub mod deploy;
pub mod error;
pub mod platform;
pub mod recovery;
pub mod server;
pub mod store;
pub mod sync;
pub mod types;
