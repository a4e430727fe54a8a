use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::InboundMessage;
use super::subject;
use crate::error::Result;

/// When a handler wants its message acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Ack on receipt. For long-running or best-effort handlers; a crash
    /// mid-handler loses the message.
    BeforeProcessing,
    /// Ack once the handler returns, whatever the outcome.
    AfterProcessing,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Trailing subject token this handler consumes, e.g. `deployment_status`.
    fn event_type(&self) -> &'static str;

    fn ack_mode(&self) -> AckMode {
        AckMode::AfterProcessing
    }

    async fn handle(&self, subject: &str, payload: &[u8]) -> Result<()>;
}

struct Registered {
    patterns: Vec<String>,
    handler: Arc<dyn EventHandler>,
}

/// Registered handlers plus the subject scope they are subscribed under.
pub struct HandlerRegistry {
    prefix: String,
    repositories: Vec<(String, String)>,
    handlers: Vec<Registered>,
}

impl HandlerRegistry {
    /// `repositories` holds `owner/name` entries; empty subscribes to all.
    pub fn new(prefix: impl Into<String>, repositories: &[String]) -> Self {
        let repositories = repositories
            .iter()
            .filter_map(|full_name| {
                full_name
                    .split_once('/')
                    .map(|(owner, name)| (owner.to_string(), name.to_string()))
            })
            .collect();

        Self {
            prefix: prefix.into(),
            repositories,
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) -> &mut Self {
        let event_type = handler.event_type();
        let patterns = if self.repositories.is_empty() {
            vec![subject::for_repository(
                &self.prefix,
                subject::WILDCARD,
                subject::WILDCARD,
                event_type,
            )]
        } else {
            self.repositories
                .iter()
                .map(|(owner, name)| subject::for_repository(&self.prefix, owner, name, event_type))
                .collect()
        };

        debug!(event_type, ?patterns, "Registered event handler");
        self.handlers.push(Registered { patterns, handler });
        self
    }

    /// Sorted, de-duplicated filter set across all handlers.
    #[must_use]
    pub fn subjects(&self) -> Vec<String> {
        self.handlers
            .iter()
            .flat_map(|r| r.patterns.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// First handler with a pattern matching `subject`.
    #[must_use]
    pub fn resolve(&self, subject: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers
            .iter()
            .find(|r| r.patterns.iter().any(|p| subject::matches(p, subject)))
            .map(|r| &r.handler)
    }
}

/// Result of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Handled,
    HandlerFailed,
    Unroutable,
}

async fn ack(message: &dyn InboundMessage) {
    if let Err(e) = message.ack().await {
        warn!(subject = message.subject(), "Failed to ack message: {e}");
    }
}

/// Routes one message to its handler. Handler errors are logged and the
/// message is acknowledged regardless, so a poison message cannot cause a
/// redelivery loop.
pub async fn dispatch(registry: &HandlerRegistry, message: &dyn InboundMessage) -> Dispatched {
    let subject = message.subject();

    let Some(handler) = registry.resolve(subject) else {
        warn!(subject, "No handler registered for subject");
        ack(message).await;
        return Dispatched::Unroutable;
    };

    let mode = handler.ack_mode();
    if mode == AckMode::BeforeProcessing {
        ack(message).await;
    }

    let outcome = match handler.handle(subject, message.payload()).await {
        Ok(()) => {
            debug!(subject, "Event handled");
            Dispatched::Handled
        }
        Err(e) => {
            error!(subject, event_type = handler.event_type(), "Event handler failed: {e}");
            Dispatched::HandlerFailed
        }
    };

    if mode == AckMode::AfterProcessing {
        ack(message).await;
    }
    outcome
}
