use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::handler::{HandlerRegistry, dispatch};
use super::{ConsumerAdmin, ConsumerSpec, DeliverFrom, DeliveryError, MessageStream};
use crate::backoff;
use crate::config::{NatsConfig, SyncConfig};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub durable_name: Option<String>,
    pub ack_wait: Duration,
    pub inactive_threshold: Duration,
    /// How far back a newly created consumer starts replaying.
    pub replay_window: chrono::Duration,
}

impl ConsumerSettings {
    #[must_use]
    pub fn from_config(nats: &NatsConfig, sync: &SyncConfig) -> Self {
        Self {
            durable_name: nats.durable_name.clone().filter(|n| !n.is_empty()),
            ack_wait: nats.ack_wait(),
            inactive_threshold: nats.inactive_threshold(),
            replay_window: sync.timeframe(),
        }
    }
}

struct Subscription {
    spec: ConsumerSpec,
    pump: JoinHandle<()>,
}

/// Owns the durable subscription: computes the filter set, creates or updates
/// the consumer, runs the dispatch pump and rebuilds everything when the bus
/// reports the consumer gone.
pub struct ConsumerManager {
    admin: Arc<dyn ConsumerAdmin>,
    registry: Arc<HandlerRegistry>,
    settings: ConsumerSettings,
    // Held only while tearing down or rebuilding, never across dispatch.
    subscription: Mutex<Option<Subscription>>,
    lost: Arc<Notify>,
}

impl ConsumerManager {
    pub fn new(
        admin: Arc<dyn ConsumerAdmin>,
        registry: HandlerRegistry,
        settings: ConsumerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            admin,
            registry: Arc::new(registry),
            settings,
            subscription: Mutex::new(None),
            lost: Arc::new(Notify::new()),
        })
    }

    /// Subscribes and spawns the supervisor that keeps the subscription alive.
    /// A failed first attempt is retried by the supervisor rather than returned.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        if let Err(e) = self.reconfigure().await {
            error!("Initial consumer setup failed, will retry: {e}");
            self.lost.notify_one();
        }
        self.spawn_supervisor(cancel)
    }

    /// Recomputes the filter set and creates or updates the consumer.
    pub async fn reconfigure(&self) -> Result<ConsumerSpec> {
        let mut slot = self.subscription.lock().await;
        self.rebuild(&mut slot).await
    }

    /// Drops the local subscription and builds it again from scratch.
    pub async fn reinitialize(&self) -> Result<ConsumerSpec> {
        let mut slot = self.subscription.lock().await;
        if let Some(old) = slot.take() {
            old.pump.abort();
            info!(durable = ?old.spec.durable_name, "Tore down consumer subscription");
        }
        self.rebuild(&mut slot).await
    }

    pub async fn current_spec(&self) -> Option<ConsumerSpec> {
        self.subscription
            .lock()
            .await
            .as_ref()
            .map(|s| s.spec.clone())
    }

    pub async fn shutdown(&self) {
        if let Some(old) = self.subscription.lock().await.take() {
            old.pump.abort();
        }
    }

    async fn rebuild(&self, slot: &mut Option<Subscription>) -> Result<ConsumerSpec> {
        let spec = self.desired_spec().await?;
        let stream = self.admin.open(&spec).await?;

        if let Some(old) = slot.take() {
            old.pump.abort();
        }

        info!(
            durable = ?spec.durable_name,
            subjects = spec.filter_subjects.len(),
            deliver_from = ?spec.deliver_from,
            "Consumer subscription ready"
        );

        let pump = tokio::spawn(pump(stream, self.registry.clone(), self.lost.clone()));
        *slot = Some(Subscription {
            spec: spec.clone(),
            pump,
        });
        Ok(spec)
    }

    async fn desired_spec(&self) -> Result<ConsumerSpec> {
        let start = DeliverFrom::StartTime(Utc::now() - self.settings.replay_window);

        let deliver_from = match &self.settings.durable_name {
            Some(name) => match self.admin.find_consumer(name).await? {
                Some(existing) => {
                    info!(
                        durable = %existing.name,
                        subjects = existing.filter_subjects.len(),
                        "Updating existing durable consumer"
                    );
                    DeliverFrom::Existing
                }
                None => start,
            },
            None => start,
        };

        Ok(ConsumerSpec {
            durable_name: self.settings.durable_name.clone(),
            filter_subjects: self.registry.subjects(),
            deliver_from,
            ack_wait: self.settings.ack_wait,
            inactive_threshold: self.settings.inactive_threshold,
        })
    }

    fn spawn_supervisor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = manager.lost.notified() => {}
                }

                let mut attempt = 0;
                loop {
                    attempt += 1;
                    match manager.reinitialize().await {
                        Ok(_) => break,
                        Err(e) => {
                            let delay = backoff::delay_for_attempt(attempt);
                            error!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Consumer reinitialization failed: {e}"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    manager.shutdown().await;
                                    return;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }

            manager.shutdown().await;
            info!("Consumer supervisor stopped");
        })
    }
}

async fn pump(mut stream: MessageStream, registry: Arc<HandlerRegistry>, lost: Arc<Notify>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                // Own task, so a panicking handler costs only this message.
                // If it was not acked yet the bus redelivers it after ack_wait.
                let subject = message.subject().to_string();
                let registry = registry.clone();
                let handled =
                    tokio::spawn(async move { dispatch(&registry, message.as_ref()).await });
                if let Err(e) = handled.await {
                    error!(subject = %subject, "Event dispatch aborted: {e}");
                }
            }
            Err(DeliveryError::ConsumerDeleted) => {
                warn!("Consumer was deleted on the bus");
                lost.notify_one();
                return;
            }
            Err(DeliveryError::Transport(e)) => {
                warn!("Delivery error, waiting for the connection to recover: {e}");
            }
        }
    }

    warn!("Delivery stream ended");
    lost.notify_one();
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use futures::channel::mpsc;

    use super::*;
    use crate::bus::handler::EventHandler;
    use crate::bus::{ConsumerState, InboundMessage};

    type Feed = mpsc::UnboundedSender<std::result::Result<Box<dyn InboundMessage>, DeliveryError>>;

    /// In-memory stand-in for the JetStream admin API.
    #[derive(Default)]
    struct FakeBus {
        existing: StdMutex<HashSet<String>>,
        opened: StdMutex<Vec<ConsumerSpec>>,
        feeds: StdMutex<Vec<Feed>>,
    }

    impl FakeBus {
        fn opened(&self) -> Vec<ConsumerSpec> {
            self.opened.lock().unwrap().clone()
        }

        fn feed(&self, index: usize) -> Feed {
            self.feeds.lock().unwrap()[index].clone()
        }

        fn delete(&self, name: &str) {
            self.existing.lock().unwrap().remove(name);
        }
    }

    #[async_trait]
    impl ConsumerAdmin for FakeBus {
        async fn find_consumer(&self, durable_name: &str) -> Result<Option<ConsumerState>> {
            let known = self.existing.lock().unwrap().contains(durable_name);
            Ok(known.then(|| ConsumerState {
                name: durable_name.to_string(),
                filter_subjects: Vec::new(),
            }))
        }

        async fn open(&self, spec: &ConsumerSpec) -> Result<MessageStream> {
            if let Some(name) = &spec.durable_name {
                self.existing.lock().unwrap().insert(name.clone());
            }
            self.opened.lock().unwrap().push(spec.clone());
            let (tx, rx) = mpsc::unbounded();
            self.feeds.lock().unwrap().push(tx);
            Ok(rx.boxed())
        }
    }

    struct Message(String);

    #[async_trait]
    impl InboundMessage for Message {
        fn subject(&self) -> &str {
            &self.0
        }

        fn payload(&self) -> &[u8] {
            b"{}"
        }

        async fn ack(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<String>>);

    #[async_trait]
    impl EventHandler for Recorder {
        fn event_type(&self) -> &'static str {
            "deployment"
        }

        async fn handle(&self, subject: &str, _payload: &[u8]) -> Result<()> {
            self.0.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        fn event_type(&self) -> &'static str {
            "deployment_status"
        }

        async fn handle(&self, _subject: &str, _payload: &[u8]) -> Result<()> {
            panic!("handler bug");
        }
    }

    fn settings(durable: Option<&str>) -> ConsumerSettings {
        ConsumerSettings {
            durable_name: durable.map(str::to_string),
            ack_wait: Duration::from_secs(30),
            inactive_threshold: Duration::from_secs(3600),
            replay_window: chrono::Duration::days(7),
        }
    }

    fn manager(bus: &Arc<FakeBus>, recorder: &Arc<Recorder>, durable: Option<&str>) -> Arc<ConsumerManager> {
        let mut registry = HandlerRegistry::new("github", &["acme/shop".to_string()]);
        registry.register(recorder.clone());
        ConsumerManager::new(bus.clone(), registry, settings(durable))
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn send(feed: &Feed, subject: &str) {
        feed.unbounded_send(Ok(Box::new(Message(subject.to_string())) as Box<dyn InboundMessage>))
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_creation_replays_from_start_time() {
        let bus = Arc::new(FakeBus::default());
        let recorder = Arc::new(Recorder::default());
        let manager = manager(&bus, &recorder, Some("deckhand"));

        let spec = manager.reconfigure().await.unwrap();

        assert!(matches!(spec.deliver_from, DeliverFrom::StartTime(_)));
        assert_eq!(spec.durable_name.as_deref(), Some("deckhand"));
        assert_eq!(spec.filter_subjects, vec!["github.acme.shop.deployment"]);
    }

    #[tokio::test]
    async fn test_existing_durable_keeps_its_position() {
        let bus = Arc::new(FakeBus::default());
        bus.existing.lock().unwrap().insert("deckhand".to_string());
        let recorder = Arc::new(Recorder::default());
        let manager = manager(&bus, &recorder, Some("deckhand"));

        let spec = manager.reconfigure().await.unwrap();

        assert_eq!(spec.deliver_from, DeliverFrom::Existing);
    }

    #[tokio::test]
    async fn test_ephemeral_consumer_always_starts_from_window() {
        let bus = Arc::new(FakeBus::default());
        let recorder = Arc::new(Recorder::default());
        let manager = manager(&bus, &recorder, None);

        manager.reconfigure().await.unwrap();
        let second = manager.reconfigure().await.unwrap();

        assert!(second.durable_name.is_none());
        assert!(matches!(second.deliver_from, DeliverFrom::StartTime(_)));
        assert_eq!(bus.opened().len(), 2);
    }

    #[tokio::test]
    async fn test_deleted_consumer_is_rebuilt_without_restart() {
        let bus = Arc::new(FakeBus::default());
        let recorder = Arc::new(Recorder::default());
        let manager = manager(&bus, &recorder, Some("deckhand"));
        let cancel = CancellationToken::new();

        let supervisor = manager.start(cancel.clone()).await;
        assert_eq!(bus.opened().len(), 1);

        send(&bus.feed(0), "github.acme.shop.deployment");
        eventually(|| recorder.0.lock().unwrap().len() == 1).await;

        bus.delete("deckhand");
        bus.feed(0)
            .unbounded_send(Err(DeliveryError::ConsumerDeleted))
            .unwrap();
        eventually(|| bus.opened().len() == 2).await;

        let opened = bus.opened();
        assert_eq!(opened[1].durable_name, opened[0].durable_name);
        assert_eq!(opened[1].filter_subjects, opened[0].filter_subjects);
        assert!(matches!(opened[1].deliver_from, DeliverFrom::StartTime(_)));

        send(&bus.feed(1), "github.acme.shop.deployment");
        eventually(|| recorder.0.lock().unwrap().len() == 2).await;

        cancel.cancel();
        supervisor.await.unwrap();
        assert!(manager.current_spec().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_errors_do_not_rebuild() {
        let bus = Arc::new(FakeBus::default());
        let recorder = Arc::new(Recorder::default());
        let manager = manager(&bus, &recorder, Some("deckhand"));
        let cancel = CancellationToken::new();

        let supervisor = manager.start(cancel.clone()).await;
        bus.feed(0)
            .unbounded_send(Err(DeliveryError::Transport("reset".to_string())))
            .unwrap();
        send(&bus.feed(0), "github.acme.shop.deployment");
        eventually(|| recorder.0.lock().unwrap().len() == 1).await;

        assert_eq!(bus.opened().len(), 1);
        cancel.cancel();
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_consumption() {
        let bus = Arc::new(FakeBus::default());
        let recorder = Arc::new(Recorder::default());
        let mut registry = HandlerRegistry::new("github", &["acme/shop".to_string()]);
        registry.register(recorder.clone());
        registry.register(Arc::new(Panicking));
        let manager = ConsumerManager::new(bus.clone(), registry, settings(Some("deckhand")));
        let cancel = CancellationToken::new();

        let supervisor = manager.start(cancel.clone()).await;
        send(&bus.feed(0), "github.acme.shop.deployment_status");
        send(&bus.feed(0), "github.acme.shop.deployment");
        eventually(|| recorder.0.lock().unwrap().len() == 1).await;

        assert_eq!(bus.opened().len(), 1);
        cancel.cancel();
        supervisor.await.unwrap();
    }
}
