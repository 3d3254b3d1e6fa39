//! In-process publish-subscribe bus with durable at-least-once delivery (§4.1).
//!
//! Every `emit` first writes a row via `common::storage::types::event::Event`,
//! then fans the event out to whichever handlers are currently subscribed to
//! that topic. Fan-out is a send into each subscriber's own queue, not N
//! awaited callbacks run in sequence: a handler that blocks only delays
//! itself, never its siblings. Within one subscriber, delivery preserves the
//! order events were emitted.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{error::AppError, storage::db::SurrealDbClient};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{instrument, warn};
use uuid::Uuid;

/// A single delivered event. Distinct from `common::storage::types::event::Event`
/// (the durable row) in that it's the in-memory value handed to subscribers.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub event_type: String,
    pub payload: Value,
    pub source: String,
    pub emitted_at: DateTime<Utc>,
}

/// Implemented by anything that wants to react to bus events. Handlers run on
/// their own task; a handler that returns `Err` is logged and does not affect
/// delivery to other subscribers (§4.1, §7 "errors in one event subscriber do
/// not propagate to others").
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: BusEvent) -> Result<(), AppError>;
}

/// Adapts a plain async closure into an `EventHandler`, for subscribers that
/// don't need their own named type.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(BusEvent) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), AppError>> + Send,
{
    async fn handle(&self, event: BusEvent) -> Result<(), AppError> {
        (self.0)(event).await
    }
}

struct Subscription {
    id: Uuid,
    sender: mpsc::UnboundedSender<BusEvent>,
    worker: tokio::task::JoinHandle<()>,
}

/// The bus itself. Cheaply cloneable; every clone shares the same subscriber
/// table and durable store.
#[derive(Clone)]
pub struct EventBus {
    db: SurrealDbClient,
    subscriptions: Arc<Mutex<HashMap<String, Vec<Subscription>>>>,
}

impl EventBus {
    pub fn new(db: SurrealDbClient) -> Self {
        Self {
            db,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers `handler` against `topic`, returning an id usable with
    /// `unsubscribe`. A dedicated task drains events sequentially so this
    /// subscriber sees them in emit order even while other subscribers are
    /// mid-handler.
    pub async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Uuid {
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<BusEvent>();
        let topic_owned = topic.to_string();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = handler.handle(event.clone()).await {
                    warn!(
                        topic = %topic_owned,
                        event_type = %event.event_type,
                        error = %err,
                        "event handler failed; other subscribers unaffected"
                    );
                }
            }
        });

        let mut subs = self.subscriptions.lock().await;
        subs.entry(topic.to_string()).or_default().push(Subscription {
            id,
            sender: tx,
            worker,
        });

        id
    }

    /// Removes a subscription by id. Aborts its worker task immediately;
    /// any events already queued to it are dropped.
    pub async fn unsubscribe(&self, topic: &str, id: Uuid) {
        let mut subs = self.subscriptions.lock().await;
        if let Some(list) = subs.get_mut(topic) {
            if let Some(pos) = list.iter().position(|sub| sub.id == id) {
                let removed = list.remove(pos);
                removed.worker.abort();
            }
            if list.is_empty() {
                subs.remove(topic);
            }
        }
    }

    /// Records the event durably, then delivers it to every subscriber
    /// currently registered on `event_type`. Returns once the durable write
    /// and the sends into each subscriber's queue complete; it does not wait
    /// for handlers to finish running.
    #[instrument(skip(self, payload), fields(event_type, source))]
    pub async fn emit(
        &self,
        event_type: &str,
        payload: Value,
        source: &str,
    ) -> Result<(), AppError> {
        let record = common::storage::types::event::Event::record(
            &self.db,
            event_type,
            payload.clone(),
            source,
        )
        .await?;

        let event = BusEvent {
            event_type: event_type.to_string(),
            payload,
            source: source.to_string(),
            emitted_at: record.created_at,
        };

        let subs = self.subscriptions.lock().await;
        if let Some(list) = subs.get(event_type) {
            for sub in list {
                // An unbounded send only fails if the worker task has already
                // exited (e.g. panicked); dropping the event is correct there
                // since nothing will ever read it.
                let _ = sub.sender.send(event.clone());
            }
        }

        Ok(())
    }

    /// Number of live subscriptions on `topic`, for diagnostics/tests.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions
            .lock()
            .await
            .get(topic)
            .map_or(0, Vec::len)
    }
}
