//! qsql-state — query-state publisher (spec C7 / §4.7).
//!
//! A single-process registry mapping `query_id -> current state`, plus a
//! per-query subscriber set. Bounded per-subscriber channels stand in for
//! "bounded-queue semantics"; a subscriber whose delivery blocks past
//! `delivery_timeout` is dropped from the set and receives no further
//! events, matching spec §8's "subscriber queue full" boundary behavior.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use qsql_schemas::{QueryLifecycleState, QueryStateEvent};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

const HEARTBEAT_METADATA_KEY: &str = "heartbeat";

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Per-subscriber channel depth.
    pub queue_capacity: usize,
    /// Max time `update` waits to deliver to one subscriber before evicting it.
    pub delivery_timeout: Duration,
    /// Heartbeat cadence; spec requires at least every 30s.
    pub heartbeat_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            delivery_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

struct QueryRecord {
    latest: Option<QueryStateEvent>,
    subscribers: Vec<mpsc::Sender<QueryStateEvent>>,
}

impl QueryRecord {
    fn empty() -> Self {
        Self {
            latest: None,
            subscribers: Vec::new(),
        }
    }
}

/// Process-wide(-injected) registry; never a hidden global — constructed
/// once by wire-up and shared via `Arc` (spec §9 "Singletons / process-wide
/// state").
pub struct StatePublisher {
    queries: RwLock<HashMap<Uuid, QueryRecord>>,
    config: PublisherConfig,
}

impl StatePublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            queries: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Atomically update `event.query_id`'s state and fan it out to every
    /// live subscriber. Slow subscribers are evicted, never block other
    /// queries' updates past this call's own critical section.
    pub async fn update(&self, event: QueryStateEvent) {
        let query_id = event.query_id;
        let mut guard = self.queries.write().await;
        let record = guard.entry(query_id).or_insert_with(QueryRecord::empty);
        record.latest = Some(event.clone());

        let subscribers = std::mem::take(&mut record.subscribers);
        let mut alive = Vec::with_capacity(subscribers.len());
        for tx in subscribers {
            match tokio::time::timeout(self.config.delivery_timeout, tx.send(event.clone())).await
            {
                Ok(Ok(())) => alive.push(tx),
                Ok(Err(_)) => {
                    tracing::debug!(%query_id, "subscriber channel closed, dropping");
                }
                Err(_) => {
                    tracing::warn!(%query_id, "subscriber delivery timed out, evicting");
                }
            }
        }
        record.subscribers = alive;

        tracing::info!(
            %query_id,
            trace_id = %event.query_id,
            state = ?event.state,
            "published query state event"
        );
    }

    /// Subscribe to `query_id`. Yields an immediate snapshot if one exists,
    /// then every subsequent update, interleaved with heartbeats at least
    /// every `heartbeat_interval`. Terminates once a real (non-heartbeat)
    /// terminal-state event has been yielded.
    pub async fn subscribe(
        &self,
        query_id: Uuid,
    ) -> Pin<Box<dyn Stream<Item = QueryStateEvent> + Send>> {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);

        let immediate = {
            let mut guard = self.queries.write().await;
            let record = guard.entry(query_id).or_insert_with(QueryRecord::empty);
            record.subscribers.push(tx.clone());
            record.latest.clone()
        };

        let heartbeat_state = immediate
            .as_ref()
            .map(|e| e.state)
            .unwrap_or(QueryLifecycleState::Received);
        spawn_heartbeat(tx, query_id, heartbeat_state, self.config.heartbeat_interval);

        let head = stream::iter(immediate);
        let tail = ReceiverStream::new(rx);
        let combined = head.chain(tail);

        Box::pin(combined.scan(false, |done, event| {
            if *done {
                return futures_util::future::ready(None);
            }
            if !is_heartbeat(&event) && event.state.is_terminal() {
                *done = true;
            }
            futures_util::future::ready(Some(event))
        }))
    }

    pub async fn current(&self, query_id: Uuid) -> Option<QueryStateEvent> {
        self.queries
            .read()
            .await
            .get(&query_id)
            .and_then(|r| r.latest.clone())
    }

    /// Test/observability hook: number of live subscribers for `query_id`.
    pub async fn subscriber_count(&self, query_id: Uuid) -> usize {
        self.queries
            .read()
            .await
            .get(&query_id)
            .map(|r| r.subscribers.len())
            .unwrap_or(0)
    }
}

fn spawn_heartbeat(
    tx: mpsc::Sender<QueryStateEvent>,
    query_id: Uuid,
    state: QueryLifecycleState,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let mut event = QueryStateEvent::new(query_id, state);
            event
                .metadata
                .insert(HEARTBEAT_METADATA_KEY.to_string(), serde_json::Value::Bool(true));
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
}

fn is_heartbeat(event: &QueryStateEvent) -> bool {
    event
        .metadata
        .get(HEARTBEAT_METADATA_KEY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(query_id: Uuid, state: QueryLifecycleState) -> QueryStateEvent {
        QueryStateEvent::new(query_id, state)
    }

    #[tokio::test]
    async fn subscribe_before_any_update_gets_no_immediate_snapshot() {
        let publisher = StatePublisher::new(PublisherConfig::default());
        let query_id = Uuid::new_v4();
        let mut stream = publisher.subscribe(query_id).await;

        publisher
            .update(event(query_id, QueryLifecycleState::Received))
            .await;

        let first = stream.next().await.unwrap();
        assert_eq!(first.state, QueryLifecycleState::Received);
    }

    #[tokio::test]
    async fn subscribe_after_update_gets_immediate_snapshot() {
        let publisher = StatePublisher::new(PublisherConfig::default());
        let query_id = Uuid::new_v4();
        publisher
            .update(event(query_id, QueryLifecycleState::Planning))
            .await;

        let mut stream = publisher.subscribe(query_id).await;
        let first = stream.next().await.unwrap();
        assert_eq!(first.state, QueryLifecycleState::Planning);
    }

    #[tokio::test]
    async fn stream_terminates_after_terminal_state() {
        let publisher = StatePublisher::new(PublisherConfig::default());
        let query_id = Uuid::new_v4();
        let mut stream = publisher.subscribe(query_id).await;

        publisher
            .update(event(query_id, QueryLifecycleState::Received))
            .await;
        publisher
            .update(event(query_id, QueryLifecycleState::Planning))
            .await;
        publisher
            .update(event(query_id, QueryLifecycleState::Finished))
            .await;

        let received: Vec<_> = stream.by_ref().take(3).collect().await;
        assert_eq!(received.len(), 3);
        assert_eq!(received[2].state, QueryLifecycleState::Finished);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_after_delivery_timeout() {
        let publisher = StatePublisher::new(PublisherConfig {
            queue_capacity: 1,
            delivery_timeout: Duration::from_millis(20),
            heartbeat_interval: Duration::from_secs(30),
        });
        let query_id = Uuid::new_v4();
        let _stream = publisher.subscribe(query_id).await;

        // Fills the bounded channel buffer (capacity 1); stream is never
        // polled, so it just sits there.
        publisher
            .update(event(query_id, QueryLifecycleState::Received))
            .await;
        assert_eq!(publisher.subscriber_count(query_id).await, 1);

        // Channel is full and nobody is draining it: this send times out
        // and the subscriber is evicted.
        publisher
            .update(event(query_id, QueryLifecycleState::Planning))
            .await;
        assert_eq!(publisher.subscriber_count(query_id).await, 0);
    }

    #[tokio::test]
    async fn current_reflects_latest_update() {
        let publisher = StatePublisher::new(PublisherConfig::default());
        let query_id = Uuid::new_v4();
        assert!(publisher.current(query_id).await.is_none());

        publisher
            .update(event(query_id, QueryLifecycleState::Executing))
            .await;
        assert_eq!(
            publisher.current(query_id).await.unwrap().state,
            QueryLifecycleState::Executing
        );
    }
}
