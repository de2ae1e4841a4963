//! Generic Stream Supervisor
//!
//! One engine drives all five stream families. A [`StreamSupervisor`] owns a
//! registry of cache slots keyed by [`ResourceId`]; each slot pairs the cached
//! payload with the handle of the background task feeding it. Tasks consume a
//! private [`Subscription`] channel, fold events into the cache, and push a
//! notification for every change.
//!
//! # Lifecycle
//!
//! - `start` registers the slot and spawns the task; the upstream subscription
//!   is opened inside the task so registration never blocks.
//! - `stop` cancels the task, waits for it to drain (bounded by the join
//!   timeout, aborting on overrun), and only then removes the slot. No
//!   notification can be observed for a resource after `stop` returns.
//! - A fatal upstream error latches the slot in `Failed`; the last cached
//!   payload stays readable until an explicit stop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{NotificationSink, Subscription, UpstreamError, UpstreamSession};
use crate::domain::resource::{Family, ResourceId, ResourceUri, StreamState};
use crate::infrastructure::metrics::{
    record_event, record_event_deduped, record_notification, record_stream_failed,
    record_stream_started, record_stream_stopped, set_active_streams,
};

// =============================================================================
// StreamFamily
// =============================================================================

/// Result of folding one upstream event into a cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// The payload changed; subscribers are notified.
    Updated,
    /// The event was a duplicate or no-op; no notification.
    Unchanged,
}

/// Behavior of one stream family.
///
/// A family defines how stream parameters map to a resource id, how to open
/// the upstream subscription, and how each event folds into the cached
/// payload. Everything else (task lifecycle, cancellation, caching,
/// notification) is the supervisor's job.
#[async_trait]
pub trait StreamFamily: Send + Sync + 'static {
    /// Parameters identifying and opening one stream.
    type Params: Clone + Send + Sync + 'static;
    /// Raw upstream event type.
    type Event: Send + 'static;
    /// Cached payload type.
    type Payload: Clone + Send + Sync + 'static;

    /// Which family this is.
    fn family(&self) -> Family;

    /// Derive the cache key from stream parameters.
    fn resource_id(&self, params: &Self::Params) -> ResourceId;

    /// Payload cached between registration and the first event.
    fn initial_payload(&self) -> Self::Payload;

    /// Open the upstream subscription for one stream.
    async fn open(
        &self,
        session: &dyn UpstreamSession,
        params: &Self::Params,
    ) -> Result<Subscription<Self::Event>, UpstreamError>;

    /// Fold one event into the cached payload.
    fn fold(&self, id: &ResourceId, payload: &mut Self::Payload, event: Self::Event)
    -> FoldOutcome;

    /// An additional URI to notify on every update, if any. Used by the
    /// ticker-news aggregation view.
    fn extra_notify_uri(&self) -> Option<ResourceUri> {
        None
    }
}

// =============================================================================
// Registry
// =============================================================================

struct CacheEntry<P, Q> {
    payload: P,
    params: Q,
    updated_at: Option<DateTime<Utc>>,
}

struct StreamHandle {
    /// Taken by the first `stop` call; `None` means a stop is in flight.
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    state: Arc<Mutex<StreamState>>,
    created_at: DateTime<Utc>,
}

struct Slot<F: StreamFamily> {
    entry: CacheEntry<F::Payload, F::Params>,
    handle: StreamHandle,
}

/// Per-family slot registry. Owned by the supervisor, shared with its tasks.
struct FamilyRegistry<F: StreamFamily> {
    slots: RwLock<HashMap<ResourceId, Slot<F>>>,
}

impl<F: StreamFamily> FamilyRegistry<F> {
    fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Fold an event into the slot's payload, bumping `updated_at` on change.
    /// Returns `None` when the slot no longer exists.
    fn apply(
        &self,
        id: &ResourceId,
        fold: impl FnOnce(&mut F::Payload) -> FoldOutcome,
    ) -> Option<FoldOutcome> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(id)?;
        let outcome = fold(&mut slot.entry.payload);
        if outcome == FoldOutcome::Updated {
            slot.entry.updated_at = Some(Utc::now());
        }
        Some(outcome)
    }

}

// =============================================================================
// Outcomes and Snapshots
// =============================================================================

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new stream was registered and its task spawned.
    Subscribed {
        /// URI of the new resource.
        uri: ResourceUri,
    },
    /// A stream for this resource already exists; nothing changed.
    AlreadySubscribed {
        /// URI of the existing resource.
        uri: ResourceUri,
    },
    /// The upstream session is not connected; nothing was registered.
    NotConnected,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The stream was cancelled, joined, and deregistered.
    Stopped,
    /// No stream was registered for the resource.
    NotSubscribed,
}

/// Point-in-time view of one cache slot.
#[derive(Debug, Clone)]
pub struct StreamSnapshot<P, Q> {
    /// Cached payload.
    pub payload: P,
    /// Parameters the stream was started with.
    pub params: Q,
    /// When the payload last changed; `None` before the first event.
    pub updated_at: Option<DateTime<Utc>>,
    /// When the stream was registered.
    pub created_at: DateTime<Utc>,
    /// Task lifecycle state.
    pub state: StreamState,
}

/// Listing entry for one supervised stream.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    /// Owning family.
    pub family: Family,
    /// Cache key.
    pub resource_id: ResourceId,
    /// Consumer-facing URI.
    pub uri: ResourceUri,
    /// Task lifecycle state.
    pub state: StreamState,
    /// When the stream was registered.
    pub created_at: DateTime<Utc>,
    /// When the payload last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Supervisor
// =============================================================================

/// Supervises all streams of one family: registration, task lifecycle,
/// cache reads, and teardown.
pub struct StreamSupervisor<F: StreamFamily> {
    family: Arc<F>,
    session: Arc<dyn UpstreamSession>,
    notifier: Arc<dyn NotificationSink>,
    registry: Arc<FamilyRegistry<F>>,
    join_timeout: Duration,
}

impl<F: StreamFamily> StreamSupervisor<F> {
    /// Create a supervisor over the given session and notification sink.
    pub fn new(
        family: F,
        session: Arc<dyn UpstreamSession>,
        notifier: Arc<dyn NotificationSink>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            family: Arc::new(family),
            session,
            notifier,
            registry: Arc::new(FamilyRegistry::new()),
            join_timeout,
        }
    }

    /// The family implementation backing this supervisor.
    #[must_use]
    pub fn family_ref(&self) -> &F {
        &self.family
    }

    /// Register a stream and spawn its background task.
    ///
    /// Returns immediately; the upstream subscription is opened inside the
    /// task. Starting an already-registered resource is a no-op.
    pub fn start(&self, params: F::Params) -> StartOutcome {
        let id = self.family.resource_id(&params);
        let uri = ResourceUri::new(self.family.family(), &id);

        if !self.session.is_connected() {
            return StartOutcome::NotConnected;
        }

        let mut slots = self.registry.slots.write();
        if slots.contains_key(&id) {
            return StartOutcome::AlreadySubscribed { uri };
        }

        let cancel = CancellationToken::new();
        let state = Arc::new(Mutex::new(StreamState::Running));
        let task = tokio::spawn(run_stream(
            StreamContext {
                family: Arc::clone(&self.family),
                session: Arc::clone(&self.session),
                notifier: Arc::clone(&self.notifier),
                registry: Arc::clone(&self.registry),
                id: id.clone(),
                uri: uri.clone(),
                cancel: cancel.clone(),
                state: Arc::clone(&state),
            },
            params.clone(),
        ));
        slots.insert(
            id,
            Slot {
                entry: CacheEntry {
                    payload: self.family.initial_payload(),
                    params,
                    updated_at: None,
                },
                handle: StreamHandle {
                    task: Some(task),
                    cancel,
                    state,
                    created_at: Utc::now(),
                },
            },
        );
        record_stream_started(self.family.family());
        set_active_streams(self.family.family(), slots.len());
        StartOutcome::Subscribed { uri }
    }

    /// Cancel a stream, wait for its task to finish, and deregister it.
    ///
    /// The task join is bounded by the configured timeout; a task that
    /// ignores cancellation is aborted. The slot stays registered until the
    /// task is gone, so no notification for this resource can arrive after
    /// this returns.
    pub async fn stop(&self, id: &ResourceId) -> StopOutcome {
        let (mut task, cancel) = {
            let mut slots = self.registry.slots.write();
            let Some(slot) = slots.get_mut(id) else {
                return StopOutcome::NotSubscribed;
            };
            let Some(task) = slot.handle.task.take() else {
                // Another stop is already draining this stream.
                return StopOutcome::NotSubscribed;
            };
            (task, slot.handle.cancel.clone())
        };

        cancel.cancel();
        match tokio::time::timeout(self.join_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_error)) => {
                tracing::error!(
                    family = self.family.family().as_str(),
                    resource_id = %id,
                    %join_error,
                    "stream task panicked during stop"
                );
            }
            Err(_) => {
                tracing::warn!(
                    family = self.family.family().as_str(),
                    resource_id = %id,
                    timeout = ?self.join_timeout,
                    "stream task ignored cancellation; aborting"
                );
                task.abort();
            }
        }

        let remaining = {
            let mut slots = self.registry.slots.write();
            slots.remove(id);
            slots.len()
        };
        record_stream_stopped(self.family.family());
        set_active_streams(self.family.family(), remaining);
        tracing::debug!(
            family = self.family.family().as_str(),
            resource_id = %id,
            "stream stopped"
        );
        StopOutcome::Stopped
    }

    /// Stop every registered stream. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let ids = self.registered_ids();
        let mut stopped = 0;
        for id in ids {
            if self.stop(&id).await == StopOutcome::Stopped {
                stopped += 1;
            }
        }
        stopped
    }

    /// Snapshot one resource's cache slot.
    #[must_use]
    pub fn read(&self, id: &ResourceId) -> Option<StreamSnapshot<F::Payload, F::Params>> {
        let slots = self.registry.slots.read();
        let slot = slots.get(id)?;
        Some(snapshot_slot(slot))
    }

    /// Snapshot every cache slot.
    #[must_use]
    pub fn snapshots(&self) -> Vec<(ResourceId, StreamSnapshot<F::Payload, F::Params>)> {
        let slots = self.registry.slots.read();
        slots
            .iter()
            .map(|(id, slot)| (id.clone(), snapshot_slot(slot)))
            .collect()
    }

    /// Listing entries for every registered stream, sorted by resource id.
    #[must_use]
    pub fn summaries(&self) -> Vec<StreamSummary> {
        let family = self.family.family();
        let slots = self.registry.slots.read();
        let mut summaries: Vec<StreamSummary> = slots
            .iter()
            .map(|(id, slot)| StreamSummary {
                family,
                resource_id: id.clone(),
                uri: ResourceUri::new(family, id),
                state: slot.handle.state.lock().clone(),
                created_at: slot.handle.created_at,
                updated_at: slot.entry.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        summaries
    }

    /// Ids of every registered stream, sorted.
    #[must_use]
    pub fn registered_ids(&self) -> Vec<ResourceId> {
        let slots = self.registry.slots.read();
        let mut ids: Vec<ResourceId> = slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered streams.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registry.slots.read().len()
    }
}

fn snapshot_slot<F: StreamFamily>(slot: &Slot<F>) -> StreamSnapshot<F::Payload, F::Params> {
    StreamSnapshot {
        payload: slot.entry.payload.clone(),
        params: slot.entry.params.clone(),
        updated_at: slot.entry.updated_at,
        created_at: slot.handle.created_at,
        state: slot.handle.state.lock().clone(),
    }
}

// =============================================================================
// Stream Task
// =============================================================================

struct StreamContext<F: StreamFamily> {
    family: Arc<F>,
    session: Arc<dyn UpstreamSession>,
    notifier: Arc<dyn NotificationSink>,
    registry: Arc<FamilyRegistry<F>>,
    id: ResourceId,
    uri: ResourceUri,
    cancel: CancellationToken,
    state: Arc<Mutex<StreamState>>,
}

/// The background event loop of one stream.
async fn run_stream<F: StreamFamily>(ctx: StreamContext<F>, params: F::Params) {
    let family = ctx.family.family();

    let mut subscription = tokio::select! {
        () = ctx.cancel.cancelled() => {
            *ctx.state.lock() = StreamState::Cancelled;
            return;
        }
        opened = ctx.family.open(ctx.session.as_ref(), &params) => match opened {
            Ok(subscription) => subscription,
            Err(error) => {
                tracing::error!(
                    family = family.as_str(),
                    resource_id = %ctx.id,
                    %error,
                    "failed to open upstream subscription"
                );
                record_stream_failed(family);
                *ctx.state.lock() = StreamState::Failed(error.to_string());
                return;
            }
        }
    };

    tracing::debug!(family = family.as_str(), resource_id = %ctx.id, "stream task running");

    loop {
        tokio::select! {
            () = ctx.cancel.cancelled() => {
                subscription.close().await;
                *ctx.state.lock() = StreamState::Cancelled;
                tracing::debug!(
                    family = family.as_str(),
                    resource_id = %ctx.id,
                    "stream cancelled"
                );
                return;
            }
            event = subscription.recv() => match event {
                Some(Ok(event)) => {
                    record_event(family);
                    let outcome = ctx
                        .registry
                        .apply(&ctx.id, |payload| ctx.family.fold(&ctx.id, payload, event));
                    match outcome {
                        Some(FoldOutcome::Updated) => {
                            ctx.notifier.notify(family, &ctx.uri);
                            record_notification(family);
                            if let Some(extra) = ctx.family.extra_notify_uri() {
                                ctx.notifier.notify(family, &extra);
                                record_notification(family);
                            }
                        }
                        Some(FoldOutcome::Unchanged) => {
                            record_event_deduped(family);
                        }
                        None => {
                            // Slot removed out from under us; wind down.
                            subscription.close().await;
                            *ctx.state.lock() = StreamState::Completed;
                            return;
                        }
                    }
                }
                Some(Err(error)) if error.is_transient() => {
                    tracing::warn!(
                        family = family.as_str(),
                        resource_id = %ctx.id,
                        %error,
                        "transient upstream condition"
                    );
                }
                Some(Err(error)) => {
                    tracing::error!(
                        family = family.as_str(),
                        resource_id = %ctx.id,
                        %error,
                        "stream failed"
                    );
                    record_stream_failed(family);
                    *ctx.state.lock() = StreamState::Failed(error.to_string());
                    return;
                }
                None => {
                    tracing::debug!(
                        family = family.as_str(),
                        resource_id = %ctx.id,
                        "upstream feed ended"
                    );
                    *ctx.state.lock() = StreamState::Completed;
                    return;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::families::MarketDataFamily;
    use crate::application::ports::{FeedEvent, MockUpstreamSession};
    use crate::domain::streaming::{ContractSpec, MarketTick};

    struct NullSink;

    impl NotificationSink for NullSink {
        fn notify(&self, _family: Family, _uri: &ResourceUri) {}
    }

    fn supervisor_with(session: MockUpstreamSession) -> StreamSupervisor<MarketDataFamily> {
        StreamSupervisor::new(
            MarketDataFamily,
            Arc::new(session),
            Arc::new(NullSink),
            Duration::from_secs(5),
        )
    }

    fn open_feed() -> Subscription<MarketTick> {
        let (tx, rx) = mpsc::channel::<FeedEvent<MarketTick>>(8);
        // Keep the feed open for the lifetime of the test process.
        std::mem::forget(tx);
        Subscription::from_channel(rx)
    }

    #[tokio::test]
    async fn start_rejects_when_disconnected() {
        let mut session = MockUpstreamSession::new();
        session.expect_is_connected().return_const(false);
        let supervisor = supervisor_with(session);

        let outcome = supervisor.start(ContractSpec::stock("AAPL"));
        assert_eq!(outcome, StartOutcome::NotConnected);
        assert_eq!(supervisor.registered_count(), 0);
    }

    #[tokio::test]
    async fn start_is_idempotent_per_resource() {
        let mut session = MockUpstreamSession::new();
        session.expect_is_connected().return_const(true);
        session
            .expect_open_market_data()
            .times(1)
            .returning(|_| Ok(open_feed()));
        let supervisor = supervisor_with(session);

        let first = supervisor.start(ContractSpec::stock("AAPL"));
        let second = supervisor.start(ContractSpec::stock("AAPL"));

        let uri = ResourceUri::new(Family::MarketData, &ResourceId::from("AAPL"));
        assert_eq!(first, StartOutcome::Subscribed { uri: uri.clone() });
        assert_eq!(second, StartOutcome::AlreadySubscribed { uri });
        assert_eq!(supervisor.registered_count(), 1);

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn stop_unknown_stream_reports_not_subscribed() {
        let session = MockUpstreamSession::new();
        let supervisor = supervisor_with(session);

        let outcome = supervisor.stop(&ResourceId::from("AAPL")).await;
        assert_eq!(outcome, StopOutcome::NotSubscribed);
    }

    #[tokio::test]
    async fn stop_cancels_and_deregisters() {
        let mut session = MockUpstreamSession::new();
        session.expect_is_connected().return_const(true);
        session
            .expect_open_market_data()
            .returning(|_| Ok(open_feed()));
        let supervisor = supervisor_with(session);

        supervisor.start(ContractSpec::stock("AAPL"));
        let id = ResourceId::from("AAPL");
        assert!(supervisor.read(&id).is_some());

        let outcome = supervisor.stop(&id).await;
        assert_eq!(outcome, StopOutcome::Stopped);
        assert!(supervisor.read(&id).is_none());
        assert_eq!(supervisor.registered_count(), 0);
    }

    #[tokio::test]
    async fn stop_aborts_task_whose_close_hook_hangs() {
        let (tx, rx) = mpsc::channel::<FeedEvent<MarketTick>>(8);
        let subscription =
            Subscription::new(rx, || std::future::pending::<()>().boxed());
        let mut session = MockUpstreamSession::new();
        session.expect_is_connected().return_const(true);
        session
            .expect_open_market_data()
            .return_once(move |_| Ok(subscription));
        let supervisor = StreamSupervisor::new(
            MarketDataFamily,
            Arc::new(session),
            Arc::new(NullSink),
            Duration::from_millis(50),
        );

        supervisor.start(ContractSpec::stock("AAPL"));
        let id = ResourceId::from("AAPL");

        // One event through the loop proves the task is past the open phase,
        // so cancellation lands on the hanging close hook.
        tx.send(Ok(MarketTick {
            time: DateTime::from_timestamp(1, 0).unwrap(),
            last: None,
            bid: None,
            ask: None,
            close: None,
            volume: None,
            bid_size: None,
            ask_size: None,
        }))
        .await
        .unwrap();
        for _ in 0..400 {
            if supervisor
                .read(&id)
                .is_some_and(|snapshot| snapshot.updated_at.is_some())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let begun = std::time::Instant::now();
        let outcome = supervisor.stop(&id).await;
        assert_eq!(outcome, StopOutcome::Stopped);
        // Bounded by the join timeout, not the hook: well under a second.
        assert!(begun.elapsed() < Duration::from_secs(1));
        assert!(supervisor.read(&id).is_none());
        assert_eq!(supervisor.registered_count(), 0);
        drop(tx);
    }

    #[tokio::test]
    async fn snapshot_before_first_event_has_no_update_time() {
        let mut session = MockUpstreamSession::new();
        session.expect_is_connected().return_const(true);
        session
            .expect_open_market_data()
            .returning(|_| Ok(open_feed()));
        let supervisor = supervisor_with(session);

        supervisor.start(ContractSpec::stock("AAPL"));
        let snapshot = supervisor.read(&ResourceId::from("AAPL")).unwrap();
        assert!(snapshot.updated_at.is_none());
        assert!(snapshot.payload.tick.is_none());

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn summaries_are_sorted_by_resource_id() {
        let mut session = MockUpstreamSession::new();
        session.expect_is_connected().return_const(true);
        session
            .expect_open_market_data()
            .returning(|_| Ok(open_feed()));
        let supervisor = supervisor_with(session);

        supervisor.start(ContractSpec::stock("MSFT"));
        supervisor.start(ContractSpec::stock("AAPL"));

        let ids: Vec<String> = supervisor
            .summaries()
            .into_iter()
            .map(|s| s.resource_id.to_string())
            .collect();
        assert_eq!(ids, vec!["AAPL", "MSFT"]);

        supervisor.stop_all().await;
    }
}
