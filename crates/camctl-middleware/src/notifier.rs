//! [`ChangeNotifier`] – synchronous, reason-filtered publish/subscribe of
//! session [`ChangeEvent`]s.
//!
//! # Delivery contract
//!
//! Callback subscribers are invoked **on the publishing thread**, one after
//! another, in the order they subscribed.  There is no queue and no retry.
//! Whatever thread emits (the acquisition worker for
//! [`ChangeReason::NewFrame`], the caller of a property setter for
//! [`ChangeReason::Properties`]) is blocked until every matching callback
//! has returned.
//!
//! **Backpressure hazard:** a slow callback stalls the emitter.  A callback
//! that takes 50 ms on `NewFrame` caps acquisition at 20 frames per second.
//! Keep callbacks short, or hand the event off to another thread.
//!
//! Async consumers should use [`ChangeNotifier::subscribe_stream`] instead.
//! Streams sit on a bounded [`tokio::sync::broadcast`] channel: publishing
//! never waits for them, and a stream that falls behind skips the oldest
//! events and reports how many it [`missed`][EventStream::missed].
//!
//! A callback that panics is logged and skipped; it does not unwind into
//! the emitter.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use camctl_types::{ChangeEvent, ChangeReason, SessionSnapshot};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

/// Default capacity of the broadcast channel backing event streams.
const DEFAULT_STREAM_CAPACITY: usize = 256;

// ────────────────────────────────────────────────────────────────────────────
// Filters and handles
// ────────────────────────────────────────────────────────────────────────────

/// Which [`ChangeReason`]s a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReasonFilter {
    #[default]
    All,
    Only(Vec<ChangeReason>),
}

impl ReasonFilter {
    pub fn only(reasons: impl IntoIterator<Item = ChangeReason>) -> Self {
        ReasonFilter::Only(reasons.into_iter().collect())
    }

    pub fn matches(&self, reason: ChangeReason) -> bool {
        match self {
            ReasonFilter::All => true,
            ReasonFilter::Only(reasons) => reasons.contains(&reason),
        }
    }
}

impl From<ChangeReason> for ReasonFilter {
    fn from(reason: ChangeReason) -> Self {
        ReasonFilter::Only(vec![reason])
    }
}

/// Handle returned by [`ChangeNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = dyn Fn(&ChangeEvent) + Send + Sync;

struct Subscriber {
    id: SubscriptionId,
    filter: ReasonFilter,
    callback: Arc<Callback>,
}

// ────────────────────────────────────────────────────────────────────────────
// ChangeNotifier
// ────────────────────────────────────────────────────────────────────────────

/// Shared notifier.  Clone it cheaply – all clones publish to the same
/// subscribers.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<Inner>,
}

struct Inner {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    /// Create a notifier whose event streams buffer up to `stream_capacity`
    /// events each.
    ///
    /// # Panics
    ///
    /// Panics if `stream_capacity` is zero (a [`broadcast`] requirement).
    pub fn new(stream_capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(stream_capacity);
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                stream,
            }),
        }
    }

    /// Register a synchronous callback for the reasons in `filter`.
    ///
    /// The callback runs on the publishing thread; see the module docs for
    /// the backpressure implications.
    pub fn subscribe<F>(&self, filter: impl Into<ReasonFilter>, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push(Arc::new(Subscriber {
            id,
            filter: filter.into(),
            callback: Arc::new(callback),
        }));
        id
    }

    /// Remove a callback.  Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subscribers.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Open an async event stream filtered by `filter`.
    pub fn subscribe_stream(&self, filter: impl Into<ReasonFilter>) -> EventStream {
        EventStream {
            filter: filter.into(),
            receiver: self.inner.stream.subscribe(),
            missed: 0,
        }
    }

    /// Number of registered callbacks (streams not included).
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Deliver `event` to every matching callback, then to the streams.
    ///
    /// Returns the number of callbacks invoked.  Publishing with nobody
    /// listening is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        // Copy the list so callbacks may (un)subscribe without deadlocking.
        let subscribers: Vec<Arc<Subscriber>> = self.inner.subscribers.read().clone();

        let mut delivered = 0;
        for sub in subscribers.iter().filter(|s| s.filter.matches(event.reason)) {
            let callback = Arc::clone(&sub.callback);
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                warn!(subscription = sub.id.0, reason = ?event.reason, "change subscriber panicked");
            }
            delivered += 1;
        }

        if self.inner.stream.receiver_count() > 0 {
            // Only fails when every receiver dropped in between; nothing to do.
            let _ = self.inner.stream.send(event);
        }
        delivered
    }

    /// Build a [`ChangeEvent`] for `reason` and publish it.
    pub fn emit(&self, reason: ChangeReason, snapshot: SessionSnapshot) -> usize {
        self.publish(ChangeEvent::new(reason, snapshot))
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .field("streams", &self.inner.stream.receiver_count())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// EventStream
// ────────────────────────────────────────────────────────────────────────────

/// A reason-filtered stream of [`ChangeEvent`]s.
///
/// Obtained via [`ChangeNotifier::subscribe_stream`].
pub struct EventStream {
    filter: ReasonFilter,
    receiver: broadcast::Receiver<ChangeEvent>,
    missed: u64,
}

impl EventStream {
    /// Wait for the next matching event.
    ///
    /// Returns `None` once every [`ChangeNotifier`] clone has been dropped.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(event.reason) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => self.record_lag(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(event.reason) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(_) => return None,
            }
        }
    }

    /// Blocking variant of [`recv`][Self::recv] for non-async threads.
    ///
    /// Must not be called from within a Tokio runtime.
    pub fn blocking_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.blocking_recv() {
                Ok(event) if self.filter.matches(event.reason) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => self.record_lag(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total events dropped because this stream fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    fn record_lag(&mut self, n: u64) {
        warn!(lagged_by = n, "event stream lagged");
        self.missed += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot::default()
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let notifier = ChangeNotifier::default();
        assert_eq!(notifier.emit(ChangeReason::Connection, snapshot()), 0);
    }

    #[test]
    fn callbacks_run_in_subscription_order_on_the_emitting_thread() {
        let notifier = ChangeNotifier::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let emitter = std::thread::current().id();

        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            notifier.subscribe(ReasonFilter::All, move |_| {
                assert_eq!(std::thread::current().id(), emitter);
                log.lock().push(tag);
            });
        }

        assert_eq!(notifier.emit(ChangeReason::Properties, snapshot()), 3);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn filter_limits_delivery_to_chosen_reasons() {
        let notifier = ChangeNotifier::default();
        let frames = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&frames);
        notifier.subscribe(ChangeReason::NewFrame, move |e| {
            assert_eq!(e.reason, ChangeReason::NewFrame);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        notifier.emit(ChangeReason::Connection, snapshot());
        notifier.emit(ChangeReason::NewFrame, snapshot());
        notifier.emit(ChangeReason::Properties, snapshot());
        notifier.emit(ChangeReason::NewFrame, snapshot());

        assert_eq!(frames.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn multi_reason_filter() {
        let filter = ReasonFilter::only([ChangeReason::Connection, ChangeReason::Acquisition]);
        assert!(filter.matches(ChangeReason::Connection));
        assert!(filter.matches(ChangeReason::Acquisition));
        assert!(!filter.matches(ChangeReason::NewFrame));
        assert!(ReasonFilter::All.matches(ChangeReason::NewFrame));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = ChangeNotifier::default();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        let id = notifier.subscribe(ReasonFilter::All, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        notifier.emit(ChangeReason::Connection, snapshot());
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.emit(ChangeReason::Connection, snapshot());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn subscribing_from_inside_a_callback_does_not_deadlock() {
        let notifier = ChangeNotifier::default();
        let inner = notifier.clone();
        notifier.subscribe(ReasonFilter::All, move |_| {
            inner.subscribe(ReasonFilter::All, |_| {});
        });

        notifier.emit(ChangeReason::Properties, snapshot());
        assert_eq!(notifier.subscriber_count(), 2);
    }

    #[test]
    fn panicking_callback_does_not_reach_the_emitter() {
        let notifier = ChangeNotifier::default();
        let after = Arc::new(AtomicU64::new(0));
        notifier.subscribe(ReasonFilter::All, |_| panic!("bad subscriber"));
        let counter = Arc::clone(&after);
        notifier.subscribe(ReasonFilter::All, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(notifier.emit(ChangeReason::NewFrame, snapshot()), 2);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_callback_stalls_the_emitter() {
        let notifier = ChangeNotifier::default();
        notifier.subscribe(ReasonFilter::All, |_| {
            std::thread::sleep(Duration::from_millis(30));
        });
        let start = std::time::Instant::now();
        notifier.emit(ChangeReason::NewFrame, snapshot());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn stream_receives_only_matching_events() {
        let notifier = ChangeNotifier::default();
        let mut stream = notifier.subscribe_stream(ChangeReason::Acquisition);

        notifier.emit(ChangeReason::NewFrame, snapshot());
        let mut snap = snapshot();
        snap.connected = true;
        snap.acquiring = true;
        notifier.emit(ChangeReason::Acquisition, snap);

        let event = stream.recv().await.expect("stream must yield the event");
        assert_eq!(event.reason, ChangeReason::Acquisition);
        assert!(event.snapshot.acquiring);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn stream_closes_when_notifier_dropped() {
        let notifier = ChangeNotifier::default();
        let mut stream = notifier.subscribe_stream(ReasonFilter::All);
        drop(notifier);
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn lagging_stream_reports_missed_events() {
        let notifier = ChangeNotifier::new(4);
        let mut stream = notifier.subscribe_stream(ReasonFilter::All);
        for _ in 0..10 {
            notifier.emit(ChangeReason::NewFrame, snapshot());
        }
        assert!(stream.try_recv().is_some());
        assert_eq!(stream.missed(), 6);
    }
}
