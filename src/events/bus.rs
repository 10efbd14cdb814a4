use super::types::{Event, EventData, EventStats, SubscriptionInfo, SubscriptionStats};
use crate::metrics;
use crate::registry::{HealthReport, HealthStatus};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Subscriber callback. Errors and panics are contained by the bus.
pub type SubscriberFn<P> = Arc<dyn Fn(&Event<P>) -> anyhow::Result<()> + Send + Sync>;

/// In-process publish/subscribe bus with a bounded event history.
///
/// Dispatch is synchronous: every subscriber registered for the event's type
/// runs on the publishing thread, in registration order, before `publish`
/// returns.
///
/// Delivery is serialized across publishers. A reentrant dispatch lock is held
/// while an event is recorded and delivered, so a subscriber is never invoked
/// concurrently with itself and events reach subscribers in the order they
/// enter the history. The subscriber map is not locked while callbacks run,
/// so a callback may publish (re-entering the dispatch lock) or subscribe.
///
/// A subscription that is unsubscribed is never invoked again, including for
/// a delivery that is already in progress.
pub struct EventBus<P = EventData> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    subscribers: RwLock<BTreeMap<String, Vec<Subscriber<P>>>>,
    dispatch: ReentrantMutex<()>,
    history: Mutex<History<P>>,
    history_size: usize,
}

struct Subscriber<P> {
    id: Uuid,
    callback: SubscriberFn<P>,
    active: Arc<AtomicBool>,
    subscribed_at: DateTime<Utc>,
}

struct History<P> {
    recent: VecDeque<Event<P>>,
    total_events: u64,
    events_by_type: BTreeMap<String, u64>,
}

impl<P> Inner<P> {
    fn remove(&self, event_type: &str, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(event_type) else {
            return false;
        };

        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(event_type);
        }
        removed
    }
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> std::fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("history_size", &self.inner.history_size)
            .finish_non_exhaustive()
    }
}

impl<P> EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create a bus that keeps the last `history_size` events
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(BTreeMap::new()),
                dispatch: ReentrantMutex::new(()),
                history: Mutex::new(History {
                    recent: VecDeque::with_capacity(history_size),
                    total_events: 0,
                    events_by_type: BTreeMap::new(),
                }),
                history_size,
            }),
        }
    }

    /// Record an event and deliver it to every subscriber of its type
    pub fn publish(&self, event: Event<P>) {
        let _dispatch = self.inner.dispatch.lock();

        {
            let mut history = self.inner.history.lock();
            if history.recent.len() == self.inner.history_size {
                history.recent.pop_front();
            }
            history.recent.push_back(event.clone());
            history.total_events += 1;
            *history
                .events_by_type
                .entry(event.event_type.clone())
                .or_insert(0) += 1;
        }
        metrics::record_event_published(&event.event_type);

        // Copy the callbacks out so re-entrant publish/subscribe cannot deadlock.
        let callbacks: Vec<(Uuid, SubscriberFn<P>, Arc<AtomicBool>)> = self
            .inner
            .subscribers
            .read()
            .get(&event.event_type)
            .map(|list| {
                list.iter()
                    .map(|s| (s.id, s.callback.clone(), s.active.clone()))
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            event_type = %event.event_type,
            service = %event.service,
            subscribers = callbacks.len(),
            "Publishing event"
        );

        for (id, callback, active) in callbacks {
            // Unsubscribed after the copy, possibly by an earlier callback.
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        event_type = %event.event_type,
                        subscription = %id,
                        error = %e,
                        "Event subscriber failed"
                    );
                    metrics::record_subscriber_failure(&event.event_type);
                }
                Err(_) => {
                    error!(
                        event_type = %event.event_type,
                        subscription = %id,
                        "Event subscriber panicked"
                    );
                    metrics::record_subscriber_failure(&event.event_type);
                }
            }
        }
    }

    /// Build and publish an event stamped with the current time
    pub fn emit(&self, event_type: impl Into<String>, service: impl Into<String>, data: P) {
        self.publish(Event::new(event_type, service, data));
    }

    /// Register a callback for one event type
    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Event<P>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = Uuid::new_v4();
        let active = Arc::new(AtomicBool::new(true));

        self.inner
            .subscribers
            .write()
            .entry(event_type.clone())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
                active: active.clone(),
                subscribed_at: Utc::now(),
            });

        debug!(event_type = %event_type, subscription = %id, "Subscribed");

        let weak: Weak<Inner<P>> = Arc::downgrade(&self.inner);
        let remove_type = event_type.clone();
        Subscription {
            id,
            event_type,
            active,
            remover: Arc::new(move |id| match weak.upgrade() {
                Some(inner) => inner.remove(&remove_type, id),
                None => false,
            }),
        }
    }

    /// Subscribe through an unbounded channel instead of a callback
    pub fn subscribe_channel(
        &self,
        event_type: impl Into<String>,
    ) -> (Subscription, mpsc::UnboundedReceiver<Event<P>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(event_type, move |event| {
            tx.send(event.clone())
                .map_err(|_| anyhow!("subscription receiver dropped"))
        });
        (subscription, rx)
    }

    /// Counters, recent history and the rolling event rate
    pub fn get_event_stats(&self) -> EventStats<P> {
        let history = self.inner.history.lock();
        EventStats {
            total_events: history.total_events,
            events_by_type: history.events_by_type.clone(),
            recent_events: history.recent.iter().cloned().collect(),
            event_rate: event_rate(&history.recent),
        }
    }

    /// Live subscriptions grouped by event type
    pub fn get_subscription_stats(&self) -> SubscriptionStats {
        let subscribers = self.inner.subscribers.read();
        let mut stats = SubscriptionStats::default();

        for (event_type, list) in subscribers.iter() {
            stats
                .subscriptions_by_event_type
                .insert(event_type.clone(), list.len());
            stats.total_subscriptions += list.len();
            stats
                .subscriptions
                .extend(list.iter().map(|s| SubscriptionInfo {
                    id: s.id,
                    event_type: event_type.clone(),
                    subscribed_at: s.subscribed_at,
                }));
        }

        stats
    }

    /// Unhealthy only when internal bookkeeping is inconsistent
    pub fn health_check(&self) -> HealthReport {
        let (history_len, total_events, typed_total) = {
            let history = self.inner.history.lock();
            (
                history.recent.len(),
                history.total_events,
                history.events_by_type.values().sum::<u64>(),
            )
        };
        let subscription_stats = self.get_subscription_stats();

        let mut problems = Vec::new();
        if history_len > self.inner.history_size {
            problems.push(format!(
                "history holds {} events, capacity is {}",
                history_len, self.inner.history_size
            ));
        }
        if typed_total != total_events {
            problems.push(format!(
                "per-type counters sum to {}, total is {}",
                typed_total, total_events
            ));
        }

        let report = if problems.is_empty() {
            HealthReport::new(HealthStatus::Healthy)
        } else {
            HealthReport::unhealthy(problems.join("; "))
        };

        report
            .with_detail("total_events", total_events)
            .with_detail("history_len", history_len as u64)
            .with_detail("history_size", self.inner.history_size as u64)
            .with_detail(
                "total_subscriptions",
                subscription_stats.total_subscriptions as u64,
            )
    }
}

/// Events per minute across the window.
///
/// Needs at least two events spanning a non-zero interval; otherwise 0.
fn event_rate<P>(recent: &VecDeque<Event<P>>) -> f64 {
    let (Some(oldest), Some(newest)) = (recent.front(), recent.back()) else {
        return 0.0;
    };
    if recent.len() < 2 {
        return 0.0;
    }

    let span_ms = (newest.timestamp - oldest.timestamp).num_milliseconds();
    if span_ms <= 0 {
        return 0.0;
    }

    (recent.len() - 1) as f64 * 60_000.0 / span_ms as f64
}

/// Handle to a registration; `unsubscribe` removes exactly that registration
pub struct Subscription {
    id: Uuid,
    event_type: String,
    /// Shared with the bus-side entry so in-flight deliveries see it cleared
    active: Arc<AtomicBool>,
    remover: Arc<dyn Fn(Uuid) -> bool + Send + Sync>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the registration. Later calls are no-ops and return false.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let removed = (self.remover)(self.id);
        debug!(event_type = %self.event_type, subscription = %self.id, "Unsubscribed");
        removed
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicU32;

    fn bus() -> EventBus<u32> {
        EventBus::new(10)
    }

    #[test]
    fn test_history_is_bounded() {
        let bus: EventBus<u32> = EventBus::new(3);
        for i in 0..5 {
            bus.emit("po.created", "po-service", i);
        }

        let stats = bus.get_event_stats();
        assert_eq!(stats.total_events, 5);
        assert_eq!(stats.events_by_type["po.created"], 5);
        let kept: Vec<u32> = stats.recent_events.iter().map(|e| e.data).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn test_only_matching_type_is_delivered() {
        let bus = bus();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let _sub = bus.subscribe("po.approved", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit("po.created", "po-service", 1);
        bus.emit("po.approved", "po-service", 2);
        bus.emit("po.approved.extra", "po-service", 3);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_rate() {
        let mut recent = VecDeque::new();
        assert_eq!(event_rate::<u32>(&recent), 0.0);

        let start = Utc::now();
        recent.push_back(Event::at("a", "s", 0u32, start));
        assert_eq!(event_rate(&recent), 0.0);

        recent.push_back(Event::at("a", "s", 1u32, start + ChronoDuration::seconds(30)));
        recent.push_back(Event::at("a", "s", 2u32, start + ChronoDuration::seconds(60)));
        // Two intervals over one minute.
        assert!((event_rate(&recent) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_span_rate_is_zero() {
        let now = Utc::now();
        let recent: VecDeque<Event<u32>> =
            vec![Event::at("a", "s", 0, now), Event::at("a", "s", 1, now)].into();
        assert_eq!(event_rate(&recent), 0.0);
    }

    #[test]
    fn test_subscription_stats() {
        let bus = bus();
        let a = bus.subscribe("po.created", |_| Ok(()));
        let _b = bus.subscribe("po.created", |_| Ok(()));
        let _c = bus.subscribe("vendor.updated", |_| Ok(()));

        let stats = bus.get_subscription_stats();
        assert_eq!(stats.total_subscriptions, 3);
        assert_eq!(stats.subscriptions_by_event_type["po.created"], 2);
        assert_eq!(stats.subscriptions_by_event_type["vendor.updated"], 1);
        assert!(stats.subscriptions.iter().any(|s| s.id == a.id()));

        a.unsubscribe();
        let stats = bus.get_subscription_stats();
        assert_eq!(stats.total_subscriptions, 2);
        assert_eq!(stats.subscriptions_by_event_type["po.created"], 1);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus = bus();
        let sub = bus.subscribe("po.created", |_| Ok(()));
        drop(bus);
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
    }

    #[test]
    fn test_health_check_healthy() {
        let bus = bus();
        bus.emit("po.created", "po-service", 1);
        let _sub = bus.subscribe("po.created", |_| Ok(()));

        let report = bus.health_check();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.details["total_events"], 1);
        assert_eq!(report.details["total_subscriptions"], 1);
    }

    #[tokio::test]
    async fn test_channel_subscription() {
        let bus = bus();
        let (sub, mut rx) = bus.subscribe_channel("po.created");

        bus.emit("po.created", "po-service", 7);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.data, 7);

        sub.unsubscribe();
        bus.emit("po.created", "po-service", 8);
        assert!(rx.try_recv().is_err());
    }
}
