use anyhow::bail;
use procurement_core::events::{Event, EventBus, EventData, Subscription};
use procurement_core::registry::HealthStatus;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn status_changed(po: &str, to: &str) -> EventData {
    EventData::StatusChanged {
        entity_id: po.to_string(),
        from: "draft".to_string(),
        to: to.to_string(),
    }
}

#[tokio::test]
async fn test_every_subscriber_sees_every_event_in_order() {
    let bus: EventBus = EventBus::new(100);
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let _subscriptions: Vec<_> = (0..3)
        .map(|subscriber| {
            let log = log.clone();
            bus.subscribe("po.status.changed", move |event: &Event| {
                if let EventData::StatusChanged { entity_id, .. } = &event.data {
                    log.lock().push((subscriber, entity_id.clone()));
                }
                Ok(())
            })
        })
        .collect();

    for po in ["PO-1", "PO-2", "PO-3", "PO-4"] {
        bus.emit("po.status.changed", "po-service", status_changed(po, "approved"));
    }

    let log = log.lock();
    assert_eq!(log.len(), 12);
    // Delivery finishes before publish returns, in registration order.
    assert_eq!(log[0], (0, "PO-1".to_string()));
    assert_eq!(log[1], (1, "PO-1".to_string()));
    assert_eq!(log[2], (2, "PO-1".to_string()));
    assert_eq!(log[11], (2, "PO-4".to_string()));
}

#[tokio::test]
async fn test_events_only_reach_matching_type() {
    let bus: EventBus = EventBus::new(100);
    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();

    let _subscription = bus.subscribe("invoice.matched", move |_| {
        received_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.emit("po.status.changed", "po-service", status_changed("PO-1", "sent"));
    assert_eq!(received.load(Ordering::SeqCst), 0);

    bus.emit(
        "invoice.matched",
        "invoice-service",
        EventData::Custom {
            payload: json!({ "invoice": "INV-7" }),
        },
    );
    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let bus: EventBus = EventBus::new(100);
    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();

    let subscription = bus.subscribe("po.created", move |_| {
        received_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.emit("po.created", "po-service", EventData::Custom { payload: json!(1) });
    assert!(subscription.unsubscribe());
    assert!(!subscription.unsubscribe());
    assert!(!subscription.is_active());

    bus.emit("po.created", "po-service", EventData::Custom { payload: json!(2) });
    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(bus.get_subscription_stats().total_subscriptions, 0);
}

#[tokio::test]
async fn test_failing_subscribers_do_not_affect_others() {
    let bus: EventBus = EventBus::new(100);
    let received = Arc::new(AtomicUsize::new(0));

    let _failing = bus.subscribe("po.approved", |_| bail!("notification service offline"));
    let _panicking = bus.subscribe("po.approved", |_| panic!("subscriber bug"));
    let received_clone = received.clone();
    let _healthy = bus.subscribe("po.approved", move |_| {
        received_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.emit("po.approved", "po-service", status_changed("PO-9", "approved"));
    bus.emit("po.approved", "po-service", status_changed("PO-10", "approved"));

    assert_eq!(received.load(Ordering::SeqCst), 2);
    assert_eq!(bus.get_event_stats().total_events, 2);
}

#[tokio::test]
async fn test_subscriber_can_publish_and_subscribe() {
    let bus: EventBus = EventBus::new(100);
    let audited = Arc::new(AtomicUsize::new(0));

    let audited_clone = audited.clone();
    let _audit = bus.subscribe("audit.recorded", move |_| {
        audited_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let inner_bus = bus.clone();
    let _relay = bus.subscribe("po.status.changed", move |event: &Event| {
        inner_bus.emit("audit.recorded", "audit", event.data.clone());
        // Subscribing from inside a callback must not deadlock.
        inner_bus.subscribe("audit.archived", |_| Ok(())).unsubscribe();
        Ok(())
    });

    bus.emit("po.status.changed", "po-service", status_changed("PO-5", "received"));

    assert_eq!(audited.load(Ordering::SeqCst), 1);
    let stats = bus.get_event_stats();
    assert_eq!(stats.total_events, 2);
    assert_eq!(stats.events_by_type["audit.recorded"], 1);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let bus: EventBus = EventBus::new(3);

    for i in 0..5 {
        bus.emit("po.created", "po-service", EventData::Custom { payload: json!(i) });
    }

    let stats = bus.get_event_stats();
    assert_eq!(stats.total_events, 5);
    assert_eq!(stats.events_by_type["po.created"], 5);
    assert_eq!(stats.recent_events.len(), 3);
    assert_eq!(
        stats.recent_events[0].data,
        EventData::Custom { payload: json!(2) }
    );
    assert_eq!(bus.health_check().status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_channel_subscription() {
    let bus: EventBus = EventBus::new(10);
    let (subscription, mut rx) = bus.subscribe_channel("po.cancelled");

    bus.emit("po.cancelled", "po-service", status_changed("PO-3", "cancelled"));

    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type, "po.cancelled");
    assert_eq!(event.service, "po-service");

    subscription.unsubscribe();
    bus.emit("po.cancelled", "po-service", status_changed("PO-4", "cancelled"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_subscription_stats() {
    let bus: EventBus = EventBus::new(10);
    let _a = bus.subscribe("po.created", |_| Ok(()));
    let _b = bus.subscribe("po.created", |_| Ok(()));
    let _c = bus.subscribe("invoice.matched", |_| Ok(()));

    let stats = bus.get_subscription_stats();
    assert_eq!(stats.total_subscriptions, 3);
    assert_eq!(stats.subscriptions_by_event_type["po.created"], 2);
    assert_eq!(stats.subscriptions_by_event_type["invoice.matched"], 1);
    assert_eq!(stats.subscriptions.len(), 3);
}

#[tokio::test]
async fn test_unsubscribed_during_delivery_is_skipped() {
    let bus: EventBus = EventBus::new(10);
    let later: Arc<parking_lot::Mutex<Option<Subscription>>> = Arc::default();
    let later_hits = Arc::new(AtomicUsize::new(0));

    let target = later.clone();
    let _first = bus.subscribe("po.cancelled", move |_| {
        if let Some(subscription) = target.lock().as_ref() {
            subscription.unsubscribe();
        }
        Ok(())
    });

    let hits = later_hits.clone();
    *later.lock() = Some(bus.subscribe("po.cancelled", move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    bus.emit("po.cancelled", "po-service", status_changed("PO-8", "cancelled"));
    bus.emit("po.cancelled", "po-service", status_changed("PO-9", "cancelled"));

    assert_eq!(later_hits.load(Ordering::SeqCst), 0);
    assert_eq!(bus.get_subscription_stats().total_subscriptions, 1);
}

#[test]
fn test_concurrent_publishers_are_serialized() {
    let bus: EventBus = EventBus::new(10);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let current = in_flight.clone();
    let peak = max_in_flight.clone();
    let _slow = bus.subscribe("invoice.matched", move |_| {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    });

    let publishers: Vec<_> = (0..4)
        .map(|i| {
            let bus = bus.clone();
            thread::spawn(move || {
                bus.emit(
                    "invoice.matched",
                    "invoice-service",
                    EventData::Custom {
                        payload: json!({ "invoice": i }),
                    },
                );
            })
        })
        .collect();
    for publisher in publishers {
        publisher.join().unwrap();
    }

    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(bus.get_event_stats().total_events, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishes_lose_no_updates() {
    let bus: EventBus = EventBus::new(1000);
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let _subscription = bus.subscribe("po.created", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let tasks: Vec<_> = (0..16)
        .map(|task| {
            let bus = bus.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    let event_type = if i % 2 == 0 { "po.created" } else { "po.approved" };
                    bus.emit(
                        event_type,
                        "po-service",
                        EventData::Custom {
                            payload: json!({ "task": task, "seq": i }),
                        },
                    );
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let stats = bus.get_event_stats();
    assert_eq!(stats.total_events, 400);
    assert_eq!(stats.events_by_type["po.created"], 208);
    assert_eq!(stats.events_by_type["po.approved"], 192);
    assert_eq!(delivered.load(Ordering::SeqCst), 208);
    assert_eq!(stats.recent_events.len(), 400);
    assert_eq!(bus.health_check().status, HealthStatus::Healthy);
}
