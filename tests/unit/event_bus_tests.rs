//! Typed event bus delivery order and subscription management.

use std::sync::{Arc, Mutex};

use session_warden::events::EventBus;

#[test]
fn delivers_in_subscription_order() {
    let bus: EventBus<u32> = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        let seen = Arc::clone(&seen);
        bus.subscribe(move |n: &u32| seen.lock().unwrap().push(format!("{tag}:{n}")));
    }
    bus.publish(&7);

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["first:7", "second:7", "third:7"]
    );
}

#[test]
fn unsubscribe_removes_only_that_handler() {
    let bus: EventBus<()> = EventBus::new();
    let hits = Arc::new(Mutex::new(0u32));

    let h1 = Arc::clone(&hits);
    let first = bus.subscribe(move |()| *h1.lock().unwrap() += 1);
    let h2 = Arc::clone(&hits);
    bus.subscribe(move |()| *h2.lock().unwrap() += 10);

    assert!(bus.unsubscribe(first));
    assert!(!bus.unsubscribe(first), "second unsubscribe is a no-op");
    bus.publish(&());

    assert_eq!(*hits.lock().unwrap(), 10);
    assert_eq!(bus.subscriber_count(), 1);
}

#[test]
fn handler_may_subscribe_during_publish() {
    let bus: Arc<EventBus<u8>> = Arc::new(EventBus::new());
    let inner = Arc::clone(&bus);
    bus.subscribe(move |_| {
        inner.subscribe(|_| {});
    });

    bus.publish(&1);
    assert_eq!(bus.subscriber_count(), 2);
}

#[test]
fn clear_drops_everything() {
    let bus: EventBus<u8> = EventBus::default();
    bus.subscribe(|_| {});
    bus.subscribe(|_| {});
    bus.clear();
    assert_eq!(bus.subscriber_count(), 0);
    bus.publish(&0);
}
