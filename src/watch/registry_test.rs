use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::registry::*;

fn subscriber(
    registry: &SubscriptionRegistry
) -> (u64, Subscriber, mpsc::UnboundedReceiver<Bytes>) {
    let id = registry.next_subscriber_id();
    let (tx, rx) = mpsc::unbounded_channel();
    (id, Subscriber::new(id, tx), rx)
}

#[test]
fn test_has_changed() {
    let bar = Bytes::from("bar");
    assert!(has_changed(None, &Bytes::new()));
    assert!(has_changed(None, &bar));
    assert!(!has_changed(Some(&bar), &Bytes::from("bar")));
    assert!(has_changed(Some(&bar), &Bytes::from("baz")));
    assert!(has_changed(Some(&Bytes::new()), &bar));
    assert!(!has_changed(Some(&Bytes::new()), &Bytes::new()));
}

#[test]
fn test_subscriber_ids_are_unique() {
    let registry = SubscriptionRegistry::new();
    let a = registry.next_subscriber_id();
    let b = registry.next_subscriber_id();
    assert_eq!(a, 1);
    assert_eq!(b, 2);
}

#[test]
fn test_same_key_shares_one_entry() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();

    let (_, s1, _rx1) = subscriber(&registry);
    let (_, s2, _rx2) = subscriber(&registry);
    let (e1, new1) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    let (e2, new2) = registry.lookup_or_create("foo", s2, &shutdown, |_| {}).unwrap();

    assert!(new1);
    assert!(!new2);
    assert!(Arc::ptr_eq(&e1, &e2));
    assert_eq!(e1.subscriber_count(), 2);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_distinct_keys_get_distinct_entries() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();

    let (_, s1, _rx1) = subscriber(&registry);
    let (_, s2, _rx2) = subscriber(&registry);
    let (foo, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    let (bar, _) = registry.lookup_or_create("bar", s2, &shutdown, |_| {}).unwrap();

    assert!(!Arc::ptr_eq(&foo, &bar));
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_publish_only_on_change() {
    let entry = WatchEntry::new("foo", CancellationToken::new());
    assert_eq!(entry.last_value(), None);

    assert_eq!(entry.publish(Bytes::from("bar")), Some(0));
    assert_eq!(entry.publish(Bytes::from("bar")), None);
    assert_eq!(entry.publish(Bytes::from("world")), Some(0));
    assert_eq!(entry.last_value(), Some(Bytes::from("world")));
}

#[test]
fn test_publish_fans_out_to_every_subscriber() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (_, s1, mut rx1) = subscriber(&registry);
    let (_, s2, mut rx2) = subscriber(&registry);
    let (entry, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    registry.lookup_or_create("foo", s2, &shutdown, |_| {}).unwrap();

    assert_eq!(entry.publish(Bytes::from("bar")), Some(2));
    assert_eq!(entry.publish(Bytes::from("world")), Some(2));

    for rx in [&mut rx1, &mut rx2] {
        assert_eq!(rx.try_recv().unwrap(), Bytes::from("bar"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from("world"));
        assert!(rx.try_recv().is_err());
    }
}

#[test]
fn test_publish_skips_dropped_receivers() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (_, s1, rx1) = subscriber(&registry);
    let (_, s2, mut rx2) = subscriber(&registry);
    let (entry, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    registry.lookup_or_create("foo", s2, &shutdown, |_| {}).unwrap();
    drop(rx1);

    entry.publish(Bytes::from("bar"));

    assert_eq!(rx2.try_recv().unwrap(), Bytes::from("bar"));
}

#[test]
fn test_late_subscriber_gets_current_value_first() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (_, s1, _rx1) = subscriber(&registry);
    let (entry, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    entry.publish(Bytes::from("bar"));

    let (_, s2, mut rx2) = subscriber(&registry);
    registry.lookup_or_create("foo", s2, &shutdown, |_| {}).unwrap();
    entry.publish(Bytes::from("world"));

    assert_eq!(rx2.try_recv().unwrap(), Bytes::from("bar"));
    assert_eq!(rx2.try_recv().unwrap(), Bytes::from("world"));
}

#[test]
fn test_subscriber_before_first_fetch_gets_no_replay() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (_, s1, mut rx1) = subscriber(&registry);
    registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();

    assert!(rx1.try_recv().is_err());
}

#[test]
fn test_detach_keeps_entry_while_subscribers_remain() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (id1, s1, _rx1) = subscriber(&registry);
    let (_, s2, _rx2) = subscriber(&registry);
    let (entry, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    registry.lookup_or_create("foo", s2, &shutdown, |_| {}).unwrap();

    assert!(!registry.detach(&entry, id1));

    assert_eq!(entry.subscriber_count(), 1);
    assert!(!entry.token().is_cancelled());
    assert!(registry.get("foo").is_some());
}

#[test]
fn test_detach_last_subscriber_tears_entry_down() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (id1, s1, _rx1) = subscriber(&registry);
    let (entry, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();

    assert!(registry.detach(&entry, id1));

    assert!(entry.token().is_cancelled());
    assert!(registry.get("foo").is_none());
    assert!(!shutdown.is_cancelled());
}

#[test]
fn test_watch_after_teardown_creates_fresh_entry() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (id1, s1, _rx1) = subscriber(&registry);
    let (old, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    old.publish(Bytes::from("bar"));
    registry.detach(&old, id1);

    let (_, s2, mut rx2) = subscriber(&registry);
    let (fresh, is_new) = registry.lookup_or_create("foo", s2, &shutdown, |_| {}).unwrap();

    assert!(is_new);
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert!(!fresh.token().is_cancelled());
    assert_eq!(fresh.last_value(), None);
    assert!(rx2.try_recv().is_err());
}

#[test]
fn test_stale_detach_does_not_remove_newer_entry() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (id1, s1, _rx1) = subscriber(&registry);
    let (old, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    registry.detach(&old, id1);

    let (_, s2, _rx2) = subscriber(&registry);
    let (fresh, _) = registry.lookup_or_create("foo", s2, &shutdown, |_| {}).unwrap();

    // Second detach of the already torn down entry
    registry.detach(&old, id1);

    let current = registry.get("foo").unwrap();
    assert!(Arc::ptr_eq(&current, &fresh));
    assert!(!fresh.token().is_cancelled());
}

#[test]
fn test_entry_token_follows_shutdown() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (_, s1, _rx1) = subscriber(&registry);
    let (entry, _) = registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();

    shutdown.cancel();

    assert!(entry.token().is_cancelled());
}

#[test]
fn test_lookup_after_shutdown_is_refused() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let (_, s1, mut rx1) = subscriber(&registry);
    assert!(registry.lookup_or_create("foo", s1, &shutdown, |_| {}).is_none());

    assert_eq!(registry.len(), 0);
    assert!(matches!(
        rx1.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));
}

#[test]
fn test_drain_ends_every_subscription() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let (_, s1, mut rx1) = subscriber(&registry);
    let (_, s2, mut rx2) = subscriber(&registry);
    registry.lookup_or_create("foo", s1, &shutdown, |_| {}).unwrap();
    registry.lookup_or_create("bar", s2, &shutdown, |_| {}).unwrap();

    assert_eq!(registry.drain(), 2);

    assert_eq!(registry.len(), 0);
    assert!(matches!(
        rx1.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));
    assert!(matches!(
        rx2.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));
}

#[test]
fn test_start_runs_once_per_new_entry_under_the_lock() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    let mut started = Vec::new();

    for key in ["foo", "foo", "bar"] {
        let (_, s, _rx) = subscriber(&registry);
        registry.lookup_or_create(key, s, &shutdown, |entry| {
            // Registry lock is still held while the loop starts
            assert!(registry.is_locked());
            started.push(entry.key().to_string());
        });
    }

    assert_eq!(started, vec!["foo".to_string(), "bar".to_string()]);
}

#[test]
fn test_start_is_skipped_after_shutdown() {
    let registry = SubscriptionRegistry::new();
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let mut started = false;

    let (_, s, _rx) = subscriber(&registry);
    registry.lookup_or_create("foo", s, &shutdown, |_| started = true);

    assert!(!started);
}
