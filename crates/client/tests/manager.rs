mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use hms_client::live::{ConnectionManager, LiveOptions, TopicMap};
use hms_shared::protocol::FrameCommand;

#[tokio::test]
async fn subscribers_share_one_connection() {
    let (transport, mut brokers) = MockTransport::new();
    let manager = ConnectionManager::new(transport.clone());
    let (a_seen, a) = recorder();
    let (b_seen, b) = recorder();

    let first = manager.subscribe(URL, TopicMap::new().on("/topic/a", a), LiveOptions::default());
    let second = manager.subscribe(
        &format!("{URL}/"),
        TopicMap::new().on("/topic/b", b),
        LiveOptions::default(),
    );
    assert_eq!(manager.subscriber_count(URL), 2);
    assert_eq!(manager.active_endpoints(), vec![URL.to_string()]);

    let mut broker = brokers.next().await;
    broker.accept().await;
    let subs = broker.subscriptions(2).await;
    wait_connected(&first).await;
    wait_connected(&second).await;
    brokers.expect_none(Duration::from_millis(100)).await;
    assert_eq!(transport.opens(), 1);

    broker.message(Some(subscription_id(&subs, "/topic/b")), "/topic/b", r#"{"b":true}"#);
    eventually(|| b_seen.lock().unwrap().len() == 1).await;
    assert!(a_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn releasing_one_subscriber_keeps_the_others() {
    let (transport, mut brokers) = MockTransport::new();
    let manager = ConnectionManager::new(transport);
    let (a_seen, a) = recorder();
    let (b_seen, b) = recorder();

    let first = manager.subscribe(URL, TopicMap::new().on("/topic/a", a), LiveOptions::default());
    let second = manager.subscribe(URL, TopicMap::new().on("/topic/b", b), LiveOptions::default());

    let mut broker = brokers.next().await;
    broker.accept().await;
    let subs = broker.subscriptions(2).await;
    wait_connected(&second).await;

    first.disconnect();
    assert!(!first.is_connected());
    assert!(second.is_connected());
    assert_eq!(manager.subscriber_count(URL), 1);

    let unsubscribe = broker.next_frame().await;
    assert_eq!(unsubscribe.command, FrameCommand::Unsubscribe);
    assert_eq!(unsubscribe.get("id"), Some(subscription_id(&subs, "/topic/a")));
    broker.expect_no_frame(Duration::from_millis(100)).await;

    broker.message(Some(subscription_id(&subs, "/topic/a")), "/topic/a", "{}");
    broker.message(Some(subscription_id(&subs, "/topic/b")), "/topic/b", "{}");
    eventually(|| b_seen.lock().unwrap().len() == 1).await;
    assert!(a_seen.lock().unwrap().is_empty());

    // Re-attaching reuses the open connection.
    first.reconnect();
    let resubscribe = broker.next_frame().await;
    assert_eq!(resubscribe.command, FrameCommand::Subscribe);
    assert_eq!(resubscribe.get("destination"), Some("/topic/a"));
    assert!(first.is_connected());
    brokers.expect_none(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn last_subscriber_closes_and_next_one_reopens() {
    let (transport, mut brokers) = MockTransport::new();
    let manager = ConnectionManager::new(transport.clone());

    let first = manager.subscribe(URL, TopicMap::new().on("/topic/a", |_| {}), LiveOptions::default());
    let second = manager.subscribe(URL, TopicMap::new().on("/topic/b", |_| {}), LiveOptions::default());
    let mut broker = brokers.next().await;
    broker.accept().await;
    broker.subscriptions(2).await;
    wait_connected(&first).await;

    drop(first);
    drop(second);
    broker.wait_closed().await;
    assert_eq!(manager.subscriber_count(URL), 0);
    assert!(manager.active_endpoints().is_empty());

    let third = manager.subscribe(URL, TopicMap::new().on("/topic/c", |_| {}), LiveOptions::default());
    let mut broker = brokers.next().await;
    broker.accept().await;
    let subs = broker.subscriptions(1).await;
    assert_eq!(subs[0].get("destination"), Some("/topic/c"));
    wait_connected(&third).await;
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn distinct_endpoints_get_distinct_connections() {
    let (transport, mut brokers) = MockTransport::new();
    let manager = ConnectionManager::new(transport.clone());

    let _ward = manager.subscribe(URL, TopicMap::new(), LiveOptions::default());
    let _lab = manager.subscribe("ws://lab.test/ws/websocket", TopicMap::new(), LiveOptions::default());

    brokers.next().await;
    brokers.next().await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(
        manager.active_endpoints(),
        vec![
            "ws://hms.test/ws/websocket".to_string(),
            "ws://lab.test/ws/websocket".to_string()
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_leave_and_join_keeps_the_connection_open() {
    let (transport, brokers) = MockTransport::new();
    brokers.serve_all();
    let manager = Arc::new(ConnectionManager::new(transport));
    let options = LiveOptions::default().with_reconnect(fast_reconnect(0));
    let _connection = manager.connection(URL, options.clone());

    let mut current = manager.subscribe(URL, TopicMap::new(), options.clone());
    for _ in 0..100 {
        let joining = {
            let manager = manager.clone();
            let options = options.clone();
            tokio::spawn(async move { manager.subscribe(URL, TopicMap::new(), options) })
        };
        let leaving = tokio::spawn(async move { drop(current) });
        let (joined, left) = tokio::join!(joining, leaving);
        left.unwrap();
        current = joined.unwrap();

        wait_connected(&current).await;
        assert!(current.is_connected());
        assert_eq!(manager.subscriber_count(URL), 1);
    }
}
