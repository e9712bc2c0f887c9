use std::{sync::Arc, time::Duration};

use tokio::task::JoinSet;
use topicwire::{
    ConnectionConfig, ConnectionManager, ConsumerScope, MemoryTransport, StatusCode,
};
use topicwire_error::SubscribeError;

async fn connected(transport: &Arc<MemoryTransport>) -> Arc<ConnectionManager> {
    let manager = ConnectionManager::new(transport.clone(), ConnectionConfig::default());
    manager.connect();
    manager.wait_connected().await;
    manager
}

/// Тест проверяет, что N одновременных подписок на один топик дают одну
/// сетевую подписку и N успешных подтверждений.
#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribe_single_network_call() {
    let transport = Arc::new(MemoryTransport::new());
    transport.set_ack_delay(Duration::from_millis(50));
    let manager = connected(&transport).await;

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let manager = manager.clone();
        tasks.spawn(async move { manager.subscribe("b2c/shop/products/response").await });
    }

    let mut acks = 0;
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
        acks += 1;
    }

    assert_eq!(acks, 8);
    assert_eq!(transport.subscribe_calls("b2c/shop/products/response"), 1);
    assert_eq!(manager.tracker().ref_count("b2c/shop/products/response"), 8);
}

/// Тест проверяет, что повторная подписка на активный топик
/// подтверждается без сети.
#[tokio::test(start_paused = true)]
async fn test_subscribe_already_active() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = connected(&transport).await;

    manager.subscribe("a/b").await.unwrap();
    manager.subscribe("a/b").await.unwrap();
    assert_eq!(transport.subscribe_calls("a/b"), 1);

    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.tracker().subscribe_with_ack("a/b", move |err| {
        let _ = tx.send(err);
    });
    assert!(rx.await.unwrap().is_none());
    assert_eq!(transport.subscribe_calls("a/b"), 1);
}

/// Тест проверяет, что отказ брокера не помечает топик активным и
/// доходит до callback.
#[tokio::test(start_paused = true)]
async fn test_rejected_subscribe_reported() {
    let transport = Arc::new(MemoryTransport::new());
    transport.reject_subscribe("private/topic", "not authorized");
    let manager = connected(&transport).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    manager
        .tracker()
        .subscribe_with_ack("private/topic", move |err| {
            let _ = tx.send(err);
        });

    let err = rx.await.unwrap().expect("subscribe must fail");
    assert!(err.is::<SubscribeError>());
    assert_eq!(err.status_code(), StatusCode::SubscribeFailed);
    assert!(!manager.tracker().is_subscribed("private/topic"));

    transport.allow_subscribe("private/topic");
    manager.subscribe("private/topic").await.unwrap();
    assert!(manager.tracker().is_subscribed("private/topic"));
}

/// Тест проверяет подписку без соединения: ошибка сразу, без очереди.
#[tokio::test(start_paused = true)]
async fn test_subscribe_not_connected() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = ConnectionManager::new(transport.clone(), ConnectionConfig::default());

    let err = manager.subscribe("a/b").await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NotConnected);
    assert_eq!(transport.subscribe_calls("a/b"), 0);
}

/// Тест проверяет исходный контракт unsubscribe: топик снимается, даже
/// если на него подписан другой потребитель.
#[tokio::test(start_paused = true)]
async fn test_unsubscribe_ignores_other_consumers() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = connected(&transport).await;

    manager.subscribe("shared/topic").await.unwrap();
    manager.subscribe("shared/topic").await.unwrap();
    manager.unsubscribe("shared/topic").await.unwrap();

    assert!(!manager.tracker().is_subscribed("shared/topic"));
    assert_eq!(transport.unsubscribe_calls("shared/topic"), 1);
}

/// Тест проверяет ref-counted освобождение через области потребителей.
#[tokio::test(start_paused = true)]
async fn test_scopes_release_by_refcount() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = connected(&transport).await;

    let history = ConsumerScope::new(manager.clone(), "history");
    let dashboard = ConsumerScope::new(manager.clone(), "dashboard");
    history.subscribe("b2c/live").await.unwrap();
    dashboard.subscribe("b2c/live").await.unwrap();

    history.teardown().await;
    assert!(manager.tracker().is_subscribed("b2c/live"));
    assert_eq!(transport.active_subscriptions(), ["b2c/live"]);

    dashboard.teardown().await;
    assert!(!manager.tracker().is_subscribed("b2c/live"));
    assert!(transport.active_subscriptions().is_empty());
}
