use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use topicwire::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, MemoryTransport,
    StatusCode,
};

fn config() -> ConnectionConfig {
    ConnectionConfig::default()
        .with_reconnect_period(Duration::from_millis(200))
        .with_connect_timeout(Duration::from_secs(1))
}

/// Тест проверяет, что несколько менеджеров в одном процессе независимы.
#[tokio::test(start_paused = true)]
async fn test_independent_managers() {
    let first_transport = Arc::new(MemoryTransport::new());
    let second_transport = Arc::new(MemoryTransport::new());
    let first = ConnectionManager::new(first_transport.clone(), config());
    let second = ConnectionManager::new(second_transport.clone(), config());

    first.connect();
    first.wait_connected().await;

    assert!(first.is_connected());
    assert_eq!(second.state(), ConnectionState::Disconnected);
    assert_eq!(second_transport.open_count(), 0);

    first.publish("a/b", Bytes::from_static(b"{}")).await.unwrap();
    assert_eq!(first_transport.published_to("a/b"), 1);
    assert_eq!(second_transport.published_to("a/b"), 0);
}

/// Тест проверяет, что публикация без связи запускает подключение.
#[tokio::test(start_paused = true)]
async fn test_publish_nudges_connect() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = ConnectionManager::new(transport.clone(), config());

    let err = manager
        .publish("a/b", Bytes::from_static(b"{}"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NotConnected);

    manager.wait_connected().await;
    assert!(manager.is_connected());
    assert_eq!(transport.published_to("a/b"), 0);
}

/// Тест проверяет публикацию в некорректный топик.
#[tokio::test(start_paused = true)]
async fn test_publish_invalid_topic() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = ConnectionManager::new(transport.clone(), config());
    manager.connect();
    manager.wait_connected().await;

    let err = manager
        .publish("a/+/b", Bytes::from_static(b"{}"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::InvalidTopic);
}

/// Тест проверяет полный цикл: обрыв, переподключение с восстановлением
/// подписок, доставка после восстановления, остановка.
#[tokio::test(start_paused = true)]
async fn test_reconnect_restores_delivery() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = ConnectionManager::new(transport.clone(), config());
    let mut events = manager.events();

    manager.connect();
    manager.wait_connected().await;
    manager.subscribe("b2c/live").await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    manager.add_handler("live", move |msg| {
        let _ = tx.send(msg.payload.clone());
        Ok(())
    });

    transport.set_online(false);
    transport.drop_link("broker restarted");

    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    assert!(matches!(
        events.recv().await.unwrap(),
        ConnectionEvent::Reconnecting { .. }
    ));
    // брокер недоступен: ещё одна неудачная попытка
    assert!(matches!(
        events.recv().await.unwrap(),
        ConnectionEvent::Reconnecting { .. }
    ));
    assert!(!manager.is_connected());

    transport.set_online(true);
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    tokio::time::sleep(Duration::from_millis(1)).await;

    transport
        .broker()
        .publish("b2c/live", Bytes::from_static(b"{\"n\":1}"));
    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"{\"n\":1}"));
    assert_eq!(transport.active_subscriptions(), ["b2c/live"]);

    manager.disconnect().await;
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!transport.is_open());
}

/// Тест проверяет, что без resubscribe подписки после переподключения не
/// восстанавливаются на транспорте.
#[tokio::test(start_paused = true)]
async fn test_reconnect_without_resubscribe() {
    let transport = Arc::new(MemoryTransport::new());
    let manager =
        ConnectionManager::new(transport.clone(), config().with_resubscribe(false));
    let mut events = manager.events();

    manager.connect();
    manager.wait_connected().await;
    manager.subscribe("b2c/live").await.unwrap();

    transport.drop_link("flap");
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    assert!(matches!(
        events.recv().await.unwrap(),
        ConnectionEvent::Reconnecting { .. }
    ));
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);

    assert_eq!(transport.subscribe_calls("b2c/live"), 1);
    assert!(transport.active_subscriptions().is_empty());
}

/// Тест проверяет повторное подключение после disconnect.
#[tokio::test(start_paused = true)]
async fn test_connect_after_disconnect() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = ConnectionManager::new(transport.clone(), config());

    manager.connect();
    manager.wait_connected().await;
    manager.disconnect().await;

    manager.connect();
    manager.wait_connected().await;
    assert!(manager.is_connected());
    assert_eq!(transport.open_count(), 2);
}

/// Тест проверяет, что топик, отклонённый брокером при восстановлении
/// подписок, не считается подписанным и следующий `subscribe` идёт в сеть.
#[tokio::test(start_paused = true)]
async fn test_rejected_resubscribe_is_retried() {
    let transport = Arc::new(MemoryTransport::new());
    let manager = ConnectionManager::new(transport.clone(), config());
    let mut events = manager.events();

    manager.connect();
    manager.wait_connected().await;
    manager.subscribe("a/b").await.unwrap();

    transport.reject_subscribe("a/b", "acl changed");
    transport.drop_link("flap");
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    assert!(matches!(
        events.recv().await.unwrap(),
        ConnectionEvent::Reconnecting { .. }
    ));
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(transport.subscribe_calls("a/b"), 2);
    assert!(!manager.tracker().is_subscribed("a/b"));

    transport.allow_subscribe("a/b");
    manager.subscribe("a/b").await.unwrap();
    assert_eq!(transport.subscribe_calls("a/b"), 3);
    assert!(manager.tracker().is_subscribed("a/b"));
    assert_eq!(transport.active_subscriptions(), ["a/b"]);
}
