//! Граница с внешним транспортом publish/subscribe.
//!
//! Ядро ничего не знает о протоколе: ему нужны только подключение,
//! `publish`, `subscribe`/`unsubscribe` с подтверждением и поток входящих
//! событий.

pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use topicwire_error::WireResult;

pub use memory::MemoryTransport;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;

use crate::pubsub::InboundMessage;

/// Канал, по которому транспорт сообщает о входящих событиях.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Событие транспорта после успешного `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Входящее сообщение в одном из подписанных топиков
    Message(InboundMessage),
    /// Ошибка уровня соединения; менеджер разорвёт связь и переподключится
    Error(String),
    /// Транспорт закрыл соединение
    Closed,
}

/// Транспорт publish/subscribe.
///
/// Все методы кроме `open` вызываются только при установленном соединении.
/// Реализация должна быть потокобезопасной: менеджер соединения и трекер
/// подписок обращаются к ней из разных задач.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Короткое имя для логов и ошибок.
    fn name(&self) -> &str;

    /// Устанавливает соединение. Завершается, когда связь готова к работе;
    /// дальнейшие события приходят в `events`.
    async fn open(
        &self,
        events: EventSender,
    ) -> WireResult<()>;

    /// Закрывает соединение. Повторный вызов безопасен.
    async fn close(&self) -> WireResult<()>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> WireResult<()>;

    /// Подписывается на топик и ждёт подтверждения брокера.
    async fn subscribe(
        &self,
        topic: &str,
    ) -> WireResult<()>;

    async fn unsubscribe(
        &self,
        topic: &str,
    ) -> WireResult<()>;
}
