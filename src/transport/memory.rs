use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use topicwire_error::{ConnectionError, SubscribeError, WireResult};
use tracing::{debug, trace, warn};

use super::{EventSender, Transport, TransportEvent};
use crate::pubsub::{Broker, InboundMessage};

const TRANSPORT_NAME: &str = "memory";

/// Транспорт поверх внутрипроцессного [`Broker`].
///
/// Несколько экземпляров с общим брокером ведут себя как независимые
/// клиенты одного сервера. Помимо самого транспорта даёт тестовые
/// рычаги: журнал публикаций, отказ подписки, имитацию обрыва связи,
/// переключение доступности брокера и прямую инъекцию входящих сообщений.
pub struct MemoryTransport {
    broker: Arc<Broker>,
    link: Mutex<Option<Link>>,
    online: AtomicBool,
    open_delay: Mutex<Duration>,
    ack_delay: Mutex<Duration>,
    rejections: DashMap<String, String>,
    published: Mutex<Vec<InboundMessage>>,
    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<String>>,
    open_count: AtomicUsize,
}

/// Живое соединение: канал событий и задачи пересылки по подпискам.
struct Link {
    events: EventSender,
    forwarders: HashMap<String, JoinHandle<()>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryTransport {
    /// Создаёт транспорт с собственным брокером.
    pub fn new() -> Self {
        Self::with_broker(Arc::new(Broker::default()))
    }

    /// Создаёт транспорт поверх общего брокера.
    pub fn with_broker(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            link: Mutex::new(None),
            online: AtomicBool::new(true),
            open_delay: Mutex::new(Duration::ZERO),
            ack_delay: Mutex::new(Duration::ZERO),
            rejections: DashMap::new(),
            published: Mutex::new(Vec::new()),
            subscribe_calls: Mutex::new(Vec::new()),
            unsubscribe_calls: Mutex::new(Vec::new()),
            open_count: AtomicUsize::new(0),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Делает брокер доступным или недоступным для новых подключений.
    pub fn set_online(
        &self,
        online: bool,
    ) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Задержка перед завершением `open`.
    pub fn set_open_delay(
        &self,
        delay: Duration,
    ) {
        *self.open_delay.lock() = delay;
    }

    /// Задержка перед подтверждением `subscribe`.
    pub fn set_ack_delay(
        &self,
        delay: Duration,
    ) {
        *self.ack_delay.lock() = delay;
    }

    /// Все последующие подписки на `topic` будут отклонены.
    pub fn reject_subscribe(
        &self,
        topic: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.rejections.insert(topic.into(), reason.into());
    }

    pub fn allow_subscribe(
        &self,
        topic: &str,
    ) {
        self.rejections.remove(topic);
    }

    /// Имитирует обрыв связи: менеджер получит `TransportEvent::Error`.
    pub fn drop_link(
        &self,
        reason: impl Into<String>,
    ) -> bool {
        self.emit(TransportEvent::Error(reason.into()))
    }

    /// Доставляет сообщение напрямую в канал событий, минуя брокер и
    /// проверку подписок.
    pub fn inject(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
    ) -> bool {
        self.emit(TransportEvent::Message(InboundMessage::new(
            topic,
            payload.into(),
        )))
    }

    pub fn is_open(&self) -> bool {
        self.link.lock().is_some()
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Журнал всех успешных публикаций.
    pub fn published(&self) -> Vec<InboundMessage> {
        self.published.lock().clone()
    }

    /// Количество публикаций в топик.
    pub fn published_to(
        &self,
        topic: &str,
    ) -> usize {
        self.published
            .lock()
            .iter()
            .filter(|m| m.is_on(topic))
            .count()
    }

    /// Количество сетевых подписок на топик (включая отклонённые).
    pub fn subscribe_calls(
        &self,
        topic: &str,
    ) -> usize {
        self.subscribe_calls
            .lock()
            .iter()
            .filter(|t| *t == topic)
            .count()
    }

    pub fn unsubscribe_calls(
        &self,
        topic: &str,
    ) -> usize {
        self.unsubscribe_calls
            .lock()
            .iter()
            .filter(|t| *t == topic)
            .count()
    }

    /// Активные подписки текущего соединения.
    pub fn active_subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .link
            .lock()
            .as_ref()
            .map(|link| link.forwarders.keys().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    fn emit(
        &self,
        event: TransportEvent,
    ) -> bool {
        match self.link.lock().as_ref() {
            Some(link) => link.events.send(event).is_ok(),
            None => false,
        }
    }

    fn not_connected(operation: &str) -> ConnectionError {
        ConnectionError::NotConnected {
            operation: operation.to_string(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация Transport
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    async fn open(
        &self,
        events: EventSender,
    ) -> WireResult<()> {
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectFailed {
                transport: TRANSPORT_NAME.to_string(),
                reason: "broker is offline".to_string(),
            }
            .into());
        }

        let previous = self.link.lock().replace(Link {
            events,
            forwarders: HashMap::new(),
        });
        if let Some(old) = previous {
            old.forwarders.values().for_each(JoinHandle::abort);
        }

        self.open_count.fetch_add(1, Ordering::SeqCst);
        debug!(transport = TRANSPORT_NAME, "Link opened");
        Ok(())
    }

    async fn close(&self) -> WireResult<()> {
        if let Some(link) = self.link.lock().take() {
            link.forwarders.values().for_each(JoinHandle::abort);
            debug!(transport = TRANSPORT_NAME, "Link closed");
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> WireResult<()> {
        if !self.is_open() {
            return Err(Self::not_connected("publish").into());
        }

        self.published
            .lock()
            .push(InboundMessage::new(topic, payload.clone()));
        let receivers = self.broker.publish(topic, payload);
        trace!(topic, receivers, "Published to broker");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        let delay = *self.ack_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.subscribe_calls.lock().push(topic.to_string());

        if let Some(reason) = self.rejections.get(topic) {
            return Err(SubscribeError::Rejected {
                topic: topic.to_string(),
                reason: reason.value().clone(),
            }
            .into());
        }

        let mut subscription = self.broker.subscribe(topic)?;

        let mut guard = self.link.lock();
        let Some(link) = guard.as_mut() else {
            return Err(Self::not_connected("subscribe").into());
        };

        let events = link.events.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(msg) => {
                        if events.send(TransportEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(
                            topic = subscription.filter(),
                            skipped = n,
                            "Forwarder lagged"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(old) = link.forwarders.insert(topic.to_string(), forwarder) {
            old.abort();
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        self.unsubscribe_calls.lock().push(topic.to_string());

        let mut guard = self.link.lock();
        let Some(link) = guard.as_mut() else {
            return Err(Self::not_connected("unsubscribe").into());
        };
        if let Some(forwarder) = link.forwarders.remove(topic) {
            forwarder.abort();
        }
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.forwarders.values().for_each(JoinHandle::abort);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
