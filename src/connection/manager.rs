use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use topicwire_error::{ConnectionError, ResultExt, StackError, WireResult};
use tracing::{debug, error, info, trace, warn};

use super::{ConnectionEvent, ConnectionState, LinkState};
use crate::{
    dispatch::{DispatchReport, HandlerRegistry},
    pubsub::InboundMessage,
    subscription::SubscriptionTracker,
    topic::validate_topic,
    transport::{Transport, TransportEvent},
};

/// Параметры жизненного цикла соединения.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Пауза между попытками переподключения (без ограничения числа попыток)
    pub reconnect_period: Duration,
    /// Предельное время одной попытки подключения
    pub connect_timeout: Duration,
    /// Восстанавливать учтённые подписки после переподключения
    pub resubscribe: bool,
    /// Ёмкость канала событий жизненного цикла
    pub event_capacity: usize,
}

/// Менеджер общего соединения.
///
/// Владеет транспортом, реестром обработчиков и трекером подписок.
/// Создаётся явно и передаётся потребителям через `Arc`; несколько
/// менеджеров могут сосуществовать в одном процессе.
///
/// Входящие события разбирает одна фоновая задача: рассылка обработчикам
/// никогда не выполняется параллельно сама с собой.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

/// Состояние, общее для менеджера и фоновой задачи.
struct Shared {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    link: LinkState,
    events: broadcast::Sender<ConnectionEvent>,
    registry: Arc<HandlerRegistry>,
    tracker: Arc<SubscriptionTracker>,
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Почему закончилась сессия соединения.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionConfig {
    pub fn with_reconnect_period(
        mut self,
        period: Duration,
    ) -> Self {
        self.reconnect_period = period;
        self
    }

    pub fn with_connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_resubscribe(
        mut self,
        resubscribe: bool,
    ) -> Self {
        self.resubscribe = resubscribe;
        self
    }
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let link = LinkState::new();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let tracker = Arc::new(SubscriptionTracker::new(transport.clone(), link.clone()));

        Arc::new(Self {
            shared: Arc::new(Shared {
                transport,
                config,
                link,
                events,
                registry: Arc::new(HandlerRegistry::new()),
                tracker,
            }),
            worker: Mutex::new(None),
        })
    }

    /// Запускает подключение, если оно ещё не установлено и не идёт.
    ///
    /// Возвращается сразу, не дожидаясь связи: готовность сообщает
    /// событие [`ConnectionEvent::Connected`] или [`Self::wait_connected`].
    pub fn connect(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            trace!("Connect requested while already running");
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        self.shared.link.set(ConnectionState::Connecting);
        info!(transport = self.shared.transport.name(), "Connecting");

        let handle = tokio::spawn(run(self.shared.clone(), shutdown_rx));
        *worker = Some(Worker { shutdown, handle });
    }

    /// Разрывает соединение и останавливает переподключение.
    ///
    /// Снимает все обработчики и забывает все подписки: после нового
    /// `connect()` потребители регистрируются заново.
    pub async fn disconnect(&self) {
        let worker = self.worker.lock().take();

        if let Some(Worker { shutdown, handle }) = worker {
            let _ = shutdown.send(());
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!(error = %err, "Connection worker panicked");
                }
            }
        }

        self.shared.link.set(ConnectionState::Disconnected);
        self.shared.registry.clear();
        self.shared.tracker.clear();
        let _ = self.shared.events.send(ConnectionEvent::Disconnected);
        info!(transport = self.shared.transport.name(), "Disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.get()
    }

    /// Подписка на события жизненного цикла.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Ждёт установленного соединения (сразу, если оно уже есть).
    pub async fn wait_connected(&self) {
        let mut events = self.shared.events.subscribe();
        loop {
            if self.is_connected() {
                return;
            }
            match events.recv().await {
                Ok(ConnectionEvent::Connected) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                // Sender живёт в `Shared`, пока жив менеджер.
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Публикует сообщение. Без соединения завершается
    /// `ConnectionError::NotConnected` сразу: сообщение не ставится в
    /// очередь, а менеджер запускает подключение, если оно остановлено.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> WireResult<()> {
        validate_topic(topic)?;

        if !self.is_connected() {
            warn!(topic, "Publish while not connected");
            self.connect();
            return Err(ConnectionError::NotConnected {
                operation: "publish".to_string(),
            }
            .into());
        }

        let size = payload.len();
        self.shared
            .transport
            .publish(topic, payload)
            .await
            .map_err(|e| publish_error(topic, e))
            .with_context(|| format!("Publishing to {topic}"))?;
        debug!(topic, bytes = size, "Published");
        Ok(())
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.shared.registry
    }

    pub fn tracker(&self) -> &Arc<SubscriptionTracker> {
        &self.shared.tracker
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn add_handler<F>(
        &self,
        id: impl Into<Arc<str>>,
        handler: F,
    ) where
        F: Fn(&InboundMessage) -> WireResult<()> + Send + Sync + 'static,
    {
        self.shared.registry.add_handler(id, handler);
    }

    pub fn remove_handler(
        &self,
        id: &str,
    ) -> bool {
        self.shared.registry.remove_handler(id)
    }

    pub async fn subscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        self.shared.tracker.subscribe(topic).await
    }

    pub async fn unsubscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        self.shared.tracker.unsubscribe(topic).await
    }
}

fn publish_error(
    topic: &str,
    err: StackError,
) -> StackError {
    if err.status_code().is_connection_error() {
        return err;
    }
    ConnectionError::PublishFailed {
        topic: topic.to_string(),
        reason: err.to_string(),
    }
    .into()
}

////////////////////////////////////////////////////////////////////////////////
// Фоновая задача соединения
////////////////////////////////////////////////////////////////////////////////

/// Цикл подключения: попытка → сессия → пауза → новая попытка, пока не
/// придёт сигнал остановки.
async fn run(
    shared: Arc<Shared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let config = shared.config.clone();
    let name = shared.transport.name().to_string();

    loop {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let attempt = tokio::time::timeout(config.connect_timeout, shared.transport.open(events_tx));

        let opened = tokio::select! {
            biased;
            _ = &mut shutdown => {
                close_transport(&shared).await;
                return;
            }
            result = attempt => result,
        };

        let reason = match opened {
            Ok(Ok(())) => match session(&shared, events_rx, &mut shutdown).await {
                SessionEnd::Shutdown => {
                    close_transport(&shared).await;
                    return;
                }
                SessionEnd::Lost(reason) => reason,
            },
            Ok(Err(err)) => err.to_string(),
            Err(_) => ConnectionError::ConnectTimeout {
                transport: name.clone(),
                timeout_ms: config.connect_timeout.as_millis() as u64,
            }
            .to_string(),
        };

        close_transport(&shared).await;
        shared.link.set(ConnectionState::Reconnecting);
        warn!(
            transport = %name,
            reason = %reason,
            retry_in_ms = config.reconnect_period.as_millis() as u64,
            "Connection lost, scheduling reconnect"
        );
        let _ = shared
            .events
            .send(ConnectionEvent::Reconnecting { reason });

        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(config.reconnect_period) => {}
        }
    }
}

/// Одна сессия поверх открытого соединения.
async fn session(
    shared: &Shared,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    shared.link.set(ConnectionState::Connected);
    info!(transport = shared.transport.name(), "Connected");
    let _ = shared.events.send(ConnectionEvent::Connected);

    if shared.config.resubscribe {
        shared.tracker.resubscribe_all().await;
    }

    loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown => return SessionEnd::Shutdown,
            event = events.recv() => match event {
                Some(TransportEvent::Message(message)) => {
                    let DispatchReport { delivered, failed } = shared.registry.dispatch(&message);
                    trace!(topic = message.topic(), delivered, failed, "Dispatched message");
                }
                Some(TransportEvent::Error(reason)) => return SessionEnd::Lost(reason),
                Some(TransportEvent::Closed) | None => {
                    return SessionEnd::Lost(ConnectionError::Closed.to_string());
                }
            },
        }
    }
}

async fn close_transport(shared: &Shared) {
    if let Err(err) = shared.transport.close().await {
        debug!(error = %err, "Transport close failed");
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_period: Duration::from_millis(2000),
            connect_timeout: Duration::from_millis(15000),
            resubscribe: true,
            event_capacity: 64,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.shutdown.send(());
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.shared.transport.name())
            .field("state", &self.state())
            .field("handlers", &self.shared.registry.len())
            .field("topics", &self.shared.tracker.topics())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
