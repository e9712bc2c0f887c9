use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use topicwire_error::{SubscribeError, WireResult};
use tracing::{debug, warn};

use crate::{
    connection::ConnectionManager,
    pubsub::InboundMessage,
    request::{CoordinatorConfig, Initiation, Outcomes, RequestCoordinator},
};

/// Пауза по умолчанию между подтверждённой подпиской и первым запросом.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Область жизни одного потребителя (экрана, виджета, сервиса).
///
/// Собирает всё, что потребитель регистрирует в общем соединении, и снимает
/// это целиком: обработчик в реестре, координаторы с их таймерами и
/// собственные подписки. Топики освобождаются по счётчику ссылок, поэтому
/// соседние потребители того же топика не теряют подписку.
pub struct ConsumerScope {
    id: String,
    manager: Arc<ConnectionManager>,
    settle_delay: Duration,
    owned: Mutex<Owned>,
}

#[derive(Default)]
struct Owned {
    handler: bool,
    topics: Vec<String>,
    coordinators: Vec<RequestCoordinator>,
    torn_down: bool,
}

impl ConsumerScope {
    pub fn new(
        manager: Arc<ConnectionManager>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            manager,
            settle_delay: DEFAULT_SETTLE_DELAY,
            owned: Mutex::new(Owned::default()),
        }
    }

    pub fn with_settle_delay(
        mut self,
        delay: Duration,
    ) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Регистрирует единственный обработчик потребителя под его `id`.
    /// Повторный вызов заменяет обработчик.
    pub fn on_message<F>(
        &self,
        handler: F,
    ) where
        F: Fn(&InboundMessage) -> WireResult<()> + Send + Sync + 'static,
    {
        self.manager.add_handler(self.id.as_str(), handler);
        self.owned.lock().handler = true;
    }

    /// Подписывается на топик и запоминает его как собственный.
    ///
    /// Если потребитель снят, пока подписка была в пути, ссылка на топик
    /// сразу освобождается и возвращается `Aborted`.
    pub async fn subscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        self.manager.subscribe(topic).await?;

        {
            let mut owned = self.owned.lock();
            if !owned.torn_down {
                owned.topics.push(topic.to_string());
                return Ok(());
            }
        }

        debug!(consumer = %self.id, topic, "Torn down while subscribing");
        self.manager.tracker().release(topic).await?;
        Err(SubscribeError::Aborted {
            topic: topic.to_string(),
        }
        .into())
    }

    /// Создаёт координатор, принадлежащий этой области.
    pub fn coordinator(
        &self,
        config: CoordinatorConfig,
    ) -> (RequestCoordinator, Outcomes) {
        let (coordinator, outcomes) = RequestCoordinator::new(self.manager.clone(), config);
        self.owned.lock().coordinators.push(coordinator.clone());
        (coordinator, outcomes)
    }

    /// Подписывается на топик ответа, выжидает `settle_delay` и отправляет
    /// запрос.
    pub async fn subscribe_then_initiate<T>(
        &self,
        coordinator: &RequestCoordinator,
        payload: &T,
    ) -> WireResult<Initiation>
    where
        T: Serialize + ?Sized,
    {
        let topic = coordinator.config().response_topic.clone();
        self.subscribe(&topic).await?;
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        coordinator.initiate(payload).await
    }

    pub fn topics(&self) -> Vec<String> {
        self.owned.lock().topics.clone()
    }

    /// Полностью снимает потребителя. Повторный вызов ничего не делает.
    pub async fn teardown(&self) {
        let Some(topics) = self.detach() else {
            return;
        };

        let tracker = self.manager.tracker();
        for topic in &topics {
            if let Err(err) = tracker.release(topic).await {
                warn!(consumer = %self.id, topic, error = %err, "Release failed");
            }
        }
        debug!(consumer = %self.id, topics = topics.len(), "Consumer torn down");
    }

    /// Синхронная часть снятия: обработчик и координаторы. Возвращает
    /// топики, которые осталось освободить.
    fn detach(&self) -> Option<Vec<String>> {
        let mut owned = self.owned.lock();
        if owned.torn_down {
            return None;
        }
        owned.torn_down = true;

        if owned.handler {
            self.manager.remove_handler(&self.id);
        }
        for coordinator in owned.coordinators.drain(..) {
            coordinator.cancel();
        }
        Some(std::mem::take(&mut owned.topics))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Drop for ConsumerScope {
    fn drop(&mut self) {
        let Some(topics) = self.detach() else {
            return;
        };
        if topics.is_empty() {
            return;
        }

        // Освобождение топиков асинхронное: без runtime остаются висеть
        // только подписки, таймеры и обработчик уже сняты.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tracker = self.manager.tracker().clone();
                handle.spawn(async move {
                    for topic in topics {
                        let _ = tracker.release(&topic).await;
                    }
                });
            }
            Err(_) => warn!(consumer = %self.id, "Dropped outside runtime, topics kept"),
        }
    }
}

impl std::fmt::Debug for ConsumerScope {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let owned = self.owned.lock();
        f.debug_struct("ConsumerScope")
            .field("id", &self.id)
            .field("topics", &owned.topics)
            .field("coordinators", &owned.coordinators.len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
