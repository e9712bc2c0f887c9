use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::oneshot;
use topicwire_error::{ConnectionError, StackError, SubscribeError, WireResult};
use tracing::{debug, info, warn};

use crate::{connection::LinkState, topic::validate_filter, transport::Transport};

type Waiter = oneshot::Sender<WireResult<()>>;

/// Состояние одного топика в трекере.
enum TopicState {
    /// Сетевая подписка отправлена, ответ ещё не пришёл
    Pending { waiters: Vec<Waiter>, refs: usize },
    /// Подписка подтверждена брокером
    Active { refs: usize },
}

/// Учёт топиков, подписанных на общем соединении.
///
/// Параллельные `subscribe` одного топика порождают ровно одну сетевую
/// подписку; все вызывающие получают её результат. Для каждого топика
/// ведётся счётчик ссылок: `release` снимает сетевую подписку только при
/// обнулении, а `unsubscribe` снимает её сразу, не глядя на остальных
/// потребителей.
pub struct SubscriptionTracker {
    transport: Arc<dyn Transport>,
    link: LinkState,
    topics: DashMap<String, TopicState>,
}

/// Что делать вызывающему `subscribe` после проверки учёта.
enum Step {
    Done,
    Wait(oneshot::Receiver<WireResult<()>>),
    Lead,
}

/// Снимает незавершённую подписку, если будущее ведущего вызова было
/// отброшено до ответа транспорта.
struct PendingGuard<'a> {
    tracker: &'a SubscriptionTracker,
    topic: &'a str,
    armed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionTracker {
    pub fn new(
        transport: Arc<dyn Transport>,
        link: LinkState,
    ) -> Self {
        Self {
            transport,
            link,
            topics: DashMap::new(),
        }
    }

    /// Подписывается на топик.
    ///
    /// - Топик уже активен: успех без обращения к сети.
    /// - Подписка уже в пути: ожидание её результата.
    /// - Иначе: одна сетевая подписка; при отказе топик не помечается
    ///   активным и все ожидающие получают ошибку.
    pub async fn subscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        validate_filter(topic)?;
        if !self.link.is_connected() {
            return Err(not_connected("subscribe"));
        }

        let step = match self.topics.entry(topic.to_string()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                TopicState::Active { refs } => {
                    *refs += 1;
                    debug!(topic, refs = *refs, "Already subscribed");
                    Step::Done
                }
                TopicState::Pending { waiters, refs } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    *refs += 1;
                    Step::Wait(rx)
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(TopicState::Pending {
                    waiters: Vec::new(),
                    refs: 1,
                });
                Step::Lead
            }
        };

        match step {
            Step::Done => Ok(()),
            Step::Lead => self.lead_subscribe(topic).await,
            Step::Wait(rx) => rx.await.unwrap_or_else(|_| {
                Err(SubscribeError::Aborted {
                    topic: topic.to_string(),
                }
                .into())
            }),
        }
    }

    /// Callback-форма `subscribe`: `ack(None)` при успехе, `ack(Some(err))`
    /// при отказе.
    pub fn subscribe_with_ack<F>(
        self: &Arc<Self>,
        topic: impl Into<String>,
        ack: F,
    ) where
        F: FnOnce(Option<StackError>) + Send + 'static,
    {
        let tracker = self.clone();
        let topic = topic.into();
        tokio::spawn(async move {
            let result = tracker.subscribe(&topic).await;
            ack(result.err());
        });
    }

    async fn lead_subscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        let mut guard = PendingGuard {
            tracker: self,
            topic,
            armed: true,
        };

        let result = self
            .transport
            .subscribe(topic)
            .await
            .map_err(|e| rejected(topic, e));
        guard.armed = false;

        // `orphaned`: все ссылки освобождены, пока подписка была в пути.
        let (waiters, orphaned) = match self.topics.entry(topic.to_string()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                TopicState::Pending { waiters, refs } => {
                    let waiters = std::mem::take(waiters);
                    let refs = *refs;
                    let orphaned = result.is_ok() && refs == 0;
                    if result.is_ok() && refs > 0 {
                        entry.insert(TopicState::Active { refs });
                    } else {
                        entry.remove();
                    }
                    (waiters, orphaned)
                }
                TopicState::Active { .. } => (Vec::new(), false),
            },
            // Трекер очищен (`disconnect`), пока подписка была в пути.
            Entry::Vacant(_) => {
                return Err(SubscribeError::Aborted {
                    topic: topic.to_string(),
                }
                .into());
            }
        };

        match &result {
            Ok(()) => info!(topic, waiters = waiters.len(), "Subscribed"),
            Err(err) => warn!(topic, error = %err, "Subscribe failed"),
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        if orphaned {
            debug!(topic, "Released while pending, unsubscribing");
            let _ = self.network_unsubscribe(topic).await;
        }
        result
    }

    /// Снимает подписку на транспорте и забывает топик, не учитывая других
    /// потребителей того же топика.
    ///
    /// Если подписка ещё в пути, сначала дожидается её исхода: иначе сетевая
    /// отписка обгонит подписку и брокер останется подписанным.
    pub async fn unsubscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        while let Some(pending) = self.pending_outcome(topic) {
            let _ = pending.await;
        }
        self.topics.remove(topic);
        self.network_unsubscribe(topic).await
    }

    /// Встаёт в очередь ожидающих незавершённой подписки, не занимая
    /// ссылку на топик.
    fn pending_outcome(
        &self,
        topic: &str,
    ) -> Option<oneshot::Receiver<WireResult<()>>> {
        let mut entry = self.topics.get_mut(topic)?;
        match entry.value_mut() {
            TopicState::Pending { waiters, .. } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            }
            TopicState::Active { .. } => None,
        }
    }

    /// Уменьшает счётчик ссылок топика; сетевая отписка происходит только
    /// при обнулении. Возвращает `true`, если отписка была выполнена.
    ///
    /// Обнуление у подписки в пути откладывает отписку до ответа брокера.
    pub async fn release(
        &self,
        topic: &str,
    ) -> WireResult<bool> {
        let last = match self.topics.entry(topic.to_string()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                TopicState::Active { refs } if *refs > 1 => {
                    *refs -= 1;
                    debug!(topic, refs = *refs, "Released topic reference");
                    false
                }
                TopicState::Active { .. } => {
                    entry.remove();
                    true
                }
                TopicState::Pending { refs, .. } => {
                    *refs = refs.saturating_sub(1);
                    false
                }
            },
            Entry::Vacant(_) => false,
        };

        if last {
            self.network_unsubscribe(topic).await?;
        }
        Ok(last)
    }

    async fn network_unsubscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        if !self.link.is_connected() {
            return Err(not_connected("unsubscribe"));
        }
        match self.transport.unsubscribe(topic).await {
            Ok(()) => {
                info!(topic, "Unsubscribed");
                Ok(())
            }
            Err(err) => {
                warn!(topic, error = %err, "Unsubscribe failed");
                Err(SubscribeError::UnsubscribeRejected {
                    topic: topic.to_string(),
                    reason: err.to_string(),
                }
                .into())
            }
        }
    }

    /// Повторяет сетевую подписку для всех активных топиков (после
    /// переподключения). Топик, который брокер отклонил, выбывает из учёта,
    /// и следующий `subscribe` снова пойдёт в сеть. При обрыве связи топик
    /// остаётся: его восстановит следующее переподключение.
    pub async fn resubscribe_all(&self) -> usize {
        let topics = self.topics();
        let mut restored = 0;

        for topic in &topics {
            match self.transport.subscribe(topic).await {
                Ok(()) => restored += 1,
                Err(err) if err.status_code().is_connection_error() => {
                    warn!(topic, error = %err, "Resubscribe interrupted");
                }
                Err(err) => {
                    warn!(topic, error = %err, "Resubscribe rejected, topic dropped");
                    self.topics.remove_if(topic.as_str(), |_, state| {
                        matches!(state, TopicState::Active { .. })
                    });
                }
            }
        }

        if !topics.is_empty() {
            info!(restored, total = topics.len(), "Resubscribed topics");
        }
        restored
    }

    /// Забывает все топики. Ожидающие подписки получают `Aborted`.
    pub fn clear(&self) {
        self.topics.clear();
    }

    pub fn is_subscribed(
        &self,
        topic: &str,
    ) -> bool {
        matches!(
            self.topics.get(topic).as_deref(),
            Some(TopicState::Active { .. })
        )
    }

    pub fn is_pending(
        &self,
        topic: &str,
    ) -> bool {
        matches!(
            self.topics.get(topic).as_deref(),
            Some(TopicState::Pending { .. })
        )
    }

    /// Число ссылок на топик (0, если топик не учитывается).
    pub fn ref_count(
        &self,
        topic: &str,
    ) -> usize {
        match self.topics.get(topic).as_deref() {
            Some(TopicState::Active { refs }) | Some(TopicState::Pending { refs, .. }) => *refs,
            None => 0,
        }
    }

    /// Активные топики в алфавитном порядке.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .filter(|entry| matches!(entry.value(), TopicState::Active { .. }))
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }
}

fn not_connected(operation: &str) -> StackError {
    ConnectionError::NotConnected {
        operation: operation.to_string(),
    }
    .into()
}

fn rejected(
    topic: &str,
    err: StackError,
) -> StackError {
    if err.status_code().is_connection_error() || err.is::<SubscribeError>() {
        return err;
    }
    SubscribeError::Rejected {
        topic: topic.to_string(),
        reason: err.to_string(),
    }
    .into()
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = self
            .tracker
            .topics
            .remove_if(self.topic, |_, state| {
                matches!(state, TopicState::Pending { .. })
            });
        if let Some((_, TopicState::Pending { waiters, .. })) = removed {
            for waiter in waiters {
                let _ = waiter.send(Err(SubscribeError::Aborted {
                    topic: self.topic.to_string(),
                }
                .into()));
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
