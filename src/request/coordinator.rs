use std::{mem, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use topicwire_error::{bail, CancelledError, ParseError, StatusCode, TimeoutError, WireResult};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::CancelableTimer;
use crate::{
    connection::ConnectionManager,
    pubsub::InboundMessage,
    response::{normalize, parse_payload, NormalizedResponse},
};

/// Политика ожидания ответа и повторов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Сколько ждать ответа на одну попытку
    pub timeout: Duration,
    /// Сколько всего публикаций допускается (первая + повторы)
    pub max_attempts: u32,
    /// Пауза между таймаутом и повторной публикацией
    pub retry_delay: Duration,
}

/// Настройки одного координатора запросов.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Идентификатор координатора в реестре обработчиков
    pub id: String,
    pub request_topic: String,
    pub response_topic: String,
    /// Ключ, под которым сервер может завернуть массив в `data`
    pub wrapper_key: Option<String>,
    pub policy: RetryPolicy,
}

/// Состояние конечного автомата запроса.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Idle,
    AwaitingResponse,
    Succeeded,
    Failed,
    /// Координатор снят; ответы больше не наблюдаются
    Cancelled,
}

/// Итог запроса. Доставляется ровно один раз на каждый терминальный
/// переход.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Получен ответ (успешный или нет)
    Completed(NormalizedResponse),
    /// Ответа нет после всех попыток
    TimedOut { attempts: u32 },
}

/// Результат вызова [`RequestCoordinator::initiate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiation {
    /// Запрос опубликован, таймер взведён
    Initiated,
    /// Запрос уже в полёте; ничего не опубликовано
    AlreadyInFlight,
}

/// Поток итогов координатора.
#[derive(Debug)]
pub struct Outcomes {
    rx: mpsc::UnboundedReceiver<RequestOutcome>,
}

/// Координатор запроса по схеме "публикация в request-топик → ответ в
/// response-топике".
///
/// Соответствие ответа запросу определяется только топиком, поэтому в
/// полёте одновременно находится не более одного запроса. Ответ и таймаут
/// сравниваются под одной блокировкой: на каждую попытку действует ровно
/// одно из двух событий. Устаревшие срабатывания таймера отсекаются
/// поколением.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoordinatorConfig,
    manager: Arc<ConnectionManager>,
    machine: Mutex<Machine>,
    outcomes: mpsc::UnboundedSender<RequestOutcome>,
}

struct Machine {
    state: RequestState,
    attempt: u32,
    generation: u64,
    payload: Option<Bytes>,
    timer: Option<CancelableTimer>,
    deadline: Option<Instant>,
    waiters: Vec<oneshot::Sender<RequestOutcome>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RetryPolicy {
    /// Политика для лёгких запросов: более короткий таймаут.
    pub fn light() -> Self {
        Self {
            timeout: Duration::from_millis(10000),
            ..Self::default()
        }
    }
}

impl CoordinatorConfig {
    pub fn new(
        request_topic: impl Into<String>,
        response_topic: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("coordinator-{}", Uuid::new_v4()),
            request_topic: request_topic.into(),
            response_topic: response_topic.into(),
            wrapper_key: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Конфигурация с политикой [`RetryPolicy::light`].
    pub fn light(
        request_topic: impl Into<String>,
        response_topic: impl Into<String>,
    ) -> Self {
        Self::new(request_topic, response_topic).with_policy(RetryPolicy::light())
    }

    pub fn with_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_wrapper_key(
        mut self,
        key: impl Into<String>,
    ) -> Self {
        self.wrapper_key = Some(key.into());
        self
    }

    pub fn with_policy(
        mut self,
        policy: RetryPolicy,
    ) -> Self {
        self.policy = policy;
        self
    }
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(resp) if resp.is_success())
    }

    /// Данные успешного ответа; иначе `ApplicationError` или `TimeoutError`.
    pub fn into_result(self) -> WireResult<Value> {
        match self {
            Self::Completed(resp) => Ok(resp.into_result()?),
            Self::TimedOut { attempts } => Err(TimeoutError::Exhausted { attempts }.into()),
        }
    }
}

impl Outcomes {
    /// Следующий итог. `None`, когда все ручки координатора удалены.
    pub async fn next(&mut self) -> Option<RequestOutcome> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<RequestOutcome> {
        self.rx.try_recv().ok()
    }
}

impl RequestCoordinator {
    /// Создаёт координатор и регистрирует его обработчик в реестре
    /// менеджера под `config.id`.
    pub fn new(
        manager: Arc<ConnectionManager>,
        config: CoordinatorConfig,
    ) -> (Self, Outcomes) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = config.id.clone();

        let inner = Arc::new(Inner {
            config,
            manager,
            machine: Mutex::new(Machine {
                state: RequestState::Idle,
                attempt: 0,
                generation: 0,
                payload: None,
                timer: None,
                deadline: None,
                waiters: Vec::new(),
            }),
            outcomes: tx,
        });

        let weak = Arc::downgrade(&inner);
        inner
            .manager
            .add_handler(id, move |msg: &InboundMessage| match weak.upgrade() {
                Some(inner) => inner.on_message(msg),
                None => Ok(()),
            });

        (Self { inner }, Outcomes { rx })
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> RequestState {
        self.inner.machine.lock().state
    }

    /// Номер текущей попытки. Сбрасывается в 0 ответом или `reset()`.
    pub fn attempt(&self) -> u32 {
        self.inner.machine.lock().attempt
    }

    pub fn is_in_flight(&self) -> bool {
        self.state() == RequestState::AwaitingResponse
    }

    /// Момент, когда истечёт текущий таймаут ответа.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.machine.lock().deadline
    }

    /// Публикует запрос и взводит таймер ответа.
    ///
    /// Если запрос уже в полёте, ничего не публикует. Если публикация не
    /// удалась, координатор возвращается в предыдущее состояние.
    pub async fn initiate<T>(
        &self,
        payload: &T,
    ) -> WireResult<Initiation>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(payload).map_err(|e| ParseError::Serialize {
            topic: self.inner.config.request_topic.clone(),
            reason: e.to_string(),
        })?;
        self.inner.start(Bytes::from(bytes)).await
    }

    /// Публикует запрос и ждёт его итога.
    ///
    /// Если запрос уже в полёте, ждёт итога текущего запроса.
    pub async fn request<T>(
        &self,
        payload: &T,
    ) -> WireResult<Value>
    where
        T: Serialize + ?Sized,
    {
        let rx = self.inner.waiter();
        self.initiate(payload).await?;
        self.await_outcome(rx).await
    }

    /// Снимает координатор: гасит таймер, удаляет обработчик из реестра.
    /// Ответы, пришедшие позже, не наблюдаются.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Ручной повтор: сбрасывает автомат в `Idle` с нулевой попыткой.
    pub fn reset(&self) {
        let mut machine = self.inner.machine.lock();
        if machine.state == RequestState::Cancelled {
            return;
        }
        machine.disarm();
        machine.generation += 1;
        machine.state = RequestState::Idle;
        machine.attempt = 0;
        machine.waiters.clear();
        debug!(coordinator = %self.inner.config.id, "Reset");
    }

    /// Сбрасывает автомат и публикует последний запрос заново.
    pub async fn retry(&self) -> WireResult<Initiation> {
        let payload = self.inner.machine.lock().payload.clone();
        let Some(payload) = payload else {
            bail!(StatusCode::InvalidArgs, "Nothing to retry: no request was sent");
        };
        self.reset();
        self.inner.start(payload).await
    }

    async fn await_outcome(
        &self,
        rx: oneshot::Receiver<RequestOutcome>,
    ) -> WireResult<Value> {
        match rx.await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(CancelledError {
                coordinator: self.inner.config.id.clone(),
            }
            .into()),
        }
    }
}

impl Inner {
    async fn start(
        self: &Arc<Self>,
        payload: Bytes,
    ) -> WireResult<Initiation> {
        let (previous, generation) = {
            let mut machine = self.machine.lock();
            match machine.state {
                RequestState::Cancelled => {
                    return Err(CancelledError {
                        coordinator: self.config.id.clone(),
                    }
                    .into());
                }
                RequestState::AwaitingResponse => {
                    debug!(coordinator = %self.config.id, "Request already in flight");
                    return Ok(Initiation::AlreadyInFlight);
                }
                _ => {}
            }

            let previous = (machine.state, machine.attempt);
            machine.state = RequestState::AwaitingResponse;
            machine.attempt = 1;
            machine.generation += 1;
            machine.payload = Some(payload.clone());
            let generation = machine.generation;
            self.arm_timeout(&mut machine, generation);
            (previous, generation)
        };

        let topic = &self.config.request_topic;
        if let Err(err) = self.manager.publish(topic, payload).await {
            let mut machine = self.machine.lock();
            if machine.generation == generation && machine.state == RequestState::AwaitingResponse
            {
                machine.disarm();
                (machine.state, machine.attempt) = previous;
            }
            warn!(coordinator = %self.config.id, topic, error = %err, "Request publish failed");
            return Err(err);
        }

        info!(coordinator = %self.config.id, topic, attempt = 1, "Request published");
        Ok(Initiation::Initiated)
    }

    fn waiter(&self) -> oneshot::Receiver<RequestOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut machine = self.machine.lock();
        machine.waiters.retain(|w| !w.is_closed());
        machine.waiters.push(tx);
        rx
    }

    fn arm_timeout(
        self: &Arc<Self>,
        machine: &mut Machine,
        generation: u64,
    ) {
        let timeout = self.config.policy.timeout;
        let weak = Arc::downgrade(self);
        machine.deadline = Some(Instant::now() + timeout);
        machine.timer = Some(CancelableTimer::arm(timeout, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.on_timeout(generation);
            }
        }));
    }

    fn on_message(
        &self,
        msg: &InboundMessage,
    ) -> WireResult<()> {
        if !msg.is_on(&self.config.response_topic) {
            return Ok(());
        }

        if self.machine.lock().state != RequestState::AwaitingResponse {
            debug!(coordinator = %self.config.id, topic = msg.topic(), "Dropped late response");
            return Ok(());
        }

        // Ошибка разбора уходит в реестр; таймер продолжает идти.
        let value = parse_payload(msg.topic(), &msg.payload)?;
        let response = normalize(&value, self.config.wrapper_key.as_deref());

        let waiters = {
            let mut machine = self.machine.lock();
            if machine.state != RequestState::AwaitingResponse {
                return Ok(());
            }
            machine.disarm();
            machine.attempt = 0;
            machine.state = if response.is_success() {
                RequestState::Succeeded
            } else {
                RequestState::Failed
            };
            mem::take(&mut machine.waiters)
        };

        info!(
            coordinator = %self.config.id,
            success = response.is_success(),
            code = ?response.code(),
            "Response received"
        );
        self.deliver(RequestOutcome::Completed(response), waiters);
        Ok(())
    }

    fn on_timeout(
        self: &Arc<Self>,
        generation: u64,
    ) {
        let mut machine = self.machine.lock();
        if machine.generation != generation || machine.state != RequestState::AwaitingResponse {
            trace!(coordinator = %self.config.id, generation, "Stale timeout ignored");
            return;
        }

        let policy = self.config.policy;
        if machine.attempt < policy.max_attempts {
            machine.attempt += 1;
            machine.generation += 1;
            machine.deadline = None;
            let next = machine.generation;
            warn!(
                coordinator = %self.config.id,
                attempt = machine.attempt,
                max_attempts = policy.max_attempts,
                "No response, retrying"
            );

            let weak = Arc::downgrade(self);
            machine.timer = Some(CancelableTimer::arm(policy.retry_delay, move || async move {
                if let Some(inner) = weak.upgrade() {
                    inner.republish(next).await;
                }
            }));
            return;
        }

        let attempts = machine.attempt;
        machine.timer = None;
        machine.deadline = None;
        machine.state = RequestState::Failed;
        let waiters = mem::take(&mut machine.waiters);
        drop(machine);

        warn!(coordinator = %self.config.id, attempts, "Request timed out");
        self.deliver(RequestOutcome::TimedOut { attempts }, waiters);
    }

    async fn republish(
        self: &Arc<Self>,
        generation: u64,
    ) {
        let (payload, attempt) = {
            let mut machine = self.machine.lock();
            if machine.generation != generation
                || machine.state != RequestState::AwaitingResponse
            {
                return;
            }
            self.arm_timeout(&mut machine, generation);
            (machine.payload.clone(), machine.attempt)
        };

        let Some(payload) = payload else {
            return;
        };

        let topic = &self.config.request_topic;
        match self.manager.publish(topic, payload).await {
            Ok(()) => info!(coordinator = %self.config.id, topic, attempt, "Request republished"),
            // Таймер уже взведён: попытка засчитана, следующая по расписанию.
            Err(err) => warn!(coordinator = %self.config.id, topic, attempt, error = %err, "Republish failed"),
        }
    }

    fn cancel(&self) {
        let mut machine = self.machine.lock();
        if machine.state == RequestState::Cancelled {
            return;
        }
        machine.disarm();
        machine.generation += 1;
        machine.state = RequestState::Cancelled;
        machine.attempt = 0;
        machine.waiters.clear();
        drop(machine);

        self.manager.remove_handler(&self.config.id);
        debug!(coordinator = %self.config.id, "Cancelled");
    }

    fn deliver(
        &self,
        outcome: RequestOutcome,
        waiters: Vec<oneshot::Sender<RequestOutcome>>,
    ) {
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        let _ = self.outcomes.send(outcome);
    }
}

impl Machine {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.deadline = None;
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(20000),
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let machine = self.inner.machine.lock();
        f.debug_struct("RequestCoordinator")
            .field("id", &self.inner.config.id)
            .field("state", &machine.state)
            .field("attempt", &machine.attempt)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
