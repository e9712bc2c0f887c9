use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::RwLock;
use topicwire_error::{HandlerError, StackError, WireResult};
use tracing::{debug, error, warn};

use crate::pubsub::InboundMessage;

/// Обработчик входящих сообщений.
///
/// Вызывается для каждого входящего сообщения независимо от топика;
/// фильтрация: ответственность самого обработчика. Должен быть коротким
/// и неблокирующим: рассылка выполняется последовательно в одной задаче.
pub type Handler = dyn Fn(&InboundMessage) -> WireResult<()> + Send + Sync;

/// Итог одного раунда рассылки.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Сколько обработчиков было вызвано (включая упавшие)
    pub delivered: usize,
    /// Сколько из них вернули ошибку или запаниковали
    pub failed: usize,
}

/// Реестр наблюдателей входящих сообщений с ключом по идентификатору.
///
/// Порядок вызова совпадает с порядком регистрации; повторная регистрация
/// того же id заменяет обработчик на месте.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<(Arc<str>, Arc<Handler>)>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует обработчик или заменяет существующий с тем же id.
    pub fn add_handler<F>(
        &self,
        id: impl Into<Arc<str>>,
        handler: F,
    ) where
        F: Fn(&InboundMessage) -> WireResult<()> + Send + Sync + 'static,
    {
        let id = id.into();
        let handler: Arc<Handler> = Arc::new(handler);
        let mut handlers = self.handlers.write();

        match handlers.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => {
                slot.1 = handler;
                debug!(handler_id = %id, "Replaced message handler");
            }
            None => {
                handlers.push((id.clone(), handler));
                debug!(handler_id = %id, "Added message handler");
            }
        }
    }

    /// Удаляет обработчик. Отсутствующий id: не ошибка.
    pub fn remove_handler(
        &self,
        id: &str,
    ) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| &**existing != id);
        let removed = handlers.len() != before;
        if removed {
            debug!(handler_id = id, "Removed message handler");
        }
        removed
    }

    /// Удаляет все обработчики.
    pub fn clear(&self) {
        let mut handlers = self.handlers.write();
        let count = handlers.len();
        handlers.clear();
        debug!(count, "Cleared message handlers");
    }

    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.handlers.read().iter().any(|(existing, _)| &**existing == id)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Идентификаторы в порядке регистрации.
    pub fn ids(&self) -> Vec<Arc<str>> {
        self.handlers.read().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Рассылает сообщение всем обработчикам, зарегистрированным на момент
    /// начала раунда.
    ///
    /// Обработчики вызываются по снимку: добавленные во время раунда
    /// получат только следующее сообщение, удалённые во время раунда
    /// ещё могут получить текущее. Ошибка или паника одного обработчика
    /// логируется и не мешает остальным.
    pub fn dispatch(
        &self,
        message: &InboundMessage,
    ) -> DispatchReport {
        let snapshot: Vec<(Arc<str>, Arc<Handler>)> = self.handlers.read().clone();
        let mut report = DispatchReport::default();

        for (id, handler) in snapshot {
            report.delivered += 1;

            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    report.failed += 1;
                    log_handler_error(&id, message, &err);
                }
                Err(panic) => {
                    report.failed += 1;
                    let err = HandlerError::Panicked {
                        id: id.to_string(),
                        reason: panic_reason(panic.as_ref()),
                    };
                    error!(
                        handler_id = %id,
                        topic = message.topic(),
                        error = %err,
                        "Message handler panicked"
                    );
                }
            }
        }

        report
    }
}

fn log_handler_error(
    id: &str,
    message: &InboundMessage,
    err: &StackError,
) {
    if err.status_code().is_parse_error() {
        warn!(
            handler_id = id,
            topic = message.topic(),
            status = %err.status_code(),
            error = %err,
            "Dropped unparsable message"
        );
    } else {
        warn!(
            handler_id = id,
            topic = message.topic(),
            status = %err.status_code(),
            error = %err,
            "Message handler failed"
        );
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
