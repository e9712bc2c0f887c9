use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Состояние общего соединения в его жизненном цикле.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Соединения нет и попыток не предпринимается
    Disconnected,
    /// Идёт первая попытка подключения
    Connecting,
    /// Связь установлена
    Connected,
    /// Связь потеряна, следующая попытка запланирована
    Reconnecting,
}

/// Событие жизненного цикла соединения.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Ровно одно событие на каждое успешное (пере)подключение
    Connected,
    /// Соединение остановлено через `disconnect()`
    Disconnected,
    /// Связь потеряна или попытка не удалась; следующая попытка через
    /// `reconnect_period`
    Reconnecting { reason: String },
}

/// Разделяемое состояние соединения.
///
/// Меняет его только менеджер соединения; остальные компоненты читают.
#[derive(Debug, Clone)]
pub struct LinkState(Arc<RwLock<ConnectionState>>);

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl LinkState {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(ConnectionState::Disconnected)))
    }

    pub fn get(&self) -> ConnectionState {
        *self.0.read()
    }

    /// Устанавливает состояние и возвращает предыдущее.
    pub(crate) fn set(
        &self,
        state: ConnectionState,
    ) -> ConnectionState {
        std::mem::replace(&mut *self.0.write(), state)
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
