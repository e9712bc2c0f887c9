use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных и разбора сообщений
/// - 3xxx: Ответы приложения (сервер вернул неуспешный конверт)
/// - 5xxx: Подписки
/// - 6xxx: Соединение / транспорт
/// - 7xxx: Запросы (таймауты, повторы)
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    NotImplemented = 1005,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    InvalidData = 2001,
    InvalidTopic = 2002,
    InvalidUtf8 = 2003,
    InvalidJson = 2004,
    SerializationFailed = 2005,

    // === 3xxx: Ответы приложения ===
    ApplicationRejected = 3000,
    ApplicationNotFound = 3001,
    ApplicationInvalid = 3002,
    ApplicationFailed = 3003,

    // === 5xxx: Подписки ===
    SubscribeFailed = 5000,
    UnsubscribeFailed = 5001,
    HandlerFailed = 5002,

    // === 6xxx: Соединение ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    NotConnected = 6005,
    Shutdown = 6006,

    // === 7xxx: Запросы ===
    RequestTimeout = 7000,
    RetryExhausted = 7001,
    RequestCancelled = 7002,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Использует `TryFrom<u32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить.
    ///
    /// Ответы приложения сюда не входят: повтор того же запроса вернёт тот же
    /// отказ.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::RequestTimeout
                | Self::RetryExhausted
                | Self::ConnectionFailed
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::SubscribeFailed
        )
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка, которую вернул сервер приложения (диапазон 3xxx).
    pub fn is_application_error(&self) -> bool {
        (3000..=3999).contains(&self.code())
    }

    /// Ошибка соединения или транспорта (диапазон 6xxx).
    pub fn is_connection_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Ошибка разбора входящих данных.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUtf8 | Self::InvalidJson | Self::InvalidData
        )
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Internal | Self::Unexpected)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::RequestCancelled => LogLevel::Debug,
            Self::ApplicationRejected
            | Self::ApplicationNotFound
            | Self::ApplicationInvalid
            | Self::ApplicationFailed => LogLevel::Info,
            Self::Timeout
            | Self::RequestTimeout
            | Self::RetryExhausted
            | Self::ConnectionClosed
            | Self::NotConnected
            | Self::InvalidJson
            | Self::InvalidUtf8 => LogLevel::Warn,
            Self::Internal | Self::Unexpected | Self::HandlerFailed => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что retryable-коды помечаются корректно.
    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(StatusCode::NotConnected.is_retryable());
        assert!(StatusCode::RetryExhausted.is_retryable());
        assert!(!StatusCode::ApplicationRejected.is_retryable());
        assert!(!StatusCode::InvalidJson.is_retryable());
    }

    /// Тест проверяет диапазоны ответов приложения и ошибок соединения.
    #[test]
    fn test_ranges() {
        assert!(StatusCode::ApplicationNotFound.is_application_error());
        assert!(!StatusCode::NotFound.is_application_error());
        assert!(StatusCode::NotConnected.is_connection_error());
        assert!(StatusCode::Shutdown.is_connection_error());
        assert!(!StatusCode::SubscribeFailed.is_connection_error());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>` и `from_u32`.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::RetryExhausted.code();
        assert_eq!(StatusCode::try_from(n).unwrap(), StatusCode::RetryExhausted);
        assert!(StatusCode::from_u32(99999).is_none());
    }

    /// Тест проверяет числовое представление и `From<StatusCode> for u32`.
    #[test]
    fn test_code_and_into() {
        let c = StatusCode::NotConnected;
        assert_eq!(c.code(), 6005);
        let n: u32 = c.into();
        assert_eq!(n, 6005);
        assert!(StatusCode::is_success(StatusCode::Success.code()));
        assert!(!StatusCode::is_success(StatusCode::NotFound.code()));
    }

    /// Тест проверяет уровни логирования.
    #[test]
    fn test_log_level_mappings() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::InvalidJson.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::HandlerFailed.log_level(), LogLevel::Error);
        assert_eq!(
            StatusCode::ApplicationRejected.log_level(),
            LogLevel::Info
        );
    }

    /// Тест проверяет формат `Display`: имя варианта и числовой код.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::InvalidTopic);
        assert!(s.contains("2002"), "got: {s}");
        assert!(s.contains("InvalidTopic"), "got: {s}");
    }

    #[test]
    fn test_parse_errors() {
        assert!(StatusCode::InvalidJson.is_parse_error());
        assert!(StatusCode::InvalidUtf8.is_parse_error());
        assert!(!StatusCode::Timeout.is_parse_error());
    }
}
