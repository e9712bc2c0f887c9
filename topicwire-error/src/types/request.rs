use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Грубая категория отказа приложения.
///
/// Определяется только по коду ответа; перевод в пользовательские сообщения
/// (недостаточно средств, товар закончился и т.п.) остаётся на стороне
/// интерфейса.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// 400: запрос отклонён бизнес-логикой
    Rejected,
    /// 404: ресурс не найден
    NotFound,
    /// 422: запрос не прошёл валидацию
    Invalid,
    /// Любой другой или отсутствующий код
    Other,
}

/// Ответ сервера, нормализованный как неуспешный.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    pub code: Option<i64>,
    pub message: String,
}

/// Запрос не получил ответа после всех попыток.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    Exhausted { attempts: u32 },
}

/// Запрос снят потребителем до получения результата.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledError {
    pub coordinator: String,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl FailureCategory {
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(400) => Self::Rejected,
            Some(404) => Self::NotFound,
            Some(422) => Self::Invalid,
            _ => Self::Other,
        }
    }
}

impl ApplicationError {
    pub fn new(
        code: Option<i64>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn category(&self) -> FailureCategory {
        FailureCategory::from_code(self.code)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl std::fmt::Display for ApplicationError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ApplicationError {}

impl ErrorExt for ApplicationError {
    fn status_code(&self) -> StatusCode {
        match self.category() {
            FailureCategory::Rejected => StatusCode::ApplicationRejected,
            FailureCategory::NotFound => StatusCode::ApplicationNotFound,
            FailureCategory::Invalid => StatusCode::ApplicationInvalid,
            FailureCategory::Other => StatusCode::ApplicationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        self.message.clone()
    }
}

impl std::fmt::Display for TimeoutError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Exhausted { attempts } => {
                write!(f, "No response after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for TimeoutError {}

impl ErrorExt for TimeoutError {
    fn status_code(&self) -> StatusCode {
        StatusCode::RetryExhausted
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        "The server did not respond, please try again".to_string()
    }
}

impl std::fmt::Display for CancelledError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Request {} was cancelled", self.coordinator)
    }
}

impl std::error::Error for CancelledError {}

impl ErrorExt for CancelledError {
    fn status_code(&self) -> StatusCode {
        StatusCode::RequestCancelled
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет категоризацию отказов по коду.
    #[test]
    fn test_failure_category() {
        assert_eq!(
            ApplicationError::new(Some(400), "Saldo tidak cukup").category(),
            FailureCategory::Rejected
        );
        assert_eq!(
            ApplicationError::new(Some(404), "not found").category(),
            FailureCategory::NotFound
        );
        assert_eq!(
            ApplicationError::new(Some(422), "quantity must be > 0").category(),
            FailureCategory::Invalid
        );
        assert_eq!(
            ApplicationError::new(None, "request failed").category(),
            FailureCategory::Other
        );
    }

    /// Тест проверяет, что сообщение приложения доходит до пользователя
    /// без изменений.
    #[test]
    fn test_application_client_message() {
        let err = ApplicationError::new(Some(422), "Jumlah transfer harus lebih dari 0");
        assert_eq!(err.client_message(), "Jumlah transfer harus lebih dari 0");
        assert_eq!(err.status_code(), StatusCode::ApplicationInvalid);
        assert_eq!(
            err.to_string(),
            "Jumlah transfer harus lebih dari 0 (code 422)"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = TimeoutError::Exhausted { attempts: 3 };
        assert_eq!(err.to_string(), "No response after 3 attempts");
        assert_eq!(err.status_code(), StatusCode::RetryExhausted);
    }
}
