use serde_json::Value;
use topicwire_error::{ApplicationError, FailureCategory, ParseError};

/// Сообщение об ошибке, если ответ его не содержит.
pub const DEFAULT_FAILURE_MESSAGE: &str = "request failed";

/// Код, которым сервер помечает успешный ответ.
const SUCCESS_CODE: i64 = 200;

/// Канонический вид ответа сервера.
///
/// Всегда заполнен целиком: либо успешная проекция, либо неуспешная.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedResponse {
    Success {
        code: Option<i64>,
        message: Option<String>,
        data: Value,
    },
    Failure {
        code: Option<i64>,
        message: String,
    },
}

////////////////////////////////////////////////////////////////////////////////
// Разбор и нормализация
////////////////////////////////////////////////////////////////////////////////

/// Разбирает полезную нагрузку как UTF-8 JSON.
pub fn parse_payload(
    topic: &str,
    payload: &[u8],
) -> Result<Value, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8 {
        topic: topic.to_string(),
    })?;
    serde_json::from_str(text).map_err(|e| ParseError::InvalidJson {
        topic: topic.to_string(),
        reason: e.to_string(),
    })
}

/// Приводит разобранный ответ к [`NormalizedResponse`].
///
/// Ответ успешен, если выполнено хотя бы одно из условий:
/// `status == "success"`, `status == true`, `code == 200`,
/// `status_code == 200`. Данные успешного ответа извлекаются так:
/// массив `data` как есть; иначе массив `data.<wrapper_key>`; иначе `data`
/// как есть (или `null`).
pub fn normalize(
    value: &Value,
    wrapper_key: Option<&str>,
) -> NormalizedResponse {
    let code = response_code(value);
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);

    if is_success(value) {
        NormalizedResponse::Success {
            code,
            message,
            data: extract_data(value, wrapper_key),
        }
    } else {
        NormalizedResponse::Failure {
            code,
            message: message.unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        }
    }
}

fn is_success(value: &Value) -> bool {
    let status_ok = match value.get("status") {
        Some(Value::String(s)) => s == "success",
        Some(Value::Bool(b)) => *b,
        _ => false,
    };

    status_ok
        || value.get("code").and_then(Value::as_i64) == Some(SUCCESS_CODE)
        || value.get("status_code").and_then(Value::as_i64) == Some(SUCCESS_CODE)
}

fn response_code(value: &Value) -> Option<i64> {
    value
        .get("code")
        .and_then(Value::as_i64)
        .or_else(|| value.get("status_code").and_then(Value::as_i64))
}

fn extract_data(
    value: &Value,
    wrapper_key: Option<&str>,
) -> Value {
    let Some(data) = value.get("data") else {
        return Value::Null;
    };

    if data.is_array() {
        return data.clone();
    }

    if let Some(wrapped) = wrapper_key
        .and_then(|key| data.get(key))
        .filter(|inner| inner.is_array())
    {
        return wrapped.clone();
    }

    data.clone()
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl NormalizedResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Success { code, .. } | Self::Failure { code, .. } => *code,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { message, .. } => message.as_deref(),
            Self::Failure { message, .. } => Some(message),
        }
    }

    /// Данные успешного ответа.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    /// Категория отказа для неуспешного ответа.
    pub fn failure_category(&self) -> Option<FailureCategory> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { code, .. } => Some(FailureCategory::from_code(*code)),
        }
    }

    /// Данные при успехе, [`ApplicationError`] при отказе.
    pub fn into_result(self) -> Result<Value, ApplicationError> {
        match self {
            Self::Success { data, .. } => Ok(data),
            Self::Failure { code, message } => Err(ApplicationError::new(code, message)),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
