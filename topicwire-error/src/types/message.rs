use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибка разбора входящего сообщения.
///
/// Перехватывается на границе диспетчеризации и не распространяется на
/// других наблюдателей.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("payload on {topic} is not valid UTF-8")]
    InvalidUtf8 { topic: String },

    #[error("payload on {topic} is not valid JSON: {reason}")]
    InvalidJson { topic: String, reason: String },

    #[error("failed to serialize request for {topic}: {reason}")]
    Serialize { topic: String, reason: String },
}

impl ErrorExt for ParseError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUtf8 { .. } => StatusCode::InvalidUtf8,
            Self::InvalidJson { .. } => StatusCode::InvalidJson,
            Self::Serialize { .. } => StatusCode::SerializationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        "Failed to process data from the server".to_string()
    }
}
