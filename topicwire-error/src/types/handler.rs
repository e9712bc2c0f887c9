use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Сбой обработчика входящих сообщений.
///
/// Реестр обработчиков логирует такие ошибки и продолжает рассылку
/// остальным наблюдателям.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("handler {id} failed: {reason}")]
    Failed { id: String, reason: String },

    #[error("handler {id} panicked: {reason}")]
    Panicked { id: String, reason: String },
}

impl HandlerError {
    pub fn failed(
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Failed {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl ErrorExt for HandlerError {
    fn status_code(&self) -> StatusCode {
        StatusCode::HandlerFailed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let (kind, id) = match self {
            Self::Failed { id, .. } => ("failed", id),
            Self::Panicked { id, .. } => ("panicked", id),
        };
        vec![
            ("error_type", "handler".to_string()),
            ("handler_id", id.clone()),
            ("kind", kind.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panicked_tags() {
        let err = HandlerError::Panicked {
            id: "history-page".to_string(),
            reason: "index out of bounds".to_string(),
        };
        let tags = err.metrics_tags();
        assert!(tags.contains(&("kind", "panicked".to_string())));
        assert!(tags.contains(&("handler_id", "history-page".to_string())));
    }
}
