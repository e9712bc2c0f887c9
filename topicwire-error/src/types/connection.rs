use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки общего соединения с брокером.
#[derive(Debug, Clone)]
pub enum ConnectionError {
    /// Операция (publish/subscribe/unsubscribe) вызвана без живого
    /// соединения. Операция не ставится в очередь.
    NotConnected { operation: String },
    /// Транспорт не смог установить соединение
    ConnectFailed { transport: String, reason: String },
    /// Подключение не завершилось за отведённое время
    ConnectTimeout { transport: String, timeout_ms: u64 },
    /// Соединение закрыто транспортом
    Closed,
    /// Менеджер соединения остановлен через `disconnect()`
    Shutdown,
    /// Транспорт отклонил публикацию
    PublishFailed { topic: String, reason: String },
}

impl std::fmt::Display for ConnectionError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::NotConnected { operation } => {
                write!(f, "Cannot {operation}: client is not connected")
            }
            Self::ConnectFailed { transport, reason } => {
                write!(f, "Failed to connect via {transport}: {reason}")
            }
            Self::ConnectTimeout {
                transport,
                timeout_ms,
            } => write!(f, "Connection via {transport} timed out after {timeout_ms}ms"),
            Self::Closed => write!(f, "Connection closed by transport"),
            Self::Shutdown => write!(f, "Connection manager is shut down"),
            Self::PublishFailed { topic, reason } => {
                write!(f, "Failed to publish to {topic}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

impl ErrorExt for ConnectionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConnected { .. } => StatusCode::NotConnected,
            Self::ConnectFailed { .. } => StatusCode::ConnectionFailed,
            Self::ConnectTimeout { .. } => StatusCode::Timeout,
            Self::Closed => StatusCode::ConnectionClosed,
            Self::Shutdown => StatusCode::Shutdown,
            Self::PublishFailed { .. } => StatusCode::ProtocolError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::NotConnected { .. } => "Not connected to the server".to_string(),
            Self::ConnectFailed { .. } | Self::ConnectTimeout { .. } => {
                "Unable to reach the server".to_string()
            }
            Self::Closed => "Connection lost".to_string(),
            Self::Shutdown => "Connection closed".to_string(),
            Self::PublishFailed { .. } => "Failed to send request".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "connection".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::NotConnected { operation } => tags.push(("operation", operation.clone())),
            Self::ConnectFailed { transport, .. } | Self::ConnectTimeout { transport, .. } => {
                tags.push(("transport", transport.clone()))
            }
            Self::PublishFailed { topic, .. } => tags.push(("topic", topic.clone())),
            _ => {}
        }

        tags
    }
}
