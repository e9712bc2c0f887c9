use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки подписки на топики.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// Транспорт отклонил подписку; топик не помечается активным
    Rejected { topic: String, reason: String },
    /// Транспорт отклонил отписку
    UnsubscribeRejected { topic: String, reason: String },
    /// Некорректный топик или фильтр
    InvalidTopic { topic: String, reason: String },
    /// Подписка, которую ждал вызывающий, была сброшена (`disconnect`)
    Aborted { topic: String },
}

impl std::fmt::Display for SubscribeError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Rejected { topic, reason } => {
                write!(f, "Subscribe to {topic} rejected: {reason}")
            }
            Self::UnsubscribeRejected { topic, reason } => {
                write!(f, "Unsubscribe from {topic} rejected: {reason}")
            }
            Self::InvalidTopic { topic, reason } => write!(f, "Invalid topic '{topic}': {reason}"),
            Self::Aborted { topic } => write!(f, "Subscribe to {topic} aborted"),
        }
    }
}

impl std::error::Error for SubscribeError {}

impl ErrorExt for SubscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Rejected { .. } | Self::Aborted { .. } => StatusCode::SubscribeFailed,
            Self::UnsubscribeRejected { .. } => StatusCode::UnsubscribeFailed,
            Self::InvalidTopic { .. } => StatusCode::InvalidTopic,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let topic = match self {
            Self::Rejected { topic, .. }
            | Self::UnsubscribeRejected { topic, .. }
            | Self::InvalidTopic { topic, .. }
            | Self::Aborted { topic } => topic.clone(),
        };
        vec![
            ("error_type", "subscription".to_string()),
            ("status_code", self.status_code().to_string()),
            ("topic", topic),
        ]
    }
}
