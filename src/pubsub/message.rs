use std::sync::Arc;

use bytes::Bytes;

/// Входящее сообщение: топик и сырые байты полезной нагрузки.
///
/// Живёт ровно один раунд рассылки обработчикам.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: Arc<str>,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(
        topic: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Возвращает `true`, если сообщение пришло в указанный топик.
    pub fn is_on(
        &self,
        topic: &str,
    ) -> bool {
        &*self.topic == topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет создание сообщения с &str и &[u8]
    #[test]
    fn test_message_creation_with_str_and_bytes() {
        let msg = InboundMessage::new("B/D/shopit/buy/response", Bytes::from_static(b"{}"));

        assert_eq!(msg.topic(), "B/D/shopit/buy/response");
        assert_eq!(msg.payload, Bytes::from_static(b"{}"));
        assert!(msg.is_on("B/D/shopit/buy/response"));
        assert!(!msg.is_on("B/D/shopit/buy/request"));
    }

    /// Тест проверяет создание сообщения с String и Vec<u8>
    #[test]
    fn test_message_creation_with_string_and_vec() {
        let topic = String::from("updates");
        let payload = vec![1, 2, 3, 4, 5];

        let msg = InboundMessage::new(topic, payload.clone());

        assert_eq!(msg.topic(), "updates");
        assert_eq!(&msg.payload[..], &payload[..]);
    }

    /// Тест проверяет сообщение с пустым содержимым
    #[test]
    fn test_message_with_empty_payload() {
        let msg = InboundMessage::new("system", Vec::new());
        assert!(msg.payload.is_empty());
    }
}
