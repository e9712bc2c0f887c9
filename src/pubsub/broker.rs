use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use topicwire_error::SubscribeError;

use super::{InboundMessage, Subscription};
use crate::topic::{is_wildcard, validate_filter, TopicFilter};

type ChannelKey = Arc<str>;

/// Внутрипроцессный брокер сообщений.
///
/// Поддерживает:
/// - Точные подписки по имени топика
/// - Подписки по MQTT-фильтрам (`+`, `#`)
/// - Автоматическое удаление пустых каналов
/// - Статистику публикаций и ошибок отправки
///
/// Используется [`MemoryTransport`](crate::transport::MemoryTransport) как
/// замена внешнему брокеру в тестах и демонстрации.
pub struct Broker {
    /// Точные топики → `Sender`
    channels: Arc<DashMap<ChannelKey, broadcast::Sender<InboundMessage>>>,
    /// Фильтры с шаблонами → (`TopicFilter`, `Sender`)
    patterns: Arc<DashMap<ChannelKey, (TopicFilter, broadcast::Sender<InboundMessage>)>>,
    /// Ёмкость буфера каждого `broadcast::channel`
    default_capacity: usize,
    /// Общее количество вызовов `publish`
    pub publish_count: AtomicUsize,
    /// Количество неудачных `send` (нет подписчиков)
    pub send_error_count: AtomicUsize,
}

impl Broker {
    /// Создаёт новый `Broker` с заданной буферной ёмкостью.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            patterns: Arc::new(DashMap::new()),
            default_capacity,
            publish_count: AtomicUsize::new(0),
            send_error_count: AtomicUsize::new(0),
        }
    }

    /// Подписка на топик или фильтр.
    ///
    /// Фильтры с `+`/`#` регистрируются как шаблоны; повторная подписка на
    /// тот же фильтр получит тот же `Sender`.
    pub fn subscribe(
        &self,
        filter: &str,
    ) -> Result<Subscription, SubscribeError> {
        validate_filter(filter)?;
        let key: Arc<str> = Arc::from(filter);

        let tx = if is_wildcard(filter) {
            let compiled = TopicFilter::new(filter)?;
            self.patterns
                .entry(key.clone())
                .or_insert_with(|| (compiled, broadcast::channel(self.default_capacity).0))
                .1
                .clone()
        } else {
            self.channels
                .entry(key.clone())
                .or_insert_with(|| broadcast::channel(self.default_capacity).0)
                .clone()
        };

        Ok(Subscription {
            filter: key,
            inner: tx.subscribe(),
        })
    }

    /// Публикация сообщения в топик.
    ///
    /// Работает в два этапа:
    /// 1. Отправляет в точный канал (если есть)
    /// 2. Отправляет всем подписчикам по шаблонам
    ///
    /// Если в точном канале нет подписчиков: увеличивает `send_error_count`
    /// и удаляет канал. Возвращает число приёмников, получивших сообщение.
    pub fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;

        // 1) точное совпадение
        if let Some(entry) = self.channels.get(topic) {
            let tx = entry.value().clone();
            let key = entry.key().clone();
            drop(entry);

            match tx.send(InboundMessage::new(key.clone(), payload.clone())) {
                Ok(n) => delivered += n,
                Err(_) => {
                    self.send_error_count.fetch_add(1, Ordering::Relaxed);
                }
            }
            if tx.receiver_count() == 0 {
                self.channels.remove(&*key);
            }
        }

        // 2) по шаблону
        let topic: Arc<str> = Arc::from(topic);
        for entry in self.patterns.iter() {
            let (filter, tx) = entry.value();
            if filter.matches(&topic) {
                if let Ok(n) = tx.send(InboundMessage::new(topic.clone(), payload.clone())) {
                    delivered += n;
                }
            }
        }

        delivered
    }

    /// Удаляет все подписки на указанный топик или фильтр (и сам канал).
    ///
    /// Приёмники получат `RecvError::Closed`.
    pub fn unsubscribe_all(
        &self,
        filter: &str,
    ) {
        self.channels.remove(filter);
        self.patterns.remove(filter);
    }

    /// Количество каналов (точных и шаблонных).
    pub fn channel_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(64)
    }
}
