use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::{sync::oneshot, task::JoinHandle};
use topicwire_error::{ConnectionError, SubscribeError, WireResult};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{EventSender, Transport, TransportEvent};
use crate::{config::MqttSettings, pubsub::InboundMessage};

const NAME: &str = "mqtt";
const DEFAULT_PORT: u16 = 1883;
const REQUEST_CAPACITY: usize = 64;

type AckResult = Result<(), String>;

/// Схема подключения к брокеру.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Ws,
}

/// Адрес брокера, разобранный из URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Путь для websocket (`/mqtt`)
    pub path: String,
}

/// Транспорт поверх MQTT (`rumqttc`).
///
/// Каждый `open` создаёт новый клиент и задачу опроса event loop. Задача
/// пересылает входящие `Publish` в канал событий и сопоставляет SubAck с
/// ожидающими подписками по packet id.
pub struct MqttTransport {
    settings: MqttSettings,
    addr: BrokerAddr,
    session: Mutex<Option<Session>>,
    /// Порядок постановки подписок в очередь клиента должен совпадать с
    /// порядком их ожидания SubAck.
    subscribe_order: tokio::sync::Mutex<()>,
}

struct Session {
    client: AsyncClient,
    poller: JoinHandle<()>,
    acks: Arc<AckTable>,
}

/// Ожидающие подтверждения подписки.
#[derive(Default)]
struct AckTable {
    /// Ещё не получили packet id
    queued: Mutex<VecDeque<oneshot::Sender<AckResult>>>,
    assigned: Mutex<HashMap<u16, oneshot::Sender<AckResult>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl BrokerAddr {
    /// Разбирает `mqtt://host:port`, `tcp://host:port` или
    /// `ws://host:port/path`.
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let invalid = |reason: &str| ConnectionError::ConnectFailed {
            transport: NAME.to_string(),
            reason: format!("invalid broker url '{url}': {reason}"),
        };

        let (scheme, rest) = match url.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (Scheme::Tcp, rest),
            Some(("ws", rest)) => (Scheme::Ws, rest),
            Some((other, _)) => return Err(invalid(&format!("unsupported scheme '{other}'"))),
            None => (Scheme::Tcp, url),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/mqtt"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

impl AckTable {
    fn enqueue(&self) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.queued.lock().push_back(tx);
        rx
    }

    fn assign(
        &self,
        pkid: u16,
    ) {
        if let Some(tx) = self.queued.lock().pop_front() {
            self.assigned.lock().insert(pkid, tx);
        }
    }

    fn complete(
        &self,
        pkid: u16,
        result: AckResult,
    ) {
        match self.assigned.lock().remove(&pkid) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => trace!(pkid, "SubAck without waiter"),
        }
    }

    fn fail_all(
        &self,
        reason: &str,
    ) {
        for tx in self.queued.lock().drain(..) {
            let _ = tx.send(Err(reason.to_string()));
        }
        for (_, tx) in self.assigned.lock().drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> WireResult<Self> {
        let addr = BrokerAddr::parse(&settings.url)?;
        Ok(Self {
            settings,
            addr,
            session: Mutex::new(None),
            subscribe_order: tokio::sync::Mutex::new(()),
        })
    }

    pub fn addr(&self) -> &BrokerAddr {
        &self.addr
    }

    fn options(&self) -> MqttOptions {
        let client_id = self
            .settings
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("topicwire-{}", Uuid::new_v4().simple()));

        let mut options = match self.addr.scheme {
            Scheme::Tcp => MqttOptions::new(client_id, &self.addr.host, self.addr.port),
            Scheme::Ws => {
                let url = format!("ws://{}:{}{}", self.addr.host, self.addr.port, self.addr.path);
                let mut options = MqttOptions::new(client_id, url, self.addr.port);
                options.set_transport(rumqttc::Transport::Ws);
                options
            }
        };

        options
            .set_keep_alive(Duration::from_secs(self.settings.keep_alive_secs.max(5)))
            .set_clean_session(self.settings.clean_session);

        if let Some(username) = self.settings.username.as_deref().filter(|u| !u.is_empty()) {
            let password = self.settings.password.clone().unwrap_or_default();
            options.set_credentials(username, password);
        }
        options
    }

    fn client(&self) -> Result<(AsyncClient, Arc<AckTable>), ConnectionError> {
        self.session
            .lock()
            .as_ref()
            .map(|s| (s.client.clone(), s.acks.clone()))
            .ok_or_else(|| ConnectionError::NotConnected {
                operation: "use mqtt client".to_string(),
            })
    }
}

/// Опрос event loop до первой ошибки.
async fn poll(
    mut eventloop: EventLoop,
    events: EventSender,
    acks: Arc<AckTable>,
    ready: oneshot::Sender<AckResult>,
) {
    let mut ready = Some(ready);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!(session_present = ack.session_present, "ConnAck received");
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic, publish.payload);
                if events.send(TransportEvent::Message(message)).is_err() {
                    return;
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => acks.assign(pkid),
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                let result = if rejected {
                    Err("broker returned failure code".to_string())
                } else {
                    Ok(())
                };
                acks.complete(ack.pkid, result);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                acks.fail_all("disconnected by broker");
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                let reason = err.to_string();
                acks.fail_all(&reason);
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(reason));
                    }
                    None => {
                        let _ = events.send(TransportEvent::Error(reason));
                    }
                }
                return;
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Реализация Transport
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &str {
        NAME
    }

    async fn open(
        &self,
        events: EventSender,
    ) -> WireResult<()> {
        self.close().await?;

        info!(url = %self.settings.url, user = ?self.settings.username, "Connecting to MQTT broker");
        let (client, eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        let acks = Arc::new(AckTable::default());
        let (ready_tx, ready_rx) = oneshot::channel();
        let poller = tokio::spawn(poll(eventloop, events, acks.clone(), ready_tx));

        *self.session.lock() = Some(Session {
            client,
            poller,
            acks,
        });

        let connect_failed = |reason: String| ConnectionError::ConnectFailed {
            transport: NAME.to_string(),
            reason,
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => {
                self.close().await?;
                Err(connect_failed(reason).into())
            }
            Err(_) => {
                self.close().await?;
                Err(connect_failed("event loop stopped".to_string()).into())
            }
        }
    }

    async fn close(&self) -> WireResult<()> {
        let session = self.session.lock().take();
        if let Some(session) = session {
            if let Err(err) = session.client.try_disconnect() {
                trace!(error = %err, "Disconnect request not queued");
            }
            session.poller.abort();
            session.acks.fail_all("connection closed");
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> WireResult<()> {
        let (client, _) = self.client()?;
        client
            .publish_bytes(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| ConnectionError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        let (client, acks) = self.client()?;
        let rejected = |reason: String| SubscribeError::Rejected {
            topic: topic.to_string(),
            reason,
        };

        let ack = {
            let _order = self.subscribe_order.lock().await;
            let ack = acks.enqueue();
            client
                .subscribe(topic, QoS::AtMostOnce)
                .await
                .map_err(|e| rejected(e.to_string()))?;
            ack
        };

        match ack.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => {
                warn!(topic, reason = %reason, "Broker rejected subscribe");
                Err(rejected(reason).into())
            }
            Err(_) => Err(rejected("connection closed".to_string()).into()),
        }
    }

    async fn unsubscribe(
        &self,
        topic: &str,
    ) -> WireResult<()> {
        let (client, _) = self.client()?;
        // UnsubAck не ожидается: повторная подписка всё равно идемпотентна.
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| SubscribeError::UnsubscribeRejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.poller.abort();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
