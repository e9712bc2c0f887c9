//! Демо topicwire
//!
//! Поднимает соединение поверх транспорта, регистрирует потребителя и
//! выполняет один запрос с ожиданием ответа. Для транспорта `memory`
//! запускается встроенный ответчик на общем брокере.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use serde_json::json;
use topicwire::{
    init_logging, logging::LogFormat, Broker, ConnectionManager, ConsumerScope, MemoryTransport,
    RequestOutcome, Settings, TopicFilter, Transport,
};
use tracing::{info, warn};

const REQUEST_TOPIC: &str = "demo/shop/products/request";
const RESPONSE_TOPIC: &str = "demo/shop/products/response";
const LIVE_FILTER: &str = "demo/shop/+/live";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// Брокер в памяти процесса со встроенным ответчиком
    Memory,
    /// MQTT-брокер из настроек (`--features mqtt`)
    Mqtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Responder {
    /// Отвечает успехом
    Success,
    /// Отвечает ошибкой 404
    NotFound,
    /// Молчит, чтобы показать повторы и таймаут
    Silent,
}

/// Аргументы демо.
#[derive(Parser)]
#[command(name = "topicwire-demo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Request/response over publish/subscribe", long_about = None)]
struct Cli {
    /// Файл конфигурации (toml/json/yaml)
    #[arg(short, long, env = "TOPICWIRE_CONFIG")]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value = "memory")]
    transport: TransportKind,
    /// Поведение встроенного ответчика
    #[arg(short, long, value_enum, default_value = "success")]
    responder: Responder,
    /// Таймаут ответа на попытку, мс (переопределяет настройки)
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Число попыток (переопределяет настройки)
    #[arg(long)]
    attempts: Option<u32>,
    /// Формат логов (переопределяет настройки)
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliLogFormat {
    Compact,
    Pretty,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Compact => LogFormat::Compact,
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(cli.config.as_deref()).context("loading settings")?;
    if let Some(timeout) = cli.timeout_ms {
        settings.request.timeout_ms = timeout;
    }
    if let Some(attempts) = cli.attempts {
        settings.request.max_attempts = attempts;
    }
    if let Some(format) = cli.log_format {
        settings.logging.format = format.into();
    }

    let logging = init_logging(settings.logging.clone()).context("initializing logging")?;
    let result = run(&cli, &settings).await;
    logging.shutdown();
    result
}

async fn run(
    cli: &Cli,
    settings: &Settings,
) -> Result<()> {
    let transport = build_transport(cli, settings)?;
    let manager = ConnectionManager::new(transport, settings.connection_config());

    manager.connect();
    tokio::time::timeout(settings.connection_config().connect_timeout, manager.wait_connected())
        .await
        .context("broker did not become reachable")?;

    let live = TopicFilter::new(LIVE_FILTER)?;
    let scope = ConsumerScope::new(manager.clone(), "products-page")
        .with_settle_delay(settings.settle_delay());
    scope.on_message(move |msg| {
        if live.matches(msg.topic()) {
            info!(topic = msg.topic(), bytes = msg.payload.len(), "Live update");
        }
        Ok(())
    });
    scope.subscribe(LIVE_FILTER).await?;

    let (coordinator, mut outcomes) = scope.coordinator(
        settings
            .coordinator_config(REQUEST_TOPIC, RESPONSE_TOPIC)
            .with_wrapper_key("products"),
    );
    scope
        .subscribe_then_initiate(&coordinator, &json!({"page": 1, "limit": 10}))
        .await?;

    match outcomes.next().await {
        Some(RequestOutcome::Completed(response)) if response.is_success() => {
            let data = response.data().cloned().unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Some(RequestOutcome::Completed(response)) => {
            warn!(code = ?response.code(), category = ?response.failure_category(), "Request failed");
            println!("failed: {}", response.message().unwrap_or_default());
        }
        Some(RequestOutcome::TimedOut { attempts }) => {
            println!("no response after {attempts} attempts");
        }
        None => bail!("coordinator closed without an outcome"),
    }

    scope.teardown().await;
    manager.disconnect().await;
    Ok(())
}

fn build_transport(
    cli: &Cli,
    settings: &Settings,
) -> Result<Arc<dyn Transport>> {
    match cli.transport {
        TransportKind::Memory => {
            let broker = Arc::new(Broker::default());
            spawn_responder(&broker, cli.responder)?;
            Ok(Arc::new(MemoryTransport::with_broker(broker)))
        }
        #[cfg(feature = "mqtt")]
        TransportKind::Mqtt => Ok(Arc::new(topicwire::MqttTransport::new(settings.mqtt.clone())?)),
        #[cfg(not(feature = "mqtt"))]
        TransportKind::Mqtt => {
            let _ = settings;
            bail!("built without the `mqtt` feature")
        }
    }
}

/// Ответчик на стороне "сервера": слушает топик запросов на брокере и
/// публикует ответ.
fn spawn_responder(
    broker: &Arc<Broker>,
    mode: Responder,
) -> Result<()> {
    let mut requests = broker.subscribe(REQUEST_TOPIC)?;
    let broker = broker.clone();

    tokio::spawn(async move {
        while let Ok(request) = requests.recv().await {
            info!(payload = %String::from_utf8_lossy(&request.payload), "Responder got request");
            let body = match mode {
                Responder::Silent => continue,
                Responder::Success => json!({
                    "status": "success",
                    "data": {"products": [{"id": 1, "name": "Coffee"}, {"id": 2, "name": "Tea"}]},
                }),
                Responder::NotFound => json!({"code": 404, "message": "Product not found"}),
            };
            tokio::time::sleep(Duration::from_millis(50)).await;
            broker.publish("demo/shop/products/live", Bytes::from_static(b"{\"stock\":42}"));
            broker.publish(RESPONSE_TOPIC, Bytes::from(body.to_string()));
        }
    });
    Ok(())
}
