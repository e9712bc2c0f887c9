use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use topicwire_error::{ensure, GenericError, StatusCode, WireResult};

use crate::{
    connection::ConnectionConfig,
    logging::LoggingConfig,
    request::{CoordinatorConfig, RetryPolicy},
};

/// Префикс переменных окружения: `TOPICWIRE_REQUEST__TIMEOUT_MS=5000`.
pub const ENV_PREFIX: &str = "TOPICWIRE";

/// Настройки приложения.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub connection: ConnectionSettings,
    pub mqtt: MqttSettings,
    pub request: RequestSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub reconnect_period_ms: u64,
    pub connect_timeout_ms: u64,
    pub resubscribe: bool,
    pub event_capacity: usize,
}

/// Параметры подключения к MQTT-брокеру.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MqttSettings {
    /// `mqtt://host:port` или `tcp://host:port`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Пустой: сгенерировать при подключении
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestSettings {
    pub timeout_ms: u64,
    /// Таймаут для лёгких запросов
    pub light_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Пауза между подпиской и первым запросом
    pub settle_delay_ms: u64,
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем переменные
    /// окружения с префиксом `TOPICWIRE_`.
    pub fn load() -> WireResult<Self> {
        Self::load_from(None)
    }

    /// То же, что [`Self::load`], с необязательным файлом конфигурации
    /// между значениями по умолчанию и окружением.
    pub fn load_from(path: Option<&Path>) -> WireResult<Self> {
        let settings = Self::build(path).map_err(|e| {
            GenericError::new(StatusCode::InvalidArgs, format!("Invalid configuration: {e}"))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Проверяет значения, которые `serde` пропускает, но которые не имеют
    /// смысла для координатора.
    pub fn validate(&self) -> WireResult<()> {
        ensure!(
            self.request.max_attempts >= 1,
            StatusCode::InvalidArgs,
            "request.max_attempts must be at least 1, got {}",
            self.request.max_attempts
        );
        Ok(())
    }

    fn build(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Соединение
            .set_default("connection.reconnect_period_ms", 2000)?
            .set_default("connection.connect_timeout_ms", 15000)?
            .set_default("connection.resubscribe", true)?
            .set_default("connection.event_capacity", 64)?
            // MQTT
            .set_default("mqtt.url", "mqtt://localhost:1883")?
            .set_default("mqtt.keep_alive_secs", 60)?
            .set_default("mqtt.clean_session", true)?
            // Запросы
            .set_default("request.timeout_ms", 20000)?
            .set_default("request.light_timeout_ms", 10000)?
            .set_default("request.max_attempts", 3)?
            .set_default("request.retry_delay_ms", 2000)?
            .set_default("request.settle_delay_ms", 500)?
            // Логирование
            .set_default("logging.level", "info")?
            .set_default("logging.format", "compact")?
            .set_default("logging.ansi", true)?
            .set_default("logging.with_target", true)?
            .set_default("logging.with_line_numbers", false)?
            .set_default("logging.file_prefix", "topicwire.log")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect_period: Duration::from_millis(self.connection.reconnect_period_ms),
            connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            resubscribe: self.connection.resubscribe,
            event_capacity: self.connection.event_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.request.timeout_ms),
            max_attempts: self.request.max_attempts,
            retry_delay: Duration::from_millis(self.request.retry_delay_ms),
        }
    }

    pub fn light_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.request.light_timeout_ms),
            ..self.retry_policy()
        }
    }

    /// Конфигурация координатора с политикой из настроек.
    pub fn coordinator_config(
        &self,
        request_topic: impl Into<String>,
        response_topic: impl Into<String>,
    ) -> CoordinatorConfig {
        CoordinatorConfig::new(request_topic, response_topic).with_policy(self.retry_policy())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.request.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;

    use super::*;
    use crate::logging::LogFormat;

    const VARS: [&str; 5] = [
        "TOPICWIRE_REQUEST__TIMEOUT_MS",
        "TOPICWIRE_REQUEST__MAX_ATTEMPTS",
        "TOPICWIRE_MQTT__URL",
        "TOPICWIRE_LOGGING__FORMAT",
        "TOPICWIRE_CONNECTION__RESUBSCRIBE",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    /// Тест проверяет значения по умолчанию.
    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = Settings::load().unwrap();

        assert_eq!(settings.connection_config(), ConnectionConfig::default());
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert_eq!(settings.light_retry_policy(), RetryPolicy::light());
        assert_eq!(settings.settle_delay(), Duration::from_millis(500));
        assert_eq!(settings.mqtt.url, "mqtt://localhost:1883");
        assert_eq!(settings.mqtt.keep_alive_secs, 60);
        assert_eq!(settings.mqtt.username, None);
        assert_eq!(settings.logging, LoggingConfig::default());
    }

    /// Тест проверяет переопределение через окружение.
    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("TOPICWIRE_REQUEST__TIMEOUT_MS", "5000");
        env::set_var("TOPICWIRE_MQTT__URL", "tcp://broker:1884");
        env::set_var("TOPICWIRE_LOGGING__FORMAT", "json");
        env::set_var("TOPICWIRE_CONNECTION__RESUBSCRIBE", "false");

        let settings = Settings::load();
        clear_env();
        let settings = settings.unwrap();

        assert_eq!(settings.retry_policy().timeout, Duration::from_millis(5000));
        assert_eq!(settings.mqtt.url, "tcp://broker:1884");
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert!(!settings.connection.resubscribe);
    }

    /// Тест проверяет чтение файла и приоритет окружения над ним.
    #[test]
    #[serial]
    fn test_file_source() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topicwire.toml");
        std::fs::write(
            &path,
            "[request]\ntimeout_ms = 7000\nmax_attempts = 5\n\n[mqtt]\nusername = \"shop\"\n",
        )
        .unwrap();

        env::set_var("TOPICWIRE_REQUEST__TIMEOUT_MS", "9000");
        let settings = Settings::load_from(Some(&path));
        clear_env();
        let settings = settings.unwrap();

        assert_eq!(settings.request.timeout_ms, 9000);
        assert_eq!(settings.request.max_attempts, 5);
        assert_eq!(settings.mqtt.username.as_deref(), Some("shop"));
    }

    /// Тест проверяет ошибку на некорректном значении.
    #[test]
    #[serial]
    fn test_invalid_value() {
        clear_env();
        env::set_var("TOPICWIRE_REQUEST__TIMEOUT_MS", "soon");
        let err = Settings::load().unwrap_err();
        clear_env();
        assert_eq!(err.status_code(), StatusCode::InvalidArgs);
    }

    /// Тест проверяет, что нулевое число попыток отклоняется при загрузке.
    #[test]
    #[serial]
    fn test_zero_attempts_rejected() {
        clear_env();
        env::set_var("TOPICWIRE_REQUEST__MAX_ATTEMPTS", "0");
        let err = Settings::load().unwrap_err();
        clear_env();

        assert_eq!(err.status_code(), StatusCode::InvalidArgs);
        assert!(err.to_string().contains("max_attempts"));
    }
}
