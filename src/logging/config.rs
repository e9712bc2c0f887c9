use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use topicwire_error::{ensure, StatusCode, WireResult};
use tracing_subscriber::EnvFilter;

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Одна строка на событие
    #[default]
    Compact,
    /// Многострочный вывод для разработки
    Pretty,
    /// JSON для сборщиков логов
    Json,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень (`info`) или полная директива (`topicwire=debug,rumqttc=warn`)
    pub level: String,
    pub format: LogFormat,
    /// Цвета в консоли
    pub ansi: bool,
    pub with_target: bool,
    pub with_line_numbers: bool,
    /// Каталог файлового лога; `None` отключает файловый вывод
    pub file_dir: Option<PathBuf>,
    /// Префикс имени файла при ежедневной ротации
    pub file_prefix: String,
}

impl LoggingConfig {
    /// Директива фильтра. Голый уровень относится только к этому крейту,
    /// остальные крейты пишут `warn` и выше.
    pub fn build_filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("warn,topicwire={level}")
        }
    }

    /// Проверяет, что директива разбирается.
    pub fn validate(&self) -> WireResult<()> {
        let directive = self.build_filter_directive();
        ensure!(
            EnvFilter::try_new(&directive).is_ok(),
            StatusCode::InvalidArgs,
            "Invalid log filter directive '{}'",
            directive
        );
        ensure!(
            !self.file_prefix.trim().is_empty(),
            StatusCode::InvalidArgs,
            "Log file prefix cannot be empty"
        );
        Ok(())
    }

    /// Создаёт каталог файлового лога, если он задан.
    pub fn ensure_log_dir(&self) -> WireResult<()> {
        if let Some(dir) = &self.file_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            ansi: true,
            with_target: true,
            with_line_numbers: false,
            file_dir: None,
            file_prefix: "topicwire.log".to_string(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
