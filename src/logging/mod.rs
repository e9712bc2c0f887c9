//! Логирование на `tracing`: фильтр, консольный и файловый слои.

pub mod config;
mod filters;
pub mod formats;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use topicwire_error::{GenericError, StatusCode, WireResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Устанавливает глобальный subscriber по конфигурации.
///
/// Повторная инициализация в том же процессе завершается ошибкой.
pub fn init_logging(config: LoggingConfig) -> WireResult<LoggingHandle> {
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(sinks::console::layer(&config));

    let file_guard = match &config.file_dir {
        Some(dir) => {
            let (file_layer, guard) = sinks::file::layer(&config, dir);
            layers.push(file_layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| {
            GenericError::new(
                StatusCode::Internal,
                format!("Failed to install log subscriber: {e}"),
            )
        })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        format = ?config.format,
        file_dir = ?config.file_dir,
        "Logging initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
