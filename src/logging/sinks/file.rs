use std::path::Path;

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::{LogFormat, LoggingConfig},
    formatter,
};

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// Цвета в файле отключены; pretty заменяется на compact.
pub fn layer<S>(
    config: &LoggingConfig,
    dir: &Path,
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = daily(dir, &config.file_prefix);
    let (writer, guard) = non_blocking(appender);

    let format = match config.format {
        LogFormat::Json => LogFormat::Json,
        LogFormat::Compact | LogFormat::Pretty => LogFormat::Compact,
    };

    (formatter::build_layer(config, format, writer, false), guard)
}
