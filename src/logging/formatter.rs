use tracing_subscriber::{fmt::MakeWriter, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::{LogFormat, LoggingConfig},
    formats,
};

/// Собирает fmt-слой нужного формата поверх произвольного writer.
/// Тип формата стирается в trait-объект.
pub fn build_layer<S, W>(
    config: &LoggingConfig,
    format: LogFormat,
    writer: W,
    with_ansi: bool,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Compact => formats::build_compact_layer(config, writer, with_ansi),
        LogFormat::Pretty => formats::build_pretty_layer(config, writer, with_ansi),
        LogFormat::Json => formats::build_json_layer(config, writer),
    }
}
