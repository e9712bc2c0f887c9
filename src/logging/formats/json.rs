use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::config::LoggingConfig;

/// JSON: одно событие на строку, поля события верхнего уровня.
pub fn build_json_layer<S, W>(
    config: &LoggingConfig,
    writer: W,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let json_fmt = fmt::format()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false);

    let layer = fmt::layer()
        .event_format(json_fmt)
        .fmt_fields(fmt::format::JsonFields::new())
        .with_writer(writer)
        .with_ansi(false)
        .with_target(config.with_target)
        .with_line_number(config.with_line_numbers);

    Box::new(layer)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    #[derive(Clone)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Buffer {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что каждое событие: валидный JSON с полями события.
    #[test]
    fn test_json_lines_are_parsable() {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink = Buffer(bytes.clone());
        let layer = build_json_layer::<Registry, _>(&LoggingConfig::default(), move || sink.clone());
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(topic = "a/b", attempt = 2, "Request republished");
        });

        let out = String::from_utf8(bytes.lock().unwrap().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(line["topic"], "a/b");
        assert_eq!(line["attempt"], 2);
        assert_eq!(line["message"], "Request republished");
    }
}
