use std::io::{self, Stdout};

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use super::config::{LogFormat, LoggingConfig};

/// Слой fmt для консоли. Тип формата стирается в boxed trait-объект.
pub(crate) fn build_formatter<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .event_format(fmt::format().json().with_current_span(true))
                .with_writer(writer)
                .with_ansi(false)
                .with_target(config.with_target);
            Box::new(layer)
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .event_format(fmt::format().pretty())
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer)
                .with_ansi(config.with_ansi)
                .with_target(config.with_target);
            Box::new(layer)
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .event_format(fmt::format().compact())
                .with_writer(writer)
                .with_ansi(config.with_ansi)
                .with_target(config.with_target);
            Box::new(layer)
        }
    }
}
