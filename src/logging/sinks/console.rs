use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Консольный слой в формате из конфигурации.
pub fn layer<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    formatter::build_formatter(config)
}
