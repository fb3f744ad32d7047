use std::{fs, path::Path};

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::never};
use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::{error::LoggingError, logging::config::LoggingConfig};

/// Неблокирующий файловый слой `<log_dir>/<file_name>` без ротации.
///
/// Возвращённый guard нужно держать, пока нужен лог: при его уничтожении
/// буфер сбрасывается на диск.
pub fn layer<S>(
    config: &LoggingConfig,
    log_dir: &Path,
) -> Result<(Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard), LoggingError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::LogDir {
        path: log_dir.display().to_string(),
        source,
    })?;

    let appender = never(log_dir, &config.file_name);
    let (writer, guard) = non_blocking(appender);

    let layer = fmt::layer()
        .with_ansi(false)
        .with_target(config.with_target)
        .with_writer(writer);

    Ok((Box::new(layer), guard))
}
