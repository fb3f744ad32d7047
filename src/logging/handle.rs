use std::time::Instant;

use tracing_appender::non_blocking::WorkerGuard;

/// Handle жизненного цикла логирования.
///
/// Держит guard неблокирующего файлового writer: пока handle жив, фоновый
/// поток пишет лог на диск.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    shut_down: bool,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            shut_down: false,
        }
    }

    /// Handle без файлового вывода.
    pub fn console_only() -> Self {
        Self::new(None)
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает буфер файлового лога и завершает фоновый writer.
    pub fn shutdown(mut self) {
        self.shut_down = true;
        let Some(guard) = self.file_guard.take() else {
            return;
        };

        tracing::info!("Flushing file log");
        let start = Instant::now();
        drop(guard);
        // Файловый writer уже остановлен, событие попадёт только в консоль.
        tracing::debug!(
            flush_ms = start.elapsed().as_millis() as u64,
            "Logging shutdown completed"
        );
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if !self.shut_down && self.file_guard.is_some() {
            eprintln!(
                "WARNING: LoggingHandle dropped without shutdown(); \
                 the file log is flushed on a best-effort basis."
            );
        }
    }
}
