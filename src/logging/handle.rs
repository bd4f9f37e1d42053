use std::sync::atomic::{AtomicBool, Ordering};

use tracing_appender::non_blocking::WorkerGuard;

/// Handle для управления жизненным циклом логирования.
///
/// Держит guard неблокирующего файлового writer: пока handle жив, записи
/// доходят до файла.
#[derive(Debug)]
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    shut_down: AtomicBool,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Пишется ли лог в файл.
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает буферы и останавливает файловый writer.
    pub fn shutdown(mut self) {
        self.shut_down.store(true, Ordering::Release);
        tracing::info!(file = self.has_file_sink(), "Logging shutdown");
        drop(self.file_guard.take());
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::Acquire) && self.file_guard.is_some() {
            eprintln!("WARNING: LoggingHandle dropped without shutdown(); flushing file log");
        }
    }
}
