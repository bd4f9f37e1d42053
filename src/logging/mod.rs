//! Логирование на `tracing`.
//!
//! Консольный слой в выбранном формате и, если задан каталог, файловый слой
//! с ежедневной ротацией. Фильтр берётся из `RUST_LOG` или из уровня
//! подробности в конфигурации.

pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use crate::error::LoggingError;

/// Инициализация глобального subscriber.
///
/// Повторный вызов в том же процессе возвращает
/// [`LoggingError::AlreadyInitialized`].
pub fn init_logging(config: LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.validate()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_enabled {
        layers.push(sinks::console::layer_with_config(&config));
    }

    let file_guard = match &config.log_dir {
        Some(dir) => {
            let (layer, guard) = sinks::file::layer_with_config(&config, dir)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = config.level_name(),
        format = %config.format,
        log_dir = ?config.log_dir,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
