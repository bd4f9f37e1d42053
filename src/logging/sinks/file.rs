use std::{fs, path::Path};

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::{
    error::LoggingError,
    logging::{config::LoggingConfig, formatter},
};

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// Guard нужно держать до конца работы, иначе хвост лога потеряется.
pub fn layer_with_config<S>(
    config: &LoggingConfig,
    dir: &Path,
) -> Result<(Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard), LoggingError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fs::create_dir_all(dir).map_err(|source| LoggingError::LogDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let appender = daily(dir, &config.file_prefix);
    let (writer, guard) = non_blocking(appender);
    let layer = formatter::build_formatter(config.format, writer, false);
    Ok((layer, guard))
}
