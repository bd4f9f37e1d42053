use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

/// Фильтр событий: `RUST_LOG`, если задан, иначе директива из конфигурации.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    build_filter(env.as_deref(), &config.build_filter_directive())
}

/// Некорректная директива заменяется на `info`.
pub(crate) fn build_filter(
    env: Option<&str>,
    directive: &str,
) -> EnvFilter {
    if let Some(env) = env.filter(|e| !e.trim().is_empty()) {
        match EnvFilter::try_new(env) {
            Ok(filter) => return filter,
            Err(e) => eprintln!("Invalid RUST_LOG ('{env}'): {e}; using configured level"),
        }
    }
    match EnvFilter::try_new(directive) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid log filter directive ('{directive}'): {e}; falling back to 'info'");
            EnvFilter::new("info")
        }
    }
}
