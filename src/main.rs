use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use qmon::{
    init_logging,
    network::banner::{print_banner, print_startup_log, BannerInfo},
    LogFormat, Monitor, Server, Settings, SettingsOverrides, SystemLoadProbe,
};
use tracing::{error, info, warn};

/// Брокер сообщений с мониторингом загрузки CPU.
///
/// Каждый параметр можно задать и переменной окружения `QMON_<ИМЯ>`;
/// флаг командной строки важнее.
#[derive(Debug, Parser)]
#[command(name = "qmon", version, about, long_about = None)]
struct Cli {
    /// Адрес для прослушивания
    #[arg(long)]
    host: Option<String>,
    /// Порт для прослушивания (5672)
    #[arg(short, long)]
    port: Option<u16>,
    /// Подробность логов: 0 error, 1 warn, 2 info, 3 debug
    #[arg(short, long)]
    log_level: Option<u8>,
    /// Порог средней загрузки CPU для оповещения (0.9)
    #[arg(short, long)]
    cpu_load: Option<f64>,
    /// Интервал тика в миллисекундах (1000)
    #[arg(long)]
    tick_interval_ms: Option<u64>,
    /// Число рабочих потоков (по умолчанию число ядер)
    #[arg(long)]
    workers: Option<usize>,
    /// Формат логов: compact, pretty, json
    #[arg(long)]
    log_format: Option<LogFormat>,
    /// Каталог для файлового лога с ежедневной ротацией
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host,
            port: self.port,
            log_level: self.log_level,
            cpu_load: self.cpu_load,
            tick_interval_ms: self.tick_interval_ms,
            workers: self.workers,
            log_format: self.log_format,
            log_dir: self.log_dir,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("qmon: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let overrides = Cli::parse().overrides();
    let settings = Settings::load(&overrides).context("invalid configuration")?;
    let logging = init_logging(settings.logging_config()).context("failed to initialize logging")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.worker_threads())
        .thread_name("qmon-worker")
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let result = runtime.block_on(serve(settings));
    if let Err(e) = &result {
        error!("Fatal: {e:#}");
    }
    runtime.shutdown_timeout(Duration::from_secs(1));
    logging.shutdown();
    result
}

async fn serve(settings: Settings) -> Result<()> {
    let server = Server::bind(settings.server_config()).await?;

    print_banner(&BannerInfo {
        listen: settings.host.clone(),
        port: server.local_addr().port(),
        workers: settings.worker_threads(),
        cpu_load: settings.cpu_load,
        tick_interval_ms: settings.tick_interval_ms,
    });
    print_startup_log();

    let monitor = Monitor::new(settings.monitor_config(), SystemLoadProbe);
    let monitor = tokio::spawn(monitor.run(server.publisher()));

    let result = server.run_until(shutdown_signal()).await;
    monitor.abort();
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
