use std::{env, fmt::Write as _};

use atty::Stream;
use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use sysinfo::System;

/// Что показывается в стартовом баннере.
#[derive(Debug, Clone)]
pub struct BannerInfo {
    pub listen: String,
    pub port: u16,
    pub workers: usize,
    pub cpu_load: f64,
    pub tick_interval_ms: u64,
}

/// Вид баннера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerStyle {
    Full,
    Compact,
}

impl BannerStyle {
    /// `QMON_BANNER=full|compact`; иначе полный в debug-сборке и компактный
    /// в release.
    pub fn detect() -> Self {
        match env::var("QMON_BANNER").ok().as_deref() {
            Some("full") => Self::Full,
            Some("compact") => Self::Compact,
            _ if cfg!(debug_assertions) => Self::Full,
            _ => Self::Compact,
        }
    }
}

/// Собирает текст баннера без цвета.
pub fn render_banner(
    info: &BannerInfo,
    style: BannerStyle,
) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let bits = std::mem::size_of::<usize>() * 8;
    let mode = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    let pid = std::process::id();

    let mut out = String::new();
    match style {
        BannerStyle::Compact => {
            let _ = writeln!(
                out,
                "qmon {version} ({bits}-bit) - {mode} - {}:{} - PID {pid}",
                info.listen, info.port
            );
        }
        BannerStyle::Full => {
            let mut sys = System::new();
            sys.refresh_memory();
            let host = System::host_name().unwrap_or_else(|| "unknown".into());
            let (mem_value, mem_unit) = human_memory(sys.total_memory());
            let git = option_env!("GIT_COMMIT").unwrap_or("unknown");
            let build_time = build_time(option_env!("BUILD_TIME").unwrap_or("unknown"));

            let _ = writeln!(out, "qmon {version} ({bits}-bit)");
            let _ = writeln!(out, "----------------------------------------------");
            let rows = [
                ("Mode", mode.to_string()),
                ("Listening", info.listen.clone()),
                ("Port", info.port.to_string()),
                ("Workers", info.workers.to_string()),
                ("CPU load alert", format!("> {:.2}", info.cpu_load)),
                ("Tick", format!("{} ms", info.tick_interval_ms)),
                ("PID", pid.to_string()),
                ("Host", host),
                ("OS/Arch", format!("{}/{}", env::consts::OS, env::consts::ARCH)),
                ("CPU(s)", num_cpus::get().to_string()),
                ("Memory", format!("{mem_value:.1} {mem_unit}")),
                ("Build", format!("{git} ({build_time})")),
            ];
            for (name, value) in rows {
                let _ = writeln!(out, "{:<18}{value}", format!("{name}:"));
            }
        }
    }
    out
}

/// Выводит баннер в stdout, с цветом, если это терминал.
pub fn print_banner(info: &BannerInfo) {
    let style = BannerStyle::detect();
    let text = render_banner(info, style);

    if !atty::is(Stream::Stdout) {
        println!("{text}");
        return;
    }
    match style {
        BannerStyle::Compact => println!("{}", text.trim_end().bold().green()),
        BannerStyle::Full => {
            for (i, line) in text.lines().enumerate() {
                if i == 0 {
                    println!("{}", line.bold().bright_blue());
                } else if line.starts_with("Build:") {
                    println!("{}", line.dimmed());
                } else if line.starts_with("Port:") || line.starts_with("PID:") {
                    println!("{}", line.magenta());
                } else {
                    println!("{line}");
                }
            }
        }
    }
    println!();
}

/// Строка о готовности принимать соединения.
pub fn print_startup_log() {
    let pid = std::process::id();
    let ts = Local::now().format("%d %b %Y %H:%M:%S%.3f");

    if atty::is(Stream::Stdout) {
        println!(
            "[{}] {} {}",
            pid.to_string().red(),
            ts.to_string().white(),
            "* Ready to accept connections".green()
        );
    } else {
        println!("[{pid}] {ts} * Ready to accept connections");
    }
}

fn human_memory(bytes: u64) -> (f64, &'static str) {
    let kb = bytes as f64 / 1024.0;
    let mb = kb / 1024.0;
    let gb = mb / 1024.0;
    if gb >= 1.0 {
        (gb, "GB")
    } else if mb >= 1.0 {
        (mb, "MB")
    } else {
        (kb, "KB")
    }
}

fn build_time(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&Local)
            .format("%d.%m.%Y %H:%M:%S")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> BannerInfo {
        BannerInfo {
            listen: "0.0.0.0".into(),
            port: 5672,
            workers: 4,
            cpu_load: 0.9,
            tick_interval_ms: 1000,
        }
    }

    #[test]
    fn test_compact_banner_is_one_line() {
        let text = render_banner(&info(), BannerStyle::Compact);
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("0.0.0.0:5672"));
    }

    /// Тест проверяет, что полный баннер показывает параметры мониторинга.
    #[test]
    fn test_full_banner_rows() {
        let text = render_banner(&info(), BannerStyle::Full);
        assert!(text.lines().any(|l| l.starts_with("Port:") && l.ends_with("5672")));
        assert!(text.contains("> 0.90"));
        assert!(text.contains("1000 ms"));
    }

    #[test]
    fn test_human_memory_units() {
        assert_eq!(human_memory(512 * 1024).1, "KB");
        assert_eq!(human_memory(3 * 1024 * 1024).1, "MB");
        assert_eq!(human_memory(2 * 1024 * 1024 * 1024).1, "GB");
    }
}
