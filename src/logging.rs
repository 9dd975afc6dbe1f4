use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub struct FileLogGuard {
    _guard: WorkerGuard,
}

const LOG_FILE_NAME: &str = "adaptive-irt.log";

pub fn file_logging_enabled() -> bool {
    flag_enabled(std::env::var("ENABLE_FILE_LOGS").ok().as_deref())
}

fn flag_enabled(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

/// Logs go to stderr so the binary's JSON report on stdout stays clean.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    if file_logging_enabled() {
        let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
        if let Err(err) = std::fs::create_dir_all(&log_dir) {
            eprintln!("failed to create log directory {log_dir}: {err}");
        } else {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            tracing::info!(log_dir = %log_dir, file = LOG_FILE_NAME, "file logging enabled");

            return Some(FileLogGuard { _guard: guard });
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_enabled_values() {
        for value in ["true", "1", "yes", "TRUE", " Yes "] {
            assert!(flag_enabled(Some(value)), "{value:?} should enable file logs");
        }
        for value in ["false", "0", "", "on?"] {
            assert!(!flag_enabled(Some(value)), "{value:?} should not enable file logs");
        }
        assert!(!flag_enabled(None));
    }
}
