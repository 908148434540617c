use common::config;
use once_cell::sync::Lazy;
pub use slog::*;
use std::str::FromStr;

/// ログの出力形式。コマンドの結果を標準出力に書くため、どちらも標準エラーに出す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Term,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "term" | "text" | "" => Ok(LogFormat::Term),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// RUST_LOG_FORMAT から形式を決める。未知の値は端末形式。
pub fn format_from_config() -> LogFormat {
    config::get("RUST_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn wrap<D: Drain<Err = Never, Ok = ()> + Send + 'static>(drain: D) -> Fuse<slog_async::Async> {
    slog_async::Async::default(slog_envlogger::new(drain)).fuse()
}

pub static DEFAULT: Lazy<Logger> = Lazy::new(|| {
    let drain = match format_from_config() {
        LogFormat::Json => wrap(slog_json::Json::default(std::io::stderr()).fuse()),
        LogFormat::Term => wrap(
            slog_term::FullFormat::new(slog_term::TermDecorator::new().stderr().build())
                .build()
                .fuse(),
        ),
    };

    Logger::root(
        drain,
        o!(
            "service" => "powersight",
            "version" => env!("CARGO_PKG_VERSION"),
        ),
    )
});

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_format() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" JSON ".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("term".parse::<LogFormat>(), Ok(LogFormat::Term));
        assert_eq!("".parse::<LogFormat>(), Ok(LogFormat::Term));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    #[serial]
    fn test_format_from_config() {
        {
            let _guard = config::ConfigGuard::new("RUST_LOG_FORMAT", "json");
            assert_eq!(format_from_config(), LogFormat::Json);
        }
        let _guard = config::ConfigGuard::new("RUST_LOG_FORMAT", "yaml");
        assert_eq!(format_from_config(), LogFormat::Term);
    }
}
