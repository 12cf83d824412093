// Logging initialization shared by the CLI commands and the server
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    /// Human oriented output for one-shot commands.
    Cli,
    /// Timestamped output for the long running server.
    Server,
}

pub fn init_logging(verbose: bool, style: LogStyle) {
    let (level_filter, level) = match (verbose, style) {
        (true, _) => (LevelFilter::DEBUG, "debug"),
        (false, LogStyle::Server) => (LevelFilter::INFO, "info"),
        (false, LogStyle::Cli) => (LevelFilter::WARN, "warn"),
    };
    let app_filter = Targets::new()
        .with_target("divisa", level_filter)
        .with_target("tower_http", level_filter);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = std::env::var("DIVISA_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(app_filter).with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else if style == LogStyle::Server {
        registry.with(fmt::layer().compact().with_target(true)).init();
    } else {
        registry.with(fmt::layer().pretty().without_time()).init();
    }
}
