//! Logging initialization.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` wins over `logging.level`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.level)));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true);
            subscriber.with(json_layer).try_init()
        }
        _ => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true);
            subscriber.with(pretty_layer).try_init()
        }
    }
}

/// A bare level applies to our crates only; sqlx and hyper stay at warn.
fn filter_directive(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    format!(
        "warn,shuttle_dispatch_api={level},shuttle_dispatch={level},domain={level},persistence={level},shared={level}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scoped_to_workspace() {
        let directive = filter_directive("debug");
        assert!(directive.starts_with("warn,"));
        assert!(directive.contains("persistence=debug"));
        assert!(directive.contains("shuttle_dispatch_api=debug"));
    }

    #[test]
    fn test_explicit_directive_kept() {
        assert_eq!(filter_directive("info,sqlx=debug"), "info,sqlx=debug");
    }
}
