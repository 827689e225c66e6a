//! Logging setup for migration runs.
//!
//! Sluice logs through `tracing`. Nothing is printed unless a subscriber is
//! installed, either by the host application or by [`init`] (requires the
//! `tracing-subscriber` feature).
//!
//! # Environment Variables
//!
//! - `SLUICE_DEBUG=true|1|yes` - Enable debug logging
//! - `SLUICE_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `SLUICE_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! ```rust,no_run
//! sluice_migrate::logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "SLUICE_DEBUG";
const LEVEL_VAR: &str = "SLUICE_LOG_LEVEL";
const FORMAT_VAR: &str = "SLUICE_LOG_FORMAT";

/// Whether `SLUICE_DEBUG` asks for debug output.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

/// Level from `SLUICE_LOG_LEVEL`, falling back to `debug` when
/// `SLUICE_DEBUG` is set and `warn` otherwise.
pub fn get_log_level() -> &'static str {
    parse_level(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

/// Format from `SLUICE_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    parse_format(env::var(FORMAT_VAR).ok().as_deref())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_level(raw: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match raw.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

fn parse_format(raw: Option<&str>) -> &'static str {
    match raw.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// Install a global subscriber for the sluice crates.
///
/// Subsequent calls are no-ops, as is a call with neither `SLUICE_DEBUG` nor
/// `SLUICE_LOG_LEVEL` set.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!(
                "sluice={level},sluice_migrate={level},sluice_postgres={level},sluice_sqlite={level}"
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match get_log_format() {
                "pretty" => registry.with(fmt::layer().pretty()).try_init(),
                "compact" => registry.with(fmt::layer().compact()).try_init(),
                _ => registry.with(fmt::layer().json()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level, format = get_log_format(), "sluice logging initialized");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_fallbacks() {
        assert_eq!(parse_level(None, false), "warn");
        assert_eq!(parse_level(None, true), "debug");
        assert_eq!(parse_level(Some("bogus"), false), "warn");
    }

    #[test]
    fn test_level_is_case_insensitive() {
        assert_eq!(parse_level(Some("INFO"), false), "info");
        assert_eq!(parse_level(Some("Trace"), true), "trace");
    }

    #[test]
    fn test_format() {
        assert_eq!(parse_format(None), "json");
        assert_eq!(parse_format(Some("Pretty")), "pretty");
        assert_eq!(parse_format(Some("compact")), "compact");
        assert_eq!(parse_format(Some("xml")), "json");
    }

    #[test]
    fn test_truthy() {
        assert!(is_truthy("YES"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("off"));
    }
}
