//! Small helpers shared by configuration, filters and the binary.

use tokio::signal;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Loose boolean parsing used by configuration and runtime override headers.
///
/// Accepts `true/false`, `1/0`, `yes/no`, `on/off`, `t/f` and `y/n` in any
/// case. Anything else is `None`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" | "y" => Some(true),
        "false" | "0" | "no" | "off" | "f" | "n" => Some(false),
        _ => None,
    }
}

/// Split a comma-separated header value into trimmed, non-empty items.
pub fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Whether a raw query string contains `key`, with or without a value.
pub fn query_has_key(query: Option<&str>, key: &str) -> bool {
    query.is_some_and(|q| {
        q.split('&')
            .any(|pair| pair.split_once('=').map_or(pair, |(k, _)| k) == key)
    })
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still can.
/// Tracing filter for the configured `RUST_LOG` directives.
///
/// Falls back to `info` when the directives do not parse.
pub fn log_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_accepts_loose_spellings() {
        for truthy in ["true", "TRUE", "1", "yes", "on", "t", "Y", " true "] {
            assert_eq!(parse_bool(truthy), Some(true), "{truthy}");
        }
        for falsy in ["false", "0", "no", "OFF", "f", "n"] {
            assert_eq!(parse_bool(falsy), Some(false), "{falsy}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_split_list() {
        let items: Vec<&str> = split_list(" a, b,,c ,").collect();
        assert_eq!(items, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_query_has_key() {
        assert!(query_has_key(Some("shared=true"), "shared"));
        assert!(query_has_key(Some("fields=id&shared"), "shared"));
        assert!(!query_has_key(Some("not_shared=true"), "shared"));
        assert!(!query_has_key(None, "shared"));
    }

    #[test]
    fn test_log_filter_uses_directives() {
        let filter = log_filter("debug,hyper=warn").to_string();
        assert!(filter.contains("hyper=warn"), "{filter}");
        assert!(filter.contains("debug"), "{filter}");
    }

    #[test]
    fn test_log_filter_falls_back_to_info() {
        assert_eq!(log_filter("wafflehaus=loud").to_string(), "info");
    }
}
