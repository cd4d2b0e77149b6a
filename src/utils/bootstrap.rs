//! Bootstrap utilities for dss binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable controlling the log level.
pub const LOG_ENV_VAR: &str = "DSS_LOG_LEVEL";

/// Initialize tracing from the `DSS_LOG_LEVEL` environment variable.
///
/// Defaults to "info" when unset.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Look up the value following `-name` or `--name` in `args`.
pub fn parse_flag(args: &[String], name: &str) -> Option<String> {
    let short = format!("-{name}");
    let long = format!("--{name}");
    for i in 0..args.len() {
        if (args[i] == short || args[i] == long) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_flag_single_dash() {
        let args = args(&["dss-backend", "-store-uri", "postgres://x"]);
        assert_eq!(parse_flag(&args, "store-uri").as_deref(), Some("postgres://x"));
    }

    #[test]
    fn test_parse_flag_double_dash() {
        let args = args(&["dss-backend", "--addr", "0.0.0.0:9000"]);
        assert_eq!(parse_flag(&args, "addr").as_deref(), Some("0.0.0.0:9000"));
    }

    #[test]
    fn test_parse_flag_missing_value() {
        let args = args(&["dss-backend", "-store-uri"]);
        assert_eq!(parse_flag(&args, "store-uri"), None);
    }

    #[test]
    fn test_parse_flag_absent() {
        let args = args(&["dss-backend"]);
        assert_eq!(parse_flag(&args, "port"), None);
    }
}
