//! Configuration loading
//!
//! Reads the JSON document, resolves relative domain-list paths against the
//! configuration file's directory and applies environment overrides.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let mut config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base_dir);

    info!(
        "Configuration loaded: {} redirect blocks, {} upstreams",
        config.redirects.len(),
        config.redirects.iter().map(|r| r.to.len()).sum::<usize>()
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// Relative source paths are left as written.
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `DNS_REDIRECT_LOG_LEVEL`: Override log level
/// - `DNS_REDIRECT_LOG_FORMAT`: Override log format (`json` or `text`)
/// - `DNS_REDIRECT_RELOAD_MS`: Override the reload interval of every block
/// - `DNS_REDIRECT_FORCE_TCP`: Override the global `force_tcp` (`true`/`false`)
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides using `lookup` to read variables
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for unparseable values, or a validation
/// error if the result is invalid.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup("DNS_REDIRECT_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(format) = lookup("DNS_REDIRECT_LOG_FORMAT") {
        config.log.format = format;
        debug!("Log format overridden to {}", config.log.format);
    }

    if let Some(reload) = lookup("DNS_REDIRECT_RELOAD_MS") {
        let reload_ms: u64 = reload.parse().map_err(|_| ConfigError::EnvError {
            name: "DNS_REDIRECT_RELOAD_MS".into(),
            reason: format!("Invalid number: {reload}"),
        })?;
        for redirect in &mut config.redirects {
            redirect.reload_ms = reload_ms;
        }
        debug!("Reload interval overridden to {}ms", reload_ms);
    }

    if let Some(force_tcp) = lookup("DNS_REDIRECT_FORCE_TCP") {
        config.transport.force_tcp = force_tcp.parse().map_err(|_| ConfigError::EnvError {
            name: "DNS_REDIRECT_FORCE_TCP".into(),
            reason: format!("Invalid boolean: {force_tcp}"),
        })?;
        debug!("Global force_tcp overridden to {}", config.transport.force_tcp);
    }

    // Re-validate after overrides
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"{
        "redirects": [{
            "name": "cn",
            "sources": ["lists/china.conf"],
            "to": ["114.114.114.114"]
        }]
    }"#;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_config_resolves_relative_sources() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(
            config.redirects[0].sources[0],
            dir.path().join("lists/china.conf")
        );
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config("/nonexistent/path/config.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_config_str() {
        let config = load_config_str(MINIMAL).unwrap();
        assert_eq!(config.redirects[0].name.as_deref(), Some("cn"));
        assert_eq!(
            config.redirects[0].sources[0],
            std::path::PathBuf::from("lists/china.conf")
        );
    }

    #[test]
    fn test_load_config_invalid_json() {
        let result = load_config_str("not valid json");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_missing_to() {
        let result = load_config_str(r#"{ "redirects": [{ "sources": ["a.conf"] }] }"#);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = load_config_str(MINIMAL).unwrap();
        apply_env_overrides(
            &mut config,
            env(&[
                ("DNS_REDIRECT_LOG_LEVEL", "debug"),
                ("DNS_REDIRECT_LOG_FORMAT", "json"),
                ("DNS_REDIRECT_RELOAD_MS", "5000"),
                ("DNS_REDIRECT_FORCE_TCP", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.redirects[0].reload_ms, 5000);
        assert!(config.transport.force_tcp);
    }

    #[test]
    fn test_env_override_invalid_number() {
        let mut config = load_config_str(MINIMAL).unwrap();
        let err = apply_env_overrides(&mut config, env(&[("DNS_REDIRECT_RELOAD_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { .. }));
    }

    #[test]
    fn test_env_override_revalidates() {
        let mut config = load_config_str(MINIMAL).unwrap();
        let err = apply_env_overrides(&mut config, env(&[("DNS_REDIRECT_LOG_FORMAT", "xml")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}
