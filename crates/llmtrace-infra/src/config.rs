//! Tracker configuration loader.
//!
//! Reads `llmtrace.toml` from the data directory (`~/.llmtrace/` by default)
//! and deserializes it into [`TrackerConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::{Path, PathBuf};

use llmtrace_types::config::TrackerConfig;

pub const CONFIG_FILE_NAME: &str = "llmtrace.toml";

const DATA_DIR_ENV: &str = "LLMTRACE_DATA_DIR";

/// Load tracker configuration from `{data_dir}/llmtrace.toml`.
///
/// - If the file does not exist, returns [`TrackerConfig::default()`].
/// - If the file cannot be read or parsed, logs a warning and returns the default.
pub async fn load_tracker_config(data_dir: &Path) -> TrackerConfig {
    let config_path = data_dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return TrackerConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return TrackerConfig::default();
        }
    };

    match toml::from_str::<TrackerConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            TrackerConfig::default()
        }
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `LLMTRACE_DATA_DIR` environment variable
/// 2. `~/.llmtrace`
/// 3. `.llmtrace` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".llmtrace");
    }

    PathBuf::from(".llmtrace")
}

/// Default SQLite URL: `sqlite://{data_dir}/llmtrace.db`.
pub fn default_database_url() -> String {
    format!("sqlite://{}/llmtrace.db", resolve_data_dir().display())
}

/// The configured database URL, or [`default_database_url`] when unset.
pub fn resolve_database_url(config: &TrackerConfig) -> String {
    config
        .database_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(default_database_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_tracker_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_tracker_config(tmp.path()).await;
        assert!(!config.async_tracking);
        assert!(config.circuit_breaker.is_none());
        assert!(config.database_url.is_none());
    }

    #[tokio::test]
    async fn load_tracker_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"
async_tracking = true
database_url = "sqlite:///tmp/trace.db"

[circuit_breaker]
max_failures = 3
reset_timeout_ms = 1500
"#,
        )
        .await
        .unwrap();

        let config = load_tracker_config(tmp.path()).await;
        assert!(config.async_tracking);
        let breaker = config.circuit_breaker.as_ref().unwrap();
        assert_eq!(breaker.max_failures, 3);
        assert_eq!(breaker.reset_timeout(), Duration::from_millis(1500));
        assert_eq!(breaker.success_threshold, 2);
        assert_eq!(resolve_database_url(&config), "sqlite:///tmp/trace.db");
    }

    #[tokio::test]
    async fn load_tracker_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE_NAME), "async_tracking = [[[")
            .await
            .unwrap();

        let config = load_tracker_config(tmp.path()).await;
        assert!(!config.async_tracking);
        assert!(config.circuit_breaker.is_none());
    }

    #[test]
    fn default_database_url_points_at_llmtrace_db() {
        let url = default_database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("llmtrace.db"));
    }

    #[test]
    fn blank_database_url_falls_back_to_default() {
        let config = TrackerConfig {
            database_url: Some("  ".to_string()),
            ..TrackerConfig::default()
        };
        assert_eq!(resolve_database_url(&config), default_database_url());
    }
}
