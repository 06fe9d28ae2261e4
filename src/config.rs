//! Configuration loading and schema definitions for cadence.
//!
//! Engine configuration lives in a TOML file separate from test plans, so
//! the same plans can run with different pool sizes and timeouts.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads cadence configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use cadence::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("cadence.toml"))?;
/// println!("Workers: {}", config.engine.max_workers);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads cadence configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the string is not valid TOML or doesn't match the
/// schema.
///
/// # Example
///
/// ```
/// use cadence::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [engine]
///     fault_strategy = "throw"
/// "#)?;
/// assert_eq!(config.engine.fault_strategy, "throw");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.engine.max_workers, 4);
        assert_eq!(config.engine.async_timeout_ms, 10_000);
        assert_eq!(config.engine.polling_interval_ms, 500);
        assert_eq!(config.engine.duplicate_replies, "queue");
        assert_eq!(config.engine.fault_strategy, "propagate");
        assert_eq!(config.report.junit_file, "junit.xml");
        assert!(config.report.junit);
    }

    #[test]
    fn test_partial_tables_keep_other_defaults() {
        let config = load_config_str(
            r#"
            [engine]
            max_workers = 8
            reply_timeout_ms = 250

            [report]
            junit = false
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_workers, 8);
        assert_eq!(config.engine.reply_timeout_ms, 250);
        assert_eq!(config.engine.drain_timeout_ms, 5_000);
        assert!(!config.report.junit);
        assert_eq!(config.report.output_dir.to_str(), Some("test-results"));
    }

    #[test]
    fn test_invalid_config_reports_context() {
        let err = load_config_str("[engine]\nmax_workers = 'many'").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.toml");
        std::fs::write(&path, "[engine]\nmax_workers = 2\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.engine.max_workers, 2);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
