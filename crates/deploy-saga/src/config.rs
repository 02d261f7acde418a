//! Executor configuration.
//!
//! ```yaml
//! forwardRetry:
//!   attempts: 3
//!   backoff: 200ms
//! compensationRetry:
//!   attempts: 2
//! stepTimeout: 5m
//! compensationTimeout: 2m
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::serde_dur_option;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse YAML config: {0}")]
	Yaml(#[from] serde_yaml::Error),

	#[error("failed to parse JSON config: {0}")]
	Json(#[from] serde_json::Error),

	#[error("invalid config: {0}")]
	Invalid(String),
}

/// Tunables for [`SagaExecutor`](crate::SagaExecutor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecutorConfig {
	/// Retry policy for forward actions
	#[serde(default)]
	pub forward_retry: RetryPolicy,

	/// Retry policy for compensations
	#[serde(default = "RetryPolicy::for_compensation")]
	pub compensation_retry: RetryPolicy,

	/// Upper bound for a single forward attempt
	#[serde(
		default = "default_timeout",
		skip_serializing_if = "Option::is_none",
		with = "serde_dur_option"
	)]
	pub step_timeout: Option<Duration>,

	/// Upper bound for a single compensation attempt
	#[serde(
		default = "default_timeout",
		skip_serializing_if = "Option::is_none",
		with = "serde_dur_option"
	)]
	pub compensation_timeout: Option<Duration>,
}

fn default_timeout() -> Option<Duration> {
	Some(Duration::from_secs(300))
}

impl Default for ExecutorConfig {
	fn default() -> Self {
		Self {
			forward_retry: RetryPolicy::default(),
			compensation_retry: RetryPolicy::for_compensation(),
			step_timeout: default_timeout(),
			compensation_timeout: default_timeout(),
		}
	}
}

impl ExecutorConfig {
	pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
		let config: Self = serde_yaml::from_str(s)?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
		let config: Self = serde_json::from_str(s)?;
		config.validate()?;
		Ok(config)
	}

	/// Load from a `.json`, `.yaml` or `.yml` file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = fs_err::read_to_string(path)?;
		match path.extension().and_then(|e| e.to_str()) {
			Some("json") => Self::from_json_str(&contents),
			_ => Self::from_yaml_str(&contents),
		}
	}

	fn validate(&self) -> Result<(), ConfigError> {
		for (name, policy) in [
			("forwardRetry", &self.forward_retry),
			("compensationRetry", &self.compensation_retry),
		] {
			if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
				return Err(ConfigError::Invalid(format!(
					"{name}.multiplier must be >= 1.0, got {}",
					policy.multiplier
				)));
			}
			if !(0.0..=1.0).contains(&policy.jitter) {
				return Err(ConfigError::Invalid(format!(
					"{name}.jitter must be between 0.0 and 1.0, got {}",
					policy.jitter
				)));
			}
		}
		for (name, timeout) in [
			("stepTimeout", self.step_timeout),
			("compensationTimeout", self.compensation_timeout),
		] {
			if timeout.is_some_and(|t| t.is_zero()) {
				return Err(ConfigError::Invalid(format!("{name} must not be zero")));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use assert_matches::assert_matches;

	use super::*;

	#[test]
	fn test_empty_yaml_uses_defaults() {
		let config = ExecutorConfig::from_yaml_str("{}").unwrap();
		assert_eq!(config, ExecutorConfig::default());
		assert_eq!(config.forward_retry.max_attempts(), 3);
		assert_eq!(config.compensation_retry.max_attempts(), 2);
		assert_eq!(config.step_timeout, Some(Duration::from_secs(300)));
	}

	#[test]
	fn test_yaml_overrides() {
		let yaml = r#"
forwardRetry:
  attempts: 5
  backoff: 1s
  multiplier: 1.5
compensationRetry:
  attempts: 1
stepTimeout: 30s
compensationTimeout: 2m
"#;
		let config = ExecutorConfig::from_yaml_str(yaml).unwrap();
		assert_eq!(config.forward_retry.max_attempts(), 5);
		assert_eq!(config.forward_retry.backoff, Duration::from_secs(1));
		assert_eq!(config.compensation_retry.max_attempts(), 1);
		assert_eq!(config.step_timeout, Some(Duration::from_secs(30)));
		assert_eq!(config.compensation_timeout, Some(Duration::from_secs(120)));
	}

	#[test]
	fn test_invalid_values_rejected() {
		let result = ExecutorConfig::from_yaml_str("forwardRetry:\n  multiplier: 0.5\n");
		assert_matches!(result, Err(ConfigError::Invalid(_)));

		let result = ExecutorConfig::from_json_str(r#"{"stepTimeout": "0s"}"#);
		assert_matches!(result, Err(ConfigError::Invalid(_)));

		let result = ExecutorConfig::from_json_str(r#"{"stepTimout": "1s"}"#);
		assert_matches!(result, Err(ConfigError::Json(_)));
	}

	#[test]
	fn test_from_file_picks_format_by_extension() {
		let dir = tempfile::tempdir().unwrap();

		let json_path = dir.path().join("executor.json");
		let mut file = std::fs::File::create(&json_path).unwrap();
		write!(file, r#"{{"forwardRetry": {{"attempts": 7}}}}"#).unwrap();
		let config = ExecutorConfig::from_file(&json_path).unwrap();
		assert_eq!(config.forward_retry.max_attempts(), 7);

		let yaml_path = dir.path().join("executor.yaml");
		std::fs::write(&yaml_path, "stepTimeout: 10s\n").unwrap();
		let config = ExecutorConfig::from_file(&yaml_path).unwrap();
		assert_eq!(config.step_timeout, Some(Duration::from_secs(10)));

		let missing = ExecutorConfig::from_file(dir.path().join("missing.yaml"));
		assert_matches!(missing, Err(ConfigError::Io(_)));
	}
}
