//! Bounded retry with capped exponential backoff.

use std::num::NonZeroU32;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{serde_dur, serde_dur_option};

/// How many times an action is attempted and how long to wait in between.
///
/// The exact backoff curve is a tunable: the only guarantee is that at most
/// `attempts` invocations happen before the action is reported as failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicy {
	/// Total attempts, including the first one (default: 3)
	#[serde(default = "default_attempts")]
	pub attempts: NonZeroU32,

	/// Delay before the second attempt (default: 100ms)
	#[serde(default = "default_backoff", with = "serde_dur")]
	pub backoff: Duration,

	/// Growth factor applied to the delay after each failed attempt (default: 2.0)
	#[serde(default = "default_multiplier")]
	pub multiplier: f64,

	/// Upper bound for a single delay
	#[serde(
		default = "default_max_backoff",
		skip_serializing_if = "Option::is_none",
		with = "serde_dur_option"
	)]
	pub max_backoff: Option<Duration>,

	/// Randomize each delay by up to this fraction, 0.0 to disable (default: 0.0)
	#[serde(default)]
	pub jitter: f64,
}

fn default_attempts() -> NonZeroU32 {
	NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN)
}

fn default_backoff() -> Duration {
	Duration::from_millis(100)
}

fn default_multiplier() -> f64 {
	2.0
}

fn default_max_backoff() -> Option<Duration> {
	Some(Duration::from_secs(10))
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			attempts: default_attempts(),
			backoff: default_backoff(),
			multiplier: default_multiplier(),
			max_backoff: default_max_backoff(),
			jitter: 0.0,
		}
	}
}

impl RetryPolicy {
	/// Policy used for compensations: one retry, then give up and record.
	pub fn for_compensation() -> Self {
		Self {
			attempts: NonZeroU32::new(2).unwrap_or(NonZeroU32::MIN),
			backoff: Duration::from_millis(500),
			..Self::default()
		}
	}

	/// A single attempt, no retry.
	pub fn once() -> Self {
		Self {
			attempts: NonZeroU32::MIN,
			..Self::default()
		}
	}

	/// `attempts` tries with a fixed delay in between.
	pub fn fixed(attempts: u32, backoff: Duration) -> Self {
		Self {
			attempts: NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN),
			backoff,
			multiplier: 1.0,
			max_backoff: None,
			jitter: 0.0,
		}
	}

	pub fn max_attempts(&self) -> u32 {
		self.attempts.get()
	}

	/// Delay to wait after the given failed attempt (1-based) before the next.
	pub fn delay_after(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
		let growth = self.multiplier.max(1.0).powi(exponent);
		let mut delay = if growth == 1.0 {
			self.backoff
		} else {
			Duration::try_from_secs_f64(self.backoff.as_secs_f64() * growth).unwrap_or(Duration::MAX)
		};
		if let Some(max) = self.max_backoff {
			delay = delay.min(max);
		}
		if self.jitter > 0.0 && !delay.is_zero() {
			let spread = self.jitter.min(1.0);
			let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
			delay = Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX);
		}
		delay
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_policy_defaults() {
		let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
		assert_eq!(policy, RetryPolicy::default());
		assert_eq!(policy.max_attempts(), 3);
	}

	#[test]
	fn test_policy_from_json() {
		let json = r#"{"attempts": 5, "backoff": "250ms", "maxBackoff": "1s"}"#;
		let policy: RetryPolicy = serde_json::from_str(json).unwrap();
		assert_eq!(policy.max_attempts(), 5);
		assert_eq!(policy.backoff, Duration::from_millis(250));
		assert_eq!(policy.max_backoff, Some(Duration::from_secs(1)));
	}

	#[test]
	fn test_policy_rejects_zero_attempts() {
		let result: Result<RetryPolicy, _> = serde_json::from_str(r#"{"attempts": 0}"#);
		assert!(result.is_err());
	}

	#[test]
	fn test_policy_denies_unknown_fields() {
		let result: Result<RetryPolicy, _> = serde_json::from_str(r#"{"retries": 2}"#);
		assert!(result.is_err());
	}

	#[test]
	fn test_exponential_delay_is_capped() {
		let policy = RetryPolicy {
			backoff: Duration::from_millis(100),
			max_backoff: Some(Duration::from_millis(300)),
			..RetryPolicy::default()
		};
		assert_eq!(policy.delay_after(1), Duration::from_millis(100));
		assert_eq!(policy.delay_after(2), Duration::from_millis(200));
		assert_eq!(policy.delay_after(3), Duration::from_millis(300));
		assert_eq!(policy.delay_after(10), Duration::from_millis(300));
	}

	#[test]
	fn test_fixed_delay() {
		let policy = RetryPolicy::fixed(4, Duration::from_secs(1));
		assert_eq!(policy.max_attempts(), 4);
		assert_eq!(policy.delay_after(1), Duration::from_secs(1));
		assert_eq!(policy.delay_after(3), Duration::from_secs(1));
	}

	#[test]
	fn test_jitter_stays_in_bounds() {
		let policy = RetryPolicy {
			backoff: Duration::from_secs(1),
			multiplier: 1.0,
			jitter: 0.5,
			..RetryPolicy::default()
		};
		for _ in 0..50 {
			let delay = policy.delay_after(1);
			assert!(delay >= Duration::from_millis(500));
			assert!(delay <= Duration::from_millis(1500));
		}
	}

	#[test]
	fn test_uncapped_jittered_delay_saturates() {
		let json = r#"{"attempts": 100, "backoff": "1s", "maxBackoff": null, "jitter": 0.5}"#;
		let policy: RetryPolicy = serde_json::from_str(json).unwrap();
		assert_eq!(policy.max_backoff, None);
		for attempt in 1..=100 {
			let delay = policy.delay_after(attempt);
			assert!(delay >= Duration::from_millis(500), "attempt {attempt}: {delay:?}");
		}
		assert!(policy.delay_after(100) >= Duration::from_secs(u64::MAX / 4));
	}

	#[test]
	fn test_compensation_policy_retries_once() {
		assert_eq!(RetryPolicy::for_compensation().max_attempts(), 2);
		assert_eq!(RetryPolicy::once().max_attempts(), 1);
	}
}
