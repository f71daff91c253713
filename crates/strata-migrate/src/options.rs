//! Run options.
//!
//! Options resolve in three layers: built-in defaults, then `STRATA_*`
//! environment variables, then explicit overrides (CLI flags). Empty
//! environment values are ignored; unparsable or out-of-range values are a
//! [`ConfigError::InvalidOption`].
//!
//! | Variable | Default |
//! |---|---|
//! | `STRATA_BATCH_SIZE` | 200 (max 250) |
//! | `STRATA_MAX_CONCURRENCY` | 4 |
//! | `STRATA_RETRY_MAX_ATTEMPTS` | 5 |
//! | `STRATA_RETRY_BASE_DELAY_MS` | 100 |
//! | `STRATA_RETRY_MAX_DELAY_MS` | 5000 |
//! | `STRATA_ABORT_FRACTION` | 0.1 |
//! | `STRATA_VERIFY_SAMPLE` | full scan |

use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Maximum records per atomic batch. Each record contributes two writes
/// (document and marker), keeping a batch within 500 writes.
pub const MAX_BATCH_RECORDS: usize = 250;

/// Tunables for one migration, verification, or rollback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Records per atomic batch.
    pub batch_size: usize,
    /// Batches in flight within a phase.
    pub max_concurrency: usize,
    /// Retry policy for store writes and deletes.
    pub retry: RetryPolicy,
    /// Fraction of a phase's records that may fail before the run aborts.
    pub abort_fraction: f64,
    /// Documents checked per collection during verification (`None` = all).
    pub verify_sample: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_concurrency: 4,
            retry: RetryPolicy::default(),
            abort_fraction: 0.1,
            verify_sample: None,
        }
    }
}

impl RunOptions {
    /// Loads options from the process environment over the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOption` for an unparsable or out-of-range
    /// value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads options through `lookup` over the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOption` for an unparsable or out-of-range
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut options = Self::default();

        if let Some(v) = env.parse::<usize>("STRATA_BATCH_SIZE")? {
            options.batch_size = v;
        }
        if let Some(v) = env.parse::<usize>("STRATA_MAX_CONCURRENCY")? {
            options.max_concurrency = v;
        }
        if let Some(v) = env.parse::<u32>("STRATA_RETRY_MAX_ATTEMPTS")? {
            options.retry.max_attempts = v;
        }
        if let Some(v) = env.parse::<u64>("STRATA_RETRY_BASE_DELAY_MS")? {
            options.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = env.parse::<u64>("STRATA_RETRY_MAX_DELAY_MS")? {
            options.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = env.parse::<f64>("STRATA_ABORT_FRACTION")? {
            options.abort_fraction = v;
        }
        if let Some(v) = env.parse::<usize>("STRATA_VERIFY_SAMPLE")? {
            options.verify_sample = Some(v);
        }

        options.validate()?;
        Ok(options)
    }

    /// Checks every option against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOption` naming the first bad option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_BATCH_RECORDS).contains(&self.batch_size) {
            return Err(invalid(
                "batch_size",
                format!("must be between 1 and {MAX_BATCH_RECORDS}"),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(invalid(
                "retry.max_delay",
                "must not be smaller than retry.base_delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.abort_fraction) {
            return Err(invalid("abort_fraction", "must be between 0.0 and 1.0"));
        }
        if self.verify_sample == Some(0) {
            return Err(invalid("verify_sample", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidOption {
        name: name.to_string(),
        message: message.into(),
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<T>()
            .map(Some)
            .map_err(|e| invalid(name, format!("'{v}' is not valid: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let options = RunOptions::from_lookup(|_| None).unwrap();
        assert_eq!(options, RunOptions::default());
        assert_eq!(options.batch_size, 200);
        assert_eq!(options.max_concurrency, 4);
        assert!(options.verify_sample.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let options = RunOptions::from_lookup(lookup(&[
            ("STRATA_BATCH_SIZE", "50"),
            ("STRATA_MAX_CONCURRENCY", " 2 "),
            ("STRATA_RETRY_MAX_ATTEMPTS", "3"),
            ("STRATA_RETRY_BASE_DELAY_MS", "10"),
            ("STRATA_RETRY_MAX_DELAY_MS", "40"),
            ("STRATA_ABORT_FRACTION", "0.5"),
            ("STRATA_VERIFY_SAMPLE", "25"),
        ]))
        .unwrap();
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.max_concurrency, 2);
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.retry.base_delay, Duration::from_millis(10));
        assert_eq!(options.retry.max_delay, Duration::from_millis(40));
        assert!((options.abort_fraction - 0.5).abs() < f64::EPSILON);
        assert_eq!(options.verify_sample, Some(25));
    }

    #[test]
    fn empty_values_are_ignored() {
        let options = RunOptions::from_lookup(lookup(&[("STRATA_BATCH_SIZE", "  ")])).unwrap();
        assert_eq!(options.batch_size, 200);
    }

    #[test]
    fn rejects_unparsable_and_out_of_range() {
        let err = RunOptions::from_lookup(lookup(&[("STRATA_BATCH_SIZE", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { ref name, .. } if name == "STRATA_BATCH_SIZE"));

        for (name, value) in [
            ("STRATA_BATCH_SIZE", "251"),
            ("STRATA_BATCH_SIZE", "0"),
            ("STRATA_MAX_CONCURRENCY", "0"),
            ("STRATA_RETRY_MAX_ATTEMPTS", "0"),
            ("STRATA_RETRY_MAX_DELAY_MS", "50"),
            ("STRATA_ABORT_FRACTION", "1.5"),
            ("STRATA_VERIFY_SAMPLE", "0"),
        ] {
            assert!(
                RunOptions::from_lookup(lookup(&[(name, value)])).is_err(),
                "{name}={value} should be rejected"
            );
        }
    }
}
