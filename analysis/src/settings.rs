//! Scheduler settings, deserialized from the `[analysis]` config table.

use std::time::Duration;

use serde::Deserialize;

/// Resources up to `max_bytes` wait `delay_ms` after the last change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DebounceTier {
    pub max_bytes: usize,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Larger resources are never analyzed.
    pub max_resource_bytes: usize,
    /// Concurrent analyses per sweep batch.
    pub batch_size: usize,
    /// Language ids the backend accepts.
    pub supported_languages: Vec<String>,
    /// Ascending by `max_bytes`.
    pub debounce_tiers: Vec<DebounceTier>,
    /// Delay for resources larger than every tier.
    pub large_delay_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_resource_bytes: 1024 * 1024,
            batch_size: 5,
            supported_languages: ["python", "javascript", "typescript", "rust"]
                .into_iter()
                .map(String::from)
                .collect(),
            debounce_tiers: vec![
                DebounceTier {
                    max_bytes: 10_000,
                    delay_ms: 500,
                },
                DebounceTier {
                    max_bytes: 100_000,
                    delay_ms: 1500,
                },
            ],
            large_delay_ms: 3000,
        }
    }
}

impl SchedulerSettings {
    /// Debounce delay for a resource of `bytes` bytes.
    #[must_use]
    pub fn debounce_for(&self, bytes: usize) -> Duration {
        let delay_ms = self
            .debounce_tiers
            .iter()
            .find(|tier| bytes <= tier.max_bytes)
            .map_or(self.large_delay_ms, |tier| tier.delay_ms);
        Duration::from_millis(delay_ms)
    }

    #[must_use]
    pub fn supports(&self, language_id: &str) -> bool {
        self.supported_languages
            .iter()
            .any(|lang| lang.eq_ignore_ascii_case(language_id))
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("analysis.batch_size must be at least 1".to_string());
        }
        if self.max_resource_bytes == 0 {
            return Err("analysis.max_resource_bytes must be at least 1".to_string());
        }
        if self
            .debounce_tiers
            .windows(2)
            .any(|pair| pair[0].max_bytes >= pair[1].max_bytes)
        {
            return Err("analysis.debounce_tiers must be sorted by ascending max_bytes".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiers() {
        let s = SchedulerSettings::default();
        assert_eq!(s.debounce_for(0), Duration::from_millis(500));
        assert_eq!(s.debounce_for(10_000), Duration::from_millis(500));
        assert_eq!(s.debounce_for(10_001), Duration::from_millis(1500));
        assert_eq!(s.debounce_for(100_000), Duration::from_millis(1500));
        assert_eq!(s.debounce_for(100_001), Duration::from_millis(3000));
    }

    #[test]
    fn no_tiers_uses_large_delay() {
        let s = SchedulerSettings {
            debounce_tiers: Vec::new(),
            ..SchedulerSettings::default()
        };
        assert_eq!(s.debounce_for(1), Duration::from_millis(3000));
    }

    #[test]
    fn language_match_ignores_case() {
        let s = SchedulerSettings::default();
        assert!(s.supports("Python"));
        assert!(!s.supports("cobol"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(SchedulerSettings::default().validate().is_ok());
        let zero_batch = SchedulerSettings {
            batch_size: 0,
            ..SchedulerSettings::default()
        };
        assert!(zero_batch.validate().is_err());

        let mut unsorted = SchedulerSettings::default();
        unsorted.debounce_tiers.reverse();
        assert!(unsorted.validate().is_err());
    }
}
