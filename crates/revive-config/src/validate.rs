//! Range checks applied to every loaded configuration.

use crate::error::{ConfigError, ConfigResult};
use crate::model::RecoveryConfig;

/// Upper bound accepted for `bulk_concurrency`.
pub const MAX_BULK_CONCURRENCY: usize = 64;

impl RecoveryConfig {
    /// Validate the document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for the first field that is out of range.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure_positive("probe_ttl_ms", self.probe_ttl_ms)?;
        ensure_positive("volume_poll_interval_ms", self.volume_poll_interval_ms)?;
        ensure_positive("active_wait_deadline_ms", self.active_wait_deadline_ms)?;
        ensure_positive("active_wait_interval_ms", self.active_wait_interval_ms)?;

        if self.active_wait_interval_ms > self.active_wait_deadline_ms {
            return Err(ConfigError::InvalidField {
                field: "active_wait_interval_ms",
                value: Some(self.active_wait_interval_ms.to_string()),
                reason: "must not exceed active_wait_deadline_ms",
            });
        }

        if !(1..=MAX_BULK_CONCURRENCY).contains(&self.bulk_concurrency) {
            return Err(ConfigError::InvalidField {
                field: "bulk_concurrency",
                value: Some(self.bulk_concurrency.to_string()),
                reason: "must be between 1 and 64",
            });
        }

        if self.event_replay_capacity == 0 {
            return Err(ConfigError::InvalidField {
                field: "event_replay_capacity",
                value: Some("0".to_string()),
                reason: "must be positive",
            });
        }

        Ok(())
    }
}

fn ensure_positive(field: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::InvalidField {
            field,
            value: Some(value.to_string()),
            reason: "must be positive",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        assert!(RecoveryConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = RecoveryConfig {
            probe_ttl_ms: 0,
            ..RecoveryConfig::default()
        };
        let err = config.validate().expect_err("zero ttl must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "probe_ttl_ms",
                ..
            }
        ));
    }

    #[test]
    fn concurrency_ceiling_is_bounded() {
        for bulk_concurrency in [0, MAX_BULK_CONCURRENCY + 1] {
            let config = RecoveryConfig {
                bulk_concurrency,
                ..RecoveryConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidField {
                    field: "bulk_concurrency",
                    ..
                })
            ));
        }
    }

    #[test]
    fn wait_interval_cannot_exceed_deadline() {
        let config = RecoveryConfig {
            active_wait_deadline_ms: 100,
            active_wait_interval_ms: 200,
            ..RecoveryConfig::default()
        };
        let err = config.validate().expect_err("interval beyond deadline");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "active_wait_interval_ms",
                reason: "must not exceed active_wait_deadline_ms",
                ..
            }
        ));
    }
}
