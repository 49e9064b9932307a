//! Loading configuration from JSON documents and environment overrides.

use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::RecoveryConfig;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "REVIVE_";

/// Parse and validate a JSON configuration document.
///
/// # Errors
///
/// Returns [`ConfigError::Malformed`] when the document is not valid JSON or
/// names unknown fields, and [`ConfigError::InvalidField`] when a value is out
/// of range.
pub fn load_from_json(document: &str) -> ConfigResult<RecoveryConfig> {
    let config: RecoveryConfig =
        serde_json::from_str(document).map_err(|source| ConfigError::Malformed { source })?;
    config.validate()?;
    Ok(config)
}

/// Apply `REVIVE_*` process environment overrides on top of `base`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when an override cannot be parsed or
/// the resulting document fails validation.
pub fn load_from_env(base: RecoveryConfig) -> ConfigResult<RecoveryConfig> {
    base.with_overrides(|key| std::env::var(key).ok())
}

impl RecoveryConfig {
    /// Apply overrides resolved through `lookup`, keyed by the upper-cased
    /// field name behind [`ENV_PREFIX`] (e.g. `REVIVE_PROBE_TTL_MS`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when an override cannot be parsed or
    /// the resulting document fails validation.
    pub fn with_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_field(&lookup, "probe_ttl_ms", &mut self.probe_ttl_ms)?;
        override_field(
            &lookup,
            "volume_poll_interval_ms",
            &mut self.volume_poll_interval_ms,
        )?;
        override_field(&lookup, "bulk_concurrency", &mut self.bulk_concurrency)?;
        override_field(
            &lookup,
            "active_wait_deadline_ms",
            &mut self.active_wait_deadline_ms,
        )?;
        override_field(
            &lookup,
            "active_wait_interval_ms",
            &mut self.active_wait_interval_ms,
        )?;
        override_field(
            &lookup,
            "auto_create_missing_folder",
            &mut self.auto_create_missing_folder,
        )?;
        override_field(
            &lookup,
            "event_replay_capacity",
            &mut self.event_replay_capacity,
        )?;
        self.validate()?;
        Ok(self)
    }
}

fn override_field<F, T>(lookup: &F, field: &'static str, slot: &mut T) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let key = format!("{ENV_PREFIX}{}", field.to_ascii_uppercase());
    let Some(raw) = lookup(&key) else {
        return Ok(());
    };
    let trimmed = raw.trim();
    *slot = trimmed.parse().map_err(|_| ConfigError::InvalidField {
        field,
        value: Some(trimmed.to_string()),
        reason: "could not parse environment override",
    })?;
    debug!(field, key = %key, "applied configuration override");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_document_yields_defaults() -> anyhow::Result<()> {
        assert_eq!(load_from_json("{}")?, RecoveryConfig::default());
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = load_from_json(r#"{"probe_ttl": 10}"#).expect_err("unknown field");
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn overrides_replace_document_values() -> anyhow::Result<()> {
        let env: HashMap<&str, &str> = HashMap::from([
            ("REVIVE_BULK_CONCURRENCY", " 8 "),
            ("REVIVE_AUTO_CREATE_MISSING_FOLDER", "false"),
        ]);
        let config = RecoveryConfig::default()
            .with_overrides(|key| env.get(key).map(|value| (*value).to_string()))?;
        assert_eq!(config.bulk_concurrency, 8);
        assert!(!config.auto_create_missing_folder);
        assert_eq!(config.probe_ttl_ms, 5_000);
        Ok(())
    }

    #[test]
    fn unparsable_override_names_the_field() {
        let err = RecoveryConfig::default()
            .with_overrides(|key| (key == "REVIVE_PROBE_TTL_MS").then(|| "soon".to_string()))
            .expect_err("bad override");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "probe_ttl_ms",
                value: Some(ref value),
                ..
            } if value == "soon"
        ));
    }
}
