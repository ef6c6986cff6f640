//! # Configuration Validation
//!
//! Field ranges are checked by the `validator` derives on the schema; the
//! checks here cover relations between fields and values that parse but
//! cannot work.

use crate::{Error, Result, config::schema::RuntimeConfig};
use tracing::{debug, warn};
use validator::Validate;

/// Host facts some checks are relative to.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Logical CPUs available to the process
    pub cpu_cores: usize,
}

impl ValidationContext {
    /// Detect the current host.
    pub fn detect() -> Self {
        Self {
            cpu_cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Runtime configuration validator.
pub struct ConfigValidator {
    context: ValidationContext,
}

impl ConfigValidator {
    /// Create a validator for the current host.
    pub fn new() -> Self {
        Self {
            context: ValidationContext::detect(),
        }
    }

    /// Create a validator with a custom context.
    pub fn with_context(context: ValidationContext) -> Self {
        Self { context }
    }

    /// Validate a configuration for the current host.
    pub fn validate(config: &RuntimeConfig) -> Result<()> {
        Self::new().validate_config(config)
    }

    /// Run every check.
    pub fn validate_config(&self, config: &RuntimeConfig) -> Result<()> {
        debug!("Starting configuration validation");

        config.validate().map_err(Error::from)?;

        self.validate_execution(config)?;
        self.validate_security(config)?;
        self.validate_orchestrator(config)?;
        self.validate_logging(config)?;

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_execution(&self, config: &RuntimeConfig) -> Result<()> {
        let execution = &config.execution;

        if execution.call_timeout_ms > execution.transition_timeout_ms {
            warn!(
                call_timeout_ms = execution.call_timeout_ms,
                transition_timeout_ms = execution.transition_timeout_ms,
                "Call timeout exceeds transition timeout; callers may give up before contract calls do"
            );
        }

        if execution.max_concurrent_operations > self.context.cpu_cores * 64 {
            warn!(
                max_concurrent_operations = execution.max_concurrent_operations,
                cpu_cores = self.context.cpu_cores,
                "Worker pool is much larger than the host"
            );
        }

        Ok(())
    }

    fn validate_security(&self, config: &RuntimeConfig) -> Result<()> {
        let security = &config.security;

        for key in &security.trusted_keys {
            if hex::decode(key).map(|bytes| bytes.is_empty()).unwrap_or(true) {
                return Err(Error::configuration(format!(
                    "security.trusted_keys: '{key}' is not a non-empty hex string"
                )));
            }
        }

        for digest in &security.blocked_digests {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::configuration(format!(
                    "security.blocked_digests: '{digest}' is not a SHA-256 hex digest"
                )));
            }
        }

        if security.require_signatures && security.trusted_keys.is_empty() {
            return Err(Error::configuration(
                "security.require_signatures is set but no trusted keys are configured",
            ));
        }

        if security.threat_signatures.iter().any(|s| s.is_empty())
            || security.suspicious_code_patterns.iter().any(|s| s.is_empty())
        {
            return Err(Error::configuration("security patterns must not be empty strings"));
        }

        if security.sweep_interval_ms > security.temporary_grant_ttl_ms {
            warn!(
                sweep_interval_ms = security.sweep_interval_ms,
                temporary_grant_ttl_ms = security.temporary_grant_ttl_ms,
                "Expired grants may outlive their TTL by up to one sweep interval"
            );
        }

        Ok(())
    }

    fn validate_orchestrator(&self, config: &RuntimeConfig) -> Result<()> {
        let orchestrator = &config.orchestrator;

        if orchestrator.max_history_per_plugin == 0 {
            debug!("Rollback history disabled beyond the current version");
        }

        if orchestrator.health_check_interval_ms > 0 && orchestrator.health_check_interval_ms < 100 {
            warn!(
                interval_ms = orchestrator.health_check_interval_ms,
                "Very short health check interval"
            );
        }

        if let (Some(backup), Some(configs)) = (&orchestrator.backup_dir, &orchestrator.config_dir) {
            if backup == configs {
                return Err(Error::configuration(
                    "orchestrator.backup_dir and orchestrator.config_dir must differ",
                ));
            }
        }

        Ok(())
    }

    fn validate_logging(&self, config: &RuntimeConfig) -> Result<()> {
        tracing_subscriber::EnvFilter::try_new(&config.logging.level).map_err(|e| {
            Error::configuration(format!("logging.level '{}': {e}", config.logging.level))
        })?;
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&RuntimeConfig::default()).is_ok());
        assert!(ConfigValidator::validate(&RuntimeConfig::development()).is_ok());
    }

    #[test]
    fn test_production_requires_trusted_keys() {
        let mut config = RuntimeConfig::production();
        assert!(ConfigValidator::validate(&config).is_err());

        config.security.trusted_keys = vec!["00ff10".to_string()];
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_range_violations() {
        let mut config = RuntimeConfig::default();
        config.execution.call_timeout_ms = 0;
        let error = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(error, Error::Configuration { .. }));
    }

    #[test]
    fn test_malformed_digest_and_key() {
        let mut config = RuntimeConfig::default();
        config.security.blocked_digests = vec!["abc".to_string()];
        assert!(ConfigValidator::validate(&config).is_err());

        let mut config = RuntimeConfig::default();
        config.security.trusted_keys = vec!["not-hex".to_string()];
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_log_filter() {
        let mut config = RuntimeConfig::default();
        config.logging.level = "plexus_core=[[".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_shared_persistence_roots_rejected() {
        let mut config = RuntimeConfig::default();
        config.orchestrator.backup_dir = Some("/tmp/plexus".into());
        config.orchestrator.config_dir = Some("/tmp/plexus".into());
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
