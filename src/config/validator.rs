use crate::classifier::matches_trusted_suffix;
use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{IngestError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_classifier(config, &mut errors);
        Self::validate_verifier(config, &mut errors);
        Self::validate_ingest(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(IngestError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.database_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }

        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_classifier(config: &Config, errors: &mut Vec<ValidationError>) {
        let classifier = &config.classifier;

        if classifier
            .trusted_suffixes
            .iter()
            .any(|s| s.trim_start_matches('.').trim().is_empty())
        {
            errors.push(ValidationError::new(
                "classifier.trusted_suffixes",
                "Trusted suffixes cannot be empty",
            ));
        }

        if classifier.allow_keywords.iter().any(|k| k.trim().is_empty()) {
            errors.push(ValidationError::new(
                "classifier.allow_keywords",
                "Allow-list keywords cannot be empty",
            ));
        }

        if classifier.deny_keywords.iter().any(|k| k.trim().is_empty()) {
            errors.push(ValidationError::new(
                "classifier.deny_keywords",
                "Deny-list keywords cannot be empty",
            ));
        }

        if classifier.allow_threshold == 0 {
            errors.push(ValidationError::new(
                "classifier.allow_threshold",
                "Allow threshold must be at least 1",
            ));
        }
    }

    fn validate_verifier(config: &Config, errors: &mut Vec<ValidationError>) {
        let verifier = &config.verifier;

        // If the verifier is enabled, the API key environment variable must be set
        if verifier.enabled {
            let env_var = &verifier.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.trim().is_empty() => {
                    errors.push(ValidationError::new(
                        "verifier.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
                Ok(_) => {}
                Err(_) => {
                    errors.push(ValidationError::new(
                        "verifier.api_key_env",
                        format!("Environment variable {} is not set", env_var),
                    ));
                }
            }
        }

        if !(verifier.endpoint.starts_with("http://") || verifier.endpoint.starts_with("https://"))
        {
            errors.push(ValidationError::new(
                "verifier.endpoint",
                format!("Endpoint must be an http(s) URL, got '{}'", verifier.endpoint),
            ));
        }

        if verifier.model.is_empty() {
            errors.push(ValidationError::new(
                "verifier.model",
                "Model name cannot be empty",
            ));
        }

        if !(0..=10).contains(&verifier.quality_threshold) {
            errors.push(ValidationError::new(
                "verifier.quality_threshold",
                format!(
                    "Quality threshold must be between 0 and 10, got {}",
                    verifier.quality_threshold
                ),
            ));
        }

        if !(0.0..=2.0).contains(&verifier.temperature) {
            errors.push(ValidationError::new(
                "verifier.temperature",
                format!(
                    "Temperature must be between 0.0 and 2.0, got {}",
                    verifier.temperature
                ),
            ));
        }

        if verifier.max_tokens == 0 {
            errors.push(ValidationError::new(
                "verifier.max_tokens",
                "Max tokens must be greater than 0",
            ));
        }

        if verifier.max_text_chars == 0 {
            errors.push(ValidationError::new(
                "verifier.max_text_chars",
                "Max text chars must be greater than 0",
            ));
        }

        if verifier.prompt_cost_per_mtok < 0.0 || verifier.completion_cost_per_mtok < 0.0 {
            errors.push(ValidationError::new(
                "verifier.prompt_cost_per_mtok",
                "Token prices cannot be negative",
            ));
        }

        Self::check_duration(
            "verifier.request_timeout",
            &verifier.request_timeout,
            errors,
        );
        Self::check_duration(
            "verifier.usage_reset_interval",
            &verifier.usage_reset_interval,
            errors,
        );
    }

    fn validate_ingest(config: &Config, errors: &mut Vec<ValidationError>) {
        let ingest = &config.ingest;

        if ingest.buffer_size == 0 {
            errors.push(ValidationError::new(
                "ingest.buffer_size",
                "Buffer size must be greater than 0",
            ));
        }

        if ingest.milestone_every == 0 {
            errors.push(ValidationError::new(
                "ingest.milestone_every",
                "Milestone interval must be greater than 0",
            ));
        }

        Self::check_duration("ingest.report_interval", &ingest.report_interval, errors);
        Self::check_duration("ingest.shutdown_grace", &ingest.shutdown_grace, errors);

        // The placeholder only exists to pass the trusted-suffix check
        let matches_trusted = config
            .classifier
            .trusted_suffixes
            .iter()
            .any(|suffix| matches_trusted_suffix(&ingest.operator_handle, suffix));
        if !ingest.operator_dids.is_empty() && !matches_trusted {
            errors.push(ValidationError::new(
                "ingest.operator_handle",
                format!(
                    "Operator handle '{}' does not match any trusted suffix",
                    ingest.operator_handle
                ),
            ));
        }
    }

    fn check_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        match parse_duration(value) {
            Some(d) if !d.is_zero() => {}
            _ => errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_quality_threshold() {
        let mut config = Config::default();
        config.verifier.quality_threshold = 11;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_zero_allow_threshold() {
        let mut config = Config::default();
        config.classifier.allow_threshold = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_duration() {
        let mut config = Config::default();
        config.ingest.report_interval = "often".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_overflowing_duration_is_rejected() {
        let mut config = Config::default();
        config.ingest.shutdown_grace = "9999999999999999h".to_string();

        match ConfigValidator::validate(&config) {
            Err(IngestError::ConfigValidation { errors }) => {
                assert!(errors.iter().any(|e| e.path == "ingest.shutdown_grace"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_enabled_verifier_requires_api_key() {
        let mut config = Config::default();
        config.verifier.enabled = true;
        config.verifier.api_key_env = "CANNECT_TEST_KEY_THAT_IS_NEVER_SET".to_string();

        match ConfigValidator::validate(&config) {
            Err(IngestError::ConfigValidation { errors }) => {
                assert!(errors.iter().any(|e| e.path == "verifier.api_key_env"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_handle_must_be_trusted() {
        let mut config = Config::default();
        config.ingest.operator_dids = vec!["did:plc:operator".to_string()];
        config.ingest.operator_handle = "someone.bsky.social".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.ingest.operator_handle = "member.cannect.space".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_operator_handle_needs_label_boundary() {
        let mut config = Config::default();
        config.classifier.trusted_suffixes = vec!["cannect.space".to_string()];
        config.ingest.operator_dids = vec!["did:plc:operator".to_string()];
        config.ingest.operator_handle = "evilcannect.space".to_string();

        match ConfigValidator::validate(&config) {
            Err(IngestError::ConfigValidation { errors }) => {
                assert!(errors.iter().any(|e| e.path == "ingest.operator_handle"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }

        config.ingest.operator_handle = "cannect.space".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.storage.pool_size = 0;
        config.ingest.buffer_size = 0;
        config.verifier.model = String::new();

        match ConfigValidator::validate(&config) {
            Err(IngestError::ConfigValidation { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
