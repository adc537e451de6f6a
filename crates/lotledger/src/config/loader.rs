use std::collections::HashSet;
use std::path::Path;

use rust_decimal::Decimal;

use crate::classifier::Classifier;
use crate::config::schema::{ClassificationRule, Config};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "max_attempts must be at least 1".to_string(),
        });
    }

    validate_percent(
        "defaults.buyers_premium_percent",
        config.defaults.buyers_premium_percent,
    )?;
    validate_percent(
        "defaults.sales_tax_percent",
        config.defaults.sales_tax_percent,
    )?;

    if let Some(rules) = &config.classifier.rules {
        let mut rule_ids = HashSet::new();
        for rule in rules {
            if !rule_ids.insert(&rule.id) {
                return Err(ConfigError::InvalidRule {
                    id: rule.id.clone(),
                    reason: "Duplicate rule ID".to_string(),
                });
            }
            validate_rule(rule)?;
        }
    }

    Ok(())
}

fn validate_percent(field: &str, value: Decimal) -> Result<(), ConfigError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(ConfigError::Validation {
            message: format!("{} must be between 0 and 100, got {}", field, value),
        });
    }
    Ok(())
}

fn validate_rule(rule: &ClassificationRule) -> Result<(), ConfigError> {
    if rule.category.is_none() && rule.condition.is_none() {
        return Err(ConfigError::InvalidRule {
            id: rule.id.clone(),
            reason: "Rule must assign a category or a condition".to_string(),
        });
    }

    if rule.keywords.is_empty() {
        return Err(ConfigError::InvalidRule {
            id: rule.id.clone(),
            reason: "Rule has no keywords".to_string(),
        });
    }

    for keyword in &rule.keywords {
        if keyword.trim().is_empty() {
            return Err(ConfigError::InvalidRule {
                id: rule.id.clone(),
                reason: "Blank keyword".to_string(),
            });
        }
        if let Err(e) = regex::Regex::new(&Classifier::keyword_pattern(keyword)) {
            return Err(ConfigError::InvalidRule {
                id: rule.id.clone(),
                reason: format!("Keyword '{}' does not compile: {}", keyword, e),
            });
        }
    }

    Ok(())
}
