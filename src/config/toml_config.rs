use crate::core::ConfigProvider;
use crate::utils::error::{PricingError, Result};
use crate::utils::validation::Validate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_seconds: Option<u64>,
    pub token: Option<String>,
    pub login_path: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_seconds: None,
            token: None,
            login_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    pub cache_ttl_ms: Option<u64>,
    pub throttle_ms: Option<u64>,
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub json: Option<bool>,
}

impl TomlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(PricingError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| PricingError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR_NAME}` with the environment value; unknown variables
    /// are left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| PricingError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        crate::utils::validation::validate_url("api.base_url", &self.api.base_url)?;

        if let Some(timeout) = self.api.timeout_seconds {
            crate::utils::validation::validate_positive_number("api.timeout_seconds", timeout, 1)?;
        }
        if let Some(ttl) = self.pricing.cache_ttl_ms {
            crate::utils::validation::validate_range("pricing.cache_ttl_ms", ttl, 0, 3_600_000)?;
        }
        if let Some(throttle) = self.pricing.throttle_ms {
            crate::utils::validation::validate_range("pricing.throttle_ms", throttle, 0, 5_000)?;
        }
        if let Some(settle) = self.pricing.settle_ms {
            crate::utils::validation::validate_range("pricing.settle_ms", settle, 0, 5_000)?;
        }
        if let Some(token) = &self.api.token {
            if token.starts_with("${") {
                return Err(PricingError::InvalidConfigValueError {
                    field: "api.token".to_string(),
                    value: token.clone(),
                    reason: "environment variable is not set".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn login_path(&self) -> &str {
        self.api.login_path.as_deref().unwrap_or("/login")
    }

    pub fn json_logs(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.json).unwrap_or(false)
    }
}

impl ConfigProvider for TomlConfig {
    fn api_base_url(&self) -> &str {
        &self.api.base_url
    }

    fn api_token(&self) -> Option<&str> {
        self.api.token.as_deref()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds.unwrap_or(15))
    }

    fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.pricing.cache_ttl_ms.unwrap_or(10_000))
    }

    fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.pricing.throttle_ms.unwrap_or(30))
    }

    fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.pricing.settle_ms.unwrap_or(100))
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[api]
base_url = "https://cabinet.example.com/api"
timeout_seconds = 5
login_path = "/connexion"

[pricing]
cache_ttl_ms = 2000
throttle_ms = 50
settle_ms = 0

[logging]
json = true
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.api_base_url(), "https://cabinet.example.com/api");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.cache_ttl(), Duration::from_millis(2000));
        assert_eq!(config.throttle_delay(), Duration::from_millis(50));
        assert_eq!(config.settle_delay(), Duration::ZERO);
        assert_eq!(config.login_path(), "/connexion");
        assert!(config.json_logs());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = TomlConfig::from_toml_str("").unwrap();

        assert_eq!(config.cache_ttl(), Duration::from_secs(10));
        assert_eq!(config.throttle_delay(), Duration::from_millis(30));
        assert_eq!(config.settle_delay(), Duration::from_millis(100));
        assert_eq!(config.login_path(), "/login");
        assert_eq!(config.api_token(), None);
        assert!(!config.json_logs());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("FACTURE_PRICING_TEST_TOKEN", "tok_123");

        let toml_content = r#"
[api]
base_url = "https://cabinet.example.com/api"
token = "${FACTURE_PRICING_TEST_TOKEN}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.api_token(), Some("tok_123"));

        std::env::remove_var("FACTURE_PRICING_TEST_TOKEN");
    }

    #[test]
    fn test_unset_token_variable_fails_validation() {
        let toml_content = r#"
[api]
base_url = "https://cabinet.example.com/api"
token = "${FACTURE_PRICING_SURELY_UNSET_VAR}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation() {
        let invalid_url = TomlConfig::from_toml_str("[api]\nbase_url = \"invalid-url\"\n").unwrap();
        assert!(invalid_url.validate().is_err());

        let bad_throttle = TomlConfig::from_toml_str(
            "[api]\nbase_url = \"http://localhost\"\n[pricing]\nthrottle_ms = 60000\n",
        )
        .unwrap();
        assert!(bad_throttle.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[api]\nbase_url = \"http://127.0.0.1:9000\"\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.api_base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::from_toml_str("[api\nbase_url = 1").unwrap_err();
        assert!(matches!(err, PricingError::ConfigError { .. }));
    }
}
