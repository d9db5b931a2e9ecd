use thiserror::Error;

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("API request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Backend rejected request ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Unexpected backend response: {message}")]
    DecodeError { message: String },

    #[error("Session expired")]
    SessionExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    Backend,
    Authentication,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl PricingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PricingError::HttpError(_) => ErrorCategory::Network,
            PricingError::IoError(_)
            | PricingError::ConfigError { .. }
            | PricingError::MissingConfigError { .. }
            | PricingError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            PricingError::ApiError { .. } => ErrorCategory::Backend,
            PricingError::SessionExpired => ErrorCategory::Authentication,
            PricingError::SerializationError(_) | PricingError::DecodeError { .. } => {
                ErrorCategory::Data
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Backend | ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::Configuration | ErrorCategory::Authentication => {
                ErrorSeverity::Critical
            }
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, PricingError::SessionExpired)
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "Check that the billing backend is reachable and retry",
            ErrorCategory::Configuration => "Fix the configuration file or command line arguments",
            ErrorCategory::Backend => "Check the tariff setup for this client, service and unit",
            ErrorCategory::Authentication => "Log in again to obtain a fresh session token",
            ErrorCategory::Data => "Check the backend version; the response shape was not understood",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            PricingError::SessionExpired => "Your session has expired".to_string(),
            PricingError::ApiError { message, .. } => format!("The server refused the request: {}", message),
            PricingError::HttpError(_) => "Could not reach the billing server".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PricingError>;
