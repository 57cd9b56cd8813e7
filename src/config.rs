use crate::prompts::SYSTEM_PROMPT;
use secrecy::SecretString;
use std::env;
use thiserror::Error;
use url::Url;

/// Gemini Live bidirectional streaming endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Model used when none is given on the command line.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Environment variable holding the Gemini API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Credentials for the remote model service
#[derive(Debug)]
pub struct ApiConfig {
    gemini_key: SecretString,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let gemini_key = Self::load_api_key(API_KEY_ENV, "Gemini")?;
        Ok(Self { gemini_key })
    }

    /// Build a config from an explicit key, applying the same validation as `load`.
    pub fn from_key(key: impl Into<String>) -> Result<Self, ConfigError> {
        let key = key.into();
        Self::validate_key_format(&key, "Gemini")?;
        Ok(Self {
            gemini_key: SecretString::from(key),
        })
    }

    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretString, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;
        Self::validate_key_format(&key, service_name)?;
        Ok(SecretString::from(key))
    }

    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidKeyFormat {
            service: service.to_string(),
            reason: reason.to_string(),
        };

        if key.trim().is_empty() {
            return Err(invalid("API key cannot be empty"));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(invalid("API key must not contain whitespace"));
        }
        if key.len() < 10 {
            return Err(invalid("API key should be at least 10 characters"));
        }
        Ok(())
    }

    /// The secret key, for attaching to the connection request only.
    pub fn gemini_key(&self) -> &SecretString {
        &self.gemini_key
    }
}

/// Settings for one live streaming session
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Validated `ws://` or `wss://` URL
    pub endpoint: String,
    pub model: String,
    pub system_prompt: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: GEMINI_LIVE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

impl LiveConfig {
    /// Replace the endpoint. Only `ws://` and `wss://` URLs are accepted.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        }
        if url.query_pairs().any(|(name, _)| name == "key") {
            return Err(invalid(
                "credentials must not be embedded in the URL".to_string(),
            ));
        }

        self.endpoint = url.into();
        Ok(self)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
