//! Provider Credentials
//!
//! Resolves the default provider API key from the environment and validates
//! keys supplied per request.

use super::ProviderKind;
use thiserror::Error;

/// Maximum key length accepted (OpenAI project keys run ~170 chars)
const MAX_API_KEY_LENGTH: usize = 256;
const MIN_API_KEY_LENGTH: usize = 20;

/// Errors related to credentials
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Invalid secret format: {0}")]
    InvalidFormat(String),
}

/// A validated provider API key
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Validate and wrap a raw key for the given provider
    pub fn parse(provider: ProviderKind, raw: &str) -> Result<Self, SecretsError> {
        let key = raw.trim();
        SecretsManager::validate_api_key(provider, key)?;
        Ok(Self(key.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let visible: String = self.0.chars().take(4).collect();
        write!(f, "ApiKey({}***)", visible)
    }
}

/// Credential lookup and validation
pub struct SecretsManager;

impl SecretsManager {
    /// Read the default API key from the named environment variable
    pub fn default_api_key(provider: ProviderKind, env_var: &str) -> Result<ApiKey, SecretsError> {
        let raw = std::env::var(env_var)
            .map_err(|_| SecretsError::NotFound(format!("{} is not set", env_var)))?;
        ApiKey::parse(provider, &raw)
    }

    /// Validate API key format for a provider
    ///
    /// OpenAI keys start with "sk-", Groq keys with "gsk_".
    pub fn validate_api_key(provider: ProviderKind, api_key: &str) -> Result<(), SecretsError> {
        let api_key = api_key.trim();

        if api_key.is_empty() {
            return Err(SecretsError::InvalidFormat(
                "API key cannot be empty".to_string(),
            ));
        }

        if api_key.len() > MAX_API_KEY_LENGTH {
            return Err(SecretsError::InvalidFormat(format!(
                "API key is too long (max {} characters)",
                MAX_API_KEY_LENGTH
            )));
        }

        let prefix = match provider {
            ProviderKind::OpenAi => "sk-",
            ProviderKind::Groq => "gsk_",
        };
        if !api_key.starts_with(prefix) {
            return Err(SecretsError::InvalidFormat(format!(
                "{} API key must start with '{}'",
                provider.name(),
                prefix
            )));
        }

        if api_key.len() < MIN_API_KEY_LENGTH {
            return Err(SecretsError::InvalidFormat(
                "API key is too short".to_string(),
            ));
        }

        if !api_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SecretsError::InvalidFormat(
                "API key contains invalid characters".to_string(),
            ));
        }

        Ok(())
    }
}
