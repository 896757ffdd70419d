//! Run-time resolution of API keys and storage credentials.

use std::{collections::HashMap, fmt};

use anyhow::{Result, anyhow};

pub const WEATHER_API_KEY: &str = "WEATHER_API_KEY";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const SMTP_PASSWORD: &str = "SMTP_PASSWORD";

/// Source of named secrets. Empty values count as absent.
pub trait SecretProvider: Send + Sync + fmt::Debug {
    fn secret(&self, name: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed set of secrets, e.g. for tests or an already-fetched vault payload.
#[derive(Clone, Default)]
pub struct StaticSecrets(HashMap<String, String>);

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }
}

impl fmt::Debug for StaticSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.0.keys().collect();
        names.sort();
        f.debug_tuple("StaticSecrets").field(&names).finish()
    }
}

impl SecretProvider for StaticSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        self.0.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

/// Key / secret / token triple used to sign object uploads.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl StorageCredentials {
    pub fn resolve(secrets: &dyn SecretProvider) -> Result<Self> {
        let access_key_id = secrets.secret(AWS_ACCESS_KEY_ID);
        let secret_access_key = secrets.secret(AWS_SECRET_ACCESS_KEY);

        match (access_key_id, secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Self {
                access_key_id,
                secret_access_key,
                session_token: secrets.secret(AWS_SESSION_TOKEN),
            }),
            _ => Err(anyhow!(
                "No storage credentials available.\n\
                 Hint: export {AWS_ACCESS_KEY_ID} and {AWS_SECRET_ACCESS_KEY} \
                 (and {AWS_SESSION_TOKEN} for temporary credentials)."
            )),
        }
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Weather API key: the secret provider first, then the config file value.
pub fn resolve_api_key(secrets: &dyn SecretProvider, configured: Option<&str>) -> Result<String> {
    secrets
        .secret(WEATHER_API_KEY)
        .or_else(|| configured.filter(|k| !k.is_empty()).map(str::to_owned))
        .ok_or_else(|| {
            anyhow!(
                "No weather API key configured.\n\
                 Hint: export {WEATHER_API_KEY} or run `weather-etl configure`."
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_credentials_require_key_and_secret() {
        let secrets = StaticSecrets::new().with(AWS_ACCESS_KEY_ID, "AKIA");
        let err = StorageCredentials::resolve(&secrets).unwrap_err();
        assert!(err.to_string().contains("No storage credentials available"));
    }

    #[test]
    fn storage_credentials_token_is_optional() {
        let secrets = StaticSecrets::new()
            .with(AWS_ACCESS_KEY_ID, "AKIA")
            .with(AWS_SECRET_ACCESS_KEY, "s3cr3t");
        let creds = StorageCredentials::resolve(&secrets).unwrap();
        assert_eq!(creds.access_key_id, "AKIA");
        assert_eq!(creds.session_token, None);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = StorageCredentials {
            access_key_id: "AKIA".into(),
            secret_access_key: "s3cr3t".into(),
            session_token: Some("tok3n".into()),
        };
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("AKIA"));
        assert!(!dbg.contains("s3cr3t"));
        assert!(!dbg.contains("tok3n"));

        let secrets = StaticSecrets::new().with(WEATHER_API_KEY, "hidden");
        assert!(!format!("{secrets:?}").contains("hidden"));
    }

    #[test]
    fn api_key_prefers_secret_provider() {
        let secrets = StaticSecrets::new().with(WEATHER_API_KEY, "FROM_ENV");
        let key = resolve_api_key(&secrets, Some("FROM_FILE")).unwrap();
        assert_eq!(key, "FROM_ENV");
    }

    #[test]
    fn api_key_falls_back_to_config() {
        let key = resolve_api_key(&StaticSecrets::new(), Some("FROM_FILE")).unwrap();
        assert_eq!(key, "FROM_FILE");

        let err = resolve_api_key(&StaticSecrets::new(), Some("")).unwrap_err();
        assert!(err.to_string().contains("No weather API key configured"));
    }
}
