//! Session token handling
//!
//! A persisted token is validated once per process by asking for the account
//! information. The answer is kept in a [`SessionValidity`] cache for the rest
//! of the run, so showing the account later does not query the API again.
//! When validation fails the store logs in again and persists the new token.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::{ApiGateway, ResponseEnvelope};
use crate::config::{save_config, ConfigFile};
use crate::error::{Error, Result};
use crate::objects::ObjectApi;

/// Environment variable holding the username
pub const ENV_USERNAME: &str = "KRAUSER";

/// Environment variable holding the password
pub const ENV_PASSWORD: &str = "KRAPASS";

/// Login credentials
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Source of login credentials, consulted only when a login is needed
pub trait CredentialsProvider {
    fn credentials(&self) -> Result<Credentials>;
}

/// Credentials from `KRAUSER`/`KRAPASS`, falling back to the `[login]` section
pub struct ConfigCredentials<'a> {
    config: &'a ConfigFile,
    config_path: &'a Path,
    env: fn(&str) -> Option<String>,
}

impl<'a> ConfigCredentials<'a> {
    pub fn new(config: &'a ConfigFile, config_path: &'a Path) -> Self {
        Self {
            config,
            config_path,
            env: |key| std::env::var(key).ok(),
        }
    }

    /// Use a custom environment lookup
    pub fn with_env(mut self, env: fn(&str) -> Option<String>) -> Self {
        self.env = env;
        self
    }
}

impl CredentialsProvider for ConfigCredentials<'_> {
    fn credentials(&self) -> Result<Credentials> {
        let from_env = (
            (self.env)(ENV_USERNAME).filter(|v| !v.is_empty()),
            (self.env)(ENV_PASSWORD).filter(|v| !v.is_empty()),
        );
        if let (Some(username), Some(password)) = from_env {
            debug!("using credentials from environment");
            return Ok(Credentials { username, password });
        }

        match &self.config.login {
            Some(login) if !login.username.is_empty() && !login.password.is_empty() => {
                Ok(Credentials {
                    username: login.username.clone(),
                    password: login.password.clone(),
                })
            }
            _ => Err(Error::Config(format!(
                "Credentials missing: use env {} {} or {}",
                ENV_USERNAME,
                ENV_PASSWORD,
                self.config_path.display()
            ))),
        }
    }
}

/// Account information obtained while validating the session, kept for one run
#[derive(Debug, Default)]
pub struct SessionValidity {
    account: Option<Value>,
}

impl SessionValidity {
    pub fn is_valid(&self) -> bool {
        self.account.is_some()
    }

    pub fn account(&self) -> Option<&Value> {
        self.account.as_ref()
    }

    fn remember(&mut self, account: Value) {
        self.account = Some(account);
    }
}

/// Token of a successful login: `session_id` next to `success`, whatever else
/// the reply carries
fn session_token(reply: &Value) -> Option<&str> {
    reply.get("success")?;
    reply
        .get("session_id")?
        .as_str()
        .filter(|token| !token.is_empty())
}

/// Persists, validates and renews the session token
pub struct SessionStore {
    gateway: ApiGateway,
    config_path: PathBuf,
    config: ConfigFile,
    validity: SessionValidity,
}

impl SessionStore {
    pub fn new(gateway: ApiGateway, config_path: PathBuf, config: ConfigFile) -> Self {
        Self {
            gateway,
            config_path,
            config,
            validity: SessionValidity::default(),
        }
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn validity(&self) -> &SessionValidity {
        &self.validity
    }

    /// Return a usable token, logging in again if the cached one is rejected
    pub async fn ensure_session(&mut self, provider: &dyn CredentialsProvider) -> Result<String> {
        if let Some(token) = self.config.session_id().map(str::to_string) {
            if self.validate(&token).await {
                debug!("cached session is valid");
                return Ok(token);
            }
            warn!("cached session rejected, logging in again");
        }

        self.login(provider).await
    }

    /// Probe `user/info`; only a data reply counts as valid
    async fn validate(&mut self, token: &str) -> bool {
        if self.validity.is_valid() {
            return true;
        }

        match ObjectApi::new(&self.gateway, token).user_info().await {
            Ok(ResponseEnvelope::Data(account)) => {
                self.validity.remember(account);
                true
            }
            Ok(other) => {
                debug!(reply = ?other, "session validation failed");
                false
            }
            Err(e) => {
                debug!(error = %e, "session validation failed");
                false
            }
        }
    }

    async fn login(&mut self, provider: &dyn CredentialsProvider) -> Result<String> {
        let credentials = provider.credentials()?;
        info!(username = %credentials.username, "logging in");

        let data = json!({
            "username": credentials.username,
            "password": credentials.password,
        });
        let value = self
            .gateway
            .call_value("user/login", None, Some(data))
            .await?;
        let token = match session_token(&value) {
            Some(token) => token.to_string(),
            None => {
                let reply = ResponseEnvelope::from_value(value)?
                    .into_result()
                    .map_err(|e| Error::Authentication(e.to_string()))?;
                let reason = reply.msg().unwrap_or("no session in login reply");
                return Err(Error::Authentication(reason.to_string()));
            }
        };

        self.config.set_session_id(token.clone());
        save_config(&self.config_path, &self.config)?;
        debug!(path = %self.config_path.display(), "session persisted");

        Ok(token)
    }

    /// Account information: the cached validation answer, or a fresh `user/info`
    pub async fn account_info(&self, token: &str) -> Result<ResponseEnvelope> {
        if let Some(account) = self.validity.account() {
            return Ok(ResponseEnvelope::Data(account.clone()));
        }
        ObjectApi::new(&self.gateway, token).user_info().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoginConfig;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn full_env(key: &str) -> Option<String> {
        match key {
            ENV_USERNAME => Some("env-user".to_string()),
            ENV_PASSWORD => Some("env-pass".to_string()),
            _ => None,
        }
    }

    fn half_env(key: &str) -> Option<String> {
        match key {
            ENV_USERNAME => Some("env-user".to_string()),
            _ => Some(String::new()),
        }
    }

    fn config_with_login() -> ConfigFile {
        ConfigFile {
            login: Some(LoginConfig {
                username: "cfg-user".to_string(),
                password: "cfg-pass".to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_env_credentials_take_precedence() {
        let config = config_with_login();
        let path = PathBuf::from("/tmp/kracli.toml");
        let creds = ConfigCredentials::new(&config, &path)
            .with_env(full_env)
            .credentials()
            .unwrap();
        assert_eq!(creds.username, "env-user");
        assert_eq!(creds.password, "env-pass");
    }

    #[test]
    fn test_partial_env_falls_back_to_config() {
        let config = config_with_login();
        let path = PathBuf::from("/tmp/kracli.toml");
        let creds = ConfigCredentials::new(&config, &path)
            .with_env(half_env)
            .credentials()
            .unwrap();
        assert_eq!(creds.username, "cfg-user");
    }

    #[test]
    fn test_missing_credentials_names_config_path() {
        let config = ConfigFile::default();
        let path = PathBuf::from("/tmp/kracli.toml");
        let err = ConfigCredentials::new(&config, &path)
            .with_env(no_env)
            .credentials()
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("KRAUSER"));
        assert!(text.contains("/tmp/kracli.toml"));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "u".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
