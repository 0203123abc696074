//! Interactive credential fallback

use std::io::IsTerminal;

use dialoguer::{theme::ColorfulTheme, Input, Password};
use kracli_core::{Credentials, CredentialsProvider, Error, Result};
use tracing::debug;

/// Whether a user can answer prompts
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && console::user_attended_stderr()
}

/// Wraps a provider and asks on the terminal when it has nothing to offer
pub struct PromptingCredentials<P> {
    inner: P,
    interactive: bool,
}

impl<P: CredentialsProvider> PromptingCredentials<P> {
    pub fn new(inner: P, interactive: bool) -> Self {
        Self { inner, interactive }
    }
}

impl<P: CredentialsProvider> CredentialsProvider for PromptingCredentials<P> {
    fn credentials(&self) -> Result<Credentials> {
        match self.inner.credentials() {
            Err(Error::Config(reason)) if self.interactive => {
                debug!(%reason, "no stored credentials, prompting");
                prompt_credentials()
            }
            other => other,
        }
    }
}

/// Ask for username and password
fn prompt_credentials() -> Result<Credentials> {
    let theme = ColorfulTheme::default();

    let username: String = Input::with_theme(&theme)
        .with_prompt("kra.sk username")
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if input.trim().is_empty() {
                Err("Username cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()
        .map_err(|e| Error::Config(format!("Failed to read username: {}", e)))?;

    let password = Password::with_theme(&theme)
        .with_prompt("Password")
        .interact()
        .map_err(|e| Error::Config(format!("Failed to read password: {}", e)))?;

    if password.is_empty() {
        return Err(Error::Config("Password cannot be empty".to_string()));
    }

    Ok(Credentials {
        username: username.trim().to_string(),
        password,
    })
}
