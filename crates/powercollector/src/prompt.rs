//! Operator confirmation of partition credentials.

use anyhow::Result;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Input, Password};

/// Asks the operator to confirm or override proposed credentials before an
/// authentication attempt.
pub trait CredentialPrompt: Send + Sync {
    /// Return the `(username, password)` pair to try. Empty input keeps the
    /// proposed value.
    ///
    /// # Errors
    ///
    /// Returns an error when the terminal cannot be read.
    fn confirm(&self, target: &str, username: &str, password: &str) -> Result<(String, String)>;
}

/// Interactive prompt on the controlling terminal.
#[derive(Default)]
pub struct DialoguerPrompt {
    theme: ColorfulTheme,
}

impl DialoguerPrompt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialPrompt for DialoguerPrompt {
    fn confirm(&self, target: &str, username: &str, password: &str) -> Result<(String, String)> {
        println!();
        println!(
            "{}",
            format!("Credentials for {target} (press enter to keep the proposed value)")
                .bright_black()
        );

        let user: String = Input::with_theme(&self.theme)
            .with_prompt(format!("Username for {target}"))
            .default(username.to_string())
            .interact_text()?;

        let entered = Password::with_theme(&self.theme)
            .with_prompt(format!("Password for {user}@{target}"))
            .allow_empty_password(true)
            .interact()?;

        let pass = if entered.is_empty() {
            password.to_string()
        } else {
            entered
        };
        Ok((keep_if_blank(&user, username), pass))
    }
}

/// Non-interactive prompt that always accepts the proposal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProposedCredentials;

impl CredentialPrompt for ProposedCredentials {
    fn confirm(&self, _target: &str, username: &str, password: &str) -> Result<(String, String)> {
        Ok((username.to_string(), password.to_string()))
    }
}

fn keep_if_blank(entered: &str, proposed: &str) -> String {
    let entered = entered.trim();
    if entered.is_empty() {
        proposed.to_string()
    } else {
        entered.to_string()
    }
}
