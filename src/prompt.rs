//! Terminal prompts.

use dialoguer::{Confirm, Password};
use secrecy::SecretString;
use xenctl_xapi::credentials::SecretPrompt;
use xenctl_xapi::{XenError, XenResult};

/// Asks on the terminal with echo off.
pub struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn prompt_secret(&self, prompt: &str) -> XenResult<SecretString> {
        let answer = Password::new()
            .with_prompt(prompt.trim_end_matches([' ', ':']))
            .interact()
            .map_err(|e| XenError::invalid_input(format!("password prompt failed: {e}")))?;
        Ok(SecretString::new(answer))
    }
}

pub fn confirm(question: &str) -> anyhow::Result<bool> {
    Ok(Confirm::new()
        .with_prompt(question)
        .default(false)
        .interact()?)
}
