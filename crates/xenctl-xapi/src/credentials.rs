//! Secret prompting and a caller-owned credential cache.

use crate::error::XenResult;

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

/// Interactive secret source (terminal prompt with echo off, GUI dialog, …).
pub trait SecretPrompt: Send + Sync {
    fn prompt_secret(&self, prompt: &str) -> XenResult<SecretString>;
}

/// Remembers secrets per `user@host` for the lifetime of the cache.
///
/// The cache is owned and passed around by the caller, so two runs (or two
/// tests) never share passwords.
#[derive(Default)]
pub struct CredentialCache {
    secrets: HashMap<String, SecretString>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user: &str, host: &str) -> String {
        format!("{user}@{host}")
    }

    pub fn insert(&mut self, user: &str, host: &str, secret: SecretString) {
        self.secrets.insert(Self::key(user, host), secret);
    }

    pub fn get(&self, user: &str, host: &str) -> Option<&SecretString> {
        self.secrets.get(&Self::key(user, host))
    }

    pub fn forget(&mut self, user: &str, host: &str) {
        self.secrets.remove(&Self::key(user, host));
    }

    /// Return the cached secret or prompt once and remember the answer.
    pub fn get_or_prompt(
        &mut self,
        user: &str,
        host: &str,
        prompt: &dyn SecretPrompt,
    ) -> XenResult<&SecretString> {
        let key = Self::key(user, host);
        if !self.secrets.contains_key(&key) {
            let secret = prompt.prompt_secret(&format!("Password for {key}: "))?;
            self.secrets.insert(key.clone(), secret);
        }
        Ok(&self.secrets[&key])
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

/// Prompt that always answers with the same secret. Useful for batch runs.
pub struct StaticSecret(pub SecretString);

impl SecretPrompt for StaticSecret {
    fn prompt_secret(&self, _prompt: &str) -> XenResult<SecretString> {
        Ok(SecretString::new(self.0.expose_secret().clone()))
    }
}

/// Prompt that refuses; for non-interactive callers that must supply passwords.
pub struct NoPrompt;

impl SecretPrompt for NoPrompt {
    fn prompt_secret(&self, prompt: &str) -> XenResult<SecretString> {
        Err(crate::error::XenError::invalid_input(format!(
            "no password supplied and prompting is disabled ({})",
            prompt.trim_end_matches([' ', ':'])
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl SecretPrompt for Counting {
        fn prompt_secret(&self, _prompt: &str) -> XenResult<SecretString> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SecretString::new(format!("secret-{n}")))
        }
    }

    #[test]
    fn prompts_once_per_key() {
        let prompt = Counting(AtomicUsize::new(0));
        let mut cache = CredentialCache::new();
        let first = cache
            .get_or_prompt("root", "10.0.0.5", &prompt)
            .unwrap()
            .expose_secret()
            .clone();
        let again = cache
            .get_or_prompt("root", "10.0.0.5", &prompt)
            .unwrap()
            .expose_secret()
            .clone();
        assert_eq!(first, "secret-0");
        assert_eq!(again, "secret-0");
        cache.get_or_prompt("admin", "10.0.0.5", &prompt).unwrap();
        assert_eq!(prompt.0.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn forget_forces_a_new_prompt() {
        let prompt = Counting(AtomicUsize::new(0));
        let mut cache = CredentialCache::new();
        cache.get_or_prompt("root", "h", &prompt).unwrap();
        cache.forget("root", "h");
        assert!(cache.get("root", "h").is_none());
        cache.get_or_prompt("root", "h", &prompt).unwrap();
        assert_eq!(prompt.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_prompt_refuses() {
        assert!(NoPrompt.prompt_secret("Password for root@h: ").is_err());
    }
}
