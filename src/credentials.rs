use directories::BaseDirs;
use std::fmt;
use std::path::{Path, PathBuf};
use std::env;
use tracing::{debug, warn};

use crate::ai::ProviderKind;
use crate::errors::CredentialError;

/// An API key together with the provider it belongs to.
#[derive(Clone)]
pub struct Credential {
    pub provider: ProviderKind,
    api_key: String,
}

impl Credential {
    pub fn new(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Looks in the environment, then `./.env`, then `~/.env`.
    pub fn discover(provider: ProviderKind) -> Result<Self, CredentialError> {
        let var = provider.env_var();
        find_key(var, &default_search_paths())
            .map(|key| Credential::new(provider, key))
            .ok_or_else(|| CredentialError::CredentialMissing(var.to_string()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

fn redact(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{}…", prefix)
}

pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(".env")];
    if let Some(dirs) = BaseDirs::new() {
        paths.push(dirs.home_dir().join(".env"));
    }
    paths
}

/// First usable value of `var`: the process environment wins over any file.
pub fn find_key(var: &str, env_files: &[PathBuf]) -> Option<String> {
    if let Ok(value) = env::var(var) {
        if is_usable(&value) {
            debug!(var, "API key found in environment");
            return Some(value.trim().to_string());
        }
    }

    env_files
        .iter()
        .find_map(|path| read_env_file(path, var))
}

fn read_env_file(path: &Path, var: &str) -> Option<String> {
    if !path.exists() {
        return None;
    }
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read env file");
            return None;
        }
    };
    for item in iter {
        match item {
            Ok((key, value)) if key == var && is_usable(&value) => {
                debug!(var, path = %path.display(), "API key found in env file");
                return Some(value.trim().to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed env file line");
            }
        }
    }
    None
}

// Rejects blanks and the "your-key-here" placeholders that setup docs tell people to paste.
fn is_usable(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.to_lowercase().starts_with("your")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_key_reads_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "OTHER=1\nCOMMANDER_TEST_DOTENV_KEY=\"sk-from-file\"\n").unwrap();

        let key = find_key("COMMANDER_TEST_DOTENV_KEY", &[env_path]);
        assert_eq!(key.as_deref(), Some("sk-from-file"));
    }

    #[test]
    fn test_find_key_checks_files_in_order() {
        let project = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let project_env = project.path().join(".env");
        let home_env = home.path().join(".env");
        fs::write(&project_env, "COMMANDER_TEST_ORDER_KEY=your-key-here\n").unwrap();
        fs::write(&home_env, "COMMANDER_TEST_ORDER_KEY=sk-home\n").unwrap();

        let key = find_key("COMMANDER_TEST_ORDER_KEY", &[project_env, home_env]);
        assert_eq!(key.as_deref(), Some("sk-home"));
    }

    #[test]
    fn test_environment_wins_over_files() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "COMMANDER_TEST_ENV_FIRST=sk-file\n").unwrap();

        unsafe { env::set_var("COMMANDER_TEST_ENV_FIRST", "sk-env"); }
        let key = find_key("COMMANDER_TEST_ENV_FIRST", &[env_path]);
        unsafe { env::remove_var("COMMANDER_TEST_ENV_FIRST"); }

        assert_eq!(key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_key("COMMANDER_TEST_NEVER_SET", &[dir.path().join(".env")]).is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let cred = Credential::new(ProviderKind::OpenAI, "sk-secret-value-123");
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("secret-value"));
        assert!(printed.contains("sk-s"));
    }
}
