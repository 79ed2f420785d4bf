use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use parlance_engine::config::{BASE_URL_VAR, DEFAULT_BASE_URL};
use parlance_engine::shared::User;
use parlance_engine::{ApiConfig, AuthContext};

/// What envoy remembers between runs: where the server is and who is
/// signed in.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            user: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn sign_in(&mut self, token: String, user: User) {
        self.token = Some(token);
        self.user = Some(user);
    }

    pub fn sign_out(&mut self) {
        self.token = None;
        self.user = None;
    }

    /// The session this config describes, shared by every client built from it.
    pub fn auth_context(&self) -> AuthContext {
        match (&self.token, &self.user) {
            (Some(token), Some(user)) => AuthContext::signed_in(token.clone(), user.clone()),
            _ => AuthContext::new(),
        }
    }

    /// `PARLANCE_API_BASE_URL` (from the environment or `.env`) wins over
    /// the saved server URL.
    pub fn api_config(&self) -> Result<ApiConfig> {
        let from_env = ApiConfig::from_env()?;
        if std::env::var_os(BASE_URL_VAR).is_some() {
            return Ok(from_env);
        }
        Ok(ApiConfig::new(&self.server_url).with_timeout(from_env.timeout))
    }

    fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".config").join("parlance").join("config.json"))
    }
}
