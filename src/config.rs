use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error;

pub const DEFAULT_BASE_URL: &'static str = "https://attack.mitre.org/";
pub const DEFAULT_OUTPUT: &'static str = "mitre_attack_techniques.csv";

const CONFIG_DIR: &'static str = ".mitre_groups";
const CONFIG_FILE: &'static str = "config.json";

/// Runtime settings, read from `~/.mitre_groups/config.json` when present.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub delay_ms: u64,
    pub retry_delay_ms: u64,
    pub output: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        return Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            retries: 2,
            delay_ms: 1000,
            retry_delay_ms: 2000,
            output: PathBuf::from(DEFAULT_OUTPUT),
        };
    }
}

pub fn config_dir() -> Result<PathBuf, error::Error> {
    match home::home_dir() {
        Some(home) => Ok(home.join(CONFIG_DIR)),
        None => Err("unable to locate the home directory".into()),
    }
}

impl Config {
    /// Loads the config file at `path`, or the default location when `path`
    /// is `None`. Only an explicitly requested file has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self, error::Error> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = config_dir()?.join(CONFIG_FILE);

                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    log::debug!(
                        "'{}' not found, using default settings",
                        default_path.display()
                    );
                    Self::default()
                }
            }
        };

        return Ok(config.normalized());
    }

    pub fn from_file(path: &Path) -> Result<Self, error::Error> {
        if !path.exists() {
            return Err(error::Error::InvalidValue(format!(
                "config file '{}' does not exist",
                path.display()
            )));
        }

        log::debug!("Loading settings from '{}'", path.display());
        let content = std::fs::read_to_string(path)?;

        return Self::from_json(&content);
    }

    pub fn from_json(content: &str) -> Result<Self, error::Error> {
        let config: Config = serde_json::from_str(content)?;

        return Ok(config.normalized());
    }

    fn normalized(mut self) -> Self {
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }

        return self;
    }

    pub fn set_base_url(&mut self, base_url: &str) {
        self.base_url = base_url.to_string();

        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
    }

    pub fn groups_url(&self) -> String {
        return format!("{}groups/", self.base_url);
    }

    pub fn group_url(&self, group_id: &str) -> String {
        return format!("{}groups/{}/", self.base_url, group_id.to_uppercase());
    }

    pub fn delay(&self) -> Duration {
        return Duration::from_millis(self.delay_ms);
    }

    pub fn retry_delay(&self) -> Duration {
        return Duration::from_millis(self.retry_delay_ms);
    }

    pub fn timeout(&self) -> Duration {
        return Duration::from_secs(self.timeout_secs);
    }
}
