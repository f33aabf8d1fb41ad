use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use hg::RunnerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// hg executable; `hg` from PATH when unset.
    #[serde(default)]
    pub hg_path: Option<PathBuf>,
    /// Extra environment for every hg invocation, on top of the C locale.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub slow_command_warning_secs: Option<u64>,
}

impl Config {
    /// Get the path to the config file (~/.config/hgscm/config.toml)
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hgscm").join("config.toml"))
    }

    /// Load config from disk, returning default if file doesn't exist
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "Ignoring invalid config: {}", e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Runner settings; `hg_override` (from `--hg`) beats `hg_path`.
    pub fn runner_config(&self, hg_override: Option<PathBuf>) -> RunnerConfig {
        let mut runner = RunnerConfig::default();
        if let Some(hg) = hg_override.or_else(|| self.hg_path.clone()) {
            runner.executable = hg;
        }
        runner
            .env
            .extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(secs) = self.slow_command_warning_secs {
            runner.slow_command_warning_secs = secs;
        }
        runner
    }
}
