use crate::config::schema::{
    CredentialConfig, KeyManagerConfig, LoadTestConfig, OutputConfig, RateConfig, RequestConfig,
};
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;
use validator::Validate;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<LoadTestConfig> {
        let path = path.as_ref();
        let mut visited = HashSet::new();
        Self::load_with_inheritance(path, &mut visited, false)
    }

    fn load_with_inheritance(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        is_parent_load: bool,
    ) -> Result<LoadTestConfig> {
        let path = fs::canonicalize(path).map_err(|e| {
            Error::Config(format!("{}: {}", path.display(), e))
        })?;

        if visited.contains(&path) {
            return Err(Error::Config(format!(
                "Circular inheritance detected involving {}",
                path.display()
            )));
        }
        visited.insert(path.clone());

        let config = Self::load_file(&path)?;

        let final_config = if let Some(parent_path_str) = &config.extends {
            let parent_path = path.parent()
                .ok_or_else(|| Error::Config(format!(
                    "Cannot determine parent directory for {}",
                    path.display()
                )))?
                .join(parent_path_str);

            let parent_config = Self::load_with_inheritance(&parent_path, visited, true)?;
            Self::merge_configs(parent_config, config)
        } else {
            config
        };

        if !is_parent_load {
            Self::validate(&final_config)?;
        }

        Ok(final_config)
    }

    pub fn parse(content: &str, extension: &str) -> Result<LoadTestConfig> {
        match extension {
            "json" => Ok(serde_json::from_str(content)?),
            "yaml" | "yml" => Ok(serde_yaml::from_str(content)?),
            "toml" => Ok(toml::from_str(content)?),
            other => Err(Error::Config(format!(
                "Unsupported file extension: {}",
                other
            ))),
        }
    }

    fn load_file(path: &Path) -> Result<LoadTestConfig> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| Error::Config(format!(
                "Unsupported file extension: {}",
                path.display()
            )))?;
        Self::parse(&content, extension)
    }

    pub fn validate(config: &LoadTestConfig) -> Result<()> {
        config.validate()?;
        for scenario in &config.scenarios {
            scenario.validate()?;
        }

        let url = Url::parse(&config.key_manager.base_url).map_err(|e| {
            Error::Config(format!("key_manager.base_url '{}': {}", config.key_manager.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "key_manager.base_url must be http(s), got '{}'",
                url.scheme()
            )));
        }

        let mut names = HashSet::new();
        for scenario in &config.scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate scenario name '{}'",
                    scenario.name
                )));
            }
        }

        Ok(())
    }

    fn merge_configs(mut parent: LoadTestConfig, child: LoadTestConfig) -> LoadTestConfig {
        if !child.name.is_empty() {
            parent.name = child.name;
        }
        if child.key_manager != KeyManagerConfig::default() {
            parent.key_manager = child.key_manager;
        }
        if child.rate != RateConfig::default() {
            parent.rate = child.rate;
        }
        if child.request != RequestConfig::default() {
            parent.request = child.request;
        }
        if child.credentials != CredentialConfig::default() {
            parent.credentials = child.credentials;
        }
        if child.join_timeout_secs != 30 {
            parent.join_timeout_secs = child.join_timeout_secs;
        }
        if child.pause_between_secs != 5 {
            parent.pause_between_secs = child.pause_between_secs;
        }
        if child.output != OutputConfig::default() {
            parent.output = child.output;
        }
        if !child.scenarios.is_empty() {
            parent.scenarios = child.scenarios;
        }

        parent.extends = None;
        parent
    }
}
