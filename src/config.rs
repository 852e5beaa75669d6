use crate::cli::Cli;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "relget";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const CACHE_FILE_NAME: &str = "cache.json";

pub const CONFIG_ENV: &str = "RELGET_CONFIG";
pub const BIN_ENV: &str = "RELGET_BIN";
pub const CACHE_ENV: &str = "RELGET_CACHE";
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

pub const DEFAULT_CACHE_TTL_HOURS: u64 = 48;

/// Keys shared by the `global` section and each repository section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SectionConfig {
    pub all: Option<bool>,
    pub download_only: Option<bool>,
    /// Fetch the repository's source tarball instead of a release asset.
    pub download_source: Option<bool>,
    pub file: Option<String>,
    pub quiet: Option<bool>,
    pub show_hash: Option<bool>,
    pub system: Option<String>,
    pub target: Option<String>,
    pub upgrade_only: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GlobalConfig {
    #[serde(flatten)]
    pub section: SectionConfig,
    pub github_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepositoryConfig {
    #[serde(flatten)]
    pub section: SectionConfig,
    pub asset_filters: Option<Vec<String>>,
    pub tag: Option<String>,
    pub verify_sha256: Option<String>,
    /// Name to install the extracted binary under.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigFile {
    pub global: GlobalConfig,
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

impl ConfigFile {
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        if yaml {
            serde_yaml::from_str(content)
                .with_context(|| format!("Could not parse {} as YAML", path.display()))
        } else {
            serde_json::from_str(content)
                .with_context(|| format!("Could not parse {} as JSON", path.display()))
        }
    }

    pub fn repository(&self, key: &str) -> Option<&RepositoryConfig> {
        self.repositories.get(key)
    }
}

/// Process environment the options depend on.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub bin_dir: Option<PathBuf>,
    pub github_token: Option<String>,
    pub cache_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl Environment {
    pub fn from_process() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            bin_dir: var(BIN_ENV).map(PathBuf::from),
            github_token: var(TOKEN_ENV),
            cache_path: var(CACHE_ENV).map(PathBuf::from),
            config_path: var(CONFIG_ENV).map(PathBuf::from),
        }
    }
}

/// Candidate config file locations, most specific first.
pub fn config_file_candidates(env: &Environment) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = &env.config_path {
        candidates.push(path.clone());
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(format!(".{}.json", APP_NAME)));
    }
    if let Some(config) = dirs::config_dir() {
        candidates.push(config.join(APP_NAME).join(CONFIG_FILE_NAME));
    }
    candidates
}

/// Loads the first config file that exists. No config file is not an error.
pub fn load_config_file(env: &Environment) -> Result<ConfigFile> {
    for path in config_file_candidates(env) {
        if !path.exists() {
            continue;
        }
        tracing::debug!("Config file path: {}", path.display());
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file at {}", path.display()))?;
        return ConfigFile::parse(&content, &path);
    }
    Ok(ConfigFile::default())
}

pub fn default_cache_path(env: &Environment) -> Result<PathBuf> {
    if let Some(path) = &env.cache_path {
        return Ok(path.clone());
    }
    let path = dirs::cache_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))?
        .join(APP_NAME)
        .join(CACHE_FILE_NAME);
    tracing::debug!("Cache file path: {}", path.display());
    Ok(path)
}

/// Replaces a leading `~` with the home directory.
pub fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.display(), rest),
        None => path.to_string(),
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub tag: Option<String>,
    pub prerelease: bool,
    /// `--to` destination, or the configured install target.
    pub output: Option<String>,
    /// `all`, `os/arch`, or empty for the host.
    pub system: String,
    pub file: Option<String>,
    pub all: bool,
    pub quiet: bool,
    pub verbose: u8,
    pub download_only: bool,
    pub upgrade_only: bool,
    pub asset_filters: Vec<String>,
    pub show_hash: bool,
    pub verify_sha256: Option<String>,
    pub remove: bool,
    pub source: bool,
    /// Fail instead of prompting when a choice is ambiguous.
    pub no_interaction: bool,
    pub show_progress: bool,
    pub github_token: Option<String>,
    pub bin_dir: Option<PathBuf>,
    pub cache_ttl_hours: u64,
    pub name: Option<String>,
}

/// Merges the command line, the repository section for `key`, the global
/// section and the environment. The command line wins, then the repository
/// section, then the global section.
pub fn resolve_options(cli: &Cli, file: &ConfigFile, key: &str, env: &Environment) -> Options {
    let global = &file.global.section;
    let repo = file.repository(key);
    let section = repo.map(|r| &r.section);

    let flag = |cli_value: bool, pick: fn(&SectionConfig) -> Option<bool>| {
        cli_value || section.and_then(pick).or_else(|| pick(global)).unwrap_or(false)
    };
    let text = |cli_value: &Option<String>, pick: fn(&SectionConfig) -> Option<&String>| {
        cli_value
            .clone()
            .or_else(|| section.and_then(pick).cloned())
            .or_else(|| pick(global).cloned())
    };

    let asset_filters = if cli.asset.is_empty() {
        repo.and_then(|r| r.asset_filters.clone()).unwrap_or_default()
    } else {
        cli.asset.clone()
    };

    Options {
        tag: cli.tag.clone().or_else(|| repo.and_then(|r| r.tag.clone())),
        prerelease: cli.pre_release,
        output: text(&cli.to, |s| s.target.as_ref()).map(|t| expand_home(&t)),
        system: text(&cli.system, |s| s.system.as_ref()).unwrap_or_default(),
        file: text(&cli.file, |s| s.file.as_ref()),
        all: flag(cli.all, |s| s.all),
        quiet: flag(cli.quiet, |s| s.quiet),
        verbose: cli.verbose,
        download_only: flag(cli.download_only, |s| s.download_only),
        upgrade_only: flag(cli.upgrade_only, |s| s.upgrade_only),
        asset_filters,
        show_hash: flag(cli.hash, |s| s.show_hash),
        verify_sha256: cli
            .verify_sha256
            .clone()
            .or_else(|| repo.and_then(|r| r.verify_sha256.clone())),
        remove: cli.remove,
        source: flag(cli.source, |s| s.download_source),
        no_interaction: cli.no_interaction,
        show_progress: !cli.no_progress,
        github_token: env
            .github_token
            .clone()
            .or_else(|| file.global.github_token.clone()),
        bin_dir: env.bin_dir.clone(),
        cache_ttl_hours: cli.cache_ttl_hours.unwrap_or(DEFAULT_CACHE_TTL_HOURS),
        name: repo.and_then(|r| r.name.clone()),
    }
}
