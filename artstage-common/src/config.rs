// artstage-common/src/config.rs
use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ArtError, Result};
use crate::model::ArtifactDescriptor;

// Fallbacks used when neither a config file nor the environment says otherwise.
const DEFAULT_ARTIFACT_NAME: &str = "EmmyLuaDebugger";
const DEFAULT_ARTIFACT_VERSION: &str = "1.8.2";
const DEFAULT_BASE_URL: &str = "https://github.com/EmmyLua/EmmyLuaDebugger";
const DEFAULT_PLATFORM_IDS: [&str; 2] = ["win32-x86", "win32-x64"];
const DEFAULT_STAGING_ROOT: &str = "temp";
const DEFAULT_DESTINATION: &str = "src/main/resources/debugger";
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

pub const CONFIG_FILE_NAME: &str = "artstage.toml";

pub const ENV_ARTIFACT_NAME: &str = "ARTIFACT_NAME";
pub const ENV_ARTIFACT_VERSION: &str = "ARTIFACT_VERSION";
pub const ENV_ARTIFACT_BASE_URL: &str = "ARTIFACT_BASE_URL";
pub const ENV_PLATFORM_IDS: &str = "PLATFORM_IDS";
pub const ENV_STAGING_ROOT: &str = "STAGING_ROOT";
pub const ENV_DESTINATION_PATHS: &str = "DESTINATION_PATHS";

#[derive(Debug, Clone)]
pub struct Config {
    pub artifact: ArtifactDescriptor,
    pub staging_root: PathBuf,
    pub destinations: Vec<PathBuf>,
    pub allow_http: bool,
    pub max_concurrent_downloads: usize,
    pub connect_timeout: Duration,
    pub download_timeout: Duration,
    /// Expected SHA-256 per platform id.
    pub checksums: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifact: ArtifactDescriptor::new(
                DEFAULT_ARTIFACT_NAME,
                DEFAULT_ARTIFACT_VERSION,
                DEFAULT_PLATFORM_IDS.iter().map(|s| s.to_string()).collect(),
                DEFAULT_BASE_URL,
            ),
            staging_root: PathBuf::from(DEFAULT_STAGING_ROOT),
            destinations: vec![PathBuf::from(DEFAULT_DESTINATION)],
            allow_http: false,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            checksums: HashMap::new(),
        }
    }
}

/// On-disk layout of `artstage.toml`. Every key is optional and overrides the
/// built-in default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub artifact: ArtifactSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub download: DownloadSection,
    #[serde(default)]
    pub checksums: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSection {
    pub name: Option<String>,
    pub version: Option<String>,
    pub base_url: Option<String>,
    pub platform_ids: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    pub staging_root: Option<PathBuf>,
    pub destinations: Option<Vec<PathBuf>>,
    pub sandbox_dir: Option<PathBuf>,
    pub plugin_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadSection {
    pub allow_http: Option<bool>,
    pub max_concurrent_downloads: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
}

impl Config {
    /// Builds the effective configuration: defaults, then the config file (the
    /// explicit path, `./artstage.toml`, or the user config directory), then
    /// the process environment.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self> {
        debug!("Loading artstage configuration");
        let mut config = Config::default();

        match explicit_file {
            Some(path) => {
                if !path.is_file() {
                    return Err(ArtError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                config.apply_file(path)?;
            }
            None => {
                if let Some(path) = discover_config_file() {
                    config.apply_file(&path)?;
                } else {
                    debug!("No config file found, using defaults and environment");
                }
            }
        }

        config.apply_env(|key| env::var_os(key));
        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        debug!("Reading config file {}", path.display());
        let raw = fs::read_to_string(path).map_err(|e| ArtError::io_at(path, e))?;
        self.apply_toml(&raw).map_err(|e| match e {
            ArtError::Toml(inner) => {
                ArtError::Config(format!("invalid config file {}: {inner}", path.display()))
            }
            other => other,
        })
    }

    pub fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(raw)?;
        self.apply_config_file(file);
        Ok(())
    }

    fn apply_config_file(&mut self, file: ConfigFile) {
        let ConfigFile {
            artifact,
            paths,
            download,
            checksums,
        } = file;

        if let Some(name) = artifact.name {
            self.artifact.name = name;
        }
        if let Some(version) = artifact.version {
            self.artifact.version = version;
        }
        if let Some(base_url) = artifact.base_url {
            self.artifact.base_url = base_url;
        }
        if let Some(ids) = artifact.platform_ids {
            self.artifact.platform_ids = ids;
        }

        if let Some(root) = paths.staging_root {
            self.staging_root = root;
        }
        if let Some(destinations) = paths.destinations {
            self.destinations = destinations;
        }
        if let Some(sandbox_dir) = paths.sandbox_dir {
            let plugin_name = paths
                .plugin_name
                .unwrap_or_else(|| self.artifact.name.clone());
            self.destinations
                .push(sandbox_destination(&sandbox_dir, &plugin_name));
        }

        if let Some(allow) = download.allow_http {
            self.allow_http = allow;
        }
        if let Some(jobs) = download.max_concurrent_downloads {
            self.max_concurrent_downloads = jobs;
        }
        if let Some(secs) = download.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = download.download_timeout_secs {
            self.download_timeout = Duration::from_secs(secs);
        }

        self.checksums.extend(checksums);
    }

    /// Applies the environment inputs. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let string_var = |key: &str| {
            lookup(key)
                .map(|v| v.to_string_lossy().trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(name) = string_var(ENV_ARTIFACT_NAME) {
            debug!("{ENV_ARTIFACT_NAME} overrides artifact name: {name}");
            self.artifact.name = name;
        }
        if let Some(version) = string_var(ENV_ARTIFACT_VERSION) {
            debug!("{ENV_ARTIFACT_VERSION} overrides version: {version}");
            self.artifact.version = version;
        }
        if let Some(base_url) = string_var(ENV_ARTIFACT_BASE_URL) {
            self.artifact.base_url = base_url;
        }
        if let Some(ids) = string_var(ENV_PLATFORM_IDS) {
            self.artifact.platform_ids = parse_platform_list(&ids);
        }
        if let Some(root) = lookup(ENV_STAGING_ROOT).filter(|v| !v.is_empty()) {
            self.staging_root = PathBuf::from(root);
        }
        if let Some(paths) = lookup(ENV_DESTINATION_PATHS).filter(|v| !v.is_empty()) {
            self.destinations = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
    }

    /// Validates everything a run depends on before any work starts.
    pub fn validate(&self) -> Result<()> {
        self.artifact.validate()?;
        if self.artifact.parsed_base_url()?.scheme() == "http" && !self.allow_http {
            return Err(ArtError::Config(format!(
                "base URL '{}' uses plain http; set allow_http to permit it",
                self.artifact.base_url
            )));
        }
        if self.staging_root.as_os_str().is_empty() {
            return Err(ArtError::Config("staging root is empty".to_string()));
        }
        if self.destinations.is_empty() {
            return Err(ArtError::Config(
                "no destination paths configured".to_string(),
            ));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(ArtError::Config(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        for id in self.checksums.keys() {
            if !self.artifact.platform_ids.contains(id) {
                return Err(ArtError::Config(format!(
                    "checksum given for unknown platform id '{id}'"
                )));
            }
        }
        Ok(())
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Root of the merged extraction tree inside the staging area.
    pub fn extracted_root(&self) -> PathBuf {
        self.staging_root.join("bin")
    }

    pub fn archive_path(&self, platform_id: &str) -> PathBuf {
        self.staging_root
            .join(ArtifactDescriptor::archive_file_name(platform_id))
    }

    pub fn extraction_subdir(&self, platform_id: &str) -> PathBuf {
        Path::new("bin").join(platform_id)
    }

    pub fn extraction_marker_path(&self, platform_id: &str) -> PathBuf {
        self.staging_root.join(format!(".{platform_id}.extracted"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.staging_root.join("logs")
    }

    pub fn checksum_for(&self, platform_id: &str) -> Option<&str> {
        self.checksums.get(platform_id).map(String::as_str)
    }
}

/// `{sandbox_dir}/{plugin_name}/debugger`, where a sandboxed IDE loads the
/// plugin's native payload from.
pub fn sandbox_destination(sandbox_dir: &Path, plugin_name: &str) -> PathBuf {
    sandbox_dir.join(plugin_name).join("debugger")
}

pub fn parse_platform_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn discover_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    ProjectDirs::from("", "", "artstage")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|p| p.is_file())
}
