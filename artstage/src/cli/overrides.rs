// artstage/src/cli/overrides.rs
use std::path::PathBuf;

use artstage_common::config::Config;
use clap::Args;
use tracing::debug;

/// Per-invocation settings that win over the config file and environment.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Release version to fetch
    #[arg(long = "version", id = "artifact_version", value_name = "VERSION")]
    pub version: Option<String>,

    /// Platform id to fetch (repeatable, or comma separated)
    #[arg(long = "platform", value_name = "ID", value_delimiter = ',')]
    pub platforms: Vec<String>,

    /// Release host base URL
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    #[arg(long, value_name = "DIR")]
    pub staging_root: Option<PathBuf>,

    /// Destination tree to stage into (repeatable)
    #[arg(long = "dest", value_name = "DIR")]
    pub destinations: Vec<PathBuf>,

    /// Permit plain http release URLs
    #[arg(long)]
    pub allow_http: bool,

    /// Maximum number of concurrent downloads
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(version) = &self.version {
            debug!("--version overrides version: {version}");
            config.artifact.version = version.clone();
        }
        if !self.platforms.is_empty() {
            let platforms: Vec<String> = self
                .platforms
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            // Checksums for platforms outside the selection no longer apply.
            config.checksums.retain(|id, _| platforms.contains(id));
            config.artifact.platform_ids = platforms;
        }
        if let Some(base_url) = &self.base_url {
            config.artifact.base_url = base_url.clone();
        }
        if let Some(root) = &self.staging_root {
            config.staging_root = root.clone();
        }
        if !self.destinations.is_empty() {
            config.destinations = self.destinations.clone();
        }
        if self.allow_http {
            config.allow_http = true;
        }
        if let Some(jobs) = self.jobs {
            config.max_concurrent_downloads = jobs;
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        overrides: Overrides,
    }

    fn parse(args: &[&str]) -> Overrides {
        let mut argv = vec!["artstage"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().overrides
    }

    #[test]
    fn no_flags_leave_config_untouched() {
        let mut config = Config::default();
        parse(&[]).apply(&mut config);
        assert_eq!(config.artifact.version, Config::default().artifact.version);
        assert_eq!(config.destinations, Config::default().destinations);
        assert!(!config.allow_http);
    }

    #[test]
    fn flags_replace_configured_values() {
        let mut config = Config::default();
        parse(&[
            "--version",
            "2.0.1",
            "--platform",
            "win32-x64",
            "--dest",
            "a",
            "--dest",
            "b",
            "--staging-root",
            "scratch",
            "--jobs",
            "1",
            "--allow-http",
        ])
        .apply(&mut config);

        assert_eq!(config.artifact.version, "2.0.1");
        assert_eq!(config.artifact.platform_ids, vec!["win32-x64"]);
        assert_eq!(config.destinations, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(config.staging_root, PathBuf::from("scratch"));
        assert_eq!(config.max_concurrent_downloads, 1);
        assert!(config.allow_http);
    }

    #[test]
    fn platform_selection_drops_unrelated_checksums() {
        let mut config = Config::default();
        config.checksums.insert("win32-x86".to_string(), "aa".repeat(32));
        config.checksums.insert("win32-x64".to_string(), "bb".repeat(32));

        parse(&["--platform", "win32-x64,linux-x64"]).apply(&mut config);

        assert_eq!(config.artifact.platform_ids, vec!["win32-x64", "linux-x64"]);
        assert_eq!(config.checksums.len(), 1);
        assert!(config.checksums.contains_key("win32-x64"));
        assert!(config.validate().is_ok());
    }
}
