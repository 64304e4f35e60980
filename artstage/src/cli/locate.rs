// artstage/src/cli/locate.rs
use artstage_common::config::Config;
use artstage_common::error::{ArtError, Result};
use artstage_common::model::DownloadTask;
use artstage_core::locate_with_config;
use clap::Args;
use colored::Colorize;
use serde_json::json;

use super::overrides::Overrides;

#[derive(Debug, Args)]
pub struct LocateArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

impl LocateArgs {
    pub fn run(&self, config: &Config) -> Result<()> {
        config.validate()?;
        let tasks = locate_with_config(config)?;

        if self.json {
            let rendered = serde_json::to_string_pretty(&plan_json(config, &tasks))
                .map_err(|e| ArtError::Generic(format!("failed to render plan: {e}")))?;
            println!("{rendered}");
            return Ok(());
        }

        println!(
            "{} {} {}",
            "==>".bold().blue(),
            config.artifact.name.bold(),
            config.artifact.version.cyan()
        );
        for task in &tasks {
            let cached = if task.destination_path.is_file() {
                " (cached)".dimmed().to_string()
            } else {
                String::new()
            };
            println!("{:<12} {}", task.platform_id.cyan(), task.url);
            println!("{:<12} {}{}", "", task.destination_path.display(), cached);
        }
        for destination in &config.destinations {
            println!("{:<12} {}", "dest".dimmed(), destination.display());
        }
        Ok(())
    }
}

fn plan_json(config: &Config, tasks: &[DownloadTask]) -> serde_json::Value {
    json!({
        "artifact": config.artifact,
        "staging_root": config.staging_root,
        "destinations": config.destinations,
        "downloads": tasks
            .iter()
            .map(|task| json!({
                "platform_id": task.platform_id,
                "url": task.url,
                "destination": task.destination_path,
                "sha256": task.sha256,
                "cached": task.destination_path.is_file(),
            }))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use artstage_common::model::ArtifactDescriptor;

    use super::*;

    #[test]
    fn json_plan_lists_every_platform() {
        let config = Config {
            artifact: ArtifactDescriptor::new(
                "dbg",
                "1.0",
                vec!["win32-x86".to_string(), "win32-x64".to_string()],
                "https://example/releases",
            ),
            ..Config::default()
        };
        let tasks = locate_with_config(&config).unwrap();
        let plan = plan_json(&config, &tasks);

        let downloads = plan["downloads"].as_array().unwrap();
        assert_eq!(downloads.len(), 2);
        assert_eq!(
            downloads[1]["url"],
            "https://example/releases/releases/download/1.0/win32-x64.zip"
        );
        assert_eq!(plan["artifact"]["version"], "1.0");
    }
}
