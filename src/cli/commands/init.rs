//! Implementation of the `reasonflow init` command.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::setup::{initialize, SetupPaths};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub initialized_path: PathBuf,
    pub config_file: Option<PathBuf>,
    pub database_file: Option<PathBuf>,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Initialized reasonflow in {}",
            self.initialized_path.display()
        )];
        match &self.config_file {
            Some(path) => lines.push(format!("  wrote {}", path.display())),
            None => lines.push("  kept existing configuration (use --force to overwrite)".into()),
        }
        match &self.database_file {
            Some(path) => lines.push(format!("  created {}", path.display())),
            None => lines.push("  migrated existing database".to_string()),
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let paths = match &args.path {
        Some(path) => SetupPaths::in_dir(path),
        None => SetupPaths::new()?,
    };
    let report = initialize(&paths, args.force).await?;

    let out = InitOutput {
        initialized_path: paths
            .config_dir
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default(),
        config_file: report.config_file,
        database_file: report.database_file,
    };
    output(&out, json_mode);
    Ok(())
}
