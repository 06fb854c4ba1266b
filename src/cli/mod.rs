//! Command-line interface.

pub mod commands;
pub mod output;
pub mod scenario;
mod types;

pub use types::{Cli, Commands};

use crate::cli::output::CommandOutput;

#[derive(Debug, serde::Serialize)]
struct ErrorOutput {
    error: String,
    causes: Vec<String>,
}

impl CommandOutput for ErrorOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Error: {}", self.error)];
        lines.extend(self.causes.iter().map(|c| format!("  caused by: {c}")));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Report a failed command and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let report = ErrorOutput {
        error: err.to_string(),
        causes: err.chain().skip(1).map(ToString::to_string).collect(),
    };
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&report.to_json()).unwrap_or_default()
        );
    } else {
        eprintln!("{}", report.to_human());
    }
    std::process::exit(1);
}
