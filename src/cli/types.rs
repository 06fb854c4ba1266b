//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{
    init::InitArgs, picker::PickerArgs, reevaluate::ReevaluateArgs, run::RunArgs,
    slots::SlotsArgs,
};

#[derive(Parser, Debug)]
#[command(name = "reasonflow")]
#[command(about = "Reasonflow - reason assignment and consolidation engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file, instead of .reasonflow/config.yaml and local.yaml
    #[arg(short, long, global = true, env = "REASONFLOW_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .reasonflow/ with a default configuration and database
    Init(InitArgs),

    /// Play a scenario file through the worker pool and print the slots
    Run(RunArgs),

    /// List stored reason slots of a machine
    Slots(SlotsArgs),

    /// Re-evaluate the stored slots of a machine over a period
    Reevaluate(ReevaluateArgs),

    /// List the reasons an operator may pick for a machine at an instant
    Picker(PickerArgs),

    /// Print the effective configuration
    Config,
}
