// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dockr")]
#[command(about = "Declarative container stacks for Docker and Podman")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter dockr.yml
    Init {
        /// Unit name (defaults to the directory name)
        #[arg(short, long)]
        unit: Option<String>,

        /// Overwrite an existing dockr.yml
        #[arg(short, long)]
        force: bool,
    },

    /// Show what apply would change
    Plan,

    /// Bring the runtime in line with dockr.yml
    Apply {
        /// Break an existing apply lock
        #[arg(long)]
        force_unlock: bool,
    },

    /// Remove everything recorded for the unit
    Destroy {
        /// Break an existing apply lock
        #[arg(long)]
        force_unlock: bool,
    },

    /// Inspect recorded resources in the runtime
    Status,
}
