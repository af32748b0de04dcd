use clap::{Parser, Subcommand};

/// Object detection API server and training pipeline runner.
#[derive(Parser, Debug)]
#[command(name = "objdet-server", about = "Object detection API and training pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Run the training pipeline once and print the artifact as JSON
    Train {
        /// Reuse a run directory instead of generating a new id
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Validate configuration and exit non-zero on problems
    CheckConfig,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
