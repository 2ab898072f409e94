//! Completions command - generate shell completion scripts
//!
//! Usage: `chartsync completions bash > ~/.local/share/bash-completion/completions/chartsync`

use std::io;

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::Shell;

use crate::output::OutputFormat;

/// Generate a completion script for a shell
#[derive(Debug, Args)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsCommand {
    pub async fn execute(&self, _format: OutputFormat) -> Result<()> {
        let mut command = crate::Cli::command();
        clap_complete::generate(self.shell, &mut command, "chartsync", &mut io::stdout());
        Ok(())
    }
}
