//! Agent commands - control a running chartsyncd over D-Bus

use anyhow::Result;
use clap::Subcommand;

use chartsync_ipc::{AgentClient, AgentStatus, IpcError};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Show the agent's state and queue depths
    Status,
    /// Ask the agent to drain now
    Trigger,
    /// Pause scheduled and triggered drains
    Pause,
    /// Resume drains after a pause
    Resume,
}

impl AgentCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format.is_json());

        let client = match AgentClient::connect().await {
            Ok(client) => client,
            Err(IpcError::AgentNotRunning) => {
                formatter.error("The ChartSync agent is not running. Start it with 'chartsyncd'.");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match self {
            AgentCommand::Status => {
                let status = client.status().await?;
                display_status(&status, format, &*formatter);
            }
            AgentCommand::Trigger => {
                client.trigger_drain().await?;
                formatter.success("Drain requested");
            }
            AgentCommand::Pause => {
                client.pause().await?;
                formatter.success("Drains paused");
                formatter.info("Queued records stay local until 'chartsync agent resume'.");
            }
            AgentCommand::Resume => {
                client.resume().await?;
                formatter.success("Drains resumed");
            }
        }
        Ok(())
    }
}

fn display_status(status: &AgentStatus, format: OutputFormat, formatter: &dyn OutputFormatter) {
    if format.is_json() {
        match serde_json::to_value(status) {
            Ok(value) => formatter.print_json(&value),
            Err(e) => formatter.error(&format!("Failed to serialize the agent status: {e}")),
        }
        return;
    }

    formatter.success(&format!("Agent is {}", status.state));
    formatter.info(&format!(
        "Connectivity: {}",
        if status.online { "online" } else { "offline" }
    ));
    if status.queued.is_empty() {
        formatter.info("Queues: empty");
    } else {
        for (collection, count) in &status.queued {
            formatter.info(&format!("Queued {collection}: {count}"));
        }
        formatter.info(&format!("Total queued: {}", status.total_queued()));
    }
    match &status.last_drain {
        Some(digest) => formatter.info(&format!("Last drain: {digest}")),
        None => formatter.info("Last drain: none since start"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_command_variants() {
        let commands = [
            AgentCommand::Status,
            AgentCommand::Trigger,
            AgentCommand::Pause,
            AgentCommand::Resume,
        ];
        assert_eq!(commands.len(), 4);
    }
}
