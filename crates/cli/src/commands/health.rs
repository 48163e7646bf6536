use anyhow::Result;
use clap::Args;
use console::style;
use llm::{HealthStatus, LlmRuntime};
use serde::Serialize;

use super::providers::status_label;

#[derive(Debug, Args)]
pub struct HealthCommand {
    /// Only report this provider
    pub id: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    id: String,
    #[serde(flatten)]
    status: Option<HealthStatus>,
}

impl HealthCommand {
    /// Runs one probe round, then reports what the board recorded.
    pub async fn execute(&self, runtime: &LlmRuntime) -> Result<()> {
        let transitions = runtime.monitor().check_now().await;
        tracing::debug!(transitions = transitions.len(), "Health probe round finished");

        let ids = match &self.id {
            Some(id) => vec![id.clone()],
            None => runtime.manager().provider_ids().await?,
        };
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            let status = runtime.get_health(&id).await?;
            reports.push(HealthReport { id, status });
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
            return Ok(());
        }
        for report in &reports {
            println!("{}", line(report));
        }
        Ok(())
    }
}

fn line(report: &HealthReport) -> String {
    match &report.status {
        Some(status) => {
            let mut line = format!("{:<20} {}", report.id, status_label(status.state()));
            if status.consecutive_failures > 0 {
                line.push_str(&format!(" ({} consecutive failures)", status.consecutive_failures));
            }
            if let Some(error) = &status.last_error {
                line.push_str(&format!(" {}", style(error).dim()));
            }
            line
        }
        None => format!("{:<20} {}", report.id, style("unknown").dim()),
    }
}
