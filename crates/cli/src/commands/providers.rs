use anyhow::Result;
use clap::Args;
use console::style;
use llm::{HealthState, LlmRuntime, ProviderSummary};

#[derive(Debug, Args)]
pub struct ProvidersCommand {
    #[arg(long)]
    pub json: bool,
}

impl ProvidersCommand {
    pub async fn execute(&self, runtime: &LlmRuntime) -> Result<()> {
        let providers = runtime.list_providers().await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&providers)?);
            return Ok(());
        }

        if providers.is_empty() {
            println!("No providers registered");
            return Ok(());
        }
        println!(
            "{:<20} {:<10} {:<7} {:<28} {:<10} {}",
            "ID", "TYPE", "MODE", "MODEL", "ROLE", "STATUS"
        );
        for provider in &providers {
            println!("{}", row(provider));
        }
        Ok(())
    }
}

pub(crate) fn status_label(state: HealthState) -> String {
    match state {
        HealthState::Healthy => style("healthy").green().to_string(),
        HealthState::Unhealthy => style("unhealthy").red().bold().to_string(),
        HealthState::Unknown => style("unknown").dim().to_string(),
    }
}

fn row(provider: &ProviderSummary) -> String {
    let role = provider
        .role
        .map(|role| role.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<20} {:<10} {:<7} {:<28} {:<10} {}",
        provider.id,
        provider.provider_type.to_string(),
        provider.deployment_mode.to_string(),
        provider.model,
        role,
        status_label(provider.status)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm::{DeploymentMode, ProviderType, RouteRole};

    #[test]
    fn test_row_layout() {
        console::set_colors_enabled(false);
        let summary = ProviderSummary {
            id: "zhipu-main".to_string(),
            name: "Zhipu".to_string(),
            provider_type: ProviderType::Zhipu,
            deployment_mode: DeploymentMode::Cloud,
            model: "glm-4-flash".to_string(),
            status: HealthState::Unknown,
            role: Some(RouteRole::Fallback),
        };

        let line = row(&summary);
        assert!(line.starts_with("zhipu-main "));
        assert!(line.contains("fallback"));
        assert!(line.ends_with("unknown"));
    }
}
