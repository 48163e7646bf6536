use anyhow::{bail, Result};
use clap::Args;
use common::OperationTimer;
use console::{style, Term};
use llm::{GenerationOptions, GenerationResult, LlmRuntime};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::progress::Spinner;

#[derive(Debug, Args)]
pub struct GenerateCommand {
    /// Prompt text; read from stdin when omitted
    pub prompt: Option<String>,

    /// Call this provider directly instead of the active one (no failover)
    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long)]
    pub system: Option<String>,

    /// Override the provider's configured model
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Stop sequence; may be repeated
    #[arg(long)]
    pub stop: Vec<String>,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,

    /// Print per-provider request counts afterwards
    #[arg(long)]
    pub show_usage: bool,
}

impl GenerateCommand {
    pub fn options(&self) -> GenerationOptions {
        let mut options = GenerationOptions::new().with_parameters(self.max_tokens, self.temperature);
        if let Some(system) = &self.system {
            options = options.with_system_prompt(system);
        }
        if let Some(model) = &self.model {
            options = options.with_model(model);
        }
        for stop in &self.stop {
            options = options.with_stop(stop);
        }
        options
    }

    pub async fn execute(&self, runtime: &LlmRuntime) -> Result<()> {
        let prompt = match &self.prompt {
            Some(prompt) => prompt.clone(),
            None => {
                let mut buffer = String::new();
                tokio::io::stdin().read_to_string(&mut buffer).await?;
                buffer
            }
        };
        if prompt.trim().is_empty() {
            bail!("prompt is empty");
        }

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let mut timer = OperationTimer::new("generate");
        timer.add_field("provider_override", &self.provider);
        let spinner = Spinner::start("Generating", !self.json && Term::stderr().is_term());
        let result = runtime
            .generate_cancellable(&prompt, &self.options(), self.provider.as_deref(), &cancel)
            .await;
        spinner.finish();
        watcher.abort();
        timer.finish_with_result(&result);

        let result = result?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            println!("{}", result.text);
            eprintln!("{}", style(describe(&result)).dim());
        }

        if self.show_usage {
            for (id, count) in runtime.get_usage_stats().await? {
                eprintln!("{id}: {count}");
            }
        }
        Ok(())
    }
}

fn describe(result: &GenerationResult) -> String {
    let mut line = format!("{} · {} · {} ms", result.provider_id, result.model, result.latency_ms);
    if let Some(usage) = &result.usage {
        line.push_str(&format!(" · {} tokens", usage.total_tokens));
    }
    if result.degraded {
        line.push_str(" · served by fallback");
    }
    if result.cached {
        line.push_str(" · cached");
    }
    line
}
