//! `llm-switch` command-line front end for the provider runtime.

pub mod bootstrap;
pub mod commands;
pub mod progress;

pub use bootstrap::{build_runtime, load_runtime_config, parse_providers, ProviderEntry};
pub use commands::{GenerateCommand, HealthCommand, ProvidersCommand};
