pub mod generate;
pub mod health;
pub mod providers;

pub use generate::GenerateCommand;
pub use health::HealthCommand;
pub use providers::ProvidersCommand;
