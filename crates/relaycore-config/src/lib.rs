mod loader;
mod provider;
mod schema;

pub use loader::{default_config_path, load};
pub use provider::{ConfigProvider, ConfigSnapshot, MAX_CACHE_TTL};
pub use schema::{AgentConfig, Config, LegacyModelConfig, PipelineConfig, TeamConfig};
