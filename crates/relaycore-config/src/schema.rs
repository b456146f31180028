use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_messages() -> u32 {
    50
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Preserves document order so routing's "first team in iteration
    /// order" (spec.md §4.3) is stable across reloads, not shuffled by a
    /// hash-map seed.
    #[serde(default)]
    pub agents: IndexMap<String, AgentConfig>,
    #[serde(default)]
    pub teams: IndexMap<String, TeamConfig>,
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Legacy top-level model section. When `agents` is empty a single
    /// implicit `default` agent is synthesized from this for backward
    /// compatibility (spec.md §4.2).
    #[serde(default)]
    pub model: Option<LegacyModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyModelConfig {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_workspace")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

impl AgentConfig {
    /// The implicit `default` agent synthesized when no agents are
    /// configured (spec.md §4.2).
    pub fn synthesize_default(legacy: Option<&LegacyModelConfig>) -> Self {
        let (provider, model) = legacy
            .map(|l| (l.provider.clone(), l.model.clone()))
            .unwrap_or_default();
        Self {
            id: "default".to_string(),
            display_name: "Default".to_string(),
            provider,
            model,
            working_dir: default_workspace(),
            system_prompt: None,
            prompt_file: None,
            reasoning_effort: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ordered sequence of agent ids, a subset of the team's members.
    pub sequence: Vec<String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub max_loops: u32,
}

impl PipelineConfig {
    pub fn index_of(&self, agent_id: &str) -> Option<usize> {
        self.sequence.iter().position(|a| a == agent_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub members: Vec<String>,
    pub leader: String,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
}

impl TeamConfig {
    pub fn contains(&self, agent_id: &str) -> bool {
        self.members.iter().any(|m| m == agent_id)
    }
}
