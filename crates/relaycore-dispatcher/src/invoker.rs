use std::path::PathBuf;

use async_trait::async_trait;
use relaycore_config::AgentConfig;

/// One call into an agent back-end (spec.md §4.4). The core treats this as
/// a potentially long-running, fallible capability it does not control.
pub struct InvokeRequest {
    pub agent: AgentConfig,
    pub prompt: String,
    pub working_dir: PathBuf,
    /// Start a fresh session, discarding any prior context the back-end may
    /// hold for this agent.
    pub reset: bool,
}

/// Abstract `invoke(agent, prompt, workingDir, reset) -> text` capability
/// (spec.md §4.4, C4). Real provider integration is out of scope for this
/// core; implementations plug in behind this trait.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, req: InvokeRequest) -> anyhow::Result<String>;
}

/// Deterministic mock invoker for tests and `relaycore serve --mock`: echoes
/// the prompt back, tagged with the agent id and whether this was a reset.
pub struct EchoInvoker;

#[async_trait]
impl Invoker for EchoInvoker {
    async fn invoke(&self, req: InvokeRequest) -> anyhow::Result<String> {
        let tag = if req.reset { " (reset)" } else { "" };
        Ok(format!("[echo from {}{}]: {}", req.agent.id, tag, req.prompt))
    }
}
