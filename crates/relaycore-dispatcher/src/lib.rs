mod chains;
mod context;
mod dispatcher;
mod invoker;
mod process;

pub use context::DispatcherContext;
pub use dispatcher::Dispatcher;
pub use invoker::{EchoInvoker, InvokeRequest, Invoker};
pub use process::process_message;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use relaycore_config::{AgentConfig, Config, ConfigProvider, PipelineConfig, TeamConfig};
    use relaycore_conversation::ConversationManager;
    use relaycore_events::EventBus;
    use relaycore_queue::{NewMessage, QueueStore, SqliteQueueStore};

    async fn write_config(agents: Vec<AgentConfig>, teams: Vec<TeamConfig>) -> (tempfile::TempDir, ConfigProvider) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let cfg = Config {
            agents: agents.into_iter().map(|a| (a.id.clone(), a)).collect(),
            teams: teams.into_iter().map(|t| (t.id.clone(), t)).collect(),
            workspace: dir.path().to_path_buf(),
            model: None,
        };
        std::fs::write(&path, serde_yaml::to_string(&cfg).unwrap()).unwrap();
        (dir, ConfigProvider::new(path))
    }

    fn agent(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            display_name: id.to_string(),
            provider: "mock".into(),
            model: "mock".into(),
            working_dir: PathBuf::from("."),
            system_prompt: None,
            prompt_file: None,
            reasoning_effort: None,
        }
    }

    async fn test_context(agents: Vec<AgentConfig>, teams: Vec<TeamConfig>) -> (Arc<DispatcherContext>, tempfile::TempDir) {
        let (cfg_dir, provider) = write_config(agents, teams).await;
        let queue: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
        let events = EventBus::new();
        let conversations = Arc::new(ConversationManager::new(Arc::clone(&queue), events.clone()));
        let ctx = Arc::new(DispatcherContext {
            config: Arc::new(provider),
            queue,
            events,
            conversations,
            invoker: Arc::new(EchoInvoker),
            output_dir: cfg_dir.path().join("outputs"),
        });
        (ctx, cfg_dir)
    }

    #[tokio::test]
    async fn single_agent_message_produces_one_response() {
        let (ctx, _dir) = test_context(vec![agent("writer")], vec![]).await;
        let id = ctx
            .queue
            .enqueue_message(NewMessage {
                external_id: "m1".into(),
                channel: "cli".into(),
                sender: "alice".into(),
                body: "@writer draft something".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let msg = ctx.queue.claim_next_message("writer").await.unwrap();
        assert!(msg.is_none()); // not yet routed to an agent id until processed once; claim by "default" below
        let pending = ctx.queue.claim_next_message("default").await.unwrap().unwrap();
        assert_eq!(pending.id, id);
        process_message(Arc::clone(&ctx), pending).await.unwrap();
        let pending_responses = ctx.queue.pending_responses_for_channel("cli").await.unwrap();
        assert_eq!(pending_responses.len(), 1);
        assert!(pending_responses[0].body.contains("echo from writer"));
    }

    #[tokio::test]
    async fn team_routed_message_creates_and_completes_conversation() {
        let team = TeamConfig {
            id: "pubteam".into(),
            name: "Publishing".into(),
            members: vec!["writer".into()],
            leader: "writer".into(),
            pipeline: None,
            max_messages: 50,
        };
        let (ctx, _dir) = test_context(vec![agent("writer")], vec![team]).await;
        ctx.queue
            .enqueue_message(NewMessage {
                external_id: "m1".into(),
                channel: "cli".into(),
                sender: "alice".into(),
                body: "@pubteam start the job".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let claimed = ctx.queue.claim_next_message("default").await.unwrap().unwrap();
        process_message(Arc::clone(&ctx), claimed).await.unwrap();
        let responses = ctx.queue.pending_responses_for_channel("cli").await.unwrap();
        assert_eq!(responses.len(), 1);
        assert!(ctx.conversations.ids().await.is_empty());
    }

    #[tokio::test]
    async fn strict_pipeline_hands_off_through_full_sequence() {
        let team = TeamConfig {
            id: "pubteam".into(),
            name: "Publishing".into(),
            members: vec!["writer".into(), "editor".into()],
            leader: "writer".into(),
            pipeline: Some(PipelineConfig {
                sequence: vec!["writer".into(), "editor".into()],
                strict: true,
                max_loops: 0,
            }),
            max_messages: 50,
        };
        let (ctx, _dir) = test_context(vec![agent("writer"), agent("editor")], vec![team]).await;
        ctx.queue
            .enqueue_message(NewMessage {
                external_id: "m1".into(),
                channel: "cli".into(),
                sender: "alice".into(),
                body: "@pubteam ship the release".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let claimed = ctx.queue.claim_next_message("default").await.unwrap().unwrap();
        process_message(Arc::clone(&ctx), claimed).await.unwrap();
        assert!(ctx.queue.pending_responses_for_channel("cli").await.unwrap().is_empty());

        let claimed = ctx.queue.claim_next_message("editor").await.unwrap().unwrap();
        process_message(Arc::clone(&ctx), claimed).await.unwrap();
        let responses = ctx.queue.pending_responses_for_channel("cli").await.unwrap();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].body.contains("@writer"));
        assert!(responses[0].body.contains("@editor"));
    }
}
