mod mentions;
mod pipeline;
mod routing;

pub use mentions::{extract_teammate_mentions, strip_mention_tags};
pub use pipeline::{filter_mentions_for_pipeline, get_next_pipeline_agent, get_pipeline_loop_target};
pub use routing::{find_team_for_agent, parse_agent_routing, resolve_initial_routing, RoutingResult};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use indexmap::IndexMap;
    use relaycore_config::{AgentConfig, ConfigSnapshot, PipelineConfig, TeamConfig};

    fn agent(id: &str, display_name: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            display_name: display_name.to_string(),
            provider: String::new(),
            model: String::new(),
            working_dir: ".".into(),
            system_prompt: None,
            prompt_file: None,
            reasoning_effort: None,
        }
    }

    fn snapshot(agents: Vec<AgentConfig>, teams: Vec<TeamConfig>) -> ConfigSnapshot {
        ConfigSnapshot {
            agents: Arc::new(agents.into_iter().map(|a| (a.id.clone(), a)).collect::<IndexMap<_, _>>()),
            teams: Arc::new(teams.into_iter().map(|t| (t.id.clone(), t)).collect::<IndexMap<_, _>>()),
            workspace: ".".into(),
        }
    }

    #[test]
    fn routes_by_exact_agent_id() {
        let snap = snapshot(vec![agent("writer", "Writer")], vec![]);
        let r = parse_agent_routing("@writer draft the memo", &snap);
        assert_eq!(r.agent_id, "writer");
        assert_eq!(r.message, "draft the memo");
        assert!(!r.is_team);
    }

    #[test]
    fn routes_by_display_name_case_insensitive() {
        let snap = snapshot(vec![agent("writer", "Writer")], vec![]);
        let r = parse_agent_routing("@WRITER go", &snap);
        assert_eq!(r.agent_id, "writer");
    }

    #[test]
    fn routes_to_team_leader() {
        let snap = snapshot(
            vec![agent("writer", "Writer"), agent("editor", "Editor")],
            vec![TeamConfig {
                id: "pubteam".into(),
                name: "Publishing".into(),
                members: vec!["writer".into(), "editor".into()],
                leader: "writer".into(),
                pipeline: None,
                max_messages: 50,
            }],
        );
        let r = parse_agent_routing("@pubteam ship it", &snap);
        assert_eq!(r.agent_id, "writer");
        assert!(r.is_team);
    }

    #[test]
    fn unknown_token_falls_back_to_default_with_raw_message() {
        let snap = snapshot(vec![agent("writer", "Writer")], vec![]);
        let raw = "@nobody please help";
        let r = parse_agent_routing(raw, &snap);
        assert_eq!(r.agent_id, "default");
        assert_eq!(r.message, raw);
    }

    #[test]
    fn no_leading_token_falls_back_to_default() {
        let snap = snapshot(vec![agent("writer", "Writer")], vec![]);
        let raw = "just a plain message";
        let r = parse_agent_routing(raw, &snap);
        assert_eq!(r.agent_id, "default");
        assert_eq!(r.message, raw);
    }

    #[test]
    fn empty_body_without_channel_prefix_keeps_raw_as_message() {
        let snap = snapshot(vec![agent("writer", "Writer")], vec![]);
        let raw = "@writer";
        let r = parse_agent_routing(raw, &snap);
        assert_eq!(r.agent_id, "writer");
        assert_eq!(r.message, raw);
    }

    #[test]
    fn channel_prefix_is_stripped_from_routing_but_kept_in_message() {
        let snap = snapshot(vec![agent("writer", "Writer")], vec![]);
        let r = parse_agent_routing("[cli/alice]: @writer hi", &snap);
        assert_eq!(r.agent_id, "writer");
        assert_eq!(r.message, "[cli/alice]: hi");
    }

    #[test]
    fn resolve_initial_routing_overrides_leader_with_first_pipeline_agent() {
        let team = TeamConfig {
            id: "dev".into(),
            name: "Dev".into(),
            members: vec!["po".into(), "coder".into(), "reviewer".into()],
            leader: "reviewer".into(),
            pipeline: Some(PipelineConfig {
                sequence: vec!["po".into(), "coder".into(), "reviewer".into()],
                strict: true,
                max_loops: 0,
            }),
            max_messages: 50,
        };
        let snap = snapshot(
            vec![agent("po", "PO"), agent("coder", "Coder"), agent("reviewer", "Reviewer")],
            vec![team],
        );
        let r = resolve_initial_routing("@dev build feature X", &snap);
        assert_eq!(r.agent_id, "po");
        assert_eq!(r.team_id.as_deref(), Some("dev"));
    }

    #[test]
    fn resolve_initial_routing_keeps_leader_when_team_has_no_pipeline() {
        let team = TeamConfig {
            id: "pubteam".into(),
            name: "Publishing".into(),
            members: vec!["writer".into()],
            leader: "writer".into(),
            pipeline: None,
            max_messages: 50,
        };
        let snap = snapshot(vec![agent("writer", "Writer")], vec![team]);
        let r = resolve_initial_routing("@pubteam go", &snap);
        assert_eq!(r.agent_id, "writer");
    }

    #[test]
    fn find_team_for_agent_locates_membership() {
        let team = TeamConfig {
            id: "pubteam".into(),
            name: "Publishing".into(),
            members: vec!["writer".into()],
            leader: "writer".into(),
            pipeline: None,
            max_messages: 50,
        };
        let snap = snapshot(vec![agent("writer", "Writer")], vec![team]);
        let found = find_team_for_agent("writer", &snap);
        assert_eq!(found.unwrap().0, "pubteam");
        assert!(find_team_for_agent("ghost", &snap).is_none());
    }

    #[test]
    fn extract_mentions_builds_shared_context_and_dedupes() {
        let team = TeamConfig {
            id: "pubteam".into(),
            name: "Publishing".into(),
            members: vec!["writer".into(), "editor".into(), "proofer".into()],
            leader: "writer".into(),
            pipeline: None,
            max_messages: 50,
        };
        let snap = snapshot(
            vec![agent("writer", "Writer"), agent("editor", "Editor"), agent("proofer", "Proofer")],
            vec![team],
        );
        let response = "Draft done. [@editor,proofer: please review] rest of my notes [@editor: thanks again]";
        let mentions = extract_teammate_mentions(response, "writer", "pubteam", &snap);
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].0, "editor");
        assert_eq!(mentions[1].0, "proofer");
        assert!(mentions[0].1.contains("Directed to you:\nplease review"));
        assert!(mentions[0].1.starts_with("Draft done."));
    }

    #[test]
    fn extract_mentions_drops_self_and_non_members() {
        let team = TeamConfig {
            id: "pubteam".into(),
            name: "Publishing".into(),
            members: vec!["writer".into(), "editor".into()],
            leader: "writer".into(),
            pipeline: None,
            max_messages: 50,
        };
        let snap = snapshot(
            vec![agent("writer", "Writer"), agent("editor", "Editor"), agent("outsider", "Outsider")],
            vec![team],
        );
        let response = "[@writer,outsider,editor: go]";
        let mentions = extract_teammate_mentions(response, "writer", "pubteam", &snap);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].0, "editor");
    }

    #[test]
    fn pipeline_next_agent_and_loop_back() {
        let pipeline = PipelineConfig {
            sequence: vec!["a".into(), "b".into(), "c".into()],
            strict: false,
            max_loops: 2,
        };
        assert_eq!(get_next_pipeline_agent(&pipeline, "a"), Some("b".to_string()));
        assert_eq!(get_next_pipeline_agent(&pipeline, "c"), None);
        assert!(get_pipeline_loop_target(&pipeline, "c", "a", 0));
        assert!(!get_pipeline_loop_target(&pipeline, "c", "a", 2));
        assert!(!get_pipeline_loop_target(&pipeline, "a", "c", 0));
    }

    #[test]
    fn filter_mentions_keeps_next_and_loop_back_only() {
        let pipeline = PipelineConfig {
            sequence: vec!["a".into(), "b".into(), "c".into()],
            strict: false,
            max_loops: 1,
        };
        let mentions = vec![
            ("b".to_string(), "next".to_string()),
            ("a".to_string(), "loopback".to_string()),
            ("c".to_string(), "skip-ahead".to_string()),
        ];
        let filtered = filter_mentions_for_pipeline(&mentions, &pipeline, "a", 0);
        let targets: Vec<_> = filtered.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(targets, vec!["b"]);
    }
}
