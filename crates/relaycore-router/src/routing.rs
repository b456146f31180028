use std::sync::OnceLock;

use regex::Regex;
use relaycore_config::{ConfigSnapshot, TeamConfig};

/// Result of resolving a raw top-level message to a target agent
/// (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingResult {
    pub agent_id: String,
    pub message: String,
    pub is_team: bool,
    /// Set alongside `is_team`: the team the `@token` actually named, as
    /// opposed to `agent_id` which is always a concrete agent (the team's
    /// leader, when `is_team`).
    pub team_id: Option<String>,
}

fn leading_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^(\[[^/\]]+/[^\]]+\]:\s*)?@([^\s@]+)\s*(.*)$").unwrap()
    })
}

fn has_channel_prefix(raw: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[[^/\]]+/[^\]]+\]:").unwrap())
        .is_match(raw)
}

/// Resolve a raw inbound message to a target agent id, per spec.md §4.3.
///
/// Resolution order for the `@token` (case-insensitive): exact agent id,
/// exact team id, agent display name, team display name. A team match
/// routes to the team's leader with `is_team = true`. No match at all
/// (including no leading `@token`) falls back to `agent_id = "default"`
/// with the raw message kept unchanged.
pub fn parse_agent_routing(raw: &str, snapshot: &ConfigSnapshot) -> RoutingResult {
    let Some(caps) = leading_pattern().captures(raw) else {
        return RoutingResult {
            agent_id: "default".to_string(),
            message: raw.to_string(),
            is_team: false,
            team_id: None,
        };
    };

    let prefix = caps.get(1).map_or("", |m| m.as_str());
    let token = caps.get(2).unwrap().as_str();
    let body = caps.get(3).map_or("", |m| m.as_str());
    let token_lower = token.to_lowercase();

    let resolved = snapshot
        .agents
        .values()
        .find(|a| a.id.to_lowercase() == token_lower)
        .map(|a| (a.id.clone(), None))
        .or_else(|| {
            snapshot
                .teams
                .values()
                .find(|t| t.id.to_lowercase() == token_lower)
                .map(|t| (t.leader.clone(), Some(t.id.clone())))
        })
        .or_else(|| {
            snapshot
                .agents
                .values()
                .find(|a| !a.display_name.is_empty() && a.display_name.to_lowercase() == token_lower)
                .map(|a| (a.id.clone(), None))
        })
        .or_else(|| {
            snapshot
                .teams
                .values()
                .find(|t| !t.name.is_empty() && t.name.to_lowercase() == token_lower)
                .map(|t| (t.leader.clone(), Some(t.id.clone())))
        });

    let Some((agent_id, team_id)) = resolved else {
        return RoutingResult {
            agent_id: "default".to_string(),
            message: raw.to_string(),
            is_team: false,
            team_id: None,
        };
    };

    // The channel/sender prefix is stripped from routing but kept in the
    // text the agent sees (spec.md §6: "preserved as context prefix").
    let message = if body.is_empty() && prefix.is_empty() {
        raw.to_string()
    } else if body.is_empty() {
        prefix.trim_end().to_string()
    } else {
        format!("{prefix}{body}")
    };

    RoutingResult {
        agent_id,
        message,
        is_team: team_id.is_some(),
        team_id,
    }
}

/// `parse_agent_routing` plus the initial-message pipeline-leader override
/// (spec.md §4.6 step 4): "if the resolved target is a team and that team
/// has a pipeline, substitute the first sequence agent for the leader."
/// Shared by the Control API (which pre-resolves routing at accept time) and
/// the Dispatcher's own fallback resolution for rows enqueued without a
/// pre-resolved `agent`.
pub fn resolve_initial_routing(raw: &str, snapshot: &ConfigSnapshot) -> RoutingResult {
    let mut result = parse_agent_routing(raw, snapshot);
    if result.is_team {
        if let Some(team) = result.team_id.as_ref().and_then(|id| snapshot.team(id)) {
            if let Some(pipeline) = &team.pipeline {
                if let Some(first) = pipeline.sequence.first() {
                    result.agent_id = first.clone();
                }
            }
        }
    }
    result
}

/// First team, in config-document order, whose membership includes
/// `agent_id`.
pub fn find_team_for_agent<'a>(
    agent_id: &str,
    snapshot: &'a ConfigSnapshot,
) -> Option<(&'a str, &'a TeamConfig)> {
    snapshot
        .teams
        .iter()
        .find(|(_, team)| team.contains(agent_id))
        .map(|(id, team)| (id.as_str(), team))
}
