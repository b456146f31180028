use std::sync::OnceLock;

use regex::Regex;
use relaycore_config::ConfigSnapshot;

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[@([^:\]]+):\s*([^\]]*)\]").unwrap())
}

/// Remove every `[@a[,b,c]: body]` tag from `text`, leaving the surrounding
/// prose untouched. Used once a branch's mentions have already been
/// extracted and enqueued, so the aggregated reply doesn't leak routing tags.
pub fn strip_mention_tags(text: &str) -> String {
    tag_pattern().replace_all(text, "").to_string()
}

/// Scan `response` for `[@a[,b,c]: body]` tags and produce one outgoing
/// mention per valid target teammate, per spec.md §4.3.
///
/// Each tag's body is shared with every target named in that tag, prefixed
/// with everything the agent said outside of any tag (`sharedContext`).
/// Invalid targets (self, unconfigured agent, not a member of `team_id`)
/// are dropped; repeated targets collapse to their first occurrence.
pub fn extract_teammate_mentions(
    response: &str,
    current_agent_id: &str,
    team_id: &str,
    snapshot: &ConfigSnapshot,
) -> Vec<(String, String)> {
    let pattern = tag_pattern();
    let shared_context = pattern.replace_all(response, "").trim().to_string();

    let team = snapshot.team(team_id);
    let mut seen = Vec::new();
    let mut out = Vec::new();

    for caps in pattern.captures_iter(response) {
        let targets = caps.get(1).unwrap().as_str();
        let direct_body = caps.get(2).map_or("", |m| m.as_str()).trim();

        for target in targets.split(',').map(|t| t.trim()) {
            if target.is_empty() || target == current_agent_id {
                continue;
            }
            if seen.iter().any(|s: &String| s == target) {
                continue;
            }
            if !snapshot.agents.contains_key(target) {
                continue;
            }
            if let Some(team) = team {
                if !team.contains(target) {
                    continue;
                }
            } else {
                continue;
            }

            let message = if shared_context.is_empty() {
                direct_body.to_string()
            } else {
                format!("{shared_context}\n\n------\n\nDirected to you:\n{direct_body}")
            };
            seen.push(target.to_string());
            out.push((target.to_string(), message));
        }
    }

    out
}
