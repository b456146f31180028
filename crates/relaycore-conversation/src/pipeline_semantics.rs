use relaycore_events::{Event, EventBus, EventKind};
use relaycore_router::{filter_mentions_for_pipeline, get_next_pipeline_agent, get_pipeline_loop_target};

use crate::conversation::Conversation;

/// Apply pipeline semantics to a branch's raw teammate mentions before they
/// are enqueued, per spec.md §4.5. Mutates `conv.pipeline_step` /
/// `conv.pipeline_loops` as a side effect, publishes the `pipeline:step` /
/// `pipeline:loop` / `pipeline:complete` events (spec.md §4.8), and returns
/// the mentions that should actually be enqueued.
///
/// Non-strict pipelines can in principle surface a response that both
/// advances to the next agent and loops back to an earlier one in the same
/// turn; `extractTeammateMentions` already collapses duplicate targets, so
/// each surviving mention updates the step/loop counters independently and
/// the last one processed wins if multiple apply. That residual ambiguity
/// is accepted rather than specified away — see DESIGN.md.
pub fn apply_pipeline_semantics(
    conv: &mut Conversation,
    current_agent_id: &str,
    raw_mentions: Vec<(String, String)>,
    events: &EventBus,
) -> Vec<(String, String)> {
    let Some(pipeline) = conv.team_context.pipeline.clone() else {
        // No pipeline: mentions pass through unfiltered (validity already
        // enforced by `extractTeammateMentions`).
        return raw_mentions;
    };
    let team_id = conv.team_context.team_id.clone();

    if pipeline.strict {
        // Strict: discard whatever the agent mentioned; synthesize a single
        // handoff to the next sequence agent instead.
        let is_last = pipeline.index_of(current_agent_id) == Some(pipeline.sequence.len() - 1);
        if is_last || conv.total_messages >= conv.max_messages {
            events.publish(Event::new(EventKind::PipelineComplete {
                conversation_id: conv.id.clone(),
                team_id,
                total: conv.total_messages,
            }));
            return Vec::new();
        }
        let Some(next) = get_next_pipeline_agent(&pipeline, current_agent_id) else {
            events.publish(Event::new(EventKind::PipelineComplete {
                conversation_id: conv.id.clone(),
                team_id,
                total: conv.total_messages,
            }));
            return Vec::new();
        };
        let last_response = conv
            .responses
            .last()
            .map(|(_, text)| text.clone())
            .unwrap_or_default();
        let body = format!(
            "[Original request]:\n{}\n\n[Output from @{}]:\n{}",
            conv.original_message, current_agent_id, last_response
        );
        conv.pipeline_step += 1;
        events.publish(Event::new(EventKind::PipelineStep {
            conversation_id: conv.id.clone(),
            team_id,
            agent_id: next.clone(),
            step: conv.pipeline_step,
        }));
        vec![(next, body)]
    } else {
        let filtered = filter_mentions_for_pipeline(&raw_mentions, &pipeline, current_agent_id, conv.pipeline_loops);
        for (target, _) in &filtered {
            if get_pipeline_loop_target(&pipeline, current_agent_id, target, conv.pipeline_loops) {
                conv.pipeline_loops += 1;
                if let Some(idx) = pipeline.index_of(target) {
                    conv.pipeline_step = idx;
                }
                events.publish(Event::new(EventKind::PipelineLoop {
                    conversation_id: conv.id.clone(),
                    team_id: team_id.clone(),
                    loop_count: conv.pipeline_loops,
                    max_loops: pipeline.max_loops,
                }));
            } else if let Some(idx) = pipeline.index_of(target) {
                conv.pipeline_step = idx;
                events.publish(Event::new(EventKind::PipelineStep {
                    conversation_id: conv.id.clone(),
                    team_id: team_id.clone(),
                    agent_id: target.clone(),
                    step: conv.pipeline_step,
                }));
            }
        }
        if filtered.is_empty() && !raw_mentions.is_empty() {
            events.publish(Event::new(EventKind::PipelineComplete {
                conversation_id: conv.id.clone(),
                team_id,
                total: conv.total_messages,
            }));
        }
        filtered
    }
}
