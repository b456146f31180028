use relaycore_config::PipelineConfig;

/// The agent immediately after `current_agent_id` in the pipeline sequence,
/// or `None` if `current_agent_id` is last (or absent).
pub fn get_next_pipeline_agent(pipeline: &PipelineConfig, current_agent_id: &str) -> Option<String> {
    let idx = pipeline.index_of(current_agent_id)?;
    pipeline.sequence.get(idx + 1).cloned()
}

/// Whether `target` is a permitted loop-back from `current`: pipeline allows
/// loops at all, the budget isn't spent, and `target` precedes `current`
/// in sequence order (spec.md §4.3).
pub fn get_pipeline_loop_target(
    pipeline: &PipelineConfig,
    current: &str,
    target: &str,
    loops_used: u32,
) -> bool {
    if pipeline.max_loops == 0 || loops_used >= pipeline.max_loops {
        return false;
    }
    let (Some(current_idx), Some(target_idx)) = (pipeline.index_of(current), pipeline.index_of(target)) else {
        return false;
    };
    target_idx < current_idx
}

/// Keep only mentions directed at the next-in-sequence agent or a permitted
/// loop-back target; everything else is dropped with a warning (spec.md
/// §4.3/§4.5, non-strict pipeline mode).
pub fn filter_mentions_for_pipeline(
    mentions: &[(String, String)],
    pipeline: &PipelineConfig,
    current_agent_id: &str,
    loops_used: u32,
) -> Vec<(String, String)> {
    let next = get_next_pipeline_agent(pipeline, current_agent_id);

    mentions
        .iter()
        .filter(|(target, _)| {
            let is_next = next.as_deref() == Some(target.as_str());
            let is_loop_back = get_pipeline_loop_target(pipeline, current_agent_id, target, loops_used);
            if !is_next && !is_loop_back {
                tracing::warn!(target = %target, current = %current_agent_id, "dropping mention not permitted by pipeline");
            }
            is_next || is_loop_back
        })
        .cloned()
        .collect()
}
