use std::sync::Arc;

use relaycore_conversation::{OriginalMessageData, TeamContext};
use relaycore_events::{Event, EventKind};
use relaycore_queue::{Message, NewResponse, QueueStore};
use relaycore_router::{extract_teammate_mentions, find_team_for_agent, resolve_initial_routing};

use crate::context::DispatcherContext;
use crate::invoker::InvokeRequest;

const APOLOGY: &str = "I'm sorry, I wasn't able to process that request right now.";

/// Run the full per-message pipeline from spec.md §4.6 for one claimed row.
/// Errors that escape this function are the caller's cue to `failMessage`.
pub async fn process_message(ctx: Arc<DispatcherContext>, row: Message) -> Result<(), anyhow::Error> {
    let snapshot = ctx.config.snapshot();

    // Steps 2-4: authoritative agent if already set (the normal path — the
    // Control API pre-resolves routing, including the pipeline-leader
    // override, at accept time); otherwise resolve it now as a fallback for
    // rows enqueued without a pre-resolved `agent` (e.g. internal enqueues,
    // tests).
    let (agent_id, message_text, explicit_team_id) = match &row.agent {
        Some(agent) => (agent.clone(), row.body.clone(), None),
        None => {
            let result = resolve_initial_routing(&row.body, &snapshot);
            let team_id = if result.is_team { result.team_id.clone() } else { None };
            (result.agent_id, result.message, team_id)
        }
    };
    let mut message_text = message_text;

    let is_internal = row.from_agent.is_some();

    // Step 3: resolve team context.
    let team_id = if is_internal {
        if let Some(cid) = &row.conversation_id {
            if let Some(handle) = ctx.conversations.get(cid).await {
                let conv = handle.lock().await;
                Some(conv.team_context.team_id.clone())
            } else {
                find_team_for_agent(&agent_id, &snapshot).map(|(id, _)| id.to_string())
            }
        } else {
            find_team_for_agent(&agent_id, &snapshot).map(|(id, _)| id.to_string())
        }
    } else {
        explicit_team_id.or_else(|| find_team_for_agent(&agent_id, &snapshot).map(|(id, _)| id.to_string()))
    };

    // Step 4 fallback chain (spec.md §7): resolved agent → "default" →
    // first configured agent → permanent failure. `ConfigSnapshot` always
    // carries at least an implicit `default` agent when the document
    // configures none (spec.md §4.2), so this only bottoms out when the
    // document configures zero agents *and* that implicit synthesis itself
    // is bypassed — kept here as the explicit terminal case regardless.
    let agent_cfg = match snapshot.agent(&agent_id).cloned() {
        Some(cfg) => cfg,
        None => match snapshot.agent("default").cloned() {
            Some(cfg) => cfg,
            None => match snapshot.agents.values().next().cloned() {
                Some(cfg) => cfg,
                None => {
                    ctx.queue.dead_letter_message(row.id, "No agents configured").await?;
                    return Ok(());
                }
            },
        },
    };

    // Step 5: per-agent reset flag.
    let reset_flag_path = agent_cfg.working_dir.join(&agent_id).join("reset_flag");
    let reset = if reset_flag_path.exists() {
        let _ = std::fs::remove_file(&reset_flag_path);
        true
    } else {
        false
    };

    // Ensure/fetch the conversation up front (needed both for the
    // pending-teammates trailer and for recordStep/enqueueMentions below).
    let conv_handle = if let Some(team_id) = &team_id {
        let team_cfg = snapshot.team(team_id).cloned();
        let max_messages = team_cfg.as_ref().map(|t| t.max_messages).unwrap_or(50);
        let pipeline = team_cfg.as_ref().and_then(|t| t.pipeline.clone());
        let team_ctx = TeamContext {
            team_id: team_id.clone(),
            pipeline,
        };
        match &row.conversation_id {
            Some(cid) => Some(
                ctx.conversations
                    .ensure_with_id(
                        cid,
                        team_ctx,
                        OriginalMessageData {
                            channel: row.channel.clone(),
                            sender: row.sender.clone(),
                            sender_address: row.sender_address.clone(),
                            message_id: row.external_id.clone(),
                            original_message: message_text.clone(),
                        },
                        max_messages,
                    )
                    .await,
            ),
            None => Some(
                ctx.conversations
                    .start(
                        team_ctx,
                        OriginalMessageData {
                            channel: row.channel.clone(),
                            sender: row.sender.clone(),
                            sender_address: row.sender_address.clone(),
                            message_id: row.external_id.clone(),
                            original_message: message_text.clone(),
                        },
                        max_messages,
                    )
                    .await,
            ),
        }
    } else {
        None
    };

    // Step 6: pending-teammates trailer for internal messages.
    if is_internal {
        if let Some(handle) = &conv_handle {
            let pending_minus_one = {
                let conv = handle.lock().await;
                conv.pending.saturating_sub(1)
            };
            if pending_minus_one > 0 {
                message_text = format!(
                    "{message_text}\n\n[{pending_minus_one} other teammate response(s) are still being processed and will be delivered when ready. Do not re-mention teammates who haven't responded yet.]"
                );
            }
        }
    }

    // Step 7: invoke.
    ctx.events.publish(Event::new(EventKind::ChainStepStart {
        message_id: row.external_id.clone(),
        agent_id: agent_id.clone(),
        team_id: team_id.clone(),
    }));
    ctx.events.publish(Event::new(EventKind::ProcessorStart {
        agent_id: agent_id.clone(),
    }));
    let response = match ctx
        .invoker
        .invoke(InvokeRequest {
            agent: agent_cfg.clone(),
            prompt: message_text,
            working_dir: agent_cfg.working_dir.clone(),
            reset,
        })
        .await
    {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(agent_id = %agent_id, error = %err, "invoker failed, substituting apology");
            APOLOGY.to_string()
        }
    };
    ctx.events.publish(Event::new(EventKind::ChainStepDone {
        message_id: row.external_id.clone(),
        agent_id: agent_id.clone(),
        team_id: team_id.clone(),
        response_length: response.len(),
    }));

    match conv_handle {
        None => {
            // Step 8: single-agent reply.
            let (stripped, files) = relaycore_conversation::promote_send_files(&response);
            let output_dir = ctx.output_dir.clone();
            let (body, saved) = relaycore_conversation::apply_long_response_handling(
                stripped,
                &output_dir,
                &row.external_id,
            )?;
            let mut files = files;
            if let Some(path) = saved {
                files.push(path);
            }
            ctx.queue
                .enqueue_response(NewResponse {
                    message_id: row.external_id.clone(),
                    channel: row.channel.clone(),
                    sender: row.sender.clone(),
                    sender_address: row.sender_address.clone(),
                    body,
                    original_message: row.body.clone(),
                    from_agent: Some(agent_id.clone()),
                    files: if files.is_empty() { None } else { Some(files) },
                })
                .await?;
            ctx.queue.complete_message(row.id).await?;
        }
        Some(handle) => {
            // Step 9: team context.
            let mut conv = handle.lock().await;
            ctx.conversations.record_step(&mut conv, &agent_id, &response);

            let team_id_for_mentions = conv.team_context.team_id.clone();
            let raw_mentions = extract_teammate_mentions(&response, &agent_id, &team_id_for_mentions, &snapshot);
            let mentions =
                relaycore_conversation::apply_pipeline_semantics(&mut conv, &agent_id, raw_mentions, &ctx.events);

            ctx.conversations.enqueue_mentions(&mut conv, &agent_id, mentions).await?;

            let done = ctx.conversations.complete_branch(&mut conv);
            if done {
                ctx.conversations.complete(&mut conv, &ctx.output_dir).await?;
            }
            let conv_id = conv.id.clone();
            drop(conv);
            if done {
                ctx.conversations.remove(&conv_id).await;
            }
            ctx.queue.complete_message(row.id).await?;
        }
    }

    Ok(())
}
