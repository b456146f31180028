use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use relaycore_router::strip_mention_tags;

/// Responses longer than this are spilled to a file with the body truncated
/// in place (spec.md §4.5).
pub const LONG_RESPONSE_THRESHOLD: usize = 4000;

fn send_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[send_file:\s*([^\]]+)\]").unwrap())
}

/// Fold a conversation's per-agent responses into the single aggregated
/// reply body: verbatim for a one-step branch, `@id: text` sections
/// separated by a rule for a multi-step one.
pub fn aggregate_responses(responses: &[(String, String)]) -> String {
    match responses {
        [] => String::new(),
        [(_, text)] => text.clone(),
        many => many
            .iter()
            .map(|(agent_id, text)| format!("@{agent_id}: {text}"))
            .collect::<Vec<_>>()
            .join("\n\n------\n\n"),
    }
}

/// Promote any `[send_file: PATH]` tokens whose path exists on disk to an
/// outbound file list, stripping the tokens from the body. Tokens whose
/// path doesn't exist are left untouched (not a valid token).
pub fn promote_send_files(body: &str) -> (String, Vec<String>) {
    let pattern = send_file_pattern();
    let mut files = Vec::new();
    let stripped = pattern.replace_all(body, |caps: &regex::Captures| {
        let path = caps.get(1).unwrap().as_str().trim();
        if Path::new(path).exists() {
            files.push(path.to_string());
            String::new()
        } else {
            caps.get(0).unwrap().as_str().to_string()
        }
    });
    (stripped.trim().to_string(), files)
}

/// If `body` exceeds `LONG_RESPONSE_THRESHOLD`, persist the full text under
/// `output_dir` and return a truncated body with a trailing note plus the
/// saved file's path; otherwise return `body` unchanged and no file.
pub fn apply_long_response_handling(
    body: String,
    output_dir: &Path,
    conversation_id: &str,
) -> std::io::Result<(String, Option<String>)> {
    if body.chars().count() <= LONG_RESPONSE_THRESHOLD {
        return Ok((body, None));
    }
    std::fs::create_dir_all(output_dir)?;
    let file_path = output_dir.join(format!("conversation-{conversation_id}-full.txt"));
    std::fs::write(&file_path, &body)?;
    let truncated: String = body.chars().take(LONG_RESPONSE_THRESHOLD).collect();
    let note = format!(
        "\n\n[response truncated; full text saved to {}]",
        file_path.display()
    );
    Ok((truncated + &note, Some(file_path.to_string_lossy().to_string())))
}

/// Final pass over a conversation's aggregated text: strip any remaining
/// `[@x: ...]` routing fragments that survived (e.g. malformed or
/// self-directed tags that extraction didn't consume).
pub fn strip_residual_mentions(text: &str) -> String {
    strip_mention_tags(text).trim().to_string()
}
