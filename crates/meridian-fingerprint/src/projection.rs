use meridian_protocol::{Request, RequestPayload, Role};

/// Builds the text-only projection of a request used to compute a vector
/// embedding for the semantic cache tier. Tool-call JSON and binary payloads
/// never appear here; only user-visible text.
pub(crate) fn project(request: &Request, max_turns: Option<usize>) -> Option<String> {
    match &request.payload {
        RequestPayload::ChatCompletion(r) => {
            let messages = match max_turns {
                Some(n) if r.messages.len() > n => &r.messages[r.messages.len() - n..],
                _ => &r.messages[..],
            };
            let projection: Vec<String> = messages
                .iter()
                .map(|m| format!("{}: {}", role_marker(m.role), m.text_only()))
                .filter(|line| !line.trim_end_matches(':').trim().is_empty())
                .collect();
            if projection.is_empty() {
                None
            } else {
                Some(projection.join("\n"))
            }
        }
        RequestPayload::TextCompletion(r) if !r.prompt.is_empty() => Some(r.prompt.clone()),
        RequestPayload::Embedding(r) if !r.inputs.is_empty() => Some(r.inputs.join("\n")),
        RequestPayload::Speech(r) if !r.input.is_empty() => Some(r.input.clone()),
        _ => None,
    }
}

fn role_marker(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}
