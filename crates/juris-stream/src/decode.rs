use tracing::debug;

/// Sentinel payload that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Result of decoding one SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// The `[DONE]` sentinel.
    Done,
    /// A JSON payload.
    Payload(serde_json::Value),
}

/// Decodes a single line.
///
/// Returns `None` for anything that is not a `data:` line (comments, blank
/// keep-alives, other SSE fields) and for payloads that fail to parse. A bad
/// frame is skipped; it never ends the stream.
pub fn decode_line(line: &str) -> Option<DecodedFrame> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data).trim();
    if data == DONE_SENTINEL {
        return Some(DecodedFrame::Done);
    }
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(value) => Some(DecodedFrame::Payload(value)),
        Err(err) => {
            debug!(error = %err, "skipping malformed SSE data frame");
            None
        }
    }
}
