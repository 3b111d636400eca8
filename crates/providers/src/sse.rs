//! SSE plumbing shared by the transport adapters.
//!
//! Both wire dialects arrive the same way: a chunked HTTP body carrying
//! `data:` payloads separated by blank lines. The adapters differ only in
//! how a payload maps to deltas, so that mapping comes in as a closure
//! and everything else lives here.

use crate::util::from_reqwest;
use tern_domain::delta::{FinishReason, ModelDelta};
use tern_domain::error::Result;
use tern_domain::stream::DeltaStream;

/// Pull the `data:` payloads of every complete event out of `buffer`.
///
/// An event is complete once its blank-line terminator has arrived; a
/// trailing partial event stays in the buffer for the next call. Other
/// SSE fields (`event:`, `id:`, `retry:`) are dropped.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    // Everything up to the last terminator is complete.
    let Some(consumed) = buffer.rfind("\n\n").map(|pos| pos + 2) else {
        return payloads;
    };

    for line in buffer[..consumed].lines() {
        if let Some(payload) = line.trim().strip_prefix("data:") {
            let payload = payload.trim();
            if !payload.is_empty() {
                payloads.push(payload.to_owned());
            }
        }
    }

    buffer.drain(..consumed);
    payloads
}

/// Turn an SSE response body into a [`DeltaStream`].
///
/// `parse_data` sees each payload string and returns any number of
/// deltas; it is `FnMut` so adapters can thread per-stream state through
/// it. When the body closes without the parser ever reporting a finish,
/// a plain stop is appended so consumers always see one.
pub(crate) fn sse_delta_stream<F>(response: reqwest::Response, mut parse_data: F) -> DeltaStream
where
    F: FnMut(&str) -> Vec<Result<ModelDelta>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut finished = false;

        loop {
            let chunk = match response.chunk().await {
                Ok(c) => c,
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            };

            match &chunk {
                Some(bytes) => buffer.push_str(&String::from_utf8_lossy(bytes)),
                // Terminate a dangling final event so the drain sees it.
                None if !buffer.trim().is_empty() => buffer.push_str("\n\n"),
                None => {}
            }

            for payload in drain_data_lines(&mut buffer) {
                for delta in parse_data(&payload) {
                    finished |= matches!(&delta, Ok(d) if d.finish.is_some());
                    yield delta;
                }
            }

            if chunk.is_none() {
                break;
            }
        }

        if !finished {
            yield Ok(ModelDelta::finish(FinishReason::Stop));
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_payload_extracted_and_buffer_consumed() {
        let mut buf = String::from("event: delta\ndata: {\"n\":1}\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"n\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn several_events_drain_in_one_call() {
        let mut buf = String::from("data: alpha\n\ndata: beta\n\ndata: gamma\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["alpha", "beta", "gamma"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn unterminated_tail_waits_for_more() {
        let mut buf = String::from("data: whole\n\ndata: half");
        assert_eq!(drain_data_lines(&mut buf), vec!["whole"]);
        assert_eq!(buf, "data: half");
    }

    #[test]
    fn nothing_to_drain_from_empty_buffer() {
        let mut buf = String::new();
        assert!(drain_data_lines(&mut buf).is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn blank_payload_dropped() {
        let mut buf = String::from("data: \n\n");
        assert!(drain_data_lines(&mut buf).is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn event_id_retry_fields_ignored() {
        let mut buf = String::from("event: ping\nid: 3\nretry: 15000\ndata: kept\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["kept"]);
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["[DONE]"]);
    }

    #[test]
    fn payload_whitespace_trimmed() {
        let mut buf = String::from("data:    spaced out   \n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["spaced out"]);
    }

    #[test]
    fn split_event_completes_on_next_call() {
        let mut buf = String::from("data: fir");
        assert!(drain_data_lines(&mut buf).is_empty());

        buf.push_str("st\n\ndata: second\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["first", "second"]);
        assert!(buf.is_empty());
    }
}
