//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads a `reqwest::Response` as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`) and parses each chunk as JSON. Also parses the
//! non-streaming response body.

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, ChatMessage, ChatResponse, Role, StreamChunk, Usage};

// ─── SSE line parser ─────────────────────────────────────────────────────────

/// Parse raw SSE bytes into `StreamChunk`s.
///
/// 1. Splits the HTTP body into SSE events, buffering across byte boundaries
/// 2. Parses each `data:` payload as a `ChatCompletionChunk`
/// 3. Skips keep-alives and empty deltas, stops at `[DONE]`
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>> {
    parse_sse_bytes(Box::pin(response.bytes_stream()))
}

/// Byte-stream half of [`parse_sse_stream`], independent of `reqwest::Response`.
pub(crate) fn parse_sse_bytes<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        (byte_stream, Vec::<u8>::new(), false),
        |(mut byte_stream, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(event_end) = find_event_end(&buffer) {
                    let event: Vec<u8> = buffer.drain(..event_end + 2).take(event_end).collect();

                    match decode_event(&event).and_then(|text| process_event(&text)) {
                        Ok(SseEvent::Chunk(chunk)) => {
                            return Some((Ok(chunk), (byte_stream, buffer, false)))
                        }
                        Ok(SseEvent::Skip) => continue,
                        Ok(SseEvent::Done) => return None,
                        Err(e) => return Some((Err(e), (byte_stream, buffer, true))),
                    }
                }

                match byte_stream.next().await {
                    // Raw CR only appears in line endings (JSON escapes it), so
                    // dropping it turns CRLF framing into LF even when a pair
                    // straddles two reads.
                    Some(Ok(bytes)) => {
                        buffer.extend(bytes.as_ref().iter().filter(|&&b| b != b'\r'));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, buffer, true),
                        ));
                    }
                    None => {
                        // Stream ended without a trailing blank line
                        let rest = std::mem::take(&mut buffer);
                        let result = decode_event(&rest).and_then(|text| {
                            let text = text.trim();
                            if text.is_empty() {
                                Ok(SseEvent::Skip)
                            } else {
                                process_event(text)
                            }
                        });
                        return match result {
                            Ok(SseEvent::Chunk(chunk)) => {
                                Some((Ok(chunk), (byte_stream, buffer, true)))
                            }
                            Ok(_) => None,
                            Err(e) => Some((Err(e), (byte_stream, buffer, true))),
                        };
                    }
                }
            }
        },
    )
}

/// Offset of the blank line that ends the first complete event.
fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

/// Events are decoded only once complete, so a multi-byte character split
/// across reads is reassembled first.
fn decode_event(event: &[u8]) -> Result<String, InferenceError> {
    String::from_utf8(event.to_vec()).map_err(|e| InferenceError::StreamError {
        reason: format!("SSE event is not valid UTF-8: {e}"),
    })
}

enum SseEvent {
    Chunk(StreamChunk),
    Skip,
    Done,
}

/// Process a single SSE event string (may contain multiple `data:` lines).
fn process_event(event: &str) -> Result<SseEvent, InferenceError> {
    let mut data_content = String::new();

    for line in event.lines() {
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(SseEvent::Done);
            }
            data_content.push_str(data);
        }
        // Comments, `event:` and `id:` lines carry nothing we use
    }

    if data_content.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let chunk: ChatCompletionChunk =
        serde_json::from_str(&data_content).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
        })?;

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(SseEvent::Skip);
    };

    let token = choice.delta.content.filter(|c| !c.is_empty());
    if token.is_none() && choice.finish_reason.is_none() {
        return Ok(SseEvent::Skip);
    }

    Ok(SseEvent::Chunk(StreamChunk {
        token,
        finish_reason: choice.finish_reason,
    }))
}

// ─── Non-streaming ───────────────────────────────────────────────────────────

/// Parse a non-streaming `chat/completions` response body.
pub fn parse_completion_response(body: &str) -> Result<ChatResponse, InferenceError> {
    #[derive(Deserialize)]
    struct CompletionResponse {
        model: Option<String>,
        choices: Vec<CompletionChoice>,
        usage: Option<Usage>,
    }

    #[derive(Deserialize)]
    struct CompletionChoice {
        message: CompletionMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct CompletionMessage {
        content: Option<String>,
    }

    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::StreamError {
            reason: "empty choices array".into(),
        })?;

    Ok(ChatResponse {
        message: ChatMessage::new(Role::Assistant, choice.message.content.unwrap_or_default()),
        finish_reason: choice.finish_reason,
        usage: resp.usage,
        model: resp.model,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        parts: Vec<Vec<u8>>,
    ) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Unpin {
        stream::iter(parts.into_iter().map(Ok))
    }

    async fn collect_bytes(parts: Vec<Vec<u8>>) -> Vec<Result<StreamChunk, InferenceError>> {
        parse_sse_bytes(byte_stream(parts)).collect().await
    }

    async fn collect(parts: Vec<&'static str>) -> Vec<Result<StreamChunk, InferenceError>> {
        collect_bytes(parts.into_iter().map(|p| p.as_bytes().to_vec()).collect()).await
    }

    #[tokio::test]
    async fn test_sse_tokens_and_done() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;

        let chunks: Vec<StreamChunk> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].token.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].token.as_deref(), Some("lo"));
        assert_eq!(chunks[2].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_sse_event_split_across_reads() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"Hi\"},\"finish_reason\":null}]}\n",
            "\ndata: [DONE]\n\n",
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().token.as_deref(), Some("Hi"));
    }

    #[tokio::test]
    async fn test_sse_keepalive_and_crlf() {
        let chunks = collect(vec![
            ": keep-alive\r\n\r\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":null}]}\r\n\r\n",
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().token.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_sse_multibyte_character_split_across_reads() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"},\"finish_reason\":null}]}\n\n";
        let bytes = event.as_bytes();
        // Cut right after the first byte of the three-byte `你`.
        let cut = event.find('你').unwrap() + 1;

        let chunks = collect_bytes(vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()]).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().token.as_deref(), Some("你好"));
    }

    #[tokio::test]
    async fn test_sse_every_byte_in_its_own_read() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"讲个笑话\"},\"finish_reason\":null}]}\r\n\r\ndata: [DONE]\r\n\r\n";
        let parts = body.as_bytes().iter().map(|b| vec![*b]).collect();

        let chunks = collect_bytes(parts).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().token.as_deref(), Some("讲个笑话"));
    }

    #[tokio::test]
    async fn test_sse_crlf_boundary_split_across_reads() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"},\"finish_reason\":null}]}\r\n\r",
            "\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"},\"finish_reason\":null}]}\r",
            "\n\r\n",
            "data: [DONE]\r\n\r\n",
        ])
        .await;
        let tokens: Vec<_> = chunks
            .into_iter()
            .map(|c| c.unwrap().token.unwrap())
            .collect();
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_sse_invalid_json_ends_stream_with_error() {
        let chunks = collect(vec![
            "data: {not json}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"},\"finish_reason\":null}]}\n\n",
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(InferenceError::StreamError { .. })));
    }

    #[tokio::test]
    async fn test_sse_trailing_event_without_blank_line() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"},\"finish_reason\":\"stop\"}]}",
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().token.as_deref(), Some("tail"));
    }

    #[test]
    fn test_parse_completion_with_content() {
        let body = r#"{
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {"role": "assistant", "content": "Hello, world!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
        }"#;

        let resp = parse_completion_response(body).unwrap();
        assert_eq!(resp.message.content, "Hello, world!");
        assert_eq!(resp.message.role, Role::Assistant);
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 8);
        assert_eq!(resp.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_parse_completion_null_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null},"finish_reason":"length"}]}"#;
        let resp = parse_completion_response(body).unwrap();
        assert_eq!(resp.message.content, "");
        assert_eq!(resp.finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn test_parse_completion_empty_choices() {
        let result = parse_completion_response(r#"{"choices": []}"#);
        assert!(result.is_err());
    }
}
