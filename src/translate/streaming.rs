//! State machines translating provider events into each dialect's
//! streaming wire format.
//!
//! Each in-flight request owns one translator instance; it tracks which
//! content blocks are open and accumulates tool-call argument fragments per
//! block index. The accumulated buffer is only an internal completeness
//! signal: clients always receive the raw fragment, never the re-serialized
//! buffer. Events are emitted in the exact order the provider produced
//! them, and a slightly malformed provider (a delta for a block that never
//! started) degrades to a warn-logged best-effort delta rather than a
//! dropped connection.

use std::collections::{HashMap, HashSet};

use crate::canonical::{ProviderEvent, StopReason, Usage};

use super::anthropic_types::{
    AnthropicUsage, Delta, DeltaUsage, ErrorBody, MessageDeltaBody, MessagesResponse,
    ResponseContentBlock, StreamEvent,
};
use super::openai_types::{
    ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use super::response::{anthropic_stop_reason, openai_finish_reason};

/// The text block's index in the outgoing stream. The downstream protocol
/// carries `contentIndex` only for tool-call events.
const TEXT_BLOCK_INDEX: usize = 0;

/// Per-request accumulation of tool-call argument fragments, keyed by
/// content-block index. Discarded when the stream ends.
#[derive(Debug, Default)]
struct ToolArgsAccumulator {
    buffers: HashMap<usize, String>,
}

impl ToolArgsAccumulator {
    fn open(&mut self, index: usize) {
        self.buffers.insert(index, String::new());
    }

    /// Append a fragment and report whether the buffer now parses as a
    /// complete JSON document. Best-effort signal only; the caller forwards
    /// the raw fragment regardless.
    fn append(&mut self, index: usize, fragment: &str) -> bool {
        let buffer = self.buffers.entry(index).or_default();
        buffer.push_str(fragment);
        serde_json::from_str::<serde_json::Value>(buffer).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Anthropic dialect: named SSE frames
// ---------------------------------------------------------------------------

/// Emits `message_start` → per-block `content_block_*` → `message_delta` →
/// `message_stop`, with a terminal frame exactly once per stream even on
/// error.
#[derive(Debug)]
pub struct AnthropicStreamTranslator {
    request_id: String,
    model: String,
    started: bool,
    finished: bool,
    text_open: bool,
    open_tools: HashSet<usize>,
    last_open_index: Option<usize>,
    args: ToolArgsAccumulator,
    output_tokens: u64,
}

impl AnthropicStreamTranslator {
    pub fn new(request_id: &str, model: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            model: model.to_string(),
            started: false,
            finished: false,
            text_open: false,
            open_tools: HashSet::new(),
            last_open_index: None,
            args: ToolArgsAccumulator::default(),
            output_tokens: 0,
        }
    }

    /// Emit the opening `message_start` frame. Idempotent.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.request_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage::default(),
            },
        }]
    }

    pub fn process_event(&mut self, event: &ProviderEvent) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = self.start();

        match event {
            ProviderEvent::TextStart => {
                events.push(self.open_text_block());
            }
            ProviderEvent::TextDelta { delta } => {
                // Tolerate a missing text_start from the provider.
                if !self.text_open {
                    tracing::warn!("text delta before text_start, opening block");
                    events.push(self.open_text_block());
                }
                events.push(StreamEvent::ContentBlockDelta {
                    index: TEXT_BLOCK_INDEX,
                    delta: Delta::TextDelta {
                        text: delta.clone(),
                    },
                });
            }
            ProviderEvent::TextEnd => {
                if self.text_open {
                    self.text_open = false;
                    events.push(StreamEvent::ContentBlockStop {
                        index: TEXT_BLOCK_INDEX,
                    });
                }
            }
            ProviderEvent::ToolCallStart {
                content_index,
                tool_call,
            } => {
                self.open_tools.insert(*content_index);
                self.last_open_index = Some(*content_index);
                self.args.open(*content_index);
                events.push(StreamEvent::ContentBlockStart {
                    index: *content_index,
                    content_block: ResponseContentBlock::ToolUse {
                        id: tool_call.id.clone(),
                        name: tool_call.name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
            }
            ProviderEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                let index = self.anchor_index(*content_index);
                let complete = self.args.append(index, delta);
                if complete {
                    tracing::debug!(index, "tool call arguments complete");
                }
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta {
                        partial_json: delta.clone(),
                    },
                });
            }
            ProviderEvent::ToolCallEnd { content_index } => {
                if self.open_tools.remove(content_index) {
                    events.push(StreamEvent::ContentBlockStop {
                        index: *content_index,
                    });
                } else {
                    tracing::warn!(index = content_index, "stop for a block that never started");
                }
            }
            ProviderEvent::Done { reason, message } => {
                let stop_reason = ProviderEvent::done_stop_reason(*reason, message);
                self.output_tokens = message.usage.output;
                events.append(&mut self.terminal_events(stop_reason));
            }
        }

        events
    }

    /// Flush terminal frames when the provider stream ended without a
    /// `done` event.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = self.start();
        events.append(&mut self.terminal_events(StopReason::Stop));
        events
    }

    /// Translate a bridge failure into the dialect's terminal error frame.
    /// Emitted at most once; a stream that already terminated stays closed.
    pub fn fail(&mut self, message: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut events = Vec::new();
        if !self.started {
            self.started = true;
        }
        events.push(StreamEvent::Error {
            error: ErrorBody {
                error_type: "api_error".to_string(),
                message: message.to_string(),
            },
        });
        events
    }

    fn open_text_block(&mut self) -> StreamEvent {
        self.text_open = true;
        self.last_open_index = Some(TEXT_BLOCK_INDEX);
        StreamEvent::ContentBlockStart {
            index: TEXT_BLOCK_INDEX,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        }
    }

    /// A delta for an index with no open block anchors to the last known
    /// open index for this stream.
    fn anchor_index(&self, index: usize) -> usize {
        if self.open_tools.contains(&index) {
            return index;
        }
        let anchored = self.last_open_index.unwrap_or(index);
        tracing::warn!(index, anchored, "delta for a block that never started");
        anchored
    }

    fn terminal_events(&mut self, stop_reason: StopReason) -> Vec<StreamEvent> {
        self.finished = true;
        let mut events = Vec::new();

        if self.text_open {
            self.text_open = false;
            events.push(StreamEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            });
        }
        let mut open: Vec<usize> = self.open_tools.drain().collect();
        open.sort_unstable();
        for index in open {
            events.push(StreamEvent::ContentBlockStop { index });
        }

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(anthropic_stop_reason(stop_reason).to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);
        events
    }
}

// ---------------------------------------------------------------------------
// OpenAI dialect: anonymous `data:` chunks, `[DONE]`-terminated
// ---------------------------------------------------------------------------

/// Emits untyped chunk frames; the handler appends the literal `[DONE]`
/// sentinel after the finish chunk.
#[derive(Debug)]
pub struct OpenAiStreamTranslator {
    request_id: String,
    model: String,
    created: i64,
    finished: bool,
    open_tools: HashSet<usize>,
    last_open_index: Option<usize>,
    args: ToolArgsAccumulator,
}

impl OpenAiStreamTranslator {
    pub fn new(request_id: &str, model: &str, created: i64) -> Self {
        Self {
            request_id: request_id.to_string(),
            model: model.to_string(),
            created,
            finished: false,
            open_tools: HashSet::new(),
            last_open_index: None,
            args: ToolArgsAccumulator::default(),
        }
    }

    pub fn process_event(&mut self, event: &ProviderEvent) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }

        match event {
            // No chunk equivalents; block boundaries are implicit.
            ProviderEvent::TextStart | ProviderEvent::TextEnd | ProviderEvent::ToolCallEnd { .. } => {
                None
            }
            ProviderEvent::TextDelta { delta } => Some(self.chunk(
                ChunkDelta {
                    content: Some(delta.clone()),
                    ..ChunkDelta::default()
                },
                None,
                None,
            )),
            ProviderEvent::ToolCallStart {
                content_index,
                tool_call,
            } => {
                self.open_tools.insert(*content_index);
                self.last_open_index = Some(*content_index);
                self.args.open(*content_index);
                Some(self.chunk(
                    ChunkDelta {
                        tool_calls: Some(vec![ChunkToolCall {
                            index: *content_index as u64,
                            id: Some(tool_call.id.clone()),
                            call_type: Some("function".to_string()),
                            function: Some(ChunkToolCallFunction {
                                name: Some(tool_call.name.clone()),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..ChunkDelta::default()
                    },
                    None,
                    None,
                ))
            }
            ProviderEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                let index = self.anchor_index(*content_index);
                self.args.append(index, delta);
                Some(self.chunk(
                    ChunkDelta {
                        tool_calls: Some(vec![ChunkToolCall {
                            index: index as u64,
                            id: None,
                            call_type: None,
                            function: Some(ChunkToolCallFunction {
                                name: None,
                                arguments: Some(delta.clone()),
                            }),
                        }]),
                        ..ChunkDelta::default()
                    },
                    None,
                    None,
                ))
            }
            ProviderEvent::Done { reason, message } => {
                self.finished = true;
                let stop_reason = ProviderEvent::done_stop_reason(*reason, message);
                Some(self.chunk(
                    ChunkDelta::default(),
                    Some(openai_finish_reason(stop_reason).to_string()),
                    Some(message.usage),
                ))
            }
        }
    }

    /// Translate a bridge failure into a terminal chunk with an `error`
    /// finish marker. Emitted at most once.
    pub fn fail(&mut self) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.chunk(ChunkDelta::default(), Some("error".to_string()), None))
    }

    /// Close the stream when the provider ended without a `done` event.
    pub fn finish(&mut self) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.chunk(ChunkDelta::default(), Some("stop".to_string()), None))
    }

    fn anchor_index(&self, index: usize) -> usize {
        if self.open_tools.contains(&index) {
            return index;
        }
        let anchored = self.last_open_index.unwrap_or(index);
        tracing::warn!(index, anchored, "delta for a block that never started");
        anchored
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<String>,
        usage: Option<Usage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.request_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: usage.map(|u| ChatUsage {
                prompt_tokens: u.input,
                completion_tokens: u.output,
                total_tokens: u.total_tokens,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{ContentBlock, FinalMessage, ToolCallHeader};

    fn done_event(stop_reason: StopReason, output: u64) -> ProviderEvent {
        ProviderEvent::Done {
            reason: None,
            message: FinalMessage {
                content: vec![ContentBlock::Text {
                    text: String::new(),
                }],
                stop_reason,
                usage: Usage {
                    input: 10,
                    output,
                    total_tokens: 10 + output,
                },
            },
        }
    }

    fn tool_start(index: usize, id: &str, name: &str) -> ProviderEvent {
        ProviderEvent::ToolCallStart {
            content_index: index,
            tool_call: ToolCallHeader {
                id: id.to_string(),
                name: name.to_string(),
            },
        }
    }

    fn tool_delta(index: usize, delta: &str) -> ProviderEvent {
        ProviderEvent::ToolCallDelta {
            content_index: index,
            delta: delta.to_string(),
        }
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    #[test]
    fn anthropic_text_stream_emits_frames_in_order() {
        let mut t = AnthropicStreamTranslator::new("msg_1", "m");
        let mut all = t.start();
        for event in [
            ProviderEvent::TextStart,
            ProviderEvent::TextDelta {
                delta: "Hi".to_string(),
            },
            ProviderEvent::TextDelta {
                delta: " there".to_string(),
            },
            ProviderEvent::TextEnd,
            done_event(StopReason::Stop, 2),
        ] {
            all.extend(t.process_event(&event));
        }

        assert_eq!(
            names(&all),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn anthropic_tool_fragments_forwarded_raw() {
        let mut t = AnthropicStreamTranslator::new("msg_1", "m");
        let _ = t.start();
        let _ = t.process_event(&tool_start(0, "c1", "get_weather"));

        let first = t.process_event(&tool_delta(0, "{\"loc\""));
        let second = t.process_event(&tool_delta(0, ":\"NYC\"}"));

        for (events, expected) in [(first, "{\"loc\""), (second, ":\"NYC\"}")] {
            assert_eq!(events.len(), 1);
            match &events[0] {
                StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: Delta::InputJsonDelta { partial_json },
                } => assert_eq!(partial_json, expected),
                other => panic!("expected input_json_delta, got {other:?}"),
            }
        }
    }

    #[test]
    fn anthropic_orphan_delta_anchors_to_last_open_index() {
        let mut t = AnthropicStreamTranslator::new("msg_1", "m");
        let _ = t.start();
        let _ = t.process_event(&tool_start(1, "c1", "search"));

        // Index 5 never started; the delta anchors to index 1.
        let events = t.process_event(&tool_delta(5, "{}"));
        match &events[0] {
            StreamEvent::ContentBlockDelta { index, .. } => assert_eq!(*index, 1),
            other => panic!("expected delta, got {other:?}"),
        }

        // A stop for an unknown index is dropped, not fatal.
        let events = t.process_event(&ProviderEvent::ToolCallEnd { content_index: 7 });
        assert!(events.is_empty());
    }

    #[test]
    fn anthropic_concurrent_tool_indices_keep_relative_order() {
        let mut t = AnthropicStreamTranslator::new("msg_1", "m");
        let _ = t.start();

        let mut all = Vec::new();
        for event in [
            tool_start(0, "c0", "a"),
            tool_start(1, "c1", "b"),
            tool_delta(0, "{\"x\":"),
            tool_delta(1, "{\"y\":"),
            tool_delta(0, "1}"),
            tool_delta(1, "2}"),
            ProviderEvent::ToolCallEnd { content_index: 0 },
            ProviderEvent::ToolCallEnd { content_index: 1 },
        ] {
            all.extend(t.process_event(&event));
        }

        let for_index = |wanted: usize| -> Vec<&'static str> {
            all.iter()
                .filter_map(|e| match e {
                    StreamEvent::ContentBlockStart { index, .. } if *index == wanted => {
                        Some("start")
                    }
                    StreamEvent::ContentBlockDelta { index, .. } if *index == wanted => {
                        Some("delta")
                    }
                    StreamEvent::ContentBlockStop { index } if *index == wanted => Some("stop"),
                    _ => None,
                })
                .collect()
        };

        assert_eq!(for_index(0), vec!["start", "delta", "delta", "stop"]);
        assert_eq!(for_index(1), vec!["start", "delta", "delta", "stop"]);
    }

    #[test]
    fn anthropic_terminal_frame_exactly_once() {
        let mut t = AnthropicStreamTranslator::new("msg_1", "m");
        let _ = t.start();
        let events = t.process_event(&done_event(StopReason::Stop, 1));
        assert_eq!(names(&events), vec!["message_delta", "message_stop"]);

        assert!(t.finish().is_empty());
        assert!(t.fail("late failure").is_empty());
        assert!(t.process_event(&done_event(StopReason::Stop, 1)).is_empty());
    }

    #[test]
    fn anthropic_bridge_error_becomes_error_frame() {
        let mut t = AnthropicStreamTranslator::new("msg_1", "m");
        let _ = t.start();
        let events = t.fail("provider exploded");
        assert_eq!(names(&events), vec!["error"]);
        match &events[0] {
            StreamEvent::Error { error } => {
                assert_eq!(error.error_type, "api_error");
                assert_eq!(error.message, "provider exploded");
            }
            other => panic!("expected error frame, got {other:?}"),
        }
        assert!(t.fail("again").is_empty());
    }

    #[test]
    fn anthropic_done_closes_dangling_blocks() {
        let mut t = AnthropicStreamTranslator::new("msg_1", "m");
        let _ = t.start();
        let _ = t.process_event(&ProviderEvent::TextStart);
        let _ = t.process_event(&tool_start(1, "c1", "a"));

        let events = t.process_event(&done_event(StopReason::ToolUse, 3));
        assert_eq!(
            names(&events),
            vec![
                "content_block_stop", // text
                "content_block_stop", // tool
                "message_delta",
                "message_stop",
            ]
        );
        match &events[2] {
            StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("tool_use"));
                assert_eq!(usage.output_tokens, 3);
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }

    #[test]
    fn openai_text_and_done_chunks() {
        let mut t = OpenAiStreamTranslator::new("chatcmpl-1", "gpt-4.1", 0);

        assert!(t.process_event(&ProviderEvent::TextStart).is_none());

        let chunk = t
            .process_event(&ProviderEvent::TextDelta {
                delta: "Hi".to_string(),
            })
            .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
        assert_eq!(chunk.object, "chat.completion.chunk");

        let done = t.process_event(&done_event(StopReason::Stop, 2)).unwrap();
        assert_eq!(done.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(done.usage.as_ref().unwrap().completion_tokens, 2);

        assert!(t.finish().is_none());
        assert!(t.fail().is_none());
    }

    #[test]
    fn openai_tool_call_chunks_forward_fragments() {
        let mut t = OpenAiStreamTranslator::new("chatcmpl-1", "m", 0);

        let start = t.process_event(&tool_start(0, "c1", "get_weather")).unwrap();
        let calls = start.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("c1"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().name.as_deref(),
            Some("get_weather")
        );

        for fragment in ["{\"loc\"", ":\"NYC\"}"] {
            let chunk = t.process_event(&tool_delta(0, fragment)).unwrap();
            let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
            assert_eq!(
                calls[0].function.as_ref().unwrap().arguments.as_deref(),
                Some(fragment)
            );
        }

        let done = t.process_event(&done_event(StopReason::ToolUse, 1)).unwrap();
        assert_eq!(done.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn openai_bridge_error_chunk() {
        let mut t = OpenAiStreamTranslator::new("chatcmpl-1", "m", 0);
        let chunk = t.fail().unwrap();
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("error"));
        assert!(t.fail().is_none());
    }

    #[test]
    fn accumulator_signals_completion_without_gating_forwarding() {
        let mut acc = ToolArgsAccumulator::default();
        acc.open(0);
        assert!(!acc.append(0, "{\"a\""));
        assert!(acc.append(0, ":1}"));
    }
}
