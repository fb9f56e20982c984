//! The canonical, dialect-neutral conversation model.
//!
//! Both public API dialects are mapped into these types before anything is
//! sent downstream, and the downstream provider's event stream is expressed
//! as [`ProviderEvent`]s. Serde attributes pin the wire shape of the
//! line-delimited JSON protocol spoken over the provider process's stdio.

use serde::{Deserialize, Serialize};

/// A single conversation turn. `toolResult` turns stand alone: the
/// downstream provider resolves the tool name from `toolCallId`, so
/// `toolName` is deliberately left blank by the mappers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Turn {
    #[serde(rename = "user")]
    User { content: TurnContent, timestamp: i64 },
    #[serde(rename = "assistant")]
    Assistant {
        content: Vec<ContentBlock>,
        timestamp: i64,
    },
    #[serde(rename = "toolResult", rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<ContentBlock>,
        is_error: bool,
        timestamp: i64,
    },
}

/// User content is either a plain string or an ordered block sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A typed unit of message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "image", rename_all = "camelCase")]
    Image {
        #[serde(default)]
        data: String,
        #[serde(default = "default_mime_type")]
        mime_type: String,
    },
    #[serde(rename = "toolCall")]
    ToolCall {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default = "empty_object")]
        arguments: serde_json::Value,
    },
    #[serde(rename = "toolResult", rename_all = "camelCase")]
    ToolResult {
        #[serde(default)]
        tool_call_id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

fn default_mime_type() -> String {
    "image/png".to_string()
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// A tool the model may call. Always carries the schema under `parameters`,
/// regardless of what the source dialect called it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
}

/// A fully mapped request, ready for the completion bridge.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub stream: bool,
}

/// Why the downstream provider stopped generating. `Other` absorbs
/// unrecognized reasons so deserialization never fails; the dialect
/// mappers treat it as a normal completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
    Other,
}

impl<'de> Deserialize<'de> for StopReason {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "toolUse" => Self::ToolUse,
            "error" => Self::Error,
            "aborted" => Self::Aborted,
            _ => Self::Other,
        })
    }
}

impl Default for StopReason {
    fn default() -> Self {
        Self::Stop
    }
}

/// Token usage as reported by the provider. Passed through, never computed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default, rename = "totalTokens")]
    pub total_tokens: u64,
}

/// The authoritative completed message carried by the terminal `done`
/// event. Non-streaming responses are built from this alone, never by
/// concatenating deltas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: StopReason,
    #[serde(default)]
    pub usage: Usage,
}

/// Header of a streamed tool call, carried by `toolcall_start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallHeader {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// One event from the downstream provider's stdout, one JSON document per
/// line. For a given `contentIndex`, `*_start` precedes any `*_delta`,
/// which precedes `*_end`; exactly one `done` terminates the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    #[serde(rename = "text_start")]
    TextStart,
    #[serde(rename = "text_delta")]
    TextDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "text_end")]
    TextEnd,
    #[serde(rename = "toolcall_start", rename_all = "camelCase")]
    ToolCallStart {
        #[serde(default)]
        content_index: usize,
        #[serde(default)]
        tool_call: ToolCallHeader,
    },
    #[serde(rename = "toolcall_delta", rename_all = "camelCase")]
    ToolCallDelta {
        #[serde(default)]
        content_index: usize,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "toolcall_end", rename_all = "camelCase")]
    ToolCallEnd {
        #[serde(default)]
        content_index: usize,
    },
    #[serde(rename = "done")]
    Done {
        #[serde(default)]
        reason: Option<StopReason>,
        #[serde(default)]
        message: FinalMessage,
    },
}

impl ProviderEvent {
    /// Effective stop reason of a `done` event: the event-level `reason`
    /// wins over the one embedded in the final message.
    pub fn done_stop_reason(reason: Option<StopReason>, message: &FinalMessage) -> StopReason {
        reason.unwrap_or(message.stop_reason)
    }
}

/// A model descriptor as reported by the downstream provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Millisecond timestamp for newly created turns.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
