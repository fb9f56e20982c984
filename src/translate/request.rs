//! Map dialect requests into the canonical model.
//!
//! Both mappers produce `(turns, system_prompt, tools)`. System
//! instructions always end up in the single optional system prompt: the
//! Anthropic dialect's first-class `system` field is used as-is, while the
//! OpenAI dialect's embedded `system`-role messages are extracted (first
//! one wins) and dropped from the turn sequence. Tool results are lifted
//! out of their containing message into standalone `toolResult` turns;
//! their `toolName` is left blank because the downstream provider resolves
//! it from `toolCallId`.

use crate::canonical::{now_millis, ContentBlock, ToolDefinition, Turn, TurnContent};

use super::anthropic_types::{
    AnthropicContentBlock, AnthropicRole, MessageContent, MessagesRequest, ToolResultContent,
};
use super::openai_types::{ChatCompletionRequest, ChatContentPart, ChatMessageContent, ChatRole};

pub fn anthropic_to_canonical(
    req: &MessagesRequest,
) -> (Vec<Turn>, Option<String>, Vec<ToolDefinition>) {
    let system_prompt = req.system.as_ref().map(|s| s.as_text());

    let mut turns = Vec::new();
    for msg in &req.messages {
        match msg.role {
            AnthropicRole::User => match &msg.content {
                MessageContent::Text(text) => turns.push(Turn::User {
                    content: TurnContent::Text(text.clone()),
                    timestamp: now_millis(),
                }),
                MessageContent::Blocks(blocks) => {
                    let canonical = blocks.iter().map(user_block_to_canonical).collect();
                    lift_tool_results(canonical, &mut turns);
                }
            },
            AnthropicRole::Assistant => {
                let blocks = msg
                    .content
                    .blocks()
                    .iter()
                    .map(user_block_to_canonical)
                    .collect();
                turns.push(assistant_turn(blocks));
            }
        }
    }

    let tools = req
        .tools
        .as_ref()
        .map(|tools| {
            tools
                .iter()
                .map(|t| ToolDefinition {
                    name: t.name.clone(),
                    description: t.description.clone().unwrap_or_default(),
                    parameters: t.input_schema.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    (turns, system_prompt, tools)
}

pub fn openai_to_canonical(
    req: &ChatCompletionRequest,
) -> (Vec<Turn>, Option<String>, Vec<ToolDefinition>) {
    let mut system_prompt: Option<String> = None;
    let mut turns = Vec::new();

    for msg in &req.messages {
        match msg.role {
            ChatRole::System => {
                // First system message wins; none are forwarded as turns.
                if system_prompt.is_none() {
                    system_prompt = msg.content.as_ref().map(ChatMessageContent::as_text);
                }
            }
            ChatRole::User => turns.push(Turn::User {
                content: user_content(msg.content.as_ref()),
                timestamp: now_millis(),
            }),
            ChatRole::Assistant => {
                let mut blocks = Vec::new();
                if let Some(ref content) = msg.content {
                    let text = content.as_text();
                    if !text.is_empty() {
                        blocks.push(ContentBlock::Text { text });
                    }
                }
                if let Some(ref tool_calls) = msg.tool_calls {
                    for tc in tool_calls {
                        blocks.push(ContentBlock::ToolCall {
                            id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            arguments: parse_arguments(&tc.function.arguments),
                        });
                    }
                }
                turns.push(assistant_turn(blocks));
            }
            ChatRole::Tool => turns.push(Turn::ToolResult {
                tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
                tool_name: String::new(),
                content: vec![ContentBlock::Text {
                    text: msg
                        .content
                        .as_ref()
                        .map(ChatMessageContent::as_text)
                        .unwrap_or_default(),
                }],
                is_error: false,
                timestamp: now_millis(),
            }),
        }
    }

    let tools = req
        .tools
        .as_ref()
        .map(|tools| {
            tools
                .iter()
                .filter(|t| t.tool_type == "function")
                .map(|t| ToolDefinition {
                    name: t.function.name.clone(),
                    description: t.function.description.clone().unwrap_or_default(),
                    parameters: t
                        .function
                        .parameters
                        .clone()
                        .unwrap_or_else(empty_object),
                })
                .collect()
        })
        .unwrap_or_default();

    (turns, system_prompt, tools)
}

fn assistant_turn(mut blocks: Vec<ContentBlock>) -> Turn {
    if blocks.is_empty() {
        blocks.push(ContentBlock::Text {
            text: String::new(),
        });
    }
    Turn::Assistant {
        content: blocks,
        timestamp: now_millis(),
    }
}

fn user_block_to_canonical(block: &AnthropicContentBlock) -> ContentBlock {
    match block {
        AnthropicContentBlock::Text { text } => ContentBlock::Text { text: text.clone() },
        AnthropicContentBlock::Image { source } => ContentBlock::Image {
            data: source.data.clone(),
            mime_type: source.media_type.clone(),
        },
        AnthropicContentBlock::ToolUse { id, name, input } => ContentBlock::ToolCall {
            id: id.clone(),
            name: name.clone(),
            arguments: input.clone(),
        },
        AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_call_id: tool_use_id.clone(),
            content: tool_result_text(content.as_ref()),
            is_error: is_error.unwrap_or(false),
        },
    }
}

/// Split a user block sequence into turns: runs of ordinary content become
/// user turns, each tool result becomes its own `toolResult` turn, in the
/// original block order.
fn lift_tool_results(blocks: Vec<ContentBlock>, turns: &mut Vec<Turn>) {
    let mut pending: Vec<ContentBlock> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                if !pending.is_empty() {
                    turns.push(Turn::User {
                        content: TurnContent::Blocks(std::mem::take(&mut pending)),
                        timestamp: now_millis(),
                    });
                }
                turns.push(Turn::ToolResult {
                    tool_call_id,
                    tool_name: String::new(),
                    content: vec![ContentBlock::Text { text: content }],
                    is_error,
                    timestamp: now_millis(),
                });
            }
            other => pending.push(other),
        }
    }

    if !pending.is_empty() {
        turns.push(Turn::User {
            content: TurnContent::Blocks(pending),
            timestamp: now_millis(),
        });
    }
}

/// User content passes through as-is: a string stays a string, a parts
/// array becomes the equivalent block sequence.
fn user_content(content: Option<&ChatMessageContent>) -> TurnContent {
    match content {
        Some(ChatMessageContent::Text(text)) => TurnContent::Text(text.clone()),
        Some(ChatMessageContent::Parts(parts)) => {
            TurnContent::Blocks(parts.iter().filter_map(part_to_canonical).collect())
        }
        None => TurnContent::Text(String::new()),
    }
}

fn part_to_canonical(part: &ChatContentPart) -> Option<ContentBlock> {
    match part {
        ChatContentPart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
        ChatContentPart::ImageUrl { image_url } => parse_data_url(&image_url.url),
    }
}

/// Only `data:` URLs carry image bytes the downstream protocol can accept;
/// remote URLs are dropped.
fn parse_data_url(url: &str) -> Option<ContentBlock> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    Some(ContentBlock::Image {
        data: data.to_string(),
        mime_type: mime_type.to_string(),
    })
}

fn tool_result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(t)) => t.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    }
}

fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.is_empty() {
        return empty_object();
    }
    serde_json::from_str(raw).unwrap_or_else(|_| empty_object())
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
