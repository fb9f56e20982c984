//! Map the canonical final message back into dialect responses.
//!
//! Non-streaming responses are built from the authoritative [`FinalMessage`]
//! carried by the terminal `done` event only; partial events are never
//! re-assembled. Stop-reason mapping is total: every downstream reason,
//! including unrecognized ones, maps to a valid terminal value.

use crate::canonical::{ContentBlock, FinalMessage, ModelInfo, StopReason};

use super::anthropic_types::{
    AnthropicModel, AnthropicUsage, MessagesResponse, ResponseContentBlock,
};
use super::openai_types::{
    ChatChoice, ChatCompletionResponse, ChatResponseMessage, ChatToolCall, ChatToolCallFunction,
    ChatUsage, ModelObject,
};

/// Static `created` on OpenAI model descriptors, for wire compatibility.
const MODEL_CREATED: i64 = 1_677_610_600;

pub fn anthropic_stop_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Stop => "end_turn",
        StopReason::Length => "max_tokens",
        StopReason::ToolUse => "tool_use",
        StopReason::Error | StopReason::Aborted | StopReason::Other => "end_turn",
    }
}

pub fn openai_finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Stop => "stop",
        StopReason::Length => "length",
        StopReason::ToolUse => "tool_calls",
        StopReason::Error | StopReason::Aborted | StopReason::Other => "stop",
    }
}

pub fn final_to_anthropic(
    message: &FinalMessage,
    request_id: &str,
    model: &str,
) -> MessagesResponse {
    let mut content: Vec<ResponseContentBlock> = message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => {
                Some(ResponseContentBlock::Text { text: text.clone() })
            }
            ContentBlock::ToolCall {
                id,
                name,
                arguments,
            } => Some(ResponseContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: arguments.clone(),
            }),
            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => None,
        })
        .collect();

    // Clients expect at least one content block.
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    MessagesResponse {
        id: request_id.to_string(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(anthropic_stop_reason(message.stop_reason).to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: message.usage.input,
            output_tokens: message.usage.output,
        },
    }
}

pub fn final_to_openai(
    message: &FinalMessage,
    request_id: &str,
    model: &str,
    created: i64,
) -> ChatCompletionResponse {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolCall {
                id,
                name,
                arguments,
            } => tool_calls.push(ChatToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: serde_json::to_string(arguments).unwrap_or_default(),
                },
            }),
            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.concat())
    };

    ChatCompletionResponse {
        id: request_id.to_string(),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatResponseMessage {
                role: "assistant".to_string(),
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some(openai_finish_reason(message.stop_reason).to_string()),
        }],
        usage: ChatUsage {
            prompt_tokens: message.usage.input,
            completion_tokens: message.usage.output,
            total_tokens: message.usage.total_tokens,
        },
    }
}

pub fn model_to_openai(model: &ModelInfo) -> ModelObject {
    ModelObject {
        id: model.id.clone(),
        object: "model".to_string(),
        created: MODEL_CREATED,
        owned_by: "github-copilot".to_string(),
    }
}

pub fn model_to_anthropic(model: &ModelInfo) -> AnthropicModel {
    let name = model.name.clone().unwrap_or_else(|| model.id.clone());
    AnthropicModel {
        id: model.id.clone(),
        name: name.clone(),
        display_name: name,
        model_type: "model".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Usage;

    fn text_final(text: &str, stop_reason: StopReason) -> FinalMessage {
        FinalMessage {
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason,
            usage: Usage {
                input: 10,
                output: 2,
                total_tokens: 12,
            },
        }
    }

    #[test]
    fn stop_reason_maps_are_total() {
        for reason in [
            StopReason::Stop,
            StopReason::Length,
            StopReason::ToolUse,
            StopReason::Error,
            StopReason::Aborted,
            StopReason::Other,
        ] {
            assert!(!anthropic_stop_reason(reason).is_empty());
            assert!(!openai_finish_reason(reason).is_empty());
        }
        assert_eq!(anthropic_stop_reason(StopReason::Other), "end_turn");
        assert_eq!(openai_finish_reason(StopReason::Other), "stop");
        assert_eq!(anthropic_stop_reason(StopReason::ToolUse), "tool_use");
        assert_eq!(openai_finish_reason(StopReason::ToolUse), "tool_calls");
    }

    #[test]
    fn anthropic_response_from_final_message() {
        let resp = final_to_anthropic(
            &text_final("Hi there", StopReason::Stop),
            "msg_1",
            "claude-sonnet-4.5",
        );

        assert_eq!(resp.response_type, "message");
        assert_eq!(resp.role, "assistant");
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 2);
        assert!(matches!(
            resp.content[0],
            ResponseContentBlock::Text { ref text } if text == "Hi there"
        ));
    }

    #[test]
    fn openai_response_from_final_message() {
        let resp = final_to_openai(
            &text_final("Hi there", StopReason::Stop),
            "chatcmpl-1",
            "gpt-4.1",
            1_700_000_000,
        );

        assert_eq!(resp.object, "chat.completion");
        let choice = &resp.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("Hi there"));
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.prompt_tokens, 10);
        assert_eq!(resp.usage.completion_tokens, 2);
    }

    #[test]
    fn tool_call_final_message_maps_in_both_dialects() {
        let message = FinalMessage {
            content: vec![
                ContentBlock::Text {
                    text: "Let me check.".to_string(),
                },
                ContentBlock::ToolCall {
                    id: "c1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: serde_json::json!({"loc": "NYC"}),
                },
            ],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        };

        let anthropic = final_to_anthropic(&message, "msg_1", "m");
        assert_eq!(anthropic.stop_reason.as_deref(), Some("tool_use"));
        match &anthropic.content[1] {
            ResponseContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "c1");
                assert_eq!(name, "get_weather");
                assert_eq!(input["loc"], "NYC");
            }
            other => panic!("expected tool_use block, got {other:?}"),
        }

        let openai = final_to_openai(&message, "chatcmpl-1", "m", 0);
        let choice = &openai.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.name, "get_weather");
        let parsed: serde_json::Value =
            serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(parsed["loc"], "NYC");
    }

    #[test]
    fn empty_final_message_pads_anthropic_content() {
        let message = FinalMessage::default();
        let resp = final_to_anthropic(&message, "msg_1", "m");
        assert_eq!(resp.content.len(), 1);
    }

    #[test]
    fn model_descriptor_mapping() {
        let info = ModelInfo {
            id: "claude-sonnet-4.5".to_string(),
            name: Some("Claude Sonnet 4.5".to_string()),
        };

        let openai = model_to_openai(&info);
        assert_eq!(openai.object, "model");
        assert_eq!(openai.owned_by, "github-copilot");

        let anthropic = model_to_anthropic(&info);
        assert_eq!(anthropic.display_name, "Claude Sonnet 4.5");

        let unnamed = ModelInfo {
            id: "gpt-4.1".to_string(),
            name: None,
        };
        assert_eq!(model_to_anthropic(&unnamed).name, "gpt-4.1");
    }
}
