use crate::error::{LlmError, Result};
use crate::types::{
    ChatCompletionRequest, Message, RESPONSE_FORMAT_JSON_OBJECT, RESPONSE_FORMAT_TEXT, Role,
    TOOL_TYPE_FUNCTION, ToolChoice,
};
use std::collections::HashSet;

const MAX_TOOL_NAME_LEN: usize = 64;
const MAX_TOP_LOGPROBS: u32 = 20;

/// Tool names must match `^[a-zA-Z0-9_-]{1,64}$`, the strictest rule across
/// the supported vendors.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_TOOL_NAME_LEN {
        return Err(LlmError::InvalidInput(format!(
            "tool name must be 1..={MAX_TOOL_NAME_LEN} characters: {name:?}"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {bad:?}; allowed: [a-zA-Z0-9_-]"
        )));
    }
    Ok(())
}

/// Vendor-neutral checks run before a request leaves the process.
pub fn validate_request(req: &ChatCompletionRequest) -> Result<()> {
    if req.model.trim().is_empty() {
        return Err(LlmError::InvalidInput("model is required".to_string()));
    }
    validate_messages(&req.messages)?;
    validate_sampling(req)?;

    if let Some(format) = &req.response_format {
        if format.kind != RESPONSE_FORMAT_TEXT && format.kind != RESPONSE_FORMAT_JSON_OBJECT {
            return Err(LlmError::InvalidInput(format!(
                "invalid response_format type {:?}; expected one of [{RESPONSE_FORMAT_TEXT}, {RESPONSE_FORMAT_JSON_OBJECT}]",
                format.kind
            )));
        }
    }

    if req.stream_options.is_some() && !req.stream {
        return Err(LlmError::InvalidInput(
            "stream_options requires stream = true".to_string(),
        ));
    }

    if let Some(top) = req.top_logprobs {
        if !req.logprobs {
            return Err(LlmError::InvalidInput(
                "top_logprobs requires logprobs = true".to_string(),
            ));
        }
        if top > MAX_TOP_LOGPROBS {
            return Err(LlmError::InvalidInput(format!(
                "top_logprobs must be between 0 and {MAX_TOP_LOGPROBS}"
            )));
        }
    }

    validate_tools(req)
}

fn validate_messages(messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Err(LlmError::InvalidInput(
            "at least one message is required".to_string(),
        ));
    }
    for (idx, msg) in messages.iter().enumerate() {
        let has_content = msg.content.as_ref().is_some_and(|c| !c.is_empty());
        match msg.role {
            Role::Tool => {
                if msg.tool_call_id.as_deref().unwrap_or("").is_empty() {
                    return Err(LlmError::InvalidInput(format!(
                        "message {idx}: tool_call_id is required for role tool"
                    )));
                }
            }
            Role::Assistant => {
                if !has_content && msg.tool_calls.is_empty() {
                    return Err(LlmError::InvalidInput(format!(
                        "message {idx}: assistant message needs content or tool_calls"
                    )));
                }
            }
            Role::System | Role::User => {
                if !has_content {
                    return Err(LlmError::InvalidInput(format!(
                        "message {idx}: content is blank for role {}",
                        msg.role.as_str()
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_sampling(req: &ChatCompletionRequest) -> Result<()> {
    if let Some(t) = req.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(LlmError::InvalidInput(
                "temperature must be in [0, 2.0]".to_string(),
            ));
        }
    }
    if let Some(p) = req.top_p {
        if !(p > 0.0 && p <= 1.0) {
            return Err(LlmError::InvalidInput(
                "top_p must be in (0, 1.0]".to_string(),
            ));
        }
    }
    for (field, value) in [
        ("presence_penalty", req.presence_penalty),
        ("frequency_penalty", req.frequency_penalty),
    ] {
        if let Some(v) = value {
            if !(-2.0..=2.0).contains(&v) {
                return Err(LlmError::InvalidInput(format!(
                    "{field} must be in [-2, 2]"
                )));
            }
        }
    }
    if req.max_tokens == Some(0) {
        return Err(LlmError::InvalidInput(
            "max_tokens must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_tools(req: &ChatCompletionRequest) -> Result<()> {
    let mut names = HashSet::with_capacity(req.tools.len());
    for tool in &req.tools {
        if tool.kind != TOOL_TYPE_FUNCTION {
            return Err(LlmError::InvalidInput(format!(
                "unsupported tool type {:?}",
                tool.kind
            )));
        }
        validate_tool_name(&tool.function.name)?;
        if !names.insert(tool.function.name.as_str()) {
            return Err(LlmError::InvalidInput(format!(
                "duplicate tool name {:?}",
                tool.function.name
            )));
        }
    }

    if let Some(ToolChoice::Function(name)) = &req.tool_choice {
        if !names.contains(name.as_str()) {
            return Err(LlmError::InvalidInput(format!(
                "tool_choice names undeclared function {name:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResponseFormat, StreamOptions, Tool, ToolCall};
    use serde_json::json;

    fn base() -> ChatCompletionRequest {
        ChatCompletionRequest::new("deepseek-chat", vec![Message::user("hello")])
    }

    #[test]
    fn accepts_minimal_request() {
        validate_request(&base()).unwrap();
    }

    #[test]
    fn rejects_missing_model_and_messages() {
        let mut req = base();
        req.model.clear();
        assert!(validate_request(&req).is_err());

        let req = ChatCompletionRequest::new("m", vec![]);
        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("at least one message"));
    }

    #[test]
    fn tool_message_requires_call_id() {
        let mut msg = Message::tool("c1", "42");
        msg.tool_call_id = None;
        let req = ChatCompletionRequest::new("m", vec![Message::user("q"), msg]);
        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("tool_call_id"));
    }

    #[test]
    fn assistant_tool_call_turn_without_text_is_valid() {
        let req = ChatCompletionRequest::new(
            "m",
            vec![
                Message::user("weather?"),
                Message::assistant_tool_calls("", vec![ToolCall::new("c1", "get_weather", "{}")]),
                Message::tool("c1", "sunny"),
            ],
        );
        validate_request(&req).unwrap();
    }

    #[test]
    fn sampling_ranges_are_enforced() {
        let mut req = base();
        req.temperature = Some(2.5);
        assert!(validate_request(&req).is_err());

        let mut req = base();
        req.top_p = Some(0.0);
        assert!(validate_request(&req).is_err());

        let mut req = base();
        req.frequency_penalty = Some(-2.1);
        assert!(validate_request(&req).is_err());

        let mut req = base();
        req.max_tokens = Some(0);
        assert!(validate_request(&req).is_err());

        let mut req = base();
        req.temperature = Some(0.0);
        req.top_p = Some(1.0);
        req.presence_penalty = Some(2.0);
        validate_request(&req).unwrap();
    }

    #[test]
    fn stream_options_and_logprobs_dependencies() {
        let mut req = base();
        req.stream_options = Some(StreamOptions {
            include_usage: true,
        });
        assert!(validate_request(&req).is_err());
        req.stream = true;
        validate_request(&req).unwrap();

        let mut req = base();
        req.top_logprobs = Some(5);
        assert!(validate_request(&req).is_err());
        req.logprobs = true;
        validate_request(&req).unwrap();
        req.top_logprobs = Some(21);
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn response_format_type_is_checked() {
        let mut req = base();
        req.response_format = Some(ResponseFormat {
            kind: "yaml".to_string(),
        });
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn tool_names_and_choice_are_checked() {
        let req = base().with_tools(vec![Tool::function("shell.execute", "", json!({}))]);
        assert!(validate_request(&req).is_err());

        let req = base().with_tools(vec![
            Tool::function("calc", "", json!({})),
            Tool::function("calc", "", json!({})),
        ]);
        assert!(validate_request(&req).unwrap_err().to_string().contains("duplicate"));

        let req = base()
            .with_tools(vec![Tool::function("calc", "", json!({}))])
            .with_tool_choice(ToolChoice::Function("weather".into()));
        assert!(validate_request(&req).is_err());

        let req = base()
            .with_tools(vec![Tool::function("calc", "", json!({}))])
            .with_tool_choice(ToolChoice::Function("calc".into()));
        validate_request(&req).unwrap();
    }

    #[test]
    fn tool_name_rules() {
        validate_tool_name("get_weather-v2").unwrap();
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name(&"a".repeat(65)).is_err());
        assert!(validate_tool_name("has space").is_err());
    }
}
