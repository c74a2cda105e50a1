use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

/// Uniform tool response envelope. All tools return
/// `Content::text(json_string)` with the outcome in the payload.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub status: &'static str,
    pub content: String,
    pub content_type: &'static str,
    pub metadata: ToolMetadata,
}

#[derive(Debug, Serialize)]
pub struct ToolMetadata {
    pub tool_name: String,
    pub result_count: Option<usize>,
    pub duration_seconds: f64,
}

impl ToolResponse {
    pub fn success(content: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "success",
            content,
            content_type: "json",
            metadata,
        }
    }

    pub fn error(message: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "error",
            content: message,
            content_type: "text",
            metadata,
        }
    }

    /// Convert to an MCP result. Always succeeds at the transport level;
    /// error information lives in the JSON payload (`"status": "error"`)
    /// where the client can read it without aborting sibling calls.
    pub fn into_call_tool_result(mut self) -> CallToolResult {
        self.metadata.duration_seconds = clamp_finite(self.metadata.duration_seconds);
        let safe = self;
        match serde_json::to_string(&safe) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => CallToolResult::success(vec![Content::text(format!(
                r#"{{"status":"error","content":"serialization failed: {e}","content_type":"text","metadata":{{}}}}"#
            ))]),
        }
    }
}

/// Clamp non-finite f64 to 0.0 for safe JSON serialization.
fn clamp_finite(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_serializes() {
        let response = ToolResponse::success(
            "[]".to_string(),
            ToolMetadata {
                tool_name: "search_hansard_contributions".to_string(),
                result_count: Some(0),
                duration_seconds: 0.42,
            },
        );
        let json = serde_json::to_string(&response).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["status"], "success");
        assert_eq!(parsed["metadata"]["tool_name"], "search_hansard_contributions");
        assert_eq!(parsed["metadata"]["result_count"], 0);
    }

    #[test]
    fn non_finite_duration_is_clamped() {
        assert_eq!(clamp_finite(f64::NAN), 0.0);
        assert_eq!(clamp_finite(f64::INFINITY), 0.0);
        assert_eq!(clamp_finite(1.5), 1.5);
    }
}
