//! Gemini `generateContent` client behind the `DecisionService` boundary.
//! Transcript turns render to Gemini contents here and nowhere else.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use trolley_agent::decision::{
    ActionRequest, DecisionResponse, DecisionService, SafetyDecision, ToolSchema,
};
use trolley_agent::transcript::{ActionPayload, Transcript, Turn};
use trolley_core::config::DecisionConfig;
use trolley_core::{Error, Result};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiDecisionService {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl GeminiDecisionService {
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            api_base: config
                .api_base
                .as_deref()
                .unwrap_or(GEMINI_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
        }
    }

    fn render_transcript(transcript: &Transcript) -> Vec<Value> {
        let mut contents = Vec::new();
        for turn in transcript.turns() {
            match turn {
                Turn::Goal { text } => {
                    contents.push(serde_json::json!({
                        "role": "user",
                        "parts": [{"text": text}],
                    }));
                }
                Turn::Model { reasoning, actions } => {
                    let mut parts: Vec<Value> = Vec::new();
                    if let Some(text) = reasoning {
                        if !text.is_empty() {
                            parts.push(serde_json::json!({"text": text}));
                        }
                    }
                    for action in actions {
                        parts.push(serde_json::json!({
                            "functionCall": {
                                "name": action.name,
                                "args": action.args,
                            }
                        }));
                    }
                    if parts.is_empty() {
                        parts.push(serde_json::json!({"text": ""}));
                    }
                    contents.push(serde_json::json!({
                        "role": "model",
                        "parts": parts,
                    }));
                }
                Turn::Results { records } => {
                    let mut parts: Vec<Value> = Vec::new();
                    for record in records {
                        let response = match &record.payload {
                            ActionPayload::Observation { observation } => {
                                serde_json::json!({"url": observation.url})
                            }
                            ActionPayload::Tool { value } => value.clone(),
                            ActionPayload::Error { message } => {
                                serde_json::json!({"error": message})
                            }
                        };
                        parts.push(serde_json::json!({
                            "functionResponse": {
                                "name": record.action_name,
                                "response": response,
                            }
                        }));
                        if let ActionPayload::Observation { observation } = &record.payload {
                            if let Some(snapshot) = &observation.snapshot {
                                parts.push(serde_json::json!({
                                    "inlineData": {
                                        "mimeType": "image/png",
                                        "data": STANDARD.encode(snapshot),
                                    }
                                }));
                            }
                        }
                    }
                    contents.push(serde_json::json!({
                        "role": "user",
                        "parts": parts,
                    }));
                }
            }
        }
        contents
    }

    fn function_declarations(tools: &[ToolSchema]) -> Value {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();
        serde_json::json!([{"functionDeclarations": declarations}])
    }

    fn parse_candidate(candidate: GeminiCandidate) -> DecisionResponse {
        let mut text_parts: Vec<String> = Vec::new();
        let mut actions: Vec<ActionRequest> = Vec::new();
        let malformed =
            candidate.finish_reason.as_deref() == Some("MALFORMED_FUNCTION_CALL");

        if let Some(content) = candidate.content {
            for (i, part) in content.parts.into_iter().enumerate() {
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        text_parts.push(text);
                    }
                }
                if let Some(fc) = part.function_call {
                    let mut args = fc.args.unwrap_or_else(|| Value::Object(Default::default()));
                    // The computer-use models attach safety verdicts inside
                    // the call arguments; lift them out of the args proper.
                    let safety_decision = args
                        .as_object_mut()
                        .and_then(|map| map.remove("safety_decision"))
                        .and_then(|raw| serde_json::from_value::<SafetyDecision>(raw).ok());
                    actions.push(ActionRequest {
                        request_id: format!("gemini_call_{i}"),
                        name: fc.name,
                        args,
                        safety_decision,
                    });
                }
            }
        }

        DecisionResponse {
            reasoning: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join("\n"))
            },
            actions,
            malformed,
        }
    }
}

/// Truncates a response body for error messages, respecting char boundaries.
fn body_excerpt(body: &str) -> &str {
    let mut end = body.len().min(500);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[async_trait]
impl DecisionService for GeminiDecisionService {
    async fn decide(
        &self,
        system_prompt: &str,
        transcript: &Transcript,
        tools: &[ToolSchema],
    ) -> Result<DecisionResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );

        let mut request = serde_json::json!({
            "contents": Self::render_transcript(transcript),
            "systemInstruction": {"parts": [{"text": system_prompt}]},
        });
        if !tools.is_empty() {
            request["tools"] = Self::function_declarations(tools);
        }

        info!(
            model = %self.model,
            tools_count = tools.len(),
            turns = transcript.turns().len(),
            "calling Gemini"
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!(status = %status, body = %raw_body, "Gemini API error");
            return Err(Error::Transport(format!(
                "Gemini API error {status}: {raw_body}"
            )));
        }
        debug!(body_len = raw_body.len(), "Gemini raw response");

        let parsed: GeminiResponse = serde_json::from_str(&raw_body).map_err(|e| {
            Error::Transport(format!(
                "failed to parse Gemini response: {e}. Body: {}",
                body_excerpt(&raw_body)
            ))
        })?;
        let candidate = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| Error::Transport("no candidates in Gemini response".to_string()))?;

        let decision = Self::parse_candidate(candidate);
        info!(
            actions = decision.actions.len(),
            has_reasoning = decision.reasoning.is_some(),
            "Gemini response parsed"
        );
        Ok(decision)
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use trolley_agent::transcript::ActionRecord;
    use trolley_core::types::Observation;

    #[test]
    fn test_render_transcript_roles() {
        let mut transcript = Transcript::new("Shop for: milk");
        transcript.push_model(
            Some("searching".to_string()),
            vec![ActionRequest {
                request_id: "r1".to_string(),
                name: "click_at".to_string(),
                args: serde_json::json!({"x": 10, "y": 20}),
                safety_decision: None,
            }],
        );
        transcript.push_results(vec![ActionRecord {
            request_id: "r1".to_string(),
            action_name: "click_at".to_string(),
            payload: ActionPayload::Observation {
                observation: Observation {
                    url: "https://www.metro.ca/en/search".to_string(),
                    snapshot: Some(vec![1, 2, 3]),
                },
            },
            safety_acknowledgement: None,
        }]);

        let contents = GeminiDecisionService::render_transcript(&transcript);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert!(contents[1]["parts"][1].get("functionCall").is_some());
        assert_eq!(contents[2]["role"], "user");
        assert!(contents[2]["parts"][0].get("functionResponse").is_some());
        assert_eq!(contents[2]["parts"][1]["inlineData"]["mimeType"], "image/png");
    }

    #[test]
    fn test_parse_candidate_with_function_call() {
        let json = r#"{
            "content": {
                "parts": [
                    {"text": "I will click the product."},
                    {"functionCall": {"name": "click_at", "args": {"x": 120, "y": 340}}}
                ],
                "role": "model"
            }
        }"#;
        let candidate: GeminiCandidate = serde_json::from_str(json).unwrap();
        let decision = GeminiDecisionService::parse_candidate(candidate);
        assert_eq!(decision.reasoning.as_deref(), Some("I will click the product."));
        assert_eq!(decision.actions.len(), 1);
        assert_eq!(decision.actions[0].name, "click_at");
        assert_eq!(decision.actions[0].args["x"], 120);
    }

    #[test]
    fn test_parse_candidate_lifts_safety_decision() {
        let json = r#"{
            "content": {
                "parts": [
                    {"functionCall": {"name": "click_at", "args": {
                        "x": 1, "y": 2,
                        "safety_decision": {
                            "decision": "require_confirmation",
                            "explanation": "this looks like a purchase button"
                        }
                    }}}
                ],
                "role": "model"
            }
        }"#;
        let candidate: GeminiCandidate = serde_json::from_str(json).unwrap();
        let decision = GeminiDecisionService::parse_candidate(candidate);
        let action = &decision.actions[0];
        assert!(action.args.get("safety_decision").is_none());
        let safety = action.safety_decision.as_ref().unwrap();
        assert!(safety.requires_confirmation());
    }

    #[test]
    fn test_parse_candidate_flags_malformed_function_call() {
        let json = r#"{"finishReason": "MALFORMED_FUNCTION_CALL"}"#;
        let candidate: GeminiCandidate = serde_json::from_str(json).unwrap();
        let decision = GeminiDecisionService::parse_candidate(candidate);
        assert!(decision.malformed);
        assert!(decision.actions.is_empty());
        assert!(decision.reasoning.is_none());
    }

    #[test]
    fn test_parse_candidate_normal_stop_is_not_malformed() {
        let json = r#"{
            "content": {"parts": [{"text": "all done"}], "role": "model"},
            "finishReason": "STOP"
        }"#;
        let candidate: GeminiCandidate = serde_json::from_str(json).unwrap();
        let decision = GeminiDecisionService::parse_candidate(candidate);
        assert!(!decision.malformed);
        assert_eq!(decision.reasoning.as_deref(), Some("all done"));
    }

    #[test]
    fn test_body_excerpt_respects_char_boundaries() {
        // '€' is three bytes, so byte 500 lands inside a character.
        let body = "€".repeat(400);
        let excerpt = body_excerpt(&body);
        assert_eq!(excerpt.len(), 498);
        assert!(excerpt.chars().all(|c| c == '€'));

        let short = "plain ascii";
        assert_eq!(body_excerpt(short), short);
    }

    #[test]
    fn test_function_declarations_shape() {
        let tools = vec![ToolSchema {
            name: "navigate".to_string(),
            description: "Go to a URL".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {"url": {"type": "string"}}}),
        }];
        let rendered = GeminiDecisionService::function_declarations(&tools);
        assert_eq!(rendered[0]["functionDeclarations"][0]["name"], "navigate");
    }
}
