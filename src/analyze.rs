//! Client for the remote multimodal analysis service.
//!
//! The service accepts a `messages-v1` payload carrying the finished
//! recording as base64 video bytes alongside the user's prompt and returns
//! generated analysis text. The artifact is read back from disk here, which
//! is also what keeps the encoder honest about producing a re-openable
//! file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

const SYSTEM_TEXT: &str =
    "You are an expert media analyst. Analyze the video based on the user's prompt";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct AnalysisClient {
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl AnalysisClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SessionError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SessionError::Analyze(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
        })
    }

    /// Read the artifact back from disk and submit it with `prompt`.
    pub fn analyze(&self, video: &Path, prompt: &str) -> Result<String, SessionError> {
        let bytes = fs::read(video)?;
        tracing::info!(
            "submitting {} ({} bytes) for analysis",
            video.display(),
            bytes.len()
        );

        let request = AnalysisRequest::new(&bytes, prompt);
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| SessionError::Analyze(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SessionError::Analyze(format!(
                "service returned {}",
                response.status()
            )));
        }

        let parsed: AnalysisResponse = response
            .json()
            .map_err(|e| SessionError::Analyze(format!("unreadable response: {e}")))?;

        parsed
            .output
            .message
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| SessionError::Analyze("response contained no content".to_string()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest {
    schema_version: &'static str,
    messages: Vec<Message>,
    system: Vec<TextBlock>,
    inference_config: InferenceConfig,
}

impl AnalysisRequest {
    fn new(video_bytes: &[u8], prompt: &str) -> Self {
        Self {
            schema_version: "messages-v1",
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Video {
                        video: VideoPart {
                            format: "mp4",
                            source: VideoSource {
                                bytes: BASE64.encode(video_bytes),
                            },
                        },
                    },
                    ContentBlock::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
            system: vec![TextBlock {
                text: SYSTEM_TEXT.to_string(),
            }],
            inference_config: InferenceConfig {
                max_new_tokens: 300,
                top_p: 0.1,
                top_k: 20,
                temperature: 0.3,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentBlock {
    Video { video: VideoPart },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct VideoPart {
    format: &'static str,
    source: VideoSource,
}

#[derive(Debug, Serialize)]
struct VideoSource {
    bytes: String,
}

#[derive(Debug, Serialize)]
struct TextBlock {
    text: String,
}

#[derive(Debug, Serialize)]
struct InferenceConfig {
    max_new_tokens: u32,
    top_p: f32,
    top_k: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    output: ResponseOutput,
}

#[derive(Debug, Deserialize)]
struct ResponseOutput {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Vec<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_matches_the_wire_shape() {
        let request = AnalysisRequest::new(b"mp4-bytes", "what happens here?");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["schemaVersion"], "messages-v1");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"][0]["video"]["format"], "mp4");
        assert_eq!(
            value["messages"][0]["content"][0]["video"]["source"]["bytes"],
            BASE64.encode(b"mp4-bytes")
        );
        assert_eq!(
            value["messages"][0]["content"][1]["text"],
            "what happens here?"
        );
        assert_eq!(value["system"][0]["text"], SYSTEM_TEXT);
        assert_eq!(value["inferenceConfig"]["max_new_tokens"], 300);
    }

    #[test]
    fn test_response_text_is_extracted_from_first_content_block() {
        let body = serde_json::json!({
            "output": {
                "message": {
                    "content": [
                        { "text": "a person types at a desk" },
                        { "text": "ignored" }
                    ]
                }
            }
        });
        let parsed: AnalysisResponse = serde_json::from_value(body).unwrap();
        assert_eq!(
            parsed.output.message.content[0].text,
            "a person types at a desk"
        );
    }
}
