use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use super::preprocess::NormalizedImage;
use super::recognition::{OcrEngine, OcrError};

const DEFAULT_MODEL: &str = "@cf/llava-hf/llava-1.5-7b-hf";

const TRANSCRIBE_PROMPT: &str = concat!(
    "Transcribe all text visible in this image exactly as written, ",
    "preserving line breaks. Return only the text. ",
    "Return nothing if the image contains no text."
);

/// Client for a Cloudflare Workers AI vision model used as an OCR engine.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
}

#[derive(Deserialize)]
struct WorkersAiResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    errors: Vec<WorkersAiMessage>,
    result: Option<WorkersAiResult>,
}

#[derive(Deserialize)]
struct WorkersAiMessage {
    message: String,
}

#[derive(Deserialize)]
struct WorkersAiResult {
    description: String,
}

impl WorkersAiClient {
    pub fn new(account_id: &str, api_token: &str) -> Self {
        Self {
            http: Client::new(),
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, self.model
        )
    }
}

#[async_trait]
impl OcrEngine for WorkersAiClient {
    fn name(&self) -> &'static str {
        "workers_ai"
    }

    async fn extract_text(&self, image: &NormalizedImage) -> Result<String, OcrError> {
        let png = image.to_png()?;

        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&png),
            "prompt": TRANSCRIBE_PROMPT,
            "max_tokens": 1024
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: WorkersAiResponse = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                OcrError::Parse(e)
            } else {
                OcrError::Api(format!("HTTP {}", status))
            }
        })?;

        parse_description(status.is_success(), parsed)
    }
}

fn parse_description(http_ok: bool, response: WorkersAiResponse) -> Result<String, OcrError> {
    if !http_ok || response.success == Some(false) {
        let detail = response
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(OcrError::Api(if detail.is_empty() {
            "request rejected".to_string()
        } else {
            detail
        }));
    }

    response
        .result
        .map(|r| r.description)
        .ok_or_else(|| OcrError::Api("response carried no result".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> WorkersAiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_successful_response() {
        let resp = parse(
            r#"{"success":true,"errors":[],"result":{"description":" ACME STORE\nTOTAL 4.20 "}}"#,
        );
        assert_eq!(parse_description(true, resp).unwrap(), " ACME STORE\nTOTAL 4.20 ");
    }

    #[test]
    fn test_api_errors_are_joined() {
        let resp = parse(
            r#"{"success":false,
                "errors":[{"message":"quota exceeded"},{"message":"retry later"}],
                "result":null}"#,
        );
        let err = parse_description(true, resp).unwrap_err();
        assert_eq!(
            err.to_string(),
            "engine API returned an error: quota exceeded; retry later"
        );
    }

    #[test]
    fn test_missing_result_is_an_error() {
        let resp = parse(r#"{"success":true}"#);
        assert!(matches!(parse_description(true, resp), Err(OcrError::Api(_))));
    }

    #[test]
    fn test_endpoint_includes_account_and_model() {
        let client = WorkersAiClient::new("acct123", "token").with_model("@cf/meta/llama-vision");
        assert_eq!(
            client.endpoint(),
            "https://api.cloudflare.com/client/v4/accounts/acct123/ai/run/@cf/meta/llama-vision"
        );
    }
}
