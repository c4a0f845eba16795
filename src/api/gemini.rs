use super::{ImageModel, TextModel, TextRequest};
use crate::config::AspectRatio;
use crate::error::{Result, StoryboardError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const TEXT_MODEL: &str = "gemini-2.5-flash";
const IMAGE_MODEL: &str = "imagen-4.0-generate-001";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self { api_key, client })
    }

    async fn post(&self, model: &str, method: &str, body: &serde_json::Value) -> Result<String> {
        let url = format!("{}/{}:{}", API_BASE, model, method);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(failure_from_response(status, &text));
        }
        Ok(text)
    }
}

/// Maps a non-success HTTP reply onto the error taxonomy.
fn failure_from_response(status: StatusCode, body: &str) -> StoryboardError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return StoryboardError::QuotaExceeded(body.to_string());
    }
    if body.contains("filtered") {
        return StoryboardError::SafetyFilter(body.to_string());
    }
    StoryboardError::Api(format!("HTTP {}: {}", status.as_u16(), body))
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate_text(&self, request: TextRequest) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(image) = &request.reference_image {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.data,
                }
            }));
        }
        parts.push(json!({ "text": request.user_content }));

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });
        if let Some(instruction) = &request.system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
        }
        if request.json_response {
            body["generationConfig"] = json!({ "responseMimeType": "application/json" });
        }

        info!("Calling {} ({} chars of input)", TEXT_MODEL, request.user_content.len());
        let raw = self.post(TEXT_MODEL, "generateContent", &body).await?;
        let response: GenerateContentResponse = serde_json::from_str(&raw)?;

        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            warn!("Text request blocked: {}", reason);
            return Err(StoryboardError::Api(format!("Request blocked by the model: {}", reason)));
        }

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(StoryboardError::Api("No response text generated.".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ImageModel for GeminiClient {
    async fn generate_image(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(StoryboardError::Validation(
                "Prompt cannot be empty for image generation.".to_string(),
            ));
        }

        let body = json!({
            "instances": [{ "prompt": format!("{} --ar {}", prompt, aspect_ratio) }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": aspect_ratio.as_str(),
                "outputMimeType": "image/jpeg",
            }
        });

        let raw = self.post(IMAGE_MODEL, "predict", &body).await?;
        let response: PredictResponse = serde_json::from_str(&raw)?;
        image_from_predictions(response.predictions)
    }
}

fn image_from_predictions(predictions: Vec<Prediction>) -> Result<String> {
    let Some(prediction) = predictions.into_iter().next() else {
        return Err(StoryboardError::Api(
            "Image generation failed: No image data received from API.".to_string(),
        ));
    };

    if let Some(reason) = prediction.rai_filtered_reason {
        return Err(StoryboardError::SafetyFilter(reason));
    }

    match prediction.bytes_base64_encoded {
        Some(bytes) => {
            let mime = prediction.mime_type.unwrap_or_else(|| "image/jpeg".to_string());
            Ok(format!("data:{};base64,{}", mime, bytes))
        }
        None => Err(StoryboardError::Api(
            "Image generation failed: No image data received from API.".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn too_many_requests_is_quota() {
        let err = failure_from_response(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_matches!(err, StoryboardError::QuotaExceeded(_));
        assert!(err.to_string().to_lowercase().contains("quota exceeded"));
    }

    #[test]
    fn filtered_body_is_safety_rejection() {
        let err = failure_from_response(StatusCode::BAD_REQUEST, "prompt was filtered");
        assert_matches!(err, StoryboardError::SafetyFilter(_));
    }

    #[test]
    fn other_failures_keep_status_and_body() {
        let err = failure_from_response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_matches!(err, StoryboardError::Api(ref msg) if msg == "HTTP 500: boom");
    }

    #[test]
    fn prediction_becomes_data_uri() {
        let response: PredictResponse = serde_json::from_str(
            r#"{"predictions": [{"bytesBase64Encoded": "QUJD", "mimeType": "image/jpeg"}]}"#,
        )
        .unwrap();
        let uri = image_from_predictions(response.predictions).unwrap();
        assert_eq!(uri, "data:image/jpeg;base64,QUJD");
    }

    #[test]
    fn filtered_prediction_is_safety_rejection() {
        let response: PredictResponse =
            serde_json::from_str(r#"{"predictions": [{"raiFilteredReason": "unsafe"}]}"#).unwrap();
        assert_matches!(
            image_from_predictions(response.predictions),
            Err(StoryboardError::SafetyFilter(_))
        );
    }

    #[test]
    fn empty_predictions_is_api_error() {
        assert_matches!(image_from_predictions(Vec::new()), Err(StoryboardError::Api(_)));
    }

    #[tokio::test]
    async fn empty_prompt_rejected_before_any_call() {
        let client = GeminiClient::new("key".into()).unwrap();
        assert_matches!(
            client.generate_image("   ", AspectRatio::Square).await,
            Err(StoryboardError::Validation(_))
        );
    }
}
