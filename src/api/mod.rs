//! Remote generation backends.
//!
//! The planner and the render scheduler only talk to [`TextModel`] and
//! [`ImageModel`]; [`gemini::GeminiClient`] implements both over REST.

pub mod gemini;

pub use gemini::GeminiClient;

use crate::config::{AspectRatio, ReferenceImage};
use crate::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub system_instruction: Option<String>,
    pub user_content: String,
    pub reference_image: Option<ReferenceImage>,
    /// Ask the model for a JSON document instead of free text.
    pub json_response: bool,
}

#[async_trait]
pub trait TextModel: Send + Sync {
    /// Returns the raw text of the model's reply.
    async fn generate_text(&self, request: TextRequest) -> Result<String>;
}

#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Renders one image and returns it as a `data:` URI.
    async fn generate_image(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<String>;
}
