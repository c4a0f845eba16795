use crate::error::{Result, StoryboardError};
use base64::Engine;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variables consulted for the API credential, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    #[value(name = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    #[value(name = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    #[value(name = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    #[value(name = "3:4")]
    StandardPortrait,
    #[serde(rename = "1:1")]
    #[value(name = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Standard => "4:3",
            AspectRatio::StandardPortrait => "3:4",
            AspectRatio::Square => "1:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global look applied to every scene prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VisualStyle {
    #[default]
    Cinematic,
    Realistic,
    Anime,
    Cgi,
    Medieval,
    Historical,
    Documentary,
}

impl VisualStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualStyle::Cinematic => "cinematic",
            VisualStyle::Realistic => "realistic",
            VisualStyle::Anime => "anime",
            VisualStyle::Cgi => "CGI",
            VisualStyle::Medieval => "medieval",
            VisualStyle::Historical => "historical",
            VisualStyle::Documentary => "documentary",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StyleConfig {
    pub visual_style: VisualStyle,
    pub style_keywords: String,
    pub aspect_ratio: AspectRatio,
    pub niche: String,
}

/// Inline image sent along with the first chunk of a plan request.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

impl ReferenceImage {
    pub async fn load(path: &Path) -> Result<Self> {
        let mime_type = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            _ => {
                return Err(StoryboardError::Validation(format!(
                    "Unsupported reference image type: {}",
                    path.display()
                )))
            }
        };

        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WaitTimeMode {
    #[default]
    Fixed,
    Random,
}

/// Pacing and job-expansion settings. A render pass takes its own copy, so
/// edits only apply to the next pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub wait_time_mode: WaitTimeMode,
    /// Seconds.
    pub fixed_wait_time: f64,
    pub random_wait_time_min: f64,
    pub random_wait_time_max: f64,
    pub auto_download: bool,
    pub runs_per_prompt: u32,
    pub start_from_prompt: u32,
    pub generate_images: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            wait_time_mode: WaitTimeMode::Fixed,
            fixed_wait_time: 2.0,
            random_wait_time_min: 2.0,
            random_wait_time_max: 5.0,
            auto_download: false,
            runs_per_prompt: 1,
            start_from_prompt: 1,
            generate_images: true,
        }
    }
}

impl GenerationSettings {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.runs_per_prompt < 1 {
            return Err(StoryboardError::Validation(
                "runs_per_prompt must be at least 1".to_string(),
            ));
        }
        if self.start_from_prompt < 1 {
            return Err(StoryboardError::Validation(
                "start_from_prompt must be at least 1".to_string(),
            ));
        }
        let waits = [
            self.fixed_wait_time,
            self.random_wait_time_min,
            self.random_wait_time_max,
        ];
        if waits.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(StoryboardError::Validation(
                "wait times must be non-negative numbers of seconds".to_string(),
            ));
        }
        if self.random_wait_time_min > self.random_wait_time_max {
            return Err(StoryboardError::Validation(format!(
                "random wait min ({}) is greater than max ({})",
                self.random_wait_time_min, self.random_wait_time_max
            )));
        }
        Ok(())
    }

    /// Draws the pause that follows a resolved job.
    pub fn next_delay(&self) -> Duration {
        let seconds = match self.wait_time_mode {
            WaitTimeMode::Fixed => self.fixed_wait_time,
            WaitTimeMode::Random => {
                let (min, max) = (self.random_wait_time_min, self.random_wait_time_max);
                if max > min {
                    use rand::Rng;
                    rand::rng().random_range(min..max)
                } else {
                    min
                }
            }
        };
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Resolves the API credential from an explicit value or the environment.
pub fn resolve_api_key(explicit: Option<String>) -> Result<String> {
    if let Some(key) = explicit.filter(|k| !k.trim().is_empty()) {
        return Ok(key);
    }
    API_KEY_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|k| !k.trim().is_empty()))
        .ok_or_else(|| {
            StoryboardError::Config(format!(
                "API key not found. Please set it via --api-key or the {} environment variable",
                API_KEY_VARS.join(" / ")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        let settings = GenerationSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_zero_runs_and_start() {
        let settings = GenerationSettings {
            runs_per_prompt: 0,
            ..Default::default()
        };
        assert_matches!(settings.validate(), Err(StoryboardError::Validation(_)));

        let settings = GenerationSettings {
            start_from_prompt: 0,
            ..Default::default()
        };
        assert_matches!(settings.validate(), Err(StoryboardError::Validation(_)));
    }

    #[test]
    fn rejects_inverted_random_range() {
        let settings = GenerationSettings {
            random_wait_time_min: 6.0,
            random_wait_time_max: 3.0,
            ..Default::default()
        };
        assert_matches!(settings.validate(), Err(StoryboardError::Validation(_)));
    }

    #[test]
    fn random_delay_stays_in_range() {
        let settings = GenerationSettings {
            wait_time_mode: WaitTimeMode::Random,
            random_wait_time_min: 1.0,
            random_wait_time_max: 2.0,
            ..Default::default()
        };
        for _ in 0..100 {
            let delay = settings.next_delay();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_secs(2));
        }
    }

    #[test]
    fn negative_fixed_delay_is_floored() {
        let settings = GenerationSettings {
            fixed_wait_time: -3.0,
            ..Default::default()
        };
        assert_eq!(settings.next_delay(), Duration::ZERO);
    }

    #[test]
    fn settings_file_fills_missing_fields() {
        let settings: GenerationSettings =
            serde_json::from_str(r#"{"runs_per_prompt": 3, "wait_time_mode": "random"}"#).unwrap();
        assert_eq!(settings.runs_per_prompt, 3);
        assert_eq!(settings.wait_time_mode, WaitTimeMode::Random);
        assert_eq!(settings.start_from_prompt, 1);
        assert!(settings.generate_images);
    }

    #[test]
    fn explicit_api_key_wins() {
        assert_eq!(resolve_api_key(Some("abc".into())).unwrap(), "abc");
    }

    #[test]
    fn aspect_ratio_serializes_as_ratio() {
        let json = serde_json::to_string(&AspectRatio::Portrait).unwrap();
        assert_eq!(json, "\"9:16\"");
        assert_eq!(AspectRatio::Square.to_string(), "1:1");
    }
}
