use super::chunker::{chunk_script, word_count, DEFAULT_MAX_WORDS_PER_CHUNK};
use super::{Character, ContinuationContext, ScriptPlan};
use crate::api::{TextModel, TextRequest};
use crate::config::{ReferenceImage, StyleConfig};
use crate::error::{Result, StoryboardError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

const WORDS_PER_MINUTE: f64 = 150.0;
const SECONDS_PER_SCENE: f64 = 10.0;
const SUGGESTION_SAMPLE_CHARS: usize = 2000;
const SUMMARY_SEPARATOR: &str = "\n\n";

/// One scene per ten seconds of narration at 150 words per minute, never
/// fewer than one.
pub fn estimate_scene_count(words: usize) -> usize {
    let seconds = words as f64 / WORDS_PER_MINUTE * 60.0;
    (seconds / SECONDS_PER_SCENE).ceil().max(1.0) as usize
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub script: String,
    pub style: StyleConfig,
    /// Overrides the estimated scene count for the whole script.
    pub scene_count: Option<usize>,
    pub reference_image: Option<ReferenceImage>,
    pub max_words_per_chunk: usize,
}

impl PlanRequest {
    pub fn new(script: impl Into<String>, style: StyleConfig) -> Self {
        Self {
            script: script.into(),
            style,
            scene_count: None,
            reference_image: None,
            max_words_per_chunk: DEFAULT_MAX_WORDS_PER_CHUNK,
        }
    }
}

/// Inputs for a single generation call over one chunk.
#[derive(Debug, Clone, Copy)]
pub struct FragmentRequest<'a> {
    pub chunk: &'a str,
    pub style: &'a StyleConfig,
    pub scene_count: Option<usize>,
    pub start_id: u32,
    pub context: Option<&'a ContinuationContext>,
    /// Only honoured when `context` is `None`, i.e. on the first chunk.
    pub reference_image: Option<&'a ReferenceImage>,
}

pub struct PlanGenerator {
    model: Arc<dyn TextModel>,
}

impl PlanGenerator {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    /// Builds a complete plan, splitting long scripts into chunks and
    /// carrying style and characters from one chunk to the next.
    ///
    /// A failure on any chunk discards everything generated so far.
    pub async fn generate_plan(&self, request: &PlanRequest) -> Result<ScriptPlan> {
        if request.script.trim().is_empty() {
            return Err(StoryboardError::Validation("Content cannot be empty.".to_string()));
        }

        let chunks = chunk_script(&request.script, request.max_words_per_chunk);
        let targets = scene_targets(&chunks, request.scene_count);
        let total = chunks.len();
        info!("Generating plan from {} chunk(s)", total);

        let mut plan: Option<ScriptPlan> = None;
        for (idx, (chunk, target)) in chunks.iter().zip(targets).enumerate() {
            let context = plan.as_ref().map(ScriptPlan::continuation);
            let start_id = plan.as_ref().map_or(1, |p| p.scenes.len() as u32 + 1);

            let fragment = self
                .generate_fragment(FragmentRequest {
                    chunk: chunk.as_str(),
                    style: &request.style,
                    scene_count: target,
                    start_id,
                    context: context.as_ref(),
                    reference_image: request.reference_image.as_ref(),
                })
                .await
                .map_err(|e| {
                    error!("Chunk {}/{} failed: {}", idx + 1, total, e);
                    StoryboardError::ChunkFailed {
                        index: idx + 1,
                        total,
                        source: Box::new(e),
                    }
                })?;

            info!(
                "Chunk {}/{} produced {} scene(s)",
                idx + 1,
                total,
                fragment.scenes.len()
            );
            plan = Some(match plan {
                None => fragment,
                Some(mut merged) => {
                    merge_fragment(&mut merged, fragment);
                    merged
                }
            });
        }

        let mut plan = plan.unwrap_or_default();
        dedup_characters(&mut plan.characters);
        Ok(plan)
    }

    /// Generates one plan fragment whose scenes are numbered from
    /// `start_id`, whatever ids the model returned.
    pub async fn generate_fragment(&self, request: FragmentRequest<'_>) -> Result<ScriptPlan> {
        let first_chunk = request.context.is_none();
        let scene_count = request
            .scene_count
            .unwrap_or_else(|| estimate_scene_count(word_count(request.chunk)));
        let text_request = TextRequest {
            system_instruction: Some(system_instruction(
                request.style,
                scene_count,
                request.context,
            )),
            user_content: user_prompt(
                request.chunk,
                request.style,
                first_chunk && request.reference_image.is_some(),
            ),
            reference_image: request.reference_image.filter(|_| first_chunk).cloned(),
            json_response: true,
        };

        let raw = self.model.generate_text(text_request).await?;
        let mut fragment = parse_fragment(&raw)?;
        renumber_scenes(&mut fragment, request.start_id);
        Ok(fragment)
    }

    /// Asks the model how many scenes a script deserves. Replies that are not
    /// a number fall back to [`estimate_scene_count`].
    pub async fn suggest_scene_count(&self, script: &str) -> Result<usize> {
        if script.trim().is_empty() {
            return Err(StoryboardError::Validation("Content cannot be empty.".to_string()));
        }

        let sample: String = script.chars().take(SUGGESTION_SAMPLE_CHARS).collect();
        let prompt = format!(
            "Read the following script/content and determine an optimal number of distinct \
             visual scenes for a video/slideshow. Respond with ONLY the integer number. Content: {}...",
            sample
        );

        let reply = self
            .model
            .generate_text(TextRequest {
                user_content: prompt,
                ..Default::default()
            })
            .await?;

        match leading_integer(&reply) {
            Some(count) if count > 0 => Ok(count),
            _ => {
                let fallback = estimate_scene_count(word_count(script));
                warn!("Could not parse scene suggestion {:?}, using {}", reply.trim(), fallback);
                Ok(fallback)
            }
        }
    }
}

/// The integer a reply starts with, so "12 scenes" and "12." both give 12.
fn leading_integer(reply: &str) -> Option<usize> {
    let reply = reply.trim_start();
    let end = reply
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(reply.len());
    reply[..end].parse().ok()
}

/// Per-chunk scene targets. Without an override each chunk is left to
/// [`estimate_scene_count`]; with one, the override is shared out by word
/// count.
fn scene_targets(chunks: &[String], scene_count: Option<usize>) -> Vec<Option<usize>> {
    let Some(total_scenes) = scene_count else {
        return vec![None; chunks.len()];
    };
    if chunks.len() <= 1 {
        return vec![Some(total_scenes.max(1)); chunks.len()];
    }

    let counts: Vec<usize> = chunks.iter().map(|c| word_count(c)).collect();
    let total_words = counts.iter().sum::<usize>().max(1);
    counts
        .into_iter()
        .map(|words| {
            let share = (total_scenes * words).div_ceil(total_words);
            Some(share.max(1))
        })
        .collect()
}

fn system_instruction(
    style: &StyleConfig,
    scene_count: usize,
    context: Option<&ContinuationContext>,
) -> String {
    let keywords = if style.style_keywords.trim().is_empty() {
        "None"
    } else {
        style.style_keywords.trim()
    };
    let scenes = format!("Target approximately {} scenes.", scene_count);

    let mut instruction = format!(
        r#"You are a storyboard assistant that turns scripts into cinematic image prompts.

CORE RESPONSIBILITIES:
1. Script Analysis: If the input is a topic, write a script. If it is a script, analyze and structure it.
2. Scene Breakdown: Break the content into distinct scenes. {scenes}
3. Visual Prompts: Create detailed image prompts for each scene.
4. Consistency: Keep characters and style strictly consistent across all prompts.

STYLE CONFIGURATION:
- Global Style: {style}
- Additional Keywords: {keywords}
- Aspect Ratio: {ratio}

RULES:
- Prompts must be long, detailed and cinematic. Include camera angles and lighting.
- Do not invent historical facts if the topic is historical.
- Set "generate_image" to true for key visual scenes.
- Reply with a JSON object: {{"script": string, "style": string, "characters": {{name: description}}, "scenes": [{{"id", "title", "description", "camera_angle", "lighting", "visual_prompt", "generate_image"}}]}}
"#,
        scenes = scenes,
        style = style.visual_style.as_str(),
        keywords = keywords,
        ratio = style.aspect_ratio,
    );

    if let Some(context) = context {
        let names: Vec<&str> = context.characters.iter().map(|c| c.name.as_str()).collect();
        instruction.push_str(&format!(
            r#"
CONTINUATION:
This input continues a script that has already been planned.
- Established style (reuse it exactly, do not derive a new one): {}
- Known characters (reuse these names and looks): {}
"#,
            context.style,
            if names.is_empty() { "None".to_string() } else { names.join(", ") }
        ));
    }
    instruction
}

fn user_prompt(chunk: &str, style: &StyleConfig, has_reference: bool) -> String {
    let niche = if style.niche.trim().is_empty() { "General" } else { style.niche.trim() };
    format!(
        "INPUT CONTENT:\n---\n{}\n---\nCONTEXT:\n- Niche: {}\n- Reference Image Provided: {}\n\nGenerate the JSON plan.",
        chunk,
        niche,
        if has_reference { "YES (See attached)" } else { "NO" }
    )
}

fn parse_fragment(raw: &str) -> Result<ScriptPlan> {
    let json_text = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(json_text)
        .map_err(|e| StoryboardError::Api(format!("Failed to parse plan JSON: {}", e)))
}

/// Ids returned by the model are only meaningful within one reply.
fn renumber_scenes(plan: &mut ScriptPlan, start_id: u32) {
    for (offset, scene) in plan.scenes.iter_mut().enumerate() {
        scene.id = start_id + offset as u32;
    }
}

/// Appends a later chunk's fragment. The first chunk's style is kept and
/// characters already known by name are not overwritten.
fn merge_fragment(plan: &mut ScriptPlan, fragment: ScriptPlan) {
    let summary = fragment.summary.trim();
    if !summary.is_empty() {
        if !plan.summary.is_empty() {
            plan.summary.push_str(SUMMARY_SEPARATOR);
        }
        plan.summary.push_str(summary);
    }
    plan.characters.extend(fragment.characters);
    dedup_characters(&mut plan.characters);
    plan.scenes.extend(fragment.scenes);
}

fn dedup_characters(characters: &mut Vec<Character>) {
    let mut seen = HashSet::new();
    characters.retain(|c| seen.insert(c.name.clone()));
}
