pub mod chunker;
pub mod planner;
pub mod stats;

use crate::error::{Result, StoryboardError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// One unit of the script, mapped to zero or one generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Sequential across the whole plan, starting at 1.
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub camera_angle: String,
    #[serde(default)]
    pub lighting: String,
    #[serde(default)]
    pub visual_prompt: String,
    #[serde(default = "default_generate_image")]
    pub generate_image: bool,
}

fn default_generate_image() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Structured plan produced from a script: characters, global style and the
/// ordered scenes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptPlan {
    #[serde(default, alias = "script")]
    pub summary: String,
    #[serde(default, deserialize_with = "deserialize_characters")]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub scenes: Vec<Scene>,
}

impl ScriptPlan {
    /// Scenes that will produce images, in id order.
    pub fn image_scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.iter().filter(|s| s.generate_image)
    }

    /// Job ids and download names are derived from scene ids, so a plan
    /// with repeated ids cannot be rendered.
    pub fn check_scene_ids(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for scene in &self.scenes {
            if !seen.insert(scene.id) {
                return Err(StoryboardError::Validation(format!(
                    "Scene id {} appears more than once in the plan",
                    scene.id
                )));
            }
        }
        Ok(())
    }

    pub fn continuation(&self) -> ContinuationContext {
        ContinuationContext {
            style: self.style.clone(),
            characters: self.characters.clone(),
        }
    }
}

/// Style and cast established by earlier chunks, handed to the next chunk's
/// generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuationContext {
    pub style: String,
    pub characters: Vec<Character>,
}

/// Models return characters either as a list of `{name, description}` or as
/// an object keyed by name whose values are a description string or an
/// object holding one.
fn deserialize_characters<'de, D>(deserializer: D) -> std::result::Result<Vec<Character>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Described {
        Text(String),
        Object {
            #[serde(default)]
            description: String,
        },
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        List(Vec<Character>),
        Map(serde_json::Map<String, serde_json::Value>),
        Null,
    }

    let characters = match Wire::deserialize(deserializer)? {
        Wire::List(list) => list,
        Wire::Map(map) => map
            .into_iter()
            .map(|(name, value)| {
                let description = match serde_json::from_value::<Described>(value.clone()) {
                    Ok(Described::Text(text)) => text,
                    Ok(Described::Object { description }) => description,
                    Err(_) => value.to_string(),
                };
                Character { name, description }
            })
            .collect(),
        Wire::Null => Vec::new(),
    };
    Ok(characters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn scene(id: u32) -> Scene {
        Scene {
            id,
            title: String::new(),
            description: String::new(),
            camera_angle: String::new(),
            lighting: String::new(),
            visual_prompt: "p".into(),
            generate_image: true,
        }
    }

    #[test]
    fn repeated_scene_ids_are_rejected() {
        let plan = ScriptPlan {
            scenes: vec![scene(1), scene(2), scene(1)],
            ..Default::default()
        };
        assert_matches!(
            plan.check_scene_ids(),
            Err(StoryboardError::Validation(msg)) if msg.contains("Scene id 1")
        );

        let plan = ScriptPlan {
            scenes: vec![scene(3), scene(1)],
            ..Default::default()
        };
        assert!(plan.check_scene_ids().is_ok());
    }

    #[test]
    fn characters_accept_object_form_in_order() {
        let plan: ScriptPlan = serde_json::from_str(
            r#"{
                "script": "A tale",
                "style": "noir",
                "characters": {"Zed": "tall", "Amy": {"description": "short"}},
                "scenes": []
            }"#,
        )
        .unwrap();

        assert_eq!(plan.summary, "A tale");
        assert_eq!(
            plan.characters,
            vec![
                Character { name: "Zed".into(), description: "tall".into() },
                Character { name: "Amy".into(), description: "short".into() },
            ]
        );
    }

    #[test]
    fn characters_accept_list_form() {
        let plan: ScriptPlan = serde_json::from_str(
            r#"{"summary": "x", "characters": [{"name": "Bo", "description": "kind"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.characters.len(), 1);
        assert_eq!(plan.characters[0].name, "Bo");
    }

    #[test]
    fn scene_defaults_to_generating_an_image() {
        let scene: Scene = serde_json::from_str(r#"{"id": 4, "visual_prompt": "a cat"}"#).unwrap();
        assert!(scene.generate_image);
        assert_eq!(scene.title, "");
    }
}
