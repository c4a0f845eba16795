use crate::config::GenerationSettings;
use crate::scene::ScriptPlan;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Generating,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// One request to render an image for a scene/run pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationJob {
    /// `<sceneId>-<runIndex>`
    pub id: String,
    pub scene_id: u32,
    pub run_index: u32,
    pub prompt: String,
    pub status: JobStatus,
    /// `data:` URI of the rendered image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageGenerationJob {
    pub fn new(scene_id: u32, run_index: u32, prompt: impl Into<String>) -> Self {
        Self {
            id: format!("{}-{}", scene_id, run_index),
            scene_id,
            run_index,
            prompt: prompt.into(),
            status: JobStatus::Pending,
            image_url: None,
            error: None,
        }
    }

    /// Download name, stable for a given scene and run.
    pub fn file_stem(&self) -> String {
        format!("scene_{}_{}", self.scene_id, self.run_index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobQueue {
    /// No scene asked for an image; not an error, but nothing to start.
    Empty,
    Ready(Vec<ImageGenerationJob>),
}

impl JobQueue {
    pub fn into_jobs(self) -> Vec<ImageGenerationJob> {
        match self {
            JobQueue::Empty => Vec::new(),
            JobQueue::Ready(jobs) => jobs,
        }
    }
}

/// Expands a finished plan into pending jobs: `runs_per_prompt` per
/// image-bearing scene, in scene-id order, skipping scenes numbered below
/// `start_from_prompt`.
pub fn build_jobs(plan: &ScriptPlan, settings: &GenerationSettings) -> JobQueue {
    if !settings.generate_images {
        return JobQueue::Empty;
    }

    let runs = settings.runs_per_prompt.max(1);
    let start = settings.start_from_prompt.max(1);

    let mut scenes: Vec<_> = plan
        .image_scenes()
        .filter(|scene| scene.id >= start)
        .collect();
    scenes.sort_by_key(|scene| scene.id);

    let jobs: Vec<ImageGenerationJob> = scenes
        .into_iter()
        .flat_map(|scene| {
            (0..runs).map(move |run| ImageGenerationJob::new(scene.id, run, &scene.visual_prompt))
        })
        .collect();

    if jobs.is_empty() {
        JobQueue::Empty
    } else {
        JobQueue::Ready(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Scene;

    fn scene(id: u32, generate_image: bool) -> Scene {
        Scene {
            id,
            title: format!("Scene {}", id),
            description: String::new(),
            camera_angle: String::new(),
            lighting: String::new(),
            visual_prompt: format!("prompt for {}", id),
            generate_image,
        }
    }

    fn plan(scenes: Vec<Scene>) -> ScriptPlan {
        ScriptPlan {
            scenes,
            ..Default::default()
        }
    }

    #[test]
    fn runs_expand_only_image_scenes() {
        let settings = GenerationSettings {
            runs_per_prompt: 2,
            ..Default::default()
        };
        let queue = build_jobs(&plan(vec![scene(1, true), scene(2, false)]), &settings);

        let JobQueue::Ready(jobs) = queue else {
            panic!("expected jobs");
        };
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "1-0");
        assert_eq!(jobs[1].id, "1-1");
        assert!(jobs.iter().all(|j| j.scene_id == 1));
        assert!(jobs.iter().all(|j| j.prompt == "prompt for 1"));
        assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));
    }

    #[test]
    fn no_image_scenes_means_empty_queue() {
        let queue = build_jobs(
            &plan(vec![scene(1, false), scene(2, false)]),
            &GenerationSettings::default(),
        );
        assert_eq!(queue, JobQueue::Empty);
    }

    #[test]
    fn disabled_generation_prepares_nothing() {
        let settings = GenerationSettings {
            generate_images: false,
            ..Default::default()
        };
        assert_eq!(build_jobs(&plan(vec![scene(1, true)]), &settings), JobQueue::Empty);
    }

    #[test]
    fn start_offset_skips_earlier_scenes() {
        let settings = GenerationSettings {
            start_from_prompt: 3,
            ..Default::default()
        };
        let jobs = build_jobs(
            &plan(vec![scene(1, true), scene(2, true), scene(3, true), scene(4, false), scene(5, true)]),
            &settings,
        )
        .into_jobs();

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["3-0", "5-0"]);
    }

    #[test]
    fn jobs_follow_scene_id_order() {
        let jobs = build_jobs(
            &plan(vec![scene(2, true), scene(1, true)]),
            &GenerationSettings::default(),
        )
        .into_jobs();
        assert_eq!(jobs[0].scene_id, 1);
        assert_eq!(jobs[1].scene_id, 2);
    }

    #[test]
    fn file_stem_names_scene_and_run() {
        assert_eq!(ImageGenerationJob::new(4, 2, "p").file_stem(), "scene_4_2");
    }
}
