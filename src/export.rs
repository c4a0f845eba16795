use crate::error::{Result, StoryboardError};
use crate::render::{ImageGenerationJob, JobStatus};
use crate::scene::ScriptPlan;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const PLAN_FILE_NAME: &str = "script_plan.json";

/// Gap between files in a batch download.
pub const DOWNLOAD_STAGGER: Duration = Duration::from_millis(300);

/// Writes the plan as pretty-printed JSON.
pub async fn export_plan(plan: &ScriptPlan, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(plan)?).await?;
    info!("Plan saved to: {}", path.display());
    Ok(())
}

/// Reads a plan written by [`export_plan`] (or edited by hand). Plans with
/// repeated scene ids are rejected.
pub async fn load_plan(path: &Path) -> Result<ScriptPlan> {
    let text = tokio::fs::read_to_string(path).await?;
    let plan: ScriptPlan = serde_json::from_str(&text)?;
    plan.check_scene_ids()?;
    Ok(plan)
}

/// Writes rendered images into a download directory.
#[derive(Debug, Clone)]
pub struct DownloadStager {
    dir: PathBuf,
    stagger: Duration,
}

impl DownloadStager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stagger: DOWNLOAD_STAGGER,
        }
    }

    /// Saves one completed job's image as `scene_<id>_<run>.<ext>`.
    pub async fn save(&self, job: &ImageGenerationJob) -> Result<PathBuf> {
        let uri = match (&job.status, &job.image_url) {
            (JobStatus::Completed, Some(uri)) => uri,
            _ => {
                return Err(StoryboardError::Validation(format!(
                    "Job {} has no rendered image",
                    job.id
                )))
            }
        };

        let (mime, bytes) = decode_data_uri(uri)?;
        let path = self
            .dir
            .join(format!("{}.{}", job.file_stem(), extension_for(&mime)));

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, bytes).await?;
        info!("Image saved to: {}", path.display());
        Ok(path)
    }

    /// Saves every completed job in order, pausing between files.
    pub async fn download_all(&self, jobs: &[ImageGenerationJob]) -> Result<Vec<PathBuf>> {
        let completed: Vec<_> = jobs
            .iter()
            .filter(|job| job.status == JobStatus::Completed && job.image_url.is_some())
            .collect();

        let mut saved = Vec::with_capacity(completed.len());
        for (idx, job) in completed.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.stagger).await;
            }
            saved.push(self.save(job).await?);
        }
        info!("Downloaded {} image(s) to {}", saved.len(), self.dir.display());
        Ok(saved)
    }
}

/// Splits a `data:<mime>;base64,<payload>` URI into its MIME type and bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| StoryboardError::Decode("not a data URI".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| StoryboardError::Decode("data URI has no payload".to_string()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| StoryboardError::Decode("data URI is not base64".to_string()))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| StoryboardError::Decode(e.to_string()))?;
    Ok((mime.to_string(), bytes))
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Scene;
    use assert_matches::assert_matches;

    fn completed(scene_id: u32, run: u32, uri: &str) -> ImageGenerationJob {
        let mut job = ImageGenerationJob::new(scene_id, run, "p");
        job.status = JobStatus::Completed;
        job.image_url = Some(uri.to_string());
        job
    }

    #[test]
    fn decodes_base64_data_uri() {
        let (mime, bytes) = decode_data_uri("data:image/jpeg;base64,QUJD").unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(bytes, b"ABC");
    }

    #[test]
    fn rejects_malformed_uris() {
        assert_matches!(decode_data_uri("http://x/y.jpg"), Err(StoryboardError::Decode(_)));
        assert_matches!(decode_data_uri("data:image/png,abc"), Err(StoryboardError::Decode(_)));
        assert_matches!(decode_data_uri("data:image/png;base64"), Err(StoryboardError::Decode(_)));
    }

    #[tokio::test]
    async fn save_names_file_by_scene_and_run() {
        let dir = tempfile::tempdir().unwrap();
        let stager = DownloadStager::new(dir.path());

        let path = stager.save(&completed(3, 1, "data:image/png;base64,QUJD")).await.unwrap();

        assert_eq!(path, dir.path().join("scene_3_1.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"ABC");
    }

    #[tokio::test]
    async fn save_refuses_unfinished_job() {
        let dir = tempfile::tempdir().unwrap();
        let stager = DownloadStager::new(dir.path());
        let job = ImageGenerationJob::new(1, 0, "p");
        assert_matches!(stager.save(&job).await, Err(StoryboardError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_download_skips_failures_and_staggers() {
        let dir = tempfile::tempdir().unwrap();
        let stager = DownloadStager::new(dir.path());
        let mut failed = ImageGenerationJob::new(2, 0, "p");
        failed.status = JobStatus::Error;
        let jobs = vec![
            completed(1, 0, "data:image/jpeg;base64,QUJD"),
            failed,
            completed(3, 0, "data:image/jpeg;base64,QUJD"),
        ];

        let started = tokio::time::Instant::now();
        let saved = stager.download_all(&jobs).await.unwrap();

        assert_eq!(
            saved,
            vec![dir.path().join("scene_1_0.jpg"), dir.path().join("scene_3_0.jpg")]
        );
        assert!(started.elapsed() >= DOWNLOAD_STAGGER);
    }

    #[tokio::test]
    async fn plan_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(PLAN_FILE_NAME);
        let plan = ScriptPlan {
            summary: "s".into(),
            style: "noir".into(),
            characters: Vec::new(),
            scenes: vec![Scene {
                id: 1,
                title: "t".into(),
                description: "d".into(),
                camera_angle: "c".into(),
                lighting: "l".into(),
                visual_prompt: "v".into(),
                generate_image: false,
            }],
        };

        export_plan(&plan, &path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"summary\": \"s\""));
        assert_eq!(load_plan(&path).await.unwrap(), plan);
    }

    #[tokio::test]
    async fn edited_plan_with_repeated_ids_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PLAN_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"summary": "s", "scenes": [
                {"id": 1, "visual_prompt": "a"},
                {"id": 2, "visual_prompt": "b"},
                {"id": 2, "visual_prompt": "c"}
            ]}"#,
        )
        .unwrap();

        assert_matches!(load_plan(&path).await, Err(StoryboardError::Validation(_)));
    }
}
