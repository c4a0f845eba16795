mod api;
mod config;
mod error;
mod export;
mod pipeline;
mod render;
mod scene;
mod usage;

use anyhow::Context;
use api::GeminiClient;
use clap::{Args, Parser, Subcommand};
use config::{AspectRatio, GenerationSettings, ReferenceImage, StyleConfig, VisualStyle, WaitTimeMode};
use export::{DownloadStager, PLAN_FILE_NAME};
use pipeline::{Pipeline, PipelineStatus, RenderOutcome};
use scene::chunker::DEFAULT_MAX_WORDS_PER_CHUNK;
use scene::planner::{PlanGenerator, PlanRequest};
use scene::stats::ScriptStats;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use usage::UsageCounter;

#[derive(Parser, Debug)]
#[command(name = "auto-storyboard")]
#[command(about = "Turn a script into scene prompts and render them into images", long_about = None)]
struct Cli {
    /// Gemini API key (defaults to GEMINI_API_KEY / API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Working directory for plans, images and the usage counter
    #[arg(short = 'w', long, global = true, default_value = "./output")]
    work_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Word, character and scene estimates for a script
    Stats(InputArgs),
    /// Ask the model how many scenes a script should have
    Suggest(InputArgs),
    /// Generate a scene plan and save it as JSON
    Plan(PlanArgs),
    /// Render images for a saved plan
    Render(RenderArgs),
    /// Generate a plan and render it in one go
    Run {
        #[command(flatten)]
        plan: PlanArgs,
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Input script text
    #[arg(short, long)]
    text: Option<String>,

    /// Input script file path
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StyleArgs {
    /// Global visual style preset
    #[arg(long, value_enum, default_value_t = VisualStyle::Cinematic)]
    style: VisualStyle,

    /// Extra style keywords, e.g. "photorealistic, 4k"
    #[arg(long, default_value = "")]
    keywords: String,

    #[arg(long, value_enum, default_value_t = AspectRatio::Landscape)]
    aspect_ratio: AspectRatio,

    /// Niche or topic for context
    #[arg(long, default_value = "")]
    niche: String,
}

impl StyleArgs {
    fn into_config(self) -> StyleConfig {
        StyleConfig {
            visual_style: self.style,
            style_keywords: self.keywords,
            aspect_ratio: self.aspect_ratio,
            niche: self.niche,
        }
    }
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    style: StyleArgs,

    /// Number of scenes (estimated from the script length if omitted)
    #[arg(long)]
    scenes: Option<usize>,

    /// Reference image whose look should be applied
    #[arg(long)]
    reference_image: Option<PathBuf>,

    /// Scripts with at least this many words are planned in chunks
    #[arg(long, default_value_t = DEFAULT_MAX_WORDS_PER_CHUNK)]
    max_words_per_chunk: usize,

    /// Where to save the plan (defaults to <work-dir>/script_plan.json)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Plan JSON produced by `plan`
    #[arg(short, long)]
    plan: PathBuf,

    #[arg(long, value_enum, default_value_t = AspectRatio::Landscape)]
    aspect_ratio: AspectRatio,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    /// JSON file with generation settings; flags below override it
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long, value_enum)]
    wait_mode: Option<WaitTimeMode>,

    /// Fixed pause between images, in seconds
    #[arg(long)]
    wait: Option<f64>,

    #[arg(long)]
    wait_min: Option<f64>,

    #[arg(long)]
    wait_max: Option<f64>,

    /// Save each image as soon as it is rendered
    #[arg(long)]
    auto_download: bool,

    /// Images to render per prompt
    #[arg(long)]
    runs: Option<u32>,

    /// First scene number to render
    #[arg(long)]
    start_from: Option<u32>,

    /// Only generate prompts, skip image rendering
    #[arg(long)]
    no_images: bool,
}

impl SettingsArgs {
    async fn resolve(&self) -> error::Result<GenerationSettings> {
        let mut settings = match &self.settings {
            Some(path) => GenerationSettings::load(path).await?,
            None => GenerationSettings::default(),
        };
        if let Some(mode) = self.wait_mode {
            settings.wait_time_mode = mode;
        }
        if let Some(wait) = self.wait {
            settings.fixed_wait_time = wait;
        }
        if let Some(min) = self.wait_min {
            settings.random_wait_time_min = min;
        }
        if let Some(max) = self.wait_max {
            settings.random_wait_time_max = max;
        }
        if let Some(runs) = self.runs {
            settings.runs_per_prompt = runs;
        }
        if let Some(start) = self.start_from {
            settings.start_from_prompt = start;
        }
        settings.auto_download |= self.auto_download;
        if self.no_images {
            settings.generate_images = false;
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    tokio::fs::create_dir_all(&cli.work_dir)
        .await
        .context("Failed to create work directory")?;

    match cli.command {
        Command::Stats(input) => {
            let script = read_input(&input).await?;
            let stats = ScriptStats::of(&script);
            let today = UsageCounter::in_dir(&cli.work_dir).today().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            info!("Images generated today: {}", today);
        }
        Command::Suggest(input) => {
            let script = read_input(&input).await?;
            let client = gemini(cli.api_key)?;
            let count = PlanGenerator::new(client).suggest_scene_count(&script).await?;
            println!("{}", count);
        }
        Command::Plan(args) => {
            let client = gemini(cli.api_key)?;
            let settings = GenerationSettings::default();
            let output = plan_path(&cli.work_dir, args.output.as_deref());
            let (request, style) = plan_request(args).await?;
            let mut pipeline = Pipeline::new(client.clone(), client, style, settings);
            if let Err(e) = pipeline.generate_plan(request).await {
                error!("Plan generation failed: {}", e);
                std::process::exit(1);
            }
            save_plan(&pipeline, &output).await?;
        }
        Command::Render(args) => {
            let client = gemini(cli.api_key)?;
            let settings = args.settings.resolve().await?;
            let plan = export::load_plan(&args.plan)
                .await
                .with_context(|| format!("Failed to read plan: {}", args.plan.display()))?;
            let style = StyleConfig {
                aspect_ratio: args.aspect_ratio,
                ..Default::default()
            };
            let mut pipeline = build_pipeline(client, style, settings, &cli.work_dir);
            pipeline.load_plan(plan);
            render_images(&mut pipeline, &cli.work_dir).await?;
        }
        Command::Run { plan, settings } => {
            let client = gemini(cli.api_key)?;
            let settings = settings.resolve().await?;
            let output = plan_path(&cli.work_dir, plan.output.as_deref());
            let (request, style) = plan_request(plan).await?;
            let mut pipeline = build_pipeline(client, style, settings, &cli.work_dir);

            info!("Step 1/2: Generating scene prompts...");
            if let Err(e) = pipeline.generate_plan(request).await {
                error!("Plan generation failed: {}", e);
                std::process::exit(1);
            }
            save_plan(&pipeline, &output).await?;

            info!("Step 2/2: Rendering images...");
            render_images(&mut pipeline, &cli.work_dir).await?;
        }
    }

    Ok(())
}

fn gemini(api_key: Option<String>) -> anyhow::Result<Arc<GeminiClient>> {
    let api_key = config::resolve_api_key(api_key)?;
    Ok(Arc::new(GeminiClient::new(api_key)?))
}

fn plan_path(work_dir: &Path, output: Option<&Path>) -> PathBuf {
    output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| work_dir.join(PLAN_FILE_NAME))
}

fn build_pipeline(
    client: Arc<GeminiClient>,
    style: StyleConfig,
    settings: GenerationSettings,
    work_dir: &Path,
) -> Pipeline {
    Pipeline::new(client.clone(), client, style, settings)
        .with_usage(UsageCounter::in_dir(work_dir))
        .with_downloads(DownloadStager::new(work_dir.join("images")))
}

async fn read_input(input: &InputArgs) -> anyhow::Result<String> {
    if let Some(text) = &input.text {
        Ok(text.clone())
    } else if let Some(path) = &input.file {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))
    } else {
        anyhow::bail!("Either --text or --file must be provided")
    }
}

async fn plan_request(args: PlanArgs) -> anyhow::Result<(PlanRequest, StyleConfig)> {
    let script = read_input(&args.input).await?;
    info!("Input script length: {} characters", script.len());

    let reference_image = match &args.reference_image {
        Some(path) => Some(
            ReferenceImage::load(path)
                .await
                .with_context(|| format!("Failed to load reference image: {}", path.display()))?,
        ),
        None => None,
    };

    let style = args.style.into_config();
    let request = PlanRequest {
        scene_count: args.scenes,
        reference_image,
        max_words_per_chunk: args.max_words_per_chunk,
        ..PlanRequest::new(script, style.clone())
    };
    Ok((request, style))
}

async fn save_plan(pipeline: &Pipeline, output: &Path) -> anyhow::Result<()> {
    if let Some(plan) = pipeline.plan() {
        export::export_plan(plan, output).await?;
        info!(
            "Plan has {} scene(s); {} image job(s) prepared",
            plan.scenes.len(),
            pipeline.jobs().len()
        );
    }
    Ok(())
}

async fn render_images(pipeline: &mut Pipeline, work_dir: &Path) -> anyhow::Result<()> {
    let cancel = pipeline.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping now; the image in progress will be discarded");
            cancel.cancel();
        }
    });

    let mut progress = pipeline.subscribe();
    tokio::spawn(async move {
        let mut last = (PipelineStatus::Idle, usize::MAX);
        while progress.changed().await.is_ok() {
            let (status, done, total) = {
                let snapshot = progress.borrow_and_update();
                let done = snapshot.jobs.iter().filter(|j| j.status.is_terminal()).count();
                (snapshot.status, done, snapshot.jobs.len())
            };
            if (status, done) != last {
                info!("[{:?}] {}/{} image job(s) resolved", status, done, total);
                last = (status, done);
            }
        }
    });

    match pipeline.render().await? {
        RenderOutcome::NothingToRender => {
            warn!("No scenes were identified for image generation");
            return Ok(());
        }
        RenderOutcome::Finished(status) => info!("Render pass finished: {:?}", status),
    }

    if !pipeline.settings().auto_download {
        let stager = DownloadStager::new(work_dir.join("images"));
        stager.download_all(pipeline.jobs()).await?;
    }

    let failed = pipeline
        .jobs()
        .iter()
        .filter(|j| j.status == render::JobStatus::Error)
        .count();
    if failed > 0 {
        warn!("{} image job(s) failed", failed);
    }

    if pipeline.status() == PipelineStatus::Error {
        error!("{}", pipeline.error().unwrap_or("Image generation stopped"));
        std::process::exit(1);
    }
    Ok(())
}
