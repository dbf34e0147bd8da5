use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use clipscribe_core::config::{
    DEFAULT_API_BASE, DEFAULT_CATALOG_FACTORIES, DEFAULT_CATALOG_PARTS, DEFAULT_CATALOG_WORKERS,
    DEFAULT_CLIPS_DIR, DEFAULT_DATASET, DEFAULT_FRAMES_PER_CLIP, DEFAULT_INTERVAL_SEC,
    DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_OUTPUT, DEFAULT_PRELOAD_CLIPS, DEFAULT_PROMPT,
    DEFAULT_REQUEST_DELAY_MS, DEFAULT_TIMEOUT_SECS, HUB_BASE_URL,
};
use clipscribe_core::pipeline::Mode;
use clipscribe_core::sampler::TimestampMode;

#[derive(Parser)]
#[command(
    name = "clipscribe",
    about = "Sample frames from dataset video clips and describe them with a vision model"
)]
pub struct Cli {
    /// Access token for the dataset hub.
    #[arg(long, env = "HF_TOKEN", hide_env_values = true, global = true)]
    pub hf_token: Option<String>,

    /// API key for the description service.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_api_key: Option<String>,

    /// Timeout for each remote request, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Where clips come from. At most one may be given.
#[derive(Args)]
#[group(multiple = false)]
pub struct SourceArgs {
    /// Directory of preloaded clip_NN.mp4 / clip_NN.json pairs.
    #[arg(long)]
    pub clips_dir: Option<PathBuf>,

    /// Tar archive URL to fetch directly (repeatable).
    #[arg(long = "archive")]
    pub archives: Vec<String>,

    /// Draw clips from random archives of the dataset catalog.
    #[arg(long)]
    pub remote: bool,
}

/// Layout of the remote dataset.
#[derive(Args)]
pub struct CatalogArgs {
    #[arg(long, default_value = HUB_BASE_URL)]
    pub hub_url: String,

    /// Dataset repository id.
    #[arg(long, default_value = DEFAULT_DATASET)]
    pub dataset: String,

    #[arg(long, default_value_t = DEFAULT_CATALOG_FACTORIES)]
    pub factories: u32,

    #[arg(long, default_value_t = DEFAULT_CATALOG_WORKERS)]
    pub workers: u32,

    #[arg(long, default_value_t = DEFAULT_CATALOG_PARTS)]
    pub parts: u32,

    /// Seed for random clip selection.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// One pretty-printed JSON document per run.
    Document,
    /// Append one {worker_id, analysis} line per described frame.
    Lines,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sample frames from clips and describe each one.
    Analyze {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        catalog: CatalogArgs,

        /// preview (first frame), windowed (first N frames) or full (whole clip).
        #[arg(short, long, default_value = "windowed")]
        mode: Mode,

        /// Number of clips to analyze (default: 1 in preview mode, 50 otherwise).
        #[arg(short, long)]
        count: Option<usize>,

        /// Seconds between sampled frames.
        #[arg(short, long, default_value_t = DEFAULT_INTERVAL_SEC)]
        interval: f64,

        /// Frames per clip in windowed mode.
        #[arg(long, default_value_t = DEFAULT_FRAMES_PER_CLIP)]
        max_frames: usize,

        /// How presentation timestamps become seconds: time-base or frame-rate.
        #[arg(long, default_value = "time-base")]
        timestamp_mode: TimestampMode,

        #[arg(long, default_value = DEFAULT_PROMPT)]
        prompt: String,

        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        /// Base URL of the OpenAI-compatible API.
        #[arg(long, default_value = DEFAULT_API_BASE)]
        api_base: String,

        #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
        max_tokens: u32,

        /// Pause between description requests, in milliseconds.
        #[arg(long, default_value_t = DEFAULT_REQUEST_DELAY_MS)]
        delay_ms: u64,

        /// Path to write results to.
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Document)]
        format: OutputFormat,

        /// Directory to save sampled frames to.
        #[arg(long)]
        debug_frames: Option<PathBuf>,

        /// TrueType font used to caption saved frames.
        #[arg(long, requires = "debug_frames")]
        overlay_font: Option<PathBuf>,
    },

    /// Download clips into a local directory for later analysis.
    Preload {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        catalog: CatalogArgs,

        #[arg(long, default_value = DEFAULT_CLIPS_DIR)]
        out_dir: PathBuf,

        #[arg(short, long, default_value_t = DEFAULT_PRELOAD_CLIPS)]
        count: usize,
    },
}
