/// Seconds between two sampled frames.
pub const DEFAULT_INTERVAL_SEC: f64 = 10.0;
/// Frames sampled per clip in windowed mode.
pub const DEFAULT_FRAMES_PER_CLIP: usize = 3;
/// Upper bound on clips processed in one batch run.
pub const DEFAULT_MAX_CLIPS: usize = 50;
/// Clips saved by `preload`.
pub const DEFAULT_PRELOAD_CLIPS: usize = 5;
/// Courtesy pause between two description requests.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 100;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_TOKENS: u32 = 150;
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_PROMPT: &str =
    "Describe: worker action, tools, objects, safety gear. Be concise.";
/// JPEG quality used when sending frames to the description service.
pub const JPEG_QUALITY: u8 = 85;
/// Request timeout for remote calls, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// USD per 1K input tokens (gpt-4o-mini: $0.15 / 1M).
pub const COST_PER_1K_INPUT_TOKENS: f64 = 0.150 / 1000.0;
/// USD per 1K output tokens (gpt-4o-mini: $0.60 / 1M).
pub const COST_PER_1K_OUTPUT_TOKENS: f64 = 0.600 / 1000.0;

pub const DEFAULT_DATASET: &str = "builddotai/Egocentric-10K";
pub const HUB_BASE_URL: &str = "https://huggingface.co";
/// Factories present in the default archive catalog.
pub const DEFAULT_CATALOG_FACTORIES: u32 = 5;
pub const DEFAULT_CATALOG_WORKERS: u32 = 1;
pub const DEFAULT_CATALOG_PARTS: u32 = 1;

pub const DEFAULT_CLIPS_DIR: &str = "sample_clips";
pub const DEFAULT_OUTPUT: &str = "egocentric_analysis.json";
