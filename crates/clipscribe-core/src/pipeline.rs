use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::clip::Clip;
use crate::config::{
    DEFAULT_FRAMES_PER_CLIP, DEFAULT_INTERVAL_SEC, DEFAULT_PROMPT, DEFAULT_REQUEST_DELAY_MS,
};
use crate::debug::DebugRenderer;
use crate::describe::Describer;
use crate::error::{PipelineError, SampleError};
use crate::report::{ClipReport, FrameResult};
use crate::sampler::{extract_frames, SampledFrame, SamplingPolicy, TimestampMode};

/// What a run samples from each clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The first frame only. A description failure stops the run.
    SingleFramePreview,
    /// Up to `max_frames` frames from the start of the clip.
    WindowedSample,
    /// Frames across the whole clip.
    FullVideoSample,
}

impl Mode {
    /// Whether a failed description should end the run instead of being recorded.
    pub fn halts_on_error(self) -> bool {
        matches!(self, Mode::SingleFramePreview)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::SingleFramePreview => write!(f, "preview"),
            Mode::WindowedSample => write!(f, "windowed"),
            Mode::FullVideoSample => write!(f, "full"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preview" => Ok(Mode::SingleFramePreview),
            "windowed" => Ok(Mode::WindowedSample),
            "full" => Ok(Mode::FullVideoSample),
            other => Err(format!(
                "unknown mode {other:?}, expected preview, windowed or full"
            )),
        }
    }
}

/// Parameters for the analysis pipeline.
pub struct PipelineConfig {
    pub mode: Mode,
    /// Seconds between sampled frames.
    pub interval_sec: f64,
    /// Frames per clip in windowed mode. Ignored by the other modes.
    pub max_frames: usize,
    pub timestamp_mode: TimestampMode,
    pub prompt: String,
    /// Pause between two description requests.
    pub request_delay: Duration,
    /// Directory to write sampled frames to, or None to skip.
    pub debug_frames_dir: Option<PathBuf>,
    /// Font used to caption debug frames.
    pub overlay_font: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::WindowedSample,
            interval_sec: DEFAULT_INTERVAL_SEC,
            max_frames: DEFAULT_FRAMES_PER_CLIP,
            timestamp_mode: TimestampMode::default(),
            prompt: DEFAULT_PROMPT.to_string(),
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            debug_frames_dir: None,
            overlay_font: None,
        }
    }
}

impl PipelineConfig {
    /// The sampling policy implied by the mode.
    pub fn sampling_policy(&self) -> Result<SamplingPolicy, SampleError> {
        let max_frames = match self.mode {
            Mode::SingleFramePreview => Some(1),
            Mode::WindowedSample => Some(self.max_frames),
            Mode::FullVideoSample => None,
        };
        Ok(SamplingPolicy::new(self.interval_sec, max_frames)?
            .with_timestamp_mode(self.timestamp_mode))
    }

    fn debug_renderer(&self) -> Result<Option<DebugRenderer>, PipelineError> {
        self.debug_frames_dir
            .as_ref()
            .map(|dir| DebugRenderer::new(dir, self.overlay_font.as_deref()))
            .transpose()
    }
}

/// Totals over a batch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub clips: usize,
    pub failed_clips: usize,
    pub frames: usize,
    pub failed_frames: usize,
    pub total_cost_usd: f64,
}

impl RunSummary {
    fn add(&mut self, report: &ClipReport) {
        self.clips += 1;
        if report.error.is_some() {
            self.failed_clips += 1;
        }
        self.frames += report.total_frames;
        self.failed_frames += report.failed_frames();
        self.total_cost_usd += report.total_cost_usd;
    }
}

fn empty_report(clip: &Clip, config: &PipelineConfig, model: &str) -> ClipReport {
    ClipReport {
        clip: clip.label.clone(),
        worker_id: clip.metadata.worker_id.clone(),
        factory_id: clip.metadata.factory_id.clone(),
        duration_sec: clip.metadata.duration_sec,
        analysis_type: config.mode.to_string(),
        total_frames: 0,
        total_cost_usd: 0.0,
        model: model.to_string(),
        results: Vec::new(),
        error: None,
    }
}

/// Sample one clip and describe every sampled frame in order.
pub fn analyze_clip(
    clip: &Clip,
    describer: &dyn Describer,
    config: &PipelineConfig,
) -> Result<ClipReport, PipelineError> {
    let renderer = config.debug_renderer()?;
    analyze_clip_with(clip, describer, config, renderer.as_ref())
}

fn analyze_clip_with(
    clip: &Clip,
    describer: &dyn Describer,
    config: &PipelineConfig,
    renderer: Option<&DebugRenderer>,
) -> Result<ClipReport, PipelineError> {
    let policy = config.sampling_policy()?;

    info!(
        clip = %clip.label,
        worker = %clip.metadata.worker_label(),
        factory = %clip.metadata.factory_label(),
        mode = %config.mode,
        "analyzing clip"
    );

    let frames = extract_frames(&clip.video, &policy)?;
    if frames.is_empty() {
        warn!(clip = %clip.label, "clip decoded to zero frames");
    }

    describe_frames(clip, &frames, describer, config, renderer)
}

fn describe_frames(
    clip: &Clip,
    frames: &[SampledFrame],
    describer: &dyn Describer,
    config: &PipelineConfig,
    renderer: Option<&DebugRenderer>,
) -> Result<ClipReport, PipelineError> {
    let mut report = empty_report(clip, config, describer.model());

    for (index, sampled) in frames.iter().enumerate() {
        if let Some(renderer) = renderer {
            if let Err(e) = renderer.save_frame(&clip.label, index, sampled, &clip.metadata) {
                warn!(clip = %clip.label, frame = index, error = %e, "failed to save debug frame");
            }
        }

        if index > 0 && !config.request_delay.is_zero() {
            thread::sleep(config.request_delay);
        }

        let result = match describer.describe(&sampled.frame.image, &config.prompt) {
            Ok(d) => {
                report.total_cost_usd += d.cost_usd;
                FrameResult {
                    frame: index,
                    time_sec: sampled.timestamp_seconds,
                    analysis: Some(d.description),
                    cost_usd: d.cost_usd,
                    input_tokens: d.input_tokens,
                    output_tokens: d.output_tokens,
                    error: None,
                }
            }
            Err(e) if config.mode.halts_on_error() => {
                error!(clip = %clip.label, frame = index, error = %e, "description failed");
                return Err(PipelineError::Describe {
                    frame: index,
                    source: e,
                });
            }
            Err(e) => {
                warn!(clip = %clip.label, frame = index, error = %e, "description failed, continuing");
                FrameResult {
                    frame: index,
                    time_sec: sampled.timestamp_seconds,
                    analysis: None,
                    cost_usd: 0.0,
                    input_tokens: 0,
                    output_tokens: 0,
                    error: Some(error_chain(&e)),
                }
            }
        };
        report.results.push(result);
    }

    report.total_frames = report.results.len();
    info!(
        clip = %clip.label,
        frames = report.total_frames,
        failed = report.failed_frames(),
        cost_usd = report.total_cost_usd,
        "clip analyzed"
    );
    Ok(report)
}

/// Render an error with its sources, outermost first.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

/// Analyze clips one after another, handing each report to `on_report`.
///
/// A clip that cannot be sampled is reported with its error and the run moves
/// on. In preview mode a description failure ends the run.
pub fn run_batch<F>(
    clips: &[Clip],
    describer: &dyn Describer,
    config: &PipelineConfig,
    mut on_report: F,
) -> Result<RunSummary, PipelineError>
where
    F: FnMut(&ClipReport) -> Result<(), PipelineError>,
{
    // Reject a bad interval once, before touching any clip.
    config.sampling_policy()?;
    let renderer = config.debug_renderer()?;

    let mut summary = RunSummary::default();
    for (i, clip) in clips.iter().enumerate() {
        info!(clip_index = i, clip_count = clips.len(), "processing clip");

        let report = match analyze_clip_with(clip, describer, config, renderer.as_ref()) {
            Ok(report) => report,
            Err(PipelineError::Sample(e)) => {
                error!(clip = %clip.label, error = %e, "failed to sample clip");
                let mut report = empty_report(clip, config, describer.model());
                report.error = Some(error_chain(&e));
                report
            }
            Err(e) => return Err(e),
        };

        on_report(&report)?;
        summary.add(&report);
    }

    info!(
        clips = summary.clips,
        failed_clips = summary.failed_clips,
        frames = summary.frames,
        failed_frames = summary.failed_frames,
        total_cost_usd = summary.total_cost_usd,
        "batch complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use image::RgbImage;
    use serde_json::Value;

    use super::*;
    use crate::clip::ClipMetadata;
    use crate::describe::FrameDescription;
    use crate::error::DescribeError;
    use crate::sampler::sample_frames;
    use crate::sampler::testing::SyntheticStream;

    /// Answers with a canned description and fails on selected calls.
    struct FakeDescriber {
        calls: Cell<usize>,
        fail_on: Vec<usize>,
        prompts: RefCell<Vec<String>>,
    }

    impl FakeDescriber {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                calls: Cell::new(0),
                fail_on,
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl Describer for FakeDescriber {
        fn model(&self) -> &str {
            "fake-vision"
        }

        fn describe(&self, image: &RgbImage, prompt: &str) -> Result<FrameDescription, DescribeError> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            self.prompts.borrow_mut().push(prompt.to_string());
            if self.fail_on.contains(&call) {
                return Err(DescribeError::Status {
                    status: 429,
                    body: "quota exceeded".into(),
                });
            }
            Ok(FrameDescription {
                description: format!("frame {call} shade {}", image.get_pixel(0, 0)[0]),
                cost_usd: 0.001,
                input_tokens: 100,
                output_tokens: 10,
            })
        }
    }

    fn clip() -> Clip {
        Clip {
            label: "clip_00".into(),
            video: Vec::new(),
            metadata: ClipMetadata {
                worker_id: Value::from(1),
                factory_id: Value::from(5),
                duration_sec: Some(420.0),
                ..ClipMetadata::default()
            },
        }
    }

    fn config(mode: Mode) -> PipelineConfig {
        PipelineConfig {
            mode,
            request_delay: Duration::ZERO,
            ..PipelineConfig::default()
        }
    }

    fn sampled(config: &PipelineConfig) -> Vec<SampledFrame> {
        let mut stream = SyntheticStream::per_frame_ticks(2, 420);
        sample_frames(&mut stream, &config.sampling_policy().unwrap()).unwrap()
    }

    #[test]
    fn mode_selects_frame_budget() {
        assert_eq!(config(Mode::SingleFramePreview).sampling_policy().unwrap().max_frames, Some(1));
        assert_eq!(config(Mode::WindowedSample).sampling_policy().unwrap().max_frames, Some(3));
        assert_eq!(config(Mode::FullVideoSample).sampling_policy().unwrap().max_frames, None);
        assert_eq!(sampled(&config(Mode::FullVideoSample)).len(), 42);
    }

    #[test]
    fn mode_parses_cli_names() {
        for mode in [Mode::SingleFramePreview, Mode::WindowedSample, Mode::FullVideoSample] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
        assert!("batch".parse::<Mode>().is_err());
    }

    #[test]
    fn describes_frames_in_order_and_sums_cost() {
        let config = config(Mode::WindowedSample);
        let frames = sampled(&config);
        let describer = FakeDescriber::new(vec![]);

        let report = describe_frames(&clip(), &frames, &describer, &config, None).unwrap();
        assert_eq!(report.total_frames, 3);
        assert_eq!(report.analysis_type, "windowed");
        assert_eq!(report.model, "fake-vision");
        assert_eq!(report.worker_id, Value::from(1));
        let times: Vec<f64> = report.results.iter().map(|r| r.time_sec).collect();
        assert_eq!(times, vec![0.0, 10.0, 20.0]);
        assert!((report.total_cost_usd - 0.003).abs() < 1e-12);
        assert!(describer.prompts.borrow().iter().all(|p| p == DEFAULT_PROMPT));
    }

    #[test]
    fn batch_modes_record_failures_and_continue() {
        let config = config(Mode::WindowedSample);
        let frames = sampled(&config);
        let describer = FakeDescriber::new(vec![1]);

        let report = describe_frames(&clip(), &frames, &describer, &config, None).unwrap();
        assert_eq!(describer.calls.get(), 3);
        assert_eq!(report.total_frames, 3);
        assert_eq!(report.failed_frames(), 1);
        let failed = &report.results[1];
        assert!(failed.analysis.is_none());
        assert!(failed.error.as_deref().unwrap().contains("429"));
        assert!((report.total_cost_usd - 0.002).abs() < 1e-12);
    }

    #[test]
    fn debug_frame_failure_does_not_stop_description() {
        let tmp = tempfile::tempdir().unwrap();
        let frames_dir = tmp.path().join("frames");
        let renderer = DebugRenderer::new(&frames_dir, None).unwrap();
        std::fs::remove_dir(&frames_dir).unwrap();

        let config = config(Mode::WindowedSample);
        let frames = sampled(&config);
        let describer = FakeDescriber::new(vec![]);

        let report =
            describe_frames(&clip(), &frames, &describer, &config, Some(&renderer)).unwrap();
        assert_eq!(describer.calls.get(), 3);
        assert_eq!(report.failed_frames(), 0);
        assert!(!frames_dir.exists());
    }

    #[test]
    fn preview_halts_on_failure() {
        let config = config(Mode::SingleFramePreview);
        let frames = sampled(&config);
        let describer = FakeDescriber::new(vec![0]);

        let result = describe_frames(&clip(), &frames, &describer, &config, None);
        assert!(matches!(result, Err(PipelineError::Describe { frame: 0, .. })));
    }

    #[test]
    fn undecodable_clip_is_reported_and_batch_continues() {
        let config = config(Mode::WindowedSample);
        let describer = FakeDescriber::new(vec![]);
        let clips = vec![clip(), clip()];
        let mut seen = Vec::new();

        let summary = run_batch(&clips, &describer, &config, |report| {
            seen.push(report.clone());
            Ok(())
        })
        .unwrap();

        assert_eq!(summary.clips, 2);
        assert_eq!(summary.failed_clips, 2);
        assert_eq!(summary.frames, 0);
        assert_eq!(describer.calls.get(), 0);
        assert!(seen[0].error.as_deref().unwrap().contains("empty"));
    }

    #[test]
    fn invalid_interval_fails_before_any_clip() {
        let config = PipelineConfig {
            interval_sec: 0.0,
            ..config(Mode::WindowedSample)
        };
        let describer = FakeDescriber::new(vec![]);
        let mut reports = 0;
        let result = run_batch(&[clip()], &describer, &config, |_| {
            reports += 1;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(PipelineError::Sample(SampleError::InvalidArgument(_)))
        ));
        assert_eq!(reports, 0);
    }

    #[test]
    fn analyze_clip_surfaces_decode_errors() {
        let config = config(Mode::SingleFramePreview);
        let result = analyze_clip(&clip(), &FakeDescriber::new(vec![]), &config);
        assert!(matches!(result, Err(PipelineError::Sample(SampleError::Decode(_)))));
    }

    #[test]
    fn summary_accumulates_reports() {
        let config = config(Mode::WindowedSample);
        let frames = sampled(&config);
        let ok = describe_frames(&clip(), &frames, &FakeDescriber::new(vec![]), &config, None).unwrap();
        let partial = describe_frames(&clip(), &frames, &FakeDescriber::new(vec![2]), &config, None).unwrap();

        let mut summary = RunSummary::default();
        summary.add(&ok);
        summary.add(&partial);
        assert_eq!(summary.clips, 2);
        assert_eq!(summary.frames, 6);
        assert_eq!(summary.failed_frames, 1);
        assert!((summary.total_cost_usd - 0.005).abs() < 1e-12);
    }
}
