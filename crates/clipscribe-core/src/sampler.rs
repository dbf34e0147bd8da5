use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::config::{DEFAULT_FRAMES_PER_CLIP, DEFAULT_INTERVAL_SEC};
use crate::error::{DecodeError, SampleError};
use crate::video::decoder::VideoDecoder;
use crate::video::frame::Frame;
use crate::video::{FrameSource, StreamInfo};

/// How raw presentation timestamps are converted into seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// `pts * time_base`, correct for any container.
    #[default]
    StreamTimeBase,
    /// `pts / frame_rate`, which assumes one timestamp tick per frame. Only
    /// exact for streams whose time base is the frame-rate reciprocal.
    FrameRateTicks,
}

impl fmt::Display for TimestampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampMode::StreamTimeBase => write!(f, "time-base"),
            TimestampMode::FrameRateTicks => write!(f, "frame-rate"),
        }
    }
}

impl FromStr for TimestampMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time-base" => Ok(TimestampMode::StreamTimeBase),
            "frame-rate" => Ok(TimestampMode::FrameRateTicks),
            other => Err(format!(
                "unknown timestamp mode {other:?}, expected time-base or frame-rate"
            )),
        }
    }
}

/// Converts raw timestamps of one stream into seconds.
#[derive(Debug, Clone, Copy)]
struct Clock {
    num: f64,
    den: f64,
}

impl Clock {
    fn new(info: &StreamInfo, mode: TimestampMode) -> Result<Self, DecodeError> {
        let clock = match mode {
            TimestampMode::StreamTimeBase => {
                let tb = info.time_base;
                if !tb.is_usable() {
                    return Err(DecodeError::InvalidTimeBase {
                        what: "time base",
                        num: tb.num,
                        den: tb.den,
                    });
                }
                Clock {
                    num: tb.num as f64,
                    den: tb.den as f64,
                }
            }
            TimestampMode::FrameRateTicks => {
                let fps = info.frame_rate;
                if !fps.is_usable() {
                    return Err(DecodeError::InvalidTimeBase {
                        what: "frame rate",
                        num: fps.num,
                        den: fps.den,
                    });
                }
                Clock {
                    num: fps.den as f64,
                    den: fps.num as f64,
                }
            }
        };
        Ok(clock)
    }

    fn seconds(&self, pts: i64) -> f64 {
        pts as f64 * self.num / self.den
    }
}

/// Parameters of one sampling call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicy {
    /// Seconds the watermark advances after each selected frame.
    pub interval_sec: f64,
    /// Upper bound on selected frames, or None to sample the whole stream.
    pub max_frames: Option<usize>,
    pub timestamp_mode: TimestampMode,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            interval_sec: DEFAULT_INTERVAL_SEC,
            max_frames: Some(DEFAULT_FRAMES_PER_CLIP),
            timestamp_mode: TimestampMode::default(),
        }
    }
}

impl SamplingPolicy {
    pub fn new(interval_sec: f64, max_frames: Option<usize>) -> Result<Self, SampleError> {
        let policy = Self {
            interval_sec,
            max_frames,
            ..Self::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_timestamp_mode(mut self, mode: TimestampMode) -> Self {
        self.timestamp_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<(), SampleError> {
        // Written so that NaN is rejected as well.
        if !(self.interval_sec > 0.0) {
            return Err(SampleError::InvalidArgument(format!(
                "interval_sec must be > 0, got {}",
                self.interval_sec
            )));
        }
        Ok(())
    }

    fn is_full(&self, selected: usize) -> bool {
        self.max_frames.is_some_and(|max| selected >= max)
    }
}

/// A frame selected by the sampler with its estimated time.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub frame: Frame,
    pub timestamp_seconds: f64,
}

/// Sample frames from any decoded stream.
///
/// A frame is kept when its timestamp reaches the watermark, which then
/// advances by the interval. Decoding stops once the output is full, so a
/// bounded sample of a long video only decodes its beginning.
pub fn sample_frames<S: FrameSource + ?Sized>(
    source: &mut S,
    policy: &SamplingPolicy,
) -> Result<Vec<SampledFrame>, SampleError> {
    policy.validate()?;

    let info = source.info();
    let clock = Clock::new(&info, policy.timestamp_mode)?;

    let mut target_time = 0.0;
    let mut selected: Vec<SampledFrame> = Vec::new();
    let mut decoded = 0usize;

    loop {
        if policy.is_full(selected.len()) {
            break;
        }

        let Some(frame) = source.next_frame()? else {
            break;
        };
        decoded += 1;

        let timestamp_seconds = clock.seconds(frame.pts);
        if timestamp_seconds < target_time {
            continue;
        }

        debug!(
            frame_number = frame.frame_number,
            pts = frame.pts,
            timestamp_seconds,
            target_time,
            "selected frame"
        );
        selected.push(SampledFrame {
            frame,
            timestamp_seconds,
        });
        target_time += policy.interval_sec;
    }

    info!(
        selected = selected.len(),
        decoded,
        interval_sec = policy.interval_sec,
        max_frames = ?policy.max_frames,
        timestamp_mode = %policy.timestamp_mode,
        "frame sampling complete"
    );

    Ok(selected)
}

/// Decode an in-memory video and sample frames from it.
///
/// The policy is validated before any decoder work starts.
pub fn extract_frames(
    video_bytes: &[u8],
    policy: &SamplingPolicy,
) -> Result<Vec<SampledFrame>, SampleError> {
    policy.validate()?;
    let mut decoder = VideoDecoder::from_bytes(video_bytes)?;
    sample_frames(&mut decoder, policy)
}

#[cfg(test)]
pub(crate) mod testing {
    use image::RgbImage;

    use crate::error::DecodeError;
    use crate::video::frame::Frame;
    use crate::video::{FrameSource, Rational, StreamInfo};

    /// An in-memory stream of tiny frames with evenly spaced timestamps.
    pub struct SyntheticStream {
        pub info: StreamInfo,
        pub total_frames: u32,
        pub ticks_per_frame: i64,
        pub decoded: u32,
    }

    impl SyntheticStream {
        /// A stream whose time base is exactly one tick per frame.
        pub fn per_frame_ticks(fps: i64, seconds: u32) -> Self {
            Self {
                info: StreamInfo {
                    width: 2,
                    height: 2,
                    frame_rate: Rational::new(fps, 1),
                    time_base: Rational::new(1, fps),
                },
                total_frames: fps as u32 * seconds,
                ticks_per_frame: 1,
                decoded: 0,
            }
        }

        /// A stream with an MP4-style fine-grained time base.
        pub fn fine_time_base(fps: i64, timescale: i64, seconds: u32) -> Self {
            Self {
                info: StreamInfo {
                    width: 2,
                    height: 2,
                    frame_rate: Rational::new(fps, 1),
                    time_base: Rational::new(1, timescale),
                },
                total_frames: fps as u32 * seconds,
                ticks_per_frame: timescale / fps,
                decoded: 0,
            }
        }
    }

    impl FrameSource for SyntheticStream {
        fn info(&self) -> StreamInfo {
            self.info
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
            if self.decoded >= self.total_frames {
                return Ok(None);
            }
            let frame_number = self.decoded;
            self.decoded += 1;
            let shade = (frame_number % 256) as u8;
            Ok(Some(Frame {
                image: RgbImage::from_pixel(2, 2, image::Rgb([shade, shade, shade])),
                frame_number,
                pts: frame_number as i64 * self.ticks_per_frame,
            }))
        }
    }
}
