use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::thread::{self, JoinHandle};

use image::RgbImage;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use super::frame::Frame;
use super::{FrameSource, Rational, StreamInfo};
use crate::error::DecodeError;

/// Bytes of ffmpeg diagnostics kept for error messages.
const STDERR_LIMIT: usize = 16 * 1024;

/// How to invoke one external program.
#[derive(Debug, Clone)]
struct Tool {
    name: &'static str,
    program: OsString,
    leading_args: Vec<OsString>,
}

impl Tool {
    fn system(name: &'static str) -> Self {
        Self {
            name,
            program: name.into(),
            leading_args: Vec::new(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args);
        command
    }
}

/// The ffprobe / ffmpeg pair driven by the decoder.
#[derive(Debug, Clone)]
struct Toolchain {
    ffprobe: Tool,
    ffmpeg: Tool,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            ffprobe: Tool::system("ffprobe"),
            ffmpeg: Tool::system("ffmpeg"),
        }
    }
}

fn run_ffprobe(tool: &Tool, path: &Path, entries: &[&str]) -> Result<String, DecodeError> {
    let output = tool
        .command()
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(entries)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| DecodeError::Spawn {
            tool: tool.name,
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(%stderr, ?path, "ffprobe failed");
        return Err(DecodeError::Unreadable(stderr));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Read width, height, frame rate and time base of the first video stream.
fn probe(tool: &Tool, path: &Path) -> Result<StreamInfo, DecodeError> {
    info!(?path, "probing video metadata with ffprobe");

    let stdout = run_ffprobe(
        tool,
        path,
        &[
            "-show_entries",
            "stream=width,height,avg_frame_rate,r_frame_rate,time_base",
            "-of",
            "default=noprint_wrappers=1",
        ],
    )?;

    let info = parse_stream_entries(&stdout)?;
    info!(
        width = info.width,
        height = info.height,
        frame_rate = %info.frame_rate,
        time_base = %info.time_base,
        "probe completed"
    );
    Ok(info)
}

/// Parse `key=value` lines printed by ffprobe for one stream.
fn parse_stream_entries(stdout: &str) -> Result<StreamInfo, DecodeError> {
    let mut width = None;
    let mut height = None;
    let mut avg_frame_rate = None;
    let mut r_frame_rate = None;
    let mut time_base = None;

    for line in stdout.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "width" => width = value.parse::<u32>().ok(),
            "height" => height = value.parse::<u32>().ok(),
            "avg_frame_rate" => avg_frame_rate = value.parse::<Rational>().ok(),
            "r_frame_rate" => r_frame_rate = value.parse::<Rational>().ok(),
            "time_base" => time_base = value.parse::<Rational>().ok(),
            _ => {}
        }
    }

    // ffprobe prints nothing at all when the selector matches no stream.
    let (Some(width), Some(height)) = (width, height) else {
        if stdout.trim().is_empty() {
            return Err(DecodeError::NoVideoStream);
        }
        return Err(DecodeError::InvalidMetadata(format!(
            "missing dimensions in probe output: {stdout:?}"
        )));
    };
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidMetadata(format!(
            "invalid video dimensions: {width}x{height}"
        )));
    }

    let frame_rate = match avg_frame_rate {
        Some(r) if r.is_usable() => r,
        _ => {
            warn!(?avg_frame_rate, ?r_frame_rate, "average frame rate unavailable, using r_frame_rate");
            r_frame_rate.unwrap_or(Rational::new(0, 1))
        }
    };
    let time_base = time_base.unwrap_or(Rational::new(0, 1));

    Ok(StreamInfo {
        width,
        height,
        frame_rate,
        time_base,
    })
}

/// Timestamp ticks covered by one frame, if the stream says.
fn ticks_per_frame(info: &StreamInfo) -> Option<f64> {
    let tb = info.time_base;
    let fps = info.frame_rate;
    if !tb.is_usable() || !fps.is_usable() {
        return None;
    }
    // (1 / fps) / time_base
    Some((fps.den as f64 * tb.den as f64) / (fps.num as f64 * tb.num as f64))
}

/// Read the presentation timestamps of every video packet, in presentation order.
///
/// This only demuxes the container, it does not decode.
fn probe_packet_pts(tool: &Tool, path: &Path, info: &StreamInfo) -> Result<Vec<i64>, DecodeError> {
    let stdout = run_ffprobe(tool, path, &["-show_entries", "packet=pts", "-of", "csv=p=0"])?;
    let raw = parse_packet_pts(&stdout);

    let missing = raw.iter().filter(|pts| pts.is_none()).count();
    if missing > 0 {
        warn!(missing, packets = raw.len(), "packets without pts, interpolating");
    }

    let mut pts = fill_missing_pts(&raw, ticks_per_frame(info).unwrap_or(0.0));
    pts.sort_unstable();
    debug!(packets = pts.len(), "probed packet timestamps");
    Ok(pts)
}

/// One entry per packet line; `None` where ffprobe printed `N/A`.
fn parse_packet_pts(stdout: &str) -> Vec<Option<i64>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split(',')
                .next()
                .and_then(|value| value.trim().parse::<i64>().ok())
        })
        .collect()
}

/// Replace missing timestamps with estimates one frame step from their neighbours,
/// keeping every packet in its slot.
fn fill_missing_pts(raw: &[Option<i64>], step: f64) -> Vec<i64> {
    let anchor = raw
        .iter()
        .enumerate()
        .find_map(|(i, pts)| pts.map(|pts| (i, pts)));
    let offset = |frames: usize| (frames as f64 * step).round() as i64;

    let mut filled: Vec<i64> = Vec::with_capacity(raw.len());
    for (i, pts) in raw.iter().enumerate() {
        let value = match (*pts, filled.last()) {
            (Some(pts), _) => pts,
            (None, Some(&prev)) => prev + offset(1),
            (None, None) => match anchor {
                Some((k, pts)) => pts - offset(k - i),
                None => offset(i),
            },
        };
        filled.push(value);
    }
    filled
}

/// The ffmpeg invocation that streams raw RGB24 frames to stdout.
///
/// Rotation metadata is ignored so frames keep the probed coded dimensions.
fn decode_command(tool: &Tool, path: &Path) -> Command {
    let mut command = tool.command();
    command
        .args(["-nostdin", "-v", "error", "-noautorotate", "-i"])
        .arg(path)
        .args([
            "-map", "0:v:0",
            "-vsync", "passthrough",
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "pipe:1",
        ]);
    command
}

/// Keep reading ffmpeg's diagnostics so it never blocks on a full pipe.
fn drain_stderr(mut pipe: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut kept = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let room = STDERR_LIMIT.saturating_sub(kept.len());
                    kept.extend_from_slice(&buf[..n.min(room)]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&kept).trim().to_string()
    })
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
pub struct VideoDecoder {
    child: Child,
    stderr: Option<JoinHandle<String>>,
    info: StreamInfo,
    packet_pts: Vec<i64>,
    frame_count: u32,
    frame_bytes: usize,
    finished: bool,
    // Keeps in-memory input on disk until the decoder is dropped.
    _spool: Option<NamedTempFile>,
}

impl VideoDecoder {
    /// Open a video file for decoding.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        Self::open_with(path, &Toolchain::default())
    }

    fn open_with(path: &Path, tools: &Toolchain) -> Result<Self, DecodeError> {
        if !path.exists() {
            return Err(DecodeError::Unreadable(format!(
                "video file does not exist: {}",
                path.display()
            )));
        }

        let info = probe(&tools.ffprobe, path)?;
        let packet_pts = probe_packet_pts(&tools.ffprobe, path, &info)?;

        info!(?path, "spawning ffmpeg decoder process");

        let mut child = decode_command(&tools.ffmpeg, path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                tool: tools.ffmpeg.name,
                source,
            })?;
        let stderr = child.stderr.take().map(drain_stderr);

        let frame_bytes = (info.width as usize) * (info.height as usize) * 3;

        info!(
            width = info.width,
            height = info.height,
            packets = packet_pts.len(),
            frame_bytes,
            "video decoder opened"
        );

        Ok(Self {
            child,
            stderr,
            info,
            packet_pts,
            frame_count: 0,
            frame_bytes,
            finished: false,
            _spool: None,
        })
    }

    /// Open an in-memory encoded video.
    ///
    /// MP4 containers are not generally readable from a non-seekable pipe, so
    /// the bytes are spooled to a temporary file that lives as long as the
    /// decoder.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut spool = NamedTempFile::new()?;
        spool.write_all(bytes)?;
        spool.flush()?;
        debug!(path = ?spool.path(), bytes = bytes.len(), "spooled video bytes");

        let mut decoder = Self::open(spool.path())?;
        decoder._spool = Some(spool);
        Ok(decoder)
    }

    /// Presentation timestamp of the given frame, extrapolated from the frame
    /// rate past the last known packet.
    fn pts_for(&self, frame_number: u32) -> i64 {
        let index = frame_number as usize;
        if let Some(&pts) = self.packet_pts.get(index) {
            return pts;
        }

        let (base, known) = match self.packet_pts.last() {
            Some(&last) => (last, self.packet_pts.len() - 1),
            None => (0, 0),
        };
        match ticks_per_frame(&self.info) {
            Some(step) => base + ((index - known) as f64 * step).round() as i64,
            None => base,
        }
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }

    /// Reap the child once stdout is exhausted and surface a decode failure.
    fn finish(&mut self) -> Result<(), DecodeError> {
        self.finished = true;
        let status = self.child.wait()?;
        let stderr = self.collect_stderr();

        if status.success() {
            if !stderr.is_empty() {
                warn!(%stderr, "ffmpeg reported decode errors");
            }
            return Ok(());
        }

        error!(%stderr, ?status, frame = self.frame_count, "ffmpeg exited with failure");
        if stderr.is_empty() {
            return Err(DecodeError::Unreadable(format!("ffmpeg exited with {status}")));
        }
        Err(DecodeError::Unreadable(stderr))
    }
}

impl FrameSource for VideoDecoder {
    fn info(&self) -> StreamInfo {
        self.info
    }

    /// Read the next frame from the ffmpeg pipe, or `None` if the video is finished.
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.finished {
            return Ok(None);
        }

        let Some(stdout) = self.child.stdout.as_mut() else {
            return Err(DecodeError::Unreadable("ffmpeg stdout not available".into()));
        };

        let mut buf = vec![0u8; self.frame_bytes];
        let mut read = 0;

        while read < self.frame_bytes {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        info!(total_frames = self.frame_count, "video stream ended");
                        self.finish()?;
                        return Ok(None);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = self.frame_bytes,
                        frame = self.frame_count,
                        "ffmpeg stream ended mid-frame"
                    );
                    return Err(DecodeError::Truncated {
                        read,
                        expected: self.frame_bytes,
                    });
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(frame = self.frame_count, %e, "failed to read from ffmpeg pipe");
                    return Err(e.into());
                }
            }
        }

        let image = RgbImage::from_raw(self.info.width, self.info.height, buf).ok_or_else(|| {
            DecodeError::InvalidMetadata("raw frame does not match stream dimensions".into())
        })?;

        let frame_number = self.frame_count;
        let pts = self.pts_for(frame_number);
        self.frame_count += 1;

        debug!(frame_number, pts, "decoded frame");

        Ok(Some(Frame {
            image,
            frame_number,
            pts,
        }))
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        info!(total_frames = self.frame_count, "closing video decoder");
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        self.collect_stderr();
    }
}
