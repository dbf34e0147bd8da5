use std::io;

/// Failure to open or decode an encoded video.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("video buffer is empty")]
    Empty,

    #[error("video is not a readable container: {0}")]
    Unreadable(String),

    #[error("container exposes no video stream")]
    NoVideoStream,

    #[error("invalid stream metadata: {0}")]
    InvalidMetadata(String),

    #[error("cannot convert timestamps with {what} {num}/{den}")]
    InvalidTimeBase {
        what: &'static str,
        num: i64,
        den: i64,
    },

    #[error("decoder stream ended mid-frame (read {read}/{expected} bytes)")]
    Truncated { read: usize, expected: usize },

    #[error("failed to run {tool}, is ffmpeg installed?")]
    Spawn {
        tool: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("decoder io error")]
    Io(#[from] io::Error),
}

/// Errors produced by the frame sampler.
#[derive(thiserror::Error, Debug)]
pub enum SampleError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Failure to obtain clips from a local directory or a remote archive.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read archive")]
    Archive(#[source] io::Error),

    #[error("invalid clip metadata in {name}")]
    Metadata {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("clip io error on {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("clip not found: {0}")]
    NotFound(String),

    #[error("no clips could be obtained")]
    NoClips,
}

/// Failure of a single description request.
#[derive(thiserror::Error, Debug)]
pub enum DescribeError {
    #[error("failed to encode frame")]
    Encode(#[from] image::ImageError),

    #[error("description request failed")]
    Transport(#[from] reqwest::Error),

    #[error("description service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("description service returned no content")]
    EmptyResponse,
}

/// Errors that stop a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error("frame {frame} could not be described")]
    Describe {
        frame: usize,
        #[source]
        source: DescribeError,
    },

    #[error("failed to write report to {path}")]
    Report {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize report")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to save debug frame")]
    Debug(#[source] image::ImageError),
}
