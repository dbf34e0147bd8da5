pub mod decoder;
pub mod frame;

use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;

use self::frame::Frame;

/// A rational number as reported in stream metadata (`30000/1001`, `1/15360`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// True when both parts are non-zero, i.e. the value can be used on either
    /// side of a division.
    pub fn is_usable(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || DecodeError::InvalidMetadata(format!("not a rational: {s:?}"));
        match s.split_once('/') {
            Some((num, den)) => Ok(Rational {
                num: num.trim().parse().map_err(|_| invalid())?,
                den: den.trim().parse().map_err(|_| invalid())?,
            }),
            None => Ok(Rational {
                num: s.parse().map_err(|_| invalid())?,
                den: 1,
            }),
        }
    }
}

/// Metadata of the first video stream, read once when a source is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Nominal frames per second.
    pub frame_rate: Rational,
    /// Seconds per presentation timestamp tick.
    pub time_base: Rational,
}

/// A decoded video stream that yields frames in presentation order.
pub trait FrameSource {
    fn info(&self) -> StreamInfo;

    /// Decode the next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError>;
}
